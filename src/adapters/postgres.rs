use crate::domain::{Classification, Direction, NormalizedEvent, SourceChain, StoredEvent};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Idempotent persistence gate keyed by event identifier.
///
/// `insert_if_absent` must be safe for concurrent calls with the same
/// identifier: exactly one caller observes `true`.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<StoredEvent>>;

    /// Insert the event unless a row with the same identifier already exists.
    /// Returns `true` when a new row was written.
    async fn insert_if_absent(
        &self,
        event: &NormalizedEvent,
        classification: Classification,
    ) -> Result<bool>;

    /// Most recently recorded events, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<StoredEvent>>;
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> StoredEvent {
    StoredEvent {
        id: row.get("id"),
        source_chain: row
            .get::<String, _>("source_chain")
            .parse()
            .unwrap_or(SourceChain::ExchangeStream),
        identifier: row.get("identifier"),
        counterparty_from: row.get("counterparty_from"),
        counterparty_to: row.get("counterparty_to"),
        instrument: row.get("instrument"),
        direction: row
            .get::<String, _>("direction")
            .parse()
            .unwrap_or(Direction::Unknown),
        price: row.get("price"),
        size: row.get("size"),
        notional: row.get("notional"),
        occurred_at: row.get("occurred_at"),
        participants: row.get("participants"),
        fill_count: row.get::<i32, _>("fill_count").max(0) as u32,
        is_whale: row.get("is_whale"),
        is_known_actor: row.get("is_known_actor"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl DedupStore for PostgresStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<StoredEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_chain, identifier, counterparty_from, counterparty_to,
                   instrument, direction, price, size, notional, occurred_at,
                   participants, fill_count, is_whale, is_known_actor, created_at
            FROM whale_events
            WHERE identifier = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_event))
    }

    async fn insert_if_absent(
        &self,
        event: &NormalizedEvent,
        classification: Classification,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO whale_events (
                source_chain, identifier, counterparty_from, counterparty_to,
                instrument, direction, price, size, notional, occurred_at,
                participants, fill_count, is_whale, is_known_actor
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (identifier) DO NOTHING
            "#,
        )
        .bind(event.source_chain.as_str())
        .bind(&event.identifier)
        .bind(&event.counterparty_from)
        .bind(&event.counterparty_to)
        .bind(&event.instrument)
        .bind(event.direction.as_str())
        .bind(event.price)
        .bind(event.size)
        .bind(event.notional)
        .bind(event.occurred_at)
        .bind(&event.participants)
        .bind(event.fill_count as i32)
        .bind(classification.is_whale)
        .bind(classification.is_known_actor)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            debug!("Recorded event {}", event.identifier);
        } else {
            debug!("Event {} already recorded, skipping", event.identifier);
        }
        Ok(inserted)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_chain, identifier, counterparty_from, counterparty_to,
                   instrument, direction, price, size, notional, occurred_at,
                   participants, fill_count, is_whale, is_known_actor, created_at
            FROM whale_events
            ORDER BY occurred_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_event).collect())
    }
}
