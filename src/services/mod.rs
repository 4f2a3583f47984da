//! Background services supporting the ingesters

pub mod actors;
pub mod universe;

pub use actors::ActorRefreshService;
pub use universe::UniverseService;
