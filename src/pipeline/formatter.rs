//! Alert payload rendering
//!
//! Turns a classified event into the (message, title, sound) triple the
//! notification collaborator expects. Messages use the provider's HTML
//! subset.

use crate::domain::{Classification, Direction, NormalizedEvent, SourceChain};
use rust_decimal::Decimal;

/// Rendered notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPayload {
    pub title: String,
    pub message: String,
    pub sound: String,
}

/// Sound used for exchange trade alerts
const SOUND_TRADE: &str = "war_alarm";
/// Sound used for treasury transfer alerts
const SOUND_TRANSFER: &str = "cashregister";
/// Sound used for operational error notifications
const SOUND_ERROR: &str = "intermission";

/// Format an integer-valued amount with thousands separators
pub fn group_thousands(value: Decimal) -> String {
    let rounded = value.round();
    let raw = rounded.abs().to_string();
    let digits = raw.split('.').next().unwrap_or(&raw);

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Render a classified event into a notification payload
pub fn format_alert(event: &NormalizedEvent, classification: Classification) -> AlertPayload {
    match event.source_chain {
        SourceChain::ExchangeStream => format_trade_alert(event, classification),
        SourceChain::Tron | SourceChain::Ethereum => format_transfer_alert(event),
    }
}

fn format_trade_alert(event: &NormalizedEvent, classification: Classification) -> AlertPayload {
    let title = if classification.is_known_actor && !classification.is_whale {
        "Known Trader Alert".to_string()
    } else {
        "Whale Trade Alert".to_string()
    };

    let message = format!(
        "\u{1f40b} <b>{} {}</b>\n\
         Value: <b>${}</b>\n\
         Avg Price: {}\n\
         Size: {}\n\
         Fills: {}",
        event.instrument,
        event.direction,
        group_thousands(event.notional),
        event.price.round_dp(6).normalize(),
        event.size.round_dp(6).normalize(),
        event.fill_count,
    );

    AlertPayload {
        title,
        message,
        sound: SOUND_TRADE.to_string(),
    }
}

fn format_transfer_alert(event: &NormalizedEvent) -> AlertPayload {
    let (chain_name, scan_url) = match event.source_chain {
        SourceChain::Tron => (
            "Tether",
            format!("https://tronscan.org/#/transaction/{}", event.identifier),
        ),
        _ => (
            "Ether",
            format!("https://etherscan.io/tx/{}", event.identifier),
        ),
    };

    let type_display = match event.direction {
        Direction::Outflow => "<b>OUTFLOW</b> (Burn/Transfer)",
        Direction::Inflow => "<b>INFLOW</b> (Mint/Receive)",
        _ => "UNKNOWN",
    };

    let title = format!("{} Treasury Alert", chain_name);
    let message = format!(
        "\u{1f6a8} <b>{} Treasury Alert</b> \u{1f6a8}\n\
         Type: {}\n\
         Amount: <b>{} {}</b>\n\
         Sender: {}\n\
         Receiver: {}\n\
         <a href=\"{}\">View transaction</a>",
        chain_name,
        type_display,
        group_thousands(event.notional),
        event.instrument,
        event.counterparty_from.as_deref().unwrap_or("unknown"),
        event.counterparty_to.as_deref().unwrap_or("unknown"),
        scan_url,
    );

    AlertPayload {
        title,
        message,
        sound: SOUND_TRANSFER.to_string(),
    }
}

/// Render an operational error (polling failure etc.) into a payload
pub fn format_operational_error(component: &str, detail: &str) -> AlertPayload {
    AlertPayload {
        title: format!("{} Error", component),
        message: format!(
            "\u{26a0}\u{fe0f} <b>{} Error</b> \u{26a0}\u{fe0f}\n{}",
            component, detail
        ),
        sound: SOUND_ERROR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer_event(direction: Direction) -> NormalizedEvent {
        NormalizedEvent {
            source_chain: SourceChain::Tron,
            identifier: "txhash1".to_string(),
            counterparty_from: Some("TSender".to_string()),
            counterparty_to: Some("TKHuVq1oKVruCGLvqVexFs6dawKv6fQgFs".to_string()),
            instrument: "USDT".to_string(),
            direction,
            price: Decimal::ONE,
            size: dec!(150000000),
            notional: dec!(150000000),
            occurred_at: 1_700_000_000_000,
            participants: vec![],
            fill_count: 1,
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(dec!(0)), "0");
        assert_eq!(group_thousands(dec!(999)), "999");
        assert_eq!(group_thousands(dec!(1000)), "1,000");
        assert_eq!(group_thousands(dec!(1234567)), "1,234,567");
        assert_eq!(group_thousands(dec!(150000000.4)), "150,000,000");
        assert_eq!(group_thousands(dec!(-2500000)), "-2,500,000");
    }

    #[test]
    fn test_transfer_alert_inflow() {
        let payload = format_transfer_alert(&transfer_event(Direction::Inflow));
        assert_eq!(payload.title, "Tether Treasury Alert");
        assert_eq!(payload.sound, "cashregister");
        assert!(payload.message.contains("INFLOW"));
        assert!(payload.message.contains("Mint/Receive"));
        assert!(payload.message.contains("150,000,000 USDT"));
        assert!(payload.message.contains("tronscan.org"));
    }

    #[test]
    fn test_trade_alert_whale() {
        let event = NormalizedEvent {
            source_chain: SourceChain::ExchangeStream,
            identifier: "0xfill".to_string(),
            counterparty_from: None,
            counterparty_to: None,
            instrument: "ETH".to_string(),
            direction: Direction::Sell,
            price: dec!(3210.5),
            size: dec!(400),
            notional: dec!(1284200),
            occurred_at: 1_700_000_000_000,
            participants: vec!["0xabc".to_string()],
            fill_count: 3,
        };

        let payload = format_alert(
            &event,
            Classification {
                is_whale: true,
                is_known_actor: false,
            },
        );
        assert_eq!(payload.title, "Whale Trade Alert");
        assert_eq!(payload.sound, "war_alarm");
        assert!(payload.message.contains("ETH SELL"));
        assert!(payload.message.contains("$1,284,200"));
        assert!(payload.message.contains("Fills: 3"));
    }

    #[test]
    fn test_trade_alert_known_actor_only() {
        let mut event = transfer_event(Direction::Inflow);
        event.source_chain = SourceChain::ExchangeStream;
        event.direction = Direction::Buy;

        let payload = format_alert(
            &event,
            Classification {
                is_whale: false,
                is_known_actor: true,
            },
        );
        assert_eq!(payload.title, "Known Trader Alert");
    }

    #[test]
    fn test_operational_error_payload() {
        let payload = format_operational_error("TronGrid Polling", "request timed out");
        assert_eq!(payload.title, "TronGrid Polling Error");
        assert_eq!(payload.sound, "intermission");
        assert!(payload.message.contains("request timed out"));
    }
}
