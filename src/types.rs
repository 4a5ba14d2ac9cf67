//! Type definitions for the command bridge
//!
//! Commands sent to the Expert Advisor, their payloads, and request ids.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

/// Action-specific payload: field name to value
pub type Payload = Map<String, Value>;

/// Identifies one submitted command from enqueue to delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actions understood by the Expert Advisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    PlaceOrder,
    GetPositions,
    GetOrders,
    DeleteOrder,
    ClosePosition,
    GetStats,
    /// Consolidate take-profit levels so positions survive while the terminal is closed
    SafeShutdown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::PlaceOrder => "PLACE_ORDER",
            Action::GetPositions => "GET_POSITIONS",
            Action::GetOrders => "GET_ORDERS",
            Action::DeleteOrder => "DELETE_ORDER",
            Action::ClosePosition => "CLOSE_POSITION",
            Action::GetStats => "GET_STATS",
            Action::SafeShutdown => "SAFE_SHUTDOWN",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged instruction for the next connecting client
///
/// Serializes as `{"action": ..., "data": {...}}`, or `{"action": ...}` when
/// the action takes no parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self { action, data: None }
    }

    pub fn with_data(action: Action, data: Payload) -> Self {
        Self {
            action,
            data: Some(data),
        }
    }

    pub fn place_order(order: &OrderRequest) -> Self {
        Self::with_data(Action::PlaceOrder, order.to_payload())
    }

    pub fn get_positions() -> Self {
        Self::new(Action::GetPositions)
    }

    pub fn get_orders() -> Self {
        Self::new(Action::GetOrders)
    }

    pub fn delete_order(ticket: u64) -> Self {
        Self::with_data(Action::DeleteOrder, ticket_payload(ticket))
    }

    pub fn close_position(ticket: u64) -> Self {
        Self::with_data(Action::ClosePosition, ticket_payload(ticket))
    }

    pub fn get_stats() -> Self {
        Self::new(Action::GetStats)
    }

    pub fn safe_shutdown() -> Self {
        Self::new(Action::SafeShutdown)
    }

    /// Wire representation, optionally tagged with the request id
    pub fn to_wire(&self, tag: Option<RequestId>) -> Result<Vec<u8>, serde_json::Error> {
        match tag {
            None => serde_json::to_vec(self),
            Some(id) => {
                let mut value = serde_json::to_value(self)?;
                if let Value::Object(ref mut map) = value {
                    map.insert("request_id".to_string(), Value::String(id.to_string()));
                }
                serde_json::to_vec(&value)
            }
        }
    }
}

fn ticket_payload(ticket: u64) -> Payload {
    let mut data = Payload::new();
    data.insert("ticket".to_string(), json!(ticket));
    data
}

/// Order placement request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_type: String,
    pub symbol: String,
    pub price: f64,
    pub sl: f64,
    pub tp_levels: Vec<f64>,
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,
    #[serde(default = "default_deviation")]
    pub deviation: i64,
    #[serde(default = "default_comment")]
    pub comment: String,
    #[serde(default = "default_magic_number")]
    pub magic_number: i64,
    #[serde(default = "default_partial_close_percent")]
    pub partial_close_percent: f64,
}

fn default_lot_size() -> f64 { 0.1 }
fn default_deviation() -> i64 { 3 }
fn default_comment() -> String { "API Bridge".to_string() }
fn default_magic_number() -> i64 { 20250117 }
fn default_partial_close_percent() -> f64 { 20.0 }

impl OrderRequest {
    /// Check field ranges before the order is queued
    pub fn validate(&self) -> Result<(), String> {
        if self.order_type.trim().is_empty() {
            return Err("order_type must not be empty".to_string());
        }
        if self.symbol.trim().is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        if !self.price.is_finite() || !self.sl.is_finite() {
            return Err("price and sl must be finite numbers".to_string());
        }
        if let Some(level) = self.tp_levels.iter().find(|l| !l.is_finite()) {
            return Err(format!("invalid take-profit level: {}", level));
        }
        if !(self.lot_size.is_finite() && self.lot_size > 0.0) {
            return Err(format!("lot_size must be positive, got {}", self.lot_size));
        }
        if !(0.0..=100.0).contains(&self.partial_close_percent) {
            return Err(format!(
                "partial_close_percent must be within 0..=100, got {}",
                self.partial_close_percent
            ));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> Payload {
        let mut data = Payload::new();
        data.insert("order_type".to_string(), json!(self.order_type));
        data.insert("symbol".to_string(), json!(self.symbol));
        data.insert("price".to_string(), json!(self.price));
        data.insert("sl".to_string(), json!(self.sl));
        data.insert("tp_levels".to_string(), json!(self.tp_levels));
        data.insert("lot_size".to_string(), json!(self.lot_size));
        data.insert("deviation".to_string(), json!(self.deviation));
        data.insert("comment".to_string(), json!(self.comment));
        data.insert("magic_number".to_string(), json!(self.magic_number));
        data.insert(
            "partial_close_percent".to_string(),
            json!(self.partial_close_percent),
        );
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> OrderRequest {
        serde_json::from_value(json!({
            "order_type": "BUY",
            "symbol": "XAUUSD",
            "price": 2650.5,
            "sl": 2640.0,
            "tp_levels": [2655.0, 2660.0, 2665.0]
        }))
        .unwrap()
    }

    #[test]
    fn test_parameterless_command_has_no_data() {
        let wire = Command::get_stats().to_wire(None).unwrap();
        assert_eq!(wire, br#"{"action":"GET_STATS"}"#.to_vec());
    }

    #[test]
    fn test_ticket_commands() {
        let value = serde_json::to_value(Command::delete_order(12345)).unwrap();
        assert_eq!(value, json!({"action": "DELETE_ORDER", "data": {"ticket": 12345}}));

        let value = serde_json::to_value(Command::close_position(7)).unwrap();
        assert_eq!(value, json!({"action": "CLOSE_POSITION", "data": {"ticket": 7}}));
    }

    #[test]
    fn test_order_defaults() {
        let order = sample_order();
        assert_eq!(order.lot_size, 0.1);
        assert_eq!(order.deviation, 3);
        assert_eq!(order.magic_number, 20250117);
        assert_eq!(order.partial_close_percent, 20.0);
        assert!(order.validate().is_ok());

        let value = serde_json::to_value(Command::place_order(&order)).unwrap();
        assert_eq!(value["action"], "PLACE_ORDER");
        assert_eq!(value["data"]["tp_levels"], json!([2655.0, 2660.0, 2665.0]));
        assert_eq!(value["data"]["symbol"], "XAUUSD");
    }

    #[test]
    fn test_order_validation() {
        let mut order = sample_order();
        order.lot_size = 0.0;
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.symbol = "  ".to_string();
        assert!(order.validate().is_err());

        let mut order = sample_order();
        order.partial_close_percent = 150.0;
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_tagged_wire_format() {
        let id = RequestId::new();
        let wire = Command::get_orders().to_wire(Some(id)).unwrap();
        let value: Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(value["action"], "GET_ORDERS");
        assert_eq!(value["request_id"], id.to_string());
    }
}
