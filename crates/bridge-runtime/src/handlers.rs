//! Reply handlers served by this runtime.

use bridge_core::{DispatchTable, HandlerResult};
use serde_json::Value;
use tracing::info;

/// `POST /invoice`
pub fn create_invoice(payload: &Value) -> HandlerResult {
    let invoice = &payload["body"]["invoice"];
    info!(
        buyer_id = invoice["buyerID"].as_str().unwrap_or_default(),
        total = invoice["amount"]["totalAmount"].as_f64().unwrap_or_default(),
        currency = invoice["amount"]["currencyCode"].as_str().unwrap_or_default(),
        "Creating invoice"
    );
    HandlerResult::success("invoice created")
}

/// `GET /sla`
pub fn sla(_payload: &Value) -> HandlerResult {
    HandlerResult::success("sla")
}

/// Dispatch table for the operations this service answers.
pub fn dispatch_table() -> DispatchTable {
    DispatchTable::new()
        .with_handler("/invoice.post", create_invoice)
        .with_handler("/sla", sla)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_operations() {
        assert_eq!(dispatch_table().operations(), vec!["/invoice.post", "/sla"]);
    }

    #[test]
    fn test_create_invoice() {
        let payload = json!({
            "method": "POST",
            "path": "/invoice",
            "body": {
                "invoice": {
                    "buyerID": "b-1",
                    "amount": {"totalAmount": 100, "currencyCode": "USD"},
                    "appID": "app"
                }
            }
        });
        assert_eq!(
            create_invoice(&payload),
            HandlerResult::success("invoice created")
        );
        assert_eq!(
            create_invoice(&Value::Null),
            HandlerResult::success("invoice created")
        );
    }
}
