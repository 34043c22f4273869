use connector_core::ConnectorError;
use model::{DepthSnapshot, PriceLevel};
use serde::Deserialize;

/// Combined stream wrapper that holds generic event data.
#[derive(Debug, Deserialize)]
pub struct CombinedStreamWrapper {
    pub stream: String,
    pub data: serde_json::Value,
}

#[derive(Debug)]
pub enum ParsedMessage {
    Depth(DepthSnapshot),
    Unknown,
}

/// Reject levels whose price or quantity is not an exact decimal.
fn validate_levels(side: &str, levels: &[PriceLevel]) -> Result<(), ConnectorError> {
    for level in levels {
        if level.price_decimal().is_err() || level.quantity_decimal().is_err() {
            return Err(ConnectorError::Parse(format!(
                "invalid {} level [{}, {}]",
                side, level.price, level.quantity
            )));
        }
    }
    Ok(())
}

fn parse_depth(value: serde_json::Value) -> Result<ParsedMessage, ConnectorError> {
    if value.get("lastUpdateId").is_none() {
        return Ok(ParsedMessage::Unknown);
    }

    let snapshot: DepthSnapshot =
        serde_json::from_value(value).map_err(|e| ConnectorError::Parse(e.to_string()))?;
    validate_levels("bid", &snapshot.bids)?;
    validate_levels("ask", &snapshot.asks)?;

    Ok(ParsedMessage::Depth(snapshot))
}

/// Parse one text frame from a partial book depth stream.
///
/// Accepts the raw form (`{"lastUpdateId":..}`) and the combined-stream form
/// (`{"stream":"..","data":{..}}`). Anything else (subscription acks, other
/// events) is `Unknown`.
pub fn parse_message(text: &str) -> Result<ParsedMessage, ConnectorError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ConnectorError::Parse(e.to_string()))?;

    if value.get("stream").is_some() && value.get("data").is_some() {
        let wrapper: CombinedStreamWrapper =
            serde_json::from_value(value).map_err(|e| ConnectorError::Parse(e.to_string()))?;
        return parse_depth(wrapper.data);
    }

    parse_depth(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_raw_depth() {
        let json = r#"{
            "lastUpdateId": 160,
            "bids": [
                ["23450.00", "1.5"],
                ["23449.50", "2.0"]
            ],
            "asks": [
                ["23455.00", "0.8"],
                ["23456.00", "0"]
            ]
        }"#;

        match parse_message(json).unwrap() {
            ParsedMessage::Depth(depth) => {
                assert_eq!(depth.last_update_id, 160);
                assert_eq!(depth.bids.len(), 2);
                assert_eq!(depth.bids[0].price, "23450.00");
                assert_eq!(depth.bids[1].quantity_decimal().unwrap(), dec!(2.0));
                assert_eq!(depth.asks[1], PriceLevel::new("23456.00", "0"));
            }
            other => panic!("Expected Depth, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_combined_stream_depth() {
        let json = r#"{
            "stream": "btcusdt@depth5",
            "data": {
                "lastUpdateId": 1005,
                "bids": [["50000.50", "0.1"]],
                "asks": [["50001.00", "0.2"]]
            }
        }"#;

        match parse_message(json).unwrap() {
            ParsedMessage::Depth(depth) => {
                assert_eq!(depth.last_update_id, 1005);
                assert_eq!(depth.best_ask().unwrap().price, "50001.00");
            }
            other => panic!("Expected Depth, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_book() {
        let json = r#"{"lastUpdateId": 7, "bids": [], "asks": []}"#;
        match parse_message(json).unwrap() {
            ParsedMessage::Depth(depth) => {
                assert!(depth.bids.is_empty());
                assert!(depth.asks.is_empty());
            }
            other => panic!("Expected Depth, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscription_ack_is_unknown() {
        let json = r#"{"result": null, "id": 1}"#;
        assert!(matches!(parse_message(json).unwrap(), ParsedMessage::Unknown));
    }

    #[test]
    fn test_parse_rejects_non_decimal_level() {
        let json = r#"{"lastUpdateId": 1, "bids": [["abc", "1"]], "asks": []}"#;
        let err = parse_message(json).unwrap_err();
        assert!(matches!(err, ConnectorError::Parse(msg) if msg.contains("bid")));
    }

    #[test]
    fn test_parse_rejects_short_level() {
        let json = r#"{"lastUpdateId": 1, "bids": [["100"]], "asks": []}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            parse_message("not json"),
            Err(ConnectorError::Parse(_))
        ));
    }
}
