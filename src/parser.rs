// 3.0: turns the raw, untrusted AI payload into typed operations. the payload
// is whatever the model produced: usually a JSON object wrapped in prose or a
// markdown fence. one bad instruction never sinks the rest; it is quarantined
// as a ParseError and parsing continues. only a payload with no decodable
// instruction sequence at all fails the whole cycle.

use crate::operation::{Operation, OperationKind};
use crate::types::{AssetId, Leverage, Price, Quote};
use rust_decimal::Decimal;
use serde_json::Value;

// hard protocol bound on AI-requested leverage; policy may be stricter
pub const MAX_REQUESTED_LEVERAGE: u32 = 125;

// 3.1: parse result. operations and per-item rejections side by side.
#[derive(Debug, Clone)]
pub struct DecisionPayload {
    pub analysis: Option<String>,
    pub operations: Vec<Operation>,
    pub rejected: Vec<ParseError>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("instruction {index}: {reason}")]
pub struct ParseError {
    pub index: usize,
    pub reason: ParseReason,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseReason {
    #[error("not an object")]
    NotAnObject,
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not a number: '{value}'")]
    NotANumber { field: &'static str, value: String },
    #[error("field '{0}' must be positive")]
    NonPositive(&'static str),
    #[error("leverage {0} outside 1..=125")]
    LeverageOutOfRange(Decimal),
    #[error("leverage must be a whole number")]
    LeverageNotInteger,
    #[error("asset identifier is empty")]
    EmptyAsset,
}

// whole-payload failures. these abort the decision cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),
    #[error("payload has no 'actions' sequence")]
    NoActions,
    #[error("'actions' is not a sequence")]
    NotASequence,
}

/// Parse a raw decision payload into operations plus quarantined errors.
pub fn parse_decision(raw: &str) -> Result<DecisionPayload, PayloadError> {
    let cleaned = extract_json(raw);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| PayloadError::NotJson(e.to_string()))?;

    let (analysis, items) = match &value {
        // bare array of instructions is accepted as-is
        Value::Array(items) => (None, items.clone()),
        Value::Object(map) => {
            let analysis = map
                .get("analysis")
                .or_else(|| map.get("commentary"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let actions = map.get("actions").ok_or(PayloadError::NoActions)?;
            let items = actions
                .as_array()
                .ok_or(PayloadError::NotASequence)?
                .clone();
            (analysis, items)
        }
        _ => return Err(PayloadError::NoActions),
    };

    let mut operations = Vec::new();
    let mut rejected = Vec::new();

    for (index, item) in items.iter().enumerate() {
        match parse_operation(item) {
            Ok(op) => operations.push(op),
            Err(reason) => rejected.push(ParseError { index, reason }),
        }
    }

    Ok(DecisionPayload {
        analysis,
        operations,
        rejected,
    })
}

// 3.2: models wrap JSON in ```json fences or bury it in prose. take the fenced
// block when present, otherwise the outermost {...} or [...] span.
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    let obj_start = text.find('{');
    let arr_start = text.find('[');
    let array_first = match (obj_start, arr_start) {
        (Some(o), Some(a)) => a < o,
        (None, Some(_)) => true,
        _ => false,
    };

    if array_first {
        if let (Some(start), Some(end)) = (arr_start, text.rfind(']')) {
            if end > start {
                return &text[start..=end];
            }
        }
    } else if let (Some(start), Some(end)) = (obj_start, text.rfind('}')) {
        if end > start {
            return &text[start..=end];
        }
    }

    text.trim()
}

fn parse_operation(item: &Value) -> Result<Operation, ParseReason> {
    let obj = item.as_object().ok_or(ParseReason::NotAnObject)?;

    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ParseReason::MissingField("action"))?;
    let kind =
        OperationKind::parse(action).ok_or_else(|| ParseReason::UnknownAction(action.to_string()))?;

    if kind == OperationKind::Hold {
        return Ok(Operation::Hold);
    }

    let asset = parse_asset(obj)?;

    let op = match kind {
        OperationKind::BuySpot => Operation::BuySpot {
            asset,
            quantity: positive_decimal(obj, "quantity")?,
        },
        OperationKind::SellSpot => Operation::SellSpot {
            asset,
            quantity: positive_decimal(obj, "quantity")?,
        },
        OperationKind::OpenLong => Operation::OpenLong {
            asset,
            margin: Quote::new(positive_decimal(obj, "margin")?),
            leverage: parse_leverage(obj, "leverage")?,
        },
        OperationKind::OpenShort => Operation::OpenShort {
            asset,
            margin: Quote::new(positive_decimal(obj, "margin")?),
            leverage: parse_leverage(obj, "leverage")?,
        },
        OperationKind::CloseLong => Operation::CloseLong { asset, at: None },
        OperationKind::CloseShort => Operation::CloseShort { asset, at: None },
        OperationKind::AddMargin => Operation::AddMargin {
            asset,
            amount: Quote::new(positive_decimal(obj, "amount")?),
        },
        OperationKind::ReduceMargin => Operation::ReduceMargin {
            asset,
            amount: Quote::new(positive_decimal(obj, "amount")?),
        },
        OperationKind::IncreaseLeverage => Operation::IncreaseLeverage {
            asset,
            target: parse_leverage(obj, "leverage")?,
        },
        OperationKind::DecreaseLeverage => Operation::DecreaseLeverage {
            asset,
            target: parse_leverage(obj, "leverage")?,
        },
        OperationKind::SetStopLoss => Operation::SetStopLoss {
            asset,
            price: parse_price(obj, "stop_price")?,
        },
        OperationKind::SetTakeProfit => Operation::SetTakeProfit {
            asset,
            price: parse_price(obj, "target_price")?,
        },
        OperationKind::Hold => unreachable!("handled above"),
    };

    Ok(op)
}

fn parse_asset(obj: &serde_json::Map<String, Value>) -> Result<AssetId, ParseReason> {
    // "coin" is the legacy wire name some prompts still produce
    let raw = obj
        .get("asset")
        .or_else(|| obj.get("coin"))
        .and_then(Value::as_str)
        .ok_or(ParseReason::MissingField("asset"))?;

    let asset = AssetId::new(raw);
    if asset.is_empty() {
        return Err(ParseReason::EmptyAsset);
    }
    Ok(asset)
}

// 3.3: numbers arrive as JSON numbers or numeric strings. both convert through
// their decimal string form so nothing is lost to float rounding.
fn decimal_field(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Decimal, ParseReason> {
    let value = obj.get(field).ok_or(ParseReason::MissingField(field))?;

    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(ParseReason::NotANumber {
                field,
                value: other.to_string(),
            })
        }
    };

    text.parse::<Decimal>().map_err(|_| ParseReason::NotANumber {
        field,
        value: text,
    })
}

fn positive_decimal(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Decimal, ParseReason> {
    let value = decimal_field(obj, field)?;
    if value <= Decimal::ZERO {
        return Err(ParseReason::NonPositive(field));
    }
    Ok(value)
}

fn parse_price(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Price, ParseReason> {
    Price::new(decimal_field(obj, field)?).ok_or(ParseReason::NonPositive(field))
}

fn parse_leverage(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Leverage, ParseReason> {
    let value = decimal_field(obj, field)?;
    if !value.fract().is_zero() {
        return Err(ParseReason::LeverageNotInteger);
    }
    if value > Decimal::from(MAX_REQUESTED_LEVERAGE) {
        return Err(ParseReason::LeverageOutOfRange(value));
    }
    Leverage::new(value).ok_or(ParseReason::LeverageOutOfRange(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_plain_payload() {
        let raw = r#"{
            "analysis": "rotating into btc",
            "actions": [
                {"action": "BUY_SPOT", "asset": "bitcoin", "quantity": 0.5},
                {"action": "OPEN_LONG", "asset": "ethereum", "margin": 500, "leverage": 5}
            ]
        }"#;

        let payload = parse_decision(raw).unwrap();
        assert_eq!(payload.analysis.as_deref(), Some("rotating into btc"));
        assert_eq!(payload.operations.len(), 2);
        assert!(payload.rejected.is_empty());

        match &payload.operations[1] {
            Operation::OpenLong { asset, margin, leverage } => {
                assert_eq!(asset.as_str(), "ethereum");
                assert_eq!(margin.value(), dec!(500));
                assert_eq!(leverage.value(), dec!(5));
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn strips_markdown_fence() {
        let raw = "Here is my plan:\n```json\n{\"actions\": [{\"action\": \"HOLD\"}]}\n```\nDone.";
        let payload = parse_decision(raw).unwrap();
        assert_eq!(payload.operations, vec![Operation::Hold]);
    }

    #[test]
    fn extracts_object_from_prose() {
        let raw = "I think {\"actions\": [{\"action\": \"CLOSE_LONG\", \"coin\": \"solana\"}]} fits";
        let payload = parse_decision(raw).unwrap();
        assert_eq!(payload.operations.len(), 1);
        assert_eq!(payload.operations[0].asset().unwrap().as_str(), "solana");
    }

    #[test]
    fn bare_array_is_accepted() {
        let raw = r#"[{"action": "HOLD"}]"#;
        let payload = parse_decision(raw).unwrap();
        assert_eq!(payload.operations.len(), 1);
    }

    #[test]
    fn quarantines_bad_items_keeps_good_ones() {
        let raw = r#"{"actions": [
            {"action": "BUY_SPOT", "asset": "bitcoin", "quantity": 1},
            {"action": "BUY_SPOT", "asset": "bitcoin", "quantity": -3},
            {"action": "DO_A_BACKFLIP", "asset": "bitcoin"},
            {"action": "OPEN_LONG", "asset": "eth", "margin": 100, "leverage": 500}
        ]}"#;

        let payload = parse_decision(raw).unwrap();
        assert_eq!(payload.operations.len(), 1);
        assert_eq!(payload.rejected.len(), 3);
        assert_eq!(payload.rejected[0].index, 1);
        assert_eq!(payload.rejected[0].reason, ParseReason::NonPositive("quantity"));
        assert!(matches!(payload.rejected[1].reason, ParseReason::UnknownAction(_)));
        assert!(matches!(payload.rejected[2].reason, ParseReason::LeverageOutOfRange(_)));
    }

    #[test]
    fn coerces_numeric_strings() {
        let raw = r#"{"actions": [{"action": "OPEN_SHORT", "asset": "btc", "margin": "250.5", "leverage": "10"}]}"#;
        let payload = parse_decision(raw).unwrap();
        match &payload.operations[0] {
            Operation::OpenShort { margin, leverage, .. } => {
                assert_eq!(margin.value(), dec!(250.5));
                assert_eq!(leverage.value(), dec!(10));
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn fractional_leverage_is_rejected() {
        let raw = r#"{"actions": [{"action": "OPEN_LONG", "asset": "btc", "margin": 100, "leverage": 2.5}]}"#;
        let payload = parse_decision(raw).unwrap();
        assert!(payload.operations.is_empty());
        assert_eq!(payload.rejected[0].reason, ParseReason::LeverageNotInteger);
    }

    #[test]
    fn garbage_payload_fails_loudly() {
        assert!(matches!(parse_decision("no structure here at all"), Err(PayloadError::NotJson(_))));
        assert!(matches!(
            parse_decision(r#"{"note": "missing actions"}"#),
            Err(PayloadError::NoActions)
        ));
        assert!(matches!(
            parse_decision(r#"{"actions": "not a list"}"#),
            Err(PayloadError::NotASequence)
        ));
    }

    #[test]
    fn missing_fields_are_reported() {
        let raw = r#"{"actions": [
            {"action": "SET_STOP_LOSS", "asset": "btc"},
            {"asset": "btc", "quantity": 1}
        ]}"#;
        let payload = parse_decision(raw).unwrap();
        assert_eq!(payload.rejected.len(), 2);
        assert_eq!(payload.rejected[0].reason, ParseReason::MissingField("stop_price"));
        assert_eq!(payload.rejected[1].reason, ParseReason::MissingField("action"));
    }
}
