use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};

/// Spending categories the extractor is asked to choose from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Food,
    Transport,
    Shopping,
    Culture,
    Medical,
    Education,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Food,
        Category::Transport,
        Category::Shopping,
        Category::Culture,
        Category::Medical,
        Category::Education,
        Category::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Food => "식비",
            Category::Transport => "교통비",
            Category::Shopping => "쇼핑",
            Category::Culture => "문화생활",
            Category::Medical => "의료비",
            Category::Education => "교육비",
            Category::Other => "기타",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymentMethod {
    #[default]
    Card,
    Cash,
    BankTransfer,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::Card,
        PaymentMethod::Cash,
        PaymentMethod::BankTransfer,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "카드",
            PaymentMethod::Cash => "현금",
            PaymentMethod::BankTransfer => "계좌이체",
        }
    }
}

/// Slice from the first `{` to the last `}` inclusive, if both exist in that order.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Decode a candidate slice as a JSON object. Field names and types are not checked.
pub fn decode_object(candidate: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(candidate).map_err(|err| anyhow!("invalid transaction JSON: {err}"))
}

/// Record returned whenever the model output cannot be decoded.
pub fn fallback_record(input: &str) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("amount".into(), Value::from(0));
    record.insert("description".into(), Value::from(input));
    record.insert("category".into(), Value::from(Category::Other.label()));
    record.insert(
        "payment_method".into(),
        Value::from(PaymentMethod::default().label()),
    );
    record
}

/// Extract-then-decode over raw model output.
pub fn parse_model_output(raw: &str) -> Result<Map<String, Value>> {
    let candidate = extract_json_object(raw).ok_or_else(|| anyhow!("no JSON object found"))?;
    decode_object(candidate)
}

/// Typed view of a decoded transaction object, as served by the API.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub amount: f64,
    pub description: String,
    pub category: String,
    pub payment_method: String,
}

impl TransactionRecord {
    pub fn from_object(object: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            amount: amount_field(object)?,
            description: text_field(object, "description")?,
            category: text_field(object, "category")?,
            payment_method: text_field(object, "payment_method")?,
        })
    }
}

fn amount_field(object: &Map<String, Value>) -> Result<f64> {
    match object.get("amount") {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| anyhow!("amount out of range: {n}")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("amount is not numeric: {s:?}")),
        Some(other) => bail!("amount is not numeric: {other}"),
        None => bail!("missing field 'amount'"),
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Result<String> {
    match object.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => bail!("field '{key}' is not a string: {other}"),
        None => bail!("missing field '{key}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_between_first_open_and_last_close() {
        let raw = "결과: {\"amount\": 1} 그리고 {\"x\": 2} 끝";
        assert_eq!(
            extract_json_object(raw),
            Some("{\"amount\": 1} 그리고 {\"x\": 2}")
        );
    }

    #[test]
    fn no_braces_or_reversed_braces_yield_nothing() {
        assert_eq!(extract_json_object("금액은 8000원"), None);
        assert_eq!(extract_json_object("} oops {"), None);
        assert_eq!(extract_json_object("only { open"), None);
    }

    #[test]
    fn decodes_model_output_verbatim() {
        let raw = r#"네! {"amount": 8000, "description": "김치찌개", "category": "식비", "payment_method": "카드"}"#;
        let parsed = parse_model_output(raw).unwrap();
        assert_eq!(
            Value::Object(parsed),
            json!({"amount": 8000, "description": "김치찌개", "category": "식비", "payment_method": "카드"})
        );
    }

    #[test]
    fn extra_fields_are_kept() {
        let parsed = parse_model_output(r#"{"amount": 1, "note": "x"}"#).unwrap();
        assert_eq!(parsed.get("note"), Some(&json!("x")));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_model_output("{amount: 8000,}").is_err());
        assert!(parse_model_output("no json here").is_err());
    }

    #[test]
    fn fallback_record_uses_input_as_description() {
        assert_eq!(
            Value::Object(fallback_record("택시 15000원")),
            json!({"amount": 0, "description": "택시 15000원", "category": "기타", "payment_method": "카드"})
        );
    }

    #[test]
    fn record_accepts_numeric_strings() {
        let object = json!({"amount": " 4500 ", "description": "커피", "category": "식비", "payment_method": "현금"});
        let record = TransactionRecord::from_object(object.as_object().unwrap()).unwrap();
        assert_eq!(record.amount, 4500.0);
        assert_eq!(record.payment_method, "현금");
    }

    #[test]
    fn record_rejects_missing_or_mistyped_fields() {
        let missing = json!({"amount": 1, "description": "a", "category": "기타"});
        let err = TransactionRecord::from_object(missing.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("payment_method"));

        let mistyped = json!({"amount": true, "description": "a", "category": "기타", "payment_method": "카드"});
        assert!(TransactionRecord::from_object(mistyped.as_object().unwrap()).is_err());
    }
}
