use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::service::transaction::{Category, PaymentMethod};

// NOTE:
// Prompts are Korean because the coach and the transaction vocabulary
// (categories, payment methods) are Korean-facing.

#[derive(Deserialize)]
struct PromptFile {
    coach: String,
    transaction_parser: String,
    generation_error: String,
}

macro_rules! prompt_file {
    ($lang:literal) => {
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/lang/",
            $lang,
            "/prompts.json"
        ))
    };
}

static KO_PROMPTS: Lazy<PromptFile> =
    Lazy::new(|| serde_json::from_str(prompt_file!("ko")).expect("invalid prompt config"));

static TRANSACTION_PARSER_PROMPT: Lazy<String> = Lazy::new(|| {
    let categories = Category::ALL
        .iter()
        .map(Category::label)
        .collect::<Vec<_>>()
        .join(", ");
    let payment_methods = PaymentMethod::ALL
        .iter()
        .map(PaymentMethod::label)
        .collect::<Vec<_>>()
        .join(", ");

    KO_PROMPTS
        .transaction_parser
        .replace("{categories}", &categories)
        .replace("{payment_methods}", &payment_methods)
        .replace("{default_payment_method}", PaymentMethod::default().label())
});

/// Persona for free-form chat.
pub fn coach_system_prompt() -> &'static str {
    &KO_PROMPTS.coach
}

/// Extraction instructions asking for a four-field JSON object.
pub fn transaction_parser_prompt() -> &'static str {
    &TRANSACTION_PARSER_PROMPT
}

/// Apology returned in place of a reply when generation fails.
pub fn generation_error_reply(cause: &str) -> String {
    KO_PROMPTS.generation_error.replace("{error}", cause)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coach_prompt_names_the_persona() {
        assert!(coach_system_prompt().starts_with("당신은 천마비고"));
    }

    #[test]
    fn parser_prompt_lists_every_label() {
        let prompt = transaction_parser_prompt();
        assert!(prompt.contains("(식비, 교통비, 쇼핑, 문화생활, 의료비, 교육비, 기타 중 하나)"));
        assert!(prompt.contains("(카드, 현금, 계좌이체 중 하나, 명시되지 않으면 '카드')"));
        assert!(!prompt.contains("{categories}"));
        assert!(prompt.ends_with(
            r#"{"amount": 8000, "description": "김치찌개", "category": "식비", "payment_method": "카드"}"#
        ));
    }

    #[test]
    fn generation_error_embeds_cause() {
        assert_eq!(
            generation_error_reply("boom"),
            "죄송합니다. 응답 생성 중 오류가 발생했습니다: boom"
        );
    }
}
