use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use minijinja::{Environment, Error as TemplateError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

const CHAT_TEMPLATE_NAME: &str = "hf_chat_template";

/// ChatML, used when neither an explicit template nor the model config provides one.
pub const DEFAULT_CHAT_TEMPLATE: &str = "{% for message in messages %}\
<|im_start|>{{ message.role }}\n{{ message.content }}<|im_end|>\n\
{% endfor %}\
{% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The ordered system-then-user pair every request is rendered from.
pub fn system_user_pair(system_message: &str, user_message: &str) -> [ChatMessage; 2] {
    [
        ChatMessage::system(system_message),
        ChatMessage::user(user_message),
    ]
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    bos_token: &'a str,
    eos_token: &'a str,
    messages: &'a [ChatMessage],
    add_generation_prompt: bool,
}

/// A compiled Hugging Face style chat template.
pub struct ChatTemplate {
    env: Environment<'static>,
    bos_token: String,
    eos_token: String,
}

impl ChatTemplate {
    pub fn new(source: String, bos_token: String, eos_token: String) -> Result<Self> {
        // compiled once per loaded model
        let template_src: &'static str = Box::leak(source.into_boxed_str());
        let mut env = Environment::new();
        env.add_function("raise_exception", raise_exception);
        env.add_template(CHAT_TEMPLATE_NAME, template_src)
            .map_err(|err| anyhow!("failed to compile chat template: {err}"))?;

        Ok(Self {
            env,
            bos_token,
            eos_token,
        })
    }

    /// Build from a parsed `tokenizer_config.json`. A template file at `override_path`
    /// wins over the one embedded in the config.
    pub fn from_tokenizer_config(config: &Value, override_path: Option<&Path>) -> Result<Self> {
        let bos_token = special_token(config, "bos_token").unwrap_or_default();
        let eos_token = special_token(config, "eos_token").unwrap_or_default();

        let source = match override_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "using chat template override");
                fs::read_to_string(path)
                    .with_context(|| format!("failed to read chat template ({})", path.display()))?
            }
            Some(path) => {
                warn!(
                    path = %path.display(),
                    "CHAT_TEMPLATE_PATH does not exist"
                );
                embedded_template(config)
            }
            None => embedded_template(config),
        };

        Self::new(source, bos_token, eos_token)
    }

    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    pub fn render(&self, messages: &[ChatMessage]) -> Result<String> {
        let ctx = TemplateContext {
            bos_token: &self.bos_token,
            eos_token: &self.eos_token,
            messages,
            add_generation_prompt: true,
        };
        self.env
            .get_template(CHAT_TEMPLATE_NAME)
            .and_then(|tmpl| tmpl.render(&ctx))
            .map_err(|err| anyhow!("chat template rendering failed: {err}"))
    }
}

fn raise_exception(message: String) -> Result<String, TemplateError> {
    Err(TemplateError::new(ErrorKind::InvalidOperation, message))
}

fn embedded_template(config: &Value) -> String {
    match config.get("chat_template") {
        Some(Value::String(source)) => source.clone(),
        // newer configs ship a list of named templates
        Some(Value::Array(named)) => named
            .iter()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some("default"))
            .or_else(|| named.first())
            .and_then(|entry| entry.get("template"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CHAT_TEMPLATE.to_string()),
        _ => {
            warn!("model config has no chat_template; falling back to ChatML");
            DEFAULT_CHAT_TEMPLATE.to_string()
        }
    }
}

/// Special tokens appear either as plain strings or as `{"content": ...}` objects.
fn special_token(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(token) => Some(token.clone()),
        Value::Object(obj) => obj.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_template_appends_generation_prompt() {
        let template =
            ChatTemplate::new(DEFAULT_CHAT_TEMPLATE.into(), String::new(), String::new()).unwrap();
        let rendered = template
            .render(&system_user_pair("be brief", "hello"))
            .unwrap();

        assert_eq!(
            rendered,
            "<|im_start|>system\nbe brief<|im_end|>\n<|im_start|>user\nhello<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn config_template_and_object_tokens_are_used() {
        let config = json!({
            "bos_token": {"content": "<s>"},
            "eos_token": "</s>",
            "chat_template": "{{ bos_token }}{% for m in messages %}[{{ m.role }}]{{ m.content }}{% endfor %}{{ eos_token }}"
        });
        let template = ChatTemplate::from_tokenizer_config(&config, None).unwrap();

        assert_eq!(template.eos_token(), "</s>");
        assert_eq!(
            template.render(&system_user_pair("s", "u")).unwrap(),
            "<s>[system]s[user]u</s>"
        );
    }

    #[test]
    fn named_template_list_prefers_default() {
        let config = json!({
            "chat_template": [
                {"name": "tool_use", "template": "tools"},
                {"name": "default", "template": "plain"}
            ]
        });
        let template = ChatTemplate::from_tokenizer_config(&config, None).unwrap();
        assert_eq!(template.render(&[]).unwrap(), "plain");
    }

    #[test]
    fn raise_exception_surfaces_as_render_error() {
        let template = ChatTemplate::new(
            "{{ raise_exception('roles must alternate') }}".into(),
            String::new(),
            String::new(),
        )
        .unwrap();
        let err = template.render(&[]).unwrap_err();
        assert!(err.to_string().contains("roles must alternate"));
    }

    #[test]
    fn missing_override_falls_back_to_config() {
        let config = json!({ "chat_template": "cfg" });
        let template = ChatTemplate::from_tokenizer_config(
            &config,
            Some(Path::new("/nonexistent/chat_template.jinja")),
        )
        .unwrap();
        assert_eq!(template.render(&[]).unwrap(), "cfg");
    }
}
