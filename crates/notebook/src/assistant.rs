//! AI assistant used by `@ask` and `:explain`.
//!
//! Two providers are supported: Google Gemini (`generateContent`) and Groq
//! (OpenAI-compatible chat completions). A [`ChatAssistant`] keeps the
//! conversation history so follow-up questions have context.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sim_client::ErrorOutput;

pub const SYSTEM_PROMPT: &str = "You are an expert in 8085 microprocessor assembly programming. Provide clear, concise answers with code examples when appropriate.";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GROQ_BASE_URL: &str = "https://api.groq.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OUTPUT_TOKENS: u32 = 4096;
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Gemini,
    Groq,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Gemini => write!(f, "Gemini"),
            AiProvider::Groq => write!(f, "Groq"),
        }
    }
}

impl AiProvider {
    /// Cheap format check on an API key; does not contact the provider.
    pub fn validate_key(&self, key: &str) -> bool {
        let key = key.trim();
        match self {
            AiProvider::Gemini => key.starts_with("AIza") && key.len() >= 35,
            AiProvider::Groq => key.starts_with("gsk_") && key.len() >= 20,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Gemini => DEFAULT_GEMINI_MODEL,
            AiProvider::Groq => DEFAULT_GROQ_MODEL,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            AiProvider::Gemini => GEMINI_BASE_URL,
            AiProvider::Groq => GROQ_BASE_URL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("API key not configured. Please set your {0} API key.")]
    NotConfigured(AiProvider),

    #[error("Invalid API key. Please check your {0} API key.")]
    InvalidKey(AiProvider),

    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,

    #[error("AI model not available. The API version may have changed.")]
    ModelUnavailable,

    #[error("Unable to reach the AI provider: {0}")]
    Network(String),

    #[error("AI provider error: {0}")]
    Provider(String),
}

/// Something that answers free-form questions.
pub trait Assistant: Send + Sync {
    fn ask<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, AiError>>;
}

#[derive(Debug, Clone, Default)]
pub struct AssistantConfig {
    pub provider: AiProvider,
    pub api_key: Option<String>,
    /// Falls back to the provider's default model
    pub model: Option<String>,
    /// Overrides the provider endpoint (tests, proxies)
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
struct ChatMessage {
    role: Role,
    text: String,
}

/// Assistant backed by a hosted chat model.
pub struct ChatAssistant {
    http: reqwest::Client,
    config: AssistantConfig,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatAssistant {
    pub fn new(config: AssistantConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn provider(&self) -> AiProvider {
        self.config.provider
    }

    /// True when a key is present and passes the format check.
    pub fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|k| self.config.provider.validate_key(k))
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn model(&self) -> &str {
        self.config
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.provider.default_model())
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.config.provider.default_base_url())
            .trim_end_matches('/')
    }

    async fn send_message(&self, prompt: &str) -> Result<String, AiError> {
        let provider = self.config.provider;
        let key = match self.config.api_key.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => return Err(AiError::NotConfigured(provider)),
        };
        if !provider.validate_key(&key) {
            return Err(AiError::InvalidKey(provider));
        }

        let history = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let request = match provider {
            AiProvider::Gemini => {
                let url = format!(
                    "{}/v1beta/models/{}:generateContent",
                    self.base_url(),
                    self.model()
                );
                self.http
                    .post(url)
                    .header("x-goog-api-key", key)
                    .json(&gemini_body(&history, prompt))
            }
            AiProvider::Groq => {
                let url = format!("{}/openai/v1/chat/completions", self.base_url());
                self.http
                    .post(url)
                    .bearer_auth(key)
                    .json(&groq_body(self.model(), &history, prompt))
            }
        };

        debug!("[assistant] sending prompt to {} ({})", provider, self.model());
        let response = request
            .send()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AiError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            warn!("[assistant] {} returned HTTP {}", provider, status);
            return Err(classify_status(provider, status, &body));
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| AiError::Provider(e.to_string()))?;
        let text = match provider {
            AiProvider::Gemini => gemini_text(&value),
            AiProvider::Groq => groq_text(&value),
        }
        .ok_or_else(|| AiError::Provider("Empty response from model".to_string()))?;

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push(ChatMessage {
            role: Role::User,
            text: prompt.to_string(),
        });
        history.push(ChatMessage {
            role: Role::Assistant,
            text: text.clone(),
        });

        Ok(text)
    }
}

impl Assistant for ChatAssistant {
    fn ask<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, AiError>> {
        self.send_message(prompt).boxed()
    }
}

fn gemini_body(history: &[ChatMessage], prompt: &str) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({"role": role, "parts": [{"text": m.text}]})
        })
        .collect();
    contents.push(json!({"role": "user", "parts": [{"text": prompt}]}));

    json!({
        "systemInstruction": {"parts": [{"text": SYSTEM_PROMPT}]},
        "contents": contents,
        "generationConfig": {
            "maxOutputTokens": MAX_OUTPUT_TOKENS,
            "temperature": TEMPERATURE
        }
    })
}

fn groq_body(model: &str, history: &[ChatMessage], prompt: &str) -> Value {
    let mut messages = vec![json!({"role": "system", "content": SYSTEM_PROMPT})];
    messages.extend(history.iter().map(|m| {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        json!({"role": role, "content": m.text})
    }));
    messages.push(json!({"role": "user", "content": prompt}));

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": MAX_OUTPUT_TOKENS,
        "temperature": TEMPERATURE
    })
}

fn gemini_text(value: &Value) -> Option<String> {
    let parts = value
        .pointer("/candidates/0/content/parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

fn groq_text(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Map a non-2xx provider response to an [`AiError`].
pub fn classify_status(provider: AiProvider, status: u16, body: &str) -> AiError {
    match status {
        401 | 403 => AiError::InvalidKey(provider),
        429 => AiError::RateLimited,
        404 => AiError::ModelUnavailable,
        400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
            AiError::InvalidKey(provider)
        }
        _ => {
            let snippet: String = body.chars().take(200).collect();
            AiError::Provider(format!("HTTP {}: {}", status, snippet))
        }
    }
}

/// Prompt asking the assistant to explain an execution error in `code`.
pub fn explain_error(code: &str, error: &ErrorOutput) -> String {
    let detail = error.detail.as_ref();
    let error_type = detail
        .and_then(|d| d.kind.as_deref())
        .or(error.title.as_deref())
        .unwrap_or("Error");
    let error_line = detail
        .and_then(|d| d.line.as_deref().or(d.position.as_deref()))
        .unwrap_or("unknown");

    format!(
        "You are an expert in 8085 microprocessor assembly programming.\n\
         A student has encountered an error in their code. Please explain what went wrong and how to fix it.\n\n\
         Code:\n```assembly\n{code}\n```\n\n\
         Error: {error_type} on line {error_line}\n\
         Message: {message}\n\n\
         Please provide:\n\
         1. A clear explanation of what caused the error\n\
         2. How to fix it\n\
         3. A corrected version of the code if applicable\n\n\
         Keep your response concise and educational.",
        message = error.message,
    )
}
