//! Language-model provider adapters.
//!
//! The pipeline stays agnostic of vendor wire shapes behind the [`AiProvider`]
//! trait. Two implementations ship: an OpenAI-compatible chat-completions
//! client (also covers LM Studio, LocalAI, and friends) and an
//! Anthropic-shaped messages client. Both build the same fixed classification
//! prompt and expect a JSON descriptor back, tolerating fenced code blocks
//! and missing optional fields.
//!
//! The HTTP client always connects directly: routing through the host proxy
//! would make the extension intercept its own classification traffic.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::descriptor::{CookieCategory, CookieDescriptor, DescriptorSource, PrivacyImpact};

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONFIDENCE: f64 = 0.7;

const SYSTEM_PROMPT: &str = "You are a web cookie classification expert. \
Analyze cookies and return structured JSON data.";

/// Errors surfaced by a provider.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("ai provider not configured: {0}")]
    NotConfigured(String),
    #[error("ai endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("ai transport error: {0}")]
    Transport(String),
    #[error("ai response parse error: {0}")]
    Parse(String),
}

/// A classification together with the raw response text kept for audit.
#[derive(Debug, Clone)]
pub struct AiClassification {
    pub descriptor: CookieDescriptor,
    pub raw_response: String,
}

/// Vendor-neutral interface over a language-model service.
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_configured(&self) -> bool;
    fn classify(&self, cookie_name: &str, domain: &str) -> Result<AiClassification, AiError>;
    fn list_models(&self) -> Result<Vec<String>, AiError>;
}

/// Connection settings shared by both provider shapes.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL; the provider appends its own path segment.
    pub endpoint: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4".to_string(),
            endpoint: None,
        }
    }
}

fn build_client() -> Result<Client, AiError> {
    Client::builder()
        .no_proxy()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| AiError::Transport(err.to_string()))
}

fn build_prompt(cookie_name: &str, domain: &str) -> String {
    format!(
        "Analyze this web cookie and return ONLY valid JSON with these exact fields:\n\n\
         Cookie Name: {cookie_name}\n\
         Domain: {domain}\n\n\
         Return JSON with these fields:\n\
         {{\n\
         \x20 \"vendor\": \"company name\",\n\
         \x20 \"category\": \"Essential|Analytics|Advertising|Functional|Performance|Social Media|Security|Personalization\",\n\
         \x20 \"purpose\": \"1-2 sentence description\",\n\
         \x20 \"privacyImpact\": \"Low|Medium|High|Critical\",\n\
         \x20 \"isThirdParty\": true or false,\n\
         \x20 \"typicalExpiration\": \"e.g., Session, 90 days, 2 years\",\n\
         \x20 \"commonDomains\": [\"domain1.com\", \"domain2.com\"],\n\
         \x20 \"confidence\": 0.0 to 1.0,\n\
         \x20 \"notes\": \"any additional relevant information\"\n\
         }}\n\n\
         Return ONLY the JSON object, no markdown formatting or explanations."
    )
}

/// Strip leading/trailing fenced code blocks from a model answer.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// The JSON shape the prompt asks the model for. Every field is optional;
/// absent fields fall back to defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    vendor: Option<String>,
    category: Option<String>,
    purpose: Option<String>,
    privacy_impact: Option<String>,
    is_third_party: Option<bool>,
    typical_expiration: Option<String>,
    #[serde(default)]
    common_domains: Vec<String>,
    confidence: Option<f64>,
    notes: Option<String>,
}

/// Parse a model answer (possibly fenced) into a descriptor.
pub(crate) fn parse_descriptor_json(
    cookie_name: &str,
    content: &str,
) -> Result<CookieDescriptor, AiError> {
    let body = strip_code_fences(content);
    let raw: RawDescriptor = serde_json::from_str(body)
        .map_err(|err| AiError::Parse(format!("descriptor json: {err}")))?;

    Ok(CookieDescriptor {
        vendor: raw.vendor,
        category: raw
            .category
            .as_deref()
            .map(CookieCategory::parse_lenient)
            .unwrap_or(CookieCategory::Unknown),
        purpose: raw.purpose,
        privacy_impact: raw
            .privacy_impact
            .as_deref()
            .map(PrivacyImpact::parse_lenient)
            .unwrap_or(PrivacyImpact::Medium),
        third_party: raw.is_third_party.unwrap_or(false),
        typical_expiration: raw.typical_expiration,
        common_domains: raw.common_domains,
        notes: raw.notes,
        confidence: raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
        source: DescriptorSource::Ai,
        ..CookieDescriptor::new(cookie_name)
    })
}

fn join_endpoint(base: &str, segment: &str) -> String {
    if base.ends_with(segment) {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{segment}")
    } else {
        format!("{base}/{segment}")
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// OpenAI-compatible chat-completions client with bearer authentication.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AiError> {
        Ok(Self {
            client: build_client()?,
            config,
        })
    }

    fn base(&self) -> &str {
        self.config
            .endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
            .unwrap_or(DEFAULT_OPENAI_ENDPOINT)
    }

    fn uses_default_endpoint(&self) -> bool {
        self.base().contains("api.openai.com")
    }
}

impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn is_configured(&self) -> bool {
        // Local endpoints (LM Studio, LocalAI…) accept empty keys.
        if self.uses_default_endpoint() {
            !self.config.api_key.is_empty()
        } else {
            true
        }
    }

    fn classify(&self, cookie_name: &str, domain: &str) -> Result<AiClassification, AiError> {
        if !self.is_configured() {
            return Err(AiError::NotConfigured(
                "OpenAI API key is not set".to_string(),
            ));
        }

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(cookie_name, domain)},
            ],
            "temperature": 0.0,
            "max_tokens": 500,
        });

        let url = join_endpoint(self.base(), "chat/completions");
        let mut request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .map_err(|err| AiError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| AiError::Transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AiError::Status { status, body: text });
        }

        let chat: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| AiError::Parse(format!("chat completion envelope: {err}")))?;
        let content = chat
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| AiError::Parse("chat completion returned no choices".to_string()))?;

        let descriptor = parse_descriptor_json(cookie_name, &content)?;
        Ok(AiClassification {
            descriptor,
            raw_response: content,
        })
    }

    fn list_models(&self) -> Result<Vec<String>, AiError> {
        let url = join_endpoint(self.base(), "models");
        let mut request = self.client.get(&url);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .map_err(|err| AiError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| AiError::Transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AiError::Status { status, body: text });
        }

        let list: ModelList = serde_json::from_str(&text)
            .map_err(|err| AiError::Parse(format!("model list: {err}")))?;
        Ok(list.data.into_iter().map(|entry| entry.id).collect())
    }
}

/// Anthropic-shaped messages client authenticating via `x-api-key`.
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<MessageBlock>,
}

#[derive(Debug, Deserialize)]
struct MessageBlock {
    #[serde(default)]
    text: String,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AiError> {
        Ok(Self {
            client: build_client()?,
            config,
        })
    }

    fn base(&self) -> &str {
        self.config
            .endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
            .unwrap_or(DEFAULT_ANTHROPIC_ENDPOINT)
    }
}

impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "Anthropic"
    }

    fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn classify(&self, cookie_name: &str, domain: &str) -> Result<AiClassification, AiError> {
        if !self.is_configured() {
            return Err(AiError::NotConfigured(
                "Anthropic API key is not set".to_string(),
            ));
        }

        let body = json!({
            "model": self.config.model,
            "system": SYSTEM_PROMPT,
            "messages": [
                {"role": "user", "content": build_prompt(cookie_name, domain)},
            ],
            "temperature": 0,
            "max_tokens": 1024,
        });

        let url = join_endpoint(self.base(), "messages");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .map_err(|err| AiError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| AiError::Transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AiError::Status { status, body: text });
        }

        let messages: MessagesResponse = serde_json::from_str(&text)
            .map_err(|err| AiError::Parse(format!("messages envelope: {err}")))?;
        let content = messages
            .content
            .first()
            .map(|block| block.text.clone())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AiError::Parse("messages response had no text block".to_string()))?;

        let descriptor = parse_descriptor_json(cookie_name, &content)?;
        Ok(AiClassification {
            descriptor,
            raw_response: content,
        })
    }

    /// The messages API exposes no model listing; a static list backs the UI
    /// selector instead.
    fn list_models(&self) -> Result<Vec<String>, AiError> {
        Ok(vec![
            "claude-sonnet-4-20250514".to_string(),
            "claude-3-7-sonnet-20250219".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
        ])
    }
}

/// Pick a provider implementation from the configured provider name.
pub fn provider_for(
    provider_name: &str,
    config: ProviderConfig,
) -> Result<Box<dyn AiProvider>, AiError> {
    if provider_name.contains("Anthropic") {
        Ok(Box::new(AnthropicProvider::new(config)?))
    } else {
        Ok(Box::new(OpenAiProvider::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped_before_parsing() {
        let content = "```json\n{\"vendor\": \"Google\", \"category\": \"Analytics\"}\n```";
        let descriptor = parse_descriptor_json("_ga", content).unwrap();
        assert_eq!(descriptor.vendor.as_deref(), Some("Google"));
        assert_eq!(descriptor.category, CookieCategory::Analytics);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let descriptor = parse_descriptor_json("sid", "{}").unwrap();
        assert_eq!(descriptor.name, "sid");
        assert_eq!(descriptor.category, CookieCategory::Unknown);
        assert_eq!(descriptor.privacy_impact, PrivacyImpact::Medium);
        assert!(!descriptor.third_party);
        assert_eq!(descriptor.confidence, 0.7);
        assert_eq!(descriptor.source, DescriptorSource::Ai);
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let descriptor = parse_descriptor_json("sid", "{\"confidence\": 3.5}").unwrap();
        assert_eq!(descriptor.confidence, 1.0);
    }

    #[test]
    fn partial_json_is_a_typed_parse_error() {
        let err = parse_descriptor_json("sid", "{\"vendor\": \"Goo").unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
    }

    #[test]
    fn endpoint_normalization_appends_missing_segment() {
        assert_eq!(
            join_endpoint("http://localhost:1234/v1", "chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            join_endpoint("http://localhost:1234/v1/", "chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            join_endpoint("http://localhost:1234/v1/chat/completions", "chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[test]
    fn openai_requires_key_only_on_default_endpoint() {
        let hosted = OpenAiProvider::new(ProviderConfig::default()).unwrap();
        assert!(!hosted.is_configured());

        let local = OpenAiProvider::new(ProviderConfig {
            endpoint: Some("http://localhost:1234/v1".to_string()),
            ..ProviderConfig::default()
        })
        .unwrap();
        assert!(local.is_configured());
    }
}
