//! [`FaceOracle`] backed by an OpenAI-compatible vision chat endpoint.

use crate::data_uri::DataUri;
use crate::oracle::{FaceOracle, OracleError};
use crate::prompt::{self, ContentPart};
use crate::types::{EnrollVerdict, EnrolledStudent, Identification};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Google's OpenAI-compatible Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Longest provider error body kept in [`OracleError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct LlmOracle {
    client: Client,
    settings: LlmSettings,
}

impl LlmOracle {
    pub fn new(settings: LlmSettings) -> Result<Self, OracleError> {
        if settings.model.trim().is_empty() {
            return Err(OracleError::Config("model name is empty".into()));
        }
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Send one system + user turn and decode the JSON reply as `T`.
    async fn ask<T: DeserializeOwned>(
        &self,
        system: &str,
        content: Vec<ContentPart>,
    ) -> Result<T, OracleError> {
        let body = json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": content },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.0,
        });

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let started = std::time::Instant::now();
        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            let mut text = res.text().await.unwrap_or_default();
            truncate_at_char(&mut text, ERROR_BODY_LIMIT);
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let reply: serde_json::Value = res.json().await?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(OracleError::EmptyReply)?;

        tracing::debug!(
            model = %self.settings.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            reply_len = content.len(),
            "oracle replied"
        );

        parse_json_reply(content)
    }
}

#[async_trait]
impl FaceOracle for LlmOracle {
    async fn assess_enrollment(
        &self,
        photo: &str,
        student_name: &str,
    ) -> Result<EnrollVerdict, OracleError> {
        DataUri::parse(photo)?;
        self.ask(prompt::ENROLL_SYSTEM, prompt::enrollment(student_name, photo))
            .await
    }

    async fn identify(
        &self,
        photo: &str,
        enrolled: &[EnrolledStudent],
    ) -> Result<Identification, OracleError> {
        DataUri::parse(photo)?;
        if enrolled.is_empty() {
            return Ok(Identification::unknown());
        }
        self.ask(prompt::RECOGNIZE_SYSTEM, prompt::recognition(photo, enrolled))
            .await
    }
}

/// Decode a model reply that should be a JSON object.
///
/// Models sometimes wrap the object in a Markdown fence or a sentence, so
/// the first `{` through the last `}` is tried when the whole text is not
/// valid JSON.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T, OracleError> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => serde_json::from_str(&trimmed[s..=e])
            .map_err(|err| OracleError::Malformed(format!("{err}: {}", excerpt(trimmed)))),
        _ => Err(OracleError::Malformed(format!(
            "no JSON object in reply: {}",
            excerpt(trimmed)
        ))),
    }
}

fn excerpt(text: &str) -> String {
    let mut s = text.to_string();
    truncate_at_char(&mut s, 120);
    s
}

fn truncate_at_char(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
