use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Inline image payload for vision requests: base64 data plus its MIME type.
/// Derived per call from an attachment data URL, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: String,
}

pub(crate) fn text_turn(role: &str, text: &str) -> Value {
    json!({
        "role": role,
        "parts": [{ "text": text }]
    })
}

fn inline_data_part(image: &ImageAttachment) -> Value {
    json!({
        "inlineData": {
            "data": image.data,
            "mimeType": image.mime_type
        }
    })
}

fn reply_text_from_response(response: &Value) -> String {
    response
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|cand| cand.get("content"))
        .and_then(|cont| cont.get("parts"))
        .and_then(|parts| parts.as_array())
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

fn validate_model_name(model_name: &str) -> Result<()> {
    if model_name.trim().is_empty() {
        anyhow::bail!("Model name is empty");
    }
    if model_name
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#')
    {
        anyhow::bail!(
            "Model name {:?} contains characters not allowed in a model path",
            model_name
        );
    }
    Ok(())
}

/// Client bound to one credential. Holds the HTTP client shared by every
/// handle it resolves; the credential is opaque and never parsed.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    pub base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String, request_timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url,
            api_key,
            http_client,
        })
    }

    /// Resolve a handle to one named model variant. Validation is local only;
    /// whether the credential can actually invoke the model surfaces at call
    /// time, not here.
    pub fn get_generative_model(&self, model_name: &str) -> Result<GeminiModel> {
        validate_model_name(model_name)?;
        Ok(GeminiModel {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model_name: model_name.to_string(),
            http_client: self.http_client.clone(),
        })
    }
}

/// Resolved binding to one named model variant. Immutable once created.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    base_url: String,
    api_key: String,
    model_name: String,
    http_client: reqwest::Client,
}

impl GeminiModel {
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Direct generation from a bare prompt, no history, no generation config.
    pub async fn generate_text(&self, message: &str) -> Result<String> {
        let request_body = json!({
            "contents": [text_turn("user", message)]
        });
        self.generate(&request_body).await
    }

    /// Structured single-turn vision request: role-wrapped parts carrying
    /// prompt text and inline image data.
    pub async fn generate_with_image(
        &self,
        prompt: &str,
        image: &ImageAttachment,
    ) -> Result<String> {
        let request_body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }, inline_data_part(image)]
            }]
        });
        self.generate(&request_body).await
    }

    /// Legacy vision request shape: bare parts array, no role wrapper.
    pub async fn generate_with_image_legacy(
        &self,
        prompt: &str,
        image: &ImageAttachment,
    ) -> Result<String> {
        let request_body = json!({
            "contents": [{
                "parts": [{ "text": prompt }, inline_data_part(image)]
            }]
        });
        self.generate(&request_body).await
    }

    /// Open a chat session seeded with prior turns in provider format.
    pub fn start_chat(&self, history: Vec<Value>, max_output_tokens: u32) -> ChatSession {
        ChatSession {
            model: self.clone(),
            history,
            max_output_tokens,
        }
    }

    async fn generate(&self, request_body: &Value) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model_name,
            self.api_key
        );

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let json: Value = response.json().await?;
        Ok(reply_text_from_response(&json))
    }
}

/// Stateful chat bound to a resolved model. Prior turns are carried
/// implicitly between sends; the output token cap applies to every send.
pub struct ChatSession {
    model: GeminiModel,
    history: Vec<Value>,
    max_output_tokens: u32,
}

impl ChatSession {
    pub async fn send_message(&mut self, message: &str) -> Result<String> {
        let mut contents = self.history.clone();
        contents.push(text_turn("user", message));

        let request_body = json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": self.max_output_tokens }
        });
        let reply = self.model.generate(&request_body).await?;

        self.history = contents;
        self.history.push(text_turn("model", &reply));
        Ok(reply)
    }
}
