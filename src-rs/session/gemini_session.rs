use anyhow::Result;
use serde_json::{json, Value};

use crate::config::GeminiConfig;
use crate::llm::models::gemini::{text_turn, GeminiClient, GeminiModel, ImageAttachment};
use crate::llm::utils::data_url::{base64_from_data_url, mime_type_from_data_url};

use super::error::SessionError;
use super::types::ConversationMessage;

/// Prompt substituted when the user attaches an image without any text.
pub const DEFAULT_VISION_PROMPT: &str = "Analyze and describe this image in detail.";

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// One JSON line per dispatch lifecycle event, correlated by request id.
pub(crate) fn log_dispatch_event(request_id: &str, event: &str, extra: Value) {
    let payload = json!({
        "ts": now_ms(),
        "event": event,
        "request_id": request_id,
        "extra": extra
    });
    log::info!(target: "visualearn_session", "{}", payload);
}

/// First-success-wins resolution over an ordered candidate list. Candidates
/// after the first success are never tried.
fn try_in_order<T, E: std::fmt::Display>(
    candidates: &[String],
    mut resolve: impl FnMut(&str) -> Result<T, E>,
) -> Option<T> {
    for name in candidates {
        log::debug!("Trying model candidate: {}", name);
        match resolve(name) {
            Ok(resolved) => {
                log::info!("Resolved model candidate: {}", name);
                return Some(resolved);
            }
            Err(e) => log::warn!("Failed to resolve model candidate {}: {}", name, e),
        }
    }
    None
}

/// One initialized conversation backend: whichever text and vision handles
/// candidate probing resolved, bound to a single credential.
///
/// Immutable after construction. Re-initialization builds a replacement
/// session rather than mutating this one, so dispatch calls holding a
/// snapshot complete against the handles they started with.
pub struct GeminiSession {
    text_model: Option<GeminiModel>,
    vision_model: Option<GeminiModel>,
    max_output_tokens: u32,
}

impl GeminiSession {
    /// Probe both candidate lists with the given credential. The lists are
    /// probed independently, so one list failing completely does not abort
    /// the other; zero resolved handles (or a client construction failure)
    /// is an error.
    pub fn initialize(api_key: &str, config: &GeminiConfig) -> Result<Self> {
        let client = GeminiClient::new(
            api_key.to_string(),
            config.base_url.clone(),
            config.request_timeout_secs,
        )?;

        let text_model = try_in_order(&config.model_names, |name| {
            client.get_generative_model(name)
        });
        let vision_model = try_in_order(&config.vision_model_names, |name| {
            client.get_generative_model(name)
        });

        if text_model.is_none() && vision_model.is_none() {
            anyhow::bail!("No usable model among the configured candidates");
        }

        Ok(Self {
            text_model,
            vision_model,
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// True while at least one handle is resolved. Handles are never
    /// re-validated; failures surface at call time.
    pub fn is_ready(&self) -> bool {
        self.text_model.is_some() || self.vision_model.is_some()
    }

    pub fn text_model_name(&self) -> Option<&str> {
        self.text_model.as_ref().map(|m| m.model_name())
    }

    pub fn vision_model_name(&self) -> Option<&str> {
        self.vision_model.as_ref().map(|m| m.model_name())
    }

    /// Dispatch one user message.
    ///
    /// An attachment routes to the vision handle when one is resolved; that
    /// branch recovers every failure into reply text so the conversation
    /// keeps flowing. The text branch seeds a chat with the full history and
    /// falls back once to direct generation; a failure of the fallback is
    /// the caller's to handle.
    pub async fn send_message(
        &self,
        request_id: &str,
        message: &str,
        history: &[ConversationMessage],
        attachment: Option<&str>,
    ) -> Result<String, SessionError> {
        if let Some(data_url) = attachment {
            if let Some(vision_model) = &self.vision_model {
                log_dispatch_event(
                    request_id,
                    "branch_selected",
                    json!({ "branch": "vision", "model": vision_model.model_name() }),
                );
                return Ok(self
                    .send_with_image(request_id, vision_model, message, data_url)
                    .await);
            }
            // The UI gates attachment-without-vision upstream; here the
            // attachment is dropped and the text path proceeds.
            log::warn!("Attachment provided but no vision model is resolved; sending text only");
            log_dispatch_event(
                request_id,
                "attachment_dropped",
                json!({ "reason": "no_vision_handle" }),
            );
        }

        let text_model = self.text_model.as_ref().ok_or(SessionError::NotInitialized)?;
        log_dispatch_event(
            request_id,
            "branch_selected",
            json!({
                "branch": "text",
                "model": text_model.model_name(),
                "history_len": history.len()
            }),
        );
        self.send_text(request_id, text_model, message, history).await
    }

    /// Vision branch. Never faults: a malformed attachment or a failure of
    /// both call shapes becomes an error reply rendered as a model turn.
    async fn send_with_image(
        &self,
        request_id: &str,
        model: &GeminiModel,
        message: &str,
        data_url: &str,
    ) -> String {
        let image = match decode_attachment(data_url) {
            Ok(image) => image,
            Err(e) => {
                log::error!("Rejecting attachment: {}", e);
                log_dispatch_event(
                    request_id,
                    "attachment_rejected",
                    json!({ "error": e.to_string() }),
                );
                return image_failure_reply(&e.to_string());
            }
        };

        let prompt = if message.is_empty() {
            DEFAULT_VISION_PROMPT
        } else {
            message
        };

        // An empty reply counts as a failed attempt and triggers the legacy
        // request shape.
        let primary_failure = match model.generate_with_image(prompt, &image).await {
            Ok(reply) if !reply.is_empty() => return reply,
            Ok(_) => anyhow::anyhow!("Empty response from vision model"),
            Err(e) => e,
        };

        log::warn!(
            "Structured vision call failed, trying legacy shape: {:#}",
            primary_failure
        );
        log_dispatch_event(
            request_id,
            "vision_legacy_attempted",
            json!({ "error": format!("{:#}", primary_failure) }),
        );

        match model.generate_with_image_legacy(prompt, &image).await {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("Legacy vision call failed: {:#}", e);
                image_failure_reply(&format!("{:#}", e))
            }
        }
    }

    async fn send_text(
        &self,
        request_id: &str,
        model: &GeminiModel,
        message: &str,
        history: &[ConversationMessage],
    ) -> Result<String, SessionError> {
        let turns: Vec<Value> = history
            .iter()
            .map(|m| text_turn(&m.role, &m.content))
            .collect();

        let mut chat = model.start_chat(turns, self.max_output_tokens);
        match chat.send_message(message).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // The fallback carries only the latest message; prior turns
                // are dropped, not replayed.
                log::warn!("Chat call failed, falling back to direct generation: {:#}", e);
                log_dispatch_event(
                    request_id,
                    "text_fallback_attempted",
                    json!({ "error": format!("{:#}", e) }),
                );
                model
                    .generate_text(message)
                    .await
                    .map_err(SessionError::ProviderCall)
            }
        }
    }
}

fn decode_attachment(data_url: &str) -> Result<ImageAttachment, SessionError> {
    let data = base64_from_data_url(data_url).ok_or_else(|| {
        SessionError::MalformedAttachment("no base64 image payload in data URL".to_string())
    })?;
    Ok(ImageAttachment {
        mime_type: mime_type_from_data_url(data_url),
        data,
    })
}

fn image_failure_reply(reason: &str) -> String {
    format!(
        "I had trouble processing your image. The error was: {}. Please try again with a different image or format.",
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REQ: &str = "req_test";
    const PNG_URL: &str = "data:image/png;base64,QUJD";

    fn reply_json(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] }
            }]
        })
    }

    fn config_for(base_url: &str, text_names: &[&str], vision_names: &[&str]) -> GeminiConfig {
        GeminiConfig {
            base_url: base_url.to_string(),
            model_names: text_names.iter().map(|s| s.to_string()).collect(),
            vision_model_names: vision_names.iter().map(|s| s.to_string()).collect(),
            max_output_tokens: 1000,
            request_timeout_secs: 300,
        }
    }

    fn session_for(server: &MockServer, text_names: &[&str], vision_names: &[&str]) -> GeminiSession {
        GeminiSession::initialize("test-key", &config_for(&server.uri(), text_names, vision_names))
            .expect("session should initialize")
    }

    async fn received_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).expect("request body should be JSON"))
            .collect()
    }

    #[test]
    fn try_in_order_stops_at_first_success() {
        let mut attempts = Vec::new();
        let candidates: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let resolved = try_in_order(&candidates, |name| {
            attempts.push(name.to_string());
            if name == "b" {
                Ok(name.to_string())
            } else {
                Err(anyhow::anyhow!("unavailable"))
            }
        });
        assert_eq!(resolved.as_deref(), Some("b"));
        assert_eq!(attempts, vec!["a", "b"]);
    }

    #[test]
    fn try_in_order_none_when_all_candidates_fail() {
        let candidates = vec!["a".to_string()];
        let resolved: Option<String> =
            try_in_order(&candidates, |_| Err(anyhow::anyhow!("unavailable")));
        assert!(resolved.is_none());
    }

    #[test]
    fn initialize_skips_unresolvable_candidates() {
        let config = config_for("http://localhost:0", &["bad name", "good-model"], &[]);
        let session = GeminiSession::initialize("key", &config).expect("text list should resolve");
        assert_eq!(session.text_model_name(), Some("good-model"));
        assert_eq!(session.vision_model_name(), None);
        assert!(session.is_ready());
    }

    #[test]
    fn initialize_probes_lists_independently() {
        let config = config_for("http://localhost:0", &["bad name"], &["vision-model"]);
        let session =
            GeminiSession::initialize("key", &config).expect("vision list should resolve");
        assert_eq!(session.text_model_name(), None);
        assert_eq!(session.vision_model_name(), Some("vision-model"));
        assert!(session.is_ready());
    }

    #[test]
    fn is_ready_is_idempotent() {
        let config = config_for("http://localhost:0", &["text-model"], &[]);
        let session = GeminiSession::initialize("key", &config).expect("should resolve");
        for _ in 0..3 {
            assert!(session.is_ready());
        }
    }

    #[test]
    fn initialize_fails_with_no_resolvable_candidate() {
        let config = config_for("http://localhost:0", &["bad name"], &[" "]);
        assert!(GeminiSession::initialize("key", &config).is_err());
    }

    #[tokio::test]
    async fn send_without_text_handle_fails_not_initialized() {
        let server = MockServer::start().await;
        let session = session_for(&server, &[], &["vision-model"]);

        let err = session.send_message(REQ, "hi", &[], None).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInitialized));
        assert!(received_bodies(&server).await.is_empty());
    }

    #[tokio::test]
    async fn chat_submits_history_then_message_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/text-model:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_json("fine")))
            .mount(&server)
            .await;

        let session = session_for(&server, &["text-model"], &[]);
        let history = vec![
            ConversationMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
                attachment: None,
            },
            ConversationMessage {
                role: "model".to_string(),
                content: "hello".to_string(),
                attachment: None,
            },
        ];

        let reply = session
            .send_message(REQ, "how are you?", &history, None)
            .await
            .unwrap();
        assert_eq!(reply, "fine");

        let bodies = received_bodies(&server).await;
        assert_eq!(bodies.len(), 1);
        let contents = bodies[0].get("contents").and_then(|v| v.as_array()).unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].pointer("/role").and_then(|v| v.as_str()), Some("user"));
        assert_eq!(
            contents[0].pointer("/parts/0/text").and_then(|v| v.as_str()),
            Some("hi")
        );
        assert_eq!(contents[1].pointer("/role").and_then(|v| v.as_str()), Some("model"));
        assert_eq!(
            contents[1].pointer("/parts/0/text").and_then(|v| v.as_str()),
            Some("hello")
        );
        assert_eq!(contents[2].pointer("/role").and_then(|v| v.as_str()), Some("user"));
        assert_eq!(
            contents[2].pointer("/parts/0/text").and_then(|v| v.as_str()),
            Some("how are you?")
        );
        assert_eq!(
            bodies[0]
                .pointer("/generationConfig/maxOutputTokens")
                .and_then(|v| v.as_u64()),
            Some(1000)
        );
    }

    #[tokio::test]
    async fn chat_failure_falls_back_to_direct_generation_without_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/text-model:generateContent"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/text-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_json("recovered")))
            .mount(&server)
            .await;

        let session = session_for(&server, &["text-model"], &[]);
        let history = vec![ConversationMessage {
            role: "user".to_string(),
            content: "earlier turn".to_string(),
            attachment: None,
        }];

        let reply = session
            .send_message(REQ, "just this", &history, None)
            .await
            .unwrap();
        assert_eq!(reply, "recovered");

        let bodies = received_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        let fallback = &bodies[1];
        let contents = fallback.get("contents").and_then(|v| v.as_array()).unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(
            contents[0].pointer("/parts/0/text").and_then(|v| v.as_str()),
            Some("just this")
        );
        assert!(fallback.get("generationConfig").is_none());
        assert!(!fallback.to_string().contains("earlier turn"));
    }

    #[tokio::test]
    async fn text_path_surfaces_failure_after_single_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/text-model:generateContent"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let session = session_for(&server, &["text-model"], &[]);
        let err = session.send_message(REQ, "hi", &[], None).await.unwrap_err();
        assert!(matches!(err, SessionError::ProviderCall(_)));
        assert!(err.to_string().contains("Gemini API error (500"));
        assert_eq!(received_bodies(&server).await.len(), 2);
    }

    #[tokio::test]
    async fn vision_failure_retries_with_legacy_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(500).set_body_string("bad shape"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_json("a cat")))
            .mount(&server)
            .await;

        let session = session_for(&server, &[], &["vision-model"]);
        let reply = session
            .send_message(REQ, "what is this?", &[], Some(PNG_URL))
            .await
            .unwrap();
        assert_eq!(reply, "a cat");

        let bodies = received_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        let structured = &bodies[0].get("contents").unwrap()[0];
        assert_eq!(structured.pointer("/role").and_then(|v| v.as_str()), Some("user"));
        assert_eq!(
            structured.pointer("/parts/0/text").and_then(|v| v.as_str()),
            Some("what is this?")
        );
        assert_eq!(
            structured
                .pointer("/parts/1/inlineData/mimeType")
                .and_then(|v| v.as_str()),
            Some("image/png")
        );
        let legacy = &bodies[1].get("contents").unwrap()[0];
        assert!(legacy.get("role").is_none());
        assert_eq!(
            legacy.pointer("/parts/0/text").and_then(|v| v.as_str()),
            Some("what is this?")
        );
        assert_eq!(
            legacy.pointer("/parts/1/inlineData/data").and_then(|v| v.as_str()),
            Some("QUJD")
        );
    }

    #[tokio::test]
    async fn vision_empty_reply_counts_as_failed_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_json("described")))
            .mount(&server)
            .await;

        let session = session_for(&server, &[], &["vision-model"]);
        let reply = session
            .send_message(REQ, "look", &[], Some(PNG_URL))
            .await
            .unwrap();
        assert_eq!(reply, "described");
        assert_eq!(received_bodies(&server).await.len(), 2);
    }

    #[tokio::test]
    async fn vision_double_failure_recovers_into_reply_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let session = session_for(&server, &[], &["vision-model"]);
        let reply = session
            .send_message(REQ, "look", &[], Some(PNG_URL))
            .await
            .expect("vision branch must not fault");
        assert!(reply.starts_with("I had trouble processing your image."));
        assert!(reply.contains("Gemini API error (503"));
        assert!(reply.ends_with("Please try again with a different image or format."));
        assert_eq!(received_bodies(&server).await.len(), 2);
    }

    #[tokio::test]
    async fn malformed_attachment_recovered_without_any_call() {
        let server = MockServer::start().await;
        let session = session_for(&server, &[], &["vision-model"]);

        let reply = session
            .send_message(REQ, "", &[], Some("definitely not a data url"))
            .await
            .expect("malformed attachments must not fault");
        assert!(reply.starts_with("I had trouble processing your image."));
        assert!(reply.contains("Failed to extract image data"));
        assert!(received_bodies(&server).await.is_empty());
    }

    #[tokio::test]
    async fn empty_message_with_attachment_uses_default_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_json("a diagram")))
            .mount(&server)
            .await;

        let session = session_for(&server, &[], &["vision-model"]);
        let reply = session.send_message(REQ, "", &[], Some(PNG_URL)).await.unwrap();
        assert_eq!(reply, "a diagram");

        let bodies = received_bodies(&server).await;
        assert_eq!(
            bodies[0]
                .pointer("/contents/0/parts/0/text")
                .and_then(|v| v.as_str()),
            Some(DEFAULT_VISION_PROMPT)
        );
    }

    #[tokio::test]
    async fn attachment_without_vision_handle_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/text-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_json("text only")))
            .mount(&server)
            .await;

        let session = session_for(&server, &["text-model"], &[]);
        let reply = session
            .send_message(REQ, "see this?", &[], Some(PNG_URL))
            .await
            .unwrap();
        assert_eq!(reply, "text only");

        let bodies = received_bodies(&server).await;
        assert_eq!(bodies.len(), 1);
        assert!(!bodies[0].to_string().contains("inlineData"));
    }
}
