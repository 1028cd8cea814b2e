use napi::bindgen_prelude::*;
use serde_json::json;

use crate::config::AppConfig;
use crate::session::gemini_session::log_dispatch_event;
use crate::session::{
    generate_request_id, ConversationMessage, GeminiSession, SessionError, SESSION_MANAGER,
};

use super::gemini::ChatMessage;

pub(crate) fn initialize_session(api_key: &str) -> bool {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config for initialization: {:#}", e);
            return false;
        }
    };

    match GeminiSession::initialize(api_key, &config.gemini) {
        Ok(session) => {
            let Ok(mut manager) = SESSION_MANAGER.lock() else {
                log::error!("Failed to lock session manager");
                return false;
            };
            let installed = manager.install(session);
            log::info!(
                "Gemini session initialized (text: {:?}, vision: {:?})",
                installed.text_model_name(),
                installed.vision_model_name()
            );
            true
        }
        Err(e) => {
            log::error!("Gemini initialization failed: {:#}", e);
            // A failed run leaves no usable session behind.
            if let Ok(mut manager) = SESSION_MANAGER.lock() {
                manager.clear();
            }
            false
        }
    }
}

pub(crate) fn session_is_ready() -> bool {
    SESSION_MANAGER
        .lock()
        .map(|manager| manager.current().map_or(false, |s| s.is_ready()))
        .unwrap_or(false)
}

pub(crate) async fn dispatch_message(
    message: String,
    history: Vec<ChatMessage>,
    screenshot: Option<String>,
) -> Result<String> {
    let request_id = generate_request_id();
    log_dispatch_event(
        &request_id,
        "send_called",
        json!({
            "history_len": history.len(),
            "has_attachment": screenshot.is_some(),
        }),
    );

    // One snapshot per call; a concurrent re-initialization does not swap
    // handles under an in-flight send.
    let session = SESSION_MANAGER
        .lock()
        .map_err(|_| Error::from_reason("Failed to lock session manager"))?
        .current()
        .ok_or_else(|| Error::from_reason(SessionError::NotInitialized.to_string()))?;

    let history: Vec<ConversationMessage> =
        history.into_iter().map(conversation_message).collect();

    match session
        .send_message(&request_id, &message, &history, screenshot.as_deref())
        .await
    {
        Ok(reply) => {
            log_dispatch_event(
                &request_id,
                "send_completed",
                json!({ "reply_len": reply.len() }),
            );
            Ok(reply)
        }
        Err(e) => {
            log_dispatch_event(&request_id, "send_failed", json!({ "error": e.to_string() }));
            Err(Error::from_reason(e.to_string()))
        }
    }
}

pub(crate) fn conversation_message(message: ChatMessage) -> ConversationMessage {
    ConversationMessage {
        role: message.role,
        content: message.content,
        attachment: message.screenshot,
    }
}
