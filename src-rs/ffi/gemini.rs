use napi::bindgen_prelude::*;
use napi_derive::napi;

use super::gemini_util;

/// One rendered conversation turn, as the shell hands it over. `screenshot`
/// carries the attachment data URL shown with the turn, if any.
#[napi(object)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub screenshot: Option<String>,
}

/// Build a session from the credential and install it as the active one.
/// Returns false on any failure; never throws.
#[napi]
pub fn initialize_gemini(api_key: String) -> bool {
    crate::init_logger();
    gemini_util::initialize_session(&api_key)
}

#[napi]
pub fn is_gemini_initialized() -> bool {
    crate::init_logger();
    gemini_util::session_is_ready()
}

#[napi]
pub async fn send_message_to_gemini(
    message: String,
    history: Vec<ChatMessage>,
    screenshot: Option<String>,
) -> Result<String> {
    crate::init_logger();
    gemini_util::dispatch_message(message, history, screenshot).await
}
