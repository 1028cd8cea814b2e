pub mod error;
pub mod gemini_session;
pub mod id;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use gemini_session::{GeminiSession, DEFAULT_VISION_PROMPT};
pub use id::generate_request_id;
pub use manager::{SessionManager, SESSION_MANAGER};
pub use types::ConversationMessage;
