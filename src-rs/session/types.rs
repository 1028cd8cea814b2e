use serde::{Deserialize, Serialize};

/// One turn of the running conversation, as handed to the dispatcher.
///
/// The history is owned by the caller; dispatch receives a read-only view and
/// maps only `role` and `content` onto the wire. An `attachment` on a prior
/// turn is display-side data and never resent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Either "user" or "model", matching the provider's turn roles.
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}
