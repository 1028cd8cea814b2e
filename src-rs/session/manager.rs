use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use lazy_static::lazy_static;

use super::gemini_session::GeminiSession;

/// Process-wide slot holding the active session.
///
/// `initialize` installs a replacement; `send` snapshots the `Arc` once at
/// entry. A send overlapping a re-initialization completes against the
/// session it snapshotted.
pub struct SessionManager {
    active: Option<Arc<GeminiSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Install a freshly initialized session, overwriting any prior one.
    pub fn install(&mut self, session: GeminiSession) -> Arc<GeminiSession> {
        let session = Arc::new(session);
        self.active = Some(Arc::clone(&session));
        session
    }

    /// Snapshot of the active session, if one is installed.
    pub fn current(&self) -> Option<Arc<GeminiSession>> {
        self.active.clone()
    }

    pub fn clear(&mut self) {
        self.active = None;
    }
}

lazy_static! {
    pub static ref SESSION_MANAGER: StdMutex<SessionManager> = StdMutex::new(SessionManager::new());
}
