use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::auth::SessionId;

/// What a logged-in client knows about itself. Lives only as long as the
/// process, or until logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip)]
    pub user_id: String,
    pub logged_in: bool,
    pub username: String,
    pub user_email: String,
}

#[derive(Debug, Default)]
pub struct SessionStore(Mutex<HashMap<SessionId, Session>>);

impl SessionStore {
    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.0.lock().await.get(id).cloned()
    }

    /// Stores `session` under `id`. Any other session belonging to the same
    /// user is dropped, so a user has at most one live session.
    pub async fn replace_for_user(&self, id: SessionId, session: Session) {
        let mut sessions = self.0.lock().await;

        sessions.retain(|other_id, other| *other_id == id || other.user_id != session.user_id);
        sessions.insert(id, session);
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Session> {
        self.0.lock().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.0.lock().await.len()
    }
}
