// src/executor/session.rs
// Ambient session handle threaded through executor calls

use std::future::Future;
use uuid::Uuid;

/// Opaque transaction/session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: Uuid,
}

impl Session {
    pub fn new() -> Self {
        Session { id: Uuid::new_v4() }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

tokio::task_local! {
    static SESSION: Option<Session>;
}

/// Run `fut` with `session` as the ambient session
pub async fn with_session<F>(session: Session, fut: F) -> F::Output
where
    F: Future,
{
    SESSION.scope(Some(session), fut).await
}

/// Ambient session of the current task, if any
pub fn current_session() -> Option<Session> {
    SESSION.try_with(|session| *session).ok().flatten()
}
