use std::{collections::VecDeque, time::Duration};

use tokio::sync::Mutex;

use super::ServerSession;
use crate::error::Result;

/// A pool of server sessions available for reuse.
///
/// The owning client holds one of these and checks sessions in and out as
/// client sessions are created and destroyed.
#[derive(Debug, Default)]
pub struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            pool: Default::default(),
        }
    }

    /// Checks out a server session from the pool, discarding any session that
    /// could time out before an operation on it completes. If no usable
    /// session remains, a new one is created.
    pub async fn check_out(
        &self,
        logical_session_timeout: Option<Duration>,
    ) -> Result<ServerSession> {
        let mut pool = self.pool.lock().await;
        while let Some(session) = pool.pop_front() {
            if session.is_timed_out(logical_session_timeout) {
                continue;
            }
            return Ok(session);
        }
        ServerSession::new()
    }

    /// Checks a server session back into the pool. Dirty and timed-out
    /// sessions are discarded rather than recycled, and timed-out sessions
    /// are also cleared from the back of the pool.
    pub async fn check_in(
        &self,
        session: ServerSession,
        logical_session_timeout: Option<Duration>,
    ) {
        let mut pool = self.pool.lock().await;
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_timed_out(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.is_dirty() && !session.is_timed_out(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    #[cfg(test)]
    pub(crate) async fn clear(&self) {
        self.pool.lock().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, lsid: &bson::Document) -> bool {
        self.pool.lock().await.iter().any(|s| s.lsid() == lsid)
    }
}
