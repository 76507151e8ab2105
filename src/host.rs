//! Process-wide access to a single session.
//!
//! [`SessionHost`] lazily starts one session and hands out clones of its
//! handle. Concurrent first calls race on a double-checked lock, so the
//! factory runs exactly once. Declare it as a `static` to get a global
//! instance:
//!
//! ```rust,ignore
//! static HOST: SessionHost = SessionHost::new();
//!
//! let session = HOST.get_or_start(|| (relay.transport(), SessionConfig::new("Alice")));
//! ```

use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::session::{Session, SessionConfig, SessionRuntime};
use crate::transport::Transport;

/// Lazily started, shared session.
#[derive(Debug, Default)]
pub struct SessionHost {
    runtime: RwLock<Option<SessionRuntime>>,
}

impl SessionHost {
    pub const fn new() -> Self {
        Self {
            runtime: RwLock::new(None),
        }
    }

    /// Return the running session, starting it with `make` if there is none.
    ///
    /// A session whose loop has exited is replaced. `make` is called at most
    /// once per started session, even when many tasks call this at the same
    /// time. Must be called from within a Tokio runtime.
    pub fn get_or_start<T, F>(&self, make: F) -> Session
    where
        T: Transport,
        F: FnOnce() -> (T, SessionConfig),
    {
        if let Some(session) = self.get() {
            return session;
        }

        let mut slot = self
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = slot.as_ref() {
            let session = runtime.session();
            if session.is_alive() {
                return session;
            }
        }

        let (transport, config) = make();
        debug!("starting hosted session for {}", config.nick_name);
        let runtime = Session::start(transport, config);
        let session = runtime.session();
        // Replacing a dead runtime drops it, which only aborts a finished task.
        *slot = Some(runtime);
        session
    }

    /// The running session, if any.
    pub fn get(&self) -> Option<Session> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(SessionRuntime::session)
            .filter(Session::is_alive)
    }

    pub fn is_running(&self) -> bool {
        self.get().is_some()
    }

    /// Shut the hosted session down. Returns `false` if none was started.
    ///
    /// A later [`get_or_start`](SessionHost::get_or_start) starts a fresh one.
    pub async fn teardown(&self) -> bool {
        let runtime = self
            .runtime
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match runtime {
            Some(mut runtime) => {
                runtime.shutdown().await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::protocol::{TransportCallback, TransportRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Accepts everything and never produces a callback.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send(&mut self, _request: TransportRequest) -> Result<()> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<TransportCallback>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_starts_exactly_one_session() {
        let host = Arc::new(SessionHost::new());
        let starts = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let host = Arc::clone(&host);
            let starts = Arc::clone(&starts);
            tasks.push(tokio::spawn(async move {
                host.get_or_start(|| {
                    starts.fetch_add(1, Ordering::SeqCst);
                    (SilentTransport, SessionConfig::new("Alice"))
                })
            }));
        }

        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.expect("task panicked"));
        }

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        let first = sessions.first().unwrap();
        assert!(sessions.iter().all(|s| Session::ptr_eq(s, first)));
        assert!(host.teardown().await);
    }

    #[tokio::test]
    async fn teardown_allows_a_fresh_start() {
        let host = SessionHost::new();
        assert!(!host.teardown().await);
        assert!(host.get().is_none());

        let first = host.get_or_start(|| (SilentTransport, SessionConfig::new("Alice")));
        assert!(host.is_running());
        assert!(host.teardown().await);
        assert!(!first.is_alive());

        let second = host.get_or_start(|| (SilentTransport, SessionConfig::new("Bob")));
        assert!(!Session::ptr_eq(&first, &second));
        assert_eq!(second.nick_name(), "Bob");
        assert!(host.teardown().await);
    }
}
