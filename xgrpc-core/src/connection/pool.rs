use super::Connection;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tonic::transport::Channel;
use tracing::debug;

/// Connections shared between sessions, keyed by the literal target string.
///
/// Entries live as long as the pool. Cloning the pool yields a handle to the same entries.
pub struct ConnectionPool<S = Channel> {
    inner: Arc<PoolInner<S>>,
}

struct PoolInner<S> {
    entries: RwLock<HashMap<String, Arc<Connection<S>>>>,
    dial: Mutex<()>,
}

impl<S> ConnectionPool<S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: RwLock::new(HashMap::new()),
                dial: Mutex::new(()),
            }),
        }
    }

    pub async fn get(&self, target: &str) -> Option<Arc<Connection<S>>> {
        self.inner.entries.read().await.get(target).cloned()
    }

    /// Returns the connection for `target`, dialing it with `dial` if there is none yet.
    ///
    /// Concurrent callers for a missing target dial once: dials are serialized and the map is
    /// checked again after the dial lock is taken. A failed dial stores nothing, so the next
    /// caller tries again.
    pub async fn get_or_try_insert<F, Fut, E>(
        &self,
        target: &str,
        dial: F,
    ) -> Result<Arc<Connection<S>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Connection<S>, E>>,
    {
        if let Some(conn) = self.get(target).await {
            debug!(target, "Reusing shared connection");
            return Ok(conn);
        }

        let _dialing = self.inner.dial.lock().await;

        if let Some(conn) = self.get(target).await {
            debug!(target, "Reusing shared connection");
            return Ok(conn);
        }

        let conn = Arc::new(dial().await?);
        self.inner
            .entries
            .write()
            .await
            .insert(target.to_string(), conn.clone());

        Ok(conn)
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }
}

impl<S> Default for ConnectionPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool").finish_non_exhaustive()
    }
}
