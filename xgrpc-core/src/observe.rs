//! # Call Observability
//!
//! Every invocation is described by a set of [`CallTags`]. They are recorded on the call's
//! `grpc.invoke` tracing span and handed to the session's [`CallObserver`] together with the
//! outcome, which is where a metrics sink plugs in.
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use tonic::Code;

/// Tag key that, when set by the caller, replaces the default `name` tag.
pub const NAME_TAG: &str = "name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTags {
    /// Target plus method path, e.g. `localhost:50051/echo.EchoService/UnaryEcho`.
    pub url: String,
    /// Fully qualified service, e.g. `echo.EchoService`.
    pub service: String,
    pub method: String,
    /// Defaults to the method path.
    pub name: String,
    /// Caller supplied tags, `name` excluded.
    pub user: BTreeMap<String, String>,
}

impl CallTags {
    /// Derives the tags of a call to `path` (`/package.Service/Method`) on `target`.
    pub fn new(target: &str, path: &str, user: &BTreeMap<String, String>) -> Self {
        let mut parts = path.trim_start_matches('/').splitn(2, '/');
        let service = parts.next().unwrap_or_default().to_string();
        let method = parts.next().unwrap_or_default().to_string();

        let mut user = user.clone();
        let name = user.remove(NAME_TAG).unwrap_or_else(|| path.to_string());

        Self {
            url: format!("{target}{path}"),
            service,
            method,
            name,
            user,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: Code,
    pub duration: Duration,
}

/// Receives one notification per completed invocation, failed ones included.
pub trait CallObserver: Send + Sync + Debug {
    fn observe(&self, tags: &CallTags, outcome: &CallOutcome);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CallObserver for NoopObserver {
    fn observe(&self, _tags: &CallTags, _outcome: &CallOutcome) {}
}
