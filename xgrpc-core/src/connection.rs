//! # Connection Manager
//!
//! Turns a target string into a ready-to-use transport channel.
//!
//! * A plain `host:port` target (optionally prefixed with `http://` or `https://`) is dialed
//!   through the environment's [`Dialer`].
//! * A `scheme://authority/service` target whose scheme has a registered
//!   [`ResolverBuilder`](crate::discovery::ResolverBuilder) gets a tonic balance channel whose
//!   endpoint set is maintained by the scheme's resolver.
//!
//! With `share_conn` the result is cached in the environment's [`ConnectionPool`], keyed by the
//! literal target string, and handed out to every session connecting to the same target.
mod dialer;
mod options;
mod pool;

pub use dialer::{Dialer, EndpointSettings, TcpDialer};
pub use options::ConnectOptions;
pub use pool::ConnectionPool;

use crate::config::ConfigError;
use crate::descriptor::SchemaError;
use crate::discovery::{
    BalanceSink, DiscoveryError, EndpointTemplate, Resolver, ResolverRegistry, Target,
};
use crate::grpc::MessageLimits;
use crate::reflection::ReflectionResolveError;
use parking_lot::Mutex;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;
use tracing::debug;

/// Buffer of pending endpoint changes between a resolver and its balance channel.
const BALANCE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid target '{target}': '{source}'")]
    InvalidTarget {
        target: String,
        source: tonic::transport::Error,
    },
    #[error("Target '{0}' uses a scheme with no registered resolver")]
    UnknownScheme(String),
    #[error("Failed to connect to '{target}': '{source}'")]
    ConnectionFailed {
        target: String,
        source: tonic::transport::Error,
    },
    #[error("Timed out after {timeout:?} connecting to '{target}'")]
    Timeout { target: String, timeout: Duration },
    #[error("Service discovery failed for '{target}': '{source}'")]
    Discovery {
        target: String,
        source: DiscoveryError,
    },
    #[error("No connection, call connect first")]
    NotConnected,
    #[error("Reflection request failed: '{0}'")]
    Reflection(#[from] ReflectionResolveError),
    #[error("Reflection returned an unusable schema: '{0}'")]
    Schema(#[from] SchemaError),
    #[error("Timed out after {0:?} loading the schema through reflection")]
    ReflectionTimeout(Duration),
}

/// A transport service plus everything needed to call through it.
pub struct Connection<S = Channel> {
    target: String,
    service: S,
    limits: MessageLimits,
    resolver: Mutex<Option<Box<dyn Resolver>>>,
}

impl<S> Connection<S> {
    pub fn new(target: impl Into<String>, service: S, limits: MessageLimits) -> Self {
        Self {
            target: target.into(),
            service,
            limits,
            resolver: Mutex::new(None),
        }
    }

    /// Attaches the resolver feeding this connection. It is closed with the connection.
    pub fn with_resolver(self, resolver: Box<dyn Resolver>) -> Self {
        *self.resolver.lock() = Some(resolver);
        self
    }

    /// The target exactly as given to `connect`.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn limits(&self) -> MessageLimits {
        self.limits
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.lock().is_some()
    }

    /// Closes the resolver, if any. Safe to call repeatedly.
    pub async fn close(&self) {
        let resolver = self.resolver.lock().take();
        if let Some(resolver) = resolver {
            resolver.close().await;
        }
    }
}

impl<S: Clone> Connection<S> {
    /// A handle to the underlying service. Channels are cheap to clone.
    pub fn service(&self) -> S {
        self.service.clone()
    }
}

impl<S> Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("limits", &self.limits)
            .field("discovery", &self.has_resolver())
            .finish_non_exhaustive()
    }
}

/// Dials targets using the registries of an [`Environment`](crate::Environment).
#[derive(Debug, Clone)]
pub struct Connector {
    pool: ConnectionPool,
    resolvers: ResolverRegistry,
    dialer: Arc<dyn Dialer>,
    user_agent: Option<String>,
}

impl Connector {
    pub fn new(
        pool: ConnectionPool,
        resolvers: ResolverRegistry,
        dialer: Arc<dyn Dialer>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            pool,
            resolvers,
            dialer,
            user_agent,
        }
    }

    /// Connects to `target`.
    ///
    /// # Returns
    ///
    /// * `Ok(connection)` - A new connection, or the pooled one when `share_conn` is set and
    ///   the target was connected before.
    /// * `Err(ConnectError)` - The target is malformed, unreachable within `timeout`, or its
    ///   resolver couldn't be started.
    pub async fn connect(
        &self,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<Connection>, ConnectError> {
        if options.share_conn {
            self.pool
                .get_or_try_insert(target, || self.dial(target, options))
                .await
        } else {
            self.dial(target, options).await.map(Arc::new)
        }
    }

    async fn dial(&self, target: &str, options: &ConnectOptions) -> Result<Connection, ConnectError> {
        let mut settings = EndpointSettings {
            plaintext: options.plaintext,
            connect_timeout: options.timeout,
            user_agent: options.user_agent.clone().or_else(|| self.user_agent.clone()),
        };

        let authority = match Target::parse(target) {
            // An explicit scheme decides over `plaintext`.
            Some(parsed) if parsed.scheme == "http" || parsed.scheme == "https" => {
                settings.plaintext = parsed.scheme == "http";
                parsed.authority
            }
            Some(parsed) => return self.dial_discovery(target, parsed, settings, options).await,
            None => target.to_string(),
        };

        let endpoint =
            settings
                .endpoint(&authority)
                .map_err(|source| ConnectError::InvalidTarget {
                    target: target.to_string(),
                    source,
                })?;

        let channel = tokio::time::timeout(options.timeout, self.dialer.dial(endpoint))
            .await
            .map_err(|_| ConnectError::Timeout {
                target: target.to_string(),
                timeout: options.timeout,
            })?
            .map_err(|source| ConnectError::ConnectionFailed {
                target: target.to_string(),
                source,
            })?;

        debug!(target, plaintext = settings.plaintext, "Connected");

        Ok(Connection::new(target, channel, options.limits()))
    }

    async fn dial_discovery(
        &self,
        target: &str,
        parsed: Target,
        settings: EndpointSettings,
        options: &ConnectOptions,
    ) -> Result<Connection, ConnectError> {
        let builder = self
            .resolvers
            .get(&parsed.scheme)
            .ok_or_else(|| ConnectError::UnknownScheme(target.to_string()))?;

        let (channel, tx) = Channel::balance_channel::<String>(BALANCE_CAPACITY);
        let template: EndpointTemplate = Arc::new(move |addr: &str| settings.endpoint(addr));
        let sink = Arc::new(BalanceSink::new(tx, template));

        let resolver = tokio::time::timeout(options.timeout, builder.build(&parsed, sink))
            .await
            .map_err(|_| ConnectError::Timeout {
                target: target.to_string(),
                timeout: options.timeout,
            })?
            .map_err(|source| ConnectError::Discovery {
                target: target.to_string(),
                source,
            })?;

        debug!(target, scheme = %parsed.scheme, "Connected through service discovery");

        Ok(Connection::new(target, channel, options.limits()).with_resolver(resolver))
    }
}
