use crate::codec::UnknownFields;
use crate::connection::{ConnectionPool, Connector, Dialer, TcpDialer};
use crate::descriptor::{FileSystem, OsFileSystem};
use crate::discovery::ResolverRegistry;
use crate::observe::{CallObserver, NoopObserver};
use std::sync::Arc;

/// Default user agent sent with every call.
pub const DEFAULT_USER_AGENT: &str = concat!("xgrpc/", env!("CARGO_PKG_VERSION"));

/// State shared by the sessions of a process: the connection pool, resolver schemes and the
/// pluggable collaborators.
///
/// Cloning is cheap and clones share the same pool, so sessions created from clones of one
/// environment can share connections.
#[derive(Debug, Clone)]
pub struct Environment {
    pool: ConnectionPool,
    resolvers: ResolverRegistry,
    dialer: Arc<dyn Dialer>,
    file_system: Arc<dyn FileSystem>,
    observer: Arc<dyn CallObserver>,
    user_agent: Option<String>,
    unknown_fields: UnknownFields,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            pool: ConnectionPool::new(),
            resolvers: ResolverRegistry::new(),
            dialer: Arc::new(TcpDialer),
            file_system: Arc::new(OsFileSystem::new()),
            observer: Arc::new(NoopObserver),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            unknown_fields: UnknownFields::default(),
        }
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: ConnectionPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// `None` leaves tonic's own user agent.
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_unknown_fields(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.file_system.as_ref()
    }

    pub fn observer(&self) -> &dyn CallObserver {
        self.observer.as_ref()
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    pub fn connector(&self) -> Connector {
        Connector::new(
            self.pool.clone(),
            self.resolvers.clone(),
            self.dialer.clone(),
            self.user_agent.clone(),
        )
    }
}
