// ABOUTME: Protocol handler seam and the registry that maps URL protocols to handlers.
// ABOUTME: The registry is built at startup and passed to whatever needs to connect URLs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tether_agent::DialOptions;
use tether_url::{Protocol, Url};
use tokio_util::sync::CancellationToken;

use crate::error::ConnectError;
use crate::exec::ExecProtocolHandler;
use crate::local::LocalProtocolHandler;
use crate::messages::InitializeRequest;
use crate::session::{Configuration, Version};
use crate::synchronizer::Synchronizer;

/// Per-session values handed to the endpoint at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionParameters {
    pub session: String,
    pub version: Version,
    pub configuration: Configuration,
    /// Whether this endpoint is the alpha side of the session.
    pub alpha: bool,
}

impl SessionParameters {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            ..Default::default()
        }
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_alpha(mut self, alpha: bool) -> Self {
        self.alpha = alpha;
        self
    }

    /// The Initialize request for an endpoint rooted at `root`.
    pub fn initialize_request(&self, root: &str) -> InitializeRequest {
        InitializeRequest {
            root: root.to_string(),
            session: self.session.clone(),
            version: self.version,
            configuration: self.configuration.clone(),
            alpha: self.alpha,
        }
    }
}

/// Connects synchronization endpoints for one URL protocol.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Connect to the endpoint `url` names.
    ///
    /// Cancelling `cancel` makes the connect return
    /// [`ConnectError::Cancelled`] without waiting for work in flight.
    ///
    /// # Panics
    ///
    /// If `url` is not a synchronization URL of this handler's protocol.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        prompter: &str,
        parameters: &SessionParameters,
    ) -> Result<Box<dyn Synchronizer>, ConnectError>;
}

/// Lookup from URL protocol to its handler.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    handlers: HashMap<Protocol, Arc<dyn ProtocolHandler>>,
}

impl ProtocolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the local and exec handlers.
    pub fn with_defaults(options: DialOptions) -> Self {
        let mut registry = Self::new();
        registry.register(Protocol::Local, LocalProtocolHandler);
        registry.register(Protocol::Exec, ExecProtocolHandler::new(options));
        registry
    }

    pub fn register(&mut self, protocol: Protocol, handler: impl ProtocolHandler + 'static) {
        self.handlers.insert(protocol, Arc::new(handler));
    }

    pub fn handler(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolHandler>> {
        self.handlers.get(&protocol).cloned()
    }

    /// Connect `url` with the handler registered for its protocol.
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        prompter: &str,
        parameters: &SessionParameters,
    ) -> Result<Box<dyn Synchronizer>, ConnectError> {
        let handler = self
            .handler(url.protocol)
            .ok_or(ConnectError::UnsupportedProtocol(url.protocol))?;
        handler.connect(cancel, url, prompter, parameters).await
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut protocols: Vec<_> = self.handlers.keys().map(|p| p.to_string()).collect();
        protocols.sort_unstable();
        f.debug_struct("ProtocolRegistry")
            .field("protocols", &protocols)
            .finish()
    }
}
