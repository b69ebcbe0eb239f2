// ABOUTME: RPC server with per-method dispatch over accepted logical streams.
// ABOUTME: Serves each call on its own task until accepting a new stream fails.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};
use crate::mux::{Multiplexer, Substream};
use crate::stream::{MessageStream, Reply, RequestHeader, ResponseHeader};

/// Handles calls to one method.
///
/// The handler owns the call stream: it reads the request messages it
/// expects and writes its responses. Any closure taking a
/// [`MessageStream`] and returning a `Send` future is a handler.
pub trait MethodHandler: Send + Sync {
    fn handle(&self, stream: MessageStream) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

impl<F, Fut> MethodHandler for F
where
    F: Fn(MessageStream) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, stream: MessageStream) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(self(stream))
    }
}

/// Method table for the inbound side of the RPC substrate.
#[derive(Clone, Default)]
pub struct Server {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `method`, replacing any previous binding.
    pub fn register(&mut self, method: impl Into<String>, handler: impl MethodHandler + 'static) {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    /// Bind a single-request, single-response function to `method`.
    pub fn register_unary<Req, Resp, F, Fut>(&mut self, method: impl Into<String>, function: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Resp, String>> + Send + 'static,
    {
        let function = Arc::new(function);
        self.register(method, move |mut stream: MessageStream| {
            let function = Arc::clone(&function);
            async move {
                let request: Req = stream.receive().await?;
                let reply: Reply<Resp> = function(request).await.into();
                stream.send(&reply)
            }
        });
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Serve calls arriving on `mux` until accepting a stream fails.
    ///
    /// Always ends with an error; [`RpcError::Accept`] is the normal end
    /// when the peer goes away.
    pub async fn serve(&self, mux: &Multiplexer) -> RpcError {
        let handlers = Arc::new(self.handlers.clone());
        loop {
            let substream = match mux.accept().await {
                Ok(substream) => substream,
                Err(e) => {
                    return RpcError::Accept {
                        source: Box::new(e),
                    }
                }
            };

            let handlers = Arc::clone(&handlers);
            tokio::spawn(async move {
                let stream_id = substream.id();
                if let Err(e) = dispatch(&handlers, substream).await {
                    tracing::debug!(stream_id, error = %e, "Call failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods().collect();
        methods.sort_unstable();
        f.debug_struct("Server").field("methods", &methods).finish()
    }
}

async fn dispatch(
    handlers: &HashMap<String, Arc<dyn MethodHandler>>,
    substream: Substream,
) -> Result<()> {
    let mut stream = MessageStream::new(substream);
    let header: RequestHeader = stream.receive().await?;

    let Some(handler) = handlers.get(&header.method) else {
        let error = RpcError::UnknownMethod(header.method);
        stream.send(&ResponseHeader {
            error: Some(error.to_string()),
        })?;
        return Err(error);
    };

    stream.send(&ResponseHeader { error: None })?;
    tracing::trace!(method = %header.method, stream_id = stream.id(), "Dispatching call");
    handler.handle(stream).await
}
