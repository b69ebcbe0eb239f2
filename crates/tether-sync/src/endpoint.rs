// ABOUTME: Endpoint service served over a multiplexed agent stream.
// ABOUTME: Binds the endpoint methods to an RPC server and serves until the peer goes away.

use std::sync::Arc;

use tether_rpc::{Client, MessageStream, Multiplexer, Role, RpcError, Server};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;

use crate::error::{EndpointError, Result};
use crate::messages::{
    ApplyRequest, ApplyResponse, InitializeRequest, ScanRequest, ScanResponse, TransmitMessage,
    TransmitRequest, UpdateRequest, METHOD_APPLY, METHOD_INITIALIZE, METHOD_SCAN,
    METHOD_TRANSMIT, METHOD_UPDATE,
};
use crate::synchronizer::{Synchronizer, SynchronizerFactory};

/// Inbound streams held before the serve loop accepts them.
pub const ENDPOINT_ACCEPT_BACKLOG: usize = 100;

/// Serve the endpoint methods over `stream` until accepting a new call fails.
///
/// This side takes the server role of the multiplexer; an RPC client over
/// the same connection is available to the synchronizer the peer
/// initializes. Always returns an error; [`EndpointError::Serve`] is the
/// normal end when the peer disconnects.
pub async fn serve_endpoint<S>(stream: S, factory: SynchronizerFactory) -> EndpointError
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mux = Multiplexer::with_backlog(stream, Role::Server, ENDPOINT_ACCEPT_BACKLOG);
    let endpoint = Arc::new(Endpoint::new(Client::new(mux.clone()), factory));
    let server = endpoint_server(endpoint);

    EndpointError::Serve {
        source: server.serve(&mux).await,
    }
}

struct Endpoint {
    client: Client,
    factory: SynchronizerFactory,
    synchronizer: RwLock<Option<Arc<dyn Synchronizer>>>,
}

impl Endpoint {
    fn new(client: Client, factory: SynchronizerFactory) -> Self {
        Self {
            client,
            factory,
            synchronizer: RwLock::new(None),
        }
    }

    async fn initialize(&self, request: InitializeRequest) -> Result<()> {
        if !request.version.supported() {
            return Err(EndpointError::Backend(format!(
                "unsupported session version {:?}",
                request.version
            )));
        }

        let mut slot = self.synchronizer.write().await;
        if slot.is_some() {
            return Err(EndpointError::AlreadyInitialized);
        }
        *slot = Some((self.factory)(&request, &self.client)?);

        tracing::info!(
            root = %request.root,
            session = %request.session,
            alpha = request.alpha,
            "Endpoint initialized"
        );
        Ok(())
    }

    async fn synchronizer(&self) -> Result<Arc<dyn Synchronizer>> {
        self.synchronizer
            .read()
            .await
            .clone()
            .ok_or(EndpointError::NotInitialized)
    }

    async fn scan(&self, request: ScanRequest) -> Result<ScanResponse> {
        let entries = self.synchronizer().await?.scan(request.full).await?;
        Ok(ScanResponse { entries })
    }

    async fn transmit(&self, mut stream: MessageStream) -> tether_rpc::Result<()> {
        let request: TransmitRequest = stream.receive().await?;
        let outcome = match self.synchronizer().await {
            Ok(synchronizer) => {
                send_files(&mut stream, synchronizer.as_ref(), request.paths).await?
            }
            Err(e) => TransmitMessage::Error(e.to_string()),
        };

        stream.send(&outcome)?;
        stream.close_write();
        Ok(())
    }

    async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse> {
        let applied = self.synchronizer().await?.apply(request.changes).await?;
        Ok(ApplyResponse { applied })
    }

    async fn update(&self, request: UpdateRequest) -> Result<()> {
        self.synchronizer()
            .await?
            .update(request.configuration)
            .await
    }
}

/// Stream one `File` message per path. Returns the message that ends the
/// stream: `Done`, or `Error` for the first path that could not be sent.
async fn send_files(
    stream: &mut MessageStream,
    synchronizer: &dyn Synchronizer,
    paths: Vec<String>,
) -> tether_rpc::Result<TransmitMessage> {
    for path in paths {
        let file = match synchronizer.transmit(vec![path]).await {
            Ok(mut contents) => match contents.pop() {
                Some(file) => file,
                None => continue,
            },
            Err(e) => return Ok(TransmitMessage::Error(e.to_string())),
        };

        let path = file.path.clone();
        match stream.send(&TransmitMessage::File(file)) {
            Ok(()) => {}
            Err(e @ RpcError::PayloadTooLarge { .. }) => {
                tracing::warn!(path = %path, error = %e, "File too large to transmit");
                return Ok(TransmitMessage::Error(format!("unable to transmit {path}: {e}")));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(TransmitMessage::Done)
}

fn endpoint_server(endpoint: Arc<Endpoint>) -> Server {
    let mut server = Server::new();

    let e = Arc::clone(&endpoint);
    server.register_unary(METHOD_INITIALIZE, move |request: InitializeRequest| {
        let e = Arc::clone(&e);
        async move { e.initialize(request).await.map_err(|err| err.to_string()) }
    });

    let e = Arc::clone(&endpoint);
    server.register_unary(METHOD_SCAN, move |request: ScanRequest| {
        let e = Arc::clone(&e);
        async move { e.scan(request).await.map_err(|err| err.to_string()) }
    });

    let e = Arc::clone(&endpoint);
    server.register(METHOD_TRANSMIT, move |stream: MessageStream| {
        let e = Arc::clone(&e);
        async move { e.transmit(stream).await }
    });

    let e = Arc::clone(&endpoint);
    server.register_unary(METHOD_APPLY, move |request: ApplyRequest| {
        let e = Arc::clone(&e);
        async move { e.apply(request).await.map_err(|err| err.to_string()) }
    });

    let e = endpoint;
    server.register_unary(METHOD_UPDATE, move |request: UpdateRequest| {
        let e = Arc::clone(&e);
        async move { e.update(request).await.map_err(|err| err.to_string()) }
    });

    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_endpoint_methods_are_bound() {
        let (a, _b) = tokio::io::duplex(64);
        let mux = Multiplexer::new(a, Role::Server);
        let endpoint = Arc::new(Endpoint::new(
            Client::new(mux),
            crate::synchronizer::filesystem_factory(),
        ));
        let server = endpoint_server(endpoint);

        let mut methods: Vec<_> = server.methods().collect();
        methods.sort_unstable();
        assert_eq!(
            methods,
            vec![
                "endpoint.Apply",
                "endpoint.Initialize",
                "endpoint.Scan",
                "endpoint.Transmit",
                "endpoint.Update",
            ]
        );
    }

    #[tokio::test]
    async fn test_serve_endpoint_returns_when_accept_fails() {
        let (near, far) = tokio::io::duplex(64);
        drop(far);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            serve_endpoint(near, crate::synchronizer::filesystem_factory()),
        )
        .await
        .expect("serve loop should not hang");
        assert!(matches!(err, EndpointError::Serve { .. }));
        assert!(err.to_string().starts_with("error serving RPC requests"));
    }
}
