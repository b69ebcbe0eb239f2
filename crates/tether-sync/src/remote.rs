// ABOUTME: Client side of the endpoint service over a dialed agent stream.
// ABOUTME: Initializes the remote endpoint and exposes it as a Synchronizer.

use async_trait::async_trait;
use tether_rpc::{Client, Multiplexer, Role, RpcError, Server};
use tokio::task::JoinHandle;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{EndpointError, Result};
use crate::messages::{
    ApplyRequest, ApplyResponse, Change, Entry, FileContents, InitializeRequest, ScanRequest,
    ScanResponse, TransmitMessage, TransmitRequest, UpdateRequest, METHOD_APPLY,
    METHOD_INITIALIZE, METHOD_SCAN, METHOD_TRANSMIT, METHOD_UPDATE,
};
use crate::session::Configuration;
use crate::synchronizer::Synchronizer;

/// An endpoint served by a remote agent.
///
/// The agent may call back over the same connection. This side registers
/// no methods, so such calls are answered with `unknown method`.
#[derive(Debug)]
pub struct RemoteEndpoint {
    client: Client,
    inbound: JoinHandle<()>,
    root: String,
    alpha: bool,
}

impl RemoteEndpoint {
    /// Take the client role over `stream` and initialize the remote endpoint.
    pub async fn connect<S>(stream: S, request: InitializeRequest) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mux = Multiplexer::new(stream, Role::Client);
        let inbound = tokio::spawn(serve_inbound(mux.clone()));
        let client = Client::new(mux);
        if let Err(e) = client.call::<_, ()>(METHOD_INITIALIZE, &request).await {
            client.multiplexer().close();
            inbound.abort();
            return Err(e.into());
        }

        tracing::debug!(root = %request.root, alpha = request.alpha, "Remote endpoint initialized");
        Ok(Self {
            client,
            inbound,
            root: request.root,
            alpha: request.alpha,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_alpha(&self) -> bool {
        self.alpha
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Synchronizer for RemoteEndpoint {
    async fn scan(&self, full: bool) -> Result<Vec<Entry>> {
        let response: ScanResponse = self
            .client
            .call(METHOD_SCAN, &ScanRequest { full })
            .await?;
        Ok(response.entries)
    }

    async fn transmit(&self, paths: Vec<String>) -> Result<Vec<FileContents>> {
        let mut stream = self.client.invoke(METHOD_TRANSMIT).await?;
        stream.send(&TransmitRequest { paths })?;
        stream.close_write();

        let mut files = Vec::new();
        while let Some(message) = stream.try_receive::<TransmitMessage>().await? {
            match message {
                TransmitMessage::File(file) => files.push(file),
                TransmitMessage::Error(error) => return Err(EndpointError::Backend(error)),
                TransmitMessage::Done => return Ok(files),
            }
        }

        // The stream stopped without a terminator, so the file list is partial.
        let cause = if self.client.multiplexer().is_closed() {
            RpcError::Closed
        } else {
            RpcError::UnexpectedEnd
        };
        tracing::warn!(received = files.len(), error = %cause, "Transmit stream cut off");
        Err(cause.into())
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<usize> {
        let response: ApplyResponse = self
            .client
            .call(METHOD_APPLY, &ApplyRequest { changes })
            .await?;
        Ok(response.applied)
    }

    async fn update(&self, configuration: Configuration) -> Result<()> {
        self.client
            .call::<_, ()>(METHOD_UPDATE, &UpdateRequest { configuration })
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.client.multiplexer().close();
        self.inbound.abort();
        Ok(())
    }
}

impl Drop for RemoteEndpoint {
    fn drop(&mut self) {
        self.inbound.abort();
    }
}

/// Answer calls the agent makes back over the connection.
async fn serve_inbound(mux: Multiplexer) {
    let err = Server::new().serve(&mux).await;
    tracing::debug!(error = %err, "Inbound call loop ended");
}
