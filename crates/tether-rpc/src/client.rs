// ABOUTME: RPC client that opens one logical stream per call.
// ABOUTME: Sends the method header, checks the server's answer, and hands back the call stream.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};
use crate::mux::Multiplexer;
use crate::stream::{MessageStream, Reply, RequestHeader, ResponseHeader};

/// Outbound side of the RPC substrate. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Client {
    mux: Multiplexer,
}

impl Client {
    pub fn new(mux: Multiplexer) -> Self {
        Self { mux }
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// Start a call to `method` and return its stream once the server has
    /// accepted it.
    pub async fn invoke(&self, method: &str) -> Result<MessageStream> {
        let mut stream = MessageStream::new(self.mux.open().await?);
        stream.send(&RequestHeader {
            method: method.to_string(),
        })?;

        let header: ResponseHeader = stream.receive().await?;
        if let Some(error) = header.error {
            return Err(RpcError::Remote(error));
        }

        tracing::trace!(method, stream_id = stream.id(), "Call established");
        Ok(stream)
    }

    /// Make a single-request, single-response call.
    pub async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut stream = self.invoke(method).await?;
        stream.send(request)?;
        stream.close_write();
        stream.receive::<Reply<Resp>>().await?.into_result()
    }
}
