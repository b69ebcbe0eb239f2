// ABOUTME: Typed JSON message stream over one multiplexed logical stream.
// ABOUTME: Used by both the RPC client and method handlers once a call is established.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RpcError};
use crate::mux::Substream;

/// First message on every call stream, sent by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RequestHeader {
    pub method: String,
}

/// The server's answer to a [`RequestHeader`], sent before the handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponseHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result envelope for single-request, single-response methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply<T> {
    Ok(T),
    Error(String),
}

impl<T> Reply<T> {
    pub fn into_result(self) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(message) => Err(RpcError::Remote(message)),
        }
    }
}

impl<T, E: std::fmt::Display> From<std::result::Result<T, E>> for Reply<T> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(e) => Reply::Error(e.to_string()),
        }
    }
}

/// A bidirectional stream of JSON messages scoped to one call.
#[derive(Debug)]
pub struct MessageStream {
    inner: Substream,
}

impl MessageStream {
    pub fn new(inner: Substream) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    /// Encode and send one message.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let encoded = serde_json::to_vec(message)?;
        self.inner.send(encoded)
    }

    /// Receive and decode the next message, failing if the stream has ended.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.try_receive().await?.ok_or(RpcError::UnexpectedEnd)
    }

    /// Receive and decode the next message, or `None` if the peer is done.
    pub async fn try_receive<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.inner.recv().await {
            Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
            None => Ok(None),
        }
    }

    /// Signal that this side has nothing more to send.
    pub fn close_write(&mut self) {
        self.inner.close_write();
    }

    pub fn into_inner(self) -> Substream {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{Multiplexer, Role};

    #[test]
    fn test_reply_encoding() {
        let ok: Reply<u32> = Reply::Ok(7);
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"ok":7}"#);

        let err: Reply<u32> = Reply::Error("nope".to_string());
        assert_eq!(serde_json::to_string(&err).unwrap(), r#"{"error":"nope"}"#);
        assert!(matches!(err.into_result(), Err(RpcError::Remote(m)) if m == "nope"));
    }

    #[test]
    fn test_reply_from_result() {
        let reply: Reply<u8> = Err::<u8, _>("broken").into();
        assert!(matches!(reply, Reply::Error(ref m) if m == "broken"));
    }

    #[test]
    fn test_response_header_omits_empty_error() {
        let header = ResponseHeader { error: None };
        assert_eq!(serde_json::to_string(&header).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_typed_messages() {
        let (a, b) = tokio::io::duplex(4096);
        let client = Multiplexer::new(a, Role::Client);
        let server = Multiplexer::new(b, Role::Server);

        let mut outbound = MessageStream::new(client.open().await.unwrap());
        outbound.send(&vec!["a", "b"]).unwrap();
        outbound.close_write();

        let mut inbound = MessageStream::new(server.accept().await.unwrap());
        let received: Vec<String> = inbound.receive().await.unwrap();
        assert_eq!(received, vec!["a", "b"]);
        assert!(inbound.try_receive::<u8>().await.unwrap().is_none());
        assert!(matches!(
            inbound.receive::<u8>().await,
            Err(RpcError::UnexpectedEnd)
        ));
    }
}
