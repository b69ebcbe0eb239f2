// ABOUTME: Local protocol handler for synchronization roots on this machine.
// ABOUTME: Connects straight to a filesystem synchronizer without dialing an agent.

use async_trait::async_trait;
use tether_url::{Kind, Protocol, Url};
use tokio_util::sync::CancellationToken;

use crate::error::ConnectError;
use crate::protocol::{ProtocolHandler, SessionParameters};
use crate::synchronizer::{FilesystemSynchronizer, Synchronizer};

/// Handler for plain filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProtocolHandler;

#[async_trait]
impl ProtocolHandler for LocalProtocolHandler {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        _prompter: &str,
        parameters: &SessionParameters,
    ) -> Result<Box<dyn Synchronizer>, ConnectError> {
        if url.kind != Kind::Synchronization {
            panic!("non-synchronization URL dispatched to synchronization protocol handler");
        } else if url.protocol != Protocol::Local {
            panic!("non-local URL dispatched to local protocol handler");
        }
        if cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        Ok(Box::new(FilesystemSynchronizer::new(
            &url.path,
            parameters.configuration.clone(),
            parameters.alpha,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_local_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), "x").unwrap();
        let url = Url::local(dir.path().to_string_lossy(), Kind::Synchronization);

        let endpoint = LocalProtocolHandler
            .connect(
                &CancellationToken::new(),
                &url,
                "",
                &SessionParameters::new("s"),
            )
            .await
            .unwrap();
        let entries = endpoint.scan(false).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let url = Url::local("/srv", Kind::Synchronization);
        let result = LocalProtocolHandler
            .connect(&cancel, &url, "", &SessionParameters::new("s"))
            .await;
        assert!(matches!(result, Err(ConnectError::Cancelled)));
    }
}
