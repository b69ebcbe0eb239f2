// ABOUTME: Exec protocol handler: reaches the agent by running the URL's command.
// ABOUTME: Dials on a separate task so the caller can abandon the connect at any time.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tether_agent::{dial, AgentError, AgentMode, AgentStream, DialOptions, ExecTransport, Transport};
use tether_url::{Kind, Protocol, Url};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::ConnectError;
use crate::protocol::{ProtocolHandler, SessionParameters};
use crate::remote::RemoteEndpoint;
use crate::synchronizer::Synchronizer;

/// A dialed stream that must be released if nobody takes ownership of it.
pub trait Closable: Send + 'static {
    fn close(self) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

impl Closable for AgentStream {
    fn close(self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(AgentStream::close(self))
    }
}

/// Run `dialing` on its own task and wait for either its result or `cancel`.
///
/// On cancellation this returns at once. The task finishes on its own and
/// closes any stream it produced, since the result has no receiver left.
pub async fn dial_cancellable<S, F>(cancel: &CancellationToken, dialing: F) -> Result<S, ConnectError>
where
    S: Closable,
    F: Future<Output = Result<S, AgentError>> + Send + 'static,
{
    let (results_tx, results_rx) = oneshot::channel();
    let worker_cancel = cancel.clone();

    tokio::spawn(async move {
        let result = dialing.await;

        if worker_cancel.is_cancelled() {
            if let Ok(stream) = result {
                tracing::debug!("Connect cancelled during dial, closing agent stream");
                stream.close().await;
            }
            return;
        }

        if let Err(Ok(stream)) = results_tx.send(result) {
            tracing::debug!("Connect abandoned during dial, closing agent stream");
            stream.close().await;
        }
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
        result = results_rx => match result {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ConnectError::Dial(e)),
            Err(_) => Err(ConnectError::DialAbandoned),
        },
    }
}

/// Handler for `exec:` synchronization URLs.
#[derive(Debug, Clone, Default)]
pub struct ExecProtocolHandler {
    options: DialOptions,
}

impl ExecProtocolHandler {
    pub fn new(options: DialOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ProtocolHandler for ExecProtocolHandler {
    async fn connect(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        prompter: &str,
        parameters: &SessionParameters,
    ) -> Result<Box<dyn Synchronizer>, ConnectError> {
        if url.kind != Kind::Synchronization {
            panic!("non-synchronization URL dispatched to synchronization protocol handler");
        } else if url.protocol != Protocol::Exec {
            panic!("non-exec URL dispatched to exec protocol handler");
        }

        if !url.environment.is_empty() {
            return Err(ConnectError::UnsupportedInput(
                "exec URL contains environment variables".to_string(),
            ));
        } else if !url.parameters.is_empty() {
            return Err(ConnectError::UnsupportedInput(
                "exec URL contains internal parameters".to_string(),
            ));
        }

        let span = tracing::info_span!("connect", protocol = "exec", session = %parameters.session);
        async {
            let transport = Transport::from(ExecTransport::new(&url.host, prompter));
            let options = self.options.clone();
            let stream = dial_cancellable(cancel, async move {
                dial(&transport, AgentMode::Synchronizer, &options).await
            })
            .await?;

            let request = parameters.initialize_request(&url.path);
            let endpoint = RemoteEndpoint::connect(stream, request)
                .await
                .map_err(ConnectError::Endpoint)?;
            Ok(Box::new(endpoint) as Box<dyn Synchronizer>)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records whether it was closed.
    struct MockStream {
        closed: Arc<AtomicBool>,
    }

    impl Closable for MockStream {
        fn close(self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn exec_url() -> Url {
        Url::parse("exec:/usr/bin/kubectl exec -i pod --:/srv", Kind::Synchronization).unwrap()
    }

    #[tokio::test]
    async fn test_dial_result_delivered() {
        let closed = Arc::new(AtomicBool::new(false));
        let stream = MockStream {
            closed: Arc::clone(&closed),
        };
        let cancel = CancellationToken::new();

        let result = dial_cancellable(&cancel, async move { Ok(stream) }).await;
        assert!(result.is_ok());
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dial_error_wrapped() {
        let cancel = CancellationToken::new();
        let result = dial_cancellable::<MockStream, _>(&cancel, async {
            Err(AgentError::UnknownErrorCondition)
        })
        .await;
        match result {
            Err(ConnectError::Dial(AgentError::UnknownErrorCondition)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("dial should fail"),
        }
    }

    #[tokio::test]
    async fn test_cancel_returns_promptly_and_closes_late_stream() {
        let closed = Arc::new(AtomicBool::new(false));
        let stream = MockStream {
            closed: Arc::clone(&closed),
        };
        let release = Arc::new(Notify::new());
        let finished = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let gate = Arc::clone(&release);
        let done = Arc::clone(&finished);
        let connect = dial_cancellable(&cancel, async move {
            gate.notified().await;
            done.notify_one();
            Ok(stream)
        });

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), connect)
            .await
            .expect("cancelled connect should not wait for the dial");
        assert!(matches!(result, Err(ConnectError::Cancelled)));
        assert!(!closed.load(Ordering::SeqCst));

        // Let the dial finish after nobody is waiting for it.
        release.notify_one();
        finished.notified().await;
        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejects_environment_variables() {
        let mut url = exec_url();
        url.environment
            .insert("KUBECONFIG".to_string(), "/tmp/k".to_string());

        let result = ExecProtocolHandler::default()
            .connect(
                &CancellationToken::new(),
                &url,
                "",
                &SessionParameters::new("s"),
            )
            .await;
        match result {
            Err(ConnectError::UnsupportedInput(message)) => {
                assert_eq!(message, "exec URL contains environment variables")
            }
            _ => panic!("expected unsupported input"),
        }
    }

    #[tokio::test]
    async fn test_rejects_internal_parameters() {
        let mut url = exec_url();
        url.parameters
            .insert("internal".to_string(), "1".to_string());

        let result = ExecProtocolHandler::default()
            .connect(
                &CancellationToken::new(),
                &url,
                "",
                &SessionParameters::new("s"),
            )
            .await;
        match result {
            Err(ConnectError::UnsupportedInput(message)) => {
                assert_eq!(message, "exec URL contains internal parameters")
            }
            _ => panic!("expected unsupported input"),
        }
    }

    #[tokio::test]
    #[should_panic(expected = "non-exec URL")]
    async fn test_wrong_protocol_panics() {
        let url = Url::local("/srv", Kind::Synchronization);
        let _ = ExecProtocolHandler::default()
            .connect(
                &CancellationToken::new(),
                &url,
                "",
                &SessionParameters::new("s"),
            )
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "non-synchronization URL")]
    async fn test_wrong_kind_panics() {
        let mut url = exec_url();
        url.kind = Kind::Forwarding;
        let _ = ExecProtocolHandler::default()
            .connect(
                &CancellationToken::new(),
                &url,
                "",
                &SessionParameters::new("s"),
            )
            .await;
    }

    #[tokio::test]
    async fn test_cancel_before_dial_of_unreachable_command() {
        let url = exec_url();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ExecProtocolHandler::default()
            .connect(&cancel, &url, "", &SessionParameters::new("s"))
            .await;
        assert!(matches!(result, Err(ConnectError::Cancelled)));
    }
}
