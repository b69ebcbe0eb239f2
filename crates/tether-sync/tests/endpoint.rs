// ABOUTME: Integration tests for the endpoint service and its remote client.
// ABOUTME: Serves a filesystem endpoint over an in-memory duplex stream and drives it remotely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_rpc::{Client, MessageStream, Multiplexer, Role, RpcError, Server};
use tether_sync::messages::{
    InitializeRequest, ScanRequest, ScanResponse, TransmitMessage, TransmitRequest,
    METHOD_INITIALIZE, METHOD_SCAN, METHOD_TRANSMIT,
};
use tether_sync::{
    filesystem_factory, serve_endpoint, Change, Configuration, Entry, EndpointError,
    FileContents, RemoteEndpoint, ScanMode, SessionParameters, Synchronizer, SynchronizerFactory,
};

struct Harness {
    remote: RemoteEndpoint,
    serving: tokio::task::JoinHandle<EndpointError>,
    root: tempfile::TempDir,
}

async fn connect(parameters: SessionParameters) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let (near, far) = tokio::io::duplex(256 * 1024);
    let serving = tokio::spawn(serve_endpoint(far, filesystem_factory()));

    let request = parameters.initialize_request(&root.path().to_string_lossy());
    let remote = RemoteEndpoint::connect(near, request).await.unwrap();
    Harness {
        remote,
        serving,
        root,
    }
}

#[tokio::test]
async fn scan_reports_remote_files() {
    let harness = connect(SessionParameters::new("session-scan")).await;
    std::fs::write(harness.root.path().join("hello.txt"), "hello").unwrap();

    let entries = harness.remote.scan(true).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "hello.txt");
    assert_eq!(entries[0].size, 5);
}

#[tokio::test]
async fn apply_then_transmit_round_trip() {
    let harness = connect(SessionParameters::new("session-apply").with_alpha(true)).await;
    assert!(harness.remote.is_alpha());

    let applied = harness
        .remote
        .apply(vec![
            Change::Write {
                path: "docs/notes.md".to_string(),
                data: b"# notes\n".to_vec(),
                executable: false,
            },
            Change::Write {
                path: "bin/tool".to_string(),
                data: vec![0, 159, 146, 150],
                executable: true,
            },
        ])
        .await
        .unwrap();
    assert_eq!(applied, 2);
    assert_eq!(
        std::fs::read(harness.root.path().join("docs/notes.md")).unwrap(),
        b"# notes\n"
    );

    let files = harness
        .remote
        .transmit(vec!["docs/notes.md".to_string(), "bin/tool".to_string()])
        .await
        .unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].data, vec![0, 159, 146, 150]);
}

#[tokio::test]
async fn transmit_failure_is_reported() {
    let harness = connect(SessionParameters::new("session-missing")).await;

    let err = harness
        .remote
        .transmit(vec!["missing.txt".to_string()])
        .await
        .unwrap_err();
    match err {
        EndpointError::Backend(message) => assert!(message.contains("missing.txt")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn escaping_paths_are_rejected_remotely() {
    let harness = connect(SessionParameters::new("session-escape")).await;

    let err = harness
        .remote
        .apply(vec![Change::Remove {
            path: "../outside".to_string(),
        }])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid synchronization path"));
}

#[tokio::test]
async fn update_switches_scan_mode() {
    let harness = connect(SessionParameters::new("session-update")).await;
    std::fs::write(harness.root.path().join("a"), "").unwrap();

    harness
        .remote
        .update(Configuration {
            scan_mode: ScanMode::Accelerated,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(harness.remote.scan(false).await.unwrap().len(), 1);
    std::fs::write(harness.root.path().join("b"), "").unwrap();
    assert_eq!(harness.remote.scan(false).await.unwrap().len(), 1);
    assert_eq!(harness.remote.scan(true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn second_initialize_is_refused() {
    let harness = connect(SessionParameters::new("session-twice")).await;
    let request = SessionParameters::new("again").initialize_request("/tmp");

    let err = harness
        .remote
        .client()
        .call::<_, ()>("endpoint.Initialize", &request)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref m) if m == "endpoint already initialized"));
}

#[tokio::test]
async fn methods_before_initialize_fail() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let _serving = tokio::spawn(serve_endpoint(far, filesystem_factory()));
    let client = Client::new(Multiplexer::new(near, Role::Client));

    let err = client
        .call::<_, ScanResponse>(METHOD_SCAN, &ScanRequest { full: true })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Remote(ref m) if m == "endpoint not initialized"));
}

#[tokio::test]
async fn serve_ends_after_shutdown() {
    let harness = connect(SessionParameters::new("session-shutdown")).await;
    harness.remote.shutdown().await.unwrap();
    drop(harness.remote);

    let err = tokio::time::timeout(Duration::from_secs(5), harness.serving)
        .await
        .expect("serve loop should end")
        .unwrap();
    assert!(matches!(err, EndpointError::Serve { .. }));
}

#[tokio::test]
async fn oversized_transmit_fails_and_session_survives() {
    let harness = connect(SessionParameters::new("session-large")).await;
    // Base64 pushes this past the frame limit.
    std::fs::write(harness.root.path().join("big.bin"), vec![7u8; 13 * 1024 * 1024]).unwrap();
    std::fs::write(harness.root.path().join("small.txt"), "ok").unwrap();

    let err = harness
        .remote
        .transmit(vec!["big.bin".to_string()])
        .await
        .unwrap_err();
    match err {
        EndpointError::Backend(message) => {
            assert!(message.contains("big.bin"), "{message}");
            assert!(message.contains("frame limit"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(!harness.remote.client().multiplexer().is_closed());
    assert_eq!(harness.remote.scan(true).await.unwrap().len(), 2);
    let files = harness
        .remote
        .transmit(vec!["small.txt".to_string()])
        .await
        .unwrap();
    assert_eq!(files[0].data, b"ok");
    assert!(!harness.serving.is_finished());
}

#[tokio::test]
async fn transmit_without_terminator_is_an_error() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let mut server = Server::new();
    server.register_unary(METHOD_INITIALIZE, |_request: InitializeRequest| async {
        Ok::<(), String>(())
    });
    server.register(METHOD_TRANSMIT, |mut stream: MessageStream| async move {
        let request: TransmitRequest = stream.receive().await?;
        stream.send(&TransmitMessage::File(FileContents {
            path: request.paths[0].clone(),
            data: b"partial".to_vec(),
            executable: false,
        }))?;
        stream.close_write();
        Ok::<(), RpcError>(())
    });
    let _serving = tokio::spawn(async move {
        let mux = Multiplexer::new(far, Role::Server);
        server.serve(&mux).await
    });

    let request = SessionParameters::new("session-cut").initialize_request("/tmp");
    let remote = RemoteEndpoint::connect(near, request).await.unwrap();
    let err = remote
        .transmit(vec!["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, EndpointError::Rpc(RpcError::UnexpectedEnd)), "{err}");
}

/// Scans by asking the controller for something first.
struct CallingSynchronizer {
    peer: Client,
}

#[async_trait]
impl Synchronizer for CallingSynchronizer {
    async fn scan(&self, _full: bool) -> tether_sync::error::Result<Vec<Entry>> {
        self.peer.call::<_, ()>("controller.Ping", &1).await?;
        Ok(Vec::new())
    }

    async fn transmit(&self, _paths: Vec<String>) -> tether_sync::error::Result<Vec<FileContents>> {
        Ok(Vec::new())
    }

    async fn apply(&self, _changes: Vec<Change>) -> tether_sync::error::Result<usize> {
        Ok(0)
    }

    async fn update(&self, _configuration: Configuration) -> tether_sync::error::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn endpoint_calls_back_to_controller() {
    let factory: SynchronizerFactory = Arc::new(|_request: &InitializeRequest, peer: &Client| {
        let synchronizer: Arc<dyn Synchronizer> = Arc::new(CallingSynchronizer {
            peer: peer.clone(),
        });
        Ok(synchronizer)
    });
    let (near, far) = tokio::io::duplex(64 * 1024);
    let _serving = tokio::spawn(serve_endpoint(far, factory));

    let request = SessionParameters::new("session-callback").initialize_request("/tmp");
    let remote = RemoteEndpoint::connect(near, request).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), remote.scan(true))
        .await
        .expect("call back to the controller should be answered")
        .unwrap_err();
    assert!(
        err.to_string().contains("unknown method: controller.Ping"),
        "{err}"
    );
}
