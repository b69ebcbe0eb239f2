// ABOUTME: Greeting exchanged when an agent process starts.
// ABOUTME: The agent announces its name and version on one line; the dialer validates it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AgentError, Result};
use crate::VERSION;

/// First token of the agent greeting.
pub const HANDSHAKE_MAGIC: &str = "tether-agent";

/// Longest greeting line the dialer will read.
const MAX_GREETING_LENGTH: usize = 256;

/// Announce this agent on `writer`.
pub async fn server_handshake<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    writer
        .write_all(format!("{HANDSHAKE_MAGIC} {VERSION}\n").as_bytes())
        .await?;
    writer.flush().await
}

/// Read and validate the agent greeting from `reader`.
///
/// Reads one byte at a time so nothing past the greeting is consumed; the
/// rest of the stream belongs to the multiplexer.
pub async fn client_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut line = Vec::with_capacity(32);
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(AgentError::Handshake(
                    "agent closed the stream before greeting".to_string(),
                ));
            }
            Err(e) => return Err(AgentError::Handshake(e.to_string())),
        };
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_GREETING_LENGTH {
            return Err(AgentError::Handshake("greeting too long".to_string()));
        }
        line.push(byte);
    }

    let line = String::from_utf8_lossy(&line);
    let line = line.trim_end_matches('\r');
    let (magic, version) = line
        .split_once(' ')
        .ok_or_else(|| AgentError::Handshake(format!("malformed greeting {line:?}")))?;

    if magic != HANDSHAKE_MAGIC {
        return Err(AgentError::Handshake(format!("unexpected greeting {line:?}")));
    }
    if version != VERSION {
        return Err(AgentError::VersionMismatch {
            expected: VERSION.to_string(),
            actual: version.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_round() {
        let (mut agent, mut dialer) = tokio::io::duplex(64);
        server_handshake(&mut agent).await.unwrap();
        agent.write_all(b"payload").await.unwrap();

        client_handshake(&mut dialer).await.unwrap();

        let mut rest = [0u8; 7];
        dialer.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");
    }

    #[tokio::test]
    async fn test_handshake_accepts_crlf() {
        let greeting = format!("{HANDSHAKE_MAGIC} {VERSION}\r\n");
        let mut reader = greeting.as_bytes();
        client_handshake(&mut reader).await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_version_mismatch() {
        let mut reader: &[u8] = b"tether-agent 0.0.0-other\n";
        let err = client_handshake(&mut reader).await.unwrap_err();
        match err {
            AgentError::VersionMismatch { expected, actual } => {
                assert_eq!(expected, VERSION);
                assert_eq!(actual, "0.0.0-other");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_wrong_magic() {
        let mut reader: &[u8] = b"sh: tether-agent: not found\n";
        let err = client_handshake(&mut reader).await.unwrap_err();
        assert!(matches!(err, AgentError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_handshake_eof() {
        let mut reader: &[u8] = b"";
        let err = client_handshake(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("before greeting"));
    }

    #[tokio::test]
    async fn test_handshake_too_long() {
        let long = vec![b'x'; MAX_GREETING_LENGTH + 10];
        let mut reader = long.as_slice();
        let err = client_handshake(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("too long"));
    }
}
