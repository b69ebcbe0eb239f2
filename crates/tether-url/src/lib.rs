// ABOUTME: Endpoint URL model for tether synchronization and forwarding sessions.
// ABOUTME: Provides the URL type, its kind/protocol enums, and the top-level parser.

pub mod error;
pub mod exec;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::{Result, UrlError};
pub use exec::{is_exec_url, parse_exec, EXEC_PREFIX};

/// The kind of session a URL is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Synchronization,
    Forwarding,
}

/// The protocol used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// A path on the local filesystem.
    Local,
    /// An SSH host. Reserved; dialed by a transport outside this workspace.
    Ssh,
    /// A Docker container. Reserved; dialed by a transport outside this workspace.
    Docker,
    /// An arbitrary wrapper command that launches the agent.
    Exec,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Local => "local",
            Protocol::Ssh => "ssh",
            Protocol::Docker => "docker",
            Protocol::Exec => "exec",
        };
        f.write_str(name)
    }
}

/// A parsed endpoint URL.
///
/// For [`Protocol::Exec`] the `host` field holds the literal command line used
/// to reach the agent, not a network host, and `environment` and `parameters`
/// are always empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    pub kind: Kind,
    pub protocol: Protocol,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Url {
    /// Parse a raw URL of the given kind.
    ///
    /// Exec URLs are recognized by their case-insensitive prefix. Input shaped
    /// like another protocol's URL (`scheme://...`, `user@host:path`) is
    /// rejected; anything else is a local path.
    pub fn parse(raw: &str, kind: Kind) -> Result<Self> {
        if raw.is_empty() {
            return Err(UrlError::Empty);
        }
        if is_exec_url(raw) {
            return parse_exec(raw, kind);
        }
        reject_remote_syntax(raw)?;
        Ok(Self::local(raw, kind))
    }

    /// Create a local URL for a filesystem path.
    pub fn local(path: impl Into<String>, kind: Kind) -> Self {
        Self {
            kind,
            protocol: Protocol::Local,
            host: String::new(),
            path: path.into(),
            environment: HashMap::new(),
            parameters: HashMap::new(),
        }
    }
}

fn reject_remote_syntax(raw: &str) -> Result<()> {
    if let Some((scheme, _)) = raw.split_once("://") {
        let is_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme {
            return Err(match scheme.to_ascii_lowercase().as_str() {
                "ssh" => UrlError::UnsupportedProtocol(Protocol::Ssh),
                "docker" => UrlError::UnsupportedProtocol(Protocol::Docker),
                _ => UrlError::UnknownScheme(scheme.to_string()),
            });
        }
    }

    // [user@]host:path. A single letter before the colon is a drive.
    if let Some((host, _)) = raw.split_once(':') {
        if host.len() > 1 && !host.contains(['/', '\\']) {
            return Err(UrlError::UnsupportedProtocol(Protocol::Ssh));
        }
    }
    Ok(())
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Exec => {
                // A bare colon in the command would be read back as the path separator.
                if self.host.contains(':') {
                    write!(f, "{EXEC_PREFIX}\"{}\"", self.host)?;
                } else {
                    write!(f, "{EXEC_PREFIX}{}", self.host)?;
                }
                if !self.path.is_empty() {
                    write!(f, ":{}", self.path)?;
                }
                Ok(())
            }
            Protocol::Local => f.write_str(&self.path),
            other => write!(f, "{other}://{}/{}", self.host, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dispatches_exec() {
        let url = Url::parse("exec:cmd:/p", Kind::Synchronization).unwrap();
        assert_eq!(url.protocol, Protocol::Exec);
        assert_eq!(url.host, "cmd");
    }

    #[test]
    fn test_parse_local_path() {
        let url = Url::parse("/home/user/project", Kind::Synchronization).unwrap();
        assert_eq!(url.protocol, Protocol::Local);
        assert_eq!(url.path, "/home/user/project");
        assert!(url.host.is_empty());
    }

    #[test]
    fn test_parse_rejects_other_protocols() {
        let cases = [
            ("ssh://host/x", UrlError::UnsupportedProtocol(Protocol::Ssh)),
            ("SSH://host/x", UrlError::UnsupportedProtocol(Protocol::Ssh)),
            ("user@host:/p", UrlError::UnsupportedProtocol(Protocol::Ssh)),
            ("host:relative/p", UrlError::UnsupportedProtocol(Protocol::Ssh)),
            (
                "docker://container/data",
                UrlError::UnsupportedProtocol(Protocol::Docker),
            ),
            ("http://example.com/p", UrlError::UnknownScheme("http".to_string())),
        ];
        for (raw, expected) in cases {
            assert_eq!(Url::parse(raw, Kind::Synchronization), Err(expected), "{raw}");
        }
    }

    #[test]
    fn test_parse_local_paths_with_colons() {
        for raw in ["C:\\Users\\me", "c:/data", "./odd:name", "/srv/a:b", "dir\\x:y"] {
            let url = Url::parse(raw, Kind::Synchronization).unwrap();
            assert_eq!(url.protocol, Protocol::Local, "{raw}");
            assert_eq!(url.path, raw);
        }
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(
            Url::parse("", Kind::Synchronization),
            Err(UrlError::Empty)
        );
    }

    #[test]
    fn test_display_exec() {
        let url = Url::parse("exec:cmd:/p", Kind::Synchronization).unwrap();
        assert_eq!(url.to_string(), "exec:cmd:/p");

        let url = Url::parse("exec:cmd", Kind::Synchronization).unwrap();
        assert_eq!(url.to_string(), "exec:cmd");
    }

    #[test]
    fn test_display_quotes_command_with_colon() {
        let url = Url::parse("exec:\"C:\\wrap\":/p", Kind::Synchronization).unwrap();
        let formatted = url.to_string();
        assert_eq!(formatted, "exec:\"C:\\wrap\":/p");

        let reparsed = Url::parse(&formatted, Kind::Synchronization).unwrap();
        assert_eq!(reparsed, url);
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Exec.to_string(), "exec");
        assert_eq!(Protocol::Ssh.to_string(), "ssh");
    }

    #[test]
    fn test_url_serializes_lowercase_enums() {
        let url = Url::parse("exec:cmd:/p", Kind::Synchronization).unwrap();
        let json = serde_json::to_value(&url).unwrap();
        assert_eq!(json["kind"], "synchronization");
        assert_eq!(json["protocol"], "exec");
        assert_eq!(json["host"], "cmd");
    }
}
