// ABOUTME: Session-level parameters shared by both endpoints of a synchronization session.
// ABOUTME: Protocol version, scan mode, and the synchronization configuration.

use serde::{Deserialize, Serialize};

/// Session protocol version negotiated at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    #[default]
    V1,
}

impl Version {
    pub fn supported(&self) -> bool {
        matches!(self, Version::V1)
    }
}

/// How an endpoint rescans its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Use the endpoint's default behavior.
    #[default]
    Default,
    /// Walk the whole root on every scan.
    Full,
    /// Reuse the previous scan unless something invalidated it.
    Accelerated,
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(ScanMode::Default),
            "full" => Ok(ScanMode::Full),
            "accelerated" => Ok(ScanMode::Accelerated),
            other => Err(format!("unknown scan mode: {other}")),
        }
    }
}

/// Per-session synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub scan_mode: ScanMode,
    /// Root-relative paths or file names to leave out of scans.
    #[serde(default)]
    pub ignores: Vec<String>,
    /// Largest number of entries a scan may return. Zero means no limit.
    #[serde(default)]
    pub max_entry_count: u64,
}

impl Configuration {
    /// Overlay `other` on top of this configuration. Non-default values in
    /// `other` win; ignores accumulate.
    pub fn merged_with(&self, other: &Configuration) -> Configuration {
        let mut ignores = self.ignores.clone();
        ignores.extend(other.ignores.iter().cloned());
        Configuration {
            scan_mode: if other.scan_mode == ScanMode::Default {
                self.scan_mode
            } else {
                other.scan_mode
            },
            ignores,
            max_entry_count: if other.max_entry_count == 0 {
                self.max_entry_count
            } else {
                other.max_entry_count
            },
        }
    }

    /// Whether `path` (root-relative, `/`-separated) is excluded.
    pub fn is_ignored(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.ignores.iter().any(|ignore| {
            let ignore = ignore.trim_matches('/');
            path == ignore
                || name == ignore
                || path
                    .strip_prefix(ignore)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_mode_parse() {
        assert_eq!("full".parse::<ScanMode>().unwrap(), ScanMode::Full);
        assert_eq!(
            "accelerated".parse::<ScanMode>().unwrap(),
            ScanMode::Accelerated
        );
        assert!("fast".parse::<ScanMode>().is_err());
    }

    #[test]
    fn test_merge_prefers_explicit_values() {
        let base = Configuration {
            scan_mode: ScanMode::Full,
            ignores: vec!["target".to_string()],
            max_entry_count: 10,
        };
        let overlay = Configuration {
            scan_mode: ScanMode::Default,
            ignores: vec![".git".to_string()],
            max_entry_count: 0,
        };

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.scan_mode, ScanMode::Full);
        assert_eq!(merged.ignores, vec!["target", ".git"]);
        assert_eq!(merged.max_entry_count, 10);

        let merged = overlay.merged_with(&base);
        assert_eq!(merged.scan_mode, ScanMode::Full);
        assert_eq!(merged.max_entry_count, 10);
    }

    #[test]
    fn test_ignores() {
        let configuration = Configuration {
            ignores: vec![".git".to_string(), "build/out/".to_string()],
            ..Default::default()
        };
        assert!(configuration.is_ignored(".git"));
        assert!(configuration.is_ignored("src/.git"));
        assert!(configuration.is_ignored("build/out"));
        assert!(configuration.is_ignored("build/out/a.o"));
        assert!(!configuration.is_ignored("build/output"));
        assert!(!configuration.is_ignored("src/main.rs"));
    }

    #[test]
    fn test_configuration_toml_defaults() {
        let configuration: Configuration = toml::from_str("scan_mode = \"accelerated\"").unwrap();
        assert_eq!(configuration.scan_mode, ScanMode::Accelerated);
        assert!(configuration.ignores.is_empty());
        assert_eq!(configuration.max_entry_count, 0);
    }
}
