//! LDSM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LdsmError>;

/// Top-level error type for the low-disk-space monitor.
#[derive(Debug, Error)]
pub enum LdsmError {
    #[error("[LDSM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LDSM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LDSM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LDSM-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[LDSM-2001] filesystem stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[LDSM-2002] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[LDSM-2003] stats probe timed out for {path} after {timeout_ms}ms")]
    ProbeTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("[LDSM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LDSM-2201] notifier {notifier} failed: {details}")]
    Notifier {
        notifier: &'static str,
        details: String,
    },

    #[error("[LDSM-2202] failed to launch analyzer {program}: {details}")]
    AnalyzerLaunch { program: String, details: String },

    #[error("[LDSM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LDSM-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[LDSM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LdsmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LDSM-1001",
            Self::MissingConfig { .. } => "LDSM-1002",
            Self::ConfigParse { .. } => "LDSM-1003",
            Self::UnsupportedPlatform { .. } => "LDSM-1101",
            Self::FsStats { .. } => "LDSM-2001",
            Self::MountParse { .. } => "LDSM-2002",
            Self::ProbeTimeout { .. } => "LDSM-2003",
            Self::Serialization { .. } => "LDSM-2101",
            Self::Notifier { .. } => "LDSM-2201",
            Self::AnalyzerLaunch { .. } => "LDSM-2202",
            Self::Io { .. } => "LDSM-3002",
            Self::ChannelClosed { .. } => "LDSM-3003",
            Self::Runtime { .. } => "LDSM-3900",
        }
    }

    /// Whether the next check cycle might succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::FsStats { .. }
                | Self::ProbeTimeout { .. }
                | Self::Notifier { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for LdsmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LdsmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<LdsmError> {
        vec![
            LdsmError::InvalidConfig {
                details: String::new(),
            },
            LdsmError::MissingConfig {
                path: PathBuf::new(),
            },
            LdsmError::ConfigParse {
                context: "",
                details: String::new(),
            },
            LdsmError::UnsupportedPlatform {
                details: String::new(),
            },
            LdsmError::FsStats {
                path: PathBuf::new(),
                details: String::new(),
            },
            LdsmError::MountParse {
                details: String::new(),
            },
            LdsmError::ProbeTimeout {
                path: PathBuf::new(),
                timeout_ms: 0,
            },
            LdsmError::Serialization {
                context: "",
                details: String::new(),
            },
            LdsmError::Notifier {
                notifier: "",
                details: String::new(),
            },
            LdsmError::AnalyzerLaunch {
                program: String::new(),
                details: String::new(),
            },
            LdsmError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            LdsmError::ChannelClosed { component: "" },
            LdsmError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = every_variant();
        let codes: Vec<&str> = errors.iter().map(LdsmError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_ldsm_prefix() {
        for err in &every_variant() {
            assert!(
                err.code().starts_with("LDSM-"),
                "code {} must start with LDSM-",
                err.code()
            );
        }
    }

    #[test]
    fn display_includes_code() {
        for err in &every_variant() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn probe_failures_are_retryable_config_errors_are_not() {
        assert!(
            LdsmError::FsStats {
                path: PathBuf::from("/data"),
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            LdsmError::ProbeTimeout {
                path: PathBuf::from("/mnt/nfs"),
                timeout_ms: 2000
            }
            .is_retryable()
        );
        assert!(
            !LdsmError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !LdsmError::AnalyzerLaunch {
                program: "baobab".to_string(),
                details: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = LdsmError::io(
            "/etc/fstab",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "LDSM-3002");
        assert!(err.to_string().contains("/etc/fstab"));
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: LdsmError = toml_err.into();
        assert_eq!(err.code(), "LDSM-1003");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: LdsmError = json_err.into();
        assert_eq!(err.code(), "LDSM-2101");
    }
}
