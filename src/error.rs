//! Error types for the geoscope library

use crate::mmdb::MmdbError;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Seconds a client should wait before retrying a `DatabaseUnavailable` failure
pub const RETRY_AFTER_SECS: u64 = 60;

/// Failure of a single lookup or network resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// Input is not a well-formed IPv4 or IPv6 address
    #[error("invalid IP address format: {input:?}")]
    InvalidFormat {
        /// The rejected input, as given
        input: String,
    },
    /// Address is private, loopback, link-local or otherwise reserved
    #[error("private or reserved IP address: {ip}")]
    PrivateAddress {
        /// The rejected address
        ip: IpAddr,
    },
    /// The sources needed to answer are not loaded
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(&'static str),
    /// Every consulted source came back empty
    #[error("no data found for {ip}")]
    NotFound {
        /// The address that was looked up
        ip: IpAddr,
    },
}

impl LookupError {
    /// True when retrying later may succeed (only `DatabaseUnavailable`)
    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupError::DatabaseUnavailable(_))
    }

    /// True when the failure is caused by the request itself
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LookupError::InvalidFormat { .. } | LookupError::PrivateAddress { .. }
        )
    }

    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::InvalidFormat { .. } => "invalid_format",
            LookupError::PrivateAddress { .. } => "private_address",
            LookupError::DatabaseUnavailable(_) => "database_unavailable",
            LookupError::NotFound { .. } => "not_found",
        }
    }
}

/// Failure of a reload as a whole
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// None of the three database files could be opened
    #[error("no databases available ({})", .reasons.join("; "))]
    NoDatabasesAvailable {
        /// Why each edition failed to open
        reasons: Vec<String>,
    },
}

/// Failure to export range lists
#[derive(Debug, Error)]
pub enum ExportError {
    /// The database could not be walked
    #[error("failed to read networks: {0}")]
    Database(#[from] MmdbError),
    /// An output file could not be written
    #[error("failed to write {path}: {source}")]
    Io {
        /// File or directory being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Failure to open or validate one database file
#[derive(Debug, Error)]
pub enum SourceError {
    /// The file could not be read or mapped
    #[error("failed to open {path}: {source}")]
    Io {
        /// Path of the database file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid database
    #[error("invalid database {path}: {source}")]
    Format {
        /// Path of the database file
        path: PathBuf,
        /// What was wrong with it
        #[source]
        source: MmdbError,
    },
}

impl SourceError {
    /// True when the file does not exist (as opposed to being unreadable or corrupt)
    pub fn is_missing(&self) -> bool {
        matches!(self, SourceError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Failure while building a database
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A network key is neither an IP address nor a CIDR block
    #[error("invalid network {0:?}")]
    InvalidNetwork(String),
    /// The tree or data section exceeds the largest record width
    #[error("database too large: {0}")]
    TooLarge(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_classes() {
        let invalid = LookupError::InvalidFormat {
            input: "999.1.1.1".to_string(),
        };
        assert!(invalid.is_client_error());
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.kind(), "invalid_format");

        let unavailable = LookupError::DatabaseUnavailable("no database sources loaded");
        assert!(unavailable.is_retryable());
        assert!(!unavailable.is_client_error());

        let not_found = LookupError::NotFound {
            ip: "8.8.8.8".parse().unwrap(),
        };
        assert!(!not_found.is_retryable());
        assert!(!not_found.is_client_error());
        assert_eq!(not_found.to_string(), "no data found for 8.8.8.8");
    }

    #[test]
    fn test_load_error_lists_reasons() {
        let err = LoadError::NoDatabasesAvailable {
            reasons: vec!["country: missing".into(), "asn: corrupt".into()],
        };
        assert_eq!(
            err.to_string(),
            "no databases available (country: missing; asn: corrupt)"
        );
    }

    #[test]
    fn test_source_error_missing() {
        let err = SourceError::Io {
            path: PathBuf::from("/nope/GeoLite2-City.mmdb"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_missing());
        assert!(err.to_string().contains("GeoLite2-City.mmdb"));
    }
}
