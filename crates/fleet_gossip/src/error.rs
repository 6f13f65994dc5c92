//! Gossip error types.

use fleet_timestamp::TimestampError;

/// Knowledge gossip error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GossipError {
    /// The configuration cannot be used to construct a protocol instance.
    #[error("Invalid gossip config: {0}")]
    Config(Box<str>),

    /// A received item failed validation (checksum, id, clock, lifecycle).
    #[error("Integrity check failed for item {item_id}: {reason}")]
    Integrity {
        /// The id the item claimed to have.
        item_id: Box<str>,
        /// What did not verify.
        reason: Box<str>,
    },

    /// The item's `expires_at` has already passed.
    #[error("Item {0} has expired")]
    Expired(Box<str>),

    /// Content could not be (de)serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Gzip compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// A pattern's quality is below `min_quality_to_share`.
    #[error("Quality {quality} is below the sharing floor {floor}")]
    BelowQualityFloor {
        /// Quality of the rejected content.
        quality: f64,
        /// The configured floor.
        floor: f64,
    },

    /// Timestamp arithmetic overflowed.
    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    /// The transport collaborator failed to hand off a message.
    #[error("Transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),

    /// Other
    #[error("Other: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl GossipError {
    /// promote a custom error type to a GossipError
    pub fn other(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(e.into())
    }

    /// wrap an error raised by a transport implementation
    pub fn transport(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(e.into())
    }

    /// generate a configuration error from a string
    pub fn config(s: impl Into<String>) -> Self {
        Self::Config(s.into().into_boxed_str())
    }

    /// generate an integrity error for the given item id
    pub fn integrity(item_id: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Integrity {
            item_id: item_id.to_string().into_boxed_str(),
            reason: reason.into().into_boxed_str(),
        }
    }

    /// True for failures caused by the item itself rather than by local
    /// configuration or the transport.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Integrity { .. } | Self::Serialization(_) | Self::Compression(_)
        )
    }
}

impl From<String> for GossipError {
    fn from(s: String) -> Self {
        #[derive(Debug, thiserror::Error)]
        struct OtherError(String);
        impl std::fmt::Display for OtherError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        GossipError::other(OtherError(s))
    }
}

impl From<&str> for GossipError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

/// Result type for gossip operations.
pub type GossipResult<T> = Result<T, GossipError>;
