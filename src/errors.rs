/// Error types for the meshmqtt reliability layer
///
/// Covers every local failure mode described by the error taxonomy: cache
/// exhaustion, sync-path timeouts, and malformed input. Per design, nothing
/// here is fatal to the engine — each error is scoped to a single message
/// and the engine remains usable afterward.
use std::fmt;

/// Result type alias for meshmqtt operations
pub type Result<T> = std::result::Result<T, MeshMqttError>;

/// meshmqtt protocol error enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshMqttError {
    /// The outbound retry cache has no free slot, or inserting would exceed
    /// its aggregate byte budget
    CacheFull,

    /// A blocking send (`publish_sync` and friends) timed out without a
    /// matching ACK
    SyncTimeout,

    /// A formatted frame would exceed `LINK_MTU`
    FrameTooLarge { size: usize, max: usize },

    /// A topic or value supplied to a typed helper exceeded the parser's
    /// fixed-size buffer
    TopicTooLong { len: usize, max: usize },

    /// A batched publish/subscribe/get/unsubscribe call was given no names
    EmptyNameList,

    /// Device name must be non-empty
    InvalidDeviceName,

    /// A `bin`-typed payload's base64 encoding was malformed
    InvalidBinPayload,
}

impl fmt::Display for MeshMqttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFull => write!(f, "retry cache is full"),
            Self::SyncTimeout => write!(f, "timed out waiting for ACK"),
            Self::FrameTooLarge { size, max } => {
                write!(f, "formatted frame of {size} bytes exceeds link MTU of {max}")
            }
            Self::TopicTooLong { len, max } => {
                write!(f, "topic of {len} bytes exceeds parser buffer of {max}")
            }
            Self::EmptyNameList => write!(f, "batched publish/subscribe called with no names"),
            Self::InvalidDeviceName => write!(f, "device name must be non-empty"),
            Self::InvalidBinPayload => write!(f, "bin payload is not valid base64"),
        }
    }
}

impl std::error::Error for MeshMqttError {}
