/// Construction-time configuration surface
///
/// Defaults live as associated constants, `with_*` setters return `Self`
/// for chaining, and a plain `Config` is still constructible directly for
/// callers who don't want the builder ceremony.
use crate::mode::OpMode;

/// Maximum bytes for one formatted frame, matching the mesh link's MTU.
pub const LINK_MTU: usize = 250;

/// Default retry cache slot budget.
pub const DEFAULT_MAX_CACHE_SLOTS: usize = 16;

/// Default retry cache aggregate byte budget.
pub const DEFAULT_MAX_CACHE_BYTES: usize = 16 * LINK_MTU;

/// Engine-wide configuration, mutable after construction via
/// `ProtocolEngine::set_timeouts`/`set_op_mode`.
#[derive(Debug, Clone)]
pub struct Config {
    /// This node's name, used as the topic namespace prefix and the source
    /// field of outgoing frames.
    pub device_name: String,
    /// Transport-level time-to-live passed through to every send.
    pub ttl: u8,
    /// Number of send attempts before a message is declared lost.
    pub try_count: u16,
    /// Initial retry interval, in milliseconds.
    pub timeout_ms: u32,
    /// Upper bound of the jitter window added to each retry, in
    /// milliseconds (the jitter itself is drawn from `[timeout/8, timeout/4]`;
    /// `backoff_ms` is kept as a separate knob for the sync transport's own
    /// backoff).
    pub backoff_ms: u16,
    /// Retry cache slot budget.
    pub max_cache_slots: usize,
    /// Retry cache aggregate byte budget.
    pub max_cache_bytes: usize,
    /// Seen-id ring capacity.
    pub id_cache_size: usize,
    /// Current operational mode.
    pub op_mode: OpMode,
}

impl Config {
    /// `try_count = 7`, `timeout_ms = 200ms`, `backoff_ms = 70ms`.
    pub const DEFAULT_TRY_COUNT: u16 = 7;
    pub const DEFAULT_TIMEOUT_MS: u32 = 200;
    pub const DEFAULT_BACKOFF_MS: u16 = 70;

    /// Build a config for `device_name` with every other field defaulted.
    pub fn new(ttl: u8, device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ttl,
            try_count: Self::DEFAULT_TRY_COUNT,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            backoff_ms: Self::DEFAULT_BACKOFF_MS,
            max_cache_slots: DEFAULT_MAX_CACHE_SLOTS,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            id_cache_size: crate::id_cache::ID_CACHE_SIZE,
            op_mode: OpMode::default(),
        }
    }

    pub fn builder(ttl: u8, device_name: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(ttl, device_name)
    }
}

/// Fluent builder for [`Config`].
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(ttl: u8, device_name: impl Into<String>) -> Self {
        Self {
            config: Config::new(ttl, device_name),
        }
    }

    pub fn try_count(mut self, try_count: u16) -> Self {
        self.config.try_count = try_count;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    pub fn backoff_ms(mut self, backoff_ms: u16) -> Self {
        self.config.backoff_ms = backoff_ms;
        self
    }

    pub fn max_cache_slots(mut self, slots: usize) -> Self {
        self.config.max_cache_slots = slots;
        self
    }

    pub fn max_cache_bytes(mut self, bytes: usize) -> Self {
        self.config.max_cache_bytes = bytes;
        self
    }

    pub fn id_cache_size(mut self, size: usize) -> Self {
        self.config.id_cache_size = size;
        self
    }

    pub fn op_mode(mut self, mode: OpMode) -> Self {
        self.config.op_mode = mode;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::new(1, "kitchen");
        assert_eq!(c.try_count, 7);
        assert_eq!(c.timeout_ms, 200);
        assert_eq!(c.backoff_ms, 70);
        assert_eq!(c.op_mode, OpMode::NodeStd);
    }

    #[test]
    fn builder_overrides_defaults() {
        let c = Config::builder(1, "kitchen")
            .try_count(3)
            .timeout_ms(50)
            .op_mode(OpMode::GwAckAll)
            .build();
        assert_eq!(c.try_count, 3);
        assert_eq!(c.timeout_ms, 50);
        assert_eq!(c.op_mode, OpMode::GwAckAll);
    }
}
