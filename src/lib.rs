/// meshmqtt_core - Reliability layer for a flooding-mesh pub/sub client
///
/// **License**: MIT
///
/// This library implements the retry/ACK, deduplication, and typed
/// line-protocol layer that turns a best-effort ESP-NOW-style flooding mesh
/// into an at-least-once MQTT-style command/response channel for
/// resource-constrained microcontroller nodes.
///
/// # Design Principles
/// - Bounded memory: fixed-capacity retry cache, seen-id ring, and per-frame
///   format buffer, sized at construction
/// - The mesh radio, its clock, and its random source are external
///   collaborators, modeled here as small traits (`Transport`, `Clock`,
///   `Rng`) rather than assumed concrete types
/// - Nothing in the error taxonomy is fatal: every failure is scoped to a
///   single message and the engine remains usable afterward
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod formatter;
pub mod id_cache;
pub mod mode;
pub mod parser;
pub mod retry_cache;
pub mod telemetry;
pub mod topic;
pub mod transport;
pub mod value;

pub use clock::{Clock, Rng, SystemClock, ThreadRng};
pub use config::{Config, ConfigBuilder, LINK_MTU};
pub use engine::{IfType, ProtocolEngine};
pub use errors::{MeshMqttError, Result};
pub use id_cache::ID_CACHE_SIZE;
pub use mode::OpMode;
pub use parser::Cmd;
pub use transport::Transport;

/// Protocol line, matching spec's `MQTT <src_node>/<msgid>` header literal.
pub const PROTOCOL_HEADER: &str = "MQTT";

/// Default send attempts before a message is declared lost.
pub const DEFAULT_TRY_COUNT: u16 = Config::DEFAULT_TRY_COUNT;

/// Default initial retry interval, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = Config::DEFAULT_TIMEOUT_MS;

/// Default backoff knob passed through to the sync transport, in
/// milliseconds.
pub const DEFAULT_BACKOFF_MS: u16 = Config::DEFAULT_BACKOFF_MS;
