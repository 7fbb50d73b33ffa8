/// Protocol Engine — the top-level reliability/dedup/dispatch object
///
/// Owns the public operation surface (`publish`, `subscribe`/`unsubscribe`/
/// `get`, the typed `switch`/`temp`/… family and their `if_*` reception
/// counterparts, `handle_events`/`handle_events_raw`) and the frame
/// reception pipeline, built on top of the `RetryCache`/`SeenIdCache`/
/// `Formatter`/`Transport` components defined elsewhere in this crate.
/// Everything is a field of one `ProtocolEngine<T, C, R>` instance rather
/// than file-scope state, so a process that wants multiple independent
/// nodes just constructs multiple engines.
use std::sync::Mutex;

use crate::clock::{Clock, Rng};
use crate::config::Config;
use crate::errors::{MeshMqttError, Result};
use crate::formatter::Formatter;
use crate::id_cache::{Observed, SeenIdCache};
use crate::parser::{self, Cmd, Recognition};
use crate::retry_cache::{LostRecord, ReplyToken, RetryCache};
use crate::telemetry::Telemetry;
use crate::topic::TopicTemplate;
use crate::transport::Transport;
use crate::value;

/// Rejects a topic the parser could never round-trip back out of a frame.
/// An oversized topic is dropped silently on the receiving end; this gives
/// the sending caller an explicit, early `Err` instead of a frame that
/// would later vanish with no trace.
fn check_topic_len(topic: &str) -> Result<()> {
    if topic.len() >= parser::MAX_TOPIC_LEN {
        return Err(MeshMqttError::TopicTooLong {
            len: topic.len(),
            max: parser::MAX_TOPIC_LEN,
        });
    }
    Ok(())
}

/// Well-known name of the mesh gateway node. Every typed helper
/// (`switch`, `temp`, …) addresses this node rather than the caller's own
/// device.
pub const MESH_GW_NAME: &str = "m";

/// Which side of a `<dev>/<type>/<name>/{set,value}` topic an `_if*`
/// reception helper should match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfType {
    Set,
    Value,
    Either,
}

/// `(src_node, msgid, command, topic, value)` delivered to the publish
/// callback.
pub type PublishCallback = dyn Fn(&str, &[u8; 4], char, &str, &str) + Send + Sync;
/// `(bytes, reply_token, elapsed_ms)` delivered to the raw callback.
pub type RawCallback = dyn Fn(&[u8], ReplyToken, u64) + Send + Sync;

/// The top-level reliability/dedup/dispatch object. One instance owns its
/// own seen-id ring and topic-decompression template; a process that wants
/// a single shared instance constructs one engine and shares
/// `Arc<ProtocolEngine<..>>`.
pub struct ProtocolEngine<T: Transport, C: Clock, R: Rng> {
    device_name: String,
    config: Mutex<Config>,
    transport: T,
    clock: C,
    rng: R,
    retry_cache: RetryCache,
    seen_ids: Mutex<SeenIdCache>,
    recv_template: Mutex<TopicTemplate>,
    formatter: Mutex<Formatter>,
    telemetry: Mutex<Telemetry>,
    /// The `(topic, value)` of the record currently being dispatched to the
    /// publish callback — `if_*` helpers read this when called from inside
    /// that callback.
    current: Mutex<Option<(String, String)>>,
    on_publish: Mutex<Option<Box<PublishCallback>>>,
    on_raw: Mutex<Option<Box<RawCallback>>>,
}

impl<T: Transport, C: Clock, R: Rng> ProtocolEngine<T, C, R> {
    /// `Err(InvalidDeviceName)` if `config.device_name` is empty — every
    /// typed helper and the mode policy's "targets self" check key off this
    /// name, so an empty one would make every topic prefix-match trivially.
    pub fn new(config: Config, transport: T, clock: C, rng: R) -> Result<Self> {
        if config.device_name.is_empty() {
            return Err(MeshMqttError::InvalidDeviceName);
        }
        let device_name = config.device_name.clone();
        let retry_cache = RetryCache::new(config.max_cache_slots, config.max_cache_bytes);
        let seen_ids = SeenIdCache::new(config.id_cache_size);
        let formatter = Formatter::new(device_name.clone());
        Ok(Self {
            device_name,
            config: Mutex::new(config),
            transport,
            clock,
            rng,
            retry_cache,
            seen_ids: Mutex::new(seen_ids),
            recv_template: Mutex::new(TopicTemplate::new()),
            formatter: Mutex::new(formatter),
            telemetry: Mutex::new(Telemetry::new()),
            current: Mutex::new(None),
            on_publish: Mutex::new(None),
            on_raw: Mutex::new(None),
        })
    }

    pub fn set_timeouts(&self, try_count: u16, timeout_ms: u32, backoff_ms: u16) {
        let mut cfg = self.config.lock().unwrap();
        cfg.try_count = try_count;
        cfg.timeout_ms = timeout_ms;
        cfg.backoff_ms = backoff_ms;
    }

    pub fn set_op_mode(&self, mode: crate::mode::OpMode) {
        self.config.lock().unwrap().op_mode = mode;
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.lock().unwrap().clone()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// The underlying transport, for callers/tests that need to drive or
    /// inspect it directly (e.g. a `LoopbackTransport`'s sent-frame log).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying clock, for callers/tests that need to advance it
    /// directly (e.g. a `ManualClock`).
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Number of in-flight outbound entries currently held by the retry
    /// cache.
    pub fn retry_cache_live_count(&self) -> usize {
        self.retry_cache.live_count()
    }

    /// Aggregate bytes currently held by the retry cache's live entries.
    pub fn retry_cache_bytes_in_use(&self) -> usize {
        self.retry_cache.bytes_in_use()
    }

    // ---- outbound: direct topics -----------------------------------

    /// Format and enqueue one publish record; returns immediately. The
    /// topic sent on the wire is `dev` and `param` concatenated verbatim —
    /// the caller supplies the separating `/`.
    pub fn publish(&self, dev: &str, param: &str, value: &str) -> Result<()> {
        self.send_async(Cmd::Publish, &format!("{dev}{param}"), Some(value))
    }

    /// Blocking variant: suspends the caller inside the transport's
    /// wait-for-reply primitive. `Err(SyncTimeout)` if no ACK arrived within
    /// the transport's bounded wait.
    pub fn publish_sync(&self, dev: &str, param: &str, value: &str) -> Result<()> {
        self.send_sync(Cmd::Publish, &format!("{dev}{param}"), Some(value))
    }

    pub fn subscribe(&self, dev: &str, name: &str) -> Result<()> {
        self.send_async(Cmd::Subscribe, &format!("{dev}{name}"), None)
    }

    pub fn subscribe_sync(&self, dev: &str, name: &str) -> Result<()> {
        self.send_sync(Cmd::Subscribe, &format!("{dev}{name}"), None)
    }

    pub fn unsubscribe(&self, dev: &str, name: &str) -> Result<()> {
        self.send_async(Cmd::Unsubscribe, &format!("{dev}{name}"), None)
    }

    pub fn unsubscribe_sync(&self, dev: &str, name: &str) -> Result<()> {
        self.send_sync(Cmd::Unsubscribe, &format!("{dev}{name}"), None)
    }

    pub fn get(&self, dev: &str, name: &str) -> Result<()> {
        self.send_async(Cmd::Get, &format!("{dev}{name}"), None)
    }

    pub fn get_sync(&self, dev: &str, name: &str) -> Result<()> {
        self.send_sync(Cmd::Get, &format!("{dev}{name}"), None)
    }

    fn send_async(&self, cmd: Cmd, topic: &str, value: Option<&str>) -> Result<()> {
        check_topic_len(topic)?;
        let bytes = self.formatter.lock().unwrap().format_one(&self.rng, cmd, topic, value);
        self.enqueue(bytes)
    }

    fn send_sync(&self, cmd: Cmd, topic: &str, value: Option<&str>) -> Result<()> {
        check_topic_len(topic)?;
        let bytes = self.formatter.lock().unwrap().format_one(&self.rng, cmd, topic, value);
        let cfg = self.config.lock().unwrap().clone();
        let acked = self
            .transport
            .broadcast_and_wait_reply(&bytes, cfg.ttl, cfg.try_count, cfg.timeout_ms, cfg.backoff_ms);
        if acked {
            Ok(())
        } else {
            log::warn!("sync send timed out waiting for ACK");
            Err(MeshMqttError::SyncTimeout)
        }
    }

    fn enqueue(&self, bytes: Vec<u8>) -> Result<()> {
        if !crate::transport::fits_link_mtu(&bytes) {
            log::debug!("dropping oversized frame: {} bytes", bytes.len());
            return Err(MeshMqttError::FrameTooLarge {
                size: bytes.len(),
                max: crate::config::LINK_MTU,
            });
        }
        let cfg = self.config.lock().unwrap().clone();
        let token = self.transport.broadcast_and_expect_reply(&bytes, cfg.ttl);
        let now = self.clock.now_ms();
        // The broadcast just above is attempt 1; the retry cache only needs
        // to account for the remaining attempts so that `tick` resends
        // exactly `try_count - 1` times and the total broadcast count for a
        // never-acked message equals `try_count`.
        let remaining = cfg.try_count.saturating_sub(1);
        let result = self
            .retry_cache
            .add(&bytes, cfg.ttl, token, cfg.timeout_ms, remaining, now)
            .map(|_| ());
        if result.is_err() {
            log::warn!("retry cache full, dropping outbound frame (token {token})");
        } else {
            log::trace!("enqueued outbound frame, token {token}, {} bytes", bytes.len());
        }
        result
    }

    // ---- outbound: typed helpers, gateway-addressed ------------------

    /// Batched typed send: builds `<gw>/<type>/<name>/<suffix>` for every
    /// name, packs up to three records per frame with companion records
    /// for `Subscribe`/`Get` (see `formatter::Formatter`), and enqueues
    /// every resulting frame.
    fn raw_typed(&self, cmd: Cmd, type_: &str, names: &[&str], value: Option<&str>) -> Result<()> {
        if names.is_empty() {
            return Err(MeshMqttError::EmptyNameList);
        }
        let suffix = match cmd {
            Cmd::Subscribe | Cmd::Unsubscribe => "set",
            Cmd::Get | Cmd::Publish => "value",
        };
        let topic_values: Vec<(String, Option<String>)> = names
            .iter()
            .map(|name| {
                (
                    format!("{MESH_GW_NAME}/{type_}/{name}/{suffix}"),
                    value.map(str::to_string),
                )
            })
            .collect();
        for (topic, _) in &topic_values {
            check_topic_len(topic)?;
        }

        let frames = self.formatter.lock().unwrap().format(&self.rng, cmd, &topic_values);
        let mut first_err = None;
        for frame in frames {
            if let Err(e) = self.enqueue(frame) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn switch(&self, cmd: Cmd, names: &[&str], on: bool) -> Result<()> {
        self.raw_typed(cmd, "switch", names, Some(value::encode_switch(on)))
    }

    pub fn trigger(&self, cmd: Cmd, names: &[&str]) -> Result<()> {
        self.raw_typed(cmd, "trigger", names, Some(value::encode_trigger()))
    }

    pub fn contact(&self, cmd: Cmd, names: &[&str], open: bool) -> Result<()> {
        self.raw_typed(cmd, "contact", names, Some(value::encode_contact(open)))
    }

    pub fn shutter(&self, cmd: Cmd, names: &[&str], v: value::ShutterCmd) -> Result<()> {
        self.raw_typed(cmd, "shutter", names, Some(value::encode_shutter(v)))
    }

    pub fn dimmer(&self, cmd: Cmd, names: &[&str], level: u8) -> Result<()> {
        self.raw_typed(cmd, "dimmer", names, Some(&value::encode_dimmer(level)))
    }

    pub fn int(&self, cmd: Cmd, names: &[&str], v: i64) -> Result<()> {
        self.raw_typed(cmd, "int", names, Some(&value::encode_int(v)))
    }

    pub fn counter(&self, cmd: Cmd, names: &[&str], v: i64) -> Result<()> {
        self.raw_typed(cmd, "counter", names, Some(&value::encode_counter(v)))
    }

    pub fn float(&self, cmd: Cmd, names: &[&str], v: f32) -> Result<()> {
        self.raw_typed(cmd, "float", names, Some(&value::encode_float(v)))
    }

    pub fn temp(&self, cmd: Cmd, names: &[&str], v: f32) -> Result<()> {
        self.raw_typed(cmd, "temp", names, Some(&value::encode_temp(v)))
    }

    pub fn humidity(&self, cmd: Cmd, names: &[&str], v: f32) -> Result<()> {
        self.raw_typed(cmd, "humidity", names, Some(&value::encode_humidity(v)))
    }

    pub fn pressure(&self, cmd: Cmd, names: &[&str], v: f32) -> Result<()> {
        self.raw_typed(cmd, "pressure", names, Some(&value::encode_pressure(v)))
    }

    pub fn number(&self, cmd: Cmd, names: &[&str], min: f32, max: f32, step: f32) -> Result<()> {
        self.raw_typed(cmd, "number", names, Some(&value::encode_number(min, max, step)))
    }

    pub fn string(&self, cmd: Cmd, names: &[&str], v: &str) -> Result<()> {
        self.raw_typed(cmd, "string", names, Some(&value::encode_string(v)))
    }

    pub fn bin(&self, cmd: Cmd, names: &[&str], bytes: &[u8]) -> Result<()> {
        self.raw_typed(cmd, "bin", names, Some(&value::encode_bin(bytes)))
    }

    // ---- reception ---------------------------------------------------

    pub fn handle_events(&self, cb: Box<PublishCallback>) {
        *self.on_publish.lock().unwrap() = Some(cb);
    }

    pub fn handle_events_raw(&self, cb: Box<RawCallback>) {
        *self.on_raw.lock().unwrap() = Some(cb);
    }

    /// Feed one inbound buffer, as delivered by the transport's receive
    /// path, into the engine.
    pub fn on_receive(&self, bytes: &[u8], reply_token: ReplyToken) {
        let recognition = parser::recognize(bytes);
        log::trace!("received {} bytes on token {reply_token}: {recognition:?}", bytes.len());
        match recognition {
            parser::Recognition::Ack => self.on_ack(reply_token),
            parser::Recognition::Raw => self.on_raw_frame(bytes, reply_token),
            Recognition::Protocol => self.on_protocol_frame(bytes, reply_token),
        }
    }

    fn on_ack(&self, reply_token: ReplyToken) {
        let Some(slot) = self.retry_cache.find(reply_token) else {
            return;
        };
        let Some((expire_ts, timeout_ms)) = self.retry_cache.entry_timing(slot) else {
            return;
        };
        self.retry_cache.mark_acked(slot);

        let now = self.clock.now_ms();
        let sent_at = expire_ts.saturating_sub(timeout_ms as u64);
        let elapsed = now.saturating_sub(sent_at);
        log::trace!("ack matched slot {slot} (reply {reply_token}), rtt {elapsed}ms");
        self.telemetry.lock().unwrap().on_rtt_sample(elapsed);
    }

    fn on_raw_frame(&self, bytes: &[u8], reply_token: ReplyToken) {
        let mode = self.config.lock().unwrap().op_mode;
        if mode.policy_for(false, reply_token != 0).raw_passthrough {
            if let Some(cb) = self.on_raw.lock().unwrap().as_ref() {
                cb(bytes, reply_token, 0);
            }
        }
    }

    fn on_protocol_frame(&self, bytes: &[u8], reply_token: ReplyToken) {
        let mut template = self.recv_template.lock().unwrap();
        let frame = parser::parse_frame(bytes, &mut template);
        drop(template);

        let new_msg = matches!(self.seen_ids.lock().unwrap().observe(frame.msgid), Observed::New);
        if !new_msg {
            log::trace!(
                "duplicate msgid {:?} from {}, suppressing publish dispatch",
                frame.msgid, frame.src_node
            );
        }
        let mode = self.config.lock().unwrap().op_mode;
        let frame_targets_self = parser::targets_self(&frame.records, &self.device_name);

        for record in &frame.records {
            let record_targets_self = self_prefixed(&record.topic, &self.device_name);
            let policy = mode.policy_for(record_targets_self, reply_token != 0);

            let value = record.value.clone().unwrap_or_default();
            *self.current.lock().unwrap() = Some((record.topic.clone(), value.clone()));

            if new_msg && policy.dispatch {
                if let Some(cb) = self.on_publish.lock().unwrap().as_ref() {
                    cb(&frame.src_node, &frame.msgid, record.cmd.as_char(), &record.topic, &value);
                }
            }

            *self.current.lock().unwrap() = None;
        }

        let ack_policy = mode.policy_for(frame_targets_self, reply_token != 0);
        if reply_token != 0 && ack_policy.send_ack {
            let ttl = self.config.lock().unwrap().ttl;
            self.transport.send_reply(Formatter::format_ack().as_slice(), ttl, reply_token);
            self.telemetry.lock().unwrap().ack_pkt += 1;
        }
    }

    // ---- reception: typed `_if*` helpers -----------------------------

    /// Whether the currently-dispatching record's topic matches
    /// `<gw>/<type>/<name>/{set,value}` for the requested `if_type`, and if
    /// so, the record's raw wire value.
    fn stash_matches(&self, if_type: IfType, type_: &str, name: &str) -> Option<String> {
        let current = self.current.lock().unwrap();
        let (topic, value) = current.as_ref()?;

        let candidates: &[&str] = match if_type {
            IfType::Set => &["set"],
            IfType::Value => &["value"],
            IfType::Either => &["set", "value"],
        };
        let matches = candidates
            .iter()
            .any(|suffix| *topic == format!("{MESH_GW_NAME}/{type_}/{name}/{suffix}"));

        if matches {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn if_switch(&self, if_type: IfType, name: &str, cb: impl FnOnce(bool)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "switch", name) else {
            return false;
        };
        match value::decode_switch(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_trigger(&self, if_type: IfType, name: &str, cb: impl FnOnce()) -> bool {
        let Some(raw) = self.stash_matches(if_type, "trigger", name) else {
            return false;
        };
        if value::decode_trigger(&raw) {
            cb();
            true
        } else {
            false
        }
    }

    pub fn if_contact(&self, if_type: IfType, name: &str, cb: impl FnOnce(bool)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "contact", name) else {
            return false;
        };
        match value::decode_contact(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    /// Each wire value maps to its own `ShutterCmd` variant: `open`,
    /// `close`, and `stop` are distinguished rather than collapsed.
    pub fn if_shutter(&self, if_type: IfType, name: &str, cb: impl FnOnce(value::ShutterCmd)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "shutter", name) else {
            return false;
        };
        match value::decode_shutter(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_dimmer(&self, if_type: IfType, name: &str, cb: impl FnOnce(u8)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "dimmer", name) else {
            return false;
        };
        match value::decode_dimmer(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_int(&self, if_type: IfType, name: &str, cb: impl FnOnce(i64)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "int", name) else {
            return false;
        };
        match value::decode_int(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_counter(&self, if_type: IfType, name: &str, cb: impl FnOnce(i64)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "counter", name) else {
            return false;
        };
        match value::decode_counter(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    /// Returns `bool` = "did the topic match", consistent with every other
    /// `if_*` helper's contract; the parsed float always goes to the
    /// callback, never coerced into the return value.
    pub fn if_temp(&self, if_type: IfType, name: &str, cb: impl FnOnce(f32)) -> bool {
        self.if_float_like(if_type, "temp", name, cb)
    }

    pub fn if_humidity(&self, if_type: IfType, name: &str, cb: impl FnOnce(f32)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "humidity", name) else {
            return false;
        };
        match value::decode_humidity(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_pressure(&self, if_type: IfType, name: &str, cb: impl FnOnce(f32)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "pressure", name) else {
            return false;
        };
        match value::decode_pressure(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_float(&self, if_type: IfType, name: &str, cb: impl FnOnce(f32)) -> bool {
        self.if_float_like(if_type, "float", name, cb)
    }

    fn if_float_like(&self, if_type: IfType, type_: &str, name: &str, cb: impl FnOnce(f32)) -> bool {
        let Some(raw) = self.stash_matches(if_type, type_, name) else {
            return false;
        };
        match value::decode_float(&raw) {
            Some(v) => {
                cb(v);
                true
            }
            None => false,
        }
    }

    pub fn if_number(&self, if_type: IfType, name: &str, cb: impl FnOnce(f32, f32, f32)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "number", name) else {
            return false;
        };
        match value::decode_number(&raw) {
            Some((min, max, step)) => {
                cb(min, max, step);
                true
            }
            None => false,
        }
    }

    pub fn if_string(&self, if_type: IfType, name: &str, cb: impl FnOnce(String)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "string", name) else {
            return false;
        };
        cb(value::decode_string(&raw));
        true
    }

    pub fn if_bin(&self, if_type: IfType, name: &str, cb: impl FnOnce(Vec<u8>)) -> bool {
        let Some(raw) = self.stash_matches(if_type, "bin", name) else {
            return false;
        };
        match value::decode_bin(&raw) {
            Ok(v) => {
                cb(v);
                true
            }
            Err(_) => false,
        }
    }

    // ---- driver --------------------------------------------------------

    /// Drive the retry cache for one tick. Must be invoked at a cadence
    /// shorter than `timeout_ms`. Returns the first message that exhausted
    /// its retries this tick, if any.
    pub fn tick(&self) -> Option<LostRecord> {
        let now = self.clock.now_ms();
        let cfg = self.config.lock().unwrap().clone();
        let rng = &self.rng;
        let transport = &self.transport;

        let outcome = self.retry_cache.tick(
            now,
            rng,
            |payload, ttl| transport.broadcast_and_expect_reply(payload, ttl),
            |token| transport.send_reply(Formatter::format_ack().as_slice(), cfg.ttl, token),
        );

        if outcome.resent > 0 {
            log::debug!("tick resent {} outbound frame(s)", outcome.resent);
            self.telemetry.lock().unwrap().resend_pkt += outcome.resent as u64;
        }
        if let Some(lost) = &outcome.lost {
            log::warn!("message {:?} exhausted retries, surfacing as lost", lost.message_id);
        }
        outcome.lost
    }
}

fn self_prefixed(topic: &str, device_name: &str) -> bool {
    topic.strip_prefix(device_name).and_then(|rest| rest.strip_prefix('/')).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::{ManualClock, ZeroRng};
    use crate::mode::OpMode;
    use crate::transport::loopback::LoopbackTransport;
    use std::sync::{Arc, Mutex as StdMutex};

    fn engine(device: &str, try_count: u16) -> ProtocolEngine<LoopbackTransport, ManualClock, ZeroRng> {
        let config = Config::builder(1, device).try_count(try_count).timeout_ms(100).build();
        ProtocolEngine::new(config, LoopbackTransport::new(), ManualClock::new(0), ZeroRng).unwrap()
    }

    #[test]
    fn empty_device_name_is_rejected_at_construction() {
        let config = Config::builder(1, "").build();
        assert_eq!(
            ProtocolEngine::new(config, LoopbackTransport::new(), ManualClock::new(0), ZeroRng).err(),
            Some(MeshMqttError::InvalidDeviceName)
        );
    }

    #[test]
    fn simple_publish_then_ack_frees_entry_and_samples_rtt() {
        let e = engine("self", 7);
        e.publish("m/switch/k1", "/value", "on").unwrap();
        assert_eq!(e.retry_cache.live_count(), 1);

        let token = e.transport.sent_frames()[0].reply_token;
        e.clock.advance(15);
        e.on_receive(b"ACK", token);

        assert_eq!(e.telemetry().ack_pkt, 0); // ack_pkt counts ACKs *sent*, not received
        assert_eq!(e.telemetry().rtt_min, Some(15));
        assert_eq!(e.telemetry().rtt_max, Some(15));

        // swept on next tick
        e.tick();
        assert_eq!(e.retry_cache.live_count(), 0);
    }

    #[test]
    fn retry_then_success_counts_one_resend() {
        let e = engine("self", 7);
        e.publish("m/switch/k1", "/value", "on").unwrap();

        // first attempt times out, tick resends
        e.clock.advance(200);
        e.tick();
        assert_eq!(e.telemetry().resend_pkt, 1);
        assert_eq!(e.transport.frame_count(), 2);

        let second_token = e.transport.sent_frames()[1].reply_token;
        e.on_receive(b"ACK", second_token);
        e.tick();
        assert_eq!(e.retry_cache.live_count(), 0);
    }

    #[test]
    fn exhaustion_emits_exactly_one_lost_notification() {
        let e = engine("self", 2);
        e.publish("m/switch/k1", "/value", "on").unwrap();

        let mut lost = None;
        for _ in 0..5 {
            e.clock.advance(1000);
            if let Some(l) = e.tick() {
                lost = Some(l);
            }
        }
        assert!(lost.is_some());
        assert_eq!(e.retry_cache.live_count(), 0);
        // two broadcasts total: the original send plus one resend (try_count=2)
        assert_eq!(e.transport.frame_count(), 2);
    }

    #[test]
    fn duplicate_frame_dispatches_publish_callback_once() {
        let e = engine("gw", 7);
        let count = Arc::new(StdMutex::new(0));
        let count2 = count.clone();
        e.handle_events(Box::new(move |_src, _id, _cmd, _topic, _value| {
            *count2.lock().unwrap() += 1;
        }));

        let frame = b"MQTT sender/ABCD\nP:gw/switch/k1/value on\n";
        e.on_receive(frame, 0);
        e.on_receive(frame, 0);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn gateway_ack_all_passes_raw_payload_without_publish_dispatch() {
        let e = engine("gw", 7);
        e.set_op_mode(OpMode::GwAckAll);

        let publish_count = Arc::new(StdMutex::new(0));
        let pc = publish_count.clone();
        e.handle_events(Box::new(move |_, _, _, _, _| {
            *pc.lock().unwrap() += 1;
        }));

        let raw_seen = Arc::new(StdMutex::new(None));
        let rs = raw_seen.clone();
        e.handle_events_raw(Box::new(move |bytes, token, elapsed| {
            *rs.lock().unwrap() = Some((bytes.to_vec(), token, elapsed));
        }));

        e.on_receive(b"\x01\x02not-a-protocol-frame", 7);

        assert_eq!(*publish_count.lock().unwrap(), 0);
        let seen = raw_seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.1, 7);
        assert_eq!(seen.2, 0);
    }

    #[test]
    fn node_std_only_dispatches_frames_targeting_self() {
        let e = engine("kitchen", 7);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        e.handle_events(Box::new(move |_, _, _, topic, _| {
            s.lock().unwrap().push(topic.to_string());
        }));

        let frame = b"MQTT other/WXYZ\nP:bedroom/switch/k1/value on\n";
        e.on_receive(frame, 0);
        assert!(seen.lock().unwrap().is_empty());

        let frame2 = b"MQTT other/AAAA\nP:kitchen/switch/k1/value on\n";
        e.on_receive(frame2, 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn ack_is_sent_once_per_frame_targeting_self_not_once_per_record() {
        let e = engine("kitchen", 7);
        let frame = b"MQTT other/AAAA\nP:kitchen/switch/a/value on\nP:kitchen/switch/b/value off\n";
        e.on_receive(frame, 99);
        assert_eq!(e.transport.sent_replies().len(), 1);
        assert_eq!(e.telemetry().ack_pkt, 1);
    }

    #[test]
    fn if_switch_reads_the_stashed_record_from_inside_the_publish_callback() {
        let e = Arc::new(engine("gw", 7));
        let captured = Arc::new(StdMutex::new(None));
        let cap = captured.clone();
        let eng = e.clone();
        e.handle_events(Box::new(move |_, _, _, _, _| {
            eng.if_switch(IfType::Value, "k1", |v| {
                *cap.lock().unwrap() = Some(v);
            });
        }));

        let frame = b"MQTT other/AAAA\nP:gw/switch/k1/value on\n";
        e.on_receive(frame, 0);
        assert_eq!(*captured.lock().unwrap(), Some(true));
    }

    #[test]
    fn if_shutter_maps_each_value_to_its_own_variant() {
        let e = Arc::new(engine("gw", 7));
        let captured: Arc<StdMutex<Vec<value::ShutterCmd>>> = Arc::new(StdMutex::new(Vec::new()));
        let cap = captured.clone();
        let eng = e.clone();
        e.handle_events(Box::new(move |_, _, _, _, _| {
            eng.if_shutter(IfType::Value, "s1", |v| cap.lock().unwrap().push(v));
        }));

        for (wire, expected) in [
            ("open", value::ShutterCmd::Open),
            ("close", value::ShutterCmd::Close),
            ("stop", value::ShutterCmd::Stop),
        ] {
            let frame = format!("MQTT other/AAAA\nP:gw/shutter/s1/value {wire}\n");
            e.on_receive(frame.as_bytes(), 0);
            assert_eq!(*captured.lock().unwrap().last().unwrap(), expected);
        }
    }

    #[test]
    fn if_trigger_ignores_a_record_whose_value_is_not_the_trigger_literal() {
        let e = Arc::new(engine("gw", 7));
        let fired = Arc::new(StdMutex::new(0));
        let f = fired.clone();
        let eng = e.clone();
        e.handle_events(Box::new(move |_, _, _, _, _| {
            eng.if_trigger(IfType::Value, "button", || *f.lock().unwrap() += 1);
        }));

        // tampered/foreign payload: topic matches but the value isn't "triggered"
        let frame = b"MQTT other/AAAA\nP:gw/trigger/button/value bogus\n";
        e.on_receive(frame, 0);
        assert_eq!(*fired.lock().unwrap(), 0);

        let frame = b"MQTT other/AAAA\nP:gw/trigger/button/value triggered\n";
        e.on_receive(frame, 0);
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn empty_name_list_is_rejected() {
        let e = engine("gw", 7);
        assert_eq!(e.switch(Cmd::Publish, &[], true), Err(MeshMqttError::EmptyNameList));
    }

    #[test]
    fn batched_typed_publish_reaches_the_gateway_namespace() {
        let e = engine("kitchen", 7);
        e.switch(Cmd::Publish, &["a", "b"], true).unwrap();
        let sent = e.transport.sent_frames();
        let text = String::from_utf8(sent[0].bytes.clone()).unwrap();
        assert!(text.contains("P:m/switch/a/value on\n"));
    }

    #[test]
    fn oversized_topic_is_rejected_before_it_reaches_the_formatter() {
        let e = engine("kitchen", 7);
        let long_param = "/".to_string() + &"x".repeat(parser::MAX_TOPIC_LEN);
        assert_eq!(
            e.publish("kitchen", &long_param, "on"),
            Err(MeshMqttError::TopicTooLong {
                len: "kitchen".len() + long_param.len(),
                max: parser::MAX_TOPIC_LEN,
            })
        );
        assert_eq!(e.transport.frame_count(), 0);

        let long_name = "y".repeat(parser::MAX_TOPIC_LEN);
        assert!(matches!(
            e.switch(Cmd::Publish, &[&long_name], true),
            Err(MeshMqttError::TopicTooLong { .. })
        ));
        assert_eq!(e.transport.frame_count(), 0);
    }
}
