/// Typed parameter value encoding/decoding
///
/// Each wire type gets a pair of free functions rather than one big enum
/// codec, keeping `ProtocolEngine`'s typed helpers thin wrappers around
/// these.
use crate::errors::{MeshMqttError, Result};

/// The three shutter commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterCmd {
    Open,
    Close,
    Stop,
}

pub fn encode_switch(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

pub fn decode_switch(s: &str) -> Option<bool> {
    match s {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub fn encode_trigger() -> &'static str {
    "triggered"
}

pub fn decode_trigger(s: &str) -> bool {
    s == "triggered"
}

pub fn encode_contact(open: bool) -> &'static str {
    if open {
        "open"
    } else {
        "closed"
    }
}

pub fn decode_contact(s: &str) -> Option<bool> {
    match s {
        "open" => Some(true),
        "closed" => Some(false),
        _ => None,
    }
}

pub fn encode_shutter(cmd: ShutterCmd) -> &'static str {
    match cmd {
        ShutterCmd::Open => "open",
        ShutterCmd::Close => "close",
        ShutterCmd::Stop => "stop",
    }
}

pub fn decode_shutter(s: &str) -> Option<ShutterCmd> {
    match s {
        "open" => Some(ShutterCmd::Open),
        "close" => Some(ShutterCmd::Close),
        "stop" => Some(ShutterCmd::Stop),
        _ => None,
    }
}

pub fn encode_dimmer(level: u8) -> String {
    level.to_string()
}

pub fn decode_dimmer(s: &str) -> Option<u8> {
    s.parse().ok()
}

pub fn encode_int(v: i64) -> String {
    v.to_string()
}

pub fn decode_int(s: &str) -> Option<i64> {
    s.parse().ok()
}

pub fn encode_counter(v: i64) -> String {
    v.to_string()
}

pub fn decode_counter(s: &str) -> Option<i64> {
    s.parse().ok()
}

/// Shortest round-tripping decimal: Rust's `f32` `Display` already produces
/// the shortest string that parses back to the same value, so no custom
/// formatting is needed.
pub fn encode_float(v: f32) -> String {
    v.to_string()
}

pub fn decode_float(s: &str) -> Option<f32> {
    s.parse().ok()
}

pub fn encode_temp(v: f32) -> String {
    encode_float(v)
}

pub fn decode_temp(s: &str) -> Option<f32> {
    decode_float(s)
}

pub fn encode_humidity(v: f32) -> String {
    encode_float(v)
}

pub fn decode_humidity(s: &str) -> Option<f32> {
    decode_float(s)
}

pub fn encode_pressure(v: f32) -> String {
    encode_float(v)
}

pub fn decode_pressure(s: &str) -> Option<f32> {
    decode_float(s)
}

pub fn encode_number(min: f32, max: f32, step: f32) -> String {
    format!("{min},{max},{step}")
}

pub fn decode_number(s: &str) -> Option<(f32, f32, f32)> {
    let mut parts = s.splitn(3, ',');
    let min = parts.next()?.parse().ok()?;
    let max = parts.next()?.parse().ok()?;
    let step = parts.next()?.parse().ok()?;
    Some((min, max, step))
}

pub fn encode_string(s: &str) -> String {
    s.to_string()
}

pub fn decode_string(s: &str) -> String {
    s.to_string()
}

pub fn encode_bin(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_bin(s: &str) -> Result<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| MeshMqttError::InvalidBinPayload)
}
