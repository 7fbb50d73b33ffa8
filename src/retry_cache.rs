/// Outbound retry cache
///
/// Tracks every in-flight outbound frame's payload, remaining attempts, and
/// backoff as a fixed-capacity slotted table: a plain
/// `Vec<Option<RetryEntry>>` behind a mutex, no raw pointers, slot
/// acquisition by linear scan.
use std::sync::Mutex;

use crate::clock::Rng;
use crate::errors::{MeshMqttError, Result};

/// Opaque token handed back by the transport on broadcast; `0` means "no
/// token" (used only for the locally-synthesized deferred-ACK case).
pub type ReplyToken = u32;

/// One in-flight outbound message.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub payload: Vec<u8>,
    pub size: usize,
    pub ttl: u8,
    /// Current transport reply-token. `0` means acked, swept on next tick.
    pub reply_id: ReplyToken,
    /// Token from the previous attempt, kept so a late ACK still matches.
    pub reply_id_prev: ReplyToken,
    pub timeout_ms: u32,
    pub expire_ts: u64,
    pub try_cnt: u16,
}

/// A message whose retries were exhausted without an ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostRecord {
    /// The first newline-delimited line of the payload, the user-visible
    /// identifier for the lost message.
    pub message_id: String,
}

/// What one `tick` accomplished, so the caller (the protocol engine) can
/// fold the resend count into telemetry without the cache needing to know
/// about telemetry itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub resent: usize,
    pub lost: Option<LostRecord>,
}

struct Inner {
    slots: Vec<Option<RetryEntry>>,
    bytes_in_use: usize,
    max_bytes: usize,
}

/// Fixed-capacity table of in-flight outbound messages.
pub struct RetryCache {
    inner: Mutex<Inner>,
}

impl RetryCache {
    pub fn new(max_slots: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec![None; max_slots.max(1)],
                bytes_in_use: 0,
                max_bytes,
            }),
        }
    }

    /// Insert a new in-flight entry. Fails if either the slot or byte budget
    /// would be exceeded.
    pub fn add(
        &self,
        payload: &[u8],
        ttl: u8,
        reply_id: ReplyToken,
        timeout_ms: u32,
        try_cnt: u16,
        now_ms: u64,
    ) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.bytes_in_use + payload.len() > inner.max_bytes {
            return Err(MeshMqttError::CacheFull);
        }
        let slot = inner
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(MeshMqttError::CacheFull)?;

        inner.bytes_in_use += payload.len();
        inner.slots[slot] = Some(RetryEntry {
            payload: payload.to_vec(),
            size: payload.len(),
            ttl,
            reply_id,
            reply_id_prev: 0,
            timeout_ms,
            expire_ts: now_ms + timeout_ms as u64,
            try_cnt,
        });
        Ok(slot)
    }

    /// Find the slot whose current or previous reply-token matches `token`.
    pub fn find(&self, token: ReplyToken) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().position(|slot| match slot {
            Some(e) => e.reply_id == token || e.reply_id_prev == token,
            None => false,
        })
    }

    /// Mark a slot acknowledged; it is freed on the next `tick`.
    pub fn mark_acked(&self, slot: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.slots.get_mut(slot).and_then(|s| s.as_mut()) {
            e.reply_id = 0;
        }
    }

    /// The `expire_ts` and `timeout_ms` of a slot, for telemetry's RTT
    /// calculation (`elapsed = now - (expire_ts - timeout_ms)`).
    pub fn entry_timing(&self, slot: usize) -> Option<(u64, u32)> {
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .get(slot)
            .and_then(|s| s.as_ref())
            .map(|e| (e.expire_ts, e.timeout_ms))
    }

    pub fn bytes_in_use(&self) -> usize {
        self.inner.lock().unwrap().bytes_in_use
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().slots.iter().filter(|s| s.is_some()).count()
    }

    /// Drive retries and evictions for every live slot. `resend` broadcasts
    /// `payload` with `ttl` and returns the new reply-token; `send_reply`
    /// sends a deferred ACK on `reply_id`. Only the first lost-message
    /// notification this tick is returned — every due slot is still
    /// processed.
    ///
    /// The cache mutex is never held across `resend`/`send_reply`: the due
    /// slots are decided and their bookkeeping (jitter, `expire_ts`,
    /// `try_cnt`, `reply_id_prev`) advanced under one short lock, then the
    /// transport calls run unlocked, then a second short lock writes the
    /// resulting `reply_id`s back. This keeps a slow broadcast from blocking
    /// the receive path's `find`/`mark_acked` for its duration.
    pub fn tick(
        &self,
        now_ms: u64,
        rng: &dyn Rng,
        mut resend: impl FnMut(&[u8], u8) -> ReplyToken,
        mut send_reply: impl FnMut(ReplyToken),
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let mut to_resend: Vec<(usize, Vec<u8>, u8)> = Vec::new();
        let mut to_ack: Vec<ReplyToken> = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();
            let len = inner.slots.len();
            for i in 0..len {
                let Some(entry) = inner.slots[i].as_mut() else {
                    continue;
                };

                if entry.reply_id == 0 {
                    inner.bytes_in_use -= entry.size;
                    inner.slots[i] = None;
                    continue;
                }

                if entry.expire_ts > now_ms {
                    continue;
                }

                if entry.try_cnt > 0 {
                    if entry.payload == b"ACK" {
                        to_ack.push(entry.reply_id);
                        inner.bytes_in_use -= entry.size;
                        inner.slots[i] = None;
                        continue;
                    }

                    entry.reply_id_prev = entry.reply_id;

                    let lo = entry.timeout_ms / 8;
                    let hi = (entry.timeout_ms / 4).max(lo);
                    let jitter = lo + rng.uniform(hi - lo + 1);
                    entry.timeout_ms += jitter;
                    entry.expire_ts = now_ms + entry.timeout_ms as u64;
                    entry.try_cnt -= 1;

                    to_resend.push((i, entry.payload.clone(), entry.ttl));
                } else {
                    let message_id = first_line(&entry.payload);
                    inner.bytes_in_use -= entry.size;
                    inner.slots[i] = None;
                    if outcome.lost.is_none() {
                        outcome.lost = Some(LostRecord { message_id });
                    }
                }
            }
        }

        outcome.resent = to_resend.len();

        // Transport calls run with the cache unlocked.
        for reply_id in to_ack {
            send_reply(reply_id);
        }
        let new_tokens: Vec<(usize, ReplyToken)> = to_resend
            .into_iter()
            .map(|(slot, payload, ttl)| (slot, resend(&payload, ttl)))
            .collect();

        if !new_tokens.is_empty() {
            let mut inner = self.inner.lock().unwrap();
            for (slot, token) in new_tokens {
                if let Some(entry) = inner.slots.get_mut(slot).and_then(|s| s.as_mut()) {
                    // Only adopt the new token if the slot wasn't acked (and
                    // freed to 0) while the broadcast was in flight; an ACK
                    // that raced the resend already matched on the old
                    // token via `reply_id_prev` and needs no new one.
                    if entry.reply_id != 0 {
                        entry.reply_id = token;
                    }
                }
            }
        }

        outcome
    }
}

fn first_line(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == b'\n').unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}
