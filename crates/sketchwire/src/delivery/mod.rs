// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Causal delivery engine.
//!
//! Each peer maintains one local, monotonically advancing chain: the n-th
//! message it originates requires the unique id of its (n-1)-th. The chain
//! only orders one peer's own emissions; emissions from different peers stay
//! unordered with respect to each other. Incoming drawing messages are gated
//! on their declared predecessor: applied when it is already in the history,
//! deferred to the pending buffer otherwise, and recovered via multicast
//! `PacketRequest`s when a deferral persists.
//!
//! The id generator is explicit per-engine state. There is no process-wide
//! chain pointer, so engines are testable in isolation and two engines can
//! coexist in one process.

pub mod loss;
pub mod replay;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::{RECOVERY_DELAY, RECOVERY_INTERVAL};
use crate::protocol::{Body, Message, MessageId};

/// Per-engine id source: fixed origin nonce plus an atomic sequence.
pub struct IdGenerator {
    origin: u32,
    seq: AtomicU32,
}

impl IdGenerator {
    /// Generator with a random origin nonce.
    pub fn new() -> Self {
        Self::with_origin(fastrand::u32(1..))
    }

    /// Generator with a fixed origin nonce (deterministic tests).
    pub fn with_origin(origin: u32) -> Self {
        Self {
            origin,
            seq: AtomicU32::new(0),
        }
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Fresh token; sequences start at 1.
    pub fn next(&self) -> MessageId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        MessageId::compose(self.origin, seq)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of gating one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Predecessor satisfied (or none declared); recorded and applicable.
    Apply,
    /// Predecessor unknown; buffered until it arrives.
    Defer,
    /// Unique id already delivered; multicast recovery can be answered by
    /// several peers, so redelivery is expected and ignored.
    Duplicate,
}

struct Pending {
    msg: Message,
    deferred_at: Instant,
    last_request: Option<Instant>,
}

/// Stamps local emissions, gates remote ones, and keeps the session
/// history used for recovery and replay.
pub struct DeliveryEngine {
    ids: IdGenerator,
    /// Unique id of this peer's previous emission; one critical section
    /// guards stamp ordering under concurrent local writes.
    chain: Mutex<Option<MessageId>>,
    /// Messages delivered this session, by unique id. Append-only; grows
    /// for the process lifetime (eviction is out of scope).
    history: DashMap<MessageId, Message>,
    pending: Mutex<Vec<Pending>>,
    recovery_delay: Duration,
    recovery_interval: Duration,
}

impl DeliveryEngine {
    pub fn new() -> Self {
        Self::with_ids(IdGenerator::new())
    }

    pub fn with_ids(ids: IdGenerator) -> Self {
        Self {
            ids,
            chain: Mutex::new(None),
            history: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            recovery_delay: RECOVERY_DELAY,
            recovery_interval: RECOVERY_INTERVAL,
        }
    }

    /// Override recovery pacing (tests use zero to request immediately).
    pub fn with_recovery_timing(mut self, delay: Duration, interval: Duration) -> Self {
        self.recovery_delay = delay;
        self.recovery_interval = interval;
        self
    }

    pub fn origin(&self) -> u32 {
        self.ids.origin()
    }

    /// Stamp a locally-originated message: fresh unique id, required id
    /// chained to the previous local emission, recorded in the history so
    /// recovery requests and replay can serve it.
    pub fn stamp(&self, body: Body) -> Message {
        let mut chain = self.chain.lock();
        let unique = self.ids.next();
        let msg = Message {
            unique_id: Some(unique),
            required_id: *chain,
            body,
        };
        self.history.insert(unique, msg.clone());
        *chain = Some(unique);
        msg
    }

    /// Unique id of the last local emission, if any.
    pub fn last_emitted(&self) -> Option<MessageId> {
        *self.chain.lock()
    }

    /// Gate one received message on its declared predecessor.
    pub fn receive(&self, msg: Message) -> Verdict {
        let Some(unique) = msg.unique_id else {
            // Unstamped drawing messages cannot be chained or replayed;
            // apply as-is.
            return Verdict::Apply;
        };
        if self.history.contains_key(&unique) {
            return Verdict::Duplicate;
        }
        match msg.required_id {
            Some(required) if !self.history.contains_key(&required) => {
                let mut pending = self.pending.lock();
                if pending.iter().any(|p| p.msg.unique_id == Some(unique)) {
                    return Verdict::Duplicate;
                }
                log::debug!("[GATE] defer {} (requires {})", unique, required);
                pending.push(Pending {
                    msg,
                    deferred_at: Instant::now(),
                    last_request: None,
                });
                Verdict::Defer
            }
            _ => {
                self.history.insert(unique, msg);
                Verdict::Apply
            }
        }
    }

    /// Promote buffered messages whose predecessor is now satisfied.
    ///
    /// Cascading: each promotion is recorded before the next scan, so one
    /// resolved dependency can unblock a whole chain. Returns promoted
    /// messages in application order.
    pub fn drain_pending(&self) -> Vec<Message> {
        let mut promoted = Vec::new();
        let mut pending = self.pending.lock();
        loop {
            let mut advanced = false;
            let mut i = 0;
            while i < pending.len() {
                let satisfied = match pending[i].msg.required_id {
                    Some(required) => self.history.contains_key(&required),
                    None => true,
                };
                if satisfied {
                    let entry = pending.swap_remove(i);
                    if let Some(unique) = entry.msg.unique_id {
                        self.history.insert(unique, entry.msg.clone());
                        log::debug!("[GATE] promote {}", unique);
                    }
                    promoted.push(entry.msg);
                    advanced = true;
                } else {
                    i += 1;
                }
            }
            if !advanced {
                break;
            }
        }
        promoted
    }

    /// Missing ids whose recovery request is due: deferred longer than the
    /// recovery delay and not re-requested within the recovery interval.
    /// At most one id per still-blocked entry per call.
    pub fn overdue(&self) -> Vec<MessageId> {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut pending = self.pending.lock();
        for entry in pending.iter_mut() {
            let Some(required) = entry.msg.required_id else {
                continue;
            };
            if now.duration_since(entry.deferred_at) < self.recovery_delay {
                continue;
            }
            if let Some(last) = entry.last_request {
                if now.duration_since(last) < self.recovery_interval {
                    continue;
                }
            }
            entry.last_request = Some(now);
            if !due.contains(&required) {
                due.push(required);
            }
        }
        due
    }

    /// Stored message by unique id, for answering `PacketRequest`s.
    pub fn lookup(&self, id: MessageId) -> Option<Message> {
        self.history.get(&id).map(|m| m.clone())
    }

    /// Ids referenced as predecessors (by stored or buffered messages) but
    /// absent from the history. These are the only losses recoverable by
    /// name; replay stall recovery requests exactly this set.
    pub fn missing_predecessors(&self) -> Vec<MessageId> {
        let mut missing = Vec::new();
        let mut note = |required: Option<MessageId>| {
            if let Some(id) = required {
                if !self.history.contains_key(&id) && !missing.contains(&id) {
                    missing.push(id);
                }
            }
        };
        for entry in self.history.iter() {
            note(entry.value().required_id);
        }
        for entry in self.pending.lock().iter() {
            note(entry.msg.required_id);
        }
        missing
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Copy of the stored history (replay, convergence checks).
    pub fn history_snapshot(&self) -> Vec<Message> {
        self.history.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for DeliveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Color, DrawOp, Point};

    fn line(x: u16) -> Body {
        Body::Draw(DrawOp::Line {
            start: Point::new(x, 0),
            end: Point::new(x, 10),
            color: Color::BLACK,
            weight: 1,
        })
    }

    fn instant_recovery() -> DeliveryEngine {
        DeliveryEngine::with_ids(IdGenerator::with_origin(0xAA))
            .with_recovery_timing(Duration::ZERO, Duration::from_secs(3600))
    }

    #[test]
    fn test_stamp_chains_ids() {
        let engine = DeliveryEngine::with_ids(IdGenerator::with_origin(7));
        let a = engine.stamp(line(1));
        let b = engine.stamp(line(2));
        assert_eq!(a.required_id, None);
        assert_eq!(b.required_id, a.unique_id);
        assert_eq!(engine.last_emitted(), b.unique_id);
        assert_eq!(engine.history_len(), 2);
    }

    #[test]
    fn test_gating_defers_until_predecessor_arrives() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(1));
        let a = origin.stamp(line(1));
        let b = origin.stamp(line(2));

        let sink = instant_recovery();
        // B first: deferred.
        assert_eq!(sink.receive(b.clone()), Verdict::Defer);
        assert!(sink.drain_pending().is_empty());
        // A arrives: applied, then the drain promotes B.
        assert_eq!(sink.receive(a.clone()), Verdict::Apply);
        let promoted = sink.drain_pending();
        assert_eq!(promoted, vec![b]);
        assert_eq!(sink.pending_len(), 0);
    }

    #[test]
    fn test_drain_cascades_through_chain() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(2));
        let a = origin.stamp(line(1));
        let b = origin.stamp(line(2));
        let c = origin.stamp(line(3));

        let sink = instant_recovery();
        assert_eq!(sink.receive(c.clone()), Verdict::Defer);
        assert_eq!(sink.receive(b.clone()), Verdict::Defer);
        assert_eq!(sink.receive(a), Verdict::Apply);
        // One drain resolves the whole chain, in order.
        let promoted = sink.drain_pending();
        assert_eq!(promoted, vec![b, c]);
    }

    #[test]
    fn test_duplicate_suppression() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(3));
        let a = origin.stamp(line(1));
        let b = origin.stamp(line(2));

        let sink = instant_recovery();
        assert_eq!(sink.receive(a.clone()), Verdict::Apply);
        assert_eq!(sink.receive(a), Verdict::Duplicate);
        assert_eq!(sink.receive(b.clone()), Verdict::Apply);
        assert_eq!(sink.receive(b), Verdict::Duplicate);
    }

    #[test]
    fn test_deferred_duplicate_not_buffered_twice() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(4));
        let _a = origin.stamp(line(1));
        let b = origin.stamp(line(2));

        let sink = instant_recovery();
        assert_eq!(sink.receive(b.clone()), Verdict::Defer);
        assert_eq!(sink.receive(b), Verdict::Duplicate);
        assert_eq!(sink.pending_len(), 1);
    }

    #[test]
    fn test_overdue_reports_once_per_interval() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(5));
        let a = origin.stamp(line(1));
        let b = origin.stamp(line(2));

        let sink = instant_recovery();
        sink.receive(b);
        let due = sink.overdue();
        assert_eq!(due, vec![a.unique_id.expect("stamped")]);
        // Within the interval, no re-request.
        assert!(sink.overdue().is_empty());
    }

    #[test]
    fn test_missing_predecessors_names_the_hole() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(6));
        let a = origin.stamp(line(1));
        let b = origin.stamp(line(2));
        let c = origin.stamp(line(3));

        let sink = instant_recovery();
        sink.receive(a.clone());
        sink.receive(c.clone()); // b lost
        assert_eq!(
            sink.missing_predecessors(),
            vec![b.unique_id.expect("stamped")]
        );
        sink.receive(b);
        sink.drain_pending();
        assert!(sink.missing_predecessors().is_empty());
    }
}
