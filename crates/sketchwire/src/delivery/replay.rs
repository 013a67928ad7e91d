// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Paced history replay.
//!
//! Replays the stored session history onto a fresh canvas at a fixed tick,
//! respecting causal order. On each tick one message is applied: preferably
//! the successor of the last-applied message, otherwise any stored message
//! whose predecessor has already been applied (or that has none). When no
//! message is applicable the replay is stalled on a hole in the history; the
//! stall hook receives the missing ids so the caller can multicast recovery
//! requests, and the tick retries until the hole fills or the replay is
//! cancelled.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::DeliveryEngine;
use crate::protocol::{Message, MessageId};

/// Pick the next applicable message from `snapshot`.
fn next_candidate(
    snapshot: &[Message],
    last: Option<MessageId>,
    applied: &HashSet<MessageId>,
) -> Option<Message> {
    let mut fallback = None;
    for msg in snapshot {
        let Some(unique) = msg.unique_id else {
            continue;
        };
        if applied.contains(&unique) {
            continue;
        }
        match msg.required_id {
            // Direct successor of the last-applied message wins.
            required if required == last && last.is_some() => return Some(msg.clone()),
            None => fallback = fallback.or_else(|| Some(msg.clone())),
            Some(required) if applied.contains(&required) => {
                fallback = fallback.or_else(|| Some(msg.clone()));
            }
            _ => {}
        }
    }
    fallback
}

/// Handle to a running replay thread. Dropping the handle cancels the
/// replay and joins the thread.
pub struct ReplayController {
    cancel: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReplayController {
    /// Start a replay over the engine's current and future history.
    ///
    /// `apply` is invoked once per replayed message, in causal order.
    /// `on_stall` is invoked with the ids blocking progress whenever a
    /// tick finds no applicable message. The replay finishes when every
    /// stored message has been applied.
    pub fn spawn<F, G>(
        engine: Arc<DeliveryEngine>,
        tick: Duration,
        mut apply: F,
        mut on_stall: G,
    ) -> Self
    where
        F: FnMut(&Message) + Send + 'static,
        G: FnMut(&[MessageId]) + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("sw-replay".into())
            .spawn(move || {
                let mut applied: HashSet<MessageId> = HashSet::new();
                let mut last: Option<MessageId> = None;
                log::info!("[REPLAY] starting, {} stored messages", engine.history_len());
                while !flag.load(Ordering::Relaxed) {
                    // Snapshot each tick: recovery may fill holes mid-replay.
                    let snapshot = engine.history_snapshot();
                    let candidate = if applied.len() < snapshot.len() {
                        next_candidate(&snapshot, last, &applied)
                    } else if engine.pending_len() == 0 {
                        // Every stored message applied, nothing deferred.
                        break;
                    } else {
                        // Stored history exhausted but deferrals remain:
                        // the replay is blocked on lost messages.
                        None
                    };
                    match candidate {
                        Some(msg) => {
                            let unique = msg.unique_id;
                            apply(&msg);
                            if let Some(id) = unique {
                                applied.insert(id);
                                last = Some(id);
                            }
                        }
                        None => {
                            let missing = engine.missing_predecessors();
                            if missing.is_empty() {
                                // Nothing applicable and nothing recoverable.
                                log::warn!(
                                    "[REPLAY] stalled with no recoverable ids, stopping"
                                );
                                break;
                            }
                            log::debug!("[REPLAY] stalled on {} missing ids", missing.len());
                            on_stall(&missing);
                        }
                    }
                    if !tick.is_zero() {
                        thread::sleep(tick);
                    }
                }
                log::info!("[REPLAY] finished, {} messages applied", applied.len());
            });
        // Builder::spawn only fails on thread creation; surface it as a
        // controller that is already finished.
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                log::error!("[REPLAY] failed to start replay thread: {}", e);
                None
            }
        };
        Self { cancel, handle }
    }

    /// Cancel the replay and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Block until the replay finishes on its own.
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |h| h.is_finished())
    }
}

impl Drop for ReplayController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::IdGenerator;
    use crate::protocol::{Body, Color, DrawOp, Point};
    use parking_lot::Mutex;

    fn line(x: u16) -> Body {
        Body::Draw(DrawOp::Line {
            start: Point::new(x, 0),
            end: Point::new(x, 10),
            color: Color::BLACK,
            weight: 1,
        })
    }

    #[test]
    fn test_replay_applies_in_causal_order() {
        let engine = Arc::new(DeliveryEngine::with_ids(IdGenerator::with_origin(9)));
        let a = engine.stamp(line(1));
        let b = engine.stamp(line(2));
        let c = engine.stamp(line(3));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut replay = ReplayController::spawn(
            Arc::clone(&engine),
            Duration::ZERO,
            move |msg: &Message| sink.lock().push(msg.unique_id),
            |_missing: &[MessageId]| {},
        );
        replay.wait();

        let order = seen.lock().clone();
        assert_eq!(order, vec![a.unique_id, b.unique_id, c.unique_id]);
    }

    #[test]
    fn test_replay_crosses_origins() {
        // Two interleaved chains: each must replay in its own order, and the
        // replay must not stall when one chain ends.
        let left = DeliveryEngine::with_ids(IdGenerator::with_origin(1));
        let right = DeliveryEngine::with_ids(IdGenerator::with_origin(2));
        let l1 = left.stamp(line(1));
        let l2 = left.stamp(line(2));
        let r1 = right.stamp(line(3));

        let engine = Arc::new(DeliveryEngine::with_ids(IdGenerator::with_origin(3)));
        for msg in [l1.clone(), l2.clone(), r1.clone()] {
            engine.receive(msg);
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut replay = ReplayController::spawn(
            Arc::clone(&engine),
            Duration::ZERO,
            move |msg: &Message| sink.lock().push(msg.unique_id),
            |_: &[MessageId]| {},
        );
        replay.wait();

        let order = seen.lock().clone();
        assert_eq!(order.len(), 3);
        let pos = |id: Option<MessageId>| order.iter().position(|x| *x == id).expect("applied");
        assert!(pos(l1.unique_id) < pos(l2.unique_id));
    }

    #[test]
    fn test_stall_reports_missing_and_resumes_after_recovery() {
        let origin = DeliveryEngine::with_ids(IdGenerator::with_origin(4));
        let a = origin.stamp(line(1));
        let b = origin.stamp(line(2));
        let c = origin.stamp(line(3));

        let engine = Arc::new(
            DeliveryEngine::with_ids(IdGenerator::with_origin(5))
                .with_recovery_timing(Duration::ZERO, Duration::from_secs(3600)),
        );
        engine.receive(a.clone());
        engine.receive(c.clone()); // b lost, c deferred

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let stalls = Arc::new(Mutex::new(Vec::new()));
        let stall_sink = Arc::clone(&stalls);
        // Recovery hook: feed the missing message back in, as a peer
        // answering the request would.
        let recovery = Arc::clone(&engine);
        let lost = b.clone();
        let mut replay = ReplayController::spawn(
            Arc::clone(&engine),
            Duration::ZERO,
            move |msg: &Message| sink.lock().push(msg.unique_id),
            move |missing: &[MessageId]| {
                stall_sink.lock().extend_from_slice(missing);
                recovery.receive(lost.clone());
                recovery.drain_pending();
            },
        );
        replay.wait();

        assert!(stalls.lock().contains(&b.unique_id.expect("stamped")));
        let order = seen.lock().clone();
        assert_eq!(order, vec![a.unique_id, b.unique_id, c.unique_id]);
    }
}
