// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Inbound loss simulator for recovery testing.
//!
//! When enabled, a configurable percentage of inbound drawing messages is
//! dropped before gating, as if the datagram had been lost on the wire.
//! Control messages are never dropped; simulated loss exists to exercise
//! the recovery path, not to break discovery.

use std::sync::atomic::{AtomicU8, Ordering};

/// Probabilistic drop gate, shared across listener threads.
pub struct LossSimulator {
    /// Drop ratio in percent, 0..=100.
    ratio: AtomicU8,
}

impl LossSimulator {
    /// Simulator that drops nothing.
    pub fn new() -> Self {
        Self {
            ratio: AtomicU8::new(0),
        }
    }

    /// Set the drop ratio. Out-of-range values clamp to `[0, 100]`;
    /// returns the effective ratio.
    pub fn set_ratio(&self, percent: i32) -> u8 {
        let clamped = percent.clamp(0, 100) as u8;
        self.ratio.store(clamped, Ordering::Relaxed);
        if clamped > 0 {
            log::info!("[LOSS] dropping {}% of inbound drawing messages", clamped);
        }
        clamped
    }

    pub fn ratio(&self) -> u8 {
        self.ratio.load(Ordering::Relaxed)
    }

    /// Roll the dice for one inbound drawing message.
    pub fn should_drop(&self) -> bool {
        let ratio = self.ratio.load(Ordering::Relaxed);
        ratio > 0 && fastrand::u8(0..100) < ratio
    }
}

impl Default for LossSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_clamps() {
        let sim = LossSimulator::new();
        assert_eq!(sim.set_ratio(150), 100);
        assert_eq!(sim.ratio(), 100);
        assert_eq!(sim.set_ratio(-20), 0);
        assert_eq!(sim.ratio(), 0);
        assert_eq!(sim.set_ratio(35), 35);
    }

    #[test]
    fn test_zero_never_drops() {
        let sim = LossSimulator::new();
        for _ in 0..1000 {
            assert!(!sim.should_drop());
        }
    }

    #[test]
    fn test_hundred_always_drops() {
        let sim = LossSimulator::new();
        sim.set_ratio(100);
        for _ in 0..1000 {
            assert!(sim.should_drop());
        }
    }
}
