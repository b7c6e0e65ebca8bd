//! Maximum power point tracking core
//!
//! This module contains the per-channel reference state, the safety
//! invariants shared by every tracking algorithm, and the orchestration
//! that ties bootstrap, algorithm, and finalization together.

use crate::logging::get_logger;
use crate::smu::{Channel, Smu};
use crate::telemetry::TelemetrySink;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

mod bootstrap;
mod gradient;
mod inspector;
mod perturb;
mod runner;
mod safety;

pub use inspector::CurveSummary;
pub use runner::TrackerOutput;
pub use safety::{Eviction, ShortReason};

/// Replaces zero when clamping to a power quadrant, keeping the SMU off the
/// sign boundary
pub const QUADRANT_EPSILON: f64 = 1e-4;

/// Best-known operating point of one channel, maintained across runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceState {
    /// Measured open-circuit voltage in volts
    pub voc: Option<f64>,
    /// Measured short-circuit current in amperes
    pub isc: Option<f64>,
    /// Best known maximum-power-point voltage in volts
    pub vmpp: Option<f64>,
    /// Current at `vmpp` in amperes
    pub impp: Option<f64>,
    /// Best observed power in watts, signed; generation is negative
    pub pmax: Option<f64>,
    /// The `(v, i, t)` measurement at the best point
    pub mmpp: Option<(f64, f64, f64)>,
}

/// Per-run sign restriction on commanded voltages, consistent with the
/// devices' generation polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageLock {
    /// Commanded voltages stay above zero
    Positive,
    /// Commanded voltages stay below zero
    Negative,
}

impl VoltageLock {
    /// Derive the lock from an open-circuit voltage
    pub fn from_voc(voc: f64) -> Self {
        if voc >= 0.0 {
            VoltageLock::Positive
        } else {
            VoltageLock::Negative
        }
    }

    /// Clamp a voltage into the locked quadrant. Zero is replaced by
    /// [`QUADRANT_EPSILON`] to keep the SMU off the sign boundary.
    pub fn apply(self, v: f64) -> f64 {
        match self {
            VoltageLock::Positive if v <= 0.0 => QUADRANT_EPSILON,
            VoltageLock::Negative if v >= 0.0 => -QUADRANT_EPSILON,
            _ => v,
        }
    }
}

/// Cloneable handle an observer can use to cancel a running tracker
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Request cancellation; the core notices at the next loop head
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The MPPT core: owns the SMU for the duration of a run and maintains the
/// per-channel reference state between runs
pub struct MpptCore {
    /// SMU capability (trait for testability)
    pub(crate) smu: Box<dyn Smu>,

    /// Hard per-channel current ceiling, never exceeded by construction
    pub(crate) absolute_current_limit: f64,

    /// Optional best-effort event sink
    pub(crate) telemetry: Option<Arc<dyn TelemetrySink>>,

    /// Best-known operating point per channel
    pub(crate) reference: BTreeMap<Channel, ReferenceState>,

    /// Cancellation flag, set by an observer thread
    pub(crate) abort: Arc<AtomicBool>,

    /// Logger with context
    pub(crate) logger: crate::logging::StructuredLogger,
}

impl MpptCore {
    /// Create a new core around an SMU capability.
    ///
    /// `absolute_current_limit` is stored as a magnitude; every per-run
    /// current limit is clamped to it.
    pub fn new(
        smu: Box<dyn Smu>,
        absolute_current_limit: f64,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self {
            smu,
            absolute_current_limit: absolute_current_limit.abs(),
            telemetry,
            reference: BTreeMap::new(),
            abort: Arc::new(AtomicBool::new(false)),
            logger: get_logger("tracker"),
        }
    }

    /// Clear all reference state and the abort flag
    pub fn reset(&mut self) {
        self.reference.clear();
        self.abort.store(false, Ordering::Relaxed);
    }

    /// Handle for requesting cancellation from another thread
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    /// Best-known operating point for a channel, if any has been learned
    pub fn reference(&self, channel: Channel) -> Option<&ReferenceState> {
        self.reference.get(&channel)
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voltage_lock_clamps_to_epsilon() {
        let lock = VoltageLock::Positive;
        assert_eq!(lock.apply(-0.05), QUADRANT_EPSILON);
        assert_eq!(lock.apply(0.0), QUADRANT_EPSILON);
        assert_eq!(lock.apply(0.3), 0.3);

        let lock = VoltageLock::Negative;
        assert_eq!(lock.apply(0.05), -QUADRANT_EPSILON);
        assert_eq!(lock.apply(0.0), -QUADRANT_EPSILON);
        assert_eq!(lock.apply(-0.3), -0.3);
    }

    #[test]
    fn voltage_lock_from_voc_sign() {
        assert_eq!(VoltageLock::from_voc(0.65), VoltageLock::Positive);
        assert_eq!(VoltageLock::from_voc(0.0), VoltageLock::Positive);
        assert_eq!(VoltageLock::from_voc(-0.65), VoltageLock::Negative);
    }

    #[test]
    fn abort_handle_round_trip() {
        let flag = Arc::new(AtomicBool::new(false));
        let handle = AbortHandle(Arc::clone(&flag));
        assert!(!handle.is_aborted());
        handle.abort();
        assert!(handle.is_aborted());
        assert!(flag.load(Ordering::Relaxed));
    }
}
