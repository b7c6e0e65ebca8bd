//! Measurement data model and the SMU capability consumed by the tracker
//!
//! The tracker does not speak any wire protocol. It drives a source-measure
//! unit through the narrow [`Smu`] trait, which real transports and the
//! built-in simulator both implement.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub mod sim;

/// One independently controlled SMU output.
///
/// Channels are grouped in pairs by physical SMU board; channel `c` shares
/// its board (and its overcurrent fuse) with channel `c ^ 1`.
pub type Channel = u32;

/// The board mate sharing a fuse with `channel`
pub fn board_mate(channel: Channel) -> Channel {
    channel ^ 1
}

/// Per-measurement status bitmask reported by the SMU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub u32);

impl Status {
    /// No fault bits set
    pub const OK: Status = Status(0);

    /// Per-channel soft current limit exceeded
    pub const CURRENT_OVER_THRESHOLD: u32 = 1 << 0;

    /// Hardware overcurrent on the shared board input
    pub const OVERCURRENT_TRIP: u32 = 1 << 1;

    /// Whether the per-channel soft limit bit is set
    pub fn over_threshold(self) -> bool {
        self.0 & Self::CURRENT_OVER_THRESHOLD != 0
    }

    /// Whether the board-level trip bit is set
    pub fn overcurrent_trip(self) -> bool {
        self.0 & Self::OVERCURRENT_TRIP != 0
    }

    /// Either overcurrent bit signals a short-circuit condition
    pub fn is_short_circuit(self) -> bool {
        self.over_threshold() || self.overcurrent_trip()
    }
}

/// A single SMU reading: voltage, current, monotonic seconds, status bits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measured voltage in volts
    pub v: f64,
    /// Measured current in amperes
    pub i: f64,
    /// Monotonic timestamp in seconds, as reported by the driver
    pub t: f64,
    /// Status bitmask
    pub status: Status,
}

/// Per-channel description of the device under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pixel {
    /// Human-readable label used in diagnostics
    pub device_label: String,
    /// Device area in square meters
    pub area_m2: f64,
}

/// A batch of readings keyed by channel
pub type Batch = BTreeMap<Channel, Vec<Measurement>>;

/// First reading of each channel in a batch, for single-shot handlers
pub fn first_records(batch: &Batch) -> BTreeMap<Channel, Measurement> {
    let mut out = BTreeMap::new();
    for (ch, records) in batch {
        if let Some(first) = records.first() {
            out.insert(*ch, *first);
        }
    }
    out
}

/// Per-reading handler invoked while a dwell is in progress
pub type DwellHandler<'a> = &'a mut (dyn FnMut(&BTreeMap<Channel, Measurement>) + Send + 'static);

/// Capability the tracker requires from a source-measure unit.
///
/// Transport failures surface as [`crate::error::HeliotrackError::Driver`]
/// and abort the run; no retry policy is prescribed at this layer.
#[async_trait::async_trait]
pub trait Smu: Send {
    /// Put the given channels into DC voltage-source mode at the given
    /// setpoints
    async fn configure_dc(&mut self, setpoints: &BTreeMap<Channel, f64>) -> Result<()>;

    /// Enable or disable the outputs of the given channels
    async fn enable_output(&mut self, on: bool, channels: &[Channel]) -> Result<()>;

    /// Perform one DC spot measurement per channel.
    ///
    /// With outputs disabled this is a high-impedance reading, i.e. the
    /// measured voltage approaches the device's open-circuit voltage.
    async fn measure(&mut self, channels: &[Channel]) -> Result<Batch>;

    /// Poll DC measurements until the dwell elapses, invoking `on_each` with
    /// the first reading of every polled batch
    async fn measure_until(
        &mut self,
        channels: &[Channel],
        t_dwell: Duration,
        mut on_each: Option<DwellHandler<'_>>,
    ) -> Result<Batch> {
        let start = Instant::now();
        let mut out = Batch::new();
        loop {
            let batch = self.measure(channels).await?;
            if let Some(handler) = on_each.as_deref_mut() {
                handler(&first_records(&batch));
            }
            for (ch, records) in batch {
                out.entry(ch).or_default().extend(records);
            }
            if start.elapsed() >= t_dwell {
                break;
            }
        }
        Ok(out)
    }

    /// Set the integration time in power-line cycles
    fn set_nplc(&mut self, nplc: f64);

    /// Set the per-channel current compliance in amperes
    async fn set_current_limit(&mut self, amps: f64) -> Result<()>;
}
