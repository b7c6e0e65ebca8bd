//! Short-circuit detection and channel eviction
//!
//! Every measurement batch passes through here before an algorithm sees it.
//! A per-channel soft-limit trip identifies its channel directly. A
//! board-level overcurrent trip is ambiguous between the two channels
//! sharing a fuse, so the monitor isolates and probes the board mate to
//! find the culprit without disturbing unrelated channels.

use crate::error::Result;
use crate::smu::{Batch, Channel, Pixel, Status, board_mate};
use crate::telemetry::emit_warning;
use crate::tracker::MpptCore;
use std::collections::BTreeMap;

/// Why a channel was removed from the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortReason {
    /// Per-channel soft current limit exceeded
    OverThreshold,
    /// Hardware overcurrent on the shared board input
    BoardTrip,
}

/// A channel removed from the run by the safety monitor
#[derive(Debug, Clone)]
pub struct Eviction {
    /// The evicted channel
    pub channel: Channel,
    /// Device label from the pixel descriptor, for diagnostics
    pub device_label: String,
    /// What tripped
    pub reason: ShortReason,
}

impl MpptCore {
    /// Inspect a measurement batch for short-circuit conditions.
    ///
    /// Offending channels have their outputs disabled and their records
    /// stripped from the batch. The caller applies the returned evictions to
    /// its active-channel set; an evicted channel is never commanded again
    /// in the same run.
    pub(crate) async fn detect_short_circuits(
        &mut self,
        data: &mut Batch,
        active: &BTreeMap<Channel, Pixel>,
    ) -> Result<Vec<Eviction>> {
        let mut evictions: Vec<Eviction> = Vec::new();

        for ch in active.keys().copied().collect::<Vec<_>>() {
            // A previous detection on the board mate may already have
            // handled this channel
            if evictions.iter().any(|e| e.channel == ch) {
                continue;
            }
            let Some(records) = data.get(&ch) else {
                continue;
            };
            let over_threshold = records.iter().any(|m| m.status.over_threshold());
            let tripped = records.iter().any(|m| m.status.overcurrent_trip());

            if over_threshold {
                self.smu.enable_output(false, &[ch]).await?;
                data.remove(&ch);
                evictions.push(self.evict(ch, active, ShortReason::OverThreshold));
            } else if tripped {
                // Board-level trip: ambiguous between ch and its board mate
                let mate = board_mate(ch);
                self.smu.enable_output(false, &[ch]).await?;
                let mate_status = self.probe_status(mate).await?;
                if mate_status.overcurrent_trip() {
                    // The mate is the culprit; bring ch back up
                    self.smu.enable_output(true, &[ch]).await?;
                    self.smu.enable_output(false, &[mate]).await?;
                    data.remove(&mate);
                    if active.contains_key(&mate) {
                        evictions.push(self.evict(mate, active, ShortReason::BoardTrip));
                    }

                    // ch could still be shorted as well, so probe it once more
                    let ch_status = self.probe_status(ch).await?;
                    if ch_status.overcurrent_trip() {
                        self.smu.enable_output(false, &[ch]).await?;
                        data.remove(&ch);
                        evictions.push(self.evict(ch, active, ShortReason::BoardTrip));
                    }
                } else {
                    data.remove(&ch);
                    evictions.push(self.evict(ch, active, ShortReason::BoardTrip));
                }
            }
        }

        Ok(evictions)
    }

    /// Single DC reading of one channel, reduced to its status bits
    async fn probe_status(&mut self, channel: Channel) -> Result<Status> {
        let data = self.smu.measure(&[channel]).await?;
        Ok(data
            .get(&channel)
            .and_then(|records| records.first())
            .map(|m| m.status)
            .unwrap_or(Status::OK))
    }

    fn evict(
        &self,
        channel: Channel,
        active: &BTreeMap<Channel, Pixel>,
        reason: ShortReason,
    ) -> Eviction {
        let device_label = active
            .get(&channel)
            .map(|pixel| pixel.device_label.clone())
            .unwrap_or_else(|| format!("channel {}", channel));
        let msg = format!(
            "Short circuit detected on '{}'! Channel will be disabled for the rest of the run.",
            device_label
        );
        self.logger.warn(&msg);
        emit_warning(self.telemetry.as_ref(), &msg);
        Eviction {
            channel,
            device_label,
            reason,
        }
    }
}
