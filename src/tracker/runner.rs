//! Run orchestration: bootstrap, algorithm dispatch, finalization
//!
//! The runner owns the per-run state (active channels, traces, the voltage
//! quadrant lock) and guarantees that outputs are disabled on every exit
//! path, whether the run completed, was cancelled, or hit a driver fault.

use crate::config::{Algorithm, TrackerConfig};
use crate::error::{HeliotrackError, Result};
use crate::smu::{Batch, Channel, DwellHandler, Pixel, first_records};
use crate::telemetry::emit_warning;
use crate::tracker::{MpptCore, VoltageLock};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Result of one tracking run
#[derive(Debug, Clone)]
pub struct TrackerOutput {
    /// Wall-clock time the run started
    pub started_at: DateTime<Utc>,

    /// All measurements recorded per channel, contiguous and time-ordered
    pub traces: Batch,

    /// Records from the high-impedance V_oc probe; empty if V_oc was already
    /// known
    pub ssvocs: Batch,
}

/// Per-run mutable state threaded through bootstrap and the algorithms
pub(crate) struct RunState<'a> {
    /// Monotonic start of the run; the duration budget counts from here
    pub t0: Instant,

    /// Total algorithm wall-clock budget in seconds
    pub duration_s: f64,

    /// Quadrant lock, set by bootstrap before any algorithm iteration
    pub lock: VoltageLock,

    /// Channels still being tracked; shrinks as the safety monitor evicts
    pub active: BTreeMap<Channel, Pixel>,

    /// Accumulated measurement trace per channel
    pub traces: Batch,

    /// Bootstrap-probe records
    pub ssvocs: Batch,

    /// Optional per-batch measurement handler
    pub on_each: Option<DwellHandler<'a>>,
}

impl<'a> RunState<'a> {
    fn new(pixels: &BTreeMap<Channel, Pixel>, duration_s: f64, on_each: Option<DwellHandler<'a>>) -> Self {
        Self {
            t0: Instant::now(),
            duration_s,
            lock: VoltageLock::Positive,
            active: pixels.clone(),
            traces: Batch::new(),
            ssvocs: Batch::new(),
            on_each,
        }
    }

    /// Seconds since the run started
    pub fn elapsed(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }

    /// Channels still being tracked, in channel order
    pub fn channels(&self) -> Vec<Channel> {
        self.active.keys().copied().collect()
    }

    /// Append a batch to the per-channel traces
    pub fn record(&mut self, batch: &Batch) {
        for (ch, records) in batch {
            self.traces.entry(*ch).or_default().extend(records.iter().copied());
        }
    }

    /// Forward the first record of each channel to the run's handler
    pub fn notify(&mut self, batch: &Batch) {
        if let Some(handler) = self.on_each.as_deref_mut() {
            handler(&first_records(batch));
        }
    }

    /// Remove evicted channels from the active set
    pub fn apply_evictions(&mut self, evictions: &[super::Eviction]) {
        for eviction in evictions {
            self.active.remove(&eviction.channel);
        }
    }
}

impl MpptCore {
    /// Run one maximum power point tracking session.
    ///
    /// Orchestration: clamp the current limit, apply NPLC, seed and
    /// bootstrap, dispatch on the configured algorithm, and always disable
    /// all outputs before returning. Cancellation through the abort handle
    /// produces an orderly finalization with partial traces.
    pub async fn launch_tracker(
        &mut self,
        cfg: &TrackerConfig,
        pixels: &BTreeMap<Channel, Pixel>,
        on_each: Option<DwellHandler<'_>>,
    ) -> Result<TrackerOutput> {
        // Bad configuration fails fast, before any hardware is touched
        let algorithm = Algorithm::parse(&cfg.algorithm)?;
        if pixels.is_empty() {
            return Err(HeliotrackError::validation(
                "pixels",
                "At least one channel is required",
            ));
        }

        let started_at = Utc::now();
        let mut run = RunState::new(pixels, cfg.duration_s, on_each);

        let i_limit = cfg.i_limit.abs().min(self.absolute_current_limit);
        if cfg.nplc != -1.0 {
            self.smu.set_nplc(cfg.nplc);
        }

        let outcome = self.track(&mut run, cfg, &algorithm, i_limit).await;

        // Outputs off on every exit path, including driver faults
        let all_channels: Vec<Channel> = pixels.keys().copied().collect();
        if let Err(e) = self.smu.enable_output(false, &all_channels).await {
            self.logger
                .warn(&format!("Failed to disable outputs during finalization: {}", e));
        }
        outcome?;

        Ok(TrackerOutput {
            started_at,
            traces: std::mem::take(&mut run.traces),
            ssvocs: std::mem::take(&mut run.ssvocs),
        })
    }

    async fn track(
        &mut self,
        run: &mut RunState<'_>,
        cfg: &TrackerConfig,
        algorithm: &Algorithm,
        i_limit: f64,
    ) -> Result<()> {
        self.smu.set_current_limit(i_limit).await?;
        self.seed_and_bootstrap(run, cfg.voc_compliance, i_limit).await?;

        match algorithm {
            Algorithm::GradientDescent(params) => self.gradient_descent(run, params, None).await,
            Algorithm::Snaith(params) => {
                let soaks = super::gradient::SnaithSoaks {
                    pre_s: cfg.snaith_pre_soak_s,
                    post_s: cfg.snaith_post_soak_s,
                };
                self.gradient_descent(run, params, Some(soaks)).await
            }
            Algorithm::PerturbObserve(params) => self.perturb_and_observe(run, params).await,
            Algorithm::Unknown(name) => {
                let msg = format!(
                    "MPPT algorithm '{}' not understood, not doing max power point tracking",
                    name
                );
                self.logger.warn(&msg);
                emit_warning(self.telemetry.as_ref(), &msg);
                Ok(())
            }
        }
    }

    /// Measure all active channels once, run the safety monitor to
    /// completion, then record and publish what survived.
    ///
    /// A channel evicted here is gone from the active set before the
    /// algorithm sees the batch.
    pub(crate) async fn measure_batch(&mut self, run: &mut RunState<'_>) -> Result<Batch> {
        let channels = run.channels();
        let mut data = self.smu.measure(&channels).await?;
        let evictions = self.detect_short_circuits(&mut data, &run.active).await?;
        run.apply_evictions(&evictions);
        run.record(&data);
        run.notify(&data);
        Ok(data)
    }

    /// Hold the present setpoints and stream measurements until the soak
    /// time elapses
    pub(crate) async fn steady_state_soak(
        &mut self,
        run: &mut RunState<'_>,
        soak_s: f64,
        delay_ms: f64,
    ) -> Result<()> {
        let start = Instant::now();
        while !self.aborted() && start.elapsed().as_secs_f64() < soak_s && !run.active.is_empty() {
            if delay_ms > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(delay_ms / 1000.0)).await;
            }
            self.measure_batch(run).await?;
        }
        Ok(())
    }

    /// Dwell at the present setpoints via the driver's polling primitive,
    /// streaming each polled batch to the run's handler
    pub(crate) async fn dwell(&mut self, run: &mut RunState<'_>, dwell_s: f64) -> Result<Batch> {
        let channels = run.channels();
        if channels.is_empty() {
            return Ok(Batch::new());
        }

        let mut data = self
            .smu
            .measure_until(
                &channels,
                Duration::from_secs_f64(dwell_s),
                run.on_each.as_deref_mut(),
            )
            .await?;

        let evictions = self.detect_short_circuits(&mut data, &run.active).await?;
        run.apply_evictions(&evictions);
        run.record(&data);
        Ok(data)
    }
}
