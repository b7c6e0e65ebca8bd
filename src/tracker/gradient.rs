//! Gradient-descent maximum power point tracker
//!
//! Minimizes the signed power `v * i` (generation makes it negative) by a
//! finite-difference gradient with momentum. The gradient is additionally
//! divided by the time between the two samples, so steps taken faster
//! receive proportionally larger gradients. Snaith mode brackets the
//! descent with steady-state soaks at V_mpp whose durations come out of the
//! run's time budget.

use crate::config::GdParams;
use crate::error::Result;
use crate::smu::{Channel, Measurement};
use crate::tracker::MpptCore;
use std::collections::BTreeMap;
use std::time::Duration;

use super::runner::RunState;

/// Fallback step magnitude when the gradient is degenerate and no minimum
/// step is configured
const DEGENERATE_STEP: f64 = 1e-4;

/// Steady-state soak durations bracketing a snaith-mode descent
#[derive(Debug, Clone, Copy)]
pub(crate) struct SnaithSoaks {
    pub pre_s: f64,
    pub post_s: f64,
}

/// The objective being minimized: signed power
fn objective(m: &Measurement) -> f64 {
    m.v * m.i
}

/// Finite-difference gradient between the first records of two batches,
/// scaled by the sample spacing in time.
///
/// Undefined when the two voltages (or timestamps) coincide.
fn finite_gradient(
    current: Option<&Vec<Measurement>>,
    previous: Option<&Vec<Measurement>>,
) -> Option<f64> {
    let m0 = current?.first()?;
    let m1 = previous?.first()?;
    if m0.v == m1.v || m0.t == m1.t {
        return None;
    }
    Some((objective(m0) - objective(m1)) / (m0.v - m1.v) / (m0.t - m1.t))
}

impl MpptCore {
    /// Run the gradient-descent tracking loop until the time budget is
    /// spent, cancellation is requested, or every channel has been evicted.
    pub(crate) async fn gradient_descent(
        &mut self,
        run: &mut RunState<'_>,
        params: &GdParams,
        snaith: Option<SnaithSoaks>,
    ) -> Result<()> {
        if params.nplc != -1.0 {
            self.smu.set_nplc(params.nplc);
        }

        self.logger
            .info("===Starting up gradient descent maximum power point tracking algorithm===");
        self.logger
            .info(&format!("Learning rate (alpha) = {}", params.alpha));
        self.logger
            .info(&format!("delta_zero = {} [V]", params.delta_zero));
        self.logger.info(&format!("momentum = {}", params.momentum));
        self.logger.info(&format!(
            "Step size limits = [{}, {}] [mV]",
            params.min_step * 1000.0,
            params.max_step * 1000.0
        ));
        self.logger
            .info(&format!("Source-measure delay = {} [ms]", params.delay_ms));
        self.logger
            .info(&format!("Snaith mode = {}", snaith.is_some()));

        // The descent must leave room for the post-soak inside the run's
        // overall budget; the pre-soak spends run time before the loop starts
        let mut descent_deadline_s = run.duration_s;
        if let Some(soaks) = snaith {
            descent_deadline_s -= soaks.post_s;
            self.logger.info(&format!(
                "Pre-soaking at V_mpp for {:.1} seconds...",
                soaks.pre_s
            ));
            self.steady_state_soak(run, soaks.pre_s, params.delay_ms).await?;
        }

        // Bootstrap measurement at the seeded V_mpp
        let mut last_batch = self.measure_batch(run).await?;

        // The downhill direction is unknown before the loop gets going, so
        // the first step is the configured delta_zero
        let mut deltas: BTreeMap<Channel, f64> = run
            .active
            .keys()
            .map(|ch| (*ch, params.delta_zero))
            .collect();
        let mut next_voltages: BTreeMap<Channel, f64> = BTreeMap::new();
        for ch in run.active.keys() {
            let vmpp = self
                .reference
                .get(ch)
                .and_then(|r| r.vmpp)
                .unwrap_or(0.0);
            next_voltages.insert(*ch, run.lock.apply(vmpp + params.delta_zero));
        }

        while !self.aborted() && run.elapsed() < descent_deadline_s && !run.active.is_empty() {
            let some_sign = if rand::random::<bool>() { 1.0 } else { -1.0 };

            let setpoints: BTreeMap<Channel, f64> = run
                .active
                .keys()
                .filter_map(|ch| next_voltages.get(ch).map(|v| (*ch, *v)))
                .collect();
            self.smu.configure_dc(&setpoints).await?;
            if params.delay_ms > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(params.delay_ms / 1000.0)).await;
            }
            let batch = self.measure_batch(run).await?;

            for ch in run.active.keys() {
                let delta = deltas.entry(*ch).or_insert(params.delta_zero);
                match finite_gradient(batch.get(ch), last_batch.get(ch)) {
                    Some(gradient) => {
                        *delta = -params.alpha * gradient + params.momentum * *delta;
                    }
                    None => {
                        // Degenerate gradient: take a randomly signed
                        // minimum step instead
                        *delta = if params.min_step == 0.0 {
                            some_sign * DEGENERATE_STEP
                        } else {
                            some_sign * params.min_step
                        };
                    }
                }

                // Enforce step size limits, preserving sign
                if delta.abs() < params.min_step && params.min_step > 0.0 {
                    *delta = some_sign * params.min_step;
                } else if delta.abs() > params.max_step {
                    *delta = delta.signum() * params.max_step;
                }

                let v = next_voltages.entry(*ch).or_insert(0.0);
                *v = run.lock.apply(*v + *delta);
            }

            last_batch = batch;
        }

        if let Some(soaks) = snaith {
            self.logger.info(&format!(
                "Post-soaking at the final voltage for {:.1} seconds...",
                soaks.post_s
            ));
            self.steady_state_soak(run, soaks.post_s, params.delay_ms).await?;
        }

        // The most recent readings become the reference maximum power point
        for (ch, records) in &last_batch {
            if let Some(m) = records.first() {
                let reference = self.reference.entry(*ch).or_default();
                reference.vmpp = Some(m.v);
                reference.impp = Some(m.i);
            }
        }

        Ok(())
    }
}
