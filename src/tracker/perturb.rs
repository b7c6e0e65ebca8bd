//! Angle-bounded perturb-and-observe tracker
//!
//! Alternates between exploration around the present maximum power point
//! and constant-voltage dwells. Exploration walks the voltage in steps of
//! `V_oc / 301` and reverses direction when the measured I-V angle strays
//! more than the configured bound from the reference angle, or when the
//! setpoint would cross V_oc or 0 V. Once both edges have been touched, the
//! best explored point becomes the new dwell target.

use crate::config::PoParams;
use crate::error::Result;
use crate::tracker::MpptCore;
use std::collections::BTreeMap;

use super::runner::RunState;

/// Exploration uses voltage steps that are this fraction of V_oc
const EXPLORE_STEP_DIVISOR: f64 = 301.0;

/// Per-channel exploration state
struct Explore {
    voc: f64,
    isc: f64,
    angle_mpp_deg: f64,
    d_v: f64,
    v_set: f64,
    high_edge: bool,
    low_edge: bool,
    v_samples: Vec<f64>,
    i_samples: Vec<f64>,
}

impl Explore {
    fn done(&self) -> bool {
        self.high_edge && self.low_edge
    }
}

/// Angle of a point in the I-V plane, normalized by V_oc / I_sc, degrees
fn iv_angle_deg(v: f64, i: f64, voc: f64, isc: f64) -> f64 {
    (i / v * voc / isc).atan().to_degrees()
}

impl MpptCore {
    /// Run the perturb-and-observe loop until the time budget is spent,
    /// cancellation is requested, or every channel has been evicted.
    pub(crate) async fn perturb_and_observe(
        &mut self,
        run: &mut RunState<'_>,
        params: &PoParams,
    ) -> Result<()> {
        self.logger
            .info("===Starting up perturb-and-observe maximum power point tracking algorithm===");
        self.logger
            .info(&format!("d_angle_max_deg = {} [deg]", params.d_angle_max_deg));
        self.logger
            .info(&format!("dwell_time_s = {} [s]", params.dwell_time_s));

        // Settle at the seeded V_mpp before exploring; short runs get a
        // proportionally shorter initial dwell
        let initial_soak_s = if run.duration_s <= 10.0 {
            run.duration_s * 0.2
        } else {
            params.dwell_time_s
        };
        self.logger.info(&format!(
            "Soaking at V_mpp for {:.1} seconds...",
            initial_soak_s
        ));
        let soak = self.dwell(run, initial_soak_s).await?;
        for (ch, records) in &soak {
            if let Some(m) = records.last() {
                let reference = self.reference.entry(*ch).or_default();
                reference.impp = Some(m.i);
                if reference.isc.is_none() {
                    // Without a registered sweep, take I_sc as 10% beyond
                    // the tracked current
                    reference.isc = Some(m.i * 1.1);
                }
            }
        }

        while !self.aborted() && run.elapsed() < run.duration_s && !run.active.is_empty() {
            self.explore(run, params).await?;
            if run.active.is_empty() {
                break;
            }

            // Teleport to the freshly found mpp and hold
            let mut setpoints = BTreeMap::new();
            for ch in run.channels() {
                if let Some(vmpp) = self.reference.get(&ch).and_then(|r| r.vmpp) {
                    setpoints.insert(ch, run.lock.apply(vmpp));
                }
            }
            self.smu.configure_dc(&setpoints).await?;
            self.logger.info(&format!(
                "Dwelling at Mpp for {:.1} seconds...",
                params.dwell_time_s
            ));
            let dq = self.dwell(run, params.dwell_time_s).await?;
            for (ch, records) in &dq {
                if let Some(m) = records.last() {
                    self.reference.entry(*ch).or_default().impp = Some(m.i);
                }
            }
        }

        Ok(())
    }

    /// Walk every active channel around its mpp until both exploration
    /// edges have been touched, then promote the best explored point.
    async fn explore(&mut self, run: &mut RunState<'_>, params: &PoParams) -> Result<()> {
        self.logger.info("Exploring for new Mpp...");

        let mut states: BTreeMap<_, Explore> = BTreeMap::new();
        for ch in run.channels() {
            let Some(reference) = self.reference.get(&ch) else {
                continue;
            };
            let (Some(voc), Some(isc), Some(vmpp), Some(impp)) =
                (reference.voc, reference.isc, reference.vmpp, reference.impp)
            else {
                continue;
            };
            let angle_mpp_deg = iv_angle_deg(vmpp, impp, voc, isc);
            self.logger.debug(&format!(
                "Channel {} MPP angle = {:.2} [deg]",
                ch, angle_mpp_deg
            ));
            states.insert(
                ch,
                Explore {
                    voc,
                    isc,
                    angle_mpp_deg,
                    d_v: voc / EXPLORE_STEP_DIVISOR,
                    v_set: vmpp,
                    high_edge: false,
                    low_edge: false,
                    v_samples: vec![vmpp],
                    i_samples: vec![impp],
                },
            );
        }

        while !self.aborted()
            && !run.active.is_empty()
            && states.values().any(|state| !state.done())
        {
            // Channels that already touched both edges hold their last
            // setpoint while the others keep walking
            let setpoints: BTreeMap<_, _> = states
                .iter()
                .filter(|(ch, _)| run.active.contains_key(*ch))
                .map(|(ch, state)| (*ch, run.lock.apply(state.v_set)))
                .collect();
            self.smu.configure_dc(&setpoints).await?;
            let batch = self.measure_batch(run).await?;
            states.retain(|ch, _| run.active.contains_key(ch));

            for (ch, state) in states.iter_mut() {
                if state.done() {
                    continue;
                }
                let Some(m) = batch.get(ch).and_then(|records| records.first()) else {
                    continue;
                };
                state.v_samples.push(m.v);
                state.i_samples.push(m.i);

                let this_angle = iv_angle_deg(m.v, m.i, state.voc, state.isc);
                let d_angle = state.angle_mpp_deg - this_angle;

                if !state.high_edge && d_angle > params.d_angle_max_deg {
                    state.high_edge = true;
                    state.d_v = -state.d_v;
                    self.logger
                        .debug(&format!("Channel {}: high edge, angle exceeded", ch));
                }
                if !state.low_edge && d_angle < -params.d_angle_max_deg {
                    state.low_edge = true;
                    state.d_v = -state.d_v;
                    self.logger
                        .debug(&format!("Channel {}: low edge, angle exceeded", ch));
                }

                state.v_set += state.d_v;
                if (state.v_set > 0.0 && state.d_v > 0.0) || (state.v_set < 0.0 && state.d_v < 0.0)
                {
                    // Walking towards V_oc
                    if !state.high_edge && state.d_v > 0.0 && state.v_set >= state.voc {
                        state.high_edge = true;
                        state.d_v = -state.d_v;
                        state.v_set += state.d_v;
                        self.logger
                            .debug(&format!("Channel {}: high edge, hit V_oc", ch));
                    }
                    if !state.low_edge && state.d_v < 0.0 && state.v_set <= state.voc {
                        state.low_edge = true;
                        state.d_v = -state.d_v;
                        state.v_set += state.d_v;
                        self.logger
                            .debug(&format!("Channel {}: low edge, hit V_oc", ch));
                    }
                } else {
                    // Walking towards I_sc
                    if !state.high_edge && state.d_v > 0.0 && state.v_set >= 0.0 {
                        state.high_edge = true;
                        state.d_v = -state.d_v;
                        state.v_set += state.d_v;
                        self.logger
                            .debug(&format!("Channel {}: high edge, hit 0 V", ch));
                    }
                    if !state.low_edge && state.d_v < 0.0 && state.v_set <= 0.0 {
                        state.low_edge = true;
                        state.d_v = -state.d_v;
                        state.v_set += state.d_v;
                        self.logger
                            .debug(&format!("Channel {}: low edge, hit 0 V", ch));
                    }
                }
            }
        }

        self.logger.info("Done exploring.");

        // The best explored point becomes the new maximum power point
        for (ch, state) in &states {
            if !run.active.contains_key(ch) {
                continue;
            }
            let mut best_index = 0;
            let mut best_power = f64::NEG_INFINITY;
            for (index, (v, i)) in state.v_samples.iter().zip(&state.i_samples).enumerate() {
                let power = v * i * -1.0;
                if power > best_power {
                    best_power = power;
                    best_index = index;
                }
            }
            let vmpp = state.v_samples[best_index];
            let impp = state.i_samples[best_index];
            let reference = self.reference.entry(*ch).or_default();
            reference.vmpp = Some(vmpp);
            reference.impp = Some(impp);
            self.logger.info(&format!(
                "Channel {}: new Mpp found, {:.6} mW at {:.6} V",
                ch,
                best_power * 1000.0,
                vmpp
            ));
        }

        Ok(())
    }
}
