//! IV-curve inspector
//!
//! Given a recorded IV sweep, finds the maximum power point and the axis
//! crossings, and conditionally promotes them into the per-channel
//! reference state. Power is signed: by convention a generating device has
//! `v * i < 0`, so the stored maximum is the most negative product and all
//! comparisons run on magnitudes.

use crate::smu::{Batch, Channel, Measurement};
use crate::tracker::MpptCore;
use std::collections::BTreeMap;

/// Per-channel result of inspecting one sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSummary {
    /// Power at the maximum power point, watts, signed (generation negative)
    pub p_max: f64,
    /// Voltage at the maximum power point, volts
    pub v_mpp: f64,
    /// Current at the maximum power point, amperes
    pub i_mpp: f64,
    /// Index of the maximum power point within the sweep
    pub max_index: usize,
}

struct InspectedCurve {
    p_max: f64,
    v_mpp: f64,
    i_mpp: f64,
    t_mpp: f64,
    max_index: usize,
    /// True when the mpp was found inside the generation quadrant
    generating: bool,
    /// V at the smallest |i|, accepted only when the sweep straddles i = 0
    voc: Option<f64>,
    /// I at the smallest |v|, accepted only when the sweep straddles v = 0
    isc: Option<f64>,
}

impl MpptCore {
    /// Register an IV sweep with the tracker.
    ///
    /// Figures out which point produced the highest power per channel. For
    /// light sweeps, the stored reference is replaced only when the new
    /// maximum meets or beats the stored one in magnitude (ties favor the
    /// newer sweep), and V_oc / I_sc are accepted only when their straddle
    /// conditions held.
    pub fn register_curve(&mut self, sweep: &Batch, light: bool) -> BTreeMap<Channel, CurveSummary> {
        let mut summaries = BTreeMap::new();

        for (ch, records) in sweep {
            let Some(curve) = inspect_records(records) else {
                continue;
            };

            if light && curve.generating {
                let reference = self.reference.entry(*ch).or_default();
                let replaces = match reference.pmax {
                    Some(stored) => curve.p_max.abs() >= stored.abs(),
                    None => true,
                };
                if replaces {
                    reference.vmpp = Some(curve.v_mpp);
                    reference.impp = Some(curve.i_mpp);
                    reference.pmax = Some(curve.p_max);
                    reference.mmpp = Some((curve.v_mpp, curve.i_mpp, curve.t_mpp));
                    if let Some(isc) = curve.isc {
                        reference.isc = Some(isc);
                    }
                    if let Some(voc) = curve.voc {
                        reference.voc = Some(voc);
                    }
                    self.logger.info(&format!(
                        "New reference IV curve for channel {}: P_max = {:.3e} W at V = {:.4} V",
                        ch, curve.p_max, curve.v_mpp
                    ));
                }
            }

            summaries.insert(
                *ch,
                CurveSummary {
                    p_max: curve.p_max,
                    v_mpp: curve.v_mpp,
                    i_mpp: curve.i_mpp,
                    max_index: curve.max_index,
                },
            );
        }

        summaries
    }
}

fn inspect_records(records: &[Measurement]) -> Option<InspectedCurve> {
    if records.is_empty() {
        return None;
    }

    // Maximum |v*i| restricted to the generation quadrant; if the sweep
    // never generated, fall back to the least dissipative point
    let mut max_index: Option<usize> = None;
    let mut generating = true;
    for (index, m) in records.iter().enumerate() {
        if m.v * m.i <= 0.0 {
            let better = match max_index {
                Some(best) => (m.v * m.i).abs() > (records[best].v * records[best].i).abs(),
                None => true,
            };
            if better {
                max_index = Some(index);
            }
        }
    }
    let max_index = match max_index {
        Some(index) => index,
        None => {
            generating = false;
            argmin_by(records, |m| m.v * m.i)?
        }
    };

    let best = records[max_index];

    let min_i = records.iter().map(|m| m.i).fold(f64::INFINITY, f64::min);
    let max_i = records.iter().map(|m| m.i).fold(f64::NEG_INFINITY, f64::max);
    let voc = if min_i <= 0.0 && max_i >= 0.0 {
        argmin_by(records, |m| m.i.abs()).map(|index| records[index].v)
    } else {
        None
    };

    let min_v = records.iter().map(|m| m.v).fold(f64::INFINITY, f64::min);
    let max_v = records.iter().map(|m| m.v).fold(f64::NEG_INFINITY, f64::max);
    let isc = if min_v <= 0.0 && max_v >= 0.0 {
        argmin_by(records, |m| m.v.abs()).map(|index| records[index].i)
    } else {
        None
    };

    Some(InspectedCurve {
        p_max: best.v * best.i,
        v_mpp: best.v,
        i_mpp: best.i,
        t_mpp: best.t,
        max_index,
        generating,
        voc,
        isc,
    })
}

fn argmin_by(records: &[Measurement], key: impl Fn(&Measurement) -> f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, m) in records.iter().enumerate() {
        let value = key(m);
        match best {
            Some((_, best_value)) if value >= best_value => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}
