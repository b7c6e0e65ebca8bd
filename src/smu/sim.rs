//! Simulated source-measure unit
//!
//! A single-diode photovoltaic model behind the [`Smu`] trait, used by the
//! demo binary and by tests that need plausible IV behavior without
//! hardware. The diode saturation current is fixed so that `i(voc) = 0`,
//! which makes a channel fully described by its open-circuit voltage,
//! short-circuit current, and thermal-voltage product.

use crate::error::Result;
use crate::smu::{Batch, Channel, Measurement, Smu, Status};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Mains frequency assumed when converting NPLC to integration time
const LINE_FREQUENCY_HZ: f64 = 50.0;

/// Model parameters for one simulated photovoltaic channel
#[derive(Debug, Clone, Copy)]
pub struct SimChannel {
    /// Open-circuit voltage in volts; sign selects the power quadrant
    pub voc: f64,
    /// Short-circuit current magnitude in amperes
    pub isc: f64,
    /// Diode ideality factor times thermal voltage, volts
    pub n_vt: f64,
}

impl SimChannel {
    /// A small lab cell, positive polarity
    pub fn small_cell() -> Self {
        Self {
            voc: 0.65,
            isc: 0.02,
            n_vt: 0.05,
        }
    }

    /// Current drawn at applied voltage `v`, generation negative
    fn current_at(&self, v: f64) -> f64 {
        // Mirror negative-polarity devices into the positive quadrant
        let sign = if self.voc < 0.0 { -1.0 } else { 1.0 };
        let v = v * sign;
        let voc = self.voc * sign;
        let i0 = self.isc / ((voc / self.n_vt).exp() - 1.0);
        sign * (i0 * ((v / self.n_vt).exp() - 1.0) - self.isc)
    }
}

/// Simulated multi-channel SMU
pub struct SimSmu {
    channels: BTreeMap<Channel, SimChannel>,
    setpoints: BTreeMap<Channel, f64>,
    outputs_on: BTreeSet<Channel>,
    current_limit: f64,
    nplc: f64,
    noise: f64,
    rng: SmallRng,
    origin: Instant,
}

impl SimSmu {
    /// Build a simulator over the given channel models
    pub fn new(channels: BTreeMap<Channel, SimChannel>) -> Self {
        Self {
            channels,
            setpoints: BTreeMap::new(),
            outputs_on: BTreeSet::new(),
            current_limit: f64::INFINITY,
            nplc: 1.0,
            noise: 0.0,
            rng: SmallRng::seed_from_u64(0x48454c49),
            origin: Instant::now(),
        }
    }

    /// Enable uniform measurement noise of the given current amplitude
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// Current integration setting
    pub fn nplc(&self) -> f64 {
        self.nplc
    }

    fn read_channel(&mut self, ch: Channel) -> Measurement {
        let t = self.origin.elapsed().as_secs_f64();
        let Some(model) = self.channels.get(&ch).copied() else {
            return Measurement {
                v: 0.0,
                i: 0.0,
                t,
                status: Status::OK,
            };
        };

        let (v, mut i) = if self.outputs_on.contains(&ch) {
            let v = self.setpoints.get(&ch).copied().unwrap_or(0.0);
            (v, model.current_at(v))
        } else {
            // High impedance: no current flows, voltage floats to V_oc
            (model.voc, 0.0)
        };

        if self.noise > 0.0 {
            i += self.rng.gen_range(-self.noise..=self.noise);
        }

        let mut status = Status::OK;
        if i.abs() > self.current_limit {
            i = i.signum() * self.current_limit;
            status = Status(Status::CURRENT_OVER_THRESHOLD);
        }

        Measurement { v, i, t, status }
    }
}

#[async_trait::async_trait]
impl Smu for SimSmu {
    async fn configure_dc(&mut self, setpoints: &BTreeMap<Channel, f64>) -> Result<()> {
        for (ch, v) in setpoints {
            self.setpoints.insert(*ch, *v);
        }
        Ok(())
    }

    async fn enable_output(&mut self, on: bool, channels: &[Channel]) -> Result<()> {
        for ch in channels {
            if on {
                self.outputs_on.insert(*ch);
            } else {
                self.outputs_on.remove(ch);
            }
        }
        Ok(())
    }

    async fn measure(&mut self, channels: &[Channel]) -> Result<Batch> {
        // Integration time scales with NPLC against the line frequency
        let integration_s = self.nplc.max(0.01) / LINE_FREQUENCY_HZ;
        tokio::time::sleep(std::time::Duration::from_secs_f64(integration_s)).await;

        let mut out = Batch::new();
        for ch in channels {
            let record = self.read_channel(*ch);
            out.insert(*ch, vec![record]);
        }
        Ok(out)
    }

    fn set_nplc(&mut self, nplc: f64) {
        self.nplc = nplc;
    }

    async fn set_current_limit(&mut self, amps: f64) -> Result<()> {
        self.current_limit = amps.abs();
        Ok(())
    }
}
