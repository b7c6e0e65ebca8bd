//! Scriptable stub SMU shared by the integration tests
//!
//! Deterministic by construction: timestamps advance by a fixed tick per
//! measurement call, and fault statuses are handed out from per-channel
//! scripts. Every driver call is recorded so tests can assert on exactly
//! what the tracker commanded.

#![allow(dead_code)]

use heliotrack::error::Result;
use heliotrack::smu::{Batch, Channel, Measurement, Pixel, Smu, Status};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Seconds between consecutive stub measurements on the stub's own clock
pub const TICK_S: f64 = 0.1;

/// Simulated integration time per measurement call
pub const INTEGRATION_DELAY: std::time::Duration = std::time::Duration::from_millis(1);

/// One driver call as seen by the stub
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ConfigureDc(BTreeMap<Channel, f64>),
    EnableOutput(bool, Vec<Channel>),
    Measure(Vec<Channel>),
    SetNplc(f64),
    SetCurrentLimit(f64),
}

/// IV behavior of one stub channel
#[derive(Debug, Clone, Copy)]
pub struct StubChannel {
    pub voc: f64,
    pub isc: f64,
    /// Dissipative load (i = isc * v) instead of the photovoltaic line;
    /// drives power uphill with voltage so trackers walk downward
    pub resistive: bool,
}

impl StubChannel {
    pub fn pv(voc: f64, isc: f64) -> Self {
        Self {
            voc,
            isc,
            resistive: false,
        }
    }

    pub fn resistor(voc: f64, slope: f64) -> Self {
        Self {
            voc,
            isc: slope,
            resistive: true,
        }
    }

    fn current(&self, v: f64) -> f64 {
        if self.resistive {
            self.isc * v
        } else {
            // Linear photovoltaic line: -isc at 0 V, zero at V_oc
            self.isc * (v / self.voc - 1.0)
        }
    }
}

/// Shared mutable state: call log, scripted statuses, and the clock
#[derive(Default)]
pub struct StubState {
    pub calls: Vec<Call>,
    pub scripted: BTreeMap<Channel, VecDeque<u32>>,
    pub ticks: u64,
    /// When set, measurements fail with a driver error once the clock
    /// reaches this tick
    pub fail_measure_at: Option<u64>,
}

impl StubState {
    /// Queue status bits handed out on the next measurements of a channel
    pub fn script(&mut self, channel: Channel, statuses: &[u32]) {
        self.scripted
            .entry(channel)
            .or_default()
            .extend(statuses.iter().copied());
    }

    /// Forget the call log and rewind the clock
    pub fn rewind(&mut self) {
        self.calls.clear();
        self.ticks = 0;
    }

    /// Index of the first call matching the predicate
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.iter().position(predicate)
    }
}

pub struct StubSmu {
    channels: BTreeMap<Channel, StubChannel>,
    setpoints: BTreeMap<Channel, f64>,
    outputs_on: BTreeSet<Channel>,
    state: Arc<Mutex<StubState>>,
}

impl StubSmu {
    pub fn new(channels: BTreeMap<Channel, StubChannel>) -> (Self, Arc<Mutex<StubState>>) {
        let state = Arc::new(Mutex::new(StubState::default()));
        (
            Self {
                channels,
                setpoints: BTreeMap::new(),
                outputs_on: BTreeSet::new(),
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

#[async_trait::async_trait]
impl Smu for StubSmu {
    async fn configure_dc(&mut self, setpoints: &BTreeMap<Channel, f64>) -> Result<()> {
        for (ch, v) in setpoints {
            self.setpoints.insert(*ch, *v);
        }
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::ConfigureDc(setpoints.clone()));
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
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::EnableOutput(on, channels.to_vec()));
        Ok(())
    }

    async fn measure(&mut self, channels: &[Channel]) -> Result<Batch> {
        tokio::time::sleep(INTEGRATION_DELAY).await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Measure(channels.to_vec()));
        state.ticks += 1;
        if let Some(fail_at) = state.fail_measure_at
            && state.ticks >= fail_at
        {
            return Err(heliotrack::HeliotrackError::driver(
                "stub transport failure",
            ));
        }
        let t = state.ticks as f64 * TICK_S;

        let mut out = Batch::new();
        for ch in channels {
            let status = state
                .scripted
                .get_mut(ch)
                .and_then(|queue| queue.pop_front())
                .map(Status)
                .unwrap_or(Status::OK);
            let Some(model) = self.channels.get(ch).copied() else {
                continue;
            };
            let (v, i) = if self.outputs_on.contains(ch) {
                let v = self.setpoints.get(ch).copied().unwrap_or(0.0);
                (v, model.current(v))
            } else {
                (model.voc, 0.0)
            };
            out.insert(*ch, vec![Measurement { v, i, t, status }]);
        }
        Ok(out)
    }

    fn set_nplc(&mut self, nplc: f64) {
        self.state.lock().unwrap().calls.push(Call::SetNplc(nplc));
    }

    async fn set_current_limit(&mut self, amps: f64) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::SetCurrentLimit(amps));
        Ok(())
    }
}

/// A pixel map over the given channels with generated device labels
pub fn pixels(channels: &[Channel]) -> BTreeMap<Channel, Pixel> {
    channels
        .iter()
        .map(|ch| {
            (
                *ch,
                Pixel {
                    device_label: format!("a1_d{}", ch + 1),
                    area_m2: 1e-5,
                },
            )
        })
        .collect()
}
