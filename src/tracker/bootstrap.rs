//! Seed & bootstrap: initial conditions before any algorithm iteration
//!
//! When no IV sweep has been registered, the tracker has to learn V_oc by
//! itself and guess a starting point for V_mpp. The quadrant lock for the
//! whole run is derived here from the sign of the first channel's V_oc.

use crate::error::Result;
use crate::tracker::{MpptCore, VoltageLock};
use std::collections::BTreeMap;

use super::runner::RunState;

impl MpptCore {
    /// Establish V_oc, V_mpp, and the voltage quadrant lock, then bring the
    /// outputs up at the seeded maximum power point.
    ///
    /// Precondition (asserted, not checked at runtime): all channels of one
    /// run share the same power quadrant.
    pub(crate) async fn seed_and_bootstrap(
        &mut self,
        run: &mut RunState<'_>,
        voc_compliance: f64,
        i_limit: f64,
    ) -> Result<()> {
        let channels = run.channels();

        let missing_voc = channels
            .iter()
            .any(|ch| self.reference.get(ch).and_then(|r| r.voc).is_none());

        if missing_voc {
            // High-impedance probe: outputs off, dedicated compliance
            self.smu.enable_output(false, &channels).await?;
            self.smu.set_current_limit(voc_compliance).await?;
            let ssvocs = self.smu.measure(&channels).await?;
            for (ch, records) in &ssvocs {
                if let Some(last) = records.last() {
                    self.reference.entry(*ch).or_default().voc = Some(last.v);
                }
            }
            self.smu.set_current_limit(i_limit).await?;

            let voc_by_channel: BTreeMap<_, _> = channels
                .iter()
                .filter_map(|ch| {
                    self.reference
                        .get(ch)
                        .and_then(|r| r.voc)
                        .map(|voc| (*ch, voc))
                })
                .collect();
            self.logger.info(&format!(
                "Probed V_oc = {:?} [V] since no prior voltage info was given",
                voc_by_channel
            ));
            run.ssvocs = ssvocs;
        }

        // Start at 70% of V_oc unless a registered sweep taught us better
        let mut seeded = false;
        for ch in &channels {
            let reference = self.reference.entry(*ch).or_default();
            if reference.vmpp.is_none()
                && let Some(voc) = reference.voc
            {
                reference.vmpp = Some(0.7 * voc);
                seeded = true;
            }
        }
        if seeded {
            self.logger
                .info("Assuming V_mpp = 0.7 * V_oc since no prior mpp info was given");
        }

        let mut setpoints = BTreeMap::new();
        for ch in &channels {
            if let Some(vmpp) = self.reference.get(ch).and_then(|r| r.vmpp) {
                setpoints.insert(*ch, vmpp);
            }
        }
        self.smu.configure_dc(&setpoints).await?;
        self.logger
            .info(&format!("Launch tracker channels: {:?}", channels));
        self.smu.enable_output(true, &channels).await?;

        // The run is locked to the first channel's power quadrant
        let first_voc = channels
            .first()
            .and_then(|ch| self.reference.get(ch).and_then(|r| r.voc))
            .unwrap_or(0.0);
        run.lock = VoltageLock::from_voc(first_voc);
        debug_assert!(
            channels.iter().all(|ch| {
                self.reference
                    .get(ch)
                    .and_then(|r| r.voc)
                    .is_none_or(|voc| VoltageLock::from_voc(voc) == run.lock)
            }),
            "all channels of one run must share a power quadrant"
        );

        Ok(())
    }
}
