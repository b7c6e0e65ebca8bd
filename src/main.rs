use anyhow::Result;
use heliotrack::config::Config;
use heliotrack::smu::sim::{SimChannel, SimSmu};
use heliotrack::smu::Pixel;
use heliotrack::tracker::MpptCore;
use std::collections::BTreeMap;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?,
        None => Config::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?,
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    heliotrack::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Heliotrack MPPT core {} starting up",
        env!("CARGO_PKG_VERSION")
    );

    // Demo run against the built-in simulator: one SMU board, two pixels
    let mut channels = BTreeMap::new();
    channels.insert(0, SimChannel::small_cell());
    channels.insert(
        1,
        SimChannel {
            voc: 0.71,
            isc: 0.018,
            n_vt: 0.05,
        },
    );
    let smu = SimSmu::new(channels).with_noise(1e-5);

    let mut pixels = BTreeMap::new();
    pixels.insert(
        0,
        Pixel {
            device_label: "a1_d1".to_string(),
            area_m2: 1e-5,
        },
    );
    pixels.insert(
        1,
        Pixel {
            device_label: "a1_d2".to_string(),
            area_m2: 1e-5,
        },
    );

    let mut core = MpptCore::new(
        Box::new(smu),
        config.limits.absolute_current_limit,
        None,
    );

    match core.launch_tracker(&config.tracker, &pixels, None).await {
        Ok(output) => {
            for (channel, trace) in &output.traces {
                let vmpp = core.reference(*channel).and_then(|r| r.vmpp);
                let impp = core.reference(*channel).and_then(|r| r.impp);
                info!(
                    "Channel {}: {} points, V_mpp = {:?} [V], I_mpp = {:?} [A]",
                    channel,
                    trace.len(),
                    vmpp,
                    impp
                );
            }
            info!("Tracking run complete");
            Ok(())
        }
        Err(e) => {
            error!("Tracking run failed: {}", e);
            Err(anyhow::anyhow!("Tracker error: {}", e))
        }
    }
}
