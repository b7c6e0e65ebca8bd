//! # Heliotrack - Maximum Power Point Tracking Core
//!
//! A Rust implementation of the MPPT core of a multi-channel solar cell
//! characterization system. The core continuously adjusts the bias voltage
//! applied to photovoltaic devices under illumination to maximize the power
//! each device delivers, while enforcing hard safety limits against runaway
//! current and operation outside the power-generating quadrant.
//!
//! ## Features
//!
//! - **Two tracking algorithms**: gradient descent with momentum (with
//!   optional steady-state soaks) and angle-bounded perturb-and-observe
//! - **Multi-device coordination**: channels share one SMU; fault isolation
//!   does not disturb peers
//! - **Hard safety invariants**: overcurrent shutoff, quadrant locking,
//!   board-aware short-circuit detection
//! - **Seeding**: IV-curve inspection provides V_oc, I_sc, V_mpp, I_mpp and
//!   P_max; bootstrap probing fills the gaps when no sweep is available
//! - **Capability-based drivers**: the SMU is a trait, so transports and
//!   simulators plug in interchangeably
//!
//! ## Architecture
//!
//! The crate follows a modular architecture with clear separation of
//! concerns:
//!
//! - `config`: Configuration management and algorithm-string parsing
//! - `logging`: Structured logging and tracing
//! - `smu`: Measurement data model and the consumed SMU capability
//! - `telemetry`: Best-effort event sink for warnings
//! - `tracker`: Reference state, safety monitor, curve inspector, and the
//!   tracking algorithms

pub mod config;
pub mod error;
pub mod logging;
pub mod smu;
pub mod telemetry;
pub mod tracker;

// Re-export commonly used types
pub use config::Config;
pub use error::{HeliotrackError, Result};
pub use tracker::MpptCore;
