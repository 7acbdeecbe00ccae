//! Simulation Module
//!
//! In-memory disks and a rebuild driver for exercising the queues and the
//! reconstruction bookkeeping without real hardware.
//!
//! # Components
//!
//! - **Devices** (`device.rs`): [`SimulatedDisk`] with a worker thread per
//!   disk, and [`ManualDevice`] for step-by-step tests.
//! - **Rebuild** (`rebuild.rs`): [`RebuildSimulation`], a mirror-copy
//!   rebuild of one failed column onto a spare.

pub mod device;
pub mod rebuild;

pub use device::{DeviceStats, ManualDevice, SimDiskConfig, SimulatedDisk};
pub use rebuild::{ForegroundStats, RebuildReport, RebuildSimulation, SimConfig};
