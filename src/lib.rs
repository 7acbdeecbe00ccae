//! RaidCore - Disk Queueing and Reconstruction Core for RAID Arrays
//!
//! Schedules requests to the component disks of an array and coordinates
//! the rebuild of a failed component onto spare space.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Request Engine                            │
//! └───────────┬──────────────────────────────────────▲───────────────┘
//!             │ enqueue / promote                    │ completion
//! ┌───────────▼──────────────┐              ┌────────┴───────────────┐
//! │  DiskQueue (per column)  │── dispatch ─▶│      device layer      │
//! │  locking, disciplines    │◀─ complete ──│                        │
//! └──────────────────────────┘              └────────────────────────┘
//!
//! ┌──────────────────────────┐   events    ┌────────────────────────┐
//! │  ReconEventChannel       │────────────▶│  reconstruction loop   │
//! └──────────────────────────┘             └───────────┬────────────┘
//!                                                      │ mark
//!                                          ┌───────────▼────────────┐
//!                                          │   ReconstructionMap    │
//!                                          └────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`queue`] - Per-disk queues, requests and queueing disciplines
//! - [`recon`] - Reconstruction map and event channel
//! - [`sim`] - Simulated disks and a rebuild driver
//! - [`config`] - Configuration
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod queue;
pub mod recon;
pub mod sim;

// Re-export commonly used types
pub use config::{CoreConfig, QueueConfig, ReconConfig};
pub use error::{Error, IoStatus, Result};
pub use queue::{
    DeviceDispatch, DisciplineKind, DiskQueue, DiskRequest, IoKind, LockFlag, Priority,
    QueueingDiscipline,
};
pub use recon::{ReconEvent, ReconEventChannel, ReconEventKind, ReconstructionMap, YieldPacer};
