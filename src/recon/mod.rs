//! Reconstruction Module
//!
//! Bookkeeping for rebuilding a failed disk onto spare space.
//!
//! ```text
//!  disk completions ──post──▶ ┌───────────────────┐ ──take_next──▶ control loop
//!  other threads    ──post──▶ │ ReconEventChannel │                    │
//!                             └───────────────────┘                    │ mark_reconstructed
//!                                                                      ▼
//!  user I/O path ──is_fully_reconstructed──────────────────▶ ┌───────────────────┐
//!                                                            │ ReconstructionMap │
//!                                                            └───────────────────┘
//! ```
//!
//! # Components
//!
//! - **Map** (`map.rs`): per-unit record of which sectors have been rebuilt.
//! - **Events** (`event.rs`): typed events from producers to the control
//!   loop, plus the [`YieldPacer`] that keeps the loop from starving others.

pub mod event;
pub mod map;

#[cfg(test)]
mod proptest;

pub use event::{ReconEvent, ReconEventCategory, ReconEventChannel, ReconEventKind, YieldPacer};
pub use map::{ReconMapStatus, ReconstructionMap, RuState, SectorRange};
