//! Disk Queue Module
//!
//! Per-component request scheduling.
//!
//! ```text
//!   caller (DAG engine)
//!          │ enqueue / promote
//!          ▼
//! ┌─────────────────────────────┐        dispatch        ┌──────────────┐
//! │          DiskQueue          │ ─────────────────────▶ │ device layer │
//! │  locking protocol, bounds   │                        │              │
//! │  ┌───────────────────────┐  │ ◀───────────────────── │              │
//! │  │ QueueingDiscipline    │  │      on_completion     └──────────────┘
//! │  │ fifo/sstf/scan/cscan  │  │
//! │  └───────────────────────┘  │
//! └─────────────────────────────┘
//!          │ completion callback
//!          ▼
//!   caller regains the request
//! ```
//!
//! # Components
//!
//! - **Requests** (`request.rs`): [`DiskRequest`] and its attributes.
//! - **Disciplines** (`discipline/`): the [`QueueingDiscipline`] trait and
//!   its FIFO, SSTF, SCAN and C-SCAN implementations.
//! - **Slot pool** (`pool.rs`): fixed-capacity arena backing the seek
//!   disciplines.
//! - **Disk queue** (`disk_queue.rs`): [`DiskQueue`] and the
//!   [`DeviceDispatch`] seam.

pub mod discipline;
pub mod disk_queue;
pub mod pool;
pub mod request;

#[cfg(test)]
mod proptest;

pub use discipline::{DisciplineKind, QueueingDiscipline};
pub use disk_queue::{DeviceDispatch, DiskQueue, QueueStats};
pub use request::{CompletionFn, DiskRequest, IoKind, LockFlag, Priority};
