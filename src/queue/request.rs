//! Disk Requests
//!
//! A [`DiskRequest`] describes one pending operation against one component
//! disk. It is built by the caller, owned by the [`DiskQueue`] until it is
//! dispatched, owned by the device layer until it completes, and handed back
//! to the caller through its completion callback.
//!
//! [`DiskQueue`]: super::DiskQueue

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IoStatus;

/// Callback invoked once when the device layer finishes a request.
///
/// The request itself is passed back so the caller regains its buffer.
pub type CompletionFn = Box<dyn FnOnce(DiskRequest, IoStatus) + Send>;

// =============================================================================
// Request Attributes
// =============================================================================

/// Kind of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoKind {
    Read,
    Write,
    /// Transfers nothing; forces a dispatch point (usually an unlock).
    NoOp,
}

impl fmt::Display for IoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoKind::Read => write!(f, "read"),
            IoKind::Write => write!(f, "write"),
            IoKind::NoOp => write!(f, "noop"),
        }
    }
}

/// Request priority. `Low` sorts below `Normal`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
}

/// Participation of a request in the queue locking protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockFlag {
    #[default]
    None,
    /// Locks the queue when dispatched.
    Locking,
    /// Unlocks the queue when it completes.
    Unlocking,
}

// =============================================================================
// DiskRequest
// =============================================================================

/// One pending operation against one component disk
pub struct DiskRequest {
    /// Operation kind
    pub kind: IoKind,

    /// First sector on the component disk
    pub sector_offset: u64,

    /// Number of sectors (0 for `NoOp`)
    pub sector_count: u64,

    /// Caller memory, moved along with the request
    pub buffer: Option<BytesMut>,

    /// Parity stripe this request belongs to
    pub parity_stripe_id: u64,

    /// Reconstruction unit this request belongs to
    pub reconstruction_unit: u64,

    /// Scheduling priority
    pub priority: Priority,

    /// Locking protocol role
    pub lock_flag: LockFlag,

    /// Caller tag, opaque to the queue
    pub tag: u64,

    completion: Option<CompletionFn>,
}

impl DiskRequest {
    /// Create a request for `sector_count` sectors starting at `sector_offset`.
    pub fn new(kind: IoKind, sector_offset: u64, sector_count: u64) -> Self {
        Self {
            kind,
            sector_offset,
            sector_count,
            buffer: None,
            parity_stripe_id: 0,
            reconstruction_unit: 0,
            priority: Priority::Normal,
            lock_flag: LockFlag::None,
            tag: 0,
            completion: None,
        }
    }

    pub fn read(sector_offset: u64, sector_count: u64) -> Self {
        Self::new(IoKind::Read, sector_offset, sector_count)
    }

    pub fn write(sector_offset: u64, sector_count: u64) -> Self {
        Self::new(IoKind::Write, sector_offset, sector_count)
    }

    /// A zero-length request positioned at `sector_offset`.
    pub fn noop(sector_offset: u64) -> Self {
        Self::new(IoKind::NoOp, sector_offset, 0)
    }

    pub fn with_buffer(mut self, buffer: BytesMut) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Correlate the request with its parity stripe and reconstruction unit.
    pub fn for_stripe(mut self, parity_stripe_id: u64, reconstruction_unit: u64) -> Self {
        self.parity_stripe_id = parity_stripe_id;
        self.reconstruction_unit = reconstruction_unit;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_lock(mut self, lock_flag: LockFlag) -> Self {
        self.lock_flag = lock_flag;
        self
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    /// Attach the completion callback.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(DiskRequest, IoStatus) + Send + 'static,
    {
        self.completion = Some(Box::new(f));
        self
    }

    pub fn is_locking(&self) -> bool {
        self.lock_flag == LockFlag::Locking
    }

    pub fn is_unlocking(&self) -> bool {
        self.lock_flag == LockFlag::Unlocking
    }

    /// Last sector touched, inclusive. Equal to `sector_offset` for `NoOp`.
    pub fn last_sector(&self) -> u64 {
        self.sector_offset + self.sector_count.saturating_sub(1)
    }

    /// Whether this request matches a promotion target.
    pub fn matches_unit(&self, parity_stripe_id: u64, reconstruction_unit: u64) -> bool {
        self.parity_stripe_id == parity_stripe_id
            && self.reconstruction_unit == reconstruction_unit
    }

    /// Hand the request back to its owner.
    ///
    /// Returns `false` if there was no callback (or it already ran).
    pub fn complete(mut self, status: IoStatus) -> bool {
        match self.completion.take() {
            Some(f) => {
                f(self, status);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DiskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskRequest")
            .field("kind", &self.kind)
            .field("sector_offset", &self.sector_offset)
            .field("sector_count", &self.sector_count)
            .field("buffer_len", &self.buffer.as_ref().map(|b| b.len()))
            .field("parity_stripe_id", &self.parity_stripe_id)
            .field("reconstruction_unit", &self.reconstruction_unit)
            .field("priority", &self.priority)
            .field("lock_flag", &self.lock_flag)
            .field("tag", &self.tag)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_builder_defaults() {
        let req = DiskRequest::read(128, 8);
        assert_eq!(req.kind, IoKind::Read);
        assert_eq!(req.priority, Priority::Normal);
        assert_eq!(req.lock_flag, LockFlag::None);
        assert_eq!(req.last_sector(), 135);
        assert!(req.buffer.is_none());
    }

    #[test]
    fn test_noop_has_no_length() {
        let req = DiskRequest::noop(42).with_lock(LockFlag::Unlocking);
        assert_eq!(req.sector_count, 0);
        assert_eq!(req.last_sector(), 42);
        assert!(req.is_unlocking());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_complete_runs_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let req = DiskRequest::write(0, 4)
            .with_buffer(BytesMut::from(&b"abcd"[..]))
            .on_complete(move |req, status| {
                assert!(status.is_err());
                assert_eq!(req.buffer.as_deref(), Some(&b"abcd"[..]));
                seen.fetch_add(1, Ordering::SeqCst);
            });

        assert!(req.complete(Err(Error::device(0, "bad sector"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_complete_without_callback() {
        assert!(!DiskRequest::read(0, 1).complete(Ok(())));
    }

    #[test]
    fn test_matches_unit() {
        let req = DiskRequest::read(0, 1).for_stripe(7, 3);
        assert!(req.matches_unit(7, 3));
        assert!(!req.matches_unit(7, 4));
    }
}
