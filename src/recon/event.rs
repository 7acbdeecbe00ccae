//! Reconstruction Events
//!
//! Hand-off of typed events from any number of producers (disk completions,
//! other reconstruction threads) to the single thread driving
//! reconstruction.
//!
//! Events are delivered in the order they were posted (FIFO). The consumer
//! blocks on a condition variable with a bounded wait so it can re-check
//! other state while no event is pending.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::ReconConfig;
use crate::error::{Error, Result};

// =============================================================================
// Event Types
// =============================================================================

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconEventKind {
    /// A reconstruction read finished
    ReadDone,
    /// A reconstruction write finished
    WriteDone,
    /// A read issued out of turn (e.g. for a promoted user access) finished
    ForcedReadDone,
    /// A buffer filled and is ready to be written
    BufReady,
    /// A buffer was released
    BufClear,
    /// A blocked unit may proceed
    BlockClear,
    /// The head-separation limit no longer blocks a disk
    HeadSepClear,
    /// A disk has nothing to read in the current unit
    Skip,
    /// The spare table changed
    SpareTableUpdate,
    /// A reconstruction unit finished
    UnitReconstructed,
    /// A reconstruction step failed
    StepFailed,
}

/// Coarse grouping of [`ReconEventKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconEventCategory {
    /// A disk is free for more reconstruction work
    DiskIdle,
    /// Buffer space was freed or filled
    BufferClear,
    /// Control-path notification
    Control,
}

impl ReconEventKind {
    pub fn category(&self) -> ReconEventCategory {
        match self {
            ReconEventKind::ReadDone
            | ReconEventKind::WriteDone
            | ReconEventKind::ForcedReadDone
            | ReconEventKind::Skip => ReconEventCategory::DiskIdle,
            ReconEventKind::BufReady
            | ReconEventKind::BufClear
            | ReconEventKind::BlockClear
            | ReconEventKind::HeadSepClear => ReconEventCategory::BufferClear,
            ReconEventKind::SpareTableUpdate
            | ReconEventKind::UnitReconstructed
            | ReconEventKind::StepFailed => ReconEventCategory::Control,
        }
    }
}

/// One event for the control thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconEvent {
    /// Column the event originated from
    pub column: usize,
    /// Producer-defined argument, usually a reconstruction unit
    pub payload: u64,
    pub kind: ReconEventKind,
}

impl ReconEvent {
    pub fn new(column: usize, kind: ReconEventKind, payload: u64) -> Self {
        Self {
            column,
            payload,
            kind,
        }
    }

    pub fn category(&self) -> ReconEventCategory {
        self.kind.category()
    }
}

// =============================================================================
// Yield Pacing
// =============================================================================

/// Cooperative yield policy for the control loop.
///
/// The loop calls [`YieldPacer::checkpoint`] after each event. Once the loop
/// has run for longer than `budget` without blocking, the checkpoint sleeps
/// for `pause` and starts a new window.
#[derive(Debug, Clone)]
pub struct YieldPacer {
    budget: Duration,
    pause: Duration,
    window_start: Instant,
    yields: u64,
}

impl YieldPacer {
    pub fn new(budget: Duration, pause: Duration) -> Self {
        Self {
            budget,
            pause,
            window_start: Instant::now(),
            yields: 0,
        }
    }

    pub fn from_config(config: &ReconConfig) -> Self {
        Self::new(config.yield_budget, config.yield_pause)
    }

    /// The loop just blocked; start a new window.
    pub fn reset(&mut self) {
        self.window_start = Instant::now();
    }

    /// Yield if the budget is spent. Returns whether it yielded.
    pub fn checkpoint(&mut self) -> bool {
        if self.window_start.elapsed() < self.budget {
            return false;
        }
        trace!(pause_us = self.pause.as_micros() as u64, "Control loop yielding");
        std::thread::sleep(self.pause);
        self.yields += 1;
        self.reset();
        true
    }

    /// Number of times the loop yielded
    pub fn yields(&self) -> u64 {
        self.yields
    }
}

// =============================================================================
// Channel
// =============================================================================

type Continuation = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ChannelState {
    events: VecDeque<ReconEvent>,
    continuation: Option<Continuation>,
    closed: bool,
    posted: u64,
}

/// Blocking multi-producer, single-consumer event hand-off
#[derive(Default)]
pub struct ReconEventChannel {
    state: Mutex<ChannelState>,
    ready: Condvar,
}

impl ReconEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and wake the consumer.
    pub fn post(&self, event: ReconEvent) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ChannelClosed);
        }
        trace!(column = event.column, kind = ?event.kind, payload = event.payload, "Posting event");
        state.events.push_back(event);
        state.posted += 1;
        drop(state);

        self.ready.notify_one();
        Ok(())
    }

    /// Take the oldest event, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` when the wait times out, and
    /// [`Error::ChannelClosed`] once the channel is closed and empty.
    pub fn take_next(&self, timeout: Duration) -> Result<Option<ReconEvent>> {
        self.take(timeout).map(|(event, _)| event)
    }

    /// [`take_next`](Self::take_next) for a paced control loop: restarts the
    /// pacer's window if the call actually had to block.
    pub fn take_next_paced(
        &self,
        timeout: Duration,
        pacer: &mut YieldPacer,
    ) -> Result<Option<ReconEvent>> {
        let (event, blocked) = self.take(timeout)?;
        if blocked {
            pacer.reset();
        }
        Ok(event)
    }

    fn take(&self, timeout: Duration) -> Result<(Option<ReconEvent>, bool)> {
        // No representable deadline means wait until posted or closed
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let mut blocked = false;

        loop {
            if let Some(event) = state.events.pop_front() {
                return Ok((Some(event), blocked));
            }
            if state.closed {
                return Err(Error::ChannelClosed);
            }
            blocked = true;
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return Ok((state.events.pop_front(), blocked));
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Store the callback that resumes a suspended control loop.
    pub fn set_continuation<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.state.lock().continuation = Some(Arc::new(f));
    }

    pub fn clear_continuation(&self) {
        self.state.lock().continuation = None;
    }

    /// Invoke the stored continuation, if any. Runs outside the channel lock.
    pub fn resume(&self) -> bool {
        let continuation = self.state.lock().continuation.clone();
        match continuation {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    /// Remove every pending event.
    pub fn drain(&self) -> Vec<ReconEvent> {
        let events: Vec<ReconEvent> = self.state.lock().events.drain(..).collect();
        if !events.is_empty() {
            debug!(count = events.len(), "Drained reconstruction events");
        }
        events
    }

    /// Refuse further posts and wake the consumer. Pending events can still
    /// be taken.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events posted over the channel's lifetime
    pub fn posted(&self) -> u64 {
        self.state.lock().posted
    }
}

impl fmt::Debug for ReconEventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReconEventChannel")
            .field("pending", &state.events.len())
            .field("posted", &state.posted)
            .field("closed", &state.closed)
            .field("continuation", &state.continuation.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn event(column: usize, payload: u64) -> ReconEvent {
        ReconEvent::new(column, ReconEventKind::ReadDone, payload)
    }

    #[test]
    fn test_fifo_delivery() {
        let channel = ReconEventChannel::new();
        for i in 0..3 {
            channel.post(event(i, i as u64)).unwrap();
        }

        let order: Vec<u64> = (0..3)
            .map(|_| channel.take_next(Duration::ZERO).unwrap().unwrap().payload)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_take_times_out() {
        let channel = ReconEventChannel::new();
        let start = Instant::now();
        assert_eq!(channel.take_next(Duration::from_millis(20)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_consumer_wakes_on_post() {
        let channel = Arc::new(ReconEventChannel::new());
        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                channel.post(event(2, 7)).unwrap();
            })
        };

        let got = channel.take_next(Duration::from_secs(5)).unwrap();
        assert_eq!(got, Some(event(2, 7)));
        producer.join().unwrap();
    }

    #[test]
    fn test_many_producers() {
        let channel = Arc::new(ReconEventChannel::new());
        let producers: Vec<_> = (0..4usize)
            .map(|column| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 0..100u64 {
                        channel.post(event(column, i)).unwrap();
                    }
                })
            })
            .collect();

        let mut last_seen = [None::<u64>; 4];
        let mut received = 0;
        while received < 400 {
            let ev = channel
                .take_next(Duration::from_secs(5))
                .unwrap()
                .expect("producers stalled");
            // Per-producer order is preserved
            if let Some(prev) = last_seen[ev.column] {
                assert!(ev.payload > prev);
            }
            last_seen[ev.column] = Some(ev.payload);
            received += 1;
        }

        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(channel.posted(), 400);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_close_and_drain() {
        let channel = ReconEventChannel::new();
        channel.post(event(0, 1)).unwrap();
        channel.post(event(0, 2)).unwrap();
        channel.close();

        assert_matches!(channel.post(event(0, 3)), Err(Error::ChannelClosed));
        assert_eq!(channel.take_next(Duration::ZERO).unwrap(), Some(event(0, 1)));
        assert_eq!(channel.drain(), vec![event(0, 2)]);
        assert_matches!(channel.take_next(Duration::from_secs(1)), Err(Error::ChannelClosed));
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let channel = Arc::new(ReconEventChannel::new());
        let closer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                channel.close();
            })
        };

        assert_matches!(channel.take_next(Duration::from_secs(5)), Err(Error::ChannelClosed));
        closer.join().unwrap();
    }

    #[test]
    fn test_unbounded_wait_ends_on_close() {
        let channel = Arc::new(ReconEventChannel::new());
        let consumer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.take_next(Duration::MAX))
        };

        thread::sleep(Duration::from_millis(10));
        assert!(!channel.is_closed());
        channel.close();
        assert!(channel.is_closed());

        let outcome = consumer.join().expect("consumer panicked");
        assert_matches!(outcome, Err(Error::ChannelClosed));
    }

    #[test]
    fn test_unbounded_wait_ends_on_post() {
        let channel = Arc::new(ReconEventChannel::new());
        let consumer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                let mut pacer = YieldPacer::new(Duration::from_secs(1), Duration::ZERO);
                channel.take_next_paced(Duration::MAX, &mut pacer)
            })
        };

        thread::sleep(Duration::from_millis(10));
        channel.post(event(1, 9)).unwrap();

        let outcome = consumer.join().expect("consumer panicked");
        assert_eq!(outcome.unwrap(), Some(event(1, 9)));
    }

    #[test]
    fn test_continuation() {
        let channel = ReconEventChannel::new();
        assert!(!channel.resume());

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        channel.set_continuation(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(channel.resume());
        assert!(channel.resume());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        channel.clear_continuation();
        assert!(!channel.resume());
    }

    #[test]
    fn test_kind_categories() {
        assert_eq!(ReconEventKind::ReadDone.category(), ReconEventCategory::DiskIdle);
        assert_eq!(ReconEventKind::Skip.category(), ReconEventCategory::DiskIdle);
        assert_eq!(ReconEventKind::BufClear.category(), ReconEventCategory::BufferClear);
        assert_eq!(
            ReconEventKind::SpareTableUpdate.category(),
            ReconEventCategory::Control
        );
        assert_eq!(event(0, 0).category(), ReconEventCategory::DiskIdle);
    }

    #[test]
    fn test_pacer_yields_after_budget() {
        let mut pacer = YieldPacer::new(Duration::from_millis(5), Duration::from_millis(1));
        assert!(!pacer.checkpoint());

        thread::sleep(Duration::from_millis(6));
        assert!(pacer.checkpoint());
        assert_eq!(pacer.yields(), 1);
        // New window
        assert!(!pacer.checkpoint());
    }

    #[test]
    fn test_blocking_take_resets_pacer() {
        let channel = ReconEventChannel::new();
        let mut pacer = YieldPacer::new(Duration::from_millis(5), Duration::ZERO);

        thread::sleep(Duration::from_millis(6));
        assert_eq!(
            channel
                .take_next_paced(Duration::from_millis(1), &mut pacer)
                .unwrap(),
            None
        );
        assert!(!pacer.checkpoint());
        assert_eq!(pacer.yields(), 0);
    }
}
