//! Sensor frame hand-off between the driver callback and the processing thread
//!
//! The driver's callback thread must never stall, so `push` is non-blocking:
//! when the queue is full the oldest unread frame is evicted to make room for
//! the newest one. The processing thread may fall behind and silently lose
//! frames under load; the loss is visible only through the high-water mark
//! and the dropped-frame counter.
//!
//! ```text
//! driver callback ──push──▶ [ bounded(16) ] ──pop_blocking(timeout)──▶ processing thread
//!                    └─ full? evict oldest, retry
//! ```

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::types::{SensorFrame, FRAME_QUEUE_CAPACITY};

/// Bounded drop-oldest frame queue
///
/// Shared via `Arc` between the driver bridge (producer) and the
/// processing thread (consumer).
pub struct FrameQueue {
    tx: Sender<SensorFrame>,
    /// Consumer side; the producer also uses it to evict the oldest frame
    rx: Receiver<SensorFrame>,
    capacity: usize,
    /// Deepest the queue has been since the last `take_max_recent_size`
    max_recent_size: AtomicUsize,
    /// Frames evicted because the consumer fell behind
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            max_recent_size: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame without blocking
    ///
    /// If the queue is full the oldest unread frame is discarded.
    pub fn push(&self, frame: SensorFrame) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => break,
                Err(TrySendError::Full(returned)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = returned;
                }
                // Unreachable while we hold `rx`, but never block or panic here
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        self.max_recent_size
            .fetch_max(self.tx.len(), Ordering::Relaxed);
    }

    /// Wait up to `timeout` for the next frame
    pub fn pop_blocking(&self, timeout: Duration) -> Option<SensorFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take the next frame if one is waiting
    pub fn try_pop(&self) -> Option<SensorFrame> {
        self.rx.try_recv().ok()
    }

    /// Frames currently waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// High-water mark since the last reset
    pub fn max_recent_size(&self) -> usize {
        self.max_recent_size.load(Ordering::Relaxed)
    }

    /// Read and reset the high-water mark
    pub fn take_max_recent_size(&self) -> usize {
        self.max_recent_size.swap(0, Ordering::Relaxed)
    }

    /// Total frames evicted since creation
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard every waiting frame
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(FRAME_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(value: f32) -> SensorFrame {
        SensorFrame::filled(4, 2, value)
    }

    #[test]
    fn test_sixteen_identical_frames_fill_to_capacity() {
        let queue = FrameQueue::default();
        for _ in 0..16 {
            queue.push(frame(0.25));
            assert!(queue.len() <= 16);
        }
        assert_eq!(queue.len(), 16);
        assert_eq!(queue.max_recent_size(), 16);
        assert_eq!(queue.dropped_frames(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = FrameQueue::new(16);
        for i in 0..40 {
            queue.push(frame(i as f32));
            assert!(queue.len() <= 16);
        }

        assert_eq!(queue.max_recent_size(), 16);
        assert_eq!(queue.dropped_frames(), 24);

        let drained: Vec<f32> = std::iter::from_fn(|| queue.try_pop())
            .map(|f| f.get(0, 0))
            .collect();
        assert_eq!(drained.len(), 16);
        assert_eq!(drained.first(), Some(&24.0));
        assert_eq!(drained.last(), Some(&39.0));
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = FrameQueue::default();
        let start = Instant::now();
        assert!(queue.pop_blocking(Duration::from_millis(10)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_take_max_recent_size_resets() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1.0));
        queue.push(frame(2.0));
        assert_eq!(queue.take_max_recent_size(), 2);
        assert_eq!(queue.max_recent_size(), 0);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_consumer_eventually_sees_newest_frame() {
        let queue = Arc::new(FrameQueue::new(16));
        let producer_queue = queue.clone();
        const LAST: usize = 5000;

        let producer = thread::spawn(move || {
            for i in 0..=LAST {
                producer_queue.push(frame(i as f32));
            }
        });

        let mut previous = -1.0f32;
        loop {
            let Some(f) = queue.pop_blocking(Duration::from_secs(2)) else {
                panic!("consumer starved before seeing the newest frame");
            };
            let value = f.get(0, 0);
            // Order is preserved even when frames are dropped
            assert!(value > previous);
            previous = value;
            if value as usize == LAST {
                break;
            }
        }

        producer.join().unwrap();
        assert!(queue.max_recent_size() <= 16);
    }
}
