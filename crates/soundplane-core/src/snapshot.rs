//! Copy-on-publish cells for observer-visible state
//!
//! The processing thread publishes a complete new value; observers get an
//! `Arc` to whichever value was current. Each cell has its own lock, held
//! only for the pointer swap or clone, so a reader can never see a torn grid
//! and never holds up the processing thread for longer than that swap.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Versioned, wholesale-replaced value
pub struct Snapshot<T> {
    value: Mutex<Arc<T>>,
    version: AtomicU64,
}

impl<T> Snapshot<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(Arc::new(initial)),
            version: AtomicU64::new(0),
        }
    }

    /// Replace the current value
    pub fn publish(&self, value: T) {
        self.publish_arc(Arc::new(value));
    }

    /// Replace the current value with an already shared one
    pub fn publish_arc(&self, value: Arc<T>) {
        let previous = {
            let mut slot = self.value.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *slot, value)
        };
        self.version.fetch_add(1, Ordering::Release);
        // Old value is released outside the lock
        drop(previous);
    }

    /// Current value
    pub fn load(&self) -> Arc<T> {
        self.value
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of publishes so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T: Clone> Snapshot<T> {
    /// Owned copy of the current value
    pub fn get(&self) -> T {
        (*self.load()).clone()
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Lock-free progress value in 0.0..=1.0
#[derive(Debug, Default)]
pub struct ProgressCell {
    bits: AtomicU32,
}

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, progress: f32) {
        self.bits
            .store(progress.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_publish_bumps_version() {
        let cell = Snapshot::new(vec![0u32; 4]);
        assert_eq!(cell.version(), 0);
        cell.publish(vec![1; 4]);
        cell.publish(vec![2; 4]);
        assert_eq!(cell.version(), 2);
        assert_eq!(cell.get(), vec![2; 4]);
    }

    #[test]
    fn test_reader_keeps_old_value_alive() {
        let cell = Snapshot::new(String::from("old"));
        let held = cell.load();
        cell.publish(String::from("new"));
        assert_eq!(*held, "old");
        assert_eq!(*cell.load(), "new");
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_values() {
        let cell = Arc::new(Snapshot::new(vec![0u32; 256]));
        let writer_cell = cell.clone();

        let writer = thread::spawn(move || {
            for i in 1..=2000u32 {
                writer_cell.publish(vec![i; 256]);
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let value = cell.load();
                        let first = value[0];
                        assert!(value.iter().all(|&v| v == first));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cell.load()[0], 2000);
    }

    #[test]
    fn test_progress_is_clamped() {
        let progress = ProgressCell::new();
        assert_eq!(progress.get(), 0.0);
        progress.set(0.25);
        assert_eq!(progress.get(), 0.25);
        progress.set(3.0);
        assert_eq!(progress.get(), 1.0);
    }
}
