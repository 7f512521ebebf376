//! Bounded handoff of filled command buffers from the front end to the
//! render thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use tessera_core::constants::HANDOFF_CAPACITY;

struct Queue<T> {
    buffers: VecDeque<T>,
    shutdown: bool,
}

/// A double buffer: the producer blocks while both slots are full, the
/// consumer blocks while both are empty.
pub struct Handoff<T> {
    queue: Mutex<Queue<T>>,
    ready: Condvar,
    space: Condvar,
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                buffers: VecDeque::with_capacity(HANDOFF_CAPACITY),
                shutdown: false,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        // a panicking holder leaves the queue itself consistent
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a buffer, waiting for a free slot. Returns the buffer back
    /// once the handoff has been shut down.
    pub fn publish(&self, buffer: T) -> Result<(), T> {
        let mut queue = self.lock();
        while queue.buffers.len() >= HANDOFF_CAPACITY && !queue.shutdown {
            queue = self.space.wait(queue).unwrap_or_else(|e| e.into_inner());
        }
        if queue.shutdown {
            return Err(buffer);
        }
        queue.buffers.push_back(buffer);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    /// Next buffer in publish order. `None` once shut down and drained.
    pub fn next(&self) -> Option<T> {
        let mut queue = self.lock();
        loop {
            if let Some(buffer) = queue.buffers.pop_front() {
                drop(queue);
                self.space.notify_one();
                return Some(buffer);
            }
            if queue.shutdown {
                return None;
            }
            queue = self.ready.wait(queue).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Take a buffer without waiting.
    pub fn try_next(&self) -> Option<T> {
        let buffer = self.lock().buffers.pop_front();
        if buffer.is_some() {
            self.space.notify_one();
        }
        buffer
    }

    /// Wake both sides. Queued buffers are still delivered.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        log::debug!("render handoff shut down");
        self.ready.notify_all();
        self.space.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_delivers_in_order_then_none() {
        let handoff = Handoff::new();
        handoff.publish(1).unwrap();
        handoff.publish(2).unwrap();
        assert_eq!(handoff.pending(), 2);
        handoff.shutdown();
        assert_eq!(handoff.next(), Some(1));
        assert_eq!(handoff.next(), Some(2));
        assert_eq!(handoff.next(), None);
    }

    #[test]
    fn test_publish_after_shutdown_returns_buffer() {
        let handoff = Handoff::new();
        handoff.shutdown();
        assert_eq!(handoff.publish(7), Err(7));
        assert!(handoff.is_shut_down());
    }

    #[test]
    fn test_try_next_does_not_wait() {
        let handoff: Handoff<u32> = Handoff::new();
        assert_eq!(handoff.try_next(), None);
        handoff.publish(3).unwrap();
        assert_eq!(handoff.try_next(), Some(3));
    }

    #[test]
    fn test_producer_blocks_at_capacity() {
        let handoff = Arc::new(Handoff::new());
        let producer = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || {
                for frame in 0..10u32 {
                    handoff.publish(frame).unwrap();
                    assert!(handoff.pending() <= HANDOFF_CAPACITY);
                }
                handoff.shutdown();
            })
        };
        let mut seen = Vec::new();
        while let Some(frame) = handoff.next() {
            seen.push(frame);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_wakes_waiting_consumer() {
        let handoff: Arc<Handoff<u32>> = Arc::new(Handoff::new());
        let consumer = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.next())
        };
        handoff.shutdown();
        assert_eq!(consumer.join().unwrap(), None);
    }
}
