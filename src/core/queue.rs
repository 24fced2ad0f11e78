//! Thread-Safe Double-Ended Queue
//!
//! Semua operasi lewat satu lock. Consumer bisa tidur di `wait()` sampai
//! ada item, tidak perlu busy-poll.
//!
//! Dipakai di dua tempat:
//! - Outbound queue private milik setiap connection
//! - Inbound queue yang di-share oleh semua connection milik satu server

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Lock-protected deque dengan blocking wait
///
/// Item di-move keluar saat pop, tidak pernah diduplikasi.
/// Pop pada queue kosong mengembalikan `None` (tidak block).
pub struct TsQueue<T> {
    deque: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    /// Tambah item di belakang, bangunkan satu waiter
    pub fn push_back(&self, item: T) {
        self.deque.lock().push_back(item);
        self.ready.notify_one();
    }

    /// Tambah item di depan, bangunkan satu waiter
    pub fn push_front(&self, item: T) {
        self.deque.lock().push_front(item);
        self.ready.notify_one();
    }

    /// Ambil item dari depan
    #[inline]
    pub fn pop_front(&self) -> Option<T> {
        self.deque.lock().pop_front()
    }

    /// Ambil item dari belakang
    #[inline]
    pub fn pop_back(&self) -> Option<T> {
        self.deque.lock().pop_back()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.lock().is_empty()
    }

    /// Jumlah item dalam queue
    #[inline]
    pub fn len(&self) -> usize {
        self.deque.lock().len()
    }

    /// Buang semua item (dipakai saat teardown)
    pub fn clear(&self) {
        // Drop di luar lock supaya destructor item tidak jalan sambil pegang mutex
        let drained = std::mem::take(&mut *self.deque.lock());
        drop(drained);
    }

    /// Tidur sampai queue berisi minimal satu item
    pub fn wait(&self) {
        let mut deque = self.deque.lock();
        while deque.is_empty() {
            self.ready.wait(&mut deque);
        }
    }

    /// Seperti `wait()` tapi dengan batas waktu.
    ///
    /// Returns `true` jika queue berisi item saat kembali.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut deque = self.deque.lock();
        while deque.is_empty() {
            if self.ready.wait_until(&mut deque, deadline).timed_out() {
                return !deque.is_empty();
            }
        }
        true
    }
}

impl<T: Clone> TsQueue<T> {
    /// Peek item terdepan (clone, item tetap di queue)
    pub fn front(&self) -> Option<T> {
        self.deque.lock().front().cloned()
    }

    /// Peek item paling belakang
    pub fn back(&self) -> Option<T> {
        self.deque.lock().back().cloned()
    }
}

impl<T> std::fmt::Debug for TsQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = TsQueue::new();
        assert!(q.is_empty());

        q.push_back(1);
        q.push_back(2);
        q.push_back(3);
        assert_eq!(q.len(), 3);

        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn test_both_ends() {
        let q = TsQueue::new();
        q.push_back(2);
        q.push_front(1);
        q.push_back(3);

        assert_eq!(q.front(), Some(1));
        assert_eq!(q.back(), Some(3));
        assert_eq!(q.len(), 3); // Peek tidak mengubah isi

        assert_eq!(q.pop_back(), Some(3));
        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_back(), Some(2));
        assert_eq!(q.pop_back(), None);
        assert_eq!(q.front(), None);
    }

    #[test]
    fn test_clear_releases_items() {
        let item = Arc::new(7u32);
        let q = TsQueue::new();
        q.push_back(Arc::clone(&item));
        q.push_back(Arc::clone(&item));
        assert_eq!(Arc::strong_count(&item), 3);

        q.clear();
        assert!(q.is_empty());
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn test_many_producers_one_consumer() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 1000;

        let q = Arc::new(TsQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push_back(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let mut seen = Vec::with_capacity((PRODUCERS * PER_PRODUCER) as usize);
        while seen.len() < (PRODUCERS * PER_PRODUCER) as usize {
            if !q.wait_timeout(Duration::from_secs(5)) {
                panic!("producers stalled after {} items", seen.len());
            }
            while let Some(v) = q.pop_front() {
                seen.push(v);
            }
        }

        for h in handles {
            h.join().unwrap();
        }

        seen.sort_unstable();
        let expected: Vec<u64> = (0..PRODUCERS * PER_PRODUCER).collect();
        assert_eq!(seen, expected);
        assert!(q.is_empty());
    }

    #[test]
    fn test_wait_wakes_on_push() {
        let q = Arc::new(TsQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                q.wait();
                q.pop_front()
            })
        };

        thread::sleep(Duration::from_millis(20));
        q.push_back("hello");
        assert_eq!(consumer.join().unwrap(), Some("hello"));
    }

    #[test]
    fn test_wait_timeout_on_empty() {
        let q: TsQueue<u8> = TsQueue::new();
        assert!(!q.wait_timeout(Duration::from_millis(10)));

        q.push_back(1);
        assert!(q.wait_timeout(Duration::from_millis(10)));
    }
}
