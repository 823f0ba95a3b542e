// src/pool.rs
use crate::error::{EtudeError, EtudeResult};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// An item the queue refused. The caller gets it back untouched.
pub struct QueueFull<T>(pub T);

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> From<QueueFull<T>> for EtudeError {
    fn from(_: QueueFull<T>) -> Self {
        EtudeError::QueueFull
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded multi-producer multi-consumer queue.
pub struct ReadyQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> ReadyQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append without blocking. A full or closed queue hands the item back.
    pub fn push(&self, item: T) -> Result<(), QueueFull<T>> {
        {
            let mut state = self.lock();
            if state.closed || state.items.len() >= self.capacity {
                return Err(QueueFull(item));
            }
            state.items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Block until an item is available. `None` once closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Refuse further pushes and wake every waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Fixed set of threads consuming a [`ReadyQueue`].
pub struct WorkerPool<T: Send + 'static> {
    queue: Arc<ReadyQueue<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `workers` threads, each running `handler` on every item it pops.
    pub fn new<F>(workers: usize, capacity: usize, handler: F) -> EtudeResult<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if workers == 0 {
            return Err(EtudeError::InvalidConfig(
                "worker pool needs at least one thread".into(),
            ));
        }
        if capacity == 0 {
            return Err(EtudeError::InvalidConfig(
                "ready queue needs a nonzero capacity".into(),
            ));
        }

        let queue = Arc::new(ReadyQueue::new(capacity));
        let handler = Arc::new(handler);
        let mut pool = WorkerPool {
            queue,
            workers: Vec::with_capacity(workers),
        };

        for i in 0..workers {
            let queue = Arc::clone(&pool.queue);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("etude-worker-{}", i))
                .spawn(move || worker_loop(&queue, &*handler));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                // Dropping the pool closes the queue and joins what was started.
                Err(e) => return Err(EtudeError::WorkerSpawn(e)),
            }
        }

        tracing::debug!(workers, capacity, "worker pool started");
        Ok(pool)
    }

    pub fn enqueue(&self, item: T) -> Result<(), QueueFull<T>> {
        self.queue.push(item)
    }

    /// Items waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue, let the workers drain it, and join them.
    pub fn shutdown(&mut self) {
        self.queue.close();
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                tracing::error!(worker = ?name, "worker thread panicked");
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T, F>(queue: &ReadyQueue<T>, handler: &F)
where
    F: Fn(T),
{
    while let Some(item) = queue.pop() {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(item))).is_err() {
            tracing::error!("handler panicked; worker continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_queue_full_rejects_without_blocking() {
        let queue = ReadyQueue::new(2);
        assert_eq!(queue.capacity(), 2);
        assert!(queue.is_empty());
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let rejected = queue.push(3).unwrap_err();
        assert_eq!(rejected.0, 3);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(1));
        queue.push(4).unwrap();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(4));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_drains_then_ends() {
        let queue = ReadyQueue::new(4);
        queue.push("a").unwrap();
        queue.close();
        assert!(queue.push("b").is_err());
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let queue = Arc::new(ReadyQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(42).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_pool_processes_every_item() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut pool = WorkerPool::new(4, 128, move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(pool.workers(), 4);

        for _ in 0..100 {
            pool.enqueue(1).unwrap();
        }
        pool.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 100);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_pool_survives_panicking_handler() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new(1, 8, move |n: u32| {
            if n == 0 {
                panic!("boom");
            }
            let _ = tx.lock().unwrap().send(n);
        })
        .unwrap();

        pool.enqueue(0).unwrap();
        pool.enqueue(7).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));
    }

    #[test]
    fn test_worker_threads_are_named() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new(1, 8, move |_: ()| {
            let name = thread::current().name().map(str::to_owned);
            let _ = tx.lock().unwrap().send(name);
        })
        .unwrap();

        pool.enqueue(()).unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("etude-worker-0"));
    }

    #[test]
    fn test_pool_rejects_zero_sizes() {
        assert!(matches!(
            WorkerPool::new(0, 8, |_: u8| {}),
            Err(EtudeError::InvalidConfig(_))
        ));
        assert!(matches!(
            WorkerPool::new(2, 0, |_: u8| {}),
            Err(EtudeError::InvalidConfig(_))
        ));
    }
}
