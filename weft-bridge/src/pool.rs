//! Bounded reuse pool for high-churn scratch objects.
//!
//! The pool is not synchronized. It is bound to one [`ExecutionQueue`] and
//! must only be touched from tasks running on it; debug builds assert this.

use weft_queue::ExecutionQueue;

pub struct ObjectPool<T> {
    free: Vec<T>,
    capacity: usize,
    create: fn() -> T,
    reset: fn(&mut T),
    owner: Option<ExecutionQueue>,
    created: usize,
    reused: usize,
}

impl<T> ObjectPool<T> {
    pub fn new(capacity: usize, create: fn() -> T, reset: fn(&mut T)) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
            create,
            reset,
            owner: None,
            created: 0,
            reused: 0,
        }
    }

    /// Bind the pool to the queue allowed to use it.
    pub fn bound_to(mut self, queue: ExecutionQueue) -> Self {
        self.owner = Some(queue);
        self
    }

    pub fn acquire(&mut self) -> T {
        self.check_affinity();
        match self.free.pop() {
            Some(item) => {
                self.reused += 1;
                item
            }
            None => {
                self.created += 1;
                (self.create)()
            }
        }
    }

    /// Return an item. It is reset, and dropped if the pool is full.
    pub fn release(&mut self, mut item: T) {
        self.check_affinity();
        if self.free.len() < self.capacity {
            (self.reset)(&mut item);
            self.free.push(item);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (created, reused) counts since construction.
    pub fn stats(&self) -> (usize, usize) {
        (self.created, self.reused)
    }

    fn check_affinity(&self) {
        debug_assert!(
            self.owner.as_ref().is_none_or(ExecutionQueue::is_on_queue),
            "object pool touched off its owning queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_queue::ErrorHandler;

    fn vecs<T>(capacity: usize) -> ObjectPool<Vec<T>> {
        ObjectPool::new(capacity, Vec::new, Vec::clear)
    }

    #[test]
    fn test_reuses_and_resets() {
        let mut pool: ObjectPool<Vec<u32>> = vecs(2);
        let mut buffer = pool.acquire();
        buffer.extend([1, 2, 3]);
        pool.release(buffer);
        assert_eq!(pool.available(), 1);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 3);
        assert_eq!(pool.stats(), (1, 1));
    }

    #[test]
    fn test_bounded() {
        let mut pool: ObjectPool<Vec<u8>> = vecs(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_bound_pool_used_on_owner_queue() {
        let handler: ErrorHandler = Arc::new(|_: &str, _: &anyhow::Error| {});
        let queue = ExecutionQueue::spawn("pool-owner", handler).unwrap();
        let mut pool: ObjectPool<Vec<u8>> = vecs(4).bound_to(queue.clone());
        let stats = queue
            .enqueue_and_wait(move || {
                let buffer = pool.acquire();
                pool.release(buffer);
                let buffer = pool.acquire();
                pool.release(buffer);
                pool.stats()
            })
            .unwrap();
        assert_eq!(stats, (1, 1));
    }
}
