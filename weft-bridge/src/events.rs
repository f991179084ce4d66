//! Event coalescing between native views and the script-side emitter.
//!
//! Events are staged from any thread. On every script-events frame the
//! staged events move to the script queue as one batch, where same-cookie
//! coalescable events collapse to the newest one before delivery. The
//! coalescing buffers come from an [`ObjectPool`] bound to the script queue.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use weft_api::{ScriptEvent, ViewTag};
use weft_queue::{ExecutionQueue, QueueError};

use crate::{BridgeError, ObjectPool, ScriptSink};

/// An event waiting to cross to the script side.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub event: ScriptEvent,
    pub coalescing_key: u16,
    pub can_coalesce: bool,
}

impl PendingEvent {
    /// Coalescable event for `target` with coalescing key 0.
    pub fn new(target: ViewTag, name: impl Into<String>, payload: Value) -> Self {
        Self {
            event: ScriptEvent::Event {
                target,
                name: name.into(),
                payload,
            },
            coalescing_key: 0,
            can_coalesce: true,
        }
    }

    /// Touch events are never coalesced.
    pub fn touches(name: impl Into<String>, touches: Vec<Value>, changed_indices: Vec<usize>) -> Self {
        Self {
            event: ScriptEvent::Touches {
                name: name.into(),
                touches,
                changed_indices,
            },
            coalescing_key: 0,
            can_coalesce: false,
        }
    }

    pub fn with_coalescing_key(mut self, key: u16) -> Self {
        self.coalescing_key = key;
        self
    }

    pub fn uncoalesced(mut self) -> Self {
        self.can_coalesce = false;
        self
    }

    pub fn name(&self) -> &str {
        self.event.name()
    }

    fn target(&self) -> ViewTag {
        match &self.event {
            ScriptEvent::Event { target, .. } => *target,
            ScriptEvent::Touches { .. } => ViewTag(0),
        }
    }
}

/// Packs view tag, event-type id and coalescing key into one key.
fn cookie(target: ViewTag, type_id: u16, coalescing_key: u16) -> u64 {
    u64::from(target.0) | (u64::from(type_id) << 32) | (u64::from(coalescing_key) << 48)
}

/// Observes every event as it is staged.
pub trait EventListener: Send + Sync {
    fn on_event_dispatch(&self, event: &PendingEvent);
}

/// A staged event with its cookie; `None` for events that never coalesce.
struct Staged {
    event: PendingEvent,
    cookie: Option<u64>,
}

struct Staging {
    events: Vec<Staged>,
    type_ids: HashMap<String, u16>,
}

/// Per-frame coalescing scratch, pooled on the script queue.
#[derive(Default)]
struct Coalescer {
    slots: Vec<Option<PendingEvent>>,
    by_cookie: HashMap<u64, usize>,
}

/// Script-side half of the dispatcher.
struct Delivery {
    pool: Mutex<ObjectPool<Coalescer>>,
    sink: Arc<dyn ScriptSink>,
}

pub struct EventDispatcher {
    staging: Mutex<Staging>,
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
    delivery: Arc<Delivery>,
    script: ExecutionQueue,
    max_per_flush: usize,
}

impl EventDispatcher {
    pub fn new(
        script: ExecutionQueue,
        sink: Arc<dyn ScriptSink>,
        pool_capacity: usize,
        max_per_flush: usize,
    ) -> Self {
        let pool = ObjectPool::new(pool_capacity, Coalescer::default, Coalescer::reset)
            .bound_to(script.clone());
        Self {
            staging: Mutex::new(Staging {
                events: Vec::new(),
                type_ids: HashMap::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            delivery: Arc::new(Delivery {
                pool: Mutex::new(pool),
                sink,
            }),
            script,
            max_per_flush: max_per_flush.max(1),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Stage an event. Safe from any thread.
    pub fn dispatch(&self, event: PendingEvent) -> Result<(), BridgeError> {
        for listener in lock(&self.listeners).iter() {
            listener.on_event_dispatch(&event);
        }
        let mut staging = lock(&self.staging);
        let cookie = if event.can_coalesce {
            let type_id = staging.type_id(event.name())?;
            Some(cookie(event.target(), type_id, event.coalescing_key))
        } else {
            None
        };
        staging.events.push(Staged { event, cookie });
        Ok(())
    }

    pub fn staged(&self) -> usize {
        lock(&self.staging).events.len()
    }

    /// Coalescing buffers (created, reused) since construction.
    pub fn pool_stats(&self) -> (usize, usize) {
        lock(&self.delivery.pool).stats()
    }

    /// Hand the oldest staged events, up to the per-flush limit, to the
    /// script queue, which coalesces and delivers them. The rest stay staged
    /// for the next frame. Returns the number of events handed over.
    pub fn flush_frame(&self) -> Result<usize, QueueError> {
        let batch = {
            let mut staging = lock(&self.staging);
            if staging.events.is_empty() {
                return Ok(0);
            }
            let take = staging.events.len().min(self.max_per_flush);
            let rest = staging.events.split_off(take);
            std::mem::replace(&mut staging.events, rest)
        };

        let count = batch.len();
        tracing::trace!(events = count, "handing event batch to script queue");
        let delivery = self.delivery.clone();
        self.script.enqueue(move || delivery.deliver(batch))?;
        Ok(count)
    }
}

impl Staging {
    fn type_id(&mut self, name: &str) -> Result<u16, BridgeError> {
        if let Some(id) = self.type_ids.get(name) {
            return Ok(*id);
        }
        let id = u16::try_from(self.type_ids.len()).map_err(|_| BridgeError::EventTypeOverflow)?;
        self.type_ids.insert(name.to_string(), id);
        Ok(id)
    }
}

impl Delivery {
    /// Runs on the script queue.
    fn deliver(&self, batch: Vec<Staged>) {
        let mut pool = lock(&self.pool);
        let mut coalescer = pool.acquire();
        let mut delivered = 0;
        for pending in coalescer.coalesce(batch) {
            self.sink.push(pending.event.into_script_call());
            delivered += 1;
        }
        tracing::trace!(events = delivered, "event batch delivered");
        pool.release(coalescer);
    }
}

impl Coalescer {
    fn reset(&mut self) {
        self.slots.clear();
        self.by_cookie.clear();
    }

    /// Replace older same-cookie events by newer ones. A surviving event
    /// takes the position of its newest occurrence.
    fn coalesce(&mut self, batch: Vec<Staged>) -> impl Iterator<Item = PendingEvent> + '_ {
        self.slots.reserve(batch.len());
        for Staged { event, cookie } in batch {
            let index = self.slots.len();
            if let Some(key) = cookie {
                match self.by_cookie.entry(key) {
                    Entry::Occupied(mut previous) => {
                        self.slots[*previous.get()] = None;
                        previous.insert(index);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(index);
                    }
                }
            }
            self.slots.push(Some(event));
        }
        self.slots.drain(..).flatten()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
