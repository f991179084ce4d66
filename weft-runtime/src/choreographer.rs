//! Per-frame phase scheduler.
//!
//! Four callback slots run in a fixed order on every tick: UI apply, native
//! animation, script events, idle. Activating or deactivating a slot never
//! changes that order. Callbacks may toggle slots (their own included) while
//! they run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One frame callback; receives the frame number.
pub type FrameCallback = Box<dyn FnMut(u64) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    UiApply,
    NativeAnimation,
    ScriptEvents,
    Idle,
}

impl FramePhase {
    /// Execution order within a frame.
    pub const ORDER: [FramePhase; 4] = [
        FramePhase::UiApply,
        FramePhase::NativeAnimation,
        FramePhase::ScriptEvents,
        FramePhase::Idle,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FramePhase::UiApply => "ui_apply",
            FramePhase::NativeAnimation => "native_animation",
            FramePhase::ScriptEvents => "script_events",
            FramePhase::Idle => "idle",
        }
    }
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Default)]
struct Slot {
    callback: Option<FrameCallback>,
    active: bool,
    /// Bumped by `set_callback` so a running callback is not put back over its replacement.
    generation: u64,
}

#[derive(Default)]
struct State {
    slots: [Slot; 4],
    frame: u64,
    disposed: bool,
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Choreographer {
    state: Mutex<State>,
    /// Serialises ticks from the ticker thread and manual callers.
    ticking: Mutex<()>,
    ticker: Mutex<Option<Ticker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Choreographer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the callback of a slot. Activation is unchanged.
    pub fn set_callback<F>(&self, phase: FramePhase, callback: F)
    where
        F: FnMut(u64) -> anyhow::Result<()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        let slot = &mut state.slots[phase.index()];
        slot.callback = Some(Box::new(callback));
        slot.generation += 1;
    }

    pub fn activate(&self, phase: FramePhase) {
        lock(&self.state).slots[phase.index()].active = true;
    }

    pub fn deactivate(&self, phase: FramePhase) {
        lock(&self.state).slots[phase.index()].active = false;
    }

    pub fn is_active(&self, phase: FramePhase) -> bool {
        lock(&self.state).slots[phase.index()].active
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }

    /// Frames ticked so far.
    pub fn frame(&self) -> u64 {
        lock(&self.state).frame
    }

    /// Run one frame. Returns false once disposed.
    ///
    /// A failing callback is logged; the remaining phases still run.
    pub fn tick(&self) -> bool {
        let _ticking = lock(&self.ticking);
        let frame = {
            let mut state = lock(&self.state);
            if state.disposed {
                return false;
            }
            state.frame += 1;
            state.frame
        };

        for phase in FramePhase::ORDER {
            let taken = {
                let mut state = lock(&self.state);
                if state.disposed {
                    return false;
                }
                let slot = &mut state.slots[phase.index()];
                if !slot.active {
                    continue;
                }
                slot.callback.take().map(|callback| (callback, slot.generation))
            };
            let Some((mut callback, generation)) = taken else {
                continue;
            };

            if let Err(err) = callback(frame) {
                tracing::warn!(%phase, frame, "frame callback failed: {err:#}");
            }

            let mut state = lock(&self.state);
            if state.disposed {
                return false;
            }
            let slot = &mut state.slots[phase.index()];
            if slot.generation == generation {
                slot.callback = Some(callback);
            }
        }
        true
    }

    /// Tick every `interval` on a dedicated thread until disposed.
    /// Starting an already running ticker is a no-op.
    pub fn start(self: &Arc<Self>, interval: Duration) -> std::io::Result<()> {
        let mut ticker = lock(&self.ticker);
        if ticker.is_some() || self.is_disposed() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let this = Arc::downgrade(self);
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("weft-choreographer".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    let Some(choreographer) = this.upgrade() else {
                        break;
                    };
                    if thread_stop.load(Ordering::Acquire) || !choreographer.tick() {
                        break;
                    }
                }
            })?;
        *ticker = Some(Ticker { stop, handle });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "frame ticker started");
        Ok(())
    }

    /// Stop permanently. Callbacks are dropped; slots still active are simply
    /// never invoked again. Calling again is a no-op.
    pub fn dispose(&self) {
        let callbacks: Vec<_> = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            state
                .slots
                .iter_mut()
                .filter_map(|slot| slot.callback.take())
                .collect()
        };
        drop(callbacks);

        if let Some(ticker) = lock(&self.ticker).take() {
            ticker.stop.store(true, Ordering::Release);
            if ticker.handle.thread().id() != thread::current().id() && ticker.handle.join().is_err() {
                tracing::error!("frame ticker thread panicked");
            }
        }
        tracing::debug!("choreographer disposed");
    }
}

impl Drop for Choreographer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Choreographer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        let active: Vec<_> = FramePhase::ORDER
            .into_iter()
            .filter(|phase| state.slots[phase.index()].active)
            .collect();
        f.debug_struct("Choreographer")
            .field("frame", &state.frame)
            .field("active", &active)
            .field("disposed", &state.disposed)
            .finish()
    }
}
