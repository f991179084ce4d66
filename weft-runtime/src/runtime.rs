//! One runtime instance: queues, bridge, shadow tree, events and frames.
//!
//! ```text
//! script queue ──batch──▶ native-module queue ──ops──▶ layout queue
//!      ▲                                                   │ reconcile
//!      │ events / callbacks                                ▼
//!   choreographer: UI apply ▶ native animation ▶ script events ▶ idle
//!                     │
//!                     ▼
//!                 UI queue (native view tree)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use weft_api::{Size, ViewTag};
use weft_bridge::{
    BridgeError, BridgeListener, EventDispatcher, MessageBridge, ModuleRegistry, NativeModule,
    PendingEvent, ScriptEngine,
};
use weft_queue::{ErrorHandler, QueueConfiguration, QueueConfigurationSpec};
use weft_shadow::{ShadowTree, ViewManagerRegistry};

use crate::choreographer::{Choreographer, FramePhase};
use crate::ui_manager::UiManager;
use crate::{RuntimeConfig, RuntimeError};

/// Diagnostics published to [`Runtime::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    BatchDispatched {
        batch_id: u64,
        dispatched: usize,
        rejected: usize,
    },
    CallRejected {
        batch_id: u64,
        index: usize,
        error: String,
    },
    BatchFailed {
        error: String,
    },
    HandlerFailed {
        module: String,
        method: String,
        error: String,
    },
    QueueTaskFailed {
        queue: String,
        error: String,
    },
    ViewBatchApplied {
        batch_id: u64,
        mutations: usize,
    },
}

/// Forwards bridge reports to the diagnostics channel.
struct Diagnostics(broadcast::Sender<RuntimeEvent>);

impl BridgeListener for Diagnostics {
    fn batch_dispatched(&self, batch_id: u64, dispatched: usize, rejected: usize) {
        let _ = self.0.send(RuntimeEvent::BatchDispatched {
            batch_id,
            dispatched,
            rejected,
        });
    }

    fn call_rejected(&self, batch_id: u64, index: usize, error: &BridgeError) {
        let _ = self.0.send(RuntimeEvent::CallRejected {
            batch_id,
            index,
            error: error.to_string(),
        });
    }

    fn batch_failed(&self, error: &BridgeError) {
        let _ = self.0.send(RuntimeEvent::BatchFailed {
            error: error.to_string(),
        });
    }

    fn handler_failed(&self, module: &str, method: &str, error: &anyhow::Error) {
        let _ = self.0.send(RuntimeEvent::HandlerFailed {
            module: module.to_string(),
            method: method.to_string(),
            error: format!("{error:#}"),
        });
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    queues: QueueConfiguration,
    bridge: MessageBridge,
    events: Arc<EventDispatcher>,
    ui_manager: Arc<UiManager>,
    choreographer: Arc<Choreographer>,
    diagnostics: broadcast::Sender<RuntimeEvent>,
    disposed: AtomicBool,
}

impl Runtime {
    /// Build and start a runtime.
    ///
    /// `modules` are registered after the built-in `UIManager`, so their ids
    /// start at 1. The engine is initialized with the module table before
    /// this returns.
    pub fn start(
        config: RuntimeConfig,
        spec: QueueConfigurationSpec,
        engine: Box<dyn ScriptEngine>,
        modules: Vec<NativeModule>,
        view_managers: ViewManagerRegistry,
    ) -> Result<Self, RuntimeError> {
        let (diagnostics, _) = broadcast::channel(1024);

        let task_failed = diagnostics.clone();
        let on_error: ErrorHandler = Arc::new(move |queue: &str, err: &anyhow::Error| {
            tracing::error!(queue, "task failed: {err:#}");
            let _ = task_failed.send(RuntimeEvent::QueueTaskFailed {
                queue: queue.to_string(),
                error: format!("{err:#}"),
            });
        });
        let queues = QueueConfiguration::new(spec.with_disposal(config.disposal), on_error)?;

        let choreographer = Arc::new(Choreographer::new());
        let ui_manager = UiManager::new(
            ShadowTree::new(Arc::new(view_managers)),
            queues.layout().clone(),
            queues.ui().clone(),
            choreographer.clone(),
            diagnostics.clone(),
        );

        let mut registry = ModuleRegistry::new();
        registry.register(ui_manager.module().build()?)?;
        for module in modules {
            registry.register(module)?;
        }

        let bridge = MessageBridge::new(
            Arc::new(registry),
            engine,
            queues.script().clone(),
            queues.native_modules().clone(),
            Arc::new(Diagnostics(diagnostics.clone())),
        );

        let events = Arc::new(EventDispatcher::new(
            queues.script().clone(),
            bridge.sink(),
            config.event_pool_capacity,
            config.max_events_per_flush,
        ));

        let apply = ui_manager.clone();
        choreographer.set_callback(FramePhase::UiApply, move |_| {
            apply.apply_parked()?;
            Ok(())
        });
        let flush = events.clone();
        let frames = Arc::downgrade(&choreographer);
        choreographer.set_callback(FramePhase::ScriptEvents, move |_| {
            if let Some(frames) = frames.upgrade() {
                frames.deactivate(FramePhase::ScriptEvents);
            }
            flush.flush_frame()?;
            // Over the per-flush limit: the rest goes next frame.
            if flush.staged() > 0
                && let Some(frames) = frames.upgrade()
            {
                frames.activate(FramePhase::ScriptEvents);
            }
            Ok(())
        });

        let runtime = Self {
            config,
            queues,
            bridge,
            events,
            ui_manager,
            choreographer,
            diagnostics,
            disposed: AtomicBool::new(false),
        };

        runtime.bridge.initialize()?;
        if runtime.config.frame_interval_ms > 0 {
            runtime
                .choreographer
                .start(Duration::from_millis(runtime.config.frame_interval_ms))
                .map_err(RuntimeError::Ticker)?;
        }
        tracing::info!(
            modules = runtime.bridge.registry().len(),
            frame_interval_ms = runtime.config.frame_interval_ms,
            "runtime started"
        );
        Ok(runtime)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bridge(&self) -> &MessageBridge {
        &self.bridge
    }

    pub fn queues(&self) -> &QueueConfiguration {
        &self.queues
    }

    pub fn ui_manager(&self) -> &Arc<UiManager> {
        &self.ui_manager
    }

    pub fn choreographer(&self) -> &Arc<Choreographer> {
        &self.choreographer
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.diagnostics.subscribe()
    }

    fn ensure_running(&self) -> Result<(), RuntimeError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RuntimeError::Disposed);
        }
        Ok(())
    }

    /// Register a host root view. `None` sizes it to its content.
    pub fn add_root_view(&self, tag: ViewTag, size: Option<Size>) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        self.ui_manager.add_root(tag, size)?;
        Ok(())
    }

    /// Start a script application in a root view.
    pub fn run_application(&self, app_key: &str, root_tag: ViewTag, initial_props: Value) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        self.bridge.call_function(
            "AppRegistry",
            "runApplication",
            vec![
                json!(app_key),
                json!({ "rootTag": root_tag.0, "initialProps": initial_props }),
            ],
        )?;
        Ok(())
    }

    /// Stage an event for the next script-events phase.
    pub fn emit_event(&self, event: PendingEvent) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        self.events.dispatch(event)?;
        self.choreographer.activate(FramePhase::ScriptEvents);
        Ok(())
    }

    /// Run one frame by hand. Returns false once disposed.
    pub fn tick(&self) -> bool {
        self.choreographer.tick()
    }

    /// Tear down in reverse order of construction: frames, bridge work,
    /// then every owned queue (per the configured disposal policy).
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.choreographer.dispose();
        self.bridge.shutdown();
        self.queues.dispose();
        tracing::info!("runtime disposed");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose();
    }
}
