//! The `UIManager` native module: script view operations onto the shadow tree.
//!
//! Handlers run on the native-module queue and forward each operation to the
//! layout queue, which alone owns the [`ShadowTree`]. When a bridge batch
//! completes, the layout queue reconciles and parks the resulting
//! [`ViewMutationBatch`]; the choreographer's UI-apply phase hands parked
//! batches to the UI queue, which alone owns the [`NativeViewTree`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use serde_json::Value;
use tokio::sync::broadcast;
use weft_api::{PropMap, Size, ViewMutationBatch, ViewTag};
use weft_bridge::{ModuleBuilder, Param};
use weft_queue::{ExecutionQueue, QueueError};
use weft_shadow::{NativeViewTree, ShadowError, ShadowTree, ViewMeasurement};

use crate::choreographer::{Choreographer, FramePhase};
use crate::RuntimeEvent;

pub const MODULE_NAME: &str = "UIManager";

pub struct UiManager {
    shadow: Arc<Mutex<ShadowTree>>,
    native: Arc<Mutex<NativeViewTree>>,
    /// Reconciled batches waiting for the next UI-apply phase.
    parked: Mutex<VecDeque<ViewMutationBatch>>,
    layout: ExecutionQueue,
    ui: ExecutionQueue,
    choreographer: Arc<Choreographer>,
    diagnostics: broadcast::Sender<RuntimeEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UiManager {
    pub fn new(
        shadow: ShadowTree,
        layout: ExecutionQueue,
        ui: ExecutionQueue,
        choreographer: Arc<Choreographer>,
        diagnostics: broadcast::Sender<RuntimeEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shadow: Arc::new(Mutex::new(shadow)),
            native: Arc::new(Mutex::new(NativeViewTree::new())),
            parked: Mutex::new(VecDeque::new()),
            layout,
            ui,
            choreographer,
            diagnostics,
        })
    }

    /// Run a shadow tree operation on the layout queue.
    fn on_layout<F>(&self, operation: &'static str, f: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut ShadowTree) -> Result<(), ShadowError> + Send + 'static,
    {
        let shadow = self.shadow.clone();
        self.layout.enqueue_fallible(move || {
            f(&mut lock(&shadow)).with_context(|| format!("{MODULE_NAME}.{operation}"))
        })
    }

    /// Register a root view sized by the host. `None` sizes it to content.
    pub fn add_root(&self, tag: ViewTag, size: Option<Size>) -> Result<(), QueueError> {
        self.on_layout("addRootView", move |tree| tree.add_root(tag, size))
    }

    pub fn set_root_size(&self, tag: ViewTag, size: Option<Size>) -> Result<(), QueueError> {
        self.on_layout("setRootSize", move |tree| tree.set_root_size(tag, size))
    }

    /// Reconcile on the layout queue and park a non-empty batch for the UI.
    pub fn reconcile(self: &Arc<Self>) -> Result<(), QueueError> {
        let this = self.clone();
        self.layout.enqueue(move || this.reconcile_now())
    }

    /// Layout queue only.
    fn reconcile_now(&self) {
        let batch = lock(&self.shadow).reconcile();
        if batch.is_empty() {
            return;
        }
        lock(&self.parked).push_back(batch);
        self.choreographer.activate(FramePhase::UiApply);
    }

    /// UI-apply phase: hand every parked batch to the UI queue, in order.
    pub fn apply_parked(&self) -> Result<usize, QueueError> {
        // Deactivate before draining so a batch parked meanwhile re-activates.
        self.choreographer.deactivate(FramePhase::UiApply);
        let mut parked = lock(&self.parked);
        if parked.is_empty() {
            return Ok(0);
        }
        let batches: Vec<_> = parked.drain(..).collect();
        let count = batches.len();

        let native = self.native.clone();
        let diagnostics = self.diagnostics.clone();
        // Enqueued under the parked lock so concurrent callers keep batch order.
        self.ui.enqueue_fallible(move || {
            let mut native = lock(&native);
            for batch in batches {
                let batch_id = batch.batch_id;
                let mutations = batch.len();
                native
                    .apply(batch)
                    .with_context(|| format!("applying view batch {batch_id}"))?;
                let _ = diagnostics.send(RuntimeEvent::ViewBatchApplied {
                    batch_id,
                    mutations,
                });
            }
            Ok(())
        })?;
        Ok(count)
    }

    /// Batches waiting for the next UI-apply phase.
    pub fn parked(&self) -> usize {
        lock(&self.parked).len()
    }

    /// Read the shadow tree on the layout queue.
    pub fn with_shadow<F, R>(&self, f: F) -> Result<R, QueueError>
    where
        F: FnOnce(&ShadowTree) -> R + Send + 'static,
        R: Send + 'static,
    {
        let shadow = self.shadow.clone();
        self.layout.enqueue_and_wait(move || f(&lock(&shadow)))
    }

    /// Read the native view tree on the UI queue.
    pub fn with_native<F, R>(&self, f: F) -> Result<R, QueueError>
    where
        F: FnOnce(&NativeViewTree) -> R + Send + 'static,
        R: Send + 'static,
    {
        let native = self.native.clone();
        self.ui.enqueue_and_wait(move || f(&lock(&native)))
    }

    /// Committed geometry of a view, read on the UI queue.
    pub fn measure(&self, tag: ViewTag) -> Result<Result<ViewMeasurement, ShadowError>, QueueError> {
        self.with_native(move |native| native.measure(tag))
    }

    /// The native module exposed to script.
    pub fn module(self: &Arc<Self>) -> ModuleBuilder {
        let constants = lock(&self.shadow).managers().constants();

        let create = self.clone();
        let update = self.clone();
        let set_children = self.clone();
        let manage = self.clone();
        let clear = self.clone();
        let remove_root = self.clone();
        let measure = self.clone();
        let batch_done = self.clone();

        ModuleBuilder::new(MODULE_NAME)
            .constant("ViewManagers", constants.clone())
            .sync_method("getConstantsForViewManager", &[Param::string()], move |args| {
                let class = args[0].as_str().unwrap_or_default();
                Ok(constants.get(class).cloned().unwrap_or(Value::Null))
            })
            .method(
                "createView",
                &[Param::number(), Param::string(), Param::number(), Param::object().nullable()],
                move |_, args| {
                    let tag = view_tag(&args[0])?;
                    let class = args[1].as_str().unwrap_or_default().to_string();
                    let props = prop_map(&args[3])?;
                    create.on_layout("createView", move |tree| tree.create_view(tag, &class, props))?;
                    Ok(())
                },
            )
            .method(
                "updateView",
                &[Param::number(), Param::string(), Param::object()],
                move |_, args| {
                    let tag = view_tag(&args[0])?;
                    let props = prop_map(&args[2])?;
                    update.on_layout("updateView", move |tree| tree.update_view(tag, props))?;
                    Ok(())
                },
            )
            .method(
                "setChildren",
                &[Param::number(), Param::array()],
                move |_, args| {
                    let tag = view_tag(&args[0])?;
                    let children = view_tags(&args[1])?;
                    set_children.on_layout("setChildren", move |tree| tree.set_children(tag, children))?;
                    Ok(())
                },
            )
            .method(
                "manageChildren",
                &[
                    Param::number(),
                    Param::array().nullable(),
                    Param::array().nullable(),
                    Param::array().nullable(),
                    Param::array().nullable(),
                    Param::array().nullable(),
                ],
                move |_, args| {
                    let tag = view_tag(&args[0])?;
                    let move_from = indices(&args[1])?;
                    let move_to = indices(&args[2])?;
                    let add_children = view_tags(&args[3])?;
                    let add_at = indices(&args[4])?;
                    let remove_from = indices(&args[5])?;
                    manage.on_layout("manageChildren", move |tree| {
                        tree.manage_children(tag, &move_from, &move_to, &add_children, &add_at, &remove_from)
                    })?;
                    Ok(())
                },
            )
            .method(
                "removeSubviewsFromContainerWithID",
                &[Param::number()],
                move |_, args| {
                    let tag = view_tag(&args[0])?;
                    clear.on_layout("removeSubviewsFromContainerWithID", move |tree| {
                        let count = tree.node(tag).ok_or(ShadowError::UnknownTag(tag))?.children().len();
                        let all: Vec<usize> = (0..count).collect();
                        tree.manage_children(tag, &[], &[], &[], &[], &all)
                    })?;
                    Ok(())
                },
            )
            .method("removeRootView", &[Param::number()], move |_, args| {
                let tag = view_tag(&args[0])?;
                remove_root.on_layout("removeRootView", move |tree| tree.remove_root(tag))?;
                Ok(())
            })
            .method(
                "measure",
                &[Param::number(), Param::callback()],
                move |ctx, args| {
                    let tag = view_tag(&args[0])?;
                    let callback = ctx.callback(&args[1])?;
                    // Flush this batch's view operations first so the UI
                    // queue measures them.
                    let this = measure.clone();
                    measure.layout.enqueue(move || {
                        this.reconcile_now();
                        if let Err(err) = this.apply_parked() {
                            tracing::warn!(%tag, "measure flush failed: {err}");
                        }
                        let native = this.native.clone();
                        let queued = this.ui.enqueue(move || match lock(&native).measure(tag) {
                            Ok(measured) => {
                                callback.invoke(measured.to_args());
                            }
                            Err(err) => tracing::warn!(%tag, "measure failed: {err}"),
                        });
                        if let Err(err) = queued {
                            tracing::warn!(%tag, "measure dropped: {err}");
                        }
                    })?;
                    Ok(())
                },
            )
            .on_batch_complete(move || {
                batch_done.reconcile()?;
                Ok(())
            })
    }
}

fn view_tag(value: &Value) -> anyhow::Result<ViewTag> {
    value
        .as_u64()
        .and_then(|tag| u32::try_from(tag).ok())
        .or_else(|| {
            value
                .as_f64()
                .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64)
                .map(|n| n as u32)
        })
        .map(ViewTag)
        .with_context(|| format!("expected a view tag, got {value}"))
}

fn view_tags(value: &Value) -> anyhow::Result<Vec<ViewTag>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(view_tag).collect(),
        other => anyhow::bail!("expected an array of view tags, got {other}"),
    }
}

fn indices(value: &Value) -> anyhow::Result<Vec<usize>> {
    Ok(view_tags(value)?
        .into_iter()
        .map(|ViewTag(index)| index as usize)
        .collect())
}

fn prop_map(value: &Value) -> anyhow::Result<PropMap> {
    match value {
        Value::Null => Ok(PropMap::new()),
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        other => anyhow::bail!("expected a props object, got {other}"),
    }
}
