//! End-to-end runtime tests.
//!
//! A scripted engine plays the application: `runApplication` answers with a
//! prepared render batch, every other engine call is recorded. Frames are
//! ticked by hand so each test controls when the UI-apply and script-events
//! phases run.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use weft_api::{CallbackId, Frame, Size, ViewTag};
use weft_bridge::{ModuleBuilder, PendingEvent, ScriptEngine};
use weft_queue::{ErrorHandler, ExecutionQueue, QueueConfigurationSpec, QueueKind};
use weft_runtime::{Runtime, RuntimeConfig, RuntimeError, RuntimeEvent};
use weft_shadow::ViewManagerRegistry;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Call { name: String, args: Vec<Value> },
    Callback(u64, Vec<Value>),
}

struct ScriptedApp {
    render: Option<Value>,
    seen: Sender<Seen>,
}

impl ScriptEngine for ScriptedApp {
    fn call_function(&mut self, module: &str, method: &str, args: &[Value]) -> anyhow::Result<Value> {
        self.seen.send(Seen::Call {
            name: format!("{module}.{method}"),
            args: args.to_vec(),
        })?;
        if (module, method) == ("AppRegistry", "runApplication") {
            return Ok(self.render.take().unwrap_or(Value::Null));
        }
        Ok(Value::Null)
    }

    fn invoke_callback(&mut self, callback_id: CallbackId, args: &[Value]) -> anyhow::Result<Value> {
        self.seen.send(Seen::Callback(callback_id.0, args.to_vec()))?;
        Ok(Value::Null)
    }
}

/// Root 1 > view 2 (padding 10) > view 3 (50x20).
fn render_batch() -> Value {
    json!([
        [0, 0, 0, 0],
        [1, 1, 3, 3],
        [
            [2, "RCTView", 1, {"padding": 10}],
            [3, "RCTView", 1, {"width": 50, "height": 20}],
            [2, [3]],
            [1, [2]]
        ]
    ])
}

struct Harness {
    runtime: Runtime,
    diagnostics: broadcast::Receiver<RuntimeEvent>,
    seen: Receiver<Seen>,
}

impl Harness {
    fn start() -> Self {
        Self::with_spec(QueueConfigurationSpec::owned())
    }

    fn with_spec(spec: QueueConfigurationSpec) -> Self {
        let (seen_tx, seen) = unbounded();
        let engine = ScriptedApp {
            render: Some(render_batch()),
            seen: seen_tx,
        };
        let failing = ModuleBuilder::new("Flaky")
            .method("explode", &[], |_, _| anyhow::bail!("kaboom"))
            .build()
            .unwrap();
        let runtime = Runtime::start(
            RuntimeConfig::default().manual_frames(),
            spec,
            Box::new(engine),
            vec![failing],
            ViewManagerRegistry::new(),
        )
        .unwrap();
        let diagnostics = runtime.subscribe();
        Self {
            runtime,
            diagnostics,
            seen,
        }
    }

    /// Tick frames until a diagnostic matches, returning it.
    fn tick_until(&mut self, matches: impl Fn(&RuntimeEvent) -> bool) -> RuntimeEvent {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            self.runtime.tick();
            while let Ok(event) = self.diagnostics.try_recv() {
                if matches(&event) {
                    return event;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for a diagnostic");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn render(&mut self) {
        self.runtime
            .add_root_view(ViewTag(1), Some(Size::new(300.0, 200.0)))
            .unwrap();
        self.runtime
            .run_application("Demo", ViewTag(1), json!({}))
            .unwrap();
        self.tick_until(|event| matches!(event, RuntimeEvent::ViewBatchApplied { .. }));
    }

    /// Next recorded engine call, skipping the ones `skip` names.
    fn next_seen(&self, skip: &[&str]) -> Seen {
        loop {
            let seen = self.seen.recv_timeout(TIMEOUT).unwrap();
            match &seen {
                Seen::Call { name, .. } if skip.contains(&name.as_str()) => continue,
                _ => return seen,
            }
        }
    }

    fn settle_script(&self) {
        for _ in 0..3 {
            self.runtime.queues().script().enqueue_and_wait(|| ()).unwrap();
        }
    }
}

#[test]
fn test_render_reaches_native_tree() {
    let mut test = Harness::start();
    test.render();

    let measured = test.runtime.ui_manager().measure(ViewTag(3)).unwrap().unwrap();
    assert_eq!(measured.frame, Frame::new(10.0, 10.0, 50.0, 20.0));
    assert_eq!((measured.page_x, measured.page_y), (10.0, 10.0));

    let (views, root_children) = test
        .runtime
        .ui_manager()
        .with_native(|native| {
            let children = native.view(ViewTag(1)).map(|v| v.children.clone());
            (native.len(), children)
        })
        .unwrap();
    assert_eq!(views, 3);
    assert_eq!(root_children, Some(vec![ViewTag(2)]));
    assert_eq!(test.runtime.ui_manager().parked(), 0);
}

#[test]
fn test_run_application_call_shape() {
    let mut test = Harness::start();
    test.render();
    assert_eq!(
        test.next_seen(&[]),
        Seen::Call {
            name: "AppRegistry.runApplication".to_string(),
            args: vec![json!("Demo"), json!({"rootTag": 1, "initialProps": {}})],
        }
    );
}

#[test]
fn test_script_measure_answers_through_callback() {
    let mut test = Harness::start();
    test.render();

    test.runtime
        .bridge()
        .dispatch_flushed(&json!([[0], [7], [[3, 5]]]))
        .unwrap();
    assert_eq!(
        test.next_seen(&["AppRegistry.runApplication"]),
        Seen::Callback(
            5,
            vec![json!(10.0), json!(10.0), json!(50.0), json!(20.0), json!(10.0), json!(10.0)]
        )
    );
}

#[test]
fn test_update_applies_on_next_frame() {
    let mut test = Harness::start();
    test.render();

    test.runtime
        .bridge()
        .dispatch_flushed(&json!([[0], [2], [[3, "RCTView", {"width": 80, "color": "red"}]]]))
        .unwrap();
    test.tick_until(|event| matches!(event, RuntimeEvent::ViewBatchApplied { .. }));

    let view = test
        .runtime
        .ui_manager()
        .with_native(|native| native.view(ViewTag(3)).cloned())
        .unwrap()
        .unwrap();
    assert_eq!(view.frame, Frame::new(10.0, 10.0, 80.0, 20.0));
    assert_eq!(view.props["color"], json!("red"));
}

#[test]
fn test_events_coalesce_within_a_frame() {
    let test = Harness::start();
    for value in 0..3 {
        test.runtime
            .emit_event(PendingEvent::new(ViewTag(3), "topChange", json!({ "value": value })))
            .unwrap();
    }
    assert_eq!(test.runtime.events().staged(), 3);

    test.runtime.tick();
    assert_eq!(
        test.next_seen(&[]),
        Seen::Call {
            name: "RCTEventEmitter.receiveEvent".to_string(),
            args: vec![json!(3), json!("topChange"), json!({"value": 2})],
        }
    );
    test.settle_script();
    assert!(test.seen.try_recv().is_err(), "coalesced events are delivered once");
    assert_eq!(test.runtime.events().staged(), 0);
}

#[test]
fn test_invalid_argument_is_reported_not_dispatched() {
    let mut test = Harness::start();
    test.runtime
        .bridge()
        .dispatch_flushed(&json!([[0], [1], [["two", "RCTView", 1, null]]]))
        .unwrap();
    let event = test.tick_until(|event| matches!(event, RuntimeEvent::CallRejected { .. }));
    let RuntimeEvent::CallRejected { index, error, .. } = event else {
        unreachable!()
    };
    assert_eq!(index, 0);
    assert!(error.starts_with("UIManager.createView"), "{error}");
}

#[test]
fn test_handler_failures_are_reported() {
    let mut test = Harness::start();
    test.runtime
        .bridge()
        .dispatch_flushed(&json!([[1, 0], [0, 1], [[], [7.5, "RCTView", 1, null]]]))
        .unwrap();

    let mut failed = Vec::new();
    while failed.len() < 2 {
        if let RuntimeEvent::HandlerFailed { module, method, .. } =
            test.tick_until(|event| matches!(event, RuntimeEvent::HandlerFailed { .. }))
        {
            failed.push(format!("{module}.{method}"));
        }
    }
    assert_eq!(failed, vec!["Flaky.explode", "UIManager.createView"]);
}

#[test]
fn test_layout_failure_is_reported_with_operation() {
    let mut test = Harness::start();
    test.runtime
        .bridge()
        .dispatch_flushed(&json!([[0], [2], [[99, "RCTView", {"width": 1}]]]))
        .unwrap();
    let event = test.tick_until(|event| matches!(event, RuntimeEvent::QueueTaskFailed { .. }));
    let RuntimeEvent::QueueTaskFailed { queue, error } = event else {
        unreachable!()
    };
    assert_eq!(queue, "layout");
    assert!(error.starts_with("UIManager.updateView"), "{error}");
}

#[test]
fn test_adopted_ui_queue_runs_on_host_pump() {
    let on_error: ErrorHandler = std::sync::Arc::new(|_: &str, _: &anyhow::Error| {});
    let (ui, pump) = ExecutionQueue::external("host-ui", on_error);
    let mut test = Harness::with_spec(QueueConfigurationSpec::owned().adopt(QueueKind::Ui, ui.clone()));
    assert!(!test.runtime.queues().is_owned(QueueKind::Ui));

    test.runtime
        .add_root_view(ViewTag(1), Some(Size::new(300.0, 200.0)))
        .unwrap();
    test.runtime
        .run_application("Demo", ViewTag(1), json!({}))
        .unwrap();

    let deadline = Instant::now() + TIMEOUT;
    while ui.pending() == 0 {
        assert!(Instant::now() < deadline, "batch never reached the UI queue");
        test.runtime.tick();
        thread::sleep(Duration::from_millis(2));
    }
    while let Ok(event) = test.diagnostics.try_recv() {
        assert!(!matches!(event, RuntimeEvent::ViewBatchApplied { .. }));
    }

    assert!(pump.run_pending() > 0);
    let applied = test.tick_until(|event| matches!(event, RuntimeEvent::ViewBatchApplied { .. }));
    assert!(matches!(applied, RuntimeEvent::ViewBatchApplied { mutations, .. } if mutations > 0));

    test.runtime.dispose();
    assert!(!ui.is_disposed(), "adopted queues outlive the runtime");
    assert!(test.runtime.queues().script().is_disposed());
}

#[test]
fn test_dispose_is_final() {
    let mut test = Harness::start();
    test.render();
    test.runtime.dispose();
    test.runtime.dispose();

    assert!(!test.runtime.tick());
    assert!(matches!(
        test.runtime.add_root_view(ViewTag(9), None),
        Err(RuntimeError::Disposed)
    ));
    assert!(matches!(
        test.runtime.emit_event(PendingEvent::new(ViewTag(3), "topChange", json!({}))),
        Err(RuntimeError::Disposed)
    ));
    assert!(test.runtime.choreographer().is_disposed());
}
