//! Weft - headless demo host.
//!
//! Starts a runtime with a canned script engine that renders a small view
//! tree into root view 1, then prints the committed layout.
//!
//! Usage: `weft [config.json]`

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast::error::TryRecvError;
use weft_api::{CallbackId, Size, ViewTag};
use weft_bridge::ScriptEngine;
use weft_queue::QueueConfigurationSpec;
use weft_runtime::{Runtime, RuntimeConfig, RuntimeEvent, logging};
use weft_shadow::ViewManagerRegistry;

/// Answers `runApplication` with a fixed render.
struct CannedEngine;

impl ScriptEngine for CannedEngine {
    fn call_function(&mut self, module: &str, method: &str, _args: &[Value]) -> anyhow::Result<Value> {
        if (module, method) != ("AppRegistry", "runApplication") {
            return Ok(Value::Null);
        }
        // UIManager is module 0: createView = 1, setChildren = 3.
        Ok(json!([
            [0, 0, 0, 0],
            [1, 1, 3, 3],
            [
                [2, "RCTView", 1, { "padding": 8, "flexDirection": "row" }],
                [3, "RCTView", 1, { "width": 120, "height": 40 }],
                [2, [3]],
                [1, [2]]
            ]
        ]))
    }

    fn invoke_callback(&mut self, _callback_id: CallbackId, _args: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    logging::init(&config.log_filter);

    let runtime = Runtime::start(
        config.manual_frames(),
        QueueConfigurationSpec::owned(),
        Box::new(CannedEngine),
        Vec::new(),
        ViewManagerRegistry::new(),
    )?;
    let mut diagnostics = runtime.subscribe();

    runtime.add_root_view(ViewTag(1), Some(Size::new(320.0, 240.0)))?;
    runtime.run_application("Demo", ViewTag(1), json!({}))?;

    'frames: for _ in 0..200 {
        runtime.tick();
        loop {
            match diagnostics.try_recv() {
                Ok(RuntimeEvent::ViewBatchApplied { batch_id, mutations }) => {
                    tracing::info!(batch_id, mutations, "view batch applied");
                    break 'frames;
                }
                Ok(event) => tracing::debug!(?event, "diagnostic"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => anyhow::bail!("diagnostics closed"),
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    for tag in [1, 2, 3].map(ViewTag) {
        match runtime.ui_manager().measure(tag)? {
            Ok(measured) => println!("view {tag}: {:?} at page ({}, {})", measured.frame, measured.page_x, measured.page_y),
            Err(err) => println!("view {tag}: {err}"),
        }
    }

    runtime.dispose();
    Ok(())
}
