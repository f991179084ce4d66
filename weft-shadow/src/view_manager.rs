//! View classes known to the shadow tree.
//!
//! A [`ViewManager`] describes one native view class by its capabilities:
//! whether it measures its own content ([`Measurable`]) and which direct
//! events it emits. There is no class hierarchy; a manager is a plain value.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use weft_api::{MeasureMode, PropMap, Size};

use crate::ShadowError;

/// Content measurement for leaf nodes of a view class.
pub trait Measurable: Send + Sync {
    fn measure(
        &self,
        props: &PropMap,
        width: f32,
        width_mode: MeasureMode,
        height: f32,
        height_mode: MeasureMode,
    ) -> Size;
}

impl<F> Measurable for F
where
    F: Fn(&PropMap, f32, MeasureMode, f32, MeasureMode) -> Size + Send + Sync,
{
    fn measure(
        &self,
        props: &PropMap,
        width: f32,
        width_mode: MeasureMode,
        height: f32,
        height_mode: MeasureMode,
    ) -> Size {
        self(props, width, width_mode, height, height_mode)
    }
}

#[derive(Clone)]
pub struct ViewManager {
    class_name: String,
    measure: Option<Arc<dyn Measurable>>,
    direct_events: Vec<String>,
}

impl ViewManager {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            measure: None,
            direct_events: Vec::new(),
        }
    }

    pub fn with_measure(mut self, measure: impl Measurable + 'static) -> Self {
        self.measure = Some(Arc::new(measure));
        self
    }

    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.direct_events
            .extend(events.iter().map(|event| event.to_string()));
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn measure(&self) -> Option<&Arc<dyn Measurable>> {
        self.measure.as_ref()
    }

    pub fn direct_events(&self) -> &[String] {
        &self.direct_events
    }
}

impl std::fmt::Debug for ViewManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewManager")
            .field("class_name", &self.class_name)
            .field("measurable", &self.measure.is_some())
            .field("direct_events", &self.direct_events)
            .finish()
    }
}

/// Class name of the container view every root needs.
pub const ROOT_VIEW_CLASS: &str = "RCTRootView";

/// Class name of the default container view.
pub const VIEW_CLASS: &str = "RCTView";

#[derive(Debug, Clone)]
pub struct ViewManagerRegistry {
    managers: HashMap<String, ViewManager>,
}

impl ViewManagerRegistry {
    /// Registry with the built-in container classes.
    pub fn new() -> Self {
        let mut registry = Self {
            managers: HashMap::new(),
        };
        registry.register(ViewManager::new(ROOT_VIEW_CLASS));
        registry.register(ViewManager::new(VIEW_CLASS));
        registry
    }

    /// Add or replace a manager.
    pub fn register(&mut self, manager: ViewManager) {
        self.managers.insert(manager.class_name.clone(), manager);
    }

    pub fn get(&self, class_name: &str) -> Result<&ViewManager, ShadowError> {
        self.managers
            .get(class_name)
            .ok_or_else(|| ShadowError::UnknownViewClass(class_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Per-class constants surfaced to the script side's UI manager:
    /// `{ class: { "directEventTypes": { event: { "registrationName": ... } } } }`.
    pub fn constants(&self) -> Value {
        let mut classes: Vec<_> = self.managers.values().collect();
        classes.sort_by(|a, b| a.class_name.cmp(&b.class_name));

        let mut out = Map::new();
        for manager in classes {
            let events: Map<String, Value> = manager
                .direct_events
                .iter()
                .map(|event| {
                    let registration = registration_name(event);
                    (event.clone(), json!({ "registrationName": registration }))
                })
                .collect();
            out.insert(
                manager.class_name.clone(),
                json!({ "directEventTypes": events }),
            );
        }
        Value::Object(out)
    }
}

impl Default for ViewManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `topChange` -> `onChange`.
fn registration_name(event: &str) -> String {
    match event.strip_prefix("top") {
        Some(rest) if !rest.is_empty() => format!("on{rest}"),
        _ => event.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_measurable() {
        let manager = ViewManager::new("Text")
            .with_measure(|_: &PropMap, _: f32, _: MeasureMode, _: f32, _: MeasureMode| Size::new(10.0, 4.0));
        let size = manager.measure().unwrap().measure(
            &PropMap::new(),
            0.0,
            MeasureMode::Undefined,
            0.0,
            MeasureMode::Undefined,
        );
        assert_eq!(size, Size::new(10.0, 4.0));
    }

    #[test]
    fn test_unknown_class() {
        let registry = ViewManagerRegistry::new();
        assert!(registry.get(VIEW_CLASS).is_ok());
        assert_eq!(
            registry.get("Nope").unwrap_err(),
            ShadowError::UnknownViewClass("Nope".to_string())
        );
    }

    #[test]
    fn test_constants() {
        let mut registry = ViewManagerRegistry::new();
        registry.register(ViewManager::new("Switch").with_events(&["topChange"]));
        let constants = registry.constants();
        assert_eq!(
            constants["Switch"],
            json!({ "directEventTypes": { "topChange": { "registrationName": "onChange" } } })
        );
        assert_eq!(constants[VIEW_CLASS], json!({ "directEventTypes": {} }));
    }
}
