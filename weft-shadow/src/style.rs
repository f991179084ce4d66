//! Layout-affecting view properties.

use serde_json::Value;
use weft_api::PropMap;

/// Spacing inside a node's edges.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Padding {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Padding {
    pub fn all(value: f32) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    pub fn horizontal(&self) -> f32 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f32 {
        self.top + self.bottom
    }
}

/// Stacking axis for children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlexDirection {
    #[default]
    Column,
    Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Style {
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub padding: Padding,
    pub direction: FlexDirection,
}

impl Style {
    /// True for props that feed layout rather than the native view alone.
    pub fn is_layout_prop(key: &str) -> bool {
        matches!(
            key,
            "width"
                | "height"
                | "padding"
                | "paddingHorizontal"
                | "paddingVertical"
                | "paddingTop"
                | "paddingRight"
                | "paddingBottom"
                | "paddingLeft"
                | "flexDirection"
        )
    }

    /// Recompute from the full prop map.
    pub fn from_props(props: &PropMap) -> Self {
        let number = |key: &str| props.get(key).and_then(Value::as_f64).map(|n| n as f32);

        let mut padding = Padding::all(number("padding").unwrap_or(0.0));
        if let Some(h) = number("paddingHorizontal") {
            padding.left = h;
            padding.right = h;
        }
        if let Some(v) = number("paddingVertical") {
            padding.top = v;
            padding.bottom = v;
        }
        padding.top = number("paddingTop").unwrap_or(padding.top);
        padding.right = number("paddingRight").unwrap_or(padding.right);
        padding.bottom = number("paddingBottom").unwrap_or(padding.bottom);
        padding.left = number("paddingLeft").unwrap_or(padding.left);

        let direction = match props.get("flexDirection").and_then(Value::as_str) {
            Some("row") => FlexDirection::Row,
            Some("column") | None => FlexDirection::Column,
            Some(other) => {
                tracing::warn!(direction = other, "unsupported flexDirection, using column");
                FlexDirection::Column
            }
        };

        Self {
            width: number("width"),
            height: number("height"),
            padding,
            direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> PropMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_props() {
        let style = Style::from_props(&props(json!({
            "width": 120,
            "padding": 4,
            "paddingLeft": 10,
            "flexDirection": "row",
            "backgroundColor": "red"
        })));
        assert_eq!(style.width, Some(120.0));
        assert_eq!(style.height, None);
        assert_eq!(style.padding, Padding { top: 4.0, right: 4.0, bottom: 4.0, left: 10.0 });
        assert_eq!(style.direction, FlexDirection::Row);
    }

    #[test]
    fn test_layout_props() {
        assert!(Style::is_layout_prop("paddingTop"));
        assert!(!Style::is_layout_prop("backgroundColor"));
    }
}
