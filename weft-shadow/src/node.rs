//! Shadow nodes, stored flat in the tree's arena and linked by tag.

use std::sync::Arc;

use weft_api::{Frame, PropMap, Size, ViewTag};

use crate::{Measurable, Style};

pub struct ShadowNode {
    pub(crate) tag: ViewTag,
    pub(crate) class_name: String,
    pub(crate) props: PropMap,
    pub(crate) style: Style,
    pub(crate) parent: Option<ViewTag>,
    pub(crate) children: Vec<ViewTag>,
    pub(crate) measure: Option<Arc<dyn Measurable>>,
    /// `Some` for roots; `None` inside means "size to content".
    pub(crate) root_size: Option<Option<Size>>,
    pub(crate) dirty: bool,
    /// Geometry from the latest layout pass, relative to the parent.
    pub(crate) frame: Frame,
    /// Geometry the native side last saw. `None` until the create is emitted.
    pub(crate) committed: Option<Frame>,
    /// Committed value of every prop changed since the last commit
    /// (`null` = it was absent).
    pub(crate) prop_baseline: PropMap,
    pub(crate) children_changed: bool,
}

impl ShadowNode {
    pub(crate) fn new(
        tag: ViewTag,
        class_name: String,
        props: PropMap,
        measure: Option<Arc<dyn Measurable>>,
    ) -> Self {
        let style = Style::from_props(&props);
        Self {
            tag,
            class_name,
            props,
            style,
            parent: None,
            children: Vec::new(),
            measure,
            root_size: None,
            dirty: true,
            frame: Frame::default(),
            committed: None,
            prop_baseline: PropMap::new(),
            children_changed: false,
        }
    }

    pub fn tag(&self) -> ViewTag {
        self.tag
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn props(&self) -> &PropMap {
        &self.props
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn parent(&self) -> Option<ViewTag> {
        self.parent
    }

    pub fn children(&self) -> &[ViewTag] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.root_size.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_measurable(&self) -> bool {
        self.measure.is_some()
    }

    /// Layout from the latest pass, relative to the parent.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Whether the native view exists (its create has been emitted).
    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }
}

impl std::fmt::Debug for ShadowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowNode")
            .field("tag", &self.tag)
            .field("class_name", &self.class_name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("dirty", &self.dirty)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}
