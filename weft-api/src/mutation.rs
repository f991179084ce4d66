//! View mutations produced by the reconciler and applied on the UI queue.

use serde::{Deserialize, Serialize};

use crate::{PropMap, ViewTag};

/// A width/height pair in layout units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Self = Self {
        width: 0.0,
        height: 0.0,
    };

    #[inline]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Position (relative to the parent) and size of a view.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Frame {
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// How a measurement function should treat an available dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureMode {
    /// The result must equal the given value.
    Exactly,
    /// The result may be anything up to the given value.
    AtMost,
    /// No constraint; the given value is meaningless.
    Undefined,
}

/// One operation on the live native view tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ViewMutation {
    Create {
        tag: ViewTag,
        class_name: String,
        props: PropMap,
        frame: Frame,
    },
    UpdateProps {
        tag: ViewTag,
        props: PropMap,
    },
    UpdateLayout {
        tag: ViewTag,
        frame: Frame,
    },
    SetChildren {
        parent: ViewTag,
        children: Vec<ViewTag>,
    },
    /// Delete a view and every descendant still attached to it.
    Delete {
        tag: ViewTag,
    },
}

impl ViewMutation {
    pub fn tag(&self) -> ViewTag {
        match self {
            ViewMutation::Create { tag, .. }
            | ViewMutation::UpdateProps { tag, .. }
            | ViewMutation::UpdateLayout { tag, .. }
            | ViewMutation::Delete { tag } => *tag,
            ViewMutation::SetChildren { parent, .. } => *parent,
        }
    }
}

/// The ordered output of one reconciliation pass. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewMutationBatch {
    pub batch_id: u64,
    pub mutations: Vec<ViewMutation>,
}

impl ViewMutationBatch {
    pub fn new(batch_id: u64) -> Self {
        Self {
            batch_id,
            mutations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Count of `Create` operations (handy for diagnostics).
    pub fn creates(&self) -> usize {
        self.mutations
            .iter()
            .filter(|m| matches!(m, ViewMutation::Create { .. }))
            .count()
    }
}
