//! In-memory live view tree, applied on the UI queue.
//!
//! This is the single writer of native view state: it only changes through
//! [`NativeViewTree::apply`], which consumes a reconciled batch.

use std::collections::HashMap;

use weft_api::{Frame, PropMap, ViewMutation, ViewMutationBatch, ViewTag};

use crate::ShadowError;

#[derive(Debug, Clone, PartialEq)]
pub struct NativeView {
    pub tag: ViewTag,
    pub class_name: String,
    pub props: PropMap,
    pub frame: Frame,
    pub parent: Option<ViewTag>,
    pub children: Vec<ViewTag>,
}

/// Result of a `measure` query: the frame relative to the parent plus the
/// view's absolute position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewMeasurement {
    pub frame: Frame,
    pub page_x: f32,
    pub page_y: f32,
}

impl ViewMeasurement {
    /// `[x, y, width, height, pageX, pageY]`, the shape script callbacks expect.
    pub fn to_args(&self) -> Vec<serde_json::Value> {
        [
            self.frame.x,
            self.frame.y,
            self.frame.width,
            self.frame.height,
            self.page_x,
            self.page_y,
        ]
        .into_iter()
        .map(serde_json::Value::from)
        .collect()
    }
}

#[derive(Debug, Default)]
pub struct NativeViewTree {
    views: HashMap<ViewTag, NativeView>,
    last_batch: Option<u64>,
}

impl NativeViewTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, tag: ViewTag) -> Option<&NativeView> {
        self.views.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Id of the last batch applied.
    pub fn last_batch(&self) -> Option<u64> {
        self.last_batch
    }

    /// Apply every mutation of `batch` in order.
    ///
    /// Stops at the first mutation that does not fit the current tree; the
    /// mutations before it stay applied.
    pub fn apply(&mut self, batch: ViewMutationBatch) -> Result<(), ShadowError> {
        let batch_id = batch.batch_id;
        let count = batch.len();
        for mutation in batch.mutations {
            self.apply_one(mutation)?;
        }
        self.last_batch = Some(batch_id);
        tracing::trace!(batch_id, mutations = count, views = self.views.len(), "applied view batch");
        Ok(())
    }

    fn apply_one(&mut self, mutation: ViewMutation) -> Result<(), ShadowError> {
        match mutation {
            ViewMutation::Create {
                tag,
                class_name,
                props,
                frame,
            } => {
                if self.views.contains_key(&tag) {
                    return Err(ShadowError::DuplicateTag(tag));
                }
                self.views.insert(
                    tag,
                    NativeView {
                        tag,
                        class_name,
                        props,
                        frame,
                        parent: None,
                        children: Vec::new(),
                    },
                );
            }
            ViewMutation::UpdateProps { tag, props } => {
                let view = self.view_mut(tag)?;
                for (key, value) in props {
                    if value.is_null() {
                        view.props.shift_remove(&key);
                    } else {
                        view.props.insert(key, value);
                    }
                }
            }
            ViewMutation::UpdateLayout { tag, frame } => {
                self.view_mut(tag)?.frame = frame;
            }
            ViewMutation::SetChildren { parent, children } => {
                self.set_children(parent, children)?;
            }
            ViewMutation::Delete { tag } => {
                let parent = self.view_mut(tag)?.parent;
                if let Some(parent) = parent.and_then(|p| self.views.get_mut(&p)) {
                    parent.children.retain(|child| *child != tag);
                }
                let mut stack = vec![tag];
                while let Some(current) = stack.pop() {
                    if let Some(view) = self.views.remove(&current) {
                        stack.extend(view.children);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_children(&mut self, parent: ViewTag, children: Vec<ViewTag>) -> Result<(), ShadowError> {
        self.view_mut(parent)?;
        if let Some(missing) = children.iter().find(|c| !self.views.contains_key(*c)) {
            return Err(ShadowError::UnknownTag(*missing));
        }

        // A child moving here from another parent leaves that parent first.
        for &child in &children {
            let previous = self.views.get(&child).and_then(|v| v.parent);
            if let Some(previous) = previous.filter(|p| *p != parent)
                && let Some(previous) = self.views.get_mut(&previous)
            {
                previous.children.retain(|c| *c != child);
            }
            if let Some(view) = self.views.get_mut(&child) {
                view.parent = Some(parent);
            }
        }

        let former = match self.views.get_mut(&parent) {
            Some(view) => std::mem::replace(&mut view.children, children.clone()),
            None => return Err(ShadowError::UnknownTag(parent)),
        };
        for child in former.into_iter().filter(|c| !children.contains(c)) {
            if let Some(view) = self.views.get_mut(&child)
                && view.parent == Some(parent)
            {
                view.parent = None;
            }
        }
        Ok(())
    }

    fn view_mut(&mut self, tag: ViewTag) -> Result<&mut NativeView, ShadowError> {
        self.views.get_mut(&tag).ok_or(ShadowError::UnknownTag(tag))
    }

    /// Committed frame of a view and its absolute position.
    pub fn measure(&self, tag: ViewTag) -> Result<ViewMeasurement, ShadowError> {
        let view = self.views.get(&tag).ok_or(ShadowError::UnknownTag(tag))?;
        let (mut page_x, mut page_y) = (view.frame.x, view.frame.y);
        let mut cursor = view.parent;
        while let Some(parent) = cursor.and_then(|p| self.views.get(&p)) {
            page_x += parent.frame.x;
            page_y += parent.frame.y;
            cursor = parent.parent;
        }
        Ok(ViewMeasurement {
            frame: view.frame,
            page_x,
            page_y,
        })
    }
}
