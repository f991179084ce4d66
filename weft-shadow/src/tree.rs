//! The shadow tree: script-driven view operations and the reconciliation pass.
//!
//! Nodes live in a flat table keyed by [`ViewTag`]; parent/child links are tags.
//! The tree is owned by the layout queue and never touches native views. Each
//! [`ShadowTree::reconcile`] lays out dirty nodes, then diffs every attached node
//! against what was last committed and emits a [`ViewMutationBatch`] for the UI
//! queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use weft_api::{Frame, PropMap, Size, ViewMutation, ViewMutationBatch, ViewTag};

use crate::node::ShadowNode;
use crate::view_manager::ROOT_VIEW_CLASS;
use crate::{FlexDirection, LayoutCache, LayoutConstraints, Padding, ShadowError, Style, ViewManagerRegistry};

pub struct ShadowTree {
    nodes: HashMap<ViewTag, ShadowNode>,
    roots: Vec<ViewTag>,
    managers: Arc<ViewManagerRegistry>,
    cache: LayoutCache,
    /// Committed subtree roots removed since the last pass.
    pending_deletes: Vec<ViewTag>,
    next_batch: u64,
}

impl ShadowTree {
    pub fn new(managers: Arc<ViewManagerRegistry>) -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            managers,
            cache: LayoutCache::new(),
            pending_deletes: Vec::new(),
            next_batch: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, tag: ViewTag) -> Option<&ShadowNode> {
        self.nodes.get(&tag)
    }

    pub fn roots(&self) -> &[ViewTag] {
        &self.roots
    }

    pub fn managers(&self) -> &ViewManagerRegistry {
        &self.managers
    }

    /// Frame from the latest layout pass, relative to the parent.
    pub fn layout_of(&self, tag: ViewTag) -> Option<Frame> {
        self.nodes.get(&tag).map(ShadowNode::frame)
    }

    /// Measurement cache (hits, misses).
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    fn get(&self, tag: ViewTag) -> Result<&ShadowNode, ShadowError> {
        self.nodes.get(&tag).ok_or(ShadowError::UnknownTag(tag))
    }

    fn get_mut(&mut self, tag: ViewTag) -> Result<&mut ShadowNode, ShadowError> {
        self.nodes.get_mut(&tag).ok_or(ShadowError::UnknownTag(tag))
    }

    // =========================================================================
    // Script operations
    // =========================================================================

    /// Create an unattached node of a registered view class.
    pub fn create_view(
        &mut self,
        tag: ViewTag,
        class_name: &str,
        props: PropMap,
    ) -> Result<(), ShadowError> {
        if self.nodes.contains_key(&tag) {
            return Err(ShadowError::DuplicateTag(tag));
        }
        let measure = self.managers.get(class_name)?.measure().cloned();
        let props: PropMap = props.into_iter().filter(|(_, v)| !v.is_null()).collect();

        tracing::trace!(%tag, class = class_name, "create view");
        self.nodes.insert(
            tag,
            ShadowNode::new(tag, class_name.to_string(), props, measure),
        );
        Ok(())
    }

    /// Make `tag` a root. An unknown tag gets a fresh root container; an
    /// existing unattached node is promoted. `None` sizes the root to its content.
    pub fn add_root(&mut self, tag: ViewTag, size: Option<Size>) -> Result<(), ShadowError> {
        if !self.nodes.contains_key(&tag) {
            self.create_view(tag, ROOT_VIEW_CLASS, PropMap::new())?;
        }
        let node = self.get_mut(tag)?;
        if node.is_root() {
            return Err(ShadowError::AlreadyRoot(tag));
        }
        if let Some(parent) = node.parent {
            return Err(ShadowError::AlreadyParented { child: tag, parent });
        }
        node.root_size = Some(size);
        self.roots.push(tag);
        self.mark_dirty(tag);
        Ok(())
    }

    pub fn set_root_size(&mut self, tag: ViewTag, size: Option<Size>) -> Result<(), ShadowError> {
        let node = self.get_mut(tag)?;
        match node.root_size {
            None => Err(ShadowError::NotARoot(tag)),
            Some(current) if current == size => Ok(()),
            Some(_) => {
                node.root_size = Some(size);
                self.mark_dirty(tag);
                Ok(())
            }
        }
    }

    /// Merge props into a node. A `null` value removes the prop.
    ///
    /// Only props that differ from the committed view at the next pass are
    /// sent, so a value changed and then restored emits nothing. A change to
    /// a layout prop (or any prop of a measured node) dirties the node.
    pub fn update_view(&mut self, tag: ViewTag, props: PropMap) -> Result<(), ShadowError> {
        let node = self.get_mut(tag)?;
        let mut relayout = false;

        for (key, value) in props {
            let previous = if value.is_null() {
                node.props.shift_remove(&key)
            } else if node.props.get(&key) == Some(&value) {
                continue;
            } else {
                node.props.insert(key.clone(), value).or(Some(Value::Null))
            };
            let Some(previous) = previous else {
                continue;
            };
            relayout |= node.measure.is_some() || Style::is_layout_prop(&key);
            node.prop_baseline.entry(key).or_insert(previous);
        }

        if relayout {
            node.style = Style::from_props(&node.props);
            self.mark_dirty(tag);
        }
        Ok(())
    }

    /// Replace a node's child list. Former children not in the new list
    /// become unattached.
    pub fn set_children(&mut self, tag: ViewTag, children: Vec<ViewTag>) -> Result<(), ShadowError> {
        self.get(tag)?;
        for (i, &child) in children.iter().enumerate() {
            self.check_adoptable(tag, child)?;
            if children[..i].contains(&child) {
                return Err(ShadowError::AlreadyParented { child, parent: tag });
            }
        }

        let parent = self.get_mut(tag)?;
        let former = std::mem::replace(&mut parent.children, children.clone());
        parent.children_changed = true;

        for child in former.into_iter().filter(|c| !children.contains(c)) {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = None;
            }
        }
        for child in &children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(tag);
            }
        }
        self.mark_dirty(tag);
        Ok(())
    }

    /// Incremental child-list edit.
    ///
    /// `move_from` and `remove_from` index the current children; all of them
    /// are taken out first. Moved children are then inserted at `move_to` and
    /// `add_children` at `add_at`, in ascending index order. Removed children
    /// that are not re-added are dropped along with their subtrees.
    ///
    /// Every index and tag is validated before anything changes.
    pub fn manage_children(
        &mut self,
        tag: ViewTag,
        move_from: &[usize],
        move_to: &[usize],
        add_children: &[ViewTag],
        add_at: &[usize],
        remove_from: &[usize],
    ) -> Result<(), ShadowError> {
        if move_from.len() != move_to.len() || add_children.len() != add_at.len() {
            return Err(ShadowError::MismatchedIndices { parent: tag });
        }
        let current = self.get(tag)?.children.clone();
        let len = current.len();

        if let Some(&index) = move_from.iter().chain(remove_from).find(|&&i| i >= len) {
            return Err(ShadowError::IndexOutOfBounds { parent: tag, index, len });
        }
        let mut taken: HashSet<usize> = HashSet::new();
        for &index in move_from {
            if !taken.insert(index) {
                return Err(ShadowError::AlreadyParented {
                    child: current[index],
                    parent: tag,
                });
            }
        }
        taken.extend(remove_from.iter().copied());
        let mut next: Vec<ViewTag> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| !taken.contains(i))
            .map(|(_, &child)| child)
            .collect();

        for (i, &child) in add_children.iter().enumerate() {
            self.check_adoptable(tag, child)?;
            if next.contains(&child) || add_children[..i].contains(&child) {
                return Err(ShadowError::AlreadyParented { child, parent: tag });
            }
        }

        let mut inserts: Vec<(usize, ViewTag)> = move_to
            .iter()
            .copied()
            .zip(move_from.iter().map(|&i| current[i]))
            .chain(add_at.iter().copied().zip(add_children.iter().copied()))
            .collect();
        inserts.sort_by_key(|&(index, _)| index);
        for (index, child) in inserts {
            if index > next.len() {
                return Err(ShadowError::IndexOutOfBounds {
                    parent: tag,
                    index,
                    len: next.len(),
                });
            }
            next.insert(index, child);
        }

        // Validated; apply.
        let removed: Vec<ViewTag> = remove_from
            .iter()
            .map(|&i| current[i])
            .filter(|child| !next.contains(child))
            .collect();
        for &child in add_children {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = Some(tag);
            }
        }
        let parent = self.get_mut(tag)?;
        parent.children = next;
        parent.children_changed = true;

        for child in removed {
            self.drop_subtree(child);
        }
        self.mark_dirty(tag);
        Ok(())
    }

    /// Detach and drop a root with its whole subtree.
    pub fn remove_root(&mut self, tag: ViewTag) -> Result<(), ShadowError> {
        if !self.get(tag)?.is_root() {
            return Err(ShadowError::NotARoot(tag));
        }
        self.drop_view(tag)
    }

    /// Detach a node from its parent and drop it with its subtree.
    pub fn drop_view(&mut self, tag: ViewTag) -> Result<(), ShadowError> {
        let node = self.get(tag)?;
        let parent = node.parent;
        if node.is_root() {
            self.roots.retain(|root| *root != tag);
        }
        if let Some(parent) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|child| *child != tag);
                parent_node.children_changed = true;
            }
            self.mark_dirty(parent);
        }
        self.drop_subtree(tag);
        Ok(())
    }

    /// `child` may go under `parent`: it exists, is not a root, is not
    /// parented elsewhere and is not `parent` or one of its ancestors.
    fn check_adoptable(&self, parent: ViewTag, child: ViewTag) -> Result<(), ShadowError> {
        let node = self.get(child)?;
        if node.is_root() {
            return Err(ShadowError::AlreadyRoot(child));
        }
        if let Some(current) = node.parent
            && current != parent
        {
            return Err(ShadowError::AlreadyParented {
                child,
                parent: current,
            });
        }
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == child {
                return Err(ShadowError::WouldCreateCycle { parent, child });
            }
            cursor = self.nodes.get(&ancestor).and_then(|n| n.parent);
        }
        Ok(())
    }

    /// Remove a node and its descendants from the table. A committed subtree
    /// root queues one delete; descendants go with it on the native side.
    fn drop_subtree(&mut self, tag: ViewTag) -> usize {
        let mut stack = vec![tag];
        let mut dropped = 0;
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            if current == tag && node.is_committed() {
                self.pending_deletes.push(tag);
            }
            self.cache.invalidate(current);
            stack.extend(node.children);
            dropped += 1;
        }
        tracing::trace!(%tag, dropped, "dropped subtree");
        dropped
    }

    /// Dirty a node and every ancestor.
    fn mark_dirty(&mut self, tag: ViewTag) {
        let mut cursor = Some(tag);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get_mut(&current) else {
                break;
            };
            node.dirty = true;
            self.cache.invalidate(current);
            cursor = node.parent;
        }
    }

    // =========================================================================
    // Layout
    // =========================================================================

    fn layout_roots(&mut self) {
        for root in self.roots.clone() {
            let Some(node) = self.nodes.get(&root) else {
                continue;
            };
            let constraints = match node.root_size.flatten() {
                Some(size) => LayoutConstraints::tight(size.width, size.height),
                None => LayoutConstraints::UNBOUNDED,
            };
            let size = self.layout_node(root, constraints);
            if let Some(node) = self.nodes.get_mut(&root) {
                node.frame = Frame::new(0.0, 0.0, size.width, size.height);
            }
        }
    }

    /// Size a node under `constraints`, positioning its children. Clean
    /// nodes seen under the same constraints come straight from the cache.
    fn layout_node(&mut self, tag: ViewTag, constraints: LayoutConstraints) -> Size {
        let Some(node) = self.nodes.get(&tag) else {
            return Size::ZERO;
        };
        if !node.dirty
            && let Some(size) = self.cache.get(tag, &constraints)
        {
            return size;
        }

        let style = node.style;
        let mut bounds = constraints;
        if let Some(width) = style.width {
            bounds = bounds.with_width(width);
        }
        if let Some(height) = style.height {
            bounds = bounds.with_height(height);
        }
        let inner = bounds.deflate(&style.padding);

        let leaf = match (&node.measure, node.children.is_empty()) {
            (Some(measure), true) => {
                let (width, width_mode, height, height_mode) = inner.measure_modes();
                Some(measure.measure(&node.props, width, width_mode, height, height_mode))
            }
            (None, true) => Some(Size::ZERO),
            (_, false) => None,
        };
        let content = match leaf {
            Some(size) => size,
            None => {
                let children = node.children.clone();
                self.stack_children(&children, style.direction, style.padding, inner)
            }
        };

        let size = bounds.constrain(Size::new(
            sanitize(content.width) + style.padding.horizontal(),
            sanitize(content.height) + style.padding.vertical(),
        ));
        if let Some(node) = self.nodes.get_mut(&tag) {
            node.frame.width = size.width;
            node.frame.height = size.height;
            node.dirty = false;
        }
        self.cache.insert(tag, &constraints, size);
        size
    }

    /// Stack children along the main axis; returns the content size.
    fn stack_children(
        &mut self,
        children: &[ViewTag],
        direction: FlexDirection,
        padding: Padding,
        inner: LayoutConstraints,
    ) -> Size {
        let child_constraints = match direction {
            FlexDirection::Column => LayoutConstraints::loose(inner.max_width, f32::INFINITY),
            FlexDirection::Row => LayoutConstraints::loose(f32::INFINITY, inner.max_height),
        };

        let mut main = 0.0_f32;
        let mut cross = 0.0_f32;
        for &child in children {
            let size = self.layout_node(child, child_constraints);
            let (x, y) = match direction {
                FlexDirection::Column => (padding.left, padding.top + main),
                FlexDirection::Row => (padding.left + main, padding.top),
            };
            if let Some(node) = self.nodes.get_mut(&child) {
                node.frame.x = x;
                node.frame.y = y;
            }
            match direction {
                FlexDirection::Column => {
                    main += size.height;
                    cross = cross.max(size.width);
                }
                FlexDirection::Row => {
                    main += size.width;
                    cross = cross.max(size.height);
                }
            }
        }

        match direction {
            FlexDirection::Column => Size::new(cross, main),
            FlexDirection::Row => Size::new(main, cross),
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Lay out dirty nodes and emit the minimal batch that brings the native
    /// tree in line. With no mutation since the last pass the batch is empty.
    ///
    /// Order inside the batch: creates (parent before child), prop updates,
    /// layout updates, child-list updates, deletes.
    pub fn reconcile(&mut self) -> ViewMutationBatch {
        let dirty = self.nodes.values().filter(|n| n.dirty).count();
        self.layout_roots();

        let mut batch = ViewMutationBatch::new(self.next_batch);
        self.next_batch += 1;

        let mut creates = Vec::new();
        let mut updates = Vec::new();
        let mut layouts = Vec::new();
        let mut child_lists = Vec::new();

        let mut stack: Vec<ViewTag> = self.roots.iter().rev().copied().collect();
        while let Some(tag) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&tag) else {
                continue;
            };
            stack.extend(node.children.iter().rev().copied());

            match node.committed {
                None => {
                    creates.push(ViewMutation::Create {
                        tag,
                        class_name: node.class_name.clone(),
                        props: node.props.clone(),
                        frame: node.frame,
                    });
                    if !node.children.is_empty() {
                        child_lists.push(ViewMutation::SetChildren {
                            parent: tag,
                            children: node.children.clone(),
                        });
                    }
                }
                Some(committed) => {
                    let changed: PropMap = std::mem::take(&mut node.prop_baseline)
                        .into_iter()
                        .filter_map(|(key, baseline)| {
                            let current = node.props.get(&key).cloned().unwrap_or(Value::Null);
                            (current != baseline).then_some((key, current))
                        })
                        .collect();
                    if !changed.is_empty() {
                        updates.push(ViewMutation::UpdateProps { tag, props: changed });
                    }
                    if committed != node.frame {
                        layouts.push(ViewMutation::UpdateLayout {
                            tag,
                            frame: node.frame,
                        });
                    }
                    if node.children_changed {
                        child_lists.push(ViewMutation::SetChildren {
                            parent: tag,
                            children: node.children.clone(),
                        });
                    }
                }
            }
            node.committed = Some(node.frame);
            node.prop_baseline.clear();
            node.children_changed = false;
        }

        let deletes = self
            .pending_deletes
            .drain(..)
            .map(|tag| ViewMutation::Delete { tag });
        batch.mutations = creates
            .into_iter()
            .chain(updates)
            .chain(layouts)
            .chain(child_lists)
            .chain(deletes)
            .collect();

        tracing::debug!(
            batch_id = batch.batch_id,
            dirty,
            mutations = batch.len(),
            "reconciled shadow tree"
        );
        batch
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value }
}

impl std::fmt::Debug for ShadowTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowTree")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .field("pending_deletes", &self.pending_deletes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ViewManager;
    use serde_json::json;
    use weft_api::MeasureMode;

    fn props(value: serde_json::Value) -> PropMap {
        serde_json::from_value(value).unwrap()
    }

    /// `Text` measures to 50x20, or narrower if bounded below that; `Box` is a container.
    fn tree() -> ShadowTree {
        let mut managers = ViewManagerRegistry::new();
        managers.register(ViewManager::new("Text").with_measure(
            |_: &PropMap, width: f32, mode: MeasureMode, _: f32, _: MeasureMode| {
                let width = match mode {
                    MeasureMode::Exactly => width,
                    MeasureMode::AtMost => width.min(50.0),
                    MeasureMode::Undefined => 50.0,
                };
                Size::new(width, 20.0)
            },
        ));
        managers.register(ViewManager::new("Box"));
        ShadowTree::new(Arc::new(managers))
    }

    /// Root 1 (300x200, padding 10) with Text children 2 and 3, committed.
    fn committed_tree() -> ShadowTree {
        let mut tree = tree();
        tree.create_view(ViewTag(1), "Box", props(json!({ "padding": 10 })))
            .unwrap();
        tree.add_root(ViewTag(1), Some(Size::new(300.0, 200.0))).unwrap();
        tree.create_view(ViewTag(2), "Text", PropMap::new()).unwrap();
        tree.create_view(ViewTag(3), "Text", PropMap::new()).unwrap();
        tree.set_children(ViewTag(1), vec![ViewTag(2), ViewTag(3)])
            .unwrap();
        tree.reconcile();
        tree
    }

    #[test]
    fn test_single_measured_root() {
        let mut managers = ViewManagerRegistry::new();
        managers.register(ViewManager::new("Label").with_measure(
            |_: &PropMap, _: f32, _: MeasureMode, _: f32, _: MeasureMode| Size::new(100.0, 40.0),
        ));
        let mut tree = ShadowTree::new(Arc::new(managers));
        tree.create_view(ViewTag(1), "Label", PropMap::new()).unwrap();
        tree.add_root(ViewTag(1), None).unwrap();

        let batch = tree.reconcile();
        assert_eq!(batch.len(), 1);
        match &batch.mutations[0] {
            ViewMutation::Create { tag, frame, .. } => {
                assert_eq!(*tag, ViewTag(1));
                assert_eq!(frame.size(), Size::new(100.0, 40.0));
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut tree = committed_tree();
        assert!(tree.reconcile().is_empty());
        assert!(tree.reconcile().is_empty());
    }

    #[test]
    fn test_creates_parent_first_then_children() {
        let mut tree = tree();
        tree.create_view(ViewTag(1), "Box", PropMap::new()).unwrap();
        tree.add_root(ViewTag(1), Some(Size::new(300.0, 200.0))).unwrap();
        tree.create_view(ViewTag(2), "Text", PropMap::new()).unwrap();
        tree.set_children(ViewTag(1), vec![ViewTag(2)]).unwrap();

        let batch = tree.reconcile();
        let tags: Vec<_> = batch.mutations.iter().map(ViewMutation::tag).collect();
        assert_eq!(tags, vec![ViewTag(1), ViewTag(2), ViewTag(1)]);
        assert!(matches!(batch.mutations[2], ViewMutation::SetChildren { .. }));
    }

    #[test]
    fn test_column_stacking() {
        let tree = committed_tree();
        assert_eq!(tree.layout_of(ViewTag(1)), Some(Frame::new(0.0, 0.0, 300.0, 200.0)));
        assert_eq!(tree.layout_of(ViewTag(2)), Some(Frame::new(10.0, 10.0, 50.0, 20.0)));
        assert_eq!(tree.layout_of(ViewTag(3)), Some(Frame::new(10.0, 30.0, 50.0, 20.0)));
    }

    #[test]
    fn test_row_stacking_and_fixed_size() {
        let mut tree = tree();
        tree.create_view(ViewTag(1), "Box", props(json!({ "flexDirection": "row" })))
            .unwrap();
        tree.add_root(ViewTag(1), None).unwrap();
        tree.create_view(ViewTag(2), "Text", PropMap::new()).unwrap();
        tree.create_view(ViewTag(3), "Box", props(json!({ "width": 30, "height": 35 })))
            .unwrap();
        tree.set_children(ViewTag(1), vec![ViewTag(2), ViewTag(3)])
            .unwrap();
        tree.reconcile();

        assert_eq!(tree.layout_of(ViewTag(3)), Some(Frame::new(50.0, 0.0, 30.0, 35.0)));
        assert_eq!(tree.layout_of(ViewTag(1)).map(|f| f.size()), Some(Size::new(80.0, 35.0)));
    }

    #[test]
    fn test_prop_only_update() {
        let mut tree = committed_tree();
        tree.update_view(ViewTag(1), props(json!({ "backgroundColor": "red" })))
            .unwrap();

        let batch = tree.reconcile();
        assert_eq!(
            batch.mutations,
            vec![ViewMutation::UpdateProps {
                tag: ViewTag(1),
                props: props(json!({ "backgroundColor": "red" })),
            }]
        );
    }

    #[test]
    fn test_unchanged_prop_is_not_emitted() {
        let mut tree = committed_tree();
        tree.update_view(ViewTag(1), props(json!({ "padding": 10 })))
            .unwrap();
        assert!(tree.reconcile().is_empty());
    }

    #[test]
    fn test_restored_prop_is_not_emitted() {
        let mut tree = committed_tree();
        tree.update_view(ViewTag(1), props(json!({ "opacity": 1 })))
            .unwrap();
        tree.reconcile();

        tree.update_view(ViewTag(1), props(json!({ "opacity": 0.5 })))
            .unwrap();
        tree.update_view(ViewTag(1), props(json!({ "opacity": 1 })))
            .unwrap();
        assert!(tree.reconcile().is_empty());

        // Added then removed before the pass.
        tree.update_view(ViewTag(2), props(json!({ "color": "red" })))
            .unwrap();
        tree.update_view(ViewTag(2), props(json!({ "color": null })))
            .unwrap();
        assert!(tree.reconcile().is_empty());
    }

    #[test]
    fn test_only_net_prop_changes_are_emitted() {
        let mut tree = committed_tree();
        tree.update_view(ViewTag(1), props(json!({ "opacity": 0.5, "color": "red" })))
            .unwrap();
        tree.update_view(ViewTag(1), props(json!({ "opacity": null, "color": "blue" })))
            .unwrap();

        let batch = tree.reconcile();
        assert_eq!(
            batch.mutations,
            vec![ViewMutation::UpdateProps {
                tag: ViewTag(1),
                props: props(json!({ "color": "blue" })),
            }]
        );
    }

    #[test]
    fn test_layout_change_only_touches_moved_nodes() {
        let mut tree = committed_tree();
        tree.update_view(ViewTag(2), props(json!({ "height": 50 })))
            .unwrap();

        let batch = tree.reconcile();
        let layouts: Vec<_> = batch
            .mutations
            .iter()
            .filter_map(|m| match m {
                ViewMutation::UpdateLayout { tag, frame } => Some((*tag, *frame)),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                (ViewTag(2), Frame::new(10.0, 10.0, 50.0, 50.0)),
                (ViewTag(3), Frame::new(10.0, 60.0, 50.0, 20.0)),
            ]
        );
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = committed_tree();
        tree.create_view(ViewTag(4), "Text", PropMap::new()).unwrap();
        tree.manage_children(ViewTag(1), &[], &[], &[], &[], &[0]).unwrap();
        tree.reconcile();

        // 4 was never attached and must survive.
        tree.manage_children(ViewTag(1), &[], &[], &[], &[], &[0]).unwrap();
        let batch = tree.reconcile();
        assert_eq!(
            batch.mutations.last(),
            Some(&ViewMutation::Delete { tag: ViewTag(3) })
        );
        assert!(batch.mutations.contains(&ViewMutation::SetChildren {
            parent: ViewTag(1),
            children: vec![],
        }));
        assert!(tree.node(ViewTag(3)).is_none());
        assert!(tree.node(ViewTag(4)).is_some());
    }

    #[test]
    fn test_drop_subtree_emits_single_delete() {
        let mut tree = committed_tree();
        tree.create_view(ViewTag(5), "Box", PropMap::new()).unwrap();
        tree.create_view(ViewTag(6), "Text", PropMap::new()).unwrap();
        tree.set_children(ViewTag(5), vec![ViewTag(6)]).unwrap();
        tree.manage_children(ViewTag(1), &[], &[], &[ViewTag(5)], &[2], &[])
            .unwrap();
        tree.reconcile();

        tree.manage_children(ViewTag(1), &[], &[], &[], &[], &[2]).unwrap();
        let batch = tree.reconcile();
        let deletes: Vec<_> = batch
            .mutations
            .iter()
            .filter(|m| matches!(m, ViewMutation::Delete { .. }))
            .collect();
        assert_eq!(deletes, vec![&ViewMutation::Delete { tag: ViewTag(5) }]);
        assert!(tree.node(ViewTag(6)).is_none());
    }

    #[test]
    fn test_manage_children_moves() {
        let mut tree = committed_tree();
        tree.create_view(ViewTag(4), "Text", PropMap::new()).unwrap();
        tree.manage_children(ViewTag(1), &[], &[], &[ViewTag(4)], &[2], &[])
            .unwrap();
        tree.manage_children(ViewTag(1), &[0], &[2], &[], &[], &[])
            .unwrap();
        assert_eq!(
            tree.node(ViewTag(1)).unwrap().children(),
            &[ViewTag(3), ViewTag(4), ViewTag(2)]
        );
    }

    #[test]
    fn test_manage_children_validates_before_mutating() {
        let mut tree = committed_tree();
        let err = tree
            .manage_children(ViewTag(1), &[], &[], &[], &[], &[0, 7])
            .unwrap_err();
        assert_eq!(
            err,
            ShadowError::IndexOutOfBounds {
                parent: ViewTag(1),
                index: 7,
                len: 2,
            }
        );
        assert_eq!(tree.node(ViewTag(1)).unwrap().children().len(), 2);
        assert_eq!(
            tree.manage_children(ViewTag(1), &[0], &[], &[], &[], &[]),
            Err(ShadowError::MismatchedIndices { parent: ViewTag(1) })
        );
    }

    #[test]
    fn test_manage_children_rejects_repeated_child() {
        let mut tree = committed_tree();
        tree.create_view(ViewTag(4), "Text", PropMap::new()).unwrap();
        assert_eq!(
            tree.manage_children(ViewTag(1), &[], &[], &[ViewTag(4), ViewTag(4)], &[0, 1], &[]),
            Err(ShadowError::AlreadyParented {
                child: ViewTag(4),
                parent: ViewTag(1),
            })
        );
        assert_eq!(
            tree.manage_children(ViewTag(1), &[0, 0], &[0, 1], &[], &[], &[]),
            Err(ShadowError::AlreadyParented {
                child: ViewTag(2),
                parent: ViewTag(1),
            })
        );
        assert_eq!(tree.node(ViewTag(1)).unwrap().children(), &[ViewTag(2), ViewTag(3)]);
        assert_eq!(tree.node(ViewTag(4)).unwrap().parent(), None);
        assert!(tree.reconcile().is_empty());
    }

    #[test]
    fn test_cycles_rejected() {
        let mut tree = tree();
        for tag in 1..=3 {
            tree.create_view(ViewTag(tag), "Box", PropMap::new()).unwrap();
        }
        tree.set_children(ViewTag(1), vec![ViewTag(2)]).unwrap();
        tree.set_children(ViewTag(2), vec![ViewTag(3)]).unwrap();

        assert_eq!(
            tree.set_children(ViewTag(3), vec![ViewTag(1)]),
            Err(ShadowError::WouldCreateCycle {
                parent: ViewTag(3),
                child: ViewTag(1),
            })
        );
        assert_eq!(
            tree.set_children(ViewTag(1), vec![ViewTag(1)]),
            Err(ShadowError::WouldCreateCycle {
                parent: ViewTag(1),
                child: ViewTag(1),
            })
        );
        assert_eq!(
            tree.set_children(ViewTag(1), vec![ViewTag(3)]),
            Err(ShadowError::AlreadyParented {
                child: ViewTag(3),
                parent: ViewTag(2),
            })
        );
    }

    #[test]
    fn test_create_errors() {
        let mut tree = tree();
        tree.create_view(ViewTag(1), "Box", PropMap::new()).unwrap();
        assert_eq!(
            tree.create_view(ViewTag(1), "Box", PropMap::new()),
            Err(ShadowError::DuplicateTag(ViewTag(1)))
        );
        assert_eq!(
            tree.create_view(ViewTag(2), "Slider", PropMap::new()),
            Err(ShadowError::UnknownViewClass("Slider".to_string()))
        );
        assert_eq!(
            tree.update_view(ViewTag(9), PropMap::new()),
            Err(ShadowError::UnknownTag(ViewTag(9)))
        );
    }

    #[test]
    fn test_clean_subtrees_hit_the_cache() {
        let mut tree = committed_tree();
        tree.update_view(ViewTag(3), props(json!({ "text": "longer" })))
            .unwrap();
        let (hits_before, _) = tree.cache_stats();
        tree.reconcile();
        let (hits_after, _) = tree.cache_stats();
        // Node 2 is clean under unchanged constraints.
        assert_eq!(hits_after, hits_before + 1);
    }

    #[test]
    fn test_root_resize() {
        let mut tree = committed_tree();
        assert_eq!(
            tree.set_root_size(ViewTag(2), None),
            Err(ShadowError::NotARoot(ViewTag(2)))
        );
        tree.set_root_size(ViewTag(1), Some(Size::new(400.0, 200.0)))
            .unwrap();
        let batch = tree.reconcile();
        assert_eq!(
            batch.mutations,
            vec![ViewMutation::UpdateLayout {
                tag: ViewTag(1),
                frame: Frame::new(0.0, 0.0, 400.0, 200.0),
            }]
        );
    }
}
