//! Node cache of one tree view.
//!
//! Elements map to nodes and handles map back to elements. Parent and child
//! links are stored as handles, so a node is always reached through the
//! maps and never through a stale reference.

use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::disposable::DisposableStore;
use crate::types::{resource_basename, TreeItem, TreeItemDto, TreeItemHandle};

/// Prefix of handles derived from labels at the root.
pub const LABEL_HANDLE_PREFIX: &str = "0";
/// Prefix of handles derived from explicit ids.
pub const ID_HANDLE_PREFIX: &str = "1";

#[derive(Debug)]
pub(crate) struct TreeNode {
    pub item: TreeItemDto,
    pub extension_item: TreeItem,
    pub parent: Option<TreeItemHandle>,
    /// `None` until the children were fetched.
    pub children: Option<Vec<TreeItemHandle>>,
    pub disposables: DisposableStore,
}

impl TreeNode {
    pub fn dispose(&self) {
        self.disposables.dispose();
    }
}

#[derive(Debug)]
pub(crate) struct NodeCache<E> {
    pub roots: Option<Vec<TreeItemHandle>>,
    pub elements: FxHashMap<TreeItemHandle, E>,
    pub nodes: FxHashMap<E, TreeNode>,
}

impl<E> Default for NodeCache<E> {
    fn default() -> Self {
        Self {
            roots: None,
            elements: FxHashMap::default(),
            nodes: FxHashMap::default(),
        }
    }
}

impl<E: Clone + Eq + Hash> NodeCache<E> {
    pub fn element(&self, handle: &str) -> Option<&E> {
        self.elements.get(handle)
    }

    pub fn node_by_handle(&self, handle: &str) -> Option<&TreeNode> {
        self.elements
            .get(handle)
            .and_then(|element| self.nodes.get(element))
    }

    /// Cached children of `parent`, or the roots.
    pub fn children_of(&self, parent: Option<&str>) -> Option<&Vec<TreeItemHandle>> {
        match parent {
            Some(handle) => self
                .node_by_handle(handle)
                .and_then(|node| node.children.as_ref()),
            None => self.roots.as_ref(),
        }
    }

    fn children_slot(&mut self, parent: Option<&str>) -> Option<&mut Option<Vec<TreeItemHandle>>> {
        match parent {
            Some(handle) => {
                let element = self.elements.get(handle)?;
                self.nodes.get_mut(element).map(|node| &mut node.children)
            }
            None => Some(&mut self.roots),
        }
    }

    pub fn items(&self, handles: &[TreeItemHandle]) -> Vec<TreeItemDto> {
        handles
            .iter()
            .filter_map(|handle| self.node_by_handle(handle))
            .map(|node| node.item.clone())
            .collect()
    }

    /// Derives the handle `element` gets under `parent`.
    ///
    /// Label handles take the first free counter, searching at most as many
    /// counters as `parent` has cached children. `return_first` skips the search.
    pub fn create_handle(
        &self,
        element: &E,
        item: &TreeItem,
        parent: Option<&str>,
        return_first: bool,
    ) -> TreeItemHandle {
        if let Some(id) = &item.id {
            return format!("{ID_HANDLE_PREFIX}/{id}");
        }

        let prefix = parent.unwrap_or(LABEL_HANDLE_PREFIX);
        let slug = match (
            item.label.as_ref().filter(|label| !label.label.is_empty()),
            &item.resource_uri,
        ) {
            (Some(label), _) => label.label.as_str(),
            (None, Some(uri)) => resource_basename(uri),
            (None, None) => "",
        };
        let slug = slug.replace('/', "//");
        let existing = self
            .nodes
            .get(element)
            .map(|node| node.item.handle.as_str());
        let siblings = self.children_of(parent).map_or(0, Vec::len);

        let mut counter = 0;
        loop {
            let handle = format!("{prefix}/{counter}:{slug}");
            if return_first
                || !self.elements.contains_key(&handle)
                || existing == Some(handle.as_str())
                || counter >= siblings
            {
                return handle;
            }
            counter += 1;
        }
    }

    pub fn add_node(&mut self, element: E, node: TreeNode) {
        self.elements.insert(node.item.handle.clone(), element.clone());
        self.nodes.insert(element, node);
    }

    /// Appends `handle` to the children of `parent`. False when `parent` is gone.
    pub fn add_to_parent(&mut self, handle: TreeItemHandle, parent: Option<&str>) -> bool {
        match self.children_slot(parent) {
            Some(children) => {
                children.get_or_insert_with(Vec::new).push(handle);
                true
            }
            None => false,
        }
    }

    /// Forgets the children of `parent`. Clearing the roots clears everything.
    pub fn clear_children(&mut self, parent: Option<&E>) {
        let Some(parent) = parent else {
            self.clear_all();
            return;
        };
        let Some(children) = self
            .nodes
            .get_mut(parent)
            .and_then(|node| node.children.take())
        else {
            return;
        };
        for child in children {
            if let Some(element) = self.elements.get(&child).cloned() {
                self.clear(&element);
            }
        }
    }

    /// Drops `element` and its cached subtree, disposing children first.
    pub fn clear(&mut self, element: &E) {
        let Some(node) = self.nodes.remove(element) else {
            return;
        };
        for child in node.children.iter().flatten() {
            if let Some(child_element) = self.elements.get(child).cloned() {
                self.clear(&child_element);
            }
        }
        self.elements.remove(&node.item.handle);
        node.dispose();
    }

    pub fn clear_all(&mut self) {
        self.roots = None;
        self.elements.clear();
        for (_, node) in self.nodes.drain() {
            node.dispose();
        }
    }

    /// Swaps the node of `element` for `node`, keeping its place among its
    /// siblings. Returns the replaced node for disposal.
    pub fn replace_node(&mut self, element: &E, node: TreeNode) -> Option<TreeNode> {
        let parent = node.parent.clone();
        self.elements.remove(&node.item.handle);
        let existing = self.nodes.remove(element)?;
        if existing.item.handle != node.item.handle {
            self.elements.remove(&existing.item.handle);
        }
        let handle = node.item.handle.clone();
        self.add_node(element.clone(), node);

        if let Some(Some(children)) = self.children_slot(parent.as_deref()) {
            if let Some(slot) = children
                .iter_mut()
                .find(|child| **child == existing.item.handle)
            {
                *slot = handle;
            }
        }
        Some(existing)
    }

    /// Minimal set of handles covering `changed`: a node whose ancestor also
    /// changed is covered by that ancestor. Nodes detached from the roots are
    /// skipped.
    pub fn handles_to_refresh(&self, changed: &[E]) -> Vec<TreeItemHandle> {
        let changed_handles: FxHashSet<&str> = changed
            .iter()
            .filter_map(|element| self.nodes.get(element))
            .map(|node| node.item.handle.as_str())
            .collect();

        let mut to_update: Vec<TreeItemHandle> = Vec::new();
        for element in changed {
            let Some(node) = self.nodes.get(element) else {
                continue;
            };
            if to_update.contains(&node.item.handle) {
                continue;
            }
            let mut current = Some(node);
            while let Some(parent) = current.and_then(|node| node.parent.as_deref()) {
                if changed_handles.contains(parent) {
                    break;
                }
                current = self.node_by_handle(parent);
            }
            if current.is_some_and(|node| node.parent.is_none()) {
                to_update.push(node.item.handle.clone());
            }
        }
        to_update
    }
}
