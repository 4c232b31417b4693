//! The node arena and the parent/child structure over it.
//!
//! All structural mutation goes through [`SceneTree`] so a node's parent
//! pointer and its parent's child list never disagree. Destruction is
//! deferred: [`SceneTree::request_destroy`] queues, and the engine calls
//! [`SceneTree::drain_destroy_queue`] once per tick after the frame is
//! submitted.

use std::collections::VecDeque;
use std::ops::ControlFlow;

use log::debug;
use slotmap::SlotMap;

use crate::events::Subscription;
use crate::node::{Node, NodeContext, NodeEvent, NodeId, Transform, Updatable};
use crate::physics::{Collision, PhysicsManager};
use crate::pool::PoolManager;

pub struct SceneTree {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
    destroy_queue: Vec<NodeId>,
    pending_events: VecDeque<(NodeId, NodeEvent)>,
    pub(crate) physics: PhysicsManager,
}

impl SceneTree {
    /// Create a tree with an empty, in-tree root node.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let mut root_node = Node::new();
        root_node.in_tree = true;
        let root = nodes.insert(root_node);

        Self {
            nodes,
            root,
            destroy_queue: Vec::new(),
            pending_events: VecDeque::new(),
            physics: PhysicsManager::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Store a detached node and return its id.
    ///
    /// # Panics
    /// If the node has a collision component but no transform.
    pub fn insert(&mut self, node: Node) -> NodeId {
        assert!(
            node.collision.is_none() || node.transform.is_some(),
            "a collision node needs a transform"
        );
        self.nodes.insert(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn physics(&self) -> &PhysicsManager {
        &self.physics
    }

    /// Replace `id`'s transform, returning the old one's values to `pool`.
    /// A collider left without a transform has no world placement: it drops
    /// its contacts and leaves the physics registry until a transform is set
    /// again.
    pub fn set_transform(
        &mut self,
        id: NodeId,
        transform: Option<Transform>,
        pool: &mut PoolManager,
    ) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if let Some(old) = std::mem::replace(&mut node.transform, transform) {
            old.release(pool);
        }
        self.sync_collider(id);
    }

    /// Replace `id`'s collision component, returning the old one's world
    /// points to `pool`. An in-tree node is registered with (or removed
    /// from) the physics manager immediately.
    ///
    /// # Panics
    /// If `collision` is `Some` and the node has no transform.
    pub fn set_collision(
        &mut self,
        id: NodeId,
        collision: Option<Collision>,
        pool: &mut PoolManager,
    ) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        assert!(
            collision.is_none() || node.transform.is_some(),
            "a collision node needs a transform"
        );
        if let Some(mut old) = std::mem::replace(&mut node.collision, collision) {
            old.release(pool);
        }
        self.sync_collider(id);
    }

    /// Attach `child` as the last child of `parent`, detaching it from any
    /// previous parent first.
    ///
    /// # Panics
    /// If either id is stale, or if `child` is `parent` or one of its
    /// ancestors.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        assert!(
            self.nodes.contains_key(parent),
            "add_child: parent {parent:?} is not in the scene"
        );
        assert!(
            self.nodes.contains_key(child),
            "add_child: child {child:?} is not in the scene"
        );
        assert!(
            child != parent && !self.is_ancestor(child, parent),
            "add_child: attaching {child:?} under {parent:?} would create a cycle"
        );

        if let Some(old_parent) = self.nodes[child].parent {
            self.remove_child(old_parent, child);
        }

        self.nodes[parent].children.push(child);
        self.nodes[child].parent = Some(parent);

        if self.nodes[parent].in_tree {
            self.enter_tree(child);
        }
    }

    /// Detach `child` from `parent`. Does nothing if it is not a child.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return;
        };
        let Some(index) = parent_node.children.iter().position(|&c| c == child) else {
            return;
        };
        parent_node.children.remove(index);
        self.nodes[child].parent = None;

        if self.nodes[child].in_tree {
            self.exit_tree(child);
        }
    }

    /// Move `child` to `index` within its parent's child list (clamped).
    pub fn set_child_index(&mut self, child: NodeId, index: usize) {
        let Some(parent) = self.nodes.get(child).and_then(|n| n.parent) else {
            return;
        };
        let children = &mut self.nodes[parent].children;
        if let Some(current) = children.iter().position(|&c| c == child) {
            children.remove(current);
            let index = index.min(children.len());
            children.insert(index, child);
        }
    }

    /// Whether `ancestor` appears on the parent chain of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Descendants of `from` carrying `tag`, depth-first pre-order. With
    /// `deep == false` only direct children are inspected.
    pub fn find_by_tag(&self, from: NodeId, tag: &str, deep: bool) -> Vec<NodeId> {
        let mut found = Vec::new();
        let Some(node) = self.nodes.get(from) else {
            return found;
        };
        for &child in &node.children {
            if deep {
                self.traverse(child, |id, n| {
                    if n.has_tag(tag) {
                        found.push(id);
                    }
                    ControlFlow::<()>::Continue(())
                });
            } else if self.nodes[child].has_tag(tag) {
                found.push(child);
            }
        }
        found
    }

    /// Pre-order walk starting at (and including) `from`. A visitor
    /// returning `Break(value)` stops the walk and `Some(value)` is returned.
    pub fn traverse<B, F>(&self, from: NodeId, mut visitor: F) -> Option<B>
    where
        F: FnMut(NodeId, &Node) -> ControlFlow<B>,
    {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if let ControlFlow::Break(value) = visitor(id, node) {
                return Some(value);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Ids of `from` and its descendants, pre-order.
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.traverse(from, |id, _| {
            ids.push(id);
            ControlFlow::<()>::Continue(())
        });
        ids
    }

    /// Mark `id` for destruction at the end of the current tick.
    ///
    /// # Panics
    /// If `id` is the active root.
    pub fn request_destroy(&mut self, id: NodeId) {
        assert!(id != self.root, "the active root cannot be destroyed");
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.destroyed {
            node.destroyed = true;
            self.destroy_queue.push(id);
        }
    }

    pub fn pending_destroy(&self) -> usize {
        self.destroy_queue.len()
    }

    /// Tear down every queued node and its subtree: listeners are told
    /// [`NodeEvent::Destroyed`], pooled components go back to `pool`
    /// children first, colliders leave the physics registry and the subtree
    /// is unlinked from its parent. Returns the number of nodes removed.
    pub fn drain_destroy_queue(&mut self, pool: &mut PoolManager) -> usize {
        let queue = std::mem::take(&mut self.destroy_queue);
        let mut removed = 0;

        for id in queue {
            if !self.nodes.contains_key(id) {
                // Already torn down with an ancestor.
                continue;
            }
            assert!(id != self.root, "the active root cannot be destroyed");

            let parent = self.nodes[id].parent;
            let mut subtree = self.preorder(id);

            // Reverse pre-order visits every child before its parent.
            subtree.reverse();
            for node_id in subtree {
                let Some(mut node) = self.nodes.remove(node_id) else {
                    continue;
                };
                self.physics.remove(node_id);
                if node.in_tree {
                    node.events.emit(&NodeEvent::ExitTree);
                }
                node.events.emit(&NodeEvent::Destroyed);
                node.release(pool);
                removed += 1;
            }

            if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(p)) {
                parent_node.children.retain(|&c| c != id);
            }
        }

        if removed > 0 {
            debug!("destroyed {removed} node(s), {} live", self.nodes.len());
        }
        removed
    }

    /// Make `new_root` the active root. The previous root's subtree leaves
    /// the tree and is queued for destruction.
    ///
    /// # Panics
    /// If `new_root` is stale or still attached to a parent.
    pub fn change_root(&mut self, new_root: NodeId) {
        assert!(
            self.nodes.contains_key(new_root),
            "change_root: {new_root:?} is not in the scene"
        );
        assert!(
            self.nodes[new_root].parent.is_none(),
            "change_root: {new_root:?} must be detached"
        );
        if new_root == self.root {
            return;
        }

        let old_root = std::mem::replace(&mut self.root, new_root);
        self.exit_tree(old_root);
        self.enter_tree(new_root);
        self.request_destroy(old_root);
        debug!("scene root changed to {new_root:?}");
    }

    pub fn subscribe<F>(&mut self, id: NodeId, callback: F) -> Option<Subscription>
    where
        F: FnMut(&NodeEvent) + 'static,
    {
        self.nodes.get_mut(id).map(|n| n.subscribe(callback))
    }

    pub fn unsubscribe(&mut self, id: NodeId, handle: Subscription) -> bool {
        self.nodes
            .get_mut(id)
            .is_some_and(|n| n.unsubscribe(handle))
    }

    /// Queue `event` for `id`; delivered by [`SceneTree::dispatch_events`].
    pub fn queue_event(&mut self, id: NodeId, event: NodeEvent) {
        self.pending_events.push_back((id, event));
    }

    pub fn pending_events(&self) -> usize {
        self.pending_events.len()
    }

    /// Deliver queued events to node listeners, then to the node's
    /// behaviour. Events queued by callbacks are delivered in the same call.
    pub fn dispatch_events(&mut self, pool: &mut PoolManager) {
        while let Some((id, event)) = self.pending_events.pop_front() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.events.emit(&event);

            if let Some(mut behaviour) = node.behaviour.take() {
                let mut ctx = NodeContext {
                    node: id,
                    scene: &mut *self,
                    pool: &mut *pool,
                };
                behaviour.on_event(&mut ctx, &event);
                self.restore_behaviour(id, behaviour);
            }
        }
    }

    /// Run every in-tree behaviour once, pre-order from the root. Nodes
    /// attached while this runs are first updated on the next call.
    pub fn update(&mut self, pool: &mut PoolManager, dt: f32) {
        for id in self.preorder(self.root) {
            let Some(mut behaviour) = self
                .nodes
                .get_mut(id)
                .filter(|n| n.in_tree)
                .and_then(|n| n.behaviour.take())
            else {
                continue;
            };
            let mut ctx = NodeContext {
                node: id,
                scene: &mut *self,
                pool: &mut *pool,
            };
            behaviour.update(&mut ctx, dt);
            self.restore_behaviour(id, behaviour);
        }
    }

    /// Flag in-tree nodes drawn on an earlier frame as ready and queue their
    /// [`NodeEvent::Ready`].
    pub fn mark_ready(&mut self) {
        let mut newly_ready = Vec::new();
        for (id, node) in &mut self.nodes {
            if node.in_tree && node.drawn && !node.ready {
                node.ready = true;
                newly_ready.push(id);
            }
        }
        for id in newly_ready {
            self.queue_event(id, NodeEvent::Ready);
        }
    }

    fn restore_behaviour(&mut self, id: NodeId, behaviour: Box<dyn Updatable>) {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.behaviour.is_none() {
                node.behaviour = Some(behaviour);
            }
        }
    }

    fn enter_tree(&mut self, from: NodeId) {
        for id in self.preorder(from) {
            let node = &mut self.nodes[id];
            if node.in_tree {
                continue;
            }
            node.in_tree = true;
            self.sync_collider(id);
            self.pending_events.push_back((id, NodeEvent::EnterTree));
        }
    }

    /// A re-attached node waits for a fresh first draw before `Ready`.
    fn exit_tree(&mut self, from: NodeId) {
        for id in self.preorder(from) {
            let node = &mut self.nodes[id];
            if !node.in_tree {
                continue;
            }
            node.in_tree = false;
            node.drawn = false;
            node.ready = false;
            self.sync_collider(id);
            self.pending_events.push_back((id, NodeEvent::ExitTree));
        }
    }

    /// Registered iff the node is in the tree with both a collision and a
    /// transform. Leaving the registry clears contacts and the world shape.
    fn sync_collider(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let active = node.in_tree && node.transform.is_some();
        match node.collision.as_mut() {
            Some(_) if active => self.physics.add(id),
            Some(collision) => {
                collision.reset_contacts();
                self.physics.remove(id);
            }
            None => self.physics.remove(id),
        }
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(scene: &mut SceneTree, tag: &str) -> NodeId {
        scene.insert(Node::new().with_tag(tag))
    }

    #[test]
    fn add_child_reparents_consistently() {
        let mut scene = SceneTree::new();
        let root = scene.root();
        let a = tagged(&mut scene, "a");
        let b = tagged(&mut scene, "b");
        let c = tagged(&mut scene, "c");

        scene.add_child(root, a);
        scene.add_child(root, b);
        scene.add_child(a, c);
        scene.add_child(b, c);

        assert_eq!(scene.get(c).unwrap().parent(), Some(b));
        assert!(scene.get(a).unwrap().children().is_empty());
        assert_eq!(scene.get(b).unwrap().children(), &[c]);
        assert!(scene.is_ancestor(root, c));
        assert!(!scene.is_ancestor(a, c));
    }

    #[test]
    #[should_panic(expected = "would create a cycle")]
    fn attaching_under_a_descendant_panics() {
        let mut scene = SceneTree::new();
        let a = tagged(&mut scene, "a");
        let b = tagged(&mut scene, "b");
        scene.add_child(a, b);
        scene.add_child(b, a);
    }

    #[test]
    #[should_panic(expected = "is not in the scene")]
    fn stale_parent_panics() {
        let mut scene = SceneTree::new();
        let mut pool = PoolManager::with_defaults();
        let root = scene.root();
        let gone = tagged(&mut scene, "gone");
        scene.add_child(root, gone);
        scene.request_destroy(gone);
        scene.drain_destroy_queue(&mut pool);

        let orphan = tagged(&mut scene, "orphan");
        scene.add_child(gone, orphan);
    }

    #[test]
    fn find_by_tag_is_preorder_without_dedup() {
        let mut scene = SceneTree::new();
        let root = scene.root();
        let a = tagged(&mut scene, "enemy");
        let a1 = tagged(&mut scene, "enemy");
        let b = tagged(&mut scene, "wall");
        let b1 = tagged(&mut scene, "enemy");
        scene.add_child(root, a);
        scene.add_child(a, a1);
        scene.add_child(root, b);
        scene.add_child(b, b1);

        assert_eq!(scene.find_by_tag(root, "enemy", true), vec![a, a1, b1]);
        assert_eq!(scene.find_by_tag(root, "enemy", false), vec![a]);
        assert!(scene.find_by_tag(a1, "enemy", true).is_empty());
    }

    #[test]
    fn traverse_short_circuits_with_value() {
        let mut scene = SceneTree::new();
        let root = scene.root();
        let a = tagged(&mut scene, "a");
        let b = tagged(&mut scene, "target");
        let c = tagged(&mut scene, "c");
        scene.add_child(root, a);
        scene.add_child(a, b);
        scene.add_child(root, c);

        let mut visited = Vec::new();
        let hit = scene.traverse(root, |id, node| {
            visited.push(id);
            if node.has_tag("target") {
                ControlFlow::Break(id)
            } else {
                ControlFlow::Continue(())
            }
        });

        assert_eq!(hit, Some(b));
        assert_eq!(visited, vec![root, a, b]);
    }

    #[test]
    fn set_child_index_reorders_siblings() {
        let mut scene = SceneTree::new();
        let root = scene.root();
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let id = tagged(&mut scene, &i.to_string());
                scene.add_child(root, id);
                id
            })
            .collect();

        scene.set_child_index(ids[2], 0);
        assert_eq!(scene.get(root).unwrap().children(), &[ids[2], ids[0], ids[1]]);
        scene.set_child_index(ids[2], 99);
        assert_eq!(scene.get(root).unwrap().children(), &[ids[0], ids[1], ids[2]]);
    }

    #[test]
    fn enter_and_exit_are_queued_for_subtrees() {
        let mut scene = SceneTree::new();
        let root = scene.root();
        let a = tagged(&mut scene, "a");
        let b = tagged(&mut scene, "b");
        scene.add_child(a, b);
        assert_eq!(scene.pending_events(), 0);

        scene.add_child(root, a);
        assert!(scene.get(b).unwrap().is_in_tree());
        assert_eq!(scene.pending_events(), 2);

        scene.remove_child(root, a);
        assert!(!scene.get(b).unwrap().is_in_tree());
        assert_eq!(scene.pending_events(), 4);
    }

    #[test]
    fn drain_removes_subtree_and_notifies_listeners() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut scene = SceneTree::new();
        let mut pool = PoolManager::with_defaults();
        let root = scene.root();
        let a = tagged(&mut scene, "a");
        let b = tagged(&mut scene, "b");
        scene.add_child(root, a);
        scene.add_child(a, b);

        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            scene.subscribe(b, move |e| seen.borrow_mut().push(e.clone()));
        }

        scene.request_destroy(a);
        assert!(scene.contains(a));
        assert_eq!(scene.drain_destroy_queue(&mut pool), 2);

        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
        assert!(scene.get(root).unwrap().children().is_empty());
        assert_eq!(
            *seen.borrow(),
            vec![NodeEvent::ExitTree, NodeEvent::Destroyed]
        );
    }

    #[test]
    fn change_root_swaps_trees() {
        let mut scene = SceneTree::new();
        let mut pool = PoolManager::with_defaults();
        let old_root = scene.root();
        let old_child = tagged(&mut scene, "old");
        scene.add_child(old_root, old_child);

        let level = tagged(&mut scene, "level");
        scene.change_root(level);

        assert_eq!(scene.root(), level);
        assert!(scene.get(level).unwrap().is_in_tree());
        assert!(!scene.get(old_child).unwrap().is_in_tree());

        scene.drain_destroy_queue(&mut pool);
        assert!(!scene.contains(old_root));
        assert!(!scene.contains(old_child));
        assert_eq!(scene.len(), 1);
    }
}
