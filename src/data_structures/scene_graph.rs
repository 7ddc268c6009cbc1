//! Scene graph and hierarchical transforms.
//!
//! Nodes live in an arena owned by [`Scene`] and refer to each other by
//! [`NodeId`]. A node holds its local translation/rotation/scale and caches its
//! local and world matrices. Any transform change marks the node and its whole
//! subtree dirty, the matrices are recomputed lazily on the next read.
//!
//! The hierarchy is always a forest: attaching a node below one of its own
//! descendants is refused.

use std::{cell::Cell, collections::HashMap};

use cgmath::{Matrix3, Matrix4, One, Quaternion, SquareMatrix, Vector3};

use crate::components::{Component, ComponentKind, ComponentType};

/// Unique identifier for a node of a [`Scene`].
pub type NodeId = u32;

pub struct Node {
    name: String,

    translation: Vector3<f32>,
    rotation: Quaternion<f32>,
    scale: Vector3<f32>,

    local_dirty: Cell<bool>,
    world_dirty: Cell<bool>,
    local: Cell<Matrix4<f32>>,
    world: Cell<Matrix4<f32>>,

    parent: Option<NodeId>,
    children: Vec<NodeId>,

    components: Vec<Component>,
    by_kind: HashMap<ComponentKind, usize>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            translation: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            local_dirty: Cell::new(true),
            world_dirty: Cell::new(true),
            local: Cell::new(Matrix4::identity()),
            world: Cell::new(Matrix4::identity()),
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            by_kind: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn local_translation(&self) -> Vector3<f32> {
        self.translation
    }

    pub fn local_rotation(&self) -> Quaternion<f32> {
        self.rotation
    }

    pub fn local_scale(&self) -> Vector3<f32> {
        self.scale
    }

    pub fn is_dirty(&self) -> bool {
        self.local_dirty.get() || self.world_dirty.get()
    }

    /// `T * R * S`, recomputed only if the local transform changed.
    pub fn local_transform(&self) -> Matrix4<f32> {
        if self.local_dirty.get() {
            self.local.set(
                Matrix4::from_translation(self.translation)
                    * Matrix4::from(self.rotation)
                    * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z),
            );
            self.local_dirty.set(false);
        }
        self.local.get()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component<T: ComponentType>(&self) -> Option<&T> {
        let index = *self.by_kind.get(&T::KIND)?;
        T::from_component(&self.components[index])
    }

    pub fn component_mut<T: ComponentType>(&mut self) -> Option<&mut T> {
        let index = *self.by_kind.get(&T::KIND)?;
        T::from_component_mut(&mut self.components[index])
    }

    fn mark_dirty(&self) {
        self.local_dirty.set(true);
        self.world_dirty.set(true);
    }

    fn reindex_components(&mut self) {
        self.by_kind = self
            .components
            .iter()
            .enumerate()
            .map(|(index, component)| (component.kind(), index))
            .collect();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("translation", &self.translation)
            .field("rotation", &self.rotation)
            .field("scale", &self.scale)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("components", &self.components.iter().map(Component::kind).collect::<Vec<_>>())
            .finish()
    }
}

/// Owns every node of a scene.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: HashMap<NodeId, Node>,
    root_nodes: Vec<NodeId>,
    next_node_id: NodeId,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached node with an identity transform.
    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(id, Node::new(name.into()));
        self.root_nodes.push(id);
        id
    }

    /// Removes a node and its whole subtree. Components are dropped with their nodes.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        match node.parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => self.root_nodes.retain(|root| *root != id),
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes without a parent, in creation or detach order.
    pub fn root_nodes(&self) -> &[NodeId] {
        &self.root_nodes
    }

    /// First node called `name`, searching depth first from the roots.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        let mut found = None;
        self.walk(|id, node| {
            if found.is_none() && node.name == name {
                found = Some(id);
            }
        });
        found
    }

    /// Whether `ancestor` is `id` or lies on the path from `id` to its root.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.nodes.get(&node).and_then(|n| n.parent);
        }
        false
    }

    /// Attaches `child` below `parent`, detaching it from its previous parent.
    ///
    /// Refuses (returns `false`, nothing changes) when `child` is `parent` or
    /// one of its ancestors, or when either node does not exist.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.nodes.contains_key(&parent) || !self.nodes.contains_key(&child) {
            log::error!("Can not attach node {} to node {}: unknown node", child, parent);
            return false;
        }

        let mut stack = vec![child];
        while let Some(current) = stack.pop() {
            if current == parent {
                log::error!(
                    "Adding node \"{}\" as a child of node \"{}\" would create a cycle",
                    self.nodes[&child].name,
                    self.nodes[&parent].name
                );
                return false;
            }
            stack.extend(self.nodes[&current].children.iter().copied());
        }

        if let Some(previous) = self.nodes[&child].parent {
            self.remove_child(previous, child);
        }
        self.root_nodes.retain(|root| *root != child);

        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
        self.set_dirty(child);
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
        true
    }

    /// Detaches `child` from `parent`, leaving it a root.
    ///
    /// Removing a node that is not a child of `parent` changes nothing but still
    /// succeeds. Only an unknown `child` fails.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.nodes.contains_key(&child) {
            log::error!("Can not remove missing node {}", child);
            return false;
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.retain(|c| *c != child);
        }
        if self.nodes[&child].parent == Some(parent) {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = None;
            }
            self.root_nodes.push(child);
            self.set_dirty(child);
        }
        true
    }

    /// Marks `id` and every descendant dirty.
    pub fn set_dirty(&self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                node.mark_dirty();
                stack.extend(node.children.iter().copied());
            }
        }
    }

    pub fn set_local_translation(&mut self, id: NodeId, translation: Vector3<f32>) {
        self.set_dirty(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.translation = translation;
        }
    }

    pub fn set_local_rotation(&mut self, id: NodeId, rotation: Quaternion<f32>) {
        self.set_dirty(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.rotation = rotation;
        }
    }

    pub fn set_local_scale(&mut self, id: NodeId, scale: Vector3<f32>) {
        self.set_dirty(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.scale = scale;
        }
    }

    /// Moves the node so its world translation becomes `translation`.
    pub fn set_world_translation(&mut self, id: NodeId, translation: Vector3<f32>) {
        let Some(inverse) = self.parent_world_transform(id).invert() else {
            log::error!("Can not place node {} in world space: parent transform is singular", id);
            return;
        };
        let local = inverse * translation.extend(1.0);
        self.set_local_translation(id, local.truncate());
    }

    /// Rotates the node so its world rotation becomes `rotation`.
    pub fn set_world_rotation(&mut self, id: NodeId, rotation: Quaternion<f32>) {
        let Some(inverse) = self.parent_world_transform(id).invert() else {
            log::error!("Can not rotate node {} in world space: parent transform is singular", id);
            return;
        };
        self.set_local_rotation(id, rotation_of(&inverse) * rotation);
    }

    /// Local matrix of `id`. Unknown nodes resolve to identity.
    pub fn local_transform(&self, id: NodeId) -> Matrix4<f32> {
        self.nodes
            .get(&id)
            .map(Node::local_transform)
            .unwrap_or_else(Matrix4::identity)
    }

    /// `parent_world * local`, resolved lazily up to the root. Unknown nodes
    /// resolve to identity.
    pub fn world_transform(&self, id: NodeId) -> Matrix4<f32> {
        let Some(node) = self.nodes.get(&id) else {
            return Matrix4::identity();
        };
        if node.world_dirty.get() {
            let parent = node
                .parent
                .map(|parent| self.world_transform(parent))
                .unwrap_or_else(Matrix4::identity);
            node.world.set(parent * node.local_transform());
            node.world_dirty.set(false);
        }
        node.world.get()
    }

    fn parent_world_transform(&self, id: NodeId) -> Matrix4<f32> {
        self.nodes
            .get(&id)
            .and_then(|node| node.parent)
            .map(|parent| self.world_transform(parent))
            .unwrap_or_else(Matrix4::identity)
    }

    pub fn world_translation(&self, id: NodeId) -> Vector3<f32> {
        self.world_transform(id).w.truncate()
    }

    /// Rotation extracted from the world matrix.
    ///
    /// Only exact while no ancestor carries a non-uniform scale.
    pub fn world_rotation(&self, id: NodeId) -> Quaternion<f32> {
        rotation_of(&self.world_transform(id))
    }

    /// Attaches `component` to `id`, replacing a component of the same kind.
    pub fn add_component(&mut self, id: NodeId, component: impl Into<Component>) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            log::error!("Can not add a component to missing node {}", id);
            return false;
        };
        let mut component = component.into();
        if let Some(index) = node.by_kind.get(&component.kind()).copied() {
            node.components.remove(index);
        }
        component.attach(id);
        node.components.push(component);
        node.reindex_components();
        true
    }

    pub fn remove_component(&mut self, id: NodeId, kind: ComponentKind) -> Option<Component> {
        let node = self.nodes.get_mut(&id)?;
        let index = node.by_kind.get(&kind).copied()?;
        let component = node.components.remove(index);
        node.reindex_components();
        Some(component)
    }

    pub fn component<T: ComponentType>(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(&id)?.component()
    }

    pub fn component_mut<T: ComponentType>(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(&id)?.component_mut()
    }

    /// Visits `id` and its subtree depth first, parents before children.
    pub fn walk_from(&self, id: NodeId, mut visit: impl FnMut(NodeId, &Node)) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            visit(current, node);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    /// Visits every node depth first, root by root.
    pub fn walk(&self, mut visit: impl FnMut(NodeId, &Node)) {
        for root in self.root_nodes.iter().copied() {
            self.walk_from(root, &mut visit);
        }
    }
}

fn rotation_of(matrix: &Matrix4<f32>) -> Quaternion<f32> {
    let rotation = Matrix3::from_cols(matrix.x.truncate(), matrix.y.truncate(), matrix.z.truncate());
    Quaternion::from(rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ComponentKind, LightComponent, LightType};
    use cgmath::{Deg, InnerSpace, Rotation3, Vector4};

    fn chain(scene: &mut Scene, length: usize) -> Vec<NodeId> {
        let ids: Vec<NodeId> = (0..length).map(|i| scene.add_node(format!("n{}", i))).collect();
        for pair in ids.windows(2) {
            assert!(scene.add_child(pair[0], pair[1]));
        }
        ids
    }

    #[test]
    fn cycle_is_refused() {
        let mut scene = Scene::new();
        let ids = chain(&mut scene, 3);
        assert!(!scene.add_child(ids[2], ids[0]));
        assert!(!scene.add_child(ids[1], ids[1]));
        assert_eq!(scene.node(ids[0]).unwrap().parent(), None);
        assert_eq!(scene.node(ids[2]).unwrap().children(), &[] as &[NodeId]);
        assert_eq!(scene.root_nodes(), &[ids[0]]);
    }

    #[test]
    fn reparenting_detaches_from_previous_parent() {
        let mut scene = Scene::new();
        let a = scene.add_node("a");
        let b = scene.add_node("b");
        let c = scene.add_node("c");
        assert!(scene.add_child(a, c));
        assert!(scene.add_child(b, c));
        assert!(scene.node(a).unwrap().children().is_empty());
        assert_eq!(scene.node(b).unwrap().children(), &[c]);
        assert_eq!(scene.node(c).unwrap().parent(), Some(b));
    }

    #[test]
    fn remove_child_clears_parent() {
        let mut scene = Scene::new();
        let ids = chain(&mut scene, 2);
        assert!(scene.remove_child(ids[0], ids[1]));
        assert_eq!(scene.node(ids[1]).unwrap().parent(), None);
        assert!(scene.root_nodes().contains(&ids[1]));
        assert!(!scene.remove_child(ids[0], 999));
    }

    #[test]
    fn remove_child_of_other_parent_keeps_link() {
        let mut scene = Scene::new();
        let ids = chain(&mut scene, 2);
        let stranger = scene.add_node("stranger");
        assert!(scene.remove_child(stranger, ids[1]));
        assert_eq!(scene.node(ids[1]).unwrap().parent(), Some(ids[0]));
    }

    #[test]
    fn parent_change_propagates_to_descendants_only() {
        let mut scene = Scene::new();
        let ids = chain(&mut scene, 3);
        scene.set_local_translation(ids[2], Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(scene.world_translation(ids[2]), Vector3::new(0.0, 0.0, 1.0));

        scene.set_local_translation(ids[1], Vector3::new(1.0, 0.0, 0.0));
        assert!(scene.node(ids[2]).unwrap().is_dirty());
        assert!(!scene.node(ids[0]).unwrap().is_dirty());
        assert_eq!(scene.world_translation(ids[2]), Vector3::new(1.0, 0.0, 1.0));
        assert_eq!(scene.world_translation(ids[0]), Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn local_transform_is_translation_rotation_scale() {
        let mut scene = Scene::new();
        let id = scene.add_node("trs");
        scene.set_local_scale(id, Vector3::new(2.0, 2.0, 2.0));
        scene.set_local_rotation(id, Quaternion::from_angle_z(Deg(90.0)));
        scene.set_local_translation(id, Vector3::new(5.0, 0.0, 0.0));
        let p = scene.local_transform(id) * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert!((p - Vector4::new(5.0, 2.0, 0.0, 1.0)).magnitude() < 1e-5, "{:?}", p);
    }

    #[test]
    fn world_rotation_round_trip() {
        let mut scene = Scene::new();
        let ids = chain(&mut scene, 2);
        scene.set_local_rotation(ids[0], Quaternion::from_angle_y(Deg(30.0)));
        let target = Quaternion::from_angle_x(Deg(45.0));
        scene.set_world_rotation(ids[1], target);
        let actual = scene.world_rotation(ids[1]);
        // q and -q are the same rotation.
        assert!((actual.dot(target).abs() - 1.0).abs() < 1e-5, "{:?}", actual);
    }

    #[test]
    fn component_of_same_kind_is_replaced() {
        let mut scene = Scene::new();
        let id = scene.add_node("light");
        scene.add_component(id, LightComponent::new(LightType::Point));
        scene.add_component(id, LightComponent::new(LightType::Directional));

        let node = scene.node(id).unwrap();
        assert_eq!(node.components().len(), 1);
        let light = scene.component::<LightComponent>(id).unwrap();
        assert_eq!(light.light_type(), LightType::Directional);
        assert_eq!(light.node(), Some(id));

        assert!(scene.remove_component(id, ComponentKind::Light).is_some());
        assert!(scene.component::<LightComponent>(id).is_none());
    }

    #[test]
    fn remove_node_drops_subtree() {
        let mut scene = Scene::new();
        let ids = chain(&mut scene, 3);
        let other = scene.add_node("other");
        assert!(scene.remove_node(ids[1]));
        assert!(scene.contains(ids[0]));
        assert!(!scene.contains(ids[1]));
        assert!(!scene.contains(ids[2]));
        assert!(scene.node(ids[0]).unwrap().children().is_empty());
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.find("other"), Some(other));
    }

    #[test]
    fn walk_visits_parents_first_in_child_order() {
        let mut scene = Scene::new();
        let root = scene.add_node("root");
        let a = scene.add_node("a");
        let b = scene.add_node("b");
        let a1 = scene.add_node("a1");
        scene.add_child(root, a);
        scene.add_child(root, b);
        scene.add_child(a, a1);
        let mut order = Vec::new();
        scene.walk(|id, _| order.push(id));
        assert_eq!(order, vec![root, a, a1, b]);
    }
}
