use scene_ngin::{
    Deg, InnerSpace, Quaternion, Rad, Rotation3, Vector3,
    components::{ComponentKind, LightComponent, LightType, TextComponent},
    data_structures::scene_graph::Scene,
};

use crate::common::test_utils::*;
mod common;

#[test]
fn world_transform_follows_the_hierarchy() {
    let mut scene = Scene::new();
    let arm = scene.add_node("arm");
    let hand = scene.add_node("hand");
    assert!(scene.add_child(arm, hand));

    scene.set_local_translation(arm, Vector3::new(1.0, 0.0, 0.0));
    scene.set_local_rotation(arm, Quaternion::from_angle_z(Deg(90.0)));
    scene.set_local_translation(hand, Vector3::new(2.0, 0.0, 0.0));
    assert!(close_vec(scene.world_translation(hand), Vector3::new(1.0, 2.0, 0.0)));

    // Moving the parent after the child was resolved invalidates the cached matrix.
    scene.set_local_translation(arm, Vector3::new(0.0, 0.0, 3.0));
    assert!(close_vec(scene.world_translation(hand), Vector3::new(0.0, 2.0, 3.0)));
}

#[test]
fn cycles_are_refused_without_side_effects() {
    let mut scene = Scene::new();
    let a = scene.add_node("a");
    let b = scene.add_node("b");
    let c = scene.add_node("c");
    assert!(scene.add_child(a, b));
    assert!(scene.add_child(b, c));

    assert!(!scene.add_child(c, a));
    assert!(!scene.add_child(a, a));
    assert_eq!(scene.root_nodes(), &[a]);
    assert_eq!(scene.node(c).unwrap().parent(), Some(b));
}

#[test]
fn world_placement_under_a_transformed_parent() {
    let mut scene = Scene::new();
    let parent = scene.add_node("parent");
    let child = scene.add_node("child");
    scene.add_child(parent, child);
    scene.set_local_translation(parent, Vector3::new(5.0, -1.0, 2.0));
    scene.set_local_scale(parent, Vector3::new(2.0, 2.0, 2.0));
    scene.set_local_rotation(parent, Quaternion::from_angle_y(Rad(0.7)));

    let target = Vector3::new(-3.0, 4.0, 0.5);
    scene.set_world_translation(child, target);
    assert!(close_vec(scene.world_translation(child), target));

    // Rotation extraction assumes an unscaled hierarchy.
    scene.set_local_scale(parent, Vector3::new(1.0, 1.0, 1.0));
    let rotation = Quaternion::from_angle_x(Deg(30.0));
    scene.set_world_rotation(child, rotation);
    let world = scene.world_rotation(child);
    // q and -q describe the same rotation.
    assert!(close(world.dot(rotation).abs(), 1.0));
}

#[test]
fn world_translation_round_trips_through_ancestor_chains() {
    for depth in 0..=5 {
        let mut scene = Scene::new();
        let mut parent = None;
        for level in 0..depth {
            let node = scene.add_node(format!("ancestor {}", level));
            let f = level as f32 + 1.0;
            scene.set_local_translation(node, Vector3::new(f, -0.5 * f, 0.25 * f));
            scene.set_local_rotation(
                node,
                Quaternion::from_axis_angle(Vector3::new(1.0, f, -0.5).normalize(), Rad(0.3 * f)),
            );
            scene.set_local_scale(node, Vector3::new(1.0 + 0.1 * f, 0.9, 1.2));
            if let Some(parent) = parent {
                assert!(scene.add_child(parent, node));
            }
            parent = Some(node);
        }
        let leaf = scene.add_node("leaf");
        if let Some(parent) = parent {
            assert!(scene.add_child(parent, leaf));
        }

        let target = Vector3::new(2.5, -1.0, 4.0);
        scene.set_world_translation(leaf, target);
        assert!(
            close_vec(scene.world_translation(leaf), target),
            "depth {}: {:?}",
            depth,
            scene.world_translation(leaf)
        );
    }
}

#[test]
fn detached_subtree_keeps_its_local_transforms() {
    let mut scene = Scene::new();
    let root = scene.add_node("root");
    let child = scene.add_node("child");
    scene.add_child(root, child);
    scene.set_local_translation(root, Vector3::new(10.0, 0.0, 0.0));
    scene.set_local_translation(child, Vector3::new(1.0, 0.0, 0.0));
    assert!(close_vec(scene.world_translation(child), Vector3::new(11.0, 0.0, 0.0)));

    assert!(scene.remove_child(root, child));
    assert!(close_vec(scene.world_translation(child), Vector3::new(1.0, 0.0, 0.0)));
    assert_eq!(scene.root_nodes(), &[root, child]);
}

#[test]
fn components_are_found_by_kind_and_replaced() {
    let (ctx, _) = recording_context();
    let mut scene = Scene::new();
    let node = scene.add_node("label");

    let mut text = TextComponent::new(ctx.device());
    text.set_text("hi", 0.5, 0.5);
    assert!(scene.add_component(node, text));
    assert!(scene.add_component(node, LightComponent::new(LightType::Point)));
    assert!(scene.add_component(node, LightComponent::new(LightType::Directional)));

    assert_eq!(scene.node(node).unwrap().components().len(), 2);
    assert_eq!(
        scene.component::<LightComponent>(node).unwrap().light_type(),
        LightType::Directional
    );
    assert_eq!(scene.component::<TextComponent>(node).unwrap().text(), "hi");
    assert_eq!(scene.component::<LightComponent>(node).unwrap().node(), Some(node));

    assert!(scene.remove_component(node, ComponentKind::Light).is_some());
    assert!(scene.component::<LightComponent>(node).is_none());
    assert!(!scene.add_component(node + 100, LightComponent::default()));
}

#[test]
fn find_searches_by_name() {
    let mut scene = Scene::new();
    let a = scene.add_node("a");
    let b = scene.add_node("b");
    scene.add_child(a, b);
    assert_eq!(scene.find("b"), Some(b));
    assert_eq!(scene.find("missing"), None);

    assert!(scene.remove_node(a));
    assert!(scene.is_empty());
    assert_eq!(scene.find("b"), None);
}
