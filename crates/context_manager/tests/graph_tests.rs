use std::sync::Arc;

use chat_core::{IdGenerator, Message, Role, SequentialIdGenerator};
use context_manager::error::GraphError;
use context_manager::graph::{ConversationGraph, GraphSnapshot};

fn ids() -> Arc<dyn IdGenerator> {
    Arc::new(SequentialIdGenerator::new("v"))
}

fn message_ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.clone()).collect()
}

/// root -> g1 -> u1 -> {a1, a2}, root -> g2 -> u2; active on a1.
fn branched() -> ConversationGraph {
    let mut graph = ConversationGraph::seeded(
        ids(),
        vec![Message::text("defs", Role::System, "Definitions")],
        vec![
            Message::text("g1", Role::Assistant, "Hello"),
            Message::text("g2", Role::Assistant, "Hi"),
        ],
    );
    let g1 = graph.root().children[0].clone();
    let g2 = graph.root().children[1].clone();
    let u1 = graph
        .branch_from(&g1, vec![Message::text("u1", Role::User, "Sing")])
        .unwrap();
    let a1 = graph
        .branch_from(&u1, vec![Message::text("a1", Role::Assistant, "La")])
        .unwrap();
    graph
        .branch_from(&u1, vec![Message::text("a2", Role::Assistant, "Do")])
        .unwrap();
    graph
        .branch_from(&g2, vec![Message::text("u2", Role::User, "Dance")])
        .unwrap();
    graph.set_active(&a1).unwrap();
    graph
}

#[test]
fn flatten_follows_only_the_active_path() {
    let mut graph = ConversationGraph::new(ids());
    let root = graph.id().to_string();
    graph
        .branch_from(&root, vec![Message::text("first", Role::Assistant, "One")])
        .unwrap();
    let second = graph
        .branch_from(&root, vec![Message::text("second", Role::Assistant, "Two")])
        .unwrap();
    assert_eq!(graph.root().children.len(), 2);

    graph.set_active(&second).unwrap();
    assert_eq!(message_ids(&graph.flatten()), vec!["second"]);
}

#[test]
fn save_and_restore_preserve_everything() {
    let graph = branched();
    let snapshot = graph.save();

    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: GraphSnapshot = serde_json::from_str(&json).unwrap();
    let restored = ConversationGraph::restore(parsed, ids()).unwrap();

    assert_eq!(restored, graph);
    assert_eq!(restored.flatten(), graph.flatten());
    assert_eq!(restored.terminal_choices(), graph.terminal_choices());
    assert_eq!(restored.active_vertex(), graph.active_vertex());
}

#[test]
fn restore_never_returns_a_partial_graph() {
    let mut snapshot = branched().save();
    let orphan = snapshot.vertices.len() - 1;
    snapshot.vertices[orphan].parents = vec!["ghost".into()];

    let result = ConversationGraph::restore(snapshot, ids());
    assert!(matches!(result, Err(GraphError::InvalidSnapshot(_))));
}

#[test]
fn deleting_a_branch_point_keeps_its_descendants() {
    let mut graph = branched();
    let g1 = graph.root().children[0].clone();
    let u1 = graph.vertex(&g1).unwrap().children[0].clone();
    let replies = graph.vertex(&u1).unwrap().children.clone();

    graph.delete_vertex(&u1).unwrap();

    assert_eq!(graph.vertex(&g1).unwrap().children, replies);
    for reply in &replies {
        assert_eq!(graph.vertex(reply).unwrap().parent(), Some(g1.as_str()));
    }
    assert_eq!(message_ids(&graph.flatten()), vec!["defs", "g1", "a1"]);
}

#[test]
fn deleting_the_active_vertex_moves_activity_up() {
    let mut graph = branched();
    let active = graph.active_vertex().to_string();
    let parent = graph.vertex(&active).unwrap().parent().unwrap().to_string();

    graph.delete_vertex(&active).unwrap();

    assert_eq!(graph.active_vertex(), parent);
    assert_eq!(message_ids(&graph.flatten()), vec!["defs", "g1", "u1"]);
}

#[test]
fn sibling_switch_returns_to_the_last_viewed_leaf() {
    let mut graph = branched();
    let g1 = graph.root().children[0].clone();
    let g2 = graph.root().children[1].clone();

    let (sibling, leaf) = graph.target_sibling(&g1, 1).unwrap();
    assert_eq!(sibling, g2);
    graph.set_active(&leaf).unwrap();
    assert_eq!(message_ids(&graph.flatten()), vec!["defs", "g2", "u2"]);

    let (_, leaf) = graph.target_sibling(&g2, 1).unwrap();
    graph.set_active(&leaf).unwrap();
    assert_eq!(message_ids(&graph.flatten()), vec!["defs", "g1", "u1", "a1"]);
}
