use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use visboard::ai::CanvasAssistant;
use visboard::board::BoardStore;
use visboard::store::StoreFactory;
use visboard::testing::{ScriptedClient, memory_board, wait_for_event};
use visboard_api::{ChangeOrigin, KnowledgeData, MAIN_BRANCH_ID, Message, Role, Side};

fn knowledge(side: Side, title: &str) -> KnowledgeData {
    KnowledgeData {
        branch_id: MAIN_BRANCH_ID.to_string(),
        title: Some(title.to_string()),
        content: format!("about {title}"),
        timestamp: 1,
        took_seconds: 0.0,
        token_per_second: 0.0,
        parent_id: None,
        side,
    }
}

#[tokio::test]
async fn test_replicas_converge_after_exchanging_updates() -> Result<()> {
    let a = memory_board("shared").await?;
    let b = BoardStore::open(&StoreFactory::in_memory(), "shared").await?;
    b.store().merge_update(&a.store().export_snapshot().await?).await?;
    assert!(b.config().await?.is_initialized);

    let a_before = a.store().version().await;
    let b_before = b.store().version().await;

    a.push_message(MAIN_BRANCH_ID, &Message::new("m1", Role::User, "hello", 2))
        .await?;
    let k = b.add_knowledge(knowledge(Side::Right, "Borrowing")).await?;

    let from_a = a.store().export_update(&b_before).await?;
    let from_b = b.store().export_update(&a_before).await?;
    let mut events = a.store().subscribe().await;
    a.store().merge_update(&from_b).await?;
    b.store().merge_update(&from_a).await?;

    let event = wait_for_event(&mut events, Duration::from_secs(1), |e| {
        e.origin == ChangeOrigin::Remote
    })
    .await?;
    assert_eq!(event.room_id, "board-shared");

    let snap_a = a.snapshot().await?;
    let snap_b = b.snapshot().await?;
    assert_eq!(snap_a, snap_b);
    assert!(snap_a.knowledge(&k).is_some());
    assert_eq!(snap_a.edges.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_streamed_reply_matches_single_write() -> Result<()> {
    let board = memory_board("stream").await?;
    let client = ScriptedClient::new().with_stream(["Own", "ership ", "moves ", "values."]);
    let assistant = CanvasAssistant::new(board.clone(), Arc::new(client));

    let reply_id = assistant
        .send_text_message("What is ownership?")
        .await?
        .expect("reply");

    let main = board.active_branch().await?.expect("active branch");
    let messages = &main.as_branch().expect("branch").messages;
    let reply = messages.iter().find(|m| m.id == reply_id).expect("reply");
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content_str(), "Ownership moves values.");
    assert!(!assistant.is_receiving_message());
    Ok(())
}

#[tokio::test]
async fn test_deleting_left_node_keeps_right_side_in_place() -> Result<()> {
    let board = memory_board("sides").await?;
    let left = board.add_knowledge(knowledge(Side::Left, "Left")).await?;
    let right = board.add_knowledge(knowledge(Side::Right, "Right")).await?;

    let position_of = |nodes: &[visboard_api::Node], id: &str| {
        nodes.iter().find(|n| n.id == id).map(|n| n.position)
    };

    let before = board.layout().await?;
    let left_pos = position_of(&before, &left).expect("left placed");
    let right_pos = position_of(&before, &right).expect("right placed");
    assert!(left_pos.x < 0.0 && right_pos.x > 0.0);
    assert_eq!(left_pos.x, -right_pos.x);

    board.delete_knowledge(&left).await?;
    let after = board.layout().await?;
    assert!(position_of(&after, &left).is_none());
    assert_eq!(position_of(&after, &right), Some(right_pos));
    assert!(board.edges().await?.iter().all(|e| e.target != left));
    Ok(())
}

#[tokio::test]
async fn test_distilled_child_hangs_off_its_parent() -> Result<()> {
    let board = memory_board("distill").await?;
    let parent = board.add_knowledge(knowledge(Side::Right, "Traits")).await?;
    let client = ScriptedClient::new().with_stream(["- one", "\n- two"]);
    let assistant = CanvasAssistant::new(board.clone(), Arc::new(client));

    let child = assistant
        .distill_knowledge(&parent, "Key points")
        .await?
        .expect("child");

    let snapshot = board.snapshot().await?;
    let data = snapshot
        .knowledge(&child)
        .and_then(|n| n.as_knowledge())
        .expect("child node");
    assert_eq!(data.parent_id.as_deref(), Some(parent.as_str()));
    assert_eq!(data.content, "- one\n- two");
    assert!(snapshot.edges.iter().any(|e| e.source == parent && e.target == child));

    let nodes = board.layout().await?;
    let x = |id: &str| nodes.iter().find(|n| n.id == id).map(|n| n.position.x);
    assert!(x(&child) > x(&parent));
    Ok(())
}
