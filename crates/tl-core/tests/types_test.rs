use tl_core::types::*;

#[test]
fn new_task_starts_in_progress() {
    let task = Task::new("Fix the login flow");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.messages.is_empty());
    assert!(task.completed_at.is_none());
    assert!(uuid::Uuid::parse_str(&task.id).is_ok());
    assert_eq!(task.created_at, task.updated_at);
}

#[test]
fn task_with_id_keeps_id() {
    let task = Task::with_id("t1", "Title");
    assert_eq!(task.id, "t1");
    assert_eq!(task.title, "Title");
}

#[test]
fn chat_message_wire_shape() {
    let json = serde_json::json!({
        "role": "assistant",
        "type": "text",
        "data": { "text": "Hello", "streamId": "s1", "isStreaming": false }
    });
    let msg: ChatMessage = serde_json::from_value(json).unwrap();
    assert_eq!(msg.role, Role::Assistant);
    assert_eq!(msg.message_type, "text");
    assert_eq!(msg.text(), "Hello");
    assert_eq!(msg.stream_id(), Some("s1"));
    assert_eq!(msg.data.is_streaming, Some(false));

    let back = serde_json::to_value(&msg).unwrap();
    assert_eq!(back["type"], "text");
    assert_eq!(back["data"]["streamId"], "s1");
}

#[test]
fn missing_text_reads_as_empty() {
    let msg = ChatMessage::new(Role::User, "text", MessageData::default());
    assert_eq!(msg.text(), "");
}

#[test]
fn role_from_wire() {
    assert_eq!(Role::from_wire("user"), Some(Role::User));
    assert_eq!(Role::from_wire("assistant"), Some(Role::Assistant));
    assert_eq!(Role::from_wire("system"), None);
    assert_eq!(Role::from_wire("User"), None);
}

#[test]
fn task_status_serializes_snake_case() {
    let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
    assert_eq!(json, "\"in_progress\"");
    assert_eq!(TaskStatus::Paused.to_string(), "paused");
    let back: TaskStatus = serde_json::from_str("\"cancelled\"").unwrap();
    assert_eq!(back, TaskStatus::Cancelled);
}

#[test]
fn task_roundtrips_with_messages() {
    let mut task = Task::with_id("t1", "Title");
    task.messages = std::sync::Arc::new(vec![ChatMessage::new(
        Role::User,
        "text",
        MessageData::with_text("hi"),
    )]);
    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(back, task);
    assert_eq!(back.last_message().unwrap().text(), "hi");
}
