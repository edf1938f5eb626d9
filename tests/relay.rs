use duetto::{
    AppState, Config,
    db::{self, Room, User},
    relay::{ConnState, Connection, Outbound, RoomTarget},
};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

struct Chat {
    app: AppState,
    alice: User,
    bob: User,
    room: Room,
}

async fn chat() -> Chat {
    chat_with(Config::default()).await
}

async fn chat_with(config: Config) -> Chat {
    let db_pool = db::open_in_memory().await.unwrap();
    let alice = db::create_user(&db_pool, "alice@example.com").await.unwrap();
    let bob = db::create_user(&db_pool, "bob@example.com").await.unwrap();
    let room = db::find_or_create_room(&db_pool, alice.id, bob.id).await.unwrap();
    Chat { app: AppState::new(db_pool, config), alice, bob, room }
}

async fn join(chat: &Chat, user: &User) -> (Connection, UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut conn = Connection::new(chat.app.clone(), tx);
    conn.open(Some(user.id), RoomTarget::Room(chat.room.id)).await.unwrap();
    (conn, rx)
}

fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

async fn send(conn: &mut Connection, frame: serde_json::Value) {
    conn.handle_frame(frame.to_string().as_bytes()).await;
}

#[tokio::test]
async fn outsider_is_rejected_and_hears_nothing() {
    let chat = chat().await;
    let carol = db::create_user(&chat.app.db_pool, "carol@example.com").await.unwrap();
    let (mut alice, _alice_rx) = join(&chat, &chat.alice).await;

    let (tx, mut carol_rx) = mpsc::unbounded_channel();
    let mut intruder = Connection::new(chat.app.clone(), tx);
    assert!(intruder.open(Some(carol.id), RoomTarget::Room(chat.room.id)).await.is_err());
    assert_eq!(intruder.state(), ConnState::Closed);
    assert!(!chat.app.groups.is_member(chat.room.id, intruder.id()));

    send(&mut alice, json!({"type": "chat_message", "message": "secret"})).await;
    intruder.handle_frame(br#"{"type":"chat_message","message":"let me in"}"#).await;

    assert!(drain(&mut carol_rx).is_empty());
    assert_eq!(db::list_messages(&chat.app.db_pool, chat.room.id).await.unwrap().len(), 1);
    assert!(!chat.app.presence.is_online(carol.id).await);
}

#[tokio::test]
async fn text_message_is_stored_once_and_echoed_to_everyone() {
    let chat = chat().await;
    let (mut alice, mut alice_rx) = join(&chat, &chat.alice).await;
    let (_bob, mut bob_rx) = join(&chat, &chat.bob).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    send(&mut alice, json!({"type": "chat_message", "message": "hi"})).await;

    let stored = db::list_messages(&chat.app.db_pool, chat.room.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content.as_deref(), Some("hi"));
    assert_eq!(stored[0].sender_id, chat.alice.id);

    let alice_events = drain(&mut alice_rx);
    assert_eq!(alice_events, drain(&mut bob_rx));
    let [Outbound::ChatMessage { message, sender, sender_id, message_id, timestamp, file_url }] =
        &alice_events[..]
    else {
        panic!("unexpected {alice_events:?}");
    };
    assert_eq!(message, "hi");
    assert_eq!(sender, "alice@example.com");
    assert_eq!(*sender_id, chat.alice.id);
    assert_eq!(*message_id, stored[0].id);
    assert_eq!(*timestamp, duetto::clock::format_micros(stored[0].created_at));
    assert!(file_url.is_none());
}

#[tokio::test]
async fn delete_by_someone_else_changes_nothing() {
    let chat = chat().await;
    let (mut alice, mut alice_rx) = join(&chat, &chat.alice).await;
    let (mut bob, mut bob_rx) = join(&chat, &chat.bob).await;

    send(&mut alice, json!({"type": "chat_message", "message": "mine"})).await;
    let message_id = db::list_messages(&chat.app.db_pool, chat.room.id).await.unwrap()[0].id;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    send(&mut bob, json!({"type": "delete_message", "message_id": message_id})).await;

    assert!(db::get_message(&chat.app.db_pool, chat.room.id, message_id).await.unwrap().is_some());
    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut bob_rx).is_empty());
    assert_eq!(bob.state(), ConnState::Joined);
}

#[tokio::test]
async fn delete_by_sender_removes_row_and_notifies_once() {
    let chat = chat().await;
    let (mut alice, mut alice_rx) = join(&chat, &chat.alice).await;
    let (_bob, mut bob_rx) = join(&chat, &chat.bob).await;

    send(&mut alice, json!({"type": "chat_message", "message": "oops"})).await;
    let message_id = db::list_messages(&chat.app.db_pool, chat.room.id).await.unwrap()[0].id;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    send(&mut alice, json!({"type": "delete_message", "message_id": message_id})).await;

    assert!(db::get_message(&chat.app.db_pool, chat.room.id, message_id).await.unwrap().is_none());
    let expected = [Outbound::MessageDeleted { message_id }];
    assert_eq!(drain(&mut alice_rx), expected);
    assert_eq!(drain(&mut bob_rx), expected);

    // a second attempt finds nothing and stays quiet
    send(&mut alice, json!({"type": "delete_message", "message_id": message_id})).await;
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn joining_reads_peer_messages_and_rejoining_is_harmless() {
    let chat = chat().await;
    let db_pool = &chat.app.db_pool;
    db::create_message(db_pool, &chat.room, chat.bob.id, Some("one"), None).await.unwrap();
    db::create_message(db_pool, &chat.room, chat.bob.id, Some("two"), None).await.unwrap();

    let (mut bob, mut bob_rx) = join(&chat, &chat.bob).await;
    drain(&mut bob_rx);
    db::create_message(db_pool, &chat.room, chat.alice.id, Some("own"), None).await.unwrap();

    let (mut alice, mut alice_rx) = join(&chat, &chat.alice).await;
    let read = Outbound::MessagesRead { user_id: chat.alice.id };
    assert_eq!(drain(&mut alice_rx), [read.clone()]);
    assert_eq!(drain(&mut bob_rx), [read.clone()]);

    for message in db::list_messages(db_pool, chat.room.id).await.unwrap() {
        assert_eq!(message.is_read, message.sender_id == chat.bob.id);
    }
    assert_eq!(db::count_unread(db_pool, chat.room.id, chat.bob.id).await.unwrap(), 0);

    alice.close().await;
    let (_alice_again, mut again_rx) = join(&chat, &chat.alice).await;
    assert_eq!(drain(&mut again_rx), [read.clone()]);
    assert_eq!(drain(&mut bob_rx), [read]);
    assert_eq!(db::count_unread(db_pool, chat.room.id, chat.alice.id).await.unwrap(), 1);

    bob.close().await;
}

#[tokio::test]
async fn two_tabs_keep_the_user_online() {
    let chat = chat().await;
    let (mut tab1, _rx1) = join(&chat, &chat.alice).await;
    let (mut tab2, _rx2) = join(&chat, &chat.alice).await;
    assert_eq!(chat.app.groups.member_count(chat.room.id), 2);

    tab1.close().await;
    assert!(chat.app.presence.is_online(chat.alice.id).await);
    let stored = db::get_user(&chat.app.db_pool, chat.alice.id).await.unwrap().unwrap();
    assert!(stored.is_online);

    tab2.close().await;
    assert!(!chat.app.presence.is_online(chat.alice.id).await);
    let stored = db::get_user(&chat.app.db_pool, chat.alice.id).await.unwrap().unwrap();
    assert!(!stored.is_online);
    assert_eq!(chat.app.groups.member_count(chat.room.id), 0);
}

#[tokio::test]
async fn malformed_frames_are_dropped_silently() {
    let chat = chat().await;
    let (mut alice, mut alice_rx) = join(&chat, &chat.alice).await;
    let (_bob, mut bob_rx) = join(&chat, &chat.bob).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let frames: [&[u8]; 5] = [
        b"{not json",
        br#"{"type":"shout","message":"hey"}"#,
        br#"{"type":"delete_message"}"#,
        br#"{"type":"chat_message","message":"   "}"#,
        b"",
    ];
    for frame in frames {
        alice.handle_frame(frame).await;
    }

    assert_eq!(alice.state(), ConnState::Joined);
    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut bob_rx).is_empty());

    send(&mut alice, json!({"type": "typing", "typing": true})).await;
    assert_eq!(
        drain(&mut bob_rx),
        [Outbound::UserTyping { user_id: chat.alice.id, typing: true }]
    );
}

#[tokio::test]
async fn one_senders_events_arrive_in_order() {
    let chat = chat().await;
    let (mut alice, _alice_rx) = join(&chat, &chat.alice).await;
    let (_bob, mut bob_rx) = join(&chat, &chat.bob).await;
    drain(&mut bob_rx);

    for i in 0..20 {
        send(&mut alice, json!({"type": "chat_message", "message": format!("m{i}")})).await;
    }

    let texts: Vec<String> = drain(&mut bob_rx)
        .into_iter()
        .filter_map(|event| match event {
            Outbound::ChatMessage { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    assert_eq!(texts, expected);

    let stored: Vec<Uuid> = db::list_messages(&chat.app.db_pool, chat.room.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(stored.len(), 20);
}

#[tokio::test]
async fn frame_without_type_is_sent_as_text() {
    let chat = chat().await;
    let (mut alice, _alice_rx) = join(&chat, &chat.alice).await;
    let (_bob, mut bob_rx) = join(&chat, &chat.bob).await;
    drain(&mut bob_rx);

    send(&mut alice, json!({"message": "no type here"})).await;

    let stored = db::list_messages(&chat.app.db_pool, chat.room.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content.as_deref(), Some("no type here"));
    assert!(matches!(
        &drain(&mut bob_rx)[..],
        [Outbound::ChatMessage { message, .. }] if message == "no type here"
    ));
}

#[tokio::test]
async fn slow_store_bounds_close_and_presence_still_settles() {
    let cleanup_timeout = Duration::from_millis(100);
    let chat = chat_with(Config { cleanup_timeout, ..Config::default() }).await;
    let (mut alice, _alice_rx) = join(&chat, &chat.alice).await;
    let db_pool = chat.app.db_pool.clone();
    assert!(db::get_user(&db_pool, chat.alice.id).await.unwrap().unwrap().is_online);

    // the in-memory pool has a single connection; holding it stalls every write
    let held = db_pool.acquire().await.unwrap();
    let started = Instant::now();
    alice.close().await;
    assert!(started.elapsed() < cleanup_timeout * 10, "close took {:?}", started.elapsed());
    assert_eq!(alice.state(), ConnState::Closed);
    drop(held);

    tokio::time::timeout(Duration::from_secs(5), async {
        while db::get_user(&db_pool, chat.alice.id).await.unwrap().unwrap().is_online {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stored presence never went offline");
    assert!(!chat.app.presence.is_online(chat.alice.id).await);
}
