//! Shared fakes for the scenario tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use async_trait::async_trait;
use chatsync::shared::{
    ChatError, ChatMessage, ChatUser, CreateRoomRequest, MessageType, MessagesResponse,
    OnlineUser, OnlineUsersResponse, PaginationInfo, RealtimeEnvelope, Room, RoomId, UserId,
};
use chatsync::{
    ChatApi, ChatClient, ChatConfig, ChatServices, ClientEvent, CurrentUser, ManualScheduler,
    MemoryStorage, NotificationPermission, Notifier, SystemNotification, Transport,
    TransportEvent,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

pub const ALICE: UserId = 1;
pub const BOB: UserId = 2;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub fn room(id: RoomId, name: &str) -> Room {
    Room::new(id, name, t0())
}

pub fn message(id: u64, room_id: RoomId, user_id: UserId, body: &str, secs: i64) -> ChatMessage {
    let name = match user_id {
        ALICE => "alice",
        BOB => "bob",
        _ => "someone",
    };
    ChatMessage {
        id,
        room_id,
        user_id,
        body: body.to_string(),
        kind: MessageType::Text,
        created_at: at(secs),
        updated_at: at(secs),
        author: ChatUser {
            id: user_id,
            name: name.to_string(),
            email: None,
        },
        reactions: Vec::new(),
    }
}

pub fn page(messages: Vec<ChatMessage>, current_page: u32, has_more: bool) -> MessagesResponse {
    MessagesResponse {
        messages,
        pagination: PaginationInfo {
            current_page,
            last_page: None,
            per_page: None,
            total: None,
            has_more_pages: has_more,
        },
    }
}

pub fn online(id: UserId, name: &str) -> OnlineUser {
    OnlineUser {
        id,
        name: name.to_string(),
        email: None,
        joined_at: None,
        is_online: true,
    }
}

pub fn frame(json: &str) -> ClientEvent {
    let envelope = RealtimeEnvelope::from_json(json).expect("test frame must be valid JSON");
    ClientEvent::Transport(TransportEvent::Frame(envelope))
}

pub fn message_frame(msg: &ChatMessage) -> ClientEvent {
    let envelope = RealtimeEnvelope {
        kind: "message".to_string(),
        message: Some(serde_json::to_value(msg).expect("message serializes")),
        room_id: Some(msg.room_id),
        ..Default::default()
    };
    ClientEvent::Transport(TransportEvent::Frame(envelope))
}

// =========================================
// REST
// =========================================

#[derive(Default)]
struct ApiState {
    rooms: Vec<Room>,
    pages: HashMap<(RoomId, u32), MessagesResponse>,
    online: HashMap<RoomId, Vec<OnlineUser>>,
    failures: VecDeque<(&'static str, ChatError)>,
    calls: Vec<String>,
    next_message_id: u64,
    sent_at: i64,
}

/// In-memory REST backend. Clones share state.
#[derive(Clone, Default)]
pub struct FakeChatApi {
    state: Rc<RefCell<ApiState>>,
}

impl FakeChatApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.state.borrow_mut().next_message_id = 1000;
        api.state.borrow_mut().sent_at = 3600;
        api
    }

    pub fn set_rooms(&self, rooms: Vec<Room>) {
        self.state.borrow_mut().rooms = rooms;
    }

    pub fn set_page(&self, room_id: RoomId, page: MessagesResponse) {
        let number = page.pagination.current_page;
        self.state.borrow_mut().pages.insert((room_id, number), page);
    }

    pub fn set_online(&self, room_id: RoomId, users: Vec<OnlineUser>) {
        self.state.borrow_mut().online.insert(room_id, users);
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: ChatError) {
        self.state.borrow_mut().failures.push_back((op, err));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    fn enter(&self, op: &'static str, call: String) -> Result<(), ChatError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        match state.failures.iter().position(|(name, _)| *name == op) {
            Some(pos) => Err(state.failures.remove(pos).map(|(_, e)| e).unwrap()),
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl ChatApi for FakeChatApi {
    async fn list_rooms(&self) -> Result<Vec<Room>, ChatError> {
        self.enter("list_rooms", "list_rooms".into())?;
        Ok(self.state.borrow().rooms.clone())
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> Result<Room, ChatError> {
        self.enter("create_room", format!("create_room:{}", request.name))?;
        let mut state = self.state.borrow_mut();
        let id = state.rooms.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let room = Room::new(id, request.name.clone(), t0());
        state.rooms.push(room.clone());
        Ok(room)
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.enter("delete_room", format!("delete_room:{}", room_id))?;
        self.state.borrow_mut().rooms.retain(|r| r.id != room_id);
        Ok(())
    }

    async fn join_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.enter("join_room", format!("join_room:{}", room_id))
    }

    async fn leave_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        self.enter("leave_room", format!("leave_room:{}", room_id))
    }

    async fn fetch_messages(&self, room_id: RoomId, page_number: u32) -> Result<MessagesResponse, ChatError> {
        self.enter("fetch_messages", format!("fetch_messages:{}:{}", room_id, page_number))?;
        Ok(self
            .state
            .borrow()
            .pages
            .get(&(room_id, page_number))
            .cloned()
            .unwrap_or_else(|| page(Vec::new(), page_number, false)))
    }

    async fn fetch_online_users(&self, room_id: RoomId) -> Result<OnlineUsersResponse, ChatError> {
        self.enter("fetch_online_users", format!("fetch_online_users:{}", room_id))?;
        let users = self.state.borrow().online.get(&room_id).cloned().unwrap_or_default();
        Ok(OnlineUsersResponse {
            count: users.len() as u32,
            online_users: users,
        })
    }

    async fn send_message(&self, room_id: RoomId, body: &str) -> Result<ChatMessage, ChatError> {
        self.enter("send_message", format!("send_message:{}:{}", room_id, body))?;
        let mut state = self.state.borrow_mut();
        state.next_message_id += 1;
        state.sent_at += 1;
        Ok(message(state.next_message_id, room_id, ALICE, body, state.sent_at))
    }
}

// =========================================
// Transport
// =========================================

#[derive(Default)]
struct TransportState {
    opens: u32,
    closes: u32,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Rc<RefCell<TransportState>>,
}

impl FakeTransport {
    pub fn opens(&self) -> u32 {
        self.state.borrow().opens
    }

    pub fn closes(&self) -> u32 {
        self.state.borrow().closes
    }
}

impl Transport for FakeTransport {
    fn open(&mut self) {
        self.state.borrow_mut().opens += 1;
    }

    fn close(&mut self) {
        self.state.borrow_mut().closes += 1;
    }
}

// =========================================
// Notifications
// =========================================

#[derive(Default)]
struct NotifierState {
    permission: NotificationPermission,
    shown: Vec<SystemNotification>,
    sounds: u32,
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    state: Rc<RefCell<NotifierState>>,
}

impl RecordingNotifier {
    pub fn set_permission(&self, permission: NotificationPermission) {
        self.state.borrow_mut().permission = permission;
    }

    pub fn shown(&self) -> Vec<SystemNotification> {
        self.state.borrow().shown.clone()
    }

    pub fn sounds(&self) -> u32 {
        self.state.borrow().sounds
    }
}

#[async_trait(?Send)]
impl Notifier for RecordingNotifier {
    fn permission(&self) -> NotificationPermission {
        self.state.borrow().permission
    }

    async fn request_permission(&self) -> NotificationPermission {
        let mut state = self.state.borrow_mut();
        if state.permission == NotificationPermission::Default {
            state.permission = NotificationPermission::Granted;
        }
        state.permission
    }

    fn show(&self, notification: &SystemNotification) {
        self.state.borrow_mut().shown.push(notification.clone());
    }

    fn play_sound(&self) {
        self.state.borrow_mut().sounds += 1;
    }
}

// =========================================
// Harness
// =========================================

pub struct Harness {
    pub client: ChatClient,
    pub api: FakeChatApi,
    pub transport: FakeTransport,
    pub notifier: RecordingNotifier,
    pub scheduler: Rc<ManualScheduler>,
    pub storage: Rc<MemoryStorage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(ChatConfig::default(), Rc::new(MemoryStorage::new()), RecordingNotifier::default())
    }

    pub fn with(config: ChatConfig, storage: Rc<MemoryStorage>, notifier: RecordingNotifier) -> Self {
        let api = FakeChatApi::new();
        let transport = FakeTransport::default();
        let scheduler = Rc::new(ManualScheduler::new(t0()));

        let services = ChatServices {
            api: Box::new(api.clone()),
            transport: Box::new(transport.clone()),
            scheduler: scheduler.clone(),
            storage: Box::new(storage.clone()),
            notifier: Box::new(notifier.clone()),
        };
        let mut client = ChatClient::new(config, services);
        client.set_current_user(Some(CurrentUser {
            id: ALICE,
            name: "alice".to_string(),
        }));

        Self {
            client,
            api,
            transport,
            notifier,
            scheduler,
            storage,
        }
    }

    /// Connect and complete the handshake.
    pub async fn connected(mut self) -> Self {
        self.client.connect();
        self.client
            .dispatch(ClientEvent::Transport(TransportEvent::Opened))
            .await;
        self
    }

    pub async fn send(&mut self, event: ClientEvent) {
        self.client.dispatch(event).await;
    }

    /// Advance virtual time and deliver every timer that came due.
    pub async fn advance(&mut self, by: std::time::Duration) {
        for id in self.scheduler.advance(by) {
            self.client.dispatch(ClientEvent::Timer(id)).await;
        }
    }
}
