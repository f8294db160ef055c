//! `ChatClient` façade.
//!
//! The client owns every store and is the only place where cross-store side
//! effects happen. It is single-threaded: REST calls are awaited in place,
//! transport and timer events are fed in one at a time through
//! [`ChatClient::dispatch`] (or drained by [`ChatClient::run`]), and every
//! handler runs to completion before the next event is looked at.
//!
//! ```text
//!  TransportEvent ──┐
//!                   ├─► ClientEvent ─► dispatch ─► ConnectionMonitor ─► Transition
//!  Scheduler timer ─┘                     │                               │
//!                                         ▼                               ▼
//!                              RealtimeEvent fan-out          resync / presence clear
//!                 (MessageStore, PresenceTracker, NotificationRouter, MuteGate)
//! ```

use std::collections::VecDeque;
use std::rc::Rc;

use chatsync_shared::{
    mute_until_from_message, ChatError, ChatMessage, CreateRoomRequest, MessageId, OnlineUser,
    PresenceAction, PresenceChange, RealtimeEvent, Room, RoomId, UserId,
};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::api_client::ChatApi;
use crate::config::ChatConfig;
use crate::logging::log_chat_error;
use crate::notifier::{NotificationPermission, Notifier};
use crate::offline_queue::{FlushReport, OfflineQueue, OutboundMessage, QueuedMessage};
use crate::persist::{self, PersistedChatState, PERSIST_VERSION};
use crate::scheduler::{Scheduler, Throttle, TimerId};
use crate::storage::KeyValueStore;
use crate::stores::{
    IncomingContext, Mention, MessageStore, MuteGate, MuteState, NotificationEffect,
    NotificationRouter, NotificationSettings, NotificationSettingsPatch, PaginationCursor,
    PresenceTracker, RoomDirectory, RoomNotification,
};
use crate::ws::{
    ConnectionEvent, ConnectionInfo, ConnectionMonitor, ConnectionState, SubscriptionId,
    Transition, Transport, TransportEvent,
};

const MAX_RECENT_ERRORS: usize = 100;

/// Everything the client is driven by.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Transport(TransportEvent),
    Timer(TimerId),
}

/// Platform services injected into the client.
pub struct ChatServices {
    pub api: Box<dyn ChatApi>,
    pub transport: Box<dyn Transport>,
    pub scheduler: Rc<dyn Scheduler>,
    pub storage: Box<dyn KeyValueStore>,
    pub notifier: Box<dyn Notifier>,
}

/// The signed-in user, used to filter own messages, detect mentions and apply
/// mute events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
}

/// REST action that produced `last_error`, kept for `retry_last_action`.
#[derive(Debug, Clone, PartialEq)]
pub enum LastAction {
    LoadRooms,
    CreateRoom(CreateRoomRequest),
    DeleteRoom(RoomId),
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    LoadMessages { room_id: RoomId, page: u32 },
    LoadMoreMessages(RoomId),
    SendMessage { room_id: RoomId, body: String },
    FlushQueue,
}

impl LastAction {
    fn label(&self) -> &'static str {
        match self {
            LastAction::LoadRooms => "Load rooms",
            LastAction::CreateRoom(_) => "Create room",
            LastAction::DeleteRoom(_) => "Delete room",
            LastAction::JoinRoom(_) => "Join room",
            LastAction::LeaveRoom(_) => "Leave room",
            LastAction::LoadMessages { .. } => "Load messages",
            LastAction::LoadMoreMessages(_) => "Load more messages",
            LastAction::SendMessage { .. } => "Send message",
            LastAction::FlushQueue => "Flush offline queue",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Delivered; the server's copy has been added to the room log.
    Sent(ChatMessage),
    /// Buffered in the offline queue under this id.
    Queued(Uuid),
}

/// Consistent read-only view across stores for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSnapshot {
    pub connection: ConnectionInfo,
    pub rooms: Vec<Room>,
    pub current_room: Option<Room>,
    pub total_unread_count: u32,
    pub queued_messages: usize,
    pub mute: MuteState,
    pub notification_permission: NotificationPermission,
    pub is_loading: bool,
    pub error: Option<ChatError>,
}

pub struct ChatClient {
    config: ChatConfig,
    services: ChatServices,
    monitor: ConnectionMonitor,
    queue: OfflineQueue,
    rooms: RoomDirectory,
    messages: MessageStore,
    presence: PresenceTracker,
    notifications: NotificationRouter,
    mute: MuteGate,
    rooms_throttle: Throttle<()>,
    presence_throttle: Throttle<RoomId>,
    current_user: Option<CurrentUser>,
    tab_visible: bool,
    is_loading: bool,
    error: Option<ChatError>,
    last_error: Option<ChatError>,
    last_action: Option<LastAction>,
    recent_errors: VecDeque<ChatError>,
}

impl ChatClient {
    pub fn new(config: ChatConfig, services: ChatServices) -> Self {
        let mut notifications = NotificationRouter::new();
        notifications.set_permission(services.notifier.permission());

        Self {
            monitor: ConnectionMonitor::new(config.reconnect.clone()),
            queue: OfflineQueue::new(config.offline_queue.clone()),
            rooms: RoomDirectory::new(),
            messages: MessageStore::new(config.message_cache_ttl),
            presence: PresenceTracker::new(),
            notifications,
            mute: MuteGate::new(),
            rooms_throttle: Throttle::new(config.rooms_throttle),
            presence_throttle: Throttle::new(config.presence_throttle),
            current_user: None,
            tab_visible: true,
            is_loading: false,
            error: None,
            last_error: None,
            last_action: None,
            recent_errors: VecDeque::new(),
            config,
            services,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.services.scheduler.now()
    }

    // =========================================
    // Accessors
    // =========================================

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.current_user.as_ref()
    }

    pub fn set_current_user(&mut self, user: Option<CurrentUser>) {
        self.current_user = user;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.monitor.info()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn rooms(&self) -> &[Room] {
        self.rooms.rooms()
    }

    pub fn current_room(&self) -> Option<&Room> {
        self.rooms.current_room()
    }

    pub fn messages(&self, room_id: RoomId) -> &[ChatMessage] {
        self.messages.messages(room_id)
    }

    pub fn pagination(&self, room_id: RoomId) -> Option<&PaginationCursor> {
        self.messages.cursor(room_id)
    }

    pub fn has_more_messages(&self, room_id: RoomId) -> bool {
        self.messages.has_more(room_id)
    }

    pub fn online_users(&self, room_id: RoomId) -> &[OnlineUser] {
        self.presence.online_users(room_id)
    }

    pub fn notification(&self, room_id: RoomId) -> Option<&RoomNotification> {
        self.notifications.notification(room_id)
    }

    pub fn mentions(&self) -> &[Mention] {
        self.notifications.mentions()
    }

    pub fn total_unread_count(&self) -> u32 {
        self.notifications.total_unread_count()
    }

    pub fn room_unread_count(&self, room_id: RoomId) -> u32 {
        self.notifications.room_unread_count(room_id)
    }

    pub fn has_unread_mentions(&self, room_id: Option<RoomId>) -> bool {
        self.notifications.has_unread_mentions(room_id)
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        self.notifications.settings()
    }

    pub fn notification_permission(&self) -> NotificationPermission {
        self.notifications.permission()
    }

    pub fn queued_messages(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.queue.entries()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn mute_state(&self) -> &MuteState {
        self.mute.state()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn last_action(&self) -> Option<&LastAction> {
        self.last_action.as_ref()
    }

    /// Recent errors, newest first.
    pub fn recent_errors(&self) -> impl Iterator<Item = &ChatError> {
        self.recent_errors.iter()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            connection: self.monitor.info(),
            rooms: self.rooms.rooms().to_vec(),
            current_room: self.rooms.current_room().cloned(),
            total_unread_count: self.notifications.total_unread_count(),
            queued_messages: self.queue.len(),
            mute: self.mute.state().clone(),
            notification_permission: self.notifications.permission(),
            is_loading: self.is_loading,
            error: self.error.clone(),
        }
    }

    // =========================================
    // Connection
    // =========================================

    pub fn subscribe(&mut self, subscriber: impl FnMut(&ConnectionEvent) + 'static) -> SubscriptionId {
        self.monitor.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.monitor.unsubscribe(id);
    }

    pub fn connect(&mut self) {
        let transition = self.monitor.connect(self.services.transport.as_mut());
        self.clear_presence_on(transition.as_ref());
    }

    pub fn disconnect(&mut self) {
        let transition = self
            .monitor
            .disconnect(self.services.transport.as_mut(), self.services.scheduler.as_ref());
        self.clear_presence_on(transition.as_ref());
    }

    pub fn reconnect(&mut self) {
        let transition = self
            .monitor
            .reconnect(self.services.transport.as_mut(), self.services.scheduler.as_ref());
        self.clear_presence_on(transition.as_ref());
    }

    fn clear_presence_on(&mut self, transition: Option<&Transition>) {
        let Some(t) = transition else {
            return;
        };
        if t.left(ConnectionState::Connected) || t.entered(ConnectionState::Error) {
            self.presence.clear_all();
        }
    }

    async fn apply_transition(&mut self, transition: Option<Transition>) {
        self.clear_presence_on(transition.as_ref());
        if transition.is_some_and(|t| t.entered(ConnectionState::Connected)) {
            self.resync().await;
        }
    }

    /// Re-synchronize after (re)connecting: rooms, focused presence, queue.
    async fn resync(&mut self) {
        let now = self.now();
        self.rooms_throttle.touch((), now);
        if let Err(e) = self.fetch_rooms().await {
            crate::log_debug!("Room resync failed: {}", e);
        }

        if let Some(room_id) = self.rooms.current_room_id() {
            self.presence_throttle.touch(room_id, now);
            self.fetch_online_users(room_id).await;
        }

        if !self.queue.is_empty() {
            self.flush_queue().await;
        }
    }

    // =========================================
    // Event driver
    // =========================================

    pub async fn dispatch(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Transport(event) => self.handle_transport_event(event).await,
            ClientEvent::Timer(id) => {
                if !self.monitor.handle_timer(id, self.services.transport.as_mut()) {
                    crate::log_debug!("Ignoring timer {}", id);
                }
            }
        }
    }

    /// Drain `events` in delivery order until the stream ends.
    pub async fn run<S>(&mut self, mut events: S)
    where
        S: Stream<Item = ClientEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.dispatch(event).await;
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        let scheduler = Rc::clone(&self.services.scheduler);
        match event {
            TransportEvent::Opened => {
                let transition = self.monitor.handle_opened(scheduler.now(), scheduler.as_ref());
                self.apply_transition(transition).await;
            }
            TransportEvent::Closed { code, reason } => {
                let transition = self.monitor.handle_closed(code, reason.as_deref(), scheduler.as_ref());
                self.apply_transition(transition).await;
            }
            TransportEvent::Failed(err) => {
                let transition = self.monitor.handle_failure(err, scheduler.as_ref());
                self.apply_transition(transition).await;
            }
            TransportEvent::Frame(envelope) => self.handle_realtime(envelope.into_event()).await,
        }
    }

    pub async fn handle_realtime(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Message(message) => self.receive_message(*message),
            RealtimeEvent::Presence(change) => self.apply_presence(change).await,
            RealtimeEvent::UserMuted {
                user_id,
                muted_until,
                reason,
            } => {
                if self.is_current_user(user_id) {
                    crate::log_info!("Muted until {:?}", muted_until);
                    self.mute.update(true, muted_until.as_deref(), reason);
                }
            }
            RealtimeEvent::UserUnmuted { user_id } => {
                if self.is_current_user(user_id) {
                    crate::log_info!("Unmuted");
                    self.mute.update(false, None, None);
                    if self.monitor.is_connected() && !self.queue.is_empty() {
                        self.flush_queue().await;
                    }
                }
            }
            RealtimeEvent::RoomOnlineCount {
                room_id,
                online_count,
            } => {
                if self.rooms.update_online_count(room_id, online_count) {
                    self.persist();
                }
            }
            RealtimeEvent::RoomCreated(room) => {
                self.rooms.upsert_room(*room);
                self.persist();
            }
            RealtimeEvent::Malformed { kind, reason } => {
                crate::log_warn!("Dropping malformed '{}' event: {}", kind, reason);
            }
            RealtimeEvent::Unknown(kind) => {
                crate::log_debug!("Ignoring realtime event '{}'", kind);
            }
        }
    }

    fn is_current_user(&self, user_id: UserId) -> bool {
        self.current_user.as_ref().is_some_and(|u| u.id == user_id)
    }

    /// Store an inbound message and route its notifications. Duplicates are
    /// absorbed before any notification work.
    fn receive_message(&mut self, message: ChatMessage) {
        let room_id = message.room_id;
        if !self.messages.add_message(room_id, message.clone()) {
            return;
        }

        let now = self.now();
        let ctx = IncomingContext {
            current_user_id: self.current_user.as_ref().map(|u| u.id),
            current_user_name: self.current_user.as_ref().map(|u| u.name.as_str()),
            focused_room: self.rooms.current_room_id(),
            tab_visible: self.tab_visible,
            room_name: self.rooms.get(room_id).map(|r| r.name.as_str()),
        };
        let effects = self.notifications.on_incoming(&message, &ctx, now);

        for effect in effects {
            match effect {
                NotificationEffect::Show(notification) => self.services.notifier.show(&notification),
                NotificationEffect::PlaySound => self.services.notifier.play_sound(),
            }
        }
        self.persist();
    }

    async fn apply_presence(&mut self, change: PresenceChange) {
        let Some(room_id) = change.room_id.or_else(|| self.rooms.current_room_id()) else {
            crate::log_debug!("Presence event without a room to apply to");
            return;
        };

        match (change.action, change.user) {
            (Some(PresenceAction::Here), _) => {
                self.presence.update_online_users(room_id, change.users);
            }
            (Some(PresenceAction::Joining), Some(user)) => {
                self.presence.add_online_user(room_id, user);
            }
            (Some(PresenceAction::Leaving), Some(user)) => {
                self.presence.remove_online_user(room_id, user.id);
            }
            _ => self.load_online_users(room_id).await,
        }
    }

    // =========================================
    // Rooms
    // =========================================

    /// Fetch the room list. Calls within `rooms_throttle` of the previous one
    /// return without I/O.
    pub async fn load_rooms(&mut self) -> Result<(), ChatError> {
        let now = self.now();
        if !self.rooms_throttle.try_acquire((), now) {
            crate::log_debug!("load_rooms throttled");
            return Ok(());
        }
        self.fetch_rooms().await
    }

    async fn fetch_rooms(&mut self) -> Result<(), ChatError> {
        self.begin_loading();
        let result = self.services.api.list_rooms().await;
        self.is_loading = false;

        match result {
            Ok(rooms) => {
                if self.rooms.set_rooms(rooms) {
                    crate::log_debug!("Current room re-inserted into refreshed room list");
                }
                self.persist();
                Ok(())
            }
            Err(e) => Err(self.record_failure(LastAction::LoadRooms, e)),
        }
    }

    pub async fn create_room(&mut self, request: CreateRoomRequest) -> Result<Room, ChatError> {
        match self.services.api.create_room(&request).await {
            Ok(room) => {
                self.rooms.upsert_room(room.clone());
                self.persist();
                Ok(room)
            }
            Err(e) => Err(self.record_failure(LastAction::CreateRoom(request), e)),
        }
    }

    pub async fn delete_room(&mut self, room_id: RoomId) -> Result<(), ChatError> {
        if let Err(e) = self.services.api.delete_room(room_id).await {
            return Err(self.record_failure(LastAction::DeleteRoom(room_id), e));
        }
        self.rooms.remove_room(room_id);
        self.teardown_room(room_id);
        self.persist();
        Ok(())
    }

    pub async fn join_room(&mut self, room_id: RoomId) -> Result<(), ChatError> {
        match self.services.api.join_room(room_id).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.record_failure(LastAction::JoinRoom(room_id), e)),
        }
    }

    /// Leave a room and drop everything scoped to it.
    pub async fn leave_room(&mut self, room_id: RoomId) -> Result<(), ChatError> {
        if let Err(e) = self.services.api.leave_room(room_id).await {
            return Err(self.record_failure(LastAction::LeaveRoom(room_id), e));
        }
        self.teardown_room(room_id);
        self.rooms.clear_current_if(room_id);
        self.persist();
        Ok(())
    }

    fn teardown_room(&mut self, room_id: RoomId) {
        self.messages.clear_room(room_id);
        self.presence.clear_room(room_id);
        self.notifications.clear_room_notifications(room_id);
    }

    /// Focus a room (or none). Focusing marks the room read and prunes the
    /// presence of every other room.
    pub fn set_current_room(&mut self, room: Option<Room>) {
        let room_id = room.as_ref().map(|r| r.id);
        self.rooms.set_current_room(room);

        match room_id {
            Some(id) => {
                self.notifications.clear_room_notifications(id);
                self.notifications.mark_room_mentions_read(id);
                self.presence.retain_only(id);
            }
            None => self.presence.clear_all(),
        }
        self.persist();
    }

    /// Focus, join, load the first page, then best-effort presence.
    pub async fn enter_room(&mut self, room: Room) -> Result<(), ChatError> {
        let room_id = room.id;
        self.set_current_room(Some(room));
        self.join_room(room_id).await?;
        self.load_messages(room_id, 1).await?;
        self.load_online_users(room_id).await;
        Ok(())
    }

    // =========================================
    // Messages
    // =========================================

    /// Load a history page, replacing the room's log. Page 1 is served from
    /// the cache while it is fresh.
    pub async fn load_messages(&mut self, room_id: RoomId, page: u32) -> Result<(), ChatError> {
        let now = self.now();
        if page == 1 && self.messages.load_cached_first_page(room_id, now) {
            crate::log_debug!("Serving room {} page 1 from cache", room_id);
            return Ok(());
        }
        self.fetch_messages(room_id, page).await
    }

    async fn fetch_messages(&mut self, room_id: RoomId, page: u32) -> Result<(), ChatError> {
        self.begin_loading();
        let result = self.services.api.fetch_messages(room_id, page).await;
        self.is_loading = false;

        match result {
            Ok(response) => {
                let now = self.now();
                self.messages.replace_page(room_id, response, now);
                self.persist();
                Ok(())
            }
            Err(e) => Err(self.record_failure(LastAction::LoadMessages { room_id, page }, e)),
        }
    }

    /// Prepend the next older page. Returns `Ok(false)` when there is no
    /// older history or the response arrived stale.
    pub async fn load_more_messages(&mut self, room_id: RoomId) -> Result<bool, ChatError> {
        let Some(page) = self.messages.next_page(room_id) else {
            return Ok(false);
        };

        self.begin_loading();
        let result = self.services.api.fetch_messages(room_id, page).await;
        self.is_loading = false;

        match result {
            Ok(response) => {
                let applied = self.messages.apply_older_page(room_id, page, response);
                if applied {
                    self.persist();
                }
                Ok(applied)
            }
            Err(e) => Err(self.record_failure(LastAction::LoadMoreMessages(room_id), e)),
        }
    }

    /// Insert a message received out of band (e.g. from another view).
    pub fn add_message(&mut self, message: ChatMessage) -> bool {
        let added = self.messages.add_message(message.room_id, message);
        if added {
            self.persist();
        }
        added
    }

    // =========================================
    // Presence
    // =========================================

    /// Reconcile a room's online list against REST. Failures are logged and
    /// swallowed.
    pub async fn load_online_users(&mut self, room_id: RoomId) {
        let now = self.now();
        if !self.presence_throttle.try_acquire(room_id, now) {
            crate::log_debug!("load_online_users({}) throttled", room_id);
            return;
        }
        self.fetch_online_users(room_id).await;
    }

    async fn fetch_online_users(&mut self, room_id: RoomId) {
        match self.services.api.fetch_online_users(room_id).await {
            Ok(response) => self.presence.update_online_users(room_id, response.online_users),
            Err(e) => crate::log_warn!("Load online users for room {} failed: {}", room_id, e),
        }
    }

    // =========================================
    // Sending
    // =========================================

    pub async fn send_message(&mut self, room_id: RoomId, body: &str) -> Result<SendOutcome, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::validation("Message cannot be empty"));
        }

        let now = self.now();
        if self.mute.check(now) {
            return Err(ChatError::muted(self.mute.rejection_message()));
        }

        if !self.monitor.is_connected() || !self.queue.is_empty() {
            let id = self.enqueue(room_id, body, now);
            if self.monitor.is_connected() {
                self.flush_queue().await;
            }
            return Ok(SendOutcome::Queued(id));
        }

        match self.services.api.send_message(room_id, body).await {
            Ok(message) => {
                self.add_message(message.clone());
                Ok(SendOutcome::Sent(message))
            }
            Err(e) if e.is_mute_rejection() => {
                self.apply_mute_rejection(&e);
                let err = ChatError::muted(e.message);
                let action = LastAction::SendMessage {
                    room_id,
                    body: body.to_string(),
                };
                Err(self.record_failure(action, err))
            }
            Err(e) if e.retryable => {
                log_chat_error("Send message", &e);
                Ok(SendOutcome::Queued(self.enqueue_failed(room_id, body, now)))
            }
            Err(e) => {
                let action = LastAction::SendMessage {
                    room_id,
                    body: body.to_string(),
                };
                Err(self.record_failure(action, e))
            }
        }
    }

    fn enqueue(&mut self, room_id: RoomId, body: &str, now: DateTime<Utc>) -> Uuid {
        let id = self.queue.enqueue(outbound(room_id, body), now);
        self.persist_queue();
        id
    }

    fn enqueue_failed(&mut self, room_id: RoomId, body: &str, now: DateTime<Utc>) -> Uuid {
        let id = self.queue.enqueue_failed(outbound(room_id, body), now);
        self.persist_queue();
        id
    }

    fn apply_mute_rejection(&mut self, err: &ChatError) {
        let until = mute_until_from_message(&err.message);
        crate::log_info!("Send rejected by mute (until {:?})", until);
        self.mute.mute(until, None);
    }

    /// Deliver queued messages in order. Nothing is sent while muted.
    pub async fn flush_queue(&mut self) -> FlushReport {
        if self.held_by_mute() {
            return FlushReport::default();
        }
        let report = self.queue.flush(self.services.api.as_ref()).await;
        self.absorb_flush(&report);
        report
    }

    /// Reset attempt counters and flush again.
    pub async fn retry_queue(&mut self) -> FlushReport {
        if self.held_by_mute() {
            return FlushReport::default();
        }
        let report = self.queue.retry_all(self.services.api.as_ref()).await;
        self.absorb_flush(&report);
        report
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.persist_queue();
    }

    fn held_by_mute(&mut self) -> bool {
        let now = self.now();
        let muted = self.mute.check(now);
        if muted && !self.queue.is_empty() {
            crate::log_debug!("Holding {} queued message(s) while muted", self.queue.len());
        }
        muted
    }

    fn absorb_flush(&mut self, report: &FlushReport) {
        for message in &report.sent {
            self.messages.add_message(message.room_id, message.clone());
        }
        for dropped in &report.dropped {
            let action = LastAction::SendMessage {
                room_id: dropped.entry.message.room_id,
                body: dropped.entry.message.body.clone(),
            };
            self.record_failure(action, dropped.error.clone());
        }
        if let Some(failure) = &report.failure {
            if failure.error.is_mute_rejection() {
                self.apply_mute_rejection(&failure.error);
            }
            self.record_failure(LastAction::FlushQueue, failure.error.clone());
        }
        self.persist_queue();
        if !report.sent.is_empty() {
            self.persist();
        }
    }

    // =========================================
    // Mute
    // =========================================

    /// Whether sends are currently blocked. Expires an elapsed mute.
    pub fn check_mute_status(&mut self) -> bool {
        let now = self.now();
        self.mute.check(now)
    }

    pub fn update_mute_status(&mut self, is_muted: bool, muted_until: Option<&str>, reason: Option<String>) {
        self.mute.update(is_muted, muted_until, reason);
    }

    // =========================================
    // Notifications
    // =========================================

    /// Record tab visibility. Becoming visible marks the focused room read.
    pub fn set_tab_visible(&mut self, visible: bool) {
        self.tab_visible = visible;
        if visible {
            if let Some(room_id) = self.rooms.current_room_id() {
                self.notifications.clear_room_notifications(room_id);
                self.persist();
            }
        }
    }

    pub async fn request_notification_permission(&mut self) -> NotificationPermission {
        let permission = self.services.notifier.request_permission().await;
        self.notifications.set_permission(permission);
        permission
    }

    pub fn update_notification_settings(&mut self, patch: NotificationSettingsPatch) {
        self.notifications.update_settings(patch);
        self.persist();
    }

    pub fn clear_room_notifications(&mut self, room_id: RoomId) {
        self.notifications.clear_room_notifications(room_id);
        self.persist();
    }

    pub fn clear_all_notifications(&mut self) {
        self.notifications.clear_all_notifications();
        self.persist();
    }

    pub fn mark_mention_as_read(&mut self, message_id: MessageId) {
        self.notifications.mark_mention_as_read(message_id);
        self.persist();
    }

    // =========================================
    // Errors
    // =========================================

    fn begin_loading(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    fn record_failure(&mut self, action: LastAction, err: ChatError) -> ChatError {
        log_chat_error(action.label(), &err);
        self.error = Some(err.clone());
        self.last_error = Some(err.clone());
        self.last_action = Some(action);
        self.recent_errors.push_front(err.clone());
        self.recent_errors.truncate(MAX_RECENT_ERRORS);
        err
    }

    /// Clear the display error. `last_error` is kept for retry.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Re-run the action behind `last_error` if it is retryable.
    pub async fn retry_last_action(&mut self) -> Result<(), ChatError> {
        let retryable = self.last_error.as_ref().is_some_and(|e| e.retryable);
        let Some(action) = self.last_action.clone().filter(|_| retryable) else {
            return Ok(());
        };

        crate::log_info!("Retrying: {}", action.label());
        self.error = None;
        match action {
            LastAction::LoadRooms => self.fetch_rooms().await,
            LastAction::CreateRoom(request) => self.create_room(request).await.map(|_| ()),
            LastAction::DeleteRoom(room_id) => self.delete_room(room_id).await,
            LastAction::JoinRoom(room_id) => self.join_room(room_id).await,
            LastAction::LeaveRoom(room_id) => self.leave_room(room_id).await,
            LastAction::LoadMessages { room_id, page } => self.fetch_messages(room_id, page).await,
            LastAction::LoadMoreMessages(room_id) => self.load_more_messages(room_id).await.map(|_| ()),
            LastAction::SendMessage { room_id, body } => {
                self.send_message(room_id, &body).await.map(|_| ())
            }
            LastAction::FlushQueue => match self.retry_queue().await.failure {
                Some(failure) => Err(failure.error),
                None => Ok(()),
            },
        }
    }

    // =========================================
    // Persistence
    // =========================================

    fn persist(&self) {
        if !self.config.persist {
            return;
        }
        let state = PersistedChatState {
            version: PERSIST_VERSION,
            rooms: self.rooms.to_persisted(),
            messages: self.messages.to_persisted(),
            notifications: self.notifications.to_persisted(),
        };
        if !state.save(self.services.storage.as_ref(), &self.config.storage_key) {
            crate::log_warn!("Failed to persist chat state");
        }
    }

    fn persist_queue(&self) {
        if !self.config.persist {
            return;
        }
        let entries = self.queue.to_persisted();
        if !persist::save_queue(self.services.storage.as_ref(), &self.config.queue_storage_key, &entries) {
            crate::log_warn!("Failed to persist offline queue");
        }
    }

    /// Load the persisted snapshot and queue, then reconcile: the directory
    /// is self-healed, the unread total recomputed, transient fields reset
    /// and the notification permission refreshed.
    pub fn restore(&mut self) {
        let storage = self.services.storage.as_ref();
        let state = PersistedChatState::load(storage, &self.config.storage_key);
        let queued = persist::load_queue(storage, &self.config.queue_storage_key);

        self.rooms = RoomDirectory::from_persisted(state.rooms);
        self.messages = MessageStore::from_persisted(state.messages, self.config.message_cache_ttl);
        self.notifications = NotificationRouter::from_persisted(state.notifications);
        self.notifications.set_permission(self.services.notifier.permission());
        self.queue.restore(queued);

        self.presence.clear_all();
        self.mute = MuteGate::new();
        self.is_loading = false;
        self.error = None;
        self.last_error = None;
        self.last_action = None;

        crate::log_info!(
            "Restored {} rooms and {} queued messages",
            self.rooms.rooms().len(),
            self.queue.len()
        );
    }
}

fn outbound(room_id: RoomId, body: &str) -> OutboundMessage {
    OutboundMessage {
        room_id,
        body: body.to_string(),
    }
}
