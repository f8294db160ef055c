//! REST surface of the chat backend.
//!
//! Failures are classified into [`ChatError`] here, at the boundary, so the
//! stores only ever see the normalized taxonomy.

use async_trait::async_trait;
use chatsync_shared::{
    ApiError, ChatError, ChatMessage, CreateRoomRequest, MessagesResponse, OnlineUsersResponse,
    Room, RoomId, RoomResponse, RoomsResponse, SendMessageRequest, SendMessageResponse,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ChatConfig;

/// Chat REST endpoints consumed by the engine.
#[async_trait(?Send)]
pub trait ChatApi {
    /// `GET /chat/rooms`
    async fn list_rooms(&self) -> Result<Vec<Room>, ChatError>;

    /// `POST /chat/rooms`
    async fn create_room(&self, request: &CreateRoomRequest) -> Result<Room, ChatError>;

    /// `DELETE /chat/rooms/{id}`
    async fn delete_room(&self, room_id: RoomId) -> Result<(), ChatError>;

    /// `POST /chat/rooms/{id}/join`
    async fn join_room(&self, room_id: RoomId) -> Result<(), ChatError>;

    /// `POST /chat/rooms/{id}/leave`
    async fn leave_room(&self, room_id: RoomId) -> Result<(), ChatError>;

    /// `GET /chat/rooms/{id}/messages?page=N`
    async fn fetch_messages(&self, room_id: RoomId, page: u32)
        -> Result<MessagesResponse, ChatError>;

    /// `GET /chat/rooms/{id}/users`
    async fn fetch_online_users(&self, room_id: RoomId) -> Result<OnlineUsersResponse, ChatError>;

    /// `POST /chat/rooms/{id}/messages`
    async fn send_message(&self, room_id: RoomId, body: &str) -> Result<ChatMessage, ChatError>;
}

/// `reqwest`-backed [`ChatApi`].
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpChatApi {
    /// Create a client for the given API root, e.g. `https://host/api`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatError> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)
            .map_err(|e| ChatError::validation(format!("Invalid API URL '{}': {}", base_url, e)))?;

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        Ok(Self::new(config.api_base_url.clone())?.with_token(config.api_token.clone()))
    }

    /// Authenticate requests with a bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb.header("Accept", "application/json");
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn execute(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = self.authorize(rb).send().await.map_err(transport_error)?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    async fn get_json<TRes: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<TRes, ApiError> {
        let text = self
            .execute(self.client.get(self.url(path)).query(query))
            .await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let text = self.execute(self.client.post(self.url(path)).json(body)).await?;
        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.client.post(self.url(path))).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.client.delete(self.url(path))).await?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

#[async_trait(?Send)]
impl ChatApi for HttpChatApi {
    async fn list_rooms(&self) -> Result<Vec<Room>, ChatError> {
        let resp: RoomsResponse = self.get_json("/chat/rooms", &[]).await?;
        Ok(resp.rooms)
    }

    async fn create_room(&self, request: &CreateRoomRequest) -> Result<Room, ChatError> {
        let resp: RoomResponse = self.post_json("/chat/rooms", request).await?;
        Ok(resp.room)
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        Ok(self.delete(&format!("/chat/rooms/{}", room_id)).await?)
    }

    async fn join_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        Ok(self.post_empty(&format!("/chat/rooms/{}/join", room_id)).await?)
    }

    async fn leave_room(&self, room_id: RoomId) -> Result<(), ChatError> {
        Ok(self.post_empty(&format!("/chat/rooms/{}/leave", room_id)).await?)
    }

    async fn fetch_messages(
        &self,
        room_id: RoomId,
        page: u32,
    ) -> Result<MessagesResponse, ChatError> {
        let path = format!("/chat/rooms/{}/messages", room_id);
        Ok(self.get_json(&path, &[("page", page.to_string())]).await?)
    }

    async fn fetch_online_users(&self, room_id: RoomId) -> Result<OnlineUsersResponse, ChatError> {
        let path = format!("/chat/rooms/{}/users", room_id);
        Ok(self.get_json(&path, &[]).await?)
    }

    async fn send_message(&self, room_id: RoomId, body: &str) -> Result<ChatMessage, ChatError> {
        let path = format!("/chat/rooms/{}/messages", room_id);
        let request = SendMessageRequest {
            message: body.to_string(),
        };
        let resp: SendMessageResponse = self.post_json(&path, &request).await?;
        Ok(resp.data)
    }
}
