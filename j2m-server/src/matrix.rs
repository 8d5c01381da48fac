//! Minimal Matrix client-server API client implementing [`ChatApi`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use j2m_core::{ChatApi, ChatError, CreateRoomOptions, RoomId};

use crate::client::build_http_client;
use crate::config::MatrixConfig;

#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    errcode: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomIdResponse {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct JoinedMembers {
    #[serde(default)]
    joined: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
    room_alias_name: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    invite: &'a [String],
    preset: &'static str,
}

pub struct MatrixClient {
    client: ClientWithMiddleware,
    base_url: String,
    token: String,
    domain: String,
    connected: AtomicBool,
}

impl MatrixClient {
    pub fn new(config: &MatrixConfig) -> Self {
        Self {
            client: build_http_client(),
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            domain: config.domain.clone(),
            connected: AtomicBool::new(false),
        }
    }

    fn full_alias(&self, alias: &str) -> String {
        format!("#{}:{}", alias, self.domain)
    }

    /// Build an API URL from raw path segments; each segment is percent-encoded.
    fn url(&self, operation: &'static str, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = Url::parse(&format!("{}/_matrix/client/v3", self.base_url))
            .map_err(|e| ChatError::request(operation, e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| ChatError::request(operation, "homeserver URL cannot be a base"))?
            .extend(segments);
        Ok(url)
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ChatError> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }
        match request.send().await {
            Ok(response) => Ok(response),
            Err(e) => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    warn!("Lost connection to Matrix homeserver: {}", e);
                } else {
                    warn!("Matrix homeserver unreachable ({}): {}", operation, e);
                }
                Err(ChatError::NotConnected)
            }
        }
    }

    async fn error_of(operation: &'static str, response: reqwest::Response) -> ChatError {
        let status = response.status();
        let body = response.json::<MatrixErrorBody>().await.ok();
        let (errcode, message) = body
            .map(|b| (b.errcode.unwrap_or_default(), b.error.unwrap_or_default()))
            .unwrap_or_default();
        ChatError::request(operation, format!("HTTP {} {} {}", status, errcode, message))
    }

    async fn expect_ok(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ChatError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::error_of(operation, response).await)
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ChatError> {
        Self::expect_ok(operation, response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ChatError::request(operation, e.to_string()))
    }
}

#[async_trait]
impl ChatApi for MatrixClient {
    async fn connect(&self) -> Result<(), ChatError> {
        let url = self.url("whoami", &["account", "whoami"])?;
        let response = self.call("whoami", Method::GET, url, None).await?;
        let me: WhoAmI = Self::decode("whoami", response).await?;
        info!("Connected to Matrix as {}", me.user_id);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn create_room(&self, options: &CreateRoomOptions) -> Result<RoomId, ChatError> {
        let url = self.url("createRoom", &["createRoom"])?;
        let body = CreateRoomRequest {
            room_alias_name: &options.alias,
            name: &options.name,
            topic: options.topic.as_deref(),
            invite: &options.invite,
            preset: "private_chat",
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ChatError::request("createRoom", e.to_string()))?;
        let response = self.call("createRoom", Method::POST, url, Some(body)).await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let error = response.json::<MatrixErrorBody>().await.ok();
            if error.as_ref().and_then(|e| e.errcode.as_deref()) == Some("M_ROOM_IN_USE") {
                return Err(ChatError::RoomAlreadyExists {
                    alias: options.alias.clone(),
                });
            }
            let message = error.and_then(|e| e.error).unwrap_or_default();
            return Err(ChatError::request("createRoom", message));
        }

        let created: RoomIdResponse = Self::decode("createRoom", response).await?;
        debug!("Created room {} for alias {}", created.room_id, options.alias);
        Ok(RoomId(created.room_id))
    }

    async fn get_room_id_by_name(&self, alias: &str) -> Result<Option<RoomId>, ChatError> {
        let full = self.full_alias(alias);
        let url = self.url("directory", &["directory", "room", &full])?;
        let response = self.call("directory", Method::GET, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let found: RoomIdResponse = Self::decode("directory", response).await?;
        Ok(Some(RoomId(found.room_id)))
    }

    async fn send_html_message(
        &self,
        room: &RoomId,
        plain: &str,
        html: &str,
    ) -> Result<(), ChatError> {
        let txn = Uuid::new_v4().to_string();
        let url = self.url(
            "send",
            &["rooms", &room.0, "send", "m.room.message", &txn],
        )?;
        let body = json!({
            "msgtype": "m.text",
            "body": plain,
            "format": "org.matrix.custom.html",
            "formatted_body": html,
        });
        let response = self.call("send", Method::PUT, url, Some(body)).await?;
        Self::expect_ok("send", response).await?;
        Ok(())
    }

    async fn invite(&self, room: &RoomId, user_id: &str) -> Result<(), ChatError> {
        let url = self.url("invite", &["rooms", &room.0, "invite"])?;
        let body = json!({ "user_id": user_id });
        let response = self.call("invite", Method::POST, url, Some(body)).await?;
        Self::expect_ok("invite", response).await?;
        Ok(())
    }

    async fn room_members(&self, room: &RoomId) -> Result<Vec<String>, ChatError> {
        let url = self.url("joined_members", &["rooms", &room.0, "joined_members"])?;
        let response = self.call("joined_members", Method::GET, url, None).await?;
        let members: JoinedMembers = Self::decode("joined_members", response).await?;
        Ok(members.joined.into_iter().map(|(user, _)| user).collect())
    }

    async fn set_room_topic(&self, room: &RoomId, topic: &str) -> Result<(), ChatError> {
        let url = self.url("topic", &["rooms", &room.0, "state", "m.room.topic"])?;
        let response = self
            .call("topic", Method::PUT, url, Some(json!({ "topic": topic })))
            .await?;
        Self::expect_ok("topic", response).await?;
        Ok(())
    }

    async fn set_room_name(&self, room: &RoomId, name: &str) -> Result<(), ChatError> {
        let url = self.url("name", &["rooms", &room.0, "state", "m.room.name"])?;
        let response = self
            .call("name", Method::PUT, url, Some(json!({ "name": name })))
            .await?;
        Self::expect_ok("name", response).await?;
        Ok(())
    }

    fn chat_user_id(&self, tracker_user: &str) -> String {
        if tracker_user.starts_with('@') {
            tracker_user.to_string()
        } else {
            format!("@{}:{}", tracker_user.to_lowercase(), self.domain)
        }
    }
}
