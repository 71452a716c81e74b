// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST client for the chat backend.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ChatConfig;
use crate::credential::Credential;
use crate::error::{ChatError, TransportError};
use crate::model::{
    ChatMessage, JoinResponse, MessagesResponse, OnlineUsersResponse, PresenceUser, RoomId,
    SendMessageRequest,
};
use crate::transport::ChannelAuthorizer;

pub const JOIN: &str = "/chat/join";
pub const LEAVE: &str = "/chat/leave";
pub const SEND_MESSAGE: &str = "/chat/send-message";
pub const MESSAGES: &str = "/chat/messages";
pub const ONLINE_USERS: &str = "/chat/online-users";
pub const UPDATE_STATUS: &str = "/chat/update-status";

/// The chat backend's REST surface. Every call carries the bearer credential.
pub trait ChatApi: Send + Sync + 'static {
    fn join(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<RoomId, ChatError>> + Send;

    fn leave(&self, credential: &Credential) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn send_message(
        &self,
        credential: &Credential,
        text: &str,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn messages(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, ChatError>> + Send;

    fn online_users(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<PresenceUser>, ChatError>> + Send;

    fn update_status(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;
}

/// [`ChatApi`] over HTTP, also signing private channel subscriptions.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    config: Arc<ChatConfig>,
}

impl HttpChatApi {
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { client, config: Arc::new(config.clone()) })
    }

    fn get(&self, path: &str, credential: &Credential) -> RequestBuilder {
        self.client
            .get(self.config.api_url(path))
            .bearer_auth(credential.token())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn post(&self, path: &str, credential: &Credential) -> RequestBuilder {
        self.client
            .post(self.config.api_url(path))
            .bearer_auth(credential.token())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn fetch<T: DeserializeOwned>(
        endpoint: &'static str,
        req: RequestBuilder,
    ) -> Result<T, ChatError> {
        let resp = Self::execute(endpoint, req).await?;
        resp.json().await.map_err(|e| ChatError::endpoint(endpoint, &e))
    }

    async fn execute(
        endpoint: &'static str,
        req: RequestBuilder,
    ) -> Result<reqwest::Response, ChatError> {
        let resp = req.send().await.map_err(|e| ChatError::endpoint(endpoint, &e))?;
        resp.error_for_status().map_err(|e| ChatError::endpoint(endpoint, &e))
    }
}

impl ChatApi for HttpChatApi {
    async fn join(&self, credential: &Credential) -> Result<RoomId, ChatError> {
        let resp: JoinResponse = Self::fetch(JOIN, self.post(JOIN, credential)).await?;
        Ok(resp.room_id)
    }

    async fn leave(&self, credential: &Credential) -> Result<(), ChatError> {
        Self::execute(LEAVE, self.post(LEAVE, credential)).await?;
        Ok(())
    }

    async fn send_message(&self, credential: &Credential, text: &str) -> Result<(), ChatError> {
        let req = self.post(SEND_MESSAGE, credential).json(&SendMessageRequest { message: text });
        Self::execute(SEND_MESSAGE, req).await?;
        Ok(())
    }

    async fn messages(&self, credential: &Credential) -> Result<Vec<ChatMessage>, ChatError> {
        let resp: MessagesResponse = Self::fetch(MESSAGES, self.get(MESSAGES, credential)).await?;
        Ok(resp.messages)
    }

    async fn online_users(&self, credential: &Credential) -> Result<Vec<PresenceUser>, ChatError> {
        let resp: OnlineUsersResponse =
            Self::fetch(ONLINE_USERS, self.get(ONLINE_USERS, credential)).await?;
        Ok(resp.users)
    }

    async fn update_status(&self, credential: &Credential) -> Result<(), ChatError> {
        Self::execute(UPDATE_STATUS, self.post(UPDATE_STATUS, credential)).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ChannelAuth {
    auth: String,
}

impl ChannelAuthorizer for HttpChatApi {
    fn authorize(
        &self,
        credential: &Credential,
        socket_id: &str,
        channel: &str,
    ) -> BoxFuture<'static, Result<String, TransportError>> {
        let req = self
            .client
            .post(self.config.auth_url())
            .bearer_auth(credential.token())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("socket_id", socket_id), ("channel_name", channel)]);

        Box::pin(async move {
            let resp = req.send().await.map_err(|e| TransportError::Connect(e.to_string()))?;
            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(TransportError::Unauthorized(format!("channel auth returned {status}")));
            }
            let resp = resp.error_for_status().map_err(|e| TransportError::Connect(e.to_string()))?;
            let body: ChannelAuth =
                resp.json().await.map_err(|e| TransportError::Connect(e.to_string()))?;
            Ok(body.auth)
        })
    }
}
