// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end chat tests.
//!
//! [`MockBackend`] serves the chat REST endpoints, channel authorization,
//! and a Pusher-protocol broker from one axum router on a loopback port.
//! Tests drive either the library session or the real `chatwire` binary
//! against it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path as UrlPath, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use chatwire::config::ChatConfig;

pub const ROOM: &str = "7";
pub const CHANNEL: &str = "private-chat.7";
pub const APP_KEY: &str = "specs-key";

const MESSAGE_SENT: &str = "App\\Events\\ChatMessageSent";
const USER_JOINED: &str = "App\\Events\\UserJoinedChat";
const USER_LEFT: &str = "App\\Events\\UserLeftChat";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A frame fanned out to every socket subscribed to `channel`.
#[derive(Debug, Clone)]
struct Push {
    channel: String,
    frame: String,
}

#[derive(Debug, Clone)]
struct Member {
    id: u64,
    name: String,
}

struct World {
    pushes: broadcast::Sender<Push>,
    kick: broadcast::Sender<()>,
    next_socket: AtomicU64,
    next_message: AtomicU64,
    /// Every token ever seen, in order; a member's id is its position + 1.
    known: Mutex<Vec<String>>,
    revoked: Mutex<HashSet<String>>,
    online: Mutex<Vec<Member>>,
    messages: Mutex<Vec<Value>>,
    hits: Mutex<Vec<String>>,
    subscribes: Mutex<Vec<(String, Option<String>)>>,
    /// While set, the broker answers upgrades with 503.
    refusing: AtomicBool,
    refused: AtomicU64,
}

impl World {
    fn new() -> Self {
        let (pushes, _) = broadcast::channel(256);
        let (kick, _) = broadcast::channel(4);
        Self {
            pushes,
            kick,
            next_socket: AtomicU64::new(1),
            next_message: AtomicU64::new(1),
            known: Mutex::new(Vec::new()),
            revoked: Mutex::new(HashSet::new()),
            online: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            hits: Mutex::new(Vec::new()),
            subscribes: Mutex::new(Vec::new()),
            refusing: AtomicBool::new(false),
            refused: AtomicU64::new(0),
        }
    }

    fn member(&self, headers: &HeaderMap) -> Option<Member> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))?
            .to_owned();
        if token.is_empty() || self.revoked.lock().contains(&token) {
            return None;
        }
        let mut known = self.known.lock();
        let index = match known.iter().position(|t| *t == token) {
            Some(i) => i,
            None => {
                known.push(token.clone());
                known.len() - 1
            }
        };
        Some(Member { id: index as u64 + 1, name: token })
    }

    fn hit(&self, endpoint: &str) {
        self.hits.lock().push(endpoint.to_owned());
    }

    fn push(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "channel": CHANNEL, "data": data.to_string() });
        let _ = self.pushes.send(Push { channel: CHANNEL.to_owned(), frame: frame.to_string() });
    }

    fn post(&self, author: &Member, text: &str) -> Value {
        let message = json!({
            "id": self.next_message.fetch_add(1, Ordering::SeqCst),
            "chat_room_id": ROOM.parse::<u64>().unwrap_or_default(),
            "user_id": author.id,
            "user_name": author.name,
            "message": text,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        self.messages.lock().push(message.clone());
        self.push(MESSAGE_SENT, json!({ "message": message }));
        message
    }
}

fn user_json(member: &Member) -> Value {
    json!({ "id": member.id, "name": member.name })
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Unauthenticated." }))).into_response()
}

// -- REST -----------------------------------------------------------------------

async fn join(State(world): State<Arc<World>>, headers: HeaderMap) -> Response {
    world.hit("join");
    let Some(member) = world.member(&headers) else { return unauthorized() };
    {
        let mut online = world.online.lock();
        if !online.iter().any(|m| m.id == member.id) {
            online.push(member.clone());
        }
    }
    world.push(USER_JOINED, json!({ "user": user_json(&member) }));
    Json(json!({ "room_id": ROOM.parse::<u64>().unwrap_or_default(), "message": "Joined chat" }))
        .into_response()
}

async fn leave(State(world): State<Arc<World>>, headers: HeaderMap) -> Response {
    world.hit("leave");
    let Some(member) = world.member(&headers) else { return unauthorized() };
    world.online.lock().retain(|m| m.id != member.id);
    world.push(USER_LEFT, json!({ "user": user_json(&member) }));
    Json(json!({ "message": "Left chat" })).into_response()
}

async fn send_message(
    State(world): State<Arc<World>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    world.hit("send-message");
    let Some(member) = world.member(&headers) else { return unauthorized() };
    let text = body.get("message").and_then(Value::as_str).unwrap_or_default();
    if text.trim().is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "message": "Message required" })))
            .into_response();
    }
    let message = world.post(&member, text);
    Json(json!({ "status": "Message sent!", "message": message })).into_response()
}

async fn messages(State(world): State<Arc<World>>, headers: HeaderMap) -> Response {
    world.hit("messages");
    if world.member(&headers).is_none() {
        return unauthorized();
    }
    let messages = world.messages.lock().clone();
    Json(json!({ "messages": messages })).into_response()
}

async fn online_users(State(world): State<Arc<World>>, headers: HeaderMap) -> Response {
    world.hit("online-users");
    if world.member(&headers).is_none() {
        return unauthorized();
    }
    let users: Vec<Value> = world.online.lock().iter().map(user_json).collect();
    Json(json!({ "users": users })).into_response()
}

async fn update_status(State(world): State<Arc<World>>, headers: HeaderMap) -> Response {
    world.hit("update-status");
    if world.member(&headers).is_none() {
        return unauthorized();
    }
    Json(json!({ "status": "online" })).into_response()
}

async fn channel_auth(
    State(world): State<Arc<World>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    world.hit("broadcasting/auth");
    if world.member(&headers).is_none() {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let socket_id = form.get("socket_id").map(String::as_str).unwrap_or_default();
    let channel = form.get("channel_name").map(String::as_str).unwrap_or_default();
    Json(json!({ "auth": format!("{APP_KEY}:{socket_id}:{channel}") })).into_response()
}

// -- broker ---------------------------------------------------------------------

fn frame(event: &str, data: Value) -> Message {
    Message::Text(json!({ "event": event, "data": data.to_string() }).to_string().into())
}

async fn broker(
    State(world): State<Arc<World>>,
    UrlPath(key): UrlPath<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if world.refusing.load(Ordering::SeqCst) {
        world.refused.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "broker offline").into_response();
    }
    ws.on_upgrade(move |socket| broker_session(world, key, socket))
}

async fn broker_session(world: Arc<World>, key: String, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if key != APP_KEY {
        let message = format!("App key {key} not in this cluster");
        let error = json!({ "code": 4001, "message": message });
        let _ = ws_tx.send(frame("pusher:error", error)).await;
        return;
    }

    let n = world.next_socket.fetch_add(1, Ordering::SeqCst);
    let established = json!({ "socket_id": format!("{n}.{}", n * 7), "activity_timeout": 120 });
    if ws_tx.send(frame("pusher:connection_established", established)).await.is_err() {
        return;
    }

    let mut pushes = world.pushes.subscribe();
    let mut kick = world.kick.subscribe();
    let mut channels: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            _ = kick.recv() => break,

            push = pushes.recv() => {
                let push = match push {
                    Ok(p) => p,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if channels.contains(&push.channel)
                    && ws_tx.send(Message::Text(push.frame.into())).await.is_err()
                {
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = client_frame(&world, &text, &mut channels) {
                            if ws_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn client_frame(world: &World, text: &str, channels: &mut HashSet<String>) -> Option<Message> {
    let msg: Value = serde_json::from_str(text).ok()?;
    let event = msg.get("event").and_then(Value::as_str).unwrap_or_default();
    let data = msg.get("data").cloned().unwrap_or(Value::Null);
    let channel = data.get("channel").and_then(Value::as_str).unwrap_or_default().to_owned();

    match event {
        "pusher:ping" => Some(frame("pusher:pong", json!({}))),
        "pusher:subscribe" => {
            let auth = data.get("auth").and_then(Value::as_str).map(str::to_owned);
            if channel.starts_with("private-") && auth.is_none() {
                let error = json!({ "code": 4009, "message": "Connection not authorized" });
                return Some(frame("pusher:error", error));
            }
            world.subscribes.lock().push((channel.clone(), auth));
            channels.insert(channel.clone());
            let ok = json!({
                "event": "pusher_internal:subscription_succeeded",
                "channel": channel,
                "data": "{}",
            });
            Some(Message::Text(ok.to_string().into()))
        }
        "pusher:unsubscribe" => {
            channels.remove(&channel);
            None
        }
        _ => None,
    }
}

fn router(world: Arc<World>) -> Router {
    Router::new()
        .route("/api/chat/join", post(join))
        .route("/api/chat/leave", post(leave))
        .route("/api/chat/send-message", post(send_message))
        .route("/api/chat/messages", get(messages))
        .route("/api/chat/online-users", get(online_users))
        .route("/api/chat/update-status", post(update_status))
        .route("/broadcasting/auth", post(channel_auth))
        .route("/app/{key}", get(broker))
        .with_state(world)
}

/// A running mock backend, shut down on drop.
pub struct MockBackend {
    addr: SocketAddr,
    world: Arc<World>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let world = Arc::new(World::new());
        let app = router(Arc::clone(&world));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, world, task })
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Client settings pointing at this backend, with fast reconnects.
    pub fn config(&self) -> ChatConfig {
        ChatConfig {
            api_base_url: self.api_url(),
            ws_host: self.addr.ip().to_string(),
            ws_port: self.addr.port(),
            ws_scheme: "http".to_owned(),
            app_key: APP_KEY.to_owned(),
            reconnect_delay_ms: 50,
            reconnect_max_delay_ms: 200,
            ..ChatConfig::default()
        }
    }

    /// Command-line flags equivalent to [`config`](Self::config).
    pub fn cli_args(&self) -> Vec<String> {
        let config = self.config();
        vec![
            "--api-base-url".into(),
            config.api_base_url,
            "--ws-host".into(),
            config.ws_host,
            "--ws-port".into(),
            config.ws_port.to_string(),
            "--app-key".into(),
            config.app_key,
            "--reconnect-delay-ms".into(),
            config.reconnect_delay_ms.to_string(),
            "--reconnect-max-delay-ms".into(),
            config.reconnect_max_delay_ms.to_string(),
        ]
    }

    /// Requests served for `endpoint` (e.g. `"join"`, `"broadcasting/auth"`).
    pub fn hits(&self, endpoint: &str) -> usize {
        self.world.hits.lock().iter().filter(|h| *h == endpoint).count()
    }

    /// Subscribe requests accepted for `channel`, with the auth each carried.
    pub fn subscribes(&self, channel: &str) -> Vec<Option<String>> {
        self.world
            .subscribes
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, auth)| auth.clone())
            .collect()
    }

    /// Bodies of every stored message, oldest first.
    pub fn message_bodies(&self) -> Vec<String> {
        self.world
            .messages
            .lock()
            .iter()
            .filter_map(|m| m.get("message").and_then(Value::as_str).map(str::to_owned))
            .collect()
    }

    /// Post `text` as `token`'s user, as if from another client.
    pub fn say(&self, token: &str, text: &str) {
        let member = self.member(token);
        self.world.post(&member, text);
    }

    /// Mark `token`'s user online and announce it.
    pub fn arrive(&self, token: &str) {
        let member = self.member(token);
        self.world.online.lock().push(member.clone());
        self.world.push(USER_JOINED, json!({ "user": user_json(&member) }));
    }

    /// Refuse every future request carrying `token`.
    pub fn revoke(&self, token: &str) {
        self.world.revoked.lock().insert(token.to_owned());
    }

    /// Turn broker upgrades away (or accept them again).
    pub fn set_refusing(&self, refusing: bool) {
        self.world.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Upgrades turned away while refusing.
    pub fn refused(&self) -> u64 {
        self.world.refused.load(Ordering::SeqCst)
    }

    /// Close every open broker socket.
    pub fn drop_sockets(&self) {
        let _ = self.world.kick.send(());
    }

    fn member(&self, token: &str) -> Member {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
        self.world.member(&headers).unwrap_or(Member { id: 0, name: token.to_owned() })
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// -- binary ---------------------------------------------------------------------

/// Resolve the path to the compiled `chatwire` binary.
pub fn chatwire_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("chatwire")
}

/// A running `chatwire` process fed through stdin, killed on drop.
pub struct ChatwireProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ChatwireProcess {
    pub fn spawn(backend: &MockBackend, token: &str) -> anyhow::Result<Self> {
        let binary = chatwire_binary();
        anyhow::ensure!(binary.exists(), "chatwire binary not found at {}", binary.display());

        let mut child = Command::new(&binary)
            .args(backend.cli_args())
            .args(["--token", token])
            .env("RUST_LOG", "chatwire=debug")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take();
        Ok(Self { child, stdin })
    }

    /// Type one line at the prompt.
    pub fn type_line(&mut self, line: &str) -> anyhow::Result<()> {
        use std::io::Write;

        let stdin = self.stdin.as_mut().ok_or_else(|| anyhow::anyhow!("stdin closed"))?;
        writeln!(stdin, "{line}")?;
        stdin.flush()?;
        Ok(())
    }

    /// Wait for exit, returning whether it was successful.
    pub async fn wait(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status.success());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("chatwire did not exit within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ChatwireProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
