// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Connection and behaviour settings for a chat session.
#[derive(Debug, Clone, clap::Args)]
pub struct ChatConfig {
    /// Base URL of the chat REST API (endpoints are appended to it).
    #[arg(long, default_value = "http://127.0.0.1:8000/api", env = "CHATWIRE_API_URL")]
    pub api_base_url: String,

    /// Realtime broker host.
    #[arg(long, default_value = "127.0.0.1", env = "CHATWIRE_WS_HOST")]
    pub ws_host: String,

    /// Realtime broker port.
    #[arg(long, default_value_t = 8080, env = "CHATWIRE_WS_PORT")]
    pub ws_port: u16,

    /// Realtime broker scheme (`http` or `https`; mapped to `ws`/`wss`).
    #[arg(long, default_value = "http", env = "CHATWIRE_WS_SCHEME")]
    pub ws_scheme: String,

    /// Application key the broker expects in the socket path.
    #[arg(long, default_value = "", env = "CHATWIRE_APP_KEY")]
    pub app_key: String,

    /// Private channel authorization endpoint, relative to the API origin.
    #[arg(long, default_value = "/broadcasting/auth", env = "CHATWIRE_AUTH_ENDPOINT")]
    pub auth_endpoint: String,

    /// Reconnect attempts after a drop before the connection is declared failed.
    #[arg(long, default_value_t = 5, env = "CHATWIRE_RECONNECT_ATTEMPTS")]
    pub reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds (doubled per attempt).
    #[arg(long, default_value_t = 3000, env = "CHATWIRE_RECONNECT_DELAY_MS")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for a single reconnect delay in milliseconds.
    #[arg(long, default_value_t = 30000, env = "CHATWIRE_RECONNECT_MAX_DELAY_MS")]
    pub reconnect_max_delay_ms: u64,

    /// Presence heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 30000, env = "CHATWIRE_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,

    /// Maximum accepted message length in characters.
    #[arg(long, default_value_t = 1000, env = "CHATWIRE_MAX_MESSAGE_LENGTH")]
    pub max_message_length: usize,

    /// Timeout for a single REST request in milliseconds.
    #[arg(long, default_value_t = 10000, env = "CHATWIRE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_owned(),
            ws_host: "127.0.0.1".to_owned(),
            ws_port: 8080,
            ws_scheme: "http".to_owned(),
            app_key: String::new(),
            auth_endpoint: "/broadcasting/auth".to_owned(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 3000,
            reconnect_max_delay_ms: 30000,
            heartbeat_ms: 30000,
            max_message_length: 1000,
            request_timeout_ms: 10000,
        }
    }
}

impl ChatConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.app_key.trim().is_empty() {
            anyhow::bail!("app key is required (--app-key or CHATWIRE_APP_KEY)");
        }
        match self.ws_scheme.as_str() {
            "http" | "https" | "ws" | "wss" => {}
            other => anyhow::bail!("unsupported ws scheme: {other}"),
        }
        if self.reconnect_max_delay_ms < self.reconnect_delay_ms {
            anyhow::bail!(
                "reconnect max delay ({}ms) is below the base delay ({}ms)",
                self.reconnect_max_delay_ms,
                self.reconnect_delay_ms
            );
        }
        if self.heartbeat_ms == 0 {
            anyhow::bail!("heartbeat interval must be non-zero");
        }
        if self.max_message_length == 0 {
            anyhow::bail!("max message length must be non-zero");
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Presence entries not refreshed for this long are dropped on `tick`.
    pub fn presence_stale_after(&self) -> Duration {
        self.heartbeat_interval() * 2
    }

    /// Build the broker socket URL for the configured app key.
    pub fn ws_url(&self) -> String {
        let scheme = match self.ws_scheme.as_str() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        format!(
            "{scheme}://{}:{}/app/{}?protocol=7&client=chatwire&version={}",
            self.ws_host,
            self.ws_port,
            self.app_key,
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Full URL of a REST endpoint path such as `/chat/join`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// Full URL of the channel authorization endpoint.
    ///
    /// Relative endpoints resolve against the API origin (scheme + authority),
    /// not the API base path, since the broadcaster route is not under `/api`.
    pub fn auth_url(&self) -> String {
        if self.auth_endpoint.starts_with("http://") || self.auth_endpoint.starts_with("https://")
        {
            return self.auth_endpoint.clone();
        }
        format!("{}{}", api_origin(&self.api_base_url), self.auth_endpoint)
    }
}

/// Strip the path from an absolute URL, keeping `scheme://authority`.
fn api_origin(base: &str) -> &str {
    let base = base.trim_end_matches('/');
    let after_scheme = base.find("://").map(|i| i + 3).unwrap_or(0);
    match base[after_scheme..].find('/') {
        Some(i) => &base[..after_scheme + i],
        None => base,
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
