//! Session configuration.

use std::path::Path;

use serde::Deserialize;

use crate::reconnect::ReconnectPolicy;
use crate::session::SessionError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base WebSocket URL; the design path is appended.
    pub server_url: String,
    pub reconnect: ReconnectPolicy,
    /// Buffer size of the outgoing and event channels.
    pub channel_capacity: usize,
    /// Applied operations kept for inspection.
    pub op_log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            reconnect: ReconnectPolicy::default(),
            channel_capacity: 256,
            op_log_capacity: 1024,
        }
    }
}

impl SessionConfig {
    pub fn with_server(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Load a (possibly partial) JSON config; absent fields keep defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SessionError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(SessionError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got '{}'",
                self.server_url
            )));
        }
        if self.channel_capacity == 0 {
            return Err(SessionError::Config("channel_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Socket endpoint for one design: `{server_url}/design/{design_id}`.
    pub fn endpoint(&self, design_id: &str) -> String {
        format!("{}/design/{design_id}", self.server_url.trim_end_matches('/'))
    }
}
