//! Delivery channels - each exposes a single `send(text) -> bool`.
//!
//! Supports:
//! - Webhook POST (direct message bridges, chat relays)
//! - Local command (notify-send, wall, custom scripts)
//! - Log line (last-resort fallback, always succeeds)

use async_trait::async_trait;
use ladder_common::{ChannelConfig, LadderError, Result};
use serde_json::json;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `text`. Failures are reported as `false`, never as panics.
    async fn send(&self, text: &str) -> bool;
}

pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| LadderError::Config(format!("webhook client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, text: &str) -> bool {
        match self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("[NOTIFY] Webhook delivered to {}", self.url);
                true
            }
            Ok(resp) => {
                warn!("[NOTIFY] Webhook {} answered {}", self.url, resp.status());
                false
            }
            Err(e) => {
                warn!("[NOTIFY] Webhook {} failed: {}", self.url, e);
                false
            }
        }
    }
}

pub struct CommandChannel {
    program: String,
    args: Vec<String>,
}

impl CommandChannel {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }
}

#[async_trait]
impl NotificationChannel for CommandChannel {
    fn name(&self) -> &str {
        &self.program
    }

    async fn send(&self, text: &str) -> bool {
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                info!("[NOTIFY] {} delivered", self.program);
                true
            }
            Ok(output) => {
                warn!(
                    "[NOTIFY] {} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("[NOTIFY] Error running {}: {}", self.program, e);
                false
            }
        }
    }
}

pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> bool {
        info!("[NOTIFY] {}", text);
        true
    }
}

/// Channels in priority order.
pub fn build_channels(configs: &[ChannelConfig]) -> Result<Vec<Box<dyn NotificationChannel>>> {
    configs
        .iter()
        .map(|c| -> Result<Box<dyn NotificationChannel>> {
            Ok(match c {
                ChannelConfig::Webhook { url, timeout_secs } => {
                    Box::new(WebhookChannel::new(url, *timeout_secs)?)
                }
                ChannelConfig::Command { program, args } => {
                    Box::new(CommandChannel::new(program, args))
                }
                ChannelConfig::Log => Box::new(LogChannel),
            })
        })
        .collect()
}
