//! Discord webhook notifier.
//!
//! Posts one embed per finished job as `multipart/form-data`: a
//! `payload_json` part plus the preview as `files[0]`. An unset or blank
//! webhook URL disables the notifier.

use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{Notification, Notifier, NotifyResult, NotifyStatus, format_duration};
use crate::config::DiscordConfig;
use crate::error::{Error, Result};

pub const COLOR_SUCCESS: u32 = 0x2ECC71;
pub const COLOR_WARNING: u32 = 0xF1C40F;
const USER_AGENT: &str = concat!("ondl-rs/", env!("CARGO_PKG_VERSION"));
/// Discord error bodies are short; longer ones are truncated in messages.
const MAX_ERROR_BODY: usize = 500;

pub struct Discord {
    webhook_url: Option<SecretString>,
    username: String,
    avatar_url: String,
    author_icon_url: String,
    client: reqwest::Client,
}

impl Discord {
    pub fn from_config(config: &DiscordConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .as_ref()
            .filter(|url| !url.expose_secret().trim().is_empty())
            .cloned();

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            webhook_url,
            username: config.username.trim().to_string(),
            avatar_url: config.avatar_url.trim().to_string(),
            author_icon_url: config.author_icon_url.trim().to_string(),
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// The JSON body sent as `payload_json`.
    pub fn payload(&self, message: &Notification, attachment_name: Option<&str>) -> Value {
        let mut payload = json!({
            "content": "",
            "embeds": [build_embed(message, &self.author_icon_url, attachment_name)],
        });
        if !self.username.is_empty() {
            payload["username"] = json!(self.username);
        }
        if !self.avatar_url.is_empty() {
            payload["avatar_url"] = json!(self.avatar_url);
        }
        payload
    }
}

/// Build the embed announcing a finished download.
pub fn build_embed(message: &Notification, author_icon_url: &str, attachment_name: Option<&str>) -> Value {
    let description = match message.preview_start {
        Some(start) => format!("Downloaded and rendered preview (starts at ~{start:.2}s)."),
        None => "Downloaded.".to_string(),
    };
    let size = match message.file_size_bytes {
        Some(bytes) => format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0)),
        None => "unknown".to_string(),
    };
    let channel = if message.channel.is_empty() {
        "unknown"
    } else {
        message.channel.as_str()
    };

    let mut fields = vec![
        json!({"name": "Channel", "value": channel, "inline": true}),
        json!({"name": "Duration", "value": format_duration(message.duration), "inline": true}),
        json!({"name": "File Size", "value": size, "inline": true}),
        json!({"name": "Saved To", "value": message.saved_to.display().to_string(), "inline": false}),
    ];
    if message.used_fallback {
        fields.push(json!({
            "name": "Storage Fallback Used",
            "value": "Download root unavailable; file saved locally. Check logs for details.",
            "inline": false,
        }));
    }

    let mut author = json!({"name": "DOWNLOAD FINISHED"});
    if !author_icon_url.is_empty() {
        author["icon_url"] = json!(author_icon_url);
    }

    let mut embed = json!({
        "title": message.title,
        "url": message.url,
        "description": description,
        "color": if message.used_fallback { COLOR_WARNING } else { COLOR_SUCCESS },
        "author": author,
        "footer": {"text": "OnDL"},
        "fields": fields,
    });
    if let Some(thumb) = &message.thumbnail {
        embed["thumbnail"] = json!({"url": thumb});
    }
    if let Some(name) = attachment_name {
        embed["image"] = json!({"url": format!("attachment://{name}")});
    }
    embed
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Notifier for Discord {
    async fn notify(&self, message: &Notification, attachment: Option<&Path>) -> NotifyResult {
        let Some(webhook) = &self.webhook_url else {
            debug!("discord webhook not configured, skipping");
            return Ok(NotifyStatus::Skipped);
        };

        let attachment = match attachment {
            Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => Some(path),
            _ => None,
        };
        let file_name = attachment
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned());

        let payload = self.payload(message, file_name.as_deref());
        let payload_part = reqwest::multipart::Part::text(payload.to_string())
            .mime_str("application/json")
            .map_err(|e| Error::Notify(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new().part("payload_json", payload_part);

        if let (Some(path), Some(name)) = (attachment, file_name) {
            let bytes = tokio::fs::read(path).await?;
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(name)
                .mime_str(mime_for(path))
                .map_err(|e| Error::Notify(e.to_string()))?;
            form = form.part("files[0]", part);
        }

        let response = self
            .client
            .post(webhook.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Notify(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(Error::Notify(format!("HTTP {status}; body={body:?}")));
        }
        Ok(NotifyStatus::Sent)
    }
}
