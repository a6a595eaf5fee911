//! Interaction payloads: parsing inbound webhooks and building responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use music_core::AudioFormat;

use crate::error::ApiError;

pub const PING: u8 = 1;
pub const APPLICATION_COMMAND: u8 = 2;

pub const RESPONSE_PONG: u8 = 1;
pub const RESPONSE_CHANNEL_MESSAGE: u8 = 4;
pub const RESPONSE_DEFERRED: u8 = 5;

/// Message flag hiding the reply from everyone but the invoking user.
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

pub const DEFAULT_DURATION_SECS: i64 = 10;
pub const DEFAULT_FORMAT: &str = "wav";

/// Where and to whom a job's result is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionContext {
    pub application_id: String,
    pub token: String,
    pub user_id: String,
}

/// How the clip is conditioned, fixed when the request is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMode {
    TextOnly,
    MelodyConditioned { url: String },
}

/// A validated request, owned by its background job.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub prompt: String,
    pub duration_secs: u32,
    pub format: AudioFormat,
    pub mode: RequestMode,
    pub context: InteractionContext,
}

/// Command options as sent, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub prompt: String,
    pub duration: i64,
    pub format: String,
    pub melody_url: Option<String>,
    pub context: InteractionContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Ping,
    Command(CommandInvocation),
}

#[derive(Deserialize)]
struct RawInteraction {
    application_id: Option<String>,
    token: Option<String>,
    member: Option<Member>,
    user: Option<User>,
    data: Option<CommandData>,
}

#[derive(Deserialize)]
struct Member {
    user: Option<User>,
}

#[derive(Deserialize)]
struct User {
    id: String,
}

#[derive(Deserialize)]
struct CommandData {
    #[serde(default)]
    options: Vec<CommandOption>,
    resolved: Option<Resolved>,
}

#[derive(Deserialize)]
struct CommandOption {
    name: String,
    value: Option<Value>,
}

#[derive(Deserialize)]
struct Resolved {
    #[serde(default)]
    attachments: BTreeMap<String, Attachment>,
}

#[derive(Deserialize)]
struct Attachment {
    url: String,
}

fn malformed(msg: impl Into<String>) -> ApiError {
    ApiError::MalformedInteraction(msg.into())
}

/// Parse a raw interaction body.
///
/// Pings are recognised from `type` alone. Commands need a prompt, an
/// application id, a token and an invoking user. Unknown option names are
/// skipped.
pub fn parse_interaction(body: &[u8]) -> Result<Interaction, ApiError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    match value.get("type").and_then(Value::as_u64) {
        Some(t) if t == u64::from(PING) => Ok(Interaction::Ping),
        Some(t) if t == u64::from(APPLICATION_COMMAND) => {
            let raw: RawInteraction = serde_json::from_value(value)
                .map_err(|e| malformed(format!("invalid command payload: {e}")))?;
            parse_command(raw).map(Interaction::Command)
        }
        Some(other) => Err(malformed(format!("unsupported interaction type {other}"))),
        None => Err(malformed("missing interaction type")),
    }
}

fn parse_command(raw: RawInteraction) -> Result<CommandInvocation, ApiError> {
    let data = raw.data.ok_or_else(|| malformed("command without data"))?;

    let mut prompt = None;
    let mut duration = DEFAULT_DURATION_SECS;
    let mut format = DEFAULT_FORMAT.to_string();
    let mut referenced_attachment = None;

    for option in &data.options {
        let Some(value) = option.value.as_ref() else {
            continue;
        };
        match option.name.as_str() {
            "prompt" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| malformed("prompt must be a string"))?;
                prompt = Some(text.to_string());
            }
            "duration" => {
                duration = value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| malformed("duration must be an integer"))?;
            }
            "format" => {
                format = value
                    .as_str()
                    .ok_or_else(|| malformed("format must be a string"))?
                    .to_string();
            }
            "melody" => {
                referenced_attachment = value.as_str().map(str::to_string);
            }
            _ => {}
        }
    }

    let prompt = prompt.ok_or_else(|| malformed("missing prompt option"))?;

    let melody_url = data.resolved.and_then(|resolved| {
        let mut attachments = resolved.attachments;
        match referenced_attachment.and_then(|id| attachments.remove(&id)) {
            Some(attachment) => Some(attachment.url),
            None => attachments
                .into_iter()
                .max_by_key(|(id, _)| (id.parse::<u64>().ok(), id.clone()))
                .map(|(_, a)| a.url),
        }
    });

    let application_id = raw
        .application_id
        .ok_or_else(|| malformed("missing application_id"))?;
    let token = raw.token.ok_or_else(|| malformed("missing token"))?;
    let user_id = raw
        .member
        .and_then(|m| m.user)
        .or(raw.user)
        .map(|u| u.id)
        .ok_or_else(|| malformed("missing invoking user"))?;

    Ok(CommandInvocation {
        prompt,
        duration,
        format,
        melody_url,
        context: InteractionContext {
            application_id,
            token,
            user_id,
        },
    })
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MessageData {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

/// Synchronous reply to an interaction webhook.
#[derive(Debug, Serialize, PartialEq)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageData>,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: RESPONSE_PONG,
            data: None,
        }
    }

    pub fn deferred() -> Self {
        Self {
            kind: RESPONSE_DEFERRED,
            data: None,
        }
    }

    /// Immediate reply only the invoking user can see.
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(MessageData {
                content: content.into(),
                flags: Some(FLAG_EPHEMERAL),
            }),
        }
    }
}
