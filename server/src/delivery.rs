//! Follow-up messages on a deferred interaction: the clip, or an error.

use std::time::Duration;

use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::interaction::InteractionContext;
use crate::job::GenerationResult;

pub const OUTPUT_DESCRIPTION: &str = "Output file";
pub const MELODY_DESCRIPTION: &str = "Original Melody";

/// How a delivery attempt ended. Recorded and logged, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Rejected { status: u16, body: String },
    TransportFailed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn log(&self, job_id: Uuid) {
        match self {
            DeliveryOutcome::Delivered { status } => {
                info!(job = %job_id, status, "Delivery accepted")
            }
            DeliveryOutcome::Rejected { status, body } => {
                warn!(job = %job_id, status, body = %body, "Delivery rejected")
            }
            DeliveryOutcome::TransportFailed(reason) => {
                warn!(job = %job_id, reason = %reason, "Delivery transport failed")
            }
        }
    }
}

#[derive(Serialize)]
struct AttachmentMeta {
    id: u8,
    description: &'static str,
    filename: String,
}

#[derive(Serialize)]
struct ClipPayload {
    content: String,
    tts: bool,
    attachments: Vec<AttachmentMeta>,
}

#[derive(Serialize)]
struct EditPayload<'a> {
    content: &'a str,
    tts: bool,
}

#[derive(Clone, Debug)]
pub struct WebhookDelivery {
    client: Client,
    api_base: String,
}

impl WebhookDelivery {
    pub fn new(api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_base))
    }

    pub fn with_client(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn webhook_url(&self, ctx: &InteractionContext) -> String {
        format!(
            "{}/webhooks/{}/{}",
            self.api_base, ctx.application_id, ctx.token
        )
    }

    /// Post the finished clip, plus the melody it was conditioned on if any.
    pub async fn send_clip(
        &self,
        ctx: &InteractionContext,
        prompt: &str,
        result: &GenerationResult,
    ) -> DeliveryOutcome {
        match self.clip_form(ctx, prompt, result) {
            Ok(form) => {
                let request = self.client.post(self.webhook_url(ctx)).multipart(form);
                send(request).await
            }
            Err(e) => DeliveryOutcome::TransportFailed(format!("failed to build form: {e}")),
        }
    }

    /// Replace the "thinking" placeholder with `message`.
    pub async fn send_error(&self, ctx: &InteractionContext, message: &str) -> DeliveryOutcome {
        let url = format!("{}/messages/@original", self.webhook_url(ctx));
        let request = self.client.patch(url).json(&EditPayload {
            content: message,
            tts: false,
        });
        send(request).await
    }

    fn clip_form(
        &self,
        ctx: &InteractionContext,
        prompt: &str,
        result: &GenerationResult,
    ) -> anyhow::Result<Form> {
        let ext = result.format.extension();
        let mime = result.format.mime_type();

        let output_name = format!("output.{ext}");
        let melody_name = format!("original_melody.{ext}");

        let mut attachments = vec![AttachmentMeta {
            id: 0,
            description: OUTPUT_DESCRIPTION,
            filename: output_name.clone(),
        }];
        if result.melody_clip.is_some() {
            attachments.push(AttachmentMeta {
                id: 1,
                description: MELODY_DESCRIPTION,
                filename: melody_name.clone(),
            });
        }

        let payload = ClipPayload {
            content: format!("<@{}> {}", ctx.user_id, prompt),
            tts: false,
            attachments,
        };

        let mut form = Form::new().text("payload_json", serde_json::to_string(&payload)?);

        let output = Part::bytes(result.primary_clip.clone())
            .file_name(output_name)
            .mime_str(mime)?;
        form = form.part("files[0]", output);

        if let Some(melody) = &result.melody_clip {
            let part = Part::bytes(melody.clone())
                .file_name(melody_name)
                .mime_str(mime)?;
            form = form.part("files[1]", part);
        }

        Ok(form)
    }
}

async fn send(request: RequestBuilder) -> DeliveryOutcome {
    match request.send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                DeliveryOutcome::Delivered {
                    status: status.as_u16(),
                }
            } else {
                let body = resp.text().await.unwrap_or_default();
                DeliveryOutcome::Rejected {
                    status: status.as_u16(),
                    body,
                }
            }
        }
        Err(e) => DeliveryOutcome::TransportFailed(e.to_string()),
    }
}
