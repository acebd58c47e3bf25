use crate::converters::with_meta;
use crate::error::ConverterError;
use crate::pipeline::postprocess::tidy_markdown;
use crate::pipeline::registry::{Converter, ConverterContext, ConverterOutput};
use crate::prompts::{transcribe_attachment, transcribe_link, TRANSCRIPTION_SYSTEM_PROMPT};
use crate::request::RequestContent;
use crate::service::{MediaPart, ServiceProxy, ServiceRequest};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

/// Audio, video and video-platform links → transcript, via the service proxy.
///
/// Raw media is sent inline (base64, mime type guessed from the name); links
/// are sent as text for models that can fetch them.
pub struct MediaTranscriber {
    proxy: Arc<ServiceProxy>,
}

impl MediaTranscriber {
    pub fn new(proxy: Arc<ServiceProxy>) -> Self {
        Self { proxy }
    }

    fn request(&self, content: &RequestContent, name: &str) -> Result<ServiceRequest, ConverterError> {
        let config = self.proxy.config();
        let (prompt, media) = match content {
            RequestContent::Binary(bytes) => {
                let mime_type = mime_guess::from_path(name)
                    .first_raw()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                debug!("Transcribing '{}' ({} bytes, {})", name, bytes.len(), mime_type);
                let media = MediaPart {
                    data: STANDARD.encode(bytes),
                    mime_type,
                };
                (transcribe_attachment(name), Some(media))
            }
            other => {
                let url = other
                    .url()
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| ConverterError::new("Video item has no link to transcribe"))?;
                (transcribe_link(url), None)
            }
        };

        Ok(ServiceRequest {
            system: TRANSCRIPTION_SYSTEM_PROMPT.to_string(),
            prompt,
            media,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Converter for MediaTranscriber {
    async fn convert(
        &self,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ConverterError> {
        let credential = ctx
            .credential
            .as_ref()
            .filter(|c| !c.is_blank())
            .ok_or_else(|| ConverterError::new("An API key is required for transcription"))?;

        let request = self.request(content, &ctx.name)?;
        let transcript = self.proxy.complete(credential, &request, &ctx.cancel).await?;
        if transcript.trim().is_empty() {
            return Err(ConverterError::new("Transcription service returned no text"));
        }

        // Tidy before adding the heading: fence stripping is anchored at the start.
        let body = format!(
            "# {}\n\n{}",
            ctx.name.trim(),
            tidy_markdown(&transcript).trim_start()
        );
        Ok(ConverterOutput::markdown(with_meta(ctx, "transcript", body)))
    }
}
