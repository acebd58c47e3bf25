use crate::converters::with_meta;
use crate::error::ConverterError;
use crate::pipeline::postprocess::tidy_markdown;
use crate::pipeline::registry::{Converter, ConverterContext, ConverterOutput};
use crate::request::{extension, RequestContent};
use async_trait::async_trait;

/// Plain text and Markdown pass through, tidied.
///
/// Plain text gets the item name as a level-one heading so every archived
/// file opens with a title; Markdown is kept as written.
pub struct TextConverter;

#[async_trait]
impl Converter for TextConverter {
    async fn convert(
        &self,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ConverterError> {
        let text = content
            .as_text()
            .ok_or_else(|| ConverterError::new("Text content is not valid UTF-8"))?;

        let is_markdown = matches!(extension(&ctx.name).as_deref(), Some("md" | "markdown"));
        let body = if is_markdown || text.trim_start().starts_with('#') {
            tidy_markdown(text)
        } else {
            tidy_markdown(&format!("# {}\n\n{}", title(&ctx.name), text))
        };
        let format = if is_markdown { "md" } else { "txt" };
        Ok(ConverterOutput::markdown(with_meta(ctx, format, body)))
    }
}

fn title(name: &str) -> &str {
    let name = name.trim();
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|s| !s.is_empty())
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_gets_a_heading() {
        let out = TextConverter
            .convert(
                &RequestContent::Text("hello\r\nworld".into()),
                &ConverterContext::new("notes.txt"),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "# notes\n\nhello\nworld\n");
        assert!(out.images.is_empty());
    }

    #[tokio::test]
    async fn markdown_is_kept() {
        let out = TextConverter
            .convert(
                &RequestContent::Binary(b"## Already\n\ntext".to_vec()),
                &ConverterContext::new("readme.md"),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "## Already\n\ntext\n");
    }

    #[tokio::test]
    async fn non_utf8_is_an_error() {
        let err = TextConverter
            .convert(&RequestContent::Binary(vec![0xff, 0xfe]), &ConverterContext::new("x.txt"))
            .await
            .unwrap_err();
        assert!(err.message.contains("UTF-8"));
    }
}
