use crate::converters::with_meta;
use crate::error::ConverterError;
use crate::pipeline::registry::{Converter, ConverterContext, ConverterOutput};
use crate::request::{extension, RequestContent};
use async_trait::async_trait;
use serde_json::Value;

/// JSON and JSON Lines → pretty-printed fenced block under a heading.
///
/// JSON Lines are parsed line by line and rendered as one array; a bad line
/// fails the item with its line number.
pub struct JsonConverter;

#[async_trait]
impl Converter for JsonConverter {
    async fn convert(
        &self,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ConverterError> {
        let value = match content {
            RequestContent::Structured(v) => v.clone(),
            other => {
                let text = other
                    .as_text()
                    .ok_or_else(|| ConverterError::new("JSON content is not valid UTF-8"))?;
                if extension(&ctx.name).as_deref() == Some("jsonl") {
                    parse_lines(text)?
                } else {
                    serde_json::from_str(text)
                        .map_err(|e| ConverterError::new(format!("Invalid JSON: {e}")))?
                }
            }
        };

        let pretty = serde_json::to_string_pretty(&value)
            .map_err(|e| ConverterError::new(format!("Could not render JSON: {e}")))?;
        let body = format!("# {}\n\n```json\n{}\n```\n", ctx.name.trim(), pretty);
        Ok(ConverterOutput::markdown(with_meta(ctx, "json", body)))
    }
}

fn parse_lines(text: &str) -> Result<Value, ConverterError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| ConverterError::new(format!("Invalid JSON on line {}: {e}", i + 1)))
        })
        .collect::<Result<Vec<Value>, _>>()
        .map(Value::Array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pretty_prints_objects() {
        let out = JsonConverter
            .convert(
                &RequestContent::Text(r#"{"a":1}"#.into()),
                &ConverterContext::new("data.json"),
            )
            .await
            .unwrap();
        assert_eq!(out.content, "# data.json\n\n```json\n{\n  \"a\": 1\n}\n```\n");
    }

    #[tokio::test]
    async fn json_lines_become_an_array() {
        let out = JsonConverter
            .convert(
                &RequestContent::Text("{\"a\":1}\n\n{\"a\":2}\n".into()),
                &ConverterContext::new("rows.jsonl"),
            )
            .await
            .unwrap();
        assert!(out.content.contains("\"a\": 2"));
        assert!(out.content.contains("["));
    }

    #[tokio::test]
    async fn reports_bad_line() {
        let err = JsonConverter
            .convert(
                &RequestContent::Text("{\"a\":1}\nnope\n".into()),
                &ConverterContext::new("rows.jsonl"),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("line 2"), "got: {}", err.message);
    }

    #[tokio::test]
    async fn accepts_structured_content() {
        let out = JsonConverter
            .convert(
                &RequestContent::Structured(json!({"k": "v"})),
                &ConverterContext::new("inline"),
            )
            .await
            .unwrap();
        assert!(out.content.contains("\"k\": \"v\""));
    }
}
