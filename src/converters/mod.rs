//! Built-in converters.
//!
//! | Converter | Keys | Needs a credential |
//! |-----------|------|--------------------|
//! | [`TextConverter`] | `txt`, `md` | no |
//! | [`JsonConverter`] | `json`, `jsonl` | no |
//! | [`CsvConverter`] | `csv`, `tsv` | no |
//! | [`MediaTranscriber`] | `video` (+ raw audio/video fallback) | yes |
//!
//! The first three are registered by
//! [`ConverterRegistry::with_builtins`](crate::pipeline::registry::ConverterRegistry::with_builtins).
//! The transcriber needs a [`ServiceProxy`](crate::service::ServiceProxy), so
//! it is registered by the caller who owns one.
//!
//! Document, spreadsheet, markup and web converters are external: register
//! them with [`ConverterRegistry::register`](crate::pipeline::registry::ConverterRegistry::register).

mod csv;
mod json;
mod media;
mod text;

pub use csv::CsvConverter;
pub use json::JsonConverter;
pub use media::MediaTranscriber;
pub use text::TextConverter;

use crate::pipeline::registry::ConverterContext;

/// Front-matter block prepended when `includeMeta` is set.
pub(crate) fn front_matter(ctx: &ConverterContext, format: &str) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("title: \"{}\"\n", ctx.name.replace('"', "\\\"")));
    yaml.push_str(&format!("format: {format}\n"));
    yaml.push_str("---\n\n");
    yaml
}

/// Prepend front matter when requested.
pub(crate) fn with_meta(ctx: &ConverterContext, format: &str, body: String) -> String {
    if ctx.options.include_meta {
        format!("{}{}", front_matter(ctx, format), body)
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_only_when_requested() {
        let mut ctx = ConverterContext::new("Say \"hi\"");
        assert_eq!(with_meta(&ctx, "txt", "body".into()), "body");

        ctx.options.include_meta = true;
        let out = with_meta(&ctx, "txt", "body".into());
        assert!(out.starts_with("---\ntitle: \"Say \\\"hi\\\"\"\nformat: txt\n---\n\nbody"));
    }
}
