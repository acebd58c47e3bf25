use crate::converters::with_meta;
use crate::error::ConverterError;
use crate::pipeline::registry::{Converter, ConverterContext, ConverterOutput};
use crate::request::{extension, RequestContent};
use async_trait::async_trait;

/// CSV / TSV → one GFM table.
///
/// The first record is the header. Quoted fields may contain the delimiter,
/// doubled quotes and line breaks; short rows are padded so every row has
/// the header's width.
pub struct CsvConverter;

#[async_trait]
impl Converter for CsvConverter {
    async fn convert(
        &self,
        content: &RequestContent,
        ctx: &ConverterContext,
    ) -> Result<ConverterOutput, ConverterError> {
        let text = content
            .as_text()
            .ok_or_else(|| ConverterError::new("CSV content is not valid UTF-8"))?;
        let delimiter = match extension(&ctx.name).as_deref() {
            Some("tsv") => '\t',
            _ => ',',
        };

        let records = parse_records(text.trim_start_matches('\u{FEFF}'), delimiter)?;
        let Some((header, rows)) = records.split_first() else {
            return Err(ConverterError::new("CSV file is empty"));
        };

        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        let mut body = format!("# {}\n\n", ctx.name.trim());
        body.push_str(&table_row(header, width));
        body.push('|');
        body.push_str(&" --- |".repeat(width));
        body.push('\n');
        for row in rows {
            body.push_str(&table_row(row, width));
        }
        Ok(ConverterOutput::markdown(with_meta(ctx, "csv", body)))
    }
}

fn table_row(cells: &[String], width: usize) -> String {
    let mut line = String::from("|");
    for i in 0..width {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        line.push(' ');
        line.push_str(&escape_cell(cell));
        line.push_str(" |");
    }
    line.push('\n');
    line
}

fn escape_cell(cell: &str) -> String {
    cell.trim()
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

/// Split `text` into records, honouring quotes. Blank lines are skipped.
fn parse_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, ConverterError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                }
                record.clear();
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ConverterError::new("CSV has an unterminated quoted field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}
