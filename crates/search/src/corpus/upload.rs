//! Splitting uploaded files into corpus records
//!
//! Text, PDF and DOCX files become one record. CSV files become one record
//! per row and JSON files one record per array element (or a single record
//! for an object). Record ids are derived from the content so re-uploading
//! the same file is detected as a duplicate.

use super::extract;
use super::SourceDocument;
use drugvista_common::errors::{AppError, Result};
use drugvista_common::models::DocumentCategory;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Records shorter than this (after trimming) are not indexed
pub const MIN_RECORD_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Text,
    Csv,
    Json,
    Pdf,
    Docx,
}

impl UploadFormat {
    /// Detect the format from a file name's extension
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "txt" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            other => Err(AppError::Validation {
                message: format!(
                    "unsupported file type '.{}' (allowed: .txt, .csv, .json, .pdf, .docx)",
                    other
                ),
                field: Some("filename".to_string()),
            }),
        }
    }

    /// Whether uploads of this format must arrive base64-encoded
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Pdf | Self::Docx)
    }
}

fn record_id(label: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("upload-{}", &digest[..16])
}

fn record(label: String, text: String, category: DocumentCategory) -> SourceDocument {
    SourceDocument {
        id: record_id(&label, &text),
        text,
        source_label: label,
        category,
    }
}

/// A single free-text record
pub fn text_record(title: &str, content: &str, category: DocumentCategory) -> Result<SourceDocument> {
    if content.trim().chars().count() < MIN_RECORD_CHARS {
        return Err(AppError::Validation {
            message: format!("content too short (min {} characters)", MIN_RECORD_CHARS),
            field: Some("content".to_string()),
        });
    }
    Ok(record(title.to_string(), content.to_string(), category))
}

/// Split an uploaded file into records.
///
/// Fails with `InvalidFormat` if the bytes cannot be read as the format the
/// extension names, and with `Validation` if nothing indexable remains.
pub fn records_from_upload(
    filename: &str,
    body: &[u8],
    category: DocumentCategory,
) -> Result<Vec<SourceDocument>> {
    let format = UploadFormat::from_filename(filename)?;
    let text: Cow<'_, str> = match format {
        UploadFormat::Pdf => extract::pdf_text(body)?.into(),
        UploadFormat::Docx => extract::docx_text(body)?.into(),
        UploadFormat::Text | UploadFormat::Csv | UploadFormat::Json => std::str::from_utf8(body)
            .map_err(|e| AppError::InvalidFormat {
                message: format!("file is not valid UTF-8: {}", e),
            })?
            .into(),
    };

    if !long_enough(&text) {
        return Err(AppError::Validation {
            message: "file content too short".to_string(),
            field: Some("file".to_string()),
        });
    }

    let records = match format {
        UploadFormat::Text | UploadFormat::Pdf | UploadFormat::Docx => {
            vec![record(filename.to_string(), text.into_owned(), category)]
        }
        UploadFormat::Csv => csv_records(filename, &text, category),
        UploadFormat::Json => json_records(filename, &text, category)?,
    };

    if records.is_empty() {
        return Err(AppError::Validation {
            message: "no valid content found in file".to_string(),
            field: Some("file".to_string()),
        });
    }
    Ok(records)
}

fn long_enough(text: &str) -> bool {
    text.trim().chars().count() >= MIN_RECORD_CHARS
}

/// Header cell for column `i`, or `column_<n>` past the end of the header
fn column_name(header: &[String], i: usize) -> Cow<'_, str> {
    match header.get(i).filter(|name| !name.is_empty()) {
        Some(name) => Cow::Borrowed(name.as_str()),
        None => Cow::Owned(format!("column_{}", i + 1)),
    }
}

fn csv_records(filename: &str, body: &str, category: DocumentCategory) -> Vec<SourceDocument> {
    let mut rows = parse_csv(body).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };

    rows.enumerate()
        .filter_map(|(i, row)| {
            let text = row
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_empty())
                .map(|(col, value)| format!("{}: {}", column_name(&header, col), value))
                .collect::<Vec<_>>()
                .join("\n");
            long_enough(&text).then(|| record(format!("{}_row_{}", filename, i + 1), text, category))
        })
        .collect()
}

fn json_records(filename: &str, body: &str, category: DocumentCategory) -> Result<Vec<SourceDocument>> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| AppError::InvalidFormat {
        message: format!("invalid JSON: {}", e),
    })?;

    Ok(match value {
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let text = json_text(item);
                long_enough(&text).then(|| record(format!("{}_item_{}", filename, i + 1), text, category))
            })
            .collect(),
        other => {
            let text = json_text(&other);
            if long_enough(&text) {
                vec![record(filename.to_string(), text, category)]
            } else {
                Vec::new()
            }
        }
    })
}

/// `key: value` lines for objects, plain rendering otherwise
fn json_text(value: &serde_json::Value) -> String {
    fn scalar(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, scalar(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => scalar(other),
    }
}

/// One CSV cell being read
#[derive(Default)]
struct Field {
    text: String,
    quoted: bool,
}

impl Field {
    /// Unquoted cells are trimmed; quoted cells keep their whitespace
    fn finish(&mut self) -> String {
        let field = std::mem::take(self);
        if field.quoted {
            field.text
        } else {
            field.text.trim().to_string()
        }
    }
}

/// Keep a row unless every cell is empty
fn end_row(row: &mut Vec<String>, rows: &mut Vec<Vec<String>>) {
    if row.iter().any(|f| !f.is_empty()) {
        rows.push(std::mem::take(row));
    } else {
        row.clear();
    }
}

/// Minimal RFC 4180 reader: quoted fields, doubled quotes, CRLF or LF rows
fn parse_csv(body: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = Field::default();
    let mut in_quotes = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.text.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.text.push(c),
            }
            continue;
        }

        match c {
            // An opening quote discards the padding before it
            '"' if !field.quoted && field.text.trim().is_empty() => {
                field.text.clear();
                field.quoted = true;
                in_quotes = true;
            }
            ',' => row.push(field.finish()),
            '\r' => {}
            '\n' => {
                row.push(field.finish());
                end_row(&mut row, &mut rows);
            }
            // Padding after a closing quote
            c if field.quoted && c.is_whitespace() => {}
            _ => field.text.push(c),
        }
    }

    if !field.text.is_empty() || field.quoted || !row.is_empty() {
        row.push(field.finish());
        end_row(&mut row, &mut rows);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::extract::fixtures::{docx_with_paragraphs, pdf_with_lines};

    #[test]
    fn test_format_detection() {
        assert_eq!(UploadFormat::from_filename("notes.TXT").unwrap(), UploadFormat::Text);
        assert_eq!(UploadFormat::from_filename("rows.csv").unwrap(), UploadFormat::Csv);
        assert_eq!(UploadFormat::from_filename("scan.PDF").unwrap(), UploadFormat::Pdf);
        assert_eq!(UploadFormat::from_filename("memo.docx").unwrap(), UploadFormat::Docx);
        assert!(UploadFormat::from_filename("setup.exe").is_err());
        assert!(UploadFormat::from_filename("noext").is_err());
    }

    #[test]
    fn test_csv_rows_become_records() {
        let body = "patient,drug,outcome\n\
                    P-001,\"Metformin, 500mg\",improved glucose control\n\
                    ,,\n\
                    P-002,Placebo,\"no \"\"significant\"\" change\"\n";
        let records = records_from_upload("cohort.csv", body.as_bytes(), DocumentCategory::PatientData).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_label, "cohort.csv_row_1");
        assert_eq!(
            records[0].text,
            "patient: P-001\ndrug: Metformin, 500mg\noutcome: improved glucose control"
        );
        assert!(records[1].text.contains("no \"significant\" change"));
        assert_eq!(records[1].category, DocumentCategory::PatientData);
    }

    #[test]
    fn test_json_array_and_object() {
        let array = r#"[{"drug": "Imatinib", "target": "BCR-ABL"}, "x", "a plain string record"]"#;
        let records = records_from_upload("batch.json", array.as_bytes(), DocumentCategory::Paper).unwrap();
        let labels: Vec<_> = records.iter().map(|r| r.source_label.as_str()).collect();
        assert_eq!(labels, vec!["batch.json_item_1", "batch.json_item_3"]);
        assert_eq!(records[0].text, "drug: Imatinib\ntarget: BCR-ABL");

        let object = r#"{"title": "Phase II", "enrolled": 120}"#;
        let records = records_from_upload("one.json", object.as_bytes(), DocumentCategory::ClinicalTrial).unwrap();
        assert_eq!(records.len(), 1);
        // serde_json maps iterate in key order
        assert_eq!(records[0].text, "enrolled: 120\ntitle: Phase II");
    }

    #[test]
    fn test_invalid_json_and_short_content() {
        assert!(matches!(
            records_from_upload("bad.json", b"{not json at all", DocumentCategory::Other),
            Err(AppError::InvalidFormat { .. })
        ));
        assert!(matches!(
            records_from_upload("tiny.txt", b"hi", DocumentCategory::Other),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn test_csv_quoted_whitespace_is_kept() {
        let body = "code, note \n\
                    \"  A-01  \" , plain value   \n";
        let rows = parse_csv(body);
        assert_eq!(rows, vec![vec!["code", "note"], vec!["  A-01  ", "plain value"]]);
    }

    #[test]
    fn test_csv_extra_cells_are_kept() {
        let body = "drug,dose\n\
                    Warfarin,5mg,monitor INR weekly\n";
        let records = records_from_upload("extra.csv", body.as_bytes(), DocumentCategory::ClinicalTrial).unwrap();
        assert_eq!(records[0].text, "drug: Warfarin\ndose: 5mg\ncolumn_3: monitor INR weekly");
    }

    #[test]
    fn test_pdf_upload_is_one_record() {
        let bytes = pdf_with_lines(&["Imatinib inhibits the BCR-ABL kinase."]);
        let records = records_from_upload("imatinib.pdf", &bytes, DocumentCategory::Paper).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Imatinib inhibits the BCR-ABL kinase.");
        assert_eq!(records[0].source_label, "imatinib.pdf");
    }

    #[test]
    fn test_docx_upload_is_one_record() {
        let bytes = docx_with_paragraphs(&["Trial summary", "Primary endpoint met."]);
        let records = records_from_upload("summary.docx", &bytes, DocumentCategory::ClinicalTrial).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Trial summary\nPrimary endpoint met.");
    }

    #[test]
    fn test_non_utf8_text_is_invalid_format() {
        let body = [0xff, 0xfe, b'n', b'o', b't', b' ', b'u', b't', b'f', b'8', b'!'];
        assert!(matches!(
            records_from_upload("notes.txt", &body, DocumentCategory::Other),
            Err(AppError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_ids_are_content_derived() {
        let a = text_record("note", "Patient tolerated the dose well", DocumentCategory::PatientData).unwrap();
        let b = text_record("note", "Patient tolerated the dose well", DocumentCategory::PatientData).unwrap();
        let c = text_record("note", "Patient reported mild nausea", DocumentCategory::PatientData).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id.starts_with("upload-"));
    }
}
