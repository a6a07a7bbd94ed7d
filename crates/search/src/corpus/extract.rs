//! Text extraction from binary document uploads
//!
//! PDF text comes from the text-showing operators of each page's content
//! stream. DOCX text comes from the `w:t` runs of `word/document.xml`, one
//! line per paragraph.

use drugvista_common::errors::{AppError, Result};
use lopdf::content::Content;
use lopdf::{Document, Object};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

/// Kerning adjustments in a `TJ` array wider than this read as a word gap
const TJ_WORD_GAP: f32 = 200.0;

fn invalid(kind: &str, e: impl std::fmt::Display) -> AppError {
    AppError::InvalidFormat {
        message: format!("unreadable {}: {}", kind, e),
    }
}

/// Extract the text of every page of an in-memory PDF.
///
/// Pages whose content cannot be decoded are skipped. The result may be
/// empty for image-only documents.
pub fn pdf_text(bytes: &[u8]) -> Result<String> {
    let doc = Document::load_mem(bytes).map_err(|e| invalid("PDF", e))?;
    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for (page_num, page_id) in pages {
        match page_text(&doc, page_id) {
            Ok(page) => {
                text.push_str(&page);
                text.push('\n');
            }
            Err(e) => warn!(page = page_num, error = %e, "Failed to extract text from page, skipping"),
        }
    }

    Ok(clean_text(&text))
}

fn page_text(doc: &Document, page_id: lopdf::ObjectId) -> std::result::Result<String, lopdf::Error> {
    let content = Content::decode(&doc.get_page_content(page_id)?)?;
    let mut text = String::new();

    for op in &content.operations {
        match op.operator.as_str() {
            "Tj" => push_shown(&mut text, op.operands.last()),
            "'" | "\"" => {
                text.push('\n');
                push_shown(&mut text, op.operands.last());
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = op.operands.first() {
                    for part in parts {
                        match part {
                            Object::String(..) => push_shown(&mut text, Some(part)),
                            other => {
                                if other.as_float().is_ok_and(|gap| gap < -TJ_WORD_GAP) {
                                    text.push(' ');
                                }
                            }
                        }
                    }
                }
            }
            "Td" | "TD" => {
                let moves_down = op
                    .operands
                    .get(1)
                    .and_then(|ty| ty.as_float().ok())
                    .is_some_and(|ty| ty != 0.0);
                text.push(if moves_down { '\n' } else { ' ' });
            }
            "T*" | "ET" => text.push('\n'),
            _ => {}
        }
    }

    Ok(text)
}

fn push_shown(text: &mut String, operand: Option<&Object>) {
    if let Some(Object::String(bytes, _)) = operand {
        text.push_str(&decode_pdf_string(bytes));
    }
}

/// UTF-16BE when marked with a byte order mark, Latin-1 otherwise
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Collapse runs of whitespace within lines and drop blank lines
fn clean_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract paragraph text from an in-memory DOCX package
pub fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| invalid("DOCX", e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| invalid("DOCX", e))?
        .read_to_string(&mut xml)
        .map_err(|e| invalid("DOCX", e))?;

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event().map_err(|e| invalid("DOCX", e))? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => {
                text.push_str(&t.unescape().map_err(|e| invalid("DOCX", e))?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(clean_text(&text))
}
