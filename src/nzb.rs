//! NZB document parsing
//!
//! Turns an NZB XML document into the file/article tree a job carries. The
//! parser is an explicit state machine over a quick-xml event stream; it
//! never builds a DOM. Malformed `<file>` elements (no groups, no segments)
//! are skipped with a warning instead of failing the whole parse.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::queue::{Article, FileInfo, build_file};
use crate::types::FileId;
use crate::utils::filename_from_subject;

/// Result of parsing one NZB document.
pub struct ParsedNzb {
    /// Files with their articles, in document order
    pub files: Vec<FileInfo>,
    /// `<head><meta type=..>` entries (title, password, ...)
    pub meta: BTreeMap<String, String>,
    /// Per-file problems that did not fail the parse
    pub warnings: Vec<String>,
    /// SHA-256 over the raw document
    pub content_hash: String,
    /// SHA-256 over the sorted message ids (stable across re-serialization)
    pub filtered_content_hash: String,
}

impl ParsedNzb {
    /// Σ sizes over all articles.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.total_size).sum()
    }
}

#[derive(Default)]
struct PendingFile {
    subject: String,
    groups: Vec<String>,
    segments: Vec<PendingSegment>,
}

struct PendingSegment {
    number: u32,
    bytes: u64,
    message_id: String,
}

/// Parse an NZB document.
pub fn parse_nzb(content: &[u8]) -> Result<ParsedNzb> {
    let mut reader = Reader::from_reader(content);

    let mut buf = Vec::new();
    let mut files = Vec::new();
    let mut warnings = Vec::new();
    let mut meta = BTreeMap::new();
    let mut all_message_ids: Vec<String> = Vec::new();

    let mut saw_nzb_root = false;
    let mut current_file: Option<PendingFile> = None;
    let mut in_group = false;
    let mut current_segment: Option<PendingSegment> = None;
    let mut current_meta_key: Option<String> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::InvalidNzb(format!("XML error at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"nzb" => saw_nzb_root = true,
                b"file" => {
                    let mut pending = PendingFile::default();
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"subject" {
                            pending.subject = attr
                                .unescape_value()
                                .map(|v| v.into_owned())
                                .unwrap_or_default();
                        }
                    }
                    current_file = Some(pending);
                }
                b"group" => in_group = true,
                b"segment" => {
                    let mut number = 0u32;
                    let mut bytes = 0u64;
                    for attr in e.attributes().flatten() {
                        let value = attr
                            .unescape_value()
                            .map(|v| v.into_owned())
                            .unwrap_or_default();
                        match attr.key.local_name().as_ref() {
                            b"number" => number = value.trim().parse().unwrap_or(0),
                            b"bytes" => bytes = value.trim().parse().unwrap_or(0),
                            _ => {}
                        }
                    }
                    current_segment = Some(PendingSegment {
                        number,
                        bytes,
                        message_id: String::new(),
                    });
                }
                b"meta" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"type" {
                            current_meta_key = attr
                                .unescape_value()
                                .ok()
                                .map(|v| v.into_owned().to_ascii_lowercase());
                        }
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map(|v| v.into_owned())
                    .unwrap_or_default();
                if in_group {
                    if let Some(file) = current_file.as_mut() {
                        let group = text.trim().to_string();
                        if !group.is_empty() {
                            file.groups.push(group);
                        }
                    }
                } else if let Some(segment) = current_segment.as_mut() {
                    segment.message_id.push_str(text.trim());
                } else if let Some(key) = &current_meta_key {
                    meta.insert(key.clone(), text.trim().to_string());
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"group" => in_group = false,
                b"segment" => {
                    if let (Some(file), Some(segment)) =
                        (current_file.as_mut(), current_segment.take())
                    {
                        file.segments.push(segment);
                    }
                }
                b"meta" => current_meta_key = None,
                b"file" => {
                    if let Some(pending) = current_file.take() {
                        match finish_file(pending) {
                            Ok(file) => {
                                for a in &file.articles {
                                    all_message_ids.push(a.message_id.clone());
                                }
                                files.push(file);
                            }
                            Err(warning) => warnings.push(warning),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_nzb_root {
        return Err(Error::InvalidNzb("no <nzb> root element".to_string()));
    }
    if files.is_empty() {
        return Err(Error::InvalidNzb(
            "document contains no usable <file> elements".to_string(),
        ));
    }

    let content_hash = hex_digest(content);
    all_message_ids.sort();
    let mut id_hasher = Sha256::new();
    for id in &all_message_ids {
        id_hasher.update(id.as_bytes());
        id_hasher.update(b"\n");
    }
    let filtered_content_hash = format!("{:x}", id_hasher.finalize());

    Ok(ParsedNzb {
        files,
        meta,
        warnings,
        content_hash,
        filtered_content_hash,
    })
}

fn finish_file(pending: PendingFile) -> std::result::Result<FileInfo, String> {
    if pending.groups.is_empty() {
        return Err(format!(
            "skipping file without groups: {}",
            truncate(&pending.subject)
        ));
    }
    if pending.segments.is_empty() {
        return Err(format!(
            "skipping file without segments: {}",
            truncate(&pending.subject)
        ));
    }
    let mut segments = pending.segments;
    segments.sort_by_key(|s| s.number);

    let articles: Vec<Article> = segments
        .into_iter()
        .filter(|s| !s.message_id.is_empty())
        .map(|s| {
            let id = s
                .message_id
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();
            // retry budgets are re-seeded when the queue adopts the job
            Article::new(s.number.max(1), id, s.bytes, 0, 0)
        })
        .collect();
    if articles.is_empty() {
        return Err(format!(
            "skipping file with empty message-ids: {}",
            truncate(&pending.subject)
        ));
    }

    let filename = filename_from_subject(&pending.subject);
    Ok(build_file(
        FileId::new(0),
        pending.subject,
        filename,
        pending.groups,
        articles,
    ))
}

fn truncate(s: &str) -> String {
    if s.len() > 60 {
        format!("{}…", &s[..s.char_indices().take(60).last().map(|(i, c)| i + c.len_utf8()).unwrap_or(0)])
    } else {
        s.to_string()
    }
}

fn hex_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
