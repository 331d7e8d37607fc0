//! Reader and writer for the `---` delimited header block at the top of a
//! note file.
//!
//! The format is a flat list of `key: value` lines. It is deliberately not
//! YAML: values are never nested, lists are a single bracketed line, and a
//! malformed line is skipped instead of failing the whole file.

pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::Note;
pub use types::HeaderFields;

const MARKER: &str = "---";

pub struct HeaderCodec;

impl HeaderCodec {
    /// Split a file into its header fields and the body that follows the
    /// block. Text without a block yields empty fields and the whole input as
    /// the body. Never fails.
    pub fn decode(text: &str) -> (HeaderFields, &str) {
        match split_block(text) {
            Some((header, body)) => (parse_fields(header), body),
            None => (HeaderFields::default(), text),
        }
    }

    /// True when the text opens a header block whose closing marker has not
    /// been seen yet. Used by bounded reads to decide whether to read further.
    pub fn is_block_unterminated(text: &str) -> bool {
        opens_block(text) && split_block(text).is_none()
    }

    /// Serialize a note: `uid` first, then populated fields in a fixed order,
    /// then the body verbatim. An unloaded body is written as empty.
    ///
    /// List items are joined with `, `, so a tag containing `,` or `]` does
    /// not survive a round trip.
    pub fn encode(note: &Note) -> String {
        let mut out = String::with_capacity(128 + note.body.as_ref().map_or(0, |b| b.len()));
        out.push_str(MARKER);
        out.push('\n');
        out.push_str(&format!("uid: {}\n", note.id.hyphenated().to_string().to_uppercase()));

        if !note.tags.is_empty() {
            out.push_str(&format!("tags: [{}]\n", note.tags.join(", ")));
        }
        if !note.attachments.is_empty() {
            out.push_str(&format!("attachments: [{}]\n", note.attachments.join(", ")));
        }
        if !note.reminders.is_empty() {
            let reminders: Vec<String> = note.reminders.iter().map(format_timestamp).collect();
            out.push_str(&format!("reminders: [{}]\n", reminders.join(", ")));
        }
        if note.pinned {
            out.push_str("pinned: true\n");
        }
        if note.flags.archived {
            out.push_str("archived: true\n");
        }
        if note.flags.deleted {
            out.push_str("deleted: true\n");
        }
        if note.flags.hidden {
            out.push_str("hidden: true\n");
        }
        if let Some(color) = note.color.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!("color: {}\n", color));
        }

        out.push_str(MARKER);
        out.push('\n');
        if let Some(body) = &note.body {
            out.push_str(body);
        }
        out
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn is_marker_line(line: &str) -> bool {
    line.trim_end_matches('\r').trim_end() == MARKER
}

fn opens_block(text: &str) -> bool {
    match text.find('\n') {
        Some(end) => is_marker_line(&text[..end]),
        None => false,
    }
}

/// Returns the raw header lines and the remainder after the closing marker.
fn split_block(text: &str) -> Option<(&str, &str)> {
    let first_end = text.find('\n')?;
    if !is_marker_line(&text[..first_end]) {
        return None;
    }

    let header_start = first_end + 1;
    let mut pos = header_start;
    while pos <= text.len() {
        match text[pos..].find('\n') {
            Some(rel) => {
                let end = pos + rel;
                if is_marker_line(&text[pos..end]) {
                    return Some((&text[header_start..pos], &text[end + 1..]));
                }
                pos = end + 1;
            }
            None => {
                // Closing marker on the last line with no trailing newline.
                if is_marker_line(&text[pos..]) {
                    return Some((&text[header_start..pos], ""));
                }
                return None;
            }
        }
    }
    None
}

fn parse_fields(header: &str) -> HeaderFields {
    let mut fields = HeaderFields::default();

    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }

        match key {
            "uid" => fields.uid = non_empty(unquote(value)),
            "id" => fields.id = non_empty(unquote(value)),
            "tags" => fields.tags = dedupe(parse_list(value)),
            "attachments" => fields.attachments = parse_list(value),
            "reminders" => {
                fields.reminders = parse_list(value)
                    .iter()
                    .filter_map(|item| parse_timestamp(item))
                    .collect();
            }
            "pinned" => fields.pinned = parse_bool(value),
            "archived" => fields.archived = parse_bool(value),
            "deleted" => fields.deleted = Some(parse_bool(value)),
            "trash" => fields.trash = Some(parse_bool(value)),
            "hidden" => fields.hidden = parse_bool(value),
            "color" => fields.color = non_empty(unquote(value)),
            _ => fields.extra.push((key.to_string(), value.to_string())),
        }
    }

    fields
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(value: &str) -> bool {
    unquote(value) == "true"
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .replace(['[', ']'], "")
        .split(',')
        .map(|item| unquote(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Drops repeated items, keeping the first occurrence.
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
