//! Text encoding for the `errors` and `warnings` columns.
//!
//! Entries are joined with `\n`. Inside an entry a backslash is written as
//! `\\`, a newline as `\n` and a carriage return as `\r`, so the delimiter
//! never appears unescaped. An empty message is stored as
//! [`EMPTY_MESSAGE`] so that an append always produces a non-empty list.

/// Stored in place of an empty message.
pub const EMPTY_MESSAGE: &str = "(empty message)";

const DELIMITER: char = '\n';

/// Escape a single entry.
pub fn escape_entry(text: &str) -> String {
    if text.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_entry`]. Unknown escapes are kept verbatim.
pub fn unescape_entry(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Decode a stored column into its entries.
pub fn decode_list(stored: &str) -> Vec<String> {
    if stored.is_empty() {
        return Vec::new();
    }
    stored.split(DELIMITER).map(unescape_entry).collect()
}

/// Append one entry to a stored column, returning the new column value.
pub fn append_entry(stored: &str, text: &str) -> String {
    let entry = escape_entry(text);
    if stored.is_empty() {
        entry
    } else {
        let mut out = String::with_capacity(stored.len() + entry.len() + 1);
        out.push_str(stored);
        out.push(DELIMITER);
        out.push_str(&entry);
        out
    }
}
