//! Helpers for row-object (NDJSON) sources: literal escape expansion,
//! nested-record flattening and column-set derivation.

use std::borrow::Cow;
use std::collections::{HashSet, VecDeque};
use std::io::{self, BufRead, Write};

use serde_json::ser::Formatter;
use serde_json::{Map, Value};

use super::ConversionError;

pub type Record = Map<String, Value>;

/// Replace the two-character sequences `\r\n` and `\n` with real newlines.
pub fn normalize_escapes(text: &str) -> Cow<'_, str> {
    if text.contains("\\n") {
        Cow::Owned(text.replace("\\r\\n", "\n").replace("\\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Logical records of an NDJSON file.
///
/// A physical line containing literal `\n` escapes is split into several
/// records. Blank fragments are skipped. Items carry a 1-based record number.
pub struct RecordLines<R> {
    lines: io::Lines<R>,
    pending: VecDeque<String>,
    number: usize,
}

impl<R: BufRead> RecordLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            pending: VecDeque::new(),
            number: 0,
        }
    }
}

impl<R: BufRead> Iterator for RecordLines<R> {
    type Item = io::Result<(usize, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(text) = self.pending.pop_front() {
                self.number += 1;
                return Some(Ok((self.number, text)));
            }

            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.pending.extend(
                normalize_escapes(&line)
                    .split('\n')
                    .map(str::trim)
                    .filter(|fragment| !fragment.is_empty())
                    .map(str::to_string),
            );
        }
    }
}

/// Parse one logical line into a JSON object.
pub fn parse_record(number: usize, text: &str) -> Result<Record, ConversionError> {
    let value: Value = serde_json::from_str(text).map_err(|source| ConversionError::InvalidJson {
        line: number,
        source,
    })?;
    match value {
        Value::Object(record) => Ok(record),
        _ => Err(ConversionError::NotAnObject { line: number }),
    }
}

/// Flatten nested objects into dotted keys. Lists are kept as one cell
/// holding their canonical text; scalars pass through.
pub fn flatten_record(record: &Record) -> Record {
    let mut flat = Map::new();
    flatten_into(&mut flat, "", record);
    flat
}

fn flatten_into(flat: &mut Record, prefix: &str, record: &Record) {
    for (key, value) in record {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_into(flat, &path, nested),
            Value::Array(_) => {
                flat.insert(path, Value::String(list_text(value)));
            }
            scalar => {
                flat.insert(path, scalar.clone());
            }
        }
    }
}

/// Canonical text for a list value: JSON with `", "` and `": "` separators,
/// non-ASCII characters written as-is. `[1,2]` becomes `[1, 2]`.
pub fn list_text(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    // Serializing a Value into memory cannot fail
    if serde::Serialize::serialize(value, &mut serializer).is_err() {
        return value.to_string();
    }
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Text written into a CSV cell for a flattened value. Null is empty.
pub fn cell_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Number(n) => Cow::Owned(n.to_string()),
        nested => Cow::Owned(list_text(nested)),
    }
}

/// Union of flattened keys in first-seen order.
#[derive(Debug, Default)]
pub struct ColumnSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl ColumnSet {
    pub fn observe(&mut self, flat: &Record) {
        for key in flat.keys() {
            if !self.seen.contains(key) {
                self.seen.insert(key.clone());
                self.order.push(key.clone());
            }
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_escaped_newlines_split_records() {
        let input = "{\"a\": 1}\\n{\"a\": 2}\\r\\n  \n\n{\"a\": 3}\n";
        let lines: Vec<(usize, String)> = RecordLines::new(input.as_bytes())
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                (1, "{\"a\": 1}".to_string()),
                (2, "{\"a\": 2}".to_string()),
                (3, "{\"a\": 3}".to_string()),
            ]
        );
    }

    #[test]
    fn test_flatten_nested_and_lists() {
        let flat = flatten_record(&record(json!({
            "meta": {"id": 1, "tags": {"primary": "x"}},
            "values": [1, 2],
            "pairs": [{"k": "é"}],
            "status": "ok"
        })));
        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["meta.id", "meta.tags.primary", "values", "pairs", "status"]);
        assert_eq!(flat["values"], json!("[1, 2]"));
        assert_eq!(flat["pairs"], json!("[{\"k\": \"é\"}]"));
    }

    #[test]
    fn test_column_union_keeps_first_seen_order() {
        let mut columns = ColumnSet::default();
        columns.observe(&flatten_record(&record(
            json!({"meta": {"id": 1}, "values": [1, 2], "status": "ok"}),
        )));
        columns.observe(&flatten_record(&record(
            json!({"meta": {"id": 2}, "status": "pending", "extra": true}),
        )));
        assert_eq!(columns.columns(), ["meta.id", "values", "status", "extra"]);
    }

    #[test]
    fn test_parse_record_errors() {
        assert!(matches!(
            parse_record(3, "{not json"),
            Err(ConversionError::InvalidJson { line: 3, .. })
        ));
        assert!(matches!(
            parse_record(1, "[1, 2]"),
            Err(ConversionError::NotAnObject { line: 1 })
        ));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&json!(2.5)), "2.5");
        assert_eq!(cell_text(&json!("x")), "x");
    }
}
