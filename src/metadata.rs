//! Metadata records produced by the extraction engine.
//!
//! An [`ExtractionResult`] is an ordered list of flat metadata records, one
//! per logical unit of the document. The first record always describes the
//! document itself; any embedded sub-parts follow in discovery order.

use serde::{Deserialize, Serialize};

/// Reserved key carrying the textual description of a parse failure.
///
/// An application-level failure inside the extraction engine is reported as
/// data on the first record of the result, never as an error across the
/// worker boundary.
pub const PARSE_ERROR_KEY: &str = "X-Parse-Error";

/// Well-known key for the document's file name.
pub const RESOURCE_NAME_KEY: &str = "resourceName";

/// Well-known key for the document's byte length.
pub const CONTENT_LENGTH_KEY: &str = "Content-Length";

/// One flat metadata record: insertion-ordered keys, each with one or many
/// string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    entries: Vec<(String, Vec<String>)>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values for `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => {
                values.clear();
                values.push(value);
            }
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Append a value for `key`, keeping existing values.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// All values for `key`.
    pub fn values(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Embedded parse error description, if one was attached.
    pub fn error(&self) -> Option<&str> {
        self.get(PARSE_ERROR_KEY)
    }

    pub fn set_error(&mut self, description: impl Into<String>) {
        self.set(PARSE_ERROR_KEY, description);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Ordered sequence of metadata records for one parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult {
    records: Vec<MetadataRecord>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MetadataRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    pub fn first(&self) -> Option<&MetadataRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Attach a parse error description to the first record, synthesizing an
    /// empty record if the result has none. Used by the worker when the
    /// engine fails mid-parse and only a partial (or no) result exists.
    pub fn attach_error(&mut self, description: impl Into<String>) {
        if self.records.is_empty() {
            self.records.push(MetadataRecord::new());
        }
        self.records[0].set_error(description);
    }
}

impl From<Vec<MetadataRecord>> for ExtractionResult {
    fn from(records: Vec<MetadataRecord>) -> Self {
        Self { records }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_add_appends() {
        let mut record = MetadataRecord::new();
        record.set("Author", "alice");
        record.add("Author", "bob");
        assert_eq!(record.values("Author"), ["alice", "bob"]);

        record.set("Author", "carol");
        assert_eq!(record.values("Author"), ["carol"]);
        assert_eq!(record.get("Author"), Some("carol"));
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let mut record = MetadataRecord::new();
        record.set("z", "1");
        record.set("a", "2");
        record.set("m", "3");
        let keys: Vec<_> = record.keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn attach_error_synthesizes_first_record() {
        let mut result = ExtractionResult::new();
        assert!(result.is_empty());

        result.attach_error("engine exploded");
        assert_eq!(result.len(), 1);
        assert_eq!(result.first().and_then(|r| r.error()), Some("engine exploded"));
    }

    #[test]
    fn attach_error_targets_existing_first_record() {
        let mut first = MetadataRecord::new();
        first.set(RESOURCE_NAME_KEY, "report.pdf");
        let mut second = MetadataRecord::new();
        second.set(RESOURCE_NAME_KEY, "embedded.png");

        let mut result = ExtractionResult::from(vec![first, second]);
        result.attach_error("truncated stream");

        assert_eq!(result.len(), 2);
        assert_eq!(result.records()[0].error(), Some("truncated stream"));
        assert_eq!(result.records()[0].get(RESOURCE_NAME_KEY), Some("report.pdf"));
        assert!(result.records()[1].error().is_none());
    }

    #[test]
    fn serde_roundtrips_ordered_records() {
        let mut record = MetadataRecord::new();
        record.set(RESOURCE_NAME_KEY, "doc.txt");
        record.add("Keyword", "one");
        record.add("Keyword", "two");
        let mut result = ExtractionResult::new();
        result.push(record);

        let json = serde_json::to_string(&result).unwrap();
        let parsed: ExtractionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
        assert_eq!(parsed.records()[0].values("Keyword"), ["one", "two"]);
    }
}
