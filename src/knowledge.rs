//! Knowledge base source: a CSV table of question/answer pairs.
//!
//! Headers are normalized (trimmed, lowercased) and must include `question`
//! and `answer`. Any additional columns are carried through untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

pub const QUESTION_COLUMN: &str = "question";
pub const ANSWER_COLUMN: &str = "answer";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("knowledge base is missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("column {0:?} appears more than once after normalization")]
    DuplicateColumn(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the knowledge base. Identity is the row position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct KnowledgeEntry {
    fields: BTreeMap<String, String>,
}

impl TryFrom<BTreeMap<String, String>> for KnowledgeEntry {
    type Error = SchemaError;

    fn try_from(fields: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_fields(fields)
    }
}

impl From<KnowledgeEntry> for BTreeMap<String, String> {
    fn from(entry: KnowledgeEntry) -> Self {
        entry.fields
    }
}

impl KnowledgeEntry {
    /// Build an entry from raw fields. Fails if a required key is missing.
    pub fn from_fields(fields: BTreeMap<String, String>) -> Result<Self, SchemaError> {
        let missing = missing_required(fields.keys().map(String::as_str));
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns(missing));
        }
        Ok(Self { fields })
    }

    pub fn new(question: &str, answer: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(QUESTION_COLUMN.to_string(), question.to_string());
        fields.insert(ANSWER_COLUMN.to_string(), answer.to_string());
        Self { fields }
    }

    pub fn question(&self) -> &str {
        self.get(QUESTION_COLUMN).unwrap_or_default()
    }

    pub fn answer(&self) -> &str {
        self.get(ANSWER_COLUMN).unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Ordered, immutable set of knowledge entries plus the source column order.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    columns: Vec<String>,
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeBase {
    pub fn from_entries(columns: Vec<String>, entries: Vec<KnowledgeEntry>) -> Self {
        Self { columns, entries }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, KnowledgeError> {
        let file = std::fs::File::open(path)?;
        let now = Instant::now();
        let kb = Self::from_reader(file)?;

        log::debug!(
            "took {}ms to read {} knowledge base rows from {}",
            now.elapsed().as_micros() as f64 / 1000.0,
            kb.len(),
            path.display()
        );

        Ok(kb)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, KnowledgeError> {
        let mut csv_reader = csv::Reader::from_reader(reader);

        let columns = normalize_headers(csv_reader.headers()?)?;

        let mut entries = vec![];
        for record in csv_reader.records() {
            let record = record?;
            let fields = columns
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect::<BTreeMap<_, _>>();

            entries.push(KnowledgeEntry { fields });
        }

        Ok(Self::from_entries(columns, entries))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn questions(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.question().to_string())
            .collect()
    }
}

/// Lowercase and trim headers, then validate required columns.
fn normalize_headers(headers: &csv::StringRecord) -> Result<Vec<String>, SchemaError> {
    let mut columns: Vec<String> = Vec::with_capacity(headers.len());
    for header in headers.iter() {
        let column = header.trim().to_lowercase();
        if columns.contains(&column) {
            return Err(SchemaError::DuplicateColumn(column));
        }
        columns.push(column);
    }

    let missing = missing_required(columns.iter().map(String::as_str));
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing));
    }

    Ok(columns)
}

fn missing_required<'a>(columns: impl Iterator<Item = &'a str> + Clone) -> Vec<String> {
    [QUESTION_COLUMN, ANSWER_COLUMN]
        .into_iter()
        .filter(|required| !columns.clone().any(|c| c == *required))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let csv = "Question, ANSWER ,Category\nHow do I get a refund?,Contact support within 30 days.,billing\n";
        let kb = KnowledgeBase::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(kb.columns(), &["question", "answer", "category"]);
        assert_eq!(kb.len(), 1);

        let entry = &kb.entries()[0];
        assert_eq!(entry.question(), "How do I get a refund?");
        assert_eq!(entry.answer(), "Contact support within 30 days.");
        assert_eq!(entry.get("category"), Some("billing"));
    }

    #[test]
    fn test_missing_answer_column() {
        let csv = "question,notes\nWhere is my order?,n/a\n";
        let result = KnowledgeBase::from_reader(csv.as_bytes());

        match result {
            Err(KnowledgeError::Schema(SchemaError::MissingColumns(missing))) => {
                assert_eq!(missing, vec!["answer".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_normalized_column() {
        let csv = "question,Question,answer\na,b,c\n";
        let result = KnowledgeBase::from_reader(csv.as_bytes());
        assert!(matches!(
            result,
            Err(KnowledgeError::Schema(SchemaError::DuplicateColumn(_)))
        ));
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let kb = KnowledgeBase::from_reader("question,answer\n".as_bytes()).unwrap();
        assert!(kb.is_empty());
        assert!(kb.questions().is_empty());
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let csv = "question,answer\nonly one field\n";
        let result = KnowledgeBase::from_reader(csv.as_bytes());
        assert!(matches!(result, Err(KnowledgeError::Csv(_))));
    }

    #[test]
    fn test_values_are_preserved_verbatim() {
        let csv = "question,answer\n\"  padded  \",\"line one\nline two\"\n";
        let kb = KnowledgeBase::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(kb.entries()[0].question(), "  padded  ");
        assert_eq!(kb.entries()[0].answer(), "line one\nline two");
    }

    #[test]
    fn test_entry_from_fields_requires_question_and_answer() {
        let mut fields = BTreeMap::new();
        fields.insert("question".to_string(), "q".to_string());
        assert!(KnowledgeEntry::from_fields(fields.clone()).is_err());

        fields.insert("answer".to_string(), "a".to_string());
        let entry = KnowledgeEntry::from_fields(fields).unwrap();
        assert_eq!(entry.answer(), "a");
    }

    #[test]
    fn test_entry_serializes_as_flat_map() {
        let entry = KnowledgeEntry::new("q", "a");
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"answer":"a","question":"q"}"#);

        let parsed: KnowledgeEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);

        let invalid = serde_json::from_str::<KnowledgeEntry>(r#"{"question":"q"}"#);
        assert!(invalid.is_err());
    }
}
