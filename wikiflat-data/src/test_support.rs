//! Fixtures shared by the data crate's tests.

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, StringArray};
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Temporary workspace with a UTF-8 root.
pub(crate) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        Self { _dir: dir, root }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(crate) fn join(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }
}

/// An entity row whose sections are JSON values.
#[derive(Debug, Clone)]
pub(crate) struct EntityFixture {
    pub(crate) id: String,
    pub(crate) labels: Value,
    pub(crate) descriptions: Value,
    pub(crate) aliases: Value,
    pub(crate) sitelinks: Value,
    pub(crate) claims: Value,
}

impl EntityFixture {
    pub(crate) fn bare(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            labels: Value::Null,
            descriptions: Value::Null,
            aliases: Value::Null,
            sitelinks: Value::Null,
            claims: Value::Null,
        }
    }

    pub(crate) fn with_labels(mut self, labels: Value) -> Self {
        self.labels = labels;
        self
    }

    pub(crate) fn with_descriptions(mut self, descriptions: Value) -> Self {
        self.descriptions = descriptions;
        self
    }

    pub(crate) fn with_aliases(mut self, aliases: Value) -> Self {
        self.aliases = aliases;
        self
    }

    pub(crate) fn with_sitelinks(mut self, sitelinks: Value) -> Self {
        self.sitelinks = sitelinks;
        self
    }

    pub(crate) fn with_claims(mut self, claims: Value) -> Self {
        self.claims = claims;
        self
    }
}

/// A url claim labelled in English and German, owned by whichever entity
/// carries it.
pub(crate) fn website_claims(url: &str) -> Value {
    json!({
        "P856": [{
            "rank": "normal",
            "mainsnak": {
                "property": "P856",
                "datatype": "url",
                "property-labels": [
                    {"key": "en", "value": "official website"},
                    {"key": "de", "value": "offizielle Website"}
                ],
                "datavalue": url
            }
        }]
    })
}

/// `count` entities `Q1..=Qcount`, each with one two-language url claim.
pub(crate) fn numbered_entities(count: usize) -> Vec<EntityFixture> {
    (1..=count)
        .map(|n| {
            EntityFixture::bare(&format!("Q{n}"))
                .with_labels(json!({"en": format!("item {n}")}))
                .with_claims(website_claims(&format!("https://example.org/{n}")))
        })
        .collect()
}

fn json_column(entities: &[EntityFixture], pick: fn(&EntityFixture) -> &Value) -> ArrayRef {
    Arc::new(StringArray::from(
        entities
            .iter()
            .map(|entity| match pick(entity) {
                Value::Null => None,
                value => Some(value.to_string()),
            })
            .collect::<Vec<_>>(),
    ))
}

/// Write `entities` as a source file whose sections are JSON text columns.
pub(crate) fn write_source(path: &Utf8Path, entities: &[EntityFixture]) {
    let ids: ArrayRef = Arc::new(StringArray::from(
        entities
            .iter()
            .map(|entity| entity.id.as_str())
            .collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_from_iter([
        ("id", ids),
        ("labels", json_column(entities, |e| &e.labels)),
        ("descriptions", json_column(entities, |e| &e.descriptions)),
        ("aliases", json_column(entities, |e| &e.aliases)),
        ("sitelinks", json_column(entities, |e| &e.sitelinks)),
        ("claims", json_column(entities, |e| &e.claims)),
    ])
    .expect("source batch");
    write_batch(path, &batch);
}

/// Write one record batch as a Parquet file.
pub(crate) fn write_batch(path: &Utf8Path, batch: &RecordBatch) {
    wikiflat_fs::ensure_parent_dir(path).expect("parent dir");
    let file = std::fs::File::create(path).expect("create parquet file");
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).expect("arrow writer");
    writer.write(batch).expect("write batch");
    writer.close().expect("close writer");
}

/// Read every batch of a Parquet file.
pub(crate) fn read_batches(path: &Utf8Path) -> Vec<RecordBatch> {
    let file = std::fs::File::open(path).expect("open parquet file");
    ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("parquet builder")
        .build()
        .expect("parquet reader")
        .map(|batch| batch.expect("record batch"))
        .collect()
}

/// Collect a UTF-8 column of every batch of a Parquet file.
pub(crate) fn read_strings(path: &Utf8Path, column: &str) -> Vec<Option<String>> {
    read_batches(path)
        .iter()
        .flat_map(|batch| {
            batch
                .column_by_name(column)
                .expect("column present")
                .as_string::<i32>()
                .iter()
                .map(|value| value.map(str::to_owned))
                .collect::<Vec<_>>()
        })
        .collect()
}
