//! Test helpers for building workspaces and source directories.

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, StringArray};
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

/// Scratch directory holding a source mirror and a workspace root.
#[derive(Debug)]
pub(super) struct Scratch {
    _dir: TempDir,
    base: Utf8PathBuf,
}

impl Scratch {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        Self { _dir: dir, base }
    }

    pub(super) fn root(&self) -> Utf8PathBuf {
        self.base.join("workspace")
    }

    pub(super) fn source_dir(&self) -> Utf8PathBuf {
        self.base.join("mirror")
    }

    pub(super) fn join(&self, relative: &str) -> Utf8PathBuf {
        self.base.join(relative)
    }
}

fn text_column(values: Vec<Option<String>>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

/// Write a source file of entities `Qfirst..Qfirst+count` with English labels
/// and one url claim each.
pub(super) fn write_source(path: &Utf8Path, first: usize, count: usize) {
    let numbers: Vec<usize> = (first..first + count).collect();
    let ids = numbers.iter().map(|n| Some(format!("Q{n}"))).collect();
    let labels = numbers
        .iter()
        .map(|n| Some(format!(r#"{{"en": "item {n}"}}"#)))
        .collect();
    let claims = numbers
        .iter()
        .map(|n| {
            Some(format!(
                r#"{{"P856": [{{"rank": "normal", "mainsnak": {{"property": "P856", "datatype": "url", "property-labels": [{{"key": "en", "value": "official website"}}], "datavalue": "https://example.org/{n}"}}}}]}}"#
            ))
        })
        .collect();
    let empty = || text_column(vec![None; count]);
    let batch = RecordBatch::try_from_iter([
        ("id", text_column(ids)),
        ("labels", text_column(labels)),
        ("descriptions", empty()),
        ("aliases", empty()),
        ("sitelinks", empty()),
        ("claims", text_column(claims)),
    ])
    .expect("source batch");
    wikiflat_fs::ensure_parent_dir(path).expect("parent dir");
    let file = std::fs::File::create(path).expect("create source file");
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).expect("arrow writer");
    writer.write(&batch).expect("write batch");
    writer.close().expect("close writer");
}

/// Fill `dir` with two source files of chunk zero, two entities each.
pub(super) fn write_chunk_zero(dir: &Utf8Path) {
    write_source(&dir.join("chunk_0-0.parquet"), 1, 2);
    write_source(&dir.join("chunk_0-1.parquet"), 3, 2);
}

/// Collect a UTF-8 column of a Parquet file.
pub(super) fn read_strings(path: &Utf8Path, column: &str) -> Vec<String> {
    let file = std::fs::File::open(path).expect("open parquet file");
    ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("parquet builder")
        .build()
        .expect("parquet reader")
        .flat_map(|read| {
            read.expect("record batch")
                .column_by_name(column)
                .expect("column present")
                .as_string::<i32>()
                .iter()
                .flatten()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Captured command output as text.
pub(super) fn output_text(buffer: Vec<u8>) -> String {
    String::from_utf8(buffer).expect("utf-8 output")
}
