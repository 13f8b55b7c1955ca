use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use harvest_core::error::AppError;
use harvest_core::models::{ArticleField, ExtractedArticle};
use harvest_core::traits::OutputSink;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use uuid::Uuid;

/// Directory name used for a partition whose value is null.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Writes articles as Parquet files under a dataset directory.
///
/// Every write adds a `part-<uuid>.parquet` file, so repeated writes to the
/// same location append. With partition keys the files go into Hive-style
/// `key=value/` subdirectories and the key columns are left out of the file.
#[derive(Debug, Clone, Default)]
pub struct ParquetSink;

impl ParquetSink {
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for ParquetSink {
    fn write(
        &self,
        articles: &[ExtractedArticle],
        location: &Path,
        partition_by: &[ArticleField],
    ) -> Result<(), AppError> {
        if articles.is_empty() {
            return Ok(());
        }

        let columns: Vec<ArticleField> = ArticleField::ALL
            .iter()
            .copied()
            .filter(|field| !partition_by.contains(field))
            .collect();

        for (dir, group) in partitions(articles, location, partition_by) {
            write_part(&dir, &group, &columns)?;
        }
        Ok(())
    }
}

fn partitions<'a>(
    articles: &'a [ExtractedArticle],
    location: &Path,
    partition_by: &[ArticleField],
) -> BTreeMap<PathBuf, Vec<&'a ExtractedArticle>> {
    let mut groups: BTreeMap<PathBuf, Vec<&ExtractedArticle>> = BTreeMap::new();

    for article in articles {
        let dir = partition_by.iter().fold(location.to_path_buf(), |dir, field| {
            let value = article
                .field(*field)
                .map(|v| escape_partition_value(&v))
                .unwrap_or_else(|| NULL_PARTITION.to_string());
            dir.join(format!("{field}={value}"))
        });
        groups.entry(dir).or_default().push(article);
    }
    groups
}

/// Percent-encode characters that cannot appear in a partition directory.
fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '/' | '\\' | ':' | '=' | '%' | '"' | '#' | '?' | '*' | '[' | ']' | '{' | '}' | '^'
            | '\'' => out.push_str(&format!("%{:02X}", c as u32)),
            c if c.is_control() => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn schema(columns: &[ArticleField]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|field| Field::new(field.as_str(), DataType::Utf8, field.is_nullable()))
            .collect::<Vec<_>>(),
    )
}

fn write_part(
    dir: &Path,
    articles: &[&ExtractedArticle],
    columns: &[ArticleField],
) -> Result<(), AppError> {
    fs::create_dir_all(dir)?;

    let schema = Arc::new(schema(columns));
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|field| {
            let values: StringArray = articles.iter().map(|a| a.field(*field)).collect();
            Arc::new(values) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(Arc::clone(&schema), arrays)
        .map_err(|e| AppError::OutputError(format!("Invalid article batch: {e}")))?;

    let path = dir.join(format!("part-{}.parquet", Uuid::new_v4()));
    let file = File::create(&path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let output_error = |e: parquet::errors::ParquetError| {
        AppError::OutputError(format!("Failed to write {}: {e}", path.display()))
    };
    let mut writer = ArrowWriter::try_new(file, schema, Some(props)).map_err(output_error)?;
    writer.write(&batch).map_err(output_error)?;
    writer.close().map_err(output_error)?;

    tracing::debug!(path = %path.display(), rows = articles.len(), "Wrote parquet part");
    Ok(())
}
