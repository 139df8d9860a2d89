use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{
    CsvWriter, DataFrame, DataType, IntoSeries, JsonFormat, JsonWriter, SerWriter, StringChunked,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EtlError, Result};

/// Folder value used for rows whose partition column is null.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

const PART_FILE_STEM: &str = "part-00000";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Parquet,
    Csv,
    Json,
}

impl StorageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Parquet => "parquet",
            StorageFormat::Csv => "csv",
            StorageFormat::Json => "json",
        }
    }
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for StorageFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parquet" => Ok(StorageFormat::Parquet),
            "csv" => Ok(StorageFormat::Csv),
            "json" | "ndjson" => Ok(StorageFormat::Json),
            other => Err(EtlError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Outcome of a single table write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub table: String,
    pub destination: PathBuf,
    pub format: StorageFormat,
    pub partition: Option<String>,
    pub rows: usize,
    /// Number of partition folders written; zero for unpartitioned writes.
    pub partitions: usize,
}

/// Writes dataframes to `{path_to_save}/{table_name}`, replacing whatever was there.
#[derive(Debug, Clone)]
pub struct TableWriter {
    path_to_save: PathBuf,
    table_name: String,
}

impl TableWriter {
    pub fn new(path_to_save: impl Into<PathBuf>, table_name: impl Into<String>) -> Self {
        Self {
            path_to_save: path_to_save.into(),
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn destination(&self) -> PathBuf {
        self.path_to_save.join(&self.table_name)
    }

    /// Writes `df` in `format`, one hive-style folder per value of `partition` when given.
    pub fn create_table(
        &self,
        df: &DataFrame,
        format: StorageFormat,
        partition: Option<&str>,
    ) -> Result<WriteReport> {
        let destination = self.destination();

        if let Some(column) = partition {
            if df.get_column_index(column).is_none() {
                return Err(EtlError::MissingColumn {
                    table: self.table_name.clone(),
                    column: column.to_string(),
                });
            }
            if df.width() == 1 {
                return Err(EtlError::Config(format!(
                    "cannot partition table '{}' by '{column}': it is the only column",
                    self.table_name
                )));
            }
        }

        clear_destination(&destination)?;
        fs::create_dir_all(&destination)?;

        let partitions = match partition {
            Some(column) => write_partitioned(df, &destination, column, format)?,
            None => {
                let mut frame = df.clone();
                write_file(&mut frame, &part_path(&destination, format), format)?;
                0
            }
        };

        match partition {
            Some(column) => info!(
                table = %self.table_name,
                partition = column,
                partitions,
                destination = %destination.display(),
                "table saved"
            ),
            None => info!(
                table = %self.table_name,
                destination = %destination.display(),
                "table saved"
            ),
        }

        Ok(WriteReport {
            table: self.table_name.clone(),
            destination,
            format,
            partition: partition.map(str::to_string),
            rows: df.height(),
            partitions,
        })
    }
}

impl fmt::Display for TableWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Path to save: {}\nTable name: {}",
            self.path_to_save.display(),
            self.table_name
        )
    }
}

fn clear_destination(destination: &Path) -> Result<()> {
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(destination)?,
        Ok(_) => fs::remove_file(destination)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn write_partitioned(
    df: &DataFrame,
    destination: &Path,
    column: &str,
    format: StorageFormat,
) -> Result<usize> {
    let df = with_empty_strings_as_null(df, column)?;
    let parts = df.partition_by_stable([column], true)?;
    let count = parts.len();

    for part in parts {
        let folder = format!(
            "{}={}",
            escape_path_name(column),
            partition_folder_value(&part, column)?
        );
        let dir = destination.join(folder);
        fs::create_dir_all(&dir)?;

        let mut body = part.drop(column)?;
        write_file(&mut body, &part_path(&dir, format), format)?;
    }

    Ok(count)
}

/// Empty strings share the null partition folder, so they are folded into nulls first.
fn with_empty_strings_as_null(df: &DataFrame, column: &str) -> Result<DataFrame> {
    let values = df.column(column)?;
    if values.dtype() != &DataType::String {
        return Ok(df.clone());
    }

    let normalized: StringChunked = values
        .str()?
        .into_iter()
        .map(|value| value.filter(|v| !v.is_empty()))
        .collect();
    let mut df = df.clone();
    df.with_column(normalized.with_name(column.into()).into_series())?;
    Ok(df)
}

fn partition_folder_value(part: &DataFrame, column: &str) -> Result<String> {
    let values = part.column(column)?.cast(&DataType::String)?;
    let value = values
        .str()?
        .get(0)
        .map(escape_path_name)
        .unwrap_or_else(|| NULL_PARTITION.to_string());
    Ok(value)
}

fn part_path(dir: &Path, format: StorageFormat) -> PathBuf {
    dir.join(format!("{PART_FILE_STEM}.{}", format.extension()))
}

fn write_file(df: &mut DataFrame, path: &Path, format: StorageFormat) -> Result<()> {
    let file = File::create(path)?;
    match format {
        StorageFormat::Parquet => {
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Zstd(None))
                .with_statistics(StatisticsOptions::default())
                .finish(df)?;
        }
        StorageFormat::Csv => {
            CsvWriter::new(file).include_header(true).finish(df)?;
        }
        StorageFormat::Json => {
            JsonWriter::new(file)
                .with_json_format(JsonFormat::JsonLines)
                .finish(df)?;
        }
    }
    Ok(())
}

/// Percent-escapes characters that are unsafe inside a `column=value` folder name.
pub fn escape_path_name(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        let needs_escape = matches!(
            ch,
            '\u{01}'..='\u{1F}'
                | '"'
                | '#'
                | '%'
                | '\''
                | '*'
                | '/'
                | ':'
                | '='
                | '?'
                | '\\'
                | '\u{7F}'
                | '{'
                | '['
                | ']'
                | '^'
        );
        if needs_escape {
            escaped.push_str(&format!("%{:02X}", ch as u32));
        } else {
            escaped.push(ch);
        }
    }
    escaped
}
