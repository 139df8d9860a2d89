use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use polars::io::HiveOptions;
use polars::prelude::{DataFrame, LazyFrame, ScanArgsParquet};
use serde::Serialize;

use crate::error::{EtlError, Result};
use crate::writer::TableWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Bronze, Layer::Silver, Layer::Gold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold => "gold",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EtlError::Config(format!("unknown layer '{s}'")))
    }
}

/// Directory layout of the lake: `{base}/{layer}/{table}`.
#[derive(Debug, Clone)]
pub struct LakeLayout {
    base: PathBuf,
}

impl LakeLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn layer_path(&self, layer: Layer) -> PathBuf {
        self.base.join(layer.as_str())
    }

    pub fn table_path(&self, layer: Layer, table: &str) -> PathBuf {
        self.layer_path(layer).join(table)
    }

    pub fn writer(&self, layer: Layer, table: &str) -> TableWriter {
        TableWriter::new(self.layer_path(layer), table)
    }
}

/// Reads every parquet part under `dir` back into one frame.
///
/// Hive partition folders (`column=value`) become columns appended after the
/// file columns; their dtypes are inferred from the folder values, so ISO
/// dates come back as `Date`.
pub fn read_table(dir: &Path) -> Result<DataFrame> {
    if !dir.is_dir() {
        return Err(EtlError::TableNotFound {
            table: dir.display().to_string(),
        });
    }
    // A partitioned write of an empty frame leaves no part files.
    if fs::read_dir(dir)?.next().is_none() {
        return Ok(DataFrame::empty());
    }

    let args = ScanArgsParquet {
        hive_options: HiveOptions {
            enabled: Some(true),
            try_parse_dates: true,
            ..HiveOptions::default()
        },
        ..ScanArgsParquet::default()
    };
    let df = LazyFrame::scan_parquet(dir, args)?.collect()?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ColumnValues;
    use crate::writer::StorageFormat;
    use chrono::NaiveDate;
    use polars::df;
    use polars::prelude::{DataType, IntoLazy, NamedFrom, Series};

    #[test]
    fn layers_parse_and_render() {
        assert_eq!("GOLD".parse::<Layer>().unwrap(), Layer::Gold);
        assert!("platinum".parse::<Layer>().is_err());
        let layout = LakeLayout::new("/lake");
        assert_eq!(
            layout.table_path(Layer::Silver, "moradores"),
            PathBuf::from("/lake/silver/moradores")
        );
    }

    #[test]
    fn date_partitions_read_back_as_dates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registered = ColumnValues::Date(vec![
            NaiveDate::from_ymd_opt(2023, 5, 1),
            NaiveDate::from_ymd_opt(2023, 5, 1),
            NaiveDate::from_ymd_opt(2024, 2, 20),
        ])
        .into_column("data_registro")?;
        let moradores = DataFrame::new(vec![
            Series::new("morador_id".into(), [1i32, 2, 3]).into(),
            registered,
        ])?;

        let layout = LakeLayout::new(dir.path());
        let report = layout
            .writer(Layer::Silver, "moradores")
            .create_table(&moradores, StorageFormat::Parquet, Some("data_registro"))?;
        let read = read_table(&report.destination)?;

        assert_eq!(read.height(), 3);
        assert_eq!(
            read.column("data_registro")?.dtype(),
            moradores.column("data_registro")?.dtype()
        );
        assert_eq!(read.column("data_registro")?.dtype(), &DataType::Date);
        Ok(())
    }

    #[test]
    fn escaped_partition_values_are_decoded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let imoveis = df!(
            "imovel_id" => [1i32, 2, 3],
            "tipo" => [Some("casa/sobrado"), Some("loja=100%"), None],
        )?;

        let report = TableWriter::new(dir.path(), "imoveis").create_table(
            &imoveis,
            StorageFormat::Parquet,
            Some("tipo"),
        )?;
        let read = read_table(&report.destination)?
            .lazy()
            .sort(["imovel_id"], Default::default())
            .collect()?;

        let kinds: Vec<Option<&str>> = read.column("tipo")?.str()?.into_iter().collect();
        assert_eq!(kinds, vec![Some("casa/sobrado"), Some("loja=100%"), None]);
        Ok(())
    }

    #[test]
    fn empty_partitioned_table_reads_as_empty_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let empty = df!(
            "imovel_id" => Vec::<i32>::new(),
            "tipo" => Vec::<&str>::new(),
        )?;

        let report = TableWriter::new(dir.path(), "imoveis").create_table(
            &empty,
            StorageFormat::Parquet,
            Some("tipo"),
        )?;
        assert_eq!(read_table(&report.destination)?.height(), 0);
        Ok(())
    }

    #[test]
    fn missing_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_table(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, EtlError::TableNotFound { .. }));
    }
}
