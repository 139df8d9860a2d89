use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::*;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::{EtlError, Result};
use crate::session::Session;

const DEFAULT_SCHEMA: &str = "public";

/// How a source column is fetched and which polars dtype it becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int32,
    Int64,
    Float32,
    Float64,
    Boolean,
    Text,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnKind {
    /// Maps a Postgres `udt_name` to a column kind. Unknown types are read as text.
    pub fn from_udt_name(udt_name: &str) -> Self {
        match udt_name {
            "int2" | "int4" => ColumnKind::Int32,
            "int8" => ColumnKind::Int64,
            "float4" => ColumnKind::Float32,
            "float8" | "numeric" => ColumnKind::Float64,
            "bool" => ColumnKind::Boolean,
            "date" => ColumnKind::Date,
            "timestamp" => ColumnKind::Timestamp,
            "timestamptz" => ColumnKind::TimestampTz,
            _ => ColumnKind::Text,
        }
    }

    /// SQL cast applied in the projection so the driver hands back a decodable type.
    fn cast_for(udt_name: &str) -> Option<&'static str> {
        match udt_name {
            "int2" => Some("int4"),
            "numeric" => Some("float8"),
            "int4" | "int8" | "float4" | "float8" | "bool" | "date" | "timestamp"
            | "timestamptz" | "text" | "varchar" | "bpchar" | "name" => None,
            _ => Some("text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    pub udt_name: String,
}

impl SourceColumn {
    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_udt_name(&self.udt_name)
    }

    fn select_expr(&self) -> String {
        let ident = quote_ident(&self.name);
        match ColumnKind::cast_for(&self.udt_name) {
            Some(cast) => format!("{ident}::{cast} AS {ident}"),
            None => ident,
        }
    }
}

/// Reads `table` in full from the database described by `credentials`.
///
/// `table` may be schema-qualified; unqualified names resolve to `public`.
pub async fn read_table(
    session: &Session,
    credentials: &Credentials,
    table: &str,
) -> Result<DataFrame> {
    let pool = session.pool(credentials).await?;
    let (schema, name) = split_table_name(table);

    let columns: Vec<SourceColumn> = sqlx::query_as::<_, (String, String)>(
        r#"
            SELECT column_name::text, udt_name::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#,
    )
    .bind(schema)
    .bind(name)
    .fetch_all(&pool)
    .await?
    .into_iter()
    .map(|(name, udt_name)| SourceColumn { name, udt_name })
    .collect();

    if columns.is_empty() {
        return Err(EtlError::TableNotFound {
            table: table.to_string(),
        });
    }

    let sql = select_statement(schema, name, &columns);
    debug!(table, %sql, "reading table");

    let rows = sqlx::query(&sql).fetch_all(&pool).await?;
    let df = rows_to_frame(&columns, &rows)?;

    info!(table, rows = df.height(), columns = df.width(), "table read");
    Ok(df)
}

pub fn split_table_name(table: &str) -> (&str, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (schema, name),
        None => (DEFAULT_SCHEMA, table),
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn select_statement(schema: &str, table: &str, columns: &[SourceColumn]) -> String {
    let projection = columns
        .iter()
        .map(SourceColumn::select_expr)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {projection} FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    )
}

fn rows_to_frame(columns: &[SourceColumn], rows: &[PgRow]) -> Result<DataFrame> {
    let mut builders: Vec<ColumnValues> = columns
        .iter()
        .map(|column| ColumnValues::with_capacity(column.kind(), rows.len()))
        .collect();

    for row in rows {
        for (idx, builder) in builders.iter_mut().enumerate() {
            builder.push_from_row(row, idx)?;
        }
    }

    let columns = columns
        .iter()
        .zip(builders)
        .map(|(column, values)| values.into_column(&column.name))
        .collect::<Result<Vec<_>>>()?;

    Ok(DataFrame::new(columns)?)
}

/// Values of one column, accumulated row by row before becoming a polars column.
#[derive(Debug)]
pub enum ColumnValues {
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float32(Vec<Option<f32>>),
    Float64(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
    TimestampTz(Vec<Option<DateTime<Utc>>>),
}

impl ColumnValues {
    pub fn with_capacity(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::Int32 => ColumnValues::Int32(Vec::with_capacity(capacity)),
            ColumnKind::Int64 => ColumnValues::Int64(Vec::with_capacity(capacity)),
            ColumnKind::Float32 => ColumnValues::Float32(Vec::with_capacity(capacity)),
            ColumnKind::Float64 => ColumnValues::Float64(Vec::with_capacity(capacity)),
            ColumnKind::Boolean => ColumnValues::Boolean(Vec::with_capacity(capacity)),
            ColumnKind::Text => ColumnValues::Text(Vec::with_capacity(capacity)),
            ColumnKind::Date => ColumnValues::Date(Vec::with_capacity(capacity)),
            ColumnKind::Timestamp => ColumnValues::Timestamp(Vec::with_capacity(capacity)),
            ColumnKind::TimestampTz => ColumnValues::TimestampTz(Vec::with_capacity(capacity)),
        }
    }

    fn push_from_row(&mut self, row: &PgRow, idx: usize) -> Result<()> {
        match self {
            ColumnValues::Int32(values) => values.push(row.try_get(idx)?),
            ColumnValues::Int64(values) => values.push(row.try_get(idx)?),
            ColumnValues::Float32(values) => values.push(row.try_get(idx)?),
            ColumnValues::Float64(values) => values.push(row.try_get(idx)?),
            ColumnValues::Boolean(values) => values.push(row.try_get(idx)?),
            ColumnValues::Text(values) => values.push(row.try_get(idx)?),
            ColumnValues::Date(values) => values.push(row.try_get(idx)?),
            ColumnValues::Timestamp(values) => values.push(row.try_get(idx)?),
            ColumnValues::TimestampTz(values) => values.push(row.try_get(idx)?),
        }
        Ok(())
    }

    pub fn into_column(self, name: &str) -> Result<Column> {
        let name: PlSmallStr = name.into();
        let series = match self {
            ColumnValues::Int32(values) => Series::new(name, values),
            ColumnValues::Int64(values) => Series::new(name, values),
            ColumnValues::Float32(values) => Series::new(name, values),
            ColumnValues::Float64(values) => Series::new(name, values),
            ColumnValues::Boolean(values) => Series::new(name, values),
            ColumnValues::Text(values) => Series::new(name, values),
            ColumnValues::Date(values) => Series::new(name, values),
            ColumnValues::Timestamp(values) => {
                let micros: Vec<Option<i64>> = values
                    .into_iter()
                    .map(|ts| ts.map(|ts| ts.and_utc().timestamp_micros()))
                    .collect();
                Series::new(name, micros)
                    .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
            }
            ColumnValues::TimestampTz(values) => {
                let micros: Vec<Option<i64>> = values
                    .into_iter()
                    .map(|ts| ts.map(|ts| ts.timestamp_micros()))
                    .collect();
                Series::new(name, micros).cast(&DataType::Datetime(
                    TimeUnit::Microseconds,
                    Some(polars::prelude::TimeZone::UTC),
                ))?
            }
        };
        Ok(series.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, udt_name: &str) -> SourceColumn {
        SourceColumn {
            name: name.to_string(),
            udt_name: udt_name.to_string(),
        }
    }

    #[test]
    fn unqualified_tables_resolve_to_public() {
        assert_eq!(split_table_name("moradores"), ("public", "moradores"));
        assert_eq!(split_table_name("raw.moradores"), ("raw", "moradores"));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("nome"), "\"nome\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn projection_casts_types_the_driver_cannot_decode() {
        let columns = vec![
            column("transacao_id", "int4"),
            column("valor_transacao", "numeric"),
            column("codigo", "uuid"),
            column("andar", "int2"),
            column("data_transacao", "date"),
        ];
        let sql = select_statement("public", "transacoes", &columns);
        assert_eq!(
            sql,
            "SELECT \"transacao_id\", \"valor_transacao\"::float8 AS \"valor_transacao\", \
             \"codigo\"::text AS \"codigo\", \"andar\"::int4 AS \"andar\", \"data_transacao\" \
             FROM \"public\".\"transacoes\""
        );
    }

    #[test]
    fn udt_names_map_to_kinds() {
        assert_eq!(ColumnKind::from_udt_name("int8"), ColumnKind::Int64);
        assert_eq!(ColumnKind::from_udt_name("numeric"), ColumnKind::Float64);
        assert_eq!(ColumnKind::from_udt_name("varchar"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_udt_name("jsonb"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_udt_name("timestamptz"), ColumnKind::TimestampTz);
    }

    #[test]
    fn dates_become_polars_dates() -> Result<()> {
        let values = ColumnValues::Date(vec![
            NaiveDate::from_ymd_opt(1970, 1, 2),
            None,
            NaiveDate::from_ymd_opt(2024, 3, 15),
        ]);
        let column = values.into_column("data_registro")?;
        assert_eq!(column.dtype(), &DataType::Date);
        assert_eq!(column.null_count(), 1);

        let as_text = column.cast(&DataType::String)?;
        let as_text = as_text.str()?;
        assert_eq!(as_text.get(0), Some("1970-01-02"));
        assert_eq!(as_text.get(2), Some("2024-03-15"));
        Ok(())
    }

    #[test]
    fn timestamps_keep_microseconds() -> Result<()> {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_micro_opt(12, 30, 0, 250))
            .unwrap();
        let column = ColumnValues::Timestamp(vec![Some(ts)]).into_column("criado_em")?;
        assert_eq!(
            column.dtype(),
            &DataType::Datetime(TimeUnit::Microseconds, None)
        );
        let physical = column.as_materialized_series().to_physical_repr();
        assert_eq!(
            physical.i64()?.get(0),
            Some(ts.and_utc().timestamp_micros())
        );
        Ok(())
    }
}
