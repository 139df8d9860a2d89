use std::env;

use anyhow::Result;
use arbo_core::{reader, Credentials, EtlError, Session};
use polars::prelude::{DataType, TimeUnit};

const SCHEMA: &str = "arbo_reader_test";

/// Credentials for a TLS-enabled test database, taken from `ARBO_TEST_PG_*`.
fn test_credentials() -> Option<Credentials> {
    Some(Credentials::new(
        env::var("ARBO_TEST_PG_USER").ok()?,
        env::var("ARBO_TEST_PG_PASSWORD").unwrap_or_default(),
        env::var("ARBO_TEST_PG_HOST").ok()?,
        env::var("ARBO_TEST_PG_DATABASE").ok()?,
    ))
}

#[tokio::test]
async fn reads_typed_columns_when_database_available() -> Result<()> {
    let Some(credentials) = test_credentials() else {
        eprintln!("Skipping reader test because ARBO_TEST_PG_HOST/USER/DATABASE are not set");
        return Ok(());
    };

    let session = Session::start("arbo-reader-test")?;
    let pool = session.pool(&credentials).await?;

    for statement in [
        format!("DROP SCHEMA IF EXISTS {SCHEMA} CASCADE"),
        format!("CREATE SCHEMA {SCHEMA}"),
        format!(
            "CREATE TABLE {SCHEMA}.transacoes (
                transacao_id int4 PRIMARY KEY,
                morador_id int8 NOT NULL,
                valor_transacao numeric(12, 2),
                data_transacao date,
                registrado_em timestamp,
                observacao text,
                codigo uuid
            )"
        ),
        format!(
            "INSERT INTO {SCHEMA}.transacoes VALUES
                (1, 10, 12.50, '2024-03-01', '2024-03-01 08:00:00', 'primeira',
                 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'),
                (2, 11, NULL, '2024-03-02', NULL, NULL, NULL)"
        ),
    ] {
        sqlx::query(&statement).execute(&pool).await?;
    }

    let table = format!("{SCHEMA}.transacoes");
    let df = reader::read_table(&session, &credentials, &table).await?;

    assert_eq!(df.height(), 2);
    assert_eq!(
        df.get_column_names_str(),
        vec![
            "transacao_id",
            "morador_id",
            "valor_transacao",
            "data_transacao",
            "registrado_em",
            "observacao",
            "codigo"
        ]
    );
    assert_eq!(df.column("transacao_id")?.dtype(), &DataType::Int32);
    assert_eq!(df.column("morador_id")?.dtype(), &DataType::Int64);
    assert_eq!(df.column("valor_transacao")?.dtype(), &DataType::Float64);
    assert_eq!(df.column("data_transacao")?.dtype(), &DataType::Date);
    assert_eq!(
        df.column("registrado_em")?.dtype(),
        &DataType::Datetime(TimeUnit::Microseconds, None)
    );
    assert_eq!(df.column("codigo")?.dtype(), &DataType::String);
    let amounts: Vec<f64> = df.column("valor_transacao")?.f64()?.into_iter().flatten().collect();
    assert_eq!(amounts, vec![12.5]);
    assert_eq!(df.column("valor_transacao")?.null_count(), 1);

    let missing = reader::read_table(&session, &credentials, &format!("{SCHEMA}.nope")).await;
    assert!(matches!(missing, Err(EtlError::TableNotFound { .. })));

    sqlx::query(&format!("DROP SCHEMA {SCHEMA} CASCADE"))
        .execute(&pool)
        .await?;
    session.stop().await;
    Ok(())
}
