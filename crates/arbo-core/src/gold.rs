// crates/arbo-core/src/gold.rs

use polars::prelude::*;

use crate::error::Result;

pub const TRANSACTIONS_PER_CONDOMINIO: &str = "transac_por_cond";
pub const TOTAL_PER_MORADOR: &str = "tot_transac_por_morador";
pub const DAILY_PER_PROPERTY_TYPE: &str = "transc_dia_tipo";

pub const COUNT_COLUMN: &str = "count";
pub const AMOUNT_SUM_COLUMN: &str = "sum(valor_transacao)";

fn inner() -> JoinArgs {
    JoinArgs::new(JoinType::Inner)
}

fn ascending() -> SortMultipleOptions {
    SortMultipleOptions::default()
        .with_nulls_last(true)
        .with_maintain_order(true)
}

/// Number of transactions per condominio, ordered by `condominio_id`.
pub fn transactions_per_condominio(
    transacoes: &DataFrame,
    moradores: &DataFrame,
    condominios: &DataFrame,
) -> Result<DataFrame> {
    let df = transacoes
        .clone()
        .lazy()
        .select([col("morador_id")])
        .join(
            moradores
                .clone()
                .lazy()
                .select([col("morador_id"), col("condominio_id")]),
            &[col("morador_id")],
            &[col("morador_id")],
            inner(),
        )
        .join(
            condominios
                .clone()
                .lazy()
                .select([col("condominio_id"), col("nome")]),
            &[col("condominio_id")],
            &[col("condominio_id")],
            inner(),
        )
        .group_by([col("nome"), col("condominio_id")])
        .agg([len().cast(DataType::Int64).alias(COUNT_COLUMN)])
        .sort(["condominio_id", "nome"], ascending())
        .collect()?;
    Ok(df)
}

/// Summed `valor_transacao` per morador, ordered by name.
pub fn total_per_morador(transacoes: &DataFrame, moradores: &DataFrame) -> Result<DataFrame> {
    let df = transacoes
        .clone()
        .lazy()
        .select([col("morador_id"), col("valor_transacao")])
        .join(
            moradores
                .clone()
                .lazy()
                .select([col("morador_id"), col("nome")]),
            &[col("morador_id")],
            &[col("morador_id")],
            inner(),
        )
        .group_by([col("morador_id"), col("nome")])
        .agg([col("valor_transacao").sum().alias(AMOUNT_SUM_COLUMN)])
        // morador_id breaks ties between residents sharing a name
        .sort(["nome", "morador_id"], ascending())
        .collect()?;
    Ok(df)
}

/// Transactions per day and property type.
pub fn daily_per_property_type(transacoes: &DataFrame, imoveis: &DataFrame) -> Result<DataFrame> {
    let df = transacoes
        .clone()
        .lazy()
        .select([col("imovel_id"), col("data_transacao")])
        .join(
            imoveis.clone().lazy().select([col("imovel_id"), col("tipo")]),
            &[col("imovel_id")],
            &[col("imovel_id")],
            inner(),
        )
        .group_by([col("data_transacao"), col("tipo")])
        .agg([len().cast(DataType::Int64).alias(COUNT_COLUMN)])
        .sort(["data_transacao", "tipo"], ascending())
        .collect()?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn totals_per_morador_match_worked_example() -> Result<()> {
        let transacoes = df!(
            "transacao_id" => [1i32, 2, 3],
            "morador_id" => [1i32, 1, 2],
            "valor_transacao" => [10.0f64, 5.0, 7.0],
        )?;
        let moradores = df!(
            "morador_id" => [2i32, 1],
            "nome" => ["B", "A"],
        )?;

        let totals = total_per_morador(&transacoes, &moradores)?;

        let names: Vec<_> = totals.column("nome")?.str()?.into_iter().flatten().collect();
        let sums: Vec<_> = totals
            .column(AMOUNT_SUM_COLUMN)?
            .f64()?
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(sums, vec![15.0, 7.0]);
        Ok(())
    }

    #[test]
    fn unmatched_transactions_are_dropped_by_inner_join() -> Result<()> {
        let transacoes = df!(
            "morador_id" => [1i32, 99],
            "imovel_id" => [10i32, 10],
            "data_transacao" => ["2024-01-01", "2024-01-01"],
            "valor_transacao" => [1.0f64, 2.0],
        )?;
        let moradores = df!(
            "morador_id" => [1i32],
            "nome" => ["A"],
            "condominio_id" => [7i32],
        )?;
        let condominios = df!(
            "condominio_id" => [7i32],
            "nome" => ["Jardins"],
        )?;

        let per_cond = transactions_per_condominio(&transacoes, &moradores, &condominios)?;
        assert_eq!(per_cond.height(), 1);
        assert_eq!(per_cond.column("nome")?.str()?.get(0), Some("Jardins"));
        assert_eq!(per_cond.column(COUNT_COLUMN)?.i64()?.get(0), Some(1));
        Ok(())
    }

    #[test]
    fn daily_counts_are_ordered_by_date_then_type() -> Result<()> {
        let transacoes = df!(
            "imovel_id" => [1i32, 2, 1, 2, 2],
            "data_transacao" => ["2024-01-02", "2024-01-01", "2024-01-01", "2024-01-02", "2024-01-02"],
        )?;
        let imoveis = df!(
            "imovel_id" => [1i32, 2],
            "tipo" => ["casa", "apartamento"],
        )?;

        let daily = daily_per_property_type(&transacoes, &imoveis)?;

        let dates: Vec<_> = daily.column("data_transacao")?.str()?.into_iter().flatten().collect();
        let kinds: Vec<_> = daily.column("tipo")?.str()?.into_iter().flatten().collect();
        let counts: Vec<_> = daily.column(COUNT_COLUMN)?.i64()?.into_iter().flatten().collect();
        assert_eq!(dates, vec!["2024-01-01", "2024-01-01", "2024-01-02", "2024-01-02"]);
        assert_eq!(kinds, vec!["apartamento", "casa", "apartamento", "casa"]);
        assert_eq!(counts, vec![1, 1, 2, 1]);
        Ok(())
    }
}
