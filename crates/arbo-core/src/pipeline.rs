use chrono::{DateTime, Local};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::config::{Config, Credentials};
use crate::error::Result;
use crate::gold;
use crate::lake::{LakeLayout, Layer};
use crate::reader;
use crate::session::Session;
use crate::writer::{StorageFormat, WriteReport};

pub const CONDOMINIOS: &str = "condominios";
pub const IMOVEIS: &str = "imoveis";
pub const MORADORES: &str = "moradores";
pub const TRANSACOES: &str = "transacoes";

/// A source table and the column its silver copy is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTable {
    pub name: &'static str,
    pub silver_partition: Option<&'static str>,
}

pub const SOURCE_TABLES: [SourceTable; 4] = [
    SourceTable {
        name: CONDOMINIOS,
        silver_partition: None,
    },
    SourceTable {
        name: IMOVEIS,
        silver_partition: Some("tipo"),
    },
    SourceTable {
        name: MORADORES,
        silver_partition: Some("data_registro"),
    },
    SourceTable {
        name: TRANSACOES,
        silver_partition: Some("data_transacao"),
    },
];

/// The four source tables as loaded from the database.
#[derive(Debug, Clone)]
pub struct SourceFrames {
    pub condominios: DataFrame,
    pub imoveis: DataFrame,
    pub moradores: DataFrame,
    pub transacoes: DataFrame,
}

impl SourceFrames {
    pub fn get(&self, table: &str) -> Option<&DataFrame> {
        match table {
            CONDOMINIOS => Some(&self.condominios),
            IMOVEIS => Some(&self.imoveis),
            MORADORES => Some(&self.moradores),
            TRANSACOES => Some(&self.transacoes),
            _ => None,
        }
    }

    /// Source tables paired with their frames, in extraction order.
    pub fn tables(&self) -> [(SourceTable, &DataFrame); 4] {
        [
            (SOURCE_TABLES[0], &self.condominios),
            (SOURCE_TABLES[1], &self.imoveis),
            (SOURCE_TABLES[2], &self.moradores),
            (SOURCE_TABLES[3], &self.transacoes),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableWrite {
    pub layer: Layer,
    #[serde(flatten)]
    pub report: WriteReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub app_name: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub writes: Vec<TableWrite>,
}

impl RunSummary {
    pub fn writes_for(&self, layer: Layer) -> impl Iterator<Item = &TableWrite> {
        self.writes.iter().filter(move |write| write.layer == layer)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    layout: LakeLayout,
    format: StorageFormat,
    preview_rows: Option<usize>,
}

impl Pipeline {
    pub fn new(layout: LakeLayout, format: StorageFormat) -> Self {
        Self {
            layout,
            format,
            preview_rows: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(LakeLayout::new(&config.base_path), config.format)
            .with_preview_rows(config.preview_rows)
    }

    pub fn with_preview_rows(mut self, rows: Option<usize>) -> Self {
        self.preview_rows = rows;
        self
    }

    pub fn layout(&self) -> &LakeLayout {
        &self.layout
    }

    /// Reads the four source tables, one request each, in order.
    pub async fn extract(
        &self,
        session: &Session,
        credentials: &Credentials,
    ) -> Result<SourceFrames> {
        let condominios = reader::read_table(session, credentials, CONDOMINIOS).await?;
        self.preview(CONDOMINIOS, &condominios);
        let imoveis = reader::read_table(session, credentials, IMOVEIS).await?;
        self.preview(IMOVEIS, &imoveis);
        let moradores = reader::read_table(session, credentials, MORADORES).await?;
        self.preview(MORADORES, &moradores);
        let transacoes = reader::read_table(session, credentials, TRANSACOES).await?;
        self.preview(TRANSACOES, &transacoes);

        Ok(SourceFrames {
            condominios,
            imoveis,
            moradores,
            transacoes,
        })
    }

    /// Writes bronze and silver copies of the sources, then computes and writes gold.
    pub fn load_layers(&self, sources: &SourceFrames) -> Result<Vec<TableWrite>> {
        let mut writes = Vec::with_capacity(11);

        for (table, df) in sources.tables() {
            writes.push(self.write(Layer::Bronze, table.name, df, None)?);
        }

        for (table, df) in sources.tables() {
            writes.push(self.write(Layer::Silver, table.name, df, table.silver_partition)?);
        }

        info!("computing gold tables");
        for (name, df) in self.compute_gold(sources)? {
            writes.push(self.write(Layer::Gold, name, &df, None)?);
        }

        Ok(writes)
    }

    pub fn compute_gold(&self, sources: &SourceFrames) -> Result<Vec<(&'static str, DataFrame)>> {
        let per_condominio = gold::transactions_per_condominio(
            &sources.transacoes,
            &sources.moradores,
            &sources.condominios,
        )?;
        self.preview(gold::TRANSACTIONS_PER_CONDOMINIO, &per_condominio);

        let per_morador = gold::total_per_morador(&sources.transacoes, &sources.moradores)?;
        self.preview(gold::TOTAL_PER_MORADOR, &per_morador);

        let per_day_and_type =
            gold::daily_per_property_type(&sources.transacoes, &sources.imoveis)?;
        self.preview(gold::DAILY_PER_PROPERTY_TYPE, &per_day_and_type);

        Ok(vec![
            (gold::TRANSACTIONS_PER_CONDOMINIO, per_condominio),
            (gold::TOTAL_PER_MORADOR, per_morador),
            (gold::DAILY_PER_PROPERTY_TYPE, per_day_and_type),
        ])
    }

    pub async fn run(&self, session: &Session, credentials: &Credentials) -> Result<RunSummary> {
        let sources = self.extract(session, credentials).await?;
        let writes = self.load_layers(&sources)?;

        Ok(RunSummary {
            app_name: session.app_name().to_string(),
            started_at: session.started_at(),
            finished_at: Local::now(),
            writes,
        })
    }

    fn write(
        &self,
        layer: Layer,
        table: &str,
        df: &DataFrame,
        partition: Option<&str>,
    ) -> Result<TableWrite> {
        let report = self
            .layout
            .writer(layer, table)
            .create_table(df, self.format, partition)?;
        Ok(TableWrite { layer, report })
    }

    fn preview(&self, table: &str, df: &DataFrame) {
        if let Some(rows) = self.preview_rows {
            info!(table, rows = df.height(), preview = %df.head(Some(rows)), "frame preview");
        }
    }
}

/// Starts a session, runs the whole pipeline and stops the session again.
pub async fn run(config: &Config) -> Result<RunSummary> {
    let session = Session::start(&config.app_name)?;
    info!(session = %session, base_path = %config.base_path.display(), "pipeline starting");

    let result = Pipeline::from_config(config)
        .run(&session, &config.source)
        .await;
    session.stop().await;

    let summary = result?;
    info!(writes = summary.writes.len(), "pipeline finished");
    Ok(summary)
}
