use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Local};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Credentials;
use crate::error::{EtlError, Result};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// A local pipeline session: names the run and owns the source connection pools.
///
/// Pools are opened lazily, one per distinct connection target, and closed by
/// [`Session::stop`].
pub struct Session {
    app_name: String,
    started_at: DateTime<Local>,
    worker_threads: usize,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl Session {
    /// Starts a session that uses every available core for dataframe work.
    pub fn start(app_name: impl Into<String>) -> Result<Self> {
        let app_name = app_name.into();
        if app_name.trim().is_empty() {
            return Err(EtlError::Config("session app name must not be empty".into()));
        }

        let worker_threads = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);

        let session = Self {
            app_name,
            started_at: Local::now(),
            worker_threads,
            pools: Mutex::new(HashMap::new()),
        };
        info!(
            app_name = %session.app_name,
            worker_threads = session.worker_threads,
            "session started"
        );
        Ok(session)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Returns the pool for `credentials`, connecting on first use.
    pub async fn pool(&self, credentials: &Credentials) -> Result<PgPool> {
        let key = credentials.connection_url();
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(connect_options(credentials)?)
            .await?;
        info!(target_url = %key, "database connection pool established");

        pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// Closes every open pool and ends the session.
    pub async fn stop(self) {
        let pools = self.pools.into_inner();
        for (key, pool) in pools {
            pool.close().await;
            info!(target_url = %key, "database connection pool closed");
        }
        info!(app_name = %self.app_name, "session stopped");
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "App name: {}\nStarted in: {}",
            self.app_name,
            self.started_at.format("%y-%m-%d %H:%M:%S")
        )
    }
}

pub fn connect_options(credentials: &Credentials) -> Result<PgConnectOptions> {
    let (host, port) = credentials.host_and_port()?;
    let mut options = PgConnectOptions::new_without_pgpass()
        .host(host)
        .port(port)
        .username(&credentials.user)
        .database(&credentials.database)
        .ssl_mode(PgSslMode::Require);

    if let Some(password) = &credentials.password {
        options = options.password(password);
    }

    Ok(options)
}
