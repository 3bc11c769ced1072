use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

pub const DEFAULT_MASTER_URL: &str = "http://master:8080";
pub const DEFAULT_BIND: &str = "0.0.0.0:9090";
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;
pub const DEFAULT_TMP_DIR: &str = "/data/tmp";
pub const DEFAULT_HEARTBEAT_MS: u64 = 1_000;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SLOT_TTL_SECS: u64 = 1_800;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_url: String,
    pub name: String,
    pub bind_addr: String,
    /// URL con la que el master y los otros workers llegan a este worker
    pub advertise_url: String,
    /// Mappers ejecutándose a la vez
    pub concurrency: usize,
    /// Acá quedan las particiones de salida de los mappers
    pub tmp_dir: PathBuf,
    pub heartbeat_period: Duration,
    pub rpc_timeout: Duration,
    /// Tiempo que un reducer puede esperar salidas sin recibir ninguna
    pub slot_ttl: Duration,
}

fn hostname_string() -> String {
    hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("valor inválido en {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let host = hostname_string();
        let bind_addr = env::var("WORKER_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
        let port = bind_addr
            .rsplit(':')
            .next()
            .unwrap_or("9090")
            .to_string();

        let name = env::var("WORKER_NAME").unwrap_or_else(|_| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", host, &suffix[..8])
        });

        Ok(Self {
            master_url: env::var("MASTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_MASTER_URL.to_string()),
            name,
            advertise_url: env::var("WORKER_ADVERTISE_URL")
                .unwrap_or_else(|_| format!("http://{host}:{port}")),
            bind_addr,
            concurrency: env_parse("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?.max(1),
            tmp_dir: PathBuf::from(
                env::var("WORKER_TMP_DIR").unwrap_or_else(|_| DEFAULT_TMP_DIR.to_string()),
            ),
            heartbeat_period: Duration::from_millis(env_parse(
                "WORKER_HEARTBEAT_MS",
                DEFAULT_HEARTBEAT_MS,
            )?),
            rpc_timeout: Duration::from_millis(env_parse(
                "WORKER_RPC_TIMEOUT_MS",
                DEFAULT_RPC_TIMEOUT_MS,
            )?),
            slot_ttl: Duration::from_secs(env_parse(
                "WORKER_SLOT_TTL_SECS",
                DEFAULT_SLOT_TTL_SECS,
            )?),
        })
    }

    #[cfg(test)]
    pub fn for_tests(tmp_dir: PathBuf) -> Self {
        Self {
            master_url: "http://127.0.0.1:9".into(),
            name: "w-test".into(),
            bind_addr: "127.0.0.1:0".into(),
            advertise_url: "http://127.0.0.1:9".into(),
            concurrency: 1,
            tmp_dir,
            heartbeat_period: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            rpc_timeout: Duration::from_millis(200),
            slot_ttl: Duration::from_secs(DEFAULT_SLOT_TTL_SECS),
        }
    }
}
