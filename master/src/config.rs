use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use common::FileServerInfo;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_ADMISSION_THREADS: usize = 4;
pub const DEFAULT_DISPATCHER_THREADS: usize = 4;
pub const DEFAULT_CHECK_PERIOD_MS: u64 = 2_000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_FILE_SERVER_PORT: u16 = 8081;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    /// Jobs que pueden estar partiendo entrada y generando tareas a la vez
    pub admission_threads: usize,
    /// Despachadores de mappers (cada uno hace una RPC bloqueante)
    pub dispatcher_threads: usize,
    /// Período del chequeo de heartbeats
    pub check_period: Duration,
    /// Un worker es válido si su último heartbeat tiene menos que esto
    pub heartbeat_timeout: Duration,
    pub rpc_timeout: Duration,
    pub file_server: FileServerInfo,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            admission_threads: DEFAULT_ADMISSION_THREADS,
            dispatcher_threads: DEFAULT_DISPATCHER_THREADS,
            check_period: Duration::from_millis(DEFAULT_CHECK_PERIOD_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            file_server: FileServerInfo {
                host: "localhost".to_string(),
                port: DEFAULT_FILE_SERVER_PORT,
            },
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
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

impl MasterConfig {
    /// Lee la configuración de variables de entorno (en Docker se setean en el compose).
    pub fn from_env() -> Result<Self> {
        let host = match env::var("FILE_SERVER_HOST") {
            Ok(h) => h,
            Err(_) => hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
        };

        Ok(Self {
            bind_addr: env::var("MASTER_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            admission_threads: env_or("MASTER_ADMISSION_THREADS", DEFAULT_ADMISSION_THREADS)?
                .max(1),
            dispatcher_threads: env_or("MASTER_DISPATCHER_THREADS", DEFAULT_DISPATCHER_THREADS)?
                .max(1),
            check_period: Duration::from_millis(env_or(
                "MASTER_CHECK_PERIOD_MS",
                DEFAULT_CHECK_PERIOD_MS,
            )?),
            heartbeat_timeout: Duration::from_millis(env_or(
                "MASTER_HEARTBEAT_TIMEOUT_MS",
                DEFAULT_HEARTBEAT_TIMEOUT_MS,
            )?),
            rpc_timeout: Duration::from_millis(env_or(
                "MASTER_RPC_TIMEOUT_MS",
                DEFAULT_RPC_TIMEOUT_MS,
            )?),
            file_server: FileServerInfo {
                host,
                port: env_or("FILE_SERVER_PORT", DEFAULT_FILE_SERVER_PORT)?,
            },
        })
    }
}
