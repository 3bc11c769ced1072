use serde::{Deserialize, Serialize};

use crate::task::{MapperTask, ReducerTask};

pub type WorkerName = String;

/// Heartbeat periódico: crea el worker en el master la primera vez y
/// después sólo refresca timestamp y cargas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub name: WorkerName,
    /// URL base donde el worker atiende RPC, ej: "http://worker-1:9090"
    pub address: String,
    pub mapper_load: u32,
    pub reducer_load: u32,

    #[serde(default)]
    pub cpu_percent: Option<f32>,
    #[serde(default)]
    pub mem_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerMetrics {
    pub name: WorkerName,
    pub address: String,
    pub valid: bool,
    pub last_heartbeat_ms_ago: u64,
    pub mapper_load: u32,
    pub reducer_load: u32,
    pub pending_mappers: u32,
    pub pending_reducers: u32,
    pub cpu_percent: Option<f32>,
    pub mem_bytes: Option<u64>,
}

/// master -> worker: una salida de mapper para un lote de reducers del mismo worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReducerRequest {
    pub mapper: MapperTask,
    pub reducers: Vec<ReducerTask>,
}

/// worker -> master: el reducer no pudo leer la salida de ese mapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerFailedOnMapperRequest {
    pub reducer: ReducerTask,
    pub mapper: MapperTask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileServerInfo {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}
