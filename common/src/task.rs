use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::storage::FileBlock;
use crate::worker::WorkerName;

/// Único dentro del job: mappers primero (0..M), después reducers (M..M+R).
pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Succeed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Succeed => "SUCCEED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Mapper,
    Reducer,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Mapper => f.write_str("mapper"),
            TaskKind::Reducer => f.write_str("reducer"),
        }
    }
}

/// Atributos comunes a mappers y reducers.
///
/// `job_id` y `task_id` no cambian nunca. `worker` y `attempt` sólo los
/// modifica el master con el lock del job tomado; un reporte cuyo
/// `worker`/`attempt` no coincide con el registro del master es obsoleto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHeader {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub worker: WorkerName,
    pub attempt: u32,
    pub status: TaskStatus,
}

impl TaskHeader {
    pub fn new(job_id: JobId, task_id: TaskId, worker: WorkerName) -> Self {
        Self {
            job_id,
            task_id,
            worker,
            attempt: 0,
            status: TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperTask {
    #[serde(flatten)]
    pub header: TaskHeader,

    /// Bloque (offset + largo) del archivo de entrada
    pub block: FileBlock,

    /// Particiones a producir (= cantidad de reducers)
    pub reducer_amount: u32,

    pub program: String,

    /// URL base del worker que sirve las particiones de este intento.
    /// La completa el worker al reportar éxito.
    #[serde(default)]
    pub output_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerTask {
    #[serde(flatten)]
    pub header: TaskHeader,

    /// Rango de claves (índice de partición) que le toca a este reducer
    pub partition: u32,

    /// Cantidad de salidas de mapper que tiene que juntar antes de reducir
    pub mapper_amount: u32,

    pub output_path: String,
    pub output_chunk_size: u32,
    pub output_replicas: u32,
    pub program: String,
}
