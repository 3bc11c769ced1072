use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MrError, Result};
use crate::program;

pub type JobId = u64;

/// Configuración que envía el cliente. Es inmutable una vez admitido el job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Archivo de entrada que se parte en bloques, ej: "/data/input/libro.txt"
    pub input_path: String,

    /// Directorio donde los reducers escriben su salida
    pub output_path: String,

    /// Cantidad de mappers pedida. Es sólo una pista: manda el resultado del split.
    pub mapper_amount: u32,

    /// Cantidad de reducers = cantidad de particiones de cada mapper
    pub reducer_amount: u32,

    /// Intentos máximos por tarea antes de marcarla FAILED
    pub max_attempt_count: u32,

    /// Identificador del programa map/reduce registrado, ej: "wordcount"
    pub program: String,

    /// Líneas por bloque de salida
    pub output_chunk_size: u32,

    /// Copias de cada bloque de salida
    pub output_replicas: u32,
}

impl JobConfig {
    /// Chequeo de admisión. Tiene que correr antes de crear cualquier tarea.
    pub fn validate(&self) -> Result<()> {
        if self.input_path.trim().is_empty() {
            return Err(MrError::InvalidConfig("falta input_path".into()));
        }
        if self.output_path.trim().is_empty() {
            return Err(MrError::InvalidConfig("falta output_path".into()));
        }
        if self.input_path == self.output_path {
            return Err(MrError::InvalidConfig(
                "input_path y output_path no pueden ser iguales".into(),
            ));
        }
        if self.program.trim().is_empty() {
            return Err(MrError::InvalidConfig("falta program".into()));
        }
        if program::resolve(&self.program).is_none() {
            return Err(MrError::InvalidConfig(format!(
                "programa desconocido: {} (disponibles: {})",
                self.program,
                program::registered().join(", ")
            )));
        }
        if self.mapper_amount == 0 {
            return Err(MrError::InvalidConfig("mapper_amount debe ser >= 1".into()));
        }
        if self.reducer_amount == 0 {
            return Err(MrError::InvalidConfig("reducer_amount debe ser >= 1".into()));
        }
        if self.output_chunk_size == 0 {
            return Err(MrError::InvalidConfig(
                "output_chunk_size debe ser >= 1".into(),
            ));
        }
        if self.output_replicas == 0 {
            return Err(MrError::InvalidConfig(
                "output_replicas debe ser >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Initializing,
    Pending,
    Failed,
    Succeed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Succeed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Initializing => "INITIALIZING",
            JobStatus::Pending => "PENDING",
            JobStatus::Failed => "FAILED",
            JobStatus::Succeed => "SUCCEED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

/// Resumen de un job para `GET /api/v1/jobs/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub status: JobStatus,
    pub config: JobConfig,

    /// -------- Métricas del job --------
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub mapper_tasks: u32,
    pub mappers_succeeded: u32,
    pub reducer_tasks: u32,
    pub reducers_succeeded: u32,
    pub failed_tasks: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JobConfig {
        JobConfig {
            input_path: "/data/input/libro.txt".into(),
            output_path: "/data/output/libro".into(),
            mapper_amount: 4,
            reducer_amount: 2,
            max_attempt_count: 3,
            program: "wordcount".into(),
            output_chunk_size: 1000,
            output_replicas: 1,
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_or_inconsistent_fields() {
        let cases: Vec<Box<dyn Fn(&mut JobConfig)>> = vec![
            Box::new(|c| c.input_path = " ".into()),
            Box::new(|c| c.output_path.clear()),
            Box::new(|c| c.output_path = c.input_path.clone()),
            Box::new(|c| c.program.clear()),
            Box::new(|c| c.program = "no-existe".into()),
            Box::new(|c| c.mapper_amount = 0),
            Box::new(|c| c.reducer_amount = 0),
            Box::new(|c| c.output_chunk_size = 0),
            Box::new(|c| c.output_replicas = 0),
        ];

        for mutate in cases {
            let mut c = config();
            mutate(&mut c);
            match c.validate() {
                Err(MrError::InvalidConfig(_)) => {}
                other => panic!("esperaba InvalidConfig para {:?}, obtuve {:?}", c, other),
            }
        }
    }

    #[test]
    fn unknown_program_lists_the_registered_ones() {
        let mut c = config();
        c.program = "grep".into();
        let msg = c.validate().unwrap_err().to_string();
        assert!(msg.contains("grep"), "{msg}");
        for name in program::registered() {
            assert!(msg.contains(name), "{msg}");
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Initializing.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Succeed.is_terminal());
        assert_eq!(JobStatus::Pending.to_string(), "PENDING");
    }

    #[test]
    fn status_uses_the_same_names_on_the_wire() {
        let json = serde_json::to_string(&JobStatus::Succeed).unwrap();
        assert_eq!(json, "\"SUCCEED\"");
        let back: JobStatus = serde_json::from_str("\"INITIALIZING\"").unwrap();
        assert_eq!(back, JobStatus::Initializing);
    }
}
