use thiserror::Error;

/// Taxonomía de errores compartida por master, worker y client.
///
/// - [`MrError::InvalidConfig`]: job rechazado en la admisión, nunca se crea
/// - [`MrError::Input`]: el split falló o devolvió cero bloques
/// - [`MrError::NoWorkerAvailable`]: no hay worker válido para colocar una tarea
/// - [`MrError::Execution`]: el worker ejecutó la tarea y falló
#[derive(Debug, Error)]
pub enum MrError {
    #[error("configuración inválida: {0}")]
    InvalidConfig(String),

    #[error("entrada inválida: {0}")]
    Input(String),

    #[error("no hay workers disponibles para {0}")]
    NoWorkerAvailable(String),

    #[error("error de ejecución: {0}")]
    Execution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MrError>;
