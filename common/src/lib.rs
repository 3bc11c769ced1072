pub mod collector;
pub mod error;
pub mod job;
pub mod partition;
pub mod program;
pub mod storage;
pub mod task;
pub mod worker;

pub use collector::OutputCollector;
pub use error::{MrError, Result};
pub use job::{JobConfig, JobId, JobInfo, JobStatus, SubmitJobResponse};
pub use storage::{FileBlock, InputSplitter, LocalStorage};
pub use task::{MapperTask, ReducerTask, TaskHeader, TaskId, TaskKind, TaskStatus};
pub use worker::{
    Ack, FileServerInfo, HeartbeatRequest, HeartbeatResponse, ReducerFailedOnMapperRequest,
    RunReducerRequest, WorkerMetrics, WorkerName,
};
