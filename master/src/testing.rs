//! Dobles de prueba para el coordinador: RPC y splitter en memoria.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::{FileBlock, InputSplitter, JobConfig, JobId, MapperTask, ReducerTask, TaskId};
use parking_lot::Mutex;

use crate::config::MasterConfig;
use crate::registry::heartbeat_req;
use crate::rpc::{RpcError, WorkerRpc};
use crate::tracker::JobTracker;

/// Registra las llamadas que salen hacia los workers. Las direcciones
/// marcadas con `take_down` fallan con error de transporte.
#[derive(Default)]
pub struct FakeRpc {
    pub mapper_calls: Mutex<Vec<(String, MapperTask)>>,
    pub reducer_calls: Mutex<Vec<(String, MapperTask, Vec<ReducerTask>)>>,
    down: Mutex<HashSet<String>>,
}

impl FakeRpc {
    pub fn take_down(&self, worker: &str) {
        self.down.lock().insert(format!("http://{worker}"));
    }

    /// Mappers cuya salida recibió el reducer, ordenados.
    pub fn notifications_for(&self, reducer_task: TaskId) -> Vec<TaskId> {
        let mut seen: Vec<TaskId> = self
            .reducer_calls
            .lock()
            .iter()
            .filter(|(_, _, reducers)| reducers.iter().any(|r| r.header.task_id == reducer_task))
            .map(|(_, mapper, _)| mapper.header.task_id)
            .collect();
        seen.sort_unstable();
        seen
    }

    fn check(&self, address: &str) -> Result<(), RpcError> {
        if self.down.lock().contains(address) {
            return Err(RpcError::Transport {
                address: address.to_string(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerRpc for FakeRpc {
    async fn run_mapper_task(&self, address: &str, task: &MapperTask) -> Result<(), RpcError> {
        self.check(address)?;
        self.mapper_calls
            .lock()
            .push((address.to_string(), task.clone()));
        Ok(())
    }

    async fn run_reducer_task(
        &self,
        address: &str,
        mapper: &MapperTask,
        reducers: &[ReducerTask],
    ) -> Result<(), RpcError> {
        self.check(address)?;
        self.reducer_calls
            .lock()
            .push((address.to_string(), mapper.clone(), reducers.to_vec()));
        Ok(())
    }
}

/// Devuelve siempre `blocks` bloques de 100 bytes.
pub struct FakeSplitter {
    pub blocks: u32,
}

impl InputSplitter for FakeSplitter {
    fn split(&self, path: &str, _hint: u32) -> common::Result<Vec<FileBlock>> {
        Ok((0..self.blocks)
            .map(|i| FileBlock {
                path: path.to_string(),
                offset: u64::from(i) * 100,
                length: 100,
            })
            .collect())
    }
}

pub fn job_config(mappers: u32, reducers: u32, max_attempts: u32) -> JobConfig {
    JobConfig {
        input_path: "/data/input/libro.txt".into(),
        output_path: "/data/output/libro".into(),
        mapper_amount: mappers,
        reducer_amount: reducers,
        max_attempt_count: max_attempts,
        program: "wordcount".into(),
        output_chunk_size: 100,
        output_replicas: 1,
    }
}

pub fn tracker_with(rpc: &Arc<FakeRpc>, blocks: u32) -> Arc<JobTracker> {
    Arc::new(JobTracker::new(
        MasterConfig::default(),
        Arc::clone(rpc) as Arc<dyn WorkerRpc>,
        Arc::new(FakeSplitter { blocks }),
    ))
}

pub fn add_workers(tracker: &JobTracker, names: &[&str]) {
    for name in names {
        tracker.heartbeat(&heartbeat_req(name, 0, 0));
    }
}

/// Admite el job y lo arranca sin pasar por el pool de admisión.
pub async fn started_job(tracker: &JobTracker, config: JobConfig) -> JobId {
    let id = tracker.register_job(config).unwrap();
    tracker.start_job(id).await;
    id
}

/// Despacha todo lo que haya en la cola, incluso lo que se reencole mientras tanto.
pub async fn drain_queue(tracker: &JobTracker) {
    while let Some(task) = tracker.queue.try_take() {
        tracker.dispatch_mapper(task).await;
    }
}

/// Reporte de éxito tal como lo manda el worker.
pub fn succeeded(task: &MapperTask) -> MapperTask {
    let mut report = task.clone();
    report.output_address = Some(format!("http://{}", task.header.worker));
    report
}
