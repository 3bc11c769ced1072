use std::sync::Arc;

use common::{JobStatus, MapperTask, TaskStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::TaskRef;
use crate::tracker::JobTracker;

/// Lanza `n` despachadores que sacan mappers de la cola y los mandan a
/// su worker asignado, uno a la vez cada uno.
pub fn spawn_dispatchers(tracker: &Arc<JobTracker>, n: usize) -> Vec<JoinHandle<()>> {
    (0..n.max(1))
        .map(|i| {
            let tracker = Arc::clone(tracker);
            tokio::spawn(async move {
                info!("despachador {} listo", i);
                loop {
                    let task = tracker.queue.take().await;
                    tracker.dispatch_mapper(task).await;
                }
            })
        })
        .collect()
}

impl JobTracker {
    /// Copia del mapper si todavía vale la pena despacharlo.
    fn dispatchable_mapper(&self, task: TaskRef) -> Option<MapperTask> {
        let entry = self.job(task.job_id)?;
        let job = entry.lock();
        if job.status() != JobStatus::Pending {
            return None;
        }
        job.mapper(task.task_id)
            .filter(|m| m.header.status == TaskStatus::Pending)
            .cloned()
    }

    /// Un despacho. Cualquier error de la llamada se trata como caída del
    /// worker; el despacho en sí no se reintenta.
    pub async fn dispatch_mapper(&self, task: TaskRef) {
        let Some(mapper) = self.dispatchable_mapper(task) else {
            debug!(
                "mapper {} del job {} ya no está pendiente, se saltea",
                task.task_id, task.job_id
            );
            return;
        };
        let worker = mapper.header.worker.clone();

        let Some(address) = self.registry.address_of(&worker) else {
            warn!(
                "mapper {} del job {} asignado a {}, que ya no está registrado",
                task.task_id, task.job_id, worker
            );
            self.recover_orphan_mapper(task, &worker);
            return;
        };

        debug!(
            "despachando mapper {} del job {} a {} (attempt={})",
            task.task_id, task.job_id, worker, mapper.header.attempt
        );
        if let Err(e) = self.rpc.run_mapper_task(&address, &mapper).await {
            let kind = if e.is_transport() { "transporte" } else { "rechazo" };
            warn!(
                "run mapper en {} falló ({}), se da al worker por caído: {}",
                worker, kind, e
            );
            let batches = self.handle_worker_failure(&worker);
            self.deliver(batches).await;
        }
    }
}
