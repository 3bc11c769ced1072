use std::sync::Arc;

use tokio::time::sleep;
use tracing::warn;

use crate::tracker::JobTracker;

/// Barrido periódico de liveness: cada `check_period` revisa heartbeats
/// y manda por el camino de caída a los workers vencidos.
pub async fn run_liveness_loop(tracker: Arc<JobTracker>) {
    let period = tracker.config.check_period;
    loop {
        sleep(period).await;
        let failed = tracker.check_workers().await;
        if failed > 0 {
            warn!("barrido de liveness: {} workers dados de baja", failed);
        }
    }
}

impl JobTracker {
    /// Una pasada. Devuelve cuántos workers se dieron por caídos.
    pub async fn check_workers(&self) -> usize {
        let mut failed = 0;
        for name in self.registry.expired() {
            let Some(info) = self.registry.remove_if_expired(&name) else {
                continue;
            };
            warn!(
                "worker {} sin heartbeat hace {:?}, marcándolo como caído",
                name,
                info.last_heartbeat.elapsed()
            );
            let batches = self.recover_worker(info);
            self.deliver(batches).await;
            failed += 1;
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use common::TaskStatus;

    use crate::testing::{add_workers, job_config, started_job, succeeded, tracker_with, FakeRpc};

    #[tokio::test]
    async fn silent_worker_is_swept_and_its_work_moves() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(1, 1, 3)).await;
        tracker.queue.try_take();
        add_workers(&tracker, &["w2"]);

        let job = tracker.snapshot(id).unwrap();
        tracker.mapper_task_succeed(succeeded(&job.mappers[0])).await;
        rpc.reducer_calls.lock().clear();

        tracker.registry.backdate("w1", Duration::from_secs(3600));
        assert_eq!(tracker.check_workers().await, 1);
        assert!(!tracker.registry.contains("w1"));

        let job = tracker.snapshot(id).unwrap();
        assert_eq!(job.reducers[0].header.worker, "w2");
        assert_eq!(job.reducers[0].header.status, TaskStatus::Pending);

        // el reducer migrado recibe otra vez la salida del mapper terminado
        let calls = rpc.reducer_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://w2");
    }

    #[tokio::test]
    async fn healthy_workers_are_left_alone() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        add_workers(&tracker, &["w1", "w2"]);

        assert_eq!(tracker.check_workers().await, 0);
        assert_eq!(tracker.registry.len(), 2);
    }
}
