use std::collections::{BTreeMap, HashSet};

use common::{JobId, JobStatus, ReducerTask, TaskId, TaskKind, TaskStatus, WorkerName};
use tracing::{error, info, warn};

use crate::registry::WorkerInfo;
use crate::state::{JobState, TaskRef};
use crate::tracker::{batches_for, JobTracker, ReducerBatch};

fn group_by_job(tasks: &HashSet<TaskRef>) -> BTreeMap<JobId, Vec<TaskId>> {
    let mut out: BTreeMap<JobId, Vec<TaskId>> = BTreeMap::new();
    for t in tasks {
        out.entry(t.job_id).or_default().push(t.task_id);
    }
    for ids in out.values_mut() {
        ids.sort_unstable();
    }
    out
}

impl JobTracker {
    /// Worker caído (por error de transporte en un despacho o envío).
    /// Si ya lo sacó otro llamador no hay nada que hacer.
    pub fn handle_worker_failure(&self, name: &str) -> Vec<ReducerBatch> {
        match self.registry.remove(name) {
            Some(info) => self.recover_worker(info),
            None => Vec::new(),
        }
    }

    /// Migra lo que tenía pendiente un worker que ya salió del registro.
    ///
    /// Se elige un único destino para todos sus mappers y otro para todos
    /// sus reducers. Los mappers vuelven a la cola; a los reducers se les
    /// reenvían las salidas de mappers ya SUCCEED. Si no hay destino para
    /// un tipo, las tareas de ese tipo quedan FAILED. La migración no
    /// cuenta como intento.
    pub(crate) fn recover_worker(&self, info: WorkerInfo) -> Vec<ReducerBatch> {
        warn!(
            "worker {} caído: {} mappers y {} reducers pendientes",
            info.name,
            info.pending_mappers.len(),
            info.pending_reducers.len()
        );
        let mapper_dest = if info.pending_mappers.is_empty() {
            None
        } else {
            self.registry.select(TaskKind::Mapper)
        };
        let reducer_dest = if info.pending_reducers.is_empty() {
            None
        } else {
            self.registry.select(TaskKind::Reducer)
        };
        self.recover_tasks(&info, mapper_dest, reducer_dest)
    }

    /// Aplica la recuperación con los destinos ya elegidos, por tipo.
    pub(crate) fn recover_tasks(
        &self,
        info: &WorkerInfo,
        mapper_dest: Option<WorkerName>,
        reducer_dest: Option<WorkerName>,
    ) -> Vec<ReducerBatch> {
        for (job_id, tasks) in &group_by_job(&info.pending_mappers) {
            match &mapper_dest {
                Some(dest) => self.migrate_mappers(*job_id, tasks, &info.name, dest),
                None => self.fail_tasks(*job_id, TaskKind::Mapper, tasks, &info.name),
            }
        }

        let mut batches = Vec::new();
        for (job_id, tasks) in &group_by_job(&info.pending_reducers) {
            match &reducer_dest {
                Some(dest) => {
                    batches.extend(self.migrate_reducers(*job_id, tasks, &info.name, dest))
                }
                None => self.fail_tasks(*job_id, TaskKind::Reducer, tasks, &info.name),
            }
        }
        batches
    }

    /// Un mapper encolado cuyo worker ya no está registrado.
    pub(crate) fn recover_orphan_mapper(&self, task: TaskRef, from: &str) {
        match self.registry.select(TaskKind::Mapper) {
            Some(dest) => self.migrate_mappers(task.job_id, &[task.task_id], from, &dest),
            None => self.fail_tasks(task.job_id, TaskKind::Mapper, &[task.task_id], from),
        }
    }

    /// Un envío para un worker que ya no está registrado. Los reducers
    /// del lote que sigan anotados en ese worker se mueven como en una
    /// caída; los que ya se movieron recibieron las salidas en su destino.
    pub(crate) fn recover_orphan_reducers(&self, batch: &ReducerBatch) -> Vec<ReducerBatch> {
        let mut tasks: Vec<TaskId> = batch.reducers.iter().map(|r| r.header.task_id).collect();
        tasks.sort_unstable();
        let job_id = batch.mapper.header.job_id;
        match self.registry.select(TaskKind::Reducer) {
            Some(dest) => self.migrate_reducers(job_id, &tasks, &batch.worker, &dest),
            None => {
                self.fail_tasks(job_id, TaskKind::Reducer, &tasks, &batch.worker);
                Vec::new()
            }
        }
    }

    fn migrate_mappers(&self, job_id: JobId, tasks: &[TaskId], from: &str, dest: &str) {
        let Some(entry) = self.job(job_id) else {
            return;
        };
        let mut job = entry.lock();
        if job.status() != JobStatus::Pending {
            return;
        }
        let mut lost = false;
        for &task_id in tasks {
            let Some(task) = job.mapper_mut(task_id) else {
                continue;
            };
            // otro camino ya lo movió o terminó
            if task.header.status != TaskStatus::Pending || task.header.worker != from {
                continue;
            }
            let task_ref = TaskRef::of(&task.header);
            let Some(worker) = self.registry.assign_or_place(dest, TaskKind::Mapper, task_ref) else {
                task.header.status = TaskStatus::Failed;
                error!("mapper {} del job {} FAILED: no quedan workers", task_id, job_id);
                lost = true;
                continue;
            };
            task.header.worker = worker.clone();
            self.queue.push(task_ref);
            info!("mapper {} del job {}: {} -> {}", task_id, job_id, from, worker);
        }
        if lost {
            self.refresh_job(&mut job);
        }
    }

    fn migrate_reducers(
        &self,
        job_id: JobId,
        tasks: &[TaskId],
        from: &str,
        dest: &str,
    ) -> Vec<ReducerBatch> {
        let Some(entry) = self.job(job_id) else {
            return Vec::new();
        };
        let mut job = entry.lock();
        if job.status() != JobStatus::Pending {
            return Vec::new();
        }

        let mut moved = Vec::new();
        let mut lost = false;
        for &task_id in tasks {
            let Some(task) = job.reducer_mut(task_id) else {
                continue;
            };
            if task.header.status != TaskStatus::Pending || task.header.worker != from {
                continue;
            }
            let task_ref = TaskRef::of(&task.header);
            // si `dest` se cayó desde que se eligió, la tarea va a otro worker
            let Some(worker) = self.registry.assign_or_place(dest, TaskKind::Reducer, task_ref) else {
                task.header.status = TaskStatus::Failed;
                error!("reducer {} del job {} FAILED: no quedan workers", task_id, job_id);
                lost = true;
                continue;
            };
            task.header.worker = worker.clone();
            info!("reducer {} del job {}: {} -> {}", task_id, job_id, from, worker);
            moved.push(task.clone());
        }
        if lost {
            self.refresh_job(&mut job);
        }
        if moved.is_empty() || job.status() != JobStatus::Pending {
            return Vec::new();
        }
        resend_known_outputs(&job, &moved)
    }

    fn fail_tasks(&self, job_id: JobId, kind: TaskKind, tasks: &[TaskId], from: &str) {
        let Some(entry) = self.job(job_id) else {
            return;
        };
        let mut job = entry.lock();
        if job.status() != JobStatus::Pending {
            return;
        }
        for &task_id in tasks {
            let header = match kind {
                TaskKind::Mapper => job.mapper_mut(task_id).map(|t| &mut t.header),
                TaskKind::Reducer => job.reducer_mut(task_id).map(|t| &mut t.header),
            };
            let Some(header) = header else {
                continue;
            };
            if header.status != TaskStatus::Pending || header.worker != from {
                continue;
            }
            header.status = TaskStatus::Failed;
            error!(
                "{} {} del job {} FAILED: no hay worker que reemplace a {}",
                kind, task_id, job_id, from
            );
        }
        self.refresh_job(&mut job);
    }
}

/// Cada salida de mapper ya SUCCEED, agrupada por el worker de los reducers movidos.
fn resend_known_outputs(job: &JobState, moved: &[ReducerTask]) -> Vec<ReducerBatch> {
    job.succeeded_mappers()
        .iter()
        .flat_map(|mapper| batches_for(mapper, moved))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{
        add_workers, drain_queue, job_config, started_job, succeeded, tracker_with, FakeRpc,
    };

    #[tokio::test]
    async fn dead_worker_tasks_move_to_a_live_one() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 2);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(2, 2, 3)).await;
        drain_queue(&tracker).await;

        let job = tracker.snapshot(id).unwrap();
        tracker.mapper_task_succeed(succeeded(&job.mappers[0])).await;
        add_workers(&tracker, &["w2"]);

        let batches = tracker.handle_worker_failure("w1");
        assert!(!tracker.registry.contains("w1"));

        let job = tracker.snapshot(id).unwrap();
        assert_eq!(job.mappers[0].header.worker, "w1");
        assert_eq!(job.mappers[1].header.worker, "w2");
        assert_eq!(job.mappers[1].header.attempt, 0);
        for r in &job.reducers {
            assert_eq!(r.header.worker, "w2");
            assert_eq!(r.header.attempt, 0);
        }
        assert_eq!(tracker.queue.try_take().map(|t| t.task_id), Some(1));
        assert!(tracker.queue.is_empty());

        // la salida ya conocida del mapper 0 se reenvía a los dos reducers juntos
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].worker, "w2");
        assert_eq!(batches[0].mapper.header.task_id, 0);
        assert_eq!(batches[0].reducers.len(), 2);

        let w2 = tracker.registry.get("w2").unwrap();
        assert_eq!(w2.pending_mappers.len(), 1);
        assert_eq!(w2.pending_reducers.len(), 2);
    }

    #[tokio::test]
    async fn dead_worker_without_replacement_fails_its_tasks() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 2);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(2, 1, 3)).await;

        let batches = tracker.handle_worker_failure("w1");
        assert!(batches.is_empty());

        let job = tracker.snapshot(id).unwrap();
        assert!(job
            .mappers
            .iter()
            .all(|m| m.header.status == TaskStatus::Failed));
        assert_eq!(job.reducers[0].header.status, TaskStatus::Failed);
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn expired_replacement_does_not_count() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        add_workers(&tracker, &["w1", "w2"]);
        let id = started_job(&tracker, job_config(1, 1, 3)).await;

        let job = tracker.snapshot(id).unwrap();
        let holder = job.mappers[0].header.worker.clone();
        let other = if holder == "w1" { "w2" } else { "w1" };
        tracker
            .registry
            .backdate(other, std::time::Duration::from_secs(3600));

        tracker.handle_worker_failure(&holder);
        let job = tracker.snapshot(id).unwrap();
        assert_eq!(job.mappers[0].header.status, TaskStatus::Failed);
    }

    #[test]
    fn unknown_worker_is_a_no_op() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        assert!(tracker.handle_worker_failure("fantasma").is_empty());
    }

    #[tokio::test]
    async fn orphan_mapper_is_moved() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(1, 1, 3)).await;
        let task = tracker.queue.try_take().unwrap();

        add_workers(&tracker, &["w2"]);
        tracker.registry.remove("w1");
        tracker.recover_orphan_mapper(task, "w1");

        let job = tracker.snapshot(id).unwrap();
        assert_eq!(job.mappers[0].header.worker, "w2");
        assert_eq!(tracker.queue.try_take(), Some(task));
    }

    #[tokio::test]
    async fn reducer_on_vanished_worker_follows_the_next_output() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(1, 1, 3)).await;
        tracker.queue.try_take();
        add_workers(&tracker, &["w2"]);

        // w1 sale del registro sin que nadie haya migrado lo suyo
        tracker.registry.remove("w1");
        let mapper = tracker.snapshot(id).unwrap().mappers[0].clone();
        tracker.mapper_task_succeed(succeeded(&mapper)).await;
        assert_eq!(tracker.check_workers().await, 0);

        let reducer = tracker.snapshot(id).unwrap().reducers[0].clone();
        assert_eq!(reducer.header.worker, "w2");
        assert_eq!(reducer.header.status, TaskStatus::Pending);
        assert_eq!(reducer.header.attempt, 0);
        assert_eq!(rpc.notifications_for(reducer.header.task_id), vec![0]);
        assert_eq!(rpc.reducer_calls.lock()[0].0, "http://w2");
        assert!(tracker
            .registry
            .get("w2")
            .unwrap()
            .pending_reducers
            .contains(&TaskRef::of(&reducer.header)));
    }

    #[tokio::test]
    async fn destination_gone_before_assignment_picks_another() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 1);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(1, 1, 3)).await;
        tracker.queue.try_take();
        let mapper = tracker.snapshot(id).unwrap().mappers[0].clone();
        tracker.mapper_task_succeed(succeeded(&mapper)).await;
        add_workers(&tracker, &["w2"]);

        // "w9" fue elegido como destino y se cayó antes de recibir nada
        let info = tracker.registry.remove("w1").unwrap();
        let batches = tracker.recover_tasks(&info, None, Some("w9".into()));

        let reducer = tracker.snapshot(id).unwrap().reducers[0].clone();
        assert_eq!(reducer.header.worker, "w2");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].worker, "w2");
        assert_eq!(batches[0].mapper.header.task_id, 0);
    }

    #[tokio::test]
    async fn recovery_is_decided_per_task_kind() {
        let rpc = Arc::new(FakeRpc::default());
        let tracker = tracker_with(&rpc, 2);
        add_workers(&tracker, &["w1"]);
        let id = started_job(&tracker, job_config(2, 1, 3)).await;
        add_workers(&tracker, &["w2"]);

        // hay destino para mappers pero no para reducers
        let info = tracker.registry.remove("w1").unwrap();
        let batches = tracker.recover_tasks(&info, Some("w2".into()), None);
        assert!(batches.is_empty());

        let job = tracker.snapshot(id).unwrap();
        for m in &job.mappers {
            assert_eq!(m.header.worker, "w2");
            assert_eq!(m.header.status, TaskStatus::Pending);
            assert_eq!(m.header.attempt, 0);
        }
        assert_eq!(job.reducers[0].header.status, TaskStatus::Failed);
        assert_eq!(job.status(), JobStatus::Failed);
    }
}
