// master/src/state.rs

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    JobConfig, JobId, JobInfo, JobStatus, MapperTask, ReducerTask, TaskHeader, TaskId,
    TaskStatus,
};
use parking_lot::Mutex;

/// Referencia liviana a una tarea: lo que guardan la cola y el registro de workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskRef {
    pub job_id: JobId,
    pub task_id: TaskId,
}

impl TaskRef {
    pub fn of(header: &TaskHeader) -> Self {
        Self {
            job_id: header.job_id,
            task_id: header.task_id,
        }
    }
}

/// Todas las mutaciones de status/attempt/worker de un job y de sus
/// tareas se hacen con este lock tomado.
pub type JobEntry = Arc<Mutex<JobState>>;

#[derive(Debug, Clone)]
pub struct JobState {
    pub id: JobId,
    pub config: JobConfig,
    status: JobStatus,
    pub mappers: Vec<MapperTask>,
    pub reducers: Vec<ReducerTask>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn new(id: JobId, config: JobConfig) -> Self {
        Self {
            id,
            config,
            status: JobStatus::Initializing,
            mappers: Vec::new(),
            reducers: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Transición monótona: desde un estado terminal no se sale.
    /// Devuelve si el estado cambió.
    pub fn set_status(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || self.status == next {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn mapper(&self, task_id: TaskId) -> Option<&MapperTask> {
        self.mappers.iter().find(|t| t.header.task_id == task_id)
    }

    pub fn mapper_mut(&mut self, task_id: TaskId) -> Option<&mut MapperTask> {
        self.mappers.iter_mut().find(|t| t.header.task_id == task_id)
    }

    pub fn reducer(&self, task_id: TaskId) -> Option<&ReducerTask> {
        self.reducers.iter().find(|t| t.header.task_id == task_id)
    }

    pub fn reducer_mut(&mut self, task_id: TaskId) -> Option<&mut ReducerTask> {
        self.reducers.iter_mut().find(|t| t.header.task_id == task_id)
    }

    fn header(&self, task_id: TaskId) -> Option<&TaskHeader> {
        self.mapper(task_id)
            .map(|t| &t.header)
            .or_else(|| self.reducer(task_id).map(|t| &t.header))
    }

    /// Un reporte es obsoleto si el job ya no está PENDING, si la tarea ya
    /// no está PENDING, o si el worker o el intento no son los actuales.
    pub fn is_stale(&self, report: &TaskHeader) -> bool {
        if self.status != JobStatus::Pending {
            return true;
        }
        match self.header(report.task_id) {
            Some(current) => {
                current.status != TaskStatus::Pending
                    || current.worker != report.worker
                    || current.attempt != report.attempt
            }
            None => true,
        }
    }

    pub fn succeeded_mappers(&self) -> Vec<MapperTask> {
        self.mappers
            .iter()
            .filter(|m| m.header.status == TaskStatus::Succeed)
            .cloned()
            .collect()
    }

    pub fn pending_reducers(&self) -> impl Iterator<Item = &ReducerTask> {
        self.reducers
            .iter()
            .filter(|r| r.header.status == TaskStatus::Pending)
    }

    fn failed_task_count(&self) -> usize {
        self.mappers
            .iter()
            .map(|m| m.header.status)
            .chain(self.reducers.iter().map(|r| r.header.status))
            .filter(|s| *s == TaskStatus::Failed)
            .count()
    }

    /// Agregación del estado del job a partir de sus tareas:
    /// - cualquier tarea FAILED definitiva -> job FAILED
    /// - todos los reducers SUCCEED -> job SUCCEED
    pub fn refresh_status(&mut self) -> Option<JobStatus> {
        if self.status != JobStatus::Pending {
            return None;
        }
        if self.failed_task_count() > 0 {
            self.set_status(JobStatus::Failed);
            return Some(JobStatus::Failed);
        }
        if !self.reducers.is_empty()
            && self
                .reducers
                .iter()
                .all(|r| r.header.status == TaskStatus::Succeed)
        {
            self.set_status(JobStatus::Succeed);
            return Some(JobStatus::Succeed);
        }
        None
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "Job {} [{}] program={} input={} output={} mappers={} reducers={} created={}",
            self.id,
            self.status,
            self.config.program,
            self.config.input_path,
            self.config.output_path,
            self.mappers.len(),
            self.reducers.len(),
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
        let mut rows: Vec<(&str, &TaskHeader)> = self
            .mappers
            .iter()
            .map(|m| ("MAPPER ", &m.header))
            .chain(self.reducers.iter().map(|r| ("REDUCER", &r.header)))
            .collect();
        rows.sort_by_key(|(_, h)| h.task_id);

        for (kind, h) in rows {
            let _ = write!(
                out,
                "\n    {} task={} worker={} attempt={} status={}",
                kind, h.task_id, h.worker, h.attempt, h.status
            );
        }
        out
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            status: self.status,
            config: self.config.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
            mapper_tasks: self.mappers.len() as u32,
            mappers_succeeded: self
                .mappers
                .iter()
                .filter(|m| m.header.status == TaskStatus::Succeed)
                .count() as u32,
            reducer_tasks: self.reducers.len() as u32,
            reducers_succeeded: self
                .reducers
                .iter()
                .filter(|r| r.header.status == TaskStatus::Succeed)
                .count() as u32,
            failed_tasks: self.failed_task_count() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FileBlock;

    fn sample_config() -> JobConfig {
        JobConfig {
            input_path: "/data/input/a.txt".into(),
            output_path: "/data/output/a".into(),
            mapper_amount: 2,
            reducer_amount: 1,
            max_attempt_count: 3,
            program: "wordcount".into(),
            output_chunk_size: 100,
            output_replicas: 1,
        }
    }

    fn job_with_tasks() -> JobState {
        let mut job = JobState::new(1, sample_config());
        for i in 0..2 {
            job.mappers.push(MapperTask {
                header: TaskHeader::new(1, i, "w1".into()),
                block: FileBlock {
                    path: "/data/input/a.txt".into(),
                    offset: 0,
                    length: 10,
                },
                reducer_amount: 1,
                program: "wordcount".into(),
                output_address: None,
            });
        }
        job.reducers.push(ReducerTask {
            header: TaskHeader::new(1, 2, "w2".into()),
            partition: 0,
            mapper_amount: 2,
            output_path: "/data/output/a".into(),
            output_chunk_size: 100,
            output_replicas: 1,
            program: "wordcount".into(),
        });
        job.set_status(JobStatus::Pending);
        job
    }

    #[test]
    fn matching_report_is_accepted() {
        let job = job_with_tasks();
        let report = job.mappers[0].header.clone();
        assert!(!job.is_stale(&report));
    }

    #[test]
    fn report_with_other_attempt_is_stale() {
        let mut job = job_with_tasks();
        let mut report = job.mappers[0].header.clone();
        job.mappers[0].header.attempt = 1;
        assert!(job.is_stale(&report));

        report.attempt = 1;
        assert!(!job.is_stale(&report));
    }

    #[test]
    fn report_from_other_worker_or_finished_task_is_stale() {
        let mut job = job_with_tasks();
        let mut report = job.mappers[1].header.clone();
        report.worker = "w9".into();
        assert!(job.is_stale(&report));

        let report = job.mappers[0].header.clone();
        job.mappers[0].header.status = TaskStatus::Succeed;
        assert!(job.is_stale(&report));
    }

    #[test]
    fn any_report_is_stale_once_job_is_not_pending() {
        let mut job = job_with_tasks();
        let report = job.reducers[0].header.clone();
        job.set_status(JobStatus::Failed);
        assert!(job.is_stale(&report));

        let fresh = JobState::new(2, sample_config());
        assert!(fresh.is_stale(&TaskHeader::new(2, 0, "w1".into())));
    }

    #[test]
    fn status_never_leaves_terminal_state() {
        let mut job = job_with_tasks();
        assert!(job.set_status(JobStatus::Succeed));
        assert!(job.finished_at.is_some());
        assert!(!job.set_status(JobStatus::Pending));
        assert!(!job.set_status(JobStatus::Failed));
        assert_eq!(job.status(), JobStatus::Succeed);
    }

    #[test]
    fn job_succeeds_only_when_every_reducer_succeeds() {
        let mut job = job_with_tasks();
        job.mappers[0].header.status = TaskStatus::Succeed;
        job.mappers[1].header.status = TaskStatus::Succeed;
        assert_eq!(job.refresh_status(), None);

        job.reducers[0].header.status = TaskStatus::Succeed;
        assert_eq!(job.refresh_status(), Some(JobStatus::Succeed));
    }

    #[test]
    fn permanent_task_failure_fails_job() {
        let mut job = job_with_tasks();
        job.mappers[1].header.status = TaskStatus::Failed;
        assert_eq!(job.refresh_status(), Some(JobStatus::Failed));
        assert_eq!(job.info().failed_tasks, 1);
    }

    #[test]
    fn describe_lists_tasks_by_id() {
        let job = job_with_tasks();
        let text = job.describe();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("Job 1 [PENDING] program=wordcount"));
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("MAPPER  task=0 worker=w1 attempt=0 status=PENDING"));
        assert!(lines[3].contains("REDUCER task=2 worker=w2"));
    }
}
