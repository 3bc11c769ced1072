// master/src/tracker.rs

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{
    FileBlock, FileServerInfo, HeartbeatRequest, InputSplitter, JobConfig, JobId, JobInfo,
    JobStatus, MapperTask, MrError, ReducerTask, TaskHeader, TaskId, TaskKind, TaskStatus,
    WorkerMetrics, WorkerName,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::MasterConfig;
use crate::queue::MapperQueue;
use crate::registry::WorkerRegistry;
use crate::rpc::WorkerRpc;
use crate::state::{JobEntry, JobState, TaskRef};

/// Un "run reducer" por enviar: la salida de un mapper para los reducers
/// que viven en un mismo worker.
#[derive(Debug, Clone)]
pub struct ReducerBatch {
    pub worker: WorkerName,
    pub mapper: MapperTask,
    pub reducers: Vec<ReducerTask>,
}

pub(crate) fn batches_for<'a>(
    mapper: &MapperTask,
    reducers: impl IntoIterator<Item = &'a ReducerTask>,
) -> Vec<ReducerBatch> {
    let mut by_worker: BTreeMap<WorkerName, Vec<ReducerTask>> = BTreeMap::new();
    for r in reducers {
        by_worker
            .entry(r.header.worker.clone())
            .or_default()
            .push(r.clone());
    }
    by_worker
        .into_iter()
        .map(|(worker, reducers)| ReducerBatch {
            worker,
            mapper: mapper.clone(),
            reducers,
        })
        .collect()
}

/// El coordinador: tabla de jobs, registro de workers y cola de mappers.
///
/// Orden de locks: primero el del job, después el registro. Ningún lock
/// se mantiene tomado a través de un `.await`; las transiciones de estado
/// son síncronas y devuelven los envíos a reducers que hay que hacer,
/// que después manda [`JobTracker::deliver`].
pub struct JobTracker {
    pub(crate) config: MasterConfig,
    jobs: DashMap<JobId, JobEntry>,
    pub(crate) registry: WorkerRegistry,
    pub(crate) queue: MapperQueue,
    pub(crate) rpc: Arc<dyn WorkerRpc>,
    splitter: Arc<dyn InputSplitter>,
    admission: Arc<Semaphore>,
    next_job_id: AtomicU64,
}

impl JobTracker {
    pub fn new(
        config: MasterConfig,
        rpc: Arc<dyn WorkerRpc>,
        splitter: Arc<dyn InputSplitter>,
    ) -> Self {
        Self {
            registry: WorkerRegistry::new(config.heartbeat_timeout),
            queue: MapperQueue::new(),
            admission: Arc::new(Semaphore::new(config.admission_threads.max(1))),
            jobs: DashMap::new(),
            next_job_id: AtomicU64::new(1),
            rpc,
            splitter,
            config,
        }
    }

    pub(crate) fn job(&self, id: JobId) -> Option<JobEntry> {
        self.jobs.get(&id).map(|e| Arc::clone(e.value()))
    }

    /* ---------------- admisión ---------------- */

    /// Valida y da de alta el job en INITIALIZING. Un config inválido no
    /// llega a crear nada.
    pub fn register_job(&self, config: JobConfig) -> common::Result<JobId> {
        config.validate()?;
        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        info!(
            "job {} admitido: program={} input={} reducers={}",
            id, config.program, config.input_path, config.reducer_amount
        );
        self.jobs
            .insert(id, Arc::new(Mutex::new(JobState::new(id, config))));
        Ok(id)
    }

    /// Admite el job y devuelve enseguida; el split y la generación de
    /// tareas corren en segundo plano ocupando un lugar del pool de admisión.
    pub fn submit_job(self: &Arc<Self>, config: JobConfig) -> common::Result<JobId> {
        let id = self.register_job(config)?;
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&tracker.admission).acquire_owned().await else {
                return;
            };
            tracker.start_job(id).await;
        });
        Ok(id)
    }

    pub async fn start_job(&self, job_id: JobId) {
        let Some(entry) = self.job(job_id) else {
            return;
        };
        let (path, hint) = {
            let job = entry.lock();
            (job.config.input_path.clone(), job.config.mapper_amount)
        };

        let result = match self.split_input(path, hint).await {
            Ok(blocks) => self.generate_tasks(&entry, blocks),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!("job {} FAILED al arrancar: {}", job_id, e);
            entry.lock().set_status(JobStatus::Failed);
        }
    }

    async fn split_input(&self, path: String, hint: u32) -> common::Result<Vec<FileBlock>> {
        let splitter = Arc::clone(&self.splitter);
        let input = path.clone();
        let blocks = tokio::task::spawn_blocking(move || splitter.split(&input, hint))
            .await
            .map_err(|e| MrError::Input(format!("split de {path} abortado: {e}")))??;

        if blocks.is_empty() {
            return Err(MrError::Input(format!("{path} no tiene datos")));
        }
        Ok(blocks)
    }

    /// Arma un mapper por bloque y un reducer por partición. Los workers se
    /// colocan todos antes de tocar el job: si falta alguno, se sueltan las
    /// asignaciones hechas, el job queda sin tareas y nada entra a la cola.
    fn generate_tasks(&self, entry: &JobEntry, blocks: Vec<FileBlock>) -> common::Result<()> {
        let mut job = entry.lock();
        if job.status() != JobStatus::Initializing {
            return Ok(());
        }
        let job_id = job.id;
        let mapper_amount = blocks.len() as u32;
        let reducer_amount = job.config.reducer_amount;

        let slots: Vec<(TaskKind, TaskId)> = (0..mapper_amount)
            .map(|i| (TaskKind::Mapper, i))
            .chain((0..reducer_amount).map(|p| (TaskKind::Reducer, mapper_amount + p)))
            .collect();
        let mut workers = self.place_all(job_id, &slots)?.into_iter();

        let mut mappers = Vec::with_capacity(blocks.len());
        for (i, (block, worker)) in blocks.into_iter().zip(workers.by_ref()).enumerate() {
            mappers.push(MapperTask {
                header: TaskHeader::new(job_id, i as TaskId, worker),
                block,
                reducer_amount,
                program: job.config.program.clone(),
                output_address: None,
            });
        }

        let mut reducers = Vec::with_capacity(reducer_amount as usize);
        for (partition, worker) in (0..reducer_amount).zip(workers) {
            reducers.push(ReducerTask {
                header: TaskHeader::new(job_id, mapper_amount + partition, worker),
                partition,
                mapper_amount,
                output_path: job.config.output_path.clone(),
                output_chunk_size: job.config.output_chunk_size,
                output_replicas: job.config.output_replicas,
                program: job.config.program.clone(),
            });
        }

        job.mappers = mappers;
        job.reducers = reducers;
        job.set_status(JobStatus::Pending);
        for m in &job.mappers {
            self.queue.push(TaskRef::of(&m.header));
        }

        info!(
            "job {} PENDING: {} mappers, {} reducers",
            job_id,
            job.mappers.len(),
            job.reducers.len()
        );
        Ok(())
    }

    /// Coloca cada tarea en un worker vivo, en orden. Todo o nada.
    fn place_all(&self, job_id: JobId, slots: &[(TaskKind, TaskId)]) -> common::Result<Vec<WorkerName>> {
        let mut placed: Vec<WorkerName> = Vec::with_capacity(slots.len());
        for &(kind, task_id) in slots {
            match self.registry.place(kind, TaskRef { job_id, task_id }) {
                Some(worker) => placed.push(worker),
                None => {
                    for (worker, &(kind, task_id)) in placed.iter().zip(slots) {
                        self.registry.release(worker, kind, TaskRef { job_id, task_id });
                    }
                    return Err(MrError::NoWorkerAvailable(format!(
                        "{kind} {task_id} del job {job_id}"
                    )));
                }
            }
        }
        Ok(placed)
    }

    /* ---------------- reportes de workers ---------------- */

    /// Marca el mapper SUCCEED y devuelve un envío por worker de reducers
    /// pendientes con la salida de este mapper.
    pub fn record_mapper_succeeded(&self, report: &MapperTask) -> Vec<ReducerBatch> {
        let Some(entry) = self.job(report.header.job_id) else {
            debug!("reporte de mapper para job desconocido {}", report.header.job_id);
            return Vec::new();
        };
        let mut job = entry.lock();
        if job.is_stale(&report.header) {
            debug!(
                "descartando éxito obsoleto de mapper {} (job={} worker={} attempt={})",
                report.header.task_id, report.header.job_id, report.header.worker, report.header.attempt
            );
            return Vec::new();
        }
        let Some(task) = job.mapper_mut(report.header.task_id) else {
            return Vec::new();
        };
        task.header.status = TaskStatus::Succeed;
        task.output_address = report.output_address.clone();
        let mapper = task.clone();

        self.registry
            .release(&mapper.header.worker, TaskKind::Mapper, TaskRef::of(&mapper.header));
        info!(
            "mapper {} del job {} SUCCEED en {}",
            mapper.header.task_id, mapper.header.job_id, mapper.header.worker
        );
        batches_for(&mapper, job.pending_reducers())
    }

    pub async fn mapper_task_succeed(&self, report: MapperTask) {
        let batches = self.record_mapper_succeeded(&report);
        self.deliver(batches).await;
    }

    pub fn mapper_task_failed(&self, report: &MapperTask) {
        let Some(entry) = self.job(report.header.job_id) else {
            return;
        };
        let mut job = entry.lock();
        if job.is_stale(&report.header) {
            debug!(
                "descartando falla obsoleta de mapper {} (job={} attempt={})",
                report.header.task_id, report.header.job_id, report.header.attempt
            );
            return;
        }
        warn!(
            "mapper {} del job {} falló en {} (attempt={})",
            report.header.task_id, report.header.job_id, report.header.worker, report.header.attempt
        );
        self.retry_mapper(&mut job, report.header.task_id);
    }

    pub fn reducer_task_succeed(&self, report: &ReducerTask) {
        let Some(entry) = self.job(report.header.job_id) else {
            return;
        };
        let mut job = entry.lock();
        if job.is_stale(&report.header) {
            debug!(
                "descartando éxito obsoleto de reducer {} (job={} attempt={})",
                report.header.task_id, report.header.job_id, report.header.attempt
            );
            return;
        }
        let Some(task) = job.reducer_mut(report.header.task_id) else {
            return;
        };
        task.header.status = TaskStatus::Succeed;
        let task_ref = TaskRef::of(&task.header);
        self.registry
            .release(&report.header.worker, TaskKind::Reducer, task_ref);
        info!(
            "reducer {} del job {} SUCCEED en {}",
            report.header.task_id, report.header.job_id, report.header.worker
        );
        self.refresh_job(&mut job);
    }

    pub fn record_reducer_failed(&self, report: &ReducerTask) -> Vec<ReducerBatch> {
        let Some(entry) = self.job(report.header.job_id) else {
            return Vec::new();
        };
        let mut job = entry.lock();
        if job.is_stale(&report.header) {
            debug!(
                "descartando falla obsoleta de reducer {} (job={} attempt={})",
                report.header.task_id, report.header.job_id, report.header.attempt
            );
            return Vec::new();
        }
        warn!(
            "reducer {} del job {} falló en {} (attempt={})",
            report.header.task_id, report.header.job_id, report.header.worker, report.header.attempt
        );
        self.retry_reducer(&mut job, report.header.task_id)
    }

    pub async fn reducer_task_failed(&self, report: ReducerTask) {
        let batches = self.record_reducer_failed(&report);
        self.deliver(batches).await;
    }

    /// El reducer no pudo leer la salida de un mapper que figuraba SUCCEED:
    /// ese mapper vuelve a PENDING y pasa por el camino de reintento.
    ///
    /// Todo ocurre con el lock del job tomado, así que de dos reportes
    /// concurrentes sobre el mismo mapper sólo uno dispara el reintento.
    /// Devuelve si lo disparó.
    pub fn reducer_task_failed_on_mapper(&self, reducer: &ReducerTask, mapper: &MapperTask) -> bool {
        if reducer.header.job_id != mapper.header.job_id {
            return false;
        }
        let Some(entry) = self.job(reducer.header.job_id) else {
            return false;
        };
        let mut job = entry.lock();
        if job.is_stale(&reducer.header) {
            debug!(
                "descartando reporte obsoleto del reducer {} sobre mapper {}",
                reducer.header.task_id, mapper.header.task_id
            );
            return false;
        }
        let Some(current) = job.mapper_mut(mapper.header.task_id) else {
            return false;
        };
        if current.header.status != TaskStatus::Succeed
            || current.header.worker != mapper.header.worker
            || current.header.attempt != mapper.header.attempt
        {
            debug!(
                "mapper {} del job {} ya se está rehaciendo",
                mapper.header.task_id, mapper.header.job_id
            );
            return false;
        }
        current.header.status = TaskStatus::Pending;
        warn!(
            "reducer {} no pudo leer la salida del mapper {} (job={} worker={}), se rehace el mapper",
            reducer.header.task_id, mapper.header.task_id, mapper.header.job_id, mapper.header.worker
        );
        self.retry_mapper(&mut job, mapper.header.task_id);
        true
    }

    /* ---------------- reintentos ---------------- */

    /// FAILED definitivo si ya agotó intentos o no hay worker para
    /// reintentar; si no, otro worker, attempt + 1, PENDING y a la cola.
    pub(crate) fn retry_mapper(&self, job: &mut JobState, task_id: TaskId) {
        let max = job.config.max_attempt_count;
        let Some(task) = job.mapper_mut(task_id) else {
            return;
        };
        let task_ref = TaskRef::of(&task.header);
        self.registry
            .release(&task.header.worker, TaskKind::Mapper, task_ref);

        if task.header.attempt >= max {
            task.header.status = TaskStatus::Failed;
            error!(
                "mapper {} del job {} agotó sus {} intentos",
                task_id, task_ref.job_id, max
            );
        } else if let Some(worker) = self.registry.place(TaskKind::Mapper, task_ref) {
            task.header.attempt += 1;
            task.header.status = TaskStatus::Pending;
            task.header.worker = worker.clone();
            task.output_address = None;
            self.queue.push(task_ref);
            warn!(
                "reintentando mapper {} del job {} en {} (attempt={})",
                task_id, task_ref.job_id, worker, task.header.attempt
            );
        } else {
            task.header.status = TaskStatus::Failed;
            error!(
                "mapper {} del job {} sin workers para reintentar",
                task_id, task_ref.job_id
            );
        }
        self.refresh_job(job);
    }

    /// Igual que [`retry_mapper`](Self::retry_mapper), pero el reducer no
    /// pasa por la cola: se le reenvían al worker nuevo todas las salidas
    /// de mappers que ya están SUCCEED.
    pub(crate) fn retry_reducer(&self, job: &mut JobState, task_id: TaskId) -> Vec<ReducerBatch> {
        let max = job.config.max_attempt_count;
        let Some(task) = job.reducer_mut(task_id) else {
            return Vec::new();
        };
        let task_ref = TaskRef::of(&task.header);
        self.registry
            .release(&task.header.worker, TaskKind::Reducer, task_ref);

        let moved = if task.header.attempt >= max {
            task.header.status = TaskStatus::Failed;
            error!(
                "reducer {} del job {} agotó sus {} intentos",
                task_id, task_ref.job_id, max
            );
            None
        } else if let Some(worker) = self.registry.place(TaskKind::Reducer, task_ref) {
            task.header.attempt += 1;
            task.header.status = TaskStatus::Pending;
            task.header.worker = worker.clone();
            warn!(
                "reintentando reducer {} del job {} en {} (attempt={})",
                task_id, task_ref.job_id, worker, task.header.attempt
            );
            Some(task.clone())
        } else {
            task.header.status = TaskStatus::Failed;
            error!(
                "reducer {} del job {} sin workers para reintentar",
                task_id, task_ref.job_id
            );
            None
        };

        self.refresh_job(job);
        match moved {
            Some(reducer) => job
                .succeeded_mappers()
                .into_iter()
                .map(|mapper| ReducerBatch {
                    worker: reducer.header.worker.clone(),
                    mapper,
                    reducers: vec![reducer.clone()],
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Recalcula el estado del job; si terminó, suelta las asignaciones
    /// que quedaban en el registro.
    pub(crate) fn refresh_job(&self, job: &mut JobState) {
        let Some(status) = job.refresh_status() else {
            return;
        };
        match status {
            JobStatus::Succeed => info!("job {} SUCCEED", job.id),
            _ => error!("job {} {}", job.id, status),
        }
        for m in &job.mappers {
            self.registry
                .release(&m.header.worker, TaskKind::Mapper, TaskRef::of(&m.header));
        }
        for r in &job.reducers {
            self.registry
                .release(&r.header.worker, TaskKind::Reducer, TaskRef::of(&r.header));
        }
    }

    /* ---------------- envíos a reducers ---------------- */

    /// Manda los "run reducer" pendientes. Un error de transporte cuenta
    /// como caída del worker y los envíos que genera esa recuperación se
    /// agregan a la misma lista. Si el worker ya no está registrado, sus
    /// reducers que sigan anotados ahí se mueven a otro.
    pub async fn deliver(&self, batches: Vec<ReducerBatch>) {
        let mut work: VecDeque<ReducerBatch> = batches.into();
        while let Some(batch) = work.pop_front() {
            let Some(address) = self.registry.address_of(&batch.worker) else {
                debug!("worker {} ya no está, revisando sus reducers", batch.worker);
                work.extend(self.recover_orphan_reducers(&batch));
                continue;
            };
            debug!(
                "enviando salida del mapper {} (job={}) a {} reducers en {}",
                batch.mapper.header.task_id,
                batch.mapper.header.job_id,
                batch.reducers.len(),
                batch.worker
            );
            if let Err(e) = self
                .rpc
                .run_reducer_task(&address, &batch.mapper, &batch.reducers)
                .await
            {
                warn!("run reducer en {} falló: {}", batch.worker, e);
                work.extend(self.handle_worker_failure(&batch.worker));
            }
        }
    }

    /* ---------------- consultas ---------------- */

    pub fn heartbeat(&self, req: &HeartbeatRequest) {
        self.registry.heartbeat(req);
    }

    pub fn workers(&self) -> Vec<WorkerMetrics> {
        self.registry.metrics()
    }

    /// Foto de todos los jobs ordenada por id.
    pub fn describe_jobs(&self) -> String {
        let mut ids: Vec<JobId> = self.jobs.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();

        let parts: Vec<String> = ids
            .into_iter()
            .filter_map(|id| self.job(id))
            .map(|entry| entry.lock().describe())
            .collect();

        if parts.is_empty() {
            return "--- no hay jobs ---".to_string();
        }
        parts.join("\n")
    }

    pub fn job_info(&self, id: JobId) -> Option<JobInfo> {
        self.job(id).map(|entry| entry.lock().info())
    }

    pub fn file_server_info(&self) -> FileServerInfo {
        self.config.file_server.clone()
    }

    #[cfg(test)]
    pub fn snapshot(&self, id: JobId) -> Option<JobState> {
        self.job(id).map(|entry| entry.lock().clone())
    }
}
