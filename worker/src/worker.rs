use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use common::{HeartbeatRequest, LocalStorage, MapperTask, ReducerTask};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;
use crate::master_client::MasterClient;
use crate::reducer::{ReadyReducer, ReducerSlots};
use crate::{mapper, reducer, server};

pub struct WorkerState {
    pub config: WorkerConfig,
    pub master: MasterClient,
    pub storage: LocalStorage,
    mapper_slots: Arc<Semaphore>,
    // mappers recibidos que todavía no terminaron
    running_mappers: AtomicU32,
    pub reducers: ReducerSlots,
}

pub type SharedState = Arc<WorkerState>;

impl WorkerState {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        Ok(Self {
            master: MasterClient::new(&config.master_url, config.rpc_timeout)?,
            storage: LocalStorage,
            mapper_slots: Arc::new(Semaphore::new(config.concurrency)),
            running_mappers: AtomicU32::new(0),
            reducers: ReducerSlots::new(),
            config,
        })
    }

    pub fn mapper_load(&self) -> u32 {
        self.running_mappers.load(Ordering::SeqCst)
    }

    /// Ejecuta un mapper cuando hay lugar y reporta el resultado al master.
    pub async fn run_mapper(self: Arc<Self>, task: MapperTask) {
        self.running_mappers.fetch_add(1, Ordering::SeqCst);
        let Ok(_permit) = Arc::clone(&self.mapper_slots).acquire_owned().await else {
            self.running_mappers.fetch_sub(1, Ordering::SeqCst);
            return;
        };

        let h = &task.header;
        info!(
            "ejecutando mapper {} del job {} (attempt={}, bloque {}+{})",
            h.task_id, h.job_id, h.attempt, task.block.offset, task.block.length
        );

        let state = Arc::clone(&self);
        let job = task.clone();
        let result = tokio::task::spawn_blocking(move || {
            mapper::execute_mapper(&job, &state.storage, &state.config.tmp_dir)
        })
        .await;
        self.running_mappers.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(Ok(())) => {
                let mut report = task;
                report.output_address = Some(self.config.advertise_url.clone());
                self.master.mapper_succeed(&report).await;
            }
            Ok(Err(e)) => {
                warn!(
                    "mapper {} del job {} falló: {}",
                    task.header.task_id, task.header.job_id, e
                );
                self.master.mapper_failed(&task).await;
            }
            Err(e) => {
                warn!("panic o join error en mapper {}: {:?}", task.header.task_id, e);
                self.master.mapper_failed(&task).await;
            }
        }
    }

    /// Baja la partición que le toca a cada reducer de la salida de
    /// `mapper`. Si no se puede, se le avisa al master para que rehaga
    /// ese mapper; si el reducer quedó completo, arranca el reduce.
    pub async fn run_reducer_batch(self: Arc<Self>, mapper: MapperTask, reducers: Vec<ReducerTask>) {
        for reducer in reducers {
            let data = match self.master.fetch_partition(&mapper, reducer.partition).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        "reducer {} no pudo leer la salida del mapper {}: {:?}",
                        reducer.header.task_id, mapper.header.task_id, e
                    );
                    self.master.reducer_failed_on_mapper(&reducer, &mapper).await;
                    continue;
                }
            };

            if let Some(ready) =
                self.reducers
                    .record_output(&reducer, mapper.header.task_id, data)
            {
                tokio::spawn(Arc::clone(&self).finish_reducer(ready));
            }
        }
    }

    async fn finish_reducer(self: Arc<Self>, ready: ReadyReducer) {
        let task = ready.task.clone();
        info!(
            "ejecutando reducer {} del job {} (partición {}, {} entradas)",
            task.header.task_id,
            task.header.job_id,
            task.partition,
            ready.inputs.len()
        );

        let state = Arc::clone(&self);
        let result =
            tokio::task::spawn_blocking(move || reducer::execute_reducer(&ready, &state.storage))
                .await;

        match result {
            Ok(Ok(())) => {
                info!("terminé reducer {} correctamente", task.header.task_id);
                self.master.reducer_succeed(&task).await;
            }
            Ok(Err(e)) => {
                warn!("error en reducer {}: {}", task.header.task_id, e);
                self.master.reducer_failed(&task).await;
            }
            Err(e) => {
                warn!("panic o join error en reducer {}: {:?}", task.header.task_id, e);
                self.master.reducer_failed(&task).await;
            }
        }
        self.reducers.finish(&task);
    }
}

/// Heartbeat periódico con cargas y CPU/memoria. El primero registra al
/// worker en el master.
async fn heartbeat_loop(state: SharedState) {
    let mut sys = System::new_all();
    loop {
        sys.refresh_cpu();
        sys.refresh_memory();

        let req = HeartbeatRequest {
            name: state.config.name.clone(),
            address: state.config.advertise_url.clone(),
            mapper_load: state.mapper_load(),
            reducer_load: state.reducers.active(),
            cpu_percent: Some(sys.global_cpu_info().cpu_usage()),
            mem_bytes: Some(sys.used_memory()),
        };
        if let Err(e) = state.master.heartbeat(&req).await {
            warn!("heartbeat falló: {:?}", e);
        }

        let dropped = state.reducers.purge_idle(state.config.slot_ttl);
        if dropped > 0 {
            info!("descarté {} reducers sin novedades", dropped);
        }

        sleep(state.config.heartbeat_period).await;
    }
}

/// Arranque del worker:
/// - heartbeats al master en segundo plano
/// - servidor HTTP para las RPC del master y para servir particiones
pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;
    let state: SharedState = Arc::new(WorkerState::new(config)?);
    info!(
        "worker {} (concurrency={}) anunciado como {} contra {}",
        state.config.name,
        state.config.concurrency,
        state.config.advertise_url,
        state.config.master_url
    );

    tokio::spawn(heartbeat_loop(Arc::clone(&state)));

    let listener = TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("no se pudo abrir {}", state.config.bind_addr))?;
    info!("worker escuchando en {}", listener.local_addr()?);

    axum::serve(listener, server::build_router(state)).await?;
    Ok(())
}
