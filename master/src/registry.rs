use std::collections::HashSet;
use std::time::{Duration, Instant};

use common::{HeartbeatRequest, TaskKind, WorkerMetrics, WorkerName};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::state::TaskRef;

#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub name: WorkerName,
    pub address: String,
    pub last_heartbeat: Instant,
    pub mapper_load: u32,
    pub reducer_load: u32,

    // tareas PENDING asignadas a este worker
    pub pending_mappers: HashSet<TaskRef>,
    pub pending_reducers: HashSet<TaskRef>,

    pub cpu_percent: Option<f32>,
    pub mem_bytes: Option<u64>,
}

impl WorkerInfo {
    fn from_heartbeat(req: &HeartbeatRequest) -> Self {
        Self {
            name: req.name.clone(),
            address: req.address.clone(),
            last_heartbeat: Instant::now(),
            mapper_load: req.mapper_load,
            reducer_load: req.reducer_load,
            pending_mappers: HashSet::new(),
            pending_reducers: HashSet::new(),
            cpu_percent: req.cpu_percent,
            mem_bytes: req.mem_bytes,
        }
    }

    pub fn is_valid(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() < timeout
    }

    fn load(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Mapper => self.mapper_load,
            TaskKind::Reducer => self.reducer_load,
        }
    }

    fn pending_mut(&mut self, kind: TaskKind) -> &mut HashSet<TaskRef> {
        match kind {
            TaskKind::Mapper => &mut self.pending_mappers,
            TaskKind::Reducer => &mut self.pending_reducers,
        }
    }
}

/// Tabla de workers vivos.
///
/// Iterar puede ver un conjunto levemente desactualizado mientras otro
/// hilo inserta o borra; todos los que consumen vuelven a validar liveness.
pub struct WorkerRegistry {
    workers: DashMap<WorkerName, WorkerInfo>,
    // serializa "buscar el mínimo + reservar" entre llamadores concurrentes
    placement: Mutex<()>,
    timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            workers: DashMap::new(),
            placement: Mutex::new(()),
            timeout,
        }
    }

    /// Upsert: el primer heartbeat crea el worker; los siguientes refrescan
    /// timestamp, dirección y cargas sin tocar las tareas pendientes.
    pub fn heartbeat(&self, req: &HeartbeatRequest) {
        let mut created = false;
        self.workers
            .entry(req.name.clone())
            .and_modify(|w| {
                w.last_heartbeat = Instant::now();
                w.address = req.address.clone();
                w.mapper_load = req.mapper_load;
                w.reducer_load = req.reducer_load;
                w.cpu_percent = req.cpu_percent;
                w.mem_bytes = req.mem_bytes;
            })
            .or_insert_with(|| {
                created = true;
                WorkerInfo::from_heartbeat(req)
            });

        if created {
            info!("worker registrado: {} en {}", req.name, req.address);
        }
    }

    pub fn address_of(&self, name: &str) -> Option<String> {
        self.workers.get(name).map(|w| w.address.clone())
    }

    /// Elige el worker válido con menor carga del tipo pedido y le suma
    /// uno a esa carga como reserva, salga bien o no la RPC posterior.
    pub fn select(&self, kind: TaskKind) -> Option<WorkerName> {
        let _guard = self.placement.lock();
        loop {
            let candidate = self
                .workers
                .iter()
                .filter(|w| w.is_valid(self.timeout))
                .min_by_key(|w| w.load(kind))
                .map(|w| w.name.clone())?;

            // pudo haberse borrado entre la búsqueda y la reserva
            if let Some(mut w) = self.workers.get_mut(&candidate) {
                match kind {
                    TaskKind::Mapper => w.mapper_load += 1,
                    TaskKind::Reducer => w.reducer_load += 1,
                }
                return Some(candidate);
            }
        }
    }

    /// Anota la tarea como pendiente del worker. Devuelve `false` si el
    /// worker ya no está registrado: nadie va a recuperar esa tarea desde acá.
    #[must_use]
    pub fn assign(&self, name: &str, kind: TaskKind, task: TaskRef) -> bool {
        match self.workers.get_mut(name) {
            Some(mut w) => {
                w.pending_mut(kind).insert(task);
                true
            }
            None => false,
        }
    }

    /// `select` + `assign`. Si el elegido se borra antes de anotarle la
    /// tarea, se elige otro.
    pub fn place(&self, kind: TaskKind, task: TaskRef) -> Option<WorkerName> {
        loop {
            let name = self.select(kind)?;
            if self.assign(&name, kind, task) {
                return Some(name);
            }
        }
    }

    /// Intenta con `preferred` (ya reservado con `select`) y, si se fue,
    /// coloca la tarea en otro worker.
    pub fn assign_or_place(&self, preferred: &str, kind: TaskKind, task: TaskRef) -> Option<WorkerName> {
        if self.assign(preferred, kind, task) {
            return Some(preferred.to_string());
        }
        self.place(kind, task)
    }

    pub fn release(&self, name: &str, kind: TaskKind, task: TaskRef) {
        if let Some(mut w) = self.workers.get_mut(name) {
            w.pending_mut(kind).remove(&task);
        }
    }

    pub fn remove(&self, name: &str) -> Option<WorkerInfo> {
        self.workers.remove(name).map(|(_, w)| w)
    }

    /// Saca al worker sólo si su heartbeat sigue vencido; un heartbeat que
    /// llegó entre `expired()` y esta llamada lo salva.
    pub fn remove_if_expired(&self, name: &str) -> Option<WorkerInfo> {
        self.workers
            .remove_if(name, |_, w| !w.is_valid(self.timeout))
            .map(|(_, w)| w)
    }

    /// Workers cuyo heartbeat ya venció.
    pub fn expired(&self) -> Vec<WorkerName> {
        let mut names: Vec<WorkerName> = self
            .workers
            .iter()
            .filter(|w| !w.is_valid(self.timeout))
            .map(|w| w.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn metrics(&self) -> Vec<WorkerMetrics> {
        let mut out: Vec<WorkerMetrics> = self
            .workers
            .iter()
            .map(|w| WorkerMetrics {
                name: w.name.clone(),
                address: w.address.clone(),
                valid: w.is_valid(self.timeout),
                last_heartbeat_ms_ago: w.last_heartbeat.elapsed().as_millis() as u64,
                mapper_load: w.mapper_load,
                reducer_load: w.reducer_load,
                pending_mappers: w.pending_mappers.len() as u32,
                pending_reducers: w.pending_reducers.len() as u32,
                cpu_percent: w.cpu_percent,
                mem_bytes: w.mem_bytes,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<WorkerInfo> {
        self.workers.get(name).map(|w| w.clone())
    }

    /// Atrasa el último heartbeat, para simular un worker que dejó de latir.
    #[cfg(test)]
    pub fn backdate(&self, name: &str, by: Duration) {
        if let Some(mut w) = self.workers.get_mut(name) {
            if let Some(t) = Instant::now().checked_sub(by) {
                w.last_heartbeat = t;
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn heartbeat_req(name: &str, mapper_load: u32, reducer_load: u32) -> HeartbeatRequest {
    HeartbeatRequest {
        name: name.to_string(),
        address: format!("http://{name}"),
        mapper_load,
        reducer_load,
        cpu_percent: None,
        mem_bytes: None,
    }
}
