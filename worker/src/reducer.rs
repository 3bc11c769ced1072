use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use common::{
    partition::{decode_record, encode_record},
    program, JobId, LocalStorage, MrError, OutputCollector, ReducerTask, TaskId,
};
use dashmap::DashMap;

/// Un reducer del worker: sólo se guarda el intento más nuevo de cada tarea.
pub type SlotKey = (JobId, TaskId);

#[derive(Debug)]
struct ReducerSlot {
    task: ReducerTask,
    // task_id del mapper -> líneas de su partición
    outputs: BTreeMap<TaskId, String>,
    started: bool,
    touched: Instant,
}

impl ReducerSlot {
    fn new(task: &ReducerTask) -> Self {
        Self {
            task: task.clone(),
            outputs: BTreeMap::new(),
            started: false,
            touched: Instant::now(),
        }
    }
}

/// Un reducer que ya juntó la salida de todos sus mappers.
#[derive(Debug)]
pub struct ReadyReducer {
    pub task: ReducerTask,
    pub inputs: Vec<String>,
}

/// Salidas de mappers acumuladas por reducer hasta tener `mapper_amount`.
#[derive(Default)]
pub struct ReducerSlots {
    slots: DashMap<SlotKey, ReducerSlot>,
}

impl ReducerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarda la partición de un mapper. Si el mismo mapper llega otra vez
    /// (reintento tras perder su salida) reemplaza la anterior. Un intento
    /// más nuevo del reducer descarta lo juntado por el anterior; uno más
    /// viejo se ignora.
    ///
    /// Devuelve el reducer listo la única vez que se completa.
    pub fn record_output(
        &self,
        reducer: &ReducerTask,
        mapper_task: TaskId,
        data: String,
    ) -> Option<ReadyReducer> {
        let h = &reducer.header;
        let mut slot = self
            .slots
            .entry((h.job_id, h.task_id))
            .or_insert_with(|| ReducerSlot::new(reducer));

        if h.attempt < slot.task.header.attempt {
            return None;
        }
        if h.attempt > slot.task.header.attempt {
            *slot = ReducerSlot::new(reducer);
        }
        if slot.started {
            return None;
        }
        slot.touched = Instant::now();
        slot.outputs.insert(mapper_task, data);
        if (slot.outputs.len() as u32) < slot.task.mapper_amount {
            return None;
        }

        slot.started = true;
        let inputs = std::mem::take(&mut slot.outputs).into_values().collect();
        Some(ReadyReducer {
            task: slot.task.clone(),
            inputs,
        })
    }

    /// Libera el lugar de un reducer ya reportado al master, salvo que
    /// mientras tanto haya llegado un intento más nuevo.
    pub fn finish(&self, task: &ReducerTask) {
        let h = &task.header;
        self.slots.remove_if(&(h.job_id, h.task_id), |_, slot| {
            slot.task.header.attempt == h.attempt
        });
    }

    /// Descarta reducers que esperan salidas hace más de `ttl`: intentos
    /// que el master movió a otro worker o envíos tardíos de tareas ya
    /// terminadas. Devuelve cuántos se descartaron.
    pub fn purge_idle(&self, ttl: Duration) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.started || slot.touched.elapsed() < ttl);
        before.saturating_sub(self.slots.len())
    }

    /// Reducers que todavía esperan salidas de mappers.
    pub fn active(&self) -> u32 {
        self.slots.iter().filter(|s| !s.started).count() as u32
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Agrupa todas las líneas `clave<TAB>valor` recibidas, corre el reduce
/// por clave en orden y devuelve las líneas de salida ordenadas.
pub fn reduce_partition(program_id: &str, inputs: &[String]) -> common::Result<Vec<String>> {
    let mr = program::resolve(program_id)
        .ok_or_else(|| MrError::Execution(format!("programa desconocido: {program_id}")))?;

    let mut grouped = OutputCollector::new();
    for data in inputs {
        for line in data.lines().filter(|l| !l.is_empty()) {
            let (k, v) = decode_record(line);
            grouped.collect(k, v);
        }
    }

    let mut out = OutputCollector::new();
    for (key, values) in grouped.into_map() {
        mr.reduce(&key, &values, &mut out);
    }
    Ok(out
        .into_sorted()
        .into_iter()
        .map(|(k, v)| encode_record(&k, &v))
        .collect())
}

/// Reduce y escribe la salida en bloques (y réplicas) bajo `output_path`.
pub fn execute_reducer(ready: &ReadyReducer, storage: &LocalStorage) -> common::Result<()> {
    let t = &ready.task;
    let lines = reduce_partition(&t.program, &ready.inputs)?;
    storage.write_output(
        Path::new(&t.output_path),
        t.partition,
        &lines,
        t.output_chunk_size,
        t.output_replicas,
    )?;
    Ok(())
}
