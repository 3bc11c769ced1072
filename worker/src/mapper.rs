use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use common::{
    partition::{encode_record, partition_by_range},
    program, JobId, LocalStorage, MapperTask, MrError, OutputCollector, TaskId,
};
use tracing::debug;

/// Directorio con las particiones de un intento de mapper:
/// `<tmp>/job-<J>/mapper-<T>-attempt-<A>/`
pub fn output_dir(tmp_dir: &Path, job_id: JobId, task_id: TaskId, attempt: u32) -> PathBuf {
    tmp_dir
        .join(format!("job-{job_id}"))
        .join(format!("mapper-{task_id}-attempt-{attempt}"))
}

pub fn partition_path(
    tmp_dir: &Path,
    job_id: JobId,
    task_id: TaskId,
    attempt: u32,
    partition: u32,
) -> PathBuf {
    output_dir(tmp_dir, job_id, task_id, attempt).join(format!("partition-{partition}"))
}

/// Corre el map sobre el bloque y deja `reducer_amount` archivos de
/// partición (aunque alguno quede vacío), con líneas `clave<TAB>valor`.
pub fn execute_mapper(task: &MapperTask, storage: &LocalStorage, tmp_dir: &Path) -> common::Result<()> {
    let mr = program::resolve(&task.program)
        .ok_or_else(|| MrError::Execution(format!("programa desconocido: {}", task.program)))?;

    let mut collector = OutputCollector::new();
    for (i, line) in storage.open_block_reader(&task.block)?.enumerate() {
        let line = line?;
        mr.map(&i.to_string(), &line, &mut collector);
    }

    let h = &task.header;
    debug!(
        "mapper {} del job {}: {} pares, {} claves",
        h.task_id,
        h.job_id,
        collector.len(),
        collector.key_count()
    );
    let dir = output_dir(tmp_dir, h.job_id, h.task_id, h.attempt);
    fs::create_dir_all(&dir)?;

    let partitions = partition_by_range(collector.into_map(), task.reducer_amount);
    for (i, groups) in partitions.into_iter().enumerate() {
        let path = partition_path(tmp_dir, h.job_id, h.task_id, h.attempt, i as u32);
        let mut writer = BufWriter::new(File::create(&path)?);
        for (key, values) in groups {
            for value in values {
                writeln!(writer, "{}", encode_record(&key, &value))?;
            }
        }
        writer.flush()?;
    }
    Ok(())
}
