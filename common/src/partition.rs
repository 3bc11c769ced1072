//! Shuffle del lado del mapper: partición por rangos sobre claves ordenadas.
//!
//! Para K claves distintas y R reducers, las particiones 0..R-2 llevan
//! ⌊K/R⌋ claves contiguas cada una y la última se queda con el resto.
//! Si K < R, las primeras K particiones llevan una clave y el resto
//! queda vacío. Concatenar las particiones en orden da la secuencia
//! completa de claves ordenadas.

use std::collections::BTreeMap;

/// Separador clave/valor dentro de un archivo de partición.
pub const FIELD_DELIMITER: char = '\t';

pub type KeyGroup = (String, Vec<String>);

pub fn partition_by_range(
    records: BTreeMap<String, Vec<String>>,
    reducer_amount: u32,
) -> Vec<Vec<KeyGroup>> {
    let partitions = reducer_amount as usize;
    let mut out: Vec<Vec<KeyGroup>> = vec![Vec::new(); partitions];

    let key_count = records.len();
    if key_count == 0 || partitions == 0 {
        return out;
    }

    let range_count = key_count.min(partitions);
    let range_size = key_count / range_count;

    for (i, group) in records.into_iter().enumerate() {
        let idx = (i / range_size).min(range_count - 1);
        out[idx].push(group);
    }
    out
}

pub fn encode_record(key: &str, value: &str) -> String {
    format!("{key}{FIELD_DELIMITER}{value}")
}

/// Inversa de [`encode_record`]. Una línea sin separador es una clave con valor vacío.
pub fn decode_record(line: &str) -> (String, String) {
    match line.split_once(FIELD_DELIMITER) {
        Some((k, v)) => (k.to_string(), v.to_string()),
        None => (line.to_string(), String::new()),
    }
}
