//! Programas map/reduce enlazados estáticamente.
//!
//! Los workers resuelven el `program` de cada tarea contra este registro;
//! no se descarga código remoto.

use std::sync::Arc;

use crate::collector::OutputCollector;

pub trait MapReduce: Send + Sync {
    /// `key` es el número de línea dentro del bloque (desde 0, en texto);
    /// `value` es la línea sin el salto final.
    fn map(&self, key: &str, value: &str, collector: &mut OutputCollector);

    fn reduce(&self, key: &str, values: &[String], collector: &mut OutputCollector);
}

pub const WORDCOUNT: &str = "wordcount";
pub const IDENTITY: &str = "identity";

pub fn resolve(program: &str) -> Option<Arc<dyn MapReduce>> {
    match program {
        WORDCOUNT => Some(Arc::new(WordCount)),
        IDENTITY => Some(Arc::new(Identity)),
        _ => None,
    }
}

pub fn registered() -> &'static [&'static str] {
    &[WORDCOUNT, IDENTITY]
}

/// Cuenta palabras: "palabra" -> "conteo".
pub struct WordCount;

/// limpiar: solo alfanumérico y '_', en minúscula
fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

impl MapReduce for WordCount {
    fn map(&self, _key: &str, value: &str, collector: &mut OutputCollector) {
        for raw in value.split_whitespace() {
            let token = normalize_token(raw);
            if !token.is_empty() {
                collector.collect(token, "1");
            }
        }
    }

    fn reduce(&self, key: &str, values: &[String], collector: &mut OutputCollector) {
        let total: u64 = values
            .iter()
            .map(|v| v.parse::<u64>().unwrap_or(1))
            .sum();
        collector.collect(key, total.to_string());
    }
}

/// Ordena las líneas de entrada: cada línea es una clave sin valor.
pub struct Identity;

impl MapReduce for Identity {
    fn map(&self, _key: &str, value: &str, collector: &mut OutputCollector) {
        if !value.is_empty() {
            collector.collect(value, "");
        }
    }

    fn reduce(&self, key: &str, values: &[String], collector: &mut OutputCollector) {
        for v in values {
            collector.collect(key, v.clone());
        }
    }
}
