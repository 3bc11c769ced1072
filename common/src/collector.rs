use std::collections::{BTreeMap, BTreeSet};

/// Multiconjunto de pares (clave, valor) donde escribe el código de usuario.
///
/// Sólo se agrega; el orden es (clave, valor) lexicográfico y los
/// duplicados se conservan.
#[derive(Debug, Default, Clone)]
pub struct OutputCollector {
    entries: Vec<(String, String)>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Pares ordenados por (clave, valor).
    pub fn into_sorted(mut self) -> Vec<(String, String)> {
        self.entries.sort();
        self.entries
    }

    /// Clave -> lista ordenada de valores, sin deduplicar.
    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in self.into_sorted() {
            map.entry(k).or_default().push(v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_sorted_orders_by_key_then_value() {
        let mut c = OutputCollector::new();
        c.collect("b", "2");
        c.collect("a", "9");
        c.collect("b", "1");
        c.collect("a", "1");

        assert_eq!(
            c.into_sorted(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "9".to_string()),
                ("b".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn into_map_keeps_duplicates() {
        let mut c = OutputCollector::new();
        c.collect("hola", "1");
        c.collect("mundo", "1");
        c.collect("hola", "1");
        assert_eq!(c.key_count(), 2);
        assert_eq!(c.len(), 3);

        let map = c.into_map();
        assert_eq!(map["hola"], vec!["1", "1"]);
        assert_eq!(map["mundo"], vec!["1"]);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["hola", "mundo"]);
    }
}
