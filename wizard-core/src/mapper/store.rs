use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub type Record = Map<String, Value>;
pub type SharedRecordStore = Arc<Mutex<RecordStore>>;

/// Client-side records keyed by model name, then by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    models: BTreeMap<String, BTreeMap<String, Record>>,
}

fn record_id(record: &Record) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRecordStore {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Upserts by `id`. Records without a usable id are skipped.
    pub fn load_many(&mut self, model: &str, records: Vec<Record>) -> usize {
        let table = self.models.entry(model.to_string()).or_default();
        let mut loaded = 0;
        for record in records {
            match record_id(&record) {
                Some(id) => {
                    table.insert(id, record);
                    loaded += 1;
                }
                None => log::warn!("Skipping {} record without id", model),
            }
        }
        loaded
    }

    pub fn find(&self, model: &str, id: &str) -> Option<&Record> {
        self.models.get(model)?.get(id)
    }

    pub fn all(&self, model: &str) -> Vec<&Record> {
        self.models
            .get(model)
            .map(|table| table.values().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, model: &str) -> usize {
        self.models.get(model).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn clear_model(&mut self, model: &str) {
        self.models.remove(model);
    }
}
