// Training store and usage recording seams
// The session core consumes these narrow interfaces; real persistence
// (cloud sync, sharing, editing) lives outside this crate

use crate::error::StoreError;
use crate::training::model::Training;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Read access to stored trainings; consulted once at session start
pub trait TrainingStore: Send + Sync {
    fn training_by_id(&self, id: &Uuid) -> Option<Training>;
}

/// Fire-and-forget usage history
pub trait UsageRecorder: Send + Sync {
    fn record_session_start(&self, training_id: &Uuid);
}

/// In-memory training store
#[derive(Default)]
pub struct InMemoryStore {
    trainings: Mutex<HashMap<Uuid, Training>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, training: Training) {
        if let Ok(mut map) = self.trainings.lock() {
            map.insert(training.id, training);
        }
    }
}

impl TrainingStore for InMemoryStore {
    fn training_by_id(&self, id: &Uuid) -> Option<Training> {
        self.trainings.lock().ok()?.get(id).cloned()
    }
}

/// Training store backed by a JSON file holding a list of trainings
pub struct JsonFileStore {
    trainings: HashMap<Uuid, Training>,
}

impl JsonFileStore {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = std::fs::File::open(path)?;
        let list: Vec<Training> = serde_json::from_reader(file)?;
        let trainings = list.into_iter().map(|t| (t.id, t)).collect();
        Ok(Self { trainings })
    }

    pub fn len(&self) -> usize {
        self.trainings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trainings.is_empty()
    }
}

impl TrainingStore for JsonFileStore {
    fn training_by_id(&self, id: &Uuid) -> Option<Training> {
        self.trainings.get(id).cloned()
    }
}

/// One recorded session start
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub training_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Usage recorder keeping records in memory
#[derive(Default)]
pub struct SessionLog {
    records: Mutex<Vec<SessionRecord>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl UsageRecorder for SessionLog {
    fn record_session_start(&self, training_id: &Uuid) {
        if let Ok(mut records) = self.records.lock() {
            records.push(SessionRecord {
                training_id: *training_id,
                started_at: Utc::now(),
            });
        }
    }
}

/// Recorder that drops everything
pub struct NullRecorder;

impl UsageRecorder for NullRecorder {
    fn record_session_start(&self, _training_id: &Uuid) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::model::Exercise;
    use std::io::Write;

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryStore::new();
        let mut training = Training::new("Warmup");
        training.exercises.push(Exercise::new("Long tones"));
        let id = training.id;
        store.insert(training);

        let loaded = store.training_by_id(&id).unwrap();
        assert_eq!(loaded.title, "Warmup");
        assert_eq!(loaded.exercises.len(), 1);
        assert!(store.training_by_id(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_json_file_store() {
        let mut training = Training::new("From disk");
        training.exercises.push(Exercise::new("Etude"));
        let id = training.id;
        let json = serde_json::to_string(&vec![training]).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let store = JsonFileStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 1);
        let loaded = store.training_by_id(&id).unwrap();
        assert_eq!(loaded.title, "From disk");
    }

    #[test]
    fn test_json_file_store_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        assert!(matches!(
            JsonFileStore::load(file.path()),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn test_session_log() {
        let log = SessionLog::new();
        let id = Uuid::new_v4();
        log.record_session_start(&id);
        log.record_session_start(&id);

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].training_id, id);
        assert!(records[0].started_at <= records[1].started_at);
    }
}
