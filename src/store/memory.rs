use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::{CalibrationStore, StoreError, StoredCalibration};
use crate::calibration::CalibrationData;

/// プロセス内だけのストア
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<StoredCalibration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationStore for MemoryStore {
    fn save(&self, profile: &CalibrationData) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.data.id == profile.id) {
            Some(existing) => existing.data = profile.clone(),
            None => entries.push(StoredCalibration::new(profile.clone())),
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<StoredCalibration>, StoreError> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.data.id != id);
        Ok(entries.len() != before)
    }

    fn set_archived(&self, id: Uuid, archived: bool) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.data.id == id) {
            Some(entry) => {
                entry.archived = archived;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
