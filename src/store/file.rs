use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CalibrationStore, StoreError, StoredCalibration};
use crate::calibration::{CalibrationData, ExerciseType};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    calibrations: Vec<StoredCalibration>,
}

/// 全プロファイルを1つの JSON ファイルに持つストア
///
/// 書き込みは一時ファイルに書いてから rename する。
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoreDocument, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        write_atomic(&self.path, &serde_json::to_string_pretty(doc)?)
    }

    /// 読み込み・変更・書き戻しをロック下で行う
    fn modify<T>(&self, f: impl FnOnce(&mut StoreDocument) -> T) -> Result<T, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.read()?;
        let result = f(&mut doc);
        self.write(&doc)?;
        Ok(result)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl CalibrationStore for JsonFileStore {
    fn save(&self, profile: &CalibrationData) -> Result<(), StoreError> {
        self.modify(|doc| match doc.calibrations.iter_mut().find(|e| e.data.id == profile.id) {
            Some(existing) => existing.data = profile.clone(),
            None => doc.calibrations.push(StoredCalibration::new(profile.clone())),
        })
    }

    fn load_all(&self) -> Result<Vec<StoredCalibration>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read()?.calibrations)
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.modify(|doc| {
            let before = doc.calibrations.len();
            doc.calibrations.retain(|e| e.data.id != id);
            doc.calibrations.len() != before
        })
    }

    fn set_archived(&self, id: Uuid, archived: bool) -> Result<bool, StoreError> {
        self.modify(|doc| match doc.calibrations.iter_mut().find(|e| e.data.id == id) {
            Some(entry) => {
                entry.archived = archived;
                true
            }
            None => false,
        })
    }
}

/// 種目ごとに最新1件だけを持つ縮退用の保存先
///
/// `calibration_<exercise>.json` に書く。
#[derive(Debug, Clone)]
pub struct FlatFileFallback {
    directory: PathBuf,
}

impl FlatFileFallback {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, exercise: ExerciseType) -> PathBuf {
        self.directory.join(format!("calibration_{}.json", exercise.as_str()))
    }

    pub fn save(&self, profile: &CalibrationData) -> Result<(), StoreError> {
        let path = self.path_for(profile.exercise);
        write_atomic(&path, &serde_json::to_string_pretty(profile)?)?;
        log::info!("Saved {} calibration to fallback {}", profile.exercise, path.display());
        Ok(())
    }

    pub fn load(&self, exercise: ExerciseType) -> Result<Option<CalibrationData>, StoreError> {
        match fs::read_to_string(self.path_for(exercise)) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 削除できたら true
    pub fn remove(&self, exercise: ExerciseType) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(exercise)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 全種目のエントリ。読めないファイルは警告して飛ばす
    pub fn entries(&self) -> Vec<CalibrationData> {
        ExerciseType::ALL
            .iter()
            .filter_map(|e| match self.load(*e) {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("Skipping unreadable fallback entry for {}: {}", e, err);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{default_baseline, Aggregator};
    use crate::config::QualityConfig;

    fn profile(exercise: ExerciseType) -> CalibrationData {
        Aggregator::new(0, QualityConfig::default()).synthesize(default_baseline(exercise), &[], 70.0)
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("calibrations.json"));
        assert!(store.load_all().unwrap().is_empty());

        let p = profile(ExerciseType::Pushup);
        store.save(&p).unwrap();
        store.save(&p).unwrap();

        let reopened = JsonFileStore::new(store.path().to_path_buf());
        let all = reopened.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data, p);
        assert!(!all[0].archived);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_store_archive_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("calibrations.json"));
        let p = profile(ExerciseType::Situp);
        store.save(&p).unwrap();

        assert!(store.set_archived(p.id, true).unwrap());
        assert!(store.load_all().unwrap()[0].archived);
        assert!(!store.set_archived(Uuid::new_v4(), true).unwrap());

        assert!(store.delete(p.id).unwrap());
        assert!(!store.delete(p.id).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibrations.json");
        fs::write(&path, "not json").unwrap();
        let store = JsonFileStore::new(path);
        assert!(matches!(store.load_all(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_fallback_keeps_latest_per_exercise() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = FlatFileFallback::new(dir.path());
        assert!(fallback.load(ExerciseType::Pullup).unwrap().is_none());

        let first = profile(ExerciseType::Pullup);
        let second = profile(ExerciseType::Pullup);
        fallback.save(&first).unwrap();
        fallback.save(&second).unwrap();
        assert!(dir.path().join("calibration_pullup.json").exists());
        assert_eq!(fallback.load(ExerciseType::Pullup).unwrap(), Some(second));
        assert_eq!(fallback.entries().len(), 1);

        assert!(fallback.remove(ExerciseType::Pullup).unwrap());
        assert!(!fallback.remove(ExerciseType::Pullup).unwrap());
    }
}
