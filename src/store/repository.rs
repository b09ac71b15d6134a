use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{CalibrationStore, FlatFileFallback, JsonFileStore, StoreError, StoredCalibration};
use crate::calibration::{CalibrationData, CalibrationQuality, ExerciseType};
use crate::config::{Config, QualityConfig};
use crate::events::Publisher;

/// 保存済みプロファイルの集計
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationStatistics {
    pub total: usize,
    pub per_exercise: BTreeMap<ExerciseType, usize>,
    pub per_quality: BTreeMap<CalibrationQuality, usize>,
    pub mean_score: f32,
    pub mean_confidence: f32,
    pub usable: usize,
}

/// 種目ごとに1つだけ取れる集計権。drop で解放する
pub struct AggregationTicket {
    exercise: ExerciseType,
    in_flight: Arc<Mutex<HashSet<ExerciseType>>>,
}

impl AggregationTicket {
    pub fn exercise(&self) -> ExerciseType {
        self.exercise
    }
}

impl Drop for AggregationTicket {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.exercise);
    }
}

/// キャッシュ・主ストア・フォールバックをまとめた非同期の窓口
pub struct CalibrationRepository {
    store: Arc<dyn CalibrationStore>,
    fallback: FlatFileFallback,
    cache: Mutex<HashMap<ExerciseType, CalibrationData>>,
    in_flight: Arc<Mutex<HashSet<ExerciseType>>>,
    quality: QualityConfig,
    updates: Publisher<CalibrationData>,
}

impl CalibrationRepository {
    pub fn new(store: Arc<dyn CalibrationStore>, fallback: FlatFileFallback, quality: QualityConfig) -> Self {
        Self {
            store,
            fallback,
            cache: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            quality,
            updates: Publisher::new(),
        }
    }

    /// `<directory>/calibrations.json` を主ストア、同じディレクトリをフォールバックにする
    pub fn open<P: AsRef<Path>>(directory: P, quality: QualityConfig) -> Self {
        let directory = directory.as_ref();
        let store = JsonFileStore::new(directory.join("calibrations.json"));
        Self::new(Arc::new(store), FlatFileFallback::new(directory), quality)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::open(&config.store.directory, config.quality.clone())
    }

    /// 保存されたプロファイルの通知
    pub fn updates(&self) -> &Publisher<CalibrationData> {
        &self.updates
    }

    /// 集計を始める権利を取る。同じ種目で集計中なら None
    pub fn begin_aggregation(&self, exercise: ExerciseType) -> Option<AggregationTicket> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(exercise) {
            log::debug!("aggregation already in flight for {}", exercise);
            return None;
        }
        Some(AggregationTicket {
            exercise,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn CalibrationStore>, FlatFileFallback) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let fallback = self.fallback.clone();
        tokio::task::spawn_blocking(move || f(store, fallback))
            .await
            .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    /// 保存する。主ストアが失敗したらフォールバックに書き、`Degraded` を返す
    pub async fn save(&self, profile: CalibrationData) -> Result<(), StoreError> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile.exercise, profile.clone());
        self.updates.publish(profile.clone());

        let to_store = profile.clone();
        let primary = self.blocking(move |store, _| store.save(&to_store)).await;
        let err = match primary {
            Ok(()) => {
                log::info!(
                    "Saved {} calibration {} (score {:.1})",
                    profile.exercise,
                    profile.id,
                    profile.calibration_score
                );
                return Ok(());
            }
            Err(e) => e,
        };

        log::warn!("Primary calibration store failed: {}; writing fallback", err);
        match self.blocking(move |_, fallback| fallback.save(&profile)).await {
            Ok(()) => Err(StoreError::Degraded { source: Box::new(err) }),
            Err(fallback_err) => {
                log::warn!("Fallback save failed too: {}", fallback_err);
                Err(err)
            }
        }
    }

    /// キャッシュだけを見る。I/O を待たない
    pub fn cached_latest(&self, exercise: ExerciseType) -> Option<CalibrationData> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&exercise)
            .cloned()
    }

    fn evict(&self, id: Uuid) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, p| p.id != id);
    }

    async fn load_all(&self) -> Vec<StoredCalibration> {
        match self.blocking(|store, _| store.load_all()).await {
            Ok(all) => all,
            Err(e) => {
                log::warn!("Failed to read calibration store: {}", e);
                Vec::new()
            }
        }
    }

    async fn active(&self, exercise: ExerciseType) -> Vec<CalibrationData> {
        self.load_all()
            .await
            .into_iter()
            .filter(|e| !e.archived && e.data.exercise == exercise)
            .map(|e| e.data)
            .collect()
    }

    /// 最新のプロファイル。キャッシュ → 主ストア → フォールバックの順に探す
    pub async fn latest(&self, exercise: ExerciseType) -> Option<CalibrationData> {
        if let Some(cached) = self.cached_latest(exercise) {
            return Some(cached);
        }

        let mut found = self
            .active(exercise)
            .await
            .into_iter()
            .max_by_key(|p| p.timestamp);

        if found.is_none() {
            found = match self.blocking(move |_, fallback| fallback.load(exercise)).await {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Failed to read fallback calibration for {}: {}", exercise, e);
                    None
                }
            };
            if found.is_some() {
                if let Err(e) = self.migrate_legacy().await {
                    log::warn!("Legacy calibration migration failed: {}", e);
                }
            }
        }

        if let Some(profile) = &found {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(exercise, profile.clone());
        }
        found
    }

    /// 高品質なものを優先し、なければ最高スコアのものを返す
    pub async fn best(&self, exercise: ExerciseType) -> Option<CalibrationData> {
        let mut candidates = self.active(exercise).await;
        if candidates.is_empty() {
            candidates.extend(self.latest(exercise).await);
        }
        let preferred = self.quality.best_preferred_score;
        let (good, rest): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|p| p.calibration_score >= preferred);

        if !good.is_empty() {
            return good.into_iter().max_by_key(|p| p.timestamp);
        }
        rest.into_iter()
            .max_by(|a, b| a.calibration_score.total_cmp(&b.calibration_score))
    }

    /// 使えるプロファイルをスコアの高い順に返す
    pub async fn usable(&self, exercise: ExerciseType) -> Vec<CalibrationData> {
        let min = self.quality.usable_min_score;
        let mut usable: Vec<CalibrationData> = self
            .active(exercise)
            .await
            .into_iter()
            .filter(|p| p.calibration_score > min)
            .collect();
        usable.sort_by(|a, b| b.calibration_score.total_cmp(&a.calibration_score));
        usable
    }

    /// アーカイブ済みを含む全件。exercise を指定すればその種目だけ
    pub async fn all(&self, exercise: Option<ExerciseType>) -> Vec<StoredCalibration> {
        let mut all: Vec<StoredCalibration> = self
            .load_all()
            .await
            .into_iter()
            .filter(|e| exercise.map_or(true, |ex| e.data.exercise == ex))
            .collect();
        all.sort_by_key(|e| std::cmp::Reverse(e.data.timestamp));
        all
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.evict(id);
        if self.blocking(move |store, _| store.delete(id)).await? {
            log::info!("Deleted calibration {}", id);
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    pub async fn archive(&self, id: Uuid) -> Result<(), StoreError> {
        self.evict(id);
        if self.blocking(move |store, _| store.set_archived(id, true)).await? {
            log::info!("Archived calibration {}", id);
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    /// 指定日数より古いものを消す。消した件数を返す
    pub async fn delete_older_than(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::days(days);
        let stale: Vec<Uuid> = self
            .load_all()
            .await
            .into_iter()
            .filter(|e| e.data.timestamp < cutoff)
            .map(|e| e.data.id)
            .collect();

        for id in &stale {
            self.evict(*id);
        }
        let count = self
            .blocking(move |store, _| {
                let mut count = 0;
                for id in stale {
                    if store.delete(id)? {
                        count += 1;
                    }
                }
                Ok(count)
            })
            .await?;
        log::info!("Deleted {} calibrations older than {} days", count, days);
        Ok(count)
    }

    /// アーカイブ済みを除いた集計
    pub async fn statistics(&self) -> CalibrationStatistics {
        let active: Vec<CalibrationData> = self
            .load_all()
            .await
            .into_iter()
            .filter(|e| !e.archived)
            .map(|e| e.data)
            .collect();

        let mut stats = CalibrationStatistics {
            total: active.len(),
            ..CalibrationStatistics::default()
        };
        if active.is_empty() {
            return stats;
        }

        for p in &active {
            *stats.per_exercise.entry(p.exercise).or_default() += 1;
            *stats.per_quality.entry(p.quality(&self.quality)).or_default() += 1;
            if p.calibration_score > self.quality.usable_min_score {
                stats.usable += 1;
            }
        }
        let n = active.len() as f32;
        stats.mean_score = active.iter().map(|p| p.calibration_score).sum::<f32>() / n;
        stats.mean_confidence = active.iter().map(|p| p.confidence_level).sum::<f32>() / n;
        stats
    }

    /// フォールバックのエントリを主ストアへ移す。移した件数を返す
    pub async fn migrate_legacy(&self) -> Result<usize, StoreError> {
        let migrated = self
            .blocking(|store, fallback| {
                let mut migrated = 0;
                for entry in fallback.entries() {
                    store
                        .save(&entry)
                        .map_err(|e| StoreError::Migration(format!("{}: {}", entry.exercise, e)))?;
                    fallback.remove(entry.exercise)?;
                    migrated += 1;
                }
                Ok(migrated)
            })
            .await?;
        if migrated > 0 {
            log::info!("Migrated {} legacy calibrations", migrated);
        }
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{default_baseline, Aggregator};
    use crate::store::MemoryStore;

    struct FailingStore;

    impl CalibrationStore for FailingStore {
        fn save(&self, _: &CalibrationData) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
        fn load_all(&self) -> Result<Vec<StoredCalibration>, StoreError> {
            Ok(Vec::new())
        }
        fn delete(&self, _: Uuid) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn set_archived(&self, _: Uuid, _: bool) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    fn profile(exercise: ExerciseType, score: f32) -> CalibrationData {
        Aggregator::new(0, QualityConfig::default()).synthesize(default_baseline(exercise), &[], score)
    }

    fn repo(dir: &Path) -> CalibrationRepository {
        CalibrationRepository::new(
            Arc::new(MemoryStore::new()),
            FlatFileFallback::new(dir),
            QualityConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_save_then_latest() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        let p = profile(ExerciseType::Pushup, 85.0);
        repo.save(p.clone()).await.unwrap();
        assert_eq!(repo.cached_latest(ExerciseType::Pushup), Some(p.clone()));
        assert_eq!(repo.latest(ExerciseType::Pushup).await, Some(p));
        assert_eq!(repo.latest(ExerciseType::Situp).await, None);
    }

    #[tokio::test]
    async fn test_degraded_save_writes_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CalibrationRepository::new(
            Arc::new(FailingStore),
            FlatFileFallback::new(dir.path()),
            QualityConfig::default(),
        );
        let p = profile(ExerciseType::Situp, 75.0);
        let err = repo.save(p.clone()).await.unwrap_err();
        assert!(err.is_degraded());
        assert!(dir.path().join("calibration_situp.json").exists());
        assert_eq!(repo.cached_latest(ExerciseType::Situp), Some(p));
    }

    #[tokio::test]
    async fn test_best_prefers_high_quality() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        repo.save(profile(ExerciseType::Pullup, 70.0)).await.unwrap();
        let good = profile(ExerciseType::Pullup, 82.0);
        repo.save(good.clone()).await.unwrap();
        repo.save(profile(ExerciseType::Pullup, 60.0)).await.unwrap();
        assert_eq!(repo.best(ExerciseType::Pullup).await, Some(good));
    }

    #[tokio::test]
    async fn test_best_falls_back_to_highest_score() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        let higher = profile(ExerciseType::Pushup, 72.0);
        repo.save(higher.clone()).await.unwrap();
        repo.save(profile(ExerciseType::Pushup, 65.0)).await.unwrap();
        assert_eq!(repo.best(ExerciseType::Pushup).await, Some(higher));
    }

    #[tokio::test]
    async fn test_usable_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        for score in [40.0, 90.0, 55.0, 50.0] {
            repo.save(profile(ExerciseType::Situp, score)).await.unwrap();
        }
        let scores: Vec<f32> = repo
            .usable(ExerciseType::Situp)
            .await
            .iter()
            .map(|p| p.calibration_score)
            .collect();
        assert_eq!(scores, vec![90.0, 55.0]);
    }

    #[tokio::test]
    async fn test_archive_excludes_from_latest() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        let p = profile(ExerciseType::Pushup, 88.0);
        repo.save(p.clone()).await.unwrap();
        repo.archive(p.id).await.unwrap();
        assert_eq!(repo.cached_latest(ExerciseType::Pushup), None);
        assert_eq!(repo.latest(ExerciseType::Pushup).await, None);
        assert_eq!(repo.all(Some(ExerciseType::Pushup)).await.len(), 1);
        assert_eq!(repo.statistics().await.total, 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        let id = Uuid::new_v4();
        assert!(matches!(repo.delete(id).await, Err(StoreError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        let mut old = profile(ExerciseType::Pushup, 80.0);
        old.timestamp = Utc::now() - Duration::days(45);
        let fresh = profile(ExerciseType::Pushup, 80.0);
        repo.save(old).await.unwrap();
        repo.save(fresh.clone()).await.unwrap();

        assert_eq!(repo.delete_older_than(30).await.unwrap(), 1);
        let remaining = repo.all(None).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].data, fresh);
    }

    #[tokio::test]
    async fn test_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        repo.save(profile(ExerciseType::Pushup, 92.0)).await.unwrap();
        repo.save(profile(ExerciseType::Situp, 45.0)).await.unwrap();
        let stats = repo.statistics().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.usable, 1);
        assert_eq!(stats.per_exercise[&ExerciseType::Pushup], 1);
        assert_eq!(stats.per_quality[&CalibrationQuality::Excellent], 1);
        assert_eq!(stats.per_quality[&CalibrationQuality::Invalid], 1);
        assert!((stats.mean_score - 68.5).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_latest_migrates_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = profile(ExerciseType::Pullup, 77.0);
        FlatFileFallback::new(dir.path()).save(&legacy).unwrap();

        let repo = repo(dir.path());
        assert_eq!(repo.latest(ExerciseType::Pullup).await, Some(legacy.clone()));
        assert!(!dir.path().join("calibration_pullup.json").exists());
        assert_eq!(repo.all(None).await[0].data, legacy);
    }

    #[test]
    fn test_aggregation_ticket_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(dir.path());
        let ticket = repo.begin_aggregation(ExerciseType::Pushup).unwrap();
        assert_eq!(ticket.exercise(), ExerciseType::Pushup);
        assert!(repo.begin_aggregation(ExerciseType::Pushup).is_none());
        assert!(repo.begin_aggregation(ExerciseType::Situp).is_some());
        drop(ticket);
        assert!(repo.begin_aggregation(ExerciseType::Pushup).is_some());
    }
}
