//! キャリブレーションプロファイルの永続化
//!
//! 保存先は `CalibrationStore` トレイトで差し替える。非同期の窓口は
//! `CalibrationRepository` で、ストア I/O はブロッキングスレッドに逃がす。

pub mod file;
pub mod memory;
pub mod repository;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibration::CalibrationData;

pub use file::{FlatFileFallback, JsonFileStore};
pub use memory::MemoryStore;
pub use repository::{AggregationTicket, CalibrationRepository, CalibrationStatistics};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Calibration not found: {0}")]
    NotFound(Uuid),

    /// 主ストアへの保存は失敗したが、フォールバックには保存できた
    #[error("Primary store unavailable, saved to fallback: {source}")]
    Degraded {
        #[source]
        source: Box<StoreError>,
    },

    #[error("Store task failed: {0}")]
    TaskFailed(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StoreError::Degraded { .. })
    }
}

/// ストア上の1件。アーカイブ済みは最新・最良の検索から外れる
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCalibration {
    pub data: CalibrationData,
    #[serde(default)]
    pub archived: bool,
}

impl StoredCalibration {
    pub fn new(data: CalibrationData) -> Self {
        Self { data, archived: false }
    }
}

/// 同期のストア実装。id が同じものは上書きする
pub trait CalibrationStore: Send + Sync {
    fn save(&self, profile: &CalibrationData) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<Vec<StoredCalibration>, StoreError>;

    /// 削除できたら true
    fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// 該当があれば true
    fn set_archived(&self, id: Uuid, archived: bool) -> Result<bool, StoreError>;
}
