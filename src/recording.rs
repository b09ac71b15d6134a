//! 姿勢・端末センサの記録ファイル (JSON Lines)
//!
//! 1行1レコード。`t_ms` は記録開始からの経過ミリ秒。
//! ```text
//! {"type":"pose","t_ms":0,"joints":[{"joint":"left_shoulder","x":0.4,"y":0.3,"confidence":0.9}]}
//! {"type":"motion","t_ms":5,"sample":{"pitch":0.1,"roll":0.0,"user_acceleration":[0,0,0],"rotation_rate":[0,0,0]}}
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::pose::{JointSample, MotionSample, PoseSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionRecord {
    Pose { t_ms: u64, joints: Vec<JointSample> },
    Motion { t_ms: u64, sample: MotionSample },
}

impl SessionRecord {
    pub fn pose(t_ms: u64, pose: &PoseSnapshot) -> Self {
        SessionRecord::Pose {
            t_ms,
            joints: pose.samples().copied().collect(),
        }
    }

    pub fn t_ms(&self) -> u64 {
        match self {
            SessionRecord::Pose { t_ms, .. } | SessionRecord::Motion { t_ms, .. } => *t_ms,
        }
    }

    /// 記録開始時刻 `start` を基準にした時刻
    pub fn instant(&self, start: Instant) -> Instant {
        start + Duration::from_millis(self.t_ms())
    }
}

/// 記録を読み込み時刻順に並べる。空行は飛ばす
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<SessionRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open recording {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SessionRecord = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record at {}:{}", path.display(), index + 1))?;
        records.push(record);
    }
    records.sort_by_key(SessionRecord::t_ms);
    log::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

pub fn write_records<P: AsRef<Path>>(path: P, records: &[SessionRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create recording {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).context("Failed to serialize record")?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
