pub mod aggregator;
pub mod collector;
pub mod defaults;
pub mod frame;
pub mod framing;
pub mod position;
pub mod profile;
pub mod replay;
pub mod strategy;

pub use aggregator::Aggregator;
pub use collector::{CalibrationCollector, CollectionBatch, CollectorProgress, CollectorState, PoseOutcome, SamplerHandle, Tick};
pub use defaults::{default_baseline, CalibrationMode, CalibrationProgress, ProfileBaseline};
pub use frame::{CalibrationFrame, FrameQuality};
pub use framing::{CalibrationSuggestion, FramingStatus, TargetFraming};
pub use position::{detect_position, DevicePosition};
pub use profile::{
    AdaptationLevel, AngleAdjustments, AngleMetric, CalibrationData, CalibrationQuality, ExerciseType,
    ValidationRanges, VisibilityThresholds,
};
pub use replay::{calibrate_from_records, quick_profile, ReplayOutcome};
pub use strategy::{CalibrationStrategy, ManualInputs, StrategyKind, StrategySelector};
