pub mod keypoint;
pub mod motion;

pub use keypoint::{Joint, JointSample, PoseSnapshot};
pub use motion::{MotionHistory, MotionSample};
