pub mod calibration;
pub mod config;
pub mod events;
pub mod feedback;
pub mod geometry;
pub mod pose;
pub mod recording;
pub mod store;
