//! Detection and gate-coordination services

pub mod coordinator;
pub mod crossing;
pub mod motion;

pub use coordinator::{GateCoordinator, GateFlags};
pub use crossing::{run_detection_loop, CrossingDetector};
pub use motion::BackgroundModel;
