//! Hazard detector adapters.
//!
//! Every hazard check sits behind the same `HazardDetector` contract:
//! a frame goes in, `(fired, boxes)` comes out. Adapters never share
//! mutable state with one another, and a disabled adapter is a zero-cost
//! no-op. Model-backed adapters consume pre-trained models through the
//! `ObjectModel` black-box trait.

mod adapter;
pub mod fire;
pub mod gear;
mod model;
pub mod pose;
pub mod restricted_zone;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use adapter::{Detection, HazardDetector};
pub use fire::{FireDetector, FireSeverity};
pub use gear::GearDetector;
pub use model::{ModelBox, ObjectModel, StubModel};
pub use pose::{
    EmergencyStateMachine, GestureClass, GestureClassifier, PoseAlert, PoseEstimator,
    PoseLandmarks, PoseState, StubGestureClassifier, StubPoseEstimator,
};
pub use restricted_zone::RestrictedZoneDetector;
#[cfg(feature = "backend-tract")]
pub use tract::TractModel;
