pub mod detector;
pub mod keypoint;
pub mod torso;

pub use detector::PoseDetector;
pub use keypoint::{Keypoint, KeypointIndex, Pose};
pub use torso::{Landmark, TorsoLandmarks};
