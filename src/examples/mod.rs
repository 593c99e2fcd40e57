//! Simulations used by the documentation, tests and the `unity-gym` binary.

mod ball;

pub use ball::{Ball3D, BallStatsChannel, BEHAVIOR_NAME};
