pub mod examples;
pub mod low_level;
pub mod parallel;
pub mod spaces;
