//! PettingZoo-style parallel API over the behavior groups of a [`BaseEnv`](crate::low_level::BaseEnv).
//!
//! Each agent of a behavior `B` with simulation id `n` is addressed as `B?agent_id=n`.

mod base_env;
mod error;
mod helpers;
mod parallel_env;
mod types;

pub use base_env::UnityBaseEnv;
pub use error::EnvError;
pub use helpers::{
    agent_id_to_behavior, behavior_to_agent_id, parse_behavior, preprocess_single,
    unwrap_batch_steps, BehaviorId, UnwrappedBatch,
};
pub use parallel_env::{ParallelEnv, UnityParallelEnv};
pub use types::*;
