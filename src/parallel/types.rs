use ndarray::{Array1, ArrayD};
use rustc_hash::FxHashMap;

/// Agent identity of the form `<behavior_name>?agent_id=<unique_id>`.
pub type AgentId = String;

/// Options passed to `reset`. Accepted for API compatibility only.
pub type ResetOptions = FxHashMap<String, String>;

/// One sensor's observation of a single agent.
#[derive(Debug, Clone, PartialEq)]
pub enum ObsArray {
    F32(ArrayD<f32>),
    U8(ArrayD<u8>),
}

impl ObsArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            ObsArray::F32(a) => a.shape(),
            ObsArray::U8(a) => a.shape(),
        }
    }

    /// Values as floats, regardless of the stored type.
    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            ObsArray::F32(a) => a.clone(),
            ObsArray::U8(a) => a.mapv(f32::from),
        }
    }
}

/// Observation of a single agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentObs {
    /// Behaviors with one sensor.
    Single(ObsArray),
    /// Behaviors with several sensors, in sensor order.
    Multi(Vec<ObsArray>),
    /// Behaviors with discrete action masks. Holds one mask per discrete branch.
    Masked {
        observation: Vec<ObsArray>,
        action_mask: Vec<Array1<bool>>,
    },
}

impl AgentObs {
    /// Collapses a single-sensor list to its only element.
    pub(crate) fn from_sensors(mut sensors: Vec<ObsArray>) -> AgentObs {
        if sensors.len() == 1 {
            AgentObs::Single(sensors.remove(0))
        } else {
            AgentObs::Multi(sensors)
        }
    }

    pub fn sensors(&self) -> &[ObsArray] {
        match self {
            AgentObs::Single(obs) => std::slice::from_ref(obs),
            AgentObs::Multi(obs) => obs,
            AgentObs::Masked { observation, .. } => observation,
        }
    }

    pub fn action_mask(&self) -> Option<&[Array1<bool>]> {
        match self {
            AgentObs::Masked { action_mask, .. } => Some(action_mask),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub behavior_name: String,
    pub group_id: i32,
    pub group_reward: f32,
    // Only set for agents reported in a terminal batch.
    pub interrupted: Option<bool>,
}

/// Per-agent results of a parallel step.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub observations: FxHashMap<AgentId, AgentObs>,
    pub rewards: FxHashMap<AgentId, f32>,
    pub terminations: FxHashMap<AgentId, bool>,
    pub truncations: FxHashMap<AgentId, bool>,
    pub infos: FxHashMap<AgentId, AgentInfo>,
}

/// Settings of a [`UnityParallelEnv`](super::UnityParallelEnv).
///
/// ```rust
/// use unity_gym_rs::parallel::EnvConfig;
///
/// let config = EnvConfig::default().uint8_visual(true).seed(Some(7));
/// assert!(config.uint8_visual);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Converts decision observations from `[0, 1]` floats to bytes.
    pub uint8_visual: bool,
    /// Seed used by `sample_action`.
    pub seed: Option<u64>,
}

impl EnvConfig {
    pub fn uint8_visual(mut self, uint8_visual: bool) -> Self {
        self.uint8_visual = uint8_visual;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}
