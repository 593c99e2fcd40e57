use std::fmt::Debug;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayD, IxDyn};

pub type BehaviorName = String;

/// Interface of a simulation that groups its agents into named behaviors.
///
/// Every behavior exchanges state in batches: one [`DecisionSteps`] for the agents that
/// are waiting on an action and one [`TerminalSteps`] for the agents that ended during
/// the last step. All calls are blocking.
pub trait BaseEnv {
    fn behavior_specs(&self) -> Vec<(BehaviorName, BehaviorSpec)>;

    fn reset(&mut self) -> anyhow::Result<()>;
    fn step(&mut self) -> anyhow::Result<()>;
    fn get_steps(&self, behavior_name: &str) -> anyhow::Result<(DecisionSteps, TerminalSteps)>;
    fn set_actions(&mut self, behavior_name: &str, action: ActionTuple) -> anyhow::Result<()>;

    fn side_channels(&self) -> Vec<Arc<dyn SideChannel>> {
        vec![]
    }
    fn close(&mut self) {}
}

/// Auxiliary channel registered with a simulation. The adapter never looks inside.
pub trait SideChannel: Debug + Send + Sync {
    fn name(&self) -> &str;
    fn channel_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionSpec {
    pub continuous_size: usize,
    pub discrete_branches: Vec<usize>,
}

impl ActionSpec {
    pub fn continuous(size: usize) -> ActionSpec {
        ActionSpec {
            continuous_size: size,
            discrete_branches: vec![],
        }
    }

    pub fn discrete(branches: Vec<usize>) -> ActionSpec {
        ActionSpec {
            continuous_size: 0,
            discrete_branches: branches,
        }
    }

    pub fn discrete_size(&self) -> usize {
        self.discrete_branches.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorSpec {
    pub observation_specs: Vec<ObservationSpec>,
    pub action_spec: ActionSpec,
}

/// Agents that requested a decision during the last step.
///
/// The leading axis of every array is the agent slot.
#[derive(Debug, Clone)]
pub struct DecisionSteps {
    pub obs: Vec<ArrayD<f32>>,
    pub reward: Array1<f32>,
    pub agent_id: Array1<i32>,
    // One (agents, branch_size) mask per discrete branch, `true` marks an allowed choice.
    pub action_mask: Option<Vec<Array2<bool>>>,
    pub group_id: Array1<i32>,
    pub group_reward: Array1<f32>,
}

/// Agents whose episode ended during the last step.
#[derive(Debug, Clone)]
pub struct TerminalSteps {
    pub obs: Vec<ArrayD<f32>>,
    pub reward: Array1<f32>,
    // Set when the agent was cut off (step limit, interruption) rather than finishing.
    pub interrupted: Array1<bool>,
    pub agent_id: Array1<i32>,
    pub group_id: Array1<i32>,
    pub group_reward: Array1<f32>,
}

/// Batched actions of one behavior, one row per decision slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTuple {
    pub continuous: Array2<f32>,
    pub discrete: Array2<i32>,
}

fn empty_obs(spec: &BehaviorSpec) -> Vec<ArrayD<f32>> {
    spec.observation_specs
        .iter()
        .map(|o| {
            let mut shape = Vec::with_capacity(o.shape.len() + 1);
            shape.push(0);
            shape.extend_from_slice(&o.shape);
            ArrayD::zeros(IxDyn(&shape))
        })
        .collect()
}

impl DecisionSteps {
    pub fn empty(spec: &BehaviorSpec) -> DecisionSteps {
        DecisionSteps {
            obs: empty_obs(spec),
            reward: Array1::zeros(0),
            agent_id: Array1::zeros(0),
            action_mask: None,
            group_id: Array1::zeros(0),
            group_reward: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.agent_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_id.is_empty()
    }
}

impl TerminalSteps {
    pub fn empty(spec: &BehaviorSpec) -> TerminalSteps {
        TerminalSteps {
            obs: empty_obs(spec),
            reward: Array1::zeros(0),
            interrupted: Array1::from_elem(0, false),
            agent_id: Array1::zeros(0),
            group_id: Array1::zeros(0),
            group_reward: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.agent_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_id.is_empty()
    }
}

impl ActionTuple {
    /// All-zero actions for `num_agents` decision slots.
    pub fn zeros(spec: &ActionSpec, num_agents: usize) -> ActionTuple {
        ActionTuple {
            continuous: Array2::zeros((num_agents, spec.continuous_size)),
            discrete: Array2::zeros((num_agents, spec.discrete_size())),
        }
    }

    pub fn num_agents(&self) -> usize {
        self.continuous.nrows()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec() -> BehaviorSpec {
        BehaviorSpec {
            observation_specs: vec![
                ObservationSpec {
                    name: "vector".to_string(),
                    shape: vec![8],
                },
                ObservationSpec {
                    name: "camera".to_string(),
                    shape: vec![4, 4, 1],
                },
            ],
            action_spec: ActionSpec {
                continuous_size: 2,
                discrete_branches: vec![3, 2],
            },
        }
    }

    #[test]
    fn test_empty_batches_keep_sensor_shapes() {
        let decision = DecisionSteps::empty(&spec());
        assert!(decision.is_empty());
        assert_eq!(decision.obs[0].shape(), &[0, 8]);
        assert_eq!(decision.obs[1].shape(), &[0, 4, 4, 1]);

        let terminal = TerminalSteps::empty(&spec());
        assert_eq!(terminal.len(), 0);
        assert_eq!(terminal.obs.len(), 2);
    }

    #[test]
    fn test_zero_actions() {
        let actions = ActionTuple::zeros(&spec().action_spec, 3);
        assert_eq!(actions.continuous.shape(), &[3, 2]);
        assert_eq!(actions.discrete.shape(), &[3, 2]);
        assert_eq!(actions.num_agents(), 3);
        assert!(actions.continuous.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_discrete_size() {
        assert_eq!(ActionSpec::discrete(vec![5]).discrete_size(), 1);
        assert_eq!(ActionSpec::continuous(2).discrete_size(), 0);
    }
}
