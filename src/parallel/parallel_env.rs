use rustc_hash::FxHashMap;

use super::{
    AgentId, AgentInfo, AgentObs, EnvConfig, EnvError, ResetOptions, StepOutput, UnityBaseEnv,
};
use crate::low_level::BaseEnv;
use crate::spaces::{Action, ActionSpace, Space};

/// Multi-agent environment where all live agents act simultaneously.
pub trait ParallelEnv {
    /// Starts a new episode and returns the initial observation and info of every agent.
    fn reset(
        &mut self,
        seed: Option<u64>,
        options: Option<&ResetOptions>,
    ) -> Result<(FxHashMap<AgentId, AgentObs>, FxHashMap<AgentId, AgentInfo>), EnvError>;

    /// Applies one action per agent and advances all agents by one step.
    fn step<I, K, A>(&mut self, actions: I) -> Result<StepOutput, EnvError>
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<AgentId>,
        A: Into<Option<Action>>;

    /// Agents that should receive an action in the next step.
    fn agents(&self) -> Vec<AgentId>;

    /// All agents that have been part of the current episode.
    fn possible_agents(&self) -> Vec<AgentId>;

    fn observation_space(&self, agent: &str) -> Result<Space, EnvError>;

    fn action_space(&self, agent: &str) -> Result<ActionSpace, EnvError>;

    fn close(&mut self);
}

/// [`ParallelEnv`] over the behavior groups of a [`BaseEnv`].
///
/// ```rust
/// use unity_gym_rs::examples::Ball3D;
/// use unity_gym_rs::parallel::{EnvConfig, ParallelEnv, UnityParallelEnv};
/// use unity_gym_rs::spaces::Action;
///
/// let mut env = UnityParallelEnv::new(Ball3D::new(2, 0), EnvConfig::default()).unwrap();
/// let (observations, _) = env.reset(None, None).unwrap();
/// assert_eq!(observations.len(), 2);
///
/// let actions = env
///     .agents()
///     .into_iter()
///     .map(|agent| (agent, None::<Action>))
///     .collect::<Vec<_>>();
/// let output = env.step(actions).unwrap();
/// assert_eq!(output.rewards.len(), 2);
/// ```
pub struct UnityParallelEnv<E: BaseEnv> {
    base: UnityBaseEnv<E>,
}

impl<E: BaseEnv> UnityParallelEnv<E> {
    pub fn new(env: E, config: EnvConfig) -> Result<Self, EnvError> {
        Ok(UnityParallelEnv {
            base: UnityBaseEnv::new(env, config)?,
        })
    }

    /// Per-agent state, spaces, sampling and side channels.
    pub fn base(&self) -> &UnityBaseEnv<E> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut UnityBaseEnv<E> {
        &mut self.base
    }

    pub fn sample_action(&mut self, agent: &str) -> Result<Action, EnvError> {
        self.base.sample_action(agent)
    }
}

impl<E: BaseEnv> ParallelEnv for UnityParallelEnv<E> {
    fn reset(
        &mut self,
        seed: Option<u64>,
        options: Option<&ResetOptions>,
    ) -> Result<(FxHashMap<AgentId, AgentObs>, FxHashMap<AgentId, AgentInfo>), EnvError> {
        self.base.reset(seed, options)?;
        Ok((self.base.observations(), self.base.infos()))
    }

    fn step<I, K, A>(&mut self, actions: I) -> Result<StepOutput, EnvError>
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<AgentId>,
        A: Into<Option<Action>>,
    {
        self.base.step(actions)?;
        Ok(StepOutput {
            observations: self.base.observations(),
            rewards: self.base.rewards(),
            terminations: self.base.terminations(),
            truncations: self.base.truncations(),
            infos: self.base.infos(),
        })
    }

    fn agents(&self) -> Vec<AgentId> {
        self.base.agents()
    }

    fn possible_agents(&self) -> Vec<AgentId> {
        self.base.possible_agents()
    }

    fn observation_space(&self, agent: &str) -> Result<Space, EnvError> {
        self.base.observation_space(agent).cloned()
    }

    fn action_space(&self, agent: &str) -> Result<ActionSpace, EnvError> {
        self.base.action_space(agent).cloned()
    }

    fn close(&mut self) {
        self.base.close()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::low_level::{
        decision_steps, terminal_steps, ActionSpec, BehaviorSpec, Frame, ObservationSpec,
        ScriptedEnv,
    };
    use crate::spaces::MultiDiscrete;
    use maplit::hashmap;
    use ndarray::{array, Array2};

    fn walker_env() -> ScriptedEnv {
        let spec = BehaviorSpec {
            observation_specs: vec![
                ObservationSpec {
                    name: "vector".to_string(),
                    shape: vec![2],
                },
                ObservationSpec {
                    name: "ray".to_string(),
                    shape: vec![4],
                },
            ],
            action_spec: ActionSpec::discrete(vec![2, 3]),
        };
        let obs = |n: usize| {
            vec![
                Array2::<f32>::zeros((n, 2)).into_dyn(),
                Array2::<f32>::zeros((n, 4)).into_dyn(),
            ]
        };
        let reset: Frame = hashmap! {
            "Walker".to_string() => (decision_steps(&[3, 5], obs(2), &[0.0, 0.0]), terminal_steps(&[], obs(0), &[], &[])),
        }
        .into_iter()
        .collect();
        let next: Frame = hashmap! {
            "Walker".to_string() => (decision_steps(&[5], obs(1), &[1.0]), terminal_steps(&[3], obs(1), &[2.0], &[false])),
        }
        .into_iter()
        .collect();
        ScriptedEnv::new(vec![("Walker".to_string(), spec)])
            .on_reset(reset)
            .then(next)
    }

    #[test]
    fn test_parallel_episode() {
        let mut env = UnityParallelEnv::new(walker_env(), EnvConfig::default()).unwrap();
        let (observations, infos) = env.reset(None, None).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(infos.len(), 2);
        assert_eq!(
            observations["Walker?agent_id=3"].sensors().len(),
            2
        );
        assert_eq!(
            env.action_space("Walker?agent_id=3").unwrap(),
            ActionSpace::MultiDiscrete(MultiDiscrete::new(vec![2, 3]))
        );
        assert_eq!(
            env.observation_space("Walker?agent_id=3")
                .unwrap()
                .to_string(),
            "Tuple(Box(-inf, inf, [2], float32), Box(-inf, inf, [4], float32))"
        );

        let output = env
            .step(hashmap! {
                "Walker?agent_id=3" => Action::MultiDiscrete(vec![1, 2]),
                "Walker?agent_id=5" => Action::MultiDiscrete(vec![0, 1]),
            })
            .unwrap();
        let submitted = &env.base().inner().unwrap().submitted()[0][0].1;
        assert_eq!(submitted.discrete, array![[1i32, 2], [0, 1]]);
        assert_eq!(output.rewards["Walker?agent_id=3"], 2.0);
        assert!(output.terminations["Walker?agent_id=3"]);
        assert!(!output.truncations["Walker?agent_id=3"]);
        assert!(!output.terminations["Walker?agent_id=5"]);
        assert_eq!(output.observations.len(), 2);
        assert_eq!(env.agents(), vec!["Walker?agent_id=5".to_string()]);
        assert_eq!(env.possible_agents().len(), 2);

        env.close();
        assert!(matches!(
            env.reset(None, None),
            Err(EnvError::NotLoaded)
        ));
    }
}
