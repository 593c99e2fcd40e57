use std::collections::BTreeSet;
use std::sync::Arc;

use ndarray::ArrayD;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};

use super::helpers::{agent_id_to_behavior, unwrap_batch_steps};
use super::{AgentId, AgentInfo, AgentObs, EnvConfig, EnvError, ResetOptions};
use crate::low_level::{ActionSpec, ActionTuple, BaseEnv, BehaviorName, SideChannel};
use crate::spaces::{Action, ActionSpace, SplitAction, Space};

/// Tracks the agents of a [`BaseEnv`] across steps.
///
/// Every step the simulation reports one decision batch and one terminal batch per behavior.
/// `UnityBaseEnv` turns those into per-agent maps, keeps the set of live agents and of every agent
/// seen since the last reset, and scatters per-agent actions back into one [`ActionTuple`] per
/// behavior.
///
/// Agents reported as terminated or truncated stay readable for one step: they are left out of
/// [`agents`](Self::agents) right away, but their reward, info and observation remain until an
/// action (possibly `None`) is submitted for them or the next step replaces all per-agent state.
pub struct UnityBaseEnv<E: BaseEnv> {
    env: Option<E>,
    config: EnvConfig,
    rng: SmallRng,
    side_channels: FxHashMap<String, Arc<dyn SideChannel>>,

    behavior_names: Vec<BehaviorName>,
    action_specs: FxHashMap<BehaviorName, ActionSpec>,
    observation_spaces: FxHashMap<BehaviorName, Space>,
    action_spaces: FxHashMap<BehaviorName, ActionSpace>,

    live_agents: Vec<AgentId>,
    possible_agents: BTreeSet<AgentId>,
    agent_id_to_index: FxHashMap<AgentId, usize>,
    observations: FxHashMap<AgentId, AgentObs>,
    terminations: FxHashMap<AgentId, bool>,
    truncations: FxHashMap<AgentId, bool>,
    rewards: FxHashMap<AgentId, f32>,
    cumulative_rewards: FxHashMap<AgentId, f32>,
    infos: FxHashMap<AgentId, AgentInfo>,
    current_action: FxHashMap<BehaviorName, ActionTuple>,
}

impl<E: BaseEnv> UnityBaseEnv<E> {
    /// Wraps `env` and derives the spaces of every behavior it advertises.
    ///
    /// If the simulation has not advertised any behavior yet, it is stepped once so that the
    /// specs arrive. No agents are tracked until the first [`reset`](Self::reset).
    pub fn new(env: E, config: EnvConfig) -> Result<Self, EnvError> {
        let mut base = UnityBaseEnv {
            env: Some(env),
            rng: seeded_rng(config.seed),
            config,
            side_channels: FxHashMap::default(),
            behavior_names: vec![],
            action_specs: FxHashMap::default(),
            observation_spaces: FxHashMap::default(),
            action_spaces: FxHashMap::default(),
            live_agents: vec![],
            possible_agents: BTreeSet::new(),
            agent_id_to_index: FxHashMap::default(),
            observations: FxHashMap::default(),
            terminations: FxHashMap::default(),
            truncations: FxHashMap::default(),
            rewards: FxHashMap::default(),
            cumulative_rewards: FxHashMap::default(),
            infos: FxHashMap::default(),
            current_action: FxHashMap::default(),
        };
        if base.loaded()?.behavior_specs().is_empty() {
            base.loaded_mut()?.step()?;
        }
        base.update_spaces()?;
        base.side_channels = base
            .loaded()?
            .side_channels()
            .into_iter()
            .map(|channel| (channel.name().to_string(), channel))
            .collect();
        Ok(base)
    }

    fn loaded(&self) -> Result<&E, EnvError> {
        self.env.as_ref().ok_or(EnvError::NotLoaded)
    }

    fn loaded_mut(&mut self) -> Result<&mut E, EnvError> {
        self.env.as_mut().ok_or(EnvError::NotLoaded)
    }

    /// The wrapped simulation.
    pub fn inner(&self) -> Result<&E, EnvError> {
        self.loaded()
    }

    pub fn is_loaded(&self) -> bool {
        self.env.is_some()
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Behaviors in the order the simulation advertised them.
    pub fn behavior_names(&self) -> &[BehaviorName] {
        &self.behavior_names
    }

    // Behaviors keep the spaces they were first seen with, later specs only add new behaviors.
    fn update_spaces(&mut self) -> Result<(), EnvError> {
        let specs = self.loaded()?.behavior_specs();
        for (behavior_name, spec) in specs {
            if self.action_spaces.contains_key(&behavior_name) {
                continue;
            }
            let action_space = ActionSpace::from_spec(&spec.action_spec)
                .ok_or_else(|| EnvError::UnsupportedConfiguration(behavior_name.clone()))?;
            self.observation_spaces.insert(
                behavior_name.clone(),
                Space::from_observation_specs(&spec.observation_specs, self.config.uint8_visual),
            );
            self.action_spaces
                .insert(behavior_name.clone(), action_space);
            self.action_specs
                .insert(behavior_name.clone(), spec.action_spec);
            self.behavior_names.push(behavior_name);
        }
        Ok(())
    }

    /// Resets the simulation and rebuilds all per-agent state.
    ///
    /// `seed` and `options` are accepted for API compatibility, reseeding a running simulation is not supported.
    pub fn reset(
        &mut self,
        seed: Option<u64>,
        options: Option<&ResetOptions>,
    ) -> Result<(), EnvError> {
        self.loaded()?;
        if seed.is_some() || options.is_some() {
            tracing::warn!(
                ?seed,
                has_options = options.is_some(),
                "reset seed and options are not supported and will be ignored"
            );
        }
        self.reset_states();
        self.possible_agents.clear();
        self.loaded_mut()?.reset()?;
        self.update_spaces()?;
        let carried = FxHashMap::default();
        for behavior_name in self.behavior_names.clone() {
            self.batch_update(&behavior_name, &carried)?;
        }
        self.live_agents.sort();
        let agents = self.observations.keys().cloned().collect::<Vec<_>>();
        self.terminations = agents.iter().map(|a| (a.clone(), false)).collect();
        self.truncations = agents.iter().map(|a| (a.clone(), false)).collect();
        self.rewards = agents.iter().map(|a| (a.clone(), 0.0)).collect();
        self.cumulative_rewards = agents.into_iter().map(|a| (a, 0.0)).collect();
        tracing::debug!(agents = self.live_agents.len(), "environment reset");
        Ok(())
    }

    /// Submits one action per agent and advances the simulation by a single step.
    ///
    /// Fails with [`EnvError::PrematureStep`] if actions are submitted while no agent is live.
    /// All actions are validated before any is applied. Submitting an action (or `None`) for
    /// an agent that was reported as terminated or truncated removes it for good.
    pub fn step<I, K, A>(&mut self, actions: I) -> Result<(), EnvError>
    where
        I: IntoIterator<Item = (K, A)>,
        K: Into<AgentId>,
        A: Into<Option<Action>>,
    {
        self.loaded()?;
        let actions = actions
            .into_iter()
            .map(|(agent, action)| (agent.into(), action.into()))
            .collect::<Vec<(AgentId, Option<Action>)>>();
        if self.live_agents.is_empty() && !actions.is_empty() {
            return Err(EnvError::PrematureStep);
        }
        tracing::debug!(
            agents = self.live_agents.len(),
            actions = actions.len(),
            "stepping environment"
        );

        let mut pending = Vec::with_capacity(actions.len());
        for (agent_id, action) in actions {
            let split = self.validate_action(&agent_id, action.as_ref())?;
            pending.push((agent_id, split));
        }
        for (agent_id, split) in pending {
            self.process_action(&agent_id, split);
        }

        for reward in self.rewards.values_mut() {
            *reward = 0.0;
        }

        self.step_env()?;

        self.cleanup_agents();
        self.live_agents.sort();
        Ok(())
    }

    fn validate_action(
        &self,
        agent_id: &str,
        action: Option<&Action>,
    ) -> Result<Option<SplitAction>, EnvError> {
        if !self.terminations.contains_key(agent_id) {
            return Err(EnvError::AgentNotFound(agent_id.to_string()));
        }
        let action_space = self.action_space(agent_id)?;
        match action {
            None => Ok(None),
            Some(action) => match action_space.split(action) {
                Some(split) => Ok(Some(split)),
                None => Err(EnvError::InvalidAction {
                    agent: agent_id.to_string(),
                    action: format!("{:?}", action),
                    expected: action_space.to_string(),
                }),
            },
        }
    }

    fn process_action(&mut self, agent_id: &str, split: Option<SplitAction>) {
        let (terminated, truncated) = match (
            self.terminations.get(agent_id),
            self.truncations.get(agent_id),
        ) {
            (Some(&terminated), truncated) => (terminated, truncated.copied().unwrap_or(false)),
            // Already removed by an earlier action in the same step.
            (None, _) => return,
        };
        if terminated || truncated {
            self.remove_agent(agent_id);
            return;
        }

        let split = match split {
            Some(split) => split,
            None => return,
        };
        let behavior_name = agent_id_to_behavior(agent_id);
        let index = match self.agent_id_to_index.get(agent_id) {
            Some(&index) => index,
            None => return,
        };
        if let Some(buffer) = self.current_action.get_mut(behavior_name) {
            if let Some(continuous) = split.continuous {
                buffer.continuous.row_mut(index).assign(&continuous);
            }
            if let Some(discrete) = split.discrete {
                buffer.discrete.row_mut(index).assign(&discrete);
            }
        }
    }

    fn remove_agent(&mut self, agent_id: &str) {
        self.live_agents.retain(|a| a != agent_id);
        self.observations.remove(agent_id);
        self.terminations.remove(agent_id);
        self.truncations.remove(agent_id);
        self.rewards.remove(agent_id);
        self.cumulative_rewards.remove(agent_id);
        self.infos.remove(agent_id);
        tracing::debug!(agent = agent_id, "removed finished agent");
    }

    fn step_env(&mut self) -> Result<(), EnvError> {
        let env = self.env.as_mut().ok_or(EnvError::NotLoaded)?;
        for behavior_name in &self.behavior_names {
            if let Some(actions) = self.current_action.remove(behavior_name) {
                env.set_actions(behavior_name, actions)?;
            }
        }
        env.step()?;

        let carried = self.running_cumulative_rewards();
        self.reset_states();
        self.update_spaces()?;
        for behavior_name in self.behavior_names.clone() {
            self.batch_update(&behavior_name, &carried)?;
        }
        Ok(())
    }

    // Cumulative rewards of agents that are still running and will keep accumulating.
    fn running_cumulative_rewards(&self) -> FxHashMap<AgentId, f32> {
        self.cumulative_rewards
            .iter()
            .filter(|(agent_id, _)| !self.is_done(agent_id))
            .map(|(agent_id, &reward)| (agent_id.clone(), reward))
            .collect()
    }

    fn is_done(&self, agent_id: &str) -> bool {
        self.terminations.get(agent_id).copied().unwrap_or(false)
            || self.truncations.get(agent_id).copied().unwrap_or(false)
    }

    fn cleanup_agents(&mut self) {
        let terminations = &self.terminations;
        let truncations = &self.truncations;
        self.live_agents.retain(|agent_id| {
            !(terminations.get(agent_id).copied().unwrap_or(false)
                || truncations.get(agent_id).copied().unwrap_or(false))
        });
    }

    fn reset_states(&mut self) {
        self.live_agents.clear();
        self.agent_id_to_index.clear();
        self.observations.clear();
        self.terminations.clear();
        self.truncations.clear();
        self.rewards.clear();
        self.cumulative_rewards.clear();
        self.infos.clear();
        self.current_action.clear();
    }

    fn batch_update(
        &mut self,
        behavior_name: &str,
        carried: &FxHashMap<AgentId, f32>,
    ) -> Result<(), EnvError> {
        let (decision, terminal) = self.loaded()?.get_steps(behavior_name)?;
        let action_spec = self
            .action_specs
            .get(behavior_name)
            .ok_or_else(|| EnvError::UnknownBehavior(behavior_name.to_string()))?;
        self.current_action.insert(
            behavior_name.to_string(),
            ActionTuple::zeros(action_spec, decision.len()),
        );

        let batch = unwrap_batch_steps(
            &decision,
            &terminal,
            behavior_name,
            self.config.uint8_visual,
        );
        let mut known = self.live_agents.iter().cloned().collect::<FxHashSet<_>>();
        for agent_id in &batch.agent_ids {
            if known.insert(agent_id.clone()) {
                self.live_agents.push(agent_id.clone());
            }
        }
        self.possible_agents
            .extend(batch.agent_ids.iter().cloned());

        for (agent_id, info) in &batch.infos {
            // A terminal entry only counts if the same id did not also ask for a new decision.
            let terminated = batch.terminations.get(agent_id).copied().unwrap_or(false);
            let truncated = terminated && info.interrupted.unwrap_or(false);
            self.truncations.insert(agent_id.clone(), truncated);
        }
        for (agent_id, reward) in batch.cumulative_rewards {
            let previous = carried.get(&agent_id).copied().unwrap_or(0.0);
            self.cumulative_rewards.insert(agent_id, previous + reward);
        }
        self.observations.extend(batch.observations);
        self.terminations.extend(batch.terminations);
        self.rewards.extend(batch.rewards);
        self.infos.extend(batch.infos);
        self.agent_id_to_index.extend(batch.index_map);
        Ok(())
    }

    /// Agents that can act this step, sorted.
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents = self.live_agents.clone();
        agents.sort();
        agents
    }

    /// Every agent seen since the last reset, sorted.
    pub fn possible_agents(&self) -> Vec<AgentId> {
        self.possible_agents.iter().cloned().collect()
    }

    pub fn observations(&self) -> FxHashMap<AgentId, AgentObs> {
        self.observations.clone()
    }

    pub fn rewards(&self) -> FxHashMap<AgentId, f32> {
        self.rewards.clone()
    }

    pub fn cumulative_rewards(&self) -> FxHashMap<AgentId, f32> {
        self.cumulative_rewards.clone()
    }

    pub fn terminations(&self) -> FxHashMap<AgentId, bool> {
        self.terminations.clone()
    }

    pub fn truncations(&self) -> FxHashMap<AgentId, bool> {
        self.truncations.clone()
    }

    pub fn infos(&self) -> FxHashMap<AgentId, AgentInfo> {
        self.infos.clone()
    }

    pub fn observation_space(&self, agent_id: &str) -> Result<&Space, EnvError> {
        self.loaded()?;
        let behavior_name = agent_id_to_behavior(agent_id);
        self.observation_spaces
            .get(behavior_name)
            .ok_or_else(|| EnvError::UnknownBehavior(behavior_name.to_string()))
    }

    pub fn action_space(&self, agent_id: &str) -> Result<&ActionSpace, EnvError> {
        self.loaded()?;
        let behavior_name = agent_id_to_behavior(agent_id);
        self.action_spaces
            .get(behavior_name)
            .ok_or_else(|| EnvError::UnknownBehavior(behavior_name.to_string()))
    }

    /// Observation space of every possible agent.
    pub fn observation_spaces(&self) -> Result<FxHashMap<AgentId, Space>, EnvError> {
        self.possible_agents
            .iter()
            .map(|agent_id| -> Result<(AgentId, Space), EnvError> {
                Ok((agent_id.clone(), self.observation_space(agent_id)?.clone()))
            })
            .collect()
    }

    /// Action space of every possible agent.
    pub fn action_spaces(&self) -> Result<FxHashMap<AgentId, ActionSpace>, EnvError> {
        self.possible_agents
            .iter()
            .map(|agent_id| -> Result<(AgentId, ActionSpace), EnvError> {
                Ok((agent_id.clone(), self.action_space(agent_id)?.clone()))
            })
            .collect()
    }

    /// Draws a random action from the agent's action space using the configured seed.
    pub fn sample_action(&mut self, agent_id: &str) -> Result<Action, EnvError> {
        self.loaded()?;
        let behavior_name = agent_id_to_behavior(agent_id);
        let action_space = self
            .action_spaces
            .get(behavior_name)
            .ok_or_else(|| EnvError::UnknownBehavior(behavior_name.to_string()))?;
        Ok(action_space.sample(&mut self.rng))
    }

    /// Reseeds `sample_action`. Takes effect immediately.
    pub fn seed(&mut self, seed: Option<u64>) {
        self.config.seed = seed;
        self.rng = seeded_rng(seed);
    }

    pub fn side_channel(&self, name: &str) -> Result<Option<Arc<dyn SideChannel>>, EnvError> {
        self.loaded()?;
        Ok(self.side_channels.get(name).cloned())
    }

    pub fn side_channels(&self) -> Result<FxHashMap<String, Arc<dyn SideChannel>>, EnvError> {
        self.loaded()?;
        Ok(self.side_channels.clone())
    }

    /// Not supported.
    pub fn render(&self) {
        tracing::debug!("render is not supported");
    }

    /// Not supported, always `None`.
    pub fn state(&self) -> Option<ArrayD<f32>> {
        None
    }

    /// Closes the simulation. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(mut env) = self.env.take() {
            env.close();
            tracing::info!("environment closed");
        }
    }
}

impl<E: BaseEnv> Drop for UnityBaseEnv<E> {
    fn drop(&mut self) {
        self.close();
    }
}

fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    }
}
