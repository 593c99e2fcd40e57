use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::bail;
use ndarray::{Array1, Array2, Array4, ArrayD};
use rand::prelude::*;

use crate::low_level::{
    ActionSpec, ActionTuple, BaseEnv, BehaviorName, BehaviorSpec, DecisionSteps, ObservationSpec,
    SideChannel, TerminalSteps,
};

pub const BEHAVIOR_NAME: &str = "3DBall?team=0";
const GRID: usize = 4;
const FALL_DISTANCE: f32 = 1.0;
const MAX_TILT: f32 = 0.5;
const TILT_SPEED: f32 = 0.1;
const GRAVITY: f32 = 0.05;
const STEP_REWARD: f32 = 0.1;
const FALL_REWARD: f32 = -1.0;

/// Balls balancing on tilting platforms, one agent per platform.
///
/// Each agent controls the tilt of its platform with two continuous actions. A ball that rolls
/// off ends the agent's episode with a reward of -1 and the platform respawns with a fresh agent
/// id. Agents that reach `max_step` are interrupted.
#[derive(Debug)]
pub struct Ball3D {
    num_agents: usize,
    max_step: usize,
    visual: bool,
    discrete_branches: Vec<usize>,

    rng: SmallRng,
    stats: Arc<BallStatsChannel>,
    platforms: Vec<Platform>,
    finished: Vec<Finished>,
    pending: Option<ActionTuple>,
    next_id: i32,
}

#[derive(Debug, Clone)]
struct Platform {
    id: i32,
    tilt: [f32; 2],
    position: [f32; 2],
    velocity: [f32; 2],
    step: usize,
    reward: f32,
}

#[derive(Debug)]
struct Finished {
    platform: Platform,
    interrupted: bool,
}

/// Counts the episodes started by a [`Ball3D`].
#[derive(Debug, Default)]
pub struct BallStatsChannel {
    episodes: AtomicU64,
}

impl BallStatsChannel {
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::SeqCst)
    }
}

impl SideChannel for BallStatsChannel {
    fn name(&self) -> &str {
        "stats"
    }

    fn channel_id(&self) -> &str {
        "a1d8f7b7-cec8-50f9-b78b-d3e165a78520"
    }
}

impl Ball3D {
    pub fn new(num_agents: usize, seed: u64) -> Ball3D {
        Ball3D {
            num_agents,
            max_step: 1000,
            visual: false,
            discrete_branches: vec![],

            rng: SmallRng::seed_from_u64(seed),
            stats: Arc::new(BallStatsChannel::default()),
            platforms: Vec::with_capacity(num_agents),
            finished: vec![],
            pending: None,
            next_id: 0,
        }
    }

    /// Adds a top-down `4x4x1` image sensor with values in `[0, 1]`.
    pub fn with_visual(mut self) -> Self {
        self.visual = true;
        self
    }

    /// Adds discrete branches next to the tilt. Choice 1 of the first branch brakes the ball.
    pub fn with_discrete(mut self, branches: Vec<usize>) -> Self {
        self.discrete_branches = branches;
        self
    }

    pub fn with_max_step(mut self, max_step: usize) -> Self {
        self.max_step = max_step;
        self
    }

    pub fn stats(&self) -> Arc<BallStatsChannel> {
        self.stats.clone()
    }

    fn spec(&self) -> BehaviorSpec {
        let mut observation_specs = vec![ObservationSpec {
            name: "vector".to_string(),
            shape: vec![8],
        }];
        if self.visual {
            observation_specs.push(ObservationSpec {
                name: "camera".to_string(),
                shape: vec![GRID, GRID, 1],
            });
        }
        BehaviorSpec {
            observation_specs,
            action_spec: ActionSpec {
                continuous_size: 2,
                discrete_branches: self.discrete_branches.clone(),
            },
        }
    }

    fn spawn(&mut self) -> Platform {
        let id = self.next_id;
        self.next_id += 1;
        Platform {
            id,
            tilt: [
                self.rng.gen_range(-0.1..0.1),
                self.rng.gen_range(-0.1..0.1),
            ],
            position: [
                self.rng.gen_range(-0.3..0.3),
                self.rng.gen_range(-0.3..0.3),
            ],
            velocity: [0.0, 0.0],
            step: 0,
            reward: 0.0,
        }
    }

    fn observe(&self, platforms: &[&Platform]) -> Vec<ArrayD<f32>> {
        let n = platforms.len();
        let mut vector = Array2::<f32>::zeros((n, 8));
        for (i, p) in platforms.iter().enumerate() {
            let row = [
                p.tilt[0],
                p.tilt[1],
                p.position[0],
                0.5,
                p.position[1],
                p.velocity[0],
                0.0,
                p.velocity[1],
            ];
            vector.row_mut(i).assign(&Array1::from(row.to_vec()));
        }
        let mut obs = vec![vector.into_dyn()];
        if self.visual {
            let mut camera = Array4::<f32>::zeros((n, GRID, GRID, 1));
            for (i, p) in platforms.iter().enumerate() {
                let cell = |v: f32| {
                    let scaled = (v + FALL_DISTANCE) / (2.0 * FALL_DISTANCE) * GRID as f32;
                    (scaled.max(0.0) as usize).min(GRID - 1)
                };
                camera[[i, cell(p.position[0]), cell(p.position[1]), 0]] = 1.0;
            }
            obs.push(camera.into_dyn());
        }
        obs
    }
}

impl BaseEnv for Ball3D {
    fn behavior_specs(&self) -> Vec<(BehaviorName, BehaviorSpec)> {
        vec![(BEHAVIOR_NAME.to_string(), self.spec())]
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.stats.episodes.fetch_add(1, Ordering::SeqCst);
        self.next_id = 0;
        self.finished.clear();
        self.pending = None;
        self.platforms = (0..self.num_agents).map(|_| self.spawn()).collect();
        Ok(())
    }

    fn step(&mut self) -> anyhow::Result<()> {
        let actions = match self.pending.take() {
            Some(actions) => actions,
            None => ActionTuple::zeros(&self.spec().action_spec, self.platforms.len()),
        };
        self.finished.clear();
        let mut platforms = std::mem::take(&mut self.platforms);
        for (i, p) in platforms.iter_mut().enumerate() {
            for axis in 0..2 {
                let action = actions.continuous[[i, axis]].clamp(-1.0, 1.0);
                p.tilt[axis] = (p.tilt[axis] + TILT_SPEED * action).clamp(-MAX_TILT, MAX_TILT);
                p.velocity[axis] += GRAVITY * p.tilt[axis];
            }
            if actions.discrete.ncols() > 0 && actions.discrete[[i, 0]] == 1 {
                p.velocity = [p.velocity[0] * 0.5, p.velocity[1] * 0.5];
            }
            for axis in 0..2 {
                p.position[axis] += p.velocity[axis];
            }
            p.step += 1;
            p.reward = STEP_REWARD;
        }

        for p in platforms {
            let fell = p.position.iter().any(|x| x.abs() > FALL_DISTANCE);
            if fell || p.step >= self.max_step {
                let reward = if fell { FALL_REWARD } else { p.reward };
                self.finished.push(Finished {
                    platform: Platform { reward, ..p },
                    interrupted: !fell,
                });
                let replacement = self.spawn();
                self.platforms.push(replacement);
            } else {
                self.platforms.push(p);
            }
        }
        if !self.finished.is_empty() {
            tracing::trace!(finished = self.finished.len(), "respawned platforms");
        }
        Ok(())
    }

    fn get_steps(&self, behavior_name: &str) -> anyhow::Result<(DecisionSteps, TerminalSteps)> {
        if behavior_name != BEHAVIOR_NAME {
            bail!("unknown behavior \"{}\"", behavior_name);
        }
        let live = self.platforms.iter().collect::<Vec<_>>();
        let n = live.len();
        let action_mask = if self.discrete_branches.is_empty() {
            None
        } else {
            Some(
                self.discrete_branches
                    .iter()
                    .map(|&choices| Array2::from_elem((n, choices), true))
                    .collect(),
            )
        };
        let decision = DecisionSteps {
            obs: self.observe(&live),
            reward: live.iter().map(|p| p.reward).collect(),
            agent_id: live.iter().map(|p| p.id).collect(),
            action_mask,
            group_id: Array1::zeros(n),
            group_reward: Array1::zeros(n),
        };

        let done = self.finished.iter().map(|f| &f.platform).collect::<Vec<_>>();
        let m = done.len();
        let terminal = TerminalSteps {
            obs: self.observe(&done),
            reward: done.iter().map(|p| p.reward).collect(),
            interrupted: self.finished.iter().map(|f| f.interrupted).collect(),
            agent_id: done.iter().map(|p| p.id).collect(),
            group_id: Array1::zeros(m),
            group_reward: Array1::zeros(m),
        };
        Ok((decision, terminal))
    }

    fn set_actions(&mut self, behavior_name: &str, action: ActionTuple) -> anyhow::Result<()> {
        if behavior_name != BEHAVIOR_NAME {
            bail!("unknown behavior \"{}\"", behavior_name);
        }
        if action.num_agents() != self.platforms.len() || action.continuous.ncols() != 2 {
            bail!(
                "expected actions for {} agents, got {:?}",
                self.platforms.len(),
                action.continuous.shape()
            );
        }
        self.pending = Some(action);
        Ok(())
    }

    fn side_channels(&self) -> Vec<Arc<dyn SideChannel>> {
        vec![self.stats.clone()]
    }

    fn close(&mut self) {
        self.platforms.clear();
        self.finished.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parallel::{EnvConfig, ObsArray, ParallelEnv, UnityParallelEnv};
    use crate::spaces::{Action, ActionSpace};

    #[test]
    fn test_first_step_keeps_every_ball() {
        let mut env = Ball3D::new(8, 3);
        env.reset().unwrap();
        env.step().unwrap();
        let (decision, terminal) = env.get_steps(BEHAVIOR_NAME).unwrap();
        assert_eq!(decision.len(), 8);
        assert!(terminal.is_empty());
        assert_eq!(decision.reward.to_vec(), vec![STEP_REWARD; 8]);
        assert_eq!(decision.obs[0].shape(), &[8, 8]);
    }

    #[test]
    fn test_falling_ball_respawns() {
        let mut env = Ball3D::new(1, 0);
        env.reset().unwrap();
        let mut terminal_seen = None;
        for _ in 0..200 {
            env.set_actions(
                BEHAVIOR_NAME,
                ActionTuple {
                    continuous: Array2::from_elem((1, 2), 1.0),
                    discrete: Array2::zeros((1, 0)),
                },
            )
            .unwrap();
            env.step().unwrap();
            let (decision, terminal) = env.get_steps(BEHAVIOR_NAME).unwrap();
            assert_eq!(decision.len(), 1);
            if !terminal.is_empty() {
                terminal_seen = Some((decision, terminal));
                break;
            }
        }
        let (decision, terminal) = terminal_seen.unwrap();
        assert_eq!(terminal.agent_id.to_vec(), vec![0]);
        assert_eq!(terminal.reward.to_vec(), vec![FALL_REWARD]);
        assert_eq!(terminal.interrupted.to_vec(), vec![false]);
        assert_eq!(decision.agent_id.to_vec(), vec![1]);
        assert_eq!(decision.reward.to_vec(), vec![0.0]);
    }

    #[test]
    fn test_max_step_interrupts() {
        let mut env = Ball3D::new(2, 0).with_max_step(1);
        env.reset().unwrap();
        env.step().unwrap();
        let (decision, terminal) = env.get_steps(BEHAVIOR_NAME).unwrap();
        assert_eq!(terminal.interrupted.to_vec(), vec![true, true]);
        assert_eq!(decision.agent_id.to_vec(), vec![2, 3]);
    }

    #[test]
    fn test_rejects_wrong_batch_size() {
        let mut env = Ball3D::new(2, 0);
        env.reset().unwrap();
        let actions = ActionTuple::zeros(&ActionSpec::continuous(2), 3);
        assert!(env.set_actions(BEHAVIOR_NAME, actions).is_err());
        assert!(env.get_steps("Other").is_err());
    }

    #[test]
    fn test_episode_counter() {
        let mut env = Ball3D::new(1, 0);
        let stats = env.stats();
        env.reset().unwrap();
        env.reset().unwrap();
        assert_eq!(stats.episodes(), 2);
    }

    #[test]
    fn test_parallel_visual_discrete() {
        let ball = Ball3D::new(2, 5).with_visual().with_discrete(vec![2]);
        let mut env = UnityParallelEnv::new(ball, EnvConfig::default().uint8_visual(true)).unwrap();
        let (observations, _) = env.reset(None, None).unwrap();
        let agent = "3DBall?team=0?agent_id=0";

        let obs = &observations[agent];
        assert_eq!(obs.sensors().len(), 2);
        assert_eq!(obs.sensors()[1].shape(), &[4, 4, 1]);
        assert!(matches!(obs.sensors()[1], ObsArray::U8(_)));
        assert_eq!(obs.action_mask().map(|m| m.len()), Some(1));
        assert!(matches!(
            env.action_space(agent).unwrap(),
            ActionSpace::Mixed { .. }
        ));

        let output = env
            .step(vec![(
                agent,
                Action::Mixed {
                    continuous: vec![0.0, 0.0],
                    discrete: vec![1],
                },
            )])
            .unwrap();
        assert_eq!(output.rewards[agent], STEP_REWARD);
        assert_eq!(env.agents().len(), 2);
    }

    #[test]
    fn test_random_rollout() {
        let mut env = UnityParallelEnv::new(
            Ball3D::new(4, 1).with_max_step(20),
            EnvConfig::default().seed(Some(1)),
        )
        .unwrap();
        env.reset(None, None).unwrap();
        for _ in 0..60 {
            let mut actions = vec![];
            for agent in env.agents() {
                actions.push((agent.clone(), Some(env.sample_action(&agent).unwrap())));
            }
            let output = env.step(actions).unwrap();
            assert_eq!(env.agents().len(), 4);
            assert!(output.terminations.len() >= 4);
        }
        assert!(env.possible_agents().len() > 4);
    }
}
