use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::anyhow;
use ndarray::{Array1, ArrayD};
use rustc_hash::FxHashMap;

use super::{
    ActionTuple, BaseEnv, BehaviorName, BehaviorSpec, DecisionSteps, SideChannel, TerminalSteps,
};

/// Batches of every behavior for one point in time.
pub type Frame = FxHashMap<BehaviorName, (DecisionSteps, TerminalSteps)>;

/// A [`BaseEnv`] that replays a fixed script of batches.
///
/// Test support, only built for tests and with the `testing` feature.
///
/// `reset` shows the reset frame, every `step` advances to the next queued frame (or to empty
/// batches once the script runs out). Actions passed to `set_actions` are recorded per step.
#[derive(Debug)]
pub struct ScriptedEnv {
    specs: Vec<(BehaviorName, BehaviorSpec)>,
    hide_specs_until_step: bool,
    reset_frame: Frame,
    script: VecDeque<Frame>,
    current: Frame,
    pending: Vec<(BehaviorName, ActionTuple)>,
    submitted: Vec<Vec<(BehaviorName, ActionTuple)>>,
    side_channels: Vec<Arc<dyn SideChannel>>,
    steps: usize,
    resets: usize,
    closed: usize,
}

impl ScriptedEnv {
    pub fn new(specs: Vec<(BehaviorName, BehaviorSpec)>) -> ScriptedEnv {
        ScriptedEnv {
            specs,
            hide_specs_until_step: false,
            reset_frame: Frame::default(),
            script: VecDeque::new(),
            current: Frame::default(),
            pending: vec![],
            submitted: vec![],
            side_channels: vec![],
            steps: 0,
            resets: 0,
            closed: 0,
        }
    }

    /// Frame shown after every `reset`.
    pub fn on_reset(mut self, frame: Frame) -> Self {
        self.reset_frame = frame;
        self
    }

    /// Queues the frame shown after the next unconsumed `step`.
    pub fn then(mut self, frame: Frame) -> Self {
        self.script.push_back(frame);
        self
    }

    /// Advertises no behaviors until the first `step`, like a simulation that has not connected yet.
    pub fn hide_specs_until_step(mut self) -> Self {
        self.hide_specs_until_step = true;
        self
    }

    pub fn with_side_channel(mut self, channel: Arc<dyn SideChannel>) -> Self {
        self.side_channels.push(channel);
        self
    }

    /// Actions received before each `step`, in the order they were set.
    pub fn submitted(&self) -> &[Vec<(BehaviorName, ActionTuple)>] {
        &self.submitted
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn close_count(&self) -> usize {
        self.closed
    }

    fn spec(&self, behavior_name: &str) -> anyhow::Result<&BehaviorSpec> {
        self.specs
            .iter()
            .find(|(name, _)| name == behavior_name)
            .map(|(_, spec)| spec)
            .ok_or_else(|| anyhow!("unknown behavior \"{}\"", behavior_name))
    }
}

impl BaseEnv for ScriptedEnv {
    fn behavior_specs(&self) -> Vec<(BehaviorName, BehaviorSpec)> {
        if self.hide_specs_until_step && self.steps == 0 {
            return vec![];
        }
        self.specs.clone()
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.resets += 1;
        self.pending.clear();
        self.current = self.reset_frame.clone();
        Ok(())
    }

    fn step(&mut self) -> anyhow::Result<()> {
        self.steps += 1;
        self.submitted.push(std::mem::take(&mut self.pending));
        self.current = self.script.pop_front().unwrap_or_default();
        Ok(())
    }

    fn get_steps(&self, behavior_name: &str) -> anyhow::Result<(DecisionSteps, TerminalSteps)> {
        let spec = self.spec(behavior_name)?;
        Ok(match self.current.get(behavior_name) {
            Some(steps) => steps.clone(),
            None => (DecisionSteps::empty(spec), TerminalSteps::empty(spec)),
        })
    }

    fn set_actions(&mut self, behavior_name: &str, action: ActionTuple) -> anyhow::Result<()> {
        self.spec(behavior_name)?;
        self.pending.push((behavior_name.to_string(), action));
        Ok(())
    }

    fn side_channels(&self) -> Vec<Arc<dyn SideChannel>> {
        self.side_channels.clone()
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

/// Decision batch with zero group ids and group rewards.
pub fn decision_steps(agent_id: &[i32], obs: Vec<ArrayD<f32>>, reward: &[f32]) -> DecisionSteps {
    DecisionSteps {
        obs,
        reward: Array1::from(reward.to_vec()),
        agent_id: Array1::from(agent_id.to_vec()),
        action_mask: None,
        group_id: Array1::zeros(agent_id.len()),
        group_reward: Array1::zeros(agent_id.len()),
    }
}

/// Terminal batch with zero group ids and group rewards.
pub fn terminal_steps(
    agent_id: &[i32],
    obs: Vec<ArrayD<f32>>,
    reward: &[f32],
    interrupted: &[bool],
) -> TerminalSteps {
    TerminalSteps {
        obs,
        reward: Array1::from(reward.to_vec()),
        interrupted: Array1::from(interrupted.to_vec()),
        agent_id: Array1::from(agent_id.to_vec()),
        group_id: Array1::zeros(agent_id.len()),
        group_reward: Array1::zeros(agent_id.len()),
    }
}
