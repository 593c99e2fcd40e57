//! Conversion between per-behavior batches and per-agent maps.

use ndarray::{ArrayD, Axis};
use rustc_hash::FxHashMap;

use super::{AgentId, AgentInfo, AgentObs, EnvError, ObsArray};
use crate::low_level::{DecisionSteps, TerminalSteps};

const AGENT_ID_MARKER: &str = "?agent_id=";

pub fn behavior_to_agent_id(behavior_name: &str, unique_id: i32) -> AgentId {
    format!("{}{}{}", behavior_name, AGENT_ID_MARKER, unique_id)
}

/// Behavior part of an agent id, everything before the first `?agent_id=`.
pub fn agent_id_to_behavior(agent_id: &str) -> &str {
    match agent_id.find(AGENT_ID_MARKER) {
        Some(end) => &agent_id[..end],
        None => agent_id,
    }
}

/// A behavior name split into its name and `team` qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorId {
    pub name: String,
    pub team_id: i32,
}

/// Parses `name?team=<int>`. The team defaults to 0 when absent.
pub fn parse_behavior(full_behavior: &str) -> Result<BehaviorId, EnvError> {
    let (name, query) = full_behavior.split_once('?').unwrap_or((full_behavior, ""));
    let mut team_id = 0;
    if let Some(value) = query.split('&').find_map(|pair| pair.strip_prefix("team=")) {
        team_id = value
            .parse()
            .map_err(|_| EnvError::InvalidBehaviorName(full_behavior.to_string()))?;
    }
    Ok(BehaviorId {
        name: name.to_string(),
        team_id,
    })
}

/// Per-agent view of one behavior's decision and terminal batches.
#[derive(Debug, Clone, Default)]
pub struct UnwrappedBatch {
    /// Decision agents followed by terminal agents, each in batch order.
    pub agent_ids: Vec<AgentId>,
    pub observations: FxHashMap<AgentId, AgentObs>,
    pub terminations: FxHashMap<AgentId, bool>,
    pub rewards: FxHashMap<AgentId, f32>,
    pub cumulative_rewards: FxHashMap<AgentId, f32>,
    pub infos: FxHashMap<AgentId, AgentInfo>,
    /// Slot of every decision agent in the decision batch. Terminal agents take no actions and are absent.
    pub index_map: FxHashMap<AgentId, usize>,
}

/// Splits the batches of `behavior_name` into per-agent observations, rewards and infos.
///
/// Only decision observations go through `uint8_visual` preprocessing, terminal observations
/// are passed on as they arrive. An id that shows up in both batches keeps the decision
/// observation, reward and termination flag and the terminal info.
pub fn unwrap_batch_steps(
    decision_batch: &DecisionSteps,
    termination_batch: &TerminalSteps,
    behavior_name: &str,
    uint8_visual: bool,
) -> UnwrappedBatch {
    let decision_id = decision_batch
        .agent_id
        .iter()
        .map(|&i| behavior_to_agent_id(behavior_name, i))
        .collect::<Vec<_>>();
    let termination_id = termination_batch
        .agent_id
        .iter()
        .map(|&i| behavior_to_agent_id(behavior_name, i))
        .collect::<Vec<_>>();
    tracing::trace!(
        behavior = behavior_name,
        decisions = decision_id.len(),
        terminations = termination_id.len(),
        "unwrapping batch"
    );

    let mut batch = UnwrappedBatch::default();

    for (i, agent_id) in termination_id.iter().enumerate() {
        let sensors = termination_batch
            .obs
            .iter()
            .map(|batch_obs| ObsArray::F32(slice_agent(batch_obs, i)))
            .collect();
        batch
            .observations
            .insert(agent_id.clone(), AgentObs::from_sensors(sensors));
        batch.terminations.insert(agent_id.clone(), true);
        batch
            .rewards
            .insert(agent_id.clone(), termination_batch.reward[i]);
    }
    for (i, agent_id) in decision_id.iter().enumerate() {
        let sensors = decision_batch
            .obs
            .iter()
            .map(|batch_obs| preprocess_single(slice_agent(batch_obs, i), uint8_visual))
            .collect::<Vec<_>>();
        let obs = match &decision_batch.action_mask {
            Some(masks) => AgentObs::Masked {
                observation: sensors,
                action_mask: masks.iter().map(|mask| mask.row(i).to_owned()).collect(),
            },
            None => AgentObs::from_sensors(sensors),
        };
        batch.observations.insert(agent_id.clone(), obs);
        batch.terminations.insert(agent_id.clone(), false);
        batch
            .rewards
            .insert(agent_id.clone(), decision_batch.reward[i]);
    }
    batch.cumulative_rewards = batch.rewards.clone();

    for (i, agent_id) in decision_id.iter().enumerate() {
        batch.infos.insert(
            agent_id.clone(),
            AgentInfo {
                behavior_name: behavior_name.to_string(),
                group_id: decision_batch.group_id[i],
                group_reward: decision_batch.group_reward[i],
                interrupted: None,
            },
        );
    }
    for (i, agent_id) in termination_id.iter().enumerate() {
        batch.infos.insert(
            agent_id.clone(),
            AgentInfo {
                behavior_name: behavior_name.to_string(),
                group_id: termination_batch.group_id[i],
                group_reward: termination_batch.group_reward[i],
                interrupted: Some(termination_batch.interrupted[i]),
            },
        );
    }

    batch.index_map = decision_id
        .iter()
        .enumerate()
        .map(|(i, agent_id)| (agent_id.clone(), i))
        .collect();
    batch.agent_ids = decision_id;
    batch.agent_ids.extend(termination_id);
    batch
}

fn slice_agent(batch_obs: &ArrayD<f32>, index: usize) -> ArrayD<f32> {
    batch_obs.index_axis(Axis(0), index).to_owned()
}

/// Maps `[0, 1]` floats to `round(255 * v)` bytes when `uint8_visual` is set.
pub fn preprocess_single(obs: ArrayD<f32>, uint8_visual: bool) -> ObsArray {
    if uint8_visual {
        // `as` saturates, out of range values clamp to 0 and 255.
        ObsArray::U8(obs.mapv(|v| (255.0 * v).round() as u8))
    } else {
        ObsArray::F32(obs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::low_level::{decision_steps, terminal_steps};
    use ndarray::{array, Array1, Array2};
    use proptest::prelude::*;

    #[test]
    fn test_agent_id_roundtrip() {
        let agent_id = behavior_to_agent_id("3DBall?team=0", 12);
        assert_eq!(agent_id, "3DBall?team=0?agent_id=12");
        assert_eq!(agent_id_to_behavior(&agent_id), "3DBall?team=0");
        assert_eq!(agent_id_to_behavior("NoMarker"), "NoMarker");
    }

    #[test]
    fn test_parse_behavior() {
        assert_eq!(
            parse_behavior("Striker?team=1").unwrap(),
            BehaviorId {
                name: "Striker".to_string(),
                team_id: 1
            }
        );
        assert_eq!(
            parse_behavior("Walker").unwrap(),
            BehaviorId {
                name: "Walker".to_string(),
                team_id: 0
            }
        );
        assert_eq!(parse_behavior("Goalie?x=2&team=3").unwrap().team_id, 3);
        assert!(matches!(
            parse_behavior("Goalie?team=blue"),
            Err(EnvError::InvalidBehaviorName(_))
        ));
    }

    #[test]
    fn test_unwrap_decision_and_terminal() {
        let decision = decision_steps(
            &[0, 1],
            vec![array![[0.0, 0.5], [1.0, 0.25]].into_dyn()],
            &[0.1, 0.2],
        );
        let terminal = terminal_steps(&[7], vec![array![[0.5, 0.5]].into_dyn()], &[-1.0], &[true]);
        let batch = unwrap_batch_steps(&decision, &terminal, "Ball", true);

        assert_eq!(
            batch.agent_ids,
            vec!["Ball?agent_id=0", "Ball?agent_id=1", "Ball?agent_id=7"]
        );
        assert_eq!(
            batch.observations["Ball?agent_id=1"],
            AgentObs::Single(ObsArray::U8(array![255u8, 64].into_dyn()))
        );
        // Terminal observations skip preprocessing.
        assert_eq!(
            batch.observations["Ball?agent_id=7"],
            AgentObs::Single(ObsArray::F32(array![0.5f32, 0.5].into_dyn()))
        );
        assert_eq!(batch.terminations["Ball?agent_id=0"], false);
        assert_eq!(batch.terminations["Ball?agent_id=7"], true);
        assert_eq!(batch.rewards["Ball?agent_id=7"], -1.0);
        assert_eq!(batch.cumulative_rewards, batch.rewards);
        assert_eq!(batch.infos["Ball?agent_id=0"].interrupted, None);
        assert_eq!(batch.infos["Ball?agent_id=7"].interrupted, Some(true));
        assert_eq!(batch.infos["Ball?agent_id=7"].behavior_name, "Ball");
        assert_eq!(batch.index_map.len(), 2);
        assert_eq!(batch.index_map["Ball?agent_id=1"], 1);
        assert!(!batch.index_map.contains_key("Ball?agent_id=7"));
    }

    #[test]
    fn test_unwrap_masked_and_multi_sensor() {
        let mut decision = decision_steps(
            &[3, 4],
            vec![
                array![[1.0], [2.0]].into_dyn(),
                Array2::<f32>::zeros((2, 3)).into_dyn(),
            ],
            &[0.0, 0.0],
        );
        decision.group_id = Array1::from(vec![5, 6]);
        decision.action_mask = Some(vec![array![[true, false], [false, true]]]);
        let terminal = terminal_steps(
            &[9],
            vec![
                array![[4.0]].into_dyn(),
                Array2::<f32>::ones((1, 3)).into_dyn(),
            ],
            &[1.0],
            &[false],
        );
        let batch = unwrap_batch_steps(&decision, &terminal, "Mixed", false);

        match &batch.observations["Mixed?agent_id=4"] {
            AgentObs::Masked {
                observation,
                action_mask,
            } => {
                assert_eq!(observation.len(), 2);
                assert_eq!(observation[0], ObsArray::F32(array![2.0f32].into_dyn()));
                assert_eq!(action_mask, &vec![array![false, true]]);
            }
            other => panic!("expected masked observation, got {:?}", other),
        }
        assert_eq!(batch.observations["Mixed?agent_id=9"].sensors().len(), 2);
        assert!(batch.observations["Mixed?agent_id=9"].action_mask().is_none());
        assert_eq!(batch.infos["Mixed?agent_id=4"].group_id, 6);
        assert_eq!(batch.infos["Mixed?agent_id=9"].interrupted, Some(false));
    }

    #[test]
    fn test_preprocess_disabled_is_identity() {
        let obs = array![[0.1f32, -3.0], [f32::MAX, 0.7]].into_dyn();
        assert_eq!(preprocess_single(obs.clone(), false), ObsArray::F32(obs));
    }

    proptest! {
        #[test]
        fn prop_agent_id_recovers_behavior(behavior in "[A-Za-z0-9_ ?=&]{0,16}", id in any::<i32>()) {
            prop_assume!(!behavior.contains(AGENT_ID_MARKER));
            let agent_id = behavior_to_agent_id(&behavior, id);
            prop_assert_eq!(agent_id_to_behavior(&agent_id), behavior.as_str());
        }

        #[test]
        fn prop_preprocess_range(v in 0.0f32..=1.0) {
            let obs = ArrayD::from_elem(ndarray::IxDyn(&[1]), v);
            match preprocess_single(obs, true) {
                ObsArray::U8(out) => {
                    prop_assert_eq!(out.iter().copied().next(), Some((255.0 * v).round() as u8))
                }
                other => prop_assert!(false, "expected bytes, got {:?}", other),
            }
        }

        #[test]
        fn prop_batch_partition(
            ids in proptest::collection::hash_set(any::<i32>(), 0..12),
            split in 0usize..12,
        ) {
            let ids = ids.into_iter().collect::<Vec<_>>();
            let split = split.min(ids.len());
            let (decision_ids, terminal_ids) = ids.split_at(split);
            let decision = decision_steps(
                decision_ids,
                vec![Array2::<f32>::zeros((decision_ids.len(), 2)).into_dyn()],
                &vec![0.0; decision_ids.len()],
            );
            let terminal = terminal_steps(
                terminal_ids,
                vec![Array2::<f32>::zeros((terminal_ids.len(), 2)).into_dyn()],
                &vec![0.0; terminal_ids.len()],
                &vec![false; terminal_ids.len()],
            );
            let batch = unwrap_batch_steps(&decision, &terminal, "B", false);
            let unique = batch.agent_ids.iter().collect::<std::collections::HashSet<_>>();
            prop_assert_eq!(batch.agent_ids.len(), ids.len());
            prop_assert_eq!(unique.len(), ids.len());
            prop_assert_eq!(batch.index_map.len(), decision_ids.len());
        }
    }
}
