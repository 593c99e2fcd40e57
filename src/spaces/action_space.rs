use std::fmt;

use ndarray::Array1;
use rand::Rng;

use super::{BoxSpace, Discrete, MultiDiscrete};
use crate::low_level::ActionSpec;

/// Action submitted for a single agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Discrete(i64),
    MultiDiscrete(Vec<i64>),
    Continuous(Vec<f32>),
    Mixed {
        continuous: Vec<f32>,
        discrete: Vec<i64>,
    },
}

/// An action split into the continuous and discrete rows of a behavior's [`ActionTuple`].
///
/// [`ActionTuple`]: crate::low_level::ActionTuple
#[derive(Debug, Clone, PartialEq)]
pub struct SplitAction {
    pub continuous: Option<Array1<f32>>,
    pub discrete: Option<Array1<i32>>,
}

/// Action space of a behavior.
///
/// A lone discrete branch collapses to [`ActionSpace::Discrete`], so it takes a bare index
/// instead of a length-1 vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpace {
    Discrete(Discrete),
    MultiDiscrete(MultiDiscrete),
    Continuous(BoxSpace),
    Mixed {
        continuous: BoxSpace,
        discrete: MultiDiscrete,
    },
}

impl ActionSpace {
    /// Derives the space from a behavior's action spec.
    /// Returns `None` if the spec has no actions or a branch without choices.
    pub fn from_spec(spec: &ActionSpec) -> Option<ActionSpace> {
        if spec.discrete_branches.iter().any(|&n| n == 0) {
            return None;
        }
        let continuous = BoxSpace::symmetric(&[spec.continuous_size]);
        match (spec.continuous_size, spec.discrete_branches.as_slice()) {
            (0, []) => None,
            (0, [n]) => Some(ActionSpace::Discrete(Discrete::new(*n))),
            (0, branches) => Some(ActionSpace::MultiDiscrete(MultiDiscrete::new(
                branches.to_vec(),
            ))),
            (_, []) => Some(ActionSpace::Continuous(continuous)),
            (_, branches) => Some(ActionSpace::Mixed {
                continuous,
                discrete: MultiDiscrete::new(branches.to_vec()),
            }),
        }
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.split(action).is_some()
    }

    /// Validates `action` and converts it into the behavior's native layout.
    /// Returns `None` if the action is not a member of this space.
    pub fn split(&self, action: &Action) -> Option<SplitAction> {
        match self {
            ActionSpace::Discrete(space) => split_discrete(space, action),
            ActionSpace::MultiDiscrete(space) => split_multi_discrete(space, action),
            ActionSpace::Continuous(space) => split_continuous(space, action),
            ActionSpace::Mixed {
                continuous,
                discrete,
            } => split_mixed(continuous, discrete, action),
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Action {
        match self {
            ActionSpace::Discrete(space) => Action::Discrete(space.sample(rng)),
            ActionSpace::MultiDiscrete(space) => Action::MultiDiscrete(space.sample(rng)),
            ActionSpace::Continuous(space) => {
                Action::Continuous(space.sample(rng).iter().copied().collect())
            }
            ActionSpace::Mixed {
                continuous,
                discrete,
            } => Action::Mixed {
                continuous: continuous.sample(rng).iter().copied().collect(),
                discrete: discrete.sample(rng),
            },
        }
    }
}

fn split_discrete(space: &Discrete, action: &Action) -> Option<SplitAction> {
    match action {
        Action::Discrete(choice) if space.contains(*choice) => Some(SplitAction {
            continuous: None,
            discrete: Some(Array1::from_elem(1, *choice as i32)),
        }),
        _ => None,
    }
}

fn split_multi_discrete(space: &MultiDiscrete, action: &Action) -> Option<SplitAction> {
    match action {
        Action::MultiDiscrete(choices) if space.contains(choices) => Some(SplitAction {
            continuous: None,
            discrete: Some(choices.iter().map(|&c| c as i32).collect()),
        }),
        _ => None,
    }
}

fn split_continuous(space: &BoxSpace, action: &Action) -> Option<SplitAction> {
    match action {
        Action::Continuous(values) if space.contains_slice(values) => Some(SplitAction {
            continuous: Some(Array1::from(values.clone())),
            discrete: None,
        }),
        _ => None,
    }
}

fn split_mixed(
    continuous_space: &BoxSpace,
    discrete_space: &MultiDiscrete,
    action: &Action,
) -> Option<SplitAction> {
    match action {
        Action::Mixed {
            continuous,
            discrete,
        } if continuous_space.contains_slice(continuous) && discrete_space.contains(discrete) => {
            Some(SplitAction {
                continuous: Some(Array1::from(continuous.clone())),
                discrete: Some(discrete.iter().map(|&c| c as i32).collect()),
            })
        }
        _ => None,
    }
}

impl fmt::Display for ActionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSpace::Discrete(space) => write!(f, "{}", space),
            ActionSpace::MultiDiscrete(space) => write!(f, "{}", space),
            ActionSpace::Continuous(space) => write!(f, "{}", space),
            ActionSpace::Mixed {
                continuous,
                discrete,
            } => write!(f, "Tuple({}, {})", continuous, discrete),
        }
    }
}
