//! Observation and action space descriptors.

mod action_space;
mod box_space;
mod discrete;
mod multi_discrete;

pub use action_space::{Action, ActionSpace, SplitAction};
pub use box_space::{BoxSpace, Dtype};
pub use discrete::Discrete;
pub use multi_discrete::MultiDiscrete;

use std::fmt;

use crate::low_level::ObservationSpec;

/// Observation space of a behavior: a single box for one sensor, a tuple of boxes otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Box(BoxSpace),
    Tuple(Vec<BoxSpace>),
}

impl Space {
    /// Derives the space from a behavior's sensors.
    ///
    /// With `uint8_visual` every sensor is described as bytes in `[0, 255]`, otherwise as unbounded floats.
    pub fn from_observation_specs(specs: &[ObservationSpec], uint8_visual: bool) -> Space {
        let mut boxes = specs
            .iter()
            .map(|spec| {
                if uint8_visual {
                    BoxSpace::pixels(&spec.shape)
                } else {
                    BoxSpace::unbounded(&spec.shape)
                }
            })
            .collect::<Vec<_>>();
        if boxes.len() == 1 {
            Space::Box(boxes.remove(0))
        } else {
            Space::Tuple(boxes)
        }
    }

    pub fn boxes(&self) -> &[BoxSpace] {
        match self {
            Space::Box(space) => std::slice::from_ref(space),
            Space::Tuple(spaces) => spaces,
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Box(space) => write!(f, "{}", space),
            Space::Tuple(spaces) => {
                write!(f, "Tuple(")?;
                for (i, space) in spaces.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", space)?;
                }
                write!(f, ")")
            }
        }
    }
}
