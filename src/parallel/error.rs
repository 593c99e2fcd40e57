use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("No environment loaded")]
    NotLoaded,
    #[error("Invalid action for agent {agent}, got {action} but was expecting action from {expected}")]
    InvalidAction {
        agent: String,
        action: String,
        expected: String,
    },
    #[error("Agent {0} is not part of the current step")]
    AgentNotFound(String),
    #[error("You must reset the environment before you can perform a step.")]
    PrematureStep,
    #[error("No actions found for behavior {0}")]
    UnsupportedConfiguration(String),
    #[error("Unknown behavior {0}")]
    UnknownBehavior(String),
    #[error("Invalid behavior name {0}")]
    InvalidBehaviorName(String),
    #[error("Simulation error: {0}")]
    Simulation(#[from] anyhow::Error),
}
