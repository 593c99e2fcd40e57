mod env;
mod remote_env;
#[cfg(any(test, feature = "testing"))]
mod scripted;

pub use env::*;
pub use remote_env::RemoteEnv;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{decision_steps, terminal_steps, Frame, ScriptedEnv};
