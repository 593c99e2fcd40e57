use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail};
use crossbeam::channel::{bounded, Receiver, Sender};

use super::{
    ActionTuple, BaseEnv, BehaviorName, BehaviorSpec, DecisionSteps, SideChannel, TerminalSteps,
};

/// A [`BaseEnv`] whose simulation lives on a dedicated worker thread.
///
/// Every call is forwarded over a bounded channel and blocks until the worker replies, so the
/// simulation itself does not have to be `Send`. It is constructed on the worker thread.
///
/// ```rust
/// use unity_gym_rs::examples::Ball3D;
/// use unity_gym_rs::low_level::{BaseEnv, RemoteEnv};
///
/// let mut env = RemoteEnv::spawn(|| Ball3D::new(2, 7)).unwrap();
/// env.reset().unwrap();
/// let (decision, _) = env.get_steps("3DBall?team=0").unwrap();
/// assert_eq!(decision.len(), 2);
/// ```
pub struct RemoteEnv {
    tasks: Sender<Task>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
    side_channels: Vec<Arc<dyn SideChannel>>,
}

enum Task {
    Exit,
    Specs,
    SideChannels,
    Reset,
    Step,
    GetSteps(BehaviorName),
    SetActions(BehaviorName, ActionTuple),
    Close,
}

enum Reply {
    Done(anyhow::Result<()>),
    Specs(Vec<(BehaviorName, BehaviorSpec)>),
    SideChannels(Vec<Arc<dyn SideChannel>>),
    Steps(anyhow::Result<(DecisionSteps, TerminalSteps)>),
}

impl RemoteEnv {
    pub fn spawn<T, F>(create_env: F) -> anyhow::Result<RemoteEnv>
    where
        T: BaseEnv + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (task_tx, task_rx) = bounded(1);
        let (reply_tx, reply_rx) = bounded(1);
        let worker = thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || worker(create_env(), task_rx, reply_tx))?;
        let mut env = RemoteEnv {
            tasks: task_tx,
            replies: reply_rx,
            worker: Some(worker),
            side_channels: vec![],
        };
        env.side_channels = match env.request(Task::SideChannels)? {
            Reply::SideChannels(channels) => channels,
            _ => bail!("unexpected reply from simulation worker"),
        };
        Ok(env)
    }

    fn request(&self, task: Task) -> anyhow::Result<Reply> {
        self.tasks
            .send(task)
            .map_err(|_| anyhow!("simulation worker disconnected"))?;
        self.replies
            .recv()
            .map_err(|_| anyhow!("simulation worker disconnected"))
    }

    fn request_done(&self, task: Task) -> anyhow::Result<()> {
        match self.request(task)? {
            Reply::Done(result) => result,
            _ => bail!("unexpected reply from simulation worker"),
        }
    }
}

impl BaseEnv for RemoteEnv {
    fn behavior_specs(&self) -> Vec<(BehaviorName, BehaviorSpec)> {
        match self.request(Task::Specs) {
            Ok(Reply::Specs(specs)) => specs,
            Ok(_) => {
                tracing::warn!("unexpected reply to behavior spec request");
                vec![]
            }
            Err(err) => {
                tracing::warn!(%err, "failed to fetch behavior specs");
                vec![]
            }
        }
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.request_done(Task::Reset)
    }

    fn step(&mut self) -> anyhow::Result<()> {
        self.request_done(Task::Step)
    }

    fn get_steps(&self, behavior_name: &str) -> anyhow::Result<(DecisionSteps, TerminalSteps)> {
        match self.request(Task::GetSteps(behavior_name.to_string()))? {
            Reply::Steps(steps) => steps,
            _ => bail!("unexpected reply from simulation worker"),
        }
    }

    fn set_actions(&mut self, behavior_name: &str, action: ActionTuple) -> anyhow::Result<()> {
        self.request_done(Task::SetActions(behavior_name.to_string(), action))
    }

    fn side_channels(&self) -> Vec<Arc<dyn SideChannel>> {
        self.side_channels.clone()
    }

    fn close(&mut self) {
        if let Err(err) = self.request_done(Task::Close) {
            tracing::debug!(%err, "simulation worker already gone");
        }
    }
}

fn worker<T: BaseEnv>(mut env: T, tasks: Receiver<Task>, replies: Sender<Reply>) {
    let mut closed = false;
    while let Ok(task) = tasks.recv() {
        let reply = match task {
            Task::Exit => break,
            Task::Specs => Reply::Specs(env.behavior_specs()),
            Task::SideChannels => Reply::SideChannels(env.side_channels()),
            Task::Reset => Reply::Done(env.reset()),
            Task::Step => Reply::Done(env.step()),
            Task::GetSteps(behavior_name) => Reply::Steps(env.get_steps(&behavior_name)),
            Task::SetActions(behavior_name, action) => {
                Reply::Done(env.set_actions(&behavior_name, action))
            }
            Task::Close => {
                if !closed {
                    env.close();
                    closed = true;
                }
                Reply::Done(Ok(()))
            }
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
    if !closed {
        env.close();
    }
}

impl Drop for RemoteEnv {
    fn drop(&mut self) {
        let _ = self.tasks.send(Task::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::examples::Ball3D;

    #[test]
    fn test_remote_roundtrip() {
        let mut env = RemoteEnv::spawn(|| Ball3D::new(3, 0)).unwrap();
        let specs = env.behavior_specs();
        assert_eq!(specs.len(), 1);
        let behavior = specs[0].0.clone();

        env.reset().unwrap();
        let (decision, terminal) = env.get_steps(&behavior).unwrap();
        assert_eq!(decision.len(), 3);
        assert!(terminal.is_empty());

        let actions = ActionTuple::zeros(&specs[0].1.action_spec, decision.len());
        env.set_actions(&behavior, actions).unwrap();
        env.step().unwrap();
        let (decision, _) = env.get_steps(&behavior).unwrap();
        assert_eq!(decision.len(), 3);
    }

    #[test]
    fn test_remote_forwards_errors() {
        let env = RemoteEnv::spawn(|| Ball3D::new(1, 0)).unwrap();
        assert!(env.get_steps("NoSuchBehavior").is_err());
    }

    #[test]
    fn test_remote_side_channels_and_close() {
        let mut env = RemoteEnv::spawn(|| Ball3D::new(1, 0)).unwrap();
        assert_eq!(env.side_channels().len(), 1);
        env.close();
        env.close();
        drop(env);
    }
}
