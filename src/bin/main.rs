use clap::Parser;
use rustc_hash::FxHashMap;

use unity_gym_rs::examples::Ball3D;
use unity_gym_rs::low_level::{BaseEnv, RemoteEnv};
use unity_gym_rs::parallel::{parse_behavior, EnvConfig, ParallelEnv, UnityParallelEnv};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Rollout {
    /// Number of platforms in the simulation.
    #[clap(long, value_parser, default_value_t = 4)]
    agents: usize,

    #[clap(long, value_parser, default_value_t = 100)]
    steps: usize,

    #[clap(long, value_parser)]
    seed: Option<u64>,

    /// Report observations as bytes.
    #[clap(long, action)]
    uint8_visual: bool,

    /// Adds a camera sensor.
    #[clap(long, action)]
    visual: bool,

    /// Discrete branches next to the continuous tilt, e.g. `--discrete 2 --discrete 3`.
    #[clap(long, value_parser)]
    discrete: Vec<usize>,

    /// Run the simulation on a worker thread.
    #[clap(long, action)]
    remote: bool,
}

fn ball(args: &Rollout) -> Ball3D {
    let mut ball = Ball3D::new(args.agents, args.seed.unwrap_or(0));
    if args.visual {
        ball = ball.with_visual();
    }
    if !args.discrete.is_empty() {
        ball = ball.with_discrete(args.discrete.clone());
    }
    ball
}

fn run<E: BaseEnv>(env: E, args: &Rollout) -> anyhow::Result<()> {
    let config = EnvConfig::default()
        .uint8_visual(args.uint8_visual)
        .seed(args.seed);
    let mut env = UnityParallelEnv::new(env, config)?;
    env.reset(None, None)?;

    let mut returns = FxHashMap::<String, f32>::default();
    let mut episodes = 0;
    for _ in 0..args.steps {
        let mut actions = vec![];
        for agent in env.agents() {
            let action = env.sample_action(&agent)?;
            actions.push((agent, Some(action)));
        }
        let output = env.step(actions)?;
        for (agent, reward) in &output.rewards {
            *returns.entry(agent.clone()).or_default() += reward;
        }
        episodes += output.terminations.values().filter(|&&done| done).count();
    }

    for behavior_name in env.base().behavior_names() {
        let behavior = parse_behavior(behavior_name)?;
        println!(
            "{} (team {}): {} agents seen, {} episodes finished",
            behavior.name,
            behavior.team_id,
            env.possible_agents().len(),
            episodes,
        );
    }
    let mean = returns.values().sum::<f32>() / returns.len().max(1) as f32;
    println!("Mean return per agent: {:.3}", mean);
    env.close();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Rollout::parse();
    tracing::info!(?args, "starting rollout");
    if args.remote {
        let ball = ball(&args);
        run(RemoteEnv::spawn(move || ball)?, &args)
    } else {
        run(ball(&args), &args)
    }
}
