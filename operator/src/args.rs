use std::time::Duration;

use clap::Parser;
use store_common::args::{
    BackoffArgs, ConcurrencyArgs, DomainArgs, DriftArgs, LeaderElectionArgs, NatsArgs, RendererArgs,
};

use store_operator::planner::BackoffConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub nats: NatsArgs,

    #[command(flatten)]
    pub election: LeaderElectionArgs,

    #[command(flatten)]
    pub concurrency: ConcurrencyArgs,

    #[command(flatten)]
    pub drift: DriftArgs,

    #[command(flatten)]
    pub domain: DomainArgs,

    #[command(flatten)]
    pub renderer: RendererArgs,

    #[command(flatten)]
    pub backoff: BackoffArgs,
}

impl From<&BackoffArgs> for BackoffConfig {
    fn from(args: &BackoffArgs) -> Self {
        Self {
            initial: Duration::from_secs(args.reconcile_backoff_initial_seconds),
            factor: args.reconcile_backoff_factor,
            cap: Duration::from_secs(args.reconcile_backoff_cap_seconds),
        }
    }
}
