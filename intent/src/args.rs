use clap::{Parser, Subcommand};
use store_common::args::{CreateRateLimiterArgs, DeleteRateLimiterArgs, NatsArgs, QuotaArgs};

#[derive(Parser, Debug)]
#[command(name = "store-intent")]
#[command(about = "HTTP intent API for the store control plane")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the intent HTTP server
    Server(ServerArgs),

    /// Check service health
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Allowed CORS origins; unset disables cross-origin access entirely
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Identities exempt from owner scoping, comma-separated
    #[arg(long, env = "PRIVILEGED_IDENTITIES", value_delimiter = ',')]
    pub privileged: Vec<String>,

    #[command(flatten)]
    pub quota: QuotaArgs,

    #[command(flatten)]
    pub create_rate_limiter: CreateRateLimiterArgs,

    #[command(flatten)]
    pub delete_rate_limiter: DeleteRateLimiterArgs,

    #[command(flatten)]
    pub nats: NatsArgs,
}

impl ServerArgs {
    pub fn per_owner_store_cap(&self) -> u32 {
        self.quota.per_owner_store_cap
    }
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    /// Intent service endpoint
    #[arg(long, env = "INTENT_ENDPOINT", default_value = "http://127.0.0.1:8080")]
    pub endpoint: String,
}
