use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct RateLimiterArgs {
    /// Requests allowed per identity within the window
    #[arg(long, env = "RATE_LIMITER_CAPACITY", default_value_t = 10)]
    pub capacity: u32,

    /// Window length in seconds the capacity refills over
    #[arg(long, env = "RATE_LIMITER_WINDOW_SECS", default_value_t = 60)]
    pub window_secs: u64,
}

/// Rate limit applied to `POST /stores`.
#[derive(Parser, Debug, Clone)]
pub struct CreateRateLimiterArgs {
    #[arg(long, env = "CREATE_RATE_LIMIT_CAPACITY", default_value_t = 10)]
    pub capacity: u32,

    #[arg(long, env = "CREATE_RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub window_secs: u64,
}

/// Rate limit applied to `DELETE /stores/{name}`.
#[derive(Parser, Debug, Clone)]
pub struct DeleteRateLimiterArgs {
    #[arg(long, env = "DELETE_RATE_LIMIT_CAPACITY", default_value_t = 30)]
    pub capacity: u32,

    #[arg(long, env = "DELETE_RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub window_secs: u64,
}

impl From<CreateRateLimiterArgs> for crate::rate_limit::RateLimiterConfig {
    fn from(args: CreateRateLimiterArgs) -> Self {
        Self {
            capacity: args.capacity,
            window: std::time::Duration::from_secs(args.window_secs),
        }
    }
}

impl From<DeleteRateLimiterArgs> for crate::rate_limit::RateLimiterConfig {
    fn from(args: DeleteRateLimiterArgs) -> Self {
        Self {
            capacity: args.capacity,
            window: std::time::Duration::from_secs(args.window_secs),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    #[arg(long, env = "NATS_URL", required = true)]
    pub nats_url: String,

    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct LeaderElectionArgs {
    /// Name of the Lease object used for leader election
    #[arg(long, env = "LEASE_NAME", default_value = "store-operator-lease")]
    pub lease_name: String,

    /// Namespace the Lease object lives in
    #[arg(long, env = "LEASE_NAMESPACE", default_value = "store-system")]
    pub lease_namespace: String,

    /// Lease duration in seconds before another replica may take over
    #[arg(long, env = "LEASE_DURATION_SECS", default_value_t = 15)]
    pub lease_duration_secs: u64,

    /// How often the leader renews its lease, in seconds
    #[arg(long, env = "LEASE_RENEW_SECS", default_value_t = 5)]
    pub lease_renew_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct ConcurrencyArgs {
    /// Maximum number of stores being actively reconciled at once
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 3)]
    pub max_concurrent_reconciles: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct DriftArgs {
    /// How often a healthy store's tenant partition is re-checked for
    /// drift against its declared state, in seconds
    #[arg(long, env = "DRIFT_INTERVAL_SECONDS", default_value_t = 120)]
    pub drift_interval_seconds: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct DomainArgs {
    /// Base domain public store/admin URLs are minted under once a
    /// store reaches `StorefrontReady`
    #[arg(long, env = "STORE_DOMAIN", default_value = "stores.example.com")]
    pub domain: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RendererArgs {
    /// Base URL of the external template renderer invoked by stage 2
    #[arg(long, env = "RENDERER_URL")]
    pub renderer_url: Option<String>,

    /// Deadline for a single renderer invocation, in seconds
    #[arg(long, env = "RENDERER_TIMEOUT_SECONDS", default_value_t = 60)]
    pub renderer_timeout_seconds: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct QuotaArgs {
    /// Maximum number of stores a single owner may have at once
    #[arg(long, env = "PER_OWNER_STORE_CAP", default_value_t = 5)]
    pub per_owner_store_cap: u32,
}

/// Per-stage retry backoff schedule for the reconciler.
#[derive(Parser, Debug, Clone)]
pub struct BackoffArgs {
    #[arg(long, env = "RECONCILE_BACKOFF_INITIAL_SECONDS", default_value_t = 5)]
    pub reconcile_backoff_initial_seconds: u64,

    #[arg(long, env = "RECONCILE_BACKOFF_FACTOR", default_value_t = 2.0)]
    pub reconcile_backoff_factor: f64,

    #[arg(long, env = "RECONCILE_BACKOFF_CAP_SECONDS", default_value_t = 60)]
    pub reconcile_backoff_cap_seconds: u64,
}
