//! RADIANT CLI - Model Router Front End
//!
//! Runs invocations through the router and prints provider status.
//!
//! # Usage
//!
//! ```bash
//! # One-shot invocation
//! radiant invoke gpt-4o "Summarize the release notes"
//!
//! # Health, breaker and rate-limit status
//! radiant status --json
//!
//! # Cheapest fast model with a capability
//! radiant best-model coding --max-latency-ms 1500
//!
//! # Restrict to local and LiteLLM backends
//! radiant --only ollama,litellm invoke llama3.2-local "hi"
//!
//! # Verbose logging
//! RUST_LOG=radiant_router=debug radiant invoke gpt-4o "hi"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use radiant_router::{
    load_config_from_path, ConfigOverrides, InvocationRequest, ModelConstraints, ModelRouter,
    ProviderFamily, RouterError,
};

/// RADIANT model router
#[derive(Parser, Debug)]
#[command(name = "radiant")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RADIANT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Provider health snapshot file
    #[arg(long, value_name = "PATH")]
    health_path: Option<PathBuf>,

    /// JSON-lines usage log
    #[arg(long, value_name = "PATH")]
    usage_log: Option<PathBuf>,

    /// Retry budget for every provider
    #[arg(long)]
    max_retries: Option<u32>,

    /// Enable only these provider families (comma separated)
    #[arg(long, value_delimiter = ',')]
    only: Option<Vec<ProviderFamily>>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RADIANT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a prompt against a logical model
    Invoke {
        /// Logical model id
        model: String,
        /// Prompt text
        prompt: String,
        /// System prompt
        #[arg(short = 's', long)]
        system: Option<String>,
        /// Output token cap
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Show provider health, breaker state and rate limits
    Status,

    /// Pick the best available model for a capability
    BestModel {
        /// Capability tag, e.g. `coding`
        capability: String,
        /// Highest acceptable average latency
        #[arg(long)]
        max_latency_ms: Option<u64>,
        /// Highest acceptable output price per 1K tokens (dollars)
        #[arg(long)]
        max_cost_per_1k: Option<f64>,
    },

    /// List the model catalogue
    Models,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(path) = &self.health_path {
            overrides = overrides.with_health_path(path.clone());
        }
        if let Some(path) = &self.usage_log {
            overrides = overrides.with_usage_log_path(path.clone());
        }
        if let Some(retries) = self.max_retries {
            overrides = overrides.with_max_retries(retries);
        }
        if let Some(only) = &self.only {
            overrides = overrides.with_only_families(only.clone());
        }
        overrides
    }
}

/// Initialize logging on stderr so stdout stays parseable
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("radiant={level},radiant_router={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut settings =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;
    args.overrides().apply(&mut settings);
    info!(source = %settings.source(), "Configuration loaded");

    let router = ModelRouter::from_config(&settings).context("Failed to build router")?;
    let restored = router.load_persisted_health().await;
    info!(restored, "Provider health loaded");

    let result = run(&router, &args).await;
    router.flush_housekeeping().await;
    result
}

async fn run(router: &ModelRouter, args: &Args) -> Result<()> {
    match &args.command {
        Command::Invoke {
            model,
            prompt,
            system,
            max_tokens,
            temperature,
        } => {
            let mut request = InvocationRequest::new(model.as_str()).with_user(prompt.as_str());
            if let Some(system) = system {
                request = request.with_system_prompt(system.as_str());
            }
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(*max_tokens);
            }
            if let Some(temperature) = temperature {
                request = request.with_temperature(*temperature);
            }
            invoke(router, request, args.json).await
        }
        Command::Status => {
            status(router, args.json);
            Ok(())
        }
        Command::BestModel {
            capability,
            max_latency_ms,
            max_cost_per_1k,
        } => {
            let mut constraints = ModelConstraints::new();
            if let Some(ms) = max_latency_ms {
                constraints = constraints.with_max_latency_ms(*ms);
            }
            if let Some(cost) = max_cost_per_1k {
                constraints = constraints.with_max_cost_per_1k(*cost);
            }
            match router.get_best_model(capability, &constraints) {
                Some(model) if args.json => println!("{}", serde_json::to_string_pretty(&model)?),
                Some(model) => println!("{} ({})", model.id, model.family),
                None => anyhow::bail!("No available model offers {capability}"),
            }
            Ok(())
        }
        Command::Models => {
            let models = router.registry().models();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&models)?);
            } else {
                for model in models {
                    let marker = if router.is_model_available(&model.id) { ' ' } else { '!' };
                    println!(
                        "{marker} {:<20} {:<11} ${:.4}/${:.4} per 1K  ~{}ms",
                        model.id,
                        model.family.as_str(),
                        model.input_price_per_1k,
                        model.output_price_per_1k,
                        model.avg_latency_ms
                    );
                }
            }
            Ok(())
        }
    }
}

async fn invoke(router: &ModelRouter, request: InvocationRequest, as_json: bool) -> Result<()> {
    match router.invoke(request).await {
        Ok(response) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.content);
                eprintln!(
                    "-- {} via {} ({}ms, {} in / {} out, {}c)",
                    response.model_used,
                    response.provider,
                    response.latency_ms,
                    response.input_tokens,
                    response.output_tokens,
                    response.cost_cents
                );
            }
            Ok(())
        }
        Err(RouterError::AllProvidersFailed { model_id, attempts }) => {
            for attempt in &attempts {
                warn!(provider = %attempt.provider, reason = %attempt.reason, "Attempt failed");
            }
            anyhow::bail!("All providers failed for {model_id} after {} attempts", attempts.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn status(router: &ModelRouter, as_json: bool) {
    let health = router.get_provider_status();
    let limits = router.get_rate_limit_status();
    let breakers = router.breaker_status();

    if as_json {
        let body = json!({
            "providers": health,
            "rate_limits": limits,
            "breakers": breakers,
            "metrics": router.metrics(),
        });
        println!("{body:#}");
        return;
    }

    println!("{:<11} {:<9} {:>5} {:>9}  rate limit", "provider", "health", "fails", "latency");
    for entry in health {
        let limit = limits.get(&entry.provider);
        let budget = match limit {
            Some(l) if l.enabled => format!("{}/{}", l.used, l.limit),
            _ => "off".to_string(),
        };
        println!(
            "{:<11} {:<9} {:>5} {:>7}ms  {budget}",
            entry.provider.as_str(),
            if entry.healthy { "healthy" } else { "unhealthy" },
            entry.consecutive_failures,
            entry.last_latency_ms.map_or_else(|| "-".to_string(), |ms| ms.to_string()),
        );
    }
    for breaker in breakers {
        println!("breaker {}: {:?}", breaker.provider, breaker.state);
    }
}
