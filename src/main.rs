use anyhow::Result;
use clap::Parser;
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tiller::budget::CostGovernor;
use tiller::config::{Config, TierConfig};
use tiller::connector::{Connector, HttpConnector, NullConnector};
use tiller::plan::{AnalyzerContext, ExecutorConfig, PlanAnalyzer, PlanExecutor};
use tiller::present::Presenter;
use tiller::session::Session;
use tiller::specialist::SpecialistRouter;
use tiller::tools::{ComputeTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "tiller", about = "Budget-aware plan orchestration for one request")]
struct Cli {
    /// The request to route through the pipeline.
    request: Vec<String>,

    /// Config file path (default: ~/.tiller/config.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the session budget limit in USD.
    #[arg(long)]
    limit: Option<f64>,

    /// Log verbosity, e.g. "info" or "tiller=debug".
    #[arg(long, default_value = "warn")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let request = cli.request.join(" ");
    if request.trim().is_empty() {
        anyhow::bail!("usage: tiller <request>");
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(limit) = cli.limit {
        config.budget.limit_usd = limit;
    }

    let session = build_session(&config);
    let reply = session.handle(&request, &AnalyzerContext::default()).await?;

    println!("{}", reply.text);

    if !reply.citations.is_empty() {
        println!();
        for (idx, citation) in reply.citations.iter().enumerate() {
            let number = idx + 1;
            let marker = if reply.citations_used.contains(&number) {
                format!("[{number}]")
            } else {
                format!("({number})")
            };
            println!(
                "{} {} {}",
                style(marker).dim(),
                citation.label,
                style(&citation.url).dim()
            );
        }
    }

    println!(
        "\n{} {}",
        style("cost:").dim(),
        style(reply.cost.to_string()).dim()
    );
    Ok(())
}

fn build_session(config: &Config) -> Session {
    let governor = Arc::new(CostGovernor::new(
        config.budget.limit_usd,
        config.budget.soft_threshold,
    ));

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ComputeTool));
    let registry = Arc::new(registry);

    let planner = tier_connector(config.tiers.planner.as_ref(), "planner");
    let planner_price = config
        .tiers
        .planner
        .as_ref()
        .map_or(0.0, |tier| tier.price_per_call);

    let mut router = SpecialistRouter::new(governor.clone());
    if let Some(tier) = &config.tiers.fast {
        router = router.with_fast(tier_connector(Some(tier), "fast"), tier.price_per_call);
    }
    if let Some(tier) = &config.tiers.strong {
        router = router.with_strong(tier_connector(Some(tier), "strong"), tier.price_per_call);
    }

    let analyzer = PlanAnalyzer::new(
        planner.clone(),
        planner_price,
        governor.clone(),
        registry.specs(),
    );

    let executor = PlanExecutor::new(registry, Arc::new(router), governor.clone()).with_config(
        ExecutorConfig {
            max_fanout: config.executor.max_fanout,
            step_timeout: Duration::from_secs(config.executor.step_timeout_secs),
        },
    );

    let presenter = match &config.tiers.presenter {
        Some(tier) => Presenter::new(tier_connector(Some(tier), "presenter")),
        // Reuse the planning tier for narration when one is configured.
        None if config.tiers.planner.is_some() => Presenter::new(planner),
        None => Presenter::offline(),
    };

    Session::new(analyzer, executor, presenter, governor)
}

fn tier_connector(tier: Option<&TierConfig>, name: &str) -> Arc<dyn Connector> {
    match tier {
        Some(tier) => Arc::new(HttpConnector::new(
            name,
            &tier.base_url,
            &tier.model,
            tier.api_key().as_deref(),
        )),
        None => Arc::new(NullConnector),
    }
}
