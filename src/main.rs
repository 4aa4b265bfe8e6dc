//! Tournée planner - tour optimization and scheduling from the command line
//!
//! Reads a JSON plan (sites + tour), runs the requested operation against the
//! configured routing provider and prints the result as JSON.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tournee_planner::config::Config;
use tournee_planner::services::routing::{create_route_provider, RouteProvider};
use tournee_planner::services::schedule::FallbackPolicy;
use tournee_planner::services::sites::{CachedSiteDirectory, InMemorySiteDirectory, SiteDirectory};
use tournee_planner::services::travel::TravelEstimator;
use tournee_planner::types::TourPlan;
use tournee_planner::{ScheduleError, TourMutationController};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "tournee.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // stdout carries the JSON result, logs go to stderr and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tournee_planner=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let provider: Arc<dyn RouteProvider> = Arc::from(create_route_provider(&config).await);
    let estimator = TravelEstimator::new(provider).with_fallback_speed(config.fallback_speed_kmh);

    if let Err(e) = run(cli.command, &config, estimator).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Command, config: &Config, estimator: TravelEstimator) -> Result<()> {
    match command {
        Command::Optimize { input, fallback } => {
            let mut plan = load_plan(&input)?;
            let controller = controller(config, &plan, estimator.clone());

            controller
                .optimize_tour(&mut plan.tour, fallback)
                .await
                .with_context(|| format!("Optimization of tour '{}' failed", plan.tour.name))?;
            print_json(&plan)
        }
        Command::Recalculate { input, from, fallback } => {
            let mut plan = load_plan(&input)?;
            let policy = if fallback {
                FallbackPolicy::StraightLine
            } else {
                FallbackPolicy::Fail
            };
            let controller =
                controller(config, &plan, estimator.clone()).with_fallback_policy(policy);

            match controller.recalculate(&mut plan.tour, from).await {
                Ok(()) => print_json(&plan),
                Err(ScheduleError::Partial(failure)) => {
                    // Print what could be computed, stale stops flagged
                    warn!(
                        "Printing partial schedule, stops from {} are stale",
                        failure.failed_index + 1
                    );
                    plan.tour.stops = failure.computed.clone();
                    plan.tour.refresh_bounds();
                    print_json(&plan)?;
                    Err(failure.into())
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Route { input } => {
            let plan = load_plan(&input)?;
            let sites: std::collections::HashMap<_, _> =
                plan.sites.iter().map(|s| (s.id, s)).collect();

            let mut routes = Vec::with_capacity(plan.tour.len().saturating_sub(1));
            for pair in plan.tour.stops.windows(2) {
                let (from, to) = (&pair[0], &pair[1]);
                let from_site = sites
                    .get(&from.stop_ref)
                    .with_context(|| format!("Site {} not in plan", from.stop_ref))?;
                let to_site = sites
                    .get(&to.stop_ref)
                    .with_context(|| format!("Site {} not in plan", to.stop_ref))?;

                let route = estimator.route(from_site, to_site, from.departure_time()).await?;
                routes.push(serde_json::json!({
                    "from": from.instance_id,
                    "to": to.instance_id,
                    "route": route,
                }));
            }
            info!("Computed {} route segments via {}", routes.len(), estimator.provider_name());
            print_json(&routes)
        }
    }
}

fn load_plan(path: &Path) -> Result<TourPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let plan: TourPlan = serde_json::from_str(&content)
        .with_context(|| format!("Invalid plan file {}", path.display()))?;
    info!("Loaded tour '{}' with {} stops", plan.tour.name, plan.tour.len());
    Ok(plan)
}

fn controller(
    config: &Config,
    plan: &TourPlan,
    estimator: TravelEstimator,
) -> TourMutationController {
    let backing: Arc<dyn SiteDirectory> = Arc::new(InMemorySiteDirectory::new(plan.sites.clone()));
    let sites = Arc::new(CachedSiteDirectory::new(
        backing,
        Duration::from_secs(config.site_cache_ttl_seconds),
    ));
    TourMutationController::new(sites, estimator).with_default_dwell(config.default_dwell_minutes)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
