/*
* Operator command line for the service billing manager.
*
* service-billing-manager
* ├── init [--force]            write config/default.toml
* ├── resource
* │   ├── add                   register a rented service
* │   ├── list                  all services with live cost figures
* │   ├── show <id>             one service in detail
* │   └── delete <id>           remove a service and its usage history
* ├── start <id>                begin a billable run
* ├── stop <id>                 end the run and fold its hours into the total
* ├── cost <id> [--json]        period / projected / lifetime figures
* ├── history <id>              usage events, newest first
* ├── expenses <id>             per-month totals from the usage history
* ├── summary [--json]          totals across all services, split by kind
* └── watch <id>                live running time until Ctrl-C
*
* This is the presentation side: all currency and time formatting lives here.
*/

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rust_decimal::Decimal;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::billing::{
    estimate_monthly_cost, summarize_monthly, summarize_portfolio, BillingCalculation, CostAccrualEngine,
    PortfolioSummary,
};
use crate::config::{Settings, StorageBackend};
use crate::core::{BillableResource, LifecycleController, RunningTimeCalculator, ServiceKind, ServiceStatus, SystemClock, TimeSource};
use crate::errors::BillingError;
use crate::storage::{JsonFileStore, MemoryStore, ResourceStore};

pub mod format;

use format::{format_currency, format_decimal, format_hours};

pub type Controller = LifecycleController<dyn ResourceStore, SystemClock>;

#[derive(Parser)]
#[command(name = "service-billing-manager")]
#[command(version)]
#[command(about = "Track running time and cost of rented cloud services", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, value_name = "CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// Manage tracked services
    Resource {
        #[command(subcommand)]
        command: ResourceCommands,
    },
    /// Start a billable run
    Start { id: String },
    /// Stop the current run
    Stop { id: String },
    /// Show cost figures
    Cost {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Show usage events, newest first
    History { id: String },
    /// Show monthly totals built from the usage history
    Expenses { id: String },
    /// Show cost totals across all services
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Follow the running time of a service
    Watch { id: String },
}

#[derive(Subcommand)]
pub enum ResourceCommands {
    /// Register a new service
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "virtual-machine")]
        kind: ServiceKind,
        #[arg(short, long)]
        rate: Decimal,
        #[arg(short = 'm', long, default_value = "720")]
        monthly_hours: Decimal,
        #[arg(short, long, default_value = "")]
        provider: String,
        #[arg(short, long, default_value = "active")]
        status: ServiceStatus,
        /// Sub-resource as NAME=HOURLY_RATE, repeatable
        #[arg(long = "sub", value_parser = parse_sub_resource)]
        subs: Vec<(String, Decimal)>,
        /// Free-form KEY=VALUE metadata, repeatable
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// List all services
    List,
    /// Show one service
    Show { id: String },
    /// Delete a service and its usage history
    Delete { id: String },
}

pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let controller = build_controller(&settings);
    let engine = CostAccrualEngine::new(settings.period_policy());

    execute(cli.command, &controller, &engine, &settings)
        .await
        .map_err(|e| match e.downcast::<BillingError>() {
            Ok(billing) if billing.is_user_facing() => anyhow!("{}", billing.to_string().red()),
            Ok(billing) => {
                error!(error = %billing, "Command failed");
                anyhow!(billing)
            }
            Err(other) => other,
        })
}

async fn execute(
    command: Commands,
    controller: &Controller,
    engine: &CostAccrualEngine,
    settings: &Settings,
) -> Result<()> {
    match command {
        Commands::Init { force } => handle_init_command(force)?,
        Commands::Resource { command } => handle_resource_command(command, controller, engine).await?,
        Commands::Start { id } => {
            let resource = controller.start_now(&id).await?;
            println!("{} '{}' started", "✓".green(), resource.name);
        }
        Commands::Stop { id } => {
            let resource = controller.stop_now(&id).await?;
            let events = controller.history(&id).await?;
            let last = events.first();
            println!(
                "{} '{}' stopped after {} ({})",
                "✓".green(),
                resource.name,
                format_hours(last.and_then(|e| e.duration).unwrap_or_default()),
                format_currency(last.and_then(|e| e.cost).unwrap_or_default()),
            );
        }
        Commands::Cost { id, json } => {
            let calc = controller.calculate_now(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&calc)?);
            } else {
                print_calculation(&calc);
            }
        }
        Commands::History { id } => {
            let events = controller.history(&id).await?;
            if events.is_empty() {
                println!("No usage recorded");
            }
            for event in events {
                let extra = match (event.duration, event.cost) {
                    (Some(hours), Some(cost)) => format!("  {}  {}", format_hours(hours), format_currency(cost)),
                    _ => String::new(),
                };
                println!("{}  {:<5}{}", event.timestamp.format("%Y-%m-%d %H:%M:%S"), event.action.to_string(), extra);
            }
        }
        Commands::Expenses { id } => {
            let events = controller.history(&id).await?;
            let months = summarize_monthly(&id, &events);
            if months.is_empty() {
                println!("No completed runs");
            }
            for month in months {
                println!(
                    "{}-{:02}  {} runs  {}h  {}  (avg {}h/day, {} days active)",
                    month.year,
                    month.month,
                    month.runs,
                    format_decimal(month.total_hours),
                    format_currency(month.total_cost),
                    format_decimal(month.average_daily_hours),
                    month.days_active,
                );
            }
        }
        Commands::Summary { json } => {
            let resources = controller.list().await?;
            let summary = summarize_portfolio(engine, &resources, controller.clock().now())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Watch { id } => watch(controller, engine, &id, settings).await?,
    }

    Ok(())
}

pub fn build_controller(settings: &Settings) -> Controller {
    let store: Arc<dyn ResourceStore> = match settings.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Json => Arc::new(JsonFileStore::new(settings.storage.data_path.clone())),
    };

    LifecycleController::with_clock(store, SystemClock)
        .gate(settings.status_gate())
        .engine(CostAccrualEngine::new(settings.period_policy()))
        .store_timeout(settings.store_timeout())
}

async fn handle_resource_command(
    command: ResourceCommands,
    controller: &Controller,
    engine: &CostAccrualEngine,
) -> Result<()> {
    match command {
        ResourceCommands::Add {
            name,
            kind,
            rate,
            monthly_hours,
            provider,
            status,
            subs,
            metadata,
        } => {
            let mut resource = BillableResource::new(name, kind, rate, monthly_hours, controller.clock().now())
                .with_provider(provider)
                .with_status(status);
            for (sub_name, sub_rate) in subs {
                resource = resource.with_sub_resource(sub_name, sub_rate);
            }
            for (key, value) in metadata {
                resource = resource.with_metadata(key, value);
            }

            let resource = controller.register(resource).await?;
            println!("{} '{}' registered as {}", "✓".green(), resource.name, resource.id.bold());
            println!("  estimated monthly cost: {}", format_currency(estimate_monthly_cost(&resource)));
        }
        ResourceCommands::List => {
            let now = controller.clock().now();
            let resources = controller.list().await?;
            println!("{}", "Services:".bold());
            for resource in resources {
                let state = if resource.is_running {
                    "Running".green()
                } else {
                    "Stopped".red()
                };
                let month_cost = match engine.calculate(&resource, now) {
                    Ok(calc) => format_currency(calc.current_period_cost),
                    Err(e) => format!("{}", e).yellow().to_string(),
                };
                println!(
                    "- {} {} [{}] {} {}  this month: {}",
                    resource.id.dimmed(),
                    resource.name,
                    resource.kind,
                    resource.status,
                    state,
                    month_cost
                );
            }
        }
        ResourceCommands::Show { id } => {
            let resource = controller.get(&id).await?;
            let now = controller.clock().now();
            println!("{} ({})", resource.name.bold(), resource.id.dimmed());
            println!("  kind:        {}", resource.kind);
            if !resource.provider.is_empty() {
                println!("  provider:    {}", resource.provider);
            }
            println!("  status:      {}", resource.status);
            println!("  hourly rate: {}", format_currency(resource.hourly_rate));
            for sub in &resource.sub_resources {
                println!("    + {} {}/h", sub.name, format_currency(sub.hourly_rate));
            }
            for (key, value) in &resource.metadata {
                println!("  {}: {}", key, value);
            }
            if resource.is_running {
                let session = RunningTimeCalculator::elapsed_hours(&resource, now)?;
                let session_cost = RunningTimeCalculator::current_session_cost(&resource, now)?;
                println!(
                    "  {} for {} ({})",
                    "running".green(),
                    format_hours(session),
                    format_currency(session_cost)
                );
            } else {
                println!("  {}", "stopped".red());
            }
            print_calculation(&engine.calculate(&resource, now)?);
        }
        ResourceCommands::Delete { id } => {
            controller.remove(&id).await?;
            println!("{} service {} deleted", "✓".green(), id);
        }
    }

    Ok(())
}

async fn watch(controller: &Controller, engine: &CostAccrualEngine, id: &str, settings: &Settings) -> Result<()> {
    let mut ticker = tokio::time::interval(settings.refresh_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    info!(resource_id = %id, "Watching running time, Ctrl-C to quit");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let resource = controller.get(id).await?;
                let now = controller.clock().now();
                let elapsed = RunningTimeCalculator::elapsed_hours(&resource, now)?;
                let calc = engine.calculate(&resource, now)?;
                print!(
                    "\r{} session {}  lifetime {}  this month {}   ",
                    if resource.is_running { "●".green() } else { "○".red() },
                    format_hours(elapsed),
                    format_hours(calc.lifetime_hours),
                    format_currency(calc.current_period_cost),
                );
                std::io::stdout().flush()?;
            }
            _ = &mut ctrl_c => {
                println!();
                return Ok(());
            }
        }
    }
}

fn print_calculation(calc: &BillingCalculation) {
    println!(
        "  this period: {} h  {}",
        format_hours(calc.current_period_hours),
        format_currency(calc.current_period_cost)
    );
    println!(
        "  projected:   {} h  {}",
        format_decimal(calc.projected_period_hours),
        format_currency(calc.projected_period_cost)
    );
    println!(
        "  lifetime:    {} h  {}",
        format_hours(calc.lifetime_hours),
        format_currency(calc.lifetime_cost)
    );
}

fn print_summary(summary: &PortfolioSummary) {
    println!("{}", "Services:".bold());
    println!(
        "  {} total, {} active, {} running, {} expired",
        summary.total_services,
        summary.active_services.to_string().green(),
        summary.running_services,
        summary.expired_services.to_string().red()
    );
    println!("  this month:      {}", format_currency(summary.current_period_cost));
    println!("  projected month: {}", format_currency(summary.projected_period_cost));
    println!("  annual estimate: {}", format_currency(summary.annual_estimate));
    if !summary.by_kind.is_empty() {
        println!("{}", "By kind:".bold());
    }
    for kind in &summary.by_kind {
        println!(
            "  {:<16} {:>3}  {}",
            kind.kind.to_string(),
            kind.count,
            format_currency(kind.current_period_cost)
        );
    }
}

fn handle_init_command(force: bool) -> Result<()> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir).context("creating config directory")?;
    let default_config = crate::config::generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&target, config_str).with_context(|| format!("writing {}", target.display()))?;

    println!("{} Default configuration generated", "✓".green());
    Ok(())
}

fn parse_sub_resource(raw: &str) -> Result<(String, Decimal), String> {
    let (name, rate) = parse_key_value(raw)?;
    let rate = rate
        .parse::<Decimal>()
        .map_err(|e| format!("invalid hourly rate '{}': {}", rate, e))?;
    Ok((name, rate))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rust_decimal_macros::dec;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_parses_subs_and_metadata() {
        let cli = Cli::try_parse_from([
            "service-billing-manager",
            "resource",
            "add",
            "--name",
            "web",
            "--rate",
            "0.10",
            "--sub",
            "ip=0.005",
            "--meta",
            "cpu=4 vCPU",
        ])
        .unwrap();

        match cli.command {
            Commands::Resource {
                command: ResourceCommands::Add { kind, rate, subs, metadata, .. },
            } => {
                assert_eq!(kind, ServiceKind::VirtualMachine);
                assert_eq!(rate, dec!(0.10));
                assert_eq!(subs, vec![("ip".to_string(), dec!(0.005))]);
                assert_eq!(metadata, vec![("cpu".to_string(), "4 vCPU".to_string())]);
            }
            _ => panic!("expected resource add"),
        }
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
        assert!(parse_sub_resource("ip=cheap").is_err());
    }

    #[test]
    fn init_and_summary_parse_into_their_commands() {
        let init = Cli::try_parse_from(["service-billing-manager", "init", "--force"]).unwrap();
        assert!(matches!(init.command, Commands::Init { force: true }));

        let summary = Cli::try_parse_from(["service-billing-manager", "summary", "--json"]).unwrap();
        assert!(matches!(summary.command, Commands::Summary { json: true }));
    }

    #[tokio::test]
    async fn summary_runs_against_a_memory_backend() {
        let mut settings = crate::config::generate_default_config();
        settings.storage.backend = StorageBackend::Memory;
        let controller = build_controller(&settings);
        let engine = CostAccrualEngine::new(settings.period_policy());

        let resource = BillableResource::new("web", ServiceKind::VirtualMachine, dec!(0.10), dec!(720), controller.clock().now());
        controller.register(resource).await.unwrap();

        execute(Commands::Summary { json: true }, &controller, &engine, &settings)
            .await
            .unwrap();
        execute(Commands::Summary { json: false }, &controller, &engine, &settings)
            .await
            .unwrap();
    }
}
