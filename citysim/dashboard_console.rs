use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use citysim_scenario_control::{
    patterns, CommandResult, HttpSimulationClient, LoopbackSimulation, OrchestratorConfig,
    OrchestratorTelemetry, QuotaOutcome, ScenarioOrchestrator, DEMAND_PATTERNS, SCENARIOS,
};
use clap::Parser;
use shared_event_bus::{FanoutPublisher, FileEventPublisher, MemoryEventBus};
use shared_logging::JsonLogger;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "citysim-dashboard",
    version,
    about = "Operator console for the city simulation scenario orchestrator"
)]
struct Cli {
    /// TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run against the in-memory loopback simulation instead of the backend.
    #[arg(long)]
    offline: bool,
    /// Hour the clock starts at; overrides the config.
    #[arg(long)]
    start_hour: Option<u8>,
    /// Do not start the clock on launch.
    #[arg(long)]
    no_autostart: bool,
}

struct Console {
    orchestrator: ScenarioOrchestrator,
    bus: Arc<MemoryEventBus>,
    log_path: Option<PathBuf>,
}

impl Console {
    fn bootstrap(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => OrchestratorConfig::load(path)?,
            None => OrchestratorConfig::default(),
        };

        let bus = Arc::new(MemoryEventBus::new(config.telemetry.event_capacity));
        let mut fanout = FanoutPublisher::new().with_sink(bus.clone());
        if let Some(path) = &config.telemetry.event_log_path {
            fanout = fanout.with_sink(Arc::new(
                FileEventPublisher::new(path)
                    .with_context(|| format!("opening event log {}", path.display()))?,
            ));
        }
        let mut telemetry = OrchestratorTelemetry::builder("scenario-control")
            .event_publisher(Arc::new(fanout));
        if let Some(path) = &config.telemetry.log_path {
            telemetry = telemetry.log_path(path);
        }
        let telemetry = telemetry.build().context("initializing telemetry")?;

        let log_path = config.telemetry.log_path.clone();
        let builder = ScenarioOrchestrator::builder().telemetry(telemetry);
        let builder = if cli.offline {
            info!("running against the loopback simulation");
            builder.loopback(Arc::new(LoopbackSimulation::new()))
        } else {
            let client = Arc::new(
                HttpSimulationClient::from_settings(&config.backend)
                    .context("building simulation client")?,
            );
            info!("simulation backend at {}", client.base_url());
            builder
                .simulation(client.clone())
                .network(client.clone())
                .director(client)
        };
        let orchestrator = builder.config(config).build()?;
        Ok(Self {
            orchestrator,
            bus,
            log_path,
        })
    }

    fn mirror_hour_changes(&self) {
        let mut hours = self.orchestrator.subscribe_hour_changes();
        tokio::spawn(async move {
            loop {
                match hours.recv().await {
                    Ok(change) => {
                        let bucket = patterns::bucket_for(change.hour);
                        println!(
                            "\n🕐 {:02}:00  {} {} (quota {} vehicles)",
                            change.hour,
                            bucket.icon,
                            bucket.label,
                            bucket.quota_target()
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("console missed {skipped} hour changes"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn run(&self) -> Result<()> {
        println!("🏙️  CitySim scenario console ready. Type 'help' for options.");
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin).lines();
        loop {
            print!("citysim> ");
            io::stdout().flush()?;
            let line = match reader.next_line().await? {
                Some(line) => line.trim().to_string(),
                None => break,
            };
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let command = parts.next().unwrap_or_default();
            let args = parts.next().unwrap_or("").trim();
            match command {
                "help" => Self::print_help(),
                "clock" => self.print_clock(),
                "start" => self.handle_start(args),
                "stop" => {
                    if self.orchestrator.stop() {
                        println!("Clock and quota maintainer stopped.");
                    } else {
                        println!("Nothing was running.");
                    }
                }
                "pause" => {
                    self.orchestrator.pause();
                    self.print_clock();
                }
                "resume" => {
                    self.orchestrator.resume();
                    self.print_clock();
                }
                "speed" => self.handle_speed(args),
                "quota" => match self.orchestrator.check_quota().await {
                    Ok(outcome) => Self::print_quota(outcome),
                    Err(err) => println!("❌ quota check failed: {err}"),
                },
                "scenarios" => Self::print_scenarios(),
                "patterns" => Self::print_patterns(),
                "events" => self.print_events(args),
                "log" => self.print_log(args)?,
                "quit" | "exit" => break,
                _ => match self.orchestrator.handle_text(&line).await {
                    Some(result) => Self::print_result(&result),
                    None => println!("Not a scenario command: {line}. Type 'help' for usage."),
                },
            }
        }
        self.orchestrator.stop();
        Ok(())
    }

    fn handle_start(&self, args: &str) {
        let clock = self.orchestrator.current_clock();
        let hour = if args.is_empty() {
            clock.hour
        } else if let Ok(hour) = args.parse::<u8>() {
            hour.min(23)
        } else {
            println!("Usage: start [hour]");
            return;
        };
        let minute = if hour == clock.hour { clock.minute } else { 0 };
        match self.orchestrator.start(hour, minute) {
            Ok(()) => self.print_clock(),
            Err(err) => println!("❌ {err}"),
        }
    }

    fn handle_speed(&self, args: &str) {
        let Ok(ms) = args.parse::<u64>() else {
            println!("Usage: speed <milliseconds per simulated minute>");
            return;
        };
        match self
            .orchestrator
            .set_tick_period(Duration::from_millis(ms.max(1)))
        {
            Ok(()) => self.print_clock(),
            Err(err) => println!("❌ {err}"),
        }
    }

    fn print_clock(&self) {
        let clock = self.orchestrator.current_clock();
        let state = if clock.running {
            "running"
        } else if self.orchestrator.is_started() {
            "paused"
        } else {
            "stopped"
        };
        println!(
            "🕐 {} ({state}, {} ms per minute) | {}°F",
            clock.display(),
            clock.tick_period_ms,
            self.orchestrator.current_temperature()
        );
    }

    fn print_scenarios() {
        for scenario in &SCENARIOS {
            println!(
                "{} {:<18} {:02}:00  {:>4}°F  {:>3} vehicles  [{}]  {}",
                scenario.icon,
                scenario.key,
                scenario.hour,
                scenario.temperature_f,
                scenario.vehicle_target,
                scenario.difficulty.label(),
                scenario.description
            );
        }
    }

    fn print_patterns() {
        for bucket in &DEMAND_PATTERNS {
            println!(
                "{} {:02}:00-{:02}:00  {:<14} {:>3}-{:<3} vehicles  {:.0}% EV",
                bucket.icon,
                bucket.start_hour,
                bucket.end_hour,
                bucket.label,
                bucket.min_vehicles,
                bucket.max_vehicles,
                bucket.ev_fraction * 100.0
            );
        }
    }

    fn print_events(&self, args: &str) {
        let limit = args.parse::<usize>().unwrap_or(10);
        let events = self.bus.snapshot();
        for event in events.iter().skip(events.len().saturating_sub(limit)) {
            println!("{} {} {}", event.timestamp, event.event_type, event.payload);
        }
    }

    fn print_log(&self, args: &str) -> Result<()> {
        let Some(path) = &self.log_path else {
            println!("File logging is disabled.");
            return Ok(());
        };
        let limit = args.parse::<usize>().unwrap_or(10);
        let records = JsonLogger::read_records(path)?;
        for record in records.iter().skip(records.len().saturating_sub(limit)) {
            println!(
                "{} {:<5} {} {}",
                record.timestamp,
                record.level.label(),
                record.message,
                serde_json::Value::Object(record.fields.clone())
            );
        }
        Ok(())
    }

    fn print_quota(outcome: QuotaOutcome) {
        match outcome {
            QuotaOutcome::Skipped => println!("Clock is not running; quota not checked."),
            QuotaOutcome::Deferred => {
                println!("⛔ Another change is in progress; try again shortly.");
            }
            QuotaOutcome::Satisfied { population, target } => {
                println!("✅ {population} vehicles, quota {target} met.");
            }
            QuotaOutcome::ToppedUp {
                requested,
                spawned,
                total,
            } => println!("✅ Spawned {spawned} of {requested} missing vehicles, {total} now."),
            QuotaOutcome::Discarded => println!("Quota check discarded after stop."),
        }
    }

    fn print_result(result: &CommandResult) {
        let marker = if result.conflict {
            "⛔"
        } else if result.success {
            "✅"
        } else {
            "❌"
        };
        println!("{marker} {}", result.message);
    }

    fn print_help() {
        println!(
            r"Built-ins:
  help                 Show this help
  clock                Show the simulated clock
  start [hour]         Start the clock (and quota maintainer)
  stop                 Stop the clock and quota maintainer
  pause | resume       Freeze or unfreeze the clock
  speed <ms>           Real milliseconds per simulated minute
  quota                Top up the population to the current bucket now
  scenarios            List the scenario catalog
  patterns             List hourly demand patterns
  events [n]           Show the last n mirrored events
  log [n]              Show the last n log records
  quit                 Exit

Anything else is read as a control command, for example:
  set time to 6pm | set time to lunch hour | set temperature to 95 | evening rush
  status | what should I do"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citysim_dashboard=info,citysim_scenario_control=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let console = Console::bootstrap(&cli).context("failed to bootstrap console")?;
    console.mirror_hour_changes();
    if !cli.no_autostart {
        let clock = &console.orchestrator.config().clock;
        let hour = cli.start_hour.unwrap_or(clock.initial_hour).min(23);
        console.orchestrator.start(hour, clock.initial_minute)?;
    }
    console.run().await
}
