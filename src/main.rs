//! FlowRunner CLI Entry Point
//!
//! Loads workflow definitions, switches their triggers on and runs fired
//! executions one at a time until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run until Ctrl-C
//! flowrunner workflows.yaml
//!
//! # Run for ten seconds against a custom store
//! flowrunner workflows.yaml --store /tmp/store.json --run-for 10
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use once_cell::sync::Lazy;

use flowrunner::error::ProcessorError;
use flowrunner::execution::{Execution, ExecutionStatus, Job, Processor};
use flowrunner::scheduler::{Scheduler, SchedulerHandle};
use flowrunner::storage::{MemoryStorage, Repository};
use flowrunner::trigger::{IntervalTrigger, INTERVAL_TRIGGER};
use flowrunner::workflow::{load_definitions, Workflow, WorkflowFilter};
use flowrunner::{APP_NAME, VERSION};

/// Store snapshot used when `--store` is not given.
static DEFAULT_STORE_PATH: Lazy<PathBuf> =
    Lazy::new(|| PathBuf::from(".flowrunner").join("store.json"));

/// Time allowed for the run in flight to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    definitions_path: Option<String>,
    store_path: PathBuf,
    run_for: Option<Duration>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            definitions_path: None,
            store_path: DEFAULT_STORE_PATH.clone(),
            run_for: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Sequential Workflow Scheduler");
    println!();
}

fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <DEFINITIONS_FILE>");
    println!();
    println!("Arguments:");
    println!("  <DEFINITIONS_FILE>  Path to workflow definitions YAML file");
    println!();
    println!("Options:");
    println!(
        "  --store PATH        Store snapshot file (default: {})",
        DEFAULT_STORE_PATH.display()
    );
    println!("  --run-for SECS      Stop after SECS seconds instead of waiting for Ctrl-C");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner workflows.yaml");
    println!("  flowrunner workflows.yaml --store /tmp/store.json --run-for 10");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--store" => {
                i += 1;
                if i >= args.len() {
                    return Err("--store requires a path argument".to_string());
                }
                config.store_path = PathBuf::from(&args[i]);
            }
            "--run-for" => {
                i += 1;
                if i >= args.len() {
                    return Err("--run-for requires a number of seconds".to_string());
                }
                let secs: u64 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid --run-for value: {}", args[i]))?;
                config.run_for = Some(Duration::from_secs(secs));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.definitions_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.definitions_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.definitions_path.is_none() {
        return Err("missing <DEFINITIONS_FILE>".to_string());
    }
    Ok(config)
}

/// Demo processor: logs the execution context and resolves it.
struct EchoProcessor {
    execution: Execution,
    scheduler: SchedulerHandle,
}

impl EchoProcessor {
    fn finish(&self) -> Result<(), ProcessorError> {
        let Some(repository) = self.scheduler.repository() else {
            warn!("Scheduler gone before execution {} finished", self.execution.id);
            return Ok(());
        };
        repository.set_execution_status(self.execution.id, ExecutionStatus::Resolved)?;
        Ok(())
    }
}

#[async_trait]
impl Processor for EchoProcessor {
    async fn start(&mut self) -> Result<(), ProcessorError> {
        let title = self
            .execution
            .workflow
            .as_ref()
            .map(Workflow::label)
            .unwrap_or_else(|| self.execution.key.clone());
        info!(
            "Execution {} of {}: context {}",
            self.execution.id, title, self.execution.context
        );
        self.finish()
    }

    async fn resume(&mut self, job: Job) -> Result<(), ProcessorError> {
        info!(
            "Execution {} resumed from job {} ({}): {}",
            self.execution.id, job.id, job.instruction, job.result
        );
        self.finish()
    }
}

/// Saves the definitions into the store, keeping stored counters.
///
/// Definitions without an id are only inserted when their key is new.
fn sync_definitions(
    repository: &Repository,
    definitions: Vec<Workflow>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut saved = 0;

    for mut definition in definitions {
        if definition.is_new() {
            let existing = repository.workflows(&WorkflowFilter::by_key(&definition.key))?;
            if !existing.is_empty() {
                info!("Workflow '{}' already stored, definition skipped", definition.key);
                continue;
            }
        } else if let Some(stored) = repository.workflow(definition.id)? {
            definition.executed = stored.executed;
            definition.all_executed = stored.all_executed;
            definition.current = stored.current;
        }

        repository.save(definition)?;
        saved += 1;
    }

    Ok(saved)
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let storage = MemoryStorage::open(&config.store_path)?;
    info!("Store: {}", config.store_path.display());

    let scheduler = Scheduler::new(
        Arc::new(storage),
        Arc::new(
            |execution: Execution, scheduler: SchedulerHandle| -> Box<dyn Processor> {
                Box::new(EchoProcessor {
                    execution,
                    scheduler,
                })
            },
        ),
    );
    scheduler.register_trigger(
        INTERVAL_TRIGGER,
        Arc::new(IntervalTrigger::new(scheduler.handle())),
    );
    scheduler.load();

    let definitions_path = config.definitions_path.unwrap_or_default();
    let definitions = load_definitions(&definitions_path, &scheduler.triggers().names())
        .map_err(|e| {
            error!("Failed to load definitions: {}", e);
            format!("Could not load definitions from '{}': {}", definitions_path, e)
        })?;

    let saved = sync_definitions(&scheduler.repository(), definitions)?;
    info!("{} definitions saved", saved);

    let enabled = scheduler.start()?;
    info!("{} workflows listening", enabled);

    match config.run_for {
        Some(duration) => {
            info!("Running for {} s", duration.as_secs());
            tokio::time::sleep(duration).await;
        }
        None => {
            info!("Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    scheduler.stop()?;
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler.wait_idle())
        .await
        .is_err()
    {
        warn!("Run in flight did not finish within {:?}", SHUTDOWN_GRACE);
    }

    println!("{}", scheduler.timeline().gantt_chart());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrunner::storage::WriteMode;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_arguments() {
        let config = parse_arguments(&args(&[
            "flowrunner",
            "defs.yaml",
            "--store",
            "/tmp/s.json",
            "--run-for",
            "3",
            "-v",
        ]))
        .unwrap();

        assert_eq!(config.definitions_path.as_deref(), Some("defs.yaml"));
        assert_eq!(config.store_path, PathBuf::from("/tmp/s.json"));
        assert_eq!(config.run_for, Some(Duration::from_secs(3)));
        assert!(config.verbose);
    }

    #[test]
    fn test_parse_arguments_defaults_and_errors() {
        let config = parse_arguments(&args(&["flowrunner", "defs.yaml"])).unwrap();
        assert_eq!(config.store_path, *DEFAULT_STORE_PATH);
        assert_eq!(config.run_for, None);

        assert!(parse_arguments(&args(&["flowrunner"])).is_err());
        assert!(parse_arguments(&args(&["flowrunner", "a.yaml", "b.yaml"])).is_err());
        assert!(parse_arguments(&args(&["flowrunner", "a.yaml", "--run-for", "x"])).is_err());
        assert!(parse_arguments(&args(&["flowrunner", "a.yaml", "--bogus"])).is_err());
    }

    #[test]
    fn test_sync_definitions_keeps_counters() {
        let repository = Repository::new(Arc::new(MemoryStorage::new()));
        let mut stored = repository
            .save(Workflow::new("k1", "interval").with_id(7))
            .unwrap();
        stored.executed = 4;
        stored.all_executed = 9;
        let mut uow = repository.begin().unwrap();
        uow.update_workflow(&stored, WriteMode::Silent).unwrap();
        uow.commit().unwrap();

        let definitions = vec![
            Workflow::new("k1", "interval").with_id(7).with_title("Edited"),
            Workflow::new("k1", "interval"),
            Workflow::new("k2", "interval"),
        ];
        let saved = sync_definitions(&repository, definitions).unwrap();
        assert_eq!(saved, 2);

        let row = repository.workflow(7).unwrap().unwrap();
        assert_eq!(row.title, "Edited");
        assert_eq!(row.executed, 4);
        assert_eq!(row.all_executed, 9);
        assert_eq!(repository.workflows(&WorkflowFilter::by_key("k2")).unwrap().len(), 1);
    }
}
