use jsmutator::config::{Config, TestFramework};
use jsmutator::engine;
use jsmutator::operators::Exclusions;
use jsmutator::output;
use jsmutator::runner;
use jsmutator::safety;
use jsmutator::state::{self, RunStatus};

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jsmutator", version, about = "Mutation testing for JavaScript and TypeScript")]
struct Cli {
    /// Path to configuration file (default: <project>/jsmutator.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Project root (default: current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,
    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, env = "JSMUTATOR_LOG")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Source files to mutate, relative to the project root
    #[arg(short, long, num_args = 1..)]
    mutate: Vec<PathBuf>,
    /// Spec files passed to the test command as {specs}
    #[arg(short, long, num_args = 1..)]
    specs: Vec<PathBuf>,
    #[arg(short, long, value_enum)]
    framework: Option<TestFramework>,
    /// Test command template; {specs} and {port} are substituted
    #[arg(long)]
    test_cmd: Option<String>,
    /// Runner server command template for server based frameworks
    #[arg(long)]
    server_cmd: Option<String>,
    /// Operator codes to skip (see `jsmutator operators`)
    #[arg(short, long, num_args = 1..)]
    exclude: Vec<String>,
    /// Default-excluded operator codes to mutate anyway
    #[arg(short, long, num_args = 1..)]
    include: Vec<String>,
    /// Per-mutant test timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Number of sandbox copies tested concurrently
    #[arg(long)]
    pipelines: Option<usize>,
    #[arg(long)]
    max_active_servers: Option<usize>,
    /// Mutate source in-place instead of copying to temp dir
    #[arg(long)]
    in_place: bool,
    /// Output JSON instead of human-readable text
    #[arg(long)]
    json: bool,
    /// Exit code only, no output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation testing on the configured source files
    Run(RunArgs),
    /// List the mutations found in a source file without running tests
    List {
        file: PathBuf,
        /// Operator codes to skip
        #[arg(short, long, num_args = 1..)]
        exclude: Vec<String>,
        /// Default-excluded operator codes to mutate anyway
        #[arg(short, long, num_args = 1..)]
        include: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// List mutation operators and their codes
    Operators,
    /// Show details for a survived mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let project_root = match &cli.project {
        Some(p) => p.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let exit_code = match cli.command {
        Commands::Run(args) => {
            match Config::load(cli.config.as_deref(), &project_root) {
                Ok(config) => {
                    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
                    cmd_run(apply_overrides(config, &args), &project_root, args.json, args.quiet).await
                }
                Err(e) => {
                    output::print_error(&e.to_string());
                    2
                }
            }
        }
        Commands::List { file, exclude, include, json } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            let exclusions = Exclusions::new(&exclude, &include);
            cmd_list(&project_root.join(file), &exclusions, json)
        }
        Commands::Operators => cmd_operators(),
        Commands::Show { mutant_ref, json } => cmd_show(&project_root, mutant_ref, json),
        Commands::Status { json } => cmd_status(&project_root, json),
    };

    process::exit(exit_code);
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(mut config: Config, args: &RunArgs) -> Config {
    if !args.mutate.is_empty() {
        config.mutate = args.mutate.clone();
    }
    if !args.specs.is_empty() {
        config.specs = args.specs.clone();
    }
    if let Some(framework) = args.framework {
        config.framework = framework;
    }
    if let Some(cmd) = &args.test_cmd {
        config.test_command = Some(cmd.clone());
    }
    if let Some(cmd) = &args.server_cmd {
        config.server_command = Some(cmd.clone());
    }
    config.exclude_mutations.extend(args.exclude.iter().cloned());
    config.include_mutations.extend(args.include.iter().cloned());
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(pipelines) = args.pipelines {
        config.pipelines = pipelines;
    }
    if let Some(max) = args.max_active_servers {
        config.max_active_servers = max;
    }
    if args.in_place {
        config.mutate_production_code = true;
    }
    // Machine readable output must not be interleaved with test output.
    if args.json || args.quiet {
        config.echo_output = false;
    }
    config
}

fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            output::print_error(&format!("Failed to serialize output: {}", e));
            false
        }
    }
}

async fn cmd_run(config: Config, project_root: &Path, json_mode: bool, quiet: bool) -> i32 {
    if let Err(e) = config.validate() {
        output::print_error(&e.to_string());
        return 2;
    }

    let outcome = tokio::select! {
        result = runner::run(&config, project_root) => result,
        _ = tokio::signal::ctrl_c() => {
            // The run future is dropped here, which kills its test processes.
            if config.mutate_production_code {
                let files: Vec<PathBuf> = config.mutate.iter().map(|p| project_root.join(p)).collect();
                if let Err(e) = safety::recover_interrupted(&files) {
                    output::print_error(&format!("Failed to restore sources: {}", e));
                }
            }
            output::print_error("Interrupted.");
            return 3;
        }
    };

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            output::print_error(&e.to_string());
            return 3;
        }
    };

    state::save_last_run(&report, project_root);

    let exit_code = match report.status {
        RunStatus::BaselineFailed => 3,
        RunStatus::Success if report.survived > 0 => 1,
        RunStatus::Success => 0,
    };

    if quiet {
        return exit_code;
    }
    if json_mode {
        if !print_json(&report) {
            return 3;
        }
    } else {
        output::print_run_report(&report);
    }
    exit_code
}

fn cmd_list(file: &Path, exclusions: &Exclusions, json_mode: bool) -> i32 {
    let Some(dialect) = jsmutator::detect_language(file) else {
        output::print_error(&format!(
            "Unsupported file type: {}. Supported: .js, .mjs, .cjs, .ts, .mts, .cts, .tsx, .jsx",
            file.display()
        ));
        return 2;
    };
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            output::print_error(&format!("Failed to read {}: {}", file.display(), e));
            return 2;
        }
    };
    match engine::find_mutations(&source, exclusions, dialect) {
        Ok(mutations) => {
            if json_mode {
                if !print_json(&mutations) {
                    return 3;
                }
            } else {
                output::print_mutations(file, &mutations);
            }
            0
        }
        Err(e) => {
            output::print_error(&format!("Cannot parse {}: {}", file.display(), e));
            3
        }
    }
}

fn cmd_operators() -> i32 {
    output::print_operators();
    0
}

fn cmd_show(project_root: &Path, mutant_ref: String, json_mode: bool) -> i32 {
    let last_run = match state::load_last_run(project_root) {
        Some(r) => r,
        None => {
            output::print_error("No previous run found. Run `jsmutator run` first.");
            return 2;
        }
    };

    match last_run.find_survivor(&mutant_ref) {
        Some(m) => {
            if json_mode {
                if !print_json(&m) {
                    return 3;
                }
            } else {
                output::print_mutant_detail(&m);
            }
            0
        }
        None => {
            let valid: Vec<_> = last_run
                .survivors()
                .iter()
                .map(|m| format!("@{}", m.ref_id))
                .collect();
            output::print_error(&format!(
                "Mutant @{} not found. Valid refs: {}",
                mutant_ref.trim_start_matches('@'),
                valid.join(", ")
            ));
            2
        }
    }
}

fn cmd_status(project_root: &Path, json_mode: bool) -> i32 {
    match state::load_last_run(project_root) {
        Some(report) => {
            if json_mode {
                if !print_json(&report) {
                    return 3;
                }
            } else {
                output::print_status(&report);
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `jsmutator run` first.");
            2
        }
    }
}
