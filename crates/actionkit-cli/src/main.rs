//! actionkit - run serverless-style actions locally
//!
//! ## Commands
//!
//! - `test-worker`: run the golden-fixture suite of an action
//! - `run-worker`: invoke an action once on a local file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, Level};

use actionkit_core::action::descriptor::DEFAULT_KIND;
use actionkit_core::{ActionCode, ActionDescriptor, ActionRuntime, DockerCli, HarnessConfig};
use actionkit_test::worker::release;
use actionkit_test::{run_once, RunRequest, SuiteError, SuiteOptions, TestOrchestrator};

/// Exit status of a fatal harness error.
const EXIT_FATAL: i32 = 3;

#[derive(Parser)]
#[command(name = "actionkit")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local action runner and golden-fixture test harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test cases of an action against a local container
    TestWorker {
        #[command(flatten)]
        action: ActionArgs,

        /// Directory containing one sub-directory per test case
        #[arg(long, env = "ACTIONKIT_TESTS_DIR", default_value = "test")]
        tests: PathBuf,

        /// Directory for staging and test results
        #[arg(long, env = "ACTIONKIT_BUILD_DIR", default_value = "build")]
        build_dir: PathBuf,

        /// Replace expected renditions that do not match
        #[arg(short, long)]
        update_renditions: bool,

        /// Only run test cases matching this pattern (`*` and `?`)
        pattern: Option<String>,
    },

    /// Invoke an action once and copy its rendition next to RENDITION
    RunWorker {
        #[command(flatten)]
        action: ActionArgs,

        /// Directory for staging
        #[arg(long, env = "ACTIONKIT_BUILD_DIR", default_value = "build")]
        build_dir: PathBuf,

        /// Rendition instruction, JSON values are parsed (repeatable)
        #[arg(long = "param", num_args = 2, value_names = ["KEY", "VALUE"])]
        params: Vec<String>,

        /// Source file
        source: PathBuf,

        /// Where to write the rendition; its file name is the rendition name
        rendition: PathBuf,
    },
}

#[derive(Args)]
struct ActionArgs {
    /// Action name
    #[arg(long)]
    action_name: String,

    /// Zipped action code
    #[arg(long, conflicts_with = "script", required_unless_present = "script")]
    zip: Option<PathBuf>,

    /// Single-file action code
    #[arg(long)]
    script: Option<PathBuf>,

    /// Runtime kind
    #[arg(long, conflicts_with = "image")]
    kind: Option<String>,

    /// Container image, instead of the kind's image
    #[arg(long)]
    image: Option<String>,

    /// Entry point
    #[arg(long, default_value = "main")]
    main: String,

    /// Invocation and init timeout in milliseconds
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,

    /// Memory limit in MB
    #[arg(long, default_value_t = 0)]
    memory_mb: u64,
}

impl ActionArgs {
    fn descriptor(&self) -> Result<ActionDescriptor> {
        let code = match (&self.zip, &self.script) {
            (Some(zip), _) => ActionCode::Binary(
                std::fs::read(zip).with_context(|| format!("Failed to read {}", zip.display()))?,
            ),
            (None, Some(script)) => ActionCode::Script(
                std::fs::read_to_string(script)
                    .with_context(|| format!("Failed to read {}", script.display()))?,
            ),
            (None, None) => anyhow::bail!("Missing action code: use --zip or --script"),
        };
        let runtime = match (&self.image, &self.kind) {
            (Some(image), _) => ActionRuntime::Image(image.clone()),
            (None, Some(kind)) => ActionRuntime::Kind(kind.clone()),
            (None, None) => ActionRuntime::Kind(DEFAULT_KIND.to_string()),
        };
        Ok(ActionDescriptor::new(&self.action_name, code)?
            .with_runtime(runtime)
            .with_main(&self.main)
            .with_limits(self.timeout_ms, self.memory_mb))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    actionkit_core::init_tracing(cli.json, level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let harness = HarnessConfig::from_env();
    match cli.command {
        Commands::TestWorker {
            action,
            tests,
            build_dir,
            update_renditions,
            pattern,
        } => {
            let mut options = SuiteOptions::new(tests, build_dir, harness.run_dir_name())
                .with_update_renditions(update_renditions);
            if let Some(pattern) = pattern {
                options = options.with_pattern(pattern);
            }
            cmd_test_worker(action.descriptor()?, options, harness).await
        }
        Commands::RunWorker {
            action,
            build_dir,
            params,
            source,
            rendition,
        } => {
            let request = RunRequest::new(source, rendition, build_dir, harness.run_dir_name())
                .with_params(parse_params(&params));
            cmd_run_worker(action.descriptor()?, request, harness).await
        }
    }
}

async fn cmd_test_worker(
    action: ActionDescriptor,
    options: SuiteOptions,
    harness: HarnessConfig,
) -> Result<i32> {
    let runtime = Arc::new(DockerCli::new(harness.docker_binary.clone()));
    let mut orchestrator = TestOrchestrator::new(action, options, harness, runtime);

    let finished = tokio::select! {
        outcome = orchestrator.run() => Ok(outcome),
        code = shutdown_signal() => Err(code),
    };
    let outcome = match finished {
        Ok(outcome) => outcome,
        Err(code) => {
            // no reports for an interrupted run, only cleanup
            eprintln!("Interrupted, cleaning up...");
            orchestrator.shutdown().await;
            return Ok(code);
        }
    };

    match outcome {
        Ok(outcome) => {
            println!("{}", outcome.summary());
            Ok(outcome.exit_code())
        }
        Err(e) => {
            if let Some(partial) = e.partial_outcome() {
                println!("{}", partial.summary());
            }
            report_fatal(&e);
            Ok(EXIT_FATAL)
        }
    }
}

async fn cmd_run_worker(action: ActionDescriptor, request: RunRequest, harness: HarnessConfig) -> Result<i32> {
    let runtime = Arc::new(DockerCli::new(harness.docker_binary.clone()));
    info!(action = %action.name, source = %request.source.display(), "running worker");

    let action_name = action.name.clone();
    let finished = tokio::select! {
        outcome = run_once(action, &request, &harness, runtime.clone()) => Ok(outcome),
        code = shutdown_signal() => Err(code),
    };
    let outcome = match finished {
        Ok(outcome) => outcome,
        Err(code) => {
            eprintln!("Interrupted, cleaning up...");
            release(&action_name, &request, runtime.as_ref()).await;
            return Ok(code);
        }
    };

    match outcome {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            for path in &outcome.renditions {
                println!("Rendition written to {}", display_relative(path));
            }
            Ok(0)
        }
        Err(SuiteError::Harness(e)) if e.is_invocation_error() => {
            eprintln!("error: {e}");
            Ok(1)
        }
        Err(e) => {
            report_fatal(&e);
            Ok(EXIT_FATAL)
        }
    }
}

fn report_fatal(e: &SuiteError) {
    eprintln!("error: {e}");
    if let Some(logs) = e.container_logs() {
        if !logs.trim().is_empty() {
            eprintln!("container logs:\n{logs}");
        }
    }
}

/// `--param K V` pairs; values that parse as JSON keep their type.
fn parse_params(raw: &[String]) -> Map<String, Value> {
    raw.chunks(2)
        .filter_map(|pair| match pair {
            [key, value] => Some((
                key.clone(),
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone())),
            )),
            _ => None,
        })
        .collect()
}

fn display_relative(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

/// Resolves with the conventional exit status of the signal received.
async fn shutdown_signal() -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => 130,
                _ = term.recv() => 143,
            },
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                130
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        130
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_test_worker() {
        let cli = Cli::try_parse_from([
            "actionkit",
            "test-worker",
            "--action-name",
            "worker",
            "--script",
            "index.js",
            "--kind",
            "nodejs:12",
            "-u",
            "jpg-*",
        ])
        .unwrap();
        match cli.command {
            Commands::TestWorker {
                action,
                tests,
                update_renditions,
                pattern,
                ..
            } => {
                assert_eq!(action.action_name, "worker");
                assert_eq!(action.kind.as_deref(), Some("nodejs:12"));
                assert_eq!(tests, PathBuf::from("test"));
                assert!(update_renditions);
                assert_eq!(pattern.as_deref(), Some("jpg-*"));
            }
            Commands::RunWorker { .. } => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_code_is_required() {
        let parsed = Cli::try_parse_from(["actionkit", "test-worker", "--action-name", "worker"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parse_params() {
        let raw: Vec<String> = ["fmt", "png", "width", "100", "crop", "{\"x\":1}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let params = parse_params(&raw);
        assert_eq!(params["fmt"], Value::String("png".into()));
        assert_eq!(params["width"], serde_json::json!(100));
        assert_eq!(params["crop"], serde_json::json!({"x": 1}));
    }

    #[test]
    fn test_descriptor_from_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("index.js");
        std::fs::write(&script, "exports.main = () => ({})").unwrap();

        let args = ActionArgs {
            action_name: "worker".to_string(),
            zip: None,
            script: Some(script),
            kind: None,
            image: Some("custom/worker:1".to_string()),
            main: "main".to_string(),
            timeout_ms: 0,
            memory_mb: 1024,
        };
        let action = args.descriptor().unwrap();
        assert_eq!(action.image().unwrap(), "custom/worker:1");
        assert_eq!(action.limits.memory_mb, 1024);
        assert!(!action.code.is_binary());
    }
}
