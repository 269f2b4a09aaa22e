//! `datawisectl` – command-line front-end for the DataWise engine.
//!
//! Every subcommand drives the same engine the daemon serves: commands go
//! in, events come out. Results print as text or JSON; the exit code is 0 on
//! pass, 1 on fail and 2 on error.

mod config;
mod logging;
mod serve;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use engine::scenario::{load_scenario, run_scenario};
use engine::types::*;
use engine::{CommandPayload, Engine, EventKind, FileFormat};
use std::path::{Path, PathBuf};

// ===========================================================================
// CLI definition
// ===========================================================================

#[derive(Parser)]
#[command(
    name = "datawisectl",
    version,
    about = "Run SQL, imports and exports against an in-memory analytical engine"
)]
struct Cli {
    /// Output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,
    /// Extra YAML config file, layered over datawise.yaml and .datawise.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one SQL statement and print the result summary.
    Sql {
        /// SQL text.
        sql: String,
    },

    /// Import a file into a table.
    Import {
        /// File to read.
        path: PathBuf,
        /// csv | parquet | json; inferred from the extension when omitted.
        #[arg(long)]
        format: Option<String>,
        /// Target table; defaults to the file name without extension.
        #[arg(long)]
        table: Option<String>,
        /// Replace an existing table of the same name.
        #[arg(long)]
        overwrite: bool,
    },

    /// Export a table or query result to a file.
    Export {
        /// Table name or SQL query.
        source: String,
        /// Destination file.
        path: PathBuf,
        /// csv | parquet | json; inferred from the extension when omitted.
        #[arg(long)]
        format: Option<String>,
    },

    /// Run a scripted scenario from a YAML file.
    RunScenario {
        /// Path to the scenario YAML file.
        file: PathBuf,
    },

    /// Start daemon mode over a Unix socket.
    Serve {
        /// Path for the Unix domain socket.
        #[arg(long)]
        socket: PathBuf,
    },
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if json {
                let body = serde_json::json!({ "status": Status::Error, "error": format!("{:#}", e) });
                println!("{}", body);
            } else {
                eprintln!("error: {:#}", e);
            }
            2
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = config::load_config(cli.config.as_deref()).context("cannot load configuration")?;
    logging::init_logging(&config.logging);
    let engine = Engine::new(config.engine).context("cannot start engine")?;

    let payload = match cli.command {
        Commands::Sql { sql } => CommandPayload::ExecuteSql { sql },
        Commands::Import {
            path,
            format,
            table,
            overwrite,
        } => CommandPayload::ImportFile {
            format: resolve_format(format.as_deref(), &path)?,
            path: path_arg(&path),
            table_name: table,
            overwrite,
        },
        Commands::Export {
            source,
            path,
            format,
        } => CommandPayload::ExportFile {
            source,
            format: resolve_format(format.as_deref(), &path)?,
            path: path_arg(&path),
        },
        Commands::RunScenario { file } => return cmd_run_scenario(&file, cli.json, &engine).await,
        Commands::Serve { socket } => {
            serve::run_daemon(socket, engine).await?;
            return Ok(0);
        }
    };

    cmd_single(payload, cli.json, &engine).await
}

// ===========================================================================
// Subcommand implementations
// ===========================================================================

/// Run one command as a single-step scenario so it shares reporting.
async fn cmd_single(payload: CommandPayload, json: bool, engine: &Engine) -> anyhow::Result<i32> {
    let scenario = Scenario {
        name: None,
        steps: vec![ScenarioStep {
            command: payload,
            expect: Outcome::Pass,
            task_id: Some(1),
            timeout_ms: u64::from(u32::MAX),
        }],
    };

    let progress = (!json).then(|| spawn_progress_printer(engine));
    let result = run_scenario(&scenario, engine).await;
    if let Some(handle) = progress {
        handle.abort();
    }

    let step = result
        .step_results
        .into_iter()
        .next()
        .context("scenario produced no step result")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&step)?);
    } else {
        print_step(&step);
    }
    Ok(exit_code(step.status))
}

async fn cmd_run_scenario(file: &Path, json: bool, engine: &Engine) -> anyhow::Result<i32> {
    let yaml = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read scenario file {}", file.display()))?;
    let scenario = load_scenario(&yaml).map_err(anyhow::Error::msg)?;

    let result = run_scenario(&scenario, engine).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Scenario: {}",
            result.name.as_deref().unwrap_or("<unnamed>")
        );
        println!("Overall: {:?} ({}ms)", result.overall_status, result.timing_ms);
        for (i, sr) in result.step_results.iter().enumerate() {
            println!(
                "  Step {}: {} task={} -> {:?} ({}ms)",
                i, sr.command, sr.task_id, sr.status, sr.timing_ms
            );
            if let Some(ref err) = sr.error {
                println!("    {} – {}", err.code, err.message);
            }
        }
    }
    Ok(exit_code(result.overall_status))
}

fn resolve_format(explicit: Option<&str>, path: &Path) -> anyhow::Result<FileFormat> {
    match explicit {
        Some(name) => serde_json::from_value(serde_json::Value::String(name.to_lowercase()))
            .with_context(|| format!("unknown format '{}' (expected csv, parquet or json)", name)),
        None => match FileFormat::from_path(path) {
            Some(format) => Ok(format),
            None => bail!(
                "cannot infer a format from {}; pass --format",
                path.display()
            ),
        },
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ===========================================================================
// Output helpers
// ===========================================================================

fn exit_code(status: Status) -> i32 {
    match status {
        Status::Pass => 0,
        Status::Fail => 1,
        Status::Error => 2,
    }
}

fn spawn_progress_printer(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let EventKind::Progress {
                percent,
                bytes_processed,
                total_bytes,
                eta_seconds,
            } = event.kind
            {
                match eta_seconds {
                    Some(eta) => eprintln!(
                        "  {:>3}% {}/{} bytes, ~{}s left",
                        percent, bytes_processed, total_bytes, eta
                    ),
                    None => eprintln!("  {:>3}% {}/{} bytes", percent, bytes_processed, total_bytes),
                }
            }
        }
    })
}

fn print_step(step: &StepResult) {
    let status_icon = match step.status {
        Status::Pass => "PASS",
        Status::Fail => "FAIL",
        Status::Error => "ERROR",
    };

    println!("[{}] {} task={}", status_icon, step.command, step.task_id);
    println!("  timing: {}ms", step.timing_ms);

    if let Some(ref err) = step.error {
        println!("  error:  {} – {}", err.code, err.message);
    }

    if let Some(EventKind::Finished {
        row_count,
        column_count,
        ref preview,
        ref table_name,
        ref path,
    }) = step.terminal
    {
        println!("  rows: {}  columns: {}", row_count, column_count);
        if let Some(table) = table_name {
            println!("  table: {}", table);
        }
        if let Some(path) = path {
            println!("  path: {}", path);
        }
        for row in preview {
            println!("  {}", row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_format() {
        assert_eq!(
            resolve_format(None, Path::new("a/b.tsv")).unwrap(),
            FileFormat::Csv
        );
        assert_eq!(
            resolve_format(Some("PARQUET"), Path::new("out.bin")).unwrap(),
            FileFormat::Parquet
        );
        assert_eq!(
            resolve_format(Some("line-delimited-structured"), Path::new("x")).unwrap(),
            FileFormat::Json
        );
        assert!(resolve_format(None, Path::new("notes.docx")).is_err());
        assert!(resolve_format(Some("xlsx"), Path::new("a.csv")).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "datawisectl",
            "import",
            "data/sales.csv",
            "--table",
            "sales",
            "--overwrite",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Import {
                path,
                table,
                overwrite,
                format,
            } => {
                assert_eq!(path, PathBuf::from("data/sales.csv"));
                assert_eq!(table.as_deref(), Some("sales"));
                assert!(overwrite);
                assert!(format.is_none());
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(Status::Pass), 0);
        assert_eq!(exit_code(Status::Fail), 1);
        assert_eq!(exit_code(Status::Error), 2);
    }

    #[tokio::test]
    async fn test_single_sql_command() {
        let engine = Engine::new(engine::EngineConfig::default()).unwrap();
        let code = cmd_single(
            CommandPayload::ExecuteSql {
                sql: "SELECT 42 AS answer".into(),
            },
            true,
            &engine,
        )
        .await
        .unwrap();
        assert_eq!(code, 0);

        let engine = Engine::new(engine::EngineConfig::default()).unwrap();
        let code = cmd_single(
            CommandPayload::ExecuteSql {
                sql: "SELECT * FROM nowhere".into(),
            },
            true,
            &engine,
        )
        .await
        .unwrap();
        assert_eq!(code, 1);
    }
}
