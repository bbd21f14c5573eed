//! `sqlport`: DB2 → PostgreSQL embedded-SQL migration

mod build_check;
mod git;
mod oracle;

use anyhow::{bail, Context};
use build_check::CommandBuildChecker;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use git::GitWorkspace;
use oracle::{load_proposal_file, CommandOracle, OracleInput};
use sqlport_core::{
    clean_stray_branches, BuildScope, MigrationConfig, MigrationPipeline, Mode, RunReport,
    Workspace,
};
use sqlport_findings::{ConversionTask, FindingNormalizer, Granularity, TaskBuilder};
use sqlport_patch::PatchStrategy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let repo = Arg::new("repo")
        .long("repo")
        .default_value(".")
        .value_parser(value_parser!(PathBuf))
        .help("Git working tree to migrate");
    let config = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file");
    let findings = Arg::new("findings")
        .long("findings")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Analyzer output (JSON)");
    let granularity = Arg::new("granularity")
        .long("granularity")
        .help("Task grouping: method | file");

    Command::new("sqlport")
        .version(sqlport_core::VERSION)
        .about("Migrate embedded DB2 SQL to PostgreSQL, one verified patch per file")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("tasks")
                .about("Print conversion tasks as JSON")
                .arg(findings.clone())
                .arg(config.clone())
                .arg(granularity.clone())
                .arg(
                    Arg::new("prompts")
                        .long("prompts")
                        .action(ArgAction::SetTrue)
                        .help("Print the rendered prompt of each task instead"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run the migration")
                .arg(findings)
                .arg(repo.clone())
                .arg(config.clone())
                .arg(granularity)
                .arg(
                    Arg::new("proposals")
                        .long("proposals")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("oracle-cmd")
                        .required_unless_present("oracle-cmd")
                        .help("JSON object mapping file path to proposals"),
                )
                .arg(
                    Arg::new("oracle-cmd")
                        .long("oracle-cmd")
                        .help("Shell command answering one task on stdin with proposals on stdout"),
                )
                .arg(
                    Arg::new("oracle-prompt")
                        .long("oracle-prompt")
                        .action(ArgAction::SetTrue)
                        .requires("oracle-cmd")
                        .help("Send the rendered prompt instead of task JSON"),
                )
                .arg(
                    Arg::new("oracle-timeout")
                        .long("oracle-timeout")
                        .value_parser(value_parser!(u64))
                        .requires("oracle-cmd")
                        .help("Per-task oracle timeout in seconds"),
                )
                .arg(
                    Arg::new("build-cmd")
                        .long("build-cmd")
                        .help("Per-file build check; `{file}` is replaced by the path"),
                )
                .arg(
                    Arg::new("full-build-cmd")
                        .long("full-build-cmd")
                        .help("Whole-project build check"),
                )
                .arg(Arg::new("mode").long("mode").help("verified | direct"))
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .help("Replacement strategy: substring | positional"),
                )
                .arg(
                    Arg::new("build-scope")
                        .long("build-scope")
                        .help("Per-attempt build scope: file | project"),
                )
                .arg(
                    Arg::new("final-check")
                        .long("final-check")
                        .action(ArgAction::SetTrue)
                        .help("Run the project build once after all attempts"),
                )
                .arg(Arg::new("base").long("base").help("Base branch (default: current)"))
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_parser(value_parser!(PathBuf))
                        .help("Output directory for patches and report.json"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .help("Whole-run timeout in seconds"),
                ),
        )
        .subcommand(
            Command::new("cleanup")
                .about("Delete leftover attempt branches and return to the base branch")
                .arg(repo)
                .arg(config)
                .arg(Arg::new("base").long("base").help("Branch to return to")),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn load_config(args: &ArgMatches) -> anyhow::Result<MigrationConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => MigrationConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => MigrationConfig::new(),
    };
    if let Some(value) = args.try_get_one::<String>("granularity").ok().flatten() {
        config = config.with_granularity(parse_flag::<Granularity>("granularity", value)?);
    }
    Ok(config)
}

fn parse_flag<T>(flag: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("--{flag}: {e}"))
}

fn apply_run_overrides(
    mut config: MigrationConfig,
    args: &ArgMatches,
) -> anyhow::Result<MigrationConfig> {
    if let Some(value) = args.get_one::<String>("mode") {
        config = config.with_mode(parse_flag::<Mode>("mode", value)?);
    }
    if let Some(value) = args.get_one::<String>("strategy") {
        config = config.with_patch_strategy(parse_flag::<PatchStrategy>("strategy", value)?);
    }
    if let Some(value) = args.get_one::<String>("build-scope") {
        config = config.with_build_scope(parse_flag::<BuildScope>("build-scope", value)?);
    }
    if args.get_flag("final-check") {
        config = config.with_final_full_check(true);
    }
    if let Some(base) = args.get_one::<String>("base") {
        config = config.with_base_branch(base.clone());
    }
    if let Some(dir) = args.get_one::<PathBuf>("output") {
        config = config.with_output_dir(dir.clone());
    }
    if let Some(secs) = args.get_one::<u64>("timeout") {
        config = config.with_run_timeout_secs(*secs);
    }
    config.validate()?;
    Ok(config)
}

/// Refuse a run that could never verify anything
fn check_build_commands(config: &MigrationConfig, args: &ArgMatches) -> anyhow::Result<()> {
    let per_file = args.contains_id("build-cmd");
    let full = args.contains_id("full-build-cmd");
    if config.mode == Mode::Verified {
        match config.build_scope {
            BuildScope::File if !per_file => bail!("verified mode needs --build-cmd"),
            BuildScope::Project if !full => {
                bail!("verified mode with project build scope needs --full-build-cmd")
            }
            _ => {}
        }
    }
    if config.final_full_check && !full {
        bail!("--final-check needs --full-build-cmd");
    }
    Ok(())
}

/// Normalize findings into tasks; needs neither a repository nor a build
async fn load_tasks(findings: &Path, granularity: Granularity) -> anyhow::Result<Vec<ConversionTask>> {
    let findings = FindingNormalizer::new()
        .load(findings)
        .await
        .with_context(|| format!("loading {}", findings.display()))?;
    let tasks = TaskBuilder::new(granularity).build(findings);
    tracing::info!(tasks = tasks.len(), granularity = ?granularity, "built tasks");
    Ok(tasks)
}

fn render_tasks(tasks: &[ConversionTask], prompts: bool) -> anyhow::Result<String> {
    if !prompts {
        return Ok(serde_json::to_string_pretty(tasks)?);
    }
    let prompts: Vec<serde_json::Value> = tasks
        .iter()
        .map(|task| {
            serde_json::json!({
                "task": task.key().to_string(),
                "prompt": task.render_prompt(),
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&prompts)?)
}

async fn cmd_tasks(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let findings = args
        .get_one::<PathBuf>("findings")
        .context("--findings is required")?;
    let tasks = load_tasks(findings, config.granularity).await?;
    println!("{}", render_tasks(&tasks, args.get_flag("prompts"))?);
    Ok(())
}

async fn cmd_run(args: &ArgMatches) -> anyhow::Result<()> {
    let config = apply_run_overrides(load_config(args).await?, args)?;
    check_build_commands(&config, args)?;
    let repo = args
        .get_one::<PathBuf>("repo")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let findings = args
        .get_one::<PathBuf>("findings")
        .context("--findings is required")?;

    let workspace = GitWorkspace::open(&repo)?;
    let checker = Arc::new(CommandBuildChecker::new(
        &repo,
        args.get_one::<String>("build-cmd").cloned(),
        args.get_one::<String>("full-build-cmd").cloned(),
    ));
    let (progress_tx, mut progress_rx) = sqlport_core::progress::channel();
    let pipeline = MigrationPipeline::new(config.clone(), workspace, checker).with_progress(progress_tx);

    let progress = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                tracing::debug!(target: "sqlport::progress", "{line}");
            }
        }
    });

    let tasks = pipeline.load_tasks(findings).await?;
    let timeout = Duration::from_secs(config.run_timeout_secs);
    let run = async {
        if let Some(path) = args.get_one::<PathBuf>("proposals") {
            let batches = load_proposal_file(path).await?;
            Ok::<RunReport, anyhow::Error>(pipeline.run_with_proposals(tasks, batches).await?)
        } else {
            let command = args
                .get_one::<String>("oracle-cmd")
                .context("either --proposals or --oracle-cmd is required")?;
            let input = if args.get_flag("oracle-prompt") {
                OracleInput::Prompt
            } else {
                OracleInput::Json
            };
            let mut oracle = CommandOracle::new(&repo, command.clone(), input);
            if let Some(secs) = args.get_one::<u64>("oracle-timeout") {
                oracle = oracle.with_timeout(Duration::from_secs(*secs));
            }
            Ok(pipeline.run_with_oracle(tasks, &oracle).await?)
        }
    };

    let report = match tokio::time::timeout(timeout, run).await {
        Ok(report) => report?,
        Err(_) => bail!(
            "run timed out after {}s; run `sqlport cleanup` to remove attempt branches",
            config.run_timeout_secs
        ),
    };
    let _ = progress.await;

    let report_path = config.output_dir.join("report.json");
    report.write_json(&report_path).await?;
    tracing::info!(report = %report_path.display(), "run report written");
    println!("{}", report.summary);
    Ok(())
}

async fn cmd_cleanup(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let repo = args
        .get_one::<PathBuf>("repo")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let mut workspace = GitWorkspace::open(&repo)?;

    let base = match args.get_one::<String>("base").or(config.base_branch.as_ref()) {
        Some(base) => base.clone(),
        None => {
            let current = workspace.current_branch().await?;
            if current.starts_with(&format!("{}/", config.branch_prefix)) {
                bail!("currently on attempt branch '{current}'; pass --base");
            }
            current
        }
    };

    let removed = clean_stray_branches(&mut workspace, &config.branch_prefix, &base).await?;
    println!("Removed {} branch(es); on '{base}'", removed.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("tasks", args)) => cmd_tasks(args).await,
        Some(("run", args)) => cmd_run(args).await,
        Some(("cleanup", args)) => cmd_cleanup(args).await,
        _ => Ok(()),
    }
}
