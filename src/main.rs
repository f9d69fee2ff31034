// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands};
use nuagent_config::Config;
use nuagent_core::{Agent, AgentEvent, AgentRuntimeContext, EventBus};
use nuagent_model::catalog::ModelCatalogEntry;
use nuagent_store::{query, CallerId, Store};
use nuagent_tools::{
    DeleteFileTool, EditFileTool, GlobFileSearchTool, GrepTool, ListDirTool, QueryDatabaseTool,
    ReadFileTool, RunTerminalCommandTool, ToolRegistry, WebFetchTool, WebSearchTool, WriteTool,
};
use nuagent_workers::{ConversationSummarizer, EmbeddingGenerator, ExchangeSummarizer, Supervisor};

const CALLER_CLI: CallerId = CallerId(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let headless = cli.is_headless();
    init_logging(cli.verbose, headless);

    match &cli.command {
        Some(Commands::Completions { shell }) => {
            cli::print_completions(*shell);
            return Ok(());
        }
        Some(Commands::ShowConfig) => {
            let config = nuagent_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            return Ok(());
        }
        Some(Commands::Validate { file }) => {
            return validate_workflow(file);
        }
        Some(Commands::ListModels { provider, refresh, json }) => {
            let config = nuagent_config::load(cli.config.as_deref())?;
            return list_models_cmd(&config, provider.as_deref(), *refresh, *json).await;
        }
        Some(Commands::ListProviders { verbose, json }) => {
            list_providers_cmd(*verbose, *json);
            return Ok(());
        }
        Some(Commands::Chats { limit }) => {
            let store = open_store()?;
            return print_chats(&store, *limit).await;
        }
        None => {}
    }

    let mut config = nuagent_config::load(cli.config.as_deref())?;
    config.agent.default_mode = cli.mode;
    let store = Arc::new(open_store()?);
    let bus = EventBus::new();

    let conversation_id = resolve_conversation_id(&store, cli.resume).await?;
    let active_conversation_id = Arc::new(AtomicI64::new(conversation_id));

    let supervisor = Arc::new(Supervisor::new());
    if std::env::var("CI").map(|v| v == "true").unwrap_or(false) {
        tracing::info!("CI=true, background workers will not be started");
    } else {
        start_workers(&supervisor, &store, &config, active_conversation_id, cli.model.as_deref())?;
    }

    let agent = build_agent(&config, cli.model.as_deref(), store.clone(), CALLER_CLI)?;

    if headless {
        run_headless(agent, store, CALLER_CLI, &bus, conversation_id, cli.prompt.as_deref(), cli.output_format).await
    } else {
        run_repl(agent, store, CALLER_CLI, bus, supervisor, conversation_id).await
    }
}

fn open_store() -> anyhow::Result<Store> {
    let path = database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    Store::open(path).context("failed to open conversation store")
}

fn database_path() -> PathBuf {
    if let Ok(p) = std::env::var("NUAGENT_DATABASE") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nuagent")
        .join("memory.db")
}

async fn resolve_conversation_id(store: &Store, resume: Option<i64>) -> anyhow::Result<i64> {
    if let Some(id) = resume {
        return Ok(id);
    }
    store
        .with_connection(CALLER_CLI, query::create_conversation)
        .await
        .context("failed to create conversation")
}

/// `nuagent_model::resolve_model_from_config` treats its `override_str` as a
/// literal selector with no "unset" case, so an absent `--model` flag must
/// short-circuit to `config.model` rather than being passed through as `""`.
fn resolve_model(config: &Config, model_override: Option<&str>) -> nuagent_config::ModelConfig {
    match model_override {
        Some(s) => nuagent_model::resolve_model_from_config(config, s),
        None => config.model.clone(),
    }
}

/// Build an `Agent` with the current tool set. `ApplyPatchTool`, `ReadLintsTool`,
/// `TodoWriteTool` and `SwitchModeTool` from earlier iterations of the tool
/// registry have no replacement here; only the tools this spec actually uses
/// are registered.
fn build_agent(
    config: &Config,
    model_override: Option<&str>,
    store: Arc<Store>,
    caller: CallerId,
) -> anyhow::Result<Agent> {
    let model_cfg = resolve_model(config, model_override);
    let model: Arc<dyn nuagent_model::ModelProvider> = Arc::from(nuagent_model::from_config(&model_cfg)?);
    let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;
    let mode = Arc::new(Mutex::new(config.agent.default_mode));
    let (_tool_tx, tool_rx) = mpsc::channel::<nuagent_tools::events::ToolEvent>(64);

    let mut registry = ToolRegistry::new();
    registry.register(RunTerminalCommandTool::default());
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(EditFileTool);
    registry.register(GlobFileSearchTool);
    registry.register(GrepTool);
    registry.register(ListDirTool);
    registry.register(DeleteFileTool);
    registry.register(WebFetchTool);
    registry.register(WebSearchTool {
        api_key: config.tools.web.search.api_key.clone(),
    });
    registry.register(QueryDatabaseTool::new(store, caller));

    Ok(Agent::new(
        model,
        Arc::new(registry),
        Arc::new(config.agent.clone()),
        AgentRuntimeContext::default(),
        mode,
        tool_rx,
        max_ctx,
    ))
}

fn start_workers(
    supervisor: &Arc<Supervisor>,
    store: &Arc<Store>,
    config: &Config,
    active_conversation_id: Arc<AtomicI64>,
    model_override: Option<&str>,
) -> anyhow::Result<()> {
    let model_cfg = resolve_model(config, model_override);
    let model: Arc<dyn nuagent_model::ModelProvider> = Arc::from(nuagent_model::from_config(&model_cfg)?);
    let critical = supervisor.critical_section();

    let conv_summarizer = supervisor.register("conversation_summarizer");
    conv_summarizer.start(
        Arc::new(ConversationSummarizer::new(
            store.clone(),
            model.clone(),
            CallerId(2),
            active_conversation_id.clone(),
        )),
        critical.clone(),
    );

    let exch_summarizer = supervisor.register("exchange_summarizer");
    exch_summarizer.start(
        Arc::new(ExchangeSummarizer::new(
            store.clone(),
            model.clone(),
            CallerId(3),
            active_conversation_id.clone(),
        )),
        critical.clone(),
    );

    let embed_gen = supervisor.register("embedding_generator");
    embed_gen.start(
        Arc::new(EmbeddingGenerator::new(
            store.clone(),
            Arc::new(nuagent_model::MockEmbeddingProvider::default()),
            CallerId(4),
            active_conversation_id,
        )),
        critical,
    );

    Ok(())
}

async fn run_headless(
    mut agent: Agent,
    store: Arc<Store>,
    caller: CallerId,
    bus: &EventBus,
    conversation_id: i64,
    prompt: Option<&str>,
    output_format: cli::OutputFormatArg,
) -> anyhow::Result<()> {
    let input = match prompt {
        Some(p) => p.to_string(),
        None => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
            buf.trim().to_string()
        }
    };
    if input.is_empty() {
        bail!("no prompt given: pass a PROMPT argument or pipe one to stdin");
    }

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let cancel = CancellationToken::new();
    let collector = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let outcome = agent
        .process_turn(&store, caller, conversation_id, bus, &input, tx, cancel)
        .await?;
    let _ = collector.await;

    match output_format {
        cli::OutputFormatArg::Text => {
            if let Some(text) = &outcome.assistant_message {
                println!("{text}");
            }
        }
        cli::OutputFormatArg::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "conversation_id": conversation_id,
                    "exchange_id": outcome.exchange_id,
                    "assistant_message": outcome.assistant_message,
                    "cancelled": outcome.cancelled,
                }))?
            );
        }
    }
    Ok(())
}

async fn run_repl(
    mut agent: Agent,
    store: Arc<Store>,
    caller: CallerId,
    bus: EventBus,
    supervisor: Arc<Supervisor>,
    mut conversation_id: i64,
) -> anyhow::Result<()> {
    let mut verbosity: u8 = 0;
    let mut debug_mode = false;
    let mut redaction_enabled = true;
    let mut spellcheck_enabled = true;

    println!("nuagent REPL — conversation {conversation_id}. Type /help for commands.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match dispatch_repl_command(
                command,
                &store,
                caller,
                &supervisor,
                &mut conversation_id,
                &mut verbosity,
                &mut debug_mode,
                &mut redaction_enabled,
                &mut spellcheck_enabled,
                &agent,
            )
            .await
            {
                ReplCommandOutcome::Continue => continue,
                ReplCommandOutcome::Exit => break,
            }
        }

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
        let cancel = CancellationToken::new();
        let cancel_for_ctrlc = cancel.clone();
        let ctrlc_task = tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel_for_ctrlc.cancel();
        });
        let printer = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let AgentEvent::TextDelta(d) = ev {
                    print!("{d}");
                    std::io::stdout().flush().ok();
                }
            }
        });

        let result = agent
            .process_turn(&store, caller, conversation_id, &bus, line, tx, cancel)
            .await;
        ctrlc_task.abort();
        let _ = printer.await;
        println!();

        match result {
            Ok(outcome) if outcome.cancelled => println!("(cancelled)"),
            Ok(_) => {}
            Err(e) => println!("error: {e:#}"),
        }
    }
    Ok(())
}

enum ReplCommandOutcome {
    Continue,
    Exit,
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_repl_command(
    command: &str,
    store: &Store,
    caller: CallerId,
    supervisor: &Arc<Supervisor>,
    conversation_id: &mut i64,
    verbosity: &mut u8,
    debug_mode: &mut bool,
    redaction_enabled: &mut bool,
    spellcheck_enabled: &mut bool,
    agent: &Agent,
) -> ReplCommandOutcome {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("");
    let rest: Vec<&str> = parts.collect();

    match name {
        "help" => {
            println!(
                "/help /exit /reset /clear /debug on|off /verbosity <n> /redaction on|off \
                 /spellcheck on|off /model [orchestrator|spellchecker|summarizer] <name> \
                 /models /tools /info /worker <name> [on|off|start|stop|status] /rag … \
                 /migrate-exchanges /backup /failed-jobs [clear]"
            );
        }
        "exit" => return ReplCommandOutcome::Exit,
        "reset" => match store.with_connection(caller, query::create_conversation).await {
            Ok(id) => {
                *conversation_id = id;
                println!("started conversation {id}");
            }
            Err(e) => println!("error: {e}"),
        },
        "clear" => {
            print!("\x1B[2J\x1B[1;1H");
            std::io::stdout().flush().ok();
        }
        "debug" => match rest.first().copied() {
            Some("on") => {
                *debug_mode = true;
                println!("debug on");
            }
            Some("off") => {
                *debug_mode = false;
                println!("debug off");
            }
            _ => println!("usage: /debug on|off"),
        },
        "verbosity" => match rest.first().and_then(|v| v.parse::<u8>().ok()) {
            Some(n) => {
                *verbosity = n;
                println!("verbosity set to {n}");
            }
            None => println!("usage: /verbosity <n>"),
        },
        "redaction" => match rest.first().copied() {
            Some("on") => {
                *redaction_enabled = true;
                println!("redaction on");
            }
            Some("off") => {
                *redaction_enabled = false;
                println!("redaction off");
            }
            _ => println!("usage: /redaction on|off"),
        },
        "spellcheck" => match rest.first().copied() {
            Some("on") => {
                *spellcheck_enabled = true;
                println!("spellcheck on");
            }
            Some("off") => {
                *spellcheck_enabled = false;
                println!("spellcheck off");
            }
            _ => println!("usage: /spellcheck on|off"),
        },
        "models" => list_providers_cmd(false, false),
        "tools" => println!("{}", agent.tools().names().join(", ")),
        "info" => println!(
            "conversation {conversation_id} debug={debug_mode} verbosity={verbosity} \
             redaction={redaction_enabled} spellcheck={spellcheck_enabled}"
        ),
        "worker" => dispatch_worker_command(supervisor, &rest),
        "rag" => println!("rag is not configured"),
        "migrate-exchanges" => println!("no pending exchange migrations"),
        "backup" => match backup_database() {
            Ok(path) => println!("backed up to {}", path.display()),
            Err(e) => println!("backup failed: {e}"),
        },
        "failed-jobs" => match rest.first().copied() {
            Some("clear") => match store.with_connection(caller, query::clear_failed_jobs).await {
                Ok(n) => println!("cleared {n} failed job(s)"),
                Err(e) => println!("error: {e}"),
            },
            _ => match store.with_connection(caller, |conn| query::list_failed_jobs(conn, 20)).await {
                Ok(jobs) if jobs.is_empty() => println!("no failed jobs"),
                Ok(jobs) => {
                    for j in jobs {
                        println!(
                            "#{} {} ref={} retries={} at={} — {}",
                            j.id,
                            j.job_type,
                            j.ref_id.as_deref().unwrap_or("-"),
                            j.retry_count,
                            j.failed_at,
                            j.error
                        );
                    }
                }
                Err(e) => println!("error: {e}"),
            },
        },
        other => println!("Unknown command: {other}"),
    }
    ReplCommandOutcome::Continue
}

fn dispatch_worker_command(supervisor: &Arc<Supervisor>, args: &[&str]) {
    let Some(name) = args.first() else {
        println!("workers: {}", supervisor.names().join(", "));
        return;
    };
    let Some(task) = supervisor.get(name) else {
        println!("unknown worker: {name}");
        return;
    };
    match args.get(1).copied() {
        Some("on") | Some("resume") => {
            task.resume();
            println!("{name}: resumed");
        }
        Some("off") | Some("pause") => {
            task.pause();
            println!("{name}: paused");
        }
        Some("stop") => {
            task.stop();
            println!("{name}: stop requested");
        }
        Some("status") | None => {
            let status = task.status();
            println!(
                "{name}: running={} paused={} completed={} failed={} spend={:.4}",
                status.running, status.paused, status.completed, status.failed, status.spend
            );
        }
        Some(other) => println!("unknown worker subcommand: {other}"),
    }
}

fn backup_database() -> anyhow::Result<PathBuf> {
    let src = database_path();
    let file_name = src.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let dest = src.with_file_name(format!("{file_name}.bak-{stamp}"));
    std::fs::copy(&src, &dest)?;
    Ok(dest)
}

async fn print_chats(store: &Store, limit: usize) -> anyhow::Result<()> {
    let sql = format!(
        "SELECT id, created_at, title, status FROM conversations ORDER BY id DESC LIMIT {limit}"
    );
    let rows = store
        .with_connection(CALLER_CLI, move |conn| query::execute_readonly_query(conn, &sql))
        .await
        .context("failed to list conversations")?;
    if rows.is_empty() {
        println!("no saved conversations (database: {})", database_path().display());
        return Ok(());
    }
    println!("{:<6} {:<25} {:<10} title", "id", "created_at", "status");
    for row in rows {
        let id = row.first().map(|v| v.to_string()).unwrap_or_default();
        let created_at = row.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let title = row.get(2).and_then(|v| v.as_str()).unwrap_or("(untitled)").to_string();
        let status = row.get(3).and_then(|v| v.as_str()).unwrap_or("").to_string();
        println!("{id:<6} {created_at:<25} {status:<10} {title}");
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (frontmatter, body) = nuagent_input::parse_frontmatter(&content);
    let parsed = nuagent_input::parse_workflow(body);

    if let Some(title) = &parsed.title {
        println!("Title: {title}");
    }
    if let Some(fm) = &frontmatter {
        println!("Frontmatter: {fm:?}");
    }
    if let Some(preamble) = &parsed.system_prompt_append {
        if !preamble.trim().is_empty() {
            println!("Preamble: {} chars", preamble.len());
        }
    }
    println!("Steps: {}", parsed.steps.len());
    if parsed.steps.is_empty() {
        bail!("workflow has no steps");
    }
    println!("\nWorkflow is valid.");
    Ok(())
}

async fn list_models_cmd(
    config: &Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    let entries: Vec<ModelCatalogEntry> = if refresh {
        let model_cfg = resolve_model(config, provider_filter);
        let provider = nuagent_model::from_config(&model_cfg)?;
        provider.list_models().await?
    } else {
        nuagent_model::catalog::static_catalog()
            .into_iter()
            .filter(|e| provider_filter.map_or(true, |p| e.provider == p))
            .collect()
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    println!("{:<30} {:<12} {:>12} {:>10}", "model", "provider", "context", "max_out");
    for e in &entries {
        println!(
            "{:<30} {:<12} {:>12} {:>10}",
            e.id, e.provider, e.context_window, e.max_output_tokens
        );
    }
    Ok(())
}

fn list_providers_cmd(verbose: bool, as_json: bool) {
    let drivers = nuagent_model::list_drivers();
    if as_json {
        let json: Vec<_> = drivers
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "name": d.name,
                    "description": d.description,
                    "default_api_key_env": d.default_api_key_env,
                    "default_base_url": d.default_base_url,
                    "requires_api_key": d.requires_api_key,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        return;
    }
    for d in drivers {
        if verbose {
            println!("{} — {}", d.id, d.name);
            println!("  {}", d.description);
            println!("  api key env: {}", d.default_api_key_env.unwrap_or("(none)"));
            println!("  default base url: {}", d.default_base_url.unwrap_or("(none — required)"));
            println!("  requires api key: {}", d.requires_api_key);
        } else {
            println!("{:<12} {}", d.id, d.name);
        }
    }
}

/// Mirrors the REPL/headless logging split: `NUAGENT_LOG_FILE` redirects
/// logs to a file (so interactive output stays clean); otherwise logs go to
/// stderr, gated by verbosity.
fn init_logging(verbosity: u8, headless: bool) {
    if !headless {
        if let Ok(path) = std::env::var("NUAGENT_LOG_FILE") {
            if let Ok(file) = std::fs::File::create(&path) {
                let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("debug"));
                fmt()
                    .with_env_filter(filter)
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .init();
                return;
            }
        }
        fmt().with_max_level(tracing::level_filters::LevelFilter::OFF).init();
        return;
    }

    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}
