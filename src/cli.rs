// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use nuagent_config::AgentMode;

/// Output format for headless / one-shot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Plain text: only the final assistant message.
    #[default]
    Text,
    /// Structured JSON: exchange id, assistant message, token/cost metrics.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "nuagent",
    about = "Multi-provider LLM agent orchestration runtime",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional initial prompt. Runs one exchange and exits (headless).
    /// Omit to start the interactive REPL.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Run headless (no REPL): read one prompt from the argument or stdin,
    /// print the assistant's reply, and exit.
    #[arg(long, short = 'H')]
    pub headless: bool,

    /// Agent mode
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Model to use, e.g. "gpt-4o" or "openai/gpt-4o-mini"
    #[arg(long, short = 'M', env = "NUAGENT_MODEL")]
    pub model: Option<String>,

    /// Resume an existing conversation by id. Omit to start a new one.
    /// Use 'nuagent chats' to list available conversations.
    #[arg(long, value_name = "ID")]
    pub resume: Option<i64>,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output format for headless runs
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormatArg,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit
    ShowConfig,
    /// List saved conversations
    Chats {
        /// Maximum number of conversations to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Validate a workflow file: parse frontmatter, count steps, check syntax.
    /// Exits 0 if valid, non-zero with an error description otherwise.
    Validate {
        /// Path to the workflow markdown file to validate
        #[arg(long, short = 'f', required = true)]
        file: PathBuf,
    },
    /// List available models for the configured provider(s).
    ///
    /// By default the static built-in catalog is shown.
    /// With --refresh the configured provider API is queried for live data.
    ListModels {
        /// Filter by provider name (e.g. "openai", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },
    /// List all supported model providers.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Returns true if the run should be headless (one-shot, no REPL).
    ///
    /// Triggered by `--headless`, by a positional prompt being given, or by
    /// stdin/stdout not being a terminal (piped input or output).
    pub fn is_headless(&self) -> bool {
        self.headless
            || self.prompt.is_some()
            || !std::io::stdin().is_terminal()
            || !std::io::stdout().is_terminal()
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "nuagent", &mut std::io::stdout());
}
