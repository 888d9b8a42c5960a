//! CLI argument definitions
//!
//! The main `Cli` struct and its subcommands, parsed with clap.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// specsmith - from requirement text to code through clarification
#[derive(Parser, Debug)]
#[command(name = "specsmith")]
#[command(about = "Clarify software requirements and generate code with fallback across LLM providers")]
#[command(long_about = r#"
specsmith turns an informal software request into a precise expectation through
a short clarification conversation, then generates code for it in resumable
phases.

EXAMPLES:
  # Clarify a requirement interactively, then generate code for it
  specsmith chat --generate

  # Generate code for an expectation written by hand (YAML or JSON)
  specsmith generate --expectation taskpad.yaml --out generated/

  # Show which providers would be tried, in order
  specsmith providers

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > environment > config file > defaults
  Config file is discovered by searching upward from CWD for .specsmith/config.toml
  Use --config to specify an explicit config file path
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Provider to try first (anthropic, openrouter, openai)
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clarify a requirement in a conversation over stdin
    Chat {
        /// Generate code once the requirement is finalized
        #[arg(long)]
        generate: bool,

        /// Directory to write generated code blocks into
        #[arg(long, requires = "generate")]
        out: Option<Utf8PathBuf>,

        /// Print the final result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Generate code for an expectation file
    Generate {
        /// Expectation file (YAML or JSON)
        #[arg(long, short = 'e')]
        expectation: Utf8PathBuf,

        /// Directory to write generated code blocks into
        #[arg(long)]
        out: Option<Utf8PathBuf>,

        /// Print the result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved provider chain
    Providers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
