//! Command-line front end
//!
//! Translates the `chat`, `generate` and `providers` subcommands into calls on
//! a [`Pipeline`]. All user-facing output and error rendering happens here.

mod args;

pub use args::{Cli, Commands};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use specsmith_clarifier::ConversationStage;
use specsmith_config::{CliArgs, Config};
use specsmith_generator::{GenerationEvent, GenerationResponse, ResponseStatus};
use specsmith_model::{CodeBlock, Expectation};
use specsmith_utils::logging::init_tracing;
use specsmith_utils::{ConfigError, ExitCode, LlmError, UserFriendlyError};

use crate::pipeline::Pipeline;

/// A generation run ended in `error`
#[derive(Debug, thiserror::Error)]
#[error("Code generation for '{id}' failed: {message}")]
pub struct GenerationFailed {
    pub id: String,
    pub message: String,
}

/// Parse arguments, run the command and render any error.
///
/// # Errors
///
/// Returns the exit code the process should terminate with.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            eprintln!("error: failed to start async runtime: {e}");
            ExitCode::INTERNAL
        })?;

    runtime.block_on(execute(cli)).map_err(|err| report(&err))
}

/// Print `err` for the user and pick the exit code
fn report(err: &anyhow::Error) -> ExitCode {
    if let Some(e) = err.downcast_ref::<LlmError>() {
        eprintln!("{}", e.display_for_user());
        return ExitCode::from(e);
    }
    if let Some(e) = err.downcast_ref::<ConfigError>() {
        eprintln!("{}", e.display_for_user());
        return ExitCode::from(e);
    }
    if let Some(e) = err.downcast_ref::<GenerationFailed>() {
        eprintln!("error: {e}");
        return ExitCode::GENERATION_FAILED;
    }
    eprintln!("error: {err:#}");
    ExitCode::INTERNAL
}

async fn execute(cli: Cli) -> Result<()> {
    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        provider: cli.provider.clone(),
        verbose: cli.verbose,
    };
    let config = Config::discover(&cli_args)?;
    tracing::debug!(source = %config.source, "Configuration loaded");

    match cli.command {
        Commands::Chat {
            generate,
            out,
            json,
        } => run_chat(&config, generate, out.as_deref(), json).await,
        Commands::Generate {
            expectation,
            out,
            json,
        } => run_generate(&config, &expectation, out.as_deref(), json).await,
        Commands::Providers { json } => run_providers(&config, json),
    }
}

/// Conversation text goes to stderr when stdout is reserved for JSON
fn say(json: bool, text: &str) {
    if json {
        eprintln!("{text}");
    } else {
        println!("{text}");
    }
}

async fn run_chat(config: &Config, generate: bool, out: Option<&Utf8Path>, json: bool) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    say(json, "Describe the software you need (Ctrl-D to quit):");
    let mut conversation_id: Option<String> = None;
    let response = loop {
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match &conversation_id {
            None => pipeline.clarifier.clarify_requirement(line, None).await,
            Some(id) => pipeline.clarifier.continue_conversation(id, line).await,
        };
        conversation_id = Some(response.conversation_id.clone());
        if let Some(error) = &response.error {
            warn!(%error, "Clarification call failed");
        }
        say(json, &response.message);
        if response.stage == ConversationStage::Completed {
            break response;
        }
    };

    let Some(top) = response.expectation.clone() else {
        anyhow::bail!("Conversation completed without an expectation");
    };
    if !json {
        print_expectation(&top, &response.sub_expectations);
    }

    let generation = if generate {
        Some(generate_with_progress(&mut pipeline, &top, out).await?)
    } else {
        None
    };

    if json {
        #[derive(Serialize)]
        struct ChatOutput<'a> {
            conversation_id: &'a str,
            expectation: &'a Expectation,
            sub_expectations: &'a [Expectation],
            #[serde(skip_serializing_if = "Option::is_none")]
            generation: Option<&'a GenerationResponse>,
        }
        let output = ChatOutput {
            conversation_id: &response.conversation_id,
            expectation: &top,
            sub_expectations: &response.sub_expectations,
            generation: generation.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

async fn run_generate(
    config: &Config,
    path: &Utf8Path,
    out: Option<&Utf8Path>,
    json: bool,
) -> Result<()> {
    let expectation = load_expectation(path)?;
    let mut pipeline = Pipeline::from_config(config)?;
    let response = generate_with_progress(&mut pipeline, &expectation, out).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else if let Some(code) = &response.code {
        println!("{code}");
    }
    Ok(())
}

/// Read an expectation written as YAML or JSON
pub fn load_expectation(path: &Utf8Path) -> Result<Expectation> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read expectation file {path}"))?;
    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse expectation file {path}"))
}

async fn generate_with_progress(
    pipeline: &mut Pipeline,
    expectation: &Expectation,
    out: Option<&Utf8Path>,
) -> Result<GenerationResponse> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_event_printer(rx);

    let response = pipeline.generator.generate(expectation, Some(tx)).await;
    pipeline.generator.detach_events(&response.id);
    if let Err(e) = printer.await {
        warn!(error = %e, "Progress printer stopped early");
    }

    if response.status != ResponseStatus::Completed {
        return Err(GenerationFailed {
            id: response.id.clone(),
            message: response.error.clone().unwrap_or_else(|| response.message.clone()),
        }
        .into());
    }

    if let Some(dir) = out {
        for path in write_blocks(dir, &response.code_blocks)? {
            eprintln!("wrote {path}");
        }
    }
    Ok(response)
}

fn spawn_event_printer(mut rx: mpsc::UnboundedReceiver<GenerationEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                GenerationEvent::Status {
                    status, message, ..
                } => eprintln!("[{status}] {message}"),
                GenerationEvent::CodeBlock {
                    index,
                    language,
                    code,
                    ..
                } => {
                    let language = if language.is_empty() { "text" } else { &language };
                    eprintln!("  code block {} ({language}, {} lines)", index + 1, code.lines().count());
                }
            }
        }
    })
}

fn print_expectation(top: &Expectation, subs: &[Expectation]) {
    println!("\n{}\n  {}", top.name, top.description);
    for criterion in &top.acceptance_criteria {
        println!("  - {criterion}");
    }
    if !subs.is_empty() {
        println!("\nComponents:");
        for (i, sub) in subs.iter().enumerate() {
            println!("  {}. {}", i + 1, sub.name);
        }
    }
}

/// File extension for a code block's language tag
fn extension_for(language: &str) -> &'static str {
    match language {
        "rust" | "rs" => "rs",
        "python" | "py" => "py",
        "javascript" | "js" | "jsx" => "js",
        "typescript" | "ts" | "tsx" => "ts",
        "go" | "golang" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "c++" => "cpp",
        "html" => "html",
        "css" => "css",
        "sql" => "sql",
        "bash" | "sh" | "shell" => "sh",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        _ => "txt",
    }
}

/// Write each block to `dir` as `block-NN.<ext>`
fn write_blocks(dir: &Utf8Path, blocks: &[CodeBlock]) -> Result<Vec<Utf8PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {dir}"))?;
    let mut written = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        let path = dir.join(format!("block-{:02}.{}", i + 1, extension_for(&block.language)));
        std::fs::write(&path, &block.code).with_context(|| format!("Failed to write {path}"))?;
        written.push(path);
    }
    Ok(written)
}

#[derive(Serialize)]
struct ProviderView {
    name: String,
    model: String,
    base_url: String,
    api_key_env: String,
    api_key_set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    budget: Option<u32>,
}

fn run_providers(config: &Config, json: bool) -> Result<()> {
    let chain: Vec<ProviderView> = config
        .provider_chain()
        .into_iter()
        .map(|s| ProviderView {
            api_key_set: std::env::var(&s.api_key_env).is_ok_and(|v| !v.trim().is_empty()),
            name: s.name,
            model: s.model,
            base_url: s.base_url,
            api_key_env: s.api_key_env,
            budget: s.budget,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    println!("Configuration: {}", config.source);
    for (i, p) in chain.iter().enumerate() {
        let key = if p.api_key_set { "set" } else { "missing" };
        let budget = p.budget.map(|b| format!(", budget {b}")).unwrap_or_default();
        println!(
            "{}. {} ({}) key {} {key}{budget}",
            i + 1,
            p.name,
            p.model,
            p.api_key_env
        );
    }
    Ok(())
}
