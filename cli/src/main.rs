//! `rlm`: run, check, and verify sandboxed step programs from the shell.
//!
//! The binary is a thin wrapper over the library crates: `run` executes one
//! step against a directory corpus, `check` runs only the AST policy, and
//! `verify` re-checks persisted citations. Orchestration (model calls, tool
//! resolution, multi-step loops) lives elsewhere; this surface exists for
//! local inspection and debugging of the core.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rlm_cite::{derive_citations, final_from_request, verify};
use rlm_corpus::{ContextDescriptor, DirCorpus};
use rlm_lang::Policy;
use rlm_sandbox::run_step;
use rlm_types::{SessionId, SpanRef, StepOutcome, ToolKind, to_canonical_string};

use crate::config::FileConfig;

#[derive(Parser)]
#[command(name = "rlm", about = "Sandboxed step execution with verifiable citations")]
struct Cli {
    /// TOML config for limits and citation settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one step program against a directory corpus.
    Run {
        /// Directory with one file per canonical document.
        #[arg(long)]
        corpus: PathBuf,
        /// Program text to execute.
        #[arg(long)]
        program: PathBuf,
        /// JSON file with the step's entry state (default: empty object).
        #[arg(long)]
        state: Option<PathBuf>,
        /// Emit the full StepResult as canonical JSON.
        #[arg(long)]
        json: bool,
    },
    /// Parse and policy-check a program without executing it.
    Check {
        #[arg(long)]
        program: PathBuf,
    },
    /// Verify a JSON array of SpanRefs against a corpus.
    Verify {
        #[arg(long)]
        corpus: PathBuf,
        /// JSON file holding an array of SpanRefs.
        #[arg(long)]
        citations: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RLM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = FileConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Run {
            corpus,
            program,
            state,
            json,
        } => cmd_run(&config, &corpus, &program, state.as_deref(), json),
        Command::Check { program } => cmd_check(&program),
        Command::Verify { corpus, citations } => cmd_verify(&corpus, &citations),
    }
}

fn cmd_run(
    config: &FileConfig,
    corpus_dir: &std::path::Path,
    program: &std::path::Path,
    state: Option<&std::path::Path>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let corpus = DirCorpus::new(corpus_dir);
    let doc_ids = corpus
        .doc_ids()
        .with_context(|| format!("listing corpus {}", corpus_dir.display()))?;
    anyhow::ensure!(!doc_ids.is_empty(), "corpus {} is empty", corpus_dir.display());
    let descriptor = ContextDescriptor::new(SessionId::new("cli"), doc_ids)
        .context("building context descriptor")?;

    let program_text = std::fs::read_to_string(program)
        .with_context(|| format!("reading program {}", program.display()))?;
    let state_in = match state {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading state {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing state {}", path.display()))?
        }
        None => serde_json::json!({}),
    };

    let limits = config.step_limits()?;
    let result = run_step(&program_text, state_in, &descriptor, &corpus, &limits);

    if json {
        let value = serde_json::to_value(&result).context("serializing step result")?;
        println!("{}", to_canonical_string(&value));
    } else {
        print_summary(&result);
        if result.outcome == StepOutcome::Final {
            let final_request = result
                .tool_requests
                .iter()
                .find(|r| r.kind == ToolKind::Final)
                .context("final outcome without a final request")?;
            let (answer, candidates) = final_from_request(final_request)?;
            println!("answer: {answer}");
            match derive_citations(
                &candidates,
                &result.span_log,
                &corpus,
                config.citation_config(),
            ) {
                Ok(refs) => {
                    for r in &refs {
                        println!(
                            "citation: {} [{}, {}) sha256={} {:?}",
                            r.doc, r.start, r.end, r.sha256, r.preview
                        );
                    }
                }
                Err(err) => {
                    println!("citation error: {err}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(match result.outcome {
        StepOutcome::Ok | StepOutcome::Final => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_summary(result: &rlm_types::StepResult) {
    match &result.outcome {
        StepOutcome::Ok => println!("outcome: ok"),
        StepOutcome::Final => println!("outcome: final"),
        StepOutcome::StepError { code, message, .. } => {
            println!("outcome: step_error {code}: {message}");
        }
        StepOutcome::PolicyReject { code, message } => {
            println!("outcome: policy_reject {code}: {message}");
        }
        StepOutcome::LimitExceeded { limit } => println!("outcome: limit_exceeded {limit}"),
    }
    if !result.stdout.is_empty() {
        print!("stdout:\n{}", result.stdout);
        if !result.stdout.ends_with('\n') {
            println!();
        }
    }
    if !result.stderr.is_empty() {
        print!("stderr:\n{}", result.stderr);
        if !result.stderr.ends_with('\n') {
            println!();
        }
    }
    println!("spans: {}", result.span_log.len());
    for request in &result.tool_requests {
        println!("tool: {} {}", request.kind.as_str(), request.handle);
    }
    if let Some(state) = &result.state_out {
        println!("state: {}", state.canonical());
    }
}

fn cmd_check(program: &std::path::Path) -> anyhow::Result<ExitCode> {
    let text = std::fs::read_to_string(program)
        .with_context(|| format!("reading program {}", program.display()))?;
    match Policy::new().validate_source(&text) {
        Ok(_) => {
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
        Err(violation) => {
            println!("{violation}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cmd_verify(
    corpus_dir: &std::path::Path,
    citations: &std::path::Path,
) -> anyhow::Result<ExitCode> {
    let corpus = DirCorpus::new(corpus_dir);
    let text = std::fs::read_to_string(citations)
        .with_context(|| format!("reading citations {}", citations.display()))?;
    let refs: Vec<SpanRef> = serde_json::from_str(&text)
        .with_context(|| format!("parsing citations {}", citations.display()))?;

    let mut all_valid = true;
    for r in &refs {
        let verdict = verify(r, &corpus);
        let tag = if verdict.is_valid() {
            "valid"
        } else {
            all_valid = false;
            "INVALID"
        };
        println!("{tag}: {} [{}, {}) sha256={}", r.doc, r.start, r.end, r.sha256);
    }
    println!(
        "{} citation(s), {}",
        refs.len(),
        if all_valid { "all valid" } else { "some invalid" }
    );
    Ok(if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
