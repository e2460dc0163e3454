//! MORT command line entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mort::collaborators::Chunker;
use mort::{chunker::IndentChunker, llm, logging, MortConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mort")]
#[command(about = "MORT - concern-targeted mutants with validated killing tests", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of worker threads (0 = config value)
    #[arg(short = 'w', long, default_value = "0")]
    workers: usize,

    /// Per-execution test timeout in seconds
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and validate mutants for a code file
    Run {
        /// Python module to mutate
        code: PathBuf,

        /// Existing test file for the module
        test: PathBuf,

        /// Repository root copied into the sandbox
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,

        /// Process at most this many mutable chunks
        #[arg(short = 'n', long)]
        max_chunks: Option<usize>,

        /// Output directory for mutants, tests and metadata.json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the quality judge
        #[arg(long)]
        no_judge: bool,
    },

    /// Infer oracles from mutants and check the original against them
    Oracle {
        /// Python module to analyse
        code: PathBuf,

        /// Existing test file for the module
        test: PathBuf,

        /// Repository root copied into the sandbox
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,

        /// Process at most this many mutable chunks
        #[arg(short = 'n', long)]
        max_chunks: Option<usize>,

        /// Output directory for oracle tests, metadata.json and bug_report.txt
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Mutants requested per chunk
        #[arg(short = 'm', long)]
        mutants: Option<usize>,

        /// Pause after each oracle so it can be edited before tests are written
        #[arg(long)]
        review: bool,
    },

    /// Print the chunks extracted from a Python file
    Chunks {
        /// File to chunk
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = MortConfig::load_or_default(cli.config.as_deref())?;

    // Override with CLI options
    if cli.workers > 0 {
        config.execution.max_workers = cli.workers;
    }
    if let Some(secs) = cli.timeout {
        config.execution.test_timeout_secs = secs;
    }

    match cli.command {
        Commands::Run {
            code,
            test,
            repo,
            max_chunks,
            output,
            no_judge,
        } => {
            if max_chunks.is_some() {
                config.execution.max_chunks = max_chunks;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            if no_judge {
                config.judge.enabled = false;
            }

            let client = llm::client::from_config(&config.llm).context("failed to set up LLM backend")?;
            let mut orchestrator = mort::build_orchestrator(&config, &repo, Arc::from(client))
                .with_context(|| format!("failed to prepare sandbox for {}", repo.display()))?;

            let report = orchestrator
                .run_workflow(&code, &test)
                .with_context(|| format!("workflow aborted for {}", code.display()))?;

            println!("\n=== MORT Results: {} ===", report.file_data.file_path);
            println!("Chunks considered: {}", report.total_chunks);
            println!("Successful: {}", report.successful_count);
            println!("Skipped (already processed): {}", report.skipped_count);
            println!("Failed: {}", report.failed_count);

            if report.is_empty() {
                println!("\nNo new mutants produced.");
                return Ok(());
            }

            let store = orchestrator.metadata_store(&code);
            let metadata = store
                .persist(&report)
                .with_context(|| format!("failed to write results to {}", store.dir().display()))?;
            for mutant in &report.mutants {
                println!("  ✓ {} ({}) hash={}", mutant.chunk_id, mutant.chunk_type, mutant.hash);
            }
            println!(
                "\nSaved to {} ({} mutants total)",
                store.dir().display(),
                metadata.mutants.len()
            );
        }

        Commands::Oracle {
            code,
            test,
            repo,
            max_chunks,
            output,
            mutants,
            review,
        } => {
            if max_chunks.is_some() {
                config.execution.max_chunks = max_chunks;
            }
            if let Some(output) = output {
                config.oracle.output_dir = output;
            }
            if let Some(mutants) = mutants {
                config.oracle.mutants = mutants;
            }
            if review {
                config.oracle.review = true;
            }

            let client = llm::client::from_config(&config.llm).context("failed to set up LLM backend")?;
            let mut orchestrator = mort::build_oracle_orchestrator(&config, &repo, Arc::from(client))
                .with_context(|| format!("failed to prepare sandbox for {}", repo.display()))?;

            let report = orchestrator
                .run(&code, &test)
                .with_context(|| format!("oracle inference aborted for {}", code.display()))?;

            println!("\n=== MORT Oracle Results: {} ===", report.code_file);
            println!("Functions processed: {}", report.functions_processed);
            println!("Bugs detected: {}", report.bugs_found);
            for result in &report.results {
                println!("  {} {}: {}", if result.bugs_detected() == Some(true) { "✗" } else { "·" }, result.chunk_id, result.verdict);
            }
            for entry in &report.abandoned {
                println!("  - {}: {}", entry.chunk_id, entry.reason);
            }

            let store = orchestrator.store(&code);
            store
                .persist(&report)
                .with_context(|| format!("failed to write results to {}", store.dir().display()))?;
            println!("\nSaved to {}", store.dir().display());
        }

        Commands::Chunks { file } => {
            let code = std::fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let file_data = IndentChunker.extract_chunks(&code, &file.to_string_lossy())?;

            println!("{:<32} {:<9} {:>11}  mutable", "chunk", "type", "lines");
            for chunk in &file_data.chunks {
                println!(
                    "{:<32} {:<9} {:>5}-{:<5}  {}",
                    chunk.chunk_id,
                    chunk.chunk_type.to_string(),
                    chunk.context.line_start,
                    chunk.context.line_end,
                    if chunk.is_mutable { "yes" } else { "no" }
                );
            }
            println!(
                "\n{} chunks, {} mutable",
                file_data.chunks.len(),
                file_data.mutable_chunks().len()
            );
        }
    }

    Ok(())
}
