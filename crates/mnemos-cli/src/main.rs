//! `mnemos-cli` – Mnemos Command Line Interface
//!
//! This binary is the entry point for a personal multimodal memory. It:
//!
//! 1. Checks for `~/.mnemos/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Probes the local Ollama instance and reports missing models.
//! 3. Opens the memory store (`memories.db` + `vectors.db`), reconciling any
//!    half-finished write from a previous crash.
//! 4. Optionally starts background reflections.
//! 5. Drops the user into an **interactive REPL** (`/remember`, `/ask`,
//!    `/reflect`, `/help`, …).
//! 6. Intercepts **Ctrl-C** to cancel a running reflection and exit.

mod config;
mod ollama;
mod repl;

use colored::Colorize;
use mnemos_memory::{MemoryStore, ReflectionPipeline};
use mnemos_runtime::{
    Ingestor, OllamaCaptioner, OllamaClient, OllamaEmbedder, OllamaSummarizer, ReflectionScheduler,
    TelemetryConfig, WhisperTranscriber,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on a single model request. Vision, chat and speech models on
/// CPU are slow.
const MODEL_TIMEOUT: Duration = Duration::from_secs(120);

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    let _telemetry = mnemos_runtime::init_tracing(&TelemetryConfig::from_env(
        "mnemos",
        env!("CARGO_PKG_VERSION"),
    ));

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let shutdown_ctrlc = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        shutdown_ctrlc.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not cancel reflections");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let cfg = config::load().ok().flatten().unwrap_or_default();

    // ── Ollama discovery ──────────────────────────────────────────────────
    print!("\n  Probing Ollama at {} … ", cfg.ollama_url.dimmed());
    match ollama::fetch_models(&cfg.ollama_url) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            let wanted = [
                cfg.summary_model.as_str(),
                cfg.embedding_model.as_str(),
                cfg.caption_model.as_str(),
            ];
            for name in ollama::missing_models(&wanted, &models) {
                println!(
                    "  {} model {} is not pulled. Run `{}`.",
                    "Warning:".yellow(),
                    name.bold(),
                    format!("ollama pull {name}").bold()
                );
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}` to start a local AI.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }

    // ── Memory store ──────────────────────────────────────────────────────
    let store = match MemoryStore::open(&cfg.store_config()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("{}: {}", "Cannot open memory store".red().bold(), e);
            std::process::exit(1);
        }
    };
    let count = store.memory_count().unwrap_or(0);
    println!(
        "  Memory store at {} ({} memories, dim {})",
        cfg.data_dir.display().to_string().bold(),
        count,
        store.dimension()
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start async runtime".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Producers ─────────────────────────────────────────────────────────
    let client = OllamaClient::new(cfg.ollama_url.clone(), MODEL_TIMEOUT);
    let embedder = Arc::new(OllamaEmbedder::new(
        client.clone(),
        cfg.embedding_model.clone(),
        store.dimension(),
    ));
    let ingestor = match Ingestor::new(store.clone(), embedder) {
        Ok(ingestor) => ingestor
            .with_captioner(Arc::new(OllamaCaptioner::new(client.clone(), cfg.caption_model.clone())))
            .with_transcriber(Arc::new(WhisperTranscriber::new(
                cfg.whisper_url.clone(),
                cfg.whisper_model.clone(),
                MODEL_TIMEOUT,
            ))),
        Err(e) => {
            eprintln!("{}: {}", "Cannot set up ingestion".red().bold(), e);
            std::process::exit(1);
        }
    };
    let summarizer = Arc::new(OllamaSummarizer::new(client, cfg.summary_model.clone()));
    let pipeline = Arc::new(ReflectionPipeline::new(
        store.clone(),
        summarizer,
        cfg.reflection_config(),
    ));

    // ── Background reflections ────────────────────────────────────────────
    let stop_scheduler = shutdown.child_token();
    let scheduler = (cfg.reflect_interval_secs > 0).then(|| {
        let _rt = runtime.enter();
        info!(every_secs = cfg.reflect_interval_secs, "background reflections enabled");
        ReflectionScheduler::new(pipeline.clone(), Duration::from_secs(cfg.reflect_interval_secs))
            .spawn(stop_scheduler.clone())
    });

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let mut session = repl::Session {
        cfg,
        store,
        ingestor,
        pipeline,
        runtime,
        shutdown,
    };
    repl::run(&mut session);

    stop_scheduler.cancel();
    if let Some(handle) = scheduler
        && let Err(e) = session.runtime.block_on(handle)
    {
        warn!(error = %e, "reflection scheduler did not stop cleanly");
    }
    println!("{}", "  ✓ Exiting Mnemos.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Mnemos First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Mnemos.\n");

    let mut cfg = config::Config::default();

    let data_dir = repl::prompt_str(
        &format!("  Data directory [{}]: ", cfg.data_dir.display()),
        &cfg.data_dir.display().to_string(),
    );
    cfg.data_dir = PathBuf::from(data_dir);

    cfg.ollama_url = repl::prompt_str(&format!("  Ollama URL [{}]: ", cfg.ollama_url), &cfg.ollama_url);
    cfg.summary_model = repl::prompt_str(
        &format!("  Summary model [{}]: ", cfg.summary_model),
        &cfg.summary_model,
    );
    cfg.embedding_model = repl::prompt_str(
        &format!("  Embedding model [{}]: ", cfg.embedding_model),
        &cfg.embedding_model,
    );

    println!("  The embedding dimension must match the embedding model and cannot be changed later.");
    let dim = repl::prompt_str(
        &format!("  Embedding dimension [{}]: ", cfg.embedding_dim),
        &cfg.embedding_dim.to_string(),
    );
    match dim.trim().parse::<usize>() {
        Ok(d) if d > 0 => cfg.embedding_dim = d,
        _ => println!("  {} keeping {}", "Warning: invalid dimension,".yellow(), cfg.embedding_dim),
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __  ___                          "#.bold().cyan());
    println!("{}", r#"  /  |/  /__  ___ __ _  ___  ___    "#.bold().cyan());
    println!("{}", r#" / /|_/ / _ \/ -_)  ' \/ _ \(_-<    "#.bold().cyan());
    println!("{}", r#"/_/  /_/_//_/\__/_/_/_/\___/___/    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Mnemos".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Multimodal Memory Assistant");
    println!();
}
