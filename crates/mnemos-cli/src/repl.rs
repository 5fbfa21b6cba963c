//! REPL – Read-Eval-Print Loop for the Mnemos interactive shell.
//!
//! Supported slash-commands:
//!   /remember <text>  – store a text memory
//!   /image <path>     – caption an image and store it
//!   /audio <path>     – transcribe a voice note and store it
//!   /ask <query>      – recall the closest memories
//!   /reflect          – run the reflection pipeline now
//!   /reflections      – show the latest reflections
//!   /stats            – store statistics
//!   /check            – compare the metadata log with the vector index
//!   /settings         – edit `~/.mnemos/config.toml`
//!   /help             – show this list
//!   /quit | /exit     – exit the CLI

use colored::Colorize;
use mnemos_memory::{MemoryStore, ReflectionPipeline};
use mnemos_runtime::Ingestor;
use mnemos_types::{Modality, SearchHit};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config};

/// Reflections shown by `/reflections`.
const REFLECTIONS_SHOWN: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Remember(String),
    Image(PathBuf),
    Audio(PathBuf),
    Ask(String),
    Reflect,
    Reflections,
    Stats,
    Check,
    Settings,
    Help,
    Quit,
    /// A known command was given without its argument.
    Usage(&'static str),
    Unknown(String),
}

/// Parse a line of input. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let cmd = match (name, arg.is_empty()) {
        ("/remember", false) => Command::Remember(arg.to_string()),
        ("/remember", true) => Command::Usage("/remember <text>"),
        ("/image", false) => Command::Image(PathBuf::from(arg)),
        ("/image", true) => Command::Usage("/image <path>"),
        ("/audio", false) => Command::Audio(PathBuf::from(arg)),
        ("/audio", true) => Command::Usage("/audio <path>"),
        ("/ask", false) => Command::Ask(arg.to_string()),
        ("/ask", true) => Command::Usage("/ask <query>"),
        ("/reflect", _) => Command::Reflect,
        ("/reflections", _) => Command::Reflections,
        ("/stats", _) => Command::Stats,
        ("/check", _) => Command::Check,
        ("/settings", _) => Command::Settings,
        ("/help", _) => Command::Help,
        ("/quit" | "/exit", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    };
    Some(cmd)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a command needs. Built once in `main`.
pub struct Session {
    pub cfg: Config,
    pub store: Arc<MemoryStore>,
    pub ingestor: Ingestor,
    pub pipeline: Arc<ReflectionPipeline>,
    pub runtime: Runtime,
    /// Cancelled by Ctrl-C; stops a running reflection and the REPL.
    pub shutdown: CancellationToken,
}

/// Whether the REPL keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Session {
    pub fn execute(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Remember(text) => self.cmd_remember(&text),
            Command::Image(path) => self.cmd_image(path),
            Command::Audio(path) => self.cmd_audio(path),
            Command::Ask(query) => self.cmd_ask(&query),
            Command::Reflect => self.cmd_reflect(),
            Command::Reflections => self.cmd_reflections(),
            Command::Stats => self.cmd_stats(),
            Command::Check => self.cmd_check(),
            Command::Settings => cmd_settings(&mut self.cfg),
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                return Flow::Quit;
            }
            Command::Usage(usage) => println!("{} {}", "Usage:".yellow(), usage.bold()),
            Command::Unknown(other) => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            ),
        }
        Flow::Continue
    }

    fn cmd_remember(&self, text: &str) {
        match self.runtime.block_on(self.ingestor.remember_text(text)) {
            Ok(record) => println!("{} memory #{}", "✓ Remembered".green(), record.id),
            Err(e) => print_error("Could not remember", &e),
        }
    }

    fn cmd_image(&self, path: PathBuf) {
        print!("  Captioning {} … ", path.display().to_string().dimmed());
        io::stdout().flush().ok();
        match self.runtime.block_on(self.ingestor.remember_image(&path)) {
            Ok(record) => {
                println!("{}", "OK".green());
                println!("  {} {}", "Caption:".bold(), record.caption);
                println!("{} memory #{}", "✓ Remembered".green(), record.id);
            }
            Err(e) => {
                println!("{}", "FAILED".red());
                print_error("Could not remember image", &e);
            }
        }
    }

    fn cmd_audio(&self, path: PathBuf) {
        match self.runtime.block_on(self.ingestor.remember_audio(&path)) {
            Ok(record) => {
                println!("  {} {}", "Transcript:".bold(), record.caption);
                println!("{} memory #{}", "✓ Remembered".green(), record.id);
            }
            Err(e) => print_error("Could not remember voice note", &e),
        }
    }

    fn cmd_ask(&self, query: &str) {
        match self.runtime.block_on(self.ingestor.recall(query, self.cfg.recall_k)) {
            Ok(hits) if hits.is_empty() => println!("{}", "No memories found.".yellow()),
            Ok(hits) => {
                println!();
                for (rank, hit) in hits.iter().enumerate() {
                    println!("  {}", format_hit(rank + 1, hit));
                }
                println!();
            }
            Err(e) => print_error("Recall failed", &e),
        }
    }

    fn cmd_reflect(&self) {
        println!("  Reflecting on the last {} memories …", self.cfg.load_window);
        match self.runtime.block_on(self.pipeline.run(&self.shutdown)) {
            Ok(run) => {
                if run.clusters == 0 {
                    println!(
                        "  {} ({} memories, need at least {})",
                        "Not enough memories to reflect on".yellow(),
                        run.loaded,
                        self.cfg.cluster_count
                    );
                    return;
                }
                for reflection in &run.reflections {
                    println!("  {} {}", "•".cyan(), reflection.summary);
                }
                if !run.skipped_clusters.is_empty() {
                    println!(
                        "  {} {} of {} cluster(s) produced no reflection",
                        "Warning:".yellow(),
                        run.skipped_clusters.len(),
                        run.clusters
                    );
                }
                if run.cancelled {
                    println!("  {}", "Reflection cancelled.".yellow());
                }
                println!(
                    "{} {} reflection(s) saved",
                    "✓".green().bold(),
                    run.reflections.len()
                );
            }
            Err(e) => print_error("Reflection failed", &e),
        }
    }

    fn cmd_reflections(&self) {
        match self.store.list_reflections(Some(REFLECTIONS_SHOWN)) {
            Ok(list) if list.is_empty() => println!("{}", "No reflections yet. Try /reflect.".yellow()),
            Ok(list) => {
                println!("{}", "Reflections".bold().underline());
                for r in list {
                    println!(
                        "  {} {}",
                        r.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                        r.summary
                    );
                }
            }
            Err(e) => print_error("Could not list reflections", &e),
        }
    }

    fn cmd_stats(&self) {
        let memories = self.store.memory_count();
        let reflections = self.store.list_reflections(None).map(|r| r.len());
        match (memories, reflections) {
            (Ok(memories), Ok(reflections)) => {
                println!("{}", "Memory Store".bold().underline());
                println!("  Data directory : {}", self.cfg.data_dir.display().to_string().bold());
                println!("  Memories       : {}", memories.to_string().yellow());
                println!("  Reflections    : {}", reflections.to_string().yellow());
                println!("  Embedding dim  : {}", self.store.dimension());
            }
            (Err(e), _) | (_, Err(e)) => print_error("Could not read store", &e),
        }
    }

    fn cmd_check(&self) {
        match self.store.check_consistency() {
            Ok(report) if report.is_consistent() => {
                println!("{} metadata log and vector index agree", "🟢".green())
            }
            Ok(report) => {
                println!("{} stores disagree", "🔴".red());
                if !report.rows_without_vectors.is_empty() {
                    println!("  rows without vectors : {:?}", report.rows_without_vectors);
                }
                if !report.vectors_without_rows.is_empty() {
                    println!("  vectors without rows : {:?}", report.vectors_without_rows);
                }
            }
            Err(e) => print_error("Consistency check failed", &e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// `session.shutdown` is polled each iteration; when cancelled the REPL
/// exits cleanly.
pub fn run(session: &mut Session) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start line editor".red(), e);
            return;
        }
    };

    loop {
        if session.shutdown.is_cancelled() {
            break;
        }
        let line = match editor.readline("mnemos> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let Some(cmd) = parse(&line) else {
            continue;
        };
        let _ = editor.add_history_entry(line.as_str());
        if session.execute(cmd) == Flow::Quit {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers without store access
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Mnemos Commands".bold().underline());
    println!("  {} – store a text memory", "/remember <text>".bold().cyan());
    println!("  {}    – caption an image and store it", "/image <path>".bold().cyan());
    println!("  {}    – transcribe a voice note and store it", "/audio <path>".bold().cyan());
    println!("  {}     – recall the closest memories", "/ask <query>".bold().cyan());
    println!("  {}         – summarise recent memories", "/reflect".bold().cyan());
    println!("  {}     – show the latest reflections", "/reflections".bold().cyan());
    println!("  {}           – store statistics", "/stats".bold().cyan());
    println!("  {}           – check log/index consistency", "/check".bold().cyan());
    println!("  {}        – edit ~/.mnemos/config.toml", "/settings".bold().cyan());
    println!("  {}     – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_settings(cfg: &mut Config) {
    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep a value; store changes apply on restart)");

    cfg.ollama_url = prompt_str(&format!("  Ollama URL       [{}]: ", cfg.ollama_url), &cfg.ollama_url);
    cfg.summary_model = prompt_str(&format!("  Summary model    [{}]: ", cfg.summary_model), &cfg.summary_model);
    cfg.embedding_model = prompt_str(
        &format!("  Embedding model  [{}]: ", cfg.embedding_model),
        &cfg.embedding_model,
    );
    cfg.caption_model = prompt_str(&format!("  Caption model    [{}]: ", cfg.caption_model), &cfg.caption_model);
    cfg.whisper_url = prompt_str(&format!("  Whisper URL      [{}]: ", cfg.whisper_url), &cfg.whisper_url);
    cfg.whisper_model = prompt_str(&format!("  Whisper model    [{}]: ", cfg.whisper_model), &cfg.whisper_model);
    cfg.cluster_count = prompt_usize(
        &format!("  Cluster count    [{}]: ", cfg.cluster_count),
        cfg.cluster_count,
        1,
    );
    cfg.recall_k = prompt_usize(&format!("  Recall results   [{}]: ", cfg.recall_k), cfg.recall_k, 1);
    cfg.reflect_interval_secs = prompt_usize(
        &format!("  Reflect every (s, 0 = off) [{}]: ", cfg.reflect_interval_secs),
        cfg.reflect_interval_secs as usize,
        0,
    ) as u64;

    match config::save(cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// One line of `/ask` output: rank, time, modality, caption, distance, and
/// the source file for non-text memories.
pub fn format_hit(rank: usize, hit: &SearchHit) -> String {
    let record = &hit.record;
    let mut line = format!(
        "{}. {} [{}] {} (distance {:.3})",
        rank,
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.modality,
        record.caption,
        hit.distance
    );
    if record.modality != Modality::Text && !record.filepath.is_empty() {
        line.push_str(&format!(" – {}", record.filepath));
    }
    line
}

fn print_error(context: &str, e: &dyn std::fmt::Display) {
    println!("{}: {}", context.red(), e);
}

/// A whole number no smaller than `min`.
fn parse_at_least(raw: &str, min: usize) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|v| *v >= min)
}

/// Prompt for a whole number of at least `min`.  Returns `default` when the
/// user presses Enter or types anything else.
fn prompt_usize(msg: &str, default: usize, min: usize) -> usize {
    let raw = prompt_str(msg, &default.to_string());
    match parse_at_least(&raw, min) {
        Some(v) => v,
        None => {
            println!(
                "  {} '{}' is not a whole number of at least {}, keeping {}",
                "Warning:".yellow(),
                raw,
                min,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() { default.to_string() } else { trimmed }
        }
        Err(_) => default.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use mnemos_memory::ReflectionConfig;
    use mnemos_types::{Embedder, Embedding, MemoryId, MemoryRecord, ProducerError, Summarizer};

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Embedding, ProducerError> {
            Ok(Embedding::new(vec![text.len() as f32, 1.0]))
        }
    }

    struct Unavailable;

    #[async_trait]
    impl Summarizer for Unavailable {
        async fn summarize(&self, _captions: &[String]) -> Result<String, ProducerError> {
            Err(ProducerError::SummarizerUnavailable("offline".into()))
        }
    }

    fn session() -> Session {
        let store = Arc::new(MemoryStore::open_in_memory(2).unwrap());
        let ingestor = Ingestor::new(store.clone(), Arc::new(LengthEmbedder)).unwrap();
        let pipeline = Arc::new(ReflectionPipeline::new(
            store.clone(),
            Arc::new(Unavailable),
            ReflectionConfig::default(),
        ));
        Session {
            cfg: Config::default(),
            store,
            ingestor,
            pipeline,
            runtime: Runtime::new().unwrap(),
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            parse("/remember  milk is in the fridge "),
            Some(Command::Remember("milk is in the fridge".into()))
        );
        assert_eq!(parse("/image shots/a b.png"), Some(Command::Image(PathBuf::from("shots/a b.png"))));
        assert_eq!(parse("/audio note.wav"), Some(Command::Audio(PathBuf::from("note.wav"))));
        assert_eq!(parse("/ask where are my keys"), Some(Command::Ask("where are my keys".into())));
    }

    #[test]
    fn missing_argument_yields_usage() {
        assert_eq!(parse("/ask"), Some(Command::Usage("/ask <query>")));
        assert_eq!(parse("/remember   "), Some(Command::Usage("/remember <text>")));
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse("/reflect"), Some(Command::Reflect));
        assert_eq!(parse("/reflections"), Some(Command::Reflections));
        assert_eq!(parse("/exit"), Some(Command::Quit));
        assert_eq!(parse("   "), None);
        assert_eq!(parse("hello"), Some(Command::Unknown("hello".into())));
    }

    #[test]
    fn format_hit_shows_file_for_images_only() {
        let record = MemoryRecord {
            id: MemoryId(1),
            caption: "a red bike".into(),
            modality: Modality::Image,
            timestamp: "2026-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap(),
            filepath: "bike.png".into(),
        };
        let hit = SearchHit {
            record: record.clone(),
            distance: 0.25,
        };
        let line = format_hit(1, &hit);
        assert!(line.starts_with("1. "));
        assert!(line.contains("[image] a red bike (distance 0.250)"));
        assert!(line.ends_with("bike.png"));

        let text = SearchHit {
            record: MemoryRecord {
                modality: Modality::Text,
                filepath: String::new(),
                ..record
            },
            distance: 0.0,
        };
        assert!(format_hit(2, &text).ends_with("(distance 0.000)"));
    }

    #[test]
    fn remember_then_stats_and_check_continue() {
        let mut session = session();
        assert_eq!(session.execute(Command::Remember("hello".into())), Flow::Continue);
        assert_eq!(session.store.memory_count().unwrap(), 1);
        assert_eq!(session.execute(Command::Ask("hi".into())), Flow::Continue);
        assert_eq!(session.execute(Command::Stats), Flow::Continue);
        assert_eq!(session.execute(Command::Check), Flow::Continue);
        assert_eq!(session.execute(Command::Quit), Flow::Quit);
    }

    #[test]
    fn reflect_with_offline_summarizer_saves_nothing() {
        let mut session = session();
        session.cfg.cluster_count = 1;
        session.pipeline = Arc::new(ReflectionPipeline::new(
            session.store.clone(),
            Arc::new(Unavailable),
            ReflectionConfig {
                cluster_count: 1,
                retry: mnemos_memory::RetryPolicy {
                    max_attempts: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
        ));
        session.execute(Command::Remember("one".into()));
        assert_eq!(session.execute(Command::Reflect), Flow::Continue);
        assert!(session.store.list_reflections(None).unwrap().is_empty());
    }

    #[test]
    fn audio_without_transcriber_stores_nothing() {
        let mut session = session();
        session.execute(Command::Audio(PathBuf::from("note.wav")));
        assert_eq!(session.store.memory_count().unwrap(), 0);
    }

    #[test]
    fn counts_below_the_minimum_are_rejected() {
        assert_eq!(parse_at_least("0", 1), None);
        assert_eq!(parse_at_least("-2", 1), None);
        assert_eq!(parse_at_least("three", 1), None);
        assert_eq!(parse_at_least(" 4 ", 1), Some(4));
        assert_eq!(parse_at_least("0", 0), Some(0));
    }
}
