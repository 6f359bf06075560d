//! # parley
//!
//! Terminal front end for the streaming chat client: ask one question, hold
//! an interactive session over stdin, or check service health.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parley_client::{ApiClient, ChatClient, ChatSnapshot};
use parley_core::{CitationStyle, TurnId, TurnStatus};
use parley_settings::{load_settings, ParleySettings};
use parley_telemetry::{init_telemetry, TelemetryConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SPEECH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Streaming chat client for a retrieval-augmented QA service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// WebSocket base URL (overrides settings).
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// REST base URL (overrides settings).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Synthesize speech for finished answers.
    #[arg(long, global = true)]
    speech: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level (overrides settings; RUST_LOG still wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(flatten)]
    request: RequestArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask one question, stream the answer to stdout and exit.
    Ask {
        query: String,
        /// Write synthesized audio here (implies --speech).
        #[arg(long)]
        audio_out: Option<PathBuf>,
    },
    /// Read questions from stdin, one per line.
    Chat,
    /// Print service health and server-side defaults.
    Health,
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// Candidates retrieved before reranking.
    #[arg(long, global = true)]
    top_k: Option<u32>,
    /// Passages kept after reranking.
    #[arg(long, global = true)]
    top_n: Option<u32>,
    #[arg(long, global = true)]
    no_rerank: bool,
    #[arg(long, global = true)]
    no_hybrid: bool,
    #[arg(long, global = true)]
    no_enhance: bool,
    /// Dense/lexical blend for hybrid search, 0.0..=1.0.
    #[arg(long, global = true)]
    alpha: Option<f64>,
    #[arg(long, global = true)]
    threshold: Option<f64>,
    #[arg(long, global = true, value_enum)]
    citations: Option<Citations>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Citations {
    Clean,
    #[value(name = "none")]
    Off,
}

impl From<Citations> for CitationStyle {
    fn from(c: Citations) -> Self {
        match c {
            Citations::Clean => CitationStyle::Clean,
            Citations::Off => CitationStyle::None,
        }
    }
}

impl Cli {
    fn apply(&self, settings: &mut ParleySettings) -> Result<()> {
        if let Some(url) = &self.ws_url {
            settings.endpoint.ws_url.clone_from(url);
        }
        if let Some(url) = &self.api_url {
            settings.endpoint.api_url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        let wants_audio = matches!(&self.command, Command::Ask { audio_out: Some(_), .. });
        if self.speech || wants_audio {
            settings.speech.enabled = true;
        }
        if self.json_logs {
            settings.logging.json = true;
        }

        let req = &mut settings.request;
        let args = &self.request;
        if let Some(k) = args.top_k {
            req.initial_top_k = k;
        }
        if let Some(n) = args.top_n {
            req.final_top_n = n;
        }
        if let Some(alpha) = args.alpha {
            if !(0.0..=1.0).contains(&alpha) {
                bail!("--alpha must be within 0.0..=1.0, got {alpha}");
            }
            req.hybrid_alpha = alpha;
        }
        if let Some(threshold) = args.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                bail!("--threshold must be within 0.0..=1.0, got {threshold}");
            }
            req.similarity_threshold = threshold;
        }
        if let Some(style) = args.citations {
            req.citation_style = style.into();
        }
        if args.no_rerank {
            req.use_reranking = false;
        }
        if args.no_hybrid {
            req.use_hybrid_search = false;
        }
        if args.no_enhance {
            req.use_query_enhancement = false;
        }
        settings.validate()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings().context("failed to load settings")?;
    cli.apply(&mut settings)?;

    let telemetry = TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json)?;
    init_telemetry(&telemetry)?;

    match cli.command {
        Command::Ask { query, audio_out } => ask(&settings, &query, audio_out).await,
        Command::Chat => chat(&settings).await,
        Command::Health => health(&settings).await,
    }
}

async fn connect(settings: &ParleySettings) -> Result<ChatClient> {
    let client = ChatClient::from_settings(settings);
    match timeout(CONNECT_TIMEOUT, client.wait_connected()).await {
        Ok(Ok(_)) => {
            info!(url = %settings.chat_url(), "connected");
            Ok(client)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            client.shutdown().await;
            Err(anyhow!("could not connect to {} within {:?}", settings.chat_url(), CONNECT_TIMEOUT))
        }
    }
}

async fn ask(settings: &ParleySettings, query: &str, audio_out: Option<PathBuf>) -> Result<()> {
    let client = connect(settings).await?;

    let outcome = tokio::select! {
        result = ask_once(&client, query, audio_out) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    client.shutdown().await;
    outcome
}

async fn ask_once(client: &ChatClient, query: &str, audio_out: Option<PathBuf>) -> Result<()> {
    let turn_id = client.submit(query).await?;
    let done = stream_answer(client, &turn_id).await?;
    print_footer(&done).await?;

    if let Some(err) = &done.error {
        bail!("{err}");
    }

    if let Some(path) = audio_out {
        let spoken = timeout(SPEECH_TIMEOUT, client.wait_for(|s| !s.synthesizing))
            .await
            .context("timed out waiting for speech")??;
        let audio = spoken
            .last_assistant()
            .filter(|t| t.id == turn_id)
            .and_then(|t| t.audio.clone());
        match audio {
            Some(clip) => {
                tokio::fs::write(&path, &clip.data)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), bytes = clip.len(), "audio written");
            }
            None => warn!("no audio was produced for this answer"),
        }
    }
    Ok(())
}

async fn chat(settings: &ParleySettings) -> Result<()> {
    let client = connect(settings).await?;
    let outcome = tokio::select! {
        result = chat_loop(&client) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };
    client.shutdown().await;
    outcome
}

async fn chat_loop(client: &ChatClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/speech on" => client.set_speech_enabled(true).await?,
            "/speech off" => client.set_speech_enabled(false).await?,
            "/reconnect" => {
                if !client.reconnect() {
                    stderr.write_all(b"already connected or connecting\n").await?;
                }
            }
            query => match client.submit(query).await {
                Ok(turn_id) => {
                    let done = stream_answer(client, &turn_id).await?;
                    print_footer(&done).await?;
                }
                Err(e) if e.is_transient() => {
                    stderr.write_all(format!("{e}; try again shortly\n").as_bytes()).await?;
                }
                Err(e) => {
                    stderr.write_all(format!("error: {e}\n").as_bytes()).await?;
                }
            },
        }
    }
    Ok(())
}

/// Print the answer for `turn_id` as it streams. Returns the snapshot that
/// ended the turn.
async fn stream_answer(client: &ChatClient, turn_id: &TurnId) -> Result<ChatSnapshot> {
    let mut rx = client.subscribe();
    let mut stdout = tokio::io::stdout();
    let mut printed = 0usize;

    loop {
        let snap = rx.borrow_and_update().clone();
        let ours = snap.last_assistant().is_some_and(|t| &t.id == turn_id);
        if ours {
            let text = &snap.current_text;
            if text.len() > printed && text.is_char_boundary(printed) {
                stdout.write_all(text[printed..].as_bytes()).await?;
                stdout.flush().await?;
                printed = text.len();
            }
            if !snap.is_streaming {
                stdout.write_all(b"\n").await?;
                return Ok(snap);
            }
        }
        rx.changed().await.map_err(|_| anyhow!("chat client stopped"))?;
    }
}

async fn print_footer(snap: &ChatSnapshot) -> Result<()> {
    let mut out = String::new();
    if let Some(turn) = snap.last_assistant() {
        match turn.status {
            TurnStatus::Failed => {
                if let Some(err) = &snap.error {
                    out.push_str(&format!("[{err}]\n"));
                }
            }
            TurnStatus::Interrupted => out.push_str("[connection lost before the answer finished]\n"),
            TurnStatus::Complete | TurnStatus::Streaming => {}
        }
    }
    for (i, source) in snap.current_sources.iter().enumerate() {
        let file = source.source_file().unwrap_or("unknown");
        let page = source.page_num().map(|p| format!(" p.{p}")).unwrap_or_default();
        let score = source.best_score().map(|s| format!(" ({s:.2})")).unwrap_or_default();
        out.push_str(&format!("  [{}] {file}{page}{score}\n", i + 1));
    }
    if let Some(q) = &snap.enhanced_query {
        out.push_str(&format!("  searched for: {q}\n"));
    }
    for q in &snap.suggested_questions {
        out.push_str(&format!("  ? {q}\n"));
    }
    let mut stdout = tokio::io::stdout();
    stdout.write_all(out.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn health(settings: &ParleySettings) -> Result<()> {
    let api = ApiClient::from_settings(settings);
    let status = api.health().await.context("health check failed")?;
    println!("status:          {}", status.status);
    println!("llm connected:   {}", status.llm_connected);
    println!("llm provider:    {}", status.llm_provider.as_deref().unwrap_or("-"));
    println!("services loaded: {}", status.services_loaded);

    match api.server_settings().await {
        Ok(server) => {
            let d = &server.defaults;
            println!(
                "defaults:        top_k={} top_n={} threshold={} hybrid={} alpha={} rerank={}",
                d.initial_top_k,
                d.final_top_n,
                d.similarity_threshold,
                d.use_hybrid_search,
                d.hybrid_alpha,
                d.use_reranking
            );
            for (name, range) in &server.ranges {
                println!("  {name}: {}..={} step {}", range.min, range.max, range.step);
            }
            for (name, value, range) in server.out_of_range(&settings.request) {
                println!(
                    "warning:         configured {name}={value} is outside {}..={}",
                    range.min, range.max
                );
            }
        }
        Err(e) => warn!(error_kind = e.error_kind(), error = %e, "could not fetch server settings"),
    }

    if !status.is_healthy() {
        bail!("service is not healthy");
    }
    Ok(())
}
