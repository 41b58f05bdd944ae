//! Command handlers, one per CLI subcommand.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{atomic::Ordering, Arc};

use anyhow::{bail, Context};
use mentora_core::audio::{device, wav::WavBackend, AudioBackend, CpalBackend};
use mentora_core::channel::ChannelConnector;
use mentora_core::services::{gemini::GeminiClient, Portfolio, ResumeAnalyzer, TextGenerator};
use mentora_core::{
    LiveConnector, MentoraEngine, MentoraError, ScriptedConnector, SessionState, Speaker,
};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{info, warn};

use crate::settings::{save_settings, AppSettings};
use crate::state::{level_meter, AppState};

pub struct VoiceOptions {
    pub offline: bool,
    pub wav: Option<PathBuf>,
    pub input: Option<String>,
    pub output: Option<String>,
}

/// Run one interactive voice session until the user ends it.
pub async fn voice(settings: AppSettings, options: VoiceOptions) -> anyhow::Result<()> {
    let mut config = settings.engine_config();
    if options.input.is_some() {
        config.preferred_input_device = options.input;
    }
    if options.output.is_some() {
        config.preferred_output_device = options.output;
    }

    let backend: Arc<dyn AudioBackend> = match options.wav {
        Some(path) => Arc::new(WavBackend::new(path, Arc::new(CpalBackend))),
        None => Arc::new(CpalBackend),
    };
    let connector: Arc<dyn ChannelConnector> = if options.offline {
        info!("offline mode: using scripted mentor");
        Arc::new(ScriptedConnector::greeting())
    } else {
        let Some(key) = settings.api_key.clone() else {
            bail!("no API key: set MENTORA_API_KEY or GEMINI_API_KEY, or pass --offline");
        };
        Arc::new(LiveConnector::new(key))
    };

    let state = Arc::new(AppState::new(
        MentoraEngine::new(config, backend, connector),
        settings,
    ));
    spawn_forwarders(&state);

    println!("Mentora voice session. Enter or `q` ends it, `r` retries, `s` shows status.");
    if let Err(e) = state.engine.activate().await {
        eprintln!("{}", e.user_message());
    }

    let mut lines = spawn_stdin_reader()?;
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match line.trim() {
                    "" | "q" | "quit" => break,
                    "r" | "retry" => {
                        state.retries.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = state.engine.retry().await {
                            eprintln!("{}", e.user_message());
                        }
                    }
                    "s" | "status" => print_status(&state)?,
                    other => eprintln!("unknown input {other:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    match state.engine.close().await {
        Ok(()) | Err(MentoraError::NotActive) => {}
        Err(e) => warn!(error = %e, "close failed"),
    }
    let diag = state.diagnostics_snapshot();
    info!(
        frames_sent = diag.pipeline_frames_sent,
        frames_dropped = diag.pipeline_frames_dropped,
        samples_overrun = diag.pipeline_samples_overrun,
        transcript_lines = diag.transcript_lines,
        retries = diag.retries,
        "app diagnostics snapshot on exit"
    );
    Ok(())
}

fn print_status(state: &AppState) -> anyhow::Result<()> {
    let diag = state.diagnostics_snapshot();
    let level = state.last_level_milli.load(Ordering::Relaxed) as f32 / 1000.0;
    let voice = state.settings.lock().voice_name.clone();
    println!("{} {} voice={voice}", diag.state, level_meter(level));
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

/// Print status changes and transcripts; track the latest mic level.
fn spawn_forwarders(state: &Arc<AppState>) {
    let mut status_rx = state.engine.subscribe_status();
    let counter = Arc::clone(&state.status_events);
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    match (event.status, event.detail) {
                        (SessionState::Error, Some(detail)) => {
                            println!("[error] {detail} (type `r` to retry)")
                        }
                        (status, _) => println!("[{status}]"),
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("status receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut transcript_rx = state.engine.subscribe_transcripts();
    let counter = Arc::clone(&state.transcript_lines);
    tokio::spawn(async move {
        loop {
            match transcript_rx.recv().await {
                Ok(event) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let who = match event.speaker {
                        Speaker::Student => "you",
                        Speaker::Mentor => "mentor",
                    };
                    println!("{who}: {}", event.text.trim());
                }
                Err(RecvError::Lagged(n)) => warn!("transcript receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut level_rx = state.engine.subscribe_levels();
    let counter = Arc::clone(&state.level_events);
    let last = Arc::clone(&state.last_level_milli);
    tokio::spawn(async move {
        loop {
            match level_rx.recv().await {
                Ok(event) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    last.store((event.rms * 1000.0) as usize, Ordering::Relaxed);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Stdin lines on a plain thread, so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> anyhow::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("mentora-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

fn text_client(settings: &AppSettings) -> anyhow::Result<GeminiClient> {
    let Some(key) = settings.api_key.clone() else {
        bail!("no API key: set MENTORA_API_KEY or GEMINI_API_KEY");
    };
    Ok(GeminiClient::new(key)?.with_model(settings.text_model.clone()))
}

/// One grounded text answer.
pub async fn ask(settings: AppSettings, prompt: String, search: bool) -> anyhow::Result<()> {
    let client = text_client(&settings)?;
    let answer = tokio::task::spawn_blocking(move || client.generate(&prompt, search))
        .await
        .context("text request task failed")??;

    println!("{}", answer.text.trim());
    if !answer.grounding.is_empty() {
        println!("\nSources:");
        for link in &answer.grounding {
            println!("  - {} <{}>", link.title, link.uri);
        }
    }
    Ok(())
}

pub fn read_resume(file: &Path, portfolio: bool) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    if !portfolio {
        return Ok(raw);
    }
    let portfolio: Portfolio = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not portfolio JSON", file.display()))?;
    Ok(portfolio.resume_text())
}

pub async fn analyze(settings: AppSettings, file: PathBuf, portfolio: bool) -> anyhow::Result<()> {
    let resume = read_resume(&file, portfolio)?;
    if resume.trim().is_empty() {
        bail!("{} is empty", file.display());
    }
    let client = text_client(&settings)?;
    let analysis = tokio::task::spawn_blocking(move || client.analyze(&resume))
        .await
        .context("analysis task failed")??;

    println!("Readiness score: {:.0}/100", analysis.score);
    if !analysis.suggestions.is_empty() {
        println!("\nSuggestions:");
        for s in &analysis.suggestions {
            println!("  - {s}");
        }
    }
    if !analysis.missing_skills.is_empty() {
        println!("\nMissing skills: {}", analysis.missing_skills.join(", "));
    }
    if !analysis.roadmap_nodes.is_empty() {
        println!("\nRoadmap:");
        for (i, node) in analysis.roadmap_nodes.iter().enumerate() {
            println!("  {}. {}: {}", i + 1, node.title, node.desc);
        }
    }
    Ok(())
}

pub fn devices(settings: &AppSettings) {
    let sections = [
        (
            "Microphones",
            device::list_input_devices(),
            settings.preferred_input_device.as_deref(),
        ),
        (
            "Speakers",
            device::list_output_devices(),
            settings.preferred_output_device.as_deref(),
        ),
    ];
    for (title, list, preferred) in sections {
        println!("{title}:");
        if list.is_empty() {
            println!("  (none found)");
        }
        for d in list {
            let mut tags = Vec::new();
            if d.is_default {
                tags.push("default");
            }
            if d.is_recommended {
                tags.push("recommended");
            }
            if d.is_loopback_like {
                tags.push("loopback");
            }
            if preferred == Some(d.name.as_str()) {
                tags.push("preferred");
            }
            if tags.is_empty() {
                println!("  {}", d.name);
            } else {
                println!("  {} ({})", d.name, tags.join(", "));
            }
        }
    }
}

/// Persist preferred device names used by future sessions.
pub fn use_device(
    settings: &mut AppSettings,
    settings_path: &Path,
    input: Option<String>,
    output: Option<String>,
) -> anyhow::Result<()> {
    if input.is_none() && output.is_none() {
        bail!("pass --input and/or --output");
    }
    if input.is_some() {
        settings.preferred_input_device = input;
    }
    if output.is_some() {
        settings.preferred_output_device = output;
    }
    settings.normalize();
    save_settings(settings_path, settings)
        .with_context(|| format!("cannot write {}", settings_path.display()))?;
    info!(
        input = settings.preferred_input_device.as_deref().unwrap_or("default"),
        output = settings.preferred_output_device.as_deref().unwrap_or("default"),
        "preferred devices saved"
    );
    Ok(())
}
