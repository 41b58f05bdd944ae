//! Mentora terminal host.
//!
//! Loads settings, applies `MENTORA_*` overrides and dispatches to one of
//! the command handlers. Logging goes to stderr through `tracing`; set
//! `RUST_LOG=mentora_core=debug` for session internals.

mod cli;
mod commands;
mod settings;
mod state;

use clap::Parser;
use cli::{Cli, Commands};
use commands::VoiceOptions;
use settings::{default_settings_path, load_settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mentora=info,mentora_core=info")),
        )
        .init();

    let cli = Cli::parse();

    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_env_overrides();
    info!(
        settings_path = ?settings_path,
        live_model = %app_settings.live_model,
        voice = %app_settings.voice_name,
        has_api_key = app_settings.api_key.is_some(),
        "settings loaded"
    );

    let command = cli.command.unwrap_or(Commands::Voice {
        offline: false,
        wav: None,
        input: None,
        output: None,
    });

    match command {
        Commands::Voice {
            offline,
            wav,
            input,
            output,
        } => {
            commands::voice(
                app_settings,
                VoiceOptions {
                    offline,
                    wav,
                    input,
                    output,
                },
            )
            .await
        }
        Commands::Ask { search, prompt } => {
            commands::ask(app_settings, prompt.join(" "), search).await
        }
        Commands::Analyze { file, portfolio } => {
            commands::analyze(app_settings, file, portfolio).await
        }
        Commands::Devices => {
            commands::devices(&app_settings);
            Ok(())
        }
        Commands::UseDevice { input, output } => {
            // Persist what was on disk, not the env overrides.
            let mut stored = load_settings(&settings_path);
            commands::use_device(&mut stored, &settings_path, input, output)
        }
        Commands::Settings => {
            println!(
                "{}",
                serde_json::to_string_pretty(&app_settings.runtime_settings())?
            );
            Ok(())
        }
    }
}
