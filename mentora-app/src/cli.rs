use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mentora")]
#[command(about = "Live voice career mentor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Settings file (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Talk to the mentor (default if no command specified)
    Voice {
        /// Replay a scripted greeting instead of connecting to the live model
        #[arg(long)]
        offline: bool,

        /// Use a WAV file as the microphone
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Microphone name for this run
        #[arg(long)]
        input: Option<String>,

        /// Speaker name for this run
        #[arg(long)]
        output: Option<String>,
    },

    /// Ask the mentor a question in text
    Ask {
        /// Ground the answer on web search results
        #[arg(long)]
        search: bool,

        /// The question
        #[arg(required = true)]
        prompt: Vec<String>,
    },

    /// Score a resume for a software engineering role
    Analyze {
        /// Plain-text resume, or portfolio JSON with --portfolio
        file: PathBuf,

        /// Treat the file as portfolio JSON (skills, projects, experience)
        #[arg(long)]
        portfolio: bool,
    },

    /// List microphones and speakers
    Devices,

    /// Remember a preferred microphone and/or speaker
    UseDevice {
        #[arg(long)]
        input: Option<String>,

        #[arg(long)]
        output: Option<String>,
    },

    /// Print the effective settings
    Settings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command_means_voice() {
        let cli = Cli::try_parse_from(["mentora"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn voice_flags_parse() {
        let cli =
            Cli::try_parse_from(["mentora", "voice", "--offline", "--wav", "in.wav"]).unwrap();
        match cli.command {
            Some(Commands::Voice { offline, wav, .. }) => {
                assert!(offline);
                assert_eq!(wav, Some(PathBuf::from("in.wav")));
            }
            _ => panic!("expected voice"),
        }
    }

    #[test]
    fn ask_collects_words() {
        let cli = Cli::try_parse_from(["mentora", "ask", "--search", "how", "to", "start"]).unwrap();
        match cli.command {
            Some(Commands::Ask { search, prompt }) => {
                assert!(search);
                assert_eq!(prompt.join(" "), "how to start");
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn ask_requires_prompt() {
        assert!(Cli::try_parse_from(["mentora", "ask"]).is_err());
    }
}
