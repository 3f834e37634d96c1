use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gptrank_cli::commands::{config_ops, replay_ops};

#[derive(Parser)]
#[command(name = "gptrank", about = "Rank sentences by language-model likelihood")]
struct Cli {
    /// Settings TOML overriding the embedded defaults
    #[arg(long, global = true)]
    settings: Option<String>,
    /// Write a JSON trace to this directory (requires --features trace)
    #[arg(long, global = true)]
    trace_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score and rank sentences with a GGUF model (requires --features neural)
    #[cfg(feature = "neural")]
    Score {
        /// GGUF model file path
        model: String,
        /// Candidate sentences
        #[arg(required = true)]
        sentences: Vec<String>,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the most likely next token (requires --features neural)
    #[cfg(feature = "neural")]
    Predict {
        /// GGUF model file path
        model: String,
        /// Context text
        text: String,
    },
    /// Greedy continuation (requires --features neural)
    #[cfg(feature = "neural")]
    Generate {
        /// GGUF model file path
        model: String,
        /// Context text
        text: String,
        /// Maximum tokens to generate (default: generate.max_tokens)
        #[arg(short, long)]
        n: Option<usize>,
    },
    /// Map input embeddings back to vocabulary tokens (requires --features neural)
    #[cfg(feature = "neural")]
    Nearest {
        /// GGUF model file path
        model: String,
        /// Text whose tokens to recover
        text: String,
    },
    /// Score pre-tokenized sequences against a JSON logits dump
    Replay {
        /// Dump file: {"shape":[b,s,v],"logits":[...],"sequences":[[...]],"eos_id":n}
        file: String,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Inspect scorer settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the embedded default settings TOML
    Export,
    /// Validate a settings TOML file
    Validate {
        /// Path to the TOML file
        file: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let _trace = cli
        .trace_dir
        .as_deref()
        .map(gptrank_core::trace_init::init_tracing);
    if let Some(file) = &cli.settings {
        config_ops::load_settings(file);
    }

    match cli.command {
        #[cfg(feature = "neural")]
        Command::Score {
            model,
            sentences,
            json,
        } => {
            use gptrank_cli::commands::score_ops;
            score_ops::score_cmd(&model, &sentences, json)
        }
        #[cfg(feature = "neural")]
        Command::Predict { model, text } => {
            use gptrank_cli::commands::score_ops;
            score_ops::predict_cmd(&model, &text)
        }
        #[cfg(feature = "neural")]
        Command::Generate { model, text, n } => {
            use gptrank_cli::commands::score_ops;
            score_ops::generate_cmd(&model, &text, n)
        }
        #[cfg(feature = "neural")]
        Command::Nearest { model, text } => {
            use gptrank_cli::commands::score_ops;
            score_ops::nearest_cmd(&model, &text)
        }
        Command::Replay { file, json } => replay_ops::replay_cmd(&file, json),
        Command::Settings { action } => match action {
            SettingsAction::Export => config_ops::settings_export(),
            SettingsAction::Validate { file } => config_ops::settings_validate(&file),
        },
    }
}
