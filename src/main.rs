// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use promptdj::{audio, config};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time generative music engine steered by weighted prompts."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Prints the starting prompts and the payload they produce.
    Prompts {
        /// The path to the engine config.
        config_path: String,
    },
    /// Start will connect to the generation service and start the keyboard controller.
    Start {
        /// The path to the engine config.
        config_path: String,
    },
}

#[derive(Serialize)]
struct PromptReport<'a> {
    prompts: &'a [promptdj::prompts::WeightedPrompt],
    payload: Vec<promptdj::prompts::WeightedPrompt>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Prompts { config_path } => {
            let config = config::Engine::deserialize(&PathBuf::from(config_path))?;
            let store = config.prompt_store(&mut rand::thread_rng())?;
            let prompts = store.snapshot();
            let report = PromptReport {
                prompts: &prompts,
                payload: store.payload(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Start { config_path } => {
            config::init_controller(&PathBuf::from(config_path))?
                .join()
                .await?;
        }
    }

    Ok(())
}
