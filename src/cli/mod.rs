use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod chat;
pub mod serve;

#[derive(Subcommand)]
enum Command {
    /// Run the API server
    Serve {
        /// Set the server host address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Set the server port
        #[arg(long, default_value = "2222")]
        port: String,
    },
    /// Start a chat session in the terminal
    Chat {
        /// Base URL of a running server
        #[arg(long, default_value = "http://127.0.0.1:2222")]
        api_url: String,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    // Handle each sub command
    match args.command {
        Some(Command::Serve { host, port }) => {
            serve::run(host, port).await?;
        }
        Some(Command::Chat { api_url }) => {
            chat::run(&api_url).await?;
        }
        None => {}
    }

    Ok(())
}
