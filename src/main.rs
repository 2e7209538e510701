use std::io::BufRead;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use metasocial::auth::SessionProvider;
use metasocial::commands;
use metasocial::config::{Cli, Command, Config};
use metasocial::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::debug!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    let state = AppState::from_config(config)?;

    // Restore any persisted session before running the command
    let mut provider = SessionProvider::start(Arc::clone(&state.auth));
    let ctx = provider.ready().await;

    let command = with_password(cli.command)?;
    let result = commands::run(&state, &ctx, command).await;
    provider.shutdown();

    match result {
        Ok(output) => {
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!("Command failed: {:?}", e);
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

/// Prompt for a password on stdin when signup/login was given none.
fn with_password(command: Command) -> anyhow::Result<Command> {
    Ok(match command {
        Command::Signup {
            email,
            password: None,
        } => Command::Signup {
            password: Some(read_password()?),
            email,
        },
        Command::Login {
            email,
            password: None,
        } => Command::Login {
            password: Some(read_password()?),
            email,
        },
        other => other,
    })
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
