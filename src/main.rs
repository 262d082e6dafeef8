//! taskgate CLI entry point

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use anyhow::Result;
use taskgate::auth::CredentialManager;
use taskgate::{ui, Error};

#[derive(Parser)]
#[command(name = "taskgate")]
#[command(about = "OAuth2 credential manager for the task-list service")]
#[command(version)]
struct Cli {
    /// Prompt for the credential store passphrase instead of reading TASKGATE_PASSPHRASE
    #[arg(long, global = true)]
    ask_passphrase: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the OAuth client registration
    Init,

    /// Authorize in the browser and store credentials
    Login {
        /// Print the authorization URL without opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Remove stored credentials
    Logout,

    /// Show authentication status
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a valid access token, refreshing it if needed
    Token,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ask_passphrase = cli.ask_passphrase;

    match cli.command {
        Commands::Init => {
            taskgate::config::onboard()?;
            ui::print_step("Next: run 'taskgate login'");
        }

        Commands::Login { no_browser } => {
            run_login(!no_browser, ask_passphrase).await?;
        }

        Commands::Logout => {
            open_manager(ask_passphrase)?.logout()?;
            ui::print_success("Logged out successfully");
        }

        Commands::Status { json } => {
            let status = open_manager(ask_passphrase)?.status()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }

            ui::print_header("Status");
            println!("Authenticated: {}", if status.is_authenticated { "✓" } else { "no (run 'taskgate login')" });
            println!("Valid token: {}", if status.has_valid_token { "✓" } else { "no" });
            if let Some(expires_at) = status.expires_at {
                let expiry = chrono::DateTime::from_timestamp(expires_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| expires_at.to_string());
                println!("Expires: {}", expiry);
            }
            if let Some(scopes) = status.scopes {
                println!("Scopes: {}", scopes.join(", "));
            }
        }

        Commands::Token => {
            let manager = open_manager(ask_passphrase)?;
            match manager.get_valid_access_token().await {
                Ok(token) => println!("{}", token),
                Err(e) => {
                    ui::print_error(&e.to_string());
                    if e.is_reauth() {
                        ui::print_step("Run 'taskgate login' to authenticate again");
                    }
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

/// Load the config and open the credential manager with the chosen passphrase source
fn open_manager(ask_passphrase: bool) -> Result<CredentialManager> {
    let config = taskgate::config::load()?;
    let manager = if ask_passphrase {
        let passphrase = taskgate::config::prompt_passphrase()?;
        CredentialManager::with_passphrase(&config, Some(&passphrase))?
    } else {
        CredentialManager::new(&config)?
    };
    Ok(manager)
}

async fn run_login(open_browser: bool, ask_passphrase: bool) -> Result<()> {
    let mut manager = open_manager(ask_passphrase)?;

    ui::print_header("Login");

    let result = match manager.run_interactive_flow(open_browser).await {
        Err(Error::CallbackTimeout(waited)) => {
            ui::print_warning(&format!("No callback received within {:?}", waited));
            let code = inquire::Text::new("Paste the authorization code from the redirect URL:")
                .prompt()
                .map_err(|e| Error::OAuth(format!("Prompt failed: {}", e)))?;
            manager.exchange_code(code.trim()).await
        }
        other => other,
    };

    match result {
        Ok(_) => {
            ui::print_success("Authentication successful!");
            ui::print_step(&format!("Credentials saved to {:?}", manager.store().path()));
            Ok(())
        }
        Err(e) => {
            ui::print_error(&e.to_string());
            Err(e.into())
        }
    }
}
