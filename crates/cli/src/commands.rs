//! Subcommand implementations.

use std::io::Write;

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    folio_protocol::{ClientMessage, ServerMessage},
    folio_session::{AuthStatus, FolioClient, GatewayError, RealtimeEvent, SessionEvent},
    secrecy::SecretString,
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, warn},
};

const SESSION_EXPIRED: &str = "session expired, please log in again";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the token pair
    Login {
        #[arg(short, long)]
        username: String,

        /// Read from FOLIO_PASSWORD or prompted for when omitted
        #[arg(long, env = "FOLIO_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Log out and forget the stored session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Authenticated GET, printed as JSON
    Get {
        /// API path, e.g. /api/positions/
        path: String,
    },

    /// Remember the account to work with
    SelectAccount {
        /// Account id
        id: i64,
    },

    /// Print real-time events until Ctrl-C
    Watch,

    /// Start a statement import and follow its progress
    Import {
        #[arg(long)]
        file_id: String,

        #[arg(long)]
        broker_id: i64,
    },
}

pub async fn run(client: &FolioClient, command: Command) -> Result<()> {
    let mut session = client.subscribe_session();
    let outcome = match command {
        Command::Login { username, password } => login(client, &username, password).await,
        Command::Logout => logout(client).await,
        Command::Whoami => whoami(client).await,
        Command::Get { path } => get(client, &path).await,
        Command::SelectAccount { id } => {
            client.select_account(Some(id))?;
            println!("selected account {id}");
            Ok(())
        },
        Command::Watch => watch(client, &mut session).await,
        Command::Import { file_id, broker_id } => {
            import(client, &mut session, file_id, broker_id).await
        },
    };
    report_session_end(&mut session);
    outcome
}

/// Print the expiry notice if the session ended while the command ran.
fn report_session_end(session: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = session.try_recv() {
        if matches!(event, SessionEvent::Ended { .. }) {
            eprintln!("{SESSION_EXPIRED}");
        }
    }
}

fn api_failure(err: GatewayError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn prompt_password() -> Result<SecretString> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(SecretString::new(password))
}

async fn login(client: &FolioClient, username: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => SecretString::new(password),
        None => prompt_password()?,
    };
    let user = client
        .login(username, &password)
        .await
        .map_err(api_failure)?;
    println!("logged in as {} ({})", user.display_name(), user.username);
    Ok(())
}

async fn logout(client: &FolioClient) -> Result<()> {
    client.tokens().load();
    client.logout().await;
    println!("logged out");
    Ok(())
}

async fn require_login(client: &FolioClient) -> Result<AuthStatus> {
    let status = client.initialize().await;
    if !status.is_authenticated() {
        bail!("not logged in, run `folio login` first");
    }
    Ok(status)
}

async fn whoami(client: &FolioClient) -> Result<()> {
    match client.initialize().await {
        AuthStatus::Authenticated(user) => {
            println!("{} ({}, id {})", user.display_name(), user.username, user.id);
            if let Some(email) = &user.email {
                println!("email: {email}");
            }
            if let Some(currency) = &user.default_currency {
                println!("currency: {currency}");
            }
            if let Some(account) = client.selected_account() {
                println!("selected account: {account}");
            }
        },
        AuthStatus::Anonymous => println!("not logged in"),
    }
    Ok(())
}

async fn get(client: &FolioClient, path: &str) -> Result<()> {
    require_login(client).await?;
    let value: serde_json::Value = client
        .gateway()
        .get_json(path)
        .await
        .map_err(api_failure)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_event(event: &RealtimeEvent) {
    match event {
        RealtimeEvent::Opened => println!("connected"),
        RealtimeEvent::Message(ServerMessage::ImportUpdate(update)) => match update.progress() {
            Some(progress) => println!("import: {} ({progress:.0}%)", update.status),
            None => println!("import: {}", update.status),
        },
        RealtimeEvent::Message(ServerMessage::ImportError(error)) => {
            println!("import failed: {}", error.error)
        },
        RealtimeEvent::Message(ServerMessage::Unknown { kind }) => {
            debug!(%kind, "ignoring unknown real-time message");
        },
        RealtimeEvent::Closed { intentional } => {
            if !intentional {
                println!("connection lost");
            }
        },
        RealtimeEvent::ReconnectScheduled { delay } => {
            println!("reconnecting in {}s", delay.as_secs_f32());
        },
    }
}

async fn watch(client: &FolioClient, session: &mut broadcast::Receiver<SessionEvent>) -> Result<()> {
    require_login(client).await?;
    let mut events = client.realtime().subscribe();
    client
        .realtime()
        .connect()
        .await
        .context("failed to open the real-time channel")?;
    println!("watching, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "real-time events dropped"),
                Err(RecvError::Closed) => break,
            },
            event = session.recv() => {
                if let Ok(SessionEvent::Ended { .. }) = event {
                    eprintln!("{SESSION_EXPIRED}");
                    break;
                }
            },
        }
    }

    client.realtime().disconnect();
    Ok(())
}

async fn import(
    client: &FolioClient,
    session: &mut broadcast::Receiver<SessionEvent>,
    file_id: String,
    broker_id: i64,
) -> Result<()> {
    require_login(client).await?;
    let mut events = client.realtime().subscribe();
    client
        .realtime()
        .connect()
        .await
        .context("failed to open the real-time channel")?;
    client
        .realtime()
        .send(&ClientMessage::StartImport {
            file_id: file_id.clone(),
            broker_id,
        })
        .await
        .context("failed to start the import")?;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    match event {
                        RealtimeEvent::Message(ServerMessage::ImportUpdate(update))
                            if update.is_complete() =>
                        {
                            break Ok(());
                        },
                        RealtimeEvent::Message(ServerMessage::ImportError(_)) => {
                            break Err(anyhow::anyhow!("import of {file_id} failed"));
                        },
                        _ => {},
                    }
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "real-time events dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
            event = session.recv() => {
                if let Ok(SessionEvent::Ended { .. }) = event {
                    eprintln!("{SESSION_EXPIRED}");
                    break Ok(());
                }
            },
        }
    };

    client.realtime().disconnect();
    result
}
