//! SyncBoard CLI - sign in to a SyncBoard server and issue authenticated
//! requests from the terminal.
//!
//! The session survives between runs through the configured durable store.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use syncboard_core::api::{ApiClient, Method};
use syncboard_core::models::{RegisterRequest, UserProfile};
use syncboard_core::{Config, Response, SessionStore};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: syncboard <command> [args]

Commands:
  status                      Show whether a session is active
  login [email]               Sign in (prompts for password)
  register <email> <name>     Create an account and sign in
  logout                      End the current session
  whoami                      Fetch the current user's profile
  get <path>                  GET a path relative to the API URL
  delete <path>               DELETE a path
  post <path> <json>          POST a JSON body
  patch <path> <json>         PATCH a JSON body";

/// Route core logs to stderr so stdout stays clean for JSON output
fn init_tracing() {
    // RUST_LOG=syncboard_core=debug shows every dispatched request
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let session = Arc::new(SessionStore::initialize(config.open_store()));
    let api = ApiClient::from_config(&config, session.clone())?;
    info!(authenticated = session.is_authenticated(), "SyncBoard CLI starting");

    match (command.as_str(), &args[1..]) {
        ("status", []) => print_status(&session),
        ("login", rest) => {
            let email = match rest.first() {
                Some(email) => email.clone(),
                None => prompt_email(config.last_email.as_deref())?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let profile = api.login_with_password(&email, &password).await?;

            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Signed in as {}", profile.display_name);
        }
        ("register", [email, display_name]) => {
            let password = rpassword::prompt_password("Choose a password: ")?;
            let request = RegisterRequest {
                email: email.clone(),
                display_name: display_name.clone(),
                password,
            };
            let profile = api.register_and_login(&request).await?;
            println!("Registered and signed in as {}", profile.display_name);
        }
        ("logout", []) => {
            api.logout();
            println!("Signed out");
        }
        ("whoami", []) => match api.refresh_identity().await? {
            Some(profile) => print_json(&serde_json::to_value(profile)?)?,
            None => eprintln!("Not signed in."),
        },
        ("get", [path]) => raw_request(&api, Method::GET, path, None).await?,
        ("delete", [path]) => raw_request(&api, Method::DELETE, path, None).await?,
        ("post", [path, body]) => {
            let body = parse_body(body)?;
            raw_request(&api, Method::POST, path, Some(&body)).await?
        }
        ("patch", [path, body]) => {
            let body = parse_body(body)?;
            raw_request(&api, Method::PATCH, path, Some(&body)).await?
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn print_status(session: &SessionStore) {
    if !session.is_authenticated() {
        println!("Not signed in");
        return;
    }
    let name = session
        .identity()
        .and_then(|identity| identity.decode::<UserProfile>().ok())
        .map(|profile| format!("{} <{}>", profile.display_name, profile.email));
    match name {
        Some(name) => println!("Signed in as {}", name),
        None => println!("Signed in"),
    }
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let entered = line.trim();
    match (entered.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => Err(anyhow::anyhow!("Email required")),
        (false, _) => Ok(entered.to_string()),
    }
}

fn parse_body(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("Request body must be valid JSON")
}

async fn raw_request(
    api: &ApiClient,
    method: Method,
    path: &str,
    body: Option<&Value>,
) -> Result<()> {
    match api.send::<Value, Value>(method, path, body).await? {
        Response::Data(data) => print_json(&data),
        Response::SessionExpired => {
            eprintln!("Session expired. Please log in again.");
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
