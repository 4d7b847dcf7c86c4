// Command handler for the bottle CLI

use crate::relay::cli::{BottleCommand, ConnectArgs, ServeArgs};
use crate::relay::client::RelayClient;
use crate::relay::server::{RelayConfig, RelayServer};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::time::Duration;

/// Execute a bottle command
pub async fn execute_command(command: BottleCommand) -> Result<()> {
    match command {
        BottleCommand::Serve(args) => handle_serve(args).await,
        BottleCommand::Push {
            conn,
            dest,
            author,
            age,
            subject,
            message,
            fields,
        } => {
            let mut request = base_request("push", &dest);
            insert_opt(&mut request, "Author", author);
            if let Some(age) = age {
                request.insert("Age".to_string(), age_value(&age));
            }
            insert_opt(&mut request, "Subject", subject);
            insert_opt(&mut request, "Message", message);
            for (key, value) in fields {
                request.insert(key, Value::String(value));
            }
            handle_request(&conn, Value::Object(request)).await
        }
        BottleCommand::Pull {
            conn,
            dest,
            author,
            age,
            subject,
            message,
            peek,
        } => {
            let action = if peek { "pullr" } else { "pull" };
            let mut request = base_request(action, &dest);
            insert_opt(&mut request, "Query_Author", author);
            insert_opt(&mut request, "Query_Age", age);
            insert_opt(&mut request, "Query_Subject", subject);
            insert_opt(&mut request, "Query_Message", message);
            handle_request(&conn, Value::Object(request)).await
        }
        BottleCommand::Send { conn, request } => {
            let request: Value =
                serde_json::from_str(&request).context("Request is not valid JSON")?;
            handle_request(&conn, request).await
        }
    }
}

async fn handle_serve(args: ServeArgs) -> Result<()> {
    let mut config = RelayConfig::new(args.socket.clone(), args.db_path());
    config.name = args.name.clone();
    config.indicator_lines = args.indicator_lines();

    let server = RelayServer::start(config).await?;

    wait_for_shutdown_signal().await?;

    server.shutdown().await
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}

async fn handle_request(conn: &ConnectArgs, request: Value) -> Result<()> {
    let mut client = RelayClient::connect(&conn.socket, Duration::from_secs(conn.timeout)).await?;
    let reply = client.request(&request).await?;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

fn base_request(action: &str, dest: &str) -> Map<String, Value> {
    let mut request = Map::new();
    request.insert("Action".to_string(), Value::String(action.to_string()));
    request.insert("Dest".to_string(), Value::String(dest.to_string()));
    request
}

fn insert_opt(request: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        request.insert(key.to_string(), Value::String(value));
    }
}

/// Whole-number ages are sent as numbers
fn age_value(age: &str) -> Value {
    age.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(age.to_string()))
}
