//! Operator CLI for the steward Core.
//!
//! Maps each subcommand onto one control-plane RPC. Service ids are
//! dash-separated `remoteID-localID` tuples; a malformed id fails
//! locally without contacting the Core.

use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use steward_core::messages::{requests, Action, ControlReply, ControlRequest};
use steward_core::RemoteSummary;
use steward_server::config::defaults;
use steward_server::rpc::client;
use steward_server::CoreError;

#[derive(Debug, Parser)]
#[command(name = "stewardctl", about = "Operator CLI for the steward core", version)]
struct Cli {
    /// Control endpoint of the Core.
    #[arg(long, default_value = defaults::CONTROL_ADDRESS)]
    address: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every service and remote container.
    List,
    /// List with per-service detail.
    Report,
    /// Restart every managed service.
    RestartAll,
    /// Show one service by `remoteID-localID`.
    ListOne { id: String },
    /// Restart one service by `remoteID-localID`.
    RestartOne { id: String },
    /// Shut the Core down.
    Shutdown,
    /// Check that the Core answers.
    Status,
}

fn split_id(id: &str) -> anyhow::Result<(String, String)> {
    match id.split_once('-') {
        Some((remote, local)) if !remote.is_empty() && !local.is_empty() => {
            Ok((remote.to_string(), local.to_string()))
        }
        _ => Err(anyhow!("could not parse id: {id} (expected remoteID-localID)")),
    }
}

async fn call(address: &str, request: ControlRequest, deadline: Duration) -> anyhow::Result<ControlReply> {
    match client::call_control(address, request, deadline).await {
        Ok(reply) => Ok(reply),
        Err(CoreError::Unreachable { .. }) => bail!("could not connect to the Core"),
        Err(err) => bail!(err.code().to_string()),
    }
}

fn print_remotes(remotes: &[RemoteSummary], detailed: bool) {
    for remote in remotes {
        println!(
            "remote {} ({})",
            remote.id,
            remote.address.as_deref().unwrap_or("unknown")
        );
        if let Some(error) = &remote.error {
            println!("  error: {error}");
        }
        for service in &remote.services {
            let id = service.id.as_deref().unwrap_or("-");
            let address = service.address.as_deref().unwrap_or("-");
            let state = service.state.map_or("-", |s| s.as_str());
            println!("  {}-{id}  {}  {address}  {state}", remote.id, service.name);
            if detailed {
                let mode = service.mode.map_or("-", |m| m.as_str());
                println!("      mode={mode} peerGroups={:?}", service.peer_groups);
                for err in &service.errors {
                    println!("      error: {err}");
                }
            }
        }
    }
}

fn print_reply(reply: &ControlReply, detailed: bool) {
    match reply {
        ControlReply::Status { status } => println!("{status}"),
        ControlReply::Summary { remotes, error } => {
            if let Some(error) = error {
                println!("error: {error}");
            }
            print_remotes(remotes, detailed);
        }
        ControlReply::Error { error } => println!("error: {error}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let address = cli.address;

    match cli.command {
        Command::List => {
            let reply = call(
                &address,
                ControlRequest::Summary(Action::request(requests::SUMMARY_ALL)),
                Duration::from_secs(1),
            )
            .await?;
            print_reply(&reply, false);
        }
        Command::Report => {
            let reply = call(
                &address,
                ControlRequest::Summary(Action::request(requests::SUMMARY_ALL)),
                Duration::from_secs(1),
            )
            .await?;
            print_reply(&reply, true);
        }
        Command::RestartAll => {
            let reply = call(
                &address,
                ControlRequest::Restart(Action::request(requests::RESTART_ALL)),
                Duration::from_secs(1),
            )
            .await?;
            print_reply(&reply, false);
        }
        Command::ListOne { id } => {
            let (remote_id, target) = split_id(&id)?;
            let action = Action {
                request: requests::SUMMARY_ONE.to_string(),
                target: Some(target),
                remote_id: Some(remote_id),
            };
            let reply = call(
                &address,
                ControlRequest::Summary(action),
                Duration::from_secs(5),
            )
            .await?;
            print_reply(&reply, true);
        }
        Command::RestartOne { id } => {
            let (remote_id, target) = split_id(&id)?;
            let action = Action {
                request: requests::RESTART_ONE.to_string(),
                target: Some(target),
                remote_id: Some(remote_id),
            };
            let reply = call(
                &address,
                ControlRequest::Restart(action),
                Duration::from_secs(20),
            )
            .await?;
            print_reply(&reply, false);
        }
        Command::Shutdown => {
            let reply = call(&address, ControlRequest::Stop, Duration::from_secs(1)).await?;
            print_reply(&reply, false);
        }
        Command::Status => {
            let reply = call(&address, ControlRequest::Status, Duration::from_secs(1)).await?;
            print_reply(&reply, false);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_ids_split() {
        assert_eq!(
            split_id("core-101").unwrap(),
            ("core".to_string(), "101".to_string())
        );
        assert_eq!(
            split_id("r2-svc-a").unwrap(),
            ("r2".to_string(), "svc-a".to_string())
        );
    }

    #[test]
    fn malformed_ids_fail_locally() {
        for bad in ["core", "-101", "core-", ""] {
            assert!(split_id(bad).is_err(), "{bad} should not parse");
        }
    }
}
