//! `cityarray sign`: the sign agent.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cityarray_agent::{
    AgentConfig, DisplaySink, FixedStatus, LocalCommand, SignAgent, TracingDisplay,
};
use cityarray_config::Config;
use cityarray_core::Decision;

use crate::cli::SignArgs;
use crate::error::CliError;

/// Writes whatever the sign would show to stdout, one line per change.
struct StdoutDisplay;

impl DisplaySink for StdoutDisplay {
    fn show(&self, decision: &Decision) {
        println!(
            "[{:?} p{}] {}",
            decision.source,
            decision.priority.value(),
            decision.content
        );
    }

    fn blank(&self) {
        println!("[blank]");
    }
}

fn agent_config(args: &SignArgs, cfg: &Config) -> Result<AgentConfig, CliError> {
    let mut config = cfg.to_agent_config()?;
    if let Some(id) = &args.id {
        config.sign_id = id.as_str().into();
    }
    if let Some(zone) = &args.zone {
        config.zone = Some(zone.as_str().into());
    }
    if let Some(server) = &args.server {
        config.server.clone_from(server);
    }
    config.validate()?;
    Ok(config)
}

pub async fn handle(args: SignArgs, cfg: &Config) -> Result<(), CliError> {
    let config = agent_config(&args, cfg)?;

    let display: Arc<dyn DisplaySink> = if args.console {
        Arc::new(StdoutDisplay)
    } else {
        Arc::new(TracingDisplay)
    };
    let agent = SignAgent::new(config, display, Arc::new(FixedStatus::default()))?;

    let cancel = CancellationToken::new();
    super::cancel_on_ctrl_c(&cancel);

    let (local_tx, local_rx) = mpsc::channel(16);
    if args.console {
        eprintln!("Local commands: evacuate, shelter, medical, weather, clear, reconnect");
        tokio::spawn(read_console(local_tx, cancel.clone()));
    }

    agent.run(cancel, local_rx).await?;
    Ok(())
}

/// Feed stdin lines to the agent. Unknown words are reported and skipped.
async fn read_console(tx: mpsc::Sender<LocalCommand>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match LocalCommand::parse(&line) {
                Ok(cmd) => {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args() -> SignArgs {
        SignArgs {
            id: None,
            zone: None,
            server: None,
            console: false,
        }
    }

    #[test]
    fn flags_override_config() {
        let cfg = Config::default();
        let config = agent_config(
            &SignArgs {
                id: Some("gate-3".into()),
                zone: Some("north".into()),
                server: Some("ws://10.0.0.5:8000".into()),
                ..args()
            },
            &cfg,
        )
        .unwrap();
        assert_eq!(config.sign_id.as_str(), "gate-3");
        assert_eq!(config.zone.unwrap().as_str(), "north");
        assert_eq!(config.server, "ws://10.0.0.5:8000");
    }

    #[test]
    fn unusable_server_is_rejected() {
        let cfg = Config::default();
        let result = agent_config(
            &SignArgs {
                server: Some("not a url".into()),
                ..args()
            },
            &cfg,
        );
        assert!(matches!(result, Err(CliError::Validation { .. })));
    }
}
