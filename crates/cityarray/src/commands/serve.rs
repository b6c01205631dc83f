//! `cityarray serve`: the hub.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cityarray_config::Config;
use cityarray_core::{Collaborators, Hub};

use crate::cli::ServeArgs;
use crate::error::CliError;
use crate::server;

/// Build a hub from config: runtime knobs, templates, standing schedule
/// and blackouts.
pub fn build_hub(cfg: &Config) -> Result<Hub, CliError> {
    let collaborators = Collaborators {
        renderer: Arc::new(cfg.renderer()),
        ..Collaborators::default()
    };
    let hub = Hub::with_collaborators(cfg.to_hub_config()?, collaborators)?;

    for entry in cfg.schedule_entries()? {
        hub.upsert_schedule(entry)?;
    }
    hub.set_blackouts(cfg.blackouts()?);
    Ok(hub)
}

pub async fn handle(args: ServeArgs, cfg: &Config) -> Result<(), CliError> {
    let hub = build_hub(cfg)?;

    let addr = args.listen.unwrap_or_else(|| cfg.hub.listen.clone());
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| CliError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(
        schedule = hub.schedule().len(),
        templates = cfg.templates.len(),
        "starting hub"
    );
    hub.start().await;

    let cancel = CancellationToken::new();
    super::cancel_on_ctrl_c(&cancel);
    server::run(hub.clone(), listener, cancel).await;

    hub.shutdown().await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cityarray_core::ZoneId;

    #[test]
    fn example_config_builds_a_hub() {
        let hub = build_hub(&Config::example()).unwrap();
        assert_eq!(hub.schedule().len(), 1);
        let cache = hub.cache_for(&ZoneId::from("A"));
        assert_eq!(cache.templates.len(), 1);
        assert_eq!(cache.templates[0].id, "sponsor");
    }

    #[test]
    fn bad_schedule_is_rejected_before_start() {
        let mut cfg = Config::example();
        cfg.schedule[0].start = "25:00".into();
        assert!(matches!(
            build_hub(&cfg),
            Err(CliError::Validation { .. })
        ));
    }
}
