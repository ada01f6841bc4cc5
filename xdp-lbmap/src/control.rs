//! Action dispatch.
//!
//! Loads the forward table once and runs the configured action against it.
//! Nothing here exits the process; the outcome goes back to `main`.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{Action, Config};
use crate::map_controller::{MapController, TableEntry, TableSource};
use crate::rules;

/// What a completed action produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Listed(Vec<TableEntry>),
    BatchInserted,
    Inserted,
    Deleted,
    /// The rule API stopped after a shutdown signal.
    Served,
}

pub async fn run<S, F>(
    config: &Config,
    mut controller: MapController<S>,
    shutdown: F,
) -> Result<Outcome>
where
    S: TableSource,
    F: Future<Output = ()> + Send + 'static,
{
    controller
        .load(&config.map)
        .with_context(|| format!("load mapper for {}", config.map.display()))?;

    info!(
        action = ?config.action,
        map = ?controller.path(),
        "running action"
    );

    let outcome = match config.action {
        Action::List => Outcome::Listed(controller.list().context("get map item error")?),
        Action::BatchInsert => {
            controller
                .batch_insert()
                .context("batch insert map item error")?;
            Outcome::BatchInserted
        }
        Action::Insert => {
            let rule = &config.rule;
            let token = rule.token.as_deref().context("insert requires token")?;
            let address = rule.gsaddress.as_deref().context("insert requires gsaddress")?;
            let port = rule.gsport.as_deref().context("insert requires gsport")?;
            controller
                .insert(address, port, token)
                .context("insert map item error")?;
            Outcome::Inserted
        }
        Action::Delete => {
            let token = config.rule.token.as_deref().context("delete requires token")?;
            controller.delete(token).context("delete map item error")?;
            Outcome::Deleted
        }
        Action::Serve => {
            let controller = Arc::new(Mutex::new(controller));
            rules::serve(config.server.bind, controller, shutdown)
                .await
                .context("boot lbmap server error")?;
            Outcome::Served
        }
    };

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::error::Error;
    use crate::map_controller::testing::*;

    fn config(action: Action) -> Config {
        Config {
            map: TEST_PIN.into(),
            action,
            ..Default::default()
        }
    }

    fn controller() -> MapController<MemorySource> {
        MapController::new(MemorySource::default())
    }

    #[tokio::test]
    async fn test_list_empty_table() {
        let outcome = run(&config(Action::List), controller(), async {})
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Listed(Vec::new()));
    }

    #[tokio::test]
    async fn test_insert_action() {
        let mut cfg = config(Action::Insert);
        cfg.rule = RuleConfig {
            token: Some("6161616161616161".into()),
            gsaddress: Some("1.2.3.4".into()),
            gsport: Some("9000".into()),
        };
        let outcome = run(&cfg, controller(), async {}).await.unwrap();
        assert_eq!(outcome, Outcome::Inserted);
    }

    #[tokio::test]
    async fn test_insert_action_bad_token() {
        let mut cfg = config(Action::Insert);
        cfg.rule = RuleConfig {
            token: Some("6161".into()),
            gsaddress: Some("1.2.3.4".into()),
            gsport: Some("9000".into()),
        };
        let err = run(&cfg, controller(), async {}).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::BadToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_token_entry() {
        let mut cfg = config(Action::Delete);
        cfg.rule.token = Some("6161616161616161".into());
        let err = run(&cfg, controller(), async {}).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DeleteFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_insert_action() {
        let outcome = run(&config(Action::BatchInsert), controller(), async {})
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::BatchInserted);
    }

    #[tokio::test]
    async fn test_load_failure_short_circuits() {
        for action in [
            Action::List,
            Action::BatchInsert,
            Action::Delete,
            Action::Serve,
        ] {
            let mut cfg = config(action);
            cfg.map = "/tmp/missing".into();
            cfg.rule.token = Some("6161616161616161".into());
            let err = run(&cfg, controller(), async {}).await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::LoadFailed { .. })
            ));
            assert!(err.to_string().contains("load mapper for /tmp/missing"));
        }
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let mut cfg = config(Action::Serve);
        cfg.server.bind = "127.0.0.1:0".parse().unwrap();
        let outcome = run(&cfg, controller(), async {}).await.unwrap();
        assert_eq!(outcome, Outcome::Served);
    }
}
