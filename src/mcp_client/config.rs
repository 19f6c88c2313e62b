//! Server config validation and the file-backed config provider.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::McpError;
use super::types::ServerConfig;
use crate::config::parse_runtime_config;

/// Reject config sets with empty or repeated server ids.
pub fn validate_server_configs(configs: &[ServerConfig]) -> Result<(), McpError> {
    let mut seen = HashSet::new();
    for config in configs {
        if config.id.trim().is_empty() {
            return Err(McpError::ConfigError {
                reason: format!("server with command '{}' has an empty id", config.command),
            });
        }
        if config.id.contains('.') {
            return Err(McpError::ConfigError {
                reason: format!("server id '{}' must not contain '.'", config.id),
            });
        }
        if !seen.insert(config.id.as_str()) {
            return Err(McpError::ConfigError {
                reason: format!("duplicate server id '{}'", config.id),
            });
        }
    }
    Ok(())
}

/// Polls a config file and publishes its server list whenever it changes.
pub struct ConfigFileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

type FileStamp = (Option<SystemTime>, u64);

impl ConfigFileWatcher {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    async fn stamp(&self) -> Option<FileStamp> {
        let meta = tokio::fs::metadata(&self.path).await.ok()?;
        Some((meta.modified().ok(), meta.len()))
    }

    async fn reload(&self) -> Result<Vec<ServerConfig>, McpError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| McpError::ConfigError {
                reason: format!("failed to read {}: {e}", self.path.display()),
            })?;
        Ok(parse_runtime_config(&raw)?.servers)
    }

    /// Start polling. The receiver starts out holding `initial`. Parse errors
    /// are logged and the last good server set stays published.
    pub fn spawn(
        self,
        initial: Vec<ServerConfig>,
        cancel: CancellationToken,
    ) -> (watch::Receiver<Vec<ServerConfig>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut last_stamp = self.stamp().await;
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if tx.is_closed() {
                    break;
                }

                let stamp = self.stamp().await;
                if stamp == last_stamp {
                    continue;
                }
                last_stamp = stamp;

                match self.reload().await {
                    Ok(servers) => {
                        let changed = tx.send_if_modified(|current| {
                            if *current == servers {
                                return false;
                            }
                            *current = servers;
                            true
                        });
                        if changed {
                            tracing::info!(path = %self.path.display(), "server config reloaded");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %self.path.display(), error = %e, "ignoring invalid config update");
                    }
                }
            }
        });

        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_server_configs() {
        assert!(validate_server_configs(&[]).is_ok());
        assert!(validate_server_configs(&[ServerConfig::new("a", "x"), ServerConfig::new("b", "x")]).is_ok());

        for bad in [
            vec![ServerConfig::new("", "x")],
            vec![ServerConfig::new("a", "x"), ServerConfig::new("a", "y")],
            vec![ServerConfig::new("a.b", "x")],
        ] {
            assert!(matches!(
                validate_server_configs(&bad),
                Err(McpError::ConfigError { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_watcher_publishes_changes_and_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-conductor.yaml");
        std::fs::write(&path, "servers:\n  - { id: fs, command: a }\n").unwrap();

        let cancel = CancellationToken::new();
        let watcher = ConfigFileWatcher::new(&path, Duration::from_millis(20));
        let (mut rx, handle) = watcher.spawn(vec![ServerConfig::new("fs", "a")], cancel.clone());

        std::fs::write(&path, "servers: [ { id: fs, command: a }, oops").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().len(), 1);

        std::fs::write(
            &path,
            "servers:\n  - { id: fs, command: a }\n  - { id: git, command: git-server }\n",
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("watcher should publish")
            .unwrap();
        let ids: Vec<String> = rx.borrow_and_update().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["fs", "git"]);

        cancel.cancel();
        handle.await.unwrap();
    }
}
