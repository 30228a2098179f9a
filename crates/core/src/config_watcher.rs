use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Re-reads the configuration file on modification and broadcasts each
/// successfully parsed version. A file that fails to parse is logged and the
/// previous configuration stays in effect.
pub struct ConfigWatcher {
    path: PathBuf,
    tx: watch::Sender<AppConfig>,
}

impl ConfigWatcher {
    /// Creates a new configuration watcher with an initial configuration.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (
            Self {
                path: path.into(),
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watches the configuration file until the watcher fails or every
    /// receiver has been dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self) -> Result<()> {
        let tx = self.tx.clone();
        let config_path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(&config_path, RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if !event.kind.is_modify() {
                    continue;
                }
                tracing::info!(path = %config_path.display(), "Config file changed, reloading...");
                match ConfigLoader::load_from(&config_path) {
                    Ok(new_config) => {
                        let changed = tx.send_if_modified(|current| {
                            if *current == new_config {
                                false
                            } else {
                                *current = new_config;
                                true
                            }
                        });
                        if changed {
                            tracing::info!("Config reloaded successfully");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config");
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
