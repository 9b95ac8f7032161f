use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;
use tokio::sync::watch;

/// How often the blocking loop checks whether every receiver is gone.
const RECEIVER_POLL: Duration = Duration::from_millis(500);

/// Reloads the configuration file on change and publishes it on a watch channel.
///
/// Sessions subscribe and push updated risk limits through their setter; a file that fails to
/// parse keeps the previous configuration in effect.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Creates a watcher for `path` seeded with `initial_config`.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (
            Self {
                tx,
                path: path.into(),
            },
            rx,
        )
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.tx.subscribe()
    }

    /// Re-reads the file once and publishes the result when it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed.
    pub fn reload(&self) -> Result<bool> {
        let config = ConfigLoader::load_from(&self.path)?;
        Ok(self.tx.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        }))
    }

    /// Watches the configuration file for changes and broadcasts updates.
    ///
    /// Runs until the file watcher shuts down or every receiver has been dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(self) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(Path::new(&self.path), RecursiveMode::NonRecursive)?;

            loop {
                let event = match notify_rx.recv_timeout(RECEIVER_POLL) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) if self.tx.is_closed() => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                if event.kind.is_modify() {
                    tracing::info!(path = %self.path.display(), "Config file changed, reloading");
                    match self.reload() {
                        Ok(true) => tracing::info!("Config reloaded successfully"),
                        Ok(false) => tracing::debug!("Config unchanged after reload"),
                        Err(e) => tracing::error!(error = %e, "Failed to reload config"),
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
