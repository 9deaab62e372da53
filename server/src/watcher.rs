//! Turns rewrites of the configuration file into lifecycle events

use crate::config::Config;
use crate::event::Event;
use log::{debug, error};
use notify::event::{DataChange, ModifyKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Watches the config file's directory and emits an event whenever the
/// loaded config changes
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn start(path: &Path, events: mpsc::Sender<Event>) -> notify::Result<Self> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = fs_tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("watching {} for config changes", dir.display());

        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(watch_config(path, fs_rx, events, stopped));

        Ok(Self {
            _watcher: watcher,
            stop,
            task,
        })
    }

    pub async fn stop(self) {
        self.stop.send_replace(true);
        if let Err(e) = self.task.await {
            error!("config watcher panicked: {}", e);
        }
    }
}

async fn watch_config(
    path: PathBuf,
    mut fs_events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    events: mpsc::Sender<Event>,
    mut stopped: watch::Receiver<bool>,
) {
    // One rewrite raises several notifications
    let mut last: Option<Config> = None;

    loop {
        let fs_event = tokio::select! {
            _ = stopped.changed() => break,
            fs_event = fs_events.recv() => match fs_event {
                Some(fs_event) => fs_event,
                None => break,
            },
        };

        match fs_event {
            Ok(fs_event) if is_config_write(&fs_event, &path) => {}
            Ok(_) => continue,
            Err(e) => {
                error!("error watching files: {}", e);
                continue;
            }
        }

        let config = match Config::from_file(&path) {
            Ok(config) => config,
            Err(e) if e.is_truncated() => continue,
            Err(e) => {
                error!("error loading config: {}", e);
                continue;
            }
        };

        if last.as_ref() == Some(&config) {
            continue;
        }
        last = Some(config.clone());

        let event = Event::from_config(config);
        debug!("config change: {}", event.name());
        if events.send(event).await.is_err() {
            break;
        }
    }
}

/// True for content writes or creation of exactly `path`.
fn is_config_write(event: &notify::Event, path: &Path) -> bool {
    let written = matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Data(DataChange::Any | DataChange::Content))
    );

    written && event.paths.iter().any(|p| p == path)
}
