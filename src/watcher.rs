//! Config Watcher - Hot Reload
//!
//! Watches the configuration directory and pushes written files into the
//! cache engine.
//!
//! Filesystem notifications are forwarded into a bounded channel and
//! consumed by a single task, so reloads never race each other. Events that
//! arrive together are de-duplicated per path: a burst of writes to one
//! file reloads it once.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{is_config_file, CacheEngine};
use crate::error::Result;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the config watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory to watch (recursively)
    pub config_dir: PathBuf,

    /// Pending notifications buffered before the notifier blocks
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("."),
            channel_capacity: 256,
        }
    }
}

impl WatcherConfig {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Watcher
// =============================================================================

type Notification = notify::Result<Event>;

/// Running watcher: the OS notifier plus the reload task
pub struct ConfigWatcher {
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `config.config_dir`. The reload task runs until
    /// `shutdown` is cancelled.
    pub fn spawn(
        config: WatcherConfig,
        engine: Arc<CacheEngine>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Notification>(config.channel_capacity.max(1));

        let mut watcher = notify::recommended_watcher(move |event: Notification| {
            // Runs on the notifier thread; blocking applies backpressure.
            // An error only means the reload task has stopped.
            let _ = tx.blocking_send(event);
        })?;
        watcher.watch(&config.config_dir, RecursiveMode::Recursive)?;

        info!("Watching {} for updates", config.config_dir.display());

        let task = tokio::spawn(run_reload_loop(engine, rx, shutdown));
        Ok(Self { watcher, task })
    }

    /// Stop notifications and wait for the reload task to finish. The task
    /// exits once the shutdown token is cancelled or the channel drains.
    pub async fn join(self) {
        drop(self.watcher);
        if let Err(e) = self.task.await {
            error!("Config watcher task failed: {}", e);
        }
    }
}

/// Consume notifications until `shutdown` is cancelled or every sender is
/// gone, reloading each written configuration file.
pub async fn run_reload_loop(
    engine: Arc<CacheEngine>,
    mut rx: mpsc::Receiver<Notification>,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }

        for path in reload_targets(batch) {
            info!("Modified file: {}", path.display());
            let engine = Arc::clone(&engine);
            let target = path.clone();
            match tokio::task::spawn_blocking(move || engine.load_file(&target)).await {
                Ok(Ok(count)) => debug!("Reloaded {} urls from {}", count, path.display()),
                Ok(Err(e)) => warn!("Failed to reload {}: {}", path.display(), e),
                Err(e) => error!("Reload of {} panicked: {}", path.display(), e),
            }
        }
    }

    info!("Config watcher stopped");
}

/// Configuration files written in a batch of notifications, de-duplicated
pub fn reload_targets(batch: impl IntoIterator<Item = Notification>) -> BTreeSet<PathBuf> {
    let mut targets = BTreeSet::new();
    for notification in batch {
        match notification {
            Ok(event) if is_write(&event.kind) => {
                targets.extend(event.paths.into_iter().filter(|p| is_config_file(p)));
            }
            Ok(event) => debug!("Ignoring event: {:?}", event.kind),
            Err(e) => warn!("Watch error: {}", e),
        }
    }
    targets
}

fn is_write(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EngineConfig, UrlInfo, UrlKey};
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    fn write_event(path: &Path) -> Notification {
        Ok(
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(path.to_path_buf()),
        )
    }

    #[test]
    fn test_reload_targets_filters_and_dedups() {
        let json = PathBuf::from("/cfg/urls.json");
        let batch = vec![
            write_event(&json),
            write_event(&json),
            Ok(Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
                .add_path(json.clone())),
            write_event(Path::new("/cfg/notes.txt")),
            Ok(Event::new(EventKind::Create(CreateKind::File)).add_path("/cfg/new.json".into())),
            Ok(Event::new(EventKind::Remove(RemoveKind::File)).add_path("/cfg/old.json".into())),
            Err(notify::Error::generic("boom")),
        ];

        let targets = reload_targets(batch);
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), vec![json]);
    }

    #[tokio::test]
    async fn test_reload_loop_loads_written_file() {
        let cache = tempfile::tempdir().unwrap();
        let cfg = tempfile::tempdir().unwrap();
        let engine =
            Arc::new(CacheEngine::new(EngineConfig::new(31, 100, cache.path())).unwrap());

        let file = cfg.path().join("urlcfg3.json");
        fs::write(
            &file,
            r#"{"urls":[{"host":"www.espn.com:80","path":"programming","category":"sports","safe":true}]}"#,
        )
        .unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(write_event(&file)).await.unwrap();
        tx.send(write_event(&file)).await.unwrap();
        drop(tx);

        run_reload_loop(Arc::clone(&engine), rx, CancellationToken::new()).await;

        assert_eq!(
            engine.get(&UrlKey::new("www.espn.com:80", "programming")),
            UrlInfo::new("sports", true)
        );
        assert_eq!(engine.occupancy(), 1);
    }

    #[tokio::test]
    async fn test_reload_loop_survives_bad_file() {
        let cache = tempfile::tempdir().unwrap();
        let cfg = tempfile::tempdir().unwrap();
        let engine =
            Arc::new(CacheEngine::new(EngineConfig::new(31, 100, cache.path())).unwrap());

        let bad = cfg.path().join("bad.json");
        fs::write(&bad, "{").unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(write_event(&bad)).await.unwrap();
        drop(tx);

        run_reload_loop(Arc::clone(&engine), rx, CancellationToken::new()).await;
        assert_eq!(engine.occupancy(), 0);
    }

    #[tokio::test]
    async fn test_reload_loop_stops_on_shutdown() {
        let cache = tempfile::tempdir().unwrap();
        let engine =
            Arc::new(CacheEngine::new(EngineConfig::new(31, 100, cache.path())).unwrap());

        let (_tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_reload_loop(engine, rx, shutdown),
        )
        .await
        .expect("reload loop should stop once cancelled");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watcher_reloads_file_written_after_spawn() {
        let cache = tempfile::tempdir().unwrap();
        let cfg = tempfile::tempdir().unwrap();
        let engine =
            Arc::new(CacheEngine::new(EngineConfig::new(31, 100, cache.path())).unwrap());
        let shutdown = CancellationToken::new();
        let watcher = ConfigWatcher::spawn(
            WatcherConfig::new(cfg.path()),
            Arc::clone(&engine),
            shutdown.clone(),
        )
        .unwrap();

        fs::write(
            cfg.path().join("urlcfg.json"),
            r#"{"urls":[{"host":"www.nba.com:80","path":"scores","category":"sports","safe":true}]}"#,
        )
        .unwrap();

        let key = UrlKey::new("www.nba.com:80", "scores");
        let loaded = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if !engine.get(&key).is_unknown() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(loaded.is_ok(), "written file was never reloaded");
        assert_eq!(engine.get(&key), UrlInfo::new("sports", true));

        shutdown.cancel();
        watcher.join().await;
    }
}
