use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

/// Watches the data directory and sends `signal` whenever the checkpoint file
/// is created, rewritten or removed. Dropping it stops the watch.
pub struct CheckpointWatcher {
    _watcher: RecommendedWatcher,
}

impl CheckpointWatcher {
    pub fn spawn<E: Clone + Send + 'static>(
        checkpoint: &Path,
        tx: Sender<E>,
        signal: E,
    ) -> notify::Result<Self> {
        let dir = checkpoint
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let target: Option<OsString> = checkpoint.file_name().map(OsStr::to_os_string);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if touches(&event, target.as_deref()) {
                        debug!(kind = ?event.kind, "checkpoint changed on disk");
                        let _ = tx.send(signal.clone());
                    }
                }
                Err(e) => warn!(error = %e, "checkpoint watch error"),
            }
        })?;

        // The store replaces the file by rename, so the directory is watched
        // rather than the file itself.
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching checkpoint");

        Ok(Self { _watcher: watcher })
    }
}

fn touches(event: &Event, target: Option<&OsStr>) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| p.file_name() == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{CycleMeta, CycleStore};
    use crate::store::FileStore;
    use chrono::Utc;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RenameMode};
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn only_checkpoint_mutations_count() {
        let name = Some(OsStr::new("cycle-meta.json"));
        let meta = PathBuf::from("/data/cycle-meta.json");
        let tmp = PathBuf::from("/data/cycle-meta.json.42.tmp");

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(meta.clone());
        assert!(touches(&renamed, name));

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(meta.clone());
        assert!(touches(&created, name));

        let read = Event::new(EventKind::Access(AccessKind::Any)).add_path(meta);
        assert!(!touches(&read, name));

        let temp_write = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(tmp);
        assert!(!touches(&temp_write, name));
    }

    #[test]
    fn signals_a_checkpoint_rewrite_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let (tx, rx) = mpsc::channel();
        let _watcher =
            CheckpointWatcher::spawn(&store.path_for("cycle-meta"), tx, "changed").unwrap();

        fs::write(dir.path().join("app-state.json"), "{}").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        store.save_checkpoint(&CycleMeta::fresh(Utc::now())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("changed"));
    }
}
