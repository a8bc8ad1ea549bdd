//! Notices card changes through the status files scdaemon maintains

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Size and modification time per status file
type Snapshot = BTreeMap<PathBuf, (u64, Option<SystemTime>)>;

fn is_status_file(name: &str) -> bool {
    name.starts_with("reader_") && name.ends_with(".status")
}

fn snapshot(dir: &Path) -> Snapshot {
    let Ok(entries) = fs::read_dir(dir) else {
        return Snapshot::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_status_file))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            Some((entry.path(), (metadata.len(), metadata.modified().ok())))
        })
        .collect()
}

/// Polls `reader_*.status` files and reports changes
///
/// scdaemon rewrites these files whenever a reader or card changes state.
/// Bursts of changes within the debounce delay are reported once.
pub struct StatusFileWatcher {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatusFileWatcher {
    pub fn start(
        dir: &Path,
        poll_interval: Duration,
        delay: Duration,
        on_change: impl Fn() + Send + 'static,
    ) -> Result<Self> {
        let dir = dir.to_path_buf();
        let (stop, stopped) = bounded::<()>(1);
        debug!("Watching {} for reader status files", dir.display());
        // taken before returning so changes made right after start() count
        let mut last = snapshot(&dir);

        let handle = thread::Builder::new()
            .name("scd-status-files".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if snapshot(&dir) == last {
                        continue;
                    }

                    // let the burst settle
                    match stopped.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    last = snapshot(&dir);
                    trace!("Reader status files changed: {:?}", last.keys());
                    on_change();
                }
                debug!("Status file watcher stopped");
            })
            .map_err(Error::ThreadSpawn)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusFileWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_status_file_names() {
        assert!(is_status_file("reader_0.status"));
        assert!(is_status_file("reader_12.status"));
        assert!(!is_status_file("reader_0.status.tmp"));
        assert!(!is_status_file("pubring.kbx"));
    }

    #[test]
    fn test_snapshot_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("reader_0.status"), "USABLE\n").unwrap();
        fs::write(dir.path().join("trustdb.gpg"), "x").unwrap();

        let snapshot = snapshot(dir.path());
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&dir.path().join("reader_0.status")));
    }

    #[test]
    fn test_change_right_after_start_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);

        let watcher = StatusFileWatcher::start(
            dir.path(),
            Duration::from_millis(200),
            Duration::from_millis(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        fs::write(dir.path().join("reader_1.status"), "USABLE\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while changes.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        watcher.stop();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_change_triggers_callback() {
        let dir = tempfile::tempdir().unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);

        let watcher = StatusFileWatcher::start(
            dir.path(),
            Duration::from_millis(10),
            Duration::from_millis(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        fs::write(dir.path().join("reader_0.status"), "PRESENT\n").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while changes.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        watcher.stop();
        assert!(changes.load(Ordering::SeqCst) >= 1);
    }
}
