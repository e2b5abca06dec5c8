//! Debounced workspace watcher.
//!
//! Emits a payload-free "workspace changed" signal: editors produce a
//! storm of rename/truncate/write events per save, and the consumer
//! always re-runs the full test command anyway. A 200 ms coalescing
//! window turns each burst into at most one signal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Coalescing window for filesystem event bursts.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// Directory names never treated as agent edits.
const IGNORED_DIRS: [&str; 2] = [".sanity-cache", ".git"];

/// Recursive watcher over one workspace root.
pub struct WorkspaceWatcher {
    // Dropping the notify watcher unsubscribes from the OS.
    _watcher: RecommendedWatcher,
    signals: mpsc::Receiver<()>,
    debouncer: JoinHandle<()>,
}

impl WorkspaceWatcher {
    /// Starts watching `root`. Events touching `ignored_files` (hidden
    /// test names), `.sanity-cache/`, or `.git/` never produce signals.
    pub fn start(
        root: &Path,
        ignored_files: HashSet<String>,
    ) -> Result<Self, notify::Error> {
        let root = root.to_path_buf();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<()>();

        let filter_root = root.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                let Ok(event) = res else { return };
                if event
                    .paths
                    .iter()
                    .any(|p| is_editable(&filter_root, p, &ignored_files))
                {
                    // Receiver gone means the session stopped; nothing to do.
                    let _ = raw_tx.send(());
                }
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (signal_tx, signal_rx) = mpsc::channel(1);
        let debouncer = tokio::spawn(debounce(raw_rx, signal_tx));

        debug!(root = %root.display(), "Watching workspace");
        Ok(Self {
            _watcher: watcher,
            signals: signal_rx,
            debouncer,
        })
    }

    /// Waits for the next debounced change signal. Returns `None` once
    /// the watcher has been stopped.
    pub async fn changed(&mut self) -> Option<()> {
        self.signals.recv().await
    }

    /// Stops the watcher, closing the signal channel and discarding any
    /// pending events.
    pub fn stop(self) {
        self.debouncer.abort();
        // `self._watcher` drops here, detaching the OS subscription.
    }
}

/// Collapses raw event bursts into one signal per window.
async fn debounce(mut raw: mpsc::UnboundedReceiver<()>, signals: mpsc::Sender<()>) {
    while raw.recv().await.is_some() {
        // Swallow the rest of the burst.
        let window = tokio::time::sleep(DEBOUNCE_WINDOW);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                more = raw.recv() => {
                    if more.is_none() {
                        return;
                    }
                    trace!("Coalesced filesystem event");
                }
            }
        }
        if signals.send(()).await.is_err() {
            return;
        }
    }
}

/// Whether a changed path counts as an agent edit.
fn is_editable(root: &Path, path: &Path, ignored_files: &HashSet<String>) -> bool {
    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return false,
    };

    for component in relative.components() {
        let name = component.as_os_str().to_string_lossy();
        if IGNORED_DIRS.contains(&name.as_ref()) {
            return false;
        }
    }

    if let Some(name) = relative.file_name().map(|n| n.to_string_lossy()) {
        if ignored_files.contains(name.as_ref()) {
            return false;
        }
    }
    true
}

/// Convenience for building the ignore set from hidden file paths.
pub fn hidden_file_names<'a>(paths: impl IntoIterator<Item = &'a String>) -> HashSet<String> {
    paths
        .into_iter()
        .filter_map(|p| {
            PathBuf::from(p)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .collect()
}
