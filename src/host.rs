//! The single-threaded cooperative context that owns the selections.
//!
//! In the desktop application this role belongs to the GUI main loop; here it
//! is reduced to the narrow interface the protocol core needs: present a
//! window, read a selection, write a selection. [`HostLoop`] drains the task
//! queue fed by the cross-thread bridge, polls the selections for changes to
//! record into history, and swaps in fresh config snapshots when the config
//! directory changes on disk.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::history::{HistoryStore, Which};
use crate::ipc::bridge::HostTask;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);
const TASK_WAIT: Duration = Duration::from_millis(50);

/// What the host application exposes to the bridge core.
pub trait SelectionHost: Send {
    /// Bring the host's window to the foreground (no-op for headless hosts).
    fn present(&mut self);
    /// Current text of the given selection channel; empty when unavailable.
    fn selection(&mut self, which: Which) -> String;
    /// Replace the given selection channel's text.
    fn set_selection(&mut self, which: Which, text: &str);
}

/// In-memory selections. Used by tests and as the fallback when no clipboard
/// backend is available. Clones share state so tests can observe effects.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    clipboard: String,
    primary: String,
    presented: usize,
}

impl MemoryHost {
    pub fn current(&self, which: Which) -> String {
        let inner = self.inner.lock().unwrap();
        match which {
            Which::Clipboard => inner.clipboard.clone(),
            Which::Primary => inner.primary.clone(),
        }
    }

    pub fn presented(&self) -> usize {
        self.inner.lock().unwrap().presented
    }
}

impl SelectionHost for MemoryHost {
    fn present(&mut self) {
        self.inner.lock().unwrap().presented += 1;
    }

    fn selection(&mut self, which: Which) -> String {
        self.current(which)
    }

    fn set_selection(&mut self, which: Which, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        match which {
            Which::Clipboard => inner.clipboard = text.to_string(),
            Which::Primary => inner.primary = text.to_string(),
        }
    }
}

/// Selections backed by the desktop clipboard. On Linux the primary channel
/// maps to the primary selection; elsewhere it falls back to the clipboard.
pub struct SystemHost {
    clipboard: arboard::Clipboard,
}

impl SystemHost {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            clipboard: arboard::Clipboard::new()?,
        })
    }

    #[cfg(target_os = "linux")]
    fn primary_text(&mut self) -> String {
        use arboard::{GetExtLinux, LinuxClipboardKind};
        self.clipboard
            .get()
            .clipboard(LinuxClipboardKind::Primary)
            .text()
            .unwrap_or_default()
    }

    #[cfg(target_os = "linux")]
    fn set_primary(&mut self, text: &str) {
        use arboard::{LinuxClipboardKind, SetExtLinux};
        if let Err(e) = self
            .clipboard
            .set()
            .clipboard(LinuxClipboardKind::Primary)
            .text(text.to_string())
        {
            warn!("failed to set primary selection: {e}");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn primary_text(&mut self) -> String {
        self.clipboard.get_text().unwrap_or_default()
    }

    #[cfg(not(target_os = "linux"))]
    fn set_primary(&mut self, text: &str) {
        if let Err(e) = self.clipboard.set_text(text.to_string()) {
            warn!("failed to set primary selection: {e}");
        }
    }
}

impl SelectionHost for SystemHost {
    fn present(&mut self) {
        // No window is attached in serve mode.
        info!("window present requested");
    }

    fn selection(&mut self, which: Which) -> String {
        match which {
            Which::Clipboard => self.clipboard.get_text().unwrap_or_default(),
            Which::Primary => self.primary_text(),
        }
    }

    fn set_selection(&mut self, which: Which, text: &str) {
        match which {
            Which::Clipboard => {
                if let Err(e) = self.clipboard.set_text(text.to_string()) {
                    warn!("failed to set clipboard: {e}");
                }
            }
            Which::Primary => self.set_primary(text),
        }
    }
}

/// Runs the host context on the calling thread until shutdown is signalled
/// or every bridge handle has been dropped.
pub struct HostLoop {
    tasks: Receiver<HostTask>,
    host: Box<dyn SelectionHost>,
    history: Arc<Mutex<HistoryStore>>,
    config: Arc<SharedConfig>,
    shutdown: Arc<AtomicBool>,
    reload: Option<Receiver<()>>,
    poll_interval: Duration,
    seen: [Option<String>; 2],
}

impl HostLoop {
    pub fn new(
        host: Box<dyn SelectionHost>,
        tasks: Receiver<HostTask>,
        history: Arc<Mutex<HistoryStore>>,
        config: Arc<SharedConfig>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tasks,
            host,
            history,
            config,
            shutdown,
            reload: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            seen: [None, None],
        }
    }

    /// Receive reload signals from the config directory watcher.
    pub fn with_reload(mut self, reload: Receiver<()>) -> Self {
        self.reload = Some(reload);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(50));
        self
    }

    pub fn run(mut self) {
        let mut next_poll = Instant::now();
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.tasks.recv_timeout(TASK_WAIT) {
                Ok(task) => self.handle(task),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(reload) = &self.reload {
                let mut dirty = false;
                while reload.try_recv().is_ok() {
                    dirty = true;
                }
                if dirty {
                    self.config.reload();
                    info!("configuration reloaded");
                }
            }

            if Instant::now() >= next_poll {
                self.poll_selections();
                next_poll = Instant::now() + self.poll_interval;
            }
        }
        debug!("host loop exiting");
    }

    fn handle(&mut self, task: HostTask) {
        match task {
            HostTask::PresentWindow => self.host.present(),
            HostTask::SetSelection { which, text } => {
                self.host.set_selection(which, &text);
                self.history.lock().unwrap().add(which, &text);
                self.seen[which.index()] = Some(text);
            }
            HostTask::ReadSelection { which, reply } => {
                let text = self.host.selection(which);
                *reply.lock().unwrap() = Some(text);
            }
        }
    }

    /// Record observed selection changes into history, deduping against the
    /// last value seen per channel. Whitespace-only values are ignored.
    fn poll_selections(&mut self) {
        for which in [Which::Clipboard, Which::Primary] {
            let text = self.host.selection(which);
            if text.trim().is_empty() {
                continue;
            }
            if self.seen[which.index()].as_deref() == Some(text.as_str()) {
                continue;
            }
            self.seen[which.index()] = Some(text.clone());
            self.history.lock().unwrap().add(which, &text);
        }
    }
}

/// Watch the config directory and send a unit on every relevant change.
/// Returns `None` (serve continues without reload) when watching fails.
pub fn watch_config_dir(dir: &Path, tx: Sender<()>) -> Option<RecommendedWatcher> {
    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    let _ = tx.send(());
                }
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("config watcher unavailable: {e}");
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!("cannot watch {:?}: {e}", dir);
        return None;
    }
    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSnapshot;
    use crate::history::DEFAULT_HISTORY_MAX;
    use crate::ipc::bridge::UiBridge;

    struct Fixture {
        bridge: UiBridge,
        host: MemoryHost,
        history: Arc<Mutex<HistoryStore>>,
        shutdown: Arc<AtomicBool>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl Fixture {
        fn start() -> Self {
            let (bridge, tasks) = UiBridge::channel();
            let host = MemoryHost::default();
            let history = Arc::new(Mutex::new(HistoryStore::new(DEFAULT_HISTORY_MAX)));
            let config = Arc::new(SharedConfig::with_snapshot(ConfigSnapshot::default()));
            let shutdown = Arc::new(AtomicBool::new(false));
            let host_loop = HostLoop::new(
                Box::new(host.clone()),
                tasks,
                history.clone(),
                config,
                shutdown.clone(),
            )
            // long interval so tests control history explicitly
            .with_poll_interval(Duration::from_secs(3600));
            let thread = std::thread::spawn(move || host_loop.run());
            Self {
                bridge,
                host,
                history,
                shutdown,
                thread: Some(thread),
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::SeqCst);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn set_selection_task_updates_host_and_history() {
        let fixture = Fixture::start();
        fixture.bridge.enqueue(HostTask::SetSelection {
            which: Which::Clipboard,
            text: "copied".to_string(),
        });

        assert!(wait_until(|| {
            fixture.host.current(Which::Clipboard) == "copied"
        }));
        assert!(wait_until(|| {
            fixture.history.lock().unwrap().get(Which::Clipboard, 0) == Some("copied")
        }));
    }

    #[test]
    fn present_window_task_reaches_host() {
        let fixture = Fixture::start();
        fixture.bridge.enqueue(HostTask::PresentWindow);
        assert!(wait_until(|| fixture.host.presented() == 1));
    }

    #[test]
    fn read_selection_round_trips_through_host_loop() {
        let fixture = Fixture::start();
        fixture.bridge.enqueue(HostTask::SetSelection {
            which: Which::Primary,
            text: "selected".to_string(),
        });
        let text = fixture.bridge.read_selection(Which::Primary);
        assert_eq!(text, "selected");
    }

    #[test]
    fn polling_records_external_selection_changes() {
        let (bridge, tasks) = UiBridge::channel();
        let host = MemoryHost::default();
        let history = Arc::new(Mutex::new(HistoryStore::new(DEFAULT_HISTORY_MAX)));
        let config = Arc::new(SharedConfig::with_snapshot(ConfigSnapshot::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        // Simulate an external application changing the clipboard directly.
        {
            let mut external = host.clone();
            external.set_selection(Which::Clipboard, "external text");
        }

        let host_loop = HostLoop::new(
            Box::new(host),
            tasks,
            history.clone(),
            config,
            shutdown.clone(),
        )
        .with_poll_interval(Duration::from_millis(50));
        let thread = std::thread::spawn(move || host_loop.run());

        assert!(wait_until(|| {
            history.lock().unwrap().get(Which::Clipboard, 0) == Some("external text")
        }));

        shutdown.store(true, Ordering::SeqCst);
        drop(bridge);
        let _ = thread.join();
    }
}
