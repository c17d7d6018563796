//! File watcher (C8): debounced filesystem events on a dedicated OS
//! thread, feeding a single bounded queue the main loop consumes. New
//! module — the teacher has no watcher; grounded on `notify` +
//! `notify-debouncer-full` usage in the pack's file-watching examples,
//! kept as thin glue over the debouncer the way the teacher keeps its
//! own background threads thin (see its `scanner.rs` walker thread).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};

const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_CATCHUP_BUDGET: Duration = Duration::from_secs(3);
const CATCHUP_WINDOW_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: EventKind,
    pub timestamp: f64,
    pub old_path: Option<PathBuf>,
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Single bounded producer/consumer queue between the watcher thread and
/// the main loop. Overflow policy: drop newest, counting the drop.
struct EventQueue {
    events: VecDeque<WatchEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventQueue {
    fn new(capacity: usize) -> Self {
        Self { events: VecDeque::new(), capacity, dropped: 0 }
    }

    fn push(&mut self, event: WatchEvent) {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.events.push_back(event);
    }

    fn drain(&mut self, max: usize) -> Vec<WatchEvent> {
        let n = max.min(self.events.len());
        self.events.drain(..n).collect()
    }
}

/// Handle held by the main loop: polls the shared queue, the watcher
/// thread (and its debouncer) lives for as long as this handle does.
pub struct FileWatcher {
    queue: Arc<Mutex<EventQueue>>,
    extensions: Vec<String>,
    _debouncer: notify_debouncer_full::Debouncer<notify::RecommendedWatcher, notify_debouncer_full::RecommendedCache>,
}

impl FileWatcher {
    /// Start watching `roots` (recursively) for changes to files whose
    /// extension is in `extensions`, debounced by `debounce_ms`.
    pub fn start(roots: &[PathBuf], extensions: Vec<String>, debounce_ms: u64) -> notify::Result<Self> {
        let queue = Arc::new(Mutex::new(EventQueue::new(DEFAULT_QUEUE_CAPACITY)));
        let queue_for_thread = Arc::clone(&queue);
        let exts_for_thread = extensions.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(debounce_ms.max(1)),
            None,
            move |result: DebounceEventResult| {
                let Ok(events) = result else { return };
                let mut q = queue_for_thread.lock().unwrap();
                for event in events {
                    for watch_event in translate(&event, &exts_for_thread) {
                        q.push(watch_event);
                    }
                }
            },
        )?;

        for root in roots {
            debouncer.watch(root, RecursiveMode::Recursive)?;
        }

        Ok(Self { queue, extensions, _debouncer: debouncer })
    }

    /// Drain up to `max` pending events (the main loop wakes roughly
    /// every second and takes up to 10, per the polling contract).
    pub fn poll(&self, max: usize) -> Vec<WatchEvent> {
        self.queue.lock().unwrap().drain(max)
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.lock().unwrap().dropped
    }

    /// Walk `roots` once, time-boxed, enqueueing a `modified` event for
    /// every supported-extension file whose mtime is newer than
    /// `last_scan_time - 300s`. Intended to run once at startup before
    /// the debounced watch takes over.
    pub fn catch_up(&self, roots: &[PathBuf], last_scan_time: f64) {
        let deadline = std::time::Instant::now() + DEFAULT_CATCHUP_BUDGET;
        for root in roots {
            self.catch_up_dir(root, last_scan_time, deadline);
        }
    }

    fn catch_up_dir(&self, root: &Path, last_scan_time: f64, deadline: std::time::Instant) {
        let walker = ignore::WalkBuilder::new(root).standard_filters(true).build();
        for entry in walker {
            if std::time::Instant::now() >= deadline {
                return;
            }
            let Ok(dent) = entry else { continue };
            if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = dent.path();
            if !has_supported_extension(path, &self.extensions) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(path) else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let mtime = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
            if mtime > last_scan_time - CATCHUP_WINDOW_SECS {
                self.queue.lock().unwrap().push(WatchEvent {
                    path: path.to_path_buf(),
                    kind: EventKind::Modified,
                    timestamp: now_secs(),
                    old_path: None,
                });
            }
        }
    }
}

fn has_supported_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|supported| supported.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Translate one debounced `notify` event into zero or more
/// [`WatchEvent`]s. `Rename(Both)` (a move) splits into `deleted(old)` +
/// `moved(new)`, per the contract.
fn translate(event: &notify_debouncer_full::DebouncedEvent, extensions: &[String]) -> Vec<WatchEvent> {
    use notify::event::{EventKind as NotifyEventKind, ModifyKind, RenameMode};

    let ts = now_secs();
    match &event.kind {
        NotifyEventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| has_supported_extension(p, extensions))
            .map(|p| WatchEvent { path: p.clone(), kind: EventKind::Created, timestamp: ts, old_path: None })
            .collect(),
        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let old_path = &event.paths[0];
            let new_path = &event.paths[1];
            let mut out = Vec::new();
            if has_supported_extension(old_path, extensions) {
                out.push(WatchEvent { path: old_path.clone(), kind: EventKind::Deleted, timestamp: ts, old_path: None });
            }
            if has_supported_extension(new_path, extensions) {
                out.push(WatchEvent {
                    path: new_path.clone(),
                    kind: EventKind::Moved,
                    timestamp: ts,
                    old_path: Some(old_path.clone()),
                });
            }
            out
        }
        NotifyEventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| has_supported_extension(p, extensions))
            .map(|p| WatchEvent { path: p.clone(), kind: EventKind::Modified, timestamp: ts, old_path: None })
            .collect(),
        NotifyEventKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| has_supported_extension(p, extensions))
            .map(|p| WatchEvent { path: p.clone(), kind: EventKind::Deleted, timestamp: ts, old_path: None })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, kind: EventKind, old: Option<&str>) -> WatchEvent {
        WatchEvent {
            path: PathBuf::from(path),
            kind,
            timestamp: 0.0,
            old_path: old.map(PathBuf::from),
        }
    }

    #[test]
    fn queue_drops_newest_on_overflow_and_counts_it() {
        let mut q = EventQueue::new(2);
        q.push(event("a.rs", EventKind::Created, None));
        q.push(event("b.rs", EventKind::Created, None));
        q.push(event("c.rs", EventKind::Created, None));
        assert_eq!(q.events.len(), 2);
        assert_eq!(q.dropped, 1);
    }

    #[test]
    fn drain_respects_max_and_order() {
        let mut q = EventQueue::new(10);
        for name in ["a.rs", "b.rs", "c.rs"] {
            q.push(event(name, EventKind::Modified, None));
        }
        let drained = q.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].path, PathBuf::from("a.rs"));
        assert_eq!(q.events.len(), 1);
    }

    #[test]
    fn supported_extension_filter_is_case_insensitive() {
        let exts = vec!["rs".to_string(), "py".to_string()];
        assert!(has_supported_extension(Path::new("a.RS"), &exts));
        assert!(!has_supported_extension(Path::new("a.txt"), &exts));
    }
}
