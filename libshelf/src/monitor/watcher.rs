//! The raw event loop between `notify` and the dispatcher.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, Watcher};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::file_type::{is_book_file, is_ignored_name};
use crate::model::{ChangeKind, FileChangeEvent};

use super::dispatcher::EventPublisher;
use super::pause::PauseController;
use super::registry::WatchRegistry;

pub(crate) type RawEvent = notify::Result<Event>;

/// OS watcher whose callback forwards into `raw_tx`.
///
/// The callback runs on the backend's own thread, which `watch`/`unwatch`
/// also wait on, so it must never block: a full queue drops the event.
pub(crate) fn os_watcher(
    raw_tx: Sender<RawEvent>,
    dropped: Arc<AtomicUsize>,
) -> Result<RecommendedWatcher> {
    let watcher = RecommendedWatcher::new(
        move |ev| {
            forward(&raw_tx, &dropped, ev);
        },
        notify::Config::default(),
    )?;
    Ok(watcher)
}

/// Offer a raw event without blocking. Returns `false` if it was dropped.
pub(crate) fn forward(raw_tx: &Sender<RawEvent>, dropped: &AtomicUsize, ev: RawEvent) -> bool {
    match raw_tx.try_send(ev) {
        Ok(()) => true,
        Err(TrySendError::Full(ev)) => {
            let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match ev {
                Ok(ev) => warn!(
                    kind = ?ev.kind,
                    paths = ?ev.paths,
                    dropped = n,
                    "raw event queue full; dropping event"
                ),
                Err(e) => warn!(error = %e, dropped = n, "raw event queue full; dropping watch error"),
            }
            false
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

pub(crate) struct RawContext {
    pub registry: Arc<WatchRegistry>,
    pub pause: Arc<PauseController>,
    pub publisher: EventPublisher,
    pub config: MonitorConfig,
}

pub(crate) struct RawEventWatcher {
    shutdown: Sender<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RawEventWatcher {
    pub fn spawn(raw: Receiver<RawEvent>, ctx: RawContext) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("shelf-watch".into())
            .spawn(move || run(raw, shutdown_rx, ctx))?;
        Ok(Self {
            shutdown: shutdown_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.try_send(());
        let handle = self.thread.lock().ok().and_then(|mut g| g.take());
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

impl Drop for RawEventWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(raw: Receiver<RawEvent>, shutdown: Receiver<()>, ctx: RawContext) {
    debug!("raw watcher started");
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(raw) -> msg => match msg {
                Ok(Ok(event)) => handle_event(&ctx, &event),
                Ok(Err(e)) => warn!(error = %e, "watch error"),
                Err(_) => {
                    debug!("raw event channel closed");
                    break;
                }
            },
        }
    }
    debug!("raw watcher stopped");
}

fn handle_event(ctx: &RawContext, event: &Event) {
    if ctx.pause.is_paused() {
        trace!(kind = ?event.kind, paths = ?event.paths, "paused; discarding");
        return;
    }
    for (path, kind) in translate(event) {
        match kind {
            ChangeKind::Created if path.is_dir() => {
                for file in book_files_under(&path, &ctx.config) {
                    emit(ctx, file, ChangeKind::Created);
                }
            }
            // possibly a directory; the handler looks for books recorded under it
            ChangeKind::Deleted if !is_book_file(&path) => {
                if is_candidate_dir(&path, &ctx.config) {
                    emit(ctx, path, kind);
                }
            }
            _ => {
                if is_relevant(&path, &ctx.config) {
                    emit(ctx, path, kind);
                }
            }
        }
    }
}

fn emit(ctx: &RawContext, path: PathBuf, kind: ChangeKind) {
    let watched = match ctx.registry.resolve(&path) {
        Ok(Some(w)) => w,
        Ok(None) => {
            trace!(path = %path.display(), "outside every watched path");
            return;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot resolve watched path");
            return;
        }
    };
    trace!(path = %path.display(), ?kind, library = %watched.library_id, "publishing");
    ctx.publisher.publish(FileChangeEvent {
        file_path: path,
        kind,
        watched_folder: watched.path,
        library_id: watched.library_id,
        observed_at: Instant::now(),
    });
}

fn is_relevant(path: &Path, config: &MonitorConfig) -> bool {
    is_book_file(path) && !config.is_ignored(path)
}

/// A removed path that may have been a directory of books. The directory
/// itself is gone, so only its name can be checked.
fn is_candidate_dir(path: &Path, config: &MonitorConfig) -> bool {
    let visible = path
        .file_name()
        .is_some_and(|n| !is_ignored_name(&n.to_string_lossy()));
    visible && !config.is_ignored(path)
}

/// Recognized files below a directory that just appeared.
fn book_files_under(dir: &Path, config: &MonitorConfig) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_relevant(p, config))
        .collect();
    files.sort();
    files
}

/// Map a raw `notify` event onto created/deleted paths. Data, metadata and
/// access events yield nothing.
pub(crate) fn translate(event: &Event) -> Vec<(PathBuf, ChangeKind)> {
    let all = |kind: ChangeKind| -> Vec<(PathBuf, ChangeKind)> {
        event.paths.iter().map(|p| (p.clone(), kind)).collect()
    };
    match &event.kind {
        EventKind::Create(_) => all(ChangeKind::Created),
        EventKind::Remove(_) => all(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => all(ChangeKind::Deleted),
            RenameMode::To => all(ChangeKind::Created),
            RenameMode::Both if event.paths.len() == 2 => vec![
                (event.paths[0].clone(), ChangeKind::Deleted),
                (event.paths[1].clone(), ChangeKind::Created),
            ],
            // backends that cannot pair the two halves of a rename
            _ => event
                .paths
                .iter()
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Deleted
                    };
                    (p.clone(), kind)
                })
                .collect(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use tempfile::tempdir;

    fn ev(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn full_raw_queue_drops_instead_of_blocking() {
        let (tx, rx) = bounded::<RawEvent>(1);
        let dropped = AtomicUsize::new(0);
        let create = || Ok(ev(EventKind::Create(CreateKind::File), &["/l/a.epub"]));
        assert!(forward(&tx, &dropped, create()));
        assert!(!forward(&tx, &dropped, create()));
        assert!(!forward(&tx, &dropped, create()));
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert_eq!(rx.len(), 1);

        drop(rx);
        assert!(!forward(&tx, &dropped, create()));
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn create_and_remove() {
        let got = translate(&ev(EventKind::Create(CreateKind::File), &["/l/a.epub"]));
        assert_eq!(got, vec![(PathBuf::from("/l/a.epub"), ChangeKind::Created)]);
        let got = translate(&ev(EventKind::Remove(RemoveKind::File), &["/l/a.epub"]));
        assert_eq!(got, vec![(PathBuf::from("/l/a.epub"), ChangeKind::Deleted)]);
    }

    #[test]
    fn rename_halves_and_pairs() {
        let from = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/l/a.epub"],
        );
        assert_eq!(translate(&from)[0].1, ChangeKind::Deleted);

        let to = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/l/b.epub"],
        );
        assert_eq!(translate(&to)[0].1, ChangeKind::Created);

        let both = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/l/a.epub", "/l/b.epub"],
        );
        assert_eq!(
            translate(&both),
            vec![
                (PathBuf::from("/l/a.epub"), ChangeKind::Deleted),
                (PathBuf::from("/l/b.epub"), ChangeKind::Created),
            ]
        );
    }

    #[test]
    fn ambiguous_rename_checks_disk() {
        let tmp = tempdir().unwrap();
        let here = tmp.path().join("here.epub");
        std::fs::write(&here, b"x").unwrap();
        let gone = tmp.path().join("gone.epub");
        let mut e = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)));
        e = e.add_path(here.clone()).add_path(gone.clone());
        assert_eq!(
            translate(&e),
            vec![(here, ChangeKind::Created), (gone, ChangeKind::Deleted)]
        );
    }

    #[test]
    fn content_changes_are_dropped() {
        let modify = ev(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/l/a.epub"],
        );
        assert!(translate(&modify).is_empty());
        let access = ev(EventKind::Access(AccessKind::Read), &["/l/a.epub"]);
        assert!(translate(&access).is_empty());
    }

    #[test]
    fn new_directory_is_expanded() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("drop");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("a.epub"), b"a").unwrap();
        std::fs::write(dir.join("nested/b.cbz"), b"b").unwrap();
        std::fs::write(dir.join("notes.txt"), b"n").unwrap();
        std::fs::write(dir.join(".hidden.epub"), b"h").unwrap();
        std::fs::create_dir_all(dir.join(".cache")).unwrap();
        std::fs::write(dir.join(".cache/c.pdf"), b"c").unwrap();

        let files = book_files_under(&dir, &MonitorConfig::default());
        assert_eq!(files, vec![dir.join("a.epub"), dir.join("nested/b.cbz")]);
    }

    #[test]
    fn removed_directories_are_candidates() {
        let cfg = MonitorConfig {
            ignore: crate::config::parse_ignore("*/@eaDir*").unwrap(),
            ..Default::default()
        };
        assert!(is_candidate_dir(Path::new("/l/series"), &cfg));
        assert!(!is_candidate_dir(Path::new("/l/.cache"), &cfg));
        assert!(!is_candidate_dir(Path::new("/l/@eaDir"), &cfg));
    }

    #[test]
    fn ignore_globs_apply() {
        let cfg = MonitorConfig {
            ignore: crate::config::parse_ignore("*/@eaDir/*").unwrap(),
            ..Default::default()
        };
        assert!(is_relevant(Path::new("/l/a.epub"), &cfg));
        assert!(!is_relevant(Path::new("/l/@eaDir/a.epub"), &cfg));
        assert!(!is_relevant(Path::new("/l/a.txt"), &cfg));
    }
}
