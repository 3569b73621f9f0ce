//! Filesystem change notifications for the watched directory.
//!
//! A `notify` watcher is registered non-recursively on one directory. Its
//! callback translates native events into [`ChangeEvent`]s and pushes them
//! into a bounded queue; backend errors go into a second, independent queue.
//!
//! ```text
//!  notify thread ──► EventSender ──► [ bounded events ] ──► ChangeStreams.events
//!                        │
//!                        └─────────► [ errors ] ─────────► ChangeStreams.errors
//! ```
//!
//! When the queue is full the [`OverflowPolicy`] decides whether the producer
//! waits or an event is discarded. Dropping the [`ChangeSource`] closes both
//! streams.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_channel as chan;
use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::debug;

use crate::model::{ChangeEvent, OperationKind};

/// Default capacity of the event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the backend error queue. Errors beyond it are dropped.
const ERROR_QUEUE_CAPACITY: usize = 64;

/// What happens to a new event when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// The producer waits until the consumer frees a slot.
    #[default]
    Block,
    /// The oldest queued event is discarded to make room.
    DropOldest,
    /// The incoming event is discarded.
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "block" => Ok(OverflowPolicy::Block),
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "drop-newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(format!(
                "invalid overflow policy '{}' (expected block, drop-oldest or drop-newest)",
                other
            )),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::Block => "block",
            OverflowPolicy::DropOldest => "drop-oldest",
            OverflowPolicy::DropNewest => "drop-newest",
        })
    }
}

/// Event queue parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Error type for watcher setup.
#[derive(Debug)]
pub enum WatchError {
    /// The notification backend could not be initialised.
    Init(notify::Error),
    /// The directory could not be registered with the backend.
    Register { path: PathBuf, source: notify::Error },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::Init(e) => write!(f, "failed to create watcher: {}", e),
            WatchError::Register { path, source } => {
                write!(f, "failed to watch {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::Init(e) | WatchError::Register { source: e, .. } => Some(e),
        }
    }
}

/// Consumer side: the ordered event sequence and the backend error sequence.
pub struct ChangeStreams {
    pub events: chan::Receiver<ChangeEvent>,
    pub errors: chan::Receiver<notify::Error>,
}

/// Producer side of the queues, applying the overflow policy.
#[derive(Clone)]
pub struct EventSender {
    events: chan::Sender<ChangeEvent>,
    errors: chan::Sender<notify::Error>,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

/// Creates a connected producer/consumer pair.
///
/// A capacity of zero is raised to one.
pub fn channel(config: QueueConfig) -> (EventSender, ChangeStreams) {
    let (events_tx, events_rx) = chan::bounded(config.capacity.max(1));
    let (errors_tx, errors_rx) = chan::bounded(ERROR_QUEUE_CAPACITY);
    (
        EventSender {
            events: events_tx,
            errors: errors_tx,
            overflow: config.overflow,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        ChangeStreams {
            events: events_rx,
            errors: errors_rx,
        },
    )
}

impl EventSender {
    /// Enqueues an event according to the overflow policy.
    ///
    /// With [`OverflowPolicy::Block`] this blocks the calling thread while the
    /// queue is full, so it must not be called from an async task.
    /// Returns `false` once the consumer side is gone.
    pub fn push(&self, event: ChangeEvent) -> bool {
        match self.overflow {
            OverflowPolicy::Block => self.events.send_blocking(event).is_ok(),
            OverflowPolicy::DropNewest => match self.events.try_send(event) {
                Ok(()) => true,
                Err(chan::TrySendError::Full(event)) => {
                    self.record_drop(&event);
                    true
                }
                Err(chan::TrySendError::Closed(_)) => false,
            },
            OverflowPolicy::DropOldest => match self.events.force_send(event) {
                Ok(Some(displaced)) => {
                    self.record_drop(&displaced);
                    true
                }
                Ok(None) => true,
                Err(_) => false,
            },
        }
    }

    /// Forwards a backend error. Dropped if the error queue is full.
    pub fn push_error(&self, error: notify::Error) {
        if let Err(chan::TrySendError::Full(error)) = self.errors.try_send(error) {
            debug!(error = %error, "error queue full, dropping watcher error");
        }
    }

    /// Number of events discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, event: &ChangeEvent) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            kind = %event.kind,
            path = %event.path.display(),
            policy = %self.overflow,
            dropped_total = total,
            "event queue full, dropping event"
        );
    }
}

/// Maps a native event kind to the published operation kind.
///
/// Access and unclassified events carry no mutation and map to `None`. The
/// new name of a rename is reported as a create, the old name as a rename.
pub fn operation_kind(kind: &EventKind) -> Option<OperationKind> {
    match kind {
        EventKind::Create(_) => Some(OperationKind::Create),
        EventKind::Remove(_) => Some(OperationKind::Remove),
        // inotify reports a rename as From, To and a paired Both; the pair repeats the halves.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(OperationKind::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(OperationKind::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(OperationKind::Chmod),
        EventKind::Modify(_) => Some(OperationKind::Write),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Translates one native event into one change event per affected path.
pub fn translate(event: &Event) -> Vec<ChangeEvent> {
    let Some(kind) = operation_kind(&event.kind) else {
        return Vec::new();
    };
    let observed_at = Utc::now();

    if event.paths.is_empty() {
        return vec![ChangeEvent {
            kind,
            path: PathBuf::new(),
            observed_at,
        }];
    }

    event
        .paths
        .iter()
        .map(|path| ChangeEvent {
            kind,
            path: path.clone(),
            observed_at,
        })
        .collect()
}

/// Owner of the native watcher. The registration lives as long as this value.
pub struct ChangeSource {
    watcher: RecommendedWatcher,
    sender: EventSender,
}

impl ChangeSource {
    /// Initialises the notification backend. Nothing is watched until [`ChangeSource::watch`].
    pub fn new(config: QueueConfig) -> Result<(Self, ChangeStreams), WatchError> {
        let (sender, streams) = channel(config);

        let callback_sender = sender.clone();
        let watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for change in translate(&event) {
                        if !callback_sender.push(change) {
                            debug!("event stream closed, discarding notification");
                            return;
                        }
                    }
                }
                Err(e) => callback_sender.push_error(e),
            },
            Config::default(),
        )
        .map_err(WatchError::Init)?;

        Ok((Self { watcher, sender }, streams))
    }

    /// Registers `path` itself (not its descendants) for notifications.
    pub fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Register {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Consumes the source and closes both streams.
    pub fn close(self) {
        let Self { watcher, sender } = self;
        drop(watcher);
        sender.events.close();
        sender.errors.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};
    use std::time::Duration;

    fn event(kind: OperationKind, name: &str) -> ChangeEvent {
        ChangeEvent::new(kind, name)
    }

    fn drain(streams: &ChangeStreams) -> Vec<PathBuf> {
        let mut out = Vec::new();
        while let Ok(e) = streams.events.try_recv() {
            out.push(e.path);
        }
        out
    }

    #[test]
    fn test_operation_kind_mapping() {
        let cases = [
            (EventKind::Create(CreateKind::File), Some(OperationKind::Create)),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                Some(OperationKind::Write),
            ),
            (EventKind::Modify(ModifyKind::Any), Some(OperationKind::Write)),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                Some(OperationKind::Rename),
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                Some(OperationKind::Create),
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
                Some(OperationKind::Rename),
            ),
            (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), None),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                Some(OperationKind::Chmod),
            ),
            (EventKind::Remove(RemoveKind::File), Some(OperationKind::Remove)),
            (EventKind::Any, None),
            (EventKind::Other, None),
        ];
        for (native, expected) in cases {
            assert_eq!(operation_kind(&native), expected, "{native:?}");
        }
    }

    #[test]
    fn test_translate_one_event_per_path() {
        let native = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(PathBuf::from("/w/old"))
            .add_path(PathBuf::from("/w/new"));

        let changes = translate(&native);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == OperationKind::Rename));
        assert_eq!(changes[0].path, PathBuf::from("/w/old"));
        assert_eq!(changes[1].path, PathBuf::from("/w/new"));
    }

    #[test]
    fn test_translate_rename_pair_is_not_repeated() {
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("/w/old"));
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(PathBuf::from("/w/new"));
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/w/old"))
            .add_path(PathBuf::from("/w/new"));

        let changes: Vec<(OperationKind, PathBuf)> = [from, to, both]
            .iter()
            .flat_map(translate)
            .map(|c| (c.kind, c.path))
            .collect();
        assert_eq!(
            changes,
            vec![
                (OperationKind::Rename, PathBuf::from("/w/old")),
                (OperationKind::Create, PathBuf::from("/w/new")),
            ]
        );
    }

    #[test]
    fn test_translate_ignores_access() {
        let native = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/w/f"));
        assert!(translate(&native).is_empty());
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!("block".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Block));
        assert_eq!("drop-oldest".parse::<OverflowPolicy>(), Ok(OverflowPolicy::DropOldest));
        assert_eq!("drop-newest".parse::<OverflowPolicy>(), Ok(OverflowPolicy::DropNewest));
        assert!("coalesce".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_drop_newest_keeps_queued_events() {
        let (tx, streams) = channel(QueueConfig {
            capacity: 2,
            overflow: OverflowPolicy::DropNewest,
        });
        for name in ["a", "b", "c", "d"] {
            assert!(tx.push(event(OperationKind::Write, name)));
        }
        assert_eq!(tx.dropped(), 2);
        assert_eq!(drain(&streams), vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn test_drop_oldest_keeps_latest_events() {
        let (tx, streams) = channel(QueueConfig {
            capacity: 2,
            overflow: OverflowPolicy::DropOldest,
        });
        for name in ["a", "b", "c", "d"] {
            assert!(tx.push(event(OperationKind::Write, name)));
        }
        assert_eq!(tx.dropped(), 2);
        assert_eq!(drain(&streams), vec![PathBuf::from("c"), PathBuf::from("d")]);
    }

    #[test]
    fn test_block_waits_for_consumer() {
        let (tx, streams) = channel(QueueConfig {
            capacity: 1,
            overflow: OverflowPolicy::Block,
        });
        assert!(tx.push(event(OperationKind::Create, "a")));

        let producer = std::thread::spawn(move || {
            let ok = tx.push(event(OperationKind::Create, "b"));
            (ok, tx.dropped())
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(streams.events.recv_blocking().unwrap().path, PathBuf::from("a"));
        let (ok, dropped) = producer.join().unwrap();
        assert!(ok);
        assert_eq!(dropped, 0);
        assert_eq!(streams.events.recv_blocking().unwrap().path, PathBuf::from("b"));
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (tx, streams) = channel(QueueConfig::default());
        drop(streams);
        assert!(!tx.push(event(OperationKind::Create, "a")));
    }

    #[test]
    fn test_errors_are_a_separate_stream() {
        let (tx, streams) = channel(QueueConfig::default());
        tx.push_error(notify::Error::generic("backend hiccup"));
        assert!(streams.events.try_recv().is_err());
        assert!(streams.errors.try_recv().is_ok());
    }

    #[test]
    fn test_close_ends_both_streams() {
        let (source, streams) = ChangeSource::new(QueueConfig::default()).unwrap();
        source.close();
        assert!(streams.events.recv_blocking().is_err());
        assert!(streams.errors.recv_blocking().is_err());
    }

    #[test]
    fn test_watch_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut source, _streams) = ChangeSource::new(QueueConfig::default()).unwrap();
        let missing = dir.path().join("missing");
        let err = source.watch(&missing).unwrap_err();
        assert!(matches!(err, WatchError::Register { .. }));
    }
}
