//! The per-run trace bus: publish/subscribe fan-out with a durable
//! JSONL journal and late-joiner replay.
//!
//! Backpressure policy: every subscriber gets an **unbounded** queue, so
//! `emit` never blocks and a subscriber observes every event emitted
//! between its attach and the finish sentinel, in emission order. The
//! trade-off is unbounded memory under a pathologically slow consumer;
//! the transports this feeds (SSE, WebSocket) drop the queue on
//! disconnect, which bounds it in practice.
//!
//! Journal writes are handed to a dedicated writer task over a channel,
//! so disk latency and disk errors never touch the emit fast path. Lost
//! journal lines are logged and forgotten (delivery is best-effort by
//! contract); live fan-out does not depend on journaling.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use bp_domain::stream::BoxStream;
use bp_domain::trace::TraceEvent;

/// One serialized event, or `None` — the terminal sentinel.
type QueueItem = Option<String>;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<QueueItem>,
}

/// A live subscription handle. Drop (or drain to the sentinel) and call
/// [`TraceBus::detach`] with the id to deregister.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<QueueItem>,
}

struct JournalLine {
    path: PathBuf,
    line: String,
}

pub struct TraceBus {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    active: Mutex<HashSet<String>>,
    journal_dir: Option<PathBuf>,
    journal_tx: Option<mpsc::UnboundedSender<JournalLine>>,
    next_sub_id: AtomicU64,
}

impl TraceBus {
    /// Build a bus. When `journal_dir` is set, the directory is created
    /// and a writer task is spawned; must be called inside a runtime.
    pub fn new(journal_dir: Option<PathBuf>) -> Arc<Self> {
        let journal_tx = journal_dir.as_ref().map(|dir| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to create journal dir");
            }
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(journal_writer(rx));
            tx
        });
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
            journal_dir,
            journal_tx,
            next_sub_id: AtomicU64::new(1),
        })
    }

    /// Mint a fresh run id: `lz-{UTC timestamp}-{4 hex}`. Uniqueness is
    /// process-local; sharing a journal dir across processes is
    /// undefined behavior of the deployment, not of this bus.
    pub fn new_run(&self) -> String {
        let stamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%SZ");
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..4];
        format!("lz-{stamp}-{suffix}")
    }

    /// Register the run so producers can emit before listeners attach.
    /// Idempotent; must precede the first `emit` for the run.
    pub fn ensure_run(&self, run_id: &str) {
        self.subscribers
            .lock()
            .entry(run_id.to_owned())
            .or_default();
        self.active.lock().insert(run_id.to_owned());
    }

    /// Attach a new subscriber queue. Callable before or after
    /// `ensure_run` and before or after `finish` — a post-finish
    /// subscriber just never sees live events.
    pub fn attach(&self, run_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(run_id.to_owned())
            .or_default()
            .push(Subscriber { id, tx });
        Subscription { id, rx }
    }

    /// Remove a subscriber; drops the run entry when the list empties.
    pub fn detach(&self, run_id: &str, sub_id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(list) = subscribers.get_mut(run_id) {
            list.retain(|s| s.id != sub_id);
            if list.is_empty() {
                subscribers.remove(run_id);
            }
        }
    }

    /// Publish an event: serialize once, push to every attached queue in
    /// order, and enqueue the journal line. Never blocks.
    pub fn emit(&self, event: &TraceEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "unserializable trace event dropped");
                return;
            }
        };

        {
            let subscribers = self.subscribers.lock();
            if let Some(list) = subscribers.get(&event.run_id) {
                for sub in list {
                    // A closed receiver just means the subscriber went away
                    // before detaching; nothing to do.
                    let _ = sub.tx.send(Some(payload.clone()));
                }
            }
        }

        if let (Some(tx), Some(path)) = (&self.journal_tx, self.journal_path(&event.run_id)) {
            let _ = tx.send(JournalLine {
                path,
                line: payload,
            });
        }

        tracing::debug!(
            run_id = %event.run_id,
            step_id = event.step_id,
            agent = %event.agent,
            phase = ?event.phase,
            "trace"
        );
    }

    /// Push the terminal sentinel to every attached queue and mark the
    /// run inactive. Safe to call twice; the second call is a no-op for
    /// queues that already drained their sentinel.
    pub fn finish(&self, run_id: &str) {
        {
            let subscribers = self.subscribers.lock();
            if let Some(list) = subscribers.get(run_id) {
                for sub in list {
                    let _ = sub.tx.send(None);
                }
            }
        }
        self.active.lock().remove(run_id);
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.active.lock().contains(run_id)
    }

    /// Convenience: attach, yield serialized events until the sentinel,
    /// then detach. Takes an owned `Arc` so the stream can outlive the
    /// caller's borrow; call as `bus.clone().stream(run_id)`. The
    /// detach also runs when the consumer drops the stream early (an
    /// SSE client disconnecting), so abandoned queues do not linger.
    pub fn stream(self: Arc<Self>, run_id: &str) -> BoxStream<'static, String> {
        struct DetachOnDrop {
            bus: Arc<TraceBus>,
            run_id: String,
            sub_id: u64,
        }
        impl Drop for DetachOnDrop {
            fn drop(&mut self) {
                self.bus.detach(&self.run_id, self.sub_id);
            }
        }

        let bus = self;
        let run_id = run_id.to_owned();
        let stream = async_stream::stream! {
            let mut sub = bus.attach(&run_id);
            let _guard = DetachOnDrop {
                bus: bus.clone(),
                run_id: run_id.clone(),
                sub_id: sub.id,
            };
            loop {
                match sub.rx.recv().await {
                    Some(Some(payload)) => yield payload,
                    // Sentinel, or every sender gone: stop either way.
                    Some(None) | None => break,
                }
            }
        };
        Box::pin(stream)
    }

    /// Path of the run's journal file, if journaling is configured.
    pub fn journal_path(&self, run_id: &str) -> Option<PathBuf> {
        self.journal_dir
            .as_ref()
            .map(|dir| dir.join(format!("{run_id}.jsonl")))
    }

    /// Read the persisted journal for a run in emission order. Missing
    /// or unreadable files yield `[]`; malformed lines are skipped.
    pub async fn read_persisted(&self, run_id: &str) -> Vec<serde_json::Value> {
        let Some(path) = self.journal_path(run_id) else {
            return Vec::new();
        };
        read_journal_file(&path, run_id).await
    }
}

async fn read_journal_file(path: &Path, run_id: &str) -> Vec<serde_json::Value> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(run_id, error = %e, "failed to read trace journal");
            return Vec::new();
        }
    };
    let mut records = Vec::new();
    for line in content.lines() {
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str(raw) {
            Ok(value) => records.push(value),
            Err(_) => {
                tracing::warn!(run_id, "skipping malformed trace journal line");
            }
        }
    }
    records
}

/// The journal writer task: drains lines and appends them to the run's
/// file. Errors are logged and the line dropped — journaling is
/// best-effort.
async fn journal_writer(mut rx: mpsc::UnboundedReceiver<JournalLine>) {
    while let Some(JournalLine { path, line }) = rx.recv().await {
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist trace event");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
