mod booking;
mod error;
mod generator;
mod mutations;
mod overlap;
mod queries;
mod store;

pub use error::{EngineError, Entity, ErrorKind};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use store::{Directory, Indexes};

pub type SharedDay = Arc<RwLock<DaySchedule>>;

type DayWriteGuard = OwnedRwLockWriteGuard<DaySchedule>;
type DayReadGuard = OwnedRwLockReadGuard<DaySchedule>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Each wakeup drains every queued append into one buffered
/// batch, fsyncs once, then acknowledges every caller in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                // Compaction must see every append queued before it.
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes don't ride along with
    // the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The booking engine. Slots and lessons are sharded into one
/// [`DaySchedule`] per instructor and date; every mutation of a day is
/// checked, logged and applied while holding that day's write lock.
pub struct Engine {
    pub(super) days: DashMap<DayKey, SharedDay>,
    pub(super) index: Indexes,
    pub(super) directory: Directory,
    /// Serializes directory writes so WAL order matches apply order.
    pub(super) directory_lock: Mutex<()>,
    /// Mutations hold it shared, taken before any day lock; compaction holds
    /// it exclusively so its snapshot matches the log it replaces.
    pub(super) compaction_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) config: EngineConfig,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the background writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = Indexes::default();
        let directory = Directory::default();

        // Replay runs on plain schedules; locks are added once state is built.
        let mut days: HashMap<DayKey, DaySchedule> = HashMap::new();
        for event in &events {
            if directory.apply(event) {
                continue;
            }
            match event {
                Event::SlotUpdated { from, slot } if *from != slot.day_key() => {
                    let to_key = slot.day_key();
                    let mut to = days.remove(&to_key).unwrap_or_else(|| DaySchedule::new(to_key));
                    if let Some(source) = days.get_mut(from) {
                        index.apply_move(source, &mut to, slot);
                    }
                    days.insert(to_key, to);
                }
                other => {
                    if let Some(key) = store::event_day(other) {
                        let day = days.entry(key).or_insert_with(|| DaySchedule::new(key));
                        index.apply(day, other);
                    }
                }
            }
        }

        let slot_count = index.slots.len();
        let engine = Self {
            days: days
                .into_iter()
                .map(|(k, d)| (k, Arc::new(RwLock::new(d))))
                .collect(),
            index,
            directory,
            directory_lock: Mutex::new(()),
            compaction_gate: RwLock::new(()),
            wal_tx,
            config,
        };
        info!(
            events = events.len(),
            slots = slot_count,
            instructors = engine.directory.instructors.len(),
            swimmers = engine.directory.swimmers.len(),
            "engine state replayed"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the locked day.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DaySchedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.index.apply(day, event);
        Ok(())
    }

    /// WAL-append, then apply a directory event. Caller holds `directory_lock`.
    pub(super) async fn persist_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.directory.apply(event);
        Ok(())
    }

    pub(super) fn day(&self, key: &DayKey) -> Option<SharedDay> {
        self.days.get(key).map(|e| e.value().clone())
    }

    pub(super) fn day_or_create(&self, key: DayKey) -> SharedDay {
        self.days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new(key))))
            .clone()
    }

    /// Write-lock the day currently holding `slot_id`.
    ///
    /// A slot can move to another day between the index lookup and the lock,
    /// so the index is consulted again until the locked day holds the slot.
    pub(super) async fn lock_slot_day(&self, slot_id: Ulid) -> Result<DayWriteGuard, EngineError> {
        loop {
            let key = self
                .index
                .slot_day(&slot_id)
                .ok_or(EngineError::NotFound(Entity::Slot, slot_id))?;
            let day = self.day_or_create(key);
            let guard = day.write_owned().await;
            if guard.slot(&slot_id).is_some() {
                return Ok(guard);
            }
            if self.index.slot_day(&slot_id) == Some(key) {
                return Err(EngineError::NotFound(Entity::Slot, slot_id));
            }
        }
    }

    pub(super) async fn lock_lesson_day(
        &self,
        lesson_id: Ulid,
    ) -> Result<DayWriteGuard, EngineError> {
        loop {
            let key = self
                .index
                .lesson_day(&lesson_id)
                .ok_or(EngineError::NotFound(Entity::Lesson, lesson_id))?;
            let day = self.day_or_create(key);
            let guard = day.write_owned().await;
            if guard.lessons.contains_key(&lesson_id) {
                return Ok(guard);
            }
            if self.index.lesson_day(&lesson_id) == Some(key) {
                return Err(EngineError::NotFound(Entity::Lesson, lesson_id));
            }
        }
    }

    pub(super) async fn read_lesson_day(
        &self,
        lesson_id: Ulid,
    ) -> Result<DayReadGuard, EngineError> {
        loop {
            let key = self
                .index
                .lesson_day(&lesson_id)
                .ok_or(EngineError::NotFound(Entity::Lesson, lesson_id))?;
            let Some(day) = self.day(&key) else {
                return Err(EngineError::NotFound(Entity::Lesson, lesson_id));
            };
            let guard = day.read_owned().await;
            if guard.lessons.contains_key(&lesson_id) {
                return Ok(guard);
            }
            if self.index.lesson_day(&lesson_id) == Some(key) {
                return Err(EngineError::NotFound(Entity::Lesson, lesson_id));
            }
        }
    }

    /// Write-lock two distinct days in key order. Returned in argument order.
    pub(super) async fn lock_pair(
        &self,
        a: DayKey,
        b: DayKey,
    ) -> (DayWriteGuard, DayWriteGuard) {
        debug_assert!(a != b, "lock_pair needs distinct days");
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let g1 = self.day_or_create(first).write_owned().await;
        let g2 = self.day_or_create(second).write_owned().await;
        if a < b { (g1, g2) } else { (g2, g1) }
    }

    pub fn slot_count(&self) -> usize {
        self.index.slots.len()
    }
}
