//! In-process job queue.
//!
//! Jobs wait as `enqueued` until a worker slot frees up, stay `processing`
//! while their runner executes, and `scheduled` jobs are promoted to
//! `enqueued` once due. A failing or panicking job is logged and dropped.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{JobId, JobKind, JobOutcome, JobRecord, JobRunner, JobSystem, QueueState};
use crate::error::JobError;

enum QueueSignal {
    Continue,
    Stop,
}

struct Entry {
    record: JobRecord,
    /// Present while processing.
    token: Option<CancellationToken>,
}

struct Shared {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    max_concurrent: usize,
    signals: mpsc::Sender<QueueSignal>,
    shutdown: CancellationToken,
}

pub struct JobQueue {
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::Receiver<QueueSignal>>>,
}

impl JobQueue {
    pub fn new(max_concurrent: usize) -> Self {
        let (signals, receiver) = mpsc::channel(8);
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                max_concurrent: max_concurrent.max(1),
                signals,
                shutdown: CancellationToken::new(),
            }),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Spawn the worker that executes jobs with `runner`. Later calls are ignored.
    pub fn start(&self, runner: Arc<dyn JobRunner>) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            warn!("job_queue: already started");
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_queue_worker(shared, runner, receiver).await;
        });
        self.shared.notify();
    }

    /// Drop waiting jobs, cancel running ones and wait up to `timeout` for
    /// their runners to return.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shared.shutdown.cancel();
        {
            let mut entries = self.shared.lock();
            entries.retain(|e| e.record.state == QueueState::Processing);
            for entry in entries.iter() {
                if let Some(token) = &entry.token {
                    token.cancel();
                }
            }
        }
        let _ = self.shared.signals.try_send(QueueSignal::Stop);

        let started = Instant::now();
        while self.shared.running() > 0 && started.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let remaining = self.shared.running();
        if remaining > 0 {
            warn!("job_queue: shutdown left {} job(s) running", remaining);
        } else {
            info!("job_queue: shut down");
        }
    }
}

impl JobSystem for JobQueue {
    fn jobs(&self, state: QueueState) -> Result<Vec<JobRecord>, JobError> {
        Ok(self
            .shared
            .lock()
            .iter()
            .filter(|e| e.record.state == state)
            .map(|e| e.record.clone())
            .collect())
    }

    fn enqueue(&self, kind: JobKind, project_path: &Path) -> Result<JobId, JobError> {
        let id = self.shared.insert(kind, project_path, QueueState::Enqueued)?;
        self.shared.notify();
        Ok(id)
    }

    fn schedule(
        &self,
        kind: JobKind,
        project_path: &Path,
        delay: Duration,
    ) -> Result<JobId, JobError> {
        let id = self.shared.insert(kind, project_path, QueueState::Scheduled)?;
        Shared::promote_after(&self.shared, id, delay);
        Ok(id)
    }

    fn delete(&self, id: JobId) -> Result<bool, JobError> {
        let mut entries = self.shared.lock();
        let Some(index) = entries.iter().position(|e| e.record.id == id) else {
            return Ok(false);
        };
        if let Some(token) = entries[index].token.as_ref() {
            info!("job_cancel: #{}", id);
            token.cancel();
            return Ok(true);
        }
        let entry = entries.remove(index);
        info!("job_delete: #{} ({})", id, entry.record.state);
        Ok(true)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn running(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.record.state == QueueState::Processing)
            .count()
    }

    fn insert(&self, kind: JobKind, project_path: &Path, state: QueueState) -> Result<JobId, JobError> {
        if self.shutdown.is_cancelled() {
            return Err(JobError::Unavailable("job queue is shut down".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().push(Entry {
            record: JobRecord {
                id,
                kind,
                project_path: project_path.to_path_buf(),
                state,
            },
            token: None,
        });
        info!("job_submit: #{} {:?} {} ({})", id, kind, project_path.display(), state);
        Ok(id)
    }

    fn notify(&self) {
        if self.signals.try_send(QueueSignal::Continue).is_err() {
            debug!("job_queue: continuation already pending");
        }
    }

    fn promote_after(shared: &Arc<Shared>, id: JobId, delay: Duration) {
        let shared = shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let promoted = {
                let mut entries = shared.lock();
                match entries
                    .iter_mut()
                    .find(|e| e.record.id == id && e.record.state == QueueState::Scheduled)
                {
                    Some(entry) => {
                        entry.record.state = QueueState::Enqueued;
                        true
                    }
                    None => false,
                }
            };
            if promoted {
                debug!("job_due: #{}", id);
                shared.notify();
            }
        });
    }

    /// Move as many enqueued jobs to processing as there are free slots.
    fn take_ready(&self) -> Vec<(JobRecord, CancellationToken)> {
        let mut entries = self.lock();
        let running = entries
            .iter()
            .filter(|e| e.record.state == QueueState::Processing)
            .count();
        let slots = self.max_concurrent.saturating_sub(running);
        entries
            .iter_mut()
            .filter(|e| e.record.state == QueueState::Enqueued)
            .take(slots)
            .map(|entry| {
                let token = self.shutdown.child_token();
                entry.record.state = QueueState::Processing;
                entry.token = Some(token.clone());
                (entry.record.clone(), token)
            })
            .collect()
    }

    /// Retire a finished job, or park it as scheduled when it asked to run again.
    fn finish(shared: &Arc<Shared>, id: JobId, reschedule: Option<Duration>) {
        let mut entries = shared.lock();
        let Some(index) = entries.iter().position(|e| e.record.id == id) else {
            return;
        };
        match reschedule {
            Some(delay) => {
                let entry = &mut entries[index];
                entry.record.state = QueueState::Scheduled;
                entry.token = None;
                drop(entries);
                Shared::promote_after(shared, id, delay);
            }
            None => {
                entries.remove(index);
            }
        }
    }
}

async fn run_queue_worker(
    shared: Arc<Shared>,
    runner: Arc<dyn JobRunner>,
    mut receiver: mpsc::Receiver<QueueSignal>,
) {
    while let Some(signal) = receiver.recv().await {
        if let QueueSignal::Stop = signal {
            break;
        }
        let mut stop = false;
        while let Ok(next_signal) = receiver.try_recv() {
            if let QueueSignal::Stop = next_signal {
                stop = true;
            }
        }
        if stop {
            break;
        }

        for (record, token) in shared.take_ready() {
            let shared = shared.clone();
            let runner = runner.clone();
            tokio::spawn(async move {
                run_job(shared, runner, record, token).await;
            });
        }
    }
    debug!("job_queue: worker stopped");
}

async fn run_job(
    shared: Arc<Shared>,
    runner: Arc<dyn JobRunner>,
    record: JobRecord,
    token: CancellationToken,
) {
    info!(
        "job_start: #{} {:?} {}",
        record.id,
        record.kind,
        record.project_path.display()
    );

    let task_record = record.clone();
    let task_token = token.clone();
    let result = tokio::spawn(async move { runner.run(&task_record, task_token).await }).await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("job_panicked: #{} error={}", record.id, e);
            JobOutcome::Failed(e.to_string())
        }
    };

    let reschedule = match outcome {
        JobOutcome::Done => {
            info!("job_done: #{}", record.id);
            None
        }
        JobOutcome::Failed(err) => {
            error!(
                "job_failed: #{} {} error={}",
                record.id,
                record.project_path.display(),
                err
            );
            None
        }
        JobOutcome::Reschedule(_) if token.is_cancelled() => None,
        JobOutcome::Reschedule(delay) => {
            info!("job_reschedule: #{} in {:?}", record.id, delay);
            Some(delay)
        }
    };
    Shared::finish(&shared, record.id, reschedule);
    shared.notify();
}
