//! Cloud upload of completed records.
//!
//! The engine only ever enqueues. A worker thread owns the uploader and
//! drains the queue; failed uploads are parked in a pending list until the
//! next `retry_pending` pass.

use crate::error::{EngineError, EngineResult};
use crate::storage::{CompletedDrive, CompletedRun};
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncRecord {
    Run(CompletedRun),
    Drive(CompletedDrive),
}

impl SyncRecord {
    pub fn id(&self) -> &str {
        match self {
            SyncRecord::Run(run) => &run.id,
            SyncRecord::Drive(drive) => &drive.id,
        }
    }

    /// Collection name used by the remote endpoint
    pub fn collection(&self) -> &'static str {
        match self {
            SyncRecord::Run(_) => "runs",
            SyncRecord::Drive(_) => "drives",
        }
    }
}

pub trait CloudSync: Send + 'static {
    fn upload(&mut self, record: &SyncRecord) -> EngineResult<()>;
}

/// POSTs each record as JSON to `{endpoint}/{collection}`
pub struct HttpCloudSync {
    endpoint: String,
    timeout: Duration,
    // Built on first use so it lives on the worker thread
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpCloudSync {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(15),
            client: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url_for(&self, record: &SyncRecord) -> String {
        format!("{}/{}", self.endpoint, record.collection())
    }

    fn client(&self) -> &reqwest::blocking::Client {
        self.client.get_or_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(self.timeout)
                .user_agent(concat!("launch-timer/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new())
        })
    }
}

impl CloudSync for HttpCloudSync {
    fn upload(&mut self, record: &SyncRecord) -> EngineResult<()> {
        let response = self
            .client()
            .post(self.url_for(record))
            .json(record)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Sync("network timeout".to_string())
                } else {
                    EngineError::Sync(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Sync(format!("HTTP error: {}", status.as_u16())));
        }
        Ok(())
    }
}

enum SyncCommand {
    Upload(SyncRecord),
    Flush(Sender<()>),
    Shutdown,
}

pub struct SyncQueue {
    tx: Sender<SyncCommand>,
    pending: Arc<Mutex<Vec<SyncRecord>>>,
    worker: Option<JoinHandle<()>>,
}

impl SyncQueue {
    pub fn spawn<S: CloudSync>(uploader: S) -> EngineResult<Self> {
        let (tx, rx) = channel::unbounded();
        let pending = Arc::new(Mutex::new(Vec::new()));
        let worker_pending = Arc::clone(&pending);

        let worker = thread::Builder::new()
            .name("cloud-sync".to_string())
            .spawn(move || run_worker(uploader, rx, worker_pending))
            .map_err(|e| EngineError::Internal(format!("Failed to spawn sync worker: {}", e)))?;

        Ok(Self {
            tx,
            pending,
            worker: Some(worker),
        })
    }

    /// Queue a record for upload. Never blocks.
    pub fn enqueue(&self, record: SyncRecord) {
        let id = record.id().to_string();
        if self.tx.send(SyncCommand::Upload(record)).is_err() {
            log::error!("sync worker gone, {} not queued", id);
        }
    }

    /// Requeue every record whose upload failed. Returns how many were requeued.
    pub fn retry_pending(&self) -> usize {
        let records = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return 0,
        };
        let count = records.len();
        for record in records {
            self.enqueue(record);
        }
        if count > 0 {
            log::info!("retrying {} pending uploads", count);
        }
        count
    }

    pub fn pending(&self) -> Vec<SyncRecord> {
        self.pending
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Wait until everything queued so far has been attempted
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = channel::bounded(1);
        if self.tx.send(SyncCommand::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(SyncCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<S: CloudSync>(
    mut uploader: S,
    rx: Receiver<SyncCommand>,
    pending: Arc<Mutex<Vec<SyncRecord>>>,
) {
    for command in rx.iter() {
        match command {
            SyncCommand::Upload(record) => match uploader.upload(&record) {
                Ok(()) => log::info!("uploaded {}", record.id()),
                Err(e) => {
                    log::warn!("upload of {} failed: {}", record.id(), e);
                    if let Ok(mut pending) = pending.lock() {
                        pending.push(record);
                    }
                }
            },
            SyncCommand::Flush(done) => {
                let _ = done.send(());
            }
            SyncCommand::Shutdown => break,
        }
    }
}
