use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use tracing::{debug, error, warn};

use crate::coords::{ChunkCoord, RegionCoord};
use crate::entity::EntityUid;
use crate::terrain::MobileUid;

use super::atomic_io::write_bytes_atomic;
use super::StorageError;

/// What a queued write belongs to, reported back with its receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveTarget {
    Chunk(ChunkCoord),
    MobileChunk(MobileUid),
    Entity(EntityUid),
    Region(RegionCoord),
}

/// Fully encoded file contents ready to be written.
#[derive(Debug, Clone)]
pub struct SaveJob {
    pub target: SaveTarget,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl SaveJob {
    pub fn write(&self) -> Result<(), StorageError> {
        write_bytes_atomic(&self.path, &self.bytes)
            .map_err(|source| StorageError::io(&self.path, source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SaveTicket(u64);

#[derive(Debug)]
pub struct SaveReceipt {
    pub ticket: SaveTicket,
    pub target: SaveTarget,
    pub result: Result<(), StorageError>,
}

struct QueuedJob {
    ticket: SaveTicket,
    job: SaveJob,
}

/// Single background writer for save files.
///
/// Jobs carry owned bytes, so callers can recycle the source buffers as soon
/// as `enqueue` returns. Whoever owns the source slot keeps it pinned until
/// the matching receipt comes back from [`SaveQueue::try_completed`] or
/// [`SaveQueue::wait_all`].
///
/// Jobs are written in enqueue order. A file must not be read or deleted
/// while [`SaveQueue::is_pending`] holds for its target; use
/// [`SaveQueue::wait_for`] first.
pub struct SaveQueue {
    jobs: Option<mpsc::Sender<QueuedJob>>,
    done_tx: mpsc::Sender<SaveReceipt>,
    done_rx: mpsc::Receiver<SaveReceipt>,
    worker: Option<thread::JoinHandle<()>>,
    next_ticket: u64,
    in_flight: usize,
    pending: HashMap<SaveTarget, usize>,
}

impl SaveQueue {
    pub fn new() -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel::<QueuedJob>();
        let (done_tx, done_rx) = mpsc::channel::<SaveReceipt>();
        let worker_done = done_tx.clone();
        let spawned = thread::Builder::new()
            .name("save-writer".to_string())
            .spawn(move || {
                while let Ok(queued) = jobs_rx.recv() {
                    let result = queued.job.write();
                    let receipt = SaveReceipt {
                        ticket: queued.ticket,
                        target: queued.job.target,
                        result,
                    };
                    if worker_done.send(receipt).is_err() {
                        break;
                    }
                }
            });

        let (jobs, worker) = match spawned {
            Ok(handle) => (Some(jobs_tx), Some(handle)),
            Err(error) => {
                warn!(error = %error, "save_writer_spawn_failed_writing_inline");
                (None, None)
            }
        };

        Self {
            jobs,
            done_tx,
            done_rx,
            worker,
            next_ticket: 0,
            in_flight: 0,
            pending: HashMap::new(),
        }
    }

    /// Hands `job` to the writer thread. If the writer is gone the job is
    /// written on the calling thread and its receipt is still queued.
    pub fn enqueue(&mut self, job: SaveJob) -> SaveTicket {
        let ticket = SaveTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight += 1;
        *self.pending.entry(job.target).or_insert(0) += 1;

        let queued = QueuedJob { ticket, job };
        let rejected = match &self.jobs {
            Some(sender) => match sender.send(queued) {
                Ok(()) => None,
                Err(mpsc::SendError(queued)) => {
                    warn!("save_writer_gone_writing_inline");
                    self.jobs = None;
                    Some(queued)
                }
            },
            None => Some(queued),
        };

        if let Some(queued) = rejected {
            let result = queued.job.write();
            let _ = self.done_tx.send(SaveReceipt {
                ticket: queued.ticket,
                target: queued.job.target,
                result,
            });
        }
        debug!(ticket = ticket.0, "save_enqueued");
        ticket
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_pending(&self, target: SaveTarget) -> bool {
        self.pending.contains_key(&target)
    }

    /// Blocks until every job queued for `target` has been written. Returns
    /// all receipts collected on the way, other targets' included.
    pub fn wait_for(&mut self, target: SaveTarget) -> Vec<SaveReceipt> {
        let mut receipts = Vec::new();
        while self.is_pending(target) {
            match self.done_rx.recv() {
                Ok(receipt) => receipts.push(self.settle(receipt)),
                Err(_) => {
                    error!(in_flight = self.in_flight, "save_writer_disconnected");
                    self.in_flight = 0;
                    self.pending.clear();
                }
            }
        }
        if !receipts.is_empty() {
            debug!(target_kind = ?target, receipts = receipts.len(), "save_target_awaited");
        }
        receipts
    }

    /// Receipts for every job finished since the last call, without blocking.
    pub fn try_completed(&mut self) -> Vec<SaveReceipt> {
        let mut receipts = Vec::new();
        while let Ok(receipt) = self.done_rx.try_recv() {
            receipts.push(self.settle(receipt));
        }
        receipts
    }

    /// Blocks until every queued job has been written.
    pub fn wait_all(&mut self) -> Vec<SaveReceipt> {
        let mut receipts = Vec::new();
        while self.in_flight > 0 {
            match self.done_rx.recv() {
                Ok(receipt) => receipts.push(self.settle(receipt)),
                Err(_) => {
                    error!(in_flight = self.in_flight, "save_writer_disconnected");
                    self.in_flight = 0;
                    self.pending.clear();
                }
            }
        }
        receipts
    }

    fn settle(&mut self, receipt: SaveReceipt) -> SaveReceipt {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Some(count) = self.pending.get_mut(&receipt.target) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(&receipt.target);
            }
        }
        if let Err(error) = &receipt.result {
            error!(target_kind = ?receipt.target, error = %error, "save_write_failed");
        }
        receipt
    }
}

impl Default for SaveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn receipts_come_back_for_every_job() {
        let temp = TempDir::new().expect("temp");
        let mut queue = SaveQueue::new();
        let first = queue.enqueue(SaveJob {
            target: SaveTarget::Chunk(ChunkCoord::new(0, 0)),
            path: temp.path().join("chunk_data").join("0_0.cdat"),
            bytes: vec![1, 2, 3],
        });
        let second = queue.enqueue(SaveJob {
            target: SaveTarget::Entity(EntityUid(5)),
            path: temp.path().join("entity_data").join("5.edat"),
            bytes: vec![4],
        });
        assert_eq!(queue.in_flight(), 2);

        let mut receipts = queue.wait_all();
        receipts.sort_by_key(|receipt| receipt.ticket);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].ticket, first);
        assert_eq!(receipts[1].ticket, second);
        assert!(receipts.iter().all(|receipt| receipt.result.is_ok()));
        assert_eq!(
            fs::read(temp.path().join("chunk_data").join("0_0.cdat")).expect("read"),
            vec![1, 2, 3]
        );
        assert!(queue.try_completed().is_empty());
    }

    #[test]
    fn waiting_for_a_target_returns_after_its_last_write() {
        let temp = TempDir::new().expect("temp");
        let mut queue = SaveQueue::new();
        for i in 0..200u64 {
            queue.enqueue(SaveJob {
                target: SaveTarget::Entity(EntityUid(i)),
                path: temp.path().join("entity_data").join(format!("{i}.edat")),
                bytes: vec![0; 64],
            });
        }
        let target = SaveTarget::Chunk(ChunkCoord::new(1, 1));
        let path = temp.path().join("chunk_data").join("1_1.cdat");
        queue.enqueue(SaveJob {
            target,
            path: path.clone(),
            bytes: vec![1],
        });
        queue.enqueue(SaveJob {
            target,
            path: path.clone(),
            bytes: vec![2],
        });
        assert!(queue.is_pending(target));

        let receipts = queue.wait_for(target);
        assert!(!queue.is_pending(target));
        assert_eq!(receipts.len(), 202);
        assert_eq!(fs::read(&path).expect("read"), vec![2]);
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.wait_for(target).is_empty());
    }

    #[test]
    fn failed_writes_are_reported_not_dropped() {
        let temp = TempDir::new().expect("temp");
        let blocker = temp.path().join("not_a_dir");
        fs::write(&blocker, b"file").expect("blocker");

        let mut queue = SaveQueue::new();
        queue.enqueue(SaveJob {
            target: SaveTarget::Region(RegionCoord::new(0, 0)),
            path: blocker.join("0_0.rdat"),
            bytes: vec![0],
        });
        let receipts = queue.wait_all();
        assert_eq!(receipts.len(), 1);
        assert!(matches!(receipts[0].result, Err(StorageError::Io { .. })));
    }
}
