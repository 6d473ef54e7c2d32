//! Fixed-size pool of scan workers.
//!
//! Workers are stateless: each job carries a page's stream text and
//! options, and each result carries the token handed out by
//! [`ScanPool::submit`]. Results arrive in completion order, not
//! submission order.

use super::items::PageItems;
use super::scanner::{scan_page, ScanRequest};
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

/// Correlates a submitted request with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestToken(pub u64);

struct Job {
    token: RequestToken,
    request: ScanRequest,
}

type ScanResult = (RequestToken, Result<PageItems>);

/// Pool of scan worker threads.
pub struct ScanPool {
    jobs: Option<Sender<Job>>,
    results: Receiver<ScanResult>,
    workers: Vec<JoinHandle<()>>,
    next_token: AtomicU64,
    stash: HashMap<RequestToken, Result<PageItems>>,
}

impl ScanPool {
    /// Start `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<ScanResult>();

        let handles = (0..workers.max(1))
            .map(|id| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                std::thread::spawn(move || worker_loop(id, jobs, results))
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers: handles,
            next_token: AtomicU64::new(1),
            stash: HashMap::new(),
        }
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Queue a page for scanning.
    pub fn submit(&self, request: ScanRequest) -> Result<RequestToken> {
        let token = RequestToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let jobs = self.jobs.as_ref().ok_or(Error::SessionClosed)?;
        jobs.send(Job { token, request }).map_err(|_| Error::SessionClosed)?;
        Ok(token)
    }

    /// Next finished result, in completion order.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] when every worker has exited.
    pub fn recv(&mut self) -> Result<ScanResult> {
        if let Some(token) = self.stash.keys().next().copied() {
            if let Some(result) = self.stash.remove(&token) {
                return Ok((token, result));
            }
        }
        self.results.recv().map_err(|_| Error::SessionClosed)
    }

    /// Scan all requests and return the results in request order.
    ///
    /// Results for tokens submitted earlier through [`submit`](Self::submit)
    /// are kept for later [`recv`](Self::recv) calls.
    pub fn scan_all(&mut self, requests: Vec<ScanRequest>) -> Result<Vec<PageItems>> {
        let mut slots: HashMap<RequestToken, usize> = HashMap::new();
        for (slot, request) in requests.into_iter().enumerate() {
            slots.insert(self.submit(request)?, slot);
        }

        let mut out: Vec<Option<PageItems>> = vec![None; slots.len()];
        let mut pending = slots.len();
        while pending > 0 {
            let (token, result) = self.results.recv().map_err(|_| Error::SessionClosed)?;
            match slots.get(&token) {
                Some(&slot) => {
                    out[slot] = Some(result?);
                    pending -= 1;
                },
                None => {
                    self.stash.insert(token, result);
                },
            }
        }
        Ok(out.into_iter().flatten().collect())
    }
}

impl Drop for ScanPool {
    fn drop(&mut self) {
        // Closing the job channel ends every worker loop.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Scan worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(id: usize, jobs: Receiver<Job>, results: Sender<ScanResult>) {
    log::trace!("Scan worker {} started", id);
    for job in jobs.iter() {
        let page = job.request.page_index;
        let result = catch_unwind(AssertUnwindSafe(|| scan_page(&job.request))).map_err(|_| Error::Scan {
            offset: 0,
            reason: format!("scan of page {} panicked", page),
        });
        if results.send((job.token, result)).is_err() {
            break;
        }
    }
    log::trace!("Scan worker {} stopped", id);
}
