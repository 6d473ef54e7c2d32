//! Serial edit worker.
//!
//! One background thread owns an [`IncrementalWriter`] and processes
//! commands strictly in arrival order, so every append sees the offsets
//! left by the previous one. Callers talk to it through a command channel
//! and one-shot reply channels.
//!
//! Scheduled edits are debounced through an [`EditScheduler`]: the worker
//! sleeps until the next deadline or command, whichever comes first. An
//! append that has started always finishes before the next command is read.
//! A direct append drops any scheduled edit still pending for the same
//! stream.

use super::incremental::{Edit, EditTarget, IncrementalWriter};
use super::scheduler::EditScheduler;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::mapping::DocumentMapping;
use crate::xref::XrefState;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

/// Notifications from the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A debounced batch was appended.
    Appended {
        /// Number of edits in the batch
        edits: usize,
        /// Length of the new buffer
        len: usize,
    },
    /// A debounced batch failed; the writer state is unchanged.
    AppendFailed(String),
    /// No append has happened for the idle period; a full re-parse of
    /// [`EditSession::bytes`] is due.
    ReconcileDue,
}

enum Command {
    Open {
        bytes: Vec<u8>,
        mapping: DocumentMapping,
        reply: Sender<Result<usize>>,
    },
    ApplyEdits {
        edits: Vec<Edit>,
        reply: Sender<Result<Vec<u8>>>,
    },
    Schedule(Edit),
    Flush {
        reply: Sender<Result<Option<Vec<u8>>>>,
    },
    Bytes {
        reply: Sender<Option<Vec<u8>>>,
    },
    State {
        reply: Sender<Option<XrefState>>,
    },
    Shutdown,
}

/// Handle to a running edit worker.
pub struct EditSession {
    commands: Sender<Command>,
    events: Receiver<SessionEvent>,
    worker: Option<JoinHandle<()>>,
}

impl EditSession {
    /// Start the worker thread.
    pub fn spawn(config: SessionConfig) -> Self {
        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (event_tx, event_rx) = unbounded::<SessionEvent>();

        let worker = std::thread::spawn(move || {
            let mut worker = Worker {
                writer: IncrementalWriter::new().with_xref_widths(config.xref_widths),
                scheduler: EditScheduler::new(config.debounce, config.reconcile_idle),
                events: event_tx,
            };
            worker.run(cmd_rx);
        });

        Self {
            commands: cmd_tx,
            events: event_rx,
            worker: Some(worker),
        }
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.commands.send(make(tx)).map_err(|_| Error::SessionClosed)?;
        rx.recv().map_err(|_| Error::SessionClosed)
    }

    /// Open the writer on `bytes`. Returns the mapped page count.
    pub fn open(&self, bytes: Vec<u8>, mapping: DocumentMapping) -> Result<usize> {
        self.call(|reply| Command::Open { bytes, mapping, reply })?
    }

    /// Append `edits` as one revision now, after any command already queued.
    pub fn apply_edits(&self, edits: Vec<Edit>) -> Result<Vec<u8>> {
        self.call(|reply| Command::ApplyEdits { edits, reply })?
    }

    /// Queue `edit` for the next debounced append.
    pub fn schedule(&self, edit: Edit) -> Result<()> {
        self.commands.send(Command::Schedule(edit)).map_err(|_| Error::SessionClosed)
    }

    /// Append queued edits immediately. Returns `None` when nothing was
    /// queued.
    pub fn flush(&self) -> Result<Option<Vec<u8>>> {
        self.call(|reply| Command::Flush { reply })?
    }

    /// Copy of the latest buffer, `None` while closed.
    pub fn bytes(&self) -> Result<Option<Vec<u8>>> {
        self.call(|reply| Command::Bytes { reply })
    }

    /// Anchor state of the latest revision, `None` while closed.
    pub fn xref_state(&self) -> Result<Option<XrefState>> {
        self.call(|reply| Command::State { reply })
    }

    /// Worker notifications.
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Stop the worker after it drains queued commands. Pending scheduled
    /// edits are appended first.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Shutdown);
        handle
            .join()
            .map_err(|_| Error::InvalidState("edit worker panicked".to_string()))
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Edit session shutdown failed: {}", e);
        }
    }
}

struct Worker {
    writer: IncrementalWriter,
    scheduler: EditScheduler,
    events: Sender<SessionEvent>,
}

impl Worker {
    fn run(&mut self, commands: Receiver<Command>) {
        log::debug!("Edit worker started");
        loop {
            let next = [self.scheduler.flush_deadline(), self.reconcile_deadline()]
                .into_iter()
                .flatten()
                .min();

            let received = match next {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    commands.recv_timeout(wait)
                },
                None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(Command::Shutdown) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => self.on_timer(Instant::now()),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let leftover = self.scheduler.drain();
        if !leftover.is_empty() {
            log::debug!("Appending {} pending edit(s) before shutdown", leftover.len());
            self.append(leftover);
        }
        log::debug!("Edit worker stopped");
    }

    /// Scheduler key: the resolved object when the mapping knows it, so a
    /// slot and a reference to the same stream collide.
    fn key(&self, edit: &Edit) -> EditTarget {
        self.writer
            .resolve_target(edit.target)
            .map_or(edit.target, EditTarget::Ref)
    }

    fn reconcile_deadline(&self) -> Option<Instant> {
        if self.scheduler.has_pending() {
            return None;
        }
        self.scheduler.reconcile_deadline()
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open { bytes, mapping, reply } => {
                let _ = reply.send(self.writer.open(bytes, mapping));
            },
            Command::ApplyEdits { edits, reply } => {
                let result = self.writer.apply_edits(&edits);
                if result.is_ok() && !edits.is_empty() {
                    for edit in &edits {
                        if self.scheduler.cancel(&self.key(edit)) {
                            log::debug!("Direct append superseded a scheduled edit");
                        }
                    }
                    self.scheduler.record_append(Instant::now());
                }
                let _ = reply.send(result);
            },
            Command::Schedule(edit) => {
                let key = self.key(&edit);
                if self.scheduler.schedule_as(key, edit, Instant::now()) {
                    log::trace!("Scheduled edit superseded a pending one");
                }
            },
            Command::Flush { reply } => {
                let batch = self.scheduler.drain();
                let result = if batch.is_empty() {
                    Ok(None)
                } else {
                    self.writer.apply_edits(&batch).map(Some)
                };
                if matches!(result, Ok(Some(_))) {
                    self.scheduler.record_append(Instant::now());
                }
                let _ = reply.send(result);
            },
            Command::Bytes { reply } => {
                let _ = reply.send(self.writer.bytes().map(<[u8]>::to_vec));
            },
            Command::State { reply } => {
                let _ = reply.send(self.writer.state().cloned());
            },
            Command::Shutdown => {},
        }
    }

    fn on_timer(&mut self, now: Instant) {
        if let Some(batch) = self.scheduler.take_due(now) {
            log::debug!("Debounce elapsed, appending {} edit(s)", batch.len());
            self.append(batch);
        } else if self.scheduler.reconcile_due(now) {
            self.scheduler.dispatch_reconcile();
            let _ = self.events.send(SessionEvent::ReconcileDue);
        }
    }

    fn append(&mut self, batch: Vec<Edit>) {
        match self.writer.apply_edits(&batch) {
            Ok(bytes) => {
                self.scheduler.record_append(Instant::now());
                let _ = self.events.send(SessionEvent::Appended {
                    edits: batch.len(),
                    len: bytes.len(),
                });
            },
            Err(e) => {
                log::warn!("Debounced append failed: {}", e);
                let _ = self.events.send(SessionEvent::AppendFailed(e.to_string()));
            },
        }
    }
}
