// Per-variable, per-site lock state and version history.
//
// A `Variable` is the leaf of the engine: it owns its lock table and its
// committed-value history, and never reaches back into the transaction or
// site that touches it — callers pass transaction ids in, the variable
// hands results back.

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::common::TransactionId;

/// Current lock state of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    Read,
    Write,
}

/// Whether a variable can currently serve reads/writes at its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    Unavailable,
    Recovering,
}

/// One entry in a variable's FIFO wait queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitEntry {
    pub mode: LockMode,
    pub tid: TransactionId,
}

/// Outcome of a read-lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Granted(i64),
    Blocked,
}

/// Outcome of a write-lock attempt. Carries no value: the write isn't
/// visible to anyone until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Granted,
    Blocked,
}

/// A single key at a single site: value history plus SS2PL lock state.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: String,
    pub replicated: bool,
    committed: BTreeMap<u64, i64>,
    staged: Option<i64>,
    lock_mode: LockMode,
    writer: Option<TransactionId>,
    readers: std::collections::HashSet<TransactionId>,
    waitq: VecDeque<WaitEntry>,
    availability: Availability,
}

impl Variable {
    /// Creates a variable seeded with `(0, initial_value)`, as required by
    /// invariant 4 (committed history non-empty, strictly ascending keys).
    pub fn new(id: impl Into<String>, initial_value: i64, replicated: bool) -> Self {
        let mut committed = BTreeMap::new();
        committed.insert(0, initial_value);
        Self {
            id: id.into(),
            replicated,
            committed,
            staged: None,
            lock_mode: LockMode::None,
            writer: None,
            readers: std::collections::HashSet::new(),
            waitq: VecDeque::new(),
            availability: Availability::Ready,
        }
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn writer(&self) -> Option<&TransactionId> {
        self.writer.as_ref()
    }

    pub fn readers(&self) -> &std::collections::HashSet<TransactionId> {
        &self.readers
    }

    pub fn waitq(&self) -> &VecDeque<WaitEntry> {
        &self.waitq
    }

    fn latest_committed(&self) -> i64 {
        *self
            .committed
            .values()
            .next_back()
            .expect("committed history is never empty")
    }

    fn has_write_waiting(&self) -> bool {
        self.waitq.iter().any(|e| e.mode == LockMode::Write)
    }

    fn enqueue(&mut self, mode: LockMode, tid: &TransactionId) {
        if self
            .waitq
            .iter()
            .any(|e| e.mode == mode && &e.tid == tid)
        {
            return;
        }
        self.waitq.push_back(WaitEntry {
            mode,
            tid: tid.clone(),
        });
    }

    /// Section 4.1 Acquire-read.
    pub fn acquire_read(&mut self, tid: &TransactionId) -> ReadOutcome {
        if self.availability != Availability::Ready {
            return ReadOutcome::Blocked;
        }
        match self.lock_mode {
            LockMode::None => {
                self.lock_mode = LockMode::Read;
                self.readers.insert(tid.clone());
                ReadOutcome::Granted(self.latest_committed())
            }
            LockMode::Read if self.readers.contains(tid) => {
                ReadOutcome::Granted(self.latest_committed())
            }
            LockMode::Read if !self.has_write_waiting() => {
                self.readers.insert(tid.clone());
                ReadOutcome::Granted(self.latest_committed())
            }
            LockMode::Read => {
                self.enqueue(LockMode::Read, tid);
                ReadOutcome::Blocked
            }
            LockMode::Write if self.writer.as_ref() == Some(tid) => {
                ReadOutcome::Granted(self.latest_committed())
            }
            LockMode::Write => {
                self.enqueue(LockMode::Read, tid);
                ReadOutcome::Blocked
            }
        }
    }

    /// Section 4.1 Acquire-write.
    pub fn acquire_write(&mut self, tid: &TransactionId) -> WriteOutcome {
        match self.lock_mode {
            LockMode::None => {
                self.lock_mode = LockMode::Write;
                self.writer = Some(tid.clone());
                WriteOutcome::Granted
            }
            LockMode::Read
                if self.readers.len() == 1
                    && self.readers.contains(tid)
                    && !self.has_write_waiting() =>
            {
                self.readers.clear();
                self.lock_mode = LockMode::Write;
                self.writer = Some(tid.clone());
                WriteOutcome::Granted
            }
            LockMode::Read => {
                self.enqueue(LockMode::Write, tid);
                WriteOutcome::Blocked
            }
            LockMode::Write if self.writer.as_ref() == Some(tid) => WriteOutcome::Granted,
            LockMode::Write => {
                self.enqueue(LockMode::Write, tid);
                WriteOutcome::Blocked
            }
        }
    }

    /// Stages a value for the current write-lock holder. Only valid after
    /// `acquire_write` returned `Granted` for `tid`.
    pub fn stage(&mut self, tid: &TransactionId, value: i64) {
        debug_assert_eq!(self.writer.as_ref(), Some(tid));
        self.staged = Some(value);
    }

    /// Returns the value committed with the greatest timestamp `<= ts`, or
    /// `None` if nothing had committed by then. Only meaningful while the
    /// variable is READY — callers are expected to check availability
    /// themselves (the data manager enforces it).
    pub fn snapshot(&self, ts: u64) -> Option<i64> {
        self.committed.range(..=ts).next_back().map(|(_, v)| *v)
    }

    /// Appends `staged` to the committed history if `tid` holds the write
    /// lock here, and clears the RECOVERING flag. Returns whether a write
    /// was actually committed.
    pub fn commit_write(&mut self, tid: &TransactionId, ts: u64) -> bool {
        if self.lock_mode == LockMode::Write && self.writer.as_ref() == Some(tid) {
            let value = self.staged.take().unwrap_or_else(|| self.latest_committed());
            self.committed.insert(ts, value);
            self.availability = Availability::Ready;
            true
        } else {
            false
        }
    }

    /// Drops `tid` from `writer`/`readers`, strips it from the wait queue,
    /// and promotes the next eligible waiters. Idempotent: a `tid` that
    /// holds nothing here is a no-op.
    pub fn release(&mut self, tid: &TransactionId) {
        match self.lock_mode {
            LockMode::Write if self.writer.as_ref() == Some(tid) => {
                self.writer = None;
                self.lock_mode = LockMode::None;
            }
            LockMode::Read => {
                self.readers.remove(tid);
                if self.readers.is_empty() {
                    self.lock_mode = LockMode::None;
                }
            }
            _ => {}
        }
        self.waitq.retain(|e| &e.tid != tid);
        self.promote_waiters();
    }

    /// Section 4.1 Promote-waiters.
    fn promote_waiters(&mut self) {
        match self.lock_mode {
            LockMode::None => {
                if let Some(head) = self.waitq.pop_front() {
                    match head.mode {
                        LockMode::Write => {
                            self.lock_mode = LockMode::Write;
                            self.writer = Some(head.tid);
                        }
                        LockMode::Read => {
                            self.lock_mode = LockMode::Read;
                            self.readers.insert(head.tid);
                            while let Some(front) = self.waitq.front() {
                                if front.mode == LockMode::Write {
                                    break;
                                }
                                let entry = self.waitq.pop_front().unwrap();
                                self.readers.insert(entry.tid);
                            }
                        }
                        LockMode::None => unreachable!("None never queued"),
                    }
                }
            }
            LockMode::Read => {
                while let Some(front) = self.waitq.front() {
                    if front.mode == LockMode::Write
                        && self.readers.len() == 1
                        && self.readers.contains(&front.tid)
                    {
                        let entry = self.waitq.pop_front().unwrap();
                        self.readers.clear();
                        self.lock_mode = LockMode::Write;
                        self.writer = Some(entry.tid);
                        break;
                    } else if front.mode == LockMode::Read && !self.has_write_waiting() {
                        let entry = self.waitq.pop_front().unwrap();
                        self.readers.insert(entry.tid);
                    } else {
                        break;
                    }
                }
            }
            LockMode::Write => {}
        }
    }

    /// Section 4.2 `fail`: clears all lock state, marks UNAVAILABLE,
    /// preserves committed history.
    pub fn fail(&mut self) {
        self.lock_mode = LockMode::None;
        self.writer = None;
        self.readers.clear();
        self.waitq.clear();
        self.staged = None;
        self.availability = Availability::Unavailable;
    }

    /// Section 4.2 `recover`: replicated variables come back RECOVERING
    /// (unreadable by RW transactions until the next committed write here),
    /// unreplicated variables come back READY directly.
    pub fn recover(&mut self) {
        self.availability = if self.replicated {
            Availability::Recovering
        } else {
            Availability::Ready
        };
        trace!(variable = %self.id, replicated = self.replicated, "site recovery set availability");
    }

    pub fn latest_committed_value(&self) -> i64 {
        self.latest_committed()
    }
}
