// Transaction manager: routes commands, owns the ten sites, drives the
// pending-operation queue and deadlock detection.
//
// This is the cross-site coordinator described in section 4.3. It never
// blocks: a read or write that can't be granted right away is pushed onto
// `pending` and retried after every subsequent command, exactly like the
// lock manager's wait queue but at transaction-operation granularity
// instead of lock-request granularity.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::common::{LogicalTime, TransactionId, VariableId};
use crate::config::EngineConfig;
use crate::engine::data_manager::DataManager;
use crate::engine::deadlock::DeadlockDetector;
use crate::engine::dispatcher::Command;
use crate::engine::transaction::{Transaction, TxnStatus};
use crate::engine::variable::{ReadOutcome, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct PendingOp {
    kind: OpKind,
    tid: TransactionId,
    var: VariableId,
    value: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpResult {
    Granted,
    Blocked,
}

pub struct TransactionManager {
    sites: Vec<DataManager>,
    txns: HashMap<TransactionId, Transaction>,
    pending: VecDeque<PendingOp>,
    clock: LogicalTime,
}

impl TransactionManager {
    pub fn new(config: EngineConfig) -> Self {
        let sites = (1..=config.site_count)
            .map(|id| DataManager::new(id, config.variable_count))
            .collect();
        Self {
            sites,
            txns: HashMap::new(),
            pending: VecDeque::new(),
            clock: 0,
        }
    }

    /// Section 4.3 `operate`/dispatch. Runs the command's handler, advances
    /// the logical clock, retries the pending queue, and runs deadlock
    /// detection once more if a victim was aborted.
    pub fn dispatch(&mut self, command: Command) {
        match command {
            Command::Begin(tid) => self.begin(tid, false),
            Command::BeginReadOnly(tid) => self.begin(tid, true),
            Command::Read(tid, var) => self.enqueue_read(tid, var),
            Command::Write(tid, var, value) => self.enqueue_write(tid, var, value),
            Command::End(tid) => self.end(&tid),
            Command::Fail(site) => self.fail(site),
            Command::Recover(site) => self.recover(site),
            Command::Dump => self.dump(),
        }

        self.clock += 1;
        self.retry_pending();
        if self.detect_deadlock() {
            self.retry_pending();
        }
    }

    fn begin(&mut self, tid: TransactionId, read_only: bool) {
        info!(%tid, read_only, start_ts = self.clock, "transaction begins");
        self.txns
            .insert(tid.clone(), Transaction::new(tid, self.clock, read_only));
    }

    fn enqueue_read(&mut self, tid: TransactionId, var: VariableId) {
        self.pending.push_back(PendingOp {
            kind: OpKind::Read,
            tid,
            var,
            value: None,
        });
    }

    fn enqueue_write(&mut self, tid: TransactionId, var: VariableId, value: i64) {
        self.pending.push_back(PendingOp {
            kind: OpKind::Write,
            tid,
            var,
            value: Some(value),
        });
    }

    /// Section 4.3 `read`.
    fn attempt_read(&mut self, tid: &TransactionId, var: &str) -> Option<i64> {
        let Some(txn) = self.txns.get(tid) else {
            return None;
        };
        if txn.read_only {
            let ts = txn.start_ts;
            for site in &self.sites {
                if !site.is_up() {
                    continue;
                }
                if let Some(value) = site.snapshot(ts, var) {
                    return Some(value);
                }
            }
            None
        } else {
            for site in &mut self.sites {
                if !site.is_up() {
                    continue;
                }
                if let ReadOutcome::Granted(value) = site.read(tid, var) {
                    return Some(value);
                }
            }
            None
        }
    }

    /// Section 4.3 `write`: all-or-nothing across every UP site holding
    /// `var`. Sites that already grant the lock on a retry are idempotent
    /// (see `Variable::acquire_write`), so partial progress from an earlier
    /// blocked attempt is preserved rather than rolled back.
    fn attempt_write(&mut self, tid: &TransactionId, var: &str, value: i64) -> OpResult {
        let holder_indices: Vec<usize> = self
            .sites
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_up() && s.has_variable(var))
            .map(|(i, _)| i)
            .collect();

        if holder_indices.is_empty() {
            return OpResult::Blocked;
        }

        let mut all_granted = true;
        for &i in &holder_indices {
            if self.sites[i].write_try(tid, var) == WriteOutcome::Blocked {
                all_granted = false;
            }
        }

        if all_granted {
            for &i in &holder_indices {
                self.sites[i].write_commit_local(tid, var, value);
            }
            debug!(%tid, var, value, sites = ?holder_indices.iter().map(|i| self.sites[*i].id).collect::<Vec<_>>(), "write granted");
            OpResult::Granted
        } else {
            OpResult::Blocked
        }
    }

    /// Section 4.3 `retry_pending`: a single pass over the queue in order.
    fn retry_pending(&mut self) {
        let ops: VecDeque<PendingOp> = std::mem::take(&mut self.pending);
        for op in ops {
            if !self.txns.contains_key(&op.tid) {
                continue;
            }
            let granted = match op.kind {
                OpKind::Read => match self.attempt_read(&op.tid, &op.var) {
                    Some(value) => {
                        println!("{}: {}", op.var, value);
                        true
                    }
                    None => {
                        warn!(tid = %op.tid, var = %op.var, "read blocked");
                        false
                    }
                },
                OpKind::Write => {
                    let value = op.value.expect("write op always carries a value");
                    match self.attempt_write(&op.tid, &op.var, value) {
                        OpResult::Granted => {
                            println!("{} writes {}: {}", op.tid, op.var, value);
                            true
                        }
                        OpResult::Blocked => {
                            warn!(tid = %op.tid, var = %op.var, "write blocked");
                            false
                        }
                    }
                }
            };
            if !granted {
                self.pending.push_back(op);
            }
        }
    }

    /// Section 4.3 `end`.
    fn end(&mut self, tid: &TransactionId) {
        let Some(txn) = self.txns.get(tid) else {
            warn!(%tid, "end of unknown transaction");
            return;
        };
        if txn.status == TxnStatus::WillAbort {
            for site in &mut self.sites {
                site.abort(tid);
            }
            println!("{tid} aborts");
            info!(%tid, "transaction aborted (touched a failed site)");
        } else {
            let ts = self.clock;
            for site in &mut self.sites {
                site.commit(tid, ts);
            }
            println!("{tid} commits");
            info!(%tid, commit_ts = ts, "transaction committed");
        }
        self.txns.remove(tid);
        self.pending.retain(|op| &op.tid != tid);
    }

    /// Section 4.3 `fail`.
    fn fail(&mut self, site: usize) {
        let idx = site - 1;
        let touched = self.sites[idx].fail();
        for tid in touched {
            if let Some(txn) = self.txns.get_mut(&tid) {
                txn.status = TxnStatus::WillAbort;
                warn!(%tid, site, "transaction marked to abort: touched a failed site");
            }
        }
    }

    /// Section 4.3 `recover`: a no-op if the site is already up.
    fn recover(&mut self, site: usize) {
        let idx = site - 1;
        if self.sites[idx].is_up() {
            return;
        }
        self.sites[idx].recover();
    }

    /// Section 4.3 `dump`.
    fn dump(&self) {
        for site in &self.sites {
            let entries = site.dump();
            let rendered: Vec<String> = entries
                .iter()
                .map(|(id, value)| format!("{id}: {value}"))
                .collect();
            println!("site {} - {}", site.id, rendered.join(", "));
        }
    }

    /// Section 4.4: builds the waits-for graph, finds a cycle, aborts the
    /// victim. Returns whether a victim was aborted.
    fn detect_deadlock(&mut self) -> bool {
        let graph = DeadlockDetector::build_graph(&self.sites);
        let Some(cycle) = DeadlockDetector::find_cycle(&graph) else {
            return false;
        };
        let Some(victim) = DeadlockDetector::select_victim(&cycle, &self.txns) else {
            return false;
        };
        for site in &mut self.sites {
            site.abort(&victim);
        }
        self.txns.remove(&victim);
        self.pending.retain(|op| op.tid != victim);
        println!("Deadlock! Transaction {victim} aborted");
        true
    }

    pub fn active_transaction_count(&self) -> usize {
        self.txns.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Latest committed value of `var` at whichever UP site holds it, for
    /// tests and tooling that want to inspect state without scraping
    /// stdout. Mirrors what `dump` prints, one variable at a time.
    pub fn inspect(&self, var: &str) -> Option<i64> {
        self.sites
            .iter()
            .find(|s| s.is_up() && s.has_variable(var))
            .and_then(|s| s.dump().into_iter().find(|(id, _)| id == var))
            .map(|(_, v)| v)
    }

    pub fn transaction_status(&self, tid: &str) -> Option<TxnStatus> {
        self.txns.get(tid).map(|t| t.status)
    }

    pub fn is_active(&self, tid: &str) -> bool {
        self.txns.contains_key(tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tm() -> TransactionManager {
        TransactionManager::new(EngineConfig::default())
    }

    #[test]
    fn basic_write_then_read_in_same_transaction() {
        let mut tm = tm();
        tm.dispatch(Command::Begin("T1".into()));
        tm.dispatch(Command::Write("T1".into(), "x1".into(), 101));
        tm.dispatch(Command::Read("T1".into(), "x1".into()));
        tm.dispatch(Command::End("T1".into()));
        assert_eq!(tm.active_transaction_count(), 0);
        assert_eq!(tm.pending_count(), 0);
    }

    #[test]
    fn read_blocks_until_writer_releases() {
        let mut tm = tm();
        tm.dispatch(Command::Begin("T1".into()));
        tm.dispatch(Command::Begin("T2".into()));
        tm.dispatch(Command::Write("T1".into(), "x2".into(), 22));
        tm.dispatch(Command::Read("T2".into(), "x2".into()));
        assert_eq!(tm.pending_count(), 1);
        tm.dispatch(Command::End("T1".into()));
        assert_eq!(tm.pending_count(), 0);
        tm.dispatch(Command::End("T2".into()));
        assert_eq!(tm.active_transaction_count(), 0);
    }

    #[test]
    fn deadlock_aborts_the_youngest() {
        let mut tm = tm();
        tm.dispatch(Command::Begin("T1".into()));
        tm.dispatch(Command::Begin("T2".into()));
        tm.dispatch(Command::Read("T1".into(), "x1".into()));
        tm.dispatch(Command::Read("T2".into(), "x2".into()));
        tm.dispatch(Command::Write("T1".into(), "x2".into(), 1));
        // T1 now waits for T2. This write closes the cycle and should
        // trigger T2's abort (the younger transaction).
        tm.dispatch(Command::Write("T2".into(), "x1".into(), 2));
        assert!(!tm.txns.contains_key("T2"));
        assert!(tm.txns.contains_key("T1"));
    }

    #[test]
    fn site_failure_marks_touching_transaction_for_abort() {
        let mut tm = tm();
        tm.dispatch(Command::Begin("T1".into()));
        tm.dispatch(Command::Read("T1".into(), "x3".into())); // site 4 is x3's home
        tm.dispatch(Command::Fail(4));
        assert_eq!(tm.txns.get("T1").unwrap().status, TxnStatus::WillAbort);
    }

    #[test]
    fn read_only_transaction_does_not_see_later_commit() {
        let mut tm = tm();
        tm.dispatch(Command::Begin("T1".into()));
        tm.dispatch(Command::Write("T1".into(), "x6".into(), 66));
        tm.dispatch(Command::End("T1".into()));
        tm.dispatch(Command::BeginReadOnly("R1".into()));
        tm.dispatch(Command::Begin("T2".into()));
        tm.dispatch(Command::Write("T2".into(), "x6".into(), 77));
        tm.dispatch(Command::End("T2".into()));
        let snapshot_ts = tm.txns.get("R1").unwrap().start_ts;
        let value = tm
            .sites
            .iter()
            .find_map(|s| s.snapshot(snapshot_ts, "x6"))
            .unwrap();
        assert_eq!(value, 66);
    }
}
