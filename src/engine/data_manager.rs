// Per-site storage and lock table.
//
// A `DataManager` owns every `Variable` placed at its site under the
// even/odd replication rule (section 3) and exposes the non-blocking
// read/write/commit/abort/failure surface the transaction manager drives.
// Blocking is never represented by the calling thread waiting: every method
// here returns immediately, with "blocked" encoded as a value.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, warn};

use crate::common::{home_site, is_replicated, variable_id, SiteId, TransactionId, VariableId};
use crate::engine::variable::{ReadOutcome, Variable, WriteOutcome};

pub struct DataManager {
    pub id: SiteId,
    variables: HashMap<VariableId, Variable>,
    up: bool,
    touched_by: HashMap<TransactionId, HashSet<VariableId>>,
}

impl DataManager {
    /// Builds the site's variable table per the placement rule in section 3:
    /// even-numbered variables live everywhere, odd-numbered variables live
    /// only at site `(k mod 10) + 1`.
    pub fn new(id: SiteId, variable_count: usize) -> Self {
        let mut variables = HashMap::new();
        for k in 1..=variable_count {
            let replicated = is_replicated(k);
            if replicated || home_site(k) == id {
                variables.insert(
                    variable_id(k),
                    Variable::new(variable_id(k), 10 * k as i64, replicated),
                );
            }
        }
        Self {
            id,
            variables,
            up: true,
            touched_by: HashMap::new(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn has_variable(&self, var: &str) -> bool {
        self.variables.contains_key(var)
    }

    fn touch(&mut self, tid: &TransactionId, var: &str) {
        self.touched_by
            .entry(tid.clone())
            .or_default()
            .insert(var.to_string());
    }

    /// Section 4.2 `read`.
    pub fn read(&mut self, tid: &TransactionId, var: &str) -> ReadOutcome {
        let Some(variable) = self.variables.get_mut(var) else {
            return ReadOutcome::Blocked;
        };
        let outcome = variable.acquire_read(tid);
        if let ReadOutcome::Granted(value) = outcome {
            debug!(site = self.id, %tid, var, value, "read granted");
            self.touch(tid, var);
        }
        outcome
    }

    /// Section 4.2 `write_try`: attempts to acquire the write lock without
    /// staging a value. Staging happens separately in `write_commit_local`
    /// once every UP holder has granted (see `TransactionManager::write`).
    pub fn write_try(&mut self, tid: &TransactionId, var: &str) -> WriteOutcome {
        let Some(variable) = self.variables.get_mut(var) else {
            return WriteOutcome::Blocked;
        };
        let outcome = variable.acquire_write(tid);
        if outcome == WriteOutcome::Granted {
            self.touch(tid, var);
        }
        outcome
    }

    /// Stages `value` at this site for `tid`, which must already hold the
    /// write lock on `var` (granted by a prior `write_try`).
    pub fn write_commit_local(&mut self, tid: &TransactionId, var: &str, value: i64) {
        if let Some(variable) = self.variables.get_mut(var) {
            variable.stage(tid, value);
        }
    }

    /// Section 4.2 `snapshot`: only served while the variable is READY.
    pub fn snapshot(&self, ts: u64, var: &str) -> Option<i64> {
        let variable = self.variables.get(var)?;
        use crate::engine::variable::Availability;
        if variable.availability() != Availability::Ready {
            return None;
        }
        variable.snapshot(ts)
    }

    /// Section 4.2 `commit`. Commits every variable `tid` holds the write
    /// lock on, then releases all of `tid`'s locks at this site (including
    /// any read locks it held without ever writing).
    pub fn commit(&mut self, tid: &TransactionId, ts: u64) {
        for variable in self.variables.values_mut() {
            variable.commit_write(tid, ts);
            variable.release(tid);
        }
        if self.still_waiting(tid) {
            error!(site = self.id, %tid, "invariant breach: transaction still queued after commit");
        }
        self.touched_by.remove(tid);
    }

    /// Section 4.2 `abort`: discards any staged writes (by never committing
    /// them) and releases every lock `tid` holds at this site.
    pub fn abort(&mut self, tid: &TransactionId) {
        for variable in self.variables.values_mut() {
            variable.release(tid);
        }
        self.touched_by.remove(tid);
    }

    fn still_waiting(&self, tid: &TransactionId) -> bool {
        self.variables
            .values()
            .any(|v| v.waitq().iter().any(|e| &e.tid == tid))
    }

    /// Section 4.2 `fail`. Returns the set of transactions that had touched
    /// this site since it last came up, so the caller can mark them
    /// WILL_ABORT.
    pub fn fail(&mut self) -> HashSet<TransactionId> {
        self.up = false;
        for variable in self.variables.values_mut() {
            variable.fail();
        }
        warn!(site = self.id, "site failed");
        std::mem::take(&mut self.touched_by).into_keys().collect()
    }

    /// Section 4.2 `recover`.
    pub fn recover(&mut self) {
        self.up = true;
        for variable in self.variables.values_mut() {
            variable.recover();
        }
        warn!(site = self.id, "site recovered");
    }

    /// Section 4.3 `dump`: latest committed value of every variable here,
    /// sorted for stable output.
    pub fn dump(&self) -> Vec<(VariableId, i64)> {
        let mut entries: Vec<_> = self
            .variables
            .iter()
            .map(|(id, v)| (id.clone(), v.latest_committed_value()))
            .collect();
        entries.sort_by(|a, b| variable_sort_key(&a.0).cmp(&variable_sort_key(&b.0)));
        entries
    }

    pub(crate) fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }
}

fn variable_sort_key(id: &str) -> u32 {
    id.trim_start_matches('x').parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_holds_evens_and_its_own_odd() {
        let dm = DataManager::new(2, 20);
        assert!(dm.has_variable("x2"));
        assert!(dm.has_variable("x1")); // home_site(1) == 2
        assert!(!dm.has_variable("x3")); // home_site(3) == 4
    }

    #[test]
    fn write_then_commit_is_visible_via_snapshot() {
        let mut dm = DataManager::new(2, 20);
        let tid = "T1".to_string();
        assert_eq!(dm.write_try(&tid, "x2"), WriteOutcome::Granted);
        dm.write_commit_local(&tid, "x2", 99);
        dm.commit(&tid, 5);
        assert_eq!(dm.snapshot(5, "x2"), Some(99));
    }

    #[test]
    fn fail_reports_touched_transactions_and_clears_them() {
        let mut dm = DataManager::new(2, 20);
        let tid = "T1".to_string();
        dm.read(&tid, "x2");
        let touched = dm.fail();
        assert!(touched.contains(&tid));
        assert!(!dm.is_up());
    }

    #[test]
    fn abort_releases_locks_without_committing() {
        let mut dm = DataManager::new(2, 20);
        let tid = "T1".to_string();
        dm.write_try(&tid, "x2");
        dm.write_commit_local(&tid, "x2", 123);
        dm.abort(&tid);
        assert_eq!(dm.snapshot(100, "x2"), Some(20));
    }
}
