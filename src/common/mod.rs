// Shared identifiers used across the engine.
//
// Transaction and site identifiers are opaque: the engine never stores
// pointers or references between sites, variables, and transactions, only
// these ids, and looks everything else up through the owning map. See
// `TransactionManager::txns` and `DataManager::variables`.

/// A transaction identifier as it appears in the command stream (`T1`, `R1`, ...).
pub type TransactionId = String;

/// A variable identifier (`x1` .. `x20`).
pub type VariableId = String;

/// A 1-indexed site identifier (1..=10 for the default configuration).
pub type SiteId = usize;

/// The logical clock value. Increments once per dispatched command and
/// doubles as both start timestamps and commit timestamps.
pub type LogicalTime = u64;

/// Builds the canonical variable id `xK` for a 1-indexed variable number.
pub fn variable_id(k: usize) -> VariableId {
    format!("x{k}")
}

/// Whether variable `k` is replicated (stored at every site) under the
/// even/odd placement rule.
pub fn is_replicated(k: usize) -> bool {
    k % 2 == 0
}

/// The single site (1-indexed) that owns an unreplicated variable `k`.
pub fn home_site(k: usize) -> SiteId {
    (k % 10) + 1
}
