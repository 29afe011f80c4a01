// Transaction registry entries.
//
// Unlike the committed-history-and-locks state that lives on `Variable`, a
// `Transaction` only tracks the bookkeeping the transaction manager needs to
// route its commands: when it started, whether it's read-only, and whether
// a site failure has already doomed it to abort.

use crate::common::LogicalTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Live,
    WillAbort,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub start_ts: LogicalTime,
    pub read_only: bool,
    pub status: TxnStatus,
}

impl Transaction {
    pub fn new(id: impl Into<String>, start_ts: LogicalTime, read_only: bool) -> Self {
        Self {
            id: id.into(),
            start_ts,
            read_only,
            status: TxnStatus::Live,
        }
    }
}
