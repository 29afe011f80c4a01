use thiserror::Error;

/// Top-level error type for failures that actually propagate out of the
/// engine — opening the command file and driving the CLI. The four error
/// kinds the spec assigns to the engine itself (bad site id, blocked
/// operation, transaction abort, invariant breach) are not `RceError`
/// variants: a blocked operation is control flow, and the others are
/// reported through `tracing` rather than raised, per the engine's
/// never-panics, never-raises propagation policy.
#[derive(Error, Debug)]
pub enum RceError {
    #[error("failed to read command file {path}: {source}")]
    CommandFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no input file given")]
    MissingInputFile,
}

pub type Result<T> = std::result::Result<T, RceError>;
