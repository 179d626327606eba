use thiserror::Error;

/// Errors surfaced by a mapper call, matching the subset of §6/§7's error
/// codes that apply on this side of the boundary (`OK` is simply `Ok(())`).
#[derive(Debug, Error)]
pub enum MapError {
    /// Help text has already been emitted by the mapper via
    /// [`crate::model::MapCallbacks::show_help`]; callers must not
    /// re-report this failure.
    #[error("mapping failed (help text already shown)")]
    SilentError,

    #[error("no topology available for node {0}")]
    NotFound(String),

    #[error("out of resources: {0}")]
    OutOfResource(String),
}
