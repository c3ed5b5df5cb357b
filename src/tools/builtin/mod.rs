//! Tools shipped with the agent. Each module exposes `definition()`.

pub mod bash;
pub mod edit;
pub mod glob;
pub mod grep;
pub mod read;
pub mod tree;
pub mod write;

/// Directories no search tool descends into.
pub(crate) const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];
