//! recollect correlates the tool-call hooks of a command-line assistant.
//!
//! # Overview
//! Every hook runs as its own short-lived process, so the pipeline
//! communicates only through a shared on-disk mailbox:
//!
//! - pre capture writes a pending event before a tool runs
//! - post capture pairs the result with its pending event
//! - orphan sweeps remove pending events that never got a result
//! - the aggregator summarizes a session's completed records
//! - the stop archiver merges those records into the session transcript
//!
//! # Architecture
//! [`mailbox::Mailbox`] is the only shared state. Matching and cleanup
//! policies are traits so each can be swapped without touching the rest
//! of the pipeline; [`context::HookContext`] bundles the choices made for
//! one process.

/// Session statistics, completeness scoring and transcript merging
pub mod aggregate;

/// Summary extraction for deep-analysis tools
pub mod analysis;

/// Stop-time archival of enriched conversations
pub mod archive;

/// Pre and post tool-call capture
pub mod capture;

/// Orphan sweeps, retention and cleanup policies
pub mod cleanup;

/// Configuration file and environment handling
pub mod config;

pub mod context;

/// Error types and handling
pub mod error;

/// Records exchanged through the mailbox
pub mod events;

pub mod mailbox;

/// Pending-event matching strategies
pub mod matching;

pub mod payload;

/// Transcript parsing
pub mod transcript;

pub use archive::{ArchiveOutcome, ConversationSink, MailboxSink, StopRequest, archive_stop};
pub use capture::{capture_post, capture_pre};
pub use config::HooksConfig;
pub use context::HookContext;
pub use error::{HookError, HookResult};
pub use mailbox::{FsMailbox, InMemoryMailbox, Mailbox, MailboxKey};
pub use payload::Payload;
