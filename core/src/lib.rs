//!
//! # Groundwork Core
//!
//! The background analysis engine of the Groundwork language server. It turns workspace
//! and editor events into graphs of background jobs (parsing, metadata decoding, schema
//! preloading, reference decoding, validation, registry lookups), executes them with
//! dependency ordering and per-priority concurrency budgets, and records results in
//! snapshot-isolated per-directory stores. Consumers poll a coalescing change queue to
//! learn what is worth re-publishing.
//!
//! The crate is headless: it knows nothing about LSP framing. A server layer feeds events
//! through [`Engine`] and reads records and change batches back out.

#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::dbg_macro,
	deprecated
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod clients;
pub mod document;
pub mod engine;
pub mod event;
pub mod features;
pub mod fs;
pub mod lang;
pub mod state;
mod work;

pub use engine::{Engine, EngineBuilder};
pub use work::{CoreWork, OpType, WorkError};

pub use gw_task_system::{DirHandle, JobId, JobPriority};
