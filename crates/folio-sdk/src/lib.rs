//! Editing SDK for folio.
//!
//! [`Editor`] is the entry point for applications: it holds the pending
//! edits, shows objects with those edits applied, and drives clone, sync
//! and push through a [`WorkerClient`](folio_worker::WorkerClient).
//!
//! ```no_run
//! # async fn demo(client: folio_worker::WorkerClient) -> folio_sdk::SdkResult<()> {
//! use std::sync::Arc;
//! use folio_sdk::{Author, Editor, EditorConfig, MemoryStateStore};
//!
//! let editor = Editor::open(client, EditorConfig::default(), Arc::new(MemoryStateStore::new()));
//! editor.clone("https://example.com/site.git", None, None).await?;
//! let id = editor.add_object("hello", "post")?;
//! editor.update(id, "title", "Hello".into())?;
//! editor.sync(&Author::new("Ada", "ada@example.com"), None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod editor;
pub mod error;

pub use config::EditorConfig;
pub use editor::Editor;
pub use error::{SdkError, SdkResult};

// Re-export key types
pub use folio_git::CommitInfo;
pub use folio_ledger::{FileStateStore, LedgerSnapshot, MaterializedObjects, MemoryStateStore, StateStore};
pub use folio_protocol::{ErrorData, ErrorKind};
pub use folio_sync::{Progress, SyncPhase};
pub use folio_types::{Author, Change, ChangeKey, Deletion, FieldMap, FieldValue, Object, ObjectId, Scalar};
