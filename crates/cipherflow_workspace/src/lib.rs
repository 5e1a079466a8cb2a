// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editable, runnable cipherflow workspaces.
//!
//! Builds on [`cipherflow_graph`] with:
//! - Reversible operations and a bounded undo/redo history
//! - Copy and paste of node selections, in place or through the clipboard
//! - Edits queued from other threads and applied between scheduler steps
//! - RON configuration and a per-workspace log sink
//! - Nodes backed by external processes

pub mod clone;
pub mod config;
pub mod external;
pub mod history;
pub mod logging;
pub mod operations;
pub mod settings_history;
pub mod workspace;

pub use clone::{
    select_connections, ClipboardError, ClipboardPayload, CloneResult, CloneWarning,
    CopyOperation, Selection, PASTE_OFFSET,
};
pub use config::{ConfigError, LogConfig, WorkspaceConfig};
pub use external::{ExternalTask, ExternalTaskBehavior};
pub use history::{History, HistoryError, HistoryStats, MAX_HISTORY};
pub use logging::{build_dispatch, LogBridge, LogRecord, LoggingError};
pub use operations::{
    ChangeSetting, DeleteAnnotation, DeleteEdge, DeleteNode, GraphOperation, MoveElement, Multi,
    NewAnnotation, NewEdge, NewNode, OpOutcome, OperationError, OperationState, RenameElement,
    ResizeElement,
};
pub use settings_history::SettingsHistory;
pub use workspace::{EditQueue, Workspace, WorkspaceError};
