//! Supplemental jobs that share the run lanes with reconciliation.
//!
//! - [`sheet_status`]: mirror review, QA and merge state into the release sheet
//! - [`code_move`]: clone tickets into code-move tickets
//! - [`relink`]: move tickets from one control ticket to another

pub mod code_move;
pub mod relink;
pub mod sheet_status;

pub use code_move::{CodeMoveJob, CodeMoveRequest};
pub use relink::{RelinkJob, RelinkRequest};
pub use sheet_status::{SheetStatusJob, SheetStatusReport};
