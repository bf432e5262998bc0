//! # forma-core: design canvas model
//!
//! The component tree behind the page designer: ordered components,
//! selection, clipboard, snapshot-based undo/redo, external data resolution
//! and the key-based handler/transform registries.
//!
//! All tree mutations go through [`DesignStore`], which notifies its
//! subscribers synchronously after each change.

pub mod component;
pub mod data;
pub mod document;
pub mod error;
pub mod handlers;
pub mod history;
pub mod selection;
pub mod store;

pub use component::{Animation, Component, DataBinding, Direction, EventBinding, PASTE_OFFSET_PX};
pub use data::{resolve_path, DataStore, TransformRegistry};
pub use document::DesignDocument;
pub use error::StoreError;
pub use handlers::{HandlerContext, HandlerRegistry};
pub use history::{History, Snapshot};
pub use selection::Selection;
pub use store::{DesignStore, StoreEvent, SubscriptionId};
