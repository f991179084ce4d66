//! Weft Shadow - Off-UI-thread view tree, layout and reconciliation.
//!
//! The [`ShadowTree`] mirrors the script side's view operations on the layout
//! queue and turns them into [`weft_api::ViewMutationBatch`]es. The
//! [`NativeViewTree`] applies those batches on the UI queue.

mod cache;
mod constraints;
mod error;
mod native_tree;
mod node;
mod style;
mod tree;
mod view_manager;

pub use cache::LayoutCache;
pub use constraints::LayoutConstraints;
pub use error::ShadowError;
pub use native_tree::{NativeView, NativeViewTree, ViewMeasurement};
pub use node::ShadowNode;
pub use style::{FlexDirection, Padding, Style};
pub use tree::ShadowTree;
pub use view_manager::{Measurable, ROOT_VIEW_CLASS, VIEW_CLASS, ViewManager, ViewManagerRegistry};
