//! Shadow tree error types.

use thiserror::Error;
use weft_api::ViewTag;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShadowError {
    #[error("no view with tag {0}")]
    UnknownTag(ViewTag),

    #[error("a view with tag {0} already exists")]
    DuplicateTag(ViewTag),

    #[error("view {child} already has parent {parent}")]
    AlreadyParented { child: ViewTag, parent: ViewTag },

    #[error("adding {child} under {parent} would create a cycle")]
    WouldCreateCycle { parent: ViewTag, child: ViewTag },

    #[error("index {index} out of bounds for {parent} with {len} children")]
    IndexOutOfBounds {
        parent: ViewTag,
        index: usize,
        len: usize,
    },

    #[error("manageChildren on {parent}: index and tag lists differ in length")]
    MismatchedIndices { parent: ViewTag },

    #[error("no view manager for class '{0}'")]
    UnknownViewClass(String),

    #[error("view {0} is not a root")]
    NotARoot(ViewTag),

    #[error("view {0} is already a root")]
    AlreadyRoot(ViewTag),
}
