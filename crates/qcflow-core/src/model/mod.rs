//! Domain vocabulary, caller identity, and the persisted record shapes.

pub mod actor;
pub mod codes;
pub mod records;

pub use actor::{Actor, Role};
pub use codes::{
    Decision, ImageKind, ItemStatusCode, ParseEnumError, ReviewState, ReviewType, Station,
};
pub use records::{
    Acknowledgement, Item, ItemDefect, ItemDetail, ItemEvent, ItemImage, Review,
    StatusChangeRequest,
};
