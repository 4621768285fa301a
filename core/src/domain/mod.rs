//! Core in-flight domain types: RawItem, error taxonomy, plugin metadata.

mod error;
mod raw_item;

pub use error::{CollectError, ErrorClass};
pub use raw_item::RawItem;
