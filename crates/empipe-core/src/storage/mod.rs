//! # Storage backends
//!
//! One redb database per set. `SetStore` owns the table layout and the
//! paged scan machinery; `ObjectSet` (in `crate::set`) layers the
//! append/write batching and the typed API on top.

pub(crate) mod set_store;

pub use set_store::{
    ItemCursor, ItemFilter, ItemOrder, SetStore, SortDirection, STORE_FILE_EXT,
};
