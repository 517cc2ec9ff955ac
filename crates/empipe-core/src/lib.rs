//! # empipe-core
//!
//! The persistence substrate of an electron-microscopy processing
//! pipeline: durable, streamable sets of data items (micrographs,
//! particles, coordinates, CTF estimates, classes) plus the
//! provenance graph connecting them.
//!
//! ## Design
//!
//! - Every set is one redb file. Items are open attribute bags, rows
//!   are postcard-encoded, and secondary index tables serve the
//!   parent→child lookups pipeline stages hammer on.
//! - Sets are lazy: iteration streams pages from storage, a producer
//!   appends in batches while a consumer polls the committed tail.
//! - The CORE is synchronous and local: NO async, NO network
//!   dependencies. Process orchestration lives above this crate.

// =============================================================================
// MODULES
// =============================================================================

pub mod classes;
pub mod factory;
pub mod item;
pub mod relations;
pub mod schema;
pub mod set;
pub mod storage;
pub mod streaming;
pub mod tiltpair;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AttributeMap, EmpipeError, ImageDim, ImageHandler, ImageLocation, ItemId, SetLocation, Value,
};

// =============================================================================
// RE-EXPORTS: Items and Sets
// =============================================================================

pub use item::Item;
pub use schema::ItemKind;
pub use set::ObjectSet;
pub use storage::{ItemCursor, ItemFilter, ItemOrder, SetStore, SortDirection, STORE_FILE_EXT};

// =============================================================================
// RE-EXPORTS: Aggregations and Provenance
// =============================================================================

pub use classes::ClassSet;
pub use factory::SetFactory;
pub use relations::{Direction, RelationGraph, RelationKind};
pub use tiltpair::TiltPairSet;

// =============================================================================
// RE-EXPORTS: Streaming
// =============================================================================

pub use streaming::{StreamParams, StreamPoller, StreamStep, plan_step};
