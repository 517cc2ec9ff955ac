//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the empipe store:
//! - Item identity (`ItemId`)
//! - The open attribute value union (`Value`)
//! - Set identity (`SetLocation`: a file path or an in-memory marker)
//! - Image location convention (`ImageLocation`, `ImageDim`)
//! - Error types (`EmpipeError`)
//! - The pixel I/O collaborator trait (`ImageHandler`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module implement `Ord` where they are used as
//! `BTreeMap`/`BTreeSet` keys, so scans and metadata dumps are
//! reproducible across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// ITEM IDENTITY
// =============================================================================

/// Unique identifier of an item within its owning set.
///
/// Ids are positive and monotonically assigned on append; they are only
/// reused when a caller explicitly clears them (`Item::clean_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ATTRIBUTE VALUES
// =============================================================================

/// Map from attribute name to value — the open attribute bag carried by
/// every item, and also the payload of a nested `Value::Record`.
pub type AttributeMap = BTreeMap<String, Value>;

/// A single attribute value.
///
/// The bag is duck-typed but the value kinds are closed: integers,
/// doubles, strings, booleans and nested records (transform matrices,
/// acquisition parameters). `Empty` is the defined result of reading an
/// attribute that was never set — legacy records are heterogeneous and
/// a missing column is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Attribute never set.
    #[default]
    Empty,
    /// 64-bit signed integer. The only kind eligible for indexing.
    Int(i64),
    /// Double-precision float (sampling rates, defocus, angles).
    Float(f64),
    /// String (file names, comments).
    Str(String),
    /// Boolean flag.
    Bool(bool),
    /// Nested record owned exclusively by the item.
    Record(AttributeMap),
}

impl Value {
    /// True if this is the `Empty` sentinel.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Integer payload, if this value is an `Int`.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, if this value is a `Float`.
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if this value is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean payload, if this value is a `Bool`.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Nested record payload, if this value is a `Record`.
    #[must_use]
    pub const fn as_record(&self) -> Option<&AttributeMap> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    /// Total ordering across value kinds, used when a scan is ordered by
    /// an unindexed attribute. Kinds order before payloads; floats use
    /// `total_cmp` so the ordering is total without float arithmetic.
    #[must_use]
    pub fn total_order(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        fn rank(v: &Value) -> u8 {
            match v {
                Value::Empty => 0,
                Value::Int(_) => 1,
                Value::Float(_) => 2,
                Value::Str(_) => 3,
                Value::Bool(_) => 4,
                Value::Record(_) => 5,
            }
        }

        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Record(a), Self::Record(b)) => {
                let mut ia = a.iter();
                let mut ib = b.iter();
                loop {
                    match (ia.next(), ib.next()) {
                        (None, None) => return Ordering::Equal,
                        (None, Some(_)) => return Ordering::Less,
                        (Some(_), None) => return Ordering::Greater,
                        (Some((ka, va)), Some((kb, vb))) => {
                            let ord = ka.cmp(kb).then_with(|| va.total_order(vb));
                            if ord != Ordering::Equal {
                                return ord;
                            }
                        }
                    }
                }
            }
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<AttributeMap> for Value {
    fn from(v: AttributeMap) -> Self {
        Self::Record(v)
    }
}

// =============================================================================
// SET IDENTITY
// =============================================================================

/// Identity of a persisted set: the path of its backing file, or an
/// in-memory marker for transient staging and test fixtures.
///
/// Two sets are the same persisted collection iff they share a `File`
/// path. `Memory` sets have identical API semantics but live only as
/// long as the process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SetLocation {
    /// A single-file embedded store on disk.
    File(PathBuf),
    /// A process-local scratch store, labelled for diagnostics.
    Memory(String),
}

impl SetLocation {
    /// Location backed by a file on disk.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Non-persisted scratch location.
    #[must_use]
    pub fn memory(label: impl Into<String>) -> Self {
        Self::Memory(label.into())
    }

    /// True for the in-memory marker.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Whether the backing storage is still reachable. Memory sets are
    /// reachable by definition; file sets require the path to exist.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Self::File(path) => path.exists(),
            Self::Memory(_) => true,
        }
    }

    /// Stable string key used by the relation graph.
    #[must_use]
    pub fn as_key(&self) -> String {
        match self {
            Self::File(path) => format!("file:{}", path.display()),
            Self::Memory(label) => format!("memory:{label}"),
        }
    }

    /// Parse a key produced by [`SetLocation::as_key`].
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        key.strip_prefix("file:")
            .map(Self::file)
            .or_else(|| key.strip_prefix("memory:").map(Self::memory))
    }
}

impl std::fmt::Display for SetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory(label) => write!(f, ":memory:{label}"),
        }
    }
}

// =============================================================================
// IMAGE LOCATION
// =============================================================================

/// Reference to pixel data held outside the store: a file name plus an
/// optional slice index inside a stack, rendered as `NNNNNN@file`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageLocation {
    /// 1-based position inside a stack file, if any.
    pub index: Option<u64>,
    /// Path of the external image file.
    pub filename: String,
}

impl ImageLocation {
    /// Location of a single-image file.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            index: None,
            filename: filename.into(),
        }
    }

    /// Location of one slice inside a stack file.
    #[must_use]
    pub fn stacked(index: u64, filename: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            filename: filename.into(),
        }
    }
}

impl std::fmt::Display for ImageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "{:06}@{}", i, self.filename),
            None => write!(f, "{}", self.filename),
        }
    }
}

/// Image dimensions `(x, y, z, n)` as reported by the pixel I/O
/// collaborator: width, height, slices, number of stacked images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub n: u32,
}

impl ImageDim {
    /// Build a dimension descriptor.
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32, n: u32) -> Self {
        Self { x, y, z, n }
    }
}

// =============================================================================
// IMAGE HANDLER TRAIT
// =============================================================================

/// The pixel I/O collaborator.
///
/// The core never interprets pixel content; dimensions and format
/// conversion are delegated through this trait to an external handler
/// (an image library wrapper, or a test double).
///
/// # Extension Point
///
/// This trait is intentionally defined without in-crate implementations.
/// Pipeline packages provide concrete handlers for the image formats
/// they support.
pub trait ImageHandler {
    /// Report the `(x, y, z, n)` dimensions of the image at `location`.
    fn get_dimensions(&self, location: &ImageLocation) -> Result<ImageDim, EmpipeError>;

    /// Convert the image at `src` into the format implied by `dst`.
    fn convert(&self, src: &ImageLocation, dst: &Path) -> Result<(), EmpipeError>;
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the empipe store.
///
/// Propagation policy:
/// - Construction and integrity errors are never swallowed; the
///   producing stage's step aborts and the error reaches the caller.
/// - Relation queries against a removed set degrade to empty results
///   instead of raising `SetNotFound`.
/// - `StorageUnavailable` on open is retried once transparently before
///   it is surfaced.
#[derive(Debug, Error)]
pub enum EmpipeError {
    /// Invalid construction input: bad path, mismatched tilt-pair
    /// lengths, unknown set kind.
    #[error("Construction error: {0}")]
    Construction(String),

    /// Lookup by id missed.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// A set's backing file is missing or unreadable.
    #[error("Set not found: {0}")]
    SetNotFound(String),

    /// Insert collided with an existing row id.
    #[error("Duplicate item id: {0}")]
    DuplicateId(ItemId),

    /// Index requested on a column not declared indexable for the kind.
    #[error("Attribute '{attribute}' is not declared indexable for kind {kind}")]
    UndeclaredIndex {
        /// Item kind of the owning set.
        kind: String,
        /// Offending attribute name.
        attribute: String,
    },

    /// Storage handle busy, locked, or out of space.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<redb::DatabaseError> for EmpipeError {
    fn from(e: redb::DatabaseError) -> Self {
        match e {
            redb::DatabaseError::DatabaseAlreadyOpen => {
                Self::StorageUnavailable("database already open".to_string())
            }
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for EmpipeError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<redb::TableError> for EmpipeError {
    fn from(e: redb::TableError) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<redb::StorageError> for EmpipeError {
    fn from(e: redb::StorageError) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<redb::CommitError> for EmpipeError {
    fn from(e: redb::CommitError) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<postcard::Error> for EmpipeError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for EmpipeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_is_default() {
        assert!(Value::default().is_empty());
        assert_eq!(Value::from(3i64).as_int(), Some(3));
        assert_eq!(Value::from("stack.mrc").as_str(), Some("stack.mrc"));
    }

    #[test]
    fn value_total_order_is_total_for_floats() {
        let a = Value::Float(f64::NAN);
        let b = Value::Float(1.0);
        // NaN must order consistently, in either direction.
        let ord = a.total_order(&b);
        assert_eq!(b.total_order(&a), ord.reverse());
    }

    #[test]
    fn set_location_key_round_trip() {
        let file = SetLocation::file("/data/run1/particles.redb");
        let mem = SetLocation::memory("scratch");

        assert_eq!(SetLocation::from_key(&file.as_key()), Some(file.clone()));
        assert_eq!(SetLocation::from_key(&mem.as_key()), Some(mem.clone()));
        assert!(mem.is_memory());
        assert!(!file.is_memory());
    }

    #[test]
    fn image_location_renders_stack_style() {
        let loc = ImageLocation::stacked(7, "images.stk");
        assert_eq!(loc.to_string(), "000007@images.stk");
        assert_eq!(ImageLocation::new("mic.mrc").to_string(), "mic.mrc");
    }
}
