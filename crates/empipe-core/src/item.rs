//! # Item — a single persisted record
//!
//! An item is identity (`ItemId`), an enabled flag, a creation
//! timestamp, and an open attribute bag. Reading an attribute that was
//! never set yields [`Value::Empty`], never an error — sets routinely
//! mix records written by different pipeline versions.
//!
//! The `clean_id` / `append` pattern lets a stage drive a tight loop
//! with one reusable item instead of allocating per row:
//!
//! ```
//! use empipe_core::{Item, schema::attrs};
//!
//! let mut particle = Item::new();
//! for i in 1..=3 {
//!     particle.set_location(i, "images.stk");
//!     // set.append(&particle) would assign a fresh id here
//!     particle.clean_id();
//! }
//! # assert!(particle.id().is_none());
//! ```

use crate::schema::attrs;
use crate::types::{AttributeMap, ImageLocation, ItemId, Value};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Creation timestamp, unix seconds. Clock skew maps to zero rather
/// than failing a record write.
fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// ITEM
// =============================================================================

/// A single persisted scientific record: micrograph, particle, volume,
/// CTF estimate, coordinate, angle...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identity within the owning set; `None` until appended (or after
    /// `clean_id`).
    id: Option<ItemId>,
    /// Disabled items are skipped by aggregation subsetting.
    enabled: bool,
    /// Unix seconds at construction time.
    creation: u64,
    /// The open attribute bag.
    attributes: AttributeMap,
}

impl Default for Item {
    fn default() -> Self {
        Self::new()
    }
}

impl Item {
    /// A fresh, enabled item with no identity and an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            enabled: true,
            creation: now_secs(),
            attributes: AttributeMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    /// Current identity, if assigned.
    #[must_use]
    pub const fn id(&self) -> Option<ItemId> {
        self.id
    }

    /// Assign an identity. Appending an item that already carries an id
    /// keeps it, so a caller can control numbering explicitly.
    pub const fn set_id(&mut self, id: ItemId) {
        self.id = Some(id);
    }

    /// Clear the identity so the same allocation can be appended again
    /// as a new row.
    pub const fn clean_id(&mut self) {
        self.id = None;
    }

    /// Enabled flag.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the enabled flag.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Creation timestamp, unix seconds.
    #[must_use]
    pub const fn creation(&self) -> u64 {
        self.creation
    }

    // -------------------------------------------------------------------------
    // Attribute bag
    // -------------------------------------------------------------------------

    /// Read an attribute. Missing attributes yield the `Empty` sentinel.
    #[must_use]
    pub fn get(&self, name: &str) -> &Value {
        const EMPTY: Value = Value::Empty;
        self.attributes.get(name).unwrap_or(&EMPTY)
    }

    /// Set an attribute. The bag is open-ended: names outside the
    /// kind's declared schema are accepted.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// True if the attribute was ever set.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Iterate the bag in name order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Structural equality of the attribute bags, skipping `ignore`d
    /// names. Used to validate that a copy preserved all semantics
    /// except deliberately-changed fields. Identity and the enabled
    /// flag are not compared.
    #[must_use]
    pub fn equal_attributes(&self, other: &Self, ignore: &[&str]) -> bool {
        let keys = |item: &Self| {
            item.attributes
                .keys()
                .filter(|k| !ignore.contains(&k.as_str()))
                .cloned()
                .collect::<Vec<_>>()
        };
        let mine = keys(self);
        if mine != keys(other) {
            return false;
        }
        mine.iter().all(|k| self.get(k) == other.get(k))
    }

    // -------------------------------------------------------------------------
    // Image location convention
    // -------------------------------------------------------------------------

    /// Set the `(index, filename)` pair referencing external pixel data.
    pub fn set_location(&mut self, index: u64, filename: impl Into<String>) {
        self.set(attrs::INDEX, index as i64);
        self.set(attrs::FILENAME, filename.into());
    }

    /// Set only the external file name, for single-image items.
    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.set(attrs::FILENAME, filename.into());
    }

    /// The external image location, if a filename was set.
    #[must_use]
    pub fn location(&self) -> Option<ImageLocation> {
        let filename = self.get(attrs::FILENAME).as_str()?.to_string();
        Some(ImageLocation {
            index: self.get(attrs::INDEX).as_int().map(|i| i as u64),
            filename,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::AttributeMap;

    #[test]
    fn missing_attribute_yields_empty() {
        let item = Item::new();
        assert!(item.get("never_set").is_empty());
        assert!(!item.has("never_set"));
    }

    #[test]
    fn location_round_trip() {
        let mut item = Item::new();
        item.set_location(4, "stack.stk");

        let loc = item.location().unwrap();
        assert_eq!(loc.index, Some(4));
        assert_eq!(loc.filename, "stack.stk");
    }

    #[test]
    fn equal_attributes_honours_ignore_list() {
        let mut a = Item::new();
        a.set_location(1, "mic.mrc");
        a.set("mic_id", 7i64);

        let mut b = a.clone();
        b.set("mic_id", 9i64);

        assert!(!a.equal_attributes(&b, &[]));
        assert!(a.equal_attributes(&b, &["mic_id"]));
    }

    #[test]
    fn equal_attributes_detects_extra_keys() {
        let mut a = Item::new();
        a.set("x", 1i64);

        let mut b = a.clone();
        b.set("y", 2i64);

        assert!(!a.equal_attributes(&b, &[]));
        assert!(a.equal_attributes(&b, &["y"]));
    }

    #[test]
    fn clone_owns_nested_records() {
        let mut transform = AttributeMap::new();
        transform.insert("shift_x".to_string(), Value::Float(12.5));

        let mut a = Item::new();
        a.set("transform", transform);

        let mut b = a.clone();
        b.set("transform", AttributeMap::new());

        // The clone mutated its own record, the original is untouched.
        assert_eq!(
            a.get("transform").as_record().unwrap().len(),
            1,
            "clone must deep-copy nested records"
        );
    }

    #[test]
    fn clean_id_supports_reuse() {
        let mut item = Item::new();
        item.set_id(ItemId(3));
        assert_eq!(item.id(), Some(ItemId(3)));

        item.clean_id();
        assert_eq!(item.id(), None);
    }
}
