//! # Lazy Typed Sets
//!
//! An [`ObjectSet`] is the user-facing handle over one [`SetStore`]: a
//! typed, append-oriented collection of [`Item`]s that streams from
//! storage instead of living in memory.
//!
//! Appends buffer in the handle and land in storage as one transaction
//! on [`ObjectSet::write`]. Reads through the owning handle flush the
//! pending buffer first, so a producer always sees its own appends;
//! another handle on the same file sees them once the write commits.

use crate::item::Item;
use crate::schema::{attrs, ItemKind};
use crate::storage::{ItemCursor, ItemFilter, ItemOrder, SetStore, SortDirection};
use crate::types::{
    AttributeMap, EmpipeError, ImageHandler, ImageLocation, ItemId, SetLocation, Value,
};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A streaming, disk-backed collection of items of one kind.
pub struct ObjectSet {
    store: SetStore,
    pending: Vec<Item>,
    next_id: u64,
}

impl std::fmt::Debug for ObjectSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSet")
            .field("kind", &self.kind())
            .field("location", self.location())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ObjectSet {
    /// Create a new empty set, overwriting any previous file at the
    /// location. Every index the kind declares is materialized up
    /// front, so appends keep them current from the first row.
    pub fn create(location: SetLocation, kind: ItemKind) -> Result<Self, EmpipeError> {
        let mut store = SetStore::create(location, kind)?;
        for attribute in kind.indexed_attributes() {
            store.create_index(attribute)?;
        }
        Ok(Self {
            store,
            pending: Vec::new(),
            next_id: 1,
        })
    }

    /// Open an existing set file.
    pub fn open(location: SetLocation) -> Result<Self, EmpipeError> {
        let mut store = SetStore::open(location)?;
        let next_id = store.next_id()?;
        Ok(Self {
            store,
            pending: Vec::new(),
            next_id,
        })
    }

    /// The declared item kind.
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        self.store.kind()
    }

    /// Backing location.
    #[must_use]
    pub const fn location(&self) -> &SetLocation {
        self.store.location()
    }

    // -------------------------------------------------------------------------
    // Appending
    // -------------------------------------------------------------------------

    /// Queue one item for the next `write()`. An item without an id
    /// gets the next free one; an item carrying an id keeps it (the
    /// reuse path after `clean_id()`), and the watermark advances past
    /// it when needed.
    pub fn append(&mut self, mut item: Item) -> ItemId {
        let id = match item.id() {
            Some(id) => id,
            None => {
                let id = ItemId(self.next_id);
                item.set_id(id);
                id
            }
        };
        self.next_id = self.next_id.max(id.value() + 1);
        self.pending.push(item);
        id
    }

    /// Queue one item per image in a stack file: the pixel handler
    /// reports `(x, y, z, n)` and `n` located items are appended,
    /// pointing at `{index}@{filename}` with 1-based indices.
    pub fn append_stack(
        &mut self,
        handler: &dyn ImageHandler,
        filename: impl Into<String>,
    ) -> Result<Vec<ItemId>, EmpipeError> {
        let filename = filename.into();
        let dim = handler.get_dimensions(&ImageLocation::new(filename.clone()))?;
        Ok((1..=u64::from(dim.n))
            .map(|index| {
                let mut item = Item::new();
                item.set_location(index, filename.clone());
                self.append(item)
            })
            .collect())
    }

    /// Commit the pending buffer as a single transaction. Nothing of a
    /// failing batch becomes visible.
    pub fn write(&mut self) -> Result<(), EmpipeError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.insert_batch(&self.pending, self.next_id)?;
        self.pending.clear();
        Ok(())
    }

    /// Flush pending appends, then release the storage handle. The set
    /// stays usable; the next operation reopens transparently.
    pub fn close(&mut self) -> Result<(), EmpipeError> {
        self.write()?;
        self.store.close();
        Ok(())
    }

    /// Replace a committed item in place (same id).
    pub fn update(&mut self, item: &Item) -> Result<(), EmpipeError> {
        self.write()?;
        self.store.update(item)
    }

    /// Drop every row, keeping kind, metadata, and declared indexes.
    /// Ids restart from 1.
    pub fn clear(&mut self) -> Result<(), EmpipeError> {
        self.pending.clear();
        self.store.clear()?;
        self.next_id = 1;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// Number of items (committed plus pending).
    pub fn size(&mut self) -> Result<u64, EmpipeError> {
        self.write()?;
        self.store.count()
    }

    /// True when `size()` is zero.
    pub fn is_empty(&mut self) -> Result<bool, EmpipeError> {
        Ok(self.size()? == 0)
    }

    /// Fetch one item by id.
    pub fn get(&mut self, id: ItemId) -> Result<Option<Item>, EmpipeError> {
        self.write()?;
        self.store.select_by_id(id)
    }

    /// The lowest-id item, if any.
    pub fn first_item(&mut self) -> Result<Option<Item>, EmpipeError> {
        let mut cursor = self.iter_items()?;
        cursor.next().transpose()
    }

    /// Lazy scan in id order.
    pub fn iter_items(&mut self) -> Result<ItemCursor, EmpipeError> {
        self.select(ItemFilter::All, ItemOrder::Id, SortDirection::Asc)
    }

    /// Lazy scan with an explicit filter, ordering, and direction.
    pub fn select(
        &mut self,
        filter: ItemFilter,
        order: ItemOrder,
        direction: SortDirection,
    ) -> Result<ItemCursor, EmpipeError> {
        self.write()?;
        self.store.select_all(filter, order, direction)
    }

    /// Lazy scan over items whose `attribute` equals `value`.
    pub fn iter_where(
        &mut self,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<ItemCursor, EmpipeError> {
        self.select(
            ItemFilter::AttrEq(attribute.to_string(), value.into()),
            ItemOrder::Id,
            SortDirection::Asc,
        )
    }

    /// Lazy scan over enabled items only.
    pub fn iter_enabled(&mut self) -> Result<ItemCursor, EmpipeError> {
        self.select(ItemFilter::Enabled, ItemOrder::Id, SortDirection::Asc)
    }

    /// Lazy id-order scan over items with id strictly greater than
    /// `after`. The polling primitive of streaming consumers.
    pub fn iter_after(&mut self, after: Option<ItemId>) -> Result<ItemCursor, EmpipeError> {
        self.write()?;
        self.store.select_after(after.map(|id| id.value()))
    }

    // -------------------------------------------------------------------------
    // Indexes
    // -------------------------------------------------------------------------

    /// Create a secondary index over a declared attribute.
    pub fn create_index(&mut self, attribute: &str) -> Result<(), EmpipeError> {
        self.write()?;
        self.store.create_index(attribute)
    }

    /// Drop a secondary index; returns whether it existed.
    pub fn drop_index(&mut self, attribute: &str) -> Result<bool, EmpipeError> {
        self.store.drop_index(attribute)
    }

    /// Names of the indexes present in the file.
    pub fn indexes(&mut self) -> Result<Vec<String>, EmpipeError> {
        self.store.registered_indexes()
    }

    // -------------------------------------------------------------------------
    // Set-level metadata
    // -------------------------------------------------------------------------

    /// Read the whole metadata bag.
    pub fn info(&mut self) -> Result<AttributeMap, EmpipeError> {
        self.store.read_info()
    }

    /// Set one metadata entry.
    pub fn set_info(&mut self, name: &str, value: impl Into<Value>) -> Result<(), EmpipeError> {
        let mut info = self.store.read_info()?;
        info.insert(name.to_string(), value.into());
        self.store.write_info(&info)
    }

    /// Read one metadata entry.
    pub fn info_get(&mut self, name: &str) -> Result<Value, EmpipeError> {
        Ok(self.store.read_info()?.get(name).cloned().unwrap_or(Value::Empty))
    }

    /// Copy another set's metadata bag onto this one, without touching
    /// the items. The usual first step of a protocol that derives an
    /// output set from its input.
    pub fn copy_info(&mut self, other: &mut ObjectSet) -> Result<(), EmpipeError> {
        let info = other.info()?;
        self.store.write_info(&info)
    }

    /// Pixel sampling rate in angstroms, when recorded.
    pub fn sampling_rate(&mut self) -> Result<Option<f64>, EmpipeError> {
        Ok(self.info_get(crate::schema::info::SAMPLING_RATE)?.as_float())
    }

    /// Record the pixel sampling rate.
    pub fn set_sampling_rate(&mut self, rate: f64) -> Result<(), EmpipeError> {
        self.set_info(crate::schema::info::SAMPLING_RATE, rate)
    }

    // -------------------------------------------------------------------------
    // Files
    // -------------------------------------------------------------------------

    /// Every distinct image file the set references: the backing set
    /// file itself plus each item's `filename` attribute.
    pub fn files(&mut self) -> Result<BTreeSet<PathBuf>, EmpipeError> {
        let mut files = BTreeSet::new();
        if let SetLocation::File(path) = self.location() {
            files.insert(path.clone());
        }
        let cursor = self.iter_items()?;
        for item in cursor {
            let item = item?;
            if let Some(name) = item.get(attrs::FILENAME).as_str() {
                files.insert(PathBuf::from(name));
            }
        }
        Ok(files)
    }
}

// =============================================================================
// TESTS
// =============================================================================
