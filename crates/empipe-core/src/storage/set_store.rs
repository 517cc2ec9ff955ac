//! # redb-backed Set Storage
//!
//! One durable table per set, keyed by item id, stored in a single redb
//! file (ACID transactions, copy-on-write B-trees, MVCC with concurrent
//! readers and a single writer).
//!
//! ## Table layout
//!
//! - `items`: `u64 -> &[u8]` — postcard-serialized [`Item`] rows
//! - `set_info`: `&str -> &[u8]` — item kind, next id, set-level metadata
//! - `indexes`: `&str -> ()` — registry of created secondary indexes
//! - `index_{attr}`: `(i64, u64) -> ()` — one table per secondary index,
//!   keyed by (attribute value, item id) to allow range scans per value
//!
//! ## Index equivalence
//!
//! Secondary indexes are purely a performance structure: for any
//! equality predicate on an indexed attribute, the id set produced by an
//! index range scan must equal the id set produced by a full scan with
//! the predicate applied in memory. Tests in this module and in the
//! crate's integration suite assert this.

use crate::item::Item;
use crate::schema::ItemKind;
use crate::types::{AttributeMap, EmpipeError, ItemId, SetLocation, Value};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

/// Canonical extension of set files on disk.
pub const STORE_FILE_EXT: &str = "redb";

/// Rows fetched per read transaction while streaming a scan.
const PAGE_SIZE: usize = 256;

/// Single transparent retry interval for a busy storage handle.
const BUSY_RETRY: Duration = Duration::from_millis(50);

/// Table for items: ItemId(u64) -> serialized Item bytes.
const ITEMS: TableDefinition<u64, &[u8]> = TableDefinition::new("items");

/// Table for set metadata: key string -> serialized bytes.
const SET_INFO: TableDefinition<&str, &[u8]> = TableDefinition::new("set_info");

/// Registry of created secondary indexes (attribute names).
const INDEX_REGISTRY: TableDefinition<&str, ()> = TableDefinition::new("indexes");

/// Metadata keys inside `set_info`.
const META_KIND: &str = "kind";
const META_NEXT_ID: &str = "next_id";
const META_INFO: &str = "info";

fn index_table_name(attribute: &str) -> String {
    format!("index_{attribute}")
}

// =============================================================================
// QUERY VOCABULARY
// =============================================================================

/// Row predicate for scans.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemFilter {
    /// Every row.
    All,
    /// Rows whose attribute equals the value. Equality on an indexed
    /// integer attribute routes through the index table.
    AttrEq(String, Value),
    /// Rows whose enabled flag is set.
    Enabled,
}

impl ItemFilter {
    fn matches(&self, item: &Item) -> bool {
        match self {
            Self::All => true,
            Self::AttrEq(name, value) => item.get(name) == value,
            Self::Enabled => item.is_enabled(),
        }
    }
}

/// Scan ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOrder {
    /// Insertion order (ascending id). The default.
    Id,
    /// Order by an attribute; lazy when the attribute is indexed, one
    /// in-memory ordering pass otherwise.
    Attr(String),
}

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

// =============================================================================
// SET STORE
// =============================================================================

/// The durable backing table for exactly one set.
///
/// `close()` releases the database handle; any subsequent operation
/// reopens it transparently. Memory-backed stores keep their database
/// alive across `close()` (dropping it would drop the data).
pub struct SetStore {
    location: SetLocation,
    kind: ItemKind,
    db: Option<Arc<Database>>,
}

impl std::fmt::Debug for SetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetStore")
            .field("location", &self.location)
            .field("kind", &self.kind)
            .field("open", &self.db.is_some())
            .finish_non_exhaustive()
    }
}

impl SetStore {
    /// Create a fresh store at `location`, overwriting any existing
    /// content. Callers are responsible for not colliding with in-use
    /// files.
    pub fn create(location: SetLocation, kind: ItemKind) -> Result<Self, EmpipeError> {
        let db = match &location {
            SetLocation::File(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                open_file_database(&location)?
            }
            SetLocation::Memory(_) => Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .map_err(EmpipeError::from)?,
        };

        let store = Self {
            location,
            kind,
            db: Some(Arc::new(db)),
        };
        store.init_tables(kind, 1)?;
        Ok(store)
    }

    /// Open an existing store. A missing path is a fatal construction
    /// error; the kind is read back from the file.
    pub fn open(location: SetLocation) -> Result<Self, EmpipeError> {
        let SetLocation::File(path) = &location else {
            return Err(EmpipeError::Construction(
                "memory sets cannot be reopened by location".to_string(),
            ));
        };
        if !path.exists() {
            return Err(EmpipeError::Construction(format!(
                "set file does not exist: {}",
                path.display()
            )));
        }

        let db = Arc::new(open_file_database(&location)?);
        let kind: ItemKind = read_meta(&db, META_KIND)?.ok_or_else(|| {
            EmpipeError::Construction(format!("not a set file: {}", path.display()))
        })?;

        Ok(Self {
            location,
            kind,
            db: Some(db),
        })
    }

    /// The set's location.
    #[must_use]
    pub const fn location(&self) -> &SetLocation {
        &self.location
    }

    /// The declared item kind.
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Release the storage handle. File-backed stores drop the database
    /// (all writes are already committed per transaction); memory stores
    /// keep it. Any later call reopens transparently.
    pub fn close(&mut self) {
        if !self.location.is_memory() {
            self.db = None;
        }
    }

    /// Current database handle, reopening a closed file store on demand.
    pub(crate) fn database(&mut self) -> Result<Arc<Database>, EmpipeError> {
        if self.db.is_none() {
            let SetLocation::File(path) = &self.location else {
                return Err(EmpipeError::StorageUnavailable(
                    "memory store handle was dropped".to_string(),
                ));
            };
            if !path.exists() {
                return Err(EmpipeError::SetNotFound(path.display().to_string()));
            }
            self.db = Some(Arc::new(open_file_database(&self.location)?));
        }
        // Checked or assigned just above.
        self.db
            .clone()
            .ok_or_else(|| EmpipeError::StorageUnavailable("no database handle".to_string()))
    }

    fn init_tables(&self, kind: ItemKind, next_id: u64) -> Result<(), EmpipeError> {
        let db = self
            .db
            .as_ref()
            .ok_or_else(|| EmpipeError::StorageUnavailable("no database handle".to_string()))?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ITEMS)?;
            let _ = write_txn.open_table(INDEX_REGISTRY)?;
            let mut meta = write_txn.open_table(SET_INFO)?;
            meta.insert(META_KIND, postcard::to_allocvec(&kind)?.as_slice())?;
            meta.insert(META_NEXT_ID, postcard::to_allocvec(&next_id)?.as_slice())?;
            meta.insert(
                META_INFO,
                postcard::to_allocvec(&AttributeMap::new())?.as_slice(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Next id to assign on append.
    pub fn next_id(&mut self) -> Result<u64, EmpipeError> {
        let db = self.database()?;
        Ok(read_meta(&db, META_NEXT_ID)?.unwrap_or(1))
    }

    /// Set-level scalar metadata bag.
    pub fn read_info(&mut self) -> Result<AttributeMap, EmpipeError> {
        let db = self.database()?;
        Ok(read_meta(&db, META_INFO)?.unwrap_or_default())
    }

    /// Persist the set-level metadata bag.
    pub fn write_info(&mut self, info: &AttributeMap) -> Result<(), EmpipeError> {
        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            let mut meta = write_txn.open_table(SET_INFO)?;
            meta.insert(META_INFO, postcard::to_allocvec(info)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Number of committed rows.
    pub fn count(&mut self) -> Result<u64, EmpipeError> {
        let db = self.database()?;
        let read_txn = db.begin_read()?;
        let items = read_txn.open_table(ITEMS)?;
        Ok(items.len()?)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert a batch of rows, their index entries, and the new next-id
    /// watermark in a single transaction. Every item must carry an id;
    /// a collision with an existing row aborts the whole batch with
    /// `DuplicateId` and previously committed rows stay untouched.
    pub fn insert_batch(&mut self, items: &[Item], next_id: u64) -> Result<(), EmpipeError> {
        if items.is_empty() {
            return Ok(());
        }
        let indexed = self.registered_indexes()?;
        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            let mut rows = write_txn.open_table(ITEMS)?;
            let mut meta = write_txn.open_table(SET_INFO)?;

            for item in items {
                let id = item.id().ok_or_else(|| {
                    EmpipeError::Construction("cannot insert an item without an id".to_string())
                })?;
                if rows.get(id.value())?.is_some() {
                    return Err(EmpipeError::DuplicateId(id));
                }
                rows.insert(id.value(), postcard::to_allocvec(item)?.as_slice())?;
            }
            meta.insert(META_NEXT_ID, postcard::to_allocvec(&next_id)?.as_slice())?;

            for attribute in &indexed {
                let name = index_table_name(attribute);
                let def = TableDefinition::<(i64, u64), ()>::new(&name);
                let mut index = write_txn.open_table(def)?;
                for item in items {
                    if let (Some(id), Some(value)) = (item.id(), item.get(attribute).as_int()) {
                        index.insert((value, id.value()), ())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Replace an existing row, fixing up index entries whose attribute
    /// value changed.
    pub fn update(&mut self, item: &Item) -> Result<(), EmpipeError> {
        let id = item
            .id()
            .ok_or_else(|| EmpipeError::Construction("cannot update without an id".to_string()))?;
        let indexed = self.registered_indexes()?;
        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            let mut rows = write_txn.open_table(ITEMS)?;
            let previous = match rows.get(id.value())? {
                Some(bytes) => postcard::from_bytes::<Item>(bytes.value())?,
                None => return Err(EmpipeError::ItemNotFound(id)),
            };
            rows.insert(id.value(), postcard::to_allocvec(item)?.as_slice())?;

            for attribute in &indexed {
                let old = previous.get(attribute).as_int();
                let new = item.get(attribute).as_int();
                if old == new {
                    continue;
                }
                let name = index_table_name(attribute);
                let def = TableDefinition::<(i64, u64), ()>::new(&name);
                let mut index = write_txn.open_table(def)?;
                if let Some(v) = old {
                    index.remove((v, id.value()))?;
                }
                if let Some(v) = new {
                    index.insert((v, id.value()), ())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drop every row and index entry, and rewind the id watermark.
    pub fn clear(&mut self) -> Result<(), EmpipeError> {
        let indexed = self.registered_indexes()?;
        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            write_txn.delete_table(ITEMS)?;
            let _ = write_txn.open_table(ITEMS)?;
            for attribute in &indexed {
                let name = index_table_name(attribute);
                let def = TableDefinition::<(i64, u64), ()>::new(&name);
                write_txn.delete_table(def)?;
                let _ = write_txn.open_table(def)?;
            }
            let mut meta = write_txn.open_table(SET_INFO)?;
            meta.insert(META_NEXT_ID, postcard::to_allocvec(&1u64)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Point reads
    // -------------------------------------------------------------------------

    /// Fetch one row by id.
    pub fn select_by_id(&mut self, id: ItemId) -> Result<Option<Item>, EmpipeError> {
        let db = self.database()?;
        let read_txn = db.begin_read()?;
        let rows = read_txn.open_table(ITEMS)?;
        match rows.get(id.value())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(bytes.value())?)),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Secondary indexes
    // -------------------------------------------------------------------------

    /// Names of the indexes present in the file.
    pub fn registered_indexes(&mut self) -> Result<Vec<String>, EmpipeError> {
        let db = self.database()?;
        let read_txn = db.begin_read()?;
        let registry = read_txn.open_table(INDEX_REGISTRY)?;
        let mut names = Vec::new();
        for entry in registry.iter()? {
            let (key, ()) = {
                let (k, v) = entry?;
                (k.value().to_string(), v.value())
            };
            names.push(key);
        }
        Ok(names)
    }

    /// Create a secondary index over `attribute`, backfilling from the
    /// existing rows. No-op if the index already exists; an attribute
    /// outside the kind's declared-index list is an integrity error.
    pub fn create_index(&mut self, attribute: &str) -> Result<(), EmpipeError> {
        if !self.kind.is_indexable(attribute) {
            return Err(EmpipeError::UndeclaredIndex {
                kind: self.kind.name().to_string(),
                attribute: attribute.to_string(),
            });
        }
        if self.registered_indexes()?.iter().any(|a| a == attribute) {
            return Ok(());
        }

        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            let mut registry = write_txn.open_table(INDEX_REGISTRY)?;
            registry.insert(attribute, ())?;

            let name = index_table_name(attribute);
            let def = TableDefinition::<(i64, u64), ()>::new(&name);
            let mut index = write_txn.open_table(def)?;
            let rows = write_txn.open_table(ITEMS)?;
            for entry in rows.iter()? {
                let (key, bytes) = entry?;
                let item: Item = postcard::from_bytes(bytes.value())?;
                if let Some(value) = item.get(attribute).as_int() {
                    index.insert((value, key.value()), ())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drop a secondary index. Returns whether it existed; dropping a
    /// missing index is non-fatal.
    pub fn drop_index(&mut self, attribute: &str) -> Result<bool, EmpipeError> {
        if !self.registered_indexes()?.iter().any(|a| a == attribute) {
            return Ok(false);
        }
        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            let mut registry = write_txn.open_table(INDEX_REGISTRY)?;
            registry.remove(attribute)?;
            let name = index_table_name(attribute);
            let def = TableDefinition::<(i64, u64), ()>::new(&name);
            write_txn.delete_table(def)?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Scans
    // -------------------------------------------------------------------------

    /// Start a lazy scan. Rows stream in pages of [`PAGE_SIZE`]; the
    /// cursor holds no read transaction between pages, so a writer can
    /// keep appending while a reader iterates (ordering of rows
    /// committed after the cursor started is unspecified).
    pub fn select_all(
        &mut self,
        filter: ItemFilter,
        order: ItemOrder,
        direction: SortDirection,
    ) -> Result<ItemCursor, EmpipeError> {
        let indexed = self.registered_indexes()?;
        let db = self.database()?;

        let mode = match &order {
            ItemOrder::Id => match &filter {
                ItemFilter::AttrEq(attr, Value::Int(v)) if indexed.iter().any(|a| a == attr) => {
                    CursorMode::IndexScan {
                        table: index_table_name(attr),
                        value: *v,
                        resume: None,
                    }
                }
                _ => CursorMode::IdScan { resume: None },
            },
            ItemOrder::Attr(attr) => {
                if indexed.iter().any(|a| a == attr) {
                    CursorMode::IndexOrder {
                        table: index_table_name(attr),
                        resume: None,
                    }
                } else {
                    let ids = order_ids_by_attribute(&db, attr, direction)?;
                    CursorMode::IdList { ids, pos: 0 }
                }
            }
        };

        Ok(ItemCursor {
            db,
            mode,
            filter,
            direction,
            buffer: VecDeque::new(),
            finished: false,
        })
    }

    /// Lazy id-order scan starting strictly after `after`. The resume
    /// key makes repeated polling of a growing set cheap: each poll
    /// reads only the tail it has not consumed yet.
    pub fn select_after(&mut self, after: Option<u64>) -> Result<ItemCursor, EmpipeError> {
        let db = self.database()?;
        Ok(ItemCursor {
            db,
            mode: CursorMode::IdScan { resume: after },
            filter: ItemFilter::All,
            direction: SortDirection::Asc,
            buffer: VecDeque::new(),
            finished: false,
        })
    }
}

/// Open a file-backed database, retrying once on a busy handle.
fn open_file_database(location: &SetLocation) -> Result<Database, EmpipeError> {
    let SetLocation::File(path) = location else {
        return Err(EmpipeError::Construction(
            "expected a file location".to_string(),
        ));
    };
    match Database::create(path) {
        Ok(db) => Ok(db),
        Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
            std::thread::sleep(BUSY_RETRY);
            Database::create(path).map_err(EmpipeError::from)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read one postcard-encoded metadata entry.
fn read_meta<T: serde::de::DeserializeOwned>(
    db: &Database,
    key: &str,
) -> Result<Option<T>, EmpipeError> {
    let read_txn = db.begin_read()?;
    let meta = match read_txn.open_table(SET_INFO) {
        Ok(table) => table,
        Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match meta.get(key)? {
        Some(bytes) => Ok(Some(postcard::from_bytes(bytes.value())?)),
        None => Ok(None),
    }
}

/// One full ordering pass for an unindexed `orderBy` attribute: collect
/// (value, id), sort with the total value order, return the id list.
fn order_ids_by_attribute(
    db: &Database,
    attribute: &str,
    direction: SortDirection,
) -> Result<Vec<u64>, EmpipeError> {
    let read_txn = db.begin_read()?;
    let rows = read_txn.open_table(ITEMS)?;
    let mut keyed: Vec<(Value, u64)> = Vec::new();
    for entry in rows.iter()? {
        let (key, bytes) = entry?;
        let item: Item = postcard::from_bytes(bytes.value())?;
        keyed.push((item.get(attribute).clone(), key.value()));
    }
    keyed.sort_by(|(va, ia), (vb, ib)| va.total_order(vb).then_with(|| ia.cmp(ib)));
    if direction == SortDirection::Desc {
        keyed.reverse();
    }
    Ok(keyed.into_iter().map(|(_, id)| id).collect())
}

// =============================================================================
// CURSOR
// =============================================================================

enum CursorMode {
    /// Resume-keyed scan over the items table in id order.
    IdScan { resume: Option<u64> },
    /// Equality filter routed through a secondary index.
    IndexScan {
        table: String,
        value: i64,
        resume: Option<u64>,
    },
    /// Full ordering via a secondary index table.
    IndexOrder {
        table: String,
        resume: Option<(i64, u64)>,
    },
    /// Precomputed id ordering (unindexed `orderBy`).
    IdList { ids: Vec<u64>, pos: usize },
}

/// Lazy, restartable scan over a set's committed rows.
///
/// Yields `Result<Item>`; the first storage error ends the scan.
pub struct ItemCursor {
    db: Arc<Database>,
    mode: CursorMode,
    filter: ItemFilter,
    direction: SortDirection,
    buffer: VecDeque<Item>,
    finished: bool,
}

impl ItemCursor {
    /// Fetch the next page of matching rows into the buffer.
    fn fill(&mut self) -> Result<(), EmpipeError> {
        while self.buffer.is_empty() && !self.finished {
            let page = match &mut self.mode {
                CursorMode::IdScan { resume } => {
                    let page = fetch_id_page(&self.db, *resume, self.direction)?;
                    match page.last_key {
                        Some(key) => *resume = Some(key),
                        None => self.finished = true,
                    }
                    page.items
                }
                CursorMode::IndexScan {
                    table,
                    value,
                    resume,
                } => {
                    let page =
                        fetch_index_eq_page(&self.db, table, *value, *resume, self.direction)?;
                    match page.last_key {
                        Some(key) => *resume = Some(key),
                        None => self.finished = true,
                    }
                    page.items
                }
                CursorMode::IndexOrder { table, resume } => {
                    let page = fetch_index_order_page(&self.db, table, *resume, self.direction)?;
                    match page.last_key {
                        Some(key) => *resume = Some(key),
                        None => self.finished = true,
                    }
                    page.items
                }
                CursorMode::IdList { ids, pos } => {
                    if *pos >= ids.len() {
                        self.finished = true;
                        Vec::new()
                    } else {
                        let end = (*pos + PAGE_SIZE).min(ids.len());
                        let chunk = &ids[*pos..end];
                        *pos = end;
                        fetch_by_ids(&self.db, chunk)?
                    }
                }
            };
            self.buffer
                .extend(page.into_iter().filter(|item| self.filter.matches(item)));
        }
        Ok(())
    }
}

impl Iterator for ItemCursor {
    type Item = Result<Item, EmpipeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill() {
                self.finished = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

struct Page<K> {
    items: Vec<Item>,
    /// Resume key for the next page; `None` when the scan is exhausted.
    last_key: Option<K>,
}

fn fetch_id_page(
    db: &Database,
    resume: Option<u64>,
    direction: SortDirection,
) -> Result<Page<u64>, EmpipeError> {
    let read_txn = db.begin_read()?;
    let rows = read_txn.open_table(ITEMS)?;

    let mut items = Vec::new();
    let mut last_key = None;
    match direction {
        SortDirection::Asc => {
            let lower = match resume {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            for entry in rows.range((lower, Bound::Unbounded))?.take(PAGE_SIZE) {
                let (key, bytes) = entry?;
                items.push(postcard::from_bytes(bytes.value())?);
                last_key = Some(key.value());
            }
        }
        SortDirection::Desc => {
            let upper = match resume {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            for entry in rows
                .range((Bound::Unbounded, upper))?
                .rev()
                .take(PAGE_SIZE)
            {
                let (key, bytes) = entry?;
                items.push(postcard::from_bytes(bytes.value())?);
                last_key = Some(key.value());
            }
        }
    }
    Ok(Page { items, last_key })
}

fn fetch_index_eq_page(
    db: &Database,
    table: &str,
    value: i64,
    resume: Option<u64>,
    direction: SortDirection,
) -> Result<Page<u64>, EmpipeError> {
    let read_txn = db.begin_read()?;
    let def = TableDefinition::<(i64, u64), ()>::new(table);
    let index = read_txn.open_table(def)?;
    let rows = read_txn.open_table(ITEMS)?;

    let mut items = Vec::new();
    let mut last_key = None;
    let mut push = |id: u64| -> Result<(), EmpipeError> {
        // Index entries whose row vanished are skipped.
        if let Some(bytes) = rows.get(id)? {
            items.push(postcard::from_bytes(bytes.value())?);
        }
        last_key = Some(id);
        Ok(())
    };

    match direction {
        SortDirection::Asc => {
            let lower = match resume {
                Some(id) => Bound::Excluded((value, id)),
                None => Bound::Included((value, 0)),
            };
            let upper = Bound::Included((value, u64::MAX));
            for entry in index.range((lower, upper))?.take(PAGE_SIZE) {
                let (key, ()) = {
                    let (k, v) = entry?;
                    (k.value(), v.value())
                };
                push(key.1)?;
            }
        }
        SortDirection::Desc => {
            let lower = Bound::Included((value, 0));
            let upper = match resume {
                Some(id) => Bound::Excluded((value, id)),
                None => Bound::Included((value, u64::MAX)),
            };
            for entry in index.range((lower, upper))?.rev().take(PAGE_SIZE) {
                let (key, ()) = {
                    let (k, v) = entry?;
                    (k.value(), v.value())
                };
                push(key.1)?;
            }
        }
    }
    Ok(Page { items, last_key })
}

fn fetch_index_order_page(
    db: &Database,
    table: &str,
    resume: Option<(i64, u64)>,
    direction: SortDirection,
) -> Result<Page<(i64, u64)>, EmpipeError> {
    let read_txn = db.begin_read()?;
    let def = TableDefinition::<(i64, u64), ()>::new(table);
    let index = read_txn.open_table(def)?;
    let rows = read_txn.open_table(ITEMS)?;

    let mut items = Vec::new();
    let mut last_key = None;
    let mut push = |key: (i64, u64)| -> Result<(), EmpipeError> {
        if let Some(bytes) = rows.get(key.1)? {
            items.push(postcard::from_bytes(bytes.value())?);
        }
        last_key = Some(key);
        Ok(())
    };

    match direction {
        SortDirection::Asc => {
            let lower = match resume {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            for entry in index.range((lower, Bound::Unbounded))?.take(PAGE_SIZE) {
                let (key, ()) = {
                    let (k, v) = entry?;
                    (k.value(), v.value())
                };
                push(key)?;
            }
        }
        SortDirection::Desc => {
            let upper = match resume {
                Some(key) => Bound::Excluded(key),
                None => Bound::Unbounded,
            };
            for entry in index
                .range((Bound::Unbounded, upper))?
                .rev()
                .take(PAGE_SIZE)
            {
                let (key, ()) = {
                    let (k, v) = entry?;
                    (k.value(), v.value())
                };
                push(key)?;
            }
        }
    }
    Ok(Page { items, last_key })
}

fn fetch_by_ids(db: &Database, ids: &[u64]) -> Result<Vec<Item>, EmpipeError> {
    let read_txn = db.begin_read()?;
    let rows = read_txn.open_table(ITEMS)?;
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(bytes) = rows.get(*id)? {
            items.push(postcard::from_bytes(bytes.value())?);
        }
    }
    Ok(items)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::attrs;
    use tempfile::tempdir;

    fn coord(id: u64, mic_id: i64) -> Item {
        let mut item = Item::new();
        item.set_id(ItemId(id));
        item.set(attrs::MIC_ID, mic_id);
        item.set(attrs::X, (id as i64) * 10);
        item
    }

    fn collect(cursor: ItemCursor) -> Vec<Item> {
        cursor.map(|r| r.expect("scan")).collect()
    }

    #[test]
    fn insert_and_scan_in_id_order() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");

        let batch: Vec<Item> = (1..=5).map(|i| coord(i, (i as i64) % 2)).collect();
        store.insert_batch(&batch, 6).expect("insert");

        let items = collect(
            store
                .select_all(ItemFilter::All, ItemOrder::Id, SortDirection::Asc)
                .expect("scan"),
        );
        let ids: Vec<u64> = items.iter().map(|i| i.id().unwrap().value()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.count().expect("count"), 5);
    }

    #[test]
    fn duplicate_id_aborts_batch() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");

        store.insert_batch(&[coord(1, 0)], 2).expect("first");
        let err = store
            .insert_batch(&[coord(2, 0), coord(1, 0)], 3)
            .expect_err("dup");
        assert!(matches!(err, EmpipeError::DuplicateId(ItemId(1))));

        // The whole second batch rolled back, the first commit stands.
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn index_equivalence_on_mic_id() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");

        let batch: Vec<Item> = (1..=50).map(|i| coord(i, (i as i64) % 7)).collect();
        store.insert_batch(&batch, 51).expect("insert");

        let full_scan = |store: &mut SetStore| {
            collect(
                store
                    .select_all(
                        ItemFilter::AttrEq(attrs::MIC_ID.to_string(), Value::Int(3)),
                        ItemOrder::Id,
                        SortDirection::Asc,
                    )
                    .expect("scan"),
            )
            .iter()
            .map(|i| i.id().unwrap())
            .collect::<Vec<_>>()
        };

        let without_index = full_scan(&mut store);
        store.create_index(attrs::MIC_ID).expect("create index");
        let with_index = full_scan(&mut store);

        assert_eq!(without_index, with_index);
        assert!(!with_index.is_empty());
    }

    #[test]
    fn index_creation_is_idempotent_and_drop_reports() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");

        store.create_index(attrs::MIC_ID).expect("create");
        store.create_index(attrs::MIC_ID).expect("create again");
        assert_eq!(store.registered_indexes().expect("list"), vec![attrs::MIC_ID]);

        assert!(store.drop_index(attrs::MIC_ID).expect("drop"));
        assert!(!store.drop_index(attrs::MIC_ID).expect("drop again"));
    }

    #[test]
    fn undeclared_index_is_rejected() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");

        let err = store.create_index(attrs::FILENAME).expect_err("undeclared");
        assert!(matches!(err, EmpipeError::UndeclaredIndex { .. }));
    }

    #[test]
    fn close_then_read_reopens() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");
        store.insert_batch(&[coord(1, 0)], 2).expect("insert");

        store.close();
        assert_eq!(store.count().expect("reopen count"), 1);
        assert!(
            store
                .select_by_id(ItemId(1))
                .expect("reopen get")
                .is_some()
        );
    }

    #[test]
    fn memory_store_survives_close() {
        let mut store =
            SetStore::create(SetLocation::memory("scratch"), ItemKind::Particle).expect("create");
        store.insert_batch(&[coord(1, 0)], 2).expect("insert");
        store.close();
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn update_fixes_index_entries() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");
        store.create_index(attrs::MIC_ID).expect("index");

        store.insert_batch(&[coord(1, 5)], 2).expect("insert");
        let mut moved = coord(1, 9);
        moved.set_id(ItemId(1));
        store.update(&moved).expect("update");

        let hits = collect(
            store
                .select_all(
                    ItemFilter::AttrEq(attrs::MIC_ID.to_string(), Value::Int(9)),
                    ItemOrder::Id,
                    SortDirection::Asc,
                )
                .expect("scan"),
        );
        assert_eq!(hits.len(), 1);

        let misses = collect(
            store
                .select_all(
                    ItemFilter::AttrEq(attrs::MIC_ID.to_string(), Value::Int(5)),
                    ItemOrder::Id,
                    SortDirection::Asc,
                )
                .expect("scan"),
        );
        assert!(misses.is_empty());
    }

    #[test]
    fn order_by_unindexed_attribute() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");

        // x = 50, 40, 30, 20, 10 in insertion order.
        let batch: Vec<Item> = (1..=5)
            .map(|i| {
                let mut item = coord(i, 0);
                item.set(attrs::X, 60 - (i as i64) * 10);
                item
            })
            .collect();
        store.insert_batch(&batch, 6).expect("insert");

        let ordered = collect(
            store
                .select_all(
                    ItemFilter::All,
                    ItemOrder::Attr(attrs::X.to_string()),
                    SortDirection::Asc,
                )
                .expect("scan"),
        );
        let xs: Vec<i64> = ordered.iter().map(|i| i.get(attrs::X).as_int().unwrap()).collect();
        assert_eq!(xs, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn clear_drops_rows_and_rewinds_ids() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("coords.redb"));
        let mut store = SetStore::create(loc, ItemKind::Coordinate).expect("create");
        store.create_index(attrs::MIC_ID).expect("index");
        store
            .insert_batch(&(1..=4).map(|i| coord(i, 1)).collect::<Vec<_>>(), 5)
            .expect("insert");

        store.clear().expect("clear");
        assert_eq!(store.count().expect("count"), 0);
        assert_eq!(store.next_id().expect("next id"), 1);

        let hits = collect(
            store
                .select_all(
                    ItemFilter::AttrEq(attrs::MIC_ID.to_string(), Value::Int(1)),
                    ItemOrder::Id,
                    SortDirection::Asc,
                )
                .expect("scan"),
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn open_missing_path_is_fatal() {
        let temp = tempdir().expect("temp dir");
        let loc = SetLocation::file(temp.path().join("nope.redb"));
        let err = SetStore::open(loc).expect_err("missing");
        assert!(matches!(err, EmpipeError::Construction(_)));
    }
}
