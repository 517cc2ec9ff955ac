//! # Classification Results
//!
//! A [`ClassSet`] stores the output of a 2D/3D classification: one
//! representative item per class plus, in the same file, one member
//! table per class holding the items assigned to it.
//!
//! Representatives live in the regular item table of a [`SetStore`]
//! (kind [`ItemKind::Class`]), so iteration, metadata, and
//! close/reopen behave like any other set. Members live in dynamic
//! tables named `class_{id}`, keyed by the member's own item id so a
//! subset keeps the ids of the set the classification ran on.
//!
//! Subsetting honors the enabled flag at both levels: a disabled class
//! drops all its members, an enabled class contributes only its
//! enabled members.

use crate::item::Item;
use crate::schema::ItemKind;
use crate::set::ObjectSet;
use crate::storage::{ItemFilter, ItemOrder, SetStore, SortDirection};
use crate::types::{EmpipeError, ItemId, SetLocation};
use redb::{ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};

/// Info key recording the kind of the member items.
const INFO_MEMBER_KIND: &str = "member_kind";

fn member_table_name(class_id: ItemId) -> String {
    format!("class_{}", class_id.value())
}

/// A set of classes with per-class member tables.
pub struct ClassSet {
    store: SetStore,
}

impl std::fmt::Debug for ClassSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassSet")
            .field("location", self.store.location())
            .finish_non_exhaustive()
    }
}

impl ClassSet {
    /// Create a fresh class set whose members are of `member_kind`.
    pub fn create(location: SetLocation, member_kind: ItemKind) -> Result<Self, EmpipeError> {
        let mut store = SetStore::create(location, ItemKind::Class)?;
        let mut info = store.read_info()?;
        info.insert(INFO_MEMBER_KIND.to_string(), member_kind.name().into());
        store.write_info(&info)?;
        Ok(Self { store })
    }

    /// Open an existing class set file.
    pub fn open(location: SetLocation) -> Result<Self, EmpipeError> {
        let store = SetStore::open(location)?;
        if store.kind() != ItemKind::Class {
            return Err(EmpipeError::Construction(format!(
                "expected a class set, found {}",
                store.kind()
            )));
        }
        Ok(Self { store })
    }

    /// Backing location.
    #[must_use]
    pub const fn location(&self) -> &SetLocation {
        self.store.location()
    }

    /// Kind of the member items.
    pub fn member_kind(&mut self) -> Result<ItemKind, EmpipeError> {
        let info = self.store.read_info()?;
        info.get(INFO_MEMBER_KIND)
            .and_then(|v| v.as_str())
            .and_then(ItemKind::parse)
            .ok_or_else(|| {
                EmpipeError::Construction("class set without a member kind".to_string())
            })
    }

    /// Release the storage handle; later calls reopen transparently.
    pub fn close(&mut self) {
        self.store.close();
    }

    /// Number of classes.
    pub fn size(&mut self) -> Result<u64, EmpipeError> {
        self.store.count()
    }

    // -------------------------------------------------------------------------
    // Building
    // -------------------------------------------------------------------------

    /// Add one class with the given representative and members. A
    /// representative without an id gets the next class id; members
    /// keep their ids (they identify rows of the classified set).
    pub fn append_class(
        &mut self,
        mut representative: Item,
        members: &[Item],
    ) -> Result<ItemId, EmpipeError> {
        let class_id = match representative.id() {
            Some(id) => id,
            None => {
                let id = ItemId(self.store.next_id()?);
                representative.set_id(id);
                id
            }
        };
        let next_id = self.store.next_id()?.max(class_id.value() + 1);
        self.store.insert_batch(&[representative], next_id)?;
        self.add_members(class_id, members)
    }

    /// Append members to an existing class in one transaction.
    pub fn add_members(&mut self, class_id: ItemId, members: &[Item]) -> Result<ItemId, EmpipeError> {
        if self.store.select_by_id(class_id)?.is_none() {
            return Err(EmpipeError::ItemNotFound(class_id));
        }
        let db = self.store.database()?;
        let write_txn = db.begin_write()?;
        {
            let name = member_table_name(class_id);
            let def = TableDefinition::<u64, &[u8]>::new(&name);
            let mut table = write_txn.open_table(def)?;
            for member in members {
                let id = member.id().ok_or_else(|| {
                    EmpipeError::Construction(
                        "class members must carry the id of the classified item".to_string(),
                    )
                })?;
                table.insert(id.value(), postcard::to_allocvec(member)?.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(class_id)
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// Class representatives in class-id order.
    pub fn iter_classes(&mut self) -> Result<Vec<Item>, EmpipeError> {
        self.store
            .select_all(ItemFilter::All, ItemOrder::Id, SortDirection::Asc)?
            .collect()
    }

    /// The lowest-id class representative, if any.
    pub fn first_class(&mut self) -> Result<Option<Item>, EmpipeError> {
        let mut cursor =
            self.store
                .select_all(ItemFilter::All, ItemOrder::Id, SortDirection::Asc)?;
        cursor.next().transpose()
    }

    /// Members of one class, in member-id order.
    pub fn members(&mut self, class_id: ItemId) -> Result<Vec<Item>, EmpipeError> {
        if self.store.select_by_id(class_id)?.is_none() {
            return Err(EmpipeError::ItemNotFound(class_id));
        }
        let db = self.store.database()?;
        let read_txn = db.begin_read()?;
        let name = member_table_name(class_id);
        let def = TableDefinition::<u64, &[u8]>::new(&name);
        let table = match read_txn.open_table(def) {
            Ok(table) => table,
            // A class appended without members has no table yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut items = Vec::new();
        for entry in table.iter()? {
            let (_, bytes) = entry?;
            items.push(postcard::from_bytes(bytes.value())?);
        }
        Ok(items)
    }

    /// Number of members in one class.
    pub fn class_size(&mut self, class_id: ItemId) -> Result<u64, EmpipeError> {
        if self.store.select_by_id(class_id)?.is_none() {
            return Err(EmpipeError::ItemNotFound(class_id));
        }
        let db = self.store.database()?;
        let read_txn = db.begin_read()?;
        let name = member_table_name(class_id);
        let def = TableDefinition::<u64, &[u8]>::new(&name);
        match read_txn.open_table(def) {
            Ok(table) => Ok(table.len()?),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    // -------------------------------------------------------------------------
    // Subsetting
    // -------------------------------------------------------------------------

    /// Enabled members of enabled classes, in (class, member) order.
    pub fn enabled_members(&mut self) -> Result<Vec<Item>, EmpipeError> {
        let mut picked = Vec::new();
        for class in self.iter_classes()? {
            if !class.is_enabled() {
                continue;
            }
            let Some(class_id) = class.id() else {
                continue;
            };
            picked.extend(
                self.members(class_id)?
                    .into_iter()
                    .filter(Item::is_enabled),
            );
        }
        Ok(picked)
    }

    /// Build this class set as the enabled subset of another: enabled
    /// classes only, each carrying only its enabled members. Class and
    /// member ids are preserved.
    pub fn append_from_classes(&mut self, other: &mut ClassSet) -> Result<(), EmpipeError> {
        for class in other.iter_classes()? {
            if !class.is_enabled() {
                continue;
            }
            let Some(class_id) = class.id() else {
                continue;
            };
            let members: Vec<Item> = other
                .members(class_id)?
                .into_iter()
                .filter(Item::is_enabled)
                .collect();
            self.append_class(class, &members)?;
        }
        Ok(())
    }
}

impl ObjectSet {
    /// Append the enabled members of every enabled class. Member ids
    /// are preserved, so the result is a faithful subset of the set
    /// the classification ran on.
    pub fn append_from_classes(&mut self, classes: &mut ClassSet) -> Result<(), EmpipeError> {
        for member in classes.enabled_members()? {
            self.append(member);
        }
        self.write()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn particle(id: u64) -> Item {
        let mut item = Item::new();
        item.set_id(ItemId(id));
        item.set_location(1, format!("stack_{:03}.mrcs", id / 100 + 1));
        item
    }

    /// Four classes of 33, 37, 3, and 3 particles drawn from ids
    /// 1..=76. Classes 3 and 4 are disabled whole; one member of each
    /// of classes 1 and 2 is disabled individually.
    fn selection_set(location: SetLocation) -> ClassSet {
        let mut classes = ClassSet::create(location, ItemKind::Particle).expect("create");

        let mut next_particle = 1u64;
        for (class_id, (count, class_enabled)) in
            [(33u64, true), (37, true), (3, false), (3, false)]
                .into_iter()
                .enumerate()
        {
            let mut rep = Item::new();
            rep.set_id(ItemId(class_id as u64 + 1));
            rep.set_enabled(class_enabled);

            let members: Vec<Item> = (0..count)
                .map(|i| {
                    let mut p = particle(next_particle + i);
                    // First member of the first two classes is disabled.
                    if i == 0 && class_enabled {
                        p.set_enabled(false);
                    }
                    p
                })
                .collect();
            next_particle += count;

            classes.append_class(rep, &members).expect("append class");
        }
        classes
    }

    #[test]
    fn classes_and_members_round_trip() {
        let temp = tempdir().expect("temp dir");
        let mut classes = selection_set(SetLocation::file(temp.path().join("classes.redb")));

        assert_eq!(classes.size().expect("size"), 4);
        assert_eq!(classes.member_kind().expect("kind"), ItemKind::Particle);
        assert_eq!(classes.class_size(ItemId(1)).expect("size"), 33);
        assert_eq!(classes.class_size(ItemId(2)).expect("size"), 37);

        let first = classes.first_class().expect("first").expect("present");
        assert_eq!(first.id(), Some(ItemId(1)));

        let members = classes.members(ItemId(1)).expect("members");
        assert_eq!(members[0].id(), Some(ItemId(1)));
        assert_eq!(members.len(), 33);
    }

    #[test]
    fn iteration_works_after_close() {
        let temp = tempdir().expect("temp dir");
        let mut classes = selection_set(SetLocation::file(temp.path().join("classes.redb")));

        classes.close();
        // Reads after close reopen the file transparently.
        assert_eq!(classes.iter_classes().expect("classes").len(), 4);
        assert_eq!(classes.class_size(ItemId(2)).expect("size"), 37);
    }

    #[test]
    fn subset_to_items_honors_enabled_flags() {
        let temp = tempdir().expect("temp dir");
        let mut classes = selection_set(SetLocation::file(temp.path().join("classes.redb")));

        let mut particles =
            ObjectSet::create(SetLocation::memory("subset"), ItemKind::Particle).expect("create");
        particles.append_from_classes(&mut classes).expect("subset");

        // Two classes disabled whole, one member dropped from each of
        // the surviving classes: 32 + 36.
        assert_eq!(particles.size().expect("size"), 68);
    }

    #[test]
    fn subset_to_classes_keeps_per_class_sizes() {
        let temp = tempdir().expect("temp dir");
        let mut classes = selection_set(SetLocation::file(temp.path().join("classes.redb")));

        let mut subset =
            ClassSet::create(SetLocation::memory("cls_subset"), ItemKind::Particle)
                .expect("create");
        subset.append_from_classes(&mut classes).expect("subset");

        assert_eq!(subset.size().expect("size"), 2);
        assert_eq!(subset.class_size(ItemId(1)).expect("size"), 32);
        assert_eq!(subset.class_size(ItemId(2)).expect("size"), 36);
    }

    #[test]
    fn empty_class_has_no_members() {
        let temp = tempdir().expect("temp dir");
        let mut classes = ClassSet::create(
            SetLocation::file(temp.path().join("classes.redb")),
            ItemKind::Particle,
        )
        .expect("create");

        let id = classes.append_class(Item::new(), &[]).expect("append");
        assert_eq!(classes.class_size(id).expect("size"), 0);
        assert!(classes.members(id).expect("members").is_empty());
    }

    #[test]
    fn member_without_id_is_rejected() {
        let temp = tempdir().expect("temp dir");
        let mut classes = ClassSet::create(
            SetLocation::file(temp.path().join("classes.redb")),
            ItemKind::Particle,
        )
        .expect("create");

        let err = classes
            .append_class(Item::new(), &[Item::new()])
            .expect_err("no id");
        assert!(matches!(err, EmpipeError::Construction(_)));
    }

    #[test]
    fn unknown_class_is_an_error() {
        let temp = tempdir().expect("temp dir");
        let mut classes = ClassSet::create(
            SetLocation::file(temp.path().join("classes.redb")),
            ItemKind::Particle,
        )
        .expect("create");

        let err = classes.members(ItemId(9)).expect_err("missing");
        assert!(matches!(err, EmpipeError::ItemNotFound(ItemId(9))));
    }
}
