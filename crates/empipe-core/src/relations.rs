//! # Provenance Relations
//!
//! A small durable graph recording how sets derive from each other:
//! which set a subset was cut from, which alignment produced which
//! particles, which CTF estimation belongs to which micrographs.
//!
//! Edges are typed by [`RelationKind`]. `Transform` and `Ctf` are
//! refinements of `Source`, so registering either also registers the
//! `Source` edge in the same transaction; a consumer that only asks
//! "where did this come from" never has to know about the refinement.

use crate::types::{EmpipeError, SetLocation};
use redb::{Database, ReadableDatabase, TableDefinition};
use std::ops::Bound;
use std::path::Path;

/// Forward edges: (parent key, child key, kind name).
const EDGES: TableDefinition<(&str, &str, &str), ()> = TableDefinition::new("edges");

/// Reverse edges: (child key, parent key, kind name).
const EDGES_REV: TableDefinition<(&str, &str, &str), ()> = TableDefinition::new("edges_rev");

/// The provenance edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// The child was derived from the parent in some way.
    Source,
    /// The child carries geometric transforms computed against the
    /// parent (alignment, projection assignment).
    Transform,
    /// The child is a CTF estimation of the parent micrographs.
    Ctf,
}

impl RelationKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Ctf => "ctf",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "source" => Some(Self::Source),
            "transform" => Some(Self::Transform),
            "ctf" => Some(Self::Ctf),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Query direction for [`RelationGraph::related`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sets the argument was derived from.
    Parents,
    /// Sets derived from the argument.
    Children,
}

/// The durable provenance graph, one redb file per project.
pub struct RelationGraph {
    db: Database,
}

impl std::fmt::Debug for RelationGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationGraph").finish_non_exhaustive()
    }
}

impl RelationGraph {
    /// Open the graph file, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EmpipeError> {
        let db = Database::create(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(EDGES)?;
            let _ = write_txn.open_table(EDGES_REV)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Register one typed edge. `Transform` and `Ctf` also register the
    /// implied `Source` edge atomically.
    pub fn register(
        &mut self,
        kind: RelationKind,
        parent: &SetLocation,
        child: &SetLocation,
    ) -> Result<(), EmpipeError> {
        let parent_key = parent.as_key();
        let child_key = child.as_key();
        let write_txn = self.db.begin_write()?;
        {
            let mut edges = write_txn.open_table(EDGES)?;
            let mut rev = write_txn.open_table(EDGES_REV)?;

            let mut insert = |k: RelationKind| -> Result<(), EmpipeError> {
                edges.insert((parent_key.as_str(), child_key.as_str(), k.name()), ())?;
                rev.insert((child_key.as_str(), parent_key.as_str(), k.name()), ())?;
                Ok(())
            };
            insert(kind)?;
            if kind != RelationKind::Source {
                insert(RelationKind::Source)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Shorthand for a plain source edge.
    pub fn register_source(
        &mut self,
        parent: &SetLocation,
        child: &SetLocation,
    ) -> Result<(), EmpipeError> {
        self.register(RelationKind::Source, parent, child)
    }

    /// Shorthand for a transform edge (implies source).
    pub fn register_transform(
        &mut self,
        parent: &SetLocation,
        child: &SetLocation,
    ) -> Result<(), EmpipeError> {
        self.register(RelationKind::Transform, parent, child)
    }

    /// Shorthand for a CTF edge (implies source).
    pub fn register_ctf(
        &mut self,
        parent: &SetLocation,
        child: &SetLocation,
    ) -> Result<(), EmpipeError> {
        self.register(RelationKind::Ctf, parent, child)
    }

    /// Whether a specific typed edge exists.
    pub fn has_edge(
        &self,
        kind: RelationKind,
        parent: &SetLocation,
        child: &SetLocation,
    ) -> Result<bool, EmpipeError> {
        let read_txn = self.db.begin_read()?;
        let edges = read_txn.open_table(EDGES)?;
        Ok(edges
            .get((
                parent.as_key().as_str(),
                child.as_key().as_str(),
                kind.name(),
            ))?
            .is_some())
    }

    /// Sets related to `set` through `kind` edges, in the given
    /// direction. Duplicates collapse, and locations whose backing
    /// store no longer exists are dropped rather than returned stale.
    pub fn related(
        &self,
        set: &SetLocation,
        kind: RelationKind,
        direction: Direction,
    ) -> Result<Vec<SetLocation>, EmpipeError> {
        let key = set.as_key();
        let read_txn = self.db.begin_read()?;

        let mut found = Vec::new();
        let mut scan = |table: redb::ReadOnlyTable<(&str, &str, &str), ()>| -> Result<(), EmpipeError> {
            let lower = Bound::Included((key.as_str(), "", ""));
            let upper = Bound::Excluded((key.as_str(), "\u{10FFFF}", "\u{10FFFF}"));
            for entry in table.range((lower, upper))? {
                let (edge, ()) = {
                    let (k, v) = entry?;
                    let (_, other, kind_name) = k.value();
                    ((other.to_string(), kind_name.to_string()), v.value())
                };
                if edge.1 == kind.name() {
                    found.push(edge.0);
                }
            }
            Ok(())
        };

        match direction {
            Direction::Children => scan(read_txn.open_table(EDGES)?)?,
            Direction::Parents => scan(read_txn.open_table(EDGES_REV)?)?,
        }

        found.sort();
        found.dedup();
        Ok(found
            .iter()
            .filter_map(|k| SetLocation::from_key(k))
            .filter(SetLocation::exists)
            .collect())
    }

    /// Sets `set` was derived from (any source edge, typed edges
    /// included through the implied-source rule).
    pub fn sources_of(&self, set: &SetLocation) -> Result<Vec<SetLocation>, EmpipeError> {
        self.related(set, RelationKind::Source, Direction::Parents)
    }

    /// Sets derived from `set`.
    pub fn derived_from(&self, set: &SetLocation) -> Result<Vec<SetLocation>, EmpipeError> {
        self.related(set, RelationKind::Source, Direction::Children)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::ItemKind;
    use crate::set::ObjectSet;
    use tempfile::tempdir;

    fn make_set(dir: &Path, name: &str) -> SetLocation {
        let loc = SetLocation::file(dir.join(name));
        let mut set = ObjectSet::create(loc.clone(), ItemKind::Micrograph).expect("create");
        set.close().expect("close");
        loc
    }

    #[test]
    fn transform_edge_implies_source() {
        let temp = tempdir().expect("temp dir");
        let mics = make_set(temp.path(), "mics.redb");
        let parts = make_set(temp.path(), "parts.redb");

        let mut graph = RelationGraph::open(temp.path().join("relations.redb")).expect("open");
        graph.register_transform(&mics, &parts).expect("register");

        assert!(graph
            .has_edge(RelationKind::Transform, &mics, &parts)
            .expect("has"));
        assert!(graph
            .has_edge(RelationKind::Source, &mics, &parts)
            .expect("has"));

        let sources = graph.sources_of(&parts).expect("sources");
        assert_eq!(sources, vec![mics.clone()]);
        let derived = graph.derived_from(&mics).expect("derived");
        assert_eq!(derived, vec![parts]);
    }

    #[test]
    fn ctf_edge_implies_source() {
        let temp = tempdir().expect("temp dir");
        let mics = make_set(temp.path(), "mics.redb");
        let ctfs = make_set(temp.path(), "ctfs.redb");

        let mut graph = RelationGraph::open(temp.path().join("relations.redb")).expect("open");
        graph.register_ctf(&mics, &ctfs).expect("register");

        assert!(graph
            .related(&ctfs, RelationKind::Ctf, Direction::Parents)
            .expect("related")
            .contains(&mics));
        assert_eq!(graph.sources_of(&ctfs).expect("sources"), vec![mics]);
    }

    #[test]
    fn duplicate_registration_collapses() {
        let temp = tempdir().expect("temp dir");
        let mics = make_set(temp.path(), "mics.redb");
        let parts = make_set(temp.path(), "parts.redb");

        let mut graph = RelationGraph::open(temp.path().join("relations.redb")).expect("open");
        graph.register_source(&mics, &parts).expect("register");
        graph.register_transform(&mics, &parts).expect("register");
        graph.register_source(&mics, &parts).expect("register");

        assert_eq!(graph.sources_of(&parts).expect("sources").len(), 1);
    }

    #[test]
    fn vanished_set_is_dropped_from_results() {
        let temp = tempdir().expect("temp dir");
        let mics = make_set(temp.path(), "mics.redb");
        let parts = make_set(temp.path(), "parts.redb");

        let mut graph = RelationGraph::open(temp.path().join("relations.redb")).expect("open");
        graph.register_source(&mics, &parts).expect("register");

        let SetLocation::File(mics_path) = &mics else {
            panic!("file location");
        };
        std::fs::remove_file(mics_path).expect("remove");

        assert!(graph.sources_of(&parts).expect("sources").is_empty());
    }

    #[test]
    fn unrelated_sets_are_not_mixed() {
        let temp = tempdir().expect("temp dir");
        let a = make_set(temp.path(), "a.redb");
        let b = make_set(temp.path(), "b.redb");
        let c = make_set(temp.path(), "c.redb");

        let mut graph = RelationGraph::open(temp.path().join("relations.redb")).expect("open");
        graph.register_source(&a, &b).expect("register");

        assert!(graph.sources_of(&c).expect("sources").is_empty());
        assert!(graph.derived_from(&c).expect("derived").is_empty());
        assert_eq!(graph.sources_of(&b).expect("sources"), vec![a]);
    }
}
