//! # Set Factory
//!
//! Pipeline stages create their output sets under one working
//! directory with conventional file names: the kind's plural stem,
//! an optional suffix to disambiguate repeated outputs, and the store
//! extension. `particles.redb`, `particles_aligned.redb`,
//! `coordinates.redb`, and the shared `relations.redb` all come from
//! here.

use crate::classes::ClassSet;
use crate::relations::RelationGraph;
use crate::schema::ItemKind;
use crate::set::ObjectSet;
use crate::storage::STORE_FILE_EXT;
use crate::tiltpair::TiltPairSet;
use crate::types::{EmpipeError, SetLocation};
use std::path::{Path, PathBuf};

/// File name of the shared provenance graph.
const RELATIONS_FILE: &str = "relations.redb";

/// Creates conventionally named sets under one working directory.
#[derive(Debug, Clone)]
pub struct SetFactory {
    work_dir: PathBuf,
}

impl SetFactory {
    /// Root the factory at `work_dir`, creating the directory when
    /// missing.
    pub fn new(work_dir: impl Into<PathBuf>) -> Result<Self, EmpipeError> {
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self { work_dir })
    }

    /// The working directory.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Conventional location for a set of `kind`. An empty suffix
    /// gives `{stem}.{ext}`, otherwise `{stem}_{suffix}.{ext}`.
    #[must_use]
    pub fn location(&self, kind: ItemKind, suffix: &str) -> SetLocation {
        let stem = kind.file_stem();
        let name = if suffix.is_empty() {
            format!("{stem}.{STORE_FILE_EXT}")
        } else {
            format!("{stem}_{suffix}.{STORE_FILE_EXT}")
        };
        SetLocation::file(self.work_dir.join(name))
    }

    /// Create a fresh set at its conventional location, overwriting a
    /// previous run's output.
    pub fn create_set(&self, kind: ItemKind, suffix: &str) -> Result<ObjectSet, EmpipeError> {
        ObjectSet::create(self.location(kind, suffix), kind)
    }

    /// Create a fresh class set whose members are of `member_kind`.
    pub fn create_classes(
        &self,
        member_kind: ItemKind,
        suffix: &str,
    ) -> Result<ClassSet, EmpipeError> {
        ClassSet::create(self.location(ItemKind::Class, suffix), member_kind)
    }

    /// Couple two coordinate sets into a tilt-pair set at its
    /// conventional location.
    pub fn create_tilt_pairs(
        &self,
        untilted: &mut ObjectSet,
        tilted: &mut ObjectSet,
        angles: Option<&ObjectSet>,
        suffix: &str,
    ) -> Result<TiltPairSet, EmpipeError> {
        TiltPairSet::couple(
            self.location(ItemKind::CoordinatePair, suffix),
            untilted,
            tilted,
            angles,
        )
    }

    /// Open an existing set by its conventional location.
    pub fn open_set(&self, kind: ItemKind, suffix: &str) -> Result<ObjectSet, EmpipeError> {
        ObjectSet::open(self.location(kind, suffix))
    }

    /// The shared provenance graph of this working directory, created
    /// on first use.
    pub fn relations(&self) -> Result<RelationGraph, EmpipeError> {
        RelationGraph::open(self.work_dir.join(RELATIONS_FILE))
    }
}

// =============================================================================
// TESTS
// =============================================================================
