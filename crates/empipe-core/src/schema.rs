//! # Item Kind Configuration
//!
//! Every set stores items of exactly one declared kind. Instead of a
//! subtype hierarchy, a single [`ItemKind`] enumeration carries the
//! per-kind configuration as compile-time tables:
//!
//! - the declared attribute schema (documentation of the columns a
//!   complete item of that kind carries), and
//! - the declared index set, chosen for the access patterns pipeline
//!   stages actually use against that kind.
//!
//! The index tables here are what keeps parent→child filtering near
//! linear: "for each micrograph, iterate coordinates where
//! `mic_id = M`" runs across thousands of parents and must not become
//! O(parents × children).

use serde::{Deserialize, Serialize};

// =============================================================================
// WELL-KNOWN ATTRIBUTE NAMES
// =============================================================================

/// Attribute names shared across item kinds.
pub mod attrs {
    /// 1-based slice index inside a stack file.
    pub const INDEX: &str = "index";
    /// External image file referenced by the item.
    pub const FILENAME: &str = "filename";
    /// Id of the micrograph an item was derived from.
    pub const MIC_ID: &str = "mic_id";
    /// Id of the class an item was assigned to.
    pub const CLASS_ID: &str = "class_id";
    /// Micrograph id of the untilted half of a coordinate pair.
    pub const UNTILTED_MIC_ID: &str = "untilted_mic_id";
    /// Micrograph id of the tilted half of a coordinate pair.
    pub const TILTED_MIC_ID: &str = "tilted_mic_id";
    /// Item id of the untilted half of a coordinate pair.
    pub const UNTILTED_ID: &str = "untilted_id";
    /// Item id of the tilted half of a coordinate pair.
    pub const TILTED_ID: &str = "tilted_id";
    /// Picked position on the micrograph.
    pub const X: &str = "x";
    /// Picked position on the micrograph.
    pub const Y: &str = "y";
    /// Alignment transform matrix (nested record).
    pub const TRANSFORM: &str = "transform";
    /// Acquisition parameters (nested record).
    pub const ACQUISITION: &str = "acquisition";
    /// CTF defocus estimate, axis U.
    pub const DEFOCUS_U: &str = "defocus_u";
    /// CTF defocus estimate, axis V.
    pub const DEFOCUS_V: &str = "defocus_v";
    /// CTF defocus angle.
    pub const DEFOCUS_ANGLE: &str = "defocus_angle";
    /// Tilt angle for angle-set items.
    pub const ANGLE: &str = "angle";
    /// Frequency samples of an FSC curve (nested record).
    pub const FREQUENCIES: &str = "frequencies";
    /// Correlation samples of an FSC curve (nested record).
    pub const CORRELATIONS: &str = "correlations";
}

/// Set-level metadata keys.
pub mod info {
    /// Pixel size of the images in the set, in Å/px.
    pub const SAMPLING_RATE: &str = "sampling_rate";
    /// Acquisition defaults shared by the whole set (nested record).
    pub const ACQUISITION: &str = "acquisition";
    /// Location key of the angle set coupled to a tilt-pair set.
    pub const ANGLES: &str = "angles";
    /// Location key of the micrograph set a coordinate set was picked on.
    pub const MICROGRAPHS: &str = "micrographs";
    /// Location key of the untilted coordinate set of a tilt-pair set.
    pub const UNTILTED: &str = "untilted";
    /// Location key of the tilted coordinate set of a tilt-pair set.
    pub const TILTED: &str = "tilted";
}

// =============================================================================
// ITEM KIND
// =============================================================================

/// The declared kind of the items in a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Micrograph,
    Movie,
    Particle,
    Volume,
    Average,
    Class,
    Ctf,
    Coordinate,
    CoordinatePair,
    Angle,
    NormalMode,
    FscCurve,
}

impl ItemKind {
    /// Declared attribute schema for this kind.
    ///
    /// The bag stays open — callers may set attributes beyond this list —
    /// but the declared schema documents what a complete item carries and
    /// is what conversion layers rely on.
    #[must_use]
    pub const fn declared_attributes(self) -> &'static [&'static str] {
        match self {
            Self::Micrograph | Self::Movie => {
                &[attrs::INDEX, attrs::FILENAME, attrs::ACQUISITION]
            }
            Self::Particle => &[
                attrs::INDEX,
                attrs::FILENAME,
                attrs::MIC_ID,
                attrs::CLASS_ID,
                attrs::TRANSFORM,
            ],
            Self::Volume | Self::Average => &[attrs::INDEX, attrs::FILENAME, attrs::TRANSFORM],
            Self::Class => &[attrs::INDEX, attrs::FILENAME],
            Self::Ctf => &[
                attrs::MIC_ID,
                attrs::DEFOCUS_U,
                attrs::DEFOCUS_V,
                attrs::DEFOCUS_ANGLE,
            ],
            Self::Coordinate => &[attrs::X, attrs::Y, attrs::MIC_ID],
            Self::CoordinatePair => &[
                attrs::UNTILTED_ID,
                attrs::TILTED_ID,
                attrs::UNTILTED_MIC_ID,
                attrs::TILTED_MIC_ID,
            ],
            Self::Angle => &[attrs::ANGLE],
            Self::NormalMode => &[attrs::INDEX, attrs::FILENAME],
            Self::FscCurve => &[attrs::FREQUENCIES, attrs::CORRELATIONS],
        }
    }

    /// Declared secondary indexes for this kind, created at the set's
    /// first write and persisted with the file.
    ///
    /// Only attributes listed here may be indexed; they hold integer
    /// parent ids, where equality filtering dominates the access pattern.
    #[must_use]
    pub const fn indexed_attributes(self) -> &'static [&'static str] {
        match self {
            Self::Micrograph | Self::Movie => &[attrs::INDEX],
            Self::Particle => &[attrs::CLASS_ID, attrs::MIC_ID],
            Self::Coordinate => &[attrs::MIC_ID],
            Self::CoordinatePair => &[attrs::UNTILTED_MIC_ID, attrs::TILTED_MIC_ID],
            _ => &[],
        }
    }

    /// Whether `attribute` is in the declared-index list for this kind.
    #[must_use]
    pub fn is_indexable(self, attribute: &str) -> bool {
        self.indexed_attributes().contains(&attribute)
    }

    /// Canonical file-name template used by the set factory, e.g.
    /// `micrographs{suffix}.redb`.
    #[must_use]
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Micrograph => "micrographs",
            Self::Movie => "movies",
            Self::Particle => "particles",
            Self::Volume => "volumes",
            Self::Average => "averages",
            Self::Class => "classes",
            Self::Ctf => "ctfs",
            Self::Coordinate => "coordinates",
            Self::CoordinatePair => "coordinates_pairs",
            Self::Angle => "tiltpairs_angles",
            Self::NormalMode => "modes",
            Self::FscCurve => "fscs",
        }
    }

    /// Stable name used in error messages and the CLI.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Micrograph => "micrograph",
            Self::Movie => "movie",
            Self::Particle => "particle",
            Self::Volume => "volume",
            Self::Average => "average",
            Self::Class => "class",
            Self::Ctf => "ctf",
            Self::Coordinate => "coordinate",
            Self::CoordinatePair => "coordinate_pair",
            Self::Angle => "angle",
            Self::NormalMode => "normal_mode",
            Self::FscCurve => "fsc_curve",
        }
    }

    /// Inverse of [`ItemKind::name`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        const ALL: &[ItemKind] = &[
            ItemKind::Micrograph,
            ItemKind::Movie,
            ItemKind::Particle,
            ItemKind::Volume,
            ItemKind::Average,
            ItemKind::Class,
            ItemKind::Ctf,
            ItemKind::Coordinate,
            ItemKind::CoordinatePair,
            ItemKind::Angle,
            ItemKind::NormalMode,
            ItemKind::FscCurve,
        ];
        ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
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
    fn particle_indexes_cover_parent_lookups() {
        assert!(ItemKind::Particle.is_indexable(attrs::CLASS_ID));
        assert!(ItemKind::Particle.is_indexable(attrs::MIC_ID));
        assert!(!ItemKind::Particle.is_indexable(attrs::FILENAME));
    }

    #[test]
    fn coordinate_pair_indexes_both_halves() {
        let idx = ItemKind::CoordinatePair.indexed_attributes();
        assert_eq!(idx, &[attrs::UNTILTED_MIC_ID, attrs::TILTED_MIC_ID]);
    }

    #[test]
    fn indexed_attributes_are_declared() {
        for kind in [
            ItemKind::Micrograph,
            ItemKind::Movie,
            ItemKind::Particle,
            ItemKind::Volume,
            ItemKind::Average,
            ItemKind::Class,
            ItemKind::Ctf,
            ItemKind::Coordinate,
            ItemKind::CoordinatePair,
            ItemKind::Angle,
            ItemKind::NormalMode,
            ItemKind::FscCurve,
        ] {
            for attr in kind.indexed_attributes() {
                assert!(
                    kind.declared_attributes().contains(attr),
                    "index on undeclared attribute {attr} for {kind}"
                );
            }
        }
    }
}
