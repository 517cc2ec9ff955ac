//! # Tilt Pairs
//!
//! Random conical tilt acquisitions pick the same particles on an
//! untilted and a tilted micrograph. A [`TiltPairSet`] records the
//! pairing: one item per coupled pick, carrying the ids of both halves
//! and of both parent micrographs.
//!
//! The pairing is positional, so the two coordinate sets must have the
//! same size; a ragged couple is rejected before anything is written.

use crate::item::Item;
use crate::schema::{attrs, info, ItemKind};
use crate::set::ObjectSet;
use crate::storage::ItemCursor;
use crate::types::{EmpipeError, SetLocation, Value};

/// A set of coupled untilted/tilted coordinate picks.
pub struct TiltPairSet {
    set: ObjectSet,
}

impl std::fmt::Debug for TiltPairSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiltPairSet")
            .field("location", self.set.location())
            .finish_non_exhaustive()
    }
}

impl TiltPairSet {
    /// Couple two coordinate sets positionally, in id order. Both sets
    /// must have the same size and both locations are remembered in
    /// the pair set's metadata, as is the tilt-angle set when one is
    /// available at construction time (angles computed later can still
    /// be linked through [`TiltPairSet::attach_angles`]).
    pub fn couple(
        location: SetLocation,
        untilted: &mut ObjectSet,
        tilted: &mut ObjectSet,
        angles: Option<&ObjectSet>,
    ) -> Result<Self, EmpipeError> {
        let untilted_size = untilted.size()?;
        let tilted_size = tilted.size()?;
        if untilted_size != tilted_size {
            return Err(EmpipeError::Construction(format!(
                "cannot couple tilt pairs: {untilted_size} untilted vs {tilted_size} tilted coordinates"
            )));
        }

        let mut set = ObjectSet::create(location, ItemKind::CoordinatePair)?;
        set.set_info(info::UNTILTED, untilted.location().as_key())?;
        set.set_info(info::TILTED, tilted.location().as_key())?;
        if let Some(angles) = angles {
            set.set_info(info::ANGLES, angles.location().as_key())?;
        }

        for (u, t) in untilted.iter_items()?.zip(tilted.iter_items()?) {
            let (u, t) = (u?, t?);
            let mut pair = Item::new();
            copy_half(&mut pair, &u, attrs::UNTILTED_ID, attrs::UNTILTED_MIC_ID);
            copy_half(&mut pair, &t, attrs::TILTED_ID, attrs::TILTED_MIC_ID);
            set.append(pair);
        }
        set.write()?;

        Ok(Self { set })
    }

    /// Open an existing tilt-pair set file.
    pub fn open(location: SetLocation) -> Result<Self, EmpipeError> {
        let set = ObjectSet::open(location)?;
        if set.kind() != ItemKind::CoordinatePair {
            return Err(EmpipeError::Construction(format!(
                "expected a tilt-pair set, found {}",
                set.kind()
            )));
        }
        Ok(Self { set })
    }

    /// Backing location.
    #[must_use]
    pub const fn location(&self) -> &SetLocation {
        self.set.location()
    }

    /// Number of pairs.
    pub fn size(&mut self) -> Result<u64, EmpipeError> {
        self.set.size()
    }

    /// Lazy scan over the pair items in id order.
    pub fn iter_pairs(&mut self) -> Result<ItemCursor, EmpipeError> {
        self.set.iter_items()
    }

    /// Pairs whose untilted half was picked on the given micrograph.
    /// Served by the declared `untilted_mic_id` index.
    pub fn pairs_on_untilted_mic(&mut self, mic_id: i64) -> Result<ItemCursor, EmpipeError> {
        self.set.iter_where(attrs::UNTILTED_MIC_ID, mic_id)
    }

    /// Couple a set of tilt angles to this pair set by location.
    pub fn attach_angles(&mut self, angles: &ObjectSet) -> Result<(), EmpipeError> {
        self.set.set_info(info::ANGLES, angles.location().as_key())
    }

    /// Location of the untilted coordinate set this pairing came from.
    pub fn untilted_location(&mut self) -> Result<Option<SetLocation>, EmpipeError> {
        self.linked_location(info::UNTILTED)
    }

    /// Location of the tilted coordinate set this pairing came from.
    pub fn tilted_location(&mut self) -> Result<Option<SetLocation>, EmpipeError> {
        self.linked_location(info::TILTED)
    }

    /// Location of the coupled angle set, when one was attached.
    pub fn angles_location(&mut self) -> Result<Option<SetLocation>, EmpipeError> {
        self.linked_location(info::ANGLES)
    }

    fn linked_location(&mut self, key: &str) -> Result<Option<SetLocation>, EmpipeError> {
        match self.set.info_get(key)? {
            Value::Str(k) => Ok(SetLocation::from_key(&k)),
            _ => Ok(None),
        }
    }

    /// Access the underlying set, for generic consumers.
    pub fn as_set(&mut self) -> &mut ObjectSet {
        &mut self.set
    }
}

/// Carry one half's ids onto the pair item.
fn copy_half(pair: &mut Item, half: &Item, id_attr: &str, mic_attr: &str) {
    if let Some(id) = half.id() {
        pair.set(id_attr, id.value() as i64);
    }
    if let Some(mic_id) = half.get(attrs::MIC_ID).as_int() {
        pair.set(mic_attr, mic_id);
    }
}

// =============================================================================
// TESTS
// =============================================================================
