//! Per-staff definition tracking across measures.
//!
//! Each staff number keeps its current definition and a [`RenderWith`] set
//! telling the next measure which start modifiers must be drawn again.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::LayoutError;
use crate::model::{Measure, Meter, StaffDef};

/// Which start modifiers a staff must render at the next measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderWith {
    pub clef: bool,
    pub keysig: bool,
    pub timesig: bool,
}

impl RenderWith {
    pub const ALL: RenderWith = RenderWith { clef: true, keysig: true, timesig: true };
    pub const NONE: RenderWith = RenderWith { clef: false, keysig: false, timesig: false };

    pub fn any(&self) -> bool {
        self.clef || self.keysig || self.timesig
    }
}

/// Diff two staff definitions.
///
/// A first appearance renders everything, a missing new definition
/// renders nothing, and two missing definitions cannot be compared.
pub fn look_for_changes(
    current: Option<&StaffDef>,
    new: Option<&StaffDef>,
) -> Result<RenderWith, LayoutError> {
    let (current, new) = match (current, new) {
        (None, Some(_)) => return Ok(RenderWith::ALL),
        (Some(_), None) => return Ok(RenderWith::NONE),
        (None, None) => return Err(LayoutError::InvalidComparison),
        (Some(c), Some(n)) => (c, n),
    };

    Ok(RenderWith {
        clef: current.clef_shape != new.clef_shape || current.clef_line != new.clef_line,
        keysig: current.key_pname != new.key_pname
            || current.key_accid != new.key_accid
            || current.key_mode != new.key_mode,
        timesig: current.meter_count != new.meter_count || current.meter_unit != new.meter_unit,
    })
}

/// Definition and render state of one staff.
#[derive(Debug, Clone, PartialEq)]
pub struct StaffInfo {
    staff_def: Option<StaffDef>,
    render_with: RenderWith,
}

impl StaffInfo {
    /// A staff seen for the first time renders all of its modifiers.
    pub fn new(staff_def: StaffDef) -> Self {
        Self { staff_def: Some(staff_def), render_with: RenderWith::ALL }
    }

    /// Diff `staff_def` against the stored definition, then store it.
    ///
    /// Must be called once per staff per measure, in measure order. `None`
    /// keeps the previous definition.
    pub fn update_def(&mut self, staff_def: Option<StaffDef>) -> Result<RenderWith, LayoutError> {
        self.render_with = look_for_changes(self.staff_def.as_ref(), staff_def.as_ref())?;
        if staff_def.is_some() {
            self.staff_def = staff_def;
        }
        Ok(self.render_with)
    }

    pub fn staff_def(&self) -> Option<&StaffDef> {
        self.staff_def.as_ref()
    }

    pub fn render_with(&self) -> RenderWith {
        self.render_with
    }

    /// Current time signature.
    pub fn time_spec(&self) -> Meter {
        self.staff_def.as_ref().map(StaffDef::meter).unwrap_or_default()
    }

    /// Clear the render flags once the modifiers have been drawn.
    pub fn mark_rendered(&mut self) {
        self.render_with = RenderWith::NONE;
    }
}

/// Staff infos of every staff, keyed by staff number.
#[derive(Debug, Clone, Default)]
pub struct StaffInfos {
    infos: BTreeMap<u32, StaffInfo>,
}

impl StaffInfos {
    /// Infos for the staves of the initial score definition.
    pub fn from_score_defs(defs: &[StaffDef]) -> Self {
        let infos = defs.iter().map(|d| (d.n, StaffInfo::new(d.clone()))).collect();
        Self { infos }
    }

    pub fn get(&self, n: u32) -> Option<&StaffInfo> {
        self.infos.get(&n)
    }

    pub fn staff_numbers(&self) -> Vec<u32> {
        self.infos.keys().copied().collect()
    }

    /// Merge the partial definitions encountered before a measure over the
    /// current ones and diff them.
    pub fn apply_changes(&mut self, changes: &[StaffDef]) -> Result<(), LayoutError> {
        for change in changes {
            match self.infos.get_mut(&change.n) {
                Some(info) => {
                    let merged = match info.staff_def() {
                        Some(current) => current.merged_with(change),
                        None => change.clone(),
                    };
                    info.update_def(Some(merged))?;
                }
                None => {
                    self.infos.insert(change.n, StaffInfo::new(change.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn mark_rendered_all(&mut self) {
        for info in self.infos.values_mut() {
            info.mark_rendered();
        }
    }

    /// Staff infos as they will be in force at each of `measures`, applied
    /// in order. Used to resolve timestamps in later measures.
    pub fn advanced_through<'m>(
        &self,
        measures: impl IntoIterator<Item = &'m Measure>,
    ) -> Result<Self, LayoutError> {
        let mut infos = self.clone();
        for measure in measures {
            infos.apply_changes(&measure.staff_def_changes)?;
        }
        Ok(infos)
    }
}
