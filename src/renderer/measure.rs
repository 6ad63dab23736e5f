//! Measure layout — minimum width, final width and horizontal formatting
//! of one measure across all of its staves.
//!
//! A measure moves through three stages, each its own type:
//! [`Measure`] (built, min width computed on demand) → [`SizedMeasure`]
//! (final width fixed) → [`FormattedMeasure`] (positioned, drawable).

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;

use crate::error::LayoutError;
use crate::model::ControlEvent;
use super::constants::*;
use super::links::LinkCollection;
use super::pointers::PointerCollection;
use super::stave::{Decoration, Stave, StaveConnector, StaveFonts};
use super::svg_builder::SvgBuilder;
use super::voices::VoiceStack;

/// The terms the minimum width of a measure is made of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MinWidthParts {
    /// Largest note start offset over all staves
    pub max_note_start_x: f64,
    /// Largest end modifier width over all staves
    pub max_end_modifier_w: f64,
    /// Width the joint voice formatting needs
    pub min_voices_w: f64,
    /// Space after a repeat-begin barline followed by other modifiers
    pub repeat_padding: f64,
}

impl MinWidthParts {
    pub fn total(&self) -> f64 {
        self.max_note_start_x + self.max_end_modifier_w + self.min_voices_w + self.repeat_padding
    }
}

/// Annotations collected for a measure, resolved once the whole score is
/// formatted.
#[derive(Debug, Default)]
pub struct MeasureCollections {
    pub pointers: Vec<PointerCollection>,
    pub links: Vec<LinkCollection>,
}

// ═══════════════════════════════════════════════════════════════════════
// Measure
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct Measure {
    pub n: u32,
    pub id: Option<String>,
    /// Index of the measure in the score
    pub index: usize,
    mei_width: Option<f64>,
    staves: BTreeMap<u32, Stave>,
    voices: VoiceStack,
    start_connectors: Vec<StaveConnector>,
    inline_connectors: Vec<StaveConnector>,
    collections: MeasureCollections,
    parts: Option<MinWidthParts>,
}

impl Measure {
    pub fn new(n: u32, index: usize, mei_width: Option<f64>, voices: VoiceStack) -> Self {
        Self {
            n,
            id: None,
            index,
            mei_width: mei_width.filter(|w| w.is_finite() && *w > 0.0),
            staves: BTreeMap::new(),
            voices,
            start_connectors: Vec::new(),
            inline_connectors: Vec::new(),
            collections: MeasureCollections::default(),
            parts: None,
        }
    }

    pub fn add_stave(&mut self, stave: Stave) {
        self.staves.insert(stave.n, stave);
        self.parts = None;
    }

    pub fn staves(&self) -> &BTreeMap<u32, Stave> {
        &self.staves
    }

    pub fn voices(&self) -> &VoiceStack {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut VoiceStack {
        self.parts = None;
        &mut self.voices
    }

    pub fn set_connectors(&mut self, start: Vec<StaveConnector>, inline: Vec<StaveConnector>) {
        self.start_connectors = start;
        self.inline_connectors = inline;
    }

    pub fn collections_mut(&mut self) -> &mut MeasureCollections {
        &mut self.collections
    }

    /// The stave with the lowest staff number.
    pub fn first_defined_staff(&self) -> Result<&Stave, LayoutError> {
        self.staves
            .values()
            .next()
            .ok_or(LayoutError::NoStaffFound { measure: self.n })
    }

    /// Put each tempo mark above the stave named by its `@staff`.
    pub fn add_tempo_to_staves(&mut self, tempos: &[&ControlEvent]) {
        self.add_decorations(tempos, Decoration::Tempo);
    }

    /// Put each rehearsal mark above the stave named by its `@staff`.
    pub fn add_rehearsal_marks(&mut self, marks: &[&ControlEvent]) {
        self.add_decorations(marks, Decoration::Section);
    }

    fn add_decorations(&mut self, events: &[&ControlEvent], make: fn(String) -> Decoration) {
        for event in events {
            let text = normalize_whitespace(&event.text);
            if text.is_empty() {
                continue;
            }
            let staff_n = event
                .attr("staff")
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            match self.staves.get_mut(&staff_n) {
                Some(stave) => stave.add_decoration(make(text)),
                None => warn!(
                    "{} could not be rendered because staff {} is not present in measure {}",
                    event.source, staff_n, self.n
                ),
            }
        }
    }

    /// Compute the minimum width from the stave modifiers, the voices and
    /// repeat padding. Safe to call repeatedly.
    pub fn calculate_min_width(&mut self) -> Result<f64, LayoutError> {
        let first = self.first_defined_staff()?;

        let modifiers = first.modifiers();
        let repeat_padding = if modifiers.first().map_or(false, |m| m.is_repeat_begin())
            && modifiers.len() > 2
        {
            REPEAT_PADDING
        } else {
            0.0
        };

        let max_note_start_x = self
            .staves
            .values()
            .map(Stave::note_start_offset)
            .fold(0.0, f64::max);
        let max_end_modifier_w = self
            .staves
            .values()
            .map(Stave::end_modifier_width)
            .fold(0.0, f64::max);
        let min_voices_w = self.voices.pre_format();

        let parts = MinWidthParts {
            max_note_start_x,
            max_end_modifier_w,
            min_voices_w,
            repeat_padding,
        };
        self.parts = Some(parts);
        Ok(parts.total())
    }

    pub fn min_width(&self) -> Option<f64> {
        self.parts.map(|p| p.total())
    }

    pub fn min_width_parts(&self) -> Option<MinWidthParts> {
        self.parts
    }

    pub fn has_explicit_width(&self) -> bool {
        self.mei_width.is_some()
    }

    /// Width given by the source, if valid.
    pub fn explicit_width(&self) -> Option<f64> {
        self.mei_width
    }

    /// Fix the final width: the explicit source width when present,
    /// otherwise the minimum width plus `additional`.
    pub fn set_final_width(self, additional: f64) -> Result<SizedMeasure, LayoutError> {
        let parts = self
            .parts
            .ok_or(LayoutError::MinWidthNotCalculated { measure: self.n })?;
        let width = self.mei_width.unwrap_or(parts.total() + additional);
        Ok(SizedMeasure { measure: self, parts, width })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// SizedMeasure
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct SizedMeasure {
    measure: Measure,
    parts: MinWidthParts,
    width: f64,
}

impl SizedMeasure {
    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn n(&self) -> u32 {
        self.measure.n
    }

    /// Set the y of every present stave.
    pub fn place_staves(&mut self, ys: &BTreeMap<u32, f64>) {
        for (n, stave) in self.measure.staves.iter_mut() {
            if let Some(&y) = ys.get(n) {
                stave.set_y(y);
            }
        }
    }

    /// Position every stave at `x`, label the staves found in `labels` and
    /// justify the voices.
    ///
    /// Returns the slur start x: `slur_start_x` when given, otherwise the
    /// first stave's tie start, so the next measure can continue curves.
    pub fn format(
        self,
        x: f64,
        labels: &BTreeMap<u32, String>,
        slur_start_x: Option<f64>,
    ) -> Result<(FormattedMeasure, f64), LayoutError> {
        let SizedMeasure { mut measure, parts, width } = self;

        for (n, stave) in measure.staves.iter_mut() {
            stave.set_x(x);
            if let Some(label) = labels.get(n) {
                stave.set_label(label.clone());
            }
            stave.set_note_start_x(x + parts.max_note_start_x);
            stave.set_width(width);
            stave.shrink_end(parts.max_end_modifier_w);
        }

        let first = measure.first_defined_staff()?;
        let resolved = slur_start_x.unwrap_or_else(|| first.tie_start_x());
        for stave in measure.staves.values_mut() {
            stave.set_slur_start_x(resolved);
        }

        let reference = measure.first_defined_staff()?.clone();
        measure.voices.format(&reference)?;
        measure.voices.bind_staves(&measure.staves);

        Ok((FormattedMeasure { measure, parts, x, width }, resolved))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// FormattedMeasure
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct FormattedMeasure {
    measure: Measure,
    parts: MinWidthParts,
    x: f64,
    width: f64,
}

impl FormattedMeasure {
    pub fn n(&self) -> u32 {
        self.measure.n
    }

    pub fn index(&self) -> usize {
        self.measure.index
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn min_width(&self) -> f64 {
        self.parts.total()
    }

    pub fn min_width_parts(&self) -> MinWidthParts {
        self.parts
    }

    pub fn staves(&self) -> &BTreeMap<u32, Stave> {
        &self.measure.staves
    }

    pub fn stave(&self, n: u32) -> Option<&Stave> {
        self.measure.staves.get(&n)
    }

    pub fn voices(&self) -> &VoiceStack {
        &self.measure.voices
    }

    pub fn voices_mut(&mut self) -> &mut VoiceStack {
        &mut self.measure.voices
    }

    /// Hand the collected annotations over to the resolution phase.
    pub fn take_collections(&mut self) -> MeasureCollections {
        std::mem::take(&mut self.measure.collections)
    }

    pub fn draw(&self, svg: &mut SvgBuilder, fonts: &StaveFonts) -> Result<(), LayoutError> {
        svg.open_group("measure", self.measure.id.as_deref());
        for stave in self.measure.staves.values() {
            stave.draw(svg, fonts);
        }
        for connector in &self.measure.start_connectors {
            if let (Some(top), Some(bottom)) = (
                self.measure.staves.get(&connector.top),
                self.measure.staves.get(&connector.bottom),
            ) {
                connector.draw(svg, top, bottom, false);
            }
        }
        for connector in &self.measure.inline_connectors {
            if let (Some(top), Some(bottom)) = (
                self.measure.staves.get(&connector.top),
                self.measure.staves.get(&connector.bottom),
            ) {
                connector.draw(svg, top, bottom, true);
            }
        }
        self.measure.voices.draw(svg, &self.measure.staves)?;
        svg.close_group();
        Ok(())
    }
}

pub(super) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ControlKind, Event, EventKind, Pitch};
    use crate::renderer::note::NoteEvent;
    use crate::renderer::stave::{BarlineType, Clef};

    fn voice(count: usize) -> Vec<NoteEvent> {
        let clef = Clef::default();
        (0..count)
            .map(|i| {
                let event = Event {
                    id: format!("n{}", i),
                    kind: EventKind::Note(Pitch { pname: "e".into(), oct: 4, accid: None }),
                    dur: Some(4),
                    dots: 0,
                    tuplet: None,
                    grace: false,
                    stem_dir: None,
                    syllables: Vec::new(),
                };
                NoteEvent::from_event(&event, i as f64, 4, &clef, 5)
            })
            .collect()
    }

    fn measure(width: Option<f64>) -> Measure {
        let mut m = Measure::new(1, 0, width, VoiceStack::new(13.0));
        m.add_stave(Stave::new(1, 5, Clef::default()));
        m.voices_mut().add_voice(voice(3), 1);
        m
    }

    #[test]
    fn min_width_is_idempotent() {
        let mut m = measure(None);
        let first = m.calculate_min_width().unwrap();
        let second = m.calculate_min_width().unwrap();
        assert_eq!(first, second);
        assert_eq!(m.min_width(), Some(first));
    }

    #[test]
    fn min_width_grows_with_start_modifiers() {
        let mut plain = measure(None);
        let mut with_clef = measure(None);
        let mut stave = Stave::new(1, 5, Clef::default());
        stave.add_clef();
        with_clef.add_stave(stave);
        assert!(with_clef.calculate_min_width().unwrap() > plain.calculate_min_width().unwrap());
    }

    #[test]
    fn min_width_is_monotonic_in_each_term() {
        let base = MinWidthParts {
            max_note_start_x: 20.0,
            max_end_modifier_w: 6.0,
            min_voices_w: 90.0,
            repeat_padding: 0.0,
        };
        let bumps = [
            MinWidthParts { max_note_start_x: 30.0, ..base },
            MinWidthParts { max_end_modifier_w: 10.0, ..base },
            MinWidthParts { min_voices_w: 95.0, ..base },
            MinWidthParts { repeat_padding: REPEAT_PADDING, ..base },
        ];
        for bumped in bumps {
            assert!(bumped.total() >= base.total());
        }
    }

    #[test]
    fn repeat_padding_needs_modifiers_after_the_barline() {
        let mut alone = measure(None);
        let mut stave = Stave::new(1, 5, Clef::default());
        stave.set_begin_barline(BarlineType::RepeatBegin);
        alone.add_stave(stave.clone());
        alone.calculate_min_width().unwrap();
        assert_eq!(alone.min_width_parts().unwrap().repeat_padding, 0.0);

        let mut crowded = measure(None);
        stave.add_clef();
        crowded.add_stave(stave);
        crowded.calculate_min_width().unwrap();
        assert_eq!(crowded.min_width_parts().unwrap().repeat_padding, REPEAT_PADDING);
    }

    #[test]
    fn explicit_width_wins_over_additional_width() {
        let mut m = measure(Some(250.0));
        m.calculate_min_width().unwrap();
        let sized = m.set_final_width(1000.0).unwrap();
        assert_eq!(sized.width(), 250.0);

        let mut flexible = measure(None);
        let min = flexible.calculate_min_width().unwrap();
        assert_eq!(flexible.set_final_width(15.0).unwrap().width(), min + 15.0);
    }

    #[test]
    fn final_width_requires_min_width() {
        let err = measure(None).set_final_width(0.0).unwrap_err();
        assert_eq!(err, LayoutError::MinWidthNotCalculated { measure: 1 });
    }

    #[test]
    fn measure_without_staves_fails() {
        let mut m = Measure::new(7, 0, None, VoiceStack::new(13.0));
        assert_eq!(m.calculate_min_width(), Err(LayoutError::NoStaffFound { measure: 7 }));
    }

    #[test]
    fn format_positions_staves_and_returns_slur_start() {
        let mut m = measure(None);
        let min = m.calculate_min_width().unwrap();
        let sized = m.set_final_width(40.0).unwrap();
        let mut labels = BTreeMap::new();
        labels.insert(1, "Vln.".to_string());

        let (formatted, slur_x) = sized.format(100.0, &labels, None).unwrap();
        let stave = formatted.stave(1).unwrap();
        let parts = formatted.min_width_parts();
        assert_eq!(stave.x(), 100.0);
        assert_eq!(stave.width(), min + 40.0);
        assert_eq!(stave.start_x(), 100.0 + parts.max_note_start_x);
        assert_eq!(stave.end_x(), 100.0 + min + 40.0 - parts.max_end_modifier_w);
        assert_eq!(stave.label(), Some("Vln."));
        assert_eq!(slur_x, stave.tie_start_x());
        assert!(formatted.voices().is_formatted());

        let mut next = measure(None);
        next.calculate_min_width().unwrap();
        let (_, carried) = next
            .set_final_width(0.0)
            .unwrap()
            .format(300.0, &BTreeMap::new(), Some(slur_x))
            .unwrap();
        assert_eq!(carried, slur_x);
    }

    #[test]
    fn tempo_for_missing_staff_is_skipped() {
        let mut m = measure(None);
        let tempo = ControlEvent {
            kind: ControlKind::Tempo,
            attrs: [("staff".to_string(), "3".to_string())].into_iter().collect(),
            text: "Allegro".into(),
            source: "<tempo staff=\"3\">".into(),
        };
        let ok = ControlEvent { attrs: Default::default(), ..tempo.clone() };
        m.add_tempo_to_staves(&[&tempo, &ok]);
        assert_eq!(m.first_defined_staff().unwrap().decorations().len(), 1);
    }
}
