//! Measure construction — turns a model measure into a renderer
//! [`Measure`]: staves with the start modifiers the staff infos ask for,
//! one voice per layer, above-staff decorations, connectors and the
//! pointer/link collections of the measure.

use log::debug;

use crate::error::LayoutError;
use crate::model::{self, ControlKind, EventKind, Score};
use crate::options::LayoutOptions;
use crate::staff_info::StaffInfos;
use super::links::{LinkCollection, LinkKind};
use super::measure::Measure;
use super::note::NoteEvent;
use super::pointers::{PointerCollection, PointerKind};
use super::stave::{BarlineType, Clef, ConnectorKind, Stave, StaveConnector};
use super::voices::VoiceStack;

pub(super) struct MeasureBuilder<'a> {
    score: &'a Score,
    options: &'a LayoutOptions,
}

impl<'a> MeasureBuilder<'a> {
    pub(super) fn new(score: &'a Score, options: &'a LayoutOptions) -> Self {
        Self { score, options }
    }

    /// Build measure `index` with the staff definitions in `infos`.
    /// A system start always shows clef and key.
    pub(super) fn build(
        &self,
        index: usize,
        infos: &StaffInfos,
        system_start: bool,
    ) -> Result<Measure, LayoutError> {
        let source = &self.score.measures[index];
        let is_last = index + 1 == self.score.measures.len();
        let mut measure = Measure::new(
            source.n,
            index,
            source.width,
            VoiceStack::new(self.options.lyrics_font.size),
        );
        measure.id = source.id.clone();

        for staff in &source.staves {
            let info = infos
                .get(staff.n)
                .ok_or(LayoutError::MissingStaffDefinition { staff: staff.n })?;
            let def = info
                .staff_def()
                .ok_or(LayoutError::MissingStaffDefinition { staff: staff.n })?;
            let clef = Clef::from_def(def);
            let line_count = def.line_count();

            let mut stave = Stave::new(staff.n, line_count, clef.clone());
            if let Some(barline) = BarlineType::from_mei(source.left.as_deref()) {
                stave.set_begin_barline(barline);
            }
            match BarlineType::from_mei(source.right.as_deref()) {
                Some(barline) => stave.set_end_barline(barline),
                None if is_last => stave.set_end_barline(BarlineType::End),
                None => {}
            }

            let render_with = info.render_with();
            if render_with.clef || system_start {
                stave.add_clef();
            }
            if render_with.keysig || system_start {
                stave.add_key_signature(def.key_fifths());
            }
            let meter = def.meter().valid();
            if render_with.timesig {
                if let Some((count, unit)) = meter {
                    stave.add_time_signature(count, unit);
                }
            }
            measure.add_stave(stave);

            let (count, unit) = meter.unwrap_or((4, 4));
            for layer in &staff.layers {
                let notes = layer_notes(layer, count, unit, &clef, line_count);
                measure.voices_mut().add_voice(notes, staff.n);
            }
        }

        measure.add_tempo_to_staves(&source.controls_of(ControlKind::Tempo));
        measure.add_rehearsal_marks(&source.controls_of(ControlKind::Reh));
        measure.set_connectors(self.start_connectors(system_start), self.inline_connectors());
        Ok(measure)
    }

    /// Resolve the pointer and link references of measure `index` and hand
    /// the collections to `measure`.
    pub(super) fn attach_collections(
        &self,
        measure: &mut Measure,
        index: usize,
        infos: &StaffInfos,
    ) -> Result<(), LayoutError> {
        let source = &self.score.measures[index];
        let collections = measure.collections_mut();

        for kind in PointerKind::ALL {
            let elements: Vec<_> = source
                .controls
                .iter()
                .filter(|c| kind.control_kinds().contains(&c.kind))
                .collect();
            if elements.is_empty() {
                continue;
            }
            let mut collection = PointerCollection::new(kind);
            collection.create_infos(&elements, source, infos)?;
            collections.pointers.push(collection);
        }

        for kind in LinkKind::ALL {
            let elements = source.controls_of(kind.control_kind());
            if elements.is_empty() {
                continue;
            }
            let mut collection = LinkCollection::new(kind);
            collection.create_infos(&elements, &self.score.measures, index, infos)?;
            collections.links.push(collection);
        }
        debug!(
            "measure {}: {} pointer and {} link collections",
            source.n,
            collections.pointers.len(),
            collections.links.len()
        );
        Ok(())
    }

    fn start_connectors(&self, system_start: bool) -> Vec<StaveConnector> {
        if !system_start {
            return Vec::new();
        }
        let mut connectors = Vec::new();
        let staves: Vec<u32> = self.score.staff_defs.iter().map(|d| d.n).collect();
        if let (Some(&top), Some(&bottom)) = (staves.first(), staves.last()) {
            if top != bottom {
                connectors.push(StaveConnector { kind: ConnectorKind::Line, top, bottom });
            }
        }
        for group in &self.score.staff_groups {
            let (Some(&top), Some(&bottom)) = (group.staves.first(), group.staves.last()) else {
                continue;
            };
            if let Some(kind) = StaveConnector::kind_for_symbol(group.symbol.as_deref()) {
                connectors.push(StaveConnector { kind, top, bottom });
            }
        }
        connectors
    }

    fn inline_connectors(&self) -> Vec<StaveConnector> {
        self.score
            .staff_groups
            .iter()
            .filter(|g| g.barthru && g.staves.len() > 1)
            .filter_map(|g| {
                Some(StaveConnector {
                    kind: ConnectorKind::Barline,
                    top: *g.staves.first()?,
                    bottom: *g.staves.last()?,
                })
            })
            .collect()
    }
}

/// Drawable events of one layer with their onsets. Grace notes share the
/// onset of the event they precede; a whole-measure rest or space without
/// a duration lasts the full meter.
fn layer_notes(layer: &model::Layer, count: u32, unit: u32, clef: &Clef, line_count: u32) -> Vec<NoteEvent> {
    let mut onset = 0.0;
    let mut notes = Vec::with_capacity(layer.events.len());
    for event in &layer.events {
        let mut note = NoteEvent::from_event(event, onset, unit, clef, line_count);
        if matches!(event.kind, EventKind::MeasureRest | EventKind::Space) && event.dur.is_none() {
            note.beats = count as f64;
        }
        if event.is_timed() {
            onset += note.beats;
        }
        notes.push(note);
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Layer, Measure as ModelMeasure, Pitch, Staff, StaffDef, StaffGroup};
    use crate::renderer::stave::ModifierKind;

    fn note(id: &str, dur: Option<u32>, grace: bool, kind: EventKind) -> Event {
        Event { id: id.into(), kind, dur, dots: 0, tuplet: None, grace, stem_dir: None, syllables: Vec::new() }
    }

    fn pitch() -> EventKind {
        EventKind::Note(Pitch { pname: "c".into(), oct: 5, accid: None })
    }

    fn score() -> Score {
        let def = |n| StaffDef {
            clef_shape: Some("G".into()),
            clef_line: Some(2),
            key_pname: Some("d".into()),
            meter_count: Some(3),
            meter_unit: Some(4),
            ..StaffDef::new(n)
        };
        let events = vec![
            note("g", Some(8), true, pitch()),
            note("a", Some(4), false, pitch()),
            note("b", Some(2), false, pitch()),
        ];
        let rest = vec![note("r", None, false, EventKind::MeasureRest)];
        let measure = ModelMeasure {
            n: 1,
            staves: vec![
                Staff { n: 1, layers: vec![Layer { n: Some(1), events }] },
                Staff { n: 2, layers: vec![Layer { n: Some(1), events: rest }] },
            ],
            ..Default::default()
        };
        Score {
            staff_defs: vec![def(1), def(2)],
            staff_groups: vec![StaffGroup { symbol: Some("brace".into()), barthru: true, staves: vec![1, 2] }],
            measures: vec![measure.clone(), ModelMeasure { n: 2, ..measure }],
            ..Default::default()
        }
    }

    #[test]
    fn staves_show_modifiers_the_infos_ask_for() {
        let score = score();
        let options = LayoutOptions::default();
        let builder = MeasureBuilder::new(&score, &options);
        let mut infos = StaffInfos::from_score_defs(&score.staff_defs);

        let first = builder.build(0, &infos, true).unwrap();
        let kinds = |m: &Measure| m.staves()[&1].modifiers().len();
        // begin + end barline, clef, two-sharp key, time
        assert_eq!(kinds(&first), 5);

        infos.mark_rendered_all();
        let inner = builder.build(1, &infos, false).unwrap();
        assert_eq!(kinds(&inner), 2);
        assert!(matches!(
            inner.staves()[&1].modifiers()[1].kind,
            ModifierKind::Barline(BarlineType::End)
        ));

        let restarted = builder.build(1, &infos, true).unwrap();
        assert_eq!(kinds(&restarted), 4);
    }

    #[test]
    fn onsets_skip_grace_notes_and_measure_rests_fill_the_meter() {
        let score = score();
        let options = LayoutOptions::default();
        let infos = StaffInfos::from_score_defs(&score.staff_defs);
        let measure = MeasureBuilder::new(&score, &options).build(0, &infos, true).unwrap();

        let upper = &measure.voices().voices()[0].notes;
        let onsets: Vec<f64> = upper.iter().map(|n| n.onset).collect();
        assert_eq!(onsets, vec![0.0, 0.0, 1.0]);
        let rest = &measure.voices().voices()[1].notes[0];
        assert_eq!(rest.beats, 3.0);
    }

    #[test]
    fn unknown_staff_is_a_structural_error() {
        let mut score = score();
        score.staff_defs.truncate(1);
        let options = LayoutOptions::default();
        let infos = StaffInfos::from_score_defs(&score.staff_defs);
        let err = MeasureBuilder::new(&score, &options).build(0, &infos, true).unwrap_err();
        assert_eq!(err, LayoutError::MissingStaffDefinition { staff: 2 });
    }
}
