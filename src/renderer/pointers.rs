//! Pointer collections — annotations that point at a single event.
//!
//! Dynamics, directives, fermatas, ornaments and arpeggios all share one
//! resolution contract: the target is found through `@startid` or
//! `@tstamp` while the measure is built, and the annotation is attached
//! once every event of the score has been formatted. The kinds differ only
//! in their default placement and in the attach routine picked from
//! [`attach_strategy`].

use log::warn;
use serde::Serialize;

use crate::error::LayoutError;
use crate::model::{self, Attributes, ControlEvent, ControlKind};
use crate::options::FontSpec;
use crate::resolver;
use crate::staff_info::StaffInfos;
use super::constants::*;
use super::layout::{EventLookup, System};
use super::measure::normalize_whitespace;
use super::note::{
    Articulation, NoteEvent, Ornament, OrnamentKind, Placement, StrokeKind, TextAnnotation,
};

const FERMATA_ABOVE: &str = "\u{1D110}";
const FERMATA_BELOW: &str = "\u{1D111}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PointerKind {
    Dynamic,
    Directive,
    Fermata,
    Ornament,
    Arpeggio,
}

impl PointerKind {
    /// Every pointer kind, in the order collections are built for a measure.
    pub const ALL: [PointerKind; 5] = [
        PointerKind::Directive,
        PointerKind::Dynamic,
        PointerKind::Fermata,
        PointerKind::Ornament,
        PointerKind::Arpeggio,
    ];

    /// Control event kinds gathered by a collection of this kind.
    pub fn control_kinds(self) -> &'static [ControlKind] {
        match self {
            PointerKind::Dynamic => &[ControlKind::Dynam],
            PointerKind::Directive => &[ControlKind::Dir],
            PointerKind::Fermata => &[ControlKind::Fermata],
            PointerKind::Ornament => &[ControlKind::Trill, ControlKind::Mordent, ControlKind::Turn],
            PointerKind::Arpeggio => &[ControlKind::Arpeg],
        }
    }

    /// Placement used when `@place` is absent.
    pub fn default_placement(self) -> Placement {
        match self {
            PointerKind::Dynamic | PointerKind::Fermata => Placement::Below,
            PointerKind::Ornament | PointerKind::Directive | PointerKind::Arpeggio => Placement::Above,
        }
    }
}

/// A resolved pointer: the source element and the id of its target event.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerModel {
    pub kind: ControlKind,
    /// Short serialized form of the source element
    pub source: String,
    pub attrs: Attributes,
    pub text: String,
    pub start_id: String,
}

impl PointerModel {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Outcome of realizing a collection against the formatted score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttachReport {
    /// Annotations attached to an event
    pub attached: usize,
    /// Warnings for the annotations that were dropped
    pub dropped: Vec<String>,
}

impl AttachReport {
    pub fn merge(&mut self, other: AttachReport) {
        self.attached += other.attached;
        self.dropped.extend(other.dropped);
    }

    pub(super) fn drop_unresolved(&mut self, source: &str, id: &str) {
        let message = unresolved_message(source, id);
        warn!("{}", message);
        self.dropped.push(message);
    }
}

pub(super) fn unresolved_message(source: &str, id: &str) -> String {
    format!(
        "{} could not be rendered because the reference \"{}\" could not be resolved.",
        source, id
    )
}

/// Fonts used by the text-bearing attach routines.
#[derive(Debug, Clone)]
pub struct AnnotationStyle {
    pub font: FontSpec,
}

type AttachFn = fn(&PointerModel, PointerKind, &AnnotationStyle, &mut NoteEvent);

fn attach_strategy(kind: PointerKind) -> AttachFn {
    match kind {
        PointerKind::Dynamic => attach_dynamic,
        PointerKind::Directive => attach_directive,
        PointerKind::Fermata => attach_fermata,
        PointerKind::Ornament => attach_ornament,
        PointerKind::Arpeggio => attach_arpeggio,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PointerCollection
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct PointerCollection {
    kind: PointerKind,
    models: Vec<PointerModel>,
}

impl PointerCollection {
    pub fn new(kind: PointerKind) -> Self {
        Self { kind, models: Vec::new() }
    }

    pub fn kind(&self) -> PointerKind {
        self.kind
    }

    pub fn models(&self) -> &[PointerModel] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn add_model(&mut self, model: PointerModel) {
        self.models.push(model);
    }

    /// Resolve the target of every element and store a model for it.
    ///
    /// Elements without `@startid`/`@tstamp`, or whose timestamp cannot be
    /// matched, are skipped with a warning. Structural errors (missing
    /// layer, staff definition or meter) abort the measure.
    pub fn create_infos(
        &mut self,
        elements: &[&ControlEvent],
        measure: &model::Measure,
        infos: &StaffInfos,
    ) -> Result<usize, LayoutError> {
        let before = self.models.len();
        for element in elements {
            let start_id = match resolver::resolve_start(element, measure, infos) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    warn!(
                        "{} could not be processed: @startid or @tstamp expected. Skipping element.",
                        element.source
                    );
                    continue;
                }
                Err(e) if e.is_recoverable() => {
                    warn!("{} could not be processed: {}. Skipping element.", element.source, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.add_model(PointerModel {
                kind: element.kind,
                source: element.source.clone(),
                attrs: element.attrs.clone(),
                text: element.text.clone(),
                start_id,
            });
        }
        Ok(self.models.len() - before)
    }

    /// Attach every model to its target event. Unresolvable targets are
    /// reported and skipped; the remaining models are still attached.
    pub fn create_vex_from_infos(
        &self,
        lookup: &EventLookup,
        systems: &mut [System],
        style: &AnnotationStyle,
    ) -> AttachReport {
        let attach = attach_strategy(self.kind);
        let mut report = AttachReport::default();
        for model in &self.models {
            match lookup.note_mut(&model.start_id, systems) {
                Some(note) => {
                    attach(model, self.kind, style, note);
                    report.attached += 1;
                }
                None => report.drop_unresolved(&model.source, &model.start_id),
            }
        }
        report
    }
}

// ── Attach routines ──

fn placement(model: &PointerModel, kind: PointerKind) -> Placement {
    Placement::from_place(model.attr("place"), kind.default_placement())
}

fn attach_dynamic(model: &PointerModel, kind: PointerKind, style: &AnnotationStyle, note: &mut NoteEvent) {
    let text = model.text.trim().to_string();
    let width = estimate_text_width(&text, style.font.size);
    note.add_annotation(TextAnnotation {
        text,
        placement: placement(model, kind),
        font: style.font.clone(),
        width,
    });
}

fn attach_directive(model: &PointerModel, kind: PointerKind, style: &AnnotationStyle, note: &mut NoteEvent) {
    // Directives never push notes apart
    note.add_annotation(TextAnnotation {
        text: normalize_whitespace(&model.text),
        placement: placement(model, kind),
        font: style.font.clone(),
        width: 0.0,
    });
}

fn attach_fermata(model: &PointerModel, kind: PointerKind, _: &AnnotationStyle, note: &mut NoteEvent) {
    let placement = placement(model, kind);
    let glyph = match placement {
        Placement::Above => FERMATA_ABOVE,
        Placement::Below => FERMATA_BELOW,
    };
    note.add_articulation(Articulation { glyph, placement });
}

fn attach_ornament(model: &PointerModel, kind: PointerKind, _: &AnnotationStyle, note: &mut NoteEvent) {
    // MEI: a lower mordent/turn is the plain sign, an upper one inverted
    let upper = model.attr("form") == Some("upper") || model.attr("form") == Some("inv");
    let ornament_kind = match model.kind {
        ControlKind::Mordent if upper => OrnamentKind::InvertedMordent,
        ControlKind::Mordent => OrnamentKind::Mordent,
        ControlKind::Turn if model.attr("form") == Some("lower") => OrnamentKind::InvertedTurn,
        ControlKind::Turn => OrnamentKind::Turn,
        _ => OrnamentKind::Trill,
    };
    note.add_ornament(Ornament {
        kind: ornament_kind,
        placement: placement(model, kind),
        accid_upper: model.attr("accidupper").map(String::from),
        accid_lower: model.attr("accidlower").map(String::from),
    });
}

fn attach_arpeggio(model: &PointerModel, _: PointerKind, _: &AnnotationStyle, note: &mut NoteEvent) {
    let stroke = match model.attr("order") {
        Some("up") => StrokeKind::ArpeggioUp,
        Some("down") => StrokeKind::ArpeggioDown,
        Some("nonarp") => StrokeKind::NonArpeggio,
        _ => StrokeKind::Arpeggio,
    };
    note.set_stroke(stroke);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind, Layer, Pitch, Staff, StaffDef};
    use crate::renderer::stave::Clef;

    fn control(kind: ControlKind, attrs: &[(&str, &str)], text: &str) -> ControlEvent {
        ControlEvent {
            kind,
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            text: text.into(),
            source: format!("<{:?}>", kind).to_lowercase(),
        }
    }

    fn measure() -> model::Measure {
        let events = ["a", "b", "c"]
            .iter()
            .map(|id| Event {
                id: id.to_string(),
                kind: EventKind::Note(Pitch { pname: "g".into(), oct: 4, accid: None }),
                dur: Some(4),
                dots: 0,
                tuplet: None,
                grace: false,
                stem_dir: None,
                syllables: Vec::new(),
            })
            .collect();
        model::Measure {
            n: 1,
            staves: vec![Staff { n: 1, layers: vec![Layer { n: Some(1), events }] }],
            ..Default::default()
        }
    }

    fn infos() -> StaffInfos {
        let def = StaffDef { meter_count: Some(3), meter_unit: Some(4), ..StaffDef::new(1) };
        StaffInfos::from_score_defs(&[def])
    }

    #[test]
    fn models_resolve_by_id_and_timestamp() {
        let by_id = control(ControlKind::Dynam, &[("startid", "#b")], "p");
        let by_tstamp = control(ControlKind::Dynam, &[("tstamp", "3")], "f");
        let mut collection = PointerCollection::new(PointerKind::Dynamic);
        let added = collection.create_infos(&[&by_id, &by_tstamp], &measure(), &infos()).unwrap();
        assert_eq!(added, 2);
        let ids: Vec<_> = collection.models().iter().map(|m| m.start_id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn elements_without_reference_are_skipped() {
        let bare = control(ControlKind::Dir, &[], "dolce");
        let bad = control(ControlKind::Dir, &[("tstamp", "x")], "cresc.");
        let good = control(ControlKind::Dir, &[("startid", "#a")], "rit.");
        let mut collection = PointerCollection::new(PointerKind::Directive);
        let added = collection.create_infos(&[&bare, &bad, &good], &measure(), &infos()).unwrap();
        assert_eq!(added, 1);
        assert_eq!(collection.models()[0].start_id, "a");
    }

    #[test]
    fn structural_errors_propagate() {
        let wrong_staff = control(ControlKind::Fermata, &[("tstamp", "1"), ("staff", "2")], "");
        let mut collection = PointerCollection::new(PointerKind::Fermata);
        let err = collection.create_infos(&[&wrong_staff], &measure(), &infos()).unwrap_err();
        assert_eq!(err, LayoutError::MissingLayer { measure: 1, staff: 2, layer: 1 });
    }

    #[test]
    fn attach_routines_follow_placement_tables() {
        let clef = Clef::default();
        let event = Event {
            id: "a".into(),
            kind: EventKind::Note(Pitch { pname: "g".into(), oct: 4, accid: None }),
            dur: Some(4),
            dots: 0,
            tuplet: None,
            grace: false,
            stem_dir: None,
            syllables: Vec::new(),
        };
        let mut note = NoteEvent::from_event(&event, 0.0, 4, &clef, 5);
        let style = AnnotationStyle { font: FontSpec::default() };
        let model = |kind: ControlKind, attrs: &[(&str, &str)], text: &str| {
            let c = control(kind, attrs, text);
            PointerModel { kind, source: c.source, attrs: c.attrs, text: c.text, start_id: "a".into() }
        };

        attach_dynamic(&model(ControlKind::Dynam, &[], " mf \n"), PointerKind::Dynamic, &style, &mut note);
        attach_directive(&model(ControlKind::Dir, &[], "poco\n   a poco"), PointerKind::Directive, &style, &mut note);
        attach_fermata(&model(ControlKind::Fermata, &[("place", "above")], ""), PointerKind::Fermata, &style, &mut note);
        attach_ornament(
            &model(ControlKind::Trill, &[("accidupper", "s")], ""),
            PointerKind::Ornament,
            &style,
            &mut note,
        );
        attach_arpeggio(&model(ControlKind::Arpeg, &[("order", "down")], ""), PointerKind::Arpeggio, &style, &mut note);

        let annotations = note.annotations();
        assert_eq!(annotations[0].text, "mf");
        assert_eq!(annotations[0].placement, Placement::Below);
        assert_eq!(annotations[1].text, "poco a poco");
        assert_eq!(annotations[1].placement, Placement::Above);
        assert_eq!(annotations[1].width, 0.0);
        assert_eq!(note.articulations()[0].glyph, FERMATA_ABOVE);
        assert_eq!(note.ornaments()[0].kind, OrnamentKind::Trill);
        assert_eq!(note.ornaments()[0].placement, Placement::Above);
        assert_eq!(note.ornaments()[0].accid_upper.as_deref(), Some("s"));
        assert_eq!(note.stroke(), Some(StrokeKind::ArpeggioDown));
        assert_eq!(note.modifier_count(), 5);
    }

    #[test]
    fn unresolved_message_names_source_and_reference() {
        assert_eq!(
            unresolved_message("<dynam startid=\"#x\">", "x"),
            "<dynam startid=\"#x\"> could not be rendered because the reference \"x\" could not be resolved."
        );
    }
}
