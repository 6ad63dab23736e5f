//! Link collections — annotations spanning two events (hairpins, slurs,
//! ties).
//!
//! Start and end are resolved while the measure is built: the start like
//! any pointer, the end through `@endid` or `@tstamp2`, which may reach
//! into a later measure. Once the score is formatted each model becomes
//! one [`Span`], or two when its endpoints fall into different systems.

use log::{debug, warn};
use serde::Serialize;

use crate::error::LayoutError;
use crate::model::{self, Attributes, ControlEvent, ControlKind};
use crate::resolver;
use crate::staff_info::StaffInfos;
use super::constants::*;
use super::layout::{EventLookup, System};
use super::measure::FormattedMeasure;
use super::note::{NoteAddress, NoteEvent, Placement};
use super::pointers::AttachReport;
use super::svg_builder::SvgBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkKind {
    Hairpin,
    Slur,
    Tie,
}

impl LinkKind {
    pub const ALL: [LinkKind; 3] = [LinkKind::Hairpin, LinkKind::Slur, LinkKind::Tie];

    pub fn control_kind(self) -> ControlKind {
        match self {
            LinkKind::Hairpin => ControlKind::Hairpin,
            LinkKind::Slur => ControlKind::Slur,
            LinkKind::Tie => ControlKind::Tie,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HairpinForm {
    Crescendo,
    Diminuendo,
}

impl HairpinForm {
    pub fn from_mei(form: &str) -> Option<Self> {
        match form {
            "cres" => Some(HairpinForm::Crescendo),
            "dim" => Some(HairpinForm::Diminuendo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkModel {
    pub kind: LinkKind,
    pub source: String,
    pub attrs: Attributes,
    pub start_id: String,
    pub end_id: String,
}

impl LinkModel {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// One end of a drawn span: a real event, or the edge of the system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SpanEnd {
    Note(NoteAddress),
    Open,
}

/// A span as drawn within a single system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub kind: LinkKind,
    pub first: SpanEnd,
    pub last: SpanEnd,
    /// `@place` / `@curvedir`; curves without one follow the stems
    pub placement: Option<Placement>,
    pub form: Option<HairpinForm>,
    pub source: String,
}

// ═══════════════════════════════════════════════════════════════════════
// LinkCollection
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct LinkCollection {
    kind: LinkKind,
    models: Vec<LinkModel>,
}

impl LinkCollection {
    pub fn new(kind: LinkKind) -> Self {
        Self { kind, models: Vec::new() }
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn models(&self) -> &[LinkModel] {
        &self.models
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn add_model(&mut self, model: LinkModel) {
        self.models.push(model);
    }

    /// Resolve both endpoints of every element found in `measures[index]`.
    pub fn create_infos(
        &mut self,
        elements: &[&ControlEvent],
        measures: &[model::Measure],
        index: usize,
        infos: &StaffInfos,
    ) -> Result<usize, LayoutError> {
        let Some(measure) = measures.get(index) else {
            return Ok(0);
        };
        let before = self.models.len();
        for element in elements {
            if self.kind == LinkKind::Hairpin && element.attr("form").is_none() {
                warn!("{} could not be processed: @form is mandatory in <hairpin>. Skipping element.", element.source);
                continue;
            }
            let start = recoverable(element, resolver::resolve_start(element, measure, infos))?;
            let end = recoverable(element, resolver::resolve_end(element, measures, index, infos))?;
            let (Some(start_id), Some(end_id)) = (start.flatten(), end.flatten()) else {
                warn!(
                    "{} could not be processed: @startid or @tstamp and @endid or @tstamp2 expected. Skipping element.",
                    element.source
                );
                continue;
            };
            self.add_model(LinkModel {
                kind: self.kind,
                source: element.source.clone(),
                attrs: element.attrs.clone(),
                start_id,
                end_id,
            });
        }
        Ok(self.models.len() - before)
    }

    /// Turn every model into spans attached to their systems.
    ///
    /// Endpoints in different systems give two truncated spans; a model
    /// with one unresolved endpoint is drawn open-ended; a model with none
    /// is dropped.
    pub fn create_vex_from_infos(&self, lookup: &EventLookup, systems: &mut [System]) -> AttachReport {
        let mut report = AttachReport::default();
        for model in &self.models {
            let first = lookup.get(&model.start_id);
            let last = lookup.get(&model.end_id);
            let halves = match (first, last) {
                (None, None) => {
                    report.drop_unresolved(&model.source, &model.start_id);
                    continue;
                }
                (Some(f), Some(l)) if f.system != l.system => {
                    vec![(f.system, SpanEnd::Note(f), SpanEnd::Open), (l.system, SpanEnd::Open, SpanEnd::Note(l))]
                }
                (Some(f), Some(l)) => vec![(f.system, SpanEnd::Note(f), SpanEnd::Note(l))],
                (Some(f), None) => {
                    debug!("{}: end \"{}\" not found, drawing open-ended", model.source, model.end_id);
                    vec![(f.system, SpanEnd::Note(f), SpanEnd::Open)]
                }
                (None, Some(l)) => {
                    debug!("{}: start \"{}\" not found, drawing open-ended", model.source, model.start_id);
                    vec![(l.system, SpanEnd::Open, SpanEnd::Note(l))]
                }
            };
            for (system, first, last) in halves {
                if let Some(system) = systems.get_mut(system) {
                    system.spans.push(self.span(model, first, last));
                    report.attached += 1;
                }
            }
        }
        report
    }

    fn span(&self, model: &LinkModel, first: SpanEnd, last: SpanEnd) -> Span {
        let placement = match self.kind {
            LinkKind::Hairpin => Some(Placement::from_place(model.attr("place"), Placement::Below)),
            LinkKind::Slur | LinkKind::Tie => match model.attr("curvedir") {
                Some("above") => Some(Placement::Above),
                Some("below") => Some(Placement::Below),
                _ => None,
            },
        };
        Span {
            kind: self.kind,
            first,
            last,
            placement,
            form: model.attr("form").and_then(HairpinForm::from_mei),
            source: model.source.clone(),
        }
    }
}

fn recoverable(
    element: &ControlEvent,
    result: Result<Option<String>, LayoutError>,
) -> Result<Option<Option<String>>, LayoutError> {
    match result {
        Ok(id) => Ok(Some(id)),
        Err(e) if e.is_recoverable() => {
            warn!("{} could not be processed: {}. Skipping element.", element.source, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Span drawing
// ═══════════════════════════════════════════════════════════════════════

struct Anchor<'a> {
    note: &'a NoteEvent,
    staff_n: u32,
    measure: &'a FormattedMeasure,
}

fn anchor<'a>(measures: &'a [FormattedMeasure], end: SpanEnd) -> Option<Anchor<'a>> {
    let SpanEnd::Note(addr) = end else {
        return None;
    };
    let measure = measures.get(addr.measure)?;
    let voice = measure.voices().voices().get(addr.voice)?;
    let note = voice.notes.get(addr.note)?;
    Some(Anchor { note, staff_n: voice.staff_n, measure })
}

impl Span {
    /// Draw the span against the measures of its system.
    pub fn draw(&self, svg: &mut SvgBuilder, measures: &[FormattedMeasure]) {
        let first = anchor(measures, self.first);
        let last = anchor(measures, self.last);
        let Some(reference) = first.as_ref().or(last.as_ref()) else {
            warn!("{} has no endpoint in its system", self.source);
            return;
        };
        let staff_n = reference.staff_n;
        let Some(stave) = reference.measure.stave(staff_n) else {
            return;
        };

        let first_x = match &first {
            Some(a) => a.note.tie_right_x(),
            None => stave.slur_start_x(),
        };
        let last_x = match &last {
            Some(a) => a.note.tie_left_x(),
            None => measures
                .last()
                .and_then(|m| m.stave(staff_n))
                .map_or(stave.slur_end_x(), |s| s.slur_end_x()),
        };

        match self.kind {
            LinkKind::Hairpin => {
                let placement = self.placement.unwrap_or(Placement::Below);
                let y = match placement {
                    Placement::Above => stave.y() - HAIRPIN_Y_OFFSET,
                    Placement::Below => stave.bottom_y() + HAIRPIN_Y_OFFSET,
                };
                draw_hairpin(svg, first_x, last_x, y, self.form.unwrap_or(HairpinForm::Crescendo));
            }
            LinkKind::Slur | LinkKind::Tie => {
                let placement = self.placement.unwrap_or(if reference.note.stem_up {
                    Placement::Below
                } else {
                    Placement::Above
                });
                let y_of = |a: &Option<Anchor>| a.as_ref().map(|a| curve_y(a.note, placement));
                let fallback = curve_y(reference.note, placement);
                let first_y = y_of(&first).unwrap_or(fallback);
                let last_y = y_of(&last).unwrap_or(fallback);
                draw_curve(svg, first_x, first_y, last_x, last_y, placement);
            }
        }
    }
}

fn curve_y(note: &NoteEvent, placement: Placement) -> f64 {
    let mid = note.stave_top() + STAFF_HEIGHT / 2.0;
    match placement {
        Placement::Above => note.head_ys().fold(mid, f64::min) - CURVE_Y_OFFSET,
        Placement::Below => note.head_ys().fold(mid, f64::max) + CURVE_Y_OFFSET,
    }
}

fn draw_hairpin(svg: &mut SvgBuilder, x1: f64, x2: f64, y: f64, form: HairpinForm) {
    let half = HAIRPIN_HEIGHT / 2.0;
    let (open_x, tip_x) = match form {
        HairpinForm::Crescendo => (x2, x1),
        HairpinForm::Diminuendo => (x1, x2),
    };
    svg.line(tip_x, y, open_x, y - half, NOTE_COLOR, 1.0);
    svg.line(tip_x, y, open_x, y + half, NOTE_COLOR, 1.0);
}

/// A filled curve: two cubic beziers of slightly different height.
fn draw_curve(svg: &mut SvgBuilder, x1: f64, y1: f64, x2: f64, y2: f64, placement: Placement) {
    let dir = match placement {
        Placement::Above => -1.0,
        Placement::Below => 1.0,
    };
    let span = x2 - x1;
    let height = (span.abs() * CURVE_HEIGHT_FACTOR).clamp(CURVE_MIN_HEIGHT, CURVE_MAX_HEIGHT);
    let cp = span / 4.0;
    let d = format!(
        "M{:.1},{:.1} C{:.1},{:.1} {:.1},{:.1} {:.1},{:.1} C{:.1},{:.1} {:.1},{:.1} {:.1},{:.1} Z",
        x1, y1,
        x1 + cp, y1 + dir * height,
        x2 - cp, y2 + dir * height,
        x2, y2,
        x2 - cp, y2 + dir * (height + CURVE_THICKNESS),
        x1 + cp, y1 + dir * (height + CURVE_THICKNESS),
        x1, y1,
    );
    svg.path(&d, NOTE_COLOR, NOTE_COLOR, 0.5);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind, Layer, Pitch, Staff, StaffDef};

    fn control(kind: ControlKind, attrs: &[(&str, &str)]) -> ControlEvent {
        ControlEvent {
            kind,
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            text: String::new(),
            source: "<hairpin>".into(),
        }
    }

    fn measure(n: u32, ids: &[&str]) -> model::Measure {
        let events = ids
            .iter()
            .map(|id| Event {
                id: id.to_string(),
                kind: EventKind::Note(Pitch { pname: "a".into(), oct: 4, accid: None }),
                dur: Some(4),
                dots: 0,
                tuplet: None,
                grace: false,
                stem_dir: None,
                syllables: Vec::new(),
            })
            .collect();
        model::Measure {
            n,
            staves: vec![Staff { n: 1, layers: vec![Layer { n: Some(1), events }] }],
            ..Default::default()
        }
    }

    fn infos() -> StaffInfos {
        let def = StaffDef { meter_count: Some(2), meter_unit: Some(4), ..StaffDef::new(1) };
        StaffInfos::from_score_defs(&[def])
    }

    #[test]
    fn endpoints_resolve_across_measures() {
        let measures = vec![measure(1, &["a", "b"]), measure(2, &["c", "d"])];
        let hairpin = control(
            ControlKind::Hairpin,
            &[("form", "cres"), ("tstamp", "2"), ("tstamp2", "1m+2")],
        );
        let slur = control(ControlKind::Slur, &[("startid", "#a"), ("endid", "#c")]);

        let mut hairpins = LinkCollection::new(LinkKind::Hairpin);
        assert_eq!(hairpins.create_infos(&[&hairpin], &measures, 0, &infos()).unwrap(), 1);
        assert_eq!(hairpins.models()[0].start_id, "b");
        assert_eq!(hairpins.models()[0].end_id, "d");

        let mut slurs = LinkCollection::new(LinkKind::Slur);
        slurs.create_infos(&[&slur], &measures, 0, &infos()).unwrap();
        assert_eq!((slurs.models()[0].start_id.as_str(), slurs.models()[0].end_id.as_str()), ("a", "c"));
    }

    #[test]
    fn hairpin_without_form_or_end_is_skipped() {
        let measures = vec![measure(1, &["a", "b"])];
        let no_form = control(ControlKind::Hairpin, &[("startid", "#a"), ("endid", "#b")]);
        let no_end = control(ControlKind::Hairpin, &[("form", "dim"), ("startid", "#a")]);
        let past_end = control(ControlKind::Hairpin, &[("form", "dim"), ("startid", "#a"), ("tstamp2", "3m+1")]);
        let mut hairpins = LinkCollection::new(LinkKind::Hairpin);
        let added = hairpins.create_infos(&[&no_form, &no_end, &past_end], &measures, 0, &infos()).unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn hairpin_forms() {
        assert_eq!(HairpinForm::from_mei("cres"), Some(HairpinForm::Crescendo));
        assert_eq!(HairpinForm::from_mei("dim"), Some(HairpinForm::Diminuendo));
        assert_eq!(HairpinForm::from_mei("wedge"), None);
    }
}
