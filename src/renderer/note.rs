//! Note-like events after layout: heads, stem, and the annotations that
//! pointer collections attach to them.

use serde::Serialize;

use crate::model::{Event, EventKind, Syllable};
use crate::options::FontSpec;
use super::constants::*;
use super::stave::Clef;
use super::svg_builder::SvgBuilder;

/// Location of a note inside a laid-out score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NoteAddress {
    pub system: usize,
    /// Index of the measure within its system
    pub measure: usize,
    pub voice: usize,
    pub note: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Placement {
    Above,
    Below,
}

impl Placement {
    /// `@place` of a control event, or `default` when absent or unknown.
    pub fn from_place(place: Option<&str>, default: Placement) -> Self {
        match place {
            Some("above") => Placement::Above,
            Some("below") => Placement::Below,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoteKind {
    Note,
    Chord,
    Rest,
    MeasureRest,
    Space,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteHead {
    /// Offset from the top staff line
    pub y: f64,
    pub accid: Option<String>,
}

/// Text attached above or below a note (dynamics, directives).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextAnnotation {
    pub text: String,
    pub placement: Placement,
    pub font: FontSpec,
    /// Horizontal space claimed from the formatter
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Articulation {
    /// Fermata glyph matching the placement
    pub glyph: &'static str,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrnamentKind {
    Trill,
    Mordent,
    InvertedMordent,
    Turn,
    InvertedTurn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ornament {
    pub kind: OrnamentKind,
    pub placement: Placement,
    pub accid_upper: Option<String>,
    pub accid_lower: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrokeKind {
    Arpeggio,
    ArpeggioUp,
    ArpeggioDown,
    NonArpeggio,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteEvent {
    pub id: String,
    pub kind: NoteKind,
    pub heads: Vec<NoteHead>,
    /// Onset in beats from the start of the measure
    pub onset: f64,
    /// Duration in beats (0 for grace notes)
    pub beats: f64,
    pub dur: Option<u32>,
    pub dots: u32,
    pub grace: bool,
    pub stem_up: bool,
    pub syllables: Vec<Syllable>,
    x: f64,
    stave_top: f64,
    stave_bottom: f64,
    annotations: Vec<TextAnnotation>,
    articulations: Vec<Articulation>,
    ornaments: Vec<Ornament>,
    stroke: Option<StrokeKind>,
}

impl NoteEvent {
    /// Build the drawable event for `event`, whose onset is `onset` beats
    /// into a measure with beat unit `unit`.
    pub fn from_event(event: &Event, onset: f64, unit: u32, clef: &Clef, line_count: u32) -> Self {
        let head = |p: &crate::model::Pitch| NoteHead {
            y: clef.pitch_y(&p.pname, p.oct, line_count),
            accid: p.accid.clone(),
        };
        let (kind, heads) = match &event.kind {
            EventKind::Note(p) => (NoteKind::Note, vec![head(p)]),
            EventKind::Chord(ps) => (NoteKind::Chord, ps.iter().map(head).collect()),
            EventKind::Unpitched { loc } => {
                let bottom = line_count.saturating_sub(1) as f64 * STAFF_LINE_SPACING;
                let loc = loc.unwrap_or(line_count.saturating_sub(1) as i32);
                let y = bottom - loc as f64 * STAFF_LINE_SPACING / 2.0;
                (NoteKind::Note, vec![NoteHead { y, accid: None }])
            }
            EventKind::Rest => (NoteKind::Rest, Vec::new()),
            EventKind::MeasureRest => (NoteKind::MeasureRest, Vec::new()),
            EventKind::Space => (NoteKind::Space, Vec::new()),
        };

        let middle = line_count.saturating_sub(1) as f64 * STAFF_LINE_SPACING / 2.0;
        let stem_up = match event.stem_dir.as_deref() {
            Some("up") => true,
            Some("down") => false,
            _ => {
                let avg = heads.iter().map(|h| h.y).sum::<f64>() / heads.len().max(1) as f64;
                heads.is_empty() || avg >= middle
            }
        };

        Self {
            id: event.id.clone(),
            kind,
            heads,
            onset,
            beats: if event.grace { 0.0 } else { event.beats(unit) },
            dur: event.dur,
            dots: event.dots,
            grace: event.grace,
            stem_up,
            syllables: event.syllables.clone(),
            x: 0.0,
            stave_top: 0.0,
            stave_bottom: 0.0,
            annotations: Vec::new(),
            articulations: Vec::new(),
            ornaments: Vec::new(),
            stroke: None,
        }
    }

    // ── Geometry ──

    /// Space needed left of the notehead (accidentals).
    pub fn left_width(&self) -> f64 {
        if self.heads.iter().any(|h| h.accid.is_some()) {
            ACCIDENTAL_WIDTH
        } else {
            0.0
        }
    }

    /// Width of the event body itself.
    pub fn body_width(&self) -> f64 {
        match self.kind {
            NoteKind::Space => 0.0,
            _ if self.grace => GRACE_NOTE_WIDTH,
            _ => NOTEHEAD_WIDTH + if self.dots > 0 { 6.0 } else { 0.0 },
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn set_x(&mut self, x: f64) {
        self.x = x;
    }

    /// Bind the event to its stave's vertical extent.
    pub fn set_stave(&mut self, top: f64, bottom: f64) {
        self.stave_top = top;
        self.stave_bottom = bottom;
    }

    pub fn stave_top(&self) -> f64 {
        self.stave_top
    }

    pub fn head_ys(&self) -> impl Iterator<Item = f64> + '_ {
        self.heads.iter().map(move |h| self.stave_top + h.y)
    }

    fn has_stem(&self) -> bool {
        matches!(self.kind, NoteKind::Note | NoteKind::Chord) && self.dur.map_or(false, |d| d >= 2)
    }

    /// Top and bottom y of the stem, if the event has one.
    pub fn stem_extents(&self) -> Option<(f64, f64)> {
        if !self.has_stem() {
            return None;
        }
        let top = self.head_ys().fold(f64::MAX, f64::min);
        let bottom = self.head_ys().fold(f64::MIN, f64::max);
        let length = if self.grace { STEM_LENGTH * 0.7 } else { STEM_LENGTH };
        Some(if self.stem_up { (top - length, bottom) } else { (top, bottom + length) })
    }

    /// Lowest point the event reaches, never above the staff bottom.
    pub fn lowest_y(&self) -> f64 {
        let heads = self.head_ys().map(|y| y + NOTEHEAD_RY).fold(self.stave_bottom, f64::max);
        match self.stem_extents() {
            Some((_, bottom)) => heads.max(bottom),
            None => heads,
        }
    }

    /// Highest point the event reaches, never below the staff top.
    pub fn highest_y(&self) -> f64 {
        let heads = self.head_ys().map(|y| y - NOTEHEAD_RY).fold(self.stave_top, f64::min);
        match self.stem_extents() {
            Some((top, _)) => heads.min(top),
            None => heads,
        }
    }

    /// Where a curve leaving this note starts.
    pub fn tie_right_x(&self) -> f64 {
        self.x + NOTEHEAD_RX
    }

    /// Where a curve arriving at this note ends.
    pub fn tie_left_x(&self) -> f64 {
        self.x - NOTEHEAD_RX
    }

    // ── Attached modifiers ──

    pub fn add_annotation(&mut self, annotation: TextAnnotation) {
        self.annotations.push(annotation);
    }

    pub fn add_articulation(&mut self, articulation: Articulation) {
        self.articulations.push(articulation);
    }

    pub fn add_ornament(&mut self, ornament: Ornament) {
        self.ornaments.push(ornament);
    }

    pub fn set_stroke(&mut self, stroke: StrokeKind) {
        self.stroke = Some(stroke);
    }

    pub fn annotations(&self) -> &[TextAnnotation] {
        &self.annotations
    }

    pub fn articulations(&self) -> &[Articulation] {
        &self.articulations
    }

    pub fn ornaments(&self) -> &[Ornament] {
        &self.ornaments
    }

    pub fn stroke(&self) -> Option<StrokeKind> {
        self.stroke
    }

    /// Number of modifiers attached by pointer collections.
    pub fn modifier_count(&self) -> usize {
        self.annotations.len()
            + self.articulations.len()
            + self.ornaments.len()
            + usize::from(self.stroke.is_some())
    }

    // ── Drawing ──

    pub fn draw(&self, svg: &mut SvgBuilder) {
        match self.kind {
            NoteKind::Space => {}
            NoteKind::Rest | NoteKind::MeasureRest => self.draw_rest(svg),
            NoteKind::Note | NoteKind::Chord => self.draw_heads(svg),
        }
        self.draw_modifiers(svg);
    }

    fn draw_heads(&self, svg: &mut SvgBuilder) {
        let filled = self.dur.map_or(true, |d| d >= 4);
        for (head, y) in self.heads.iter().zip(self.head_ys()) {
            self.draw_ledger_lines(svg, y);
            if self.grace {
                svg.small_notehead(self.x, y, filled);
            } else {
                svg.notehead(self.x, y, filled);
            }
            if let Some(accid) = head.accid.as_deref().and_then(accidental_symbol) {
                svg.glyph(self.x - NOTEHEAD_RX - 6.0, y + 5.0, accid, 16.0);
            }
            for d in 0..self.dots {
                svg.circle(self.x + NOTEHEAD_RX + 4.0 + d as f64 * 4.0, y - 2.0, 1.5, NOTE_COLOR);
            }
        }

        if let Some((top, bottom)) = self.stem_extents() {
            let (stem_x, tip) = if self.stem_up {
                (self.x + NOTEHEAD_RX - 0.6, top)
            } else {
                (self.x - NOTEHEAD_RX + 0.6, bottom)
            };
            svg.line(stem_x, top, stem_x, bottom, NOTE_COLOR, STEM_WIDTH);

            let flags = match self.dur {
                Some(8) => 1,
                Some(16) => 2,
                Some(32) => 3,
                Some(64) => 4,
                _ => 0,
            };
            let dir = if self.stem_up { 1.0 } else { -1.0 };
            for i in 0..flags {
                let fy = tip + dir * i as f64 * 7.0;
                let path = format!(
                    "M{:.1},{:.1} C{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}",
                    stem_x, fy,
                    stem_x + 2.0, fy + dir * 8.0,
                    stem_x + 10.0, fy + dir * 10.0,
                    stem_x + 7.0, fy + dir * 20.0,
                );
                svg.path(&path, "none", NOTE_COLOR, 1.5);
            }
        }
    }

    fn draw_ledger_lines(&self, svg: &mut SvgBuilder, y: f64) {
        let half = NOTEHEAD_RX + LEDGER_LINE_EXTEND;
        let mut ly = self.stave_top - STAFF_LINE_SPACING;
        while ly >= y - 1.0 {
            svg.line(self.x - half, ly, self.x + half, ly, STAFF_COLOR, STAFF_LINE_WIDTH);
            ly -= STAFF_LINE_SPACING;
        }
        let mut ly = self.stave_bottom + STAFF_LINE_SPACING;
        while ly <= y + 1.0 {
            svg.line(self.x - half, ly, self.x + half, ly, STAFF_COLOR, STAFF_LINE_WIDTH);
            ly += STAFF_LINE_SPACING;
        }
    }

    fn draw_rest(&self, svg: &mut SvgBuilder) {
        let mid = (self.stave_top + self.stave_bottom) / 2.0;
        match (self.kind, self.dur) {
            (NoteKind::MeasureRest, _) | (_, Some(1)) | (_, None) => {
                svg.rect(self.x - 7.0, mid - STAFF_LINE_SPACING, 14.0, 5.0, NOTE_COLOR, "none", 0.0);
            }
            (_, Some(2)) => {
                svg.rect(self.x - 7.0, mid - 5.0, 14.0, 5.0, NOTE_COLOR, "none", 0.0);
            }
            (_, Some(4)) => svg.glyph(self.x, mid + 8.0, "\u{1D13D}", 30.0),
            (_, Some(8)) => svg.glyph(self.x, mid + 8.0, "\u{1D13E}", 30.0),
            _ => svg.glyph(self.x, mid + 8.0, "\u{1D13F}", 30.0),
        }
    }

    fn draw_modifiers(&self, svg: &mut SvgBuilder) {
        let mut above = self.highest_y().min(self.stave_top) - ANNOTATION_GAP;
        let mut below = self.lowest_y().max(self.stave_bottom) + ANNOTATION_GAP;

        for art in &self.articulations {
            match art.placement {
                Placement::Above => {
                    svg.glyph(self.x, above, art.glyph, 24.0);
                    above -= ANNOTATION_LINE_HEIGHT;
                }
                Placement::Below => {
                    below += ANNOTATION_LINE_HEIGHT;
                    svg.glyph(self.x, below, art.glyph, 24.0);
                }
            }
        }

        for orn in &self.ornaments {
            let (symbol, text) = match orn.kind {
                OrnamentKind::Trill => ("", "tr"),
                OrnamentKind::Mordent => ("\u{1D18F}", ""),
                OrnamentKind::InvertedMordent => ("\u{1D18E}", ""),
                OrnamentKind::Turn => ("\u{1D197}", ""),
                OrnamentKind::InvertedTurn => ("\u{1D198}", ""),
            };
            let y = match orn.placement {
                Placement::Above => above,
                Placement::Below => below + ANNOTATION_LINE_HEIGHT,
            };
            if let Some(accid) = orn.accid_lower.as_deref().and_then(accidental_symbol) {
                svg.glyph(self.x, y, accid, 11.0);
            }
            let body_y = if orn.accid_lower.is_some() { y - 10.0 } else { y };
            if text.is_empty() {
                svg.glyph(self.x, body_y, symbol, 20.0);
            } else {
                svg.styled_text(self.x, body_y, text, 14.0, "bold", NOTE_COLOR, "middle",
                                "Times New Roman, serif", "italic");
            }
            if let Some(accid) = orn.accid_upper.as_deref().and_then(accidental_symbol) {
                svg.glyph(self.x, body_y - 14.0, accid, 11.0);
            }
            match orn.placement {
                Placement::Above => above = body_y - ANNOTATION_LINE_HEIGHT,
                Placement::Below => below = y,
            }
        }

        for annot in &self.annotations {
            let font = &annot.font;
            let y = match annot.placement {
                Placement::Above => {
                    let y = above;
                    above -= ANNOTATION_LINE_HEIGHT;
                    y
                }
                Placement::Below => {
                    below += font.size;
                    let y = below;
                    below += ANNOTATION_LINE_HEIGHT - font.size;
                    y
                }
            };
            svg.styled_text(self.x - NOTEHEAD_RX, y, &annot.text, font.size, &font.weight,
                            TEXT_COLOR, "start", &font.family, &font.style);
        }

        if let Some(stroke) = self.stroke {
            let top = self.head_ys().fold(f64::MAX, f64::min) - 6.0;
            let bottom = self.head_ys().fold(f64::MIN, f64::max) + 6.0;
            if top < bottom {
                let sx = self.x - NOTEHEAD_RX - STROKE_WIDTH - self.left_width();
                match stroke {
                    StrokeKind::NonArpeggio => {
                        svg.line(sx, top, sx - 3.0, top, NOTE_COLOR, 1.2);
                        svg.line(sx - 3.0, top, sx - 3.0, bottom, NOTE_COLOR, 1.2);
                        svg.line(sx - 3.0, bottom, sx, bottom, NOTE_COLOR, 1.2);
                    }
                    _ => {
                        let mut d = format!("M{:.1},{:.1}", sx, top);
                        let mut y = top;
                        let mut side = 1.0;
                        while y < bottom {
                            y += 4.0;
                            d.push_str(&format!(" L{:.1},{:.1}", sx + side * 2.0, y.min(bottom)));
                            side = -side;
                        }
                        svg.path(&d, "none", NOTE_COLOR, 1.2);
                        let arrow_y = match stroke {
                            StrokeKind::ArpeggioUp => Some((top, -1.0)),
                            StrokeKind::ArpeggioDown => Some((bottom, 1.0)),
                            _ => None,
                        };
                        if let Some((ay, dir)) = arrow_y {
                            let d = format!(
                                "M{:.1},{:.1} L{:.1},{:.1} L{:.1},{:.1} Z",
                                sx - 3.0, ay, sx + 3.0, ay, sx, ay + dir * 5.0
                            );
                            svg.path(&d, NOTE_COLOR, NOTE_COLOR, 0.5);
                        }
                    }
                }
            }
        }
    }
}

fn accidental_symbol(accid: &str) -> Option<&'static str> {
    Some(match accid {
        "s" => "\u{266F}",
        "f" => "\u{266D}",
        "n" => "\u{266E}",
        "ss" | "x" => "\u{1D12A}",
        "ff" => "\u{1D12B}",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pitch;

    fn event(pname: &str, oct: i32, dur: u32, stem: Option<&str>) -> Event {
        Event {
            id: "n1".into(),
            kind: EventKind::Note(Pitch { pname: pname.into(), oct, accid: None }),
            dur: Some(dur),
            dots: 0,
            tuplet: None,
            grace: false,
            stem_dir: stem.map(String::from),
            syllables: Vec::new(),
        }
    }

    #[test]
    fn stem_direction_follows_head_position() {
        let clef = Clef::default();
        let low = NoteEvent::from_event(&event("c", 4, 4, None), 0.0, 4, &clef, 5);
        assert!(low.stem_up);
        let high = NoteEvent::from_event(&event("a", 5, 4, None), 0.0, 4, &clef, 5);
        assert!(!high.stem_up);
        let forced = NoteEvent::from_event(&event("a", 5, 4, Some("up")), 0.0, 4, &clef, 5);
        assert!(forced.stem_up);
    }

    #[test]
    fn lowest_y_includes_down_stems() {
        let clef = Clef::default();
        let mut note = NoteEvent::from_event(&event("b", 5, 4, Some("down")), 0.0, 4, &clef, 5);
        note.set_stave(100.0, 140.0);
        // b5 sits above the first ledger line
        assert_eq!(note.heads[0].y, -15.0);
        assert_eq!(note.lowest_y(), 140.0_f64.max(85.0 + STEM_LENGTH));

        let whole = NoteEvent::from_event(&event("c", 4, 1, None), 0.0, 4, &clef, 5);
        assert!(whole.stem_extents().is_none());
    }

    #[test]
    fn unpitched_heads_follow_staff_position() {
        let clef = Clef::default();
        let kick = Event { kind: EventKind::Unpitched { loc: Some(1) }, ..event("c", 4, 4, None) };
        let kick = NoteEvent::from_event(&kick, 0.0, 4, &clef, 5);
        assert_eq!(kick.kind, NoteKind::Note);
        assert_eq!(kick.heads[0].y, 35.0);

        let snare = Event { kind: EventKind::Unpitched { loc: None }, ..event("c", 4, 4, None) };
        let snare = NoteEvent::from_event(&snare, 0.0, 4, &clef, 5);
        assert_eq!(snare.heads[0].y, 20.0);
    }
}
