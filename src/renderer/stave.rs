//! Stave — one staff of one measure: staff lines, start/end modifiers,
//! decorations above the staff and the label to its left.
//!
//! Modifiers follow the usual engraving order: index 0 is the begin
//! barline, index 1 the end barline, then clef, key and time signature.

use serde::Serialize;

use crate::model::StaffDef;
use super::constants::*;
use super::svg_builder::SvgBuilder;

// ═══════════════════════════════════════════════════════════════════════
// Clef
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clef {
    /// "G", "F", "C", "perc"
    pub shape: String,
    /// Staff line of the clef, counted from the bottom
    pub line: u32,
    /// Octave displacement: -1 for an "8" below, +1 for an "8" above
    pub octave_shift: i32,
}

impl Default for Clef {
    fn default() -> Self {
        Self { shape: "G".into(), line: 2, octave_shift: 0 }
    }
}

impl Clef {
    pub fn from_def(def: &StaffDef) -> Self {
        let shape = def.clef_shape.clone().unwrap_or_else(|| "G".into());
        let default_line = match shape.as_str() {
            "F" => 4,
            "C" | "perc" => 3,
            _ => 2,
        };
        let octaves = match def.clef_dis {
            Some(15) => 2,
            Some(8) => 1,
            _ => 0,
        };
        let octave_shift = if def.clef_dis_place.as_deref() == Some("below") {
            -octaves
        } else {
            octaves
        };
        Self { shape, line: def.clef_line.unwrap_or(default_line), octave_shift }
    }

    /// Vertical offset of a pitch from the top staff line.
    pub fn pitch_y(&self, pname: &str, oct: i32, line_count: u32) -> f64 {
        let step_index = match pname {
            "c" => 0, "d" => 1, "e" => 2, "f" => 3,
            "g" => 4, "a" => 5, "b" => 6, _ => 0,
        };
        let note_position = (oct - self.octave_shift) * 7 + step_index;

        // Reference pitch sitting on the clef line
        let ref_position = match self.shape.as_str() {
            "F" => 3 * 7 + 3, // F3
            "C" => 4 * 7,     // C4
            _ => 4 * 7 + 4,   // G4
        };
        let ref_y = (line_count as f64 - self.line as f64) * STAFF_LINE_SPACING;

        let staff_steps = note_position - ref_position;
        ref_y - staff_steps as f64 * (STAFF_LINE_SPACING / 2.0)
    }

    fn symbol(&self) -> &'static str {
        match self.shape.as_str() {
            "F" => "\u{1D122}",
            "C" => "\u{1D121}",
            "perc" => "\u{1D125}",
            _ => "\u{1D11E}",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Modifiers
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BarlineType {
    None,
    Single,
    Double,
    End,
    RepeatBegin,
    RepeatEnd,
}

impl BarlineType {
    /// Map `measure@left` / `measure@right`.
    pub fn from_mei(rend: Option<&str>) -> Option<Self> {
        Some(match rend? {
            "rptstart" => BarlineType::RepeatBegin,
            "rptend" => BarlineType::RepeatEnd,
            "dbl" | "dbldashed" | "dbldotted" => BarlineType::Double,
            "end" => BarlineType::End,
            "invis" => BarlineType::None,
            _ => BarlineType::Single,
        })
    }

    fn width(self) -> f64 {
        match self {
            BarlineType::None => 0.0,
            BarlineType::Single => BARLINE_SINGLE_WIDTH,
            BarlineType::Double | BarlineType::End => BARLINE_DOUBLE_WIDTH,
            BarlineType::RepeatBegin | BarlineType::RepeatEnd => BARLINE_REPEAT_WIDTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ModifierKind {
    Barline(BarlineType),
    Clef(Clef),
    /// Sharps (positive) or flats (negative)
    KeySignature(i32),
    TimeSignature { count: u32, unit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModifierPosition {
    Begin,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaveModifier {
    pub kind: ModifierKind,
    pub position: ModifierPosition,
    pub width: f64,
}

impl StaveModifier {
    pub fn is_repeat_begin(&self) -> bool {
        self.kind == ModifierKind::Barline(BarlineType::RepeatBegin)
    }
}

/// Text drawn above the staff that takes no horizontal space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Decoration {
    Tempo(String),
    Section(String),
}

// ═══════════════════════════════════════════════════════════════════════
// Stave
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Stave {
    pub n: u32,
    x: f64,
    y: f64,
    width: f64,
    start_x: f64,
    end_x: f64,
    line_count: u32,
    clef: Clef,
    modifiers: Vec<StaveModifier>,
    decorations: Vec<Decoration>,
    label: Option<String>,
    slur_start_x: Option<f64>,
}

impl Stave {
    pub fn new(n: u32, line_count: u32, clef: Clef) -> Self {
        let begin = StaveModifier {
            kind: ModifierKind::Barline(BarlineType::None),
            position: ModifierPosition::Begin,
            width: 0.0,
        };
        let end = StaveModifier {
            kind: ModifierKind::Barline(BarlineType::Single),
            position: ModifierPosition::End,
            width: BarlineType::Single.width(),
        };
        Self {
            n,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            start_x: 0.0,
            end_x: 0.0,
            line_count,
            clef,
            modifiers: vec![begin, end],
            decorations: Vec::new(),
            label: None,
            slur_start_x: None,
        }
    }

    // ── Modifiers ──

    pub fn set_begin_barline(&mut self, barline: BarlineType) {
        self.modifiers[0].kind = ModifierKind::Barline(barline);
        self.modifiers[0].width = barline.width();
    }

    pub fn set_end_barline(&mut self, barline: BarlineType) {
        self.modifiers[1].kind = ModifierKind::Barline(barline);
        self.modifiers[1].width = barline.width();
    }

    pub fn add_clef(&mut self) {
        let clef = self.clef.clone();
        self.push_begin(ModifierKind::Clef(clef), CLEF_WIDTH);
    }

    /// Adds nothing for a key without accidentals.
    pub fn add_key_signature(&mut self, fifths: i32) {
        if fifths == 0 {
            return;
        }
        let per = if fifths > 0 { KEY_SIG_SHARP_SPACE } else { KEY_SIG_FLAT_SPACE };
        let width = fifths.unsigned_abs().min(7) as f64 * per;
        self.push_begin(ModifierKind::KeySignature(fifths), width);
    }

    pub fn add_time_signature(&mut self, count: u32, unit: u32) {
        self.push_begin(ModifierKind::TimeSignature { count, unit }, TIME_SIG_WIDTH);
    }

    fn push_begin(&mut self, kind: ModifierKind, width: f64) {
        self.modifiers.push(StaveModifier {
            kind,
            position: ModifierPosition::Begin,
            width: width + MODIFIER_PADDING,
        });
    }

    pub fn modifiers(&self) -> &[StaveModifier] {
        &self.modifiers
    }

    pub fn has_time_signature(&self) -> bool {
        self.modifiers
            .iter()
            .any(|m| matches!(m.kind, ModifierKind::TimeSignature { .. }))
    }

    /// Space between the stave's x and its first note.
    pub fn note_start_offset(&self) -> f64 {
        let begin: f64 = self
            .modifiers
            .iter()
            .filter(|m| m.position == ModifierPosition::Begin)
            .map(|m| m.width)
            .sum();
        STAVE_LEFT_PADDING + begin + STAVE_NOTE_PADDING
    }

    /// Space the end modifiers take before the stave's right edge.
    pub fn end_modifier_width(&self) -> f64 {
        let end: f64 = self
            .modifiers
            .iter()
            .filter(|m| m.position == ModifierPosition::End)
            .map(|m| m.width)
            .sum();
        end + STAVE_RIGHT_PADDING
    }

    // ── Geometry ──

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn start_x(&self) -> f64 {
        self.start_x
    }

    pub fn end_x(&self) -> f64 {
        self.end_x
    }

    pub fn clef(&self) -> &Clef {
        &self.clef
    }

    pub fn line_count(&self) -> u32 {
        self.line_count
    }

    /// Move the stave horizontally; note area and slur start follow.
    pub fn set_x(&mut self, x: f64) {
        let shift = x - self.x;
        self.x = x;
        self.start_x += shift;
        self.end_x += shift;
        if let Some(slur_x) = self.slur_start_x.as_mut() {
            *slur_x += shift;
        }
    }

    pub fn set_y(&mut self, y: f64) {
        self.y = y;
    }

    /// Set the width; the note area ends at the right edge until shrunk.
    pub fn set_width(&mut self, width: f64) {
        self.width = width;
        self.end_x = self.x + width;
    }

    pub fn set_note_start_x(&mut self, start_x: f64) {
        self.start_x = start_x;
    }

    /// Reserve `amount` at the right edge for end modifiers.
    pub fn shrink_end(&mut self, amount: f64) {
        self.end_x -= amount;
    }

    pub fn bottom_y(&self) -> f64 {
        self.y + self.line_count.saturating_sub(1) as f64 * STAFF_LINE_SPACING
    }

    pub fn tie_start_x(&self) -> f64 {
        self.start_x
    }

    pub fn tie_end_x(&self) -> f64 {
        self.end_x
    }

    pub fn set_slur_start_x(&mut self, x: f64) {
        self.slur_start_x = Some(x);
    }

    /// Where an open-ended curve starts on this stave.
    pub fn slur_start_x(&self) -> f64 {
        self.slur_start_x.unwrap_or(self.start_x)
    }

    pub fn slur_end_x(&self) -> f64 {
        self.x + self.width
    }

    // ── Text ──

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn add_decoration(&mut self, decoration: Decoration) {
        self.decorations.push(decoration);
    }

    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    // ── Drawing ──

    pub fn draw(&self, svg: &mut SvgBuilder, fonts: &StaveFonts) {
        for i in 0..self.line_count {
            let y = self.y + i as f64 * STAFF_LINE_SPACING;
            svg.line(self.x, y, self.x + self.width, y, STAFF_COLOR, STAFF_LINE_WIDTH);
        }

        let mut mx = self.x + STAVE_LEFT_PADDING;
        for modifier in self.modifiers.iter().filter(|m| m.position == ModifierPosition::Begin) {
            match &modifier.kind {
                ModifierKind::Barline(kind) => self.draw_barline(svg, self.x, *kind),
                ModifierKind::Clef(clef) => self.draw_clef(svg, mx, clef),
                ModifierKind::KeySignature(fifths) => self.draw_key_signature(svg, mx, *fifths),
                ModifierKind::TimeSignature { count, unit } => {
                    self.draw_time_signature(svg, mx, *count, *unit)
                }
            }
            mx += modifier.width;
        }
        if let ModifierKind::Barline(kind) = self.modifiers[1].kind {
            self.draw_barline(svg, self.x + self.width, kind);
        }

        if let Some(label) = &self.label {
            let mid = (self.y + self.bottom_y()) / 2.0 + fonts.label.size / 3.0;
            svg.styled_text(
                self.x - LABEL_GAP, mid, label, fonts.label.size, &fonts.label.weight,
                TEXT_COLOR, "end", &fonts.label.family, &fonts.label.style,
            );
        }

        let mut dy = self.y - ANNOTATION_GAP - STAFF_LINE_SPACING;
        for decoration in &self.decorations {
            let (text, boxed) = match decoration {
                Decoration::Tempo(t) => (t.as_str(), false),
                Decoration::Section(t) => (t.as_str(), true),
            };
            let font = &fonts.tempo;
            if boxed {
                let w = estimate_text_width(text, font.size) + 6.0;
                svg.rect(self.x, dy - font.size, w, font.size + 4.0, "none", TEXT_COLOR, 1.0);
                svg.styled_text(self.x + 3.0, dy, text, font.size, &font.weight,
                                TEXT_COLOR, "start", &font.family, &font.style);
            } else {
                svg.styled_text(self.start_x, dy, text, font.size, &font.weight,
                                TEXT_COLOR, "start", &font.family, &font.style);
            }
            dy -= ANNOTATION_LINE_HEIGHT + 4.0;
        }
    }

    fn draw_barline(&self, svg: &mut SvgBuilder, x: f64, kind: BarlineType) {
        let (top, bottom) = (self.y, self.bottom_y());
        match kind {
            BarlineType::None => {}
            BarlineType::Single => svg.line(x, top, x, bottom, BARLINE_COLOR, 1.0),
            BarlineType::Double => {
                svg.line(x - 3.0, top, x - 3.0, bottom, BARLINE_COLOR, 1.0);
                svg.line(x, top, x, bottom, BARLINE_COLOR, 1.0);
            }
            BarlineType::End => {
                svg.line(x - 5.0, top, x - 5.0, bottom, BARLINE_COLOR, 1.0);
                svg.rect(x - 3.0, top, 3.0, bottom - top, BARLINE_COLOR, "none", 0.0);
            }
            BarlineType::RepeatBegin => {
                svg.rect(x, top, 3.0, bottom - top, BARLINE_COLOR, "none", 0.0);
                svg.line(x + 5.0, top, x + 5.0, bottom, BARLINE_COLOR, 1.0);
                self.draw_repeat_dots(svg, x + 9.0);
            }
            BarlineType::RepeatEnd => {
                svg.line(x - 5.0, top, x - 5.0, bottom, BARLINE_COLOR, 1.0);
                svg.rect(x - 3.0, top, 3.0, bottom - top, BARLINE_COLOR, "none", 0.0);
                self.draw_repeat_dots(svg, x - 9.0);
            }
        }
    }

    fn draw_repeat_dots(&self, svg: &mut SvgBuilder, x: f64) {
        let mid = (self.y + self.bottom_y()) / 2.0;
        svg.circle(x, mid - STAFF_LINE_SPACING / 2.0, 1.8, BARLINE_COLOR);
        svg.circle(x, mid + STAFF_LINE_SPACING / 2.0, 1.8, BARLINE_COLOR);
    }

    fn draw_clef(&self, svg: &mut SvgBuilder, x: f64, clef: &Clef) {
        let line_y = self.y + (self.line_count as f64 - clef.line as f64) * STAFF_LINE_SPACING;
        svg.glyph(x + CLEF_WIDTH / 2.0, line_y + 10.0, clef.symbol(), 40.0);
        if clef.octave_shift != 0 {
            let (label, y) = if clef.octave_shift < 0 {
                (if clef.octave_shift == -2 { "15" } else { "8" }, self.bottom_y() + 16.0)
            } else {
                (if clef.octave_shift == 2 { "15" } else { "8" }, self.y - 12.0)
            };
            svg.text(x + CLEF_WIDTH / 2.0, y, label, 9.0, "normal", STAFF_COLOR, "middle");
        }
    }

    fn draw_key_signature(&self, svg: &mut SvgBuilder, x: f64, fifths: i32) {
        // Offsets (from the top line) of the treble positions; other clefs shift them
        let shift = match self.clef.shape.as_str() {
            "F" => 10.0,
            "C" => 5.0,
            _ => 0.0,
        };
        if fifths > 0 {
            let positions: &[f64] = &[0.0, 15.0, -5.0, 10.0, 25.0, 5.0, 20.0];
            for (i, p) in positions.iter().take(fifths.min(7) as usize).enumerate() {
                let sx = x + i as f64 * KEY_SIG_SHARP_SPACE + 4.0;
                svg.glyph(sx, self.y + p + shift + 5.0, "\u{266F}", 16.0);
            }
        } else {
            let positions: &[f64] = &[20.0, 5.0, 25.0, 10.0, 30.0, 15.0, 35.0];
            for (i, p) in positions.iter().take(fifths.unsigned_abs().min(7) as usize).enumerate() {
                let sx = x + i as f64 * KEY_SIG_FLAT_SPACE + 4.0;
                svg.glyph(sx, self.y + p + shift + 3.0, "\u{266D}", 16.0);
            }
        }
    }

    fn draw_time_signature(&self, svg: &mut SvgBuilder, x: f64, count: u32, unit: u32) {
        let cx = x + TIME_SIG_WIDTH / 2.0;
        let mid = (self.y + self.bottom_y()) / 2.0;
        svg.text(cx, mid - 2.0, &count.to_string(), 20.0, "bold", NOTE_COLOR, "middle");
        svg.text(cx, mid + 18.0, &unit.to_string(), 20.0, "bold", NOTE_COLOR, "middle");
    }
}

/// Fonts a stave draws its own text with.
#[derive(Debug, Clone)]
pub struct StaveFonts {
    pub label: crate::options::FontSpec,
    pub tempo: crate::options::FontSpec,
}

// ═══════════════════════════════════════════════════════════════════════
// Connectors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectorKind {
    Brace,
    Bracket,
    Line,
    /// Barline drawn through a group of staves
    Barline,
}

/// Connects the top and bottom stave of a staff group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaveConnector {
    pub kind: ConnectorKind,
    pub top: u32,
    pub bottom: u32,
}

impl StaveConnector {
    /// Connector symbol of a `staffGrp@symbol`.
    pub fn kind_for_symbol(symbol: Option<&str>) -> Option<ConnectorKind> {
        match symbol? {
            "brace" => Some(ConnectorKind::Brace),
            "bracket" | "bracketsq" => Some(ConnectorKind::Bracket),
            "line" => Some(ConnectorKind::Line),
            _ => None,
        }
    }

    pub fn draw(&self, svg: &mut SvgBuilder, top: &Stave, bottom: &Stave, at_end: bool) {
        let top_y = top.y();
        let bottom_y = bottom.bottom_y();
        let x = if at_end { top.x() + top.width() } else { top.x() };
        match self.kind {
            ConnectorKind::Brace => {
                let x = x - 4.0;
                let mid_y = (top_y + bottom_y) / 2.0;
                let h = bottom_y - top_y;
                let w = BRACE_WIDTH;
                let path = format!(
                    "M{:.1},{:.1} C{:.1},{:.1} {:.1},{:.1} {:.1},{:.1} \
                     C{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}",
                    x, top_y,
                    x, top_y + h * 0.28,
                    x - w, mid_y - h * 0.08,
                    x - w, mid_y,
                    x - w, mid_y + h * 0.08,
                    x, bottom_y - h * 0.28,
                    x, bottom_y,
                );
                svg.path(&path, "none", NOTE_COLOR, 2.5);
            }
            ConnectorKind::Bracket => {
                svg.rect(x - 8.0, top_y - 2.0, 4.0, bottom_y - top_y + 4.0, NOTE_COLOR, "none", 0.0);
            }
            ConnectorKind::Line | ConnectorKind::Barline => {
                svg.line(x, top_y, x, bottom_y, BARLINE_COLOR, 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clef_positions_follow_shape_and_line() {
        let treble = Clef::default();
        // G4 sits on the second line from the bottom
        assert_eq!(treble.pitch_y("g", 4, 5), 30.0);
        assert_eq!(treble.pitch_y("f", 5, 5), 0.0);

        let bass = Clef { shape: "F".into(), line: 4, octave_shift: 0 };
        assert_eq!(bass.pitch_y("a", 3, 5), 0.0);

        let tenor = Clef { shape: "G".into(), line: 2, octave_shift: -1 };
        assert_eq!(tenor.pitch_y("g", 3, 5), 30.0);
    }

    #[test]
    fn note_start_grows_with_start_modifiers() {
        let mut stave = Stave::new(1, 5, Clef::default());
        let bare = stave.note_start_offset();
        stave.add_clef();
        stave.add_key_signature(3);
        assert_eq!(
            stave.note_start_offset(),
            bare + CLEF_WIDTH + 3.0 * KEY_SIG_SHARP_SPACE + 2.0 * MODIFIER_PADDING
        );
        stave.add_key_signature(0);
        assert_eq!(stave.modifiers().len(), 4);
    }

    #[test]
    fn set_x_moves_note_area() {
        let mut stave = Stave::new(1, 5, Clef::default());
        stave.set_width(100.0);
        stave.set_note_start_x(30.0);
        stave.set_x(50.0);
        assert_eq!(stave.start_x(), 80.0);
        assert_eq!(stave.end_x(), 150.0);
        stave.shrink_end(6.0);
        assert_eq!(stave.tie_end_x(), 144.0);
        assert_eq!(stave.slur_end_x(), 150.0);
    }

    #[test]
    fn barline_renditions() {
        assert_eq!(BarlineType::from_mei(Some("rptstart")), Some(BarlineType::RepeatBegin));
        assert_eq!(BarlineType::from_mei(Some("dbl")), Some(BarlineType::Double));
        assert_eq!(BarlineType::from_mei(None), None);
    }
}
