//! Shared engraving constants (all in SVG user units).

// ── Staff dimensions ────────────────────────────────────────────────
pub(super) const STAFF_LINE_SPACING: f64 = 10.0; // distance between staff lines
pub(super) const STAFF_HEIGHT: f64 = 40.0; // 5 lines, 4 spaces
pub(super) const STAFF_LINE_WIDTH: f64 = 0.8;
pub(super) const BRACE_WIDTH: f64 = 10.0;
pub(super) const HEADER_HEIGHT: f64 = 50.0; // space for title + composer

// ── Stave padding ───────────────────────────────────────────────────
pub(super) const STAVE_LEFT_PADDING: f64 = 5.0; // before the first start modifier
pub(super) const STAVE_NOTE_PADDING: f64 = 10.0; // between start modifiers and the first note
pub(super) const STAVE_RIGHT_PADDING: f64 = 5.0;

// ── Modifier widths ─────────────────────────────────────────────────
pub(super) const BARLINE_SINGLE_WIDTH: f64 = 1.0;
pub(super) const BARLINE_DOUBLE_WIDTH: f64 = 5.0;
pub(super) const BARLINE_REPEAT_WIDTH: f64 = 14.0;
pub(super) const CLEF_WIDTH: f64 = 30.0;
pub(super) const KEY_SIG_SHARP_SPACE: f64 = 10.0;
pub(super) const KEY_SIG_FLAT_SPACE: f64 = 8.0;
pub(super) const TIME_SIG_WIDTH: f64 = 22.0;
pub(super) const MODIFIER_PADDING: f64 = 4.0;

/// Extra space after a repeat-begin barline followed by other modifiers.
pub(super) const REPEAT_PADDING: f64 = 20.0;

// ── Notes ───────────────────────────────────────────────────────────
pub(super) const NOTEHEAD_RX: f64 = 5.5; // notehead ellipse x-radius
pub(super) const NOTEHEAD_RY: f64 = 4.0; // notehead ellipse y-radius
pub(super) const NOTEHEAD_WIDTH: f64 = 12.0;
pub(super) const ACCIDENTAL_WIDTH: f64 = 9.0;
pub(super) const STEM_LENGTH: f64 = 35.0;
pub(super) const STEM_WIDTH: f64 = 1.2;
pub(super) const LEDGER_LINE_EXTEND: f64 = 5.0;
pub(super) const GRACE_NOTE_WIDTH: f64 = 8.0;
pub(super) const STROKE_WIDTH: f64 = 8.0; // arpeggio marker left of the chord

// ── Voice spacing ───────────────────────────────────────────────────
pub(super) const NOTE_PADDING: f64 = 8.0; // between adjacent tick contexts
pub(super) const MIN_BEAT_WIDTH: f64 = 30.0; // minimum width of one beat of the meter
pub(super) const EMPTY_VOICE_WIDTH: f64 = 20.0;

// ── Annotations ─────────────────────────────────────────────────────
pub(super) const ANNOTATION_GAP: f64 = 6.0; // between the staff and the first annotation line
pub(super) const ANNOTATION_LINE_HEIGHT: f64 = 16.0;
pub(super) const TEXT_CHAR_WIDTH_FACTOR: f64 = 0.55;
pub(super) const LABEL_GAP: f64 = 8.0;

// ── Curves ──────────────────────────────────────────────────────────
pub(super) const CURVE_Y_OFFSET: f64 = 8.0;
pub(super) const CURVE_HEIGHT_FACTOR: f64 = 0.15;
pub(super) const CURVE_MIN_HEIGHT: f64 = 6.0;
pub(super) const CURVE_MAX_HEIGHT: f64 = 20.0;
pub(super) const CURVE_THICKNESS: f64 = 2.0;
pub(super) const HAIRPIN_HEIGHT: f64 = 10.0;
pub(super) const HAIRPIN_Y_OFFSET: f64 = 30.0; // below/above the staff edge

// ── Lyrics ──────────────────────────────────────────────────────────
pub(super) const VERSE_PADDING: f64 = 4.0; // between stacked verses
pub(super) const LYRIC_LINE_EXTENT: f64 = 1.25; // line height as a multiple of the font size
pub(super) const LYRICS_BELOW_STAFF: f64 = 14.0; // from the lowest notehead to the first verse

// ── Colors ──────────────────────────────────────────────────────────
pub(super) const NOTE_COLOR: &str = "#1a1a1a";
pub(super) const STAFF_COLOR: &str = "#555555";
pub(super) const BARLINE_COLOR: &str = "#333333";
pub(super) const TEXT_COLOR: &str = "#1a1a1a";
pub(super) const LYRICS_COLOR: &str = "#333333";

/// Estimate the rendered width of a text string for a given font size.
pub(super) fn estimate_text_width(text: &str, font_size: f64) -> f64 {
    text.chars().count() as f64 * font_size * TEXT_CHAR_WIDTH_FACTOR
}
