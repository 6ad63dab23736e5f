//! Score renderer — lays out a parsed MEI score and draws it as SVG.
//!
//! Layout is computed from the musical content (staff definitions, event
//! durations, explicit measure widths) and every annotation is resolved
//! against the formatted events before drawing. The result is a
//! self-contained SVG string.

mod constants;
mod svg_builder;
mod builder;
pub mod stave;
pub mod note;
pub mod voices;
pub mod measure;
pub mod pointers;
pub mod links;
pub mod verses;
pub mod layout;

use crate::error::LayoutError;
use crate::model::Score;
use crate::options::LayoutOptions;

pub use layout::{layout_score, EventLookup, LayoutReport, MeasureReport, ScoreLayout, System, SystemReport};
pub use links::{HairpinForm, LinkCollection, LinkKind, LinkModel, Span, SpanEnd};
pub use measure::{FormattedMeasure, Measure, MeasureCollections, MinWidthParts, SizedMeasure};
pub use note::{Articulation, NoteAddress, NoteEvent, Ornament, OrnamentKind, Placement, StrokeKind, TextAnnotation};
pub use pointers::{AnnotationStyle, AttachReport, PointerCollection, PointerKind, PointerModel};
pub use stave::{BarlineType, Clef, Stave, StaveConnector};
pub use svg_builder::SvgBuilder;
pub use verses::{SyllableAnnotation, Verses};
pub use voices::{Voice, VoiceStack};

// ═══════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════

/// Lay out a parsed score and render it into a complete SVG string.
///
/// Annotations whose references cannot be resolved are left out with a
/// logged warning; structural problems (a measure without staves, a
/// timestamp on a staff without a meter) fail the whole render.
pub fn render_score_to_svg(score: &Score, options: &LayoutOptions) -> Result<String, LayoutError> {
    layout_score(score, options)?.draw()
}
