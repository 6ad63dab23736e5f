//! meiscore — MEI parser, score layout and SVG rendering.
//!
//! Parses an MEI document, lays its measures out into systems, resolves
//! every dynamic, directive, ornament, fermata, arpeggio, hairpin, slur and
//! tie against the event it points at, stacks lyric verses, and draws the
//! result as SVG.
//!
//! # Example
//! ```no_run
//! use meiscore::{parse_file, render_score_to_svg, LayoutOptions};
//!
//! let score = parse_file("path/to/score.mei").unwrap();
//! println!("Title: {:?}", score.title);
//! println!("Measures: {}", score.measure_count());
//! let svg = render_score_to_svg(&score, &LayoutOptions::default()).unwrap();
//! ```

pub mod error;
pub mod model;
pub mod options;
pub mod parser;
pub mod renderer;
pub mod resolver;
pub mod staff_info;

use std::path::Path;

pub use error::{Error, LayoutError, ParseError};
pub use model::*;
pub use options::{FontSpec, LayoutOptions};
pub use parser::parse_mei;
pub use renderer::{layout_score, render_score_to_svg, LayoutReport, ScoreLayout};

/// Parse an MEI file from a file path.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score, Error> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_mei(&xml)?)
}

/// Convert a parsed score to a JSON string.
pub fn score_to_json(score: &Score) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(score)
}

/// Parse MEI text and render it to SVG.
pub fn render_mei_to_svg(xml: &str, options: &LayoutOptions) -> Result<String, Error> {
    let score = parse_mei(xml)?;
    Ok(render_score_to_svg(&score, options)?)
}

/// Parse an MEI file and render it directly to SVG.
/// Convenience function combining parsing and rendering.
pub fn render_file_to_svg<P: AsRef<Path>>(path: P, options: &LayoutOptions) -> Result<String, Error> {
    let score = parse_file(path)?;
    Ok(render_score_to_svg(&score, options)?)
}

/// Lay out MEI text and return the layout report as JSON: measure
/// positions and widths, system positions, lyric extents and the
/// annotations that were attached or dropped.
pub fn layout_report_to_json(xml: &str, options: &LayoutOptions) -> Result<String, Error> {
    let score = parse_mei(xml)?;
    let report = layout_score(&score, options)?.report();
    Ok(serde_json::to_string_pretty(&report)?)
}
