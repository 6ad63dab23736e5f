//! Score layout — groups measures into systems, sizes and positions them,
//! then resolves annotations and stacks lyrics.
//!
//! The phases run strictly in order:
//! 1. build every measure with its staff definitions and collections,
//!    breaking systems as measures stop fitting;
//! 2. compute min widths and distribute the leftover system width;
//! 3. place staves vertically and format each measure;
//! 4. index every event by id;
//! 5. attach pointer and link annotations;
//! 6. stack the verses of each system.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;
use serde::Serialize;

use crate::error::LayoutError;
use crate::model::Score;
use crate::options::{FontSpec, LayoutOptions};
use crate::staff_info::StaffInfos;
use super::builder::MeasureBuilder;
use super::constants::*;
use super::links::Span;
use super::measure::{FormattedMeasure, Measure, MinWidthParts, SizedMeasure};
use super::note::{NoteAddress, NoteEvent};
use super::pointers::{AnnotationStyle, AttachReport};
use super::stave::StaveFonts;
use super::svg_builder::{empty_svg, SvgBuilder};
use super::verses::{SyllableAnnotation, Verses};

// ═══════════════════════════════════════════════════════════════════════
// Layout structures
// ═══════════════════════════════════════════════════════════════════════

/// One line of music.
#[derive(Debug)]
pub struct System {
    pub index: usize,
    pub y: f64,
    pub height: f64,
    pub x_start: f64,
    pub x_end: f64,
    pub measures: Vec<FormattedMeasure>,
    pub spans: Vec<Span>,
    pub verses: Verses,
    /// Top line y of every staff
    pub staff_ys: BTreeMap<u32, f64>,
}

/// Every event of the score by id.
#[derive(Debug, Default)]
pub struct EventLookup {
    ids: HashMap<String, NoteAddress>,
}

impl EventLookup {
    /// Index all formatted events. The first event with an id wins.
    pub fn build(systems: &[System]) -> Self {
        let mut ids = HashMap::new();
        for (s, system) in systems.iter().enumerate() {
            for (m, measure) in system.measures.iter().enumerate() {
                for (v, voice) in measure.voices().voices().iter().enumerate() {
                    for (n, note) in voice.notes.iter().enumerate() {
                        let addr = NoteAddress { system: s, measure: m, voice: v, note: n };
                        ids.entry(note.id.clone()).or_insert(addr);
                    }
                }
            }
        }
        Self { ids }
    }

    pub fn get(&self, id: &str) -> Option<NoteAddress> {
        self.ids.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn note_mut<'s>(&self, id: &str, systems: &'s mut [System]) -> Option<&'s mut NoteEvent> {
        let addr = self.get(id)?;
        systems
            .get_mut(addr.system)?
            .measures
            .get_mut(addr.measure)?
            .voices_mut()
            .note_mut(addr.voice, addr.note)
    }
}

/// A fully laid-out score, ready to draw.
#[derive(Debug)]
pub struct ScoreLayout {
    pub title: Option<String>,
    pub composer: Option<String>,
    pub width: f64,
    pub height: f64,
    pub systems: Vec<System>,
    /// Outcome of attaching all pointer and link annotations
    pub annotations: AttachReport,
    fonts: StaveFonts,
}

/// Measures of a system before widths are fixed.
struct PendingSystem {
    measures: Vec<Measure>,
    labels: BTreeMap<u32, String>,
    /// Explicit width of each measure, or its min width
    used_width: f64,
}

impl PendingSystem {
    fn new(labels: BTreeMap<u32, String>) -> Self {
        Self { measures: Vec::new(), labels, used_width: 0.0 }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Main layout computation
// ═══════════════════════════════════════════════════════════════════════

pub fn layout_score(score: &Score, options: &LayoutOptions) -> Result<ScoreLayout, LayoutError> {
    let label_font = FontSpec::default();
    let fonts = StaveFonts { label: label_font.clone(), tempo: options.tempo_font.clone() };

    let (pending, staff_numbers) = build_systems(score, options, &label_font)?;

    // ── Vertical placement and horizontal formatting ──
    let header = if score.title.is_some() || score.composer.is_some() { HEADER_HEIGHT } else { 0.0 };
    let mut y = options.margin_top + header;
    let mut systems = Vec::with_capacity(pending.len());

    for (index, group) in pending.into_iter().enumerate() {
        let verse_counts = verse_counts(score, &group.measures);
        let lyric_line = options.lyrics_font.size * LYRIC_LINE_EXTENT + VERSE_PADDING;
        let lyric_space = |n: u32| match verse_counts.get(&n) {
            Some(&count) if count > 0 => LYRICS_BELOW_STAFF + count as f64 * lyric_line,
            _ => 0.0,
        };

        let mut staff_ys = BTreeMap::new();
        let mut staff_y = y;
        let mut bottom = y;
        for (i, &n) in staff_numbers.iter().enumerate() {
            if i > 0 {
                staff_y += options.staff_spacing;
            }
            staff_ys.insert(n, staff_y);
            bottom = staff_y + STAFF_HEIGHT + lyric_space(n);
            staff_y += lyric_space(n);
        }

        let indent = label_indent(&group.labels, &label_font);
        let x_start = options.margin_left + indent;
        let available = options.content_width() - indent;
        let sized = distribute_widths(group.measures, available)?;

        let mut x = x_start;
        let mut slur_start_x = None;
        let mut measures = Vec::with_capacity(sized.len());
        let no_labels = BTreeMap::new();
        for (k, mut measure) in sized.into_iter().enumerate() {
            measure.place_staves(&staff_ys);
            let labels = if k == 0 { &group.labels } else { &no_labels };
            let (formatted, resolved) = measure.format(x, labels, slur_start_x)?;
            slur_start_x = Some(resolved);
            x += formatted.width();
            measures.push(formatted);
        }

        debug!("system {} at y {:.1}: {} measures", index, y, measures.len());
        systems.push(System {
            index,
            y,
            height: bottom - y,
            x_start,
            x_end: x,
            measures,
            spans: Vec::new(),
            verses: Verses::new(options.lyrics_font.clone(), options.max_hyphen_distance),
            staff_ys,
        });
        y = bottom + options.system_spacing;
    }

    // ── Annotations ──
    let lookup = EventLookup::build(&systems);
    let mut collections = Vec::new();
    for system in systems.iter_mut() {
        for measure in system.measures.iter_mut() {
            collections.push(measure.take_collections());
        }
    }
    let style = AnnotationStyle { font: options.annotation_font.clone() };
    let mut annotations = AttachReport::default();
    for collection in &collections {
        for pointers in &collection.pointers {
            annotations.merge(pointers.create_vex_from_infos(&lookup, &mut systems, &style));
        }
        for links in &collection.links {
            annotations.merge(links.create_vex_from_infos(&lookup, &mut systems));
        }
    }
    debug!(
        "{} events indexed, {} annotations attached, {} dropped",
        lookup.len(),
        annotations.attached,
        annotations.dropped.len()
    );

    // ── Lyrics ──
    for system in systems.iter_mut() {
        stack_verses(system);
    }

    let height = systems
        .iter()
        .map(|s| {
            let lyrics = s.verses.lowest_ys().values().fold(0.0, |a: f64, &b| a.max(b));
            (s.y + s.height).max(lyrics)
        })
        .fold(options.margin_top + header, f64::max)
        + options.margin_top;

    Ok(ScoreLayout {
        title: score.title.clone(),
        composer: score.composer.clone(),
        width: options.page_width,
        height,
        systems,
        annotations,
        fonts,
    })
}

/// Build all measures and group them into systems. Returns the systems
/// and every staff number seen.
fn build_systems(
    score: &Score,
    options: &LayoutOptions,
    label_font: &FontSpec,
) -> Result<(Vec<PendingSystem>, Vec<u32>), LayoutError> {
    let builder = MeasureBuilder::new(score, options);
    let mut infos = StaffInfos::from_score_defs(&score.staff_defs);
    let mut systems: Vec<PendingSystem> = Vec::new();
    let mut current: Option<PendingSystem> = None;

    for (index, source) in score.measures.iter().enumerate() {
        infos.apply_changes(&source.staff_def_changes)?;

        let forced = source.new_system && current.as_ref().map_or(false, |s| !s.measures.is_empty());
        let starts_system = current.is_none() || forced;
        let mut measure = builder.build(index, &infos, starts_system)?;
        let mut width = measure.calculate_min_width()?;

        let fits = match &current {
            Some(system) if !forced && options.auto_system_breaks => {
                let available = options.content_width() - label_indent(&system.labels, label_font);
                system.used_width + measure.explicit_width().unwrap_or(width) <= available
            }
            _ => true,
        };
        if !fits {
            debug!("system break before measure {}", source.n);
            measure = builder.build(index, &infos, true)?;
            width = measure.calculate_min_width()?;
        }
        if forced || !fits || current.is_none() {
            if let Some(done) = current.take() {
                systems.push(done);
            }
            current = Some(PendingSystem::new(labels(&infos, systems.is_empty())));
        }

        builder.attach_collections(&mut measure, index, &infos)?;
        if let Some(system) = current.as_mut() {
            system.used_width += measure.explicit_width().unwrap_or(width);
            system.measures.push(measure);
        }
        infos.mark_rendered_all();
    }
    systems.extend(current);
    Ok((systems, infos.staff_numbers()))
}

/// Staff labels for a system: the full label on the first system, the
/// abbreviation afterwards.
fn labels(infos: &StaffInfos, first_system: bool) -> BTreeMap<u32, String> {
    infos
        .staff_numbers()
        .into_iter()
        .filter_map(|n| {
            let def = infos.get(n)?.staff_def()?;
            let label = if first_system { def.label.clone() } else { def.label_abbr.clone() };
            Some((n, label?))
        })
        .collect()
}

fn label_indent(labels: &BTreeMap<u32, String>, font: &FontSpec) -> f64 {
    labels
        .values()
        .map(|l| estimate_text_width(l, font.size) + LABEL_GAP)
        .fold(0.0, f64::max)
}

/// Fix the final width of every measure: leftover width goes to the
/// measures without an explicit width, in proportion to their min width.
fn distribute_widths(measures: Vec<Measure>, available: f64) -> Result<Vec<SizedMeasure>, LayoutError> {
    let flexible_min: f64 = measures
        .iter()
        .filter(|m| !m.has_explicit_width())
        .filter_map(|m| m.min_width())
        .sum();
    let explicit: f64 = measures
        .iter()
        .filter(|m| m.has_explicit_width())
        .map(|m| m.explicit_width().unwrap_or(0.0))
        .sum();
    let leftover = (available - explicit - flexible_min).max(0.0);
    debug!("distributing {:.1} over {:.1} of flexible width", leftover, flexible_min);

    measures
        .into_iter()
        .map(|m| {
            let min = m.min_width().unwrap_or(0.0);
            let share = if flexible_min > 0.0 { leftover * min / flexible_min } else { 0.0 };
            m.set_final_width(share)
        })
        .collect()
}

/// Number of distinct verses per staff in a group of measures.
fn verse_counts(score: &Score, measures: &[Measure]) -> BTreeMap<u32, usize> {
    let mut verses: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
    for measure in measures {
        let Some(source) = score.measures.get(measure.index) else {
            continue;
        };
        for staff in &source.staves {
            for event in staff.layers.iter().flat_map(|l| &l.events) {
                for syllable in &event.syllables {
                    let verse = syllable.verse.clone().unwrap_or_else(|| "1".into());
                    verses.entry(staff.n).or_default().insert(verse);
                }
            }
        }
    }
    verses.into_iter().map(|(n, v)| (n, v.len())).collect()
}

fn stack_verses(system: &mut System) {
    let font_size = system.verses.font_size();
    for (m, measure) in system.measures.iter().enumerate() {
        for (v, voice) in measure.voices().voices().iter().enumerate() {
            for (n, note) in voice.notes.iter().enumerate() {
                for syllable in &note.syllables {
                    let addr = NoteAddress { system: system.index, measure: m, voice: v, note: n };
                    let annotation = SyllableAnnotation::new(
                        &syllable.text,
                        syllable.wordpos,
                        addr,
                        note.x(),
                        note.lowest_y(),
                        font_size,
                    );
                    system.verses.add_syllable(annotation, syllable.verse.as_deref(), voice.staff_n);
                }
            }
        }
    }
    system.verses.format();
}

// ═══════════════════════════════════════════════════════════════════════
// Drawing and reporting
// ═══════════════════════════════════════════════════════════════════════

impl ScoreLayout {
    pub fn draw(&self) -> Result<String, LayoutError> {
        if self.systems.is_empty() {
            return Ok(empty_svg("No measures in score"));
        }
        let mut svg = SvgBuilder::new(self.width, self.height);
        svg.rect(0.0, 0.0, self.width, self.height, "white", "none", 0.0);
        self.draw_header(&mut svg);

        for system in &self.systems {
            svg.open_group("system", None);
            for measure in &system.measures {
                measure.draw(&mut svg, &self.fonts)?;
            }
            for span in &system.spans {
                span.draw(&mut svg, &system.measures);
            }
            system.verses.draw(&mut svg);
            system.verses.draw_hyphens(&mut svg, system.x_start, system.x_end);
            svg.close_group();
        }
        Ok(svg.build())
    }

    fn draw_header(&self, svg: &mut SvgBuilder) {
        let top = self.systems.first().map_or(HEADER_HEIGHT, |s| s.y - HEADER_HEIGHT);
        if let Some(title) = &self.title {
            svg.text(self.width / 2.0, top + 10.0, title, 22.0, "bold", TEXT_COLOR, "middle");
        }
        if let Some(composer) = &self.composer {
            svg.text(self.width - 30.0, top + 32.0, composer, 13.0, "normal", TEXT_COLOR, "end");
        }
    }

    /// Serializable summary of the layout.
    pub fn report(&self) -> LayoutReport {
        let mut measures = Vec::new();
        let mut systems = Vec::new();
        for system in &self.systems {
            for measure in &system.measures {
                measures.push(MeasureReport {
                    n: measure.n(),
                    index: measure.index(),
                    system: system.index,
                    x: measure.x(),
                    width: measure.width(),
                    min_width: measure.min_width(),
                    min_width_parts: measure.min_width_parts(),
                });
            }
            systems.push(SystemReport {
                index: system.index,
                y: system.y,
                height: system.height,
                x_start: system.x_start,
                x_end: system.x_end,
                staff_ys: system.staff_ys.clone(),
                lowest_lyric_ys: system.verses.lowest_ys().clone(),
                spans: system.spans.len(),
            });
        }
        LayoutReport {
            width: self.width,
            height: self.height,
            systems,
            measures,
            annotations: self.annotations.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutReport {
    pub width: f64,
    pub height: f64,
    pub systems: Vec<SystemReport>,
    pub measures: Vec<MeasureReport>,
    pub annotations: AttachReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    pub index: usize,
    pub y: f64,
    pub height: f64,
    pub x_start: f64,
    pub x_end: f64,
    pub staff_ys: BTreeMap<u32, f64>,
    pub lowest_lyric_ys: BTreeMap<u32, f64>,
    pub spans: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasureReport {
    pub n: u32,
    pub index: usize,
    pub system: usize,
    pub x: f64,
    pub width: f64,
    pub min_width: f64,
    pub min_width_parts: MinWidthParts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventKind, Layer, Measure as ModelMeasure, Pitch, Staff, StaffDef};

    fn measure(n: u32, width: Option<f64>) -> ModelMeasure {
        let events = (0..4)
            .map(|i| Event {
                id: format!("m{}n{}", n, i),
                kind: EventKind::Note(Pitch { pname: "e".into(), oct: 4, accid: None }),
                dur: Some(4),
                dots: 0,
                tuplet: None,
                grace: false,
                stem_dir: None,
                syllables: Vec::new(),
            })
            .collect();
        ModelMeasure {
            n,
            width,
            staves: vec![Staff { n: 1, layers: vec![Layer { n: Some(1), events }] }],
            ..Default::default()
        }
    }

    fn score(measures: Vec<ModelMeasure>) -> Score {
        Score {
            staff_defs: vec![StaffDef { meter_count: Some(4), meter_unit: Some(4), ..StaffDef::new(1) }],
            measures,
            ..Default::default()
        }
    }

    #[test]
    fn leftover_width_fills_the_system() {
        let score = score(vec![measure(1, None), measure(2, None)]);
        let options = LayoutOptions::default();
        let layout = layout_score(&score, &options).unwrap();
        assert_eq!(layout.systems.len(), 1);
        let system = &layout.systems[0];
        let used: f64 = system.measures.iter().map(|m| m.width()).sum();
        assert!((used - options.content_width()).abs() < 1e-6);
        assert_eq!(system.measures[1].x(), system.measures[0].x() + system.measures[0].width());
    }

    #[test]
    fn explicit_widths_take_no_leftover() {
        let score = score(vec![measure(1, Some(200.0)), measure(2, None)]);
        let layout = layout_score(&score, &LayoutOptions::default()).unwrap();
        let measures = &layout.systems[0].measures;
        assert_eq!(measures[0].width(), 200.0);
        assert!((measures[1].width() - (LayoutOptions::default().content_width() - 200.0)).abs() < 1e-6);
    }

    #[test]
    fn measures_break_into_systems_when_full() {
        let score = score((1..=12).map(|n| measure(n, None)).collect());
        let layout = layout_score(&score, &LayoutOptions::default()).unwrap();
        assert!(layout.systems.len() > 1);
        for system in &layout.systems {
            let first = &system.measures[0];
            assert!(first.stave(1).unwrap().modifiers().len() > 2, "system start shows a clef");
        }
        assert!(layout.systems[1].y > layout.systems[0].y + layout.systems[0].height);
    }

    #[test]
    fn explicit_widths_count_toward_system_breaks() {
        // Each measure's min width is far below 500, but two don't fit in 740
        let score = score(vec![measure(1, Some(500.0)), measure(2, Some(500.0)), measure(3, None)]);
        let layout = layout_score(&score, &LayoutOptions::default()).unwrap();
        let counts: Vec<usize> = layout.systems.iter().map(|s| s.measures.len()).collect();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(layout.systems[1].measures[0].width(), 500.0);
    }

    #[test]
    fn explicit_breaks_are_kept_without_auto_breaking() {
        let mut measures: Vec<_> = (1..=3).map(|n| measure(n, None)).collect();
        measures[2].new_system = true;
        let options = LayoutOptions { auto_system_breaks: false, ..LayoutOptions::default() };
        let layout = layout_score(&score(measures), &options).unwrap();
        let counts: Vec<usize> = layout.systems.iter().map(|s| s.measures.len()).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn measure_without_staves_aborts_layout() {
        let empty = ModelMeasure { n: 1, ..Default::default() };
        let err = layout_score(&score(vec![empty]), &LayoutOptions::default()).unwrap_err();
        assert_eq!(err, LayoutError::NoStaffFound { measure: 1 });
    }

    #[test]
    fn lookup_indexes_every_event() {
        let score = score(vec![measure(1, None), measure(2, None)]);
        let layout = layout_score(&score, &LayoutOptions::default()).unwrap();
        let lookup = EventLookup::build(&layout.systems);
        assert_eq!(lookup.len(), 8);
        assert_eq!(
            lookup.get("m2n3"),
            Some(NoteAddress { system: 0, measure: 1, voice: 0, note: 3 })
        );
        assert_eq!(lookup.get("missing"), None);
    }
}
