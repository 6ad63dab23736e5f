//! Verse stacking — places the lyric lines of a system below their staves.
//!
//! Syllables are grouped by staff and verse. Each verse gets its own text
//! line; the baseline of a verse is the lowest point any of its syllables
//! needs, and never less than the previous verse's baseline plus one line,
//! so verses on a staff cannot overlap.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::WordPos;
use crate::options::FontSpec;
use super::constants::*;
use super::note::NoteAddress;
use super::svg_builder::SvgBuilder;

/// A lyric syllable positioned under its note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyllableAnnotation {
    pub text: String,
    pub wordpos: Option<WordPos>,
    pub note: NoteAddress,
    /// Center x of the syllable (the note x)
    pub x: f64,
    pub width: f64,
    /// Lowest point of the note the syllable hangs from
    pub anchor_y: f64,
    font_size: f64,
    text_line: usize,
    y: Option<f64>,
}

impl SyllableAnnotation {
    pub fn new(text: &str, wordpos: Option<WordPos>, note: NoteAddress, x: f64, anchor_y: f64, font_size: f64) -> Self {
        Self {
            text: text.to_string(),
            wordpos,
            note,
            x,
            width: estimate_text_width(text, font_size),
            anchor_y,
            font_size,
            text_line: 0,
            y: None,
        }
    }

    /// Baseline this syllable needs to clear its note.
    pub fn pre_process(&self) -> f64 {
        self.anchor_y + LYRICS_BELOW_STAFF + self.font_size
    }

    pub fn set_text_line(&mut self, line: usize) {
        self.text_line = line;
    }

    pub fn text_line(&self) -> usize {
        self.text_line
    }

    pub fn set_y(&mut self, y: f64) {
        self.y = Some(y);
    }

    /// Committed baseline, once the verse has been formatted.
    pub fn y(&self) -> Option<f64> {
        self.y
    }

    fn left_x(&self) -> f64 {
        self.x - self.width / 2.0
    }

    fn right_x(&self) -> f64 {
        self.x + self.width / 2.0
    }
}

/// Pairs of syllables of one verse joined by a hyphen. `None` stands for
/// the system edge when a word is split across systems.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hyphenation {
    pairs: Vec<(Option<usize>, Option<usize>)>,
    open: Option<usize>,
}

impl Hyphenation {
    /// Feed syllable `index` of the verse with its word position.
    pub fn add_syllable(&mut self, index: usize, wordpos: WordPos) {
        match wordpos {
            WordPos::Initial => {
                if let Some(open) = self.open.take() {
                    self.pairs.push((Some(open), None));
                }
                self.open = Some(index);
            }
            WordPos::Medial => {
                self.pairs.push((self.open, Some(index)));
                self.open = Some(index);
            }
            WordPos::Terminal => {
                self.pairs.push((self.open.take(), Some(index)));
            }
        }
    }

    /// All hyphen pairs, including a word still open at the end.
    pub fn pairs(&self) -> Vec<(Option<usize>, Option<usize>)> {
        let mut pairs = self.pairs.clone();
        if let Some(open) = self.open {
            pairs.push((Some(open), None));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerseEntry {
    pub syllables: Vec<SyllableAnnotation>,
    pub hyphenation: Hyphenation,
}

// ═══════════════════════════════════════════════════════════════════════
// Verses
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Verses {
    font: FontSpec,
    max_hyphen_distance: f64,
    /// Verses per staff, in the order they were first seen
    staves: BTreeMap<u32, Vec<(String, VerseEntry)>>,
    lowest_ys: BTreeMap<u32, f64>,
}

impl Verses {
    pub fn new(font: FontSpec, max_hyphen_distance: f64) -> Self {
        Self {
            font,
            max_hyphen_distance,
            staves: BTreeMap::new(),
            lowest_ys: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staves.is_empty()
    }

    /// Group a syllable under its staff and verse ("1" when unnumbered).
    pub fn add_syllable(&mut self, annotation: SyllableAnnotation, verse: Option<&str>, staff_n: u32) {
        let verse_n = verse.unwrap_or("1");
        let verses = self.staves.entry(staff_n).or_default();
        let entry = match verses.iter().position(|(n, _)| n == verse_n) {
            Some(i) => &mut verses[i].1,
            None => {
                verses.push((verse_n.to_string(), VerseEntry::default()));
                let last = verses.len() - 1;
                &mut verses[last].1
            }
        };
        if let Some(wordpos) = annotation.wordpos {
            entry.hyphenation.add_syllable(entry.syllables.len(), wordpos);
        }
        entry.syllables.push(annotation);
    }

    /// Verses of one staff, in encounter order.
    pub fn verses(&self, staff_n: u32) -> &[(String, VerseEntry)] {
        self.staves.get(&staff_n).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn font_size(&self) -> f64 {
        self.font.size
    }

    /// Height of one lyric line.
    pub fn line_extent(&self) -> f64 {
        self.font.size * LYRIC_LINE_EXTENT
    }

    /// Assign text lines and commit a common baseline per verse.
    pub fn format(&mut self) {
        let extent = self.line_extent();
        for (&staff_n, verses) in self.staves.iter_mut() {
            let mut previous: Option<f64> = None;
            for (line, (_, entry)) in verses.iter_mut().enumerate() {
                let mut lowest = previous.map_or(f64::MIN, |y| y + VERSE_PADDING + extent);
                for syllable in entry.syllables.iter_mut() {
                    syllable.set_text_line(line);
                    lowest = lowest.max(syllable.pre_process());
                }
                for syllable in entry.syllables.iter_mut() {
                    syllable.set_y(lowest);
                }
                previous = Some(lowest);
            }
            if let Some(y) = previous {
                self.lowest_ys.insert(staff_n, y);
            }
        }
    }

    /// Baseline of the lowest verse of a staff, after `format`.
    pub fn lowest_y(&self, staff_n: u32) -> Option<f64> {
        self.lowest_ys.get(&staff_n).copied()
    }

    pub fn lowest_ys(&self) -> &BTreeMap<u32, f64> {
        &self.lowest_ys
    }

    /// Draw the hyphens of every verse. Words continuing past the system
    /// run to `left_x` / `right_x`; gaps wider than the maximum hyphen
    /// distance get no hyphen.
    pub fn draw_hyphens(&self, svg: &mut SvgBuilder, left_x: f64, right_x: f64) {
        for verses in self.staves.values() {
            for (_, entry) in verses {
                for (first, second) in entry.hyphenation.pairs() {
                    let first = first.and_then(|i| entry.syllables.get(i));
                    let second = second.and_then(|i| entry.syllables.get(i));
                    let Some(y) = first.or(second).and_then(SyllableAnnotation::y) else {
                        continue;
                    };
                    let start = first.map_or(left_x, SyllableAnnotation::right_x);
                    let end = second.map_or(right_x, SyllableAnnotation::left_x);
                    let gap = end - start;
                    if gap <= 0.0 || gap > self.max_hyphen_distance {
                        continue;
                    }
                    let dash = (self.font.size * 0.4).min(gap * 0.6);
                    let mid = (start + end) / 2.0;
                    let dash_y = y - self.font.size * 0.3;
                    svg.line(mid - dash / 2.0, dash_y, mid + dash / 2.0, dash_y, LYRICS_COLOR, 1.0);
                }
            }
        }
    }

    pub fn draw(&self, svg: &mut SvgBuilder) {
        for verses in self.staves.values() {
            for (_, entry) in verses {
                for syllable in &entry.syllables {
                    let Some(y) = syllable.y else { continue };
                    svg.styled_text(
                        syllable.x, y, &syllable.text, self.font.size, &self.font.weight,
                        LYRICS_COLOR, "middle", &self.font.family, &self.font.style,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(note: usize) -> NoteAddress {
        NoteAddress { system: 0, measure: 0, voice: 0, note }
    }

    fn syllable(text: &str, wordpos: Option<WordPos>, x: f64, anchor_y: f64) -> SyllableAnnotation {
        SyllableAnnotation::new(text, wordpos, addr(0), x, anchor_y, 13.0)
    }

    #[test]
    fn second_verse_sits_below_the_first() {
        let mut verses = Verses::new(FontSpec::default(), 100.0);
        verses.add_syllable(syllable("Hal", None, 10.0, 140.0), None, 1);
        verses.add_syllable(syllable("le", None, 40.0, 160.0), Some("1"), 1);
        verses.add_syllable(syllable("Praise", None, 10.0, 140.0), Some("2"), 1);
        verses.format();

        let first = &verses.verses(1)[0].1;
        let second = &verses.verses(1)[1].1;
        let y1 = first.syllables[0].y().unwrap();
        let y2 = second.syllables[0].y().unwrap();
        assert_eq!(y1, 160.0 + LYRICS_BELOW_STAFF + 13.0);
        assert_eq!(first.syllables[1].y(), Some(y1));
        assert!(y2 >= y1 + VERSE_PADDING + verses.line_extent());
        assert_eq!(second.syllables[0].text_line(), 1);
        assert_eq!(verses.lowest_y(1), Some(y2));
        assert_eq!(verses.lowest_y(2), None);
    }

    #[test]
    fn staves_stack_independently() {
        let mut verses = Verses::new(FontSpec::default(), 100.0);
        verses.add_syllable(syllable("a", None, 10.0, 100.0), Some("1"), 1);
        verses.add_syllable(syllable("b", None, 10.0, 300.0), Some("1"), 2);
        verses.format();
        assert_eq!(verses.lowest_y(1), Some(100.0 + LYRICS_BELOW_STAFF + 13.0));
        assert_eq!(verses.lowest_y(2), Some(300.0 + LYRICS_BELOW_STAFF + 13.0));
    }

    #[test]
    fn hyphenation_pairs_follow_word_positions() {
        let mut h = Hyphenation::default();
        h.add_syllable(0, WordPos::Terminal);
        h.add_syllable(1, WordPos::Initial);
        h.add_syllable(2, WordPos::Medial);
        h.add_syllable(3, WordPos::Terminal);
        h.add_syllable(4, WordPos::Initial);
        assert_eq!(
            h.pairs(),
            vec![(None, Some(0)), (Some(1), Some(2)), (Some(2), Some(3)), (Some(4), None)]
        );
    }

    #[test]
    fn hyphens_are_elided_across_wide_gaps() {
        let mut verses = Verses::new(FontSpec::default(), 50.0);
        verses.add_syllable(syllable("ly", Some(WordPos::Initial), 10.0, 100.0), None, 1);
        verses.add_syllable(syllable("ric", Some(WordPos::Terminal), 50.0, 100.0), None, 1);
        verses.add_syllable(syllable("far", Some(WordPos::Initial), 100.0, 100.0), None, 1);
        verses.add_syllable(syllable("away", Some(WordPos::Terminal), 400.0, 100.0), None, 1);
        verses.format();

        let mut svg = SvgBuilder::new(500.0, 200.0);
        verses.draw_hyphens(&mut svg, 0.0, 500.0);
        assert_eq!(svg.len(), 1);
    }
}
