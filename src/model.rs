//! Data model for a parsed MEI score.
//!
//! Only the content the layout engine consumes is kept: staff definitions,
//! measures with their staves/layers/events, lyric syllables, and the
//! control events (dynamics, directives, hairpins, ...) that point at
//! events by id or timestamp.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw attributes of a source element, keyed by attribute name
/// (`xml:id` keeps its prefix).
pub type Attributes = BTreeMap<String, String>;

/// A complete score parsed from MEI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Score {
    /// Title from the MEI header
    pub title: Option<String>,
    /// Composer from the MEI header
    pub composer: Option<String>,
    /// `@meiversion` of the root element
    pub version: Option<String>,
    /// Staff definitions of the initial scoreDef, in document order
    pub staff_defs: Vec<StaffDef>,
    /// Staff groups (braces, brackets) of the initial scoreDef
    pub staff_groups: Vec<StaffGroup>,
    /// Measures in document order
    pub measures: Vec<Measure>,
}

/// A staff definition: clef, key and meter of one staff.
///
/// Every field except `n` is optional because MEI definitions that appear
/// mid-score only carry what changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaffDef {
    /// Staff number, stable across the whole score
    pub n: u32,
    pub label: Option<String>,
    pub label_abbr: Option<String>,
    /// Number of staff lines (defaults to 5 when absent)
    pub lines: Option<u32>,
    /// Clef shape: "G", "F", "C", "perc"
    pub clef_shape: Option<String>,
    pub clef_line: Option<u32>,
    /// Octave displacement of the clef (8, 15)
    pub clef_dis: Option<u32>,
    /// "above" or "below"
    pub clef_dis_place: Option<String>,
    /// Key tonic pitch name: "c" .. "b"
    pub key_pname: Option<String>,
    /// Key tonic accidental: "s", "f"
    pub key_accid: Option<String>,
    /// "major" or "minor"
    pub key_mode: Option<String>,
    pub meter_count: Option<u32>,
    pub meter_unit: Option<u32>,
}

/// Time signature as read from a staff definition. Either part may be
/// missing in malformed input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub count: Option<u32>,
    pub unit: Option<u32>,
}

/// A group of staves sharing a connector symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaffGroup {
    /// "brace", "bracket", "line" or none
    pub symbol: Option<String>,
    /// Barlines drawn through all staves of the group
    pub barthru: bool,
    /// Staff numbers in the group, top to bottom
    pub staves: Vec<u32>,
}

/// A single measure across all staves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number (`@n`)
    pub n: u32,
    pub id: Option<String>,
    /// Explicit width (`@width`); None when absent or not a positive number
    pub width: Option<f64>,
    /// Left barline rendition, e.g. "rptstart"
    pub left: Option<String>,
    /// Right barline rendition, e.g. "rptend", "end", "dbl"
    pub right: Option<String>,
    /// Whether a system break precedes this measure
    pub new_system: bool,
    /// Staff definitions encountered since the previous measure
    pub staff_def_changes: Vec<StaffDef>,
    /// Staves present in this measure (sparse: a staff may be absent)
    pub staves: Vec<Staff>,
    /// Control events in document order
    pub controls: Vec<ControlEvent>,
}

/// One staff within a measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Staff {
    pub n: u32,
    pub layers: Vec<Layer>,
}

/// One notational layer (voice) of a staff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layer {
    /// `@n`; None for unnumbered layers
    pub n: Option<u32>,
    pub events: Vec<Event>,
}

/// A note-like event inside a layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// xml:id, or a generated id when the source has none
    pub id: String,
    pub kind: EventKind,
    /// Duration denominator: 1 = whole, 2 = half, 4 = quarter, ...
    pub dur: Option<u32>,
    pub dots: u32,
    /// Combined ratio of the enclosing tuplets, if any
    #[serde(default)]
    pub tuplet: Option<TupletRatio>,
    pub grace: bool,
    /// "up" or "down"
    pub stem_dir: Option<String>,
    /// Lyric syllables attached to this event
    pub syllables: Vec<Syllable>,
}

/// `num` notes in the time of `numbase` (a triplet is 3:2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupletRatio {
    pub num: u32,
    pub numbase: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    Note(Pitch),
    Chord(Vec<Pitch>),
    /// Note without pitch, placed by staff position (`@loc`, 0 = bottom line)
    Unpitched { loc: Option<i32> },
    Rest,
    /// Whole-measure rest (`mRest`)
    MeasureRest,
    /// Invisible placeholder (`space`, `mSpace`)
    Space,
}

/// Pitch of a note head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Pitch name: "c" .. "b"
    pub pname: String,
    /// Octave (middle C = c4)
    pub oct: i32,
    /// Written accidental: "s", "f", "n", "ss", "ff", "x"
    pub accid: Option<String>,
}

/// A lyric syllable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Syllable {
    /// `@n` of the parent verse element; None when unnumbered or absent
    pub verse: Option<String>,
    pub text: String,
    pub wordpos: Option<WordPos>,
}

/// Position of a syllable inside a hyphenated word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordPos {
    Initial,
    Medial,
    Terminal,
}

/// Kind of a measure-level control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    Dynam,
    Dir,
    Fermata,
    Trill,
    Mordent,
    Turn,
    Arpeg,
    Hairpin,
    Slur,
    Tie,
    Tempo,
    Reh,
}

/// A control event: an annotation that refers to events elsewhere in the
/// measure (or score) by id or timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEvent {
    pub kind: ControlKind,
    pub attrs: Attributes,
    /// Concatenated text content
    pub text: String,
    /// Short serialized form of the source element, for diagnostics
    pub source: String,
}

impl Score {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of measures in the score.
    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    /// Initial staff definition of staff `n`.
    pub fn staff_def(&self, n: u32) -> Option<&StaffDef> {
        self.staff_defs.iter().find(|d| d.n == n)
    }
}

impl StaffDef {
    pub fn new(n: u32) -> Self {
        Self { n, ..Default::default() }
    }

    /// Overlay the fields present in `newer` on top of `self`.
    pub fn merged_with(&self, newer: &StaffDef) -> StaffDef {
        fn pick<T: Clone>(new: &Option<T>, old: &Option<T>) -> Option<T> {
            new.clone().or_else(|| old.clone())
        }
        StaffDef {
            n: self.n,
            label: pick(&newer.label, &self.label),
            label_abbr: pick(&newer.label_abbr, &self.label_abbr),
            lines: pick(&newer.lines, &self.lines),
            clef_shape: pick(&newer.clef_shape, &self.clef_shape),
            clef_line: pick(&newer.clef_line, &self.clef_line),
            clef_dis: pick(&newer.clef_dis, &self.clef_dis),
            clef_dis_place: pick(&newer.clef_dis_place, &self.clef_dis_place),
            key_pname: pick(&newer.key_pname, &self.key_pname),
            key_accid: pick(&newer.key_accid, &self.key_accid),
            key_mode: pick(&newer.key_mode, &self.key_mode),
            meter_count: pick(&newer.meter_count, &self.meter_count),
            meter_unit: pick(&newer.meter_unit, &self.meter_unit),
        }
    }

    pub fn meter(&self) -> Meter {
        Meter { count: self.meter_count, unit: self.meter_unit }
    }

    /// Number of sharps (positive) or flats (negative) of the key.
    pub fn key_fifths(&self) -> i32 {
        let Some(pname) = self.key_pname.as_deref() else {
            return 0;
        };
        // Position of the natural tonic on the circle of fifths (C = 0)
        let base = match pname {
            "c" => 0,
            "g" => 1,
            "d" => 2,
            "a" => 3,
            "e" => 4,
            "b" => 5,
            "f" => -1,
            _ => return 0,
        };
        let accid = match self.key_accid.as_deref() {
            Some("s") => 7,
            Some("f") => -7,
            _ => 0,
        };
        let mode = if self.key_mode.as_deref() == Some("minor") { -3 } else { 0 };
        (base + accid + mode).clamp(-7, 7)
    }

    /// Staff line count, defaulting to five.
    pub fn line_count(&self) -> u32 {
        self.lines.unwrap_or(5)
    }
}

impl Meter {
    /// Count and unit, if both are present and non-zero.
    pub fn valid(&self) -> Option<(u32, u32)> {
        match (self.count, self.unit) {
            (Some(c), Some(u)) if c > 0 && u > 0 => Some((c, u)),
            _ => None,
        }
    }
}

impl Measure {
    /// The staff with number `n`, if present in this measure.
    pub fn staff(&self, n: u32) -> Option<&Staff> {
        self.staves.iter().find(|s| s.n == n)
    }

    /// Control events of one kind, in document order.
    pub fn controls_of(&self, kind: ControlKind) -> Vec<&ControlEvent> {
        self.controls.iter().filter(|c| c.kind == kind).collect()
    }
}

impl Staff {
    /// Find layer `n`; when it is absent and the first layer is unnumbered,
    /// fall back to that one.
    pub fn layer(&self, n: u32) -> Option<&Layer> {
        if let Some(layer) = self.layers.iter().find(|l| l.n == Some(n)) {
            return Some(layer);
        }
        self.layers.first().filter(|l| l.n.is_none())
    }
}

impl Event {
    /// Duration in beats of a meter whose beat unit is `unit`
    /// (e.g. a quarter note lasts one beat in x/4).
    pub fn beats(&self, unit: u32) -> f64 {
        let Some(dur) = self.dur.filter(|d| *d > 0) else {
            return 0.0;
        };
        let mut beats = unit as f64 / dur as f64;
        let mut add = beats;
        for _ in 0..self.dots {
            add /= 2.0;
            beats += add;
        }
        match self.tuplet {
            Some(ratio) => beats * ratio.factor(),
            None => beats,
        }
    }

    /// Whether this event occupies time in its layer.
    pub fn is_timed(&self) -> bool {
        !self.grace
    }
}

impl TupletRatio {
    /// Ratio of a `@num`/`@numbase` pair; a triplet when both are absent.
    /// A missing `@numbase` is the largest power of two below `num`
    /// (duplets and quadruplets take 3).
    pub fn new(num: Option<u32>, numbase: Option<u32>) -> Option<Self> {
        let num = num.unwrap_or(3);
        let numbase = numbase.unwrap_or(match num {
            0 | 1 => num,
            2 | 4 => 3,
            n => 1 << (u32::BITS - 1 - (n - 1).leading_zeros()),
        });
        (num > 0 && numbase > 0).then_some(Self { num, numbase })
    }

    /// Ratio of a tuplet nested inside `self`.
    pub fn nested(self, inner: TupletRatio) -> Self {
        Self { num: self.num * inner.num, numbase: self.numbase * inner.numbase }
    }

    /// Multiplier applied to written durations.
    pub fn factor(self) -> f64 {
        self.numbase as f64 / self.num as f64
    }
}

impl ControlEvent {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

impl WordPos {
    pub fn from_mei(value: &str) -> Option<Self> {
        match value {
            "i" => Some(WordPos::Initial),
            "m" => Some(WordPos::Medial),
            "t" => Some(WordPos::Terminal),
            _ => None,
        }
    }
}
