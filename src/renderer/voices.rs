//! Voice stack — joint horizontal alignment of all voices of a measure.
//!
//! Events of every voice that start at the same beat share one tick
//! context, so simultaneous notes line up across staves. Formatting runs
//! in two steps: `pre_format` measures the minimum width without placing
//! anything, `format` commits x positions for a given width.

use std::collections::BTreeMap;

use log::warn;

use crate::error::LayoutError;
use super::constants::*;
use super::note::NoteEvent;
use super::stave::Stave;
use super::svg_builder::SvgBuilder;

const ONSET_TOLERANCE: f64 = 0.001;

/// One layer of one staff.
#[derive(Debug, Clone)]
pub struct Voice {
    pub staff_n: u32,
    pub notes: Vec<NoteEvent>,
}

/// Events of all voices starting at the same beat.
#[derive(Debug, Clone, PartialEq)]
struct TickContext {
    onset: f64,
    /// Extent left of the note x (accidentals, grace notes, half a head)
    left: f64,
    /// Extent right of the note x (half a head, dots, lyrics)
    right: f64,
    /// Longest duration starting here
    beats: f64,
    x: f64,
}

#[derive(Debug, Clone)]
pub struct VoiceStack {
    voices: Vec<Voice>,
    lyrics_font_size: f64,
    contexts: Option<Vec<TickContext>>,
    min_width: f64,
    formatted: bool,
}

impl VoiceStack {
    pub fn new(lyrics_font_size: f64) -> Self {
        Self {
            voices: Vec::new(),
            lyrics_font_size,
            contexts: None,
            min_width: 0.0,
            formatted: false,
        }
    }

    /// Add a voice tagged with the staff it is drawn on.
    pub fn add_voice(&mut self, notes: Vec<NoteEvent>, staff_n: u32) {
        self.voices.push(Voice { staff_n, notes });
        self.contexts = None;
        self.formatted = false;
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn note(&self, voice: usize, note: usize) -> Option<&NoteEvent> {
        self.voices.get(voice)?.notes.get(note)
    }

    pub fn note_mut(&mut self, voice: usize, note: usize) -> Option<&mut NoteEvent> {
        self.voices.get_mut(voice)?.notes.get_mut(note)
    }

    pub fn is_formatted(&self) -> bool {
        self.formatted
    }

    fn lyric_width(&self, note: &NoteEvent) -> f64 {
        note.syllables
            .iter()
            .map(|s| estimate_text_width(&s.text, self.lyrics_font_size) + NOTE_PADDING)
            .fold(0.0, f64::max)
    }

    /// Measure the minimum width all voices need side by side.
    pub fn pre_format(&mut self) -> f64 {
        let mut contexts: Vec<TickContext> = Vec::new();

        for voice in &self.voices {
            let mut graces = 0usize;
            for note in &voice.notes {
                if note.grace {
                    graces += 1;
                    continue;
                }
                let left = note.left_width()
                    + graces as f64 * GRACE_NOTE_WIDTH
                    + note.body_width() / 2.0;
                let right = (note.body_width() / 2.0).max(self.lyric_width(note) / 2.0);
                graces = 0;

                match contexts
                    .iter_mut()
                    .find(|c| (c.onset - note.onset).abs() < ONSET_TOLERANCE)
                {
                    Some(ctx) => {
                        ctx.left = ctx.left.max(left);
                        ctx.right = ctx.right.max(right);
                        ctx.beats = ctx.beats.max(note.beats);
                    }
                    None => contexts.push(TickContext {
                        onset: note.onset,
                        left,
                        right,
                        beats: note.beats,
                        x: 0.0,
                    }),
                }
            }
        }
        contexts.sort_by(|a, b| a.onset.total_cmp(&b.onset));

        self.min_width = match (contexts.first(), contexts.last()) {
            (Some(first), Some(_)) => first.left + gaps(&contexts).iter().sum::<f64>() + tail(&contexts),
            _ => EMPTY_VOICE_WIDTH,
        };
        self.contexts = Some(contexts);
        self.formatted = false;
        self.min_width
    }

    /// Minimum width of the last `pre_format`.
    pub fn min_width(&self) -> Option<f64> {
        self.contexts.as_ref().map(|_| self.min_width)
    }

    /// Justify all voices into the note area of `stave`.
    pub fn format(&mut self, stave: &Stave) -> Result<(), LayoutError> {
        self.format_to_width(stave.start_x(), stave.end_x() - stave.start_x())
    }

    /// Place every event between `start_x` and `start_x + width`,
    /// stretching or compressing the flexible space between contexts.
    pub fn format_to_width(&mut self, start_x: f64, width: f64) -> Result<(), LayoutError> {
        let contexts = self.contexts.as_mut().ok_or(LayoutError::VoicesNotPreformatted)?;

        if let Some(first) = contexts.first() {
            let gaps = gaps(contexts);
            let flexible = gaps.iter().sum::<f64>() + tail(contexts);
            let available = (width - first.left).max(0.0);
            let scale = if flexible > 0.0 { available / flexible } else { 1.0 };

            let mut x = start_x + first.left;
            for (i, ctx) in contexts.iter_mut().enumerate() {
                if i > 0 {
                    x += gaps[i - 1] * scale;
                }
                ctx.x = x;
            }
        }

        let contexts = &*contexts;
        let x_at = |onset: f64| {
            contexts
                .iter()
                .find(|c| (c.onset - onset).abs() < ONSET_TOLERANCE)
                .map(|c| c.x)
        };
        for voice in &mut self.voices {
            let mut pending: Vec<usize> = Vec::new();
            let mut last_x = start_x;
            for i in 0..voice.notes.len() {
                if voice.notes[i].grace {
                    pending.push(i);
                    continue;
                }
                let x = x_at(voice.notes[i].onset).unwrap_or(last_x);
                voice.notes[i].set_x(x);
                let left = x - voice.notes[i].left_width() - NOTEHEAD_RX;
                let count = pending.len();
                for (k, &g) in pending.iter().enumerate() {
                    voice.notes[g].set_x(left - (count - k) as f64 * GRACE_NOTE_WIDTH + GRACE_NOTE_WIDTH / 2.0);
                }
                pending.clear();
                last_x = x;
            }
            // Trailing grace notes follow the last event
            for (k, &g) in pending.iter().enumerate() {
                voice.notes[g].set_x(last_x + NOTEHEAD_WIDTH + k as f64 * GRACE_NOTE_WIDTH);
            }
        }

        self.formatted = true;
        Ok(())
    }

    /// Bind every note to the vertical extent of its stave.
    pub fn bind_staves(&mut self, staves: &BTreeMap<u32, Stave>) {
        for voice in &mut self.voices {
            if let Some(stave) = staves.get(&voice.staff_n) {
                for note in &mut voice.notes {
                    note.set_stave(stave.y(), stave.bottom_y());
                }
            }
        }
    }

    /// Draw each voice against its staff.
    pub fn draw(&self, svg: &mut SvgBuilder, staves: &BTreeMap<u32, Stave>) -> Result<(), LayoutError> {
        if !self.formatted {
            return Err(LayoutError::VoicesNotPreformatted);
        }
        for voice in &self.voices {
            if !staves.contains_key(&voice.staff_n) {
                warn!("voice of staff {} has no stave to draw on", voice.staff_n);
                continue;
            }
            for note in &voice.notes {
                note.draw(svg);
            }
        }
        Ok(())
    }
}

/// Minimum distance between consecutive contexts.
fn gaps(contexts: &[TickContext]) -> Vec<f64> {
    contexts
        .windows(2)
        .map(|w| {
            let collision = w[0].right + w[1].left + NOTE_PADDING;
            let rhythmic = (w[1].onset - w[0].onset) * MIN_BEAT_WIDTH;
            collision.max(rhythmic)
        })
        .collect()
}

/// Space after the last context.
fn tail(contexts: &[TickContext]) -> f64 {
    contexts
        .last()
        .map_or(0.0, |c| (c.right + NOTE_PADDING).max(c.beats * MIN_BEAT_WIDTH))
}
