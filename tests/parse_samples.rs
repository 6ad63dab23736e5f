//! Integration tests — parse the sample files in the sheetmusic/ directory.

use meiscore::{parse_file, parse_mei, ControlKind, Error, EventKind, ParseError, Score, WordPos};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn sheetmusic_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sheetmusic")
}

fn load(name: &str) -> Score {
    let path = sheetmusic_dir().join(name);
    parse_file(&path).unwrap_or_else(|e| panic!("Failed to parse {}: {}", name, e))
}

// ─── annotations.mei ────────────────────────────────────────────────

#[test]
fn parse_annotation_study_header() {
    let score = load("annotations.mei");
    assert_eq!(score.title.as_deref(), Some("Annotation Study"));
    assert_eq!(score.composer.as_deref(), Some("Anonymous"));
    assert_eq!(score.version.as_deref(), Some("4.0.1"));
    assert_eq!(score.measure_count(), 4);
}

#[test]
fn parse_annotation_study_staff_definitions() {
    let score = load("annotations.mei");
    assert_eq!(score.staff_defs.len(), 2);

    let upper = score.staff_def(1).expect("staff 1 should be defined");
    assert_eq!(upper.label.as_deref(), Some("Piano"));
    assert_eq!(upper.label_abbr.as_deref(), Some("Pno."));
    assert_eq!(upper.clef_shape.as_deref(), Some("G"));
    assert_eq!(upper.clef_line, Some(2));
    // scoreDef attributes are inherited by every staffDef
    assert_eq!(upper.key_pname.as_deref(), Some("g"));
    assert_eq!(upper.key_fifths(), 1);
    assert_eq!((upper.meter_count, upper.meter_unit), (Some(4), Some(4)));

    let lower = score.staff_def(2).expect("staff 2 should be defined");
    assert_eq!(lower.clef_shape.as_deref(), Some("F"));
    assert_eq!(lower.clef_line, Some(4));
    assert_eq!(lower.meter_count, Some(4));

    assert_eq!(score.staff_groups.len(), 1);
    let group = &score.staff_groups[0];
    assert_eq!(group.symbol.as_deref(), Some("brace"));
    assert!(group.barthru);
    assert_eq!(group.staves, vec![1, 2]);
}

#[test]
fn parse_annotation_study_measures() {
    let score = load("annotations.mei");
    let m1 = &score.measures[0];
    assert_eq!(m1.n, 1);
    assert_eq!(m1.id.as_deref(), Some("m1"));
    assert_eq!(m1.staves.len(), 2);

    let chord = &m1.staff(2).unwrap().layers[0].events[0];
    assert_eq!(chord.id, "c1");
    match &chord.kind {
        EventKind::Chord(pitches) => assert_eq!(pitches.len(), 3),
        other => panic!("expected a chord, got {:?}", other),
    }

    let kinds: Vec<ControlKind> = m1.controls.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ControlKind::Tempo,
            ControlKind::Reh,
            ControlKind::Dynam,
            ControlKind::Dir,
            ControlKind::Arpeg,
            ControlKind::Slur,
        ]
    );
    assert_eq!(m1.controls[2].text, "p");
    assert_eq!(m1.controls[4].attr("startid"), Some("#c1"));

    let m2 = &score.measures[1];
    assert!(!m2.new_system);
    assert_eq!(m2.staff(2).unwrap().layers[0].events[0].kind, EventKind::MeasureRest);
    assert!(m2.controls_of(ControlKind::Hairpin)[0].source.starts_with("<hairpin form=\"dim\""));

    assert!(score.measures[2].new_system, "the <sb/> should break before measure 3");
    assert!(score.measures[2].staff_def_changes.is_empty());
}

#[test]
fn parse_meter_change_applies_to_every_staff() {
    let score = load("annotations.mei");
    let m4 = &score.measures[3];
    assert_eq!(m4.right.as_deref(), Some("end"));
    assert!(!m4.new_system);

    let changes: Vec<(u32, Option<u32>, Option<u32>)> = m4
        .staff_def_changes
        .iter()
        .map(|d| (d.n, d.meter_count, d.meter_unit))
        .collect();
    assert_eq!(changes, vec![(1, Some(3), Some(4)), (2, Some(3), Some(4))]);
    // Only the meter changes
    assert_eq!(m4.staff_def_changes[0].clef_shape, None);
}

// ─── lyrics.mei ─────────────────────────────────────────────────────

#[test]
fn parse_lyrics_with_two_verses() {
    let score = load("lyrics.mei");
    assert_eq!(score.title.as_deref(), Some("Twinkle"));
    assert_eq!(score.composer.as_deref(), Some("Traditional"));

    // Clef, key and meter from child elements
    let def = score.staff_def(1).unwrap();
    assert_eq!(def.clef_shape.as_deref(), Some("G"));
    assert_eq!(def.key_fifths(), 0);
    assert_eq!(def.meter().count, Some(4));

    let events = &score.measures[0].staff(1).unwrap().layers[0].events;
    assert_eq!(events.len(), 4);
    let syllables = &events[1].syllables;
    assert_eq!(syllables.len(), 2);
    assert_eq!(syllables[0].verse.as_deref(), Some("1"));
    assert_eq!(syllables[0].text, "kle");
    assert_eq!(syllables[0].wordpos, Some(WordPos::Terminal));
    assert_eq!(syllables[1].verse.as_deref(), Some("2"));
    assert_eq!(syllables[1].wordpos, Some(WordPos::Initial));

    let total: usize = score
        .measures
        .iter()
        .flat_map(|m| &m.staves)
        .flat_map(|s| &s.layers)
        .flat_map(|l| &l.events)
        .map(|e| e.syllables.len())
        .sum();
    assert_eq!(total, 14);
}

// ─── Failures ───────────────────────────────────────────────────────

#[test]
fn parse_rejects_malformed_documents() {
    assert!(matches!(parse_mei("<mei><music>"), Err(ParseError::InvalidXml(_))));
    assert_eq!(
        parse_mei("<music/>").unwrap_err(),
        ParseError::UnsupportedRoot("music".into())
    );
    assert_eq!(
        parse_mei("<mei><meiHead/></mei>").unwrap_err(),
        ParseError::MissingElement("score".into())
    );
}

#[test]
fn parse_missing_file_reports_path() {
    let path = sheetmusic_dir().join("does-not-exist.mei");
    match parse_file(&path) {
        Err(Error::Io { path: reported, .. }) => assert!(reported.ends_with("does-not-exist.mei")),
        other => panic!("expected an I/O error, got {:?}", other.map(|s| s.measure_count())),
    }
}

#[test]
fn score_serializes_to_json() {
    let score = load("lyrics.mei");
    let json = meiscore::score_to_json(&score).expect("score should serialize");
    assert!(json.contains("\"title\": \"Twinkle\""));
    assert!(json.contains("\"wordpos\": \"Initial\""));
}
