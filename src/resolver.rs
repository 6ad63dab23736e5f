//! Reference resolution — maps `@startid`/`@endid` or `@tstamp`/`@tstamp2`
//! of a control event to the id of an event in a layer.

use crate::error::LayoutError;
use crate::model::{ControlEvent, EventKind, Measure};
use crate::staff_info::StaffInfos;

const ONSET_EPSILON: f64 = 1e-6;

/// Strip the `#` of a direct id reference (`"#n12"` → `"n12"`).
pub fn strip_id_ref(value: &str) -> &str {
    value.strip_prefix('#').unwrap_or(value)
}

/// Staff and layer a control event refers to: the first number of
/// `@staff` and `@layer`, both defaulting to 1.
pub fn target_staff_layer(control: &ControlEvent) -> (u32, u32) {
    let first = |name: &str| {
        control
            .attr(name)
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    };
    (first("staff"), first("layer"))
}

/// Resolve the start of a control event within its own measure.
///
/// Returns `Ok(None)` when neither `@startid` nor `@tstamp` is present.
pub fn resolve_start(
    control: &ControlEvent,
    measure: &Measure,
    infos: &StaffInfos,
) -> Result<Option<String>, LayoutError> {
    if let Some(id) = control.attr("startid") {
        return Ok(Some(strip_id_ref(id).to_string()));
    }
    let Some(tstamp) = control.attr("tstamp") else {
        return Ok(None);
    };
    let (staff, layer) = target_staff_layer(control);
    tstamp_to_id(parse_tstamp(tstamp)?, staff, layer, measure, infos).map(Some)
}

/// Resolve the end of a spanning control event found in `measures[index]`.
///
/// `@endid` is taken verbatim; `@tstamp2` may point into a later measure,
/// which is resolved against the staff definitions in force there.
pub fn resolve_end(
    control: &ControlEvent,
    measures: &[Measure],
    index: usize,
    infos: &StaffInfos,
) -> Result<Option<String>, LayoutError> {
    if let Some(id) = control.attr("endid") {
        return Ok(Some(strip_id_ref(id).to_string()));
    }
    let Some(raw) = control.attr("tstamp2") else {
        return Ok(None);
    };
    let (offset, beat) =
        parse_tstamp2(raw).ok_or_else(|| LayoutError::InvalidTimestamp(raw.to_string()))?;
    let target = index + offset as usize;
    let measure = measures
        .get(target)
        .ok_or_else(|| LayoutError::InvalidTimestamp(raw.to_string()))?;

    let (staff, layer) = target_staff_layer(control);
    if offset == 0 {
        return tstamp_to_id(beat, staff, layer, measure, infos).map(Some);
    }
    let later = infos.advanced_through(&measures[index + 1..=target])?;
    tstamp_to_id(beat, staff, layer, measure, &later).map(Some)
}

pub fn parse_tstamp(value: &str) -> Result<f64, LayoutError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| LayoutError::InvalidTimestamp(value.to_string()))
}

/// Parse `@tstamp2` ("2m+3.5") into a measure offset and a beat. A value
/// without a measure part stays in the current measure.
pub fn parse_tstamp2(value: &str) -> Option<(u32, f64)> {
    let value = value.trim();
    let (measures, beat) = match value.split_once("m+") {
        Some((m, b)) => (m.trim().parse().ok()?, b),
        None => (0, value),
    };
    let beat: f64 = beat.trim().parse().ok()?;
    beat.is_finite().then_some((measures, beat))
}

/// Id of the event of `staff_n`/`layer_n` in `measure` that sounds at
/// `tstamp` (1-based beats of the staff's meter).
///
/// Grace notes take no time and are never targeted. The event whose onset
/// is nearest wins; on a tie the earlier one.
pub fn tstamp_to_id(
    tstamp: f64,
    staff_n: u32,
    layer_n: u32,
    measure: &Measure,
    infos: &StaffInfos,
) -> Result<String, LayoutError> {
    let missing_layer = || LayoutError::MissingLayer {
        measure: measure.n,
        staff: staff_n,
        layer: layer_n,
    };
    let layer = measure
        .staff(staff_n)
        .ok_or_else(missing_layer)?
        .layer(layer_n)
        .ok_or_else(missing_layer)?;

    let info = infos
        .get(staff_n)
        .ok_or(LayoutError::MissingStaffDefinition { staff: staff_n })?;
    let (count, unit) = info
        .time_spec()
        .valid()
        .ok_or(LayoutError::InvalidMeter { staff: staff_n })?;

    let mut onset = 1.0;
    let mut best: Option<(f64, &str)> = None;
    for event in layer.events.iter().filter(|e| e.is_timed()) {
        let dist = (onset - tstamp).abs();
        if best.map_or(true, |(d, _)| dist < d - ONSET_EPSILON) {
            best = Some((dist, event.id.as_str()));
        }
        onset += match event.kind {
            EventKind::MeasureRest | EventKind::Space if event.dur.is_none() => count as f64,
            _ => event.beats(unit),
        };
    }

    best.map(|(_, id)| id.to_string())
        .ok_or(LayoutError::NoEventAtTimestamp { measure: measure.n, staff: staff_n, tstamp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Layer, Pitch, Staff, StaffDef};

    fn quarter(id: &str) -> Event {
        Event {
            id: id.into(),
            kind: EventKind::Note(Pitch { pname: "c".into(), oct: 4, accid: None }),
            dur: Some(4),
            dots: 0,
            tuplet: None,
            grace: false,
            stem_dir: None,
            syllables: Vec::new(),
        }
    }

    fn measure_with(events: Vec<Event>, layer_n: Option<u32>) -> Measure {
        Measure {
            n: 1,
            staves: vec![Staff { n: 1, layers: vec![Layer { n: layer_n, events }] }],
            ..Default::default()
        }
    }

    fn three_four() -> StaffInfos {
        let def = StaffDef { meter_count: Some(3), meter_unit: Some(4), ..StaffDef::new(1) };
        StaffInfos::from_score_defs(&[def])
    }

    fn control(attrs: &[(&str, &str)]) -> ControlEvent {
        ControlEvent {
            kind: crate::model::ControlKind::Dynam,
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            text: String::new(),
            source: "<dynam>".into(),
        }
    }

    #[test]
    fn direct_reference_strips_hash() {
        assert_eq!(strip_id_ref("#abc123"), "abc123");
        assert_eq!(strip_id_ref("abc123"), "abc123");
    }

    #[test]
    fn tstamp_is_deterministic() {
        let measure = measure_with(vec![quarter("a"), quarter("b"), quarter("c")], Some(1));
        let infos = three_four();
        for _ in 0..3 {
            assert_eq!(tstamp_to_id(2.0, 1, 1, &measure, &infos).unwrap(), "b");
        }
        assert_eq!(tstamp_to_id(1.0, 1, 1, &measure, &infos).unwrap(), "a");
        assert_eq!(tstamp_to_id(3.0, 1, 1, &measure, &infos).unwrap(), "c");
    }

    #[test]
    fn tstamp_ties_go_to_earlier_event() {
        let measure = measure_with(vec![quarter("a"), quarter("b"), quarter("c")], Some(1));
        assert_eq!(tstamp_to_id(1.5, 1, 1, &measure, &three_four()).unwrap(), "a");
        assert_eq!(tstamp_to_id(9.0, 1, 1, &measure, &three_four()).unwrap(), "c");
    }

    #[test]
    fn grace_notes_are_skipped() {
        let mut grace = quarter("g");
        grace.grace = true;
        let measure = measure_with(vec![grace, quarter("a"), quarter("b")], Some(1));
        assert_eq!(tstamp_to_id(1.0, 1, 1, &measure, &three_four()).unwrap(), "a");
    }

    #[test]
    fn unnumbered_layer_is_used_as_fallback() {
        let measure = measure_with(vec![quarter("a"), quarter("b")], None);
        assert_eq!(tstamp_to_id(2.0, 1, 1, &measure, &three_four()).unwrap(), "b");
    }

    #[test]
    fn structural_failures_are_typed() {
        let measure = measure_with(vec![quarter("a")], Some(1));
        assert_eq!(
            tstamp_to_id(1.0, 2, 1, &measure, &three_four()),
            Err(LayoutError::MissingLayer { measure: 1, staff: 2, layer: 1 })
        );
        assert_eq!(
            tstamp_to_id(1.0, 1, 1, &measure, &StaffInfos::default()),
            Err(LayoutError::MissingStaffDefinition { staff: 1 })
        );
        let no_meter = StaffInfos::from_score_defs(&[StaffDef::new(1)]);
        assert_eq!(
            tstamp_to_id(1.0, 1, 1, &measure, &no_meter),
            Err(LayoutError::InvalidMeter { staff: 1 })
        );
    }

    #[test]
    fn start_prefers_startid_over_tstamp() {
        let measure = measure_with(vec![quarter("a"), quarter("b")], Some(1));
        let infos = three_four();
        let both = control(&[("startid", "#a"), ("tstamp", "2")]);
        assert_eq!(resolve_start(&both, &measure, &infos).unwrap().as_deref(), Some("a"));
        let neither = control(&[("staff", "1")]);
        assert_eq!(resolve_start(&neither, &measure, &infos).unwrap(), None);
        let bad = control(&[("tstamp", "two")]);
        assert!(resolve_start(&bad, &measure, &infos).unwrap_err().is_recoverable());
    }

    #[test]
    fn tstamp2_reaches_into_later_measures() {
        assert_eq!(parse_tstamp2("1m+2.5"), Some((1, 2.5)));
        assert_eq!(parse_tstamp2("3"), Some((0, 3.0)));
        assert_eq!(parse_tstamp2("xm+1"), None);

        let first = measure_with(vec![quarter("a"), quarter("b"), quarter("c")], Some(1));
        let mut second = measure_with(vec![quarter("d"), quarter("e"), quarter("f")], Some(1));
        second.n = 2;
        let measures = vec![first, second];
        let hairpin = control(&[("tstamp", "1"), ("tstamp2", "1m+3")]);
        let end = resolve_end(&hairpin, &measures, 0, &three_four()).unwrap();
        assert_eq!(end.as_deref(), Some("f"));

        let past_end = control(&[("tstamp2", "2m+1")]);
        assert!(resolve_end(&past_end, &measures, 0, &three_four()).is_err());
    }
}
