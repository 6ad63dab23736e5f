//! MEI parser — converts an MEI document into the Score data model.

use roxmltree::{Document, Node};

use crate::error::ParseError;
use crate::model::*;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse an MEI XML string into a Score.
pub fn parse_mei(xml: &str) -> Result<Score, ParseError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| ParseError::InvalidXml(e.to_string()))?;
    let root = doc.root_element();

    if root.tag_name().name() != "mei" {
        return Err(ParseError::UnsupportedRoot(root.tag_name().name().to_string()));
    }

    let mut score = Score::new();
    score.version = root.attribute("meiversion").map(String::from);

    if let Some(head) = child_named(&root, "meiHead") {
        parse_head(&head, &mut score);
    }

    let score_node = root
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "score")
        .ok_or_else(|| ParseError::MissingElement("score".into()))?;

    let mut walker = BodyWalker::new(&mut score);
    walker.walk(&score_node);

    Ok(score)
}

// ─── Header ──────────────────────────────────────────────────────────

fn parse_head(node: &Node, score: &mut Score) {
    for child in node.descendants().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "title" if score.title.is_none() => {
                score.title = Some(text_content(&child)).filter(|t| !t.is_empty());
            }
            "composer" if score.composer.is_none() => {
                score.composer = Some(text_content(&child)).filter(|t| !t.is_empty());
            }
            "persName" if score.composer.is_none() => {
                if child.attribute("role") == Some("composer") {
                    score.composer = Some(text_content(&child)).filter(|t| !t.is_empty());
                }
            }
            _ => {}
        }
    }
}

// ─── Body ────────────────────────────────────────────────────────────

/// Walks the score body in document order, carrying staff definition
/// changes and system breaks forward to the next measure.
struct BodyWalker<'s> {
    score: &'s mut Score,
    pending_changes: Vec<StaffDef>,
    pending_break: bool,
    seen_measure: bool,
}

impl<'s> BodyWalker<'s> {
    fn new(score: &'s mut Score) -> Self {
        Self {
            score,
            pending_changes: Vec::new(),
            pending_break: false,
            seen_measure: false,
        }
    }

    fn walk(&mut self, node: &Node) {
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "scoreDef" => self.score_def(&child),
                "staffDef" if self.seen_measure => {
                    let def = read_staff_def(&child, None);
                    self.push_change(def);
                }
                "sb" | "pb" => {
                    if self.seen_measure {
                        self.pending_break = true;
                    }
                }
                "measure" => {
                    let index = self.score.measures.len();
                    let mut measure = parse_measure(&child, index);
                    measure.new_system = self.pending_break;
                    measure.staff_def_changes = std::mem::take(&mut self.pending_changes);
                    self.pending_break = false;
                    self.seen_measure = true;
                    self.score.measures.push(measure);
                }
                "section" | "ending" | "lem" | "rdg" | "app" => self.walk(&child),
                _ => {}
            }
        }
    }

    fn score_def(&mut self, node: &Node) {
        let (defs, groups) = parse_score_def(node);
        if !self.seen_measure && self.score.staff_defs.is_empty() {
            self.score.staff_defs = defs;
            self.score.staff_groups = groups;
            return;
        }

        if defs.is_empty() {
            // scoreDef-level change without staffDefs applies to every staff
            let template = read_staff_def(node, None);
            let numbers: Vec<u32> = self.score.staff_defs.iter().map(|d| d.n).collect();
            for n in numbers {
                self.push_change(StaffDef { n, ..template.clone() });
            }
        } else {
            for def in defs {
                self.push_change(def);
            }
        }
    }

    fn push_change(&mut self, def: StaffDef) {
        if let Some(existing) = self.pending_changes.iter_mut().find(|d| d.n == def.n) {
            *existing = existing.merged_with(&def);
        } else {
            self.pending_changes.push(def);
        }
    }
}

// ─── Score / staff definitions ───────────────────────────────────────

fn parse_score_def(node: &Node) -> (Vec<StaffDef>, Vec<StaffGroup>) {
    let template = read_staff_def(node, None);
    let mut defs = Vec::new();
    let mut groups = Vec::new();

    for child in node.descendants().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "staffDef" => {
                let own = read_staff_def(&child, None);
                let mut def = template.merged_with(&own);
                def.n = own.n;
                defs.push(def);
            }
            "staffGrp" => {
                let staves: Vec<u32> = child
                    .descendants()
                    .filter(|n| n.is_element() && n.tag_name().name() == "staffDef")
                    .filter_map(|n| parse_attr(&n, "n"))
                    .collect();
                if staves.is_empty() {
                    continue;
                }
                groups.push(StaffGroup {
                    symbol: child.attribute("symbol").map(String::from),
                    barthru: child.attribute("barthru") == Some("true"),
                    staves,
                });
            }
            _ => {}
        }
    }

    (defs, groups)
}

/// Read clef, key and meter information from a staffDef or scoreDef,
/// accepting both attribute and child element encodings.
fn read_staff_def(node: &Node, default_n: Option<u32>) -> StaffDef {
    let mut def = StaffDef::new(parse_attr(node, "n").or(default_n).unwrap_or(0));
    def.label = attr_string(node, "label");
    def.label_abbr = attr_string(node, "label.abbr");
    def.lines = parse_attr(node, "lines");
    def.clef_shape = attr_string(node, "clef.shape");
    def.clef_line = parse_attr(node, "clef.line");
    def.clef_dis = parse_attr(node, "clef.dis");
    def.clef_dis_place = attr_string(node, "clef.dis.place");
    def.key_pname = attr_string(node, "key.pname");
    def.key_accid = attr_string(node, "key.accid");
    def.key_mode = attr_string(node, "key.mode");
    def.meter_count = parse_attr(node, "meter.count");
    def.meter_unit = parse_attr(node, "meter.unit");

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "label" if def.label.is_none() => {
                def.label = Some(text_content(&child)).filter(|t| !t.is_empty());
            }
            "labelAbbr" if def.label_abbr.is_none() => {
                def.label_abbr = Some(text_content(&child)).filter(|t| !t.is_empty());
            }
            "clef" => {
                def.clef_shape = attr_string(&child, "shape").or(def.clef_shape);
                def.clef_line = parse_attr(&child, "line").or(def.clef_line);
                def.clef_dis = parse_attr(&child, "dis").or(def.clef_dis);
                def.clef_dis_place = attr_string(&child, "dis.place").or(def.clef_dis_place);
            }
            "keySig" => {
                def.key_pname = attr_string(&child, "pname").or(def.key_pname);
                def.key_accid = attr_string(&child, "accid").or(def.key_accid);
                def.key_mode = attr_string(&child, "mode").or(def.key_mode);
            }
            "meterSig" => {
                def.meter_count = parse_attr(&child, "count").or(def.meter_count);
                def.meter_unit = parse_attr(&child, "unit").or(def.meter_unit);
            }
            _ => {}
        }
    }

    def
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node, index: usize) -> Measure {
    let n = parse_attr(node, "n").unwrap_or(index as u32 + 1);
    let mut measure = Measure {
        n,
        id: xml_id(node),
        width: node
            .attribute("width")
            .and_then(|w| w.trim().parse::<f64>().ok())
            .filter(|w| w.is_finite() && *w > 0.0),
        left: attr_string(node, "left"),
        right: attr_string(node, "right"),
        ..Default::default()
    };

    for child in node.children().filter(|n| n.is_element()) {
        let name = child.tag_name().name();
        if name == "staff" {
            measure.staves.push(parse_staff(&child, n));
        } else if let Some(kind) = control_kind(name) {
            measure.controls.push(parse_control(&child, kind));
        }
    }

    measure
}

fn parse_staff(node: &Node, measure_n: u32) -> Staff {
    let n = parse_attr(node, "n").unwrap_or(1);
    let layers = node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "layer")
        .enumerate()
        .map(|(i, layer)| {
            let layer_n: Option<u32> = parse_attr(&layer, "n");
            let mut ctx = IdContext {
                prefix: format!("m{}s{}l{}", measure_n, n, layer_n.unwrap_or(i as u32 + 1)),
                counter: 0,
            };
            let mut events = Vec::new();
            collect_events(&layer, false, None, &mut ctx, &mut events);
            Layer { n: layer_n, events }
        })
        .collect();

    Staff { n, layers }
}

// ─── Layer events ────────────────────────────────────────────────────

/// Generates stable ids for events that carry no xml:id.
struct IdContext {
    prefix: String,
    counter: usize,
}

impl IdContext {
    fn id_for(&mut self, node: &Node) -> String {
        self.counter += 1;
        xml_id(node).unwrap_or_else(|| format!("{}e{}", self.prefix, self.counter))
    }
}

fn collect_events(
    node: &Node,
    grace: bool,
    tuplet: Option<TupletRatio>,
    ctx: &mut IdContext,
    out: &mut Vec<Event>,
) {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beam" | "fTrem" | "bTrem" => collect_events(&child, grace, tuplet, ctx, out),
            "tuplet" => {
                let ratio = TupletRatio::new(parse_attr(&child, "num"), parse_attr(&child, "numbase"));
                let inner = match (tuplet, ratio) {
                    (Some(outer), Some(ratio)) => Some(outer.nested(ratio)),
                    (outer, ratio) => ratio.or(outer),
                };
                collect_events(&child, grace, inner, ctx, out);
            }
            "graceGrp" => collect_events(&child, true, tuplet, ctx, out),
            "note" | "rest" | "chord" | "space" | "mRest" | "mSpace" => {
                if let Some(event) = parse_event(&child, grace, tuplet, ctx) {
                    out.push(event);
                }
            }
            _ => {}
        }
    }
}

fn parse_event(
    node: &Node,
    grace: bool,
    tuplet: Option<TupletRatio>,
    ctx: &mut IdContext,
) -> Option<Event> {
    let id = ctx.id_for(node);
    let kind = match node.tag_name().name() {
        "note" => match parse_pitch(node) {
            Some(pitch) => EventKind::Note(pitch),
            // Percussion and other notes placed by staff position only
            None => EventKind::Unpitched { loc: parse_attr(node, "loc") },
        },
        "chord" => {
            let pitches: Vec<Pitch> = node
                .children()
                .filter(|c| c.is_element() && c.tag_name().name() == "note")
                .filter_map(|c| parse_pitch(&c))
                .collect();
            if pitches.is_empty() {
                return None;
            }
            EventKind::Chord(pitches)
        }
        "rest" => EventKind::Rest,
        "mRest" => EventKind::MeasureRest,
        _ => EventKind::Space,
    };

    let dur = parse_attr(node, "dur").or_else(|| {
        // Chords may leave @dur to their notes
        node.children()
            .filter(|c| c.is_element() && c.tag_name().name() == "note")
            .find_map(|c| parse_attr(&c, "dur"))
    });

    Some(Event {
        id,
        kind,
        dur,
        dots: parse_attr(node, "dots").unwrap_or(0),
        tuplet,
        grace: grace || node.attribute("grace").is_some(),
        stem_dir: attr_string(node, "stem.dir"),
        syllables: parse_syllables(node),
    })
}

fn parse_pitch(node: &Node) -> Option<Pitch> {
    let pname = node.attribute("pname")?.to_lowercase();
    let oct = parse_attr(node, "oct")?;
    let accid = attr_string(node, "accid").or_else(|| {
        node.children()
            .filter(|c| c.is_element() && c.tag_name().name() == "accid")
            .find_map(|c| attr_string(&c, "accid"))
    });
    Some(Pitch { pname, oct, accid })
}

fn parse_syllables(node: &Node) -> Vec<Syllable> {
    node.descendants()
        .filter(|d| d.is_element() && d.tag_name().name() == "syl")
        .map(|syl| {
            let verse = syl
                .parent_element()
                .filter(|p| p.tag_name().name() == "verse")
                .and_then(|p| attr_string(&p, "n"));
            Syllable {
                verse,
                text: text_content(&syl),
                wordpos: syl.attribute("wordpos").and_then(WordPos::from_mei),
            }
        })
        .filter(|s| !s.text.is_empty())
        .collect()
}

// ─── Control events ──────────────────────────────────────────────────

fn control_kind(name: &str) -> Option<ControlKind> {
    Some(match name {
        "dynam" => ControlKind::Dynam,
        "dir" => ControlKind::Dir,
        "fermata" => ControlKind::Fermata,
        "trill" => ControlKind::Trill,
        "mordent" => ControlKind::Mordent,
        "turn" => ControlKind::Turn,
        "arpeg" => ControlKind::Arpeg,
        "hairpin" => ControlKind::Hairpin,
        "slur" => ControlKind::Slur,
        "tie" => ControlKind::Tie,
        "tempo" => ControlKind::Tempo,
        "reh" => ControlKind::Reh,
        _ => return None,
    })
}

fn parse_control(node: &Node, kind: ControlKind) -> ControlEvent {
    let attrs = node
        .attributes()
        .map(|a| {
            let key = if a.namespace() == Some(XML_NS) {
                format!("xml:{}", a.name())
            } else {
                a.name().to_string()
            };
            (key, a.value().to_string())
        })
        .collect();

    ControlEvent {
        kind,
        attrs,
        text: node
            .descendants()
            .filter(|d| d.is_text())
            .filter_map(|d| d.text())
            .collect::<String>(),
        source: describe_element(node),
    }
}

/// Render the start tag of an element, e.g. `<dynam staff="1" tstamp="2">`.
fn describe_element(node: &Node) -> String {
    let mut out = format!("<{}", node.tag_name().name());
    for a in node.attributes() {
        let prefix = if a.namespace() == Some(XML_NS) { "xml:" } else { "" };
        out.push_str(&format!(" {}{}=\"{}\"", prefix, a.name(), a.value()));
    }
    out.push('>');
    out
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn child_named<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.tag_name().name() == name)
}

fn xml_id(node: &Node) -> Option<String> {
    node.attribute((XML_NS, "id"))
        .or_else(|| node.attribute("id"))
        .map(String::from)
}

fn attr_string(node: &Node, name: &str) -> Option<String> {
    node.attribute(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_attr<T: std::str::FromStr>(node: &Node, name: &str) -> Option<T> {
    node.attribute(name).and_then(|v| v.trim().parse().ok())
}

fn text_content(node: &Node) -> String {
    node.descendants()
        .filter(|d| d.is_text())
        .filter_map(|d| d.text())
        .collect::<String>()
        .trim()
        .to_string()
}
