//! SVG builder — the drawing context every primitive draws into.
//!
//! Accumulates SVG elements and produces the final string.

use super::constants::*;

// ═══════════════════════════════════════════════════════════════════════
// SvgBuilder
// ═══════════════════════════════════════════════════════════════════════

pub struct SvgBuilder {
    elements: Vec<String>,
    width: f64,
    height: f64,
}

impl SvgBuilder {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            elements: Vec::new(),
            width,
            height,
        }
    }

    /// Number of elements drawn so far.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn build(self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}" style="font-family: 'Georgia', 'Times New Roman', serif;">"#,
            self.width, self.height, self.width, self.height
        );
        svg.push('\n');
        for el in &self.elements {
            svg.push_str("  ");
            svg.push_str(el);
            svg.push('\n');
        }
        svg.push_str("</svg>\n");
        svg
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: &str, width: f64) {
        self.elements.push(format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="{:.1}" stroke-linecap="round"/>"#,
            x1, y1, x2, y2, color, width
        ));
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str, stroke: &str, stroke_width: f64) {
        if stroke_width > 0.0 {
            self.elements.push(format!(
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" stroke="{}" stroke-width="{:.1}"/>"#,
                x, y, w, h, fill, stroke, stroke_width
            ));
        } else {
            self.elements.push(format!(
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
                x, y, w, h, fill
            ));
        }
    }

    pub fn circle(&mut self, cx: f64, cy: f64, r: f64, fill: &str) {
        self.elements.push(format!(
            r#"<circle cx="{:.1}" cy="{:.1}" r="{:.1}" fill="{}"/>"#,
            cx, cy, r, fill
        ));
    }

    pub fn text(&mut self, x: f64, y: f64, content: &str, size: f64, weight: &str, fill: &str, anchor: &str) {
        self.elements.push(format!(
            r#"<text x="{:.1}" y="{:.1}" font-size="{:.0}" font-weight="{}" fill="{}" text-anchor="{}">{}</text>"#,
            x, y, size, weight, fill, anchor, escape(content)
        ));
    }

    /// Text with an explicit font family and style.
    pub fn styled_text(
        &mut self, x: f64, y: f64, content: &str, size: f64, weight: &str,
        fill: &str, anchor: &str, family: &str, style: &str,
    ) {
        self.elements.push(format!(
            r#"<text x="{:.1}" y="{:.1}" font-family="{}" font-size="{:.0}" font-weight="{}" font-style="{}" fill="{}" text-anchor="{}">{}</text>"#,
            x, y, escape(family), size, weight, style, fill, anchor, escape(content)
        ));
    }

    pub fn path(&mut self, d: &str, fill: &str, stroke: &str, stroke_width: f64) {
        self.elements.push(format!(
            r#"<path d="{}" fill="{}" stroke="{}" stroke-width="{:.1}" stroke-linecap="round"/>"#,
            d, fill, stroke, stroke_width
        ));
    }

    pub fn notehead(&mut self, cx: f64, cy: f64, filled: bool) {
        let rx = NOTEHEAD_RX;
        let ry = NOTEHEAD_RY;
        if filled {
            self.elements.push(format!(
                r#"<ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="{}" stroke="none" transform="rotate(-15,{:.1},{:.1})"/>"#,
                cx, cy, rx, ry, NOTE_COLOR, cx, cy
            ));
        } else {
            let sw = 2.0;
            self.elements.push(format!(
                r#"<ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="none" stroke="{}" stroke-width="{:.1}" transform="rotate(-15,{:.1},{:.1})"/>"#,
                cx, cy, rx - sw / 2.0, ry - sw / 2.0, NOTE_COLOR, sw, cx, cy
            ));
        }
    }

    /// Notehead of a grace note.
    pub fn small_notehead(&mut self, cx: f64, cy: f64, filled: bool) {
        let (rx, ry) = (NOTEHEAD_RX * 0.65, NOTEHEAD_RY * 0.65);
        let fill = if filled { NOTE_COLOR } else { "none" };
        self.elements.push(format!(
            r#"<ellipse cx="{:.1}" cy="{:.1}" rx="{:.1}" ry="{:.1}" fill="{}" stroke="{}" stroke-width="1.0" transform="rotate(-15,{:.1},{:.1})"/>"#,
            cx, cy, rx, ry, fill, NOTE_COLOR, cx, cy
        ));
    }

    /// Draw a music symbol from the Unicode musical symbols block.
    pub fn glyph(&mut self, x: f64, y: f64, symbol: &str, size: f64) {
        self.elements.push(format!(
            r#"<text x="{:.1}" y="{:.1}" font-size="{:.0}" fill="{}" text-anchor="middle">{}</text>"#,
            x, y, size, NOTE_COLOR, symbol
        ));
    }

    /// Open a group carrying a class and id, e.g. for a measure.
    pub fn open_group(&mut self, class: &str, id: Option<&str>) {
        match id {
            Some(id) => self.elements.push(format!(r#"<g class="{}" id="{}">"#, class, escape(id))),
            None => self.elements.push(format!(r#"<g class="{}">"#, class)),
        }
    }

    pub fn close_group(&mut self) {
        self.elements.push("</g>".into());
    }
}

fn escape(content: &str) -> String {
    content
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ═══════════════════════════════════════════════════════════════════════
// Empty SVG fallback
// ═══════════════════════════════════════════════════════════════════════

pub(super) fn empty_svg(message: &str) -> String {
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 400 100\">\
         <text x=\"200\" y=\"50\" text-anchor=\"middle\" font-size=\"14\" fill=\"gray\">{}</text>\
         </svg>",
        escape(message)
    )
}
