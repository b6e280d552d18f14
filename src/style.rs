use crate::types::Color;

/// One paint slot (fill or stroke): either nothing, a solid color, or a
/// reference to a Defs entry by name (`url(#name)`).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PaintRef {
    #[default]
    None,
    Color(Color),
    Ref(String),
}

impl PaintRef {
    pub fn is_none(&self) -> bool {
        matches!(self, PaintRef::None)
    }

    pub fn ref_name(&self) -> Option<&str> {
        match self {
            PaintRef::Ref(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAnchor {
    #[default]
    Start,
    Middle,
    End,
}

/// Resolved paint properties of one node after the style pass. Line cap and
/// join use the painter's numeric convention: 0 butt/miter, 1 round,
/// 2 square/bevel.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintStyle {
    pub fill: PaintRef,
    pub stroke: PaintRef,
    pub stroke_width: f32,
    pub line_cap: u8,
    pub line_join: u8,
    pub miter_limit: f32,
    pub dash_pattern: Vec<f32>,
    pub dash_offset: f32,
    pub fill_rule_evenodd: bool,
    pub fill_opacity: f32,
    pub stroke_opacity: f32,
    /// Per-node group opacity; not inherited, applied as a layer by Render.
    pub group_opacity: f32,
    /// The CSS `color` value, resolved for `currentColor` paints.
    pub color: Color,
    pub font_family: String,
    pub font_size: f32,
    pub text_anchor: TextAnchor,
    pub marker_start: Option<String>,
    pub marker_mid: Option<String>,
    pub marker_end: Option<String>,
    pub clip_path: Option<String>,
}

impl Default for PaintStyle {
    fn default() -> Self {
        // SVG defaults: black fill, no stroke.
        Self {
            fill: PaintRef::Color(Color::BLACK),
            stroke: PaintRef::None,
            stroke_width: 1.0,
            line_cap: 0,
            line_join: 0,
            miter_limit: 4.0,
            dash_pattern: Vec::new(),
            dash_offset: 0.0,
            fill_rule_evenodd: false,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
            group_opacity: 1.0,
            color: Color::BLACK,
            font_family: "sans-serif".to_string(),
            font_size: 16.0,
            text_anchor: TextAnchor::Start,
            marker_start: None,
            marker_mid: None,
            marker_end: None,
            clip_path: None,
        }
    }
}

impl PaintStyle {
    /// Seed for a child node: the parent's resolved style with the
    /// non-inherited properties reset.
    pub fn inherited(&self) -> PaintStyle {
        let mut out = self.clone();
        out.group_opacity = 1.0;
        out.clip_path = None;
        out
    }

    /// A node with neither fill nor stroke paint draws nothing and is
    /// skipped by the BBoxes and Render passes.
    pub fn renders(&self) -> bool {
        !self.fill.is_none() || (!self.stroke.is_none() && self.stroke_width > 0.0)
    }
}

/// `(ids, classes, tags)` in cascade order; derives lexicographic `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity(pub u16, pub u16, pub u16);

/// A single simple selector: `tag`, `.class`, `#id`, or a tag with
/// class/id suffixes. Combinators are out of scope for this cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

impl Selector {
    pub fn specificity(&self) -> Specificity {
        Specificity(
            self.id.is_some() as u16,
            self.classes.len() as u16,
            self.tag.is_some() as u16,
        )
    }

    pub fn matches(&self, tag: &str, name: &str, classes: &[String]) -> bool {
        if let Some(sel_tag) = &self.tag {
            if !sel_tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(sel_id) = &self.id {
            if sel_id != name {
                return false;
            }
        }
        self.classes
            .iter()
            .all(|wanted| classes.iter().any(|have| have == wanted))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CssRule {
    pub selector: Selector,
    pub declarations: Vec<(String, String)>,
    pub order: usize,
}

/// Flat rule list aggregated down the tree: ancestor rules first, so equal
/// specificity resolves to the nearest (later) declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<CssRule>,
}

impl Stylesheet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Parses rule text (`selector { decls } ...`) and appends the rules.
    /// Unparsable selectors and empty blocks are dropped.
    pub fn append_css(&mut self, css: &str) {
        let mut order = self.rules.len();
        let mut rest = css;
        loop {
            let Some(open) = rest.find('{') else { break };
            let Some(close_rel) = rest[open + 1..].find('}') else {
                break;
            };
            let selectors = &rest[..open];
            let body = &rest[open + 1..open + 1 + close_rel];
            let declarations = parse_declarations(body);
            if !declarations.is_empty() {
                for raw in selectors.split(',') {
                    if let Some(selector) = parse_selector(raw) {
                        self.rules.push(CssRule {
                            selector,
                            declarations: declarations.clone(),
                            order,
                        });
                    }
                }
            }
            order += 1;
            rest = &rest[open + 1 + close_rel + 1..];
        }
    }

    /// Merged copy used for descendants: `self`'s rules followed by `other`'s,
    /// orders rebased so later sheets win ties.
    pub fn merged(&self, other: &Stylesheet) -> Stylesheet {
        let mut out = self.clone();
        let base = out.rules.len();
        for rule in &other.rules {
            let mut rule = rule.clone();
            rule.order += base;
            out.rules.push(rule);
        }
        out
    }

    /// Applies every matching rule to `style` in increasing specificity
    /// (ties broken by order), so later/more specific declarations win.
    pub fn apply(&self, tag: &str, name: &str, classes: &[String], style: &mut PaintStyle) {
        if self.rules.is_empty() {
            return;
        }
        let mut matched: Vec<&CssRule> = self
            .rules
            .iter()
            .filter(|rule| rule.selector.matches(tag, name, classes))
            .collect();
        if matched.is_empty() {
            return;
        }
        matched.sort_by(|a, b| {
            a.selector
                .specificity()
                .cmp(&b.selector.specificity())
                .then(a.order.cmp(&b.order))
        });
        for rule in matched {
            apply_declarations(style, &rule.declarations);
        }
    }
}

fn parse_selector(raw: &str) -> Option<Selector> {
    let token = raw.trim();
    if token.is_empty() || token.split_whitespace().count() != 1 {
        // No descendant combinators in this cascade.
        return None;
    }
    if token.contains([':', '[', ']', '>', '+', '~']) {
        return None;
    }

    let bytes = token.as_bytes();
    let mut i = 0usize;
    let mut tag = None;
    let mut id = None;
    let mut classes = Vec::new();

    if bytes[0] == b'*' {
        i = 1;
    } else if bytes[0].is_ascii_alphabetic() || bytes[0] == b'_' {
        let start = i;
        while i < bytes.len() && is_ident_char(bytes[i]) {
            i += 1;
        }
        tag = Some(token[start..i].to_ascii_lowercase());
    }

    while i < bytes.len() {
        let kind = bytes[i];
        if kind != b'.' && kind != b'#' {
            return None;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && is_ident_char(bytes[i]) {
            i += 1;
        }
        if start == i {
            return None;
        }
        let ident = token[start..i].to_string();
        if kind == b'.' {
            classes.push(ident);
        } else {
            if id.is_some() {
                return None;
            }
            id = Some(ident);
        }
    }

    if tag.is_none() && id.is_none() && classes.is_empty() {
        return None;
    }
    Some(Selector { tag, id, classes })
}

fn is_ident_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'_' | b'-')
}

/// `prop: value; prop: value` into normalized key/value pairs.
pub fn parse_declarations(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for decl in input.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((key, value)) = decl.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        out.push((key, value.to_string()));
    }
    out
}

/// Applies a declaration list to a style. Unknown properties and unparsable
/// values keep the current (inherited or default) value.
pub fn apply_declarations(style: &mut PaintStyle, declarations: &[(String, String)]) {
    for (key, value) in declarations {
        apply_declaration(style, key, value);
    }
}

pub fn apply_declaration(style: &mut PaintStyle, key: &str, value: &str) {
    let val = value.trim();
    match key {
        "fill" => {
            if let Some(paint) = parse_paint(val, style.color) {
                style.fill = paint;
            }
        }
        "stroke" => {
            if let Some(paint) = parse_paint(val, style.color) {
                style.stroke = paint;
            }
        }
        "color" => {
            if let Some(c) = parse_color(val) {
                style.color = c;
            }
        }
        "stroke-width" => {
            if let Some(v) = parse_number(val) {
                style.stroke_width = v.max(0.0);
            }
        }
        "stroke-miterlimit" => {
            if let Some(v) = parse_number(val) {
                style.miter_limit = v.max(0.0);
            }
        }
        "stroke-linecap" => {
            style.line_cap = match val {
                "round" => 1,
                "square" => 2,
                _ => 0,
            };
        }
        "stroke-linejoin" => {
            style.line_join = match val {
                "round" => 1,
                "bevel" => 2,
                _ => 0,
            };
        }
        "stroke-dasharray" => {
            if val.eq_ignore_ascii_case("none") {
                style.dash_pattern.clear();
            } else {
                style.dash_pattern = parse_length_list(val);
                if style.dash_pattern.len() % 2 == 1 {
                    let dup = style.dash_pattern.clone();
                    style.dash_pattern.extend_from_slice(&dup);
                }
            }
        }
        "stroke-dashoffset" => {
            if let Some(v) = parse_number(val) {
                style.dash_offset = v;
            }
        }
        "fill-rule" => {
            style.fill_rule_evenodd = val.eq_ignore_ascii_case("evenodd");
        }
        "opacity" => {
            if let Some(v) = parse_number(val) {
                style.group_opacity = v.clamp(0.0, 1.0);
            }
        }
        "fill-opacity" => {
            if let Some(v) = parse_number(val) {
                style.fill_opacity = v.clamp(0.0, 1.0);
            }
        }
        "stroke-opacity" => {
            if let Some(v) = parse_number(val) {
                style.stroke_opacity = v.clamp(0.0, 1.0);
            }
        }
        "font-family" => {
            style.font_family = val.trim_matches(['"', '\'']).to_string();
        }
        "font-size" => {
            if let Some(v) = parse_number(val) {
                style.font_size = v.max(0.0);
            }
        }
        "text-anchor" => {
            style.text_anchor = match val {
                "middle" => TextAnchor::Middle,
                "end" => TextAnchor::End,
                _ => TextAnchor::Start,
            };
        }
        "marker-start" => style.marker_start = parse_marker_ref(val),
        "marker-mid" => style.marker_mid = parse_marker_ref(val),
        "marker-end" => style.marker_end = parse_marker_ref(val),
        "clip-path" => style.clip_path = parse_url_ref(val),
        _ => {}
    }
}

fn parse_marker_ref(value: &str) -> Option<String> {
    if value.eq_ignore_ascii_case("none") {
        return None;
    }
    parse_url_ref(value)
}

fn parse_paint(input: &str, current_color: Color) -> Option<PaintRef> {
    let v = input.trim();
    if v.eq_ignore_ascii_case("none") {
        return Some(PaintRef::None);
    }
    if v.eq_ignore_ascii_case("currentcolor") {
        return Some(PaintRef::Color(current_color));
    }
    if let Some(name) = parse_url_ref(v) {
        return Some(PaintRef::Ref(name));
    }
    parse_color(v).map(PaintRef::Color)
}

/// `url(#name)` → `name`. Quotes inside the parentheses are tolerated.
pub fn parse_url_ref(input: &str) -> Option<String> {
    let s = input.trim();
    if !s.to_ascii_lowercase().starts_with("url(") {
        return None;
    }
    let open = s.find('(')?;
    let close = s.rfind(')')?;
    if close <= open + 1 {
        return None;
    }
    let inner = s[open + 1..close]
        .trim()
        .trim_matches('"')
        .trim_matches('\'');
    let name = inner.strip_prefix('#')?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

pub fn parse_color(input: &str) -> Option<Color> {
    let v = input.trim();
    if v.eq_ignore_ascii_case("none") {
        return None;
    }
    if let Some(hex) = v.strip_prefix('#') {
        match hex.len() {
            6 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                return Some(Color::from_u8(r, g, b));
            }
            3 => {
                let r = u8::from_str_radix(&hex[0..1], 16).ok()?;
                let g = u8::from_str_radix(&hex[1..2], 16).ok()?;
                let b = u8::from_str_radix(&hex[2..3], 16).ok()?;
                return Some(Color::from_u8(r * 17, g * 17, b * 17));
            }
            _ => return None,
        }
    }
    if let Some(rest) = v
        .strip_prefix("rgba")
        .or_else(|| v.strip_prefix("rgb"))
        .or_else(|| v.strip_prefix("RGBA"))
        .or_else(|| v.strip_prefix("RGB"))
    {
        let inner = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
        let mut channels = [0.0f32; 3];
        let mut parts = inner.split(',');
        for channel in &mut channels {
            let part = parts.next()?.trim();
            *channel = if let Some(pct) = part.strip_suffix('%') {
                (pct.trim().parse::<f32>().ok()? / 100.0).clamp(0.0, 1.0)
            } else {
                (part.parse::<f32>().ok()? / 255.0).clamp(0.0, 1.0)
            };
        }
        // The alpha component, when present, is ignored: alpha rides on the
        // opacity properties in this engine.
        return Some(Color::rgb(channels[0], channels[1], channels[2]));
    }
    named_color(v)
}

fn named_color(name: &str) -> Option<Color> {
    let c = |r, g, b| Some(Color::from_u8(r, g, b));
    match name.to_ascii_lowercase().as_str() {
        "black" => c(0, 0, 0),
        "white" => c(255, 255, 255),
        "red" => c(255, 0, 0),
        "green" => c(0, 128, 0),
        "lime" => c(0, 255, 0),
        "blue" => c(0, 0, 255),
        "yellow" => c(255, 255, 0),
        "cyan" | "aqua" => c(0, 255, 255),
        "magenta" | "fuchsia" => c(255, 0, 255),
        "gray" | "grey" => c(128, 128, 128),
        "darkgray" | "darkgrey" => c(169, 169, 169),
        "lightgray" | "lightgrey" => c(211, 211, 211),
        "silver" => c(192, 192, 192),
        "maroon" => c(128, 0, 0),
        "olive" => c(128, 128, 0),
        "navy" => c(0, 0, 128),
        "purple" => c(128, 0, 128),
        "teal" => c(0, 128, 128),
        "orange" => c(255, 165, 0),
        "brown" => c(165, 42, 42),
        "pink" => c(255, 192, 203),
        "gold" => c(255, 215, 0),
        "indigo" => c(75, 0, 130),
        "violet" => c(238, 130, 238),
        "khaki" => c(240, 230, 140),
        "coral" => c(255, 127, 80),
        "salmon" => c(250, 128, 114),
        "turquoise" => c(64, 224, 208),
        "crimson" => c(220, 20, 60),
        "transparent" => None,
        _ => None,
    }
}

/// Parses a numeric attribute value, tolerating common unit suffixes
/// (treated as user units).
pub fn parse_number(input: &str) -> Option<f32> {
    let s = input.trim();
    let s = s
        .trim_end_matches("px")
        .trim_end_matches("pt")
        .trim_end_matches("mm")
        .trim_end_matches("cm")
        .trim_end_matches("in")
        .trim_end_matches('%')
        .trim();
    s.parse::<f32>().ok()
}

pub fn parse_length_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(parse_number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_black_fill_no_stroke() {
        let style = PaintStyle::default();
        assert_eq!(style.fill, PaintRef::Color(Color::BLACK));
        assert!(style.stroke.is_none());
        assert!(style.renders());
    }

    #[test]
    fn none_fill_and_stroke_is_non_rendering() {
        let mut style = PaintStyle::default();
        apply_declaration(&mut style, "fill", "none");
        assert!(!style.renders());
        apply_declaration(&mut style, "stroke", "red");
        assert!(style.renders());
    }

    #[test]
    fn inherited_resets_group_opacity_and_clip() {
        let mut style = PaintStyle::default();
        style.group_opacity = 0.5;
        style.clip_path = Some("cut".to_string());
        style.stroke_width = 3.0;
        let child = style.inherited();
        assert_eq!(child.group_opacity, 1.0);
        assert!(child.clip_path.is_none());
        assert_eq!(child.stroke_width, 3.0);
    }

    #[test]
    fn parse_color_forms() {
        assert_eq!(parse_color("#ff0000"), Some(Color::from_u8(255, 0, 0)));
        assert_eq!(parse_color("#f00"), Some(Color::from_u8(255, 0, 0)));
        assert_eq!(
            parse_color("rgb(0, 128, 255)"),
            Some(Color::from_u8(0, 128, 255))
        );
        assert_eq!(
            parse_color("rgb(100%, 0%, 50%)"),
            Some(Color::rgb(1.0, 0.0, 0.5))
        );
        assert_eq!(parse_color("teal"), Some(Color::from_u8(0, 128, 128)));
        assert_eq!(parse_color("none"), None);
        assert_eq!(parse_color("bogus"), None);
    }

    #[test]
    fn rgba_alpha_component_is_ignored() {
        assert_eq!(
            parse_color("rgba(255, 0, 0, 0.5)"),
            Some(Color::from_u8(255, 0, 0))
        );
    }

    #[test]
    fn paint_url_reference() {
        let mut style = PaintStyle::default();
        apply_declaration(&mut style, "fill", "url(#grad1)");
        assert_eq!(style.fill.ref_name(), Some("grad1"));
    }

    #[test]
    fn current_color_resolves_against_color_property() {
        let mut style = PaintStyle::default();
        apply_declaration(&mut style, "color", "#336699");
        apply_declaration(&mut style, "stroke", "currentColor");
        assert_eq!(style.stroke, PaintRef::Color(Color::from_u8(0x33, 0x66, 0x99)));
    }

    #[test]
    fn odd_dash_pattern_is_doubled() {
        let mut style = PaintStyle::default();
        apply_declaration(&mut style, "stroke-dasharray", "5 2 1");
        assert_eq!(style.dash_pattern, vec![5.0, 2.0, 1.0, 5.0, 2.0, 1.0]);
        apply_declaration(&mut style, "stroke-dasharray", "none");
        assert!(style.dash_pattern.is_empty());
    }

    #[test]
    fn selector_specificity_order() {
        let tag = parse_selector("rect").unwrap();
        let class = parse_selector(".warm").unwrap();
        let id = parse_selector("#rect3").unwrap();
        assert!(tag.specificity() < class.specificity());
        assert!(class.specificity() < id.specificity());
    }

    #[test]
    fn selector_with_combinator_is_dropped() {
        assert!(parse_selector("g rect").is_none());
        assert!(parse_selector("rect:hover").is_none());
        assert!(parse_selector("rect.warm").is_some());
    }

    #[test]
    fn cascade_later_and_more_specific_wins() {
        let mut sheet = Stylesheet::default();
        sheet.append_css(
            "rect { fill: red; stroke-width: 2 } \
             .warm { fill: orange } \
             #rect3 { fill: blue }",
        );
        let mut style = PaintStyle::default();
        sheet.apply("rect", "rect3", &["warm".to_string()], &mut style);
        assert_eq!(style.fill, PaintRef::Color(Color::from_u8(0, 0, 255)));
        assert_eq!(style.stroke_width, 2.0);
    }

    #[test]
    fn cascade_ancestor_sheet_loses_ties_to_own() {
        let mut ancestor = Stylesheet::default();
        ancestor.append_css("rect { fill: red }");
        let mut own = Stylesheet::default();
        own.append_css("rect { fill: green }");
        let merged = ancestor.merged(&own);
        let mut style = PaintStyle::default();
        merged.apply("rect", "rect1", &[], &mut style);
        assert_eq!(style.fill, PaintRef::Color(Color::from_u8(0, 128, 0)));
    }

    #[test]
    fn class_selector_requires_all_classes() {
        let sel = parse_selector(".a.b").unwrap();
        let a = "a".to_string();
        let b = "b".to_string();
        assert!(sel.matches("rect", "rect1", &[a.clone(), b.clone()]));
        assert!(!sel.matches("rect", "rect1", &[a]));
    }

    #[test]
    fn declaration_parsing_normalizes_keys() {
        let decls = parse_declarations("Fill : red ; stroke-width:2;;");
        assert_eq!(
            decls,
            vec![
                ("fill".to_string(), "red".to_string()),
                ("stroke-width".to_string(), "2".to_string())
            ]
        );
    }
}
