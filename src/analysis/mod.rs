//! Parsing of the backend's semi-structured analysis text
//!
//! The feasibility analysis comes back as loosely formatted prose:
//! numbered section headings ("1. Scientific"), "Label: value" lines, and
//! nested cost sub-items under the capital-estimate label. This module
//! turns that into a tagged tree the display layer can walk. Parsing is
//! total: malformed input degrades to plain lines, never an error.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.\s*(.*)$").expect("valid heading regex"))
}

fn label_re() -> &'static Regex {
    // Label characters are deliberately narrow, and the colon must end the
    // line or be followed by whitespace, so SMILES strings and URLs
    // containing ':' never false-match.
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9 \-&]+:)(?:\s+(.*))?$").expect("valid label regex")
    })
}

fn capital_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)perkiraan\s+modal").expect("valid marker regex"))
}

fn absorb_allowlist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(sa score:|estimasi modal:)").expect("valid allowlist regex"))
}

/// Strips the decorative emphasis markers (runs of `*`) carried over from
/// the source text. Idempotent.
pub fn strip_markers(text: &str) -> String {
    text.chars().filter(|c| *c != '*').collect()
}

fn strip_bullet(text: &str) -> &str {
    match text.strip_prefix('•') {
        Some(rest) if rest.starts_with(' ') => rest.trim_start_matches(' '),
        _ => text,
    }
}

/// One heading-delimited block of the analysis text.
///
/// `heading` is `None` only for the synthetic fallback section emitted when
/// no numbered heading matched anywhere in the input. Body lines are
/// trimmed; blank lines are kept as empty strings to preserve vertical
/// spacing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Section {
    pub heading: Option<String>,
    pub body: Vec<String>,
}

impl Section {
    fn is_empty(&self) -> bool {
        self.heading.is_none() && self.body.is_empty()
    }
}

/// The parsed analysis: an optional intro paragraph (text preceding the
/// first numbered heading) plus the sections in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedAnalysis {
    pub intro: Option<String>,
    pub sections: Vec<Section>,
}

/// Splits analysis text into an intro block and numbered sections.
///
/// Sections partition the input lines in order; every non-blank line lands
/// in exactly one section or in the intro. Never fails.
pub fn parse(raw: &str) -> ParsedAnalysis {
    let text = raw.replace('\r', "");
    let lines: Vec<String> = text.split('\n').map(|l| l.replace('\t', "    ")).collect();

    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section::default();
    let mut intro: Vec<String> = Vec::new();
    let mut first_heading_found = false;

    for line in &lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            // Blank lines are spacers, but only once there is something to
            // space: an open section after the first heading, or a
            // non-empty intro before it.
            if first_heading_found {
                if !current.is_empty() {
                    current.body.push(String::new());
                }
            } else if !intro.is_empty() {
                intro.push(String::new());
            }
            continue;
        }

        if let Some(caps) = heading_re().captures(trimmed) {
            first_heading_found = true;
            if !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            let heading = format!("{}. {}", &caps[1], &caps[2]);
            current = Section {
                heading: Some(strip_markers(heading.trim())),
                body: Vec::new(),
            };
        } else if !first_heading_found {
            intro.push(trimmed.to_string());
        } else {
            current.body.push(trimmed.to_string());
        }
    }
    if !current.is_empty() {
        sections.push(current);
    }

    if sections.is_empty() {
        sections.push(Section {
            heading: None,
            body: lines.iter().map(|l| l.trim().to_string()).collect(),
        });
    }

    let intro_text = intro
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| strip_bullet(&strip_markers(t)).to_string())
        .collect::<Vec<_>>()
        .join(" ");

    ParsedAnalysis {
        intro: if intro_text.is_empty() { None } else { Some(intro_text) },
        sections,
    }
}

/// A classified body line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Line {
    /// `"Label: content"`; `label` keeps its trailing colon. `children`
    /// holds sub-items absorbed under a capital-estimate label and is
    /// empty everywhere else.
    Labeled {
        label: String,
        content: String,
        children: Vec<String>,
    },
    /// Anything that did not match the label pattern.
    Plain { text: String },
    /// Structural spacer; renders as empty space.
    Blank,
}

/// Classifies a section body into display lines.
///
/// A labeled line whose label contains the capital-estimate marker absorbs
/// immediately following allow-listed labeled lines (`SA Score:`,
/// `Estimasi Modal:`) as nested children, skipping blanks in between.
/// Absorbed lines are removed from the remaining output so each input line
/// renders exactly once.
pub fn classify(body: &[String]) -> Vec<Line> {
    let mut out = Vec::new();
    let mut absorbed = vec![false; body.len()];

    for idx in 0..body.len() {
        if absorbed[idx] {
            continue;
        }
        let ln = &body[idx];
        if ln.is_empty() {
            out.push(Line::Blank);
            continue;
        }

        let Some(caps) = label_re().captures(ln) else {
            out.push(Line::Plain {
                text: strip_markers(ln),
            });
            continue;
        };

        let label = strip_markers(&caps[1]);
        let content = caps
            .get(2)
            .map(|m| strip_markers(m.as_str()))
            .unwrap_or_default();
        let mut children = Vec::new();

        if capital_marker_re().is_match(&label) {
            let mut j = idx + 1;
            while j < body.len() {
                let cand = &body[j];
                if cand.is_empty() {
                    j += 1;
                    continue;
                }
                if label_re().is_match(cand) && absorb_allowlist_re().is_match(cand) {
                    children.push(strip_markers(cand));
                    absorbed[j] = true;
                    j += 1;
                    continue;
                }
                break;
            }
        }

        out.push(Line::Labeled {
            label,
            content,
            children,
        });
    }

    out
}

/// The analysis portion of a generation response: either free text or a
/// mapping from category name to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisPayload {
    Text(String),
    Categorized(Vec<(String, String)>),
}

impl AnalysisPayload {
    /// Resolves an arbitrary JSON value into a payload.
    ///
    /// Strings get one JSON-parse attempt: a JSON object inside the string
    /// becomes a categorized payload, anything else (including parse
    /// failure) stays plain text. Native objects are categorized directly;
    /// arrays and scalars are pretty-printed into the text pipeline.
    /// Returns `None` for null or empty payloads.
    pub fn from_value(value: &Value) -> Option<AnalysisPayload> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Some(Self::categorized(&map)),
                _ => Some(AnalysisPayload::Text(s.clone())),
            },
            Value::Object(map) => Some(Self::categorized(map)),
            other => Some(AnalysisPayload::Text(pretty(other))),
        }
    }

    fn categorized(map: &serde_json::Map<String, Value>) -> AnalysisPayload {
        let entries = map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => pretty(other),
                };
                (strip_markers(k), strip_markers(&text))
            })
            .collect();
        AnalysisPayload::Categorized(entries)
    }

    /// Runs every textual part of the payload through the section parser.
    pub fn parse_blocks(&self) -> Vec<AnalysisBlock> {
        match self {
            AnalysisPayload::Text(text) => vec![AnalysisBlock {
                category: None,
                parsed: parse(text),
            }],
            AnalysisPayload::Categorized(entries) => entries
                .iter()
                .map(|(category, text)| AnalysisBlock {
                    category: Some(category.clone()),
                    parsed: parse(text),
                })
                .collect(),
        }
    }

    /// The raw text a "copy analysis" action would put on the clipboard.
    pub fn raw_text(&self) -> String {
        match self {
            AnalysisPayload::Text(text) => text.clone(),
            AnalysisPayload::Categorized(entries) => entries
                .iter()
                .map(|(k, v)| format!("{k}\n{v}"))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// One rendered block: a category tag (for mapped payloads) plus its
/// parsed sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisBlock {
    pub category: Option<String>,
    pub parsed: ParsedAnalysis,
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_heading_segmentation_is_deterministic() {
        let parsed = parse("1. A\nx\n2. B\ny");
        assert_eq!(parsed.intro, None);
        assert_eq!(
            parsed.sections,
            vec![
                Section {
                    heading: Some("1. A".to_string()),
                    body: body(&["x"]),
                },
                Section {
                    heading: Some("2. B".to_string()),
                    body: body(&["y"]),
                },
            ]
        );
    }

    #[test]
    fn test_no_heading_falls_back_to_single_section() {
        let parsed = parse("alpha\nbeta\n\ngamma");
        assert_eq!(parsed.sections.len(), 1);
        let section = &parsed.sections[0];
        assert_eq!(section.heading, None);
        assert_eq!(section.body, body(&["alpha", "beta", "", "gamma"]));
    }

    #[test]
    fn test_intro_precedes_first_heading() {
        let parsed = parse("• some **context** here\nmore intro\n\n1. First\nNote: ok");
        assert_eq!(parsed.intro.as_deref(), Some("some context here more intro"));
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].heading.as_deref(), Some("1. First"));
    }

    #[test]
    fn test_blank_lines_preserved_inside_sections() {
        let parsed = parse("1. A\nx\n\n\ny");
        assert_eq!(parsed.sections[0].body, body(&["x", "", "", "y"]));
    }

    #[test]
    fn test_tabs_expand_and_carriage_returns_drop() {
        let parsed = parse("1. A\r\n\tx\r");
        assert_eq!(parsed.sections[0].body, body(&["x"]));
    }

    #[test]
    fn test_label_detection() {
        let lines = classify(&body(&["Estimasi Modal: $500k"]));
        assert_eq!(
            lines,
            vec![Line::Labeled {
                label: "Estimasi Modal:".to_string(),
                content: "$500k".to_string(),
                children: vec![],
            }]
        );

        let lines = classify(&body(&["smi:c1ccccc1:extra"]));
        assert_eq!(
            lines,
            vec![Line::Plain {
                text: "smi:c1ccccc1:extra".to_string(),
            }]
        );
    }

    #[test]
    fn test_label_colon_needs_trailing_space_or_eol() {
        // no whitespace after the colon: a SMILES-like token, not a label
        let lines = classify(&body(&["smi:c1ccccc1"]));
        assert_eq!(
            lines,
            vec![Line::Plain {
                text: "smi:c1ccccc1".to_string(),
            }]
        );

        // colon at end of line: a label with empty content
        let lines = classify(&body(&["Catatan:"]));
        assert_eq!(
            lines,
            vec![Line::Labeled {
                label: "Catatan:".to_string(),
                content: String::new(),
                children: vec![],
            }]
        );
    }

    #[test]
    fn test_bare_colon_is_not_a_label() {
        let lines = classify(&body(&[":"]));
        assert_eq!(lines, vec![Line::Plain { text: ":".to_string() }]);
    }

    #[test]
    fn test_nested_absorption() {
        let lines = classify(&body(&[
            "Perkiraan Modal: tinggi",
            "SA Score: 4.2",
            "Estimasi Modal: $500k",
            "Risiko: rendah",
        ]));
        assert_eq!(
            lines,
            vec![
                Line::Labeled {
                    label: "Perkiraan Modal:".to_string(),
                    content: "tinggi".to_string(),
                    children: vec!["SA Score: 4.2".to_string(), "Estimasi Modal: $500k".to_string()],
                },
                Line::Labeled {
                    label: "Risiko:".to_string(),
                    content: "rendah".to_string(),
                    children: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_absorption_skips_blanks_and_stops_at_non_allowlisted() {
        let lines = classify(&body(&[
            "Perkiraan Modal & Kompleksitas: sedang",
            "",
            "SA Score: 2.1",
            "Aplikasi: Farmasi",
            "Estimasi Modal: $100k",
        ]));
        // Absorption crossed the blank, took SA Score, and stopped at
        // Aplikasi; the later Estimasi Modal stays top-level.
        assert_eq!(
            lines,
            vec![
                Line::Labeled {
                    label: "Perkiraan Modal & Kompleksitas:".to_string(),
                    content: "sedang".to_string(),
                    children: vec!["SA Score: 2.1".to_string()],
                },
                Line::Blank,
                Line::Labeled {
                    label: "Aplikasi:".to_string(),
                    content: "Farmasi".to_string(),
                    children: vec![],
                },
                Line::Labeled {
                    label: "Estimasi Modal:".to_string(),
                    content: "$100k".to_string(),
                    children: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_marker_stripping_is_idempotent() {
        let once = strip_markers("**Hasil Molekul:** CCO");
        let twice = strip_markers(&once);
        assert_eq!(once, "Hasil Molekul: CCO");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_payload_from_plain_string() {
        let payload = AnalysisPayload::from_value(&json!("1. Scientific\nName: Ethanol"));
        assert_eq!(
            payload,
            Some(AnalysisPayload::Text("1. Scientific\nName: Ethanol".to_string()))
        );
    }

    #[test]
    fn test_payload_from_json_encoded_map() {
        let raw = r#"{"Economic":"SA Score: 2.0","Scientific":"Name: Ethanol"}"#;
        let payload = AnalysisPayload::from_value(&json!(raw)).expect("payload");
        let AnalysisPayload::Categorized(entries) = payload else {
            panic!("expected categorized payload");
        };
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|(k, _)| k == "Scientific"));
    }

    #[test]
    fn test_payload_from_invalid_json_string_stays_text() {
        let payload = AnalysisPayload::from_value(&json!("{not json"));
        assert_eq!(payload, Some(AnalysisPayload::Text("{not json".to_string())));
    }

    #[test]
    fn test_payload_null_and_empty_are_absent() {
        assert_eq!(AnalysisPayload::from_value(&Value::Null), None);
        assert_eq!(AnalysisPayload::from_value(&json!("")), None);
    }

    #[test]
    fn test_categorized_object_values_pretty_print() {
        let payload =
            AnalysisPayload::from_value(&json!({"Detail": {"score": 1}})).expect("payload");
        let AnalysisPayload::Categorized(entries) = payload else {
            panic!("expected categorized payload");
        };
        assert!(entries[0].1.contains("\"score\": 1"));
    }

    #[test]
    fn test_raw_text_joins_categories() {
        let payload = AnalysisPayload::Categorized(vec![
            ("Scientific".to_string(), "Name: Ethanol".to_string()),
            ("Economic".to_string(), "SA Score: 2.0".to_string()),
        ]);
        assert_eq!(
            payload.raw_text(),
            "Scientific\nName: Ethanol\n\nEconomic\nSA Score: 2.0"
        );

        let text = AnalysisPayload::Text("as is".to_string());
        assert_eq!(text.raw_text(), "as is");
    }

    #[test]
    fn test_parse_blocks_for_categorized_payload() {
        let payload = AnalysisPayload::Categorized(vec![(
            "Economic".to_string(),
            "1. Cost\nSA Score: 2.0".to_string(),
        )]);
        let blocks = payload.parse_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].category.as_deref(), Some("Economic"));
        assert_eq!(blocks[0].parsed.sections[0].heading.as_deref(), Some("1. Cost"));
    }
}
