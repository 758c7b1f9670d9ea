// ── List file format ──
//
// UTF-8 text. An optional leading block of `# key[: value]` lines carries
// list information; every other non-blank, non-`#` line is a record of the
// form `id[;display name]`. Editing helpers rewrite only record lines and
// keep everything else byte for byte.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::model::ServerId;

// ── Information header ──────────────────────────────────────────────

/// An `#RRGGBB` colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 3]);

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02X}{g:02X}{b:02X}")
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("expected #RRGGBB, got {s:?}"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| format!("invalid colour {s:?}: {e}"))
        };
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Presentation and visibility settings from a list's header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListInformation {
    pub label: Option<String>,
    pub color: Option<Color>,
    /// Keep the list out of the "all sources" view.
    pub hidden: bool,
    /// Entries in the list are hidden everywhere.
    pub excluded: bool,
}

impl ListInformation {
    /// Whether a change between `self` and `other` affects what users see.
    pub fn visibility_differs(&self, other: &Self) -> bool {
        self.hidden != other.hidden || self.excluded != other.excluded
    }

    /// Header lines, one per set field, each ending in a newline.
    pub fn to_header(&self) -> String {
        let mut out = String::new();
        if let Some(label) = &self.label {
            out.push_str(&format!("# label: {label}\n"));
        }
        if let Some(color) = self.color {
            out.push_str(&format!("# color: {color}\n"));
        }
        if self.hidden {
            out.push_str("# hidden: true\n");
        }
        if self.excluded {
            out.push_str("# excluded: true\n");
        }
        out
    }

    fn apply(&mut self, key: &str, value: Option<&str>) {
        match key {
            "label" => self.label = value.filter(|v| !v.is_empty()).map(str::to_owned),
            "color" | "colour" => self.color = value.and_then(|v| v.parse().ok()),
            "hidden" => self.hidden = parse_flag(value),
            "excluded" => self.excluded = parse_flag(value),
            _ => {}
        }
    }
}

/// A bare key counts as set.
fn parse_flag(value: Option<&str>) -> bool {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("" | "1" | "true" | "yes" | "on") => true,
        Some(_) => false,
    }
}

fn header_entry(line: &str) -> Option<(String, Option<&str>)> {
    let body = line.trim_start().strip_prefix('#')?.trim();
    let (key, value) = match body.split_once(':') {
        Some((k, v)) => (k.trim(), Some(v.trim())),
        None => (body, None),
    };
    let key = key.to_ascii_lowercase();
    key.chars()
        .all(|c| c.is_ascii_alphabetic())
        .then_some((key, value))
}

// ── Records ─────────────────────────────────────────────────────────

/// One `id[;display name]` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRecord {
    pub id: ServerId,
    pub display_name: Option<String>,
}

impl ListRecord {
    pub fn new(id: ServerId, display_name: Option<String>) -> Self {
        Self { id, display_name }
    }

    pub fn to_line(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{};{}", self.id, name.replace(['\n', '\r'], " ")),
            None => self.id.to_string(),
        }
    }
}

fn parse_record(line: &str) -> Option<ListRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (id, name) = match line.split_once(';') {
        Some((id, name)) => (id, Some(name.trim()).filter(|n| !n.is_empty())),
        None => (line, None),
    };
    let id = ServerId::new(id);
    (!id.is_empty()).then(|| ListRecord::new(id, name.map(str::to_owned)))
}

// ── Whole files ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedList {
    pub information: ListInformation,
    /// File order, first occurrence of each id.
    pub records: Vec<ListRecord>,
}

pub fn parse_list(content: &str) -> ParsedList {
    let mut parsed = ParsedList::default();
    let mut in_header = true;
    let mut seen = HashSet::new();

    for line in content.lines() {
        if in_header {
            if let Some((key, value)) = header_entry(line) {
                parsed.information.apply(&key, value);
                continue;
            }
            if line.trim_start().starts_with('#') {
                continue;
            }
            in_header = false;
        }
        if let Some(record) = parse_record(line) {
            if seen.insert(record.id.clone()) {
                parsed.records.push(record);
            }
        }
    }
    parsed
}

pub fn render_list(information: &ListInformation, records: &[ListRecord]) -> String {
    let mut out = information.to_header();
    for record in records {
        out.push_str(&record.to_line());
        out.push('\n');
    }
    out
}

/// Append a record line. `None` if the id is already listed.
pub fn with_record_added(content: &str, record: &ListRecord) -> Option<String> {
    if parse_list(content).records.iter().any(|r| r.id == record.id) {
        return None;
    }
    let mut out = content.to_owned();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&record.to_line());
    out.push('\n');
    Some(out)
}

/// Drop every record line for `id`. `None` if there was none.
pub fn with_record_removed(content: &str, id: &ServerId) -> Option<String> {
    let mut removed = false;
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if parse_record(line).is_some_and(|r| &r.id == id) {
            removed = true;
            continue;
        }
        out.push_str(line);
    }
    removed.then_some(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn header_and_record_round_trip() {
        let information = ListInformation {
            label: Some("Test".into()),
            color: Some("#FF0000".parse().unwrap()),
            ..ListInformation::default()
        };
        let content = render_list(
            &information,
            &[ListRecord::new(ServerId::new("abc123"), Some("My Server".into()))],
        );

        let parsed = parse_list(&content);
        assert_eq!(parsed.information.label.as_deref(), Some("Test"));
        assert_eq!(parsed.information.color, Some(Color([0xFF, 0, 0])));
        assert_eq!(parsed.information.color.unwrap().to_string(), "#FF0000");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].id.as_str(), "abc123");
        assert_eq!(parsed.records[0].display_name.as_deref(), Some("My Server"));
    }

    #[test]
    fn hash_lines_after_header_are_comments() {
        let content = "# label: Friends\n# hidden\n# some note\n\n10.0.0.1:8081\n# excluded: true\n10.0.0.2:8081;B\n";
        let parsed = parse_list(content);
        assert_eq!(parsed.information.label.as_deref(), Some("Friends"));
        assert!(parsed.information.hidden);
        assert!(!parsed.information.excluded);
        assert_eq!(parsed.records.len(), 2);
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let parsed = parse_list("A:1;first\na:1;second\n b:2 \n;nameless\n");
        assert_eq!(
            parsed.records,
            vec![
                ListRecord::new(ServerId::new("a:1"), Some("first".into())),
                ListRecord::new(ServerId::new("b:2"), None),
            ]
        );
    }

    #[test]
    fn boolean_like_flags() {
        let parsed = parse_list("# hidden: no\n# excluded: YES\n");
        assert!(!parsed.information.hidden);
        assert!(parsed.information.excluded);
    }

    #[test]
    fn add_and_remove_preserve_other_lines() {
        let original = "# label: Favs\n# keep me\n10.0.0.1:8081;One\n\n10.0.0.2:8081";
        let record = ListRecord::new(ServerId::new("10.0.0.3:8081"), Some("Three".into()));

        let added = with_record_added(original, &record).unwrap();
        assert!(added.ends_with("10.0.0.2:8081\n10.0.0.3:8081;Three\n"));
        assert!(with_record_added(&added, &record).is_none());

        let removed = with_record_removed(&added, &ServerId::new("10.0.0.1:8081")).unwrap();
        assert_eq!(removed, "# label: Favs\n# keep me\n\n10.0.0.2:8081\n10.0.0.3:8081;Three\n");
        assert!(with_record_removed(&removed, &ServerId::new("10.0.0.1:8081")).is_none());
    }

    #[test]
    fn invalid_colour_is_ignored() {
        assert!(parse_list("# color: red\n").information.color.is_none());
        assert!("#12345".parse::<Color>().is_err());
    }

    #[test]
    fn colour_channels_must_be_plain_hex_digits() {
        assert!("#+F+F+F".parse::<Color>().is_err());
        assert!("#-1FFFF".parse::<Color>().is_err());
        assert_eq!("#00ff7F".parse::<Color>(), Ok(Color([0, 0xFF, 0x7F])));
    }
}
