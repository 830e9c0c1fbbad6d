//! Hotspot filters
//!
//! Filters scan the current window image for regions of interest (URLs,
//! email addresses, user-defined regex matches) and annotate them as
//! hotspots carrying typed actions. The chain owns a flat text rendering
//! of the image plus per-line start offsets so match positions can be
//! mapped back to grid coordinates, wide characters included.
//!
//! Independently of regex scanning, hyperlinks announced by the
//! application through OSC 8 escapes are collected by [`UrlExtractor`].

use regex::Regex;
use tracing::debug;

use crate::character::{string_width, Character, LineProperty};
use crate::decoder::{PlainTextDecoder, TerminalCharacterDecoder};

/// What a hotspot represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotSpotKind {
    /// A clickable link (URL or email address).
    Link,
    /// A plain annotated region.
    Marker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotSpotActionKind {
    /// Hand the text to an external opener.
    Open,
    /// Deliver the text to the clipboard.
    Copy,
}

/// An action attached to a hotspot. The core only describes actions;
/// launching and clipboard access belong to the embedder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HotSpotAction {
    pub kind: HotSpotActionKind,
    pub label: String,
    /// Payload: the normalized URL for Open, the raw match for Copy.
    pub text: String,
}

/// An annotated region of the window image.
///
/// `end_column` is the column just past the last matched character, on
/// `end_line`.
#[derive(Clone, Debug)]
pub struct HotSpot {
    start_line: usize,
    start_column: usize,
    end_line: usize,
    end_column: usize,
    kind: HotSpotKind,
    captured_texts: Vec<String>,
    actions: Vec<HotSpotAction>,
}

impl HotSpot {
    pub fn start_line(&self) -> usize {
        self.start_line
    }

    pub fn start_column(&self) -> usize {
        self.start_column
    }

    pub fn end_line(&self) -> usize {
        self.end_line
    }

    pub fn end_column(&self) -> usize {
        self.end_column
    }

    pub fn kind(&self) -> HotSpotKind {
        self.kind
    }

    /// Captured texts of the match; index 0 is the whole match.
    pub fn captured_texts(&self) -> &[String] {
        &self.captured_texts
    }

    pub fn actions(&self) -> &[HotSpotAction] {
        &self.actions
    }

    /// Membership test in window coordinates.
    pub fn contains(&self, line: usize, column: usize) -> bool {
        if line < self.start_line || line > self.end_line {
            return false;
        }
        if self.start_line == line && self.start_column > column {
            return false;
        }
        if self.end_line == line && self.end_column < column {
            return false;
        }
        true
    }
}

/// A scanner over the chain's buffer.
pub trait Filter {
    /// Installs the flat text and the byte offset of each visual line.
    fn set_buffer(&mut self, buffer: &str, line_positions: &[usize]);

    /// Scans the buffer and populates the hotspot list.
    fn process(&mut self);

    /// Drops all hotspots.
    fn reset(&mut self);

    fn hotspots(&self) -> &[HotSpot];

    fn hotspot_at(&self, line: usize, column: usize) -> Option<&HotSpot> {
        self.hotspots().iter().find(|spot| spot.contains(line, column))
    }
}

/// Maps a byte position in `buffer` to `(line, column)` using the line
/// start offsets; the column accounts for wide characters.
fn line_column(buffer: &str, line_positions: &[usize], position: usize) -> Option<(usize, usize)> {
    for (i, start) in line_positions.iter().enumerate() {
        let next = if i == line_positions.len() - 1 {
            buffer.len() + 1
        } else {
            line_positions[i + 1]
        };
        if *start <= position && position < next {
            let column = string_width(&buffer[*start..position.min(buffer.len())]);
            return Some((i, column));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// regex filter

/// Scans the buffer with a compiled pattern; every match becomes one
/// hotspot.
pub struct RegexFilter {
    pattern: Regex,
    kind: HotSpotKind,
    actions_for: fn(&str) -> Vec<HotSpotAction>,
    buffer: String,
    line_positions: Vec<usize>,
    hotspots: Vec<HotSpot>,
}

fn no_actions(_text: &str) -> Vec<HotSpotAction> {
    Vec::new()
}

impl RegexFilter {
    pub fn new(pattern: Regex) -> Self {
        Self {
            pattern,
            kind: HotSpotKind::Marker,
            actions_for: no_actions,
            buffer: String::new(),
            line_positions: Vec::new(),
            hotspots: Vec::new(),
        }
    }

    fn with_kind(mut self, kind: HotSpotKind, actions_for: fn(&str) -> Vec<HotSpotAction>) -> Self {
        self.kind = kind;
        self.actions_for = actions_for;
        self
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }
}

impl Filter for RegexFilter {
    fn set_buffer(&mut self, buffer: &str, line_positions: &[usize]) {
        self.buffer = buffer.to_owned();
        self.line_positions = line_positions.to_owned();
    }

    fn process(&mut self) {
        if self.pattern.as_str().is_empty() {
            return;
        }

        for found in self.pattern.find_iter(&self.buffer) {
            // an empty match carries no region to annotate
            if found.range().is_empty() {
                continue;
            }

            let Some((start_line, start_column)) =
                line_column(&self.buffer, &self.line_positions, found.start())
            else {
                debug!(position = found.start(), "match start outside line map");
                continue;
            };
            let Some((end_line, end_column)) =
                line_column(&self.buffer, &self.line_positions, found.end())
            else {
                continue;
            };

            let text = found.as_str().to_owned();
            self.hotspots.push(HotSpot {
                start_line,
                start_column,
                end_line,
                end_column,
                kind: self.kind,
                actions: (self.actions_for)(&text),
                captured_texts: vec![text],
            });
        }
    }

    fn reset(&mut self) {
        self.hotspots.clear();
    }

    fn hotspots(&self) -> &[HotSpot] {
        &self.hotspots
    }
}

// ---------------------------------------------------------------------------
// URL filter

// Matches either a full URL (www. or scheme:// followed by anything other
// than whitespace, <, >, ' or ", not ending in common trailing
// punctuation) or an email address. Keep an eye on performance when
// touching these: overly general patterns scan the whole buffer.
const FULL_URL_PATTERN: &str = "(www\\.[^\\s<>'\"\\.]|[a-z][a-z0-9+.-]*://)[^\\s<>'\"]*[^!,\\.\\s<>'\"\\]\\):]";
const EMAIL_PATTERN: &str = "\\b(\\w|\\.|-|\\+)+@(\\w|\\.|-)+\\.\\w+\\b";

fn url_actions(text: &str) -> Vec<HotSpotAction> {
    let url = if text.contains("://") {
        text.to_owned()
    } else if text.starts_with("www.") {
        format!("http://{text}")
    } else {
        format!("mailto:{text}")
    };

    vec![
        HotSpotAction {
            kind: HotSpotActionKind::Open,
            label: "Open link".to_owned(),
            text: url,
        },
        HotSpotAction {
            kind: HotSpotActionKind::Copy,
            label: "Copy link address".to_owned(),
            text: text.to_owned(),
        },
    ]
}

/// The built-in URL and email matcher.
pub struct UrlFilter {
    inner: RegexFilter,
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlFilter {
    pub fn new() -> Self {
        let pattern = Regex::new(&format!("({FULL_URL_PATTERN}|{EMAIL_PATTERN})"))
            .expect("URL pattern must compile");
        Self {
            inner: RegexFilter::new(pattern).with_kind(HotSpotKind::Link, url_actions),
        }
    }
}

impl Filter for UrlFilter {
    fn set_buffer(&mut self, buffer: &str, line_positions: &[usize]) {
        self.inner.set_buffer(buffer, line_positions);
    }

    fn process(&mut self) {
        self.inner.process();
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn hotspots(&self) -> &[HotSpot] {
        self.inner.hotspots()
    }
}

// ---------------------------------------------------------------------------
// filter chain

/// Owns the filters and the shared text rendering of the window image.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
    buffer: String,
    line_positions: Vec<usize>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    /// Rebuilds the flat buffer from a window image. Wrapped lines are
    /// joined without a separator; hard line ends become newlines.
    pub fn set_image(
        &mut self,
        image: &[Character],
        lines: usize,
        columns: usize,
        line_properties: &[LineProperty],
    ) {
        self.buffer.clear();
        self.line_positions.clear();

        let mut decoder = PlainTextDecoder::new();
        for line in 0..lines {
            self.line_positions.push(self.buffer.len());

            let start = line * columns;
            let end = (start + columns).min(image.len());
            if start >= end {
                break;
            }
            decoder.decode_line(&mut self.buffer, &image[start..end], LineProperty::empty());

            let wrapped = line_properties
                .get(line)
                .is_some_and(|p| p.contains(LineProperty::WRAPPED));
            if !wrapped {
                self.buffer.push('\n');
            }
        }

        for filter in &mut self.filters {
            filter.reset();
            filter.set_buffer(&self.buffer, &self.line_positions);
        }
    }

    /// Runs every filter over the current buffer.
    pub fn process(&mut self) {
        for filter in &mut self.filters {
            filter.process();
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    pub fn hotspots(&self) -> Vec<&HotSpot> {
        self.filters.iter().flat_map(|f| f.hotspots()).collect()
    }

    pub fn hotspot_at(&self, line: usize, column: usize) -> Option<&HotSpot> {
        self.filters.iter().find_map(|f| f.hotspot_at(line, column))
    }
}

// ---------------------------------------------------------------------------
// OSC 8 URL extractor

/// A hyperlink range announced by the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedUrl {
    pub url: String,
    /// Absolute (line, column) of the first cell.
    pub begin: (usize, usize),
    /// Absolute (line, column) of the last cell.
    pub end: (usize, usize),
}

/// Collects OSC 8 hyperlink ranges in absolute history+screen coordinates.
///
/// The screen forwards `begin_url` / `append_text` / `end_url` while the
/// driver feeds it, and reports every history drop so ranges that scrolled
/// out are evicted.
#[derive(Default)]
pub struct UrlExtractor {
    urls: Vec<ExtractedUrl>,
    current: Option<ExtractedUrl>,
}

impl UrlExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a hyperlink is being written.
    pub fn reading(&self) -> bool {
        self.current.is_some()
    }

    pub fn begin_url(&mut self, url: &str, line: usize, column: usize) {
        // an unterminated link ends where the new one starts
        self.end_url();
        self.current = Some(ExtractedUrl {
            url: url.to_owned(),
            begin: (line, column),
            end: (line, column),
        });
    }

    /// Extends the open range to cover the cell just written.
    pub fn append_text(&mut self, line: usize, column: usize) {
        if let Some(current) = &mut self.current {
            current.end = (line, column);
        }
    }

    pub fn end_url(&mut self) {
        if let Some(current) = self.current.take() {
            self.urls.push(current);
        }
    }

    /// Evicts ranges that scrolled out of history and shifts the rest.
    pub fn history_lines_removed(&mut self, lines: usize) {
        self.urls.retain_mut(|url| {
            if url.end.0 < lines {
                return false;
            }
            url.begin.0 = url.begin.0.saturating_sub(lines);
            url.end.0 -= lines;
            true
        });
        if let Some(current) = &mut self.current {
            current.begin.0 = current.begin.0.saturating_sub(lines);
            current.end.0 = current.end.0.saturating_sub(lines);
        }
    }

    /// Completed ranges, oldest first.
    pub fn urls(&self) -> &[ExtractedUrl] {
        &self.urls
    }

    /// Ranges as hotspots, alongside the regex-derived ones. Coordinates
    /// stay absolute; the caller translates into window space.
    pub fn url_hotspots(&self) -> Vec<HotSpot> {
        self.urls
            .iter()
            .map(|url| HotSpot {
                start_line: url.begin.0,
                start_column: url.begin.1,
                end_line: url.end.0,
                end_column: url.end.1 + 1,
                kind: HotSpotKind::Link,
                captured_texts: vec![url.url.clone()],
                actions: url_actions(&url.url),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{DEFAULT_CHAR, DEFAULT_RENDITION, LINE_DEFAULT};
    use crate::color::CharacterColor;

    fn image_of(lines: &[&str], columns: usize) -> Vec<Character> {
        let mut image = Vec::new();
        for text in lines {
            let mut count = 0;
            for c in text.chars() {
                image.push(Character::new(
                    c as u32,
                    CharacterColor::default_foreground(),
                    CharacterColor::default_background(),
                    DEFAULT_RENDITION,
                    true,
                ));
                count += 1;
            }
            while count < columns {
                image.push(DEFAULT_CHAR);
                count += 1;
            }
        }
        image
    }

    fn chain_with_url_filter(lines: &[&str], columns: usize) -> FilterChain {
        let image = image_of(lines, columns);
        let props = vec![LINE_DEFAULT; lines.len()];
        let mut chain = FilterChain::new();
        chain.add_filter(Box::new(UrlFilter::new()));
        chain.set_image(&image, lines.len(), columns, &props);
        chain.process();
        chain
    }

    #[test]
    fn test_url_match_excludes_trailing_punctuation() {
        let chain = chain_with_url_filter(&["See https://example.com/a. for details"], 60);
        let spots = chain.hotspots();
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].captured_texts()[0], "https://example.com/a");
        assert_eq!(spots[0].kind(), HotSpotKind::Link);
    }

    #[test]
    fn test_hotspot_at_inside_and_outside() {
        let chain = chain_with_url_filter(&["See https://example.com/a. for details"], 60);
        // "See " is 4 columns; the URL spans columns 4..25
        assert!(chain.hotspot_at(0, 4).is_some());
        assert!(chain.hotspot_at(0, 20).is_some());
        assert!(chain.hotspot_at(0, 1).is_none());
        assert!(chain.hotspot_at(1, 4).is_none());
    }

    #[test]
    fn test_www_url_open_action_normalizes() {
        let chain = chain_with_url_filter(&["go to www.example.org now"], 40);
        let spots = chain.hotspots();
        assert_eq!(spots[0].captured_texts()[0], "www.example.org");
        let open = &spots[0].actions()[0];
        assert_eq!(open.kind, HotSpotActionKind::Open);
        assert_eq!(open.text, "http://www.example.org");
        let copy = &spots[0].actions()[1];
        assert_eq!(copy.kind, HotSpotActionKind::Copy);
        assert_eq!(copy.text, "www.example.org");
    }

    #[test]
    fn test_email_becomes_mailto() {
        let chain = chain_with_url_filter(&["mail me: alice@example.com thanks"], 40);
        let spots = chain.hotspots();
        assert_eq!(spots[0].captured_texts()[0], "alice@example.com");
        assert_eq!(spots[0].actions()[0].text, "mailto:alice@example.com");
    }

    #[test]
    fn test_wrapped_lines_join_for_matching() {
        // URL split across a wrapped line boundary
        let image = image_of(&["x https://exam", "ple.com/path y"], 14);
        let mut props = vec![LINE_DEFAULT; 2];
        props[0] |= LineProperty::WRAPPED;

        let mut chain = FilterChain::new();
        chain.add_filter(Box::new(UrlFilter::new()));
        chain.set_image(&image, 2, 14, &props);
        chain.process();

        let spots = chain.hotspots();
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].captured_texts()[0], "https://example.com/path");
        assert_eq!(spots[0].start_line(), 0);
        assert_eq!(spots[0].start_column(), 2);
        assert_eq!(spots[0].end_line(), 1);
    }

    #[test]
    fn test_regex_filter_marks_matches() {
        let image = image_of(&["error: disk full", "all fine here"], 20);
        let props = vec![LINE_DEFAULT; 2];
        let mut chain = FilterChain::new();
        chain.add_filter(Box::new(RegexFilter::new(Regex::new("error: \\w+").unwrap())));
        chain.set_image(&image, 2, 20, &props);
        chain.process();

        let spots = chain.hotspots();
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].kind(), HotSpotKind::Marker);
        assert_eq!(spots[0].captured_texts()[0], "error: disk");
        assert!(spots[0].actions().is_empty());
    }

    #[test]
    fn test_wide_characters_shift_columns() {
        let image = image_of(&["日本 www.example.org"], 30);
        // the image builder writes one cell per char; pad wide cells
        // manually: two columns each for the first two characters
        let mut padded = Vec::new();
        for (i, cell) in image.iter().enumerate() {
            padded.push(*cell);
            if i < 2 {
                let mut half = DEFAULT_CHAR;
                half.character = 0;
                padded.push(half);
            }
        }
        padded.truncate(30);

        let mut chain = FilterChain::new();
        chain.add_filter(Box::new(UrlFilter::new()));
        chain.set_image(&padded, 1, 30, &[LINE_DEFAULT]);
        chain.process();

        let spots = chain.hotspots();
        assert_eq!(spots.len(), 1);
        // 2 wide chars (4 columns) + 1 space
        assert_eq!(spots[0].start_column(), 5);
    }

    #[test]
    fn test_url_extractor_ranges_and_eviction() {
        let mut extractor = UrlExtractor::new();
        extractor.begin_url("https://example.com", 3, 10);
        extractor.append_text(3, 11);
        extractor.append_text(3, 12);
        extractor.end_url();

        assert_eq!(
            extractor.urls(),
            &[ExtractedUrl {
                url: "https://example.com".to_owned(),
                begin: (3, 10),
                end: (3, 12),
            }]
        );

        extractor.history_lines_removed(2);
        assert_eq!(extractor.urls()[0].begin, (1, 10));

        // dropping past the range evicts it
        extractor.history_lines_removed(5);
        assert!(extractor.urls().is_empty());
    }

    #[test]
    fn test_url_extractor_unterminated_link_closed_by_next() {
        let mut extractor = UrlExtractor::new();
        extractor.begin_url("https://a.example", 0, 0);
        extractor.append_text(0, 5);
        extractor.begin_url("https://b.example", 1, 0);
        extractor.end_url();

        assert_eq!(extractor.urls().len(), 2);
        assert_eq!(extractor.urls()[0].url, "https://a.example");
        assert_eq!(extractor.urls()[0].end, (0, 5));
    }
}
