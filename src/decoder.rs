//! Cell-to-text decoders
//!
//! A decoder consumes rows of cells and appends a textual representation
//! to a string sink: plain UTF-8, or styled XHTML for export. Used by the
//! selection/copy path and by search indexing.

use bitflags::bitflags;

use crate::character::{Character, LineProperty, RenditionFlags};
use crate::color::{default_color_table, CharacterColor, ColorTable};
use crate::extended;

bitflags! {
    /// Options for turning a cell range into text.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DecodingOptions: u8 {
        /// Emit newlines between non-wrapped lines instead of spaces.
        const PRESERVE_LINE_BREAKS    = 1 << 0;
        /// Trim leading spaces once at the start of the assembled run.
        const TRIM_LEADING_WHITESPACE = 1 << 1;
        /// Trim trailing spaces from non-wrapped lines.
        const TRIM_TRAILING_WHITESPACE = 1 << 2;
        /// Produce an XHTML document instead of plain text.
        const CONVERT_TO_HTML         = 1 << 3;
    }
}

/// Turns rows of cells into text appended to a string sink.
///
/// `begin` is called once before the first line and `end` once after the
/// last; decoders may carry run state (e.g. the open span) between lines.
pub trait TerminalCharacterDecoder {
    fn begin(&mut self, output: &mut String);
    fn decode_line(&mut self, output: &mut String, characters: &[Character], properties: LineProperty);
    fn end(&mut self, output: &mut String);
}

/// Appends the cell's code points, resolving interned grapheme clusters.
fn push_cell_text(output: &mut String, cell: &Character) {
    if cell.rendition.contains(RenditionFlags::EXTENDED_CHAR) {
        if let Some(sequence) = extended::lookup_extended_char(cell.character) {
            for cp in sequence {
                if let Some(ch) = char::from_u32(cp) {
                    output.push(ch);
                }
            }
        }
    } else if let Some(ch) = char::from_u32(cell.character) {
        output.push(ch);
    }
}

// ---------------------------------------------------------------------------
// plain text

/// Decoder producing plain UTF-8 text.
///
/// Optionally records the byte offset at which each decoded line starts,
/// which the filter chain uses to map match positions back to the grid.
#[derive(Default)]
pub struct PlainTextDecoder {
    record_line_positions: bool,
    line_positions: Vec<usize>,
}

impl PlainTextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the starting offset of every subsequent line.
    pub fn set_record_line_positions(&mut self, record: bool) {
        self.record_line_positions = record;
    }

    /// Offsets recorded so far, one per decoded line.
    pub fn line_positions(&self) -> &[usize] {
        &self.line_positions
    }
}

impl TerminalCharacterDecoder for PlainTextDecoder {
    fn begin(&mut self, _output: &mut String) {}

    fn decode_line(&mut self, output: &mut String, characters: &[Character], _properties: LineProperty) {
        if self.record_line_positions {
            self.line_positions.push(output.len());
        }
        for cell in characters {
            // character 0 marks the trailing half of a wide glyph
            if cell.character == 0 {
                continue;
            }
            push_cell_text(output, cell);
        }
    }

    fn end(&mut self, _output: &mut String) {}
}

// ---------------------------------------------------------------------------
// HTML

/// Decoder producing a standalone XHTML document with inline styles.
pub struct HtmlDecoder {
    color_table: ColorTable,
    inner_span_open: bool,
    last_rendition: RenditionFlags,
    last_fore_color: CharacterColor,
    last_back_color: CharacterColor,
}

impl Default for HtmlDecoder {
    fn default() -> Self {
        Self::new(default_color_table())
    }
}

impl HtmlDecoder {
    pub fn new(color_table: ColorTable) -> Self {
        Self {
            color_table,
            inner_span_open: false,
            last_rendition: RenditionFlags::empty(),
            last_fore_color: CharacterColor::undefined(),
            last_back_color: CharacterColor::undefined(),
        }
    }

    fn open_span(text: &mut String, style: &str) {
        text.push_str("<span style=\"");
        text.push_str(style);
        text.push_str("\">");
    }

    fn close_span(text: &mut String) {
        text.push_str("</span>");
    }
}

impl TerminalCharacterDecoder for HtmlDecoder {
    fn begin(&mut self, output: &mut String) {
        output.push_str("<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Strict//EN\"\n");
        output.push_str("\"http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd\">\n");
        output.push_str("<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"en\" xml:lang=\"en\">\n");
        output.push_str("<head>\n");
        output.push_str("<title>Terminal output</title>\n");
        output.push_str("<meta http-equiv=\"Content-Type\" content=\"text/html;charset=utf-8\" />\n");
        output.push_str("</head>\n");
        output.push_str("<body>\n");
        output.push_str("<div>\n");
        Self::open_span(output, "font-family:monospace");
    }

    fn decode_line(&mut self, output: &mut String, characters: &[Character], _properties: LineProperty) {
        let mut space_count = 0;

        for cell in characters {
            if cell.character == 0 {
                continue;
            }

            // open a new span whenever the appearance changes
            if cell.rendition != self.last_rendition
                || cell.foreground_color != self.last_fore_color
                || cell.background_color != self.last_back_color
            {
                if self.inner_span_open {
                    Self::close_span(output);
                    self.inner_span_open = false;
                }

                self.last_rendition = cell.rendition;
                self.last_fore_color = cell.foreground_color;
                self.last_back_color = cell.background_color;

                let mut style = String::new();
                if self.last_rendition.contains(RenditionFlags::BOLD) {
                    style.push_str("font-weight:bold;");
                }
                if self.last_rendition.contains(RenditionFlags::UNDERLINE) {
                    style.push_str("text-decoration:underline;");
                }
                if let Some((r, g, b)) = self.last_fore_color.color(&self.color_table) {
                    style.push_str(&format!("color:#{r:02x}{g:02x}{b:02x};"));
                }
                if let Some((r, g, b)) = self.last_back_color.color(&self.color_table) {
                    style.push_str(&format!("background-color:#{r:02x}{g:02x}{b:02x};"));
                }

                Self::open_span(output, &style);
                self.inner_span_open = true;
            }

            if cell.is_space() {
                space_count += 1;
            } else {
                space_count = 0;
            }

            if space_count < 2 {
                if cell.rendition.contains(RenditionFlags::EXTENDED_CHAR) {
                    push_cell_text(output, cell);
                } else {
                    match char::from_u32(cell.character) {
                        Some('<') => output.push_str("&lt;"),
                        Some('>') => output.push_str("&gt;"),
                        Some('&') => output.push_str("&amp;"),
                        Some(ch) => output.push(ch),
                        None => {}
                    }
                }
            } else {
                // HTML collapses runs of spaces; &#160; survives (and
                // keeps xmllint happy, unlike &nbsp;)
                output.push_str("&#160;");
            }
        }

        if self.inner_span_open {
            Self::close_span(output);
            self.inner_span_open = false;
        }

        output.push_str("<br>");
    }

    fn end(&mut self, output: &mut String) {
        Self::close_span(output);
        output.push_str("</div>\n");
        output.push_str("</body>\n");
        output.push_str("</html>\n");
    }
}
