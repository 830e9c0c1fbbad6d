//! Cell character model
//!
//! A cell is a fixed-size value: a code point (or an interned
//! grapheme-cluster key when the EXTENDED_CHAR flag is set), a foreground
//! and background color, a rendition bitmask, and a flag separating real
//! glyphs from padding cells.

use bitflags::bitflags;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::color::CharacterColor;

bitflags! {
    /// Drawing attributes of a cell.
    ///
    /// The lower bits are the SGR attributes the driver sets; the upper
    /// bits (EXTENDED_CHAR and onward) are maintained by the core and the
    /// image read-out path.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RenditionFlags: u16 {
        const BOLD          = 1 << 0;
        const BLINK         = 1 << 1;
        const UNDERLINE     = 1 << 2;
        const REVERSE       = 1 << 3;
        const ITALIC        = 1 << 4;
        const STRIKEOUT     = 1 << 5;
        const CONCEAL       = 1 << 6;
        const FAINT         = 1 << 7;
        const OVERLINE      = 1 << 8;
        /// The cell's `character` field is an extended-character table key.
        const EXTENDED_CHAR = 1 << 9;
        /// Set on image read-out for cells inside the selection.
        const SELECTED      = 1 << 10;
        /// Set on image read-out for the cell under a visible cursor.
        const CURSOR        = 1 << 11;
        /// Set for cells inside the hyperlink currently being written.
        const CURRENT_URL   = 1 << 12;
    }
}

/// Rendition of a freshly cleared cell.
pub const DEFAULT_RENDITION: RenditionFlags = RenditionFlags::empty();

bitflags! {
    /// Per-line attributes.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LineProperty: u8 {
        /// The line continues into the next one without a hard break.
        const WRAPPED       = 1 << 0;
        const DOUBLE_WIDTH  = 1 << 1;
        const DOUBLE_HEIGHT = 1 << 2;
    }
}

/// Properties of an ordinary line.
pub const LINE_DEFAULT: LineProperty = LineProperty::empty();

/// One character position in the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Character {
    /// Unicode code point, or an intern-table key when
    /// [`RenditionFlags::EXTENDED_CHAR`] is set.
    pub character: u32,
    pub foreground_color: CharacterColor,
    pub background_color: CharacterColor,
    pub rendition: RenditionFlags,
    /// False for padding cells: the trailing half of a wide glyph, or a
    /// cell cleared to blank.
    pub is_real_character: bool,
}

/// The cell every cleared or padded position reads as.
pub const DEFAULT_CHAR: Character = Character {
    character: ' ' as u32,
    foreground_color: CharacterColor::default_foreground(),
    background_color: CharacterColor::default_background(),
    rendition: DEFAULT_RENDITION,
    is_real_character: false,
};

impl Default for Character {
    fn default() -> Self {
        DEFAULT_CHAR
    }
}

impl Character {
    pub const fn new(
        character: u32,
        foreground_color: CharacterColor,
        background_color: CharacterColor,
        rendition: RenditionFlags,
        is_real_character: bool,
    ) -> Self {
        Self {
            character,
            foreground_color,
            background_color,
            rendition,
            is_real_character,
        }
    }

    /// True when the cell holds a plain space-like character.
    pub fn is_space(&self) -> bool {
        if self.rendition.contains(RenditionFlags::EXTENDED_CHAR) {
            return false;
        }
        char::from_u32(self.character).is_some_and(|c| c == ' ' || c.is_whitespace())
    }
}

/// Display width of a code point: -1 non-printable, 0 zero-width
/// (combining or format), 1 narrow, 2 wide.
pub fn char_width(c: u32) -> isize {
    match char::from_u32(c) {
        Some(ch) => match UnicodeWidthChar::width(ch) {
            Some(w) => w as isize,
            None => -1,
        },
        None => -1,
    }
}

/// Display width of a string; zero-width code points combine into the
/// preceding character and contribute nothing.
pub fn string_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_width_classes() {
        assert_eq!(char_width('a' as u32), 1);
        assert_eq!(char_width('漢' as u32), 2);
        assert_eq!(char_width(0x0301), 0); // combining acute accent
        assert_eq!(char_width(0x07), -1); // BEL
        assert_eq!(char_width(0x1b), -1); // ESC
    }

    #[test]
    fn test_string_width_combines() {
        assert_eq!(string_width("abc"), 3);
        assert_eq!(string_width("e\u{0301}"), 1);
        assert_eq!(string_width("日本"), 4);
    }

    #[test]
    fn test_default_char_is_padding_space() {
        assert_eq!(DEFAULT_CHAR.character, ' ' as u32);
        assert!(!DEFAULT_CHAR.is_real_character);
        assert!(DEFAULT_CHAR.is_space());
    }

    #[test]
    fn test_equality_is_fieldwise() {
        let mut a = DEFAULT_CHAR;
        let b = DEFAULT_CHAR;
        assert_eq!(a, b);
        a.rendition |= RenditionFlags::BOLD;
        assert_ne!(a, b);
    }
}
