//! Cell color model
//!
//! A cell color is a tagged 4-byte value over five color spaces (default,
//! system, 256-indexed, RGB, undefined). Default and system colors resolve
//! through a palette supplied by the renderer; indexed and RGB colors
//! resolve on their own.

use serde::{Deserialize, Serialize};

/// Number of base palette entries (default fore/back + 8 system colors,
/// padded to 16 slots per intensity).
pub const BASE_COLORS: usize = 16;
/// Normal and intensive variants.
pub const INTENSITIES: usize = 2;
/// Total palette size.
pub const TABLE_COLORS: usize = BASE_COLORS * INTENSITIES;

/// Palette slot of the default foreground color.
pub const DEFAULT_FORE_COLOR: u32 = 0;
/// Palette slot of the default background color.
pub const DEFAULT_BACK_COLOR: u32 = 1;

/// An RGB triple.
pub type Rgb = (u8, u8, u8);

/// Color space selector for [`CharacterColor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ColorSpace {
    /// Invalid sentinel.
    Undefined = 0,
    /// Palette default foreground or background.
    Default = 1,
    /// One of the 8 ANSI system colors.
    System = 2,
    /// xterm 256-color index.
    Indexed256 = 3,
    /// 24-bit color.
    Rgb = 4,
}

/// Font weight hint attached to a palette entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontWeight {
    /// Always draw text in this color bold.
    Bold,
    /// Always draw text in this color with normal weight.
    Normal,
    /// Use whatever weight the terminal application set.
    #[default]
    UseCurrentFormat,
}

/// An entry in the renderer-supplied color palette.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorEntry {
    pub color: Rgb,
    pub font_weight: FontWeight,
}

impl ColorEntry {
    pub const fn new(color: Rgb) -> Self {
        Self {
            color,
            font_weight: FontWeight::UseCurrentFormat,
        }
    }
}

/// Palette layout: entries 0 and 1 are the default foreground and
/// background, 2..=9 the eight system colors. The second half holds the
/// intensive variants at the same offsets plus [`BASE_COLORS`].
pub type ColorTable = [ColorEntry; TABLE_COLORS];

const COLOR_SPACE_UNDEFINED: u8 = 0;
const COLOR_SPACE_DEFAULT: u8 = 1;
const COLOR_SPACE_SYSTEM: u8 = 2;
const COLOR_SPACE_256: u8 = 3;
const COLOR_SPACE_RGB: u8 = 4;

/// The color of a single character cell.
///
/// Stored as `{space, u, v, w}`:
///
/// | space | meaning    | u          | v         | w      |
/// |-------|------------|------------|-----------|--------|
/// | 0     | undefined  | 0          | 0         | 0      |
/// | 1     | default    | fore/back  | intensive | 0      |
/// | 2     | system     | 0..7       | intensive | 0      |
/// | 3     | index 256  | 0..255     | 0         | 0      |
/// | 4     | RGB        | red        | green     | blue   |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CharacterColor {
    color_space: u8,
    u: u8,
    v: u8,
    w: u8,
}

impl Default for CharacterColor {
    fn default() -> Self {
        Self::undefined()
    }
}

impl CharacterColor {
    /// An undefined (invalid) color.
    pub const fn undefined() -> Self {
        Self {
            color_space: COLOR_SPACE_UNDEFINED,
            u: 0,
            v: 0,
            w: 0,
        }
    }

    /// The default foreground color.
    pub const fn default_foreground() -> Self {
        Self {
            color_space: COLOR_SPACE_DEFAULT,
            u: (DEFAULT_FORE_COLOR & 1) as u8,
            v: 0,
            w: 0,
        }
    }

    /// The default background color.
    pub const fn default_background() -> Self {
        Self {
            color_space: COLOR_SPACE_DEFAULT,
            u: (DEFAULT_BACK_COLOR & 1) as u8,
            v: 0,
            w: 0,
        }
    }

    /// Builds a color in `space` from a packed value.
    ///
    /// System colors pack the intensity flag in bit 3; RGB packs
    /// `0xRRGGBB`. Unknown spaces produce an undefined color.
    pub fn new(space: ColorSpace, value: u32) -> Self {
        match space {
            ColorSpace::Default => Self {
                color_space: COLOR_SPACE_DEFAULT,
                u: (value & 1) as u8,
                v: 0,
                w: 0,
            },
            ColorSpace::System => Self {
                color_space: COLOR_SPACE_SYSTEM,
                u: (value & 7) as u8,
                v: ((value >> 3) & 1) as u8,
                w: 0,
            },
            ColorSpace::Indexed256 => Self {
                color_space: COLOR_SPACE_256,
                u: (value & 255) as u8,
                v: 0,
                w: 0,
            },
            ColorSpace::Rgb => Self {
                color_space: COLOR_SPACE_RGB,
                u: (value >> 16) as u8,
                v: (value >> 8) as u8,
                w: value as u8,
            },
            ColorSpace::Undefined => Self::undefined(),
        }
    }

    /// Builds a color from a raw `(space, u, v, w)` record, e.g. when the
    /// driver already parsed an SGR sub-sequence into channels.
    pub fn from_parts(space: u8, u: u8, v: u8, w: u8) -> Self {
        if space > COLOR_SPACE_RGB {
            return Self::undefined();
        }
        Self {
            color_space: space,
            u,
            v,
            w,
        }
    }

    /// Raw `(space, u, v, w)` record.
    pub fn parts(&self) -> (u8, u8, u8, u8) {
        (self.color_space, self.u, self.v, self.w)
    }

    pub fn is_valid(&self) -> bool {
        self.color_space != COLOR_SPACE_UNDEFINED
    }

    /// Switches a default or system color to its intensive ("bright")
    /// variant. No effect on other spaces.
    pub fn set_intensive(&mut self) {
        if self.color_space == COLOR_SPACE_SYSTEM || self.color_space == COLOR_SPACE_DEFAULT {
            self.v = 1;
        }
    }

    /// Switches a default or system color back to its normal variant.
    pub fn set_faint(&mut self) {
        if self.color_space == COLOR_SPACE_SYSTEM || self.color_space == COLOR_SPACE_DEFAULT {
            self.v = 0;
        }
    }

    /// Resolves to a displayable triple against `palette`.
    ///
    /// Default and system colors index into the palette; indexed and RGB
    /// colors resolve without it. Undefined colors resolve to `None`.
    pub fn color(&self, palette: &ColorTable) -> Option<Rgb> {
        match self.color_space {
            COLOR_SPACE_DEFAULT => {
                let base = self.u as usize + if self.v != 0 { BASE_COLORS } else { 0 };
                Some(palette[base].color)
            }
            COLOR_SPACE_SYSTEM => {
                let base = self.u as usize + 2 + if self.v != 0 { BASE_COLORS } else { 0 };
                Some(palette[base].color)
            }
            COLOR_SPACE_256 => Some(color256(self.u, palette)),
            COLOR_SPACE_RGB => Some((self.u, self.v, self.w)),
            _ => None,
        }
    }
}

/// Resolves an xterm 256-color index: 0..7 system, 8..15 intensive system,
/// 16..231 a 6x6x6 cube, 232..255 a 24-step grayscale ramp.
fn color256(u: u8, palette: &ColorTable) -> Rgb {
    let mut u = u as usize;

    if u < 8 {
        return palette[u + 2].color;
    }
    u -= 8;
    if u < 8 {
        return palette[u + 2 + BASE_COLORS].color;
    }
    u -= 8;

    if u < 216 {
        let channel = |c: usize| -> u8 {
            if c == 0 {
                0
            } else {
                (40 * c + 55) as u8
            }
        };
        return (
            channel((u / 36) % 6),
            channel((u / 6) % 6),
            channel(u % 6),
        );
    }
    u -= 216;

    let gray = (u * 10 + 8) as u8;
    (gray, gray, gray)
}

/// A palette where every entry is its slot's identity; handy for tests and
/// for embedders that only care about RGB and indexed cells.
pub fn default_color_table() -> ColorTable {
    const BASE: [Rgb; 10] = [
        (0xb2, 0xb2, 0xb2), // default foreground
        (0x00, 0x00, 0x00), // default background
        (0x00, 0x00, 0x00), // black
        (0xb2, 0x18, 0x18), // red
        (0x18, 0xb2, 0x18), // green
        (0xb2, 0x68, 0x18), // yellow
        (0x18, 0x18, 0xb2), // blue
        (0xb2, 0x18, 0xb2), // magenta
        (0x18, 0xb2, 0xb2), // cyan
        (0xb2, 0xb2, 0xb2), // white
    ];
    const INTENSIVE: [Rgb; 10] = [
        (0xff, 0xff, 0xff),
        (0x00, 0x00, 0x00),
        (0x68, 0x68, 0x68),
        (0xff, 0x54, 0x54),
        (0x54, 0xff, 0x54),
        (0xff, 0xff, 0x54),
        (0x54, 0x54, 0xff),
        (0xff, 0x54, 0xff),
        (0x54, 0xff, 0xff),
        (0xff, 0xff, 0xff),
    ];

    let mut table = [ColorEntry::new((0, 0, 0)); TABLE_COLORS];
    for (i, rgb) in BASE.iter().enumerate() {
        table[i] = ColorEntry::new(*rgb);
    }
    for (i, rgb) in INTENSIVE.iter().enumerate() {
        table[i + BASE_COLORS] = ColorEntry::new(*rgb);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_color_packs_intensity() {
        let c = CharacterColor::new(ColorSpace::System, 1 | (1 << 3));
        let table = default_color_table();
        // red, intensive half of the table
        assert_eq!(c.color(&table), Some(table[1 + 2 + BASE_COLORS].color));
    }

    #[test]
    fn test_indexed_cube_channels() {
        let table = default_color_table();
        // index 196 = 16 + 36*5 = pure red in the cube
        let c = CharacterColor::new(ColorSpace::Indexed256, 196);
        assert_eq!(c.color(&table), Some((255, 0, 0)));
        // index 16 is cube origin
        let c = CharacterColor::new(ColorSpace::Indexed256, 16);
        assert_eq!(c.color(&table), Some((0, 0, 0)));
        // first non-zero channel value is 95
        let c = CharacterColor::new(ColorSpace::Indexed256, 17);
        assert_eq!(c.color(&table), Some((0, 0, 95)));
    }

    #[test]
    fn test_grayscale_ramp() {
        let table = default_color_table();
        let c = CharacterColor::new(ColorSpace::Indexed256, 232);
        assert_eq!(c.color(&table), Some((8, 8, 8)));
        let c = CharacterColor::new(ColorSpace::Indexed256, 255);
        assert_eq!(c.color(&table), Some((238, 238, 238)));
    }

    #[test]
    fn test_rgb_resolves_without_palette_entries() {
        let table = default_color_table();
        let c = CharacterColor::new(ColorSpace::Rgb, 0x336699);
        assert_eq!(c.color(&table), Some((0x33, 0x66, 0x99)));
    }

    #[test]
    fn test_undefined_is_invalid() {
        let c = CharacterColor::undefined();
        assert!(!c.is_valid());
        assert_eq!(c.color(&default_color_table()), None);
    }

    #[test]
    fn test_intensive_and_faint_toggle() {
        let mut c = CharacterColor::new(ColorSpace::System, 4);
        c.set_intensive();
        let table = default_color_table();
        assert_eq!(c.color(&table), Some(table[4 + 2 + BASE_COLORS].color));
        c.set_faint();
        assert_eq!(c.color(&table), Some(table[4 + 2].color));

        // RGB colors are unaffected
        let mut rgb = CharacterColor::new(ColorSpace::Rgb, 0x010203);
        rgb.set_intensive();
        assert_eq!(rgb.color(&table), Some((1, 2, 3)));
    }
}
