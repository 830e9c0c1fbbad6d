//! vtcore - a VT-series terminal screen model
//!
//! vtcore implements the stateful core of a terminal emulator: the live
//! character grid, its scrollback history, the viewport renderers read
//! from, and the selection/decoding machinery that turns cell grids back
//! into text. It is renderer-agnostic: an escape-sequence parser drives
//! the [`screen::Screen`] mutators on one side, and a display widget
//! consumes images from a [`window::ScreenWindow`] on the other.
//!
//! # Features
//!
//! - **Screen**: cursor motion, scroll regions, erase/insert/delete,
//!   attribute tracking, wide and combining characters, resize with line
//!   reflow
//! - **History**: no scrollback, a bounded in-memory ring with column
//!   reflow, or an unlimited temp-file-backed store
//! - **Viewport**: a sliding window over history+screen with scroll
//!   tracking, dirty caching and window-local selection
//! - **Decoding**: selections and line ranges as plain text or styled
//!   XHTML
//! - **Hotspots**: regex and URL/email scanning of the visible image, and
//!   OSC 8 hyperlink ranges
//!
//! # Quick start
//!
//! ```
//! use vtcore::prelude::*;
//!
//! let mut screen = Screen::new(24, 80);
//! screen.set_scroll(HistoryType::Bounded(1000), false);
//! for c in "hello world".chars() {
//!     screen.display_character(c as u32);
//! }
//!
//! let mut window = ScreenWindow::new();
//! window.set_window_lines(24);
//! let image = window.get_image(&screen);
//! assert_eq!(image[0].character, 'h' as u32);
//! ```

pub mod character;
pub mod color;
pub mod decoder;
pub mod extended;
pub mod filter;
pub mod history;
pub mod screen;
pub mod window;

/// The types most embedders need.
pub mod prelude {
    pub use crate::character::{Character, LineProperty, RenditionFlags, DEFAULT_CHAR};
    pub use crate::color::{CharacterColor, ColorEntry, ColorSpace, ColorTable};
    pub use crate::decoder::{DecodingOptions, HtmlDecoder, PlainTextDecoder, TerminalCharacterDecoder};
    pub use crate::filter::{Filter, FilterChain, HotSpot, HotSpotKind, RegexFilter, UrlFilter};
    pub use crate::history::HistoryType;
    pub use crate::screen::{Mode, Screen, ScreenRect};
    pub use crate::window::{RelativeScrollMode, ScreenWindow, WindowEvent};
}
