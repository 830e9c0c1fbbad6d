//! The live character grid
//!
//! `Screen` interprets the semantic operations of a VT-series terminal as
//! mutations on an image of variable-length lines: cursor motion, scroll
//! regions, attribute tracking, wide and combining characters, erase and
//! insert operations, and resize with line reflow. Lines scrolled off the
//! top retire into the attached history store; readers see a joined
//! history+screen coordinate space.
//!
//! All operations are synchronous and single-threaded; out-of-range
//! arguments clamp or no-op rather than fail.

use std::collections::HashSet;

use tracing::debug;

use crate::character::{
    char_width, Character, LineProperty, RenditionFlags, DEFAULT_CHAR, DEFAULT_RENDITION,
    LINE_DEFAULT,
};
use crate::color::{CharacterColor, ColorSpace};
use crate::decoder::{DecodingOptions, HtmlDecoder, PlainTextDecoder, TerminalCharacterDecoder};
use crate::extended::{self, MAX_EXTENDED_CHAR_LENGTH};
use crate::filter::UrlExtractor;
use crate::history::{self, HistoryScroll, HistoryScrollNone, HistoryType};

/// Upper bound on numeric escape arguments, to keep adversarial input from
/// looping the screen for quadratic amounts of work.
pub const MAX_SCREEN_ARGUMENT: usize = 40_000;

/// Terminal modes tracked by the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Autowrap at the right margin.
    Wrap,
    /// Insert instead of overwrite.
    Insert,
    /// Cursor addressing relative to the scroll region.
    Origin,
    /// Linefeed implies carriage return.
    NewLine,
    /// Reverse video for the whole screen.
    Screen,
    /// Cursor visible.
    Cursor,
    /// The alternate screen buffer is active.
    AppScreen,
}

const MODE_COUNT: usize = 7;

impl Mode {
    fn index(self) -> usize {
        match self {
            Mode::Wrap => 0,
            Mode::Insert => 1,
            Mode::Origin => 2,
            Mode::NewLine => 3,
            Mode::Screen => 4,
            Mode::Cursor => 5,
            Mode::AppScreen => 6,
        }
    }
}

/// A rectangular region of the screen, in cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenRect {
    pub left: usize,
    pub top: usize,
    pub columns: usize,
    pub lines: usize,
}

/// Cursor snapshot taken by `save_cursor`.
#[derive(Clone, Copy, Debug)]
struct SavedState {
    cursor_column: usize,
    cursor_line: usize,
    rendition: RenditionFlags,
    foreground: CharacterColor,
    background: CharacterColor,
}

impl Default for SavedState {
    fn default() -> Self {
        Self {
            cursor_column: 0,
            cursor_line: 0,
            rendition: DEFAULT_RENDITION,
            foreground: CharacterColor::default_foreground(),
            background: CharacterColor::default_background(),
        }
    }
}

/// Selection anchors as absolute linear indices into the joined
/// history+screen cell stream.
#[derive(Clone, Copy, Debug)]
struct Selection {
    begin: usize,
    top_left: usize,
    bottom_right: usize,
    block_mode: bool,
}

/// The active character grid of one terminal.
pub struct Screen {
    lines: usize,
    columns: usize,
    // one overflow row past the bottom simplifies scroll arithmetic
    screen_lines: Vec<Vec<Character>>,
    line_properties: Vec<LineProperty>,
    history: Box<dyn HistoryScroll>,

    cu_x: usize,
    cu_y: usize,
    saved_state: SavedState,

    top_margin: usize,
    bottom_margin: usize,
    tab_stops: Vec<bool>,

    current_rendition: RenditionFlags,
    current_foreground: CharacterColor,
    current_background: CharacterColor,
    effective_rendition: RenditionFlags,
    effective_foreground: CharacterColor,
    effective_background: CharacterColor,

    current_modes: [bool; MODE_COUNT],
    saved_modes: [bool; MODE_COUNT],

    selection: Option<Selection>,

    scrolled_lines: isize,
    dropped_lines: usize,
    last_scrolled_region: ScreenRect,

    old_total_lines: usize,
    is_resize: bool,
    enable_reflow: bool,
    prompt_rewrap: bool,

    last_pos: Option<usize>,
    last_drawn_char: u32,

    url_extractor: UrlExtractor,
}

impl Screen {
    pub fn new(lines: usize, columns: usize) -> Self {
        let lines = lines.max(1);
        let columns = columns.max(1);
        let mut screen = Self {
            lines,
            columns,
            screen_lines: vec![Vec::new(); lines + 1],
            line_properties: vec![LINE_DEFAULT; lines + 1],
            history: Box::new(HistoryScrollNone),
            cu_x: 0,
            cu_y: 0,
            saved_state: SavedState::default(),
            top_margin: 0,
            bottom_margin: lines - 1,
            tab_stops: Vec::new(),
            current_rendition: DEFAULT_RENDITION,
            current_foreground: CharacterColor::default_foreground(),
            current_background: CharacterColor::default_background(),
            effective_rendition: DEFAULT_RENDITION,
            effective_foreground: CharacterColor::default_foreground(),
            effective_background: CharacterColor::default_background(),
            current_modes: [false; MODE_COUNT],
            saved_modes: [false; MODE_COUNT],
            selection: None,
            scrolled_lines: 0,
            dropped_lines: 0,
            last_scrolled_region: ScreenRect::default(),
            old_total_lines: 0,
            is_resize: false,
            enable_reflow: false,
            prompt_rewrap: false,
            last_pos: None,
            last_drawn_char: 0,
            url_extractor: UrlExtractor::new(),
        };
        screen.init_tab_stops();
        screen.clear_selection();
        screen.reset();
        screen
    }

    fn loc(&self, x: usize, y: usize) -> usize {
        y * self.columns + x
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Lines currently held by the history store.
    pub fn hist_lines(&self) -> usize {
        self.history.lines()
    }

    // -----------------------------------------------------------------
    // cursor motion

    /// CUU
    pub fn cursor_up(&mut self, n: usize) {
        let n = n.max(1);
        let stop = if self.cu_y < self.top_margin {
            0
        } else {
            self.top_margin
        };
        self.cu_y = self.cu_y.saturating_sub(n).max(stop);
    }

    /// CUD
    pub fn cursor_down(&mut self, n: usize) {
        let n = n.max(1).min(MAX_SCREEN_ARGUMENT);
        let stop = if self.cu_y > self.bottom_margin {
            self.lines - 1
        } else {
            self.bottom_margin
        };
        self.cu_y = (self.cu_y + n).min(stop);
    }

    /// CUB
    pub fn cursor_left(&mut self, n: usize) {
        let n = n.max(1);
        self.cu_x = self.cu_x.saturating_sub(n);
    }

    /// CUF
    pub fn cursor_right(&mut self, n: usize) {
        let n = n.max(1).min(MAX_SCREEN_ARGUMENT);
        self.cu_x = (self.cu_x + n).min(self.columns - 1);
    }

    /// CNL
    pub fn cursor_next_line(&mut self, n: usize) {
        let n = n.max(1).min(MAX_SCREEN_ARGUMENT);
        self.cu_x = 0;
        self.cu_y = (self.cu_y + n).min(self.lines - 1);
    }

    /// CPL
    pub fn cursor_previous_line(&mut self, n: usize) {
        let n = n.max(1);
        self.cu_x = 0;
        self.cu_y = self.cu_y.saturating_sub(n);
    }

    /// Sets the cursor column from a 1-based argument.
    pub fn set_cursor_x(&mut self, x: usize) {
        let x = x.max(1);
        self.cu_x = (x - 1).min(self.columns - 1);
    }

    /// Sets the cursor line from a 1-based argument, offset by the top
    /// margin in Origin mode.
    pub fn set_cursor_y(&mut self, y: usize) {
        let y = y.max(1).min(MAX_SCREEN_ARGUMENT);
        let offset = if self.get_mode(Mode::Origin) {
            self.top_margin
        } else {
            0
        };
        self.cu_y = (y - 1 + offset).min(self.lines - 1);
    }

    pub fn set_cursor_yx(&mut self, y: usize, x: usize) {
        self.set_cursor_y(y);
        self.set_cursor_x(x);
    }

    pub fn to_start_of_line(&mut self) {
        self.cu_x = 0;
    }

    pub fn cursor_x(&self) -> usize {
        self.cu_x.min(self.columns - 1)
    }

    pub fn cursor_y(&self) -> usize {
        self.cu_y
    }

    pub fn backspace(&mut self) {
        self.cu_x = self.cu_x.saturating_sub(1);
        if self.screen_lines[self.cu_y].len() < self.cu_x + 1 {
            self.screen_lines[self.cu_y].resize(self.cu_x + 1, DEFAULT_CHAR);
        }
    }

    // -----------------------------------------------------------------
    // margins and indexing

    /// DECSTBM; arguments are 1-based, 0 selects the default.
    pub fn set_margins(&mut self, top: usize, bottom: usize) {
        let top = top.max(1);
        let bottom = if bottom < 1 { self.lines } else { bottom };
        let top = top - 1;
        let bottom = bottom - 1;
        if !(top < bottom && bottom < self.lines) {
            debug!(top, bottom, "rejecting bad margin range");
            return;
        }
        self.top_margin = top;
        self.bottom_margin = bottom;
        self.cu_x = 0;
        self.cu_y = if self.get_mode(Mode::Origin) { top } else { 0 };
    }

    pub fn top_margin(&self) -> usize {
        self.top_margin
    }

    pub fn bottom_margin(&self) -> usize {
        self.bottom_margin
    }

    fn set_default_margins(&mut self) {
        self.top_margin = 0;
        self.bottom_margin = self.lines - 1;
    }

    /// IND: move down one line, scrolling the region when at the bottom
    /// margin.
    pub fn index(&mut self) {
        if self.cu_y == self.bottom_margin {
            self.scroll_up(1);
        } else if self.cu_y < self.lines - 1 {
            self.cu_y += 1;
        }
    }

    /// RI: mirror of `index`.
    pub fn reverse_index(&mut self) {
        if self.cu_y == self.top_margin {
            self.scroll_down_from(self.top_margin, 1);
        } else if self.cu_y > 0 {
            self.cu_y -= 1;
        }
    }

    /// NEL
    pub fn next_line(&mut self) {
        self.to_start_of_line();
        self.index();
    }

    /// LF, honoring NewLine mode.
    pub fn new_line(&mut self) {
        if self.get_mode(Mode::NewLine) {
            self.to_start_of_line();
        }
        self.index();
    }

    // -----------------------------------------------------------------
    // modes

    pub fn set_mode(&mut self, mode: Mode) {
        self.current_modes[mode.index()] = true;
        if mode == Mode::Origin {
            self.cu_x = 0;
            self.cu_y = self.top_margin;
        }
    }

    pub fn reset_mode(&mut self, mode: Mode) {
        self.current_modes[mode.index()] = false;
        if mode == Mode::Origin {
            self.cu_x = 0;
            self.cu_y = 0;
        }
    }

    pub fn save_mode(&mut self, mode: Mode) {
        self.saved_modes[mode.index()] = self.current_modes[mode.index()];
    }

    pub fn restore_mode(&mut self, mode: Mode) {
        self.current_modes[mode.index()] = self.saved_modes[mode.index()];
    }

    pub fn get_mode(&self, mode: Mode) -> bool {
        self.current_modes[mode.index()]
    }

    // -----------------------------------------------------------------
    // cursor save/restore

    pub fn save_cursor(&mut self) {
        self.saved_state = SavedState {
            cursor_column: self.cu_x,
            cursor_line: self.cu_y,
            rendition: self.current_rendition,
            foreground: self.current_foreground,
            background: self.current_background,
        };
    }

    pub fn restore_cursor(&mut self) {
        self.cu_x = self.saved_state.cursor_column.min(self.columns - 1);
        self.cu_y = self.saved_state.cursor_line.min(self.lines - 1);
        self.current_rendition = self.saved_state.rendition;
        self.current_foreground = self.saved_state.foreground;
        self.current_background = self.saved_state.background;
        self.update_effective_rendition();
    }

    // -----------------------------------------------------------------
    // rendition

    pub fn set_rendition(&mut self, rendition: RenditionFlags) {
        self.current_rendition |= rendition;
        self.update_effective_rendition();
    }

    pub fn reset_rendition(&mut self, rendition: RenditionFlags) {
        self.current_rendition &= !rendition;
        self.update_effective_rendition();
    }

    pub fn set_default_rendition(&mut self) {
        self.set_fore_color(ColorSpace::Default, 0);
        self.set_back_color(ColorSpace::Default, 1);
        self.current_rendition = DEFAULT_RENDITION;
        self.update_effective_rendition();
    }

    pub fn set_fore_color(&mut self, space: ColorSpace, color: u32) {
        self.current_foreground = CharacterColor::new(space, color);
        if self.current_foreground.is_valid() {
            self.update_effective_rendition();
        } else {
            self.set_fore_color(ColorSpace::Default, 0);
        }
    }

    pub fn set_back_color(&mut self, space: ColorSpace, color: u32) {
        self.current_background = CharacterColor::new(space, color);
        if self.current_background.is_valid() {
            self.update_effective_rendition();
        } else {
            self.set_back_color(ColorSpace::Default, 1);
        }
    }

    fn update_effective_rendition(&mut self) {
        self.effective_rendition = self.current_rendition;
        if self.current_rendition.contains(RenditionFlags::REVERSE) {
            self.effective_foreground = self.current_background;
            self.effective_background = self.current_foreground;
        } else {
            self.effective_foreground = self.current_foreground;
            self.effective_background = self.current_background;
        }

        if self.current_rendition.contains(RenditionFlags::BOLD) {
            if !self.current_rendition.contains(RenditionFlags::FAINT) {
                self.effective_foreground.set_intensive();
            }
        } else if self.current_rendition.contains(RenditionFlags::FAINT) {
            self.effective_foreground.set_faint();
        }
    }

    fn reverse_rendition(cell: &mut Character) {
        std::mem::swap(&mut cell.foreground_color, &mut cell.background_color);
    }

    // -----------------------------------------------------------------
    // tab stops

    pub fn init_tab_stops(&mut self) {
        self.tab_stops = (0..self.columns).map(|i| i % 8 == 0 && i != 0).collect();
    }

    pub fn clear_tab_stops(&mut self) {
        self.tab_stops.fill(false);
    }

    /// Sets or clears a tab stop at the cursor column.
    pub fn change_tab_stop(&mut self, set: bool) {
        if self.cu_x >= self.columns {
            return;
        }
        self.tab_stops[self.cu_x] = set;
    }

    /// Advances right to the n-th next tab stop. TAB is a format effector
    /// and writes nothing.
    pub fn tab(&mut self, n: usize) {
        let mut n = n.max(1);
        while n > 0 && self.cu_x < self.columns - 1 {
            self.cursor_right(1);
            while self.cu_x < self.columns - 1 && !self.tab_stops[self.cu_x] {
                self.cursor_right(1);
            }
            n -= 1;
        }
    }

    pub fn backtab(&mut self, n: usize) {
        let mut n = n.max(1);
        while n > 0 && self.cu_x > 0 {
            self.cursor_left(1);
            while self.cu_x > 0 && !self.tab_stops[self.cu_x] {
                self.cursor_left(1);
            }
            n -= 1;
        }
    }

    // -----------------------------------------------------------------
    // line properties

    /// Applies a property (double width/height) to the cursor line.
    pub fn set_line_property(&mut self, property: LineProperty, enable: bool) {
        if enable {
            self.line_properties[self.cu_y] |= property;
        } else {
            self.line_properties[self.cu_y] &= !property;
        }
    }

    /// Effective width of a screen line; double-width lines hold half as
    /// many cells.
    fn screen_line_columns(&self, line: usize) -> usize {
        if self.line_properties[line].contains(LineProperty::DOUBLE_WIDTH) {
            self.columns / 2
        } else {
            self.columns
        }
    }

    // -----------------------------------------------------------------
    // writing

    /// Writes one code point at the cursor, handling width, combining
    /// marks, wrap and insert modes.
    pub fn display_character(&mut self, c: u32) {
        // Wrapping happens before the write: a cursor one past the last
        // column marks a pending wrap.
        let width = char_width(c);
        if width < 0 {
            return;
        }

        if width == 0 {
            self.combine_with_previous(c);
            return;
        }
        let w = width as usize;

        if self.cu_x + w > self.screen_line_columns(self.cu_y) {
            if self.get_mode(Mode::Wrap) {
                self.line_properties[self.cu_y] |= LineProperty::WRAPPED;
                self.next_line();
            } else {
                self.cu_x = self.screen_line_columns(self.cu_y).saturating_sub(w);
            }
        }

        if self.screen_lines[self.cu_y].len() < self.cu_x + w {
            self.screen_lines[self.cu_y].resize(self.cu_x + w, DEFAULT_CHAR);
        }

        if self.get_mode(Mode::Insert) {
            self.insert_chars(w);
        }

        let pos = self.loc(self.cu_x, self.cu_y);
        self.last_pos = Some(pos);
        self.check_selection(pos, pos);

        let mut rendition = self.effective_rendition;
        if self.url_extractor.reading() {
            rendition |= RenditionFlags::CURRENT_URL;
        }

        let cell = &mut self.screen_lines[self.cu_y][self.cu_x];
        cell.character = c;
        cell.foreground_color = self.effective_foreground;
        cell.background_color = self.effective_background;
        cell.rendition = rendition;
        cell.is_real_character = true;

        self.last_drawn_char = c;

        for i in 1..w {
            if self.screen_lines[self.cu_y].len() < self.cu_x + i + 1 {
                self.screen_lines[self.cu_y].resize(self.cu_x + i + 1, DEFAULT_CHAR);
            }
            let pad = &mut self.screen_lines[self.cu_y][self.cu_x + i];
            pad.character = 0;
            pad.foreground_color = self.effective_foreground;
            pad.background_color = self.effective_background;
            pad.rendition = rendition;
            pad.is_real_character = false;
        }

        if self.url_extractor.reading() {
            let line = self.history.lines() + self.cu_y;
            self.url_extractor.append_text(line, self.cu_x + w - 1);
        }
        self.cu_x += w;
    }

    /// Merges a zero-width code point into the nearest preceding real
    /// character, interning the grapheme cluster.
    fn combine_with_previous(&mut self, c: u32) {
        let mut x = self.cu_x.min(self.screen_lines[self.cu_y].len());
        let mut y = self.cu_y;
        loop {
            if x > 0 {
                x -= 1;
            } else if y > 0 {
                y -= 1;
                match self.screen_lines[y].len() {
                    0 => return,
                    len => x = len - 1,
                }
            } else {
                return;
            }
            if self.screen_lines[y][x].is_real_character {
                break;
            }
        }

        let current = self.screen_lines[y][x];
        let new_key = if !current.rendition.contains(RenditionFlags::EXTENDED_CHAR) {
            let sequence = [current.character, c];
            Some(extended::create_extended_char(&sequence, || {
                self.used_extended_chars()
            }))
        } else {
            match extended::lookup_extended_char(current.character) {
                Some(mut sequence) if sequence.len() < MAX_EXTENDED_CHAR_LENGTH => {
                    sequence.push(c);
                    Some(extended::create_extended_char(&sequence, || {
                        self.used_extended_chars()
                    }))
                }
                _ => None,
            }
        };

        if let Some(key) = new_key {
            let cell = &mut self.screen_lines[y][x];
            cell.character = key;
            cell.rendition |= RenditionFlags::EXTENDED_CHAR;
        }
    }

    /// ECMA-48 REP: repeats the last visible character.
    pub fn repeat_chars(&mut self, n: usize) {
        let n = n.max(1).min(MAX_SCREEN_ARGUMENT);
        for _ in 0..n {
            self.display_character(self.last_drawn_char);
        }
    }

    /// Intern-table keys referenced by any live cell, screen and history
    /// included. Built on demand for table reclamation.
    pub fn used_extended_chars(&self) -> HashSet<u32> {
        let mut keys = HashSet::new();
        for line in &self.screen_lines {
            for cell in line {
                if cell.rendition.contains(RenditionFlags::EXTENDED_CHAR) {
                    keys.insert(cell.character);
                }
            }
        }
        let mut buffer = Vec::new();
        for line in 0..self.history.lines() {
            let len = self.history.line_len(line);
            buffer.clear();
            buffer.resize(len, DEFAULT_CHAR);
            self.history.get_cells(line, 0, len, &mut buffer);
            for cell in &buffer {
                if cell.rendition.contains(RenditionFlags::EXTENDED_CHAR) {
                    keys.insert(cell.character);
                }
            }
        }
        keys
    }

    // -----------------------------------------------------------------
    // erase / insert / delete

    /// ECH
    pub fn erase_chars(&mut self, n: usize) {
        let n = n.max(1).min(MAX_SCREEN_ARGUMENT);
        let p = (self.cu_x + n - 1).min(self.columns - 1);
        self.clear_image(self.loc(self.cu_x, self.cu_y), self.loc(p, self.cu_y), ' ');
    }

    /// DCH: removes cells at the cursor, back-filling with blanks carrying
    /// the current attributes.
    pub fn delete_chars(&mut self, n: usize) {
        let mut n = n.max(1);
        let line_len = self.screen_lines[self.cu_y].len();
        if self.cu_x >= line_len {
            return;
        }
        if self.cu_x + n > line_len {
            n = line_len - self.cu_x;
        }
        self.screen_lines[self.cu_y].drain(self.cu_x..self.cu_x + n);

        let space = Character::new(
            ' ' as u32,
            self.effective_foreground,
            self.effective_background,
            self.effective_rendition,
            false,
        );
        for _ in 0..n {
            self.screen_lines[self.cu_y].push(space);
        }
    }

    /// ICH
    pub fn insert_chars(&mut self, n: usize) {
        let n = n.max(1);
        let line = &mut self.screen_lines[self.cu_y];
        if line.len() < self.cu_x {
            line.resize(self.cu_x, DEFAULT_CHAR);
        }
        for _ in 0..n {
            line.insert(self.cu_x, DEFAULT_CHAR);
        }
        if line.len() > self.columns {
            line.truncate(self.columns);
        }
    }

    /// DL
    pub fn delete_lines(&mut self, n: usize) {
        let n = n.max(1);
        self.scroll_up_from(self.cu_y, n);
    }

    /// IL
    pub fn insert_lines(&mut self, n: usize) {
        let n = n.max(1);
        self.scroll_down_from(self.cu_y, n);
    }

    pub fn clear_to_end_of_screen(&mut self) {
        self.clear_image(
            self.loc(self.cu_x, self.cu_y),
            self.loc(self.columns - 1, self.lines - 1),
            ' ',
        );
    }

    pub fn clear_to_begin_of_screen(&mut self) {
        self.clear_image(self.loc(0, 0), self.loc(self.cu_x, self.cu_y), ' ');
    }

    pub fn clear_entire_screen(&mut self) {
        self.clear_image(self.loc(0, 0), self.loc(self.columns - 1, self.lines - 1), ' ');
    }

    /// DECALN: fill the screen with 'E' for alignment checks.
    pub fn help_align(&mut self) {
        self.clear_image(self.loc(0, 0), self.loc(self.columns - 1, self.lines - 1), 'E');
    }

    pub fn clear_to_end_of_line(&mut self) {
        self.clear_image(
            self.loc(self.cu_x, self.cu_y),
            self.loc(self.columns - 1, self.cu_y),
            ' ',
        );
    }

    pub fn clear_to_begin_of_line(&mut self) {
        self.clear_image(self.loc(0, self.cu_y), self.loc(self.cu_x, self.cu_y), ' ');
    }

    pub fn clear_entire_line(&mut self) {
        self.clear_image(self.loc(0, self.cu_y), self.loc(self.columns - 1, self.cu_y), ' ');
    }

    /// Clears the inclusive cell range `[loca, loce]` to `c` with the
    /// current colors. When the clear cell equals the default cell the
    /// affected lines are shrunk instead of filled; reads pad on demand.
    fn clear_image(&mut self, loca: usize, loce: usize, c: char) {
        let scr_tl = self.loc(0, self.history.lines());
        if let Some(sel) = self.selection {
            if sel.bottom_right > loca + scr_tl && sel.top_left < loce + scr_tl {
                self.clear_selection();
            }
        }

        let top_line = loca / self.columns;
        let bottom_line = loce / self.columns;

        let clear_ch = Character::new(
            c as u32,
            self.current_foreground,
            self.current_background,
            DEFAULT_RENDITION,
            false,
        );
        let is_default_ch = clear_ch == DEFAULT_CHAR;

        for y in top_line..=bottom_line.min(self.screen_lines.len() - 1) {
            self.line_properties[y] = LINE_DEFAULT;

            let end_col = if y == bottom_line {
                loce % self.columns
            } else {
                self.columns - 1
            };
            let start_col = if y == top_line { loca % self.columns } else { 0 };

            let line = &mut self.screen_lines[y];
            if is_default_ch && end_col == self.columns - 1 {
                line.truncate(start_col);
            } else {
                if line.len() < end_col + 1 {
                    line.resize(end_col + 1, DEFAULT_CHAR);
                }
                if start_col <= end_col {
                    line[start_col..=end_col].fill(clear_ch);
                }
            }
        }
    }

    /// Moves whole rows of the image; `dest`, `source_begin`, `source_end`
    /// are cell offsets on row boundaries. Adjusts the selection and the
    /// last-written position to follow the content.
    fn move_image(&mut self, dest: usize, source_begin: usize, source_end: usize) {
        debug_assert!(source_begin <= source_end);

        let lines_moved = (source_end - source_begin) / self.columns;
        let dest_y = dest / self.columns;
        let src_y = source_begin / self.columns;
        let row_count = self.screen_lines.len();

        if dest < source_begin {
            for i in 0..=lines_moved {
                if src_y + i >= row_count {
                    break;
                }
                self.screen_lines[dest_y + i] = std::mem::take(&mut self.screen_lines[src_y + i]);
                self.line_properties[dest_y + i] = self.line_properties[src_y + i];
            }
        } else {
            for i in (0..=lines_moved).rev() {
                if src_y + i >= row_count || dest_y + i >= row_count {
                    continue;
                }
                self.screen_lines[dest_y + i] = std::mem::take(&mut self.screen_lines[src_y + i]);
                self.line_properties[dest_y + i] = self.line_properties[src_y + i];
            }
        }

        if let Some(last_pos) = self.last_pos {
            let diff = dest as i64 - source_begin as i64;
            let moved = last_pos as i64 + diff;
            if moved < 0 || moved >= (lines_moved * self.columns) as i64 {
                self.last_pos = None;
            } else {
                self.last_pos = Some(moved as usize);
            }
        }

        // Move the selection anchors with the scrolled content.
        if let Some(sel) = self.selection {
            let begin_is_tl = sel.begin == sel.top_left;
            let diff = dest as i64 - source_begin as i64;
            let scr_tl = self.loc(0, self.history.lines()) as i64;
            let srca = source_begin as i64 + scr_tl;
            let srce = source_end as i64 + scr_tl;
            let desta = srca + diff;
            let deste = srce + diff;

            let mut top_left = sel.top_left as i64;
            let mut bottom_right = sel.bottom_right as i64;

            if top_left >= srca && top_left <= srce {
                top_left += diff;
            } else if top_left >= desta && top_left <= deste {
                bottom_right = -1;
            }

            if bottom_right >= srca && bottom_right <= srce {
                bottom_right += diff;
            } else if bottom_right >= desta && bottom_right <= deste {
                bottom_right = -1;
            }

            if bottom_right < 0 {
                self.clear_selection();
            } else {
                top_left = top_left.max(0);
                let top_left = top_left as usize;
                let bottom_right = bottom_right as usize;
                self.selection = Some(Selection {
                    begin: if begin_is_tl { top_left } else { bottom_right },
                    top_left,
                    bottom_right,
                    block_mode: sel.block_mode,
                });
            }
        }
    }

    // -----------------------------------------------------------------
    // scrolling

    /// Scrolls the region up, retiring the top line into history when the
    /// region starts at the top of the screen.
    pub fn scroll_up(&mut self, n: usize) {
        let n = n.max(1);
        if self.top_margin == 0 {
            self.add_hist_line();
        }
        self.scroll_up_from(self.top_margin, n);
    }

    /// Scrolls `[from, bottom_margin]` up by `n`, clearing the vacated
    /// rows with the current background.
    pub fn scroll_up_from(&mut self, from: usize, n: usize) {
        if n == 0 || from > self.bottom_margin {
            return;
        }
        let n = n.min(self.bottom_margin + 1 - from);

        self.scrolled_lines -= n as isize;
        self.last_scrolled_region = ScreenRect {
            left: 0,
            top: self.top_margin,
            columns: self.columns,
            lines: self.bottom_margin - self.top_margin + 1,
        };

        self.move_image(
            self.loc(0, from),
            self.loc(0, from + n),
            self.loc(self.columns, self.bottom_margin),
        );
        self.clear_image(
            self.loc(0, self.bottom_margin - n + 1),
            self.loc(self.columns - 1, self.bottom_margin),
            ' ',
        );
    }

    pub fn scroll_down(&mut self, n: usize) {
        let n = n.max(1);
        self.scroll_down_from(self.top_margin, n);
    }

    /// Scrolls `[from, bottom_margin]` down by `n`.
    pub fn scroll_down_from(&mut self, from: usize, n: usize) {
        self.scrolled_lines += n as isize;

        if n == 0 || from > self.bottom_margin {
            return;
        }
        let n = if from + n > self.bottom_margin {
            self.bottom_margin - from
        } else {
            n
        };
        if n == 0 {
            return;
        }

        self.move_image(
            self.loc(0, from + n),
            self.loc(0, from),
            self.loc(self.columns - 1, self.bottom_margin - n),
        );
        self.clear_image(self.loc(0, from), self.loc(self.columns - 1, from + n - 1), ' ');
    }

    /// Net lines scrolled since the last reset; negative is upward.
    pub fn scrolled_lines(&self) -> isize {
        self.scrolled_lines
    }

    pub fn reset_scrolled_lines(&mut self) {
        self.scrolled_lines = 0;
    }

    /// History lines dropped by capacity since the last reset.
    pub fn dropped_lines(&self) -> usize {
        self.dropped_lines
    }

    pub fn reset_dropped_lines(&mut self) {
        self.dropped_lines = 0;
    }

    /// Region touched by the most recent scroll, a renderer blit hint.
    pub fn last_scrolled_region(&self) -> ScreenRect {
        self.last_scrolled_region
    }

    /// Retires the top screen line into history, shifting selection
    /// anchors so they keep tracking content.
    fn add_hist_line(&mut self) {
        let old_hist_lines = self.history.lines();
        let mut new_hist_lines = old_hist_lines;

        if self.has_scroll() {
            let at_capacity = Some(self.history.lines()) == self.history.max_lines();
            self.history.add_cells(&self.screen_lines[0]);
            self.history
                .add_line(self.line_properties[0].contains(LineProperty::WRAPPED));

            new_hist_lines = self.history.lines();

            if new_hist_lines == old_hist_lines && at_capacity {
                self.dropped_lines += 1;
                self.url_extractor.history_lines_removed(1);
            }
        }

        if let Some(sel) = self.selection {
            let begin_is_tl = sel.begin == sel.top_left;
            let mut top_left = sel.top_left as i64;
            let mut bottom_right = sel.bottom_right as i64;

            if new_hist_lines > old_hist_lines {
                top_left += self.columns as i64;
                bottom_right += self.columns as i64;
            }

            // content above this boundary scrolled up by one line
            let top_br = self.loc(0, 1 + new_hist_lines) as i64;
            if top_left < top_br {
                top_left -= self.columns as i64;
            }
            if bottom_right < top_br {
                bottom_right -= self.columns as i64;
            }

            if bottom_right < 0 {
                self.clear_selection();
            } else {
                let top_left = top_left.max(0) as usize;
                let bottom_right = bottom_right as usize;
                self.selection = Some(Selection {
                    begin: if begin_is_tl { top_left } else { bottom_right },
                    top_left,
                    bottom_right,
                    block_mode: sel.block_mode,
                });
            }
        }
    }

    /// Like `add_hist_line` but without selection upkeep; used by resize
    /// where the selection is cleared anyway.
    fn fast_add_hist_line(&mut self) {
        let at_capacity = Some(self.history.lines()) == self.history.max_lines();
        self.history.add_cells(&self.screen_lines[0]);
        self.history
            .add_line(self.line_properties[0].contains(LineProperty::WRAPPED));

        if at_capacity {
            self.url_extractor.history_lines_removed(1);
        }

        self.screen_lines.remove(0);
        self.line_properties.remove(0);
    }

    // -----------------------------------------------------------------
    // history plumbing

    pub fn has_scroll(&self) -> bool {
        self.history.has_scroll()
    }

    pub fn history_type(&self) -> HistoryType {
        self.history.history_type()
    }

    /// Swaps the history store, optionally migrating its contents.
    /// Falls back to no history if the new store cannot be created.
    pub fn set_scroll(&mut self, history_type: HistoryType, copy_previous: bool) {
        self.clear_selection();

        let mut new_history: Box<dyn HistoryScroll> = match history_type.create() {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(%err, "history store unavailable, scrollback disabled");
                Box::new(HistoryScrollNone)
            }
        };
        if copy_previous {
            history::transfer(self.history.as_ref(), new_history.as_mut());
        }
        self.history = new_history;
    }

    /// Enables column reflow on resize.
    pub fn set_reflow_lines(&mut self, enable: bool) {
        self.enable_reflow = enable;
    }

    /// Hosts whose shell repaints the command line on resize should set
    /// this; the rewrap scan then leaves the wrapped run under the cursor
    /// for the shell to redraw.
    pub fn set_prompt_rewrap(&mut self, enable: bool) {
        self.prompt_rewrap = enable;
    }

    /// Forwarded OSC 8 begin: the hyperlink starts at the cursor.
    pub fn begin_url(&mut self, url: &str) {
        let line = self.history.lines() + self.cu_y;
        self.url_extractor
            .begin_url(url, line, self.cu_x.min(self.columns - 1));
    }

    /// Forwarded OSC 8 terminator.
    pub fn end_url(&mut self) {
        self.url_extractor.end_url();
    }

    pub fn url_extractor(&self) -> &UrlExtractor {
        &self.url_extractor
    }

    // -----------------------------------------------------------------
    // resize

    /// Total line count (history + screen) before the last resize.
    pub fn old_total_lines(&self) -> usize {
        self.old_total_lines
    }

    /// True once after a resize; reading clears the flag.
    pub fn take_resize_flag(&mut self) -> bool {
        std::mem::replace(&mut self.is_resize, false)
    }

    fn cursor_line(&self) -> usize {
        if self.get_mode(Mode::AppScreen) {
            self.saved_state.cursor_line
        } else {
            self.cu_y
        }
    }

    fn set_cursor_line(&mut self, line: usize) {
        if self.get_mode(Mode::AppScreen) {
            self.saved_state.cursor_line = line;
        } else {
            self.cu_y = line;
        }
    }

    /// Resizes the image, reflowing wrapped runs at the new width when
    /// reflow is enabled.
    pub fn resize_image(&mut self, new_lines: usize, new_columns: usize) {
        if new_lines == self.lines && new_columns == self.columns {
            return;
        }
        let new_lines = new_lines.max(1);
        let new_columns = new_columns.max(1);

        self.old_total_lines = self.lines + self.hist_lines();
        self.is_resize = true;

        let mut cursor_line = self.cursor_line() as i64;
        let old_cursor_line = if cursor_line == self.lines as i64 - 1
            || cursor_line > new_lines as i64 - 1
        {
            new_lines as i64 - 1
        } else {
            cursor_line
        };

        // Reflow the history first: push screen lines down until the last
        // logical line is whole inside the store, then re-break it.
        if self.enable_reflow
            && new_columns != self.columns
            && self.history.lines() > 0
            && self.history.supports_reflow()
        {
            while self.history.is_wrapped(self.history.lines() - 1) && self.screen_lines.len() > 1 {
                self.fast_add_hist_line();
                cursor_line -= 1;
            }
            let removed = self.history.reflow(new_columns);
            if removed > 0 {
                self.dropped_lines += removed;
                self.url_extractor.history_lines_removed(removed);
            }
        }

        if self.enable_reflow && new_columns != self.columns {
            // The scan normally runs through the cursor line so the run
            // being edited re-wraps too. With the prompt-rewrap hint the
            // shell will repaint that run itself; leave it alone.
            let mut limit_offset: i64 = 1;
            if self.prompt_rewrap
                && cursor_line > 0
                && self.line_properties[(cursor_line - 1) as usize].contains(LineProperty::WRAPPED)
            {
                limit_offset = 0;
                while cursor_line + limit_offset > 0
                    && self.line_properties[(cursor_line + limit_offset - 1) as usize]
                        .contains(LineProperty::WRAPPED)
                {
                    limit_offset -= 1;
                }
            }

            let mut current_pos: usize = 0;
            while (current_pos as i64) < cursor_line + limit_offset
                && current_pos < self.screen_lines.len().saturating_sub(1)
            {
                // join a wrapped line with its continuation
                if self.line_properties[current_pos].contains(LineProperty::WRAPPED) {
                    let continuation = std::mem::take(&mut self.screen_lines[current_pos + 1]);
                    let joined_at = self.screen_lines[current_pos].len();
                    self.screen_lines[current_pos].extend(continuation);
                    self.screen_lines.remove(current_pos + 1);
                    self.line_properties.remove(current_pos);

                    if cursor_line == current_pos as i64 + 1 {
                        self.cu_x += joined_at;
                        cursor_line -= 1;
                    } else if cursor_line > current_pos as i64 + 1 {
                        cursor_line -= 1;
                    }
                    continue;
                }

                // trailing blanks do not count towards the width
                let mut line_size = self.screen_lines[current_pos].len();
                while line_size > 0 && self.screen_lines[current_pos][line_size - 1].is_space() {
                    line_size -= 1;
                }

                if line_size > new_columns {
                    let excess = self.screen_lines[current_pos].split_off(new_columns);
                    let property = self.line_properties[current_pos];
                    self.line_properties.insert(current_pos + 1, property);
                    self.screen_lines.insert(current_pos + 1, excess);
                    self.line_properties[current_pos] |= LineProperty::WRAPPED;

                    if cursor_line == current_pos as i64 && self.cu_x >= new_columns {
                        self.cu_x -= new_columns;
                        cursor_line += 1;
                    } else if cursor_line > current_pos as i64 {
                        cursor_line += 1;
                    }
                }
                current_pos += 1;
            }
        }

        // retire lines until the cursor fits the new height
        while cursor_line > new_lines as i64 - 1 && self.screen_lines.len() > 1 {
            self.fast_add_hist_line();
            cursor_line -= 1;
        }

        if self.enable_reflow {
            // pull lines back from history when the cursor rose
            while cursor_line < old_cursor_line && self.history.lines() > 0 {
                let last = self.history.lines() - 1;
                let len = self.history.line_len(last);
                let wrapped = self.history.is_wrapped(last);
                let mut hist_line = vec![DEFAULT_CHAR; len];
                self.history.get_cells(last, 0, len, &mut hist_line);
                self.screen_lines.insert(0, hist_line);
                self.line_properties.insert(
                    0,
                    if wrapped {
                        LineProperty::WRAPPED
                    } else {
                        LINE_DEFAULT
                    },
                );
                self.history.remove_last_line();
                cursor_line += 1;
            }
        }

        self.screen_lines.resize(new_lines + 1, Vec::new());
        self.line_properties.resize(new_lines + 1, LINE_DEFAULT);

        self.lines = new_lines;
        self.columns = new_columns;
        self.cu_x = self.cu_x.min(self.columns - 1);
        let cursor_line = cursor_line.clamp(0, self.lines as i64 - 1) as usize;
        self.set_cursor_line(cursor_line);

        self.set_default_margins();
        self.init_tab_stops();
        self.clear_selection();
    }

    // -----------------------------------------------------------------
    // reading the image

    /// Pads a buffer with the default cell.
    pub fn fill_with_default_char(dest: &mut [Character]) {
        dest.fill(DEFAULT_CHAR);
    }

    fn copy_from_history(&self, dest: &mut [Character], start_line: usize, count: usize) {
        for line in start_line..start_line + count {
            let length = self.columns.min(self.history.line_len(line));
            let offset = (line - start_line) * self.columns;
            let row = &mut dest[offset..offset + self.columns];

            self.history.get_cells(line, 0, length, row);
            if length < self.columns {
                row[length..].fill(DEFAULT_CHAR);
            }

            if self.selection.is_some() {
                for (column, cell) in row.iter_mut().enumerate() {
                    if self.is_selected(column, line) {
                        cell.rendition |= RenditionFlags::SELECTED;
                    }
                }
            }
        }
    }

    fn copy_from_screen(&self, dest: &mut [Character], start_line: usize, count: usize) {
        let hist_lines = self.history.lines();
        for line in start_line..start_line + count {
            let offset = (line - start_line) * self.columns;
            for column in 0..self.columns {
                let mut cell = self.screen_lines[line]
                    .get(column)
                    .copied()
                    .unwrap_or(DEFAULT_CHAR);
                if self.selection.is_some() && self.is_selected(column, line + hist_lines) {
                    cell.rendition |= RenditionFlags::SELECTED;
                }
                dest[offset + column] = cell;
            }
        }
    }

    /// Fills `dest` with the merged history+screen image for the inclusive
    /// line range, applying reverse-video, selection and cursor flags to
    /// the output copy.
    pub fn get_image(&self, dest: &mut [Character], start_line: usize, end_line: usize) {
        if end_line < start_line || end_line >= self.history.lines() + self.lines {
            debug!(start_line, end_line, "rejecting bad image range");
            return;
        }
        let merged_lines = end_line - start_line + 1;
        debug_assert!(dest.len() >= merged_lines * self.columns);

        let lines_in_history = (self.history.lines().saturating_sub(start_line)).min(merged_lines);
        let lines_in_screen = merged_lines - lines_in_history;

        if lines_in_history > 0 {
            self.copy_from_history(dest, start_line, lines_in_history);
        }
        if lines_in_screen > 0 {
            self.copy_from_screen(
                &mut dest[lines_in_history * self.columns..],
                start_line + lines_in_history - self.history.lines(),
                lines_in_screen,
            );
        }

        if self.get_mode(Mode::Screen) {
            for cell in dest[..merged_lines * self.columns].iter_mut() {
                Self::reverse_rendition(cell);
            }
        }

        let vis_x = self.cu_x.min(self.columns - 1);
        let cursor_index = self.loc(vis_x, self.cu_y + lines_in_history);
        if self.get_mode(Mode::Cursor) && cursor_index < self.columns * merged_lines {
            dest[cursor_index].rendition |= RenditionFlags::CURSOR;
        }
    }

    /// Per-line properties for the inclusive line range, history lines
    /// included.
    pub fn get_line_properties(&self, start_line: usize, end_line: usize) -> Vec<LineProperty> {
        if end_line < start_line || end_line >= self.history.lines() + self.lines {
            debug!(start_line, end_line, "rejecting bad line property range");
            return Vec::new();
        }
        let merged_lines = end_line - start_line + 1;
        let lines_in_history = (self.history.lines().saturating_sub(start_line)).min(merged_lines);

        let mut result = Vec::with_capacity(merged_lines);
        for line in start_line..start_line + lines_in_history {
            if self.history.is_wrapped(line) {
                result.push(LineProperty::WRAPPED);
            } else {
                result.push(LINE_DEFAULT);
            }
        }
        let first_screen_line = (start_line + lines_in_history).saturating_sub(self.history.lines());
        for line in first_screen_line..first_screen_line + (merged_lines - lines_in_history) {
            result.push(self.line_properties[line]);
        }
        result
    }

    // -----------------------------------------------------------------
    // reset

    /// Soft reset: clears the screen below the current line, restores
    /// default modes, margins and rendition. History is preserved.
    pub fn reset(&mut self) {
        self.scroll_up_from(0, self.cu_y);
        self.cu_y = 0;

        self.current_modes[Mode::Origin.index()] = false;
        self.saved_modes[Mode::Origin.index()] = false;

        self.set_mode(Mode::Wrap);
        self.save_mode(Mode::Wrap);
        self.reset_mode(Mode::Insert);
        self.save_mode(Mode::Insert);
        self.set_mode(Mode::Cursor);
        self.reset_mode(Mode::Screen);
        self.reset_mode(Mode::NewLine);

        self.set_default_margins();
        self.set_default_rendition();
        self.save_cursor();
    }

    // -----------------------------------------------------------------
    // selection

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn has_selection(&self) -> bool {
        self.selection.is_some()
    }

    /// Anchor column/line of the selection start, falling back to the
    /// cursor when nothing is selected.
    pub fn selection_start(&self) -> (usize, usize) {
        match self.selection {
            Some(sel) => (sel.top_left % self.columns, sel.top_left / self.columns),
            None => (self.cursor_x(), self.cu_y + self.hist_lines()),
        }
    }

    pub fn selection_end(&self) -> (usize, usize) {
        match self.selection {
            Some(sel) => (
                sel.bottom_right % self.columns,
                sel.bottom_right / self.columns,
            ),
            None => (self.cursor_x(), self.cu_y + self.hist_lines()),
        }
    }

    /// Starts a selection at absolute coordinates.
    pub fn set_selection_start(&mut self, x: usize, y: usize, block_mode: bool) {
        let mut begin = self.loc(x, y);
        if x == self.columns && begin > 0 {
            begin -= 1;
        }
        self.selection = Some(Selection {
            begin,
            top_left: begin,
            bottom_right: begin,
            block_mode,
        });
    }

    pub fn set_selection_end(&mut self, x: usize, y: usize) {
        let Some(sel) = self.selection else {
            return;
        };

        let mut end_pos = self.loc(x, y);
        let (top_left, bottom_right) = if end_pos < sel.begin {
            (end_pos, sel.begin)
        } else {
            if x == self.columns && end_pos > 0 {
                end_pos -= 1;
            }
            (sel.begin, end_pos)
        };

        let mut updated = Selection {
            begin: sel.begin,
            top_left,
            bottom_right,
            block_mode: sel.block_mode,
        };

        // normalize the rectangle in block mode
        if sel.block_mode {
            let top_row = updated.top_left / self.columns;
            let top_column = updated.top_left % self.columns;
            let bottom_row = updated.bottom_right / self.columns;
            let bottom_column = updated.bottom_right % self.columns;
            updated.top_left = self.loc(top_column.min(bottom_column), top_row);
            updated.bottom_right = self.loc(top_column.max(bottom_column), bottom_row);
        }

        self.selection = Some(updated);
    }

    /// Membership test at absolute coordinates.
    pub fn is_selected(&self, x: usize, y: usize) -> bool {
        let Some(sel) = self.selection else {
            return false;
        };
        let column_in_selection = if sel.block_mode {
            x >= sel.top_left % self.columns && x <= sel.bottom_right % self.columns
        } else {
            true
        };
        let pos = self.loc(x, y);
        pos >= sel.top_left && pos <= sel.bottom_right && column_in_selection
    }

    fn check_selection(&mut self, from: usize, to: usize) {
        let Some(sel) = self.selection else {
            return;
        };
        let scr_tl = self.loc(0, self.history.lines());
        if sel.bottom_right >= from + scr_tl && sel.top_left <= to + scr_tl {
            self.clear_selection();
        }
    }

    // -----------------------------------------------------------------
    // decoding

    /// Decodes the selected region.
    pub fn selected_text(&self, options: DecodingOptions) -> String {
        match self.selection {
            Some(sel) => self.text_range(sel.top_left, sel.bottom_right, options),
            None => String::new(),
        }
    }

    /// Decodes the inclusive absolute cell index range.
    pub fn text_range(
        &self,
        start_index: usize,
        end_index: usize,
        options: DecodingOptions,
    ) -> String {
        let mut output = String::new();
        let block_mode = self.selection.is_some_and(|sel| sel.block_mode);

        if options.contains(DecodingOptions::CONVERT_TO_HTML) {
            let mut decoder = HtmlDecoder::default();
            decoder.begin(&mut output);
            self.write_to_stream_inner(&mut decoder, &mut output, start_index, end_index, options, block_mode);
            decoder.end(&mut output);
        } else {
            let mut decoder = PlainTextDecoder::new();
            decoder.begin(&mut output);
            self.write_to_stream_inner(&mut decoder, &mut output, start_index, end_index, options, block_mode);
            decoder.end(&mut output);

            if options.contains(DecodingOptions::TRIM_LEADING_WHITESPACE) {
                let trimmed = output.trim_start_matches(' ').len();
                output.replace_range(..output.len() - trimmed, "");
            }
        }

        output
    }

    /// Decodes whole lines through a caller-supplied decoder, preserving
    /// line breaks. Used by search indexing and HTML export.
    pub fn write_lines_to_stream(
        &self,
        decoder: &mut dyn TerminalCharacterDecoder,
        output: &mut String,
        from_line: usize,
        to_line: usize,
    ) {
        self.write_to_stream_inner(
            decoder,
            output,
            self.loc(0, from_line),
            self.loc(self.columns - 1, to_line),
            DecodingOptions::PRESERVE_LINE_BREAKS,
            false,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn write_to_stream_inner(
        &self,
        decoder: &mut dyn TerminalCharacterDecoder,
        output: &mut String,
        start_index: usize,
        end_index: usize,
        options: DecodingOptions,
        block_mode: bool,
    ) {
        let top = start_index / self.columns;
        let left = start_index % self.columns;
        let bottom = end_index / self.columns;
        let right = end_index % self.columns;

        for y in top..=bottom {
            let start = if y == top || block_mode { left } else { 0 };
            let mut count: Option<usize> = None;
            if y == bottom || block_mode {
                count = Some((right + 1).saturating_sub(start));
            }

            let append_new_line = y != bottom;
            let copied = self.copy_line_to_stream(
                y,
                start,
                count,
                decoder,
                output,
                append_new_line,
                options,
            );

            // selecting past the end of the last line picks up the line
            // break itself
            if y == bottom
                && count.is_some_and(|c| copied < c)
                && !options.contains(DecodingOptions::TRIM_TRAILING_WHITESPACE)
            {
                let newline = Character::new(
                    '\n' as u32,
                    CharacterColor::default_foreground(),
                    CharacterColor::default_background(),
                    DEFAULT_RENDITION,
                    true,
                );
                decoder.decode_line(output, &[newline], LINE_DEFAULT);
            }
        }
    }

    /// Length of a joined-coordinate line: stored length for history
    /// lines, the full width for screen lines.
    fn line_length(&self, line: usize) -> usize {
        if line < self.history.lines() {
            self.history.line_len(line)
        } else {
            self.columns
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_line_to_stream(
        &self,
        line: usize,
        start: usize,
        count: Option<usize>,
        decoder: &mut dyn TerminalCharacterDecoder,
        output: &mut String,
        append_new_line: bool,
        options: DecodingOptions,
    ) -> usize {
        let line_length = self.line_length(line);
        let mut current_line_properties = LINE_DEFAULT;

        let mut buffer: Vec<Character>;
        let mut count = count.unwrap_or(usize::MAX);

        if line < self.history.lines() {
            // the history stores no trailing blanks, so nothing to trim
            let start = start.min(line_length.saturating_sub(1));
            count = count.min(line_length.saturating_sub(start));

            buffer = vec![DEFAULT_CHAR; count + 1];
            self.history.get_cells(line, start, count, &mut buffer);

            if self.history.is_wrapped(line) {
                current_line_properties |= LineProperty::WRAPPED;
            }
        } else {
            if count == usize::MAX {
                count = line_length.saturating_sub(start);
            }

            let screen_line = (line - self.history.lines()).min(self.lines);
            let row = &self.screen_lines[screen_line];
            let mut length = row.len();

            // wrapped lines keep their trailing blanks
            if options.contains(DecodingOptions::TRIM_TRAILING_WHITESPACE)
                && !self.line_properties[screen_line].contains(LineProperty::WRAPPED)
            {
                while length > 0 && row[length - 1].is_space() {
                    length -= 1;
                }
            }

            buffer = vec![DEFAULT_CHAR; count.min(self.columns) + 1];
            let end = (start + count).min(length);
            if start < end {
                buffer[..end - start].copy_from_slice(&row[start..end]);
            }

            count = length.saturating_sub(start).min(count);
            current_line_properties |= self.line_properties[screen_line];
        }

        if append_new_line {
            if !current_line_properties.contains(LineProperty::WRAPPED) {
                // joining without preserved breaks mirrors what 'J' does
                // in vim: the break becomes a single space
                let break_char = if options.contains(DecodingOptions::PRESERVE_LINE_BREAKS) {
                    '\n'
                } else {
                    ' '
                };
                buffer[count] = Character::new(
                    break_char as u32,
                    CharacterColor::default_foreground(),
                    CharacterColor::default_background(),
                    DEFAULT_RENDITION,
                    true,
                );
                count += 1;
            }
        }

        decoder.decode_line(output, &buffer[..count], current_line_properties);
        count
    }
}
