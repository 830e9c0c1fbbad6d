//! Viewport over the history+screen sequence
//!
//! A `ScreenWindow` caches a fixed-size image of the visible region for
//! the renderer, tracks the scroll anchor, and translates selection
//! coordinates between window space and the screen's absolute space.
//!
//! The window borrows its screen per call; the screen never calls back
//! into a window. The driver loop invokes `notify_output_changed` after
//! feeding output, which is where tracking windows snap to the bottom and
//! anchored windows compensate for history eviction. State changes the
//! renderer should react to are reported as drained events, the
//! restatement of the original's signal emissions.

use crate::character::{Character, LineProperty, DEFAULT_CHAR, LINE_DEFAULT};
use crate::decoder::DecodingOptions;
use crate::screen::{Screen, ScreenRect};

/// Units for [`ScreenWindow::scroll_by`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelativeScrollMode {
    Lines,
    Pages,
}

/// State changes since the renderer last drained events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowEvent {
    /// New output arrived; the image should be repainted.
    OutputChanged,
    /// The window scrolled to this line.
    Scrolled(usize),
    SelectionChanged,
    CurrentResultLineChanged,
}

/// A sliding window over a screen and its history.
pub struct ScreenWindow {
    window_buffer: Vec<Character>,
    buffer_needs_update: bool,
    window_lines: usize,
    current_line: usize,
    current_result_line: Option<usize>,
    track_output: bool,
    scroll_count: isize,
    events: Vec<WindowEvent>,
}

impl Default for ScreenWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenWindow {
    pub fn new() -> Self {
        Self {
            window_buffer: Vec::new(),
            buffer_needs_update: true,
            window_lines: 1,
            current_line: 0,
            current_result_line: None,
            track_output: true,
            scroll_count: 0,
            events: Vec::new(),
        }
    }

    /// Resizes the window; the next `get_image` reallocates.
    pub fn set_window_lines(&mut self, lines: usize) {
        debug_assert!(lines > 0);
        self.window_lines = lines.max(1);
    }

    pub fn window_lines(&self) -> usize {
        self.window_lines
    }

    pub fn window_columns(&self, screen: &Screen) -> usize {
        screen.columns()
    }

    /// Total lines in history plus screen.
    pub fn line_count(&self, screen: &Screen) -> usize {
        screen.hist_lines() + screen.lines()
    }

    pub fn column_count(&self, screen: &Screen) -> usize {
        screen.columns()
    }

    /// First visible line, clamped so the window never runs past the end.
    pub fn current_line(&self, screen: &Screen) -> usize {
        let max_line = self.line_count(screen).saturating_sub(self.window_lines);
        self.current_line.min(max_line)
    }

    fn end_window_line(&self, screen: &Screen) -> usize {
        (self.current_line(screen) + self.window_lines - 1).min(self.line_count(screen) - 1)
    }

    /// Cursor position in screen coordinates.
    pub fn cursor_position(&self, screen: &Screen) -> (usize, usize) {
        (screen.cursor_x(), screen.cursor_y())
    }

    // -----------------------------------------------------------------
    // image

    /// Returns the visible image, rebuilding the internal buffer when the
    /// window is dirty or its size changed. Area beyond the end of the
    /// screen is padded with default cells.
    pub fn get_image(&mut self, screen: &Screen) -> &[Character] {
        let size = self.window_lines * screen.columns();
        if self.window_buffer.len() != size {
            self.window_buffer = vec![DEFAULT_CHAR; size];
            self.buffer_needs_update = true;
        }

        if !self.buffer_needs_update {
            return &self.window_buffer;
        }

        let current_line = self.current_line(screen);
        let end_line = self.end_window_line(screen);
        screen.get_image(&mut self.window_buffer, current_line, end_line);

        self.fill_unused_area(screen);

        self.buffer_needs_update = false;
        &self.window_buffer
    }

    fn fill_unused_area(&mut self, screen: &Screen) {
        let screen_end_line = self.line_count(screen) - 1;
        let window_end_line = self.current_line(screen) + self.window_lines - 1;

        if window_end_line <= screen_end_line {
            return;
        }
        let unused_lines = window_end_line - screen_end_line;
        let cells_to_fill = unused_lines * screen.columns();
        let len = self.window_buffer.len();
        self.window_buffer[len - cells_to_fill..].fill(DEFAULT_CHAR);
    }

    /// Per-line properties for the window, padded to the window height.
    pub fn get_line_properties(&self, screen: &Screen) -> Vec<LineProperty> {
        let mut result =
            screen.get_line_properties(self.current_line(screen), self.end_window_line(screen));
        result.resize(self.window_lines, LINE_DEFAULT);
        result
    }

    // -----------------------------------------------------------------
    // selection

    pub fn selected_text(&self, screen: &Screen, options: DecodingOptions) -> String {
        screen.selected_text(options)
    }

    /// Selection start in window coordinates.
    pub fn selection_start(&self, screen: &Screen) -> (usize, isize) {
        let (column, line) = screen.selection_start();
        (column, line as isize - self.current_line(screen) as isize)
    }

    pub fn selection_end(&self, screen: &Screen) -> (usize, isize) {
        let (column, line) = screen.selection_end();
        (column, line as isize - self.current_line(screen) as isize)
    }

    pub fn set_selection_start(
        &mut self,
        screen: &mut Screen,
        column: usize,
        line: usize,
        block_mode: bool,
    ) {
        screen.set_selection_start(column, line + self.current_line(screen), block_mode);
        self.buffer_needs_update = true;
        self.events.push(WindowEvent::SelectionChanged);
    }

    pub fn set_selection_end(&mut self, screen: &mut Screen, column: usize, line: usize) {
        screen.set_selection_end(column, line + self.current_line(screen));
        self.buffer_needs_update = true;
        self.events.push(WindowEvent::SelectionChanged);
    }

    /// Selects whole window lines `start..=end`.
    pub fn set_selection_by_line_range(&mut self, screen: &mut Screen, start: usize, end: usize) {
        screen.clear_selection();
        screen.set_selection_start(0, start, false);
        screen.set_selection_end(screen.columns(), end);
        self.buffer_needs_update = true;
        self.events.push(WindowEvent::SelectionChanged);
    }

    pub fn is_selected(&self, screen: &Screen, column: usize, line: usize) -> bool {
        let line = (line + self.current_line(screen)).min(self.end_window_line(screen));
        screen.is_selected(column, line)
    }

    pub fn clear_selection(&mut self, screen: &mut Screen) {
        screen.clear_selection();
        self.events.push(WindowEvent::SelectionChanged);
    }

    // -----------------------------------------------------------------
    // scrolling

    /// Scrolls so `line` is the first visible line; out-of-range values
    /// clamp to the valid range.
    pub fn scroll_to(&mut self, screen: &Screen, line: isize) {
        let max_current_line = self.line_count(screen).saturating_sub(self.window_lines);
        let line = line.clamp(0, max_current_line as isize) as usize;

        let delta = line as isize - self.current_line as isize;
        self.current_line = line;
        self.scroll_count += delta;

        self.buffer_needs_update = true;
        self.events.push(WindowEvent::Scrolled(self.current_line));
    }

    /// Relative scroll in lines or pages; half pages when `full_page` is
    /// unset.
    pub fn scroll_by(
        &mut self,
        screen: &Screen,
        mode: RelativeScrollMode,
        amount: isize,
        full_page: bool,
    ) {
        let delta = match mode {
            RelativeScrollMode::Lines => amount,
            RelativeScrollMode::Pages => {
                if full_page {
                    amount * self.window_lines as isize
                } else {
                    amount * (self.window_lines / 2) as isize
                }
            }
        };
        self.scroll_to(screen, self.current_line(screen) as isize + delta);
    }

    pub fn at_end_of_output(&self, screen: &Screen) -> bool {
        self.current_line(screen) == self.line_count(screen).saturating_sub(self.window_lines)
    }

    /// When set, the window follows new output to the bottom.
    pub fn set_track_output(&mut self, track_output: bool) {
        self.track_output = track_output;
    }

    pub fn track_output(&self) -> bool {
        self.track_output
    }

    /// Net lines scrolled since the last reset, positive downward.
    pub fn scroll_count(&self) -> isize {
        self.scroll_count
    }

    pub fn reset_scroll_count(&mut self) {
        self.scroll_count = 0;
    }

    /// The sub-region the renderer may scroll-blit: the screen's last
    /// scrolled region when this window is screen-sized and at the
    /// bottom, the whole window otherwise.
    pub fn scroll_region(&self, screen: &Screen) -> ScreenRect {
        let equal_to_screen_size = self.window_lines == screen.lines();
        if self.at_end_of_output(screen) && equal_to_screen_size {
            screen.last_scrolled_region()
        } else {
            ScreenRect {
                left: 0,
                top: 0,
                columns: self.window_columns(screen),
                lines: self.window_lines,
            }
        }
    }

    // -----------------------------------------------------------------
    // search result highlight

    pub fn current_result_line(&self) -> Option<usize> {
        self.current_result_line
    }

    pub fn set_current_result_line(&mut self, line: usize) {
        if self.current_result_line == Some(line) {
            return;
        }
        self.current_result_line = Some(line);
        self.events.push(WindowEvent::CurrentResultLineChanged);
    }

    /// Drops the highlight; embedders call this when the surrounding
    /// output is cleared.
    pub fn reset_current_result_line(&mut self) {
        if self.current_result_line.take().is_some() {
            self.events.push(WindowEvent::CurrentResultLineChanged);
        }
    }

    // -----------------------------------------------------------------
    // output notifications

    /// Called after the screen processed output. Tracking windows move to
    /// the bottom; anchored windows compensate for lines the history
    /// dropped so the view keeps showing the same content.
    pub fn notify_output_changed(&mut self, screen: &Screen) {
        if self.track_output {
            self.scroll_count -= screen.scrolled_lines();
            self.current_line = (screen.hist_lines() as isize
                - (self.window_lines as isize - screen.lines() as isize))
                .max(0) as usize;
        } else {
            self.current_line = self
                .current_line
                .saturating_sub(screen.dropped_lines())
                .min(screen.hist_lines());
        }

        self.buffer_needs_update = true;
        self.events.push(WindowEvent::OutputChanged);
    }

    /// Events accumulated since the last drain.
    pub fn take_events(&mut self) -> Vec<WindowEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryType;

    fn write_str(screen: &mut Screen, text: &str) {
        for c in text.chars() {
            screen.display_character(c as u32);
        }
    }

    fn window_row_text(window: &mut ScreenWindow, screen: &Screen, row: usize) -> String {
        let columns = screen.columns();
        let image = window.get_image(screen);
        image[row * columns..(row + 1) * columns]
            .iter()
            .filter(|c| c.character != 0)
            .filter_map(|c| char::from_u32(c.character))
            .collect::<String>()
            .trim_end()
            .to_owned()
    }

    fn feed_lines(screen: &mut Screen, count: usize) {
        for i in 0..count {
            write_str(screen, &format!("line{i}"));
            screen.next_line();
        }
    }

    #[test]
    fn test_image_pads_beyond_screen_end() {
        let mut screen = Screen::new(4, 10);
        write_str(&mut screen, "top");
        let mut window = ScreenWindow::new();
        window.set_window_lines(6);

        let image = window.get_image(&screen);
        assert_eq!(image.len(), 60);
        assert_eq!(image[41], DEFAULT_CHAR);
        assert_eq!(window_row_text(&mut window, &screen, 0), "top");
    }

    #[test]
    fn test_tracking_window_follows_output() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);

        feed_lines(&mut screen, 10);
        window.notify_output_changed(&screen);

        // 10 lines fed on a 4-line screen leaves 7 in history
        assert_eq!(screen.hist_lines(), 7);
        assert_eq!(window.current_line(&screen), 7);
        assert!(window.at_end_of_output(&screen));
        assert_eq!(window_row_text(&mut window, &screen, 0), "line7");
    }

    #[test]
    fn test_anchored_window_survives_history_drops() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(5), false);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);

        feed_lines(&mut screen, 9);
        window.notify_output_changed(&screen);
        assert_eq!(screen.hist_lines(), 5);

        // scroll up into history and stop tracking
        window.set_track_output(false);
        window.scroll_to(&screen, 2);
        screen.reset_dropped_lines();

        // two more lines: the bounded store evicts two
        feed_lines(&mut screen, 2);
        assert_eq!(screen.dropped_lines(), 2);
        window.notify_output_changed(&screen);

        // the anchor moved up with the evicted lines
        assert_eq!(window.current_line(&screen), 0);
    }

    #[test]
    fn test_scroll_to_clamps() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        feed_lines(&mut screen, 10);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);

        window.scroll_to(&screen, 100);
        assert_eq!(window.current_line(&screen), 7);
        window.scroll_to(&screen, -5);
        assert_eq!(window.current_line(&screen), 0);
    }

    #[test]
    fn test_scroll_by_pages_and_half_pages() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        feed_lines(&mut screen, 20);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);
        window.notify_output_changed(&screen);
        assert_eq!(window.current_line(&screen), 17);

        window.scroll_by(&screen, RelativeScrollMode::Pages, -1, true);
        assert_eq!(window.current_line(&screen), 13);
        window.scroll_by(&screen, RelativeScrollMode::Pages, -1, false);
        assert_eq!(window.current_line(&screen), 11);
        window.scroll_by(&screen, RelativeScrollMode::Lines, 3, true);
        assert_eq!(window.current_line(&screen), 14);
    }

    #[test]
    fn test_scroll_count_accumulates() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        feed_lines(&mut screen, 10);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);

        window.scroll_to(&screen, 3);
        window.scroll_to(&screen, 5);
        assert_eq!(window.scroll_count(), 5);
        window.reset_scroll_count();
        assert_eq!(window.scroll_count(), 0);
    }

    #[test]
    fn test_selection_translates_window_coordinates() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        feed_lines(&mut screen, 8);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);
        window.notify_output_changed(&screen);
        let anchor = window.current_line(&screen);
        assert_eq!(anchor, 5);

        // select window line 0, which is absolute line 5
        window.set_selection_start(&mut screen, 0, 0, false);
        window.set_selection_end(&mut screen, 4, 0);
        assert!(window.is_selected(&screen, 0, 0));
        assert_eq!(
            window.selected_text(&screen, DecodingOptions::TRIM_TRAILING_WHITESPACE),
            "line5"
        );

        let (column, line) = window.selection_start(&screen);
        assert_eq!((column, line), (0, 0));
    }

    #[test]
    fn test_line_properties_padded_to_window() {
        let mut screen = Screen::new(4, 10);
        for _ in 0..15 {
            screen.display_character('w' as u32);
        }
        let mut window = ScreenWindow::new();
        window.set_window_lines(6);
        let props = window.get_line_properties(&screen);
        assert_eq!(props.len(), 6);
        assert!(props[0].contains(LineProperty::WRAPPED));
        assert!(!props[1].contains(LineProperty::WRAPPED));
    }

    #[test]
    fn test_scroll_region_hint_when_screen_sized() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);

        feed_lines(&mut screen, 6);
        window.notify_output_changed(&screen);
        let region = window.scroll_region(&screen);
        assert_eq!(region, screen.last_scrolled_region());

        // scrolled away from the bottom: full-window repaint
        window.set_track_output(false);
        window.scroll_to(&screen, 0);
        let region = window.scroll_region(&screen);
        assert_eq!(region.lines, 4);
        assert_eq!(region.top, 0);
    }

    #[test]
    fn test_events_are_drained() {
        let mut screen = Screen::new(4, 20);
        screen.set_scroll(HistoryType::Bounded(100), false);
        feed_lines(&mut screen, 10);
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);

        window.notify_output_changed(&screen);
        window.scroll_to(&screen, 2);
        window.set_current_result_line(3);

        let events = window.take_events();
        assert_eq!(
            events,
            vec![
                WindowEvent::OutputChanged,
                WindowEvent::Scrolled(2),
                WindowEvent::CurrentResultLineChanged,
            ]
        );
        assert!(window.take_events().is_empty());
    }

    #[test]
    fn test_current_result_line_reset() {
        let mut window = ScreenWindow::new();
        window.set_current_result_line(7);
        assert_eq!(window.current_result_line(), Some(7));
        window.take_events();

        window.set_current_result_line(7);
        assert!(window.take_events().is_empty());

        window.reset_current_result_line();
        assert_eq!(window.current_result_line(), None);
        assert_eq!(window.take_events(), vec![WindowEvent::CurrentResultLineChanged]);
    }

    #[test]
    fn test_image_rebuild_only_when_dirty() {
        let mut screen = Screen::new(4, 10);
        write_str(&mut screen, "before");
        let mut window = ScreenWindow::new();
        window.set_window_lines(4);
        assert_eq!(window_row_text(&mut window, &screen, 0), "before");

        // without a notification the cached image is returned
        screen.clear_entire_screen();
        assert_eq!(window_row_text(&mut window, &screen, 0), "before");

        window.notify_output_changed(&screen);
        assert_eq!(window_row_text(&mut window, &screen, 0), "");
    }
}
