//! Scrollback history stores
//!
//! Lines retired from the top of the screen land in one of three stores
//! behind a common trait:
//!
//! - none: stores nothing
//! - compact: a bounded in-memory ring, column-reflow capable
//! - file: unlimited, backed by an auto-deleted temporary file
//!
//! Appending is a two-step protocol: `add_cells` supplies the content,
//! `add_line` seals it with the wrapped flag. Reads pad with the default
//! cell beyond the stored line length.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::character::{Character, RenditionFlags, DEFAULT_CHAR};
use crate::color::CharacterColor;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("failed to create history temp file: {0}")]
    Create(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Selects a scrollback implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryType {
    /// No scrollback.
    None,
    /// In-memory ring of at most this many lines.
    Bounded(usize),
    /// Temp-file-backed, no line limit.
    Unlimited,
}

impl HistoryType {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, HistoryType::None)
    }

    /// Maximum line count, or `None` for unlimited.
    pub fn max_lines(&self) -> Option<usize> {
        match self {
            HistoryType::None => Some(0),
            HistoryType::Bounded(n) => Some(*n),
            HistoryType::Unlimited => None,
        }
    }

    /// Builds an empty store of this type.
    pub fn create(&self) -> Result<Box<dyn HistoryScroll>> {
        match self {
            HistoryType::None => Ok(Box::new(HistoryScrollNone)),
            HistoryType::Bounded(n) => Ok(Box::new(CompactHistoryScroll::new(*n))),
            HistoryType::Unlimited => Ok(Box::new(HistoryScrollFile::new()?)),
        }
    }
}

/// Random-access store of retired lines.
pub trait HistoryScroll {
    fn history_type(&self) -> HistoryType;

    /// Whether this store retains anything at all.
    fn has_scroll(&self) -> bool {
        true
    }

    fn lines(&self) -> usize;

    fn line_len(&self, line: usize) -> usize;

    /// Copies `count` cells starting at `start` into `out`, padding with
    /// the default cell beyond the stored line length. Out-of-range line
    /// indices leave `out` fully defaulted.
    fn get_cells(&self, line: usize, start: usize, count: usize, out: &mut [Character]);

    fn is_wrapped(&self, line: usize) -> bool;

    /// Stages the content of the next line.
    fn add_cells(&mut self, cells: &[Character]);

    /// Seals the staged line, recording whether it continues into the
    /// following one.
    fn add_line(&mut self, wrapped: bool);

    /// Maximum line count, or `None` for unlimited.
    fn max_lines(&self) -> Option<usize>;

    fn supports_reflow(&self) -> bool {
        false
    }

    /// Re-breaks wrapped runs at `new_columns`. Returns the number of
    /// lines dropped by capacity enforcement.
    fn reflow(&mut self, _new_columns: usize) -> usize {
        0
    }

    /// Removes the newest line (used to migrate it back into the screen
    /// during resize).
    fn remove_last_line(&mut self);
}

/// Copies every line of `old` into `new`, oldest first.
pub fn transfer(old: &dyn HistoryScroll, new: &mut dyn HistoryScroll) {
    let mut buffer = Vec::new();
    for line in 0..old.lines() {
        let len = old.line_len(line);
        buffer.resize(len, DEFAULT_CHAR);
        old.get_cells(line, 0, len, &mut buffer);
        new.add_cells(&buffer);
        new.add_line(old.is_wrapped(line));
    }
}

// ---------------------------------------------------------------------------
// none

/// The no-op store.
pub struct HistoryScrollNone;

impl HistoryScroll for HistoryScrollNone {
    fn history_type(&self) -> HistoryType {
        HistoryType::None
    }

    fn has_scroll(&self) -> bool {
        false
    }

    fn lines(&self) -> usize {
        0
    }

    fn line_len(&self, _line: usize) -> usize {
        0
    }

    fn get_cells(&self, _line: usize, _start: usize, _count: usize, out: &mut [Character]) {
        out.fill(DEFAULT_CHAR);
    }

    fn is_wrapped(&self, _line: usize) -> bool {
        false
    }

    fn add_cells(&mut self, _cells: &[Character]) {}

    fn add_line(&mut self, _wrapped: bool) {}

    fn max_lines(&self) -> Option<usize> {
        Some(0)
    }

    fn remove_last_line(&mut self) {}
}

// ---------------------------------------------------------------------------
// compact (bounded ring)

struct CompactLine {
    cells: Vec<Character>,
    wrapped: bool,
}

/// Bounded in-memory store. The oldest line is dropped on overflow.
pub struct CompactHistoryScroll {
    lines: VecDeque<CompactLine>,
    max_lines: usize,
}

impl CompactHistoryScroll {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines,
        }
    }

    fn enforce_capacity(&mut self) -> usize {
        let mut dropped = 0;
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            dropped += 1;
        }
        dropped
    }
}

impl HistoryScroll for CompactHistoryScroll {
    fn history_type(&self) -> HistoryType {
        HistoryType::Bounded(self.max_lines)
    }

    fn lines(&self) -> usize {
        self.lines.len()
    }

    fn line_len(&self, line: usize) -> usize {
        self.lines.get(line).map_or(0, |l| l.cells.len())
    }

    fn get_cells(&self, line: usize, start: usize, count: usize, out: &mut [Character]) {
        let len = count.min(out.len());
        let out = &mut out[..len];
        out.fill(DEFAULT_CHAR);
        let Some(stored) = self.lines.get(line) else {
            debug!(line, total = self.lines.len(), "history read out of range");
            return;
        };
        if start >= stored.cells.len() {
            return;
        }
        let available = &stored.cells[start..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
    }

    fn is_wrapped(&self, line: usize) -> bool {
        self.lines.get(line).is_some_and(|l| l.wrapped)
    }

    fn add_cells(&mut self, cells: &[Character]) {
        // Trailing blank cells are not stored; reads pad on demand.
        let mut len = cells.len();
        while len > 0 && cells[len - 1] == DEFAULT_CHAR {
            len -= 1;
        }
        self.lines.push_back(CompactLine {
            cells: cells[..len].to_vec(),
            wrapped: false,
        });
        self.enforce_capacity();
    }

    fn add_line(&mut self, wrapped: bool) {
        if let Some(last) = self.lines.back_mut() {
            last.wrapped = wrapped;
        }
    }

    fn max_lines(&self) -> Option<usize> {
        Some(self.max_lines)
    }

    fn supports_reflow(&self) -> bool {
        true
    }

    fn reflow(&mut self, new_columns: usize) -> usize {
        if new_columns == 0 {
            return 0;
        }

        // Join wrapped runs into logical lines. A trailing wrapped line
        // (whose continuation still lives on the screen) keeps its flag.
        let mut logical: Vec<(Vec<Character>, bool)> = Vec::new();
        let mut current: Vec<Character> = Vec::new();
        let mut open_chain = false;
        for line in self.lines.drain(..) {
            current.extend(line.cells);
            open_chain = line.wrapped;
            if !line.wrapped {
                logical.push((std::mem::take(&mut current), false));
            }
        }
        if open_chain {
            logical.push((std::mem::take(&mut current), true));
        }

        // Re-split each logical line at the new width.
        for (cells, tail_wrapped) in logical {
            if cells.is_empty() {
                self.lines.push_back(CompactLine {
                    cells,
                    wrapped: tail_wrapped,
                });
                continue;
            }
            let mut chunks = cells.chunks(new_columns).peekable();
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none();
                self.lines.push_back(CompactLine {
                    cells: chunk.to_vec(),
                    wrapped: if last { tail_wrapped } else { true },
                });
            }
        }

        self.enforce_capacity()
    }

    fn remove_last_line(&mut self) {
        self.lines.pop_back();
    }
}

// ---------------------------------------------------------------------------
// file-backed (unlimited)

const CELL_RECORD_SIZE: usize = 16;
const INDEX_RECORD_SIZE: usize = 8;

fn encode_cell(cell: &Character, out: &mut [u8]) {
    out[0..4].copy_from_slice(&cell.character.to_le_bytes());
    let (space, u, v, w) = cell.foreground_color.parts();
    out[4..8].copy_from_slice(&[space, u, v, w]);
    let (space, u, v, w) = cell.background_color.parts();
    out[8..12].copy_from_slice(&[space, u, v, w]);
    out[12..14].copy_from_slice(&cell.rendition.bits().to_le_bytes());
    out[14] = cell.is_real_character as u8;
    out[15] = 0;
}

fn decode_cell(data: &[u8]) -> Character {
    Character {
        character: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        foreground_color: CharacterColor::from_parts(data[4], data[5], data[6], data[7]),
        background_color: CharacterColor::from_parts(data[8], data[9], data[10], data[11]),
        rendition: RenditionFlags::from_bits_retain(u16::from_le_bytes([data[12], data[13]])),
        is_real_character: data[14] != 0,
    }
}

/// An append-only byte stream in an unlinked temporary file.
struct HistoryFile {
    file: File,
    length: u64,
    write_failed: bool,
}

impl HistoryFile {
    fn new() -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile()?,
            length: 0,
            write_failed: false,
        })
    }

    fn add(&mut self, bytes: &[u8]) {
        match self.file.write_all_at(bytes, self.length) {
            Ok(()) => self.length += bytes.len() as u64,
            Err(err) => {
                if !self.write_failed {
                    warn!(%err, "history file write failed; dropping data");
                    self.write_failed = true;
                }
            }
        }
    }

    /// Reads `out.len()` bytes at `loc`. Returns false on out-of-range or
    /// I/O failure.
    fn get(&self, out: &mut [u8], loc: u64) -> bool {
        if loc + out.len() as u64 > self.length {
            debug!(loc, len = out.len(), "history file read out of range");
            return false;
        }
        match self.file.read_exact_at(out, loc) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "history file read failed");
                false
            }
        }
    }

    fn len(&self) -> u64 {
        self.length
    }

    fn truncate(&mut self, length: u64) {
        self.length = self.length.min(length);
    }
}

/// Unlimited store backed by three temp-file streams: cell records, line
/// end offsets, and wrap flags. Not reflow capable; line positions are
/// absolute.
pub struct HistoryScrollFile {
    index: HistoryFile,
    cells: HistoryFile,
    flags: HistoryFile,
}

impl HistoryScrollFile {
    pub fn new() -> Result<Self> {
        Ok(Self {
            index: HistoryFile::new().map_err(HistoryError::Create)?,
            cells: HistoryFile::new().map_err(HistoryError::Create)?,
            flags: HistoryFile::new().map_err(HistoryError::Create)?,
        })
    }

    fn start_of_line(&self, line: usize) -> u64 {
        if line == 0 {
            return 0;
        }
        let mut record = [0u8; INDEX_RECORD_SIZE];
        if self
            .index
            .get(&mut record, ((line - 1) * INDEX_RECORD_SIZE) as u64)
        {
            u64::from_le_bytes(record)
        } else {
            0
        }
    }

    fn end_of_line(&self, line: usize) -> u64 {
        self.start_of_line(line + 1)
    }
}

impl HistoryScroll for HistoryScrollFile {
    fn history_type(&self) -> HistoryType {
        HistoryType::Unlimited
    }

    fn lines(&self) -> usize {
        (self.index.len() as usize) / INDEX_RECORD_SIZE
    }

    fn line_len(&self, line: usize) -> usize {
        if line >= self.lines() {
            return 0;
        }
        ((self.end_of_line(line) - self.start_of_line(line)) as usize) / CELL_RECORD_SIZE
    }

    fn get_cells(&self, line: usize, start: usize, count: usize, out: &mut [Character]) {
        let len = count.min(out.len());
        let out = &mut out[..len];
        out.fill(DEFAULT_CHAR);
        if line >= self.lines() {
            debug!(line, total = self.lines(), "history read out of range");
            return;
        }

        let len = self.line_len(line);
        if start >= len {
            return;
        }
        let available = (len - start).min(out.len());
        let offset = self.start_of_line(line) + (start * CELL_RECORD_SIZE) as u64;

        let mut raw = vec![0u8; available * CELL_RECORD_SIZE];
        if !self.cells.get(&mut raw, offset) {
            return;
        }
        for (cell, record) in out.iter_mut().zip(raw.chunks_exact(CELL_RECORD_SIZE)) {
            *cell = decode_cell(record);
        }
    }

    fn is_wrapped(&self, line: usize) -> bool {
        let mut flag = [0u8; 1];
        self.flags.get(&mut flag, line as u64) && flag[0] != 0
    }

    fn add_cells(&mut self, cells: &[Character]) {
        let mut raw = vec![0u8; cells.len() * CELL_RECORD_SIZE];
        for (cell, record) in cells.iter().zip(raw.chunks_exact_mut(CELL_RECORD_SIZE)) {
            encode_cell(cell, record);
        }
        self.cells.add(&raw);
    }

    fn add_line(&mut self, wrapped: bool) {
        self.index.add(&self.cells.len().to_le_bytes());
        self.flags.add(&[wrapped as u8]);
    }

    fn max_lines(&self) -> Option<usize> {
        None
    }

    fn remove_last_line(&mut self) {
        let count = self.lines();
        if count == 0 {
            return;
        }
        let start = self.start_of_line(count - 1);
        self.cells.truncate(start);
        self.index
            .truncate(((count - 1) * INDEX_RECORD_SIZE) as u64);
        self.flags.truncate((count - 1) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::DEFAULT_RENDITION;
    use crate::color::ColorSpace;

    fn line_of(text: &str) -> Vec<Character> {
        text.chars()
            .map(|c| {
                Character::new(
                    c as u32,
                    CharacterColor::default_foreground(),
                    CharacterColor::default_background(),
                    DEFAULT_RENDITION,
                    true,
                )
            })
            .collect()
    }

    fn read_line(store: &dyn HistoryScroll, line: usize) -> String {
        let len = store.line_len(line);
        let mut cells = vec![DEFAULT_CHAR; len];
        store.get_cells(line, 0, len, &mut cells);
        cells
            .iter()
            .filter_map(|c| char::from_u32(c.character))
            .collect()
    }

    #[test]
    fn test_none_store_is_empty() {
        let mut store = HistoryScrollNone;
        store.add_cells(&line_of("hello"));
        store.add_line(false);
        assert_eq!(store.lines(), 0);
        assert!(!store.has_scroll());
    }

    #[test]
    fn test_compact_append_and_read() {
        let mut store = CompactHistoryScroll::new(10);
        store.add_cells(&line_of("hello"));
        store.add_line(true);
        store.add_cells(&line_of("world"));
        store.add_line(false);

        assert_eq!(store.lines(), 2);
        assert!(store.is_wrapped(0));
        assert!(!store.is_wrapped(1));
        assert_eq!(read_line(&store, 0), "hello");
        assert_eq!(read_line(&store, 1), "world");
    }

    #[test]
    fn test_compact_overflow_drops_oldest() {
        let mut store = CompactHistoryScroll::new(2);
        for text in ["one", "two", "three"] {
            store.add_cells(&line_of(text));
            store.add_line(false);
        }
        assert_eq!(store.lines(), 2);
        assert_eq!(read_line(&store, 0), "two");
        assert_eq!(read_line(&store, 1), "three");
    }

    #[test]
    fn test_get_cells_pads_past_line_length() {
        let mut store = CompactHistoryScroll::new(10);
        store.add_cells(&line_of("ab"));
        store.add_line(false);

        let mut cells = [Character::new(
            'x' as u32,
            CharacterColor::undefined(),
            CharacterColor::undefined(),
            DEFAULT_RENDITION,
            true,
        ); 5];
        store.get_cells(0, 0, 5, &mut cells);
        assert_eq!(cells[0].character, 'a' as u32);
        assert_eq!(cells[1].character, 'b' as u32);
        assert_eq!(cells[2], DEFAULT_CHAR);
        assert_eq!(cells[4], DEFAULT_CHAR);
    }

    #[test]
    fn test_compact_reflow_rejoins_and_splits() {
        let mut store = CompactHistoryScroll::new(100);
        // One logical 10-cell line stored as 5+5 at width 5.
        store.add_cells(&line_of("abcde"));
        store.add_line(true);
        store.add_cells(&line_of("fghij"));
        store.add_line(false);

        let dropped = store.reflow(4);
        assert_eq!(dropped, 0);
        assert_eq!(store.lines(), 3);
        assert_eq!(read_line(&store, 0), "abcd");
        assert_eq!(read_line(&store, 1), "efgh");
        assert_eq!(read_line(&store, 2), "ij");
        assert!(store.is_wrapped(0));
        assert!(store.is_wrapped(1));
        assert!(!store.is_wrapped(2));
    }

    #[test]
    fn test_compact_reflow_keeps_open_chain_wrapped() {
        let mut store = CompactHistoryScroll::new(100);
        // The continuation of this line still lives on the screen.
        store.add_cells(&line_of("abcd"));
        store.add_line(true);

        store.reflow(2);
        assert_eq!(store.lines(), 2);
        assert!(store.is_wrapped(0));
        assert!(store.is_wrapped(1));
    }

    #[test]
    fn test_compact_reflow_reports_capacity_drops() {
        let mut store = CompactHistoryScroll::new(2);
        store.add_cells(&line_of("abcdef"));
        store.add_line(false);
        store.add_cells(&line_of("x"));
        store.add_line(false);

        // 6-cell line becomes 3 lines at width 2, plus "x": 4 total, 2 kept.
        let dropped = store.reflow(2);
        assert_eq!(dropped, 2);
        assert_eq!(store.lines(), 2);
        assert_eq!(read_line(&store, 0), "ef");
        assert_eq!(read_line(&store, 1), "x");
    }

    #[test]
    fn test_file_store_roundtrip() {
        let mut store = HistoryScrollFile::new().unwrap();
        store.add_cells(&line_of("first line"));
        store.add_line(true);
        store.add_cells(&line_of("second"));
        store.add_line(false);

        assert_eq!(store.lines(), 2);
        assert_eq!(store.line_len(0), 10);
        assert!(store.is_wrapped(0));
        assert!(!store.is_wrapped(1));
        assert_eq!(read_line(&store, 0), "first line");
        assert_eq!(read_line(&store, 1), "second");
        assert_eq!(store.max_lines(), None);
    }

    #[test]
    fn test_file_store_preserves_attributes() {
        let mut store = HistoryScrollFile::new().unwrap();
        let mut cells = line_of("z");
        cells[0].rendition |= RenditionFlags::BOLD;
        cells[0].foreground_color = CharacterColor::new(ColorSpace::System, 1);
        store.add_cells(&cells);
        store.add_line(false);

        let mut out = [DEFAULT_CHAR; 1];
        store.get_cells(0, 0, 1, &mut out);
        assert_eq!(out[0], cells[0]);
    }

    #[test]
    fn test_file_store_remove_last_line() {
        let mut store = HistoryScrollFile::new().unwrap();
        store.add_cells(&line_of("keep"));
        store.add_line(false);
        store.add_cells(&line_of("drop"));
        store.add_line(false);

        store.remove_last_line();
        assert_eq!(store.lines(), 1);
        assert_eq!(read_line(&store, 0), "keep");

        // The next append reuses the space cleanly.
        store.add_cells(&line_of("new"));
        store.add_line(true);
        assert_eq!(read_line(&store, 1), "new");
        assert!(store.is_wrapped(1));
    }

    #[test]
    fn test_transfer_between_store_types() {
        let mut compact = CompactHistoryScroll::new(10);
        compact.add_cells(&line_of("alpha"));
        compact.add_line(true);
        compact.add_cells(&line_of("beta"));
        compact.add_line(false);

        let mut file = HistoryScrollFile::new().unwrap();
        transfer(&compact, &mut file);
        assert_eq!(file.lines(), 2);
        assert_eq!(read_line(&file, 0), "alpha");
        assert!(file.is_wrapped(0));
        assert_eq!(read_line(&file, 1), "beta");
    }
}
