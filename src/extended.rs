//! Extended character intern table
//!
//! Grapheme clusters that do not fit in a single code point (a base
//! character plus combining marks) are interned in a process-wide table.
//! Cells store the returned key in their `character` field with the
//! EXTENDED_CHAR rendition flag set.
//!
//! Keys stay valid for the lifetime of any referring cell. Unreferenced
//! entries are reclaimed lazily: once the table grows past a high-water
//! mark, the caller-supplied used-key set is consulted and dead entries
//! dropped.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Combining sequences are capped at this many code points; further marks
/// are dropped.
pub const MAX_EXTENDED_CHAR_LENGTH: usize = 3;

/// Table size at which the next insert triggers a reclamation pass.
const RECLAIM_THRESHOLD: usize = 1024;

struct ExtendedCharTable {
    forward: HashMap<u32, Vec<u32>>,
    reverse: HashMap<Vec<u32>, u32>,
}

static TABLE: Lazy<Mutex<ExtendedCharTable>> = Lazy::new(|| {
    Mutex::new(ExtendedCharTable {
        forward: HashMap::new(),
        reverse: HashMap::new(),
    })
});

fn hash_key(codepoints: &[u32]) -> u32 {
    let mut hasher = DefaultHasher::new();
    codepoints.hash(&mut hasher);
    hasher.finish() as u32
}

/// Interns `codepoints` and returns a stable key for them.
///
/// `used_keys` produces the set of keys currently referenced by live
/// cells; it is only invoked when the table is due for reclamation.
pub fn create_extended_char(codepoints: &[u32], used_keys: impl FnOnce() -> HashSet<u32>) -> u32 {
    let codepoints = &codepoints[..codepoints.len().min(MAX_EXTENDED_CHAR_LENGTH)];
    let mut table = TABLE.lock().expect("extended char table poisoned");

    if let Some(key) = table.reverse.get(codepoints) {
        return *key;
    }

    if table.forward.len() >= RECLAIM_THRESHOLD {
        let used = used_keys();
        let forward = std::mem::take(&mut table.forward);
        table.forward = forward
            .into_iter()
            .filter(|(key, _)| used.contains(key))
            .collect();
        let reverse = table
            .forward
            .iter()
            .map(|(key, seq)| (seq.clone(), *key))
            .collect();
        table.reverse = reverse;
    }

    // Resolve hash collisions by bumping the key.
    let mut key = hash_key(codepoints);
    while table.forward.contains_key(&key) {
        key = key.wrapping_add(1);
    }

    table.forward.insert(key, codepoints.to_vec());
    table.reverse.insert(codepoints.to_vec(), key);
    key
}

/// Looks up the code-point sequence behind `key`.
pub fn lookup_extended_char(key: u32) -> Option<Vec<u32>> {
    let table = TABLE.lock().expect("extended char table poisoned");
    table.forward.get(&key).cloned()
}
