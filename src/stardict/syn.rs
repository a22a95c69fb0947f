//! Synonym index over an optional `.syn` file.
//!
//! Each record is a NUL-terminated synonym string followed by a big-endian
//! u32 index into the headword index. A matching lookup therefore reports
//! the *target* headword's index, so callers treat synonym hits and primary
//! hits uniformly.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::debug;

use super::error::{DictError, Result};
use super::mapfile::MapFile;
use super::utils::{ascii_casefold_eq, nul_terminated, read_u32_be, stardict_strcmp};

/// The `.syn` file, memory-mapped for the dictionary's lifetime. An absent
/// file loads as an empty index.
pub struct SynIndex {
    map: Option<MapFile>,
    /// Start of each record, plus an end-of-buffer sentinel. Empty when no
    /// synonyms exist.
    positions: Vec<usize>,
}

impl SynIndex {
    pub fn empty() -> SynIndex {
        SynIndex {
            map: None,
            positions: Vec::new(),
        }
    }

    pub fn load(path: &Path, syn_wordcount: u32) -> Result<SynIndex> {
        if syn_wordcount == 0 || !path.exists() {
            return Ok(SynIndex::empty());
        }
        let size = fs::metadata(path)?.len();
        let map = MapFile::open(path, size)?;

        let count = syn_wordcount as usize;
        let mut positions = Vec::with_capacity(count + 1);
        {
            let buf = map.as_bytes();
            let mut p = 0usize;
            for _ in 0..count {
                positions.push(p);
                let key = nul_terminated(buf, p).ok_or_else(|| {
                    DictError::CorruptIndex("synonym entry missing terminator".to_string())
                })?;
                p += key.len() + 1 + 4;
                if p > buf.len() {
                    return Err(DictError::CorruptIndex(
                        "synonym entry overruns file".to_string(),
                    ));
                }
            }
            positions.push(p);
        }
        debug!("loaded {} synonyms from {}", count, path.display());
        Ok(SynIndex {
            map: Some(map),
            positions,
        })
    }

    fn buf(&self) -> &[u8] {
        self.map.as_ref().map(MapFile::as_bytes).unwrap_or(&[])
    }

    fn key_bytes(&self, idx: usize) -> &[u8] {
        nul_terminated(self.buf(), self.positions[idx]).unwrap_or(&[])
    }

    /// The headword index this synonym entry points at.
    fn target(&self, idx: usize) -> usize {
        let at = self.positions[idx] + self.key_bytes(idx).len() + 1;
        read_u32_be(&self.buf()[at..]) as usize
    }

    /// Insert the target of every entry matching `word`. Misses report no
    /// insertion point; the headword index is authoritative for that.
    pub fn lookup(&self, word: &[u8], hits: &mut BTreeSet<usize>) -> bool {
        if self.positions.len() < 2 {
            return false;
        }
        let last = self.positions.len() - 2;
        if stardict_strcmp(word, self.key_bytes(0)) == Ordering::Less
            || stardict_strcmp(word, self.key_bytes(last)) == Ordering::Greater
        {
            return false;
        }

        let mut found = false;
        let mut from = 0isize;
        let mut to = last as isize;
        let mut probe = 0isize;
        while from <= to {
            probe = (from + to) / 2;
            match stardict_strcmp(word, self.key_bytes(probe as usize)) {
                Ordering::Greater => from = probe + 1,
                Ordering::Less => to = probe - 1,
                Ordering::Equal => {
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return false;
        }

        let mut head = probe - 1;
        while head >= 0 && ascii_casefold_eq(word, self.key_bytes(head as usize)) {
            hits.insert(self.target(head as usize));
            head -= 1;
        }
        loop {
            hits.insert(self.target(probe as usize));
            probe += 1;
            if probe as usize > last || !ascii_casefold_eq(word, self.key_bytes(probe as usize)) {
                break;
            }
        }
        true
    }
}
