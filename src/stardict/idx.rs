//! # Headword index
//!
//! Two interchangeable implementations behind the [`KeyIndex`] enum:
//!
//! - [`OffsetIndex`] for a plain `.idx` file. The file is divided into pages
//!   of [`IDX_ENTRIES_PER_PAGE`] entries; only a per-page byte-offset sidecar
//!   and a single decoded page are held in memory. The sidecar is persisted
//!   next to the index (or in the user cache directory) so later loads skip
//!   the linear scan.
//! - [`WordListIndex`] for a gzip-compressed `.idx.gz`. The whole
//!   decompressed index is held in memory with one position per record.
//!
//! Both serve `lookup` with the same contract: matched indices are inserted
//! into the caller's set (every ASCII-case variant of an exact hit), and on a
//! miss `next_idx` reports where the query would sort, [`INVALID_INDEX`]
//! meaning past the last entry.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::{debug, info, warn};

use super::error::{DictError, Result};
use super::mapfile::MapFile;
use super::utils::{ascii_casefold_eq, nul_terminated, read_u32_be, stardict_strcmp};

/// Entries per page of the offset index.
pub const IDX_ENTRIES_PER_PAGE: usize = 32;

/// Sentinel insertion point meaning "past the last entry".
pub const INVALID_INDEX: usize = isize::MAX as usize;

/// A headword may not exceed 255 bytes.
const MAX_KEY_BYTES: usize = 256;

const CACHE_MAGIC: &[u8] = b"StarDict's Cache, Version: 0.2";
const CACHE_TAG: u32 = 0x51a4_d1c1;

/// Outcome of a headword lookup.
///
/// `next_idx` is meaningful only when `found` is false: it is the index the
/// query would occupy, or [`INVALID_INDEX`] when it sorts past the last key.
#[derive(Debug, Clone, Copy)]
pub struct LookupOutcome {
    pub found: bool,
    pub next_idx: usize,
}

/// The two index variants as a tagged union.
pub enum KeyIndex {
    Offset(OffsetIndex),
    WordList(WordListIndex),
}

impl KeyIndex {
    pub fn key(&mut self, idx: usize) -> Result<&str> {
        match self {
            KeyIndex::Offset(index) => index.key(idx),
            KeyIndex::WordList(index) => index.key(idx),
        }
    }

    pub fn location(&mut self, idx: usize) -> Result<(u32, u32)> {
        match self {
            KeyIndex::Offset(index) => index.location(idx),
            KeyIndex::WordList(index) => Ok(index.location(idx)),
        }
    }

    pub fn lookup(&mut self, word: &[u8], hits: &mut BTreeSet<usize>) -> Result<LookupOutcome> {
        match self {
            KeyIndex::Offset(index) => index.lookup(word, hits),
            KeyIndex::WordList(index) => Ok(index.lookup(word, hits)),
        }
    }
}

// ---------------------------------------------------------------------------
// Offset (paged) index
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Anchor {
    idx: usize,
    key: Vec<u8>,
}

struct PageEntry {
    key_start: usize,
    key_len: usize,
    offset: u32,
    size: u32,
}

#[derive(Default)]
struct Page {
    idx: Option<usize>,
    data: Vec<u8>,
    entries: Vec<PageEntry>,
}

impl Page {
    fn fill(&mut self, nentries: usize, page_idx: usize) -> Result<()> {
        self.entries.clear();
        let mut p = 0usize;
        for _ in 0..nentries {
            let key = nul_terminated(&self.data, p).ok_or_else(|| {
                DictError::CorruptIndex("index entry missing terminator".to_string())
            })?;
            let entry_start = p;
            p += key.len() + 1;
            if p + 8 > self.data.len() {
                return Err(DictError::CorruptIndex(
                    "index entry overruns page".to_string(),
                ));
            }
            let offset = read_u32_be(&self.data[p..]);
            let size = read_u32_be(&self.data[p + 4..]);
            p += 8;
            self.entries.push(PageEntry {
                key_start: entry_start,
                key_len: key.len(),
                offset,
                size,
            });
        }
        self.idx = Some(page_idx);
        Ok(())
    }

    fn key(&self, i: usize) -> &[u8] {
        let entry = &self.entries[i];
        &self.data[entry.key_start..entry.key_start + entry.key_len]
    }
}

/// Paged index over an uncompressed `.idx` file.
pub struct OffsetIndex {
    idxfile: File,
    wordcount: usize,
    /// Byte offset of each page start, plus an end-of-file sentinel.
    page_offsets: Vec<u32>,
    first: Anchor,
    last: Anchor,
    middle: Anchor,
    real_last: Anchor,
    page: Page,
}

impl OffsetIndex {
    pub fn load(
        path: &Path,
        wordcount: u32,
        index_file_size: u64,
        verbose: bool,
    ) -> Result<OffsetIndex> {
        let wordcount = wordcount as usize;
        let npages = (wordcount - 1) / IDX_ENTRIES_PER_PAGE + 2;
        let mut page_offsets = vec![0u32; npages];

        if !load_cache_sidecar(path, &mut page_offsets) {
            // map the index once, scan it, and persist the sidecar
            let map = MapFile::open(path, index_file_size)?;
            build_page_offsets(map.as_bytes(), wordcount, &mut page_offsets)?;
            match save_cache_sidecar(path, &page_offsets) {
                Some(cache_path) => {
                    if verbose {
                        info!("saved page cache {}", cache_path.display());
                    }
                }
                None => warn!("could not persist page cache for {}", path.display()),
            }
        }

        let mut index = OffsetIndex {
            idxfile: File::open(path)?,
            wordcount,
            page_offsets,
            first: Anchor::default(),
            last: Anchor::default(),
            middle: Anchor::default(),
            real_last: Anchor::default(),
            page: Page::default(),
        };

        let last_page = index.page_offsets.len() - 2;
        index.first = Anchor {
            idx: 0,
            key: index.read_first_on_page_key(0)?,
        };
        index.last = Anchor {
            idx: last_page,
            key: index.read_first_on_page_key(last_page)?,
        };
        index.middle = Anchor {
            idx: last_page / 2,
            key: index.read_first_on_page_key(last_page / 2)?,
        };
        index.real_last = Anchor {
            idx: wordcount - 1,
            key: index.key_bytes(wordcount - 1)?.to_vec(),
        };
        Ok(index)
    }

    /// Read the first headword of a page straight from the file, bypassing
    /// the page buffer.
    fn read_first_on_page_key(&mut self, page_idx: usize) -> Result<Vec<u8>> {
        let start = u64::from(self.page_offsets[page_idx]);
        let page_size = (self.page_offsets[page_idx + 1] - self.page_offsets[page_idx]) as usize;
        let mut buf = [0u8; MAX_KEY_BYTES + 8];
        let want = page_size.min(buf.len());
        self.idxfile.seek(SeekFrom::Start(start))?;
        self.idxfile.read_exact(&mut buf[..want])?;
        let len = buf[..want]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DictError::CorruptIndex("headword longer than 255 bytes".to_string()))?;
        Ok(buf[..len].to_vec())
    }

    /// First headword of a page, served from an anchor when one covers it.
    fn first_on_page_key(&mut self, page_idx: usize) -> Result<Vec<u8>> {
        if page_idx < self.middle.idx {
            if page_idx == self.first.idx {
                return Ok(self.first.key.clone());
            }
            self.read_first_on_page_key(page_idx)
        } else if page_idx > self.middle.idx {
            if page_idx == self.last.idx {
                return Ok(self.last.key.clone());
            }
            self.read_first_on_page_key(page_idx)
        } else {
            Ok(self.middle.key.clone())
        }
    }

    /// Bring `page_idx` into the page buffer; returns its entry count.
    fn load_page(&mut self, page_idx: usize) -> Result<usize> {
        let mut nentries = IDX_ENTRIES_PER_PAGE;
        if page_idx == self.page_offsets.len() - 2 {
            let tail = self.wordcount % IDX_ENTRIES_PER_PAGE;
            if tail != 0 {
                nentries = tail;
            }
        }
        if self.page.idx != Some(page_idx) {
            let start = u64::from(self.page_offsets[page_idx]);
            let len = (self.page_offsets[page_idx + 1] - self.page_offsets[page_idx]) as usize;
            self.page.data.resize(len, 0);
            self.idxfile.seek(SeekFrom::Start(start))?;
            self.idxfile.read_exact(&mut self.page.data)?;
            self.page.fill(nentries, page_idx)?;
        }
        Ok(nentries)
    }

    fn key_bytes(&mut self, idx: usize) -> Result<&[u8]> {
        self.load_page(idx / IDX_ENTRIES_PER_PAGE)?;
        Ok(self.page.key(idx % IDX_ENTRIES_PER_PAGE))
    }

    pub fn key(&mut self, idx: usize) -> Result<&str> {
        let bytes = self.key_bytes(idx)?;
        std::str::from_utf8(bytes)
            .map_err(|_| DictError::CorruptIndex("headword is not valid UTF-8".to_string()))
    }

    pub fn location(&mut self, idx: usize) -> Result<(u32, u32)> {
        self.load_page(idx / IDX_ENTRIES_PER_PAGE)?;
        let entry = &self.page.entries[idx % IDX_ENTRIES_PER_PAGE];
        Ok((entry.offset, entry.size))
    }

    pub fn lookup(&mut self, word: &[u8], hits: &mut BTreeSet<usize>) -> Result<LookupOutcome> {
        if stardict_strcmp(word, &self.first.key) == Ordering::Less {
            return Ok(LookupOutcome {
                found: false,
                next_idx: 0,
            });
        }
        if stardict_strcmp(word, &self.real_last.key) == Ordering::Greater {
            return Ok(LookupOutcome {
                found: false,
                next_idx: INVALID_INDEX,
            });
        }

        // find the page whose first key is the greatest not exceeding `word`
        let mut found = false;
        let mut from = 0isize;
        let mut to = (self.page_offsets.len() - 2) as isize;
        let mut probe = 0isize;
        while from <= to {
            probe = (from + to) / 2;
            let page_key = self.first_on_page_key(probe as usize)?;
            match stardict_strcmp(word, &page_key) {
                Ordering::Greater => from = probe + 1,
                Ordering::Less => to = probe - 1,
                Ordering::Equal => {
                    found = true;
                    break;
                }
            }
        }

        let page_idx;
        if found {
            // an exact hit on a page's first key; the walk below still
            // gathers any equal keys on earlier pages
            page_idx = probe as usize;
            probe = 0;
        } else {
            page_idx = to as usize;
            let nentries = self.load_page(page_idx)? as isize;
            from = 0;
            to = nentries - 1;
            while from <= to {
                probe = (from + to) / 2;
                match stardict_strcmp(word, self.page.key(probe as usize)) {
                    Ordering::Greater => from = probe + 1,
                    Ordering::Less => to = probe - 1,
                    Ordering::Equal => {
                        found = true;
                        break;
                    }
                }
            }
        }

        if !found {
            return Ok(LookupOutcome {
                found: false,
                next_idx: page_idx * IDX_ENTRIES_PER_PAGE + from as usize,
            });
        }

        let mut this_index = (page_idx * IDX_ENTRIES_PER_PAGE) as isize + probe;
        let mut head = this_index - 1;
        while head >= 0 {
            if !ascii_casefold_eq(word, self.key_bytes(head as usize)?) {
                break;
            }
            hits.insert(head as usize);
            head -= 1;
        }
        loop {
            // the found index itself needs no re-check
            hits.insert(this_index as usize);
            this_index += 1;
            if this_index as usize > self.real_last.idx {
                break;
            }
            if !ascii_casefold_eq(word, self.key_bytes(this_index as usize)?) {
                break;
            }
        }
        Ok(LookupOutcome {
            found: true,
            next_idx: this_index as usize,
        })
    }
}

/// One linear scan of the mapped index, recording each page start.
fn build_page_offsets(buf: &[u8], wordcount: usize, out: &mut [u32]) -> Result<()> {
    let mut p = 0usize;
    let mut page = 0usize;
    for i in 0..wordcount {
        if i % IDX_ENTRIES_PER_PAGE == 0 {
            out[page] = p as u32;
            page += 1;
        }
        let key = nul_terminated(buf, p).ok_or_else(|| {
            DictError::CorruptIndex("index entry missing terminator".to_string())
        })?;
        p += key.len() + 1 + 8;
        if p > buf.len() {
            return Err(DictError::CorruptIndex(
                "index entry overruns file".to_string(),
            ));
        }
    }
    out[page] = p as u32;
    Ok(())
}

/// Candidate sidecar locations, preferred first: next to the index, then in
/// the user cache directory under `sdcv/`.
fn cache_variants(idx_path: &Path) -> Vec<PathBuf> {
    let mut adjacent = idx_path.as_os_str().to_os_string();
    adjacent.push(".oft");
    let mut variants = vec![PathBuf::from(adjacent)];
    if let Some(cache_root) = dirs::cache_dir() {
        let cache_dir = cache_root.join("sdcv");
        if fs::create_dir_all(&cache_dir).is_ok() {
            if let Some(base) = idx_path.file_name() {
                let mut name = base.to_os_string();
                name.push(".oft");
                variants.push(cache_dir.join(name));
            }
        }
    }
    variants
}

/// Accept the first candidate that is no older than the index and matches
/// magic, tag and expected size. Rejection is silent; the sidecar is simply
/// rebuilt.
fn load_cache_sidecar(idx_path: &Path, out: &mut [u32]) -> bool {
    let expected = (CACHE_MAGIC.len() + 4 + out.len() * 4) as u64;
    for candidate in cache_variants(idx_path) {
        let (Ok(idx_meta), Ok(cache_meta)) = (fs::metadata(idx_path), fs::metadata(&candidate))
        else {
            continue;
        };
        let (Ok(idx_mtime), Ok(cache_mtime)) = (idx_meta.modified(), cache_meta.modified()) else {
            continue;
        };
        if cache_mtime < idx_mtime {
            continue;
        }
        if cache_meta.len() != expected {
            continue;
        }
        let Ok(map) = MapFile::open(&candidate, expected) else {
            continue;
        };
        let bytes = map.as_bytes();
        if &bytes[..CACHE_MAGIC.len()] != CACHE_MAGIC {
            continue;
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&bytes[CACHE_MAGIC.len()..CACHE_MAGIC.len() + 4]);
        if u32::from_ne_bytes(tag) != CACHE_TAG {
            continue;
        }
        let payload = &bytes[CACHE_MAGIC.len() + 4..];
        for (slot, chunk) in out.iter_mut().zip(payload.chunks_exact(4)) {
            let mut word = [0u8; 4];
            word.copy_from_slice(chunk);
            *slot = u32::from_ne_bytes(word);
        }
        debug!("loaded page cache {}", candidate.display());
        return true;
    }
    false
}

/// Write the sidecar to the first candidate that accepts it.
fn save_cache_sidecar(idx_path: &Path, offsets: &[u32]) -> Option<PathBuf> {
    let mut payload = Vec::with_capacity(CACHE_MAGIC.len() + 4 + offsets.len() * 4);
    payload.extend_from_slice(CACHE_MAGIC);
    payload.extend_from_slice(&CACHE_TAG.to_ne_bytes());
    for offset in offsets {
        payload.extend_from_slice(&offset.to_ne_bytes());
    }
    for candidate in cache_variants(idx_path) {
        let written = File::create(&candidate).and_then(|mut f| f.write_all(&payload));
        if written.is_ok() {
            return Some(candidate);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Wordlist (in-memory) index
// ---------------------------------------------------------------------------

/// Fully in-memory index over a gzip-compressed `.idx.gz` file.
pub struct WordListIndex {
    buf: Vec<u8>,
    /// Start of each record, plus an end-of-buffer sentinel.
    positions: Vec<usize>,
}

impl WordListIndex {
    pub fn load(path: &Path, wordcount: u32, index_file_size: u64) -> Result<WordListIndex> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::with_capacity(index_file_size as usize);
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| DictError::Decompression(format!("{}: {}", path.display(), e)))?;
        if buf.len() as u64 != index_file_size {
            return Err(DictError::CorruptIndex(format!(
                "decompressed index is {} bytes, ifo declares {}",
                buf.len(),
                index_file_size
            )));
        }

        let wordcount = wordcount as usize;
        let mut positions = Vec::with_capacity(wordcount + 1);
        let mut p = 0usize;
        for _ in 0..wordcount {
            positions.push(p);
            let key = nul_terminated(&buf, p).ok_or_else(|| {
                DictError::CorruptIndex("index entry missing terminator".to_string())
            })?;
            p += key.len() + 1 + 8;
            if p > buf.len() {
                return Err(DictError::CorruptIndex(
                    "index entry overruns file".to_string(),
                ));
            }
        }
        positions.push(p);
        Ok(WordListIndex { buf, positions })
    }

    fn key_bytes(&self, idx: usize) -> &[u8] {
        nul_terminated(&self.buf, self.positions[idx]).unwrap_or(&[])
    }

    pub fn key(&self, idx: usize) -> Result<&str> {
        std::str::from_utf8(self.key_bytes(idx))
            .map_err(|_| DictError::CorruptIndex("headword is not valid UTF-8".to_string()))
    }

    pub fn location(&self, idx: usize) -> (u32, u32) {
        let at = self.positions[idx] + self.key_bytes(idx).len() + 1;
        (read_u32_be(&self.buf[at..]), read_u32_be(&self.buf[at + 4..]))
    }

    pub fn lookup(&self, word: &[u8], hits: &mut BTreeSet<usize>) -> LookupOutcome {
        let last = self.positions.len() - 2;
        if stardict_strcmp(word, self.key_bytes(0)) == Ordering::Less {
            return LookupOutcome {
                found: false,
                next_idx: 0,
            };
        }
        if stardict_strcmp(word, self.key_bytes(last)) == Ordering::Greater {
            return LookupOutcome {
                found: false,
                next_idx: INVALID_INDEX,
            };
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
            return LookupOutcome {
                found: false,
                next_idx: from as usize,
            };
        }

        let mut head = probe - 1;
        while head >= 0 && ascii_casefold_eq(word, self.key_bytes(head as usize)) {
            hits.insert(head as usize);
            head -= 1;
        }
        loop {
            hits.insert(probe as usize);
            probe += 1;
            if probe as usize > last || !ascii_casefold_eq(word, self.key_bytes(probe as usize)) {
                break;
            }
        }
        LookupOutcome {
            found: true,
            next_idx: probe as usize,
        }
    }
}
