//! # Article store
//!
//! Reads article bodies out of a `.dict` (plain, seek+read) or `.dict.dz`
//! (dictzip byte-range) file and materialises them in the canonical tagged
//! form: a host-order u32 total size, then for each field a one-byte type
//! tag followed by either NUL-terminated text or a length-prefixed binary
//! payload.
//!
//! When the dictionary declares a `sametypesequence`, the on-disk records
//! omit the tags and the trailing terminator/length of the last field; the
//! store synthesises them. A tiny ring cache keeps the most recently decoded
//! records resident.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::trace;

use super::dictzip::DictZip;
use super::error::{DictError, Result};
use super::utils::{contains_subslice, nul_terminated, read_u32_be};

/// Number of decoded articles each store keeps resident.
pub const ARTICLE_CACHE_SLOTS: usize = 2;

enum DictBacking {
    Plain(File),
    Dz(DictZip),
}

struct CacheSlot {
    offset: u32,
    data: Vec<u8>,
}

pub struct ArticleStore {
    backing: DictBacking,
    sametypesequence: Option<String>,
    cache: [Option<CacheSlot>; ARTICLE_CACHE_SLOTS],
    cache_cur: usize,
}

/// Lowercase `m t y l g x k` are the named textual codes and `W P` the named
/// binary ones; any other code falls back on its case.
fn field_is_textual(code: u8) -> bool {
    matches!(code, b'm' | b't' | b'y' | b'l' | b'g' | b'x' | b'k') || !code.is_ascii_uppercase()
}

impl ArticleStore {
    pub fn open_plain(path: &Path, sametypesequence: Option<String>) -> Result<ArticleStore> {
        Ok(ArticleStore {
            backing: DictBacking::Plain(File::open(path)?),
            sametypesequence,
            cache: Default::default(),
            cache_cur: 0,
        })
    }

    pub fn open_dz(path: &Path, sametypesequence: Option<String>) -> Result<ArticleStore> {
        Ok(ArticleStore {
            backing: DictBacking::Dz(DictZip::open(path)?),
            sametypesequence,
            cache: Default::default(),
            cache_cur: 0,
        })
    }

    fn read_raw(&mut self, offset: u32, dst: &mut [u8]) -> Result<()> {
        match &mut self.backing {
            DictBacking::Plain(file) => {
                file.seek(SeekFrom::Start(u64::from(offset)))?;
                file.read_exact(dst)?;
            }
            DictBacking::Dz(dz) => dz.read(dst, u64::from(offset))?,
        }
        Ok(())
    }

    /// The canonical record for the article at `(offset, size)`.
    ///
    /// The store owns the returned bytes; the borrow is valid until the next
    /// call that may evict a cache slot.
    pub fn article(&mut self, offset: u32, size: u32) -> Result<&[u8]> {
        let mut hit = None;
        for (i, slot) in self.cache.iter().enumerate() {
            if let Some(slot) = slot {
                if slot.offset == offset {
                    hit = Some(i);
                    break;
                }
            }
        }
        if let Some(i) = hit {
            trace!("article cache hit at offset {}", offset);
            match &self.cache[i] {
                Some(slot) => return Ok(&slot.data),
                None => unreachable!("probed slot was occupied"),
            }
        }

        let mut raw = vec![0u8; size as usize];
        self.read_raw(offset, &mut raw)?;
        let canonical = self.canonicalise(&raw, offset)?;

        let cur = self.cache_cur;
        self.cache_cur = (cur + 1) % ARTICLE_CACHE_SLOTS;
        let slot = self.cache[cur].insert(CacheSlot {
            offset,
            data: canonical,
        });
        Ok(&slot.data)
    }

    /// Rewrite `raw` into tagged form, or just prepend the size header when
    /// the record is already tagged.
    fn canonicalise(&self, raw: &[u8], offset: u32) -> Result<Vec<u8>> {
        let Some(seq) = self
            .sametypesequence
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::as_bytes)
        else {
            let mut out = Vec::with_capacity(raw.len() + 4);
            out.extend_from_slice(&((raw.len() + 4) as u32).to_ne_bytes());
            out.extend_from_slice(raw);
            return Ok(out);
        };

        let corrupt = |reason: &str| DictError::CorruptArticle {
            offset,
            reason: reason.to_string(),
        };

        let mut out = vec![0u8; 4];
        let mut p = 0usize;
        for &code in &seq[..seq.len() - 1] {
            out.push(code);
            if field_is_textual(code) {
                let field = nul_terminated(raw, p).ok_or_else(|| corrupt("unterminated text field"))?;
                out.extend_from_slice(&raw[p..p + field.len() + 1]);
                p += field.len() + 1;
            } else {
                if p + 4 > raw.len() {
                    return Err(corrupt("truncated binary field length"));
                }
                let payload = read_u32_be(&raw[p..]) as usize;
                if p + 4 + payload > raw.len() {
                    return Err(corrupt("binary field overruns record"));
                }
                out.extend_from_slice(&raw[p..p + 4 + payload]);
                p += 4 + payload;
            }
        }

        // last field: its length is whatever remains of the record
        let last = seq[seq.len() - 1];
        let remainder = &raw[p..];
        out.push(last);
        if field_is_textual(last) {
            out.extend_from_slice(remainder);
            out.push(0);
        } else {
            out.extend_from_slice(&(remainder.len() as u32).to_ne_bytes());
            out.extend_from_slice(remainder);
        }

        let total = out.len() as u32;
        out[..4].copy_from_slice(&total.to_ne_bytes());
        Ok(out)
    }

    /// Scan the article at `(offset, size)` for the given substrings without
    /// building a canonical copy. True when every substring occurs in some
    /// textual field (AND semantics, order-insensitive).
    ///
    /// `scratch` is a caller-owned grow-only buffer reused across articles.
    pub fn search_data(
        &mut self,
        words: &[String],
        offset: u32,
        size: u32,
        scratch: &mut Vec<u8>,
    ) -> Result<bool> {
        if words.is_empty() {
            return Ok(false);
        }
        let size = size as usize;
        if scratch.len() < size {
            scratch.resize(size, 0);
        }
        self.read_raw(offset, &mut scratch[..size])?;
        let buf = &scratch[..size];

        let mut found = vec![false; words.len()];
        let mut nfound = 0usize;
        let scan_field = |field: &[u8], found: &mut [bool], nfound: &mut usize| {
            for (word, hit) in words.iter().zip(found.iter_mut()) {
                if !*hit && contains_subslice(field, word.as_bytes()) {
                    *hit = true;
                    *nfound += 1;
                }
            }
            *nfound == words.len()
        };

        let seq = self
            .sametypesequence
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::as_bytes);
        let mut p = 0usize;
        if let Some(seq) = seq {
            for &code in &seq[..seq.len() - 1] {
                if field_is_textual(code) {
                    let field = nul_terminated(buf, p).unwrap_or(&buf[p.min(buf.len())..]);
                    if scan_field(field, &mut found, &mut nfound) {
                        return Ok(true);
                    }
                    p += field.len() + 1;
                } else {
                    if p + 4 > buf.len() {
                        return Ok(false);
                    }
                    p += 4 + read_u32_be(&buf[p..]) as usize;
                }
                if p >= buf.len() {
                    break;
                }
            }
            if p < buf.len() && field_is_textual(seq[seq.len() - 1]) {
                return Ok(scan_field(&buf[p..], &mut found, &mut nfound));
            }
        } else {
            while p < buf.len() {
                let code = buf[p];
                if field_is_textual(code) {
                    let field = nul_terminated(buf, p + 1).unwrap_or(&buf[p + 1..]);
                    if scan_field(field, &mut found, &mut nfound) {
                        return Ok(true);
                    }
                    p += 1 + field.len() + 1;
                } else {
                    if p + 5 > buf.len() {
                        return Ok(false);
                    }
                    p += 1 + 4 + read_u32_be(&buf[p + 1..]) as usize;
                }
            }
        }
        Ok(false)
    }
}
