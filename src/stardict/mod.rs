//! One loaded StarDict dictionary: metadata, headword index, article store
//! and synonym table bound together behind lookup operations.

pub mod article;
pub mod dictzip;
pub mod error;
pub mod idx;
pub mod ifo;
pub mod mapfile;
pub mod syn;
pub(crate) mod utils;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::info;

use crate::glob::GlobPattern;

use article::ArticleStore;
use error::{DictError, Result};
use idx::{KeyIndex, LookupOutcome, OffsetIndex, WordListIndex};
use ifo::DictInfo;
use syn::SynIndex;

pub use utils::stardict_strcmp;

/// A single dictionary bundle, loaded read-only.
pub struct Dict {
    info: DictInfo,
    idx: KeyIndex,
    store: ArticleStore,
    syn: SynIndex,
}

impl Dict {
    /// Load the dictionary whose metadata lives at `ifo_path`.
    ///
    /// Companion files are resolved by stem: `.idx.gz` is preferred over
    /// `.idx`, `.dict.dz` over `.dict`, and `.syn` is optional.
    pub fn load(ifo_path: &Path, verbose: bool) -> Result<Dict> {
        let info = DictInfo::load_from_ifo_file(ifo_path, false)?;
        if info.wordcount == 0 {
            return Err(DictError::MalformedIfo {
                path: ifo_path.to_path_buf(),
                reason: "wordcount is zero".to_string(),
            });
        }

        let path_str = ifo_path.to_string_lossy();
        let stem = path_str.strip_suffix(".ifo").unwrap_or(&path_str);
        let companion = |ext: &str| PathBuf::from(format!("{}.{}", stem, ext));

        let dictdz_path = companion("dict.dz");
        let store = if dictdz_path.exists() {
            ArticleStore::open_dz(&dictdz_path, info.sametypesequence.clone())?
        } else {
            let dict_path = companion("dict");
            if !dict_path.exists() {
                return Err(DictError::MissingFile {
                    stem: PathBuf::from(stem),
                    kind: "dict",
                });
            }
            ArticleStore::open_plain(&dict_path, info.sametypesequence.clone())?
        };

        let idxgz_path = companion("idx.gz");
        let idx = if idxgz_path.exists() {
            KeyIndex::WordList(WordListIndex::load(
                &idxgz_path,
                info.wordcount,
                info.index_file_size,
            )?)
        } else {
            let idx_path = companion("idx");
            if !idx_path.exists() {
                return Err(DictError::MissingFile {
                    stem: PathBuf::from(stem),
                    kind: "idx",
                });
            }
            KeyIndex::Offset(OffsetIndex::load(
                &idx_path,
                info.wordcount,
                info.index_file_size,
                verbose,
            )?)
        };

        let syn = SynIndex::load(&companion("syn"), info.syn_wordcount)?;

        info!(
            "loaded dictionary {:?} ({} headwords)",
            info.bookname, info.wordcount
        );
        Ok(Dict {
            info,
            idx,
            store,
            syn,
        })
    }

    pub fn book_name(&self) -> &str {
        &self.info.bookname
    }

    pub fn word_count(&self) -> usize {
        self.info.wordcount as usize
    }

    pub fn info(&self) -> &DictInfo {
        &self.info
    }

    /// Whether body search may scan this dictionary.
    pub fn supports_body_search(&self) -> bool {
        true
    }

    pub fn key(&mut self, idx: usize) -> Result<&str> {
        self.idx.key(idx)
    }

    /// `(offset, size)` of the article behind headword `idx`.
    pub fn location(&mut self, idx: usize) -> Result<(u32, u32)> {
        self.idx.location(idx)
    }

    /// The canonical article record for headword `idx`. Borrowed from the
    /// store's cache; valid until the next article read.
    pub fn article(&mut self, idx: usize) -> Result<&[u8]> {
        let (offset, size) = self.idx.location(idx)?;
        self.store.article(offset, size)
    }

    /// Exact lookup across the synonym table and the headword index.
    pub fn lookup(&mut self, word: &str, hits: &mut BTreeSet<usize>) -> Result<bool> {
        Ok(self.lookup_with_next(word, hits)?.found)
    }

    /// Like [`Dict::lookup`] but also reports the insertion point on a miss
    /// (always the headword index's, never the synonym table's).
    pub fn lookup_with_next(
        &mut self,
        word: &str,
        hits: &mut BTreeSet<usize>,
    ) -> Result<LookupOutcome> {
        let syn_found = self.syn.lookup(word.as_bytes(), hits);
        let mut outcome = self.idx.lookup(word.as_bytes(), hits)?;
        outcome.found |= syn_found;
        Ok(outcome)
    }

    /// Collect up to `limit - 1` headword indices matching the pattern, in
    /// index order, by scanning every headword.
    pub fn lookup_pattern(&mut self, pattern: &GlobPattern, limit: usize) -> Result<Vec<usize>> {
        let mut matches = Vec::new();
        for i in 0..self.word_count() {
            if matches.len() >= limit.saturating_sub(1) {
                break;
            }
            if pattern.matches(self.idx.key(i)?) {
                matches.push(i);
            }
        }
        Ok(matches)
    }

    /// Body search over one article; see [`ArticleStore::search_data`].
    pub fn search_article(
        &mut self,
        words: &[String],
        offset: u32,
        size: u32,
        scratch: &mut Vec<u8>,
    ) -> Result<bool> {
        self.store.search_data(words, offset, size, scratch)
    }
}
