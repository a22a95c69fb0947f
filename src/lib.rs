//! Read-only query engine for StarDict dictionary bundles.
//!
//! Loads one or more dictionaries (`.ifo` metadata, `.idx`/`.idx.gz` headword
//! index, `.dict`/`.dict.dz` article bodies, optional `.syn` synonyms) and
//! serves four kinds of queries against them: exact headword lookup,
//! bounded-edit-distance fuzzy lookup, `*`/`?` pattern lookup, and full-text
//! search over article bodies.
//!
//! The engine is strictly local and single-threaded. Dictionaries are never
//! modified; all files are opened during [`Dict::load`] and held until the
//! dictionary is dropped.

pub mod distance;
pub mod glob;
pub mod library;
pub mod stardict;

pub use library::{
    analyze_query, Library, QueryType, MAX_FUZZY_DISTANCE, MAX_MATCH_ITEM_PER_LIB,
};
pub use stardict::article::ARTICLE_CACHE_SLOTS;
pub use stardict::error::{DictError, Result};
pub use stardict::idx::{LookupOutcome, IDX_ENTRIES_PER_PAGE, INVALID_INDEX};
pub use stardict::ifo::DictInfo;
pub use stardict::{stardict_strcmp, Dict};
