//! `.ifo` metadata parsing.
//!
//! The `.ifo` file is a small UTF-8 text file: a magic banner followed by
//! `KEY=VALUE` lines. Three keys are mandatory (`wordcount`, `idxfilesize`,
//! `bookname`); everything else is optional.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::error::{DictError, Result};

const DICT_MAGIC: &[u8] = b"StarDict's dict ifo file";
const TREEDICT_MAGIC: &[u8] = b"StarDict's treedict ifo file";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parsed contents of a `.ifo` file.
#[derive(Debug, Clone)]
pub struct DictInfo {
    pub ifo_file_name: PathBuf,
    pub bookname: String,
    pub wordcount: u32,
    /// Number of entries in the companion `.syn` file; 0 when absent.
    pub syn_wordcount: u32,
    /// Size of the (decompressed) index file in bytes.
    pub index_file_size: u64,
    pub sametypesequence: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
}

impl DictInfo {
    /// Parse `path`. `is_tree_dict` selects the treedict magic banner and the
    /// `tdxfilesize` key in place of `idxfilesize`.
    pub fn load_from_ifo_file(path: &Path, is_tree_dict: bool) -> Result<DictInfo> {
        let raw = fs::read(path)?;
        let mut data: &[u8] = &raw;
        if data.starts_with(UTF8_BOM) {
            data = &data[UTF8_BOM.len()..];
        }

        let magic = if is_tree_dict { TREEDICT_MAGIC } else { DICT_MAGIC };
        if !data.starts_with(magic) {
            return Err(malformed(path, "missing magic header"));
        }
        data = &data[magic.len()..];

        let text = std::str::from_utf8(data)
            .map_err(|_| malformed(path, "ifo body is not valid UTF-8"))?;
        let pairs = parse_key_values(text, path)?;

        let wordcount = required_number(&pairs, "wordcount", path)? as u32;
        let size_key = if is_tree_dict { "tdxfilesize" } else { "idxfilesize" };
        let index_file_size = required_number(&pairs, size_key, path)?;
        let bookname = pairs
            .get("bookname")
            .cloned()
            .ok_or_else(|| malformed(path, "missing bookname"))?;
        let syn_wordcount = pairs
            .get("synwordcount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        debug!(
            "parsed {}: bookname={:?}, wordcount={}, synwordcount={}",
            path.display(),
            bookname,
            wordcount,
            syn_wordcount
        );

        Ok(DictInfo {
            ifo_file_name: path.to_path_buf(),
            bookname,
            wordcount,
            syn_wordcount,
            index_file_size,
            sametypesequence: pairs.get("sametypesequence").cloned(),
            author: pairs.get("author").cloned(),
            email: pairs.get("email").cloned(),
            website: pairs.get("website").cloned(),
            date: pairs.get("date").cloned(),
            description: pairs.get("description").cloned(),
        })
    }
}

/// Consume `KEY=VALUE` lines. Leading whitespace before a key or value is
/// skipped; a value runs to the next `\r` or `\n`.
fn parse_key_values(text: &str, path: &Path) -> Result<HashMap<String, String>> {
    let mut pairs = HashMap::new();
    let mut rest = text;
    loop {
        let at_key = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        if at_key.is_empty() {
            break;
        }
        let Some(eq) = at_key.find('=') else {
            return Err(malformed(path, "line without '='"));
        };
        let key = at_key[..eq].to_string();
        let after_eq = at_key[eq + 1..].trim_start_matches(|c: char| c.is_ascii_whitespace());
        if after_eq.is_empty() {
            pairs.insert(key, String::new());
            break;
        }
        let vend = after_eq.find(['\r', '\n']).unwrap_or(after_eq.len());
        pairs.insert(key, after_eq[..vend].to_string());
        if vend == after_eq.len() {
            break;
        }
        rest = &after_eq[vend + 1..];
    }
    Ok(pairs)
}

fn required_number(pairs: &HashMap<String, String>, key: &str, path: &Path) -> Result<u64> {
    let value = pairs
        .get(key)
        .ok_or_else(|| malformed(path, &format!("missing {}", key)))?;
    value
        .parse()
        .map_err(|_| malformed(path, &format!("non-numeric {}: {:?}", key, value)))
}

fn malformed(path: &Path, reason: &str) -> DictError {
    DictError::MalformedIfo {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_bytes(bytes: &[u8]) -> Result<DictInfo> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.ifo");
        fs::write(&path, bytes).expect("write test ifo");
        DictInfo::load_from_ifo_file(&path, false)
    }

    #[test]
    fn parses_a_full_ifo() {
        let info = parse_bytes(
            b"StarDict's dict ifo file\nversion=2.4.2\nbookname=Test Dict\n\
              wordcount=42\nsynwordcount=3\nidxfilesize=1234\n\
              sametypesequence=m\nauthor=someone\n",
        )
        .expect("parse");
        assert_eq!(info.bookname, "Test Dict");
        assert_eq!(info.wordcount, 42);
        assert_eq!(info.syn_wordcount, 3);
        assert_eq!(info.index_file_size, 1234);
        assert_eq!(info.sametypesequence.as_deref(), Some("m"));
        assert_eq!(info.author.as_deref(), Some("someone"));
        assert!(info.description.is_none());
    }

    #[test]
    fn skips_a_utf8_bom() {
        let info = parse_bytes(
            b"\xEF\xBB\xBFStarDict's dict ifo file\nbookname=B\nwordcount=1\nidxfilesize=9\n",
        )
        .expect("parse");
        assert_eq!(info.bookname, "B");
    }

    #[test]
    fn tree_dictionaries_use_their_own_magic_and_size_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tree.ifo");
        fs::write(
            &path,
            b"StarDict's treedict ifo file\nbookname=T\nwordcount=7\ntdxfilesize=99\n",
        )
        .expect("write tree ifo");
        let info = DictInfo::load_from_ifo_file(&path, true).expect("parse");
        assert_eq!(info.index_file_size, 99);
        // the same file is not a plain dict ifo
        assert!(DictInfo::load_from_ifo_file(&path, false).is_err());
    }

    #[test]
    fn rejects_missing_magic_and_missing_keys() {
        assert!(matches!(
            parse_bytes(b"not an ifo at all"),
            Err(DictError::MalformedIfo { .. })
        ));
        assert!(matches!(
            parse_bytes(b"StarDict's dict ifo file\nwordcount=1\nidxfilesize=9\n"),
            Err(DictError::MalformedIfo { .. })
        ));
        assert!(matches!(
            parse_bytes(b"StarDict's dict ifo file\nbookname=B\nwordcount=zap\nidxfilesize=9\n"),
            Err(DictError::MalformedIfo { .. })
        ));
    }
}
