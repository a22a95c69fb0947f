use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use tempfile::TempDir;

use stardict_reader::{analyze_query, Dict, Library, QueryType, INVALID_INDEX};

/// Everything needed to write one dictionary bundle to disk. Entries must be
/// given in the on-disk order (ASCII-casefolded compare, ties by raw bytes).
struct BundleSpec<'a> {
    stem: &'a str,
    bookname: &'a str,
    sametypesequence: Option<&'a str>,
    /// `(headword, on-disk article bytes)`
    entries: &'a [(&'a str, &'a [u8])],
    /// `(synonym, target headword index)`, in on-disk order
    syn: &'a [(&'a str, u32)],
    gzip_index: bool,
    dictzip_body: bool,
}

impl<'a> BundleSpec<'a> {
    fn new(stem: &'a str, entries: &'a [(&'a str, &'a [u8])]) -> Self {
        BundleSpec {
            stem,
            bookname: "Test Dictionary",
            sametypesequence: None,
            entries,
            syn: &[],
            gzip_index: false,
            dictzip_body: false,
        }
    }
}

fn ext_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, ext))
}

/// Write a complete bundle and return the `.ifo` path.
fn write_bundle(dir: &Path, spec: &BundleSpec) -> PathBuf {
    let mut idx = Vec::new();
    let mut dict = Vec::new();
    for (key, body) in spec.entries {
        idx.extend_from_slice(key.as_bytes());
        idx.push(0);
        idx.extend_from_slice(&(dict.len() as u32).to_be_bytes());
        idx.extend_from_slice(&(body.len() as u32).to_be_bytes());
        dict.extend_from_slice(body);
    }
    let idx_len = idx.len();

    if spec.gzip_index {
        let file = fs::File::create(ext_path(dir, spec.stem, "idx.gz")).expect("create idx.gz");
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&idx).expect("write idx.gz");
        encoder.finish().expect("finish idx.gz");
    } else {
        fs::write(ext_path(dir, spec.stem, "idx"), &idx).expect("write idx");
    }

    if spec.dictzip_body {
        write_dictzip(&ext_path(dir, spec.stem, "dict.dz"), &dict);
    } else {
        fs::write(ext_path(dir, spec.stem, "dict"), &dict).expect("write dict");
    }

    if !spec.syn.is_empty() {
        let mut syn = Vec::new();
        for (word, target) in spec.syn {
            syn.extend_from_slice(word.as_bytes());
            syn.push(0);
            syn.extend_from_slice(&target.to_be_bytes());
        }
        fs::write(ext_path(dir, spec.stem, "syn"), &syn).expect("write syn");
    }

    let mut ifo = String::from("StarDict's dict ifo file\nversion=2.4.2\n");
    ifo.push_str(&format!("bookname={}\n", spec.bookname));
    ifo.push_str(&format!("wordcount={}\n", spec.entries.len()));
    if !spec.syn.is_empty() {
        ifo.push_str(&format!("synwordcount={}\n", spec.syn.len()));
    }
    ifo.push_str(&format!("idxfilesize={}\n", idx_len));
    if let Some(seq) = spec.sametypesequence {
        ifo.push_str(&format!("sametypesequence={}\n", seq));
    }
    let ifo_path = ext_path(dir, spec.stem, "ifo");
    fs::write(&ifo_path, ifo).expect("write ifo");
    ifo_path
}

/// Build a minimal single-chunk dictzip file: gzip header carrying the `RA`
/// chunk table, then one raw-deflate chunk covering all of `data`.
fn write_dictzip(path: &Path, data: &[u8]) {
    assert!(!data.is_empty() && data.len() < u16::MAX as usize);
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("deflate");
    let deflated = encoder.finish().expect("finish deflate");
    assert!(deflated.len() < u16::MAX as usize);

    let mut out = Vec::new();
    out.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04]); // magic, deflate, FEXTRA
    out.extend_from_slice(&[0, 0, 0, 0, 0, 0xff]); // mtime, xfl, os
    let sub_len: u16 = 6 + 2; // version + chunk len + chunk count + 1 size
    out.extend_from_slice(&(4 + sub_len).to_le_bytes()); // XLEN
    out.extend_from_slice(b"RA");
    out.extend_from_slice(&sub_len.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // version
    out.extend_from_slice(&(data.len() as u16).to_le_bytes()); // chunk length
    out.extend_from_slice(&1u16.to_le_bytes()); // chunk count
    out.extend_from_slice(&(deflated.len() as u16).to_le_bytes());
    out.extend_from_slice(&deflated);
    let mut crc = flate2::Crc::new();
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    fs::write(path, out).expect("write dict.dz");
}

fn lookup_set(dict: &mut Dict, word: &str) -> BTreeSet<usize> {
    let mut hits = BTreeSet::new();
    dict.lookup(word, &mut hits).expect("lookup");
    hits
}

const CASE_ENTRIES: &[(&str, &[u8])] = &[
    ("AA", b"first"),
    ("Aa", b"second"),
    ("aa", b"third"),
    ("ab", b"fourth"),
];

#[test]
fn exact_hit_reports_all_case_variants() {
    let tmp = TempDir::new().expect("tempdir");
    let ifo = write_bundle(tmp.path(), &BundleSpec::new("case", CASE_ENTRIES));
    let mut dict = Dict::load(&ifo, false).expect("load");

    assert_eq!(dict.info().wordcount, 4);
    assert_eq!(dict.book_name(), "Test Dictionary");
    assert_eq!(lookup_set(&mut dict, "aa"), BTreeSet::from([0, 1, 2]));
    assert_eq!(lookup_set(&mut dict, "Aa"), BTreeSet::from([0, 1, 2]));
    assert_eq!(lookup_set(&mut dict, "ab"), BTreeSet::from([3]));
    assert!(lookup_set(&mut dict, "zz").is_empty());
}

#[test]
fn miss_reports_the_insertion_point() {
    let tmp = TempDir::new().expect("tempdir");
    let ifo = write_bundle(tmp.path(), &BundleSpec::new("miss", CASE_ENTRIES));
    let mut dict = Dict::load(&ifo, false).expect("load");
    let mut hits = BTreeSet::new();

    // before the first key
    let outcome = dict.lookup_with_next("@", &mut hits).expect("lookup");
    assert!(!outcome.found);
    assert_eq!(outcome.next_idx, 0);

    // between "aa" (folds equal to "ab" but raw-compares below it)
    let outcome = dict.lookup_with_next("aB", &mut hits).expect("lookup");
    assert!(!outcome.found);
    assert_eq!(outcome.next_idx, 3);

    // past the last key
    let outcome = dict.lookup_with_next("zz", &mut hits).expect("lookup");
    assert!(!outcome.found);
    assert_eq!(outcome.next_idx, INVALID_INDEX);
    assert!(hits.is_empty());
}

#[test]
fn sametypesequence_article_is_canonicalised() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[("hello", b"hello")];
    let mut spec = BundleSpec::new("canon", entries);
    spec.sametypesequence = Some("m");
    let ifo = write_bundle(tmp.path(), &spec);
    let mut dict = Dict::load(&ifo, false).expect("load");

    // 4-byte size header + tag + text + synthesised terminator
    let mut expected = Vec::new();
    expected.extend_from_slice(&11u32.to_ne_bytes());
    expected.push(b'm');
    expected.extend_from_slice(b"hello\0");
    assert_eq!(dict.article(0).expect("article"), expected.as_slice());

    // second read comes from the ring cache and must be identical
    assert_eq!(dict.article(0).expect("article"), expected.as_slice());
}

#[test]
fn untagged_article_gets_a_size_header() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[("hello", b"mworld\0")];
    let ifo = write_bundle(tmp.path(), &BundleSpec::new("tagged", entries));
    let mut dict = Dict::load(&ifo, false).expect("load");

    let mut expected = Vec::new();
    expected.extend_from_slice(&11u32.to_ne_bytes());
    expected.extend_from_slice(b"mworld\0");
    assert_eq!(dict.article(0).expect("article"), expected.as_slice());
}

#[test]
fn trailing_binary_field_gets_a_synthesised_length() {
    let tmp = TempDir::new().expect("tempdir");
    // "mW": a text field, then a binary field whose length is implied
    let body: &[u8] = b"word\0\x01\x02\x03";
    let entries: &[(&str, &[u8])] = &[("mixed", body)];
    let mut spec = BundleSpec::new("binfield", entries);
    spec.sametypesequence = Some("mW");
    let ifo = write_bundle(tmp.path(), &spec);
    let mut dict = Dict::load(&ifo, false).expect("load");

    let mut expected = Vec::new();
    expected.extend_from_slice(&0u32.to_ne_bytes()); // patched below
    expected.push(b'm');
    expected.extend_from_slice(b"word\0");
    expected.push(b'W');
    expected.extend_from_slice(&3u32.to_ne_bytes());
    expected.extend_from_slice(&[1, 2, 3]);
    let total = expected.len() as u32;
    expected[..4].copy_from_slice(&total.to_ne_bytes());
    assert_eq!(dict.article(0).expect("article"), expected.as_slice());
}

#[test]
fn dictzip_body_serves_the_same_articles() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[("alpha", b"first body"), ("beta", b"second body")];
    let mut spec = BundleSpec::new("dz", entries);
    spec.sametypesequence = Some("m");
    spec.dictzip_body = true;
    let ifo = write_bundle(tmp.path(), &spec);
    assert!(ext_path(tmp.path(), "dz", "dict.dz").exists());
    let mut dict = Dict::load(&ifo, false).expect("load");

    let article = dict.article(1).expect("article").to_vec();
    let mut expected = Vec::new();
    expected.extend_from_slice(&((4 + 1 + b"second body".len() + 1) as u32).to_ne_bytes());
    expected.push(b'm');
    expected.extend_from_slice(b"second body\0");
    assert_eq!(article, expected);
}

#[test]
fn synonyms_redirect_to_the_primary_index() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[
        ("aa", b"0"),
        ("ab", b"1"),
        ("ac", b"2"),
        ("ad", b"3"),
        ("ae", b"4"),
        ("af", b"5"),
        ("ag", b"6"),
        ("car", b"7"),
    ];
    let mut spec = BundleSpec::new("syn", entries);
    spec.syn = &[("automobile", 7)];
    let ifo = write_bundle(tmp.path(), &spec);
    let mut dict = Dict::load(&ifo, false).expect("load");

    assert_eq!(lookup_set(&mut dict, "automobile"), BTreeSet::from([7]));
    assert_eq!(dict.key(7).expect("key"), "car");
    // primary lookups are unaffected
    assert_eq!(lookup_set(&mut dict, "car"), BTreeSet::from([7]));
}

#[test]
fn morphological_fallback_finds_the_stem() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[("make", b"to create")];
    let ifo = write_bundle(tmp.path(), &BundleSpec::new("morpho", entries));
    let mut library = Library::new(true);
    library.load(&[ifo], false);
    assert_eq!(library.ndicts(), 1);

    for query in ["making", "makes", "maked", "MAKES"] {
        let mut hits = BTreeSet::new();
        assert!(
            library.lookup_simple(query, &mut hits, 0),
            "query {:?} should reach \"make\"",
            query
        );
        assert_eq!(hits, BTreeSet::from([0]), "query {:?}", query);
    }

    let mut hits = BTreeSet::new();
    assert!(!library.lookup_simple("unrelated", &mut hits, 0));
    assert!(hits.is_empty());

    assert_eq!(library.narticles(0), 1);
    let data = library.word_data(0, 0).expect("word data");
    // untagged record: host-order size header, then the raw body
    assert_eq!(&data[..4], &((4 + b"to create".len()) as u32).to_ne_bytes()[..]);
    assert_eq!(&data[4..], b"to create");
}

#[test]
fn fuzzy_nbest_is_ranked_by_distance_then_headword_order() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[
        ("bat", b"0"),
        ("car", b"1"),
        ("cat", b"2"),
        ("dog", b"3"),
    ];
    let ifo = write_bundle(tmp.path(), &BundleSpec::new("fuzzy", entries));
    let mut library = Library::new(true);
    library.load(&[ifo], false);

    let results = library.lookup_fuzzy("cat", 2);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_deref(), Some("cat"));
    // "bat" fills a slot first but the exact hit evicts it, leaving "car"
    // as the surviving distance-1 neighbour
    assert_eq!(results[1].as_deref(), Some("car"));

    // no duplicate slots even though case variants of a headword may match
    let results = library.lookup_fuzzy("ca", 4);
    let filled: Vec<&str> = results.iter().flatten().map(String::as_str).collect();
    let unique: BTreeSet<&str> = filled.iter().copied().collect();
    assert_eq!(filled.len(), unique.len());
}

#[test]
fn body_search_needs_every_word_somewhere_in_the_article() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[("apple", b"red apple on green table")];
    let mut spec = BundleSpec::new("body", entries);
    spec.sametypesequence = Some("m");
    let ifo = write_bundle(tmp.path(), &spec);
    let mut library = Library::new(false);
    library.load(&[ifo], false);

    let (kind, payload) = analyze_query("|red table");
    assert_eq!(kind, QueryType::Data);
    let results = library.lookup_data(&payload);
    assert_eq!(results, vec![vec!["apple".to_string()]]);

    assert_eq!(library.lookup_data("red stone"), vec![Vec::<String>::new()]);
    assert_eq!(library.lookup_data("table red"), vec![vec!["apple".to_string()]]);
}

#[test]
fn pattern_lookup_collects_and_sorts_across_the_library() {
    let tmp = TempDir::new().expect("tempdir");
    let entries: &[(&str, &[u8])] = &[
        ("bat", b"0"),
        ("car", b"1"),
        ("cat", b"2"),
        ("dog", b"3"),
    ];
    let ifo = write_bundle(tmp.path(), &BundleSpec::new("pat", entries));
    let mut library = Library::new(false);
    library.load(&[ifo], false);

    assert_eq!(library.lookup_pattern("ca*"), vec!["car", "cat"]);
    assert_eq!(library.lookup_pattern("?at"), vec!["bat", "cat"]);
    assert!(library.lookup_pattern("x*").is_empty());
}

/// 70 entries spans three pages of the offset index, so page anchors, the
/// in-page binary search and the cross-page walk all get exercised.
fn many_entries() -> Vec<(String, Vec<u8>)> {
    (0..70)
        .map(|i| (format!("w{:03}", i), format!("body {}", i).into_bytes()))
        .collect()
}

fn write_many(dir: &Path, stem: &str, gzip_index: bool) -> PathBuf {
    let owned = many_entries();
    let entries: Vec<(&str, &[u8])> = owned
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_slice()))
        .collect();
    let mut spec = BundleSpec::new(stem, &entries);
    spec.gzip_index = gzip_index;
    write_bundle(dir, &spec)
}

#[test]
fn multipage_offset_index_keeps_order_and_answers_lookups() {
    let tmp = TempDir::new().expect("tempdir");
    let ifo = write_many(tmp.path(), "pages", false);
    let mut dict = Dict::load(&ifo, false).expect("load");

    // the on-disk ordering invariant, via the paged key accessor
    let mut previous = dict.key(0).expect("key").to_string();
    for i in 1..dict.word_count() {
        let current = dict.key(i).expect("key").to_string();
        assert!(
            stardict_reader::stardict_strcmp(previous.as_bytes(), current.as_bytes())
                == std::cmp::Ordering::Less,
            "keys out of order at {}",
            i
        );
        previous = current;
    }

    for probe in [0usize, 31, 32, 33, 63, 64, 69] {
        let word = format!("w{:03}", probe);
        assert_eq!(lookup_set(&mut dict, &word), BTreeSet::from([probe]));
    }

    let mut hits = BTreeSet::new();
    let outcome = dict.lookup_with_next("w041x", &mut hits).expect("lookup");
    assert!(!outcome.found);
    assert_eq!(outcome.next_idx, 42);
}

#[test]
fn wordlist_index_behaves_like_the_offset_index() {
    let tmp = TempDir::new().expect("tempdir");
    let ifo = write_many(tmp.path(), "gz", true);
    assert!(ext_path(tmp.path(), "gz", "idx.gz").exists());
    let mut dict = Dict::load(&ifo, false).expect("load");

    for probe in [0usize, 31, 32, 69] {
        let word = format!("w{:03}", probe);
        assert_eq!(lookup_set(&mut dict, &word), BTreeSet::from([probe]));
    }

    let mut hits = BTreeSet::new();
    let outcome = dict.lookup_with_next("a", &mut hits).expect("lookup");
    assert!(!outcome.found);
    assert_eq!(outcome.next_idx, 0);
    let outcome = dict.lookup_with_next("zz", &mut hits).expect("lookup");
    assert_eq!(outcome.next_idx, INVALID_INDEX);
}

#[test]
fn page_cache_sidecar_round_trips() {
    let tmp = TempDir::new().expect("tempdir");
    let ifo = write_many(tmp.path(), "oft", false);
    let oft_path = ext_path(tmp.path(), "oft", "idx.oft");

    {
        let mut dict = Dict::load(&ifo, false).expect("first load");
        assert_eq!(lookup_set(&mut dict, "w050"), BTreeSet::from([50]));
    }
    assert!(oft_path.exists(), "sidecar written next to the index");
    let first_bytes = fs::read(&oft_path).expect("read sidecar");

    // a second load accepts the sidecar and answers identically
    {
        let mut dict = Dict::load(&ifo, false).expect("second load");
        assert_eq!(lookup_set(&mut dict, "w050"), BTreeSet::from([50]));
    }
    assert_eq!(fs::read(&oft_path).expect("read sidecar"), first_bytes);

    // a corrupt sidecar is rebuilt bytewise identical
    fs::write(&oft_path, b"garbage").expect("corrupt sidecar");
    {
        let mut dict = Dict::load(&ifo, false).expect("third load");
        assert_eq!(lookup_set(&mut dict, "w050"), BTreeSet::from([50]));
    }
    assert_eq!(fs::read(&oft_path).expect("read sidecar"), first_bytes);
}

#[test]
fn broken_bundles_are_rejected_but_do_not_poison_the_library() {
    let tmp = TempDir::new().expect("tempdir");

    let bad_ifo = tmp.path().join("bad.ifo");
    fs::write(&bad_ifo, "not a dictionary").expect("write bad ifo");
    assert!(Dict::load(&bad_ifo, false).is_err());

    // an ifo without companions fails too
    let lonely = tmp.path().join("lonely.ifo");
    fs::write(
        &lonely,
        "StarDict's dict ifo file\nbookname=L\nwordcount=1\nidxfilesize=9\n",
    )
    .expect("write lonely ifo");
    assert!(Dict::load(&lonely, false).is_err());

    let good = write_bundle(tmp.path(), &BundleSpec::new("good", CASE_ENTRIES));
    let mut library = Library::new(false);
    library.load(&[bad_ifo, lonely, good], false);
    assert_eq!(library.ndicts(), 1);
    assert_eq!(library.dict_name(0), "Test Dictionary");
    assert_eq!(library.word(3, 0).expect("word"), "ab");
}

#[test]
fn progress_callback_fires_once_per_dictionary() {
    use std::cell::Cell;
    use std::rc::Rc;

    let tmp = TempDir::new().expect("tempdir");
    let mut spec_a = BundleSpec::new("one", CASE_ENTRIES);
    spec_a.sametypesequence = Some("m");
    let mut spec_b = BundleSpec::new("two", CASE_ENTRIES);
    spec_b.sametypesequence = Some("m");
    let a = write_bundle(tmp.path(), &spec_a);
    let b = write_bundle(tmp.path(), &spec_b);
    let mut library = Library::new(false);
    library.load(&[a, b], false);

    let calls = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&calls);
    library.set_progress_callback(Some(Box::new(move || {
        counter.set(counter.get() + 1);
    })));

    library.lookup_fuzzy("aa", 2);
    assert_eq!(calls.get(), 2);

    calls.set(0);
    library.lookup_data("first");
    assert_eq!(calls.get(), 2);
}
