//! Scanner integration: literal forms, tree assembly, error recovery.

use reval_core::cell::{Cell, Kind};
use reval_runtime::mold::{mold_array, mold_cell};
use reval_runtime::natives::cells_equal;
use reval_runtime::scan::{
    HeaderScan, SCAN_NEXT, SCAN_RELAX, scan_header, scan_source, scan_source_opts,
};
use reval_runtime::test_support::RuntimeGuard;

fn scan_ok(src: &str) -> Vec<Cell> {
    let array = scan_source(src.as_bytes()).expect("scan failed");
    let len = unsafe { (*array).len() };
    (0..len)
        .map(|i| unsafe { *(*array).array_at(i) })
        .collect()
}

fn scan_one(src: &str) -> Cell {
    let cells = scan_ok(src);
    assert_eq!(cells.len(), 1, "expected one value from {src:?}");
    cells[0]
}

fn spelling_of(cell: &Cell) -> String {
    String::from_utf8_lossy(reval_core::symbol::spelling_bytes(cell.word_spelling()))
        .into_owned()
}

#[test]
fn lex_primitives() {
    let _rt = RuntimeGuard::new();
    let cells = scan_ok("1 2.5 [a b]");
    assert_eq!(cells.len(), 3);
    assert_eq!(cells[0].kind(), Some(Kind::Integer));
    assert_eq!(cells[0].int64(), 1);
    assert_eq!(cells[1].kind(), Some(Kind::Decimal));
    assert_eq!(cells[1].decimal(), 2.5);
    assert_eq!(cells[2].kind(), Some(Kind::Block));

    let block = cells[2].series();
    assert_eq!(unsafe { (*block).len() }, 2);
    let a = unsafe { *(*block).array_at(0) };
    let b = unsafe { *(*block).array_at(1) };
    assert_eq!(a.kind(), Some(Kind::Word));
    assert_eq!(spelling_of(&a), "a");
    assert_eq!(spelling_of(&b), "b");
}

#[test]
fn path_assembly() {
    let _rt = RuntimeGuard::new();
    let path = scan_one("foo/bar/:baz");
    // A GET-WORD head makes the whole thing a GET-PATH; inner words are
    // plain... but `:baz` mid-path stays a GET-WORD element.
    assert_eq!(path.kind(), Some(Kind::Path));
    let cells = scan_ok(":foo/bar/baz");
    assert_eq!(cells[0].kind(), Some(Kind::GetPath));
    let inner = cells[0].series();
    assert_eq!(unsafe { (*inner).len() }, 3);
    let head = unsafe { *(*inner).array_at(0) };
    assert_eq!(head.kind(), Some(Kind::Word)); // sigil moved to the path
    assert_eq!(spelling_of(&head), "foo");
}

#[test]
fn set_and_lit_paths() {
    let _rt = RuntimeGuard::new();
    let cells = scan_ok("obj/field: 1");
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0].kind(), Some(Kind::SetPath));

    let lit = scan_one("'a/b");
    assert_eq!(lit.kind(), Some(Kind::LitPath));
}

#[test]
fn escapes_in_strings() {
    let _rt = RuntimeGuard::new();
    let s = scan_one("{a^/b^(41)c}");
    assert_eq!(s.kind(), Some(Kind::String));
    let bytes = unsafe { (*s.series()).data_slice() };
    assert_eq!(bytes, b"a\nbAc");
    assert_eq!(bytes.len(), 5);
}

#[test]
fn binary_literal_ignores_whitespace() {
    let _rt = RuntimeGuard::new();
    let b = scan_one("#{DEAD BEEF}");
    assert_eq!(b.kind(), Some(Kind::Binary));
    assert_eq!(unsafe { (*b.series()).data_slice() }, &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn binary_bases() {
    let _rt = RuntimeGuard::new();
    let b2 = scan_one("2#{01000001}");
    assert_eq!(unsafe { (*b2.series()).data_slice() }, b"A");
    let b64 = scan_one("64#{QUJD}");
    assert_eq!(unsafe { (*b64.series()).data_slice() }, b"ABC");
}

#[test]
fn numeric_fingerprints() {
    let _rt = RuntimeGuard::new();
    assert_eq!(scan_one("+12.3e-4").kind(), Some(Kind::Decimal));
    assert_eq!(scan_one("1.2.3").kind(), Some(Kind::Tuple));
    assert_eq!(scan_one("1x2").kind(), Some(Kind::Pair));
    assert_eq!(scan_one("12:34").kind(), Some(Kind::Time));
    assert_eq!(scan_one("10%").kind(), Some(Kind::Percent));
    assert_eq!(scan_one("user@host").kind(), Some(Kind::Email));
    assert_eq!(scan_one("$10.50").kind(), Some(Kind::Money));
    assert_eq!(scan_one("1'200").int64(), 1200);
}

#[test]
fn word_sigils() {
    let _rt = RuntimeGuard::new();
    assert_eq!(scan_one("foo:").kind(), Some(Kind::SetWord));
    assert_eq!(scan_one(":foo").kind(), Some(Kind::GetWord));
    assert_eq!(scan_one("'foo").kind(), Some(Kind::LitWord));
    assert_eq!(scan_one("/refine").kind(), Some(Kind::Refinement));
    assert_eq!(scan_one("#issue").kind(), Some(Kind::Issue));
    assert_eq!(scan_one("_").kind(), Some(Kind::Blank));
    assert_eq!(scan_one("|").kind(), Some(Kind::Bar));
    assert_eq!(scan_one("'|").kind(), Some(Kind::LitBar));
}

#[test]
fn angle_words_and_tags() {
    let _rt = RuntimeGuard::new();
    assert_eq!(scan_one("<").kind(), Some(Kind::Word));
    assert_eq!(scan_one(">").kind(), Some(Kind::Word));
    assert_eq!(scan_one("<=").kind(), Some(Kind::Word));
    assert_eq!(scan_one(">=").kind(), Some(Kind::Word));
    assert_eq!(scan_one("<>").kind(), Some(Kind::Word));
    assert_eq!(scan_one("->").kind(), Some(Kind::Word));
    let tag = scan_one("<div class=\"x\">");
    assert_eq!(tag.kind(), Some(Kind::Tag));
    assert_eq!(unsafe { (*tag.series()).data_slice() }, b"div class=\"x\"");
}

#[test]
fn files_urls_dates() {
    let _rt = RuntimeGuard::new();
    assert_eq!(scan_one("%file/path").kind(), Some(Kind::File));
    assert_eq!(scan_one("http://url/x").kind(), Some(Kind::Url));

    let d = scan_one("1-Jan-2017");
    assert_eq!(d.kind(), Some(Kind::Date));
    assert_eq!(d.date_year(), 2017);
    assert_eq!(d.date_month(), 1);
    assert_eq!(d.date_day(), 1);

    let t = scan_one("12:34:56");
    assert_eq!(t.time_nanos(), ((12 * 3600 + 34 * 60 + 56) as i64) * 1_000_000_000);
}

#[test]
fn char_literals() {
    let _rt = RuntimeGuard::new();
    assert_eq!(scan_one("#\"A\"").character(), 'A');
    assert_eq!(scan_one("#\"^/\"").character(), '\n');
    assert_eq!(scan_one("#\"^(7F)\"").character(), '\u{7F}');
}

#[test]
fn construct_literals() {
    let _rt = RuntimeGuard::new();
    assert!(scan_one("#[true]").logic());
    assert!(!scan_one("#[false]").logic());
    assert_eq!(scan_one("#[none]").kind(), Some(Kind::Blank));
    let dt = scan_one("#[integer!]");
    assert_eq!(dt.kind(), Some(Kind::Datatype));
    assert_eq!(dt.datatype_kind(), Kind::Integer);
}

#[test]
fn comments_and_line_flags() {
    let _rt = RuntimeGuard::new();
    let cells = scan_ok("1 ; comment\n2");
    assert_eq!(cells.len(), 2);
    assert!(cells[1].get_flag(reval_core::cell::CELL_FLAG_LINE));
}

#[test]
fn nested_groups() {
    let _rt = RuntimeGuard::new();
    let g = scan_one("(a (b [c]))");
    assert_eq!(g.kind(), Some(Kind::Group));
    let inner = unsafe { *(*g.series()).array_at(1) };
    assert_eq!(inner.kind(), Some(Kind::Group));
}

#[test]
fn syntax_errors_raise() {
    let _rt = RuntimeGuard::new();
    assert!(scan_source(b"2accept").is_err());
    assert!(scan_source(b"[unclosed").is_err());
    assert!(scan_source(b"{open string").is_err());
    assert!(scan_source(b"1.2.x").is_err());
}

#[test]
fn relax_mode_embeds_errors() {
    let _rt = RuntimeGuard::new();
    let (array, _) = scan_source_opts(b"1 2accept", SCAN_RELAX).expect("relax never raises");
    let len = unsafe { (*array).len() };
    assert_eq!(len, 2);
    let err = unsafe { *(*array).array_at(1) };
    assert_eq!(err.kind(), Some(Kind::Error));
}

#[test]
fn scan_next_stops_after_one() {
    let _rt = RuntimeGuard::new();
    let (array, position) = scan_source_opts(b"alpha beta gamma", SCAN_NEXT).unwrap();
    assert_eq!(unsafe { (*array).len() }, 1);
    assert!(position < b"alpha beta gamma".len());
}

#[test]
fn header_detection() {
    let _rt = RuntimeGuard::new();
    match scan_header(b"REBOL [title: \"x\"]\nprint 1") {
        HeaderScan::Header(offset) => assert!(offset > 5),
        _ => panic!("header not found"),
    }
    assert!(matches!(scan_header(b"print 1"), HeaderScan::None));
    assert!(matches!(
        scan_header(b"[REBOL [title: \"x\"]]"),
        HeaderScan::Embedded(_)
    ));
}

#[test]
fn mold_scan_round_trip() {
    let _rt = RuntimeGuard::new();
    let literals = [
        "123",
        "12.5",
        "12%",
        "1x2",
        "1.2.3",
        "12:34:56",
        "1-Jan-2017",
        "#\"A\"",
        "#{DEADBEEF}",
        "\"single line\"",
        "<tag>",
        "%file/path",
        "user@host.com",
        "$100.00",
        "word",
        ":word",
        "'word",
        "word:",
        "/refine",
        "#issue",
        "[1 two \"three\"]",
        "a/b/c",
        "#[true]",
        "_",
        "|",
    ];
    for src in literals {
        let value = scan_one(src);
        let molded = mold_cell(&value);
        let again = scan_one(&molded);
        assert!(
            cells_equal(&value, &again) || mold_cell(&again) == molded,
            "round trip failed for {src:?} -> {molded:?}"
        );
    }
}

#[test]
fn mold_array_preserves_line_breaks() {
    let _rt = RuntimeGuard::new();
    let array = scan_source(b"1 2\n3").unwrap();
    assert_eq!(mold_array(array), "1 2\n3");
}
