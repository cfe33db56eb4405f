//! Scanner - UTF-8 source to cell trees
//!
//! The scanner drives `locate_token` in a loop, pushing one cell per
//! token onto the data stack and popping the run into a fresh managed
//! array at each block close. Paths open whenever a word form is followed
//! immediately by `/`; the path elements are scanned by the same routine
//! in path mode and re-kinded afterwards (`foo/bar:` SET-PATH!,
//! `:foo/bar` GET-PATH!, `'foo/bar` LIT-PATH!).
//!
//! Errors carry the scanner's line count and a source excerpt. In relax
//! mode a syntax error becomes an ERROR! cell in the output so partial
//! tooling (highlighting, re-scan) can continue past it.

pub mod string;
pub mod tables;
pub mod token;
pub mod value;

use crate::error::{ErrorId, Raised, make_error};
use reval_core::cell::{CELL_FLAG_LINE, Cell, Kind, KIND_MAX};
use reval_core::mold;
use reval_core::series::{MKS_NONE, Series, make_array, manage_series, make_binary_from};
use reval_core::state::mem;
use reval_core::symbol::intern;
use tables::*;
use token::{Token, locate_token};
use value::*;

pub const SCAN_NEXT: u32 = 1 << 0;
pub const SCAN_ONLY: u32 = 1 << 1;
pub const SCAN_RELAX: u32 = 1 << 2;

/// Scanner position state over one UTF-8 input.
pub struct ScanState<'a> {
    pub src: &'a [u8],
    pub begin: usize,
    pub end: usize,
    pub line_count: usize,
    /// Offset of the current line's start, for error excerpts.
    pub head_line: usize,
    pub opts: u32,
    pub errors: usize,
}

impl<'a> ScanState<'a> {
    pub fn new(src: &'a [u8]) -> ScanState<'a> {
        ScanState {
            src,
            begin: 0,
            end: 0,
            line_count: 1,
            head_line: 0,
            opts: 0,
            errors: 0,
        }
    }

    /// Byte at offset, emulating a NUL terminator past the end.
    #[inline]
    pub fn at(&self, i: usize) -> u8 {
        self.src.get(i).copied().unwrap_or(0)
    }

    fn range(&self, from: usize, to: usize) -> &'a [u8] {
        &self.src[from.min(self.src.len())..to.min(self.src.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Top,
    Block,
    Group,
    Path,
}

// =============================================================================
// Errors
// =============================================================================

fn scan_error(ss: &ScanState, id: ErrorId, token: Token, from: usize, to: usize) -> Raised {
    let offending = String::from_utf8_lossy(ss.range(from, to)).into_owned();
    let mut line_end = ss.head_line;
    while !any_cr_lf_end(ss.at(line_end)) {
        line_end += 1;
    }
    let near = format!(
        "(line {}) {}",
        ss.line_count,
        String::from_utf8_lossy(ss.range(ss.head_line, line_end))
    );
    let ctx = make_error(id, &[token.name(), &offending]);
    // The scanner's location supersedes any frame-derived near.
    Raised(crate::error::attach_near(ctx, &near))
}

// =============================================================================
// Cell push helpers
// =============================================================================

fn push_cell() -> *mut Cell {
    mem().data_stack.push()
}

fn push_string_kind(kind: Kind, bytes: &[u8]) {
    let s = make_binary_from(bytes, MKS_NONE);
    manage_series(s);
    unsafe { (*push_cell()).init_series(kind, s, 0) };
}

/// Pop the cells pushed since `dsp_orig` into a fresh managed array.
fn pop_to_array(dsp_orig: usize) -> *mut Series {
    let m = mem();
    let count = m.data_stack.dsp() - dsp_orig;
    let array = make_array(count.max(1), MKS_NONE);
    for i in 0..count {
        let cell = unsafe { *m.data_stack.at(dsp_orig + i) };
        reval_core::series::append_cell(array, &cell);
    }
    m.data_stack.drop_to(dsp_orig);
    manage_series(array);
    array
}

// =============================================================================
// The array scanner
// =============================================================================

fn word_kind_for(token: Token) -> Kind {
    match token {
        Token::Set => Kind::SetWord,
        Token::Get => Kind::GetWord,
        Token::Lit => Kind::LitWord,
        Token::Refine => Kind::Refinement,
        _ => Kind::Word,
    }
}

fn scan_array(ss: &mut ScanState, mode: Mode) -> Result<*mut Series, Raised> {
    let dsp_orig = mem().data_stack.dsp();
    let mut line = false;
    let start_line = ss.line_count;
    let start_head = ss.head_line;

    let just_once = ss.opts & SCAN_NEXT != 0;
    if just_once {
        ss.opts &= !SCAN_NEXT; // no deeper
    }

    loop {
        let mold_mark = mold::mark();
        let located = locate_token(ss);

        let mut token = match located {
            Ok(Token::End) => break,
            Ok(t) => t,
            Err(bad) => {
                ss.begin = ss.end; // skip malformed token
                let err = scan_error(ss, ErrorId::Invalid, bad, ss.begin, ss.end);
                mold::drop_to(mold_mark);
                return relax_or_fail(ss, dsp_orig, err, line);
            }
        };

        let mut bp = ss.begin;
        let mut ep = ss.end;

        // In a path, a leading or doubled slash reads as a blank element.
        if mode == Mode::Path && ss.at(bp) == b'/' {
            unsafe { (*push_cell()).init_blank() };
            ss.begin = bp + 1;
            continue;
        }

        // A word form followed directly by `/` opens a path.
        if mode != Mode::Path
            && (token == Token::Path
                || (matches!(token, Token::Word | Token::Lit | Token::Get)
                    && ss.at(ep) == b'/'))
        {
            let array = scan_array(ss, Mode::Path)?;
            let head = unsafe { &mut *(*array).array_at(0) };

            let kind;
            if token == Token::Lit {
                kind = Kind::LitPath;
                demote_head_word(head);
            } else if head.is_kind(Kind::GetWord) {
                if ss.at(ss.end) == b':' {
                    let err =
                        scan_error(ss, ErrorId::Invalid, Token::Path, bp, ss.end + 1);
                    return relax_or_fail(ss, dsp_orig, err, line);
                }
                kind = Kind::GetPath;
                demote_head_word(head);
            } else if ss.at(ss.end) == b':' {
                kind = Kind::SetPath;
                ss.end += 1;
                ss.begin = ss.end;
            } else {
                kind = Kind::Path;
            }
            unsafe { (*push_cell()).init_series(kind, array, 0) };
            if line {
                line = false;
                unsafe { (*mem().data_stack.top()).set_flag(CELL_FLAG_LINE) };
            }
            if path_tail(ss, dsp_orig, mode, &mut line, just_once)? {
                break;
            }
            continue;
        }

        ss.begin = ss.end; // accept the token

        match token {
            Token::Newline => {
                line = true;
                ss.head_line = ep;
                continue;
            }

            Token::Bar => unsafe {
                (*push_cell()).init_bar();
            },
            Token::LitBar => unsafe {
                (*push_cell()).init_lit_bar();
            },
            Token::Blank => unsafe {
                (*push_cell()).init_blank();
            },

            Token::Lit | Token::Get | Token::Set | Token::Word => {
                let mut len = ep - bp;
                if matches!(token, Token::Lit | Token::Get) {
                    if ss.at(ep - 1) == b':' {
                        // `:foo:` is only meaningful inside a path
                        if len == 1 || mode != Mode::Path {
                            let err =
                                scan_error(ss, ErrorId::Invalid, token, bp, ep);
                            return relax_or_fail(ss, dsp_orig, err, line);
                        }
                        len -= 1;
                        ss.end -= 1;
                        ss.begin = ss.end;
                    }
                    bp += 1;
                    len -= 1;
                }
                if token == Token::Set {
                    len -= 1; // drop the trailing colon
                    if mode == Mode::Path {
                        // `path/word:` - the colon belongs to the set-path
                        token = Token::Word;
                        ss.end -= 1;
                        ss.begin = ss.end;
                    }
                }
                if len == 0 {
                    let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                    return relax_or_fail(ss, dsp_orig, err, line);
                }
                let spelling = intern(ss.range(bp, bp + len));
                unsafe {
                    (*push_cell()).init_word(word_kind_for(token), spelling);
                }
            }

            Token::Refine => {
                let spelling = intern(ss.range(bp + 1, ep));
                unsafe {
                    (*push_cell()).init_word(Kind::Refinement, spelling);
                }
            }

            Token::Issue => {
                if ep - bp == 1 {
                    // A lone `#` reads as blank.
                    unsafe { (*push_cell()).init_blank() };
                } else {
                    let spelling = intern(ss.range(bp + 1, ep));
                    unsafe {
                        (*push_cell()).init_word(Kind::Issue, spelling);
                    }
                }
            }

            Token::BlockBegin | Token::GroupBegin => {
                let inner = scan_array(
                    ss,
                    if token == Token::BlockBegin {
                        Mode::Block
                    } else {
                        Mode::Group
                    },
                )?;
                let kind = if token == Token::BlockBegin {
                    Kind::Block
                } else {
                    Kind::Group
                };
                unsafe { (*push_cell()).init_series(kind, inner, 0) };
            }

            Token::BlockEnd | Token::GroupEnd => {
                let expect = if token == Token::BlockEnd {
                    Mode::Block
                } else {
                    Mode::Group
                };
                if mode == expect {
                    break;
                }
                // Mismatch: either extra close or missing close.
                let err = if mode == Mode::Top {
                    scan_error(ss, ErrorId::Invalid, token, bp, ep)
                } else {
                    ss.line_count = start_line;
                    ss.head_line = start_head;
                    scan_error(ss, ErrorId::Missing, token, bp, ep)
                };
                return relax_or_fail(ss, dsp_orig, err, line);
            }

            Token::Integer => {
                if ss.at(ep) != b'/' || mode == Mode::Path {
                    match scan_integer(ss.range(bp, ep)) {
                        Some(i) => unsafe {
                            (*push_cell()).init_integer(i);
                        },
                        None => {
                            let err =
                                scan_error(ss, ErrorId::Invalid, token, bp, ep);
                            return relax_or_fail(ss, dsp_orig, err, line);
                        }
                    }
                } else {
                    // Integer followed by slash outside a path: a date.
                    while ss.at(ep) == b'/' || is_lex_not_delimit(ss.at(ep)) {
                        ep += 1;
                    }
                    ss.begin = ep;
                    ss.end = ep;
                    match scan_date(ss.range(bp, ep)) {
                        Some((y, m, d, zone, nanos)) => unsafe {
                            (*push_cell()).init_date(y, m, d, zone, nanos);
                        },
                        None => {
                            let err = scan_error(
                                ss,
                                ErrorId::Invalid,
                                Token::Date,
                                bp,
                                ep,
                            );
                            return relax_or_fail(ss, dsp_orig, err, line);
                        }
                    }
                }
            }

            Token::Decimal | Token::Percent => {
                if ss.at(ep) == b'/' {
                    // No 1.2/abc
                    let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                    return relax_or_fail(ss, dsp_orig, err, line);
                }
                match scan_decimal(ss.range(bp, ep)) {
                    Some(d) => unsafe {
                        if ss.at(ep - 1) == b'%' {
                            (*push_cell()).init_percent(d / 100.0);
                        } else {
                            (*push_cell()).init_decimal(d);
                        }
                    },
                    None => {
                        let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                        return relax_or_fail(ss, dsp_orig, err, line);
                    }
                }
            }

            Token::Money => {
                if ss.at(ep) == b'/' {
                    let err =
                        scan_error(ss, ErrorId::Invalid, token, bp, ep + 1);
                    return relax_or_fail(ss, dsp_orig, err, line);
                }
                match scan_money(ss.range(bp, ep)) {
                    Some(d) => unsafe {
                        (*push_cell()).init_money(d);
                    },
                    None => {
                        let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                        return relax_or_fail(ss, dsp_orig, err, line);
                    }
                }
            }

            Token::Time => {
                if ss.at(ep - 1) == b':' && mode == Mode::Path {
                    // `path/10:` - really an integer inside a set-path
                    match scan_integer(ss.range(bp, ep - 1)) {
                        Some(i) => unsafe {
                            (*push_cell()).init_integer(i);
                        },
                        None => {
                            let err =
                                scan_error(ss, ErrorId::Invalid, token, bp, ep);
                            return relax_or_fail(ss, dsp_orig, err, line);
                        }
                    }
                    ss.end -= 1;
                    ss.begin = ss.end;
                } else {
                    match scan_time(ss.range(bp, ep)) {
                        Some(nanos) => unsafe {
                            (*push_cell()).init_time(nanos);
                        },
                        None => {
                            let err =
                                scan_error(ss, ErrorId::Invalid, token, bp, ep);
                            return relax_or_fail(ss, dsp_orig, err, line);
                        }
                    }
                }
            }

            Token::Date => {
                // Extend over a /time suffix (not inside paths).
                while ss.at(ep) == b'/' && mode != Mode::Path {
                    ep += 1;
                    while is_lex_not_delimit(ss.at(ep)) {
                        ep += 1;
                    }
                    if ep - bp > 50 {
                        break;
                    }
                    ss.begin = ep;
                    ss.end = ep;
                }
                match scan_date(ss.range(bp, ep)) {
                    Some((y, m, d, zone, nanos)) => unsafe {
                        (*push_cell()).init_date(y, m, d, zone, nanos);
                    },
                    None => {
                        let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                        return relax_or_fail(ss, dsp_orig, err, line);
                    }
                }
            }

            Token::Char => {
                // #"c" - content between the quotes, escapes included
                match string::scan_char_escapable(ss.src, bp + 2) {
                    Some((c, next)) if ss.at(next) == b'"' => unsafe {
                        (*push_cell()).init_char(c);
                    },
                    _ => {
                        let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                        return relax_or_fail(ss, dsp_orig, err, line);
                    }
                }
            }

            Token::String => {
                // Content was decoded into the mold buffer by the locator.
                let s = mold::flush_series(mold_mark);
                manage_series(s);
                unsafe { (*push_cell()).init_series(Kind::String, s, 0) };
            }

            Token::Binary => {
                let (base, body_from) = match (ss.at(bp), ss.at(bp + 1)) {
                    (b'#', _) => (16, bp + 2),
                    (b'2', b'#') => (2, bp + 3),
                    (b'6', b'4') => (64, bp + 4),
                    (b'1', b'6') => (16, bp + 4),
                    _ => (16, bp + 2),
                };
                match scan_binary_body(ss.range(body_from, ep - 1), base) {
                    Some(bytes) => {
                        let s = make_binary_from(&bytes, MKS_NONE);
                        manage_series(s);
                        unsafe {
                            (*push_cell()).init_series(Kind::Binary, s, 0)
                        };
                    }
                    None => {
                        let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                        return relax_or_fail(ss, dsp_orig, err, line);
                    }
                }
            }

            Token::Pair => match scan_pair(ss.range(bp, ep)) {
                Some((x, y)) => unsafe {
                    (*push_cell()).init_pair(x, y);
                },
                None => {
                    let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                    return relax_or_fail(ss, dsp_orig, err, line);
                }
            },

            Token::Tuple => match scan_tuple(ss.range(bp, ep)) {
                Some(parts) => unsafe {
                    (*push_cell()).init_tuple(&parts);
                },
                None => {
                    let err = scan_error(ss, ErrorId::Invalid, token, bp, ep);
                    return relax_or_fail(ss, dsp_orig, err, line);
                }
            },

            Token::File => {
                if ss.at(bp + 1) == b'"' {
                    let s = mold::flush_series(mold_mark);
                    manage_series(s);
                    unsafe { (*push_cell()).init_series(Kind::File, s, 0) };
                } else {
                    push_string_kind(Kind::File, ss.range(bp + 1, ep));
                }
            }

            Token::Email => push_string_kind(Kind::Email, ss.range(bp, ep)),
            Token::Url => push_string_kind(Kind::Url, ss.range(bp, ep)),
            Token::Tag => push_string_kind(Kind::Tag, ss.range(bp + 1, ep - 1)),

            Token::Construct => {
                let inner = scan_full_array(ss, Mode::Block)?;
                construct_value(ss, inner)?;
            }

            Token::Path | Token::End | Token::BlockEnd | Token::GroupEnd
            | Token::Newline => unreachable!("handled above"),
        }

        if line {
            line = false;
            unsafe { (*mem().data_stack.top()).set_flag(CELL_FLAG_LINE) };
        }

        if path_tail(ss, dsp_orig, mode, &mut line, just_once)? {
            break;
        }
    }

    if mode == Mode::Block || mode == Mode::Group {
        // Ran out of input with the block still open.
        ss.line_count = start_line;
        ss.head_line = start_head;
        let err = scan_error(ss, ErrorId::Missing, Token::End, ss.begin, ss.end);
        return relax_or_fail(ss, dsp_orig, err, line);
    }

    // A trailing newline annotates the final value.
    if line && mem().data_stack.dsp() != dsp_orig {
        unsafe { (*mem().data_stack.top()).set_flag(CELL_FLAG_LINE) };
    }
    Ok(pop_to_array(dsp_orig))
}

/// Shared loop tail: path-continuation handling and the scan-next early
/// exits. Returns true when the array should close.
fn path_tail(
    ss: &mut ScanState,
    _dsp_orig: usize,
    mode: Mode,
    _line: &mut bool,
    just_once: bool,
) -> Result<bool, Raised> {
    if mode == Mode::Path {
        if ss.at(ss.end) == b'/' {
            let next = ss.end + 1;
            ss.begin = next;
            ss.end = next;
            if ss.at(next) != b'(' && is_lex_delimit(ss.at(next)) {
                return Err(scan_error(
                    ss,
                    ErrorId::Invalid,
                    Token::Path,
                    next,
                    next + 1,
                ));
            }
            return Ok(false);
        }
        return Ok(true);
    }
    if ss.opts & SCAN_ONLY != 0 || just_once {
        return Ok(true);
    }
    Ok(false)
}

/// A LIT-PATH!/GET-PATH!'s head word loses its sigil inside the path.
fn demote_head_word(head: &mut Cell) {
    if head.kind().is_some_and(|k| k.is_word()) {
        head.header =
            (head.header & !reval_core::cell::KIND_BYTE_MASK) | Kind::Word as u64;
    }
}

/// On a syntax error: relax mode records it inline and closes the array;
/// otherwise the error raises.
fn relax_or_fail(
    ss: &mut ScanState,
    dsp_orig: usize,
    err: Raised,
    line: bool,
) -> Result<*mut Series, Raised> {
    if ss.opts & SCAN_RELAX != 0 {
        ss.errors += 1;
        unsafe {
            let cell = push_cell();
            (*cell).init_context(Kind::Error, err.0);
            if line {
                (*cell).set_flag(CELL_FLAG_LINE);
            }
        }
        return Ok(pop_to_array(dsp_orig));
    }
    Err(err)
}

/// Scan a nested full array, shielding it from SCAN_ONLY truncation.
fn scan_full_array(ss: &mut ScanState, mode: Mode) -> Result<*mut Series, Raised> {
    let saved_only = ss.opts & SCAN_ONLY;
    ss.opts &= !SCAN_ONLY;
    let result = scan_array(ss, mode);
    ss.opts |= saved_only;
    result
}

// =============================================================================
// Construct syntax
// =============================================================================

/// `#[...]`: logic and blank literals plus datatype names.
fn construct_value(ss: &mut ScanState, array: *mut Series) -> Result<(), Raised> {
    let len = unsafe { (*array).len() };
    let head = unsafe { &*(*array).array_at(0) };
    if len != 1 || !head.is_kind(Kind::Word) {
        return Err(malconstruct(ss, array));
    }
    let spelling = reval_core::symbol::canon_of(head.word_spelling());
    let name = reval_core::symbol::spelling_bytes(spelling);

    match name {
        b"true" => unsafe {
            (*push_cell()).init_logic(true);
        },
        b"false" => unsafe {
            (*push_cell()).init_logic(false);
        },
        b"none" | b"blank" => unsafe {
            (*push_cell()).init_blank();
        },
        _ => {
            // A datatype name: `#[integer!]`
            if let Some(kind) = kind_from_name(name) {
                unsafe { (*push_cell()).init_datatype(kind) };
            } else {
                return Err(malconstruct(ss, array));
            }
        }
    }
    Ok(())
}

fn malconstruct(ss: &ScanState, array: *mut Series) -> Raised {
    let mut cell = Cell::zeroed();
    cell.init_series(Kind::Block, array, 0);
    let molded = crate::mold::mold_cell(&cell);
    let ctx = make_error(ErrorId::Malconstruct, &[&molded]);
    let near = format!("(line {})", ss.line_count);
    Raised(crate::error::attach_near(ctx, &near))
}

/// Resolve `integer!`-style names to kinds.
pub fn kind_from_name(name: &[u8]) -> Option<Kind> {
    for k in 1..KIND_MAX {
        let kind = Kind::from_u8(k).unwrap();
        if kind.name().as_bytes() == name {
            return Some(kind);
        }
    }
    None
}

// =============================================================================
// Public entry points
// =============================================================================

/// Scan a full UTF-8 source into a managed array of values.
pub fn scan_source(src: &[u8]) -> Result<*mut Series, Raised> {
    let mut ss = ScanState::new(src);
    scan_array(&mut ss, Mode::Top)
}

/// Scan with options (transcode's /next /only /relax). Returns the array
/// and the byte offset where scanning stopped.
pub fn scan_source_opts(src: &[u8], opts: u32) -> Result<(*mut Series, usize), Raised> {
    let mut ss = ScanState::new(src);
    ss.opts = opts;
    let array = scan_array(&mut ss, Mode::Top)?;
    Ok((array, ss.begin.min(src.len())))
}

pub enum HeaderScan {
    None,
    /// Offset of the header block after `REBOL [`.
    Header(usize),
    /// Same, but the script was embedded inside an outer `[`.
    Embedded(usize),
}

/// Look for a `REBOL [` header: the word REBOL at a line start followed
/// by an open bracket, optionally preceded by `[` for embedded scripts.
pub fn scan_header(src: &[u8]) -> HeaderScan {
    let ss = ScanState::new(src);
    let mut cp = 0usize;
    let mut rebol: Option<usize> = None;
    let mut bracket: Option<usize> = None;

    loop {
        while is_lex_space(ss.at(cp)) {
            cp += 1;
        }
        match ss.at(cp) {
            b'[' => {
                if rebol.is_some() {
                    return match bracket {
                        Some(_) => HeaderScan::Embedded(cp + 1),
                        None => HeaderScan::Header(cp + 1),
                    };
                }
                bracket = Some(cp);
                cp += 1;
            }
            b'R' | b'r' => {
                if ss.range(cp, cp + 5).eq_ignore_ascii_case(b"rebol") {
                    rebol = Some(cp);
                    cp += 5;
                } else {
                    cp += 1;
                    bracket = None;
                    skip_line(&ss, &mut cp);
                }
            }
            b';' => skip_line(&ss, &mut cp),
            0 => return HeaderScan::None,
            b => {
                if !any_cr_lf_end(b) {
                    rebol = None;
                    bracket = None;
                }
                skip_line(&ss, &mut cp);
            }
        }
    }
}

fn skip_line(ss: &ScanState, cp: &mut usize) {
    while !any_cr_lf_end(ss.at(*cp)) {
        *cp += 1;
    }
    if ss.at(*cp) == b'\r' && ss.at(*cp + 1) == b'\n' {
        *cp += 1;
    }
    if ss.at(*cp) != 0 {
        *cp += 1;
    }
}

/// Scan a standalone word spelling (the embedding API's word map).
pub fn scan_word(bytes: &[u8]) -> Option<*mut Series> {
    if bytes.is_empty() {
        return None;
    }
    let mut ss = ScanState::new(bytes);
    match locate_token(&mut ss) {
        Ok(Token::Word) if ss.begin == 0 && ss.end == bytes.len() => Some(intern(bytes)),
        _ => None,
    }
}

/// Scan a standalone issue spelling (no leading `#`).
pub fn scan_issue(bytes: &[u8]) -> Option<*mut Series> {
    if bytes.is_empty() {
        return None;
    }
    for &b in bytes {
        if is_lex_delimit(b) || is_lex_space(b) {
            return None;
        }
    }
    Some(intern(bytes))
}
