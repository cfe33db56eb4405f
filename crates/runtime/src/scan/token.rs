//! Token location
//!
//! `prescan` classifies the upcoming byte run and accumulates a bit
//! fingerprint of the special characters seen (excluding the first byte,
//! whose class the locator switches on directly). `locate_token` then
//! decides the token kind from the first byte's class plus the
//! fingerprint: one special character in the middle of digits is the
//! difference between `1.2` DECIMAL!, `1.2.3` TUPLE!, `1x2` PAIR!,
//! `12:34` TIME!, and `user@host` EMAIL!.
//!
//! Malformed tokens come back as `Err(kind)` - the caller knows both what
//! the bytes were trying to be and the offending range, and can either
//! raise or (in relax mode) embed an ERROR! value.

use super::string::{scan_char_escapable, scan_quote_push_mold};
use super::tables::*;
use super::ScanState;
use reval_core::mold;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Newline,
    Bar,
    LitBar,
    Blank,
    Word,
    Set,
    Get,
    Lit,
    Refine,
    Issue,
    BlockBegin,
    BlockEnd,
    GroupBegin,
    GroupEnd,
    Path,
    Integer,
    Decimal,
    Percent,
    Money,
    Time,
    Date,
    Char,
    String,
    Binary,
    Pair,
    Tuple,
    File,
    Email,
    Url,
    Tag,
    Construct,
    End,
}

impl Token {
    pub fn name(self) -> &'static str {
        match self {
            Token::Newline => "newline",
            Token::Bar => "bar",
            Token::LitBar => "lit-bar",
            Token::Blank => "blank",
            Token::Word => "word",
            Token::Set => "set-word",
            Token::Get => "get-word",
            Token::Lit => "lit-word",
            Token::Refine => "refinement",
            Token::Issue => "issue",
            Token::BlockBegin | Token::BlockEnd => "block",
            Token::GroupBegin | Token::GroupEnd => "group",
            Token::Path => "path",
            Token::Integer => "integer",
            Token::Decimal => "decimal",
            Token::Percent => "percent",
            Token::Money => "money",
            Token::Time => "time",
            Token::Date => "date",
            Token::Char => "char",
            Token::String => "string",
            Token::Binary => "binary",
            Token::Pair => "pair",
            Token::Tuple => "tuple",
            Token::File => "file",
            Token::Email => "email",
            Token::Url => "url",
            Token::Tag => "tag",
            Token::Construct => "construct",
            Token::End => "end",
        }
    }
}

/// Skip whitespace, then walk to the next delimiter accumulating the
/// special-character fingerprint. Leaves `begin`/`end` spanning the run.
pub fn prescan(ss: &mut ScanState) -> u32 {
    let mut cp = ss.begin;
    while is_lex_space(ss.at(cp)) {
        cp += 1;
    }
    ss.begin = cp;

    let mut flags = 0u32;
    loop {
        let b = ss.at(cp);
        match lex_class(b) {
            LEX_CLASS_DELIMIT => {
                if cp == ss.begin {
                    // Include a lone delimiter in the range (END included,
                    // which the locator compensates for).
                    ss.end = cp + 1;
                } else {
                    ss.end = cp;
                }
                return flags;
            }
            LEX_CLASS_SPECIAL => {
                if cp != ss.begin {
                    flags |= lex_flag(lex_value(b));
                }
                cp += 1;
            }
            LEX_CLASS_WORD => {
                flags |= lex_flag(SPECIAL_WORD);
                while is_lex_word_or_number(ss.at(cp)) {
                    cp += 1;
                }
            }
            _ => {
                while is_lex_number(ss.at(cp)) {
                    cp += 1;
                }
            }
        }
    }
}

fn skip_to_byte(ss: &ScanState, mut cp: usize, limit: usize, target: u8) -> Option<usize> {
    while cp < limit {
        if ss.at(cp) == target {
            return Some(cp);
        }
        cp += 1;
    }
    None
}

/// Find where a `<tag>` ends; `None` if unterminated or malformed.
fn skip_tag(ss: &ScanState, mut cp: usize) -> Option<usize> {
    if ss.at(cp) == b'<' {
        cp += 1;
    }
    loop {
        match ss.at(cp) {
            b'>' => return Some(cp + 1),
            0 => return None,
            b'"' => {
                // Quoted section inside a tag.
                cp += 1;
                loop {
                    match ss.at(cp) {
                        b'"' => break,
                        0 => return None,
                        _ => cp += 1,
                    }
                }
                cp += 1;
            }
            _ => cp += 1,
        }
    }
}

/// Locate the next token. `Ok` carries the kind with `ss.begin..ss.end`
/// spanning it; `Err` carries the kind a malformed range was aiming for.
pub fn locate_token(ss: &mut ScanState) -> Result<Token, Token> {
    let mut flags = prescan(ss);
    let mut cp = ss.begin;

    match lex_class(ss.at(cp)) {
        LEX_CLASS_DELIMIT => locate_delimit(ss, cp),
        LEX_CLASS_SPECIAL => locate_special(ss, cp, &mut flags),
        LEX_CLASS_WORD => {
            if flags == lex_flag(SPECIAL_WORD) {
                return Ok(Token::Word);
            }
            scan_word_tail(ss, Token::Word, flags, cp)
        }
        _ => locate_number(ss, cp, flags),
    }
}

fn locate_delimit(ss: &mut ScanState, mut cp: usize) -> Result<Token, Token> {
    match lex_value(ss.at(cp)) {
        DELIMIT_SEMICOLON => {
            // Comment runs to end of line.
            while !any_cr_lf_end(ss.at(cp)) {
                cp += 1;
            }
            if ss.at(cp) == 0 {
                ss.end = cp;
                return Ok(Token::End);
            }
            if ss.at(cp) == b'\r' && ss.at(cp + 1) == b'\n' {
                cp += 1;
            }
            newline(ss, cp)
        }
        DELIMIT_RETURN => {
            if ss.at(cp + 1) == b'\n' {
                cp += 1;
            }
            newline(ss, cp)
        }
        DELIMIT_LINEFEED => newline(ss, cp),

        DELIMIT_LEFT_BRACKET => Ok(Token::BlockBegin),
        DELIMIT_RIGHT_BRACKET => Ok(Token::BlockEnd),
        DELIMIT_LEFT_PAREN => Ok(Token::GroupBegin),
        DELIMIT_RIGHT_PAREN => Ok(Token::GroupEnd),

        DELIMIT_DOUBLE_QUOTE | DELIMIT_LEFT_BRACE => {
            match scan_quote_push_mold(ss.src, cp) {
                Some((next, lines)) => {
                    ss.line_count += lines;
                    ss.end = next;
                    Ok(Token::String)
                }
                None => {
                    // Recover at the next line break.
                    cp = ss.begin + 1;
                    while !any_cr_lf_end(ss.at(cp)) {
                        cp += 1;
                    }
                    ss.end = cp;
                    Err(Token::String)
                }
            }
        }
        DELIMIT_RIGHT_BRACE => Err(Token::String),

        DELIMIT_SLASH => {
            while ss.at(cp) == b'/' {
                cp += 1;
            }
            let b = ss.at(cp);
            if is_lex_word_or_number(b)
                || b == b'+'
                || b == b'-'
                || b == b'.'
                || b == b'|'
                || b == b'_'
            {
                // `///refine` is not allowed.
                if ss.begin + 1 != cp {
                    ss.end = cp;
                    return Err(Token::Refine);
                }
                ss.begin = cp;
                let flags = prescan(ss);
                ss.begin -= 1; // keep the slash in the range
                if flags == lex_flag(SPECIAL_WORD) {
                    return Ok(Token::Refine);
                }
                return scan_word_tail(ss, Token::Refine, flags, ss.begin + 1);
            }
            if b == b'<' || b == b'>' {
                ss.end = cp + 1;
                return Err(Token::Refine);
            }
            // A run of slashes alone is the division word.
            ss.end = cp;
            Ok(Token::Word)
        }

        DELIMIT_END => {
            // Prescan spanned the terminator; collapse to empty.
            ss.end -= 1;
            debug_assert_eq!(ss.end, ss.begin);
            Ok(Token::End)
        }

        _ => Err(Token::Word), // UTF-8 error byte
    }
}

fn newline(ss: &mut ScanState, cp: usize) -> Result<Token, Token> {
    ss.line_count += 1;
    ss.end = cp + 1;
    Ok(Token::Newline)
}

fn locate_special(ss: &mut ScanState, mut cp: usize, flags: &mut u32) -> Result<Token, Token> {
    // An at-sign anywhere (except leading a tag) means email.
    if *flags & lex_flag(SPECIAL_AT) != 0 && ss.at(cp) != b'<' {
        return Ok(Token::Email);
    }

    // A sign can defer classification to the special that follows it
    // (+$ money, +. decimal), hence the loop.
    loop {
        match lex_value(ss.at(cp)) {
            SPECIAL_AT => return Err(Token::Email),

            SPECIAL_PERCENT => {
                // %filename or %"quoted name"
                cp = ss.end;
                if ss.at(cp) == b'"' {
                    match scan_quote_push_mold(ss.src, cp) {
                        Some((next, lines)) => {
                            ss.line_count += lines;
                            ss.end = next;
                            return Ok(Token::File);
                        }
                        None => return Err(Token::File),
                    }
                }
                while ss.at(cp) == b'/' {
                    cp += 1;
                    while is_lex_not_delimit(ss.at(cp)) {
                        cp += 1;
                    }
                }
                ss.end = cp;
                return Ok(Token::File);
            }

            SPECIAL_COLON => {
                if is_lex_number(ss.at(cp + 1)) {
                    return Ok(Token::Time);
                }
                if *flags == lex_flag(SPECIAL_WORD) {
                    return Ok(Token::Get);
                }
                if ss.at(cp + 1) == b'\'' {
                    return Err(Token::Word);
                }
                if ss.at(cp + 1) == b'<' || ss.at(cp + 1) == b'>' {
                    // :< :<= :<> :>> and friends
                    cp += 1;
                    if matches!(ss.at(cp + 1), b'<' | b'>' | b'=') {
                        cp += 1;
                    }
                    if !is_lex_delimit(ss.at(cp + 1)) {
                        return Err(Token::Get);
                    }
                    ss.end = cp + 1;
                    return Ok(Token::Get);
                }
                return scan_word_tail(ss, Token::Get, *flags, cp + 1);
            }

            SPECIAL_APOSTROPHE => {
                if is_lex_number(ss.at(cp + 1)) {
                    return Err(Token::Lit); // no '2nd
                }
                if ss.at(cp + 1) == b':' {
                    return Err(Token::Lit); // no ':X
                }
                if ss.at(cp + 1) == b'|'
                    && (is_lex_delimit(ss.at(cp + 2)) || is_lex_any_space(ss.at(cp + 2)))
                {
                    return Ok(Token::LitBar);
                }
                if *flags == lex_flag(SPECIAL_WORD) {
                    return Ok(Token::Lit);
                }
                if !is_lex_word(ss.at(cp + 1)) {
                    if (ss.at(cp + 1) == b'-' || ss.at(cp + 1) == b'+')
                        && is_lex_number(ss.at(cp + 2))
                    {
                        return Err(Token::Word);
                    }
                    if ss.at(cp + 1) == b'<' || ss.at(cp + 1) == b'>' {
                        cp += 1;
                        if matches!(ss.at(cp + 1), b'<' | b'>' | b'=') {
                            cp += 1;
                        }
                        if !is_lex_delimit(ss.at(cp + 1)) {
                            return Err(Token::Lit);
                        }
                        ss.end = cp + 1;
                        return Ok(Token::Lit);
                    }
                }
                if ss.at(cp + 1) == b'\'' {
                    return Err(Token::Word);
                }
                return scan_word_tail(ss, Token::Lit, *flags, cp);
            }

            SPECIAL_COMMA | SPECIAL_PERIOD => {
                *flags |= lex_flag(lex_value(ss.at(cp)));
                if is_lex_number(ss.at(cp + 1)) {
                    return locate_number(ss, cp, *flags);
                }
                if lex_value(ss.at(cp)) != SPECIAL_PERIOD {
                    return Err(Token::Word);
                }
                return scan_word_tail(ss, Token::Word, *flags, cp);
            }

            SPECIAL_GREATER => {
                if is_lex_delimit(ss.at(cp + 1)) {
                    return Ok(Token::Word);
                }
                if ss.at(cp + 1) == b'>' {
                    if is_lex_delimit(ss.at(cp + 2)) {
                        return Ok(Token::Word);
                    }
                    return Err(Token::Word);
                }
                return Err(Token::Word);
            }

            SPECIAL_LESSER => {
                if is_lex_any_space(ss.at(cp + 1)) || ss.at(cp + 1) == b']' || ss.at(cp + 1) == 0
                {
                    return Ok(Token::Word); // `<` bare (changed for </tag>)
                }
                if (ss.at(cp) == b'<' && ss.at(cp + 1) == b'<')
                    || ss.at(cp + 1) == b'='
                    || ss.at(cp + 1) == b'>'
                {
                    if is_lex_delimit(ss.at(cp + 2)) {
                        return Ok(Token::Word);
                    }
                    return Err(Token::Word);
                }
                if ss.at(cp) == b'<'
                    && (ss.at(cp + 1) == b'-' || ss.at(cp + 1) == b'|')
                    && (is_lex_delimit(ss.at(cp + 2)) || is_lex_any_space(ss.at(cp + 2)))
                {
                    return Ok(Token::Word); // "<|" and "<-"
                }
                match skip_tag(ss, cp) {
                    Some(next) => {
                        ss.end = next;
                        return Ok(Token::Tag);
                    }
                    None => return Err(Token::Tag),
                }
            }

            SPECIAL_PLUS | SPECIAL_MINUS => {
                if *flags & lex_flag(SPECIAL_AT) != 0 {
                    return Ok(Token::Email);
                }
                if *flags & lex_flag(SPECIAL_DOLLAR) != 0 {
                    return Ok(Token::Money);
                }
                if *flags & lex_flag(SPECIAL_COLON) != 0 {
                    if let Some(colon) = skip_to_byte(ss, cp, ss.end, b':') {
                        if colon + 1 != ss.end {
                            return Ok(Token::Time); // +12:34
                        }
                    }
                    cp = ss.begin;
                    if ss.at(cp + 1) == b':' {
                        // +: and -: are words
                        return scan_word_tail(ss, Token::Word, *flags, cp);
                    }
                }
                cp += 1;
                if is_lex_number(ss.at(cp)) {
                    return locate_number(ss, cp, *flags);
                }
                if is_lex_special(ss.at(cp)) {
                    if lex_value(ss.at(cp)) >= SPECIAL_PERIOD {
                        continue; // defer to that special (`next_ls`)
                    }
                    if ss.at(cp) == b'+' || ss.at(cp) == b'-' {
                        return scan_word_tail(ss, Token::Word, *flags, cp);
                    }
                    if ss.at(cp) == b'>'
                        && (is_lex_delimit(ss.at(cp + 1)) || is_lex_any_space(ss.at(cp + 1)))
                    {
                        return Ok(Token::Word); // ->
                    }
                    return Err(Token::Word);
                }
                return scan_word_tail(ss, Token::Word, *flags, cp);
            }

            SPECIAL_BAR => {
                if is_lex_delimit(ss.at(cp + 1)) || is_lex_any_space(ss.at(cp + 1)) {
                    return Ok(Token::Bar);
                }
                if ss.at(cp + 1) == b'>'
                    && (is_lex_delimit(ss.at(cp + 2)) || is_lex_any_space(ss.at(cp + 2)))
                {
                    return Ok(Token::Word); // |>
                }
                return scan_word_tail(ss, Token::Word, *flags, cp);
            }

            SPECIAL_BLANK => {
                if is_lex_delimit(ss.at(cp + 1)) || is_lex_any_space(ss.at(cp + 1)) {
                    return Ok(Token::Blank);
                }
                return scan_word_tail(ss, Token::Word, *flags, cp);
            }

            SPECIAL_POUND => return locate_pound(ss, cp),

            SPECIAL_DOLLAR => {
                if *flags & lex_flag(SPECIAL_AT) != 0 {
                    return Ok(Token::Email);
                }
                return Ok(Token::Money);
            }

            _ => return Err(Token::Word), // backslash and friends
        }
    }
}

/// `#` forms: `#[construct]`, `#"c"`, `#{binary}`, `#issue`.
fn locate_pound(ss: &mut ScanState, mut cp: usize) -> Result<Token, Token> {
    let pound_at = cp;
    cp += 1;
    if ss.at(cp) == b'[' {
        ss.end = cp + 1;
        return Ok(Token::Construct);
    }
    if ss.at(cp) == b'"' {
        // CHAR #"C"
        cp += 1;
        if let Some((_, next)) = scan_char_escapable(ss.src, cp) {
            if ss.at(next) == b'"' {
                ss.end = next + 1;
                return Ok(Token::Char);
            }
        }
        // Recover at the next line break.
        cp = ss.begin + 1;
        while !any_cr_lf_end(ss.at(cp)) {
            cp += 1;
        }
        ss.end = cp;
        return Err(Token::Char);
    }
    if ss.at(cp) == b'{' {
        // BINARY: find the closing brace; the raw range is rescanned by
        // the base decoder, so the mold content is dropped.
        let mark = mold::mark();
        match scan_quote_push_mold(ss.src, cp) {
            Some((next, lines)) => {
                mold::drop_to(mark);
                ss.line_count += lines;
                ss.end = next;
                return Ok(Token::Binary);
            }
            None => {
                mold::drop_to(mark);
                cp = ss.begin + 1;
                while !any_cr_lf_end(ss.at(cp)) {
                    cp += 1;
                }
                ss.end = cp;
                return Err(Token::Binary);
            }
        }
    }
    if pound_at == ss.begin {
        Ok(Token::Issue)
    } else {
        Err(Token::Integer)
    }
}

fn locate_number(ss: &mut ScanState, cp: usize, flags: u32) -> Result<Token, Token> {
    if flags == 0 {
        return Ok(Token::Integer); // simple integer
    }
    if flags & lex_flag(SPECIAL_AT) != 0 {
        return Ok(Token::Email);
    }
    if flags & lex_flag(SPECIAL_POUND) != 0 {
        if cp == ss.begin {
            // Base-prefixed binaries: 64#{ 16#{ 2#{ (no +2 +16 allowed)
            if (ss.at(cp) == b'6' && ss.at(cp + 1) == b'4' && ss.at(cp + 2) == b'#'
                && ss.at(cp + 3) == b'{')
                || (ss.at(cp) == b'1'
                    && ss.at(cp + 1) == b'6'
                    && ss.at(cp + 2) == b'#'
                    && ss.at(cp + 3) == b'{')
            {
                return locate_pound(ss, cp + 2);
            }
            if ss.at(cp) == b'2' && ss.at(cp + 1) == b'#' && ss.at(cp + 2) == b'{' {
                return locate_pound(ss, cp + 1);
            }
        }
        return Err(Token::Integer);
    }
    if flags & lex_flag(SPECIAL_COLON) != 0 {
        return Ok(Token::Time); // 12:34
    }
    if flags & lex_flag(SPECIAL_PERIOD) != 0 {
        // 1.2 1.2.3 1,200.3 1.E-2 320x200
        if skip_to_byte(ss, cp, ss.end, b'x').is_some() {
            return Ok(Token::Pair);
        }
        if let Some(dot) = skip_to_byte(ss, cp, ss.end, b'.') {
            if flags & lex_flag(SPECIAL_COMMA) == 0
                && skip_to_byte(ss, dot + 1, ss.end, b'.').is_some()
            {
                return Ok(Token::Tuple);
            }
        }
        return Ok(Token::Decimal);
    }
    if flags & lex_flag(SPECIAL_COMMA) != 0 {
        if skip_to_byte(ss, cp, ss.end, b'x').is_some() {
            return Ok(Token::Pair);
        }
        return Ok(Token::Decimal); // 1,23
    }

    // Dates of the form 1/2/1998 can't be detected here; they may be in a
    // path. The array scanner extends integers followed by slashes.
    let mut at = cp;
    while at != ss.end {
        match ss.at(at) {
            b'-' => return Ok(Token::Date), // 1-2-97 1-jan-97
            b'x' | b'X' => return Ok(Token::Pair),
            b'E' | b'e' => {
                if skip_to_byte(ss, at, ss.end, b'x').is_some() {
                    return Ok(Token::Pair);
                }
                return Ok(Token::Decimal); // 123E4
            }
            b'%' => return Ok(Token::Percent),
            _ => at += 1,
        }
    }
    if flags & lex_flag(SPECIAL_APOSTROPHE) != 0 {
        return Ok(Token::Integer); // 1'200
    }
    Err(Token::Integer)
}

/// Shared tail for word-shaped tokens: set-words, URLs, emails, money,
/// and embedded-tag truncation.
fn scan_word_tail(
    ss: &mut ScanState,
    token: Token,
    flags: u32,
    cp: usize,
) -> Result<Token, Token> {
    if flags & lex_flag(SPECIAL_COLON) != 0 {
        if token != Token::Word {
            // The colon is only meaningful on plain words.
            return Ok(token);
        }
        let colon = skip_to_byte(ss, cp, ss.end, b':').expect("colon flag without colon");
        if ss.at(colon + 1) != b'/' && is_lex_delimit(ss.at(colon + 1)) {
            // A delimited word followed by colon: SET-WORD!
            if flags & !lex_flag(SPECIAL_COLON) & LEX_WORD_FLAGS != 0 {
                return Err(Token::Word);
            }
            return Ok(Token::Set);
        }
        // Otherwise it is a URL scheme.
        let mut at = ss.end;
        while ss.at(at) == b'/' {
            at += 1;
            while is_lex_not_delimit(ss.at(at)) || ss.at(at) == b'/' {
                at += 1;
            }
        }
        ss.end = at;
        return Ok(Token::Url);
    }
    if flags & lex_flag(SPECIAL_AT) != 0 {
        return Ok(Token::Email);
    }
    if flags & lex_flag(SPECIAL_DOLLAR) != 0 {
        return Ok(Token::Money);
    }
    if flags & LEX_WORD_FLAGS != 0 {
        return Err(token); // has chars not allowed in a word
    }
    if flags & lex_flag(SPECIAL_LESSER) != 0 {
        // Allow word<tag> and word</tag> but not word< word<= word<>
        let lesser = skip_to_byte(ss, cp, ss.end, b'<').expect("lesser flag without <");
        let after = ss.at(lesser + 1);
        if after == b'<'
            || after == b'>'
            || after == b'='
            || is_lex_space(after)
            || (after != b'/' && is_lex_delimit(after))
        {
            return Err(token);
        }
        ss.end = lesser;
    } else if flags & lex_flag(SPECIAL_GREATER) != 0 {
        return Err(token);
    }
    Ok(token)
}
