//! Lexical classification tables
//!
//! Every source byte maps through a 256-entry table to a packed class
//! byte: two class bits (delimiter / special / word-char / digit) and a
//! five-bit value. Values serve double duty: for specials they are the
//! bit index unioned into the prescan fingerprint, for digits they are
//! the numeral, and for the hex letters they are the digit value 10..15
//! so escape sequences can reuse the table.
//!
//! Tokenization decisions are all driven by ASCII; bytes at and above
//! 0x80 class as word characters (UTF-8 sequence interiors), except the
//! bytes that can never occur in well-formed UTF-8, which class as
//! delimiter errors.

pub const LEX_SHIFT: u8 = 5;
pub const LEX_CLASS_MASK: u8 = 3 << LEX_SHIFT;
pub const LEX_VALUE_MASK: u8 = 0x1F;

pub const LEX_CLASS_DELIMIT: u8 = 0;
pub const LEX_CLASS_SPECIAL: u8 = 1;
pub const LEX_CLASS_WORD: u8 = 2;
pub const LEX_CLASS_NUMBER: u8 = 3;

const D: u8 = LEX_CLASS_DELIMIT << LEX_SHIFT;
const S: u8 = LEX_CLASS_SPECIAL << LEX_SHIFT;
const W: u8 = LEX_CLASS_WORD << LEX_SHIFT;
const N: u8 = LEX_CLASS_NUMBER << LEX_SHIFT;

// Delimiter values
pub const DELIMIT_SPACE: u8 = 0;
pub const DELIMIT_END: u8 = 1;
pub const DELIMIT_LINEFEED: u8 = 2;
pub const DELIMIT_RETURN: u8 = 3;
pub const DELIMIT_LEFT_PAREN: u8 = 4;
pub const DELIMIT_RIGHT_PAREN: u8 = 5;
pub const DELIMIT_LEFT_BRACKET: u8 = 6;
pub const DELIMIT_RIGHT_BRACKET: u8 = 7;
pub const DELIMIT_LEFT_BRACE: u8 = 8;
pub const DELIMIT_RIGHT_BRACE: u8 = 9;
pub const DELIMIT_DOUBLE_QUOTE: u8 = 10;
pub const DELIMIT_SLASH: u8 = 11;
pub const DELIMIT_SEMICOLON: u8 = 12;
pub const DELIMIT_UTF8_ERROR: u8 = 13;

// Special values (fingerprint bit indexes)
pub const SPECIAL_AT: u8 = 0;
pub const SPECIAL_PERCENT: u8 = 1;
pub const SPECIAL_BACKSLASH: u8 = 2;
pub const SPECIAL_COLON: u8 = 3;
pub const SPECIAL_APOSTROPHE: u8 = 4;
pub const SPECIAL_COMMA: u8 = 5;
pub const SPECIAL_PERIOD: u8 = 6;
pub const SPECIAL_GREATER: u8 = 7;
pub const SPECIAL_LESSER: u8 = 8;
pub const SPECIAL_PLUS: u8 = 9;
pub const SPECIAL_MINUS: u8 = 10;
pub const SPECIAL_BAR: u8 = 11;
pub const SPECIAL_BLANK: u8 = 12;
pub const SPECIAL_POUND: u8 = 13;
pub const SPECIAL_DOLLAR: u8 = 14;
/// Pseudo-special: "saw ordinary word characters" fingerprint bit.
pub const SPECIAL_WORD: u8 = 15;

#[inline]
pub const fn lex_flag(value: u8) -> u32 {
    1 << value
}

/// Fingerprint bits that disqualify a token from being a word.
pub const LEX_WORD_FLAGS: u32 = lex_flag(SPECIAL_AT)
    | lex_flag(SPECIAL_PERCENT)
    | lex_flag(SPECIAL_BACKSLASH)
    | lex_flag(SPECIAL_COMMA)
    | lex_flag(SPECIAL_POUND)
    | lex_flag(SPECIAL_DOLLAR);

const SPACE: u8 = D | DELIMIT_SPACE; // also the class of stray control bytes
const UTFE: u8 = D | DELIMIT_UTF8_ERROR;

#[rustfmt::skip]
pub static LEX_MAP: [u8; 256] = [
    /* 00 EOF */ D | DELIMIT_END,
    /* 01-08 */  SPACE, SPACE, SPACE, SPACE, SPACE, SPACE, SPACE, SPACE,
    /* 09 TAB */ SPACE,
    /* 0A LF  */ D | DELIMIT_LINEFEED,
    /* 0B 0C  */ SPACE, SPACE,
    /* 0D CR  */ D | DELIMIT_RETURN,
    /* 0E 0F  */ SPACE, SPACE,
    /* 10-1F */  SPACE, SPACE, SPACE, SPACE, SPACE, SPACE, SPACE, SPACE,
                 SPACE, SPACE, SPACE, SPACE, SPACE, SPACE, SPACE, SPACE,
    /* 20 SP */  SPACE,
    /* 21 !  */  W,
    /* 22 "  */  D | DELIMIT_DOUBLE_QUOTE,
    /* 23 #  */  S | SPECIAL_POUND,
    /* 24 $  */  S | SPECIAL_DOLLAR,
    /* 25 %  */  S | SPECIAL_PERCENT,
    /* 26 &  */  W,
    /* 27 '  */  S | SPECIAL_APOSTROPHE,
    /* 28 (  */  D | DELIMIT_LEFT_PAREN,
    /* 29 )  */  D | DELIMIT_RIGHT_PAREN,
    /* 2A *  */  W,
    /* 2B +  */  S | SPECIAL_PLUS,
    /* 2C ,  */  S | SPECIAL_COMMA,
    /* 2D -  */  S | SPECIAL_MINUS,
    /* 2E .  */  S | SPECIAL_PERIOD,
    /* 2F /  */  D | DELIMIT_SLASH,
    /* 30-39 */  N, N | 1, N | 2, N | 3, N | 4, N | 5, N | 6, N | 7, N | 8, N | 9,
    /* 3A :  */  S | SPECIAL_COLON,
    /* 3B ;  */  D | DELIMIT_SEMICOLON,
    /* 3C <  */  S | SPECIAL_LESSER,
    /* 3D =  */  W,
    /* 3E >  */  S | SPECIAL_GREATER,
    /* 3F ?  */  W,
    /* 40 @  */  S | SPECIAL_AT,
    /* 41-46 */  W | 10, W | 11, W | 12, W | 13, W | 14, W | 15, // A-F hex
    /* 47-5A */  W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    /* 5B [  */  D | DELIMIT_LEFT_BRACKET,
    /* 5C \  */  S | SPECIAL_BACKSLASH,
    /* 5D ]  */  D | DELIMIT_RIGHT_BRACKET,
    /* 5E ^  */  W,
    /* 5F _  */  S | SPECIAL_BLANK,
    /* 60 `  */  W,
    /* 61-66 */  W | 10, W | 11, W | 12, W | 13, W | 14, W | 15, // a-f hex
    /* 67-7A */  W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    /* 7B {  */  D | DELIMIT_LEFT_BRACE,
    /* 7C |  */  S | SPECIAL_BAR,
    /* 7D }  */  D | DELIMIT_RIGHT_BRACE,
    /* 7E ~  */  W,
    /* 7F DEL */ SPACE,
    /* 80-BF: UTF-8 continuations */
    W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    /* C0 C1: never valid in UTF-8 */
    UTFE, UTFE, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    W, W, W, W, W, W, W, W, W, W, W, W, W, W, W, W,
    /* F0-FF */
    W, W, W, W, W, UTFE, W, W, W, W, W, W, W, W, W, UTFE,
];

#[inline]
pub fn lex_of(b: u8) -> u8 {
    LEX_MAP[b as usize]
}

#[inline]
pub fn lex_class(b: u8) -> u8 {
    (lex_of(b) & LEX_CLASS_MASK) >> LEX_SHIFT
}

#[inline]
pub fn lex_value(b: u8) -> u8 {
    lex_of(b) & LEX_VALUE_MASK
}

#[inline]
pub fn is_lex_space(b: u8) -> bool {
    lex_of(b) == SPACE
}

#[inline]
pub fn is_lex_delimit(b: u8) -> bool {
    lex_class(b) == LEX_CLASS_DELIMIT
}

#[inline]
pub fn is_lex_not_delimit(b: u8) -> bool {
    lex_class(b) >= LEX_CLASS_SPECIAL
}

#[inline]
pub fn is_lex_special(b: u8) -> bool {
    lex_class(b) == LEX_CLASS_SPECIAL
}

#[inline]
pub fn is_lex_word(b: u8) -> bool {
    lex_class(b) == LEX_CLASS_WORD
}

#[inline]
pub fn is_lex_number(b: u8) -> bool {
    lex_class(b) == LEX_CLASS_NUMBER
}

#[inline]
pub fn is_lex_word_or_number(b: u8) -> bool {
    lex_class(b) >= LEX_CLASS_WORD
}

/// Space, tab, or any line terminator.
#[inline]
pub fn is_lex_any_space(b: u8) -> bool {
    is_lex_space(b) || matches!(b, b'\n' | b'\r')
}

#[inline]
pub fn any_cr_lf_end(b: u8) -> bool {
    matches!(b, 0 | b'\n' | b'\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_match_expectations() {
        assert!(is_lex_space(b' '));
        assert!(is_lex_space(b'\t'));
        assert!(!is_lex_space(b'\n'));
        assert!(is_lex_delimit(b'['));
        assert!(is_lex_special(b'+'));
        assert!(is_lex_word(b'='));
        assert!(is_lex_number(b'7'));
        assert_eq!(lex_value(b'7'), 7);
        assert_eq!(lex_value(b'F'), 15);
        assert_eq!(lex_value(b'a'), 10);
        assert_eq!(lex_value(b'+'), SPECIAL_PLUS);
    }

    #[test]
    fn eof_and_utf8_error_bytes() {
        assert_eq!(lex_value(0), DELIMIT_END);
        assert_eq!(lex_value(0xC0), DELIMIT_UTF8_ERROR);
        assert_eq!(lex_value(0xFF), DELIMIT_UTF8_ERROR);
        assert!(is_lex_word(0x80)); // UTF-8 continuation bytes scan as word
    }
}
