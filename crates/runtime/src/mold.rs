//! Molding - rendering cells back to source text
//!
//! Molding is the inverse of scanning for every literal kind: the round
//! trip `scan(mold(x)) == x` holds for scalars, strings, binaries, words,
//! and arrays. Reference kinds without a literal form (contexts,
//! functions) render as construct-style placeholders.

use crate::context::context_len;
use reval_core::cell::{CELL_FLAG_LINE, Cell, Kind, NO_DATE_TIME};
use reval_core::series::Series;
use reval_core::symbol::spelling_bytes;

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Mold one value to text.
pub fn mold_cell(cell: &Cell) -> String {
    let mut out = String::new();
    mold_into(&mut out, cell);
    out
}

/// Mold with a size cap, for "near" renderings.
pub fn mold_cell_limited(cell: &Cell, limit: usize) -> String {
    let mut text = mold_cell(cell);
    if text.len() > limit {
        text.truncate(limit);
        text.push_str("...");
    }
    text
}

/// FORM is the user-facing variant: strings render without their quote
/// marks, everything else molds.
pub fn form_cell(cell: &Cell) -> String {
    match cell.kind() {
        Some(Kind::String) => {
            String::from_utf8_lossy(unsafe { (*cell.series()).data_slice() }).into_owned()
        }
        Some(Kind::Char) => cell.character().to_string(),
        _ => mold_cell(cell),
    }
}

fn push_word(out: &mut String, cell: &Cell) {
    out.push_str(&String::from_utf8_lossy(spelling_bytes(cell.word_spelling())));
}

fn mold_decimal(out: &mut String, value: f64) {
    if value == value.trunc() && value.abs() < 1e15 {
        out.push_str(&format!("{value:.1}"));
    } else {
        out.push_str(&format!("{value}"));
    }
}

fn mold_string_escaped(out: &mut String, bytes: &[u8]) {
    out.push('"');
    for chunk in String::from_utf8_lossy(bytes).chars() {
        match chunk {
            '\n' => out.push_str("^/"),
            '\t' => out.push_str("^-"),
            '^' => out.push_str("^^"),
            '"' => out.push_str("^\""),
            c if (c as u32) < 0x20 => {
                out.push('^');
                out.push((b'@' + c as u8) as char);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn mold_array_contents(out: &mut String, array: *mut Series, index: usize) {
    let len = unsafe { (*array).len() };
    let mut first = true;
    for i in index..len {
        let item = unsafe { &*(*array).array_at(i) };
        if !first {
            out.push(' ');
        }
        first = false;
        mold_into(out, item);
    }
}

fn mold_path(out: &mut String, cell: &Cell) {
    let array = cell.series();
    let len = unsafe { (*array).len() };
    match cell.kind_checked() {
        Kind::GetPath => out.push(':'),
        Kind::LitPath => out.push('\''),
        _ => {}
    }
    let mut first = true;
    for i in cell.index()..len {
        if !first {
            out.push('/');
        }
        first = false;
        mold_into(out, unsafe { &*(*array).array_at(i) });
    }
    if cell.kind_checked() == Kind::SetPath {
        out.push(':');
    }
}

pub fn mold_into(out: &mut String, cell: &Cell) {
    if cell.is_end() {
        return; // void: nothing to render
    }
    match cell.kind_checked() {
        Kind::Blank => out.push('_'),
        Kind::Bar => out.push('|'),
        Kind::LitBar => out.push_str("'|"),
        Kind::Logic => out.push_str(if cell.logic() { "#[true]" } else { "#[false]" }),
        Kind::Integer => out.push_str(&cell.int64().to_string()),
        Kind::Decimal => mold_decimal(out, cell.decimal()),
        Kind::Percent => {
            mold_decimal(out, cell.decimal() * 100.0);
            out.push('%');
        }
        Kind::Money => {
            let value = cell.decimal();
            if value < 0.0 {
                out.push('-');
            }
            out.push('$');
            out.push_str(&format!("{:.2}", value.abs()));
        }
        Kind::Char => {
            out.push_str("#\"");
            match cell.character() {
                '\n' => out.push_str("^/"),
                '\t' => out.push_str("^-"),
                '^' => out.push_str("^^"),
                '"' => out.push_str("^\""),
                c if (c as u32) < 0x20 => {
                    out.push('^');
                    out.push((b'@' + c as u8) as char);
                }
                c => out.push(c),
            }
            out.push('"');
        }
        Kind::Pair => {
            mold_decimal(out, cell.pair_x());
            out.push('x');
            mold_decimal(out, cell.pair_y());
        }
        Kind::Tuple => {
            let bytes = cell.tuple_bytes();
            let parts: Vec<String> = bytes[..cell.tuple_len()]
                .iter()
                .map(|b| b.to_string())
                .collect();
            out.push_str(&parts.join("."));
        }
        Kind::Time => {
            let mut nanos = cell.time_nanos();
            if nanos < 0 {
                out.push('-');
                nanos = -nanos;
            }
            let secs = nanos / 1_000_000_000;
            let frac = nanos % 1_000_000_000;
            out.push_str(&format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60));
            if frac != 0 {
                let text = format!("{frac:09}");
                out.push('.');
                out.push_str(text.trim_end_matches('0'));
            }
        }
        Kind::Date => {
            out.push_str(&format!(
                "{}-{}-{}",
                cell.date_day(),
                MONTH_NAMES[(cell.date_month().clamp(1, 12) - 1) as usize],
                cell.date_year()
            ));
            let nanos = cell.date_nanos();
            if nanos != NO_DATE_TIME {
                let secs = nanos / 1_000_000_000;
                out.push_str(&format!(
                    "/{}:{:02}:{:02}",
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60
                ));
                let zone = cell.date_zone();
                if zone != 0 {
                    let minutes = zone as i32 * 15;
                    out.push(if minutes < 0 { '-' } else { '+' });
                    out.push_str(&format!("{}:{:02}", minutes.abs() / 60, minutes.abs() % 60));
                }
            }
        }
        Kind::Word => push_word(out, cell),
        Kind::SetWord => {
            push_word(out, cell);
            out.push(':');
        }
        Kind::GetWord => {
            out.push(':');
            push_word(out, cell);
        }
        Kind::LitWord => {
            out.push('\'');
            push_word(out, cell);
        }
        Kind::Refinement => {
            out.push('/');
            push_word(out, cell);
        }
        Kind::Issue => {
            out.push('#');
            push_word(out, cell);
        }
        Kind::Block => {
            out.push('[');
            mold_array_contents(out, cell.series(), cell.index());
            out.push(']');
        }
        Kind::Group => {
            out.push('(');
            mold_array_contents(out, cell.series(), cell.index());
            out.push(')');
        }
        Kind::Path | Kind::SetPath | Kind::GetPath | Kind::LitPath => mold_path(out, cell),
        Kind::String => {
            mold_string_escaped(out, unsafe { (*cell.series()).data_slice() });
        }
        Kind::File => {
            out.push('%');
            out.push_str(&String::from_utf8_lossy(unsafe {
                (*cell.series()).data_slice()
            }));
        }
        Kind::Email | Kind::Url => {
            out.push_str(&String::from_utf8_lossy(unsafe {
                (*cell.series()).data_slice()
            }));
        }
        Kind::Tag => {
            out.push('<');
            out.push_str(&String::from_utf8_lossy(unsafe {
                (*cell.series()).data_slice()
            }));
            out.push('>');
        }
        Kind::Binary => {
            out.push_str("#{");
            out.push_str(&hex::encode_upper(unsafe { (*cell.series()).data_slice() }));
            out.push('}');
        }
        Kind::Datatype => {
            out.push_str(cell.datatype_kind().name());
        }
        Kind::Typeset => out.push_str("#[typeset!]"),
        Kind::Function => out.push_str("#[function!]"),
        Kind::Varargs => out.push_str("#[varargs!]"),
        Kind::Handle => out.push_str("#[handle!]"),
        Kind::Library => out.push_str("#[library!]"),
        Kind::Event => out.push_str("#[event!]"),
        Kind::Object | Kind::Module | Kind::Frame => {
            out.push_str("make ");
            out.push_str(cell.kind_checked().name());
            out.push_str(&format!(
                " [{} keys]",
                context_len(cell.context_varlist())
            ));
        }
        Kind::Error => {
            let ctx = cell.context_varlist();
            out.push_str("make error! [");
            out.push_str(&crate::error::error_message(ctx));
            out.push(']');
        }
    }
}

/// Mold a whole array's contents (no outer brackets), honoring LINE flags
/// with newlines. Used by `transcode` diagnostics and tests.
pub fn mold_array(array: *mut Series) -> String {
    let mut out = String::new();
    let len = unsafe { (*array).len() };
    for i in 0..len {
        let item = unsafe { &*(*array).array_at(i) };
        if i > 0 {
            if item.get_flag(CELL_FLAG_LINE) {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        mold_into(&mut out, item);
    }
    out
}
