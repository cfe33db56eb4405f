//! Codec registry
//!
//! The core does not decode images or transcode text encodings itself;
//! it keeps the table that maps codec names and file extensions to the
//! external codecs that do. Initialization registers the standard set so
//! embedders and the (external) LOAD machinery can resolve them.

use crate::interp::{CodecEntry, CodecKind, rt};

pub fn register_codec(name: &'static str, extensions: &'static [&'static str], kind: CodecKind) {
    rt().codecs.push(CodecEntry {
        name,
        extensions,
        kind,
    });
}

/// Resolve a codec by its registered name.
pub fn find_codec(name: &str) -> Option<&'static CodecEntry> {
    rt().codecs.iter().find(|c| c.name == name).map(|c| {
        // Entries live as long as the interpreter; the registry only grows.
        unsafe { &*(c as *const CodecEntry) }
    })
}

/// Resolve a codec by file extension (leading dot ignored, case folded).
pub fn find_codec_for_extension(ext: &str) -> Option<&'static CodecEntry> {
    let wanted = ext.trim_start_matches('.').to_ascii_lowercase();
    rt().codecs
        .iter()
        .find(|c| c.extensions.iter().any(|e| *e == wanted))
        .map(|c| unsafe { &*(c as *const CodecEntry) })
}

/// The standard registrations made at interpreter bring-up.
pub fn init_codecs() {
    register_codec("text", &["txt"], CodecKind::Text);
    register_codec("utf-16le", &[], CodecKind::Utf16Le);
    register_codec("utf-16be", &[], CodecKind::Utf16Be);
    register_codec("bmp", &["bmp"], CodecKind::Image);
    register_codec("gif", &["gif"], CodecKind::Image);
    register_codec("png", &["png"], CodecKind::Image);
    register_codec("jpeg", &["jpg", "jpeg"], CodecKind::Image);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RuntimeGuard;

    #[test]
    fn standard_codecs_resolve() {
        let _rt = RuntimeGuard::new();
        assert!(find_codec("png").is_some());
        assert!(find_codec("webp").is_none());
        let jpeg = find_codec_for_extension(".JPG").unwrap();
        assert_eq!(jpeg.name, "jpeg");
        assert_eq!(jpeg.kind, CodecKind::Image);
    }
}
