//! Repair of mis-decoded punctuation in executor output text.
//!
//! Agents that round-trip UTF-8 through a legacy code page emit sequences like
//! `â€”` for an em dash. Left alone, these end up inside JSON string values and
//! later in generated artifacts.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

struct Replacement {
    pattern: Regex,
    with: &'static str,
}

static REPLACEMENTS: LazyLock<Vec<Replacement>> = LazyLock::new(|| {
    [
        // en/em dash through cp437 and cp1252
        ("ÔÇô|ÔÇö|â€“|â€”", "-"),
        // ellipsis
        ("ÔÇª|â€¦", "..."),
        // dash that swallowed a neighbouring quote; longest form first
        ("ا\"اخaُ|ا\"اخa|ا\"اخ", "-"),
    ]
    .into_iter()
    .map(|(pattern, with)| Replacement {
        pattern: Regex::new(pattern).expect("repair pattern should be valid"),
        with,
    })
    .collect()
});

/// Replace known mojibake sequences with ASCII punctuation.
///
/// Returns the input unchanged (borrowed) when nothing matched.
pub fn repair_text(text: &str) -> Cow<'_, str> {
    let mut current = Cow::Borrowed(text);
    for rule in REPLACEMENTS.iter() {
        let replaced = match rule.pattern.replace_all(&current, rule.with) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            current = Cow::Owned(replaced);
        }
    }
    current
}

/// Decode raw executor output bytes to text.
///
/// UTF-16 with a byte order mark is decoded as such; a UTF-8 BOM is stripped;
/// anything else is read as UTF-8 with invalid sequences replaced.
pub fn decode_output(raw: &[u8]) -> String {
    match raw {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let pairs = bytes.chunks_exact(2);
    let truncated = !pairs.remainder().is_empty();
    let units = pairs.map(|pair| unit([pair[0], pair[1]]));
    let mut text: String = char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    // odd trailing byte
    if truncated {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}
