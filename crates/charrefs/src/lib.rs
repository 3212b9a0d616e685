//! Entity and character-reference codec for XML and lenient HTML text.
//!
//! Three operations: escaping character data, escaping attribute values, and
//! decoding references back to text. The decoder recognizes the named XML
//! entities plus decimal (`&#NNN;`) and hexadecimal (`&#xHH;`) character
//! references; unknown named references pass through untouched so that
//! document text survives a decode/encode cycle.

use std::borrow::Cow;

use lazy_static::lazy_static;
use memchr::{memchr, memchr3};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscapeError {
    /// A numeric character reference that cannot name a code point.
    #[error("invalid character reference {0:?}")]
    InvalidCharref(String),
}

lazy_static! {
    static ref NAMED_ENTITIES: FxHashMap<&'static str, char> = {
        let mut table = FxHashMap::default();
        table.insert("amp", '&');
        table.insert("lt", '<');
        table.insert("gt", '>');
        table.insert("quot", '"');
        table.insert("apos", '\'');
        table
    };
}

const fn is_attrib_special(byte: u8) -> bool {
    matches!(
        byte,
        b'&' | b'<' | b'>' | b'"' | b'\'' | b'\r' | b'\n' | b'\t'
    )
}

/// Escape special characters for text blocks.
pub fn escape_cdata(text: &str) -> Cow<'_, str> {
    let first = match memchr3(b'&', b'<', b'>', text.as_bytes()) {
        Some(at) => at,
        None => return Cow::Borrowed(text),
    };
    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(&text[..first]);
    for ch in text[first..].chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Escape special characters for quoted attribute values.
pub fn escape_attrib(text: &str) -> Cow<'_, str> {
    let first = match text.bytes().position(is_attrib_special) {
        Some(at) => at,
        None => return Cow::Borrowed(text),
    };
    let mut out = String::with_capacity(text.len() + 8);
    out.push_str(&text[..first]);
    for ch in text[first..].chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\r' => out.push_str("&#13;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#09;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Decode entity and character references in `text`.
///
/// A reference is `&` followed by a word run (optionally led by `#`) and a
/// terminating `;`. Anything else containing `&` is left as plain text.
pub fn unescape(text: &str) -> Result<Cow<'_, str>, EscapeError> {
    let bytes = text.as_bytes();
    let first = match memchr(b'&', bytes) {
        Some(at) => at,
        None => return Ok(Cow::Borrowed(text)),
    };
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first]);
    let mut at = first;
    while at < bytes.len() {
        if bytes[at] != b'&' {
            match memchr(b'&', &bytes[at..]) {
                Some(delta) => {
                    out.push_str(&text[at..at + delta]);
                    at += delta;
                }
                None => {
                    out.push_str(&text[at..]);
                    break;
                }
            }
            continue;
        }
        match read_reference(&text[at..])? {
            Some((decoded, token_len)) => {
                out.push(decoded);
                at += token_len;
            }
            None => {
                // Not a reference (or an unknown name); emit verbatim up to
                // and including the `&` and keep scanning after it.
                out.push('&');
                at += 1;
            }
        }
    }
    Ok(Cow::Owned(out))
}

/// Parse one reference at the head of `text` (which starts with `&`).
///
/// Returns the decoded character and the byte length of the whole token, or
/// `None` when the head is not a well-formed reference at all.
fn read_reference(text: &str) -> Result<Option<(char, usize)>, EscapeError> {
    let bytes = text.as_bytes();
    let numeric = bytes.get(1) == Some(&b'#');
    let start = if numeric { 2 } else { 1 };
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end == start || bytes.get(end) != Some(&b';') {
        return Ok(None);
    }
    let body = &text[start..end];
    let token_len = end + 1;
    if !numeric {
        return Ok(NAMED_ENTITIES.get(body).map(|&ch| (ch, token_len)));
    }
    let code = match body.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => body.parse::<u32>(),
    };
    match code.ok().and_then(char::from_u32) {
        Some(ch) => Ok(Some((ch, token_len))),
        None => Err(EscapeError::InvalidCharref(text[..token_len].to_owned())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_escape_cdata() {
        assert_eq!(escape_cdata("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_cdata("no specials"), "no specials");
        assert!(matches!(escape_cdata("plain"), Cow::Borrowed(_)));
        // Quotes and whitespace stay literal in character data.
        assert_eq!(escape_cdata("\"quoted\"\n"), "\"quoted\"\n");
    }

    #[test]
    fn test_escape_attrib() {
        assert_eq!(escape_attrib("a\"b"), "a&quot;b");
        assert_eq!(escape_attrib("line\r\n\ttab"), "line&#13;&#10;&#09;tab");
        assert_eq!(escape_attrib("it's"), "it&#39;s");
        assert_eq!(escape_attrib("x < y"), "x &lt; y");
        assert!(matches!(escape_attrib("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unescape_named() {
        assert_eq!(unescape("&amp;&lt;&gt;&quot;&apos;").unwrap(), "&<>\"'");
        // Unknown named references survive untouched.
        assert_eq!(unescape("&nbsp;&bogus;").unwrap(), "&nbsp;&bogus;");
        assert!(matches!(unescape("no refs").unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unescape_numeric() {
        // "&#65;" -> "A"
        assert_eq!(unescape("&#65;").unwrap(), "A");
        // "&#x41;" and "&#X41;" -> "A"
        assert_eq!(unescape("&#x41;").unwrap(), "A");
        assert_eq!(unescape("&#X41;").unwrap(), "A");
        // "&#13;&#10;&#09;" -> CR LF TAB
        assert_eq!(unescape("&#13;&#10;&#09;").unwrap(), "\r\n\t");
        // "&#x2603;" -> SNOWMAN, a multi-byte code point
        assert_eq!(unescape("&#x2603;").unwrap(), "\u{2603}");
    }

    #[test]
    fn test_unescape_plain_ampersand() {
        // A bare "&" or an unterminated run is not a reference.
        assert_eq!(unescape("tom & jerry").unwrap(), "tom & jerry");
        assert_eq!(unescape("&#38").unwrap(), "&#38");
        assert_eq!(unescape("a && b;").unwrap(), "a && b;");
        assert_eq!(unescape("&;").unwrap(), "&;");
    }

    #[test]
    fn test_unescape_invalid_charref() {
        assert_eq!(
            unescape("&#12a;").unwrap_err(),
            EscapeError::InvalidCharref("&#12a;".into())
        );
        // 0x110000 is beyond the last code point.
        assert!(unescape("&#x110000;").is_err());
        // Surrogate range is not encodable.
        assert!(unescape("&#xD800;").is_err());
    }

    #[test]
    fn test_unescape_mixed() {
        assert_eq!(unescape("&amp;&#65; and more").unwrap(), "&A and more");
        assert_eq!(
            unescape("x &lt;tag&gt; &#x26;amp;").unwrap(),
            "x <tag> &amp;"
        );
    }

    #[quickcheck]
    fn attrib_escape_round_trips(text: String) -> bool {
        unescape(&escape_attrib(&text))
            .map(|decoded| decoded == text)
            .unwrap_or(false)
    }

    #[quickcheck]
    fn cdata_escape_round_trips(text: String) -> bool {
        unescape(&escape_cdata(&text))
            .map(|decoded| decoded == text)
            .unwrap_or(false)
    }
}
