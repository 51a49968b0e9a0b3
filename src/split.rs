// src/split.rs

//! Systemd-compatible word splitting and escaping.
//!
//! Unit file values like `Exec=` and `Environment=` use systemd's
//! shell-like quoting rules: single and double quotes, C-style escape
//! sequences (`\n`, `\xHH`, `\uHHHH`, octal), and separator escaping.
//! This module implements the tokenizer (`extract_first_word`,
//! `split_string`) and its inverse (`escape_words`), plus systemd
//! unit-name path escaping.

use crate::error::{Error, Result};

/// Whitespace separator set used for most word splitting
pub const WHITESPACE: &str = " \t\n\r";

/// Flags controlling [`extract_first_word`] behavior.
///
/// Modeled on systemd's `ExtractFlags`; combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitFlags(u32);

impl SplitFlags {
    pub const NONE: SplitFlags = SplitFlags(0);
    /// Allow unbalanced quotes and eat up trailing backslash
    pub const RELAX: SplitFlags = SplitFlags(1 << 0);
    /// Unescape C-style escapes (`\n`, `\xHH`, `\uHHHH`, `\OOO`, ...)
    pub const CUNESCAPE: SplitFlags = SplitFlags(1 << 1);
    /// Keep unrecognized escape sequences verbatim instead of failing
    pub const UNESCAPE_RELAX: SplitFlags = SplitFlags(1 << 2);
    /// Unescape only escaped separators and backslashes
    pub const UNESCAPE_SEPARATORS: SplitFlags = SplitFlags(1 << 3);
    /// Retain the quote characters in the output
    pub const KEEP_QUOTE: SplitFlags = SplitFlags(1 << 4);
    /// Strip quote characters from the output
    pub const UNQUOTE: SplitFlags = SplitFlags(1 << 5);
    /// Each separator ends a word; repeated separators yield empty words
    pub const DONT_COALESCE_SEPARATORS: SplitFlags = SplitFlags(1 << 6);
    /// Treat backslash as an ordinary character
    pub const RETAIN_ESCAPE: SplitFlags = SplitFlags(1 << 7);

    /// Whether all flags in `other` are set in `self`
    pub fn contains(self, other: SplitFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SplitFlags {
    type Output = SplitFlags;

    fn bitor(self, rhs: SplitFlags) -> SplitFlags {
        SplitFlags(self.0 | rhs.0)
    }
}

/// Unescape one C-style escape sequence.
///
/// `input` starts right after the backslash. Returns the decoded character
/// and the number of characters consumed. NUL-producing escapes are
/// rejected unless `accept_nul`.
pub fn c_unescape_one(input: &str, accept_nul: bool) -> Result<(char, usize)> {
    let mut chars = input.chars();
    let c = chars
        .next()
        .ok_or_else(|| Error::Unescape("incomplete escape at end of string".into()))?;

    let simple = match c {
        'a' => Some('\u{7}'),
        'b' => Some('\u{8}'),
        'f' => Some('\u{c}'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        'v' => Some('\u{b}'),
        '\\' => Some('\\'),
        '"' => Some('"'),
        '\'' => Some('\''),
        's' => Some(' '),
        _ => None,
    };
    if let Some(decoded) = simple {
        return Ok((decoded, 1));
    }

    match c {
        'x' => {
            let value = hex_value(&input[1..], 2)?;
            check_nul(value, accept_nul)?;
            // Eight-bit escapes map to the corresponding code point
            let decoded = char::from_u32(value)
                .ok_or_else(|| Error::Unescape(format!("\\x{:02x} is not a character", value)))?;
            Ok((decoded, 3))
        }
        'u' => {
            let value = hex_value(&input[1..], 4)?;
            check_nul(value, accept_nul)?;
            let decoded = char::from_u32(value)
                .ok_or_else(|| Error::Unescape(format!("\\u{:04x} is not a character", value)))?;
            Ok((decoded, 5))
        }
        'U' => {
            let value = hex_value(&input[1..], 8)?;
            check_nul(value, accept_nul)?;
            let decoded = char::from_u32(value)
                .ok_or_else(|| Error::Unescape(format!("\\U{:08x} is not a character", value)))?;
            Ok((decoded, 9))
        }
        '0'..='7' => {
            // Exactly three octal digits, one byte of range
            let digits: Vec<u32> = input
                .chars()
                .take(3)
                .map_while(|d| d.to_digit(8))
                .collect();
            if digits.len() != 3 {
                return Err(Error::Unescape(format!("short octal escape in {:?}", input)));
            }
            let value = digits[0] * 64 + digits[1] * 8 + digits[2];
            if value > 255 {
                return Err(Error::Unescape(format!(
                    "octal escape \\{:o} out of byte range",
                    value
                )));
            }
            check_nul(value, accept_nul)?;
            let decoded = char::from_u32(value)
                .ok_or_else(|| Error::Unescape(format!("\\{:o} is not a character", value)))?;
            Ok((decoded, 3))
        }
        _ => Err(Error::Unescape(format!("unknown escape \\{}", c))),
    }
}

fn hex_value(input: &str, n: usize) -> Result<u32> {
    let digits: Vec<u32> = input.chars().take(n).map_while(|d| d.to_digit(16)).collect();
    if digits.len() != n {
        return Err(Error::Unescape(format!("short hex escape in {:?}", input)));
    }
    Ok(digits.iter().fold(0, |acc, d| acc * 16 + d))
}

fn check_nul(value: u32, accept_nul: bool) -> Result<()> {
    if value == 0 && !accept_nul {
        Err(Error::Unescape("escape produces NUL byte".into()))
    } else {
        Ok(())
    }
}

/// Extract the next word from `input`.
///
/// Returns the decoded word and the unconsumed remainder, or `None` once
/// the input is exhausted. Repeated separators are coalesced unless
/// [`SplitFlags::DONT_COALESCE_SEPARATORS`] is set, in which case each
/// separator terminates one (possibly empty) word.
pub fn extract_first_word<'a>(
    input: &'a str,
    separators: &str,
    flags: SplitFlags,
) -> Result<Option<(String, &'a str)>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let len = chars.len();
    let remainder = |i: usize| -> &'a str {
        if i < len {
            &input[chars[i].0..]
        } else {
            ""
        }
    };

    let mut i = 0;
    if !flags.contains(SplitFlags::DONT_COALESCE_SEPARATORS) {
        while i < len && separators.contains(chars[i].1) {
            i += 1;
        }
    }
    if i >= len {
        return Ok(None);
    }
    if flags.contains(SplitFlags::DONT_COALESCE_SEPARATORS) && separators.contains(chars[i].1) {
        // One separator consumed, empty word emitted
        return Ok(Some((String::new(), remainder(i + 1))));
    }

    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut backslash = false;

    while i < len {
        let c = chars[i].1;

        if backslash {
            backslash = false;
            if flags.contains(SplitFlags::CUNESCAPE) {
                match c_unescape_one(remainder(i), false) {
                    Ok((decoded, consumed)) => {
                        word.push(decoded);
                        i += consumed;
                        continue;
                    }
                    Err(e) => {
                        if flags.contains(SplitFlags::UNESCAPE_RELAX) {
                            word.push('\\');
                            word.push(c);
                        } else {
                            return Err(e);
                        }
                    }
                }
            } else if flags.contains(SplitFlags::UNESCAPE_SEPARATORS)
                && (separators.contains(c) || c == '\\')
            {
                word.push(c);
            } else {
                word.push('\\');
                word.push(c);
            }
            i += 1;
            continue;
        }

        if c == '\\' && !flags.contains(SplitFlags::RETAIN_ESCAPE) {
            backslash = true;
            i += 1;
            continue;
        }

        if let Some(q) = quote {
            if c == q {
                quote = None;
                if flags.contains(SplitFlags::KEEP_QUOTE) {
                    word.push(c);
                }
            } else {
                word.push(c);
            }
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            quote = Some(c);
            if flags.contains(SplitFlags::KEEP_QUOTE) {
                word.push(c);
            }
            i += 1;
            continue;
        }

        if separators.contains(c) {
            i += 1;
            return Ok(Some((word, remainder(i))));
        }

        word.push(c);
        i += 1;
    }

    if backslash {
        if flags.contains(SplitFlags::UNESCAPE_RELAX)
            && (quote.is_none() || flags.contains(SplitFlags::RELAX))
        {
            word.push('\\');
        } else if !flags.contains(SplitFlags::RELAX) {
            return Err(Error::TrailingBackslash(input.to_string()));
        }
    }
    if quote.is_some() && !flags.contains(SplitFlags::RELAX) {
        return Err(Error::UnbalancedQuotes(input.to_string()));
    }

    Ok(Some((word, "")))
}

/// Split `input` into words, appending to `words`
pub fn split_string_append(
    mut words: Vec<String>,
    input: &str,
    separators: &str,
    flags: SplitFlags,
) -> Result<Vec<String>> {
    let mut rest = input;
    while let Some((word, remainder)) = extract_first_word(rest, separators, flags)? {
        words.push(word);
        rest = remainder;
    }
    Ok(words)
}

/// Split `input` into words
pub fn split_string(input: &str, separators: &str, flags: SplitFlags) -> Result<Vec<String>> {
    split_string_append(Vec::new(), input, separators, flags)
}

fn word_needs_escape(word: &str) -> bool {
    word.is_empty()
        || word
            .chars()
            .any(|c| c <= ' ' || c == '\u{7f}' || c == '"' || c == '\'' || c == '\\')
}

fn append_escaped_word(out: &mut String, word: &str) {
    out.push('"');
    for c in word.chars() {
        match c {
            '\u{7}' => out.push_str("\\a"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{b}' => out.push_str("\\v"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Escape and join words so that [`split_string`] recovers them.
///
/// Words containing whitespace, control characters, quotes or backslashes
/// are double-quoted with C escapes; everything else passes through.
pub fn escape_words<S: AsRef<str>>(words: &[S]) -> String {
    let mut out = String::new();
    for word in words {
        if !out.is_empty() {
            out.push(' ');
        }
        let word = word.as_ref();
        if word_needs_escape(word) {
            append_escaped_word(&mut out, word);
        } else {
            out.push_str(word);
        }
    }
    out
}

/// Escape a filesystem path the way systemd names mount/path units.
///
/// `/` becomes `-`; a leading `-` or `.` and any byte outside
/// `[a-zA-Z0-9:_.]` are `\xHH`-escaped; the root path is `-`.
pub fn unit_name_path_escape(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return "-".to_string();
    }

    // Collapse repeated slashes before escaping
    let mut collapsed = String::new();
    let mut prev_slash = false;
    for c in trimmed.chars() {
        if c == '/' {
            if !prev_slash {
                collapsed.push(c);
            }
            prev_slash = true;
        } else {
            collapsed.push(c);
            prev_slash = false;
        }
    }

    let mut out = String::new();
    for (i, c) in collapsed.chars().enumerate() {
        let escape_leading = i == 0 && (c == '.' || c == '-');
        match c {
            '/' => out.push('-'),
            c if !escape_leading
                && (c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '.') =>
            {
                out.push(c)
            }
            c => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\x{:02x}", b));
                }
            }
        }
    }
    out
}
