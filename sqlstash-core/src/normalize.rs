//! SQL statement normalization for cache keys.
//!
//! Two statements that differ only in layout (whitespace, comments, literal
//! `\n` sequences left behind by string builders) normalize to the same text
//! and therefore share one prepared statement:
//!
//! ```rust
//! use sqlstash_core::normalize;
//!
//! let a = normalize("SELECT *\n  FROM users -- all of them\n WHERE id = $1");
//! let b = normalize("SELECT * FROM users /* by id */ WHERE id = $1");
//! assert_eq!(a, "SELECT * FROM users WHERE id = $1");
//! assert_eq!(a, b);
//! ```
//!
//! Quoted text is never touched: single-quoted literals, double-quoted
//! identifiers and dollar-quoted bodies are copied byte for byte, so
//! `'a  b'` and `'a b'` stay distinct.

/// Normalize a SQL statement.
///
/// - literal `\n`, `\r` and `\t` escape sequences outside quotes become spaces
/// - `-- line` and `/* block */` comments (nesting allowed) become spaces
/// - whitespace runs collapse to a single space, both ends are trimmed
///
/// The function is idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut out = Normalized::with_capacity(len);
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b if b.is_ascii_whitespace() => {
                out.space();
                i += 1;
            }
            b'\\' if matches!(bytes.get(i + 1), Some(b'n' | b'r' | b't')) => {
                out.space();
                i += 2;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line_comment(bytes, i + 2);
                out.space();
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i + 2);
                out.space();
            }
            quote @ (b'\'' | b'"') => {
                let end = scan_quoted(bytes, i, quote);
                out.push(&sql[i..end]);
                i = end;
            }
            b'$' if !out.ends_with_ident() => match scan_dollar_quoted(bytes, i) {
                Some(end) => {
                    out.push(&sql[i..end]);
                    i = end;
                }
                None => {
                    out.push("$");
                    i += 1;
                }
            },
            _ => {
                let end = scan_plain(bytes, i + 1);
                out.push(&sql[i..end]);
                i = end;
            }
        }
    }

    out.finish()
}

/// Output buffer that defers whitespace until the next token.
struct Normalized {
    buf: String,
    pending_space: bool,
}

impl Normalized {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            pending_space: false,
        }
    }

    #[inline]
    fn space(&mut self) {
        self.pending_space = true;
    }

    fn push(&mut self, token: &str) {
        if self.pending_space && !self.buf.is_empty() {
            self.buf.push(' ');
        }
        self.pending_space = false;
        self.buf.push_str(token);
    }

    /// Whether the next byte would continue an identifier (`foo$bar`).
    fn ends_with_ident(&self) -> bool {
        !self.pending_space
            && self
                .buf
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
    }

    fn finish(self) -> String {
        self.buf
    }
}

/// Bytes that may start something other than a plain token.
#[inline]
fn is_special(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'\\' | b'-' | b'/' | b'\'' | b'"' | b'$')
}

fn scan_plain(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && !is_special(bytes[i]) {
        i += 1;
    }
    i
}

fn skip_line_comment(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 1usize;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    i
}

/// Scan a quoted span starting at `start`; doubled quotes are escapes.
/// An unterminated span runs to the end of the input.
fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Scan a dollar-quoted body (`$$...$$` or `$tag$...$tag$`).
///
/// Returns `None` when the `$` does not open a dollar quote (e.g. `$1`).
fn scan_dollar_quoted(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if let Some(&first) = bytes.get(i) {
        if first != b'$' && !(first.is_ascii_alphabetic() || first == b'_') {
            return None;
        }
    }
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if bytes.get(i) != Some(&b'$') {
        return None;
    }

    let tag = &bytes[start..=i];
    let body = i + 1;
    let close = bytes[body..]
        .windows(tag.len())
        .position(|window| window == tag)
        .map_or(bytes.len(), |pos| body + pos + tag.len());
    Some(close)
}
