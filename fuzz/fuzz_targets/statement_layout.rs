//! Structured fuzzing for normalization.
//!
//! Builds statements from tokens joined by arbitrary layout (whitespace,
//! comments, escaped newlines) and checks that every layout of the same
//! tokens normalizes to the same text.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_statement_layout
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sqlstash_core::normalize;

/// A token that normalization must leave alone.
#[derive(Debug, Arbitrary)]
enum Token {
    Keyword(u8),
    Param(u8),
    Literal(String),
    Ident(String),
}

const KEYWORDS: &[&str] = &["SELECT", "*", "FROM", "users", "WHERE", "id", "=", "AND", "LIMIT", "1"];

impl Token {
    fn render(&self) -> String {
        match self {
            Self::Keyword(i) => KEYWORDS[*i as usize % KEYWORDS.len()].to_string(),
            Self::Param(n) => format!("${}", n),
            Self::Literal(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Ident(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        }
    }
}

/// Layout placed between two tokens.
#[derive(Debug, Arbitrary)]
enum Gap {
    Space,
    Spaces(u8),
    Newline,
    Tab,
    EscapedNewline,
    LineComment(u8),
    BlockComment(u8),
}

impl Gap {
    fn render(&self) -> String {
        match self {
            Self::Space => " ".to_string(),
            Self::Spaces(n) => " ".repeat(1 + (*n as usize % 8)),
            Self::Newline => "\n".to_string(),
            Self::Tab => "\t".to_string(),
            Self::EscapedNewline => " \\n ".to_string(),
            Self::LineComment(n) => format!(" -- note {}\n", n),
            Self::BlockComment(n) => format!(" /* note {} */ ", n),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Statement {
    tokens: Vec<(Token, Gap)>,
}

fuzz_target!(|stmt: Statement| {
    if stmt.tokens.is_empty() {
        return;
    }

    let plain = stmt
        .tokens
        .iter()
        .map(|(token, _)| token.render())
        .collect::<Vec<_>>()
        .join(" ");
    let laid_out: String = stmt
        .tokens
        .iter()
        .map(|(token, gap)| format!("{}{}", token.render(), gap.render()))
        .collect();

    assert_eq!(normalize(&plain), normalize(&laid_out));
});
