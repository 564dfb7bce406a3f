// Lexer for kernel IR text.
//
// Tokenizes the LLVM-flavoured IR subset accepted by `parser`. Uses the
// `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

use crate::ast::Span;

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// IR token types.
///
/// Sigil-prefixed names carry the name without the sigil. Bare words
/// (mnemonics, types, labels, keywords) share `Word`; the parser tells them
/// apart by content.
#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n]+|;[^\n]*")]
pub enum Token {
    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,
    #[token("!")]
    Bang,

    // ── Names ──
    /// Local value or label reference: `%name`.
    #[regex(r"%[A-Za-z0-9_.$\-]+", strip_sigil)]
    Local(String),

    /// Function name: `@name`.
    #[regex(r"@[A-Za-z0-9_.$\-]+", strip_sigil)]
    Global(String),

    /// Numbered metadata reference: `!7`.
    #[regex(r"![0-9]+", parse_md_ref)]
    MetaRef(u32),

    /// Metadata kind name: `!llvm.loop`.
    #[regex(r"![A-Za-z_][A-Za-z0-9_.]*", strip_sigil)]
    MetaName(String),

    /// Metadata string: `!"text"`.
    #[regex(r#"!"[^"]*""#, parse_md_string)]
    MetaStr(String),

    // ── Literals ──
    /// Constant C string: `c"text"` with `\HH` escapes.
    #[regex(r#"c"[^"]*""#, parse_c_string)]
    CStr(String),

    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    /// Bare word: `define`, `i32`, `phi`, `for.body`, ...
    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Colon => write!(f, ":"),
            Token::Bang => write!(f, "!"),
            Token::Local(n) => write!(f, "%{n}"),
            Token::Global(n) => write!(f, "@{n}"),
            Token::MetaRef(n) => write!(f, "!{n}"),
            Token::MetaName(n) => write!(f, "!{n}"),
            Token::MetaStr(s) => write!(f, "!\"{s}\""),
            Token::CStr(s) => write!(f, "c\"{s}\""),
            Token::Int(v) => write!(f, "{v}"),
            Token::Word(w) => write!(f, "{w}"),
        }
    }
}

// ── Callbacks ──

fn strip_sigil(lex: &mut logos::Lexer<'_, Token>) -> String {
    lex.slice()[1..].to_string()
}

fn parse_md_ref(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()[1..].parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_md_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    unescape(&slice[2..slice.len() - 1])
}

fn parse_c_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    unescape(&slice[2..slice.len() - 1])
}

/// Decode `\HH` hex escapes. Any other backslash sequence is rejected.
pub fn unescape(inner: &str) -> Option<String> {
    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = inner.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

// ── Public API ──

/// Lex IR text into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span: Span = range.clone().into();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[range]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
