//! Token types for the SDL recipe lexer.

use logos::Logos;

/// The kind of token produced by the SDL lexer.
///
/// Newlines are significant (they terminate tags) and are therefore real
/// tokens rather than skipped whitespace.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"\\\r?\n")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"--[^\n]*")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum TokenKind {
    #[token("{")]
    BlockStart,

    #[token("}")]
    BlockEnd,

    #[token("=")]
    Assign,

    #[token(";")]
    Semicolon,

    #[token("\n")]
    Newline,

    // ========== Values ==========
    #[token("true", priority = 10)]
    True,

    #[token("false", priority = 10)]
    False,

    #[token("on", priority = 10)]
    On,

    #[token("off", priority = 10)]
    Off,

    #[token("null", priority = 10)]
    Null,

    /// A quoted string with backslash escapes.
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StringLiteral,

    /// A raw backtick string without escapes.
    #[regex("`[^`]*`")]
    RawStringLiteral,

    #[regex(r"-?[0-9]+")]
    Integer,

    /// A tag or attribute name, optionally namespaced (`x:name`).
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.$\-]*(:[a-zA-Z_][a-zA-Z0-9_.$\-]*)?", priority = 3)]
    Ident,
}

impl TokenKind {
    /// Returns true for tokens that can appear as a tag value.
    #[must_use]
    pub fn is_value(self) -> bool {
        matches!(
            self,
            Self::True
                | Self::False
                | Self::On
                | Self::Off
                | Self::Null
                | Self::StringLiteral
                | Self::RawStringLiteral
                | Self::Integer
        )
    }
}

/// A lexed token with its source text and line number.
#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: usize,
}

/// Tokenizes an SDL document.
///
/// Returns `Err` with the offending line number on an unrecognized
/// character sequence.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, usize> {
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(input);
    while let Some(result) = lexer.next() {
        let line = 1 + input[..lexer.span().start].matches('\n').count();
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                text: lexer.slice(),
                line,
            }),
            Err(()) => return Err(line),
        }
    }
    Ok(tokens)
}

/// Removes the quotes of a string literal and resolves its escapes.
#[must_use]
pub fn unescape_string(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_simple_tag() {
        assert_eq!(
            kinds("name \"demo\"\n"),
            vec![TokenKind::Ident, TokenKind::StringLiteral, TokenKind::Newline]
        );
    }

    #[test]
    fn lex_attributes_and_blocks() {
        assert_eq!(
            kinds("dflags \"-g\" platform=\"linux\" {\n}"),
            vec![
                TokenKind::Ident,
                TokenKind::StringLiteral,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::StringLiteral,
                TokenKind::BlockStart,
                TokenKind::Newline,
                TokenKind::BlockEnd,
            ]
        );
    }

    #[test]
    fn lex_comments_and_continuations() {
        assert_eq!(
            kinds("// c\n-- c\n# c\n/* c\nc */ name \\\n \"x\""),
            vec![
                TokenKind::Newline,
                TokenKind::Newline,
                TokenKind::Newline,
                TokenKind::Ident,
                TokenKind::StringLiteral,
            ]
        );
    }

    #[test]
    fn lex_keywords_and_namespaced_idents() {
        assert_eq!(
            kinds("optional=true default=off x:ignored"),
            vec![
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::True,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Off,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn unescape() {
        assert_eq!(unescape_string(r#""a\"b\\c\nd""#), "a\"b\\c\nd");
        assert_eq!(unescape_string("\"plain\""), "plain");
    }

    #[test]
    fn line_numbers() {
        let tokens = tokenize("a\nb\nc").unwrap();
        assert_eq!(tokens.iter().map(|t| t.line).collect::<Vec<_>>(), vec![1, 1, 2, 2, 3]);
    }

    #[test]
    fn reject_garbage() {
        assert!(tokenize("name @").is_err());
    }
}
