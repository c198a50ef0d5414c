//! Static recovery of module registration calls from script source.
//!
//! Scripts declare themselves with a call such as
//! `YUI.add('name', function (Y) { ... }, '0.1', { requires: ['a', 'b'] })`.
//! Instead of executing the script, the source is tokenized and every call to
//! the registration path is read back: the first argument must be a string
//! literal naming the module, and the optional fourth argument must be an
//! object literal whose `requires` entry (if any) is an array of string
//! literals. Registration calls nested inside the arguments of another
//! registration call are not reported, since the registered function body is
//! never invoked.

use logos::{Lexer, Logos};

/// One registration recovered from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub requires: Vec<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("unterminated {what} starting on line {line}")]
    Unterminated { what: &'static str, line: usize },
    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },
    #[error("evaluation interrupted after {tokens} tokens")]
    Interrupted { tokens: usize },
}

/// How often the interrupt check runs, in tokens.
const INTERRUPT_CHECK_EVERY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Punct(char),
    Other,
}

#[derive(Debug, Clone)]
struct Tok {
    token: Token,
    line: usize,
}

/// Reusable scanner for one registration call path.
///
/// Token storage is kept between files so repeated scans do not reallocate;
/// no state besides that buffer survives a call to [`Scanner::scan`].
#[derive(Debug)]
pub struct Scanner {
    call_path: Vec<String>,
    tokens: Vec<Tok>,
}

impl Scanner {
    /// `call_path` is dotted, e.g. `YUI.add`.
    pub fn new(call_path: &str) -> Self {
        Self {
            call_path: call_path.split('.').map(str::to_string).collect(),
            tokens: Vec::new(),
        }
    }

    /// Scan `source` and return its registrations in source order.
    ///
    /// `interrupt` is polled periodically; returning `true` aborts the scan.
    pub fn scan(
        &mut self,
        source: &str,
        interrupt: &mut dyn FnMut() -> bool,
    ) -> Result<Vec<Registration>, ScanError> {
        self.tokens.clear();
        tokenize(source, &mut self.tokens, interrupt)?;

        let mut registrations = Vec::new();
        let mut index = 0;
        while index < self.tokens.len() {
            match self.match_call(index) {
                Some(open) => {
                    let (args, close) = split_args(&self.tokens, open)?;
                    registrations.push(read_registration(&args, self.tokens[open].line)?);
                    index = close + 1;
                }
                None => index += 1,
            }
        }
        Ok(registrations)
    }

    /// If a call to the registration path starts at `index`, return the index
    /// of its opening parenthesis.
    fn match_call(&self, index: usize) -> Option<usize> {
        let mut pos = index;
        for (segment_index, segment) in self.call_path.iter().enumerate() {
            if segment_index > 0 {
                if self.tokens.get(pos)?.token != Token::Punct('.') {
                    return None;
                }
                pos += 1;
            }
            match &self.tokens.get(pos)?.token {
                Token::Ident(ident) if ident == segment => pos += 1,
                _ => return None,
            }
        }
        if index > 0 && self.tokens[index - 1].token == Token::Punct('.') {
            return None;
        }
        (self.tokens.get(pos)?.token == Token::Punct('(')).then_some(pos)
    }
}

fn split_args(tokens: &[Tok], open: usize) -> Result<(Vec<&[Tok]>, usize), ScanError> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = open + 1;
    for (pos, tok) in tokens.iter().enumerate().skip(open + 1) {
        match tok.token {
            Token::Punct('(' | '[' | '{') => depth += 1,
            Token::Punct(')') if depth == 0 => {
                if pos > start {
                    args.push(&tokens[start..pos]);
                }
                return Ok((args, pos));
            }
            Token::Punct(')' | ']' | '}') => depth = depth.saturating_sub(1),
            Token::Punct(',') if depth == 0 => {
                args.push(&tokens[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    Err(ScanError::Unterminated {
        what: "registration call",
        line: tokens[open].line,
    })
}

fn read_registration(args: &[&[Tok]], line: usize) -> Result<Registration, ScanError> {
    let name = match args.first() {
        Some([Tok {
            token: Token::Str(name),
            ..
        }]) => name.clone(),
        _ => {
            return Err(ScanError::Invalid {
                line,
                message: "registration name must be a string literal".to_string(),
            });
        }
    };
    let requires = match args.get(3) {
        Some(meta) => read_requires(meta, line)?,
        None => Vec::new(),
    };
    Ok(Registration { name, requires })
}

fn read_requires(meta: &[Tok], line: usize) -> Result<Vec<String>, ScanError> {
    let inner = match meta {
        [Tok {
            token: Token::Ident(word),
            ..
        }] if word == "null" || word == "undefined" => return Ok(Vec::new()),
        [first, inner @ .., last]
            if first.token == Token::Punct('{') && last.token == Token::Punct('}') =>
        {
            inner
        }
        _ => {
            return Err(ScanError::Invalid {
                line,
                message: "registration metadata must be an object literal".to_string(),
            });
        }
    };

    for entry in split_top_level(inner) {
        let is_requires = matches!(
            entry.first().map(|tok| &tok.token),
            Some(Token::Ident(key) | Token::Str(key)) if key == "requires"
        );
        if !is_requires {
            continue;
        }
        return match entry {
            [_, colon, value @ ..] if colon.token == Token::Punct(':') => {
                read_string_array(value, colon.line)
            }
            _ => Err(ScanError::Invalid {
                line,
                message: "malformed requires entry".to_string(),
            }),
        };
    }
    Ok(Vec::new())
}

fn split_top_level(tokens: &[Tok]) -> Vec<&[Tok]> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (pos, tok) in tokens.iter().enumerate() {
        match tok.token {
            Token::Punct('(' | '[' | '{') => depth += 1,
            Token::Punct(')' | ']' | '}') => depth = depth.saturating_sub(1),
            Token::Punct(',') if depth == 0 => {
                entries.push(&tokens[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() {
        entries.push(&tokens[start..]);
    }
    entries
}

fn read_string_array(value: &[Tok], line: usize) -> Result<Vec<String>, ScanError> {
    let invalid = || ScanError::Invalid {
        line,
        message: "requires must be an array of string literals".to_string(),
    };
    let inner = match value {
        [first, inner @ .., last]
            if first.token == Token::Punct('[') && last.token == Token::Punct(']') =>
        {
            inner
        }
        _ => return Err(invalid()),
    };
    let mut names = Vec::new();
    let mut expect_item = true;
    for tok in inner {
        match (&tok.token, expect_item) {
            (Token::Str(name), true) => {
                names.push(name.clone());
                expect_item = false;
            }
            (Token::Punct(','), false) => expect_item = true,
            _ => return Err(invalid()),
        }
    }
    Ok(names)
}

/// Identifiers after which an expression, and so a regex literal, may start.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum LexError {
    #[default]
    Unexpected,
    Unterminated(&'static str),
}

/// Lexer state shared with callbacks.
#[derive(Debug, Default)]
struct LexState {
    /// The previous token ended an operand, so `/` divides.
    after_operand: bool,
}

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f\v]+")]
#[logos(extras = LexState)]
#[logos(error = LexError)]
enum RawToken {
    #[regex(r"//[^\n]*")]
    LineComment,

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    BlockComment,

    #[token("/*")]
    UnclosedComment,

    /// `true` when the slash opened a regex literal, which the callback consumed.
    #[token("/", slash)]
    #[token("/=", slash)]
    Slash(bool),

    #[regex(r#"'([^'\\\n]|\\(\r\n|.|\n))*'"#, string_literal)]
    #[regex(r#""([^"\\\n]|\\(\r\n|.|\n))*""#, string_literal)]
    Str(String),

    #[regex(r#"'([^'\\\n]|\\(\r\n|.|\n))*"#)]
    #[regex(r#""([^"\\\n]|\\(\r\n|.|\n))*"#)]
    UnclosedStr,

    #[token("`", template_literal)]
    Template,

    #[regex(r"[a-zA-Z_$\x{80}-\x{10FFFF}][a-zA-Z0-9_$\x{80}-\x{10FFFF}]*")]
    Ident,

    #[regex(r"[0-9][0-9a-zA-Z_.]*")]
    Number,

    #[token("++")]
    #[token("--")]
    Update,

    #[regex(r"[(){}\[\],.:;?!~%^&|*+\-<>=#@]")]
    Punct,
}

fn slash(lex: &mut Lexer<'_, RawToken>) -> Result<bool, LexError> {
    if lex.extras.after_operand {
        return Ok(false);
    }
    let rest = lex.remainder();
    let mut in_class = false;
    let mut chars = rest.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            '\n' => break,
            '\\' => {
                chars.next();
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                let body = &rest[at + 1..];
                let flags = body
                    .find(|c: char| !c.is_ascii_alphabetic())
                    .unwrap_or(body.len());
                lex.bump(at + 1 + flags);
                return Ok(true);
            }
            _ => {}
        }
    }
    Err(LexError::Unterminated("regular expression"))
}

fn template_literal(lex: &mut Lexer<'_, RawToken>) -> Result<(), LexError> {
    let rest = lex.remainder();
    let mut depth = 0usize;
    let mut chars = rest.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '`' if depth == 0 => {
                lex.bump(at + 1);
                return Ok(());
            }
            '$' if depth == 0 && rest[at + 1..].starts_with('{') => {
                chars.next();
                depth = 1;
            }
            '{' if depth > 0 => depth += 1,
            '}' if depth > 0 => depth -= 1,
            _ => {}
        }
    }
    Err(LexError::Unterminated("template literal"))
}

fn string_literal(lex: &mut Lexer<'_, RawToken>) -> String {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

fn unescape(body: &str) -> String {
    let mut value = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('0') => value.push('\0'),
            // line continuation
            Some('\n') => {}
            Some('\r') => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        value.push(decoded);
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    _ => value.push('u'),
                }
            }
            Some(other) => value.push(other),
            None => {}
        }
    }
    value
}

fn newlines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}

fn tokenize(
    source: &str,
    out: &mut Vec<Tok>,
    interrupt: &mut dyn FnMut() -> bool,
) -> Result<(), ScanError> {
    let mut lexer = RawToken::lexer(source);
    let mut line = 1;
    let mut cursor = 0;

    while let Some(raw) = lexer.next() {
        if out.len() % INTERRUPT_CHECK_EVERY == 0 && !out.is_empty() && interrupt() {
            return Err(ScanError::Interrupted { tokens: out.len() });
        }
        let span = lexer.span();
        line += newlines(&source[cursor..span.start]);
        cursor = span.end;
        let start_line = line;
        line += newlines(lexer.slice());

        let unterminated = |what| ScanError::Unterminated {
            what,
            line: start_line,
        };
        let previous = lexer.extras.after_operand;
        let (token, after_operand) = match raw {
            Ok(RawToken::LineComment | RawToken::BlockComment) => continue,
            Ok(RawToken::UnclosedComment) => return Err(unterminated("comment")),
            Ok(RawToken::UnclosedStr) => return Err(unterminated("string")),
            Err(LexError::Unterminated(what)) => return Err(unterminated(what)),
            Err(LexError::Unexpected) => {
                return Err(ScanError::Invalid {
                    line: start_line,
                    message: format!("unexpected character {:?}", lexer.slice()),
                });
            }
            Ok(RawToken::Ident) => {
                let word = lexer.slice();
                let keyword = EXPRESSION_KEYWORDS.contains(&word);
                (Token::Ident(word.to_string()), !keyword)
            }
            Ok(RawToken::Str(value)) => (Token::Str(value), true),
            Ok(RawToken::Slash(true) | RawToken::Template | RawToken::Number) => {
                (Token::Other, true)
            }
            Ok(RawToken::Slash(false)) => (Token::Punct('/'), false),
            // postfix after an operand, prefix otherwise
            Ok(RawToken::Update) => (Token::Other, previous),
            Ok(RawToken::Punct) => {
                let c = lexer.slice().chars().next().unwrap_or_default();
                (Token::Punct(c), matches!(c, ')' | ']' | '}'))
            }
        };
        lexer.extras.after_operand = after_operand;
        out.push(Tok {
            token,
            line: start_line,
        });
    }
    Ok(())
}
