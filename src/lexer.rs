// File: src/lexer.rs
//
// Hand-written lexer (spec §4.1). The interface is purely functional: given
// a `Token` (which alone carries enough position information — its end
// offset and its own position) and the source it was cut from, `Lexer::next`
// produces the following token. There is no mutable cursor object; the
// "state" is just the previous token plus the immutable source slice.

use crate::errors::EngineError;
use crate::position::SourcePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Do,
    While,
    For,
    Break,
    Continue,
    Function,
    Return,
    Var,
    Const,
    True,
    False,
    Null,
    New,
    Actor,
    Input,
    Output,
    Protocol,
    Socket,
    Class,
    Export,
    Import,
}

impl Keyword {
    fn from_str(s: &str) -> Option<Keyword> {
        Some(match s {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "do" => Keyword::Do,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "function" => Keyword::Function,
            "return" => Keyword::Return,
            "var" => Keyword::Var,
            "const" => Keyword::Const,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "new" => Keyword::New,
            "actor" => Keyword::Actor,
            "input" => Keyword::Input,
            "output" => Keyword::Output,
            "protocol" => Keyword::Protocol,
            "socket" => Keyword::Socket,
            "class" => Keyword::Class,
            "export" => Keyword::Export,
            "import" => Keyword::Import,
            _ => return None,
        })
    }
}

/// A multi-character operator token (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiOp {
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Le,
    Ge,
    Shl,
    Shr,
    Shr3,
    Inc,
    Dec,
    AndAnd,
    OrOr,
    Pow,
    LArrow,
    RArrow,
}

/// The base operator of a compound-assignment token (`+=`, `<<=`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Shr3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,
    Identifier(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Single-character punctuation or operator, carried as its own
    /// character (spec §4.1 "single-char punctuation, encoded as its
    /// character code").
    Punct(char),
    MultiOp(MultiOp),
    Assign,
    CompoundAssign(AssignOp),
    Keyword(Keyword),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub position: SourcePos,
    pub start: usize,
    pub len: usize,
}

impl Token {
    /// The synthetic "beginning of file" token used to seed `Lexer::next`.
    pub fn bof() -> Token {
        Token { kind: TokenKind::Eof, position: SourcePos::new(1, 1), start: 0, len: 0 }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

pub struct Lexer<'a> {
    pub source: &'a str,
    bytes: &'a [u8],
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer { source, bytes: source.as_bytes() }
    }

    /// Tokenizes the entire source eagerly; used by the parser driver and by
    /// tests. Production parsing can instead call `next` token-by-token.
    pub fn tokenize_all(&self) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        let mut prev = Token::bof();
        loop {
            let tok = self.next(&prev, true)?;
            let done = tok.is_eof();
            tokens.push(tok.clone());
            prev = tok;
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    /// Produces the token following `prev`, advancing line/column only over
    /// the bytes actually scanned since `prev` ended (spec §4.1 "Position
    /// tracking advances ... by scanning only the bytes between the two
    /// token starts").
    pub fn next(&self, prev: &Token, skip_comments: bool) -> Result<Token, EngineError> {
        // Tokens never span newlines, so `prev`'s end column is just its
        // start column plus its byte length.
        let mut pos = SourcePos::new(prev.position.line, prev.position.column + prev.len);
        let mut i = prev.end();

        loop {
            let (next_i, next_pos) = self.skip_whitespace(i, pos);
            i = next_i;
            pos = next_pos;

            if !skip_comments {
                break;
            }
            if self.bytes.get(i) == Some(&b'/') && self.bytes.get(i + 1) == Some(&b'/') {
                while i < self.bytes.len() && self.bytes[i] != b'\n' {
                    i += 1;
                    pos.column += 1;
                }
                continue;
            }
            if self.bytes.get(i) == Some(&b'/') && self.bytes.get(i + 1) == Some(&b'*') {
                let start_pos = pos;
                i += 2;
                pos.column += 2;
                let mut closed = false;
                while i < self.bytes.len() {
                    if self.bytes[i] == b'*' && self.bytes.get(i + 1) == Some(&b'/') {
                        i += 2;
                        pos.column += 2;
                        closed = true;
                        break;
                    }
                    if self.bytes[i] == b'\n' {
                        pos.line += 1;
                        pos.column = 1;
                    } else {
                        pos.column += 1;
                    }
                    i += 1;
                }
                if !closed {
                    return Err(EngineError::lex("Unclosed multi-line comment", start_pos));
                }
                continue;
            }
            break;
        }

        if i >= self.bytes.len() {
            return Ok(Token { kind: TokenKind::Eof, position: pos, start: i, len: 0 });
        }

        let start = i;
        let start_pos = pos;
        let c = self.bytes[i] as char;

        if c == '"' || c == '\'' {
            return self.lex_string(i, pos, c);
        }
        if c.is_ascii_digit() {
            return self.lex_number(i, pos);
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '@' {
            return self.lex_ident(i, pos);
        }

        // Compound-assignment forms are checked first since several share a
        // prefix with a plain multi-char operator (`<<` vs `<<=`).
        let rest = &self.source[i..];
        for (text, op) in COMPOUND_ASSIGNS {
            if rest.starts_with(text) {
                return Ok(Token {
                    kind: TokenKind::CompoundAssign(*op),
                    position: start_pos,
                    start,
                    len: text.len(),
                });
            }
        }
        for (text, kind) in MULTI_OPS {
            if rest.starts_with(text) {
                return Ok(Token {
                    kind: kind.clone(),
                    position: start_pos,
                    start,
                    len: text.len(),
                });
            }
        }
        if c == '=' {
            return Ok(Token { kind: TokenKind::Assign, position: start_pos, start, len: 1 });
        }
        if "+-*/%&|^~!<>(){}[],;:.?".contains(c) {
            return Ok(Token { kind: TokenKind::Punct(c), position: start_pos, start, len: 1 });
        }

        Err(EngineError::lex(format!("unexpected character '{}'", c), start_pos))
    }

    /// Convenience matcher: advances past `prev` and requires the resulting
    /// token satisfy `check`, else fails with a positioned error naming
    /// `what` (spec §4.1 "match(expected_kind) yields next or fails").
    pub fn expect(
        &self,
        prev: &Token,
        check: impl Fn(&TokenKind) -> bool,
        what: &str,
    ) -> Result<Token, EngineError> {
        let tok = self.next(prev, true)?;
        if check(&tok.kind) {
            Ok(tok)
        } else {
            Err(EngineError::parse(format!("expected {}", what), tok.position))
        }
    }

    fn skip_whitespace(&self, mut i: usize, mut pos: SourcePos) -> (usize, SourcePos) {
        while i < self.bytes.len() {
            match self.bytes[i] {
                b' ' | b'\t' | b'\r' => {
                    pos.column += 1;
                    i += 1;
                }
                b'\n' => {
                    pos.line += 1;
                    pos.column = 1;
                    i += 1;
                }
                _ => break,
            }
        }
        (i, pos)
    }

    fn lex_ident(&self, start: usize, pos: SourcePos) -> Result<Token, EngineError> {
        let mut i = start;
        if self.bytes.get(i) == Some(&b'@') {
            i += 1;
        }
        while i < self.bytes.len() {
            let c = self.bytes[i] as char;
            if c.is_alphanumeric() || c == '_' {
                i += 1;
            } else {
                break;
            }
        }
        let text = &self.source[start..i];
        let kind = match Keyword::from_str(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Identifier(text.to_string()),
        };
        Ok(Token { kind, position: pos, start, len: i - start })
    }

    fn lex_number(&self, start: usize, pos: SourcePos) -> Result<Token, EngineError> {
        let mut i = start;
        if self.bytes.get(i) == Some(&b'0') && matches!(self.bytes.get(i + 1), Some(b'x') | Some(b'X')) {
            i += 2;
            let hex_start = i;
            while i < self.bytes.len() && (self.bytes[i] as char).is_ascii_hexdigit() {
                i += 1;
            }
            let text = &self.source[hex_start..i];
            let value = i64::from_str_radix(text, 16)
                .map_err(|_| EngineError::lex("malformed hex literal", pos))?;
            return Ok(Token { kind: TokenKind::Int(value), position: pos, start, len: i - start });
        }

        let mut is_float = false;
        while i < self.bytes.len() && (self.bytes[i] as char).is_ascii_digit() {
            i += 1;
        }
        if self.bytes.get(i) == Some(&b'.') && self.bytes.get(i + 1).map_or(false, |b| (*b as char).is_ascii_digit()) {
            is_float = true;
            i += 1;
            while i < self.bytes.len() && (self.bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
        }
        if matches!(self.bytes.get(i), Some(b'e') | Some(b'E')) {
            let mut j = i + 1;
            if matches!(self.bytes.get(j), Some(b'+') | Some(b'-')) {
                j += 1;
            }
            if self.bytes.get(j).map_or(false, |b| (*b as char).is_ascii_digit()) {
                is_float = true;
                i = j;
                while i < self.bytes.len() && (self.bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
            }
        }

        let text = &self.source[start..i];
        let kind = if is_float {
            TokenKind::Float(text.parse().map_err(|_| EngineError::lex("malformed float literal", pos))?)
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Float(text.parse().map_err(|_| EngineError::lex("malformed number literal", pos))?),
            }
        };
        Ok(Token { kind, position: pos, start, len: i - start })
    }

    fn lex_string(&self, start: usize, pos: SourcePos, quote: char) -> Result<Token, EngineError> {
        let mut i = start + 1;
        let mut out = String::new();
        loop {
            if i >= self.bytes.len() {
                return Err(EngineError::lex("unterminated string literal", pos));
            }
            let c = self.bytes[i] as char;
            if c == '\n' {
                return Err(EngineError::lex("newline in string literal", pos));
            }
            if c == quote {
                i += 1;
                break;
            }
            if c == '\\' {
                i += 1;
                let esc = *self.bytes.get(i).ok_or_else(|| EngineError::lex("unterminated string literal", pos))? as char;
                match esc {
                    'n' => { out.push('\n'); i += 1; }
                    'r' => { out.push('\r'); i += 1; }
                    't' => { out.push('\t'); i += 1; }
                    'b' => { out.push('\u{8}'); i += 1; }
                    'f' => { out.push('\u{c}'); i += 1; }
                    'v' => { out.push('\u{b}'); i += 1; }
                    '\'' => { out.push('\''); i += 1; }
                    '"' => { out.push('"'); i += 1; }
                    '\\' => { out.push('\\'); i += 1; }
                    'x' => {
                        let hex = self.source.get(i + 1..i + 3).ok_or_else(|| EngineError::lex("malformed \\x escape", pos))?;
                        let code = u8::from_str_radix(hex, 16).map_err(|_| EngineError::lex("malformed \\x escape", pos))?;
                        out.push(code as char);
                        i += 3;
                    }
                    '0'..='7' => {
                        let mut j = i;
                        let mut digits = String::new();
                        while j < self.bytes.len() && digits.len() < 3 && (b'0'..=b'7').contains(&self.bytes[j]) {
                            digits.push(self.bytes[j] as char);
                            j += 1;
                        }
                        let code = u32::from_str_radix(&digits, 8).unwrap_or(0);
                        out.push(char::from_u32(code).unwrap_or('\0'));
                        i = j;
                    }
                    other => { out.push(other); i += 1; }
                }
            } else {
                out.push(c);
                i += 1;
            }
        }
        Ok(Token { kind: TokenKind::Str(out), position: pos, start, len: i - start })
    }
}

const MULTI_OPS: &[(&str, TokenKind)] = &[
    ("===", TokenKind::MultiOp(MultiOp::EqEqEq)),
    ("!==", TokenKind::MultiOp(MultiOp::NotEqEq)),
    (">>>", TokenKind::MultiOp(MultiOp::Shr3)),
    ("==", TokenKind::MultiOp(MultiOp::EqEq)),
    ("!=", TokenKind::MultiOp(MultiOp::NotEq)),
    ("<=", TokenKind::MultiOp(MultiOp::Le)),
    (">=", TokenKind::MultiOp(MultiOp::Ge)),
    ("<<", TokenKind::MultiOp(MultiOp::Shl)),
    (">>", TokenKind::MultiOp(MultiOp::Shr)),
    ("++", TokenKind::MultiOp(MultiOp::Inc)),
    ("--", TokenKind::MultiOp(MultiOp::Dec)),
    ("&&", TokenKind::MultiOp(MultiOp::AndAnd)),
    ("||", TokenKind::MultiOp(MultiOp::OrOr)),
    ("**", TokenKind::MultiOp(MultiOp::Pow)),
    ("<-", TokenKind::MultiOp(MultiOp::LArrow)),
    ("->", TokenKind::MultiOp(MultiOp::RArrow)),
];

const COMPOUND_ASSIGNS: &[(&str, AssignOp)] = &[
    ("**=", AssignOp::Pow),
    (">>>=", AssignOp::Shr3),
    ("<<=", AssignOp::Shl),
    (">>=", AssignOp::Shr),
    ("+=", AssignOp::Add),
    ("-=", AssignOp::Sub),
    ("*=", AssignOp::Mul),
    ("/=", AssignOp::Div),
    ("%=", AssignOp::Mod),
    ("&=", AssignOp::BitAnd),
    ("|=", AssignOp::BitOr),
    ("^=", AssignOp::BitXor),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize_all().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        let ks = kinds("var x = 1");
        assert_eq!(ks[0], TokenKind::Keyword(Keyword::Var));
        assert_eq!(ks[1], TokenKind::Identifier("x".to_string()));
        assert_eq!(ks[2], TokenKind::Assign);
        assert_eq!(ks[3], TokenKind::Int(1));
        assert_eq!(ks[4], TokenKind::Eof);
    }

    #[test]
    fn lexes_multi_char_operators_longest_match() {
        assert_eq!(kinds("a===b")[1], TokenKind::MultiOp(MultiOp::EqEqEq));
        assert_eq!(kinds("a>>>b")[1], TokenKind::MultiOp(MultiOp::Shr3));
        assert_eq!(kinds("a>>=b")[1], TokenKind::CompoundAssign(AssignOp::Shr));
    }

    #[test]
    fn lexes_string_escapes() {
        let ks = kinds(r#""a\nb\x41""#);
        assert_eq!(ks[0], TokenKind::Str("a\nbA".to_string()));
    }

    #[test]
    fn rejects_newline_in_string() {
        let src = "\"abc\ndef\"";
        let err = Lexer::new(src).tokenize_all().unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::LexError);
    }

    #[test]
    fn rejects_unclosed_block_comment() {
        let err = Lexer::new("/* oops").tokenize_all().unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::LexError);
    }

    #[test]
    fn lexes_float_with_exponent() {
        assert_eq!(kinds("1.5e10")[0], TokenKind::Float(1.5e10));
    }

    #[test]
    fn lexes_hex_integer() {
        assert_eq!(kinds("0xFF")[0], TokenKind::Int(255));
    }

    #[test]
    fn positions_advance_monotonically() {
        let tokens = Lexer::new("var x\n= 1").tokenize_all().unwrap();
        for w in tokens.windows(2) {
            assert!(w[1].position >= w[0].position || w[1].position.line > w[0].position.line);
        }
    }

    #[test]
    fn column_accounts_for_the_previous_tokens_own_width() {
        let tokens = Lexer::new("foo bar").tokenize_all().unwrap();
        assert_eq!(tokens[0].position.column, 1);
        assert_eq!(tokens[1].position.column, 5);
    }
}
