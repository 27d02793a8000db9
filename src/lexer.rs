//! Tokenizer for C89 source.
//!
//! Produces the classified token records the parser consumes: punctuators
//! (single characters and the multi-character operators), keywords,
//! identifiers, numbers, string literals, `...` and end-of-input. The stream
//! interface is `peek`/`next`/`consume`, with `consume` asserting the kind.
//!
//! Preprocessing is out of scope; input is assumed to be already expanded
//! translation-unit text. Adjacent string literals are concatenated here.

use crate::error::{CompileError, CompileResult};
use std::fmt;

/// Line/column position in the source file, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        SourceLocation { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords.
    Auto,
    Break,
    Case,
    Char,
    Const,
    Continue,
    Default,
    Do,
    Double,
    Else,
    Enum,
    Extern,
    Float,
    For,
    Goto,
    If,
    Int,
    Long,
    Register,
    Return,
    Short,
    Signed,
    Sizeof,
    Static,
    Struct,
    Switch,
    Typedef,
    Union,
    Unsigned,
    Void,
    Volatile,
    While,

    Identifier,
    Number,
    String,

    // Multi-character operators.
    Arrow,
    Increment,
    Decrement,
    LeftShift,
    RightShift,
    LessEqual,
    GreaterEqual,
    EqualEqual,
    NotEqual,
    LogicalAnd,
    LogicalOr,
    MulAssign,
    DivAssign,
    ModAssign,
    AddAssign,
    SubAssign,
    LeftShiftAssign,
    RightShiftAssign,
    AndAssign,
    XorAssign,
    OrAssign,

    /// `...`
    Dots,
    /// Single-character punctuator, encoded as the character value.
    Punct(char),
    /// End of input.
    End,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number",
            TokenKind::String => "string literal",
            TokenKind::Dots => "...",
            TokenKind::End => "end of input",
            TokenKind::Arrow => "->",
            TokenKind::Increment => "++",
            TokenKind::Decrement => "--",
            TokenKind::LeftShift => "<<",
            TokenKind::RightShift => ">>",
            TokenKind::LessEqual => "<=",
            TokenKind::GreaterEqual => ">=",
            TokenKind::EqualEqual => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::LogicalAnd => "&&",
            TokenKind::LogicalOr => "||",
            TokenKind::MulAssign => "*=",
            TokenKind::DivAssign => "/=",
            TokenKind::ModAssign => "%=",
            TokenKind::AddAssign => "+=",
            TokenKind::SubAssign => "-=",
            TokenKind::LeftShiftAssign => "<<=",
            TokenKind::RightShiftAssign => ">>=",
            TokenKind::AndAssign => "&=",
            TokenKind::XorAssign => "^=",
            TokenKind::OrAssign => "|=",
            TokenKind::Punct(c) => return write!(f, "'{}'", c),
            kind => return write!(f, "'{}'", keyword_text(*kind)),
        };
        write!(f, "{}", s)
    }
}

fn keyword_text(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Auto => "auto",
        TokenKind::Break => "break",
        TokenKind::Case => "case",
        TokenKind::Char => "char",
        TokenKind::Const => "const",
        TokenKind::Continue => "continue",
        TokenKind::Default => "default",
        TokenKind::Do => "do",
        TokenKind::Double => "double",
        TokenKind::Else => "else",
        TokenKind::Enum => "enum",
        TokenKind::Extern => "extern",
        TokenKind::Float => "float",
        TokenKind::For => "for",
        TokenKind::Goto => "goto",
        TokenKind::If => "if",
        TokenKind::Int => "int",
        TokenKind::Long => "long",
        TokenKind::Register => "register",
        TokenKind::Return => "return",
        TokenKind::Short => "short",
        TokenKind::Signed => "signed",
        TokenKind::Sizeof => "sizeof",
        TokenKind::Static => "static",
        TokenKind::Struct => "struct",
        TokenKind::Switch => "switch",
        TokenKind::Typedef => "typedef",
        TokenKind::Union => "union",
        TokenKind::Unsigned => "unsigned",
        TokenKind::Void => "void",
        TokenKind::Volatile => "volatile",
        TokenKind::While => "while",
        _ => "?",
    }
}

fn lookup_keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "auto" => TokenKind::Auto,
        "break" => TokenKind::Break,
        "case" => TokenKind::Case,
        "char" => TokenKind::Char,
        "const" => TokenKind::Const,
        "continue" => TokenKind::Continue,
        "default" => TokenKind::Default,
        "do" => TokenKind::Do,
        "double" => TokenKind::Double,
        "else" => TokenKind::Else,
        "enum" => TokenKind::Enum,
        "extern" => TokenKind::Extern,
        "float" => TokenKind::Float,
        "for" => TokenKind::For,
        "goto" => TokenKind::Goto,
        "if" => TokenKind::If,
        "int" => TokenKind::Int,
        "long" => TokenKind::Long,
        "register" => TokenKind::Register,
        "return" => TokenKind::Return,
        "short" => TokenKind::Short,
        "signed" => TokenKind::Signed,
        "sizeof" => TokenKind::Sizeof,
        "static" => TokenKind::Static,
        "struct" => TokenKind::Struct,
        "switch" => TokenKind::Switch,
        "typedef" => TokenKind::Typedef,
        "union" => TokenKind::Union,
        "unsigned" => TokenKind::Unsigned,
        "void" => TokenKind::Void,
        "volatile" => TokenKind::Volatile,
        "while" => TokenKind::While,
        _ => return None,
    };
    Some(kind)
}

/// A classified token with its source location.
///
/// `text` carries the spelling for identifiers and the processed contents for
/// string literals; `value` carries the numeric payload for number tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub value: i64,
    /// True when a number literal is `long`-typed (L suffix or out of
    /// `int` range).
    pub is_long: bool,
    pub is_unsigned: bool,
    pub loc: SourceLocation,
}

impl Token {
    fn new(kind: TokenKind, loc: SourceLocation) -> Self {
        Token {
            kind,
            text: String::new(),
            value: 0,
            is_long: false,
            is_unsigned: false,
            loc,
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input, ending with a single `End` token.
    pub fn tokenize(mut self) -> CompileResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::End;
            // Adjacent string literals concatenate.
            if token.kind == TokenKind::String {
                if let Some(prev) = tokens.last_mut() {
                    let prev: &mut Token = prev;
                    if prev.kind == TokenKind::String {
                        prev.text.push_str(&token.text);
                        continue;
                    }
                }
            }
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn loc(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current(&self) -> char {
        self.input[self.position]
    }

    fn peek_char(&self, n: usize) -> Option<char> {
        self.input.get(self.position + n).copied()
    }

    fn advance(&mut self) -> char {
        let c = self.input[self.position];
        self.position += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn skip_whitespace_and_comments(&mut self) -> CompileResult<()> {
        loop {
            while !self.is_at_end() && self.current().is_whitespace() {
                self.advance();
            }
            if self.is_at_end() {
                return Ok(());
            }
            if self.current() == '/' && self.peek_char(1) == Some('*') {
                let loc = self.loc();
                self.advance();
                self.advance();
                loop {
                    if self.is_at_end() {
                        return Err(CompileError::syntax("unterminated comment", loc));
                    }
                    if self.current() == '*' && self.peek_char(1) == Some('/') {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
                continue;
            }
            return Ok(());
        }
    }

    fn next_token(&mut self) -> CompileResult<Token> {
        self.skip_whitespace_and_comments()?;
        let loc = self.loc();
        if self.is_at_end() {
            return Ok(Token::new(TokenKind::End, loc));
        }

        let c = self.current();
        if c.is_ascii_digit() {
            return self.number(loc);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return self.word(loc);
        }
        if c == '"' {
            return self.string_literal(loc);
        }
        if c == '\'' {
            return self.char_literal(loc);
        }
        self.operator(loc)
    }

    fn word(&mut self, loc: SourceLocation) -> CompileResult<Token> {
        let start = self.position;
        while !self.is_at_end()
            && (self.current().is_ascii_alphanumeric() || self.current() == '_')
        {
            self.advance();
        }
        let text: String = self.input[start..self.position].iter().collect();
        if let Some(kind) = lookup_keyword(&text) {
            return Ok(Token::new(kind, loc));
        }
        let mut tok = Token::new(TokenKind::Identifier, loc);
        tok.text = text;
        Ok(tok)
    }

    fn number(&mut self, loc: SourceLocation) -> CompileResult<Token> {
        let value: i64;
        if self.current() == '0'
            && matches!(self.peek_char(1), Some('x') | Some('X'))
        {
            self.advance();
            self.advance();
            let start = self.position;
            while !self.is_at_end() && self.current().is_ascii_hexdigit() {
                self.advance();
            }
            let digits: String = self.input[start..self.position].iter().collect();
            if digits.is_empty() {
                return Err(CompileError::syntax("invalid hexadecimal literal", loc));
            }
            value = i64::from_str_radix(&digits, 16)
                .map_err(|_| CompileError::syntax("hexadecimal literal out of range", loc))?;
        } else if self.current() == '0' {
            let start = self.position;
            while !self.is_at_end() && self.current().is_ascii_digit() {
                self.advance();
            }
            let digits: String = self.input[start..self.position].iter().collect();
            value = i64::from_str_radix(&digits, 8)
                .map_err(|_| CompileError::syntax("invalid octal literal", loc))?;
        } else {
            let start = self.position;
            while !self.is_at_end() && self.current().is_ascii_digit() {
                self.advance();
            }
            let digits: String = self.input[start..self.position].iter().collect();
            value = digits
                .parse()
                .map_err(|_| CompileError::syntax("integer literal out of range", loc))?;
        }

        let mut tok = Token::new(TokenKind::Number, loc);
        while !self.is_at_end() {
            match self.current() {
                'l' | 'L' => {
                    tok.is_long = true;
                    self.advance();
                }
                'u' | 'U' => {
                    tok.is_unsigned = true;
                    self.advance();
                }
                _ => break,
            }
        }
        if value > i64::from(i32::MAX) {
            tok.is_long = true;
        }
        if tok.is_unsigned && !tok.is_long && value > i64::from(u32::MAX) {
            tok.is_long = true;
        }
        tok.value = value;
        Ok(tok)
    }

    fn escape(&mut self, loc: SourceLocation) -> CompileResult<char> {
        // Called after the backslash is consumed.
        if self.is_at_end() {
            return Err(CompileError::syntax("unterminated escape sequence", loc));
        }
        let c = self.advance();
        let r = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            _ => {
                return Err(CompileError::syntax(
                    format!("unknown escape sequence '\\{}'", c),
                    loc,
                ))
            }
        };
        Ok(r)
    }

    fn string_literal(&mut self, loc: SourceLocation) -> CompileResult<Token> {
        self.advance();
        let mut text = String::new();
        loop {
            if self.is_at_end() {
                return Err(CompileError::syntax("unterminated string literal", loc));
            }
            match self.advance() {
                '"' => break,
                '\\' => text.push(self.escape(loc)?),
                c => text.push(c),
            }
        }
        let mut tok = Token::new(TokenKind::String, loc);
        tok.text = text;
        Ok(tok)
    }

    fn char_literal(&mut self, loc: SourceLocation) -> CompileResult<Token> {
        self.advance();
        if self.is_at_end() {
            return Err(CompileError::syntax("unterminated character literal", loc));
        }
        let c = match self.advance() {
            '\\' => self.escape(loc)?,
            '\'' => {
                return Err(CompileError::syntax("empty character literal", loc));
            }
            c => c,
        };
        if self.is_at_end() || self.advance() != '\'' {
            return Err(CompileError::syntax("unterminated character literal", loc));
        }
        let mut tok = Token::new(TokenKind::Number, loc);
        tok.value = c as i64;
        Ok(tok)
    }

    fn operator(&mut self, loc: SourceLocation) -> CompileResult<Token> {
        let c = self.advance();
        let next = if self.is_at_end() {
            '\0'
        } else {
            self.current()
        };

        let kind = match (c, next) {
            ('-', '>') => {
                self.advance();
                TokenKind::Arrow
            }
            ('+', '+') => {
                self.advance();
                TokenKind::Increment
            }
            ('-', '-') => {
                self.advance();
                TokenKind::Decrement
            }
            ('<', '<') => {
                self.advance();
                if !self.is_at_end() && self.current() == '=' {
                    self.advance();
                    TokenKind::LeftShiftAssign
                } else {
                    TokenKind::LeftShift
                }
            }
            ('>', '>') => {
                self.advance();
                if !self.is_at_end() && self.current() == '=' {
                    self.advance();
                    TokenKind::RightShiftAssign
                } else {
                    TokenKind::RightShift
                }
            }
            ('<', '=') => {
                self.advance();
                TokenKind::LessEqual
            }
            ('>', '=') => {
                self.advance();
                TokenKind::GreaterEqual
            }
            ('=', '=') => {
                self.advance();
                TokenKind::EqualEqual
            }
            ('!', '=') => {
                self.advance();
                TokenKind::NotEqual
            }
            ('&', '&') => {
                self.advance();
                TokenKind::LogicalAnd
            }
            ('|', '|') => {
                self.advance();
                TokenKind::LogicalOr
            }
            ('*', '=') => {
                self.advance();
                TokenKind::MulAssign
            }
            ('/', '=') => {
                self.advance();
                TokenKind::DivAssign
            }
            ('%', '=') => {
                self.advance();
                TokenKind::ModAssign
            }
            ('+', '=') => {
                self.advance();
                TokenKind::AddAssign
            }
            ('-', '=') => {
                self.advance();
                TokenKind::SubAssign
            }
            ('&', '=') => {
                self.advance();
                TokenKind::AndAssign
            }
            ('^', '=') => {
                self.advance();
                TokenKind::XorAssign
            }
            ('|', '=') => {
                self.advance();
                TokenKind::OrAssign
            }
            ('.', '.') => {
                if self.peek_char(1) == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Dots
                } else {
                    return Err(CompileError::syntax("unexpected '..'", loc));
                }
            }
            _ => match c {
                '(' | ')' | '{' | '}' | '[' | ']' | ';' | ',' | ':' | '?' | '.' | '+' | '-'
                | '*' | '/' | '%' | '&' | '|' | '^' | '~' | '!' | '<' | '>' | '=' => {
                    TokenKind::Punct(c)
                }
                _ => {
                    return Err(CompileError::syntax(
                        format!("unexpected character '{}'", c),
                        loc,
                    ))
                }
            },
        };
        Ok(Token::new(kind, loc))
    }
}

/// Lazy view over the token list with the `peek`/`next`/`consume` contract.
pub struct TokenStream {
    tokens: Vec<Token>,
    position: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        TokenStream {
            tokens,
            position: 0,
        }
    }

    /// Tokenize and wrap in one step.
    pub fn from_source(source: &str) -> CompileResult<Self> {
        Ok(TokenStream::new(Lexer::new(source).tokenize()?))
    }

    pub fn peek(&self) -> &Token {
        self.nth(0)
    }

    /// Look ahead `n` tokens without consuming. Saturates on the final `End`.
    pub fn nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.position + n).min(last)]
    }

    pub fn next(&mut self) -> Token {
        let tok = self.tokens[self.position.min(self.tokens.len() - 1)].clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        tok
    }

    /// Consume the next token, asserting its kind.
    pub fn consume(&mut self, kind: TokenKind) -> CompileResult<Token> {
        let tok = self.peek().clone();
        if tok.kind != kind {
            return Err(CompileError::syntax(
                format!("expected {}, found {}", kind, tok.kind),
                tok.loc,
            ));
        }
        Ok(self.next())
    }

    /// Consume the next token if it has the given kind.
    pub fn try_consume(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.next();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_punctuation() {
        let k = kinds("int main(void) { return 0; }");
        assert_eq!(
            k,
            vec![
                TokenKind::Int,
                TokenKind::Identifier,
                TokenKind::Punct('('),
                TokenKind::Void,
                TokenKind::Punct(')'),
                TokenKind::Punct('{'),
                TokenKind::Return,
                TokenKind::Number,
                TokenKind::Punct(';'),
                TokenKind::Punct('}'),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_number_bases() {
        let toks = Lexer::new("255 0xff 0377 'a'").tokenize().unwrap();
        assert_eq!(toks[0].value, 255);
        assert_eq!(toks[1].value, 255);
        assert_eq!(toks[2].value, 255);
        assert_eq!(toks[3].value, 97);
    }

    #[test]
    fn test_long_suffix_and_range() {
        let toks = Lexer::new("1L 2147483648 42").tokenize().unwrap();
        assert!(toks[0].is_long);
        assert!(toks[1].is_long);
        assert!(!toks[2].is_long);
    }

    #[test]
    fn test_multichar_operators() {
        let k = kinds("a <<= b >> c <= d != e && f -> g ... ++");
        assert!(k.contains(&TokenKind::LeftShiftAssign));
        assert!(k.contains(&TokenKind::RightShift));
        assert!(k.contains(&TokenKind::LessEqual));
        assert!(k.contains(&TokenKind::NotEqual));
        assert!(k.contains(&TokenKind::LogicalAnd));
        assert!(k.contains(&TokenKind::Arrow));
        assert!(k.contains(&TokenKind::Dots));
        assert!(k.contains(&TokenKind::Increment));
    }

    #[test]
    fn test_string_escapes_and_concatenation() {
        let toks = Lexer::new(r#""hello\n" "world""#).tokenize().unwrap();
        assert_eq!(toks[0].kind, TokenKind::String);
        assert_eq!(toks[0].text, "hello\nworld");
        assert_eq!(toks[1].kind, TokenKind::End);
    }

    #[test]
    fn test_comments_skipped() {
        let k = kinds("a /* comment ; */ b");
        assert_eq!(
            k,
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::End]
        );
    }

    #[test]
    fn test_stream_consume() {
        let mut ts = TokenStream::from_source("x;").unwrap();
        assert_eq!(ts.peek().kind, TokenKind::Identifier);
        ts.consume(TokenKind::Identifier).unwrap();
        assert!(ts.consume(TokenKind::Punct(',')).is_err());
        ts.consume(TokenKind::Punct(';')).unwrap();
        assert_eq!(ts.peek().kind, TokenKind::End);
    }
}
