use std::fmt;

use tracing::trace;

/// Scanner failure with the line it happened on.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanError {
    pub id: &'static str,
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "ScanError ({}): {} on line {}", self.id, self.message, self.line) }
}

impl std::error::Error for ScanError {}

macro_rules! scan_error {
    ($id:expr, $line:expr, $($arg:tt)*) => {
        return Err(ScanError { id: $id, message: format!($($arg)*), line: $line })
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mark {
    Plain,
    Set,
    Get,
    Sym,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delim {
    Block,
    Group,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrKind {
    Text,
    File,
    Url,
    Tag,
    Email,
    Issue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// `[` or `(`, with a `:` or `@` written right before it.
    Open(Delim, Mark),
    /// `]` or `)`; the flag is set when a `:` follows directly.
    Close(Delim, bool),
    /// Run of apostrophes directly in front of a value.
    Quote(u32),
    /// `/` between path elements, or leading a refinement.
    Slash,
    Word(String, Mark),
    Integer(i64),
    Decimal(f64),
    Percent(f64),
    Money(f64),
    Char(char),
    Str(StrKind, String),
    Binary(Vec<u8>),
    Pair(f64, f64, bool),
    Tuple(Vec<u8>),
    Time(i64),
    Date(i32, u8, u8),
    Blank,
    Bar,
    /// `#[...]` construction syntax.
    Construct(String),
    /// `:` closing a set-path whose last element is not a word (`b/2:`).
    SetMark,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// First token on its line.
    pub newline: bool,
    /// No whitespace separates this token from the previous one.
    pub joined: bool,
    pub line: usize,
}

const MONTHS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];

fn is_delimiter(c: char) -> bool { c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | '"' | '{' | '}' | ';') }

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    newline: bool,
    joined: bool,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScanError> {
    let mut lexer = Lexer { chars: src.chars().collect(), pos: 0, line: 1, newline: false, joined: false, tokens: Vec::new() };
    lexer.run()?;
    trace!(tokens = lexer.tokens.len(), "tokenized");
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> { self.chars.get(self.pos).copied() }

    fn peek_at(&self, n: usize) -> Option<char> { self.chars.get(self.pos + n).copied() }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token { kind, newline: self.newline, joined: self.joined, line: self.line });
        self.newline = false;
        self.joined = true;
    }

    fn run(&mut self) -> Result<(), ScanError> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.bump();
                    self.newline = true;
                    self.joined = false;
                }
                c if c.is_whitespace() => {
                    self.bump();
                    self.joined = false;
                }
                ';' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '[' | '(' => {
                    self.bump();
                    self.push(TokenKind::Open(if c == '[' { Delim::Block } else { Delim::Group }, Mark::Plain));
                    self.joined = false;
                }
                ']' | ')' => {
                    self.bump();
                    let set = self.peek() == Some(':');
                    if set {
                        self.bump();
                    }
                    self.push(TokenKind::Close(if c == ']' { Delim::Block } else { Delim::Group }, set));
                }
                ':' | '@' if matches!(self.peek_at(1), Some('[') | Some('(')) => {
                    self.bump();
                    let open = self.bump();
                    let mark = if c == ':' { Mark::Get } else { Mark::Sym };
                    self.push(TokenKind::Open(if open == Some('[') { Delim::Block } else { Delim::Group }, mark));
                    self.joined = false;
                }
                '\'' => {
                    let mut n = 0;
                    while self.peek() == Some('\'') {
                        self.bump();
                        n += 1;
                    }
                    match self.peek() {
                        Some(c) if !c.is_whitespace() && !matches!(c, ']' | ')') => self.push(TokenKind::Quote(n)),
                        _ => scan_error!("scan-invalid", self.line, "apostrophe must be followed by a value"),
                    }
                }
                '/' => {
                    self.bump();
                    self.push(TokenKind::Slash);
                }
                '"' => {
                    self.bump();
                    let s = self.read_quoted('"')?;
                    self.push(TokenKind::Str(StrKind::Text, s));
                }
                '{' => {
                    self.bump();
                    let s = self.read_braced()?;
                    self.push(TokenKind::Str(StrKind::Text, s));
                }
                '}' => scan_error!("scan-extra", self.line, "unexpected }}"),
                '#' => self.read_hash()?,
                '%' => {
                    self.bump();
                    let s = if self.peek() == Some('"') {
                        self.bump();
                        self.read_quoted('"')?
                    } else {
                        self.read_lexeme(false)
                    };
                    self.push(TokenKind::Str(StrKind::File, s));
                }
                '<' if self.at_tag() => {
                    self.bump();
                    let mut s = String::new();
                    loop {
                        match self.bump() {
                            Some('>') => break,
                            Some(c) => s.push(c),
                            None => scan_error!("scan-missing", self.line, "tag is missing >"),
                        }
                    }
                    self.push(TokenKind::Str(StrKind::Tag, s));
                }
                _ => {
                    let after_slash = self.joined && matches!(self.tokens.last(), Some(Token { kind: TokenKind::Slash, .. }));
                    let lexeme = self.read_lexeme(true);
                    match lexeme.strip_suffix(':') {
                        Some(stem) if after_slash && stem.starts_with(|c: char| c.is_ascii_digit()) && !stem.contains(':') => {
                            let kind = self.classify(stem)?;
                            self.push(kind);
                            self.push(TokenKind::SetMark);
                        }
                        _ => {
                            let kind = self.classify(&lexeme)?;
                            self.push(kind);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// A `<` opens a tag when something other than space or another
    /// comparison character follows, and a `>` closes it on the same line.
    /// `<`, `<=`, `<>` and `<<` stay words.
    fn at_tag(&self) -> bool {
        match self.peek_at(1) {
            Some(c) if c.is_whitespace() || matches!(c, '<' | '>' | '=' | '[' | ']' | '(' | ')') => return false,
            None => return false,
            _ => {}
        }
        let mut i = 2;
        while let Some(c) = self.peek_at(i) {
            match c {
                '>' => return true,
                '\n' => return false,
                _ => i += 1,
            }
        }
        false
    }

    /// Characters up to the next delimiter. Inside paths a `/` also ends
    /// the lexeme, except in URLs.
    fn read_lexeme(&mut self, stop_at_slash: bool) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            let in_url = s.contains("://") || s.ends_with(":/") || (s.ends_with(':') && self.peek_at(1) == Some('/'));
            if c == '/' && stop_at_slash && !in_url {
                break;
            }
            s.push(c);
            self.bump();
        }
        s
    }

    fn read_escape(&mut self) -> Result<char, ScanError> {
        let c = match self.bump() {
            Some(c) => c,
            None => scan_error!("scan-missing", self.line, "escape at end of input"),
        };
        let escaped = match c {
            '/' => '\n',
            '-' => '\t',
            '@' => '\0',
            '(' => {
                let mut name = String::new();
                loop {
                    match self.bump() {
                        Some(')') => break,
                        Some(c) => name.push(c),
                        None => scan_error!("scan-missing", self.line, "escape is missing )"),
                    }
                }
                match name.to_lowercase().as_str() {
                    "line" => '\n',
                    "tab" => '\t',
                    "null" => '\0',
                    hex => match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                        Some(c) => c,
                        None => scan_error!("scan-invalid", self.line, "bad escape ^({})", name),
                    },
                }
            }
            c => c,
        };
        Ok(escaped)
    }

    fn read_quoted(&mut self, end: char) -> Result<String, ScanError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                Some(c) if c == end => return Ok(s),
                Some('^') => s.push(self.read_escape()?),
                Some('\n') => scan_error!("scan-missing", self.line - 1, "string is missing its closing {}", end),
                Some(c) => s.push(c),
                None => scan_error!("scan-missing", self.line, "string is missing its closing {}", end),
            }
        }
    }

    fn read_braced(&mut self) -> Result<String, ScanError> {
        let mut s = String::new();
        let mut depth = 1;
        loop {
            match self.bump() {
                Some('{') => {
                    depth += 1;
                    s.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(s);
                    }
                    s.push('}');
                }
                Some('^') => s.push(self.read_escape()?),
                Some(c) => s.push(c),
                None => scan_error!("scan-missing", self.line, "string is missing its closing }}"),
            }
        }
    }

    fn read_hash(&mut self) -> Result<(), ScanError> {
        self.bump();
        match self.peek() {
            Some('"') => {
                self.bump();
                let s = self.read_quoted('"')?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => self.push(TokenKind::Char(c)),
                    _ => scan_error!("scan-invalid", self.line, "bad char #\"{}\"", s),
                }
            }
            Some('{') => {
                self.bump();
                let mut hex = String::new();
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(c) if c.is_whitespace() => {}
                        Some(c) => hex.push(c),
                        None => scan_error!("scan-missing", self.line, "binary is missing }}"),
                    }
                }
                if hex.len() % 2 != 0 {
                    scan_error!("scan-invalid", self.line, "odd number of hex digits in #{{{}}}", hex)
                }
                let mut bytes = Vec::with_capacity(hex.len() / 2);
                for i in (0..hex.len()).step_by(2) {
                    match u8::from_str_radix(&hex[i..i + 2], 16) {
                        Ok(b) => bytes.push(b),
                        Err(_) => scan_error!("scan-invalid", self.line, "bad hex in #{{{}}}", hex),
                    }
                }
                self.push(TokenKind::Binary(bytes));
            }
            Some('[') => {
                self.bump();
                let mut s = String::new();
                loop {
                    match self.bump() {
                        Some(']') => break,
                        Some(c) => s.push(c),
                        None => scan_error!("scan-missing", self.line, "construction syntax is missing ]"),
                    }
                }
                self.push(TokenKind::Construct(s.trim().to_string()));
            }
            _ => {
                let s = self.read_lexeme(true);
                self.push(TokenKind::Str(StrKind::Issue, s));
            }
        }
        Ok(())
    }

    fn classify(&self, lexeme: &str) -> Result<TokenKind, ScanError> {
        let line = self.line;
        if lexeme.is_empty() {
            scan_error!("scan-invalid", line, "unexpected character")
        }
        if lexeme == "_" {
            return Ok(TokenKind::Blank);
        }
        if lexeme == "|" {
            return Ok(TokenKind::Bar);
        }
        if lexeme.contains("://") || (lexeme.starts_with("mailto:") && lexeme.len() > 7) {
            return Ok(TokenKind::Str(StrKind::Url, lexeme.to_string()));
        }
        let first = lexeme.chars().next().unwrap_or(' ');
        let second = lexeme.chars().nth(1);
        let numeric = first.is_ascii_digit() || (matches!(first, '-' | '+' | '.') && second.map(|c| c.is_ascii_digit()).unwrap_or(false));
        if first == '$' {
            return match lexeme[1..].parse::<f64>() {
                Ok(d) => Ok(TokenKind::Money(d)),
                Err(_) => scan_error!("scan-invalid", line, "bad money {}", lexeme),
            };
        }
        if numeric {
            return classify_number(lexeme, line);
        }
        if lexeme.contains('@') && first != '@' && !lexeme.ends_with(':') {
            return Ok(TokenKind::Str(StrKind::Email, lexeme.to_string()));
        }
        let (mark, name) = if let Some(rest) = lexeme.strip_prefix(':') {
            (Mark::Get, rest)
        } else if let Some(rest) = lexeme.strip_prefix('@') {
            (Mark::Sym, rest)
        } else if let Some(rest) = lexeme.strip_suffix(':') {
            (Mark::Set, rest)
        } else {
            (Mark::Plain, lexeme)
        };
        if name.is_empty() || name.contains(':') || name.starts_with(|c: char| c.is_ascii_digit()) {
            scan_error!("scan-invalid", line, "invalid word {}", lexeme)
        }
        Ok(TokenKind::Word(name.to_string(), mark))
    }
}

fn classify_number(lexeme: &str, line: usize) -> Result<TokenKind, ScanError> {
    if let Some(x) = lexeme[1..].find('x').map(|i| i + 1) {
        let (a, b) = (&lexeme[..x], &lexeme[x + 1..]);
        return match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => Ok(TokenKind::Pair(x, y, !a.contains('.') && !b.contains('.'))),
            _ => scan_error!("scan-invalid", line, "bad pair {}", lexeme),
        };
    }
    if let Some(p) = lexeme.strip_suffix('%') {
        return match p.parse::<f64>() {
            Ok(d) => Ok(TokenKind::Percent(d / 100.0)),
            Err(_) => scan_error!("scan-invalid", line, "bad percent {}", lexeme),
        };
    }
    if lexeme.contains(':') {
        return match parse_time(lexeme) {
            Some(t) => Ok(TokenKind::Time(t)),
            None => scan_error!("scan-invalid", line, "bad time {}", lexeme),
        };
    }
    if lexeme[1..].contains('-') {
        return match parse_date(lexeme) {
            Some((y, m, d)) => Ok(TokenKind::Date(y, m, d)),
            None => scan_error!("scan-invalid", line, "bad date {}", lexeme),
        };
    }
    if lexeme.matches('.').count() >= 2 {
        let bytes: Option<Vec<u8>> = lexeme.split('.').map(|p| p.parse::<u8>().ok()).collect();
        return match bytes {
            Some(b) if b.len() <= 8 => Ok(TokenKind::Tuple(b)),
            _ => scan_error!("scan-invalid", line, "bad tuple {}", lexeme),
        };
    }
    if lexeme.contains('.') || lexeme.contains('e') || lexeme.contains('E') {
        return match lexeme.parse::<f64>() {
            Ok(d) => Ok(TokenKind::Decimal(d)),
            Err(_) => scan_error!("scan-invalid", line, "bad decimal {}", lexeme),
        };
    }
    match lexeme.parse::<i64>() {
        Ok(i) => Ok(TokenKind::Integer(i)),
        Err(_) => scan_error!("scan-invalid", line, "bad integer {}", lexeme),
    }
}

/// `h:mm`, `h:mm:ss` or `h:mm:ss.fff` as nanoseconds.
fn parse_time(s: &str) -> Option<i64> {
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let h: i64 = parts[0].parse().ok()?;
    let m: i64 = parts[1].parse().ok()?;
    let secs: f64 = match parts.get(2) {
        Some(p) => p.parse().ok()?,
        None => 0.0,
    };
    let nanos = (h * 3600 + m * 60) * 1_000_000_000 + (secs * 1e9).round() as i64;
    Some(if neg { -nanos } else { nanos })
}

/// `17-Oct-2026`, `17-10-2026` or `2026-10-17`.
fn parse_date(s: &str) -> Option<(i32, u8, u8)> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let month = |p: &str| -> Option<u8> {
        match p.parse::<u8>() {
            Ok(m) => Some(m),
            Err(_) => {
                let lower = p.to_lowercase();
                MONTHS.iter().position(|m| lower.starts_with(m)).map(|i| i as u8 + 1)
            }
        }
    };
    let (y, m, d) = if parts[0].len() == 4 {
        (parts[0].parse().ok()?, month(parts[1])?, parts[2].parse().ok()?)
    } else {
        (parts[2].parse().ok()?, month(parts[1])?, parts[0].parse().ok()?)
    };
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    Some((y, m, d))
}

#[cfg(test)]
mod test_lexer {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> { tokenize(src).unwrap().into_iter().map(|t| t.kind).collect() }

    #[test]
    fn test_words_and_sigils() {
        assert_eq!(
            kinds("a b: :c @d"),
            vec![
                TokenKind::Word("a".into(), Mark::Plain),
                TokenKind::Word("b".into(), Mark::Set),
                TokenKind::Word("c".into(), Mark::Get),
                TokenKind::Word("d".into(), Mark::Sym),
            ]
        );
        assert_eq!(kinds("+ <= <>"), vec![
            TokenKind::Word("+".into(), Mark::Plain),
            TokenKind::Word("<=".into(), Mark::Plain),
            TokenKind::Word("<>".into(), Mark::Plain),
        ]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("-12 1.5 10% $2.50"), vec![
            TokenKind::Integer(-12),
            TokenKind::Decimal(1.5),
            TokenKind::Percent(0.1),
            TokenKind::Money(2.5),
        ]);
        assert_eq!(kinds("1x2 1.2.3"), vec![TokenKind::Pair(1.0, 2.0, true), TokenKind::Tuple(vec![1, 2, 3])]);
        assert_eq!(kinds("1:02:03"), vec![TokenKind::Time(3_723_000_000_000)]);
        assert_eq!(kinds("17-Oct-2026"), vec![TokenKind::Date(2026, 10, 17)]);
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds("\"a^/b\" {x {y} z}"), vec![
            TokenKind::Str(StrKind::Text, "a\nb".into()),
            TokenKind::Str(StrKind::Text, "x {y} z".into()),
        ]);
        assert_eq!(kinds("#\"^-\" #{0aFF} <div> %a.txt"), vec![
            TokenKind::Char('\t'),
            TokenKind::Binary(vec![0x0a, 0xff]),
            TokenKind::Str(StrKind::Tag, "div".into()),
            TokenKind::Str(StrKind::File, "a.txt".into()),
        ]);
        assert_eq!(kinds("http://x.org/a me@x.org"), vec![
            TokenKind::Str(StrKind::Url, "http://x.org/a".into()),
            TokenKind::Str(StrKind::Email, "me@x.org".into()),
        ]);
    }

    #[test]
    fn test_tags_versus_comparison_words() {
        assert_eq!(kinds("<...> </p>"), vec![
            TokenKind::Str(StrKind::Tag, "...".into()),
            TokenKind::Str(StrKind::Tag, "/p".into()),
        ]);
        assert_eq!(kinds("1 < 2 <= 3 <> 4"), vec![
            TokenKind::Integer(1),
            TokenKind::Word("<".into(), Mark::Plain),
            TokenKind::Integer(2),
            TokenKind::Word("<=".into(), Mark::Plain),
            TokenKind::Integer(3),
            TokenKind::Word("<>".into(), Mark::Plain),
            TokenKind::Integer(4),
        ]);
    }

    #[test]
    fn test_urls_and_numeric_set_paths() {
        assert_eq!(kinds("u: http://example.com"), vec![
            TokenKind::Word("u".into(), Mark::Set),
            TokenKind::Str(StrKind::Url, "http://example.com".into()),
        ]);
        assert_eq!(kinds("b/2: 10:30"), vec![
            TokenKind::Word("b".into(), Mark::Plain),
            TokenKind::Slash,
            TokenKind::Integer(2),
            TokenKind::SetMark,
            TokenKind::Time(37_800_000_000_000),
        ]);
    }

    #[test]
    fn test_joined_and_newline_tracking() {
        let tokens = tokenize("a/b\n c").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Slash);
        assert!(tokens[1].joined && tokens[2].joined);
        assert!(tokens[3].newline && !tokens[3].joined);
        assert_eq!(tokens[3].line, 2);
    }

    #[test]
    fn test_scan_errors() {
        assert_eq!(tokenize("\"open").unwrap_err().id, "scan-missing");
        assert_eq!(tokenize("1a").unwrap_err().id, "scan-invalid");
        assert_eq!(tokenize("' x").unwrap_err().id, "scan-invalid");
    }
}
