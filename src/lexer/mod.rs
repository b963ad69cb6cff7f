use crate::lexer::cursor::Cursor;
use crate::symbol::Span;

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiteralKind {
    Dec,
    /// `0x` prefixed
    Hex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Mnemonic, register or label name
    Ident,
    Lit(LiteralKind),
    Colon,
    Comma,
    Plus,
    Minus,
    OpenBracket,
    CloseBracket,
    /// `;` to end of line
    Comment,
    Whitespace,
    Newline,
    Unknown,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Ident => "identifier",
            TokenKind::Lit(_) => "literal",
            TokenKind::Colon => "':'",
            TokenKind::Comma => "','",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::OpenBracket => "'['",
            TokenKind::CloseBracket => "']'",
            TokenKind::Comment => "comment",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Newline => "end of line",
            TokenKind::Unknown => "unknown token",
            TokenKind::Eof => "end of file",
        };
        f.write_str(name)
    }
}

/// All tokens of `input` up to, not including, [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(input);
    std::iter::from_fn(move || {
        let token = cursor.advance_token();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

/// Newlines are significant, so they are not whitespace.
pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

pub(crate) fn is_id_start(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '_' | '.')
}

pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.')
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, Span::new(self.offset(), 0)),
        };
        let kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            '\n' => TokenKind::Newline,
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            '0' if matches!(self.first(), 'x' | 'X') => {
                self.bump();
                self.take_while(|c| c.is_ascii_hexdigit());
                TokenKind::Lit(LiteralKind::Hex)
            }
            c if c.is_ascii_digit() => {
                self.take_while(|c| c.is_ascii_digit());
                TokenKind::Lit(LiteralKind::Dec)
            }
            c if is_id_start(c) => {
                self.take_while(is_id);
                TokenKind::Ident
            }
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '[' => TokenKind::OpenBracket,
            ']' => TokenKind::CloseBracket,
            _ => TokenKind::Unknown,
        };
        let token = Token::new(kind, Span::new(self.offset(), self.pos_in_token()));
        self.reset_pos();
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .map(|t| t.kind)
            .filter(|k| *k != TokenKind::Whitespace)
            .collect()
    }

    #[test]
    fn instruction_line() {
        use TokenKind::*;
        assert_eq!(
            kinds("LD r0, [bp-4] ; load\n"),
            [
                Ident,
                Ident,
                Comma,
                OpenBracket,
                Ident,
                Minus,
                Lit(LiteralKind::Dec),
                CloseBracket,
                Comment,
                Newline
            ]
        );
    }

    #[test]
    fn label_definition() {
        use TokenKind::*;
        assert_eq!(kinds("loop_1:"), [Ident, Colon]);
    }

    #[test]
    fn literals() {
        assert_eq!(kinds("0x1F"), [TokenKind::Lit(LiteralKind::Hex)]);
        assert_eq!(kinds("0"), [TokenKind::Lit(LiteralKind::Dec)]);
        assert_eq!(kinds("1024"), [TokenKind::Lit(LiteralKind::Dec)]);
    }

    #[test]
    fn spans_cover_source() {
        let src = "  PUSH 10";
        let toks: Vec<_> = tokenize(src).collect();
        assert_eq!(toks[1].span, Span::new(2, 4));
        assert_eq!(&src[toks[2].span.range()], " ");
        assert_eq!(&src[toks[3].span.range()], "10");
    }

    #[test]
    fn unknown_characters() {
        assert_eq!(kinds("$"), [TokenKind::Unknown]);
    }
}
