use miette::Result;

use crate::{
    air::{Air, AirInstr, AirStmt, Operand},
    error,
    isa::{self, Location, Register},
    lexer::{tokenize, LiteralKind, Token, TokenKind},
    symbol::Span,
};

/// Transforms assembly source into AIR
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Tokens without whitespace or comments, newlines kept
    toks: Vec<Token>,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Result<Self> {
        let mut toks = Vec::new();
        for tok in tokenize(src) {
            match tok.kind {
                TokenKind::Whitespace | TokenKind::Comment => continue,
                TokenKind::Unknown => return Err(error::lex_unknown(tok.span, src)),
                _ => toks.push(tok),
            }
        }
        Ok(AsmParser { src, toks })
    }

    /// Parse every line. Unknown mnemonics are recorded as warnings and skipped.
    pub fn parse(self) -> Result<Air> {
        let mut air = Air::new(self.src);
        for line in self.toks.split(|tok| tok.kind == TokenKind::Newline) {
            self.parse_line(line, &mut air)?;
        }
        Ok(air)
    }

    fn parse_line(&self, mut line: &[Token], air: &mut Air) -> Result<()> {
        // Label definition, optionally followed by an instruction
        if let [name, colon, rest @ ..] = line {
            if name.kind == TokenKind::Ident && colon.kind == TokenKind::Colon {
                air.add_stmt(AirStmt::Label {
                    name: self.text(name.span).to_owned(),
                    span: name.span,
                });
                line = rest;
            }
        }
        let Some((mnemonic, operands)) = line.split_first() else {
            return Ok(());
        };
        if mnemonic.kind != TokenKind::Ident {
            return Err(error::parse_expected_mnemonic(mnemonic.span, self.src));
        }
        let Some(ins) = isa::lookup(self.text(mnemonic.span)) else {
            air.add_warning(error::parse_unknown_mnemonic(mnemonic.span, self.src));
            return Ok(());
        };

        let operands = if operands.is_empty() {
            Vec::new()
        } else {
            operands
                .split(|tok| tok.kind == TokenKind::Comma)
                .map(|group| self.parse_operand(group, mnemonic.span))
                .collect::<Result<Vec<_>>>()?
        };
        let span = line
            .last()
            .map_or(mnemonic.span, |last| mnemonic.span.join(last.span));
        air.add_stmt(AirStmt::Instr(AirInstr::new(ins, operands, span)));
        Ok(())
    }

    fn parse_operand(&self, group: &[Token], near: Span) -> Result<Operand> {
        let Some(span) = group_span(group) else {
            // Empty operand, eg. `LD r0,`
            return Err(error::parse_bad_operand(near, self.src));
        };
        use TokenKind as T;
        match group {
            [tok] if tok.kind == T::Ident => {
                let text = self.text(tok.span);
                Ok(match Register::from_name(text) {
                    Some(reg) => Operand::Loc {
                        loc: Location::Reg(reg),
                        offset: 0,
                        span,
                    },
                    None => Operand::Label {
                        name: text.to_owned(),
                        span,
                    },
                })
            }
            [tok] if matches!(tok.kind, T::Lit(_)) => Ok(Operand::Imm {
                value: self.literal(*tok)?,
                span,
            }),
            [sign, tok] if sign.kind == T::Minus && matches!(tok.kind, T::Lit(_)) => {
                Ok(Operand::Imm {
                    value: -self.literal(*tok)?,
                    span,
                })
            }
            [open, inner @ .., close]
                if open.kind == T::OpenBracket && close.kind == T::CloseBracket =>
            {
                self.parse_memory(inner, span)
            }
            _ => Err(error::parse_bad_operand(span, self.src)),
        }
    }

    /// Contents of `[...]`: `base`, or `base+N` / `base-N`.
    fn parse_memory(&self, inner: &[Token], span: Span) -> Result<Operand> {
        let Some((base, rest)) = inner.split_first() else {
            return Err(error::parse_bad_operand(span, self.src));
        };
        if base.kind != TokenKind::Ident {
            return Err(error::parse_bad_operand(span, self.src));
        }
        let offset = match rest {
            [] => None,
            [sign, lit] if matches!(lit.kind, TokenKind::Lit(_)) => {
                let value = self.literal(*lit)?;
                let value = match sign.kind {
                    TokenKind::Plus => value,
                    TokenKind::Minus => -value,
                    _ => return Err(error::parse_bad_operand(span, self.src)),
                };
                let offset = i8::try_from(value).map_err(|_| {
                    error::parse_bad_lit(sign.span.join(lit.span), self.src, "-128 to 127")
                })?;
                Some(offset)
            }
            _ => return Err(error::parse_bad_operand(span, self.src)),
        };
        let loc = match (Register::from_name(self.text(base.span)), offset) {
            (Some(Register::Bp), _) => Location::BpOffset,
            (Some(Register::Sp), _) => Location::SpOffset,
            (Some(Register::R3), None) => Location::R3Indirect,
            (Some(Register::R4), None) => Location::R4Indirect,
            _ => return Err(error::parse_bad_base(base.span, self.src)),
        };
        Ok(Operand::Loc {
            loc,
            offset: offset.unwrap_or(0),
            span,
        })
    }

    fn literal(&self, tok: Token) -> Result<i32> {
        let text = self.text(tok.span);
        let parsed = match tok.kind {
            TokenKind::Lit(LiteralKind::Hex) => i32::from_str_radix(&text[2..], 16),
            _ => text.parse::<i32>(),
        };
        parsed.map_err(|_| error::parse_bad_lit(tok.span, self.src, "-32768 to 65535"))
    }

    fn text(&self, span: Span) -> &'a str {
        &self.src[span.range()]
    }
}

fn group_span(group: &[Token]) -> Option<Span> {
    let first = group.first()?;
    let last = group.last()?;
    Some(first.span.join(last.span))
}
