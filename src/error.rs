use miette::{miette, LabeledSpan, Report, Severity};

use crate::symbol::{Span, MAX_LABELS};

// Lexer errors

pub fn lex_unknown(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::unknown",
        help = "operands are registers, [bp+N] style memory forms, literals or labels",
        labels = vec![LabeledSpan::at(span, "unknown token")],
        "Encountered an unknown token",
    )
    .with_source_code(src.to_owned())
}

// Parser errors

pub fn parse_expected_mnemonic(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::expected_mnemonic",
        help = "each line holds a label definition, an instruction, or both",
        labels = vec![LabeledSpan::at(span, "expected a mnemonic")],
        "Expected an instruction mnemonic",
    )
    .with_source_code(src.to_owned())
}

pub fn parse_unknown_mnemonic(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Warning,
        code = "parse::unknown_mnemonic",
        help = "this line was skipped and emits no bytes",
        labels = vec![LabeledSpan::at(span, "unknown mnemonic")],
        "Unknown instruction '{}'",
        &src[span.range()]
    )
    .with_source_code(src.to_owned())
}

pub fn parse_bad_operand(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::operand",
        help = "expected a register, [bp+N], [sp-N], [r3], [r4], a literal or a label",
        labels = vec![LabeledSpan::at(span, "malformed operand")],
        "Could not parse operand",
    )
    .with_source_code(src.to_owned())
}

pub fn parse_bad_base(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::memory_base",
        help = "only bp and sp take an offset; r3 and r4 are used as [r3] and [r4]",
        labels = vec![LabeledSpan::at(span, "invalid base register")],
        "Invalid memory operand",
    )
    .with_source_code(src.to_owned())
}

pub fn parse_bad_lit(span: Span, src: &str, range: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::bad_lit",
        help = format!("allowed range is {range}"),
        labels = vec![LabeledSpan::at(span, "literal out of range")],
        "Encountered an invalid literal",
    )
    .with_source_code(src.to_owned())
}

// Assembler errors

pub fn asm_operand_count(span: Span, src: &str, mnemonic: &str, expected: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::operand_count",
        help = format!("{mnemonic} takes {expected} operand(s)"),
        labels = vec![LabeledSpan::at(span, "wrong number of operands")],
        "Wrong number of operands for {mnemonic}",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_unexpected_operand(span: Span, src: &str, expected: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::operand_kind",
        help = "check the operands for this instruction",
        labels = vec![LabeledSpan::at(span, format!("expected {expected}"))],
        "Operand of the wrong kind, expected {expected}",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_duplicate_label(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::duplicate_label",
        help = "labels may only be defined once per file",
        labels = vec![LabeledSpan::at(span, "duplicate label")],
        "Duplicate label '{}'",
        &src[span.range()]
    )
    .with_source_code(src.to_owned())
}

pub fn asm_too_many_labels(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::label_limit",
        help = format!("a program may define at most {MAX_LABELS} labels"),
        labels = vec![LabeledSpan::at(span, "label table full")],
        "Too many labels",
    )
    .with_source_code(src.to_owned())
}

pub fn asm_undefined_label(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::undefined_label",
        help = "define the label somewhere in this file with `name:`",
        labels = vec![LabeledSpan::at(span, "undefined label")],
        "Undefined label '{}'",
        &src[span.range()]
    )
    .with_source_code(src.to_owned())
}

pub fn asm_address_overflow(span: Span, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::address_overflow",
        help = "programs must fit in the 16-bit address space",
        labels = vec![LabeledSpan::at(span, "emitted past 0xFFFF")],
        "Program too large",
    )
    .with_source_code(src.to_owned())
}
