//! Instruction variants and the FOR unroller.
//!
//! Programs arrive as a tree: any instruction may be a `For` holding a nested
//! body. Before execution the tree is flattened by [`unroll`] so a process
//! only ever steps over primitive instructions. Nesting deeper than
//! [`FOR_MAX_NESTING`] collapses to a single pass of the body, as does a
//! repeat count of zero (the encoding for a malformed count).

use std::fmt;

/// Maximum FOR nesting honored by the unroller. Deeper loops run once.
pub const FOR_MAX_NESTING: usize = 3;

/// Clamps a wide intermediate result into the 16-bit value domain.
#[inline]
pub fn clamp16(v: i64) -> u16 {
    if v < 0 {
        0
    } else if v > u16::MAX as i64 {
        u16::MAX
    } else {
        v as u16
    }
}

/// An arithmetic operand: a literal already clamped to `[0, 65535]`, or a
/// variable name resolved at execution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Literal(u16),
    Var(String),
}

impl Operand {
    /// Parses a raw token. Numeric tokens (optionally signed) become clamped
    /// literals; anything else is a variable reference.
    pub fn parse(token: &str) -> Operand {
        match parse_numeric(token) {
            Some(v) => Operand::Literal(clamp16(v)),
            None => Operand::Var(token.to_string()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Var(name) => f.write_str(name),
        }
    }
}

/// Argument to a PRINT instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintArg {
    /// Verbatim message.
    Message(String),
    /// Variable reference; the resolved value is logged as `name = value`.
    Var(String),
}

/// A single program instruction.
///
/// After [`unroll`] a process holds no `For` nodes; the executor still skips
/// one defensively if it ever sees one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Append a line to the process log. `None` logs a default greeting.
    Print(Option<PrintArg>),
    /// `var = value`.
    Declare { var: String, value: Operand },
    /// `dst = lhs + rhs`, clamped to 16 bits.
    Add {
        dst: String,
        lhs: Operand,
        rhs: Operand,
    },
    /// `dst = lhs - rhs`, clamped to 16 bits (negative results clamp to 0).
    Subtract {
        dst: String,
        lhs: Operand,
        rhs: Operand,
    },
    /// Relinquish the CPU for `0` ticks. Zero sleeps are a no-op.
    Sleep(u32),
    /// Repeat `body` `repeats` times. `repeats == 0` encodes a malformed
    /// count and unrolls as a single pass.
    For {
        repeats: u32,
        body: Vec<Instruction>,
    },
    /// Read the 16-bit cell at `addr` into `var`.
    Read { var: String, addr: u32 },
    /// Write `value` into the 16-bit cell at `addr`.
    Write { addr: u32, value: Operand },
}

impl Instruction {
    /// Builds a `For` from a raw repeat token. Non-numeric or non-positive
    /// tokens yield the single-pass encoding.
    pub fn for_loop(repeat_token: &str, body: Vec<Instruction>) -> Instruction {
        let repeats = match parse_numeric(repeat_token) {
            Some(n) if n > 0 => n.min(u32::MAX as i64) as u32,
            _ => 0,
        };
        Instruction::For { repeats, body }
    }

    /// Short mnemonic used in logs and snapshots.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Print(_) => "PRINT",
            Instruction::Declare { .. } => "DECLARE",
            Instruction::Add { .. } => "ADD",
            Instruction::Subtract { .. } => "SUBTRACT",
            Instruction::Sleep(_) => "SLEEP",
            Instruction::For { .. } => "FOR",
            Instruction::Read { .. } => "READ",
            Instruction::Write { .. } => "WRITE",
        }
    }
}

/// Parses an optionally signed decimal token. Returns `None` for anything
/// that is not purely sign + digits.
fn parse_numeric(token: &str) -> Option<i64> {
    let rest = token
        .strip_prefix('+')
        .or_else(|| token.strip_prefix('-'))
        .unwrap_or(token);
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Saturate instead of failing on absurdly long digit strings; the value
    // domain is 16-bit anyway.
    match token.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => Some(if token.starts_with('-') { i64::MIN } else { i64::MAX }),
    }
}

/// Flattens an instruction tree into a FOR-free vector.
///
/// For a `For` with repeat `r` and body `B` the result is `r` concatenated
/// copies of `unroll(B)`. Nesting past [`FOR_MAX_NESTING`] and malformed
/// repeats contribute a single pass of the body. The output never contains a
/// `For` node.
pub fn unroll(instructions: &[Instruction]) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(unrolled_len(instructions));
    for inst in instructions {
        unroll_into(inst, &mut out, 0);
    }
    out
}

fn unroll_into(inst: &Instruction, out: &mut Vec<Instruction>, depth: usize) {
    let Instruction::For { repeats, body } = inst else {
        out.push(inst.clone());
        return;
    };

    let passes = if depth >= FOR_MAX_NESTING || *repeats == 0 {
        1
    } else {
        *repeats as usize
    };
    for _ in 0..passes {
        for inner in body {
            unroll_into(inner, out, depth + 1);
        }
    }
}

/// Number of primitive instructions [`unroll`] would produce.
///
/// Exposed so generators can bound program size before materializing the
/// unrolled vector.
pub fn unrolled_len(instructions: &[Instruction]) -> usize {
    instructions
        .iter()
        .map(|inst| unrolled_len_one(inst, 0))
        .sum()
}

fn unrolled_len_one(inst: &Instruction, depth: usize) -> usize {
    let Instruction::For { repeats, body } = inst else {
        return 1;
    };
    let passes = if depth >= FOR_MAX_NESTING || *repeats == 0 {
        1
    } else {
        *repeats as usize
    };
    let body_len: usize = body
        .iter()
        .map(|inner| unrolled_len_one(inner, depth + 1))
        .sum();
    passes.saturating_mul(body_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print(msg: &str) -> Instruction {
        Instruction::Print(Some(PrintArg::Message(msg.to_string())))
    }

    // ==================== Operand Parsing ====================

    #[test]
    fn operand_literal_and_var() {
        assert_eq!(Operand::parse("42"), Operand::Literal(42));
        assert_eq!(Operand::parse("+7"), Operand::Literal(7));
        assert_eq!(Operand::parse("x"), Operand::Var("x".to_string()));
        assert_eq!(Operand::parse("4x2"), Operand::Var("4x2".to_string()));
    }

    #[test]
    fn operand_literals_clamp_at_parse_time() {
        assert_eq!(Operand::parse("70000"), Operand::Literal(65535));
        assert_eq!(Operand::parse("-3"), Operand::Literal(0));
        // Longer than i64 digits still saturates rather than erroring.
        assert_eq!(
            Operand::parse("99999999999999999999999"),
            Operand::Literal(65535)
        );
    }

    #[test]
    fn clamp_law() {
        assert_eq!(clamp16(-1), 0);
        assert_eq!(clamp16(0), 0);
        assert_eq!(clamp16(65535), 65535);
        assert_eq!(clamp16(65536), 65535);
        assert_eq!(clamp16(i64::MIN), 0);
        assert_eq!(clamp16(i64::MAX), 65535);
    }

    // ==================== Unrolling ====================

    #[test]
    fn unroll_passthrough() {
        let ins = vec![print("a"), Instruction::Sleep(3)];
        assert_eq!(unroll(&ins), ins);
        assert_eq!(unrolled_len(&ins), 2);
    }

    #[test]
    fn unroll_simple_repeat() {
        let ins = vec![Instruction::For {
            repeats: 3,
            body: vec![print("x")],
        }];
        assert_eq!(unroll(&ins), vec![print("x"), print("x"), print("x")]);
        assert_eq!(unrolled_len(&ins), 3);
    }

    #[test]
    fn unroll_nested() {
        // FOR(2) { PRINT(hi), FOR(3) { PRINT(x) } } => 2 * (1 + 3) = 8
        let ins = vec![Instruction::For {
            repeats: 2,
            body: vec![
                print("hi"),
                Instruction::For {
                    repeats: 3,
                    body: vec![print("x")],
                },
            ],
        }];
        let flat = unroll(&ins);
        assert_eq!(flat.len(), 8);
        assert_eq!(unrolled_len(&ins), 8);
        assert_eq!(flat[0], print("hi"));
        assert_eq!(flat[4], print("hi"));
    }

    #[test]
    fn unroll_never_emits_for() {
        let ins = vec![Instruction::For {
            repeats: 2,
            body: vec![Instruction::For {
                repeats: 2,
                body: vec![Instruction::For {
                    repeats: 2,
                    body: vec![Instruction::For {
                        repeats: 2,
                        body: vec![print("deep")],
                    }],
                }],
            }],
        }];
        let flat = unroll(&ins);
        assert!(flat.iter().all(|i| !matches!(i, Instruction::For { .. })));
    }

    #[test]
    fn over_depth_collapses_to_single_pass() {
        // Depth indices 0..3; the loop at depth FOR_MAX_NESTING runs once.
        let mut inner = Instruction::For {
            repeats: 5,
            body: vec![print("leaf")],
        };
        for _ in 0..FOR_MAX_NESTING {
            inner = Instruction::For {
                repeats: 2,
                body: vec![inner],
            };
        }
        let flat = unroll(&[inner.clone()]);
        // Outer three levels multiply (2*2*2); the innermost runs once.
        assert_eq!(flat.len(), 8);
        assert_eq!(unrolled_len(&[inner]), 8);
    }

    #[test]
    fn malformed_repeats_run_once() {
        for token in ["oops", "", "-4", "0"] {
            let inst = Instruction::for_loop(token, vec![print("a"), print("b")]);
            assert_eq!(unroll(std::slice::from_ref(&inst)).len(), 2, "{token:?}");
        }
        let inst = Instruction::for_loop("3", vec![print("a")]);
        assert_eq!(unroll(std::slice::from_ref(&inst)).len(), 3);
    }

    #[test]
    fn estimate_matches_materialization() {
        let ins = vec![
            print("pre"),
            Instruction::For {
                repeats: 4,
                body: vec![
                    Instruction::Sleep(1),
                    Instruction::For {
                        repeats: 0,
                        body: vec![print("m")],
                    },
                ],
            },
        ];
        assert_eq!(unrolled_len(&ins), unroll(&ins).len());
    }
}
