// SPDX-License-Identifier: Apache-2.0

//! Match/rewrite passes over a [`SectionIr`].
//!
//! A pass pairs a match predicate with a rewrite function that produces the
//! replacement statements for a matched statement. Gate-level equivalences
//! are written as rules such as
//!
//! ```text
//! SwapGate(a, b) => CXGate(a, b), CXGate(b, a), CXGate(a, b)
//! ```
//!
//! and turned into passes with [`GateRule::to_pass`].

use crate::circuit_ir::{Instruction, SectionIr, Stmt, StmtId, StmtKind};
use crate::lexer::{is_ident, split_top_level};
use crate::morph_error::{MorphError, Result};

type Matcher<'a> = Box<dyn Fn(&Stmt) -> bool + 'a>;
type Rewriter<'a> = Box<dyn Fn(&Stmt) -> Option<Vec<StmtKind>> + 'a>;

pub struct RewritePass<'a> {
    name: String,
    matcher: Matcher<'a>,
    rewriter: Rewriter<'a>,
}

impl<'a> RewritePass<'a> {
    pub fn new(
        name: &str,
        matcher: impl Fn(&Stmt) -> bool + 'a,
        rewriter: impl Fn(&Stmt) -> Option<Vec<StmtKind>> + 'a,
    ) -> Self {
        RewritePass {
            name: name.to_string(),
            matcher: Box::new(matcher),
            rewriter: Box::new(rewriter),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ids of all matching statements in list order.
    pub fn find_matches(&self, ir: &SectionIr) -> Vec<StmtId> {
        ir.stmts()
            .iter()
            .filter(|s| (self.matcher)(s))
            .map(|s| s.id)
            .collect()
    }

    /// Rewrites the given statements, visiting them in descending list
    /// position. Returns the number of statements rewritten.
    pub fn apply_to(&self, ir: &mut SectionIr, targets: &[StmtId]) -> Result<usize> {
        let mut ordered: Vec<(usize, StmtId)> = Vec::with_capacity(targets.len());
        for id in targets {
            let idx = ir.index_of(*id).ok_or_else(|| {
                MorphError::MalformedProgram(format!("{}: no statement with id {}", self.name, id))
            })?;
            ordered.push((idx, *id));
        }
        ordered.sort_by(|a, b| b.0.cmp(&a.0));
        ordered.dedup();

        let mut count = 0;
        for (_, id) in ordered {
            let stmt = ir.get(id).ok_or_else(|| {
                MorphError::MalformedProgram(format!("{}: no statement with id {}", self.name, id))
            })?;
            if !(self.matcher)(stmt) {
                return Err(MorphError::MalformedProgram(format!(
                    "{}: statement {} does not match",
                    self.name, id
                )));
            }
            let replacement = (self.rewriter)(stmt).ok_or_else(|| {
                MorphError::MalformedProgram(format!(
                    "{}: cannot rewrite statement {:?}",
                    self.name,
                    stmt.render()
                ))
            })?;
            ir.splice(id, replacement)?;
            count += 1;
        }
        Ok(count)
    }

    /// Rewrites every match.
    pub fn run(&self, ir: &mut SectionIr) -> Result<usize> {
        let targets = self.find_matches(ir);
        self.apply_to(ir, &targets)
    }
}

/// One gate of a rule's right-hand side; operands index into the pattern's
/// operand names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateTemplate {
    pub gate_name: String,
    pub operands: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRule {
    pub gate_name: String,
    pub operand_names: Vec<String>,
    pub replacement: Vec<GateTemplate>,
}

fn parse_gate_term(s: &str) -> Result<(String, Vec<String>)> {
    let s = s.trim();
    let open = s
        .find('(')
        .ok_or_else(|| MorphError::Parse(format!("expected GATE(operands), got {:?}", s)))?;
    let inner = s[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| MorphError::Parse(format!("missing ')' in {:?}", s)))?;
    let name = s[..open].trim();
    if !is_ident(name) {
        return Err(MorphError::Parse(format!("invalid gate name {:?}", name)));
    }
    let operands: Vec<String> = inner
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if let Some(bad) = operands.iter().find(|o| !is_ident(o)) {
        return Err(MorphError::Parse(format!("invalid operand {:?} in {:?}", bad, s)));
    }
    Ok((name.to_string(), operands))
}

/// Parses `GATE(a, ...) => GATE(..), GATE(..), ...`.
pub fn parse_rule(input: &str) -> Result<GateRule> {
    let parts: Vec<&str> = input.split("=>").collect();
    if parts.len() != 2 {
        return Err(MorphError::Parse(
            "expected => separating pattern and rewrite".to_string(),
        ));
    }
    let (gate_name, operand_names) = parse_gate_term(parts[0])?;
    let mut replacement = Vec::new();
    for term in split_top_level(parts[1], ',') {
        let (name, operands) = parse_gate_term(term)?;
        let operands = operands
            .iter()
            .map(|o| {
                operand_names.iter().position(|n| n == o).ok_or_else(|| {
                    MorphError::Parse(format!("operand {} not bound by the pattern", o))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        replacement.push(GateTemplate {
            gate_name: name,
            operands,
        });
    }
    if replacement.is_empty() {
        return Err(MorphError::Parse("empty rewrite".to_string()));
    }
    Ok(GateRule {
        gate_name,
        operand_names,
        replacement,
    })
}

impl GateRule {
    /// Parameter-free, classical-free application of the pattern gate.
    pub fn matches(&self, instr: &Instruction) -> bool {
        instr.gate_name == self.gate_name
            && instr.qargs.len() == self.operand_names.len()
            && instr.params.is_empty()
            && instr.cargs.is_empty()
    }

    pub fn expand(&self, instr: &Instruction) -> Vec<StmtKind> {
        self.replacement
            .iter()
            .map(|t| {
                let qargs = t.operands.iter().map(|i| instr.qargs[*i].clone()).collect();
                StmtKind::Gate(Instruction::new(
                    &instr.circuit_id,
                    &t.gate_name,
                    Vec::new(),
                    qargs,
                ))
            })
            .collect()
    }

    pub fn to_pass(&self) -> RewritePass<'_> {
        RewritePass::new(
            &self.gate_name,
            move |s| s.as_instruction().map_or(false, |i| self.matches(i)),
            move |s| s.as_instruction().map(|i| self.expand(i)),
        )
    }
}
