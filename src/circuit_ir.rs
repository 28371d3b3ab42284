// SPDX-License-Identifier: Apache-2.0

//! Mutable statement-list IR for a section body.
//!
//! Each statement carries a stable `StmtId`; edits splice the list directly
//! and text is only re-emitted at the boundary via [`SectionIr::emit`].
//! Statements that were never modified re-emit their original text verbatim.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lexer::{is_ident, lex_statements, split_top_level};
use crate::morph_error::{MorphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterKind {
    Quantum,
    Classical,
}

impl RegisterKind {
    fn constructor(self) -> &'static str {
        match self {
            RegisterKind::Quantum => "QuantumRegister",
            RegisterKind::Classical => "ClassicalRegister",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub kind: RegisterKind,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitDecl {
    pub name: String,
    /// Register identifiers in declaration order.
    pub registers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Literal { text: String, value: f64 },
    Symbol(String),
    /// Anything else, e.g. `pi/2`; kept verbatim.
    Expr(String),
}

impl Param {
    pub fn parse(text: &str) -> Param {
        let text = text.trim();
        let numeric_start = text
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
        if numeric_start {
            if let Ok(value) = text.parse::<f64>() {
                if value.is_finite() {
                    return Param::Literal {
                        text: text.to_string(),
                        value,
                    };
                }
            }
        }
        if is_ident(text) {
            Param::Symbol(text.to_string())
        } else {
            Param::Expr(text.to_string())
        }
    }

    pub fn literal(value: f64) -> Param {
        Param::Literal {
            text: format!("{}", value),
            value,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Literal { text, .. } => write!(f, "{}", text),
            Param::Symbol(s) | Param::Expr(s) => write!(f, "{}", s),
        }
    }
}

/// A single indexed bit of a register, e.g. `qr[3]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BitRef {
    pub register: String,
    pub index: usize,
}

impl BitRef {
    pub fn new(register: &str, index: usize) -> Self {
        BitRef {
            register: register.to_string(),
            index,
        }
    }
}

impl fmt::Display for BitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.register, self.index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub circuit_id: String,
    pub gate_name: String,
    pub params: Vec<Param>,
    pub qargs: Vec<BitRef>,
    pub cargs: Vec<BitRef>,
    pub lineno: usize,
    pub end_lineno: usize,
}

impl Instruction {
    pub fn new(circuit_id: &str, gate_name: &str, params: Vec<Param>, qargs: Vec<BitRef>) -> Self {
        Instruction {
            circuit_id: circuit_id.to_string(),
            gate_name: gate_name.to_string(),
            params,
            qargs,
            cargs: Vec::new(),
            lineno: 0,
            end_lineno: 0,
        }
    }

    pub fn qregs(&self) -> Vec<&str> {
        self.qargs.iter().map(|b| b.register.as_str()).collect()
    }

    pub fn qbits(&self) -> Vec<usize> {
        self.qargs.iter().map(|b| b.index).collect()
    }

    pub fn cregs(&self) -> Vec<&str> {
        self.cargs.iter().map(|b| b.register.as_str()).collect()
    }

    pub fn cbits(&self) -> Vec<usize> {
        self.cargs.iter().map(|b| b.index).collect()
    }
}

fn join_bits(bits: &[BitRef]) -> String {
    bits.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}.append({}({}), qargs=[{}], cargs=[{}])",
            self.circuit_id,
            self.gate_name,
            params,
            join_bits(&self.qargs),
            join_bits(&self.cargs)
        )
    }
}

/// Operand of a sub-circuit append: a whole register or explicit bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterArg {
    Whole(String),
    Bits(Vec<BitRef>),
}

impl fmt::Display for RegisterArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterArg::Whole(r) => write!(f, "{}", r),
            RegisterArg::Bits(bits) => write!(f, "[{}]", join_bits(bits)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcircuitAppend {
    pub circuit_id: String,
    pub subcircuit: String,
    pub inverse: bool,
    pub qargs: RegisterArg,
    pub cargs: RegisterArg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Register(Register),
    Circuit(CircuitDecl),
    Gate(Instruction),
    Subcircuit(SubcircuitAppend),
    AddRegister { circuit_id: String, register: String },
    Measure { circuit_id: String, qreg: String, creg: String },
    Raw(String),
}

impl fmt::Display for StmtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StmtKind::Register(r) => write!(
                f,
                "{} = {}({}, name='{}')",
                r.name,
                r.kind.constructor(),
                r.size,
                r.name
            ),
            StmtKind::Circuit(c) => write!(
                f,
                "{} = QuantumCircuit({}, name='{}')",
                c.name,
                c.registers.join(", "),
                c.name
            ),
            StmtKind::Gate(instr) => write!(f, "{}", instr),
            StmtKind::Subcircuit(s) => write!(
                f,
                "{}.append({}{}, qargs={}, cargs={})",
                s.circuit_id,
                s.subcircuit,
                if s.inverse { ".inverse()" } else { "" },
                s.qargs,
                s.cargs
            ),
            StmtKind::AddRegister {
                circuit_id,
                register,
            } => write!(f, "{}.add_register({})", circuit_id, register),
            StmtKind::Measure {
                circuit_id,
                qreg,
                creg,
            } => write!(f, "{}.measure({}, {})", circuit_id, qreg, creg),
            StmtKind::Raw(text) => write!(f, "{}", text),
        }
    }
}

pub type StmtId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: StmtId,
    /// Source line span; zero for statements created by an edit.
    pub lineno: usize,
    pub end_lineno: usize,
    indent: String,
    original: Option<String>,
    kind: StmtKind,
}

impl Stmt {
    pub fn kind(&self) -> &StmtKind {
        &self.kind
    }

    /// Mutable access; the statement is re-rendered from its kind afterwards.
    pub fn kind_mut(&mut self) -> &mut StmtKind {
        self.original = None;
        &mut self.kind
    }

    pub fn indent(&self) -> &str {
        &self.indent
    }

    pub fn as_instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            StmtKind::Gate(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match &self.original {
            Some(text) => format!("{}{}", self.indent, text),
            None => format!("{}{}", self.indent, self.kind),
        }
    }
}

static ASSIGN_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*([A-Za-z_]\w*)\((.*)\)$").unwrap());
static METHOD_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\.(append|add_register|measure)\((.*)\)$").unwrap());
static CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\((.*)\)$").unwrap());
static INVERSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\.inverse\(\)$").unwrap());
static BIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*\[\s*(\d+)\s*\]$").unwrap());
static NAME_KW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^name\s*=\s*['"]\w+['"]$"#).unwrap());

/// Splits call arguments into positional and keyword lists.
pub fn split_args(inner: &str) -> (Vec<&str>, Vec<(&str, &str)>) {
    let mut positional = Vec::new();
    let mut keyword = Vec::new();
    if inner.trim().is_empty() {
        return (positional, keyword);
    }
    for arg in split_top_level(inner, ',') {
        let arg = arg.trim();
        match arg.find('=') {
            Some(eq) if is_ident(arg[..eq].trim()) && !arg[eq + 1..].starts_with('=') => {
                keyword.push((arg[..eq].trim(), arg[eq + 1..].trim()));
            }
            _ => positional.push(arg),
        }
    }
    (positional, keyword)
}

fn parse_bit_list(text: &str) -> Option<Vec<BitRef>> {
    let text = text.trim();
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    split_top_level(inner, ',')
        .into_iter()
        .map(|item| {
            let caps = BIT_RE.captures(item.trim())?;
            let index = caps[2].parse().ok()?;
            Some(BitRef::new(&caps[1], index))
        })
        .collect()
}

fn parse_register_arg(text: &str) -> Option<RegisterArg> {
    let text = text.trim();
    if is_ident(text) {
        Some(RegisterArg::Whole(text.to_string()))
    } else {
        parse_bit_list(text).map(RegisterArg::Bits)
    }
}

fn parse_assignment(content: &str) -> Option<StmtKind> {
    let caps = ASSIGN_CALL_RE.captures(content)?;
    let target = caps[1].to_string();
    let (positional, keyword) = split_args(&caps[3]);
    let only_name_kw = keyword
        .iter()
        .all(|(k, v)| *k == "name" && NAME_KW_RE.is_match(&format!("name={}", v)));
    if !only_name_kw {
        return None;
    }
    let kind = match &caps[2] {
        "QuantumRegister" => RegisterKind::Quantum,
        "ClassicalRegister" => RegisterKind::Classical,
        "QuantumCircuit" => {
            if positional.is_empty() || !positional.iter().all(|p| is_ident(p)) {
                return None;
            }
            return Some(StmtKind::Circuit(CircuitDecl {
                name: target,
                registers: positional.iter().map(|s| s.to_string()).collect(),
            }));
        }
        _ => return None,
    };
    if positional.len() != 1 {
        return None;
    }
    let size = positional[0].parse::<usize>().ok()?;
    Some(StmtKind::Register(Register {
        name: target,
        kind,
        size,
    }))
}

fn arg_at<'a>(
    positional: &[&'a str],
    keyword: &[(&'a str, &'a str)],
    pos: usize,
    key: &str,
) -> Option<&'a str> {
    keyword
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .or_else(|| positional.get(pos).copied())
}

fn parse_append(circuit_id: &str, inner: &str) -> Option<StmtKind> {
    let (positional, keyword) = split_args(inner);
    if keyword.iter().any(|(k, _)| *k != "qargs" && *k != "cargs") {
        return None;
    }
    let op = *positional.first()?;
    let qargs = arg_at(&positional, &keyword, 1, "qargs")?;
    let cargs = arg_at(&positional, &keyword, 2, "cargs");

    if let Some(caps) = CALL_RE.captures(op) {
        let params = if caps[2].trim().is_empty() {
            Vec::new()
        } else {
            split_top_level(&caps[2], ',')
                .into_iter()
                .map(Param::parse)
                .collect()
        };
        let qargs = parse_bit_list(qargs)?;
        let cargs = match cargs {
            Some(c) => parse_bit_list(c)?,
            None => Vec::new(),
        };
        return Some(StmtKind::Gate(Instruction {
            circuit_id: circuit_id.to_string(),
            gate_name: caps[1].to_string(),
            params,
            qargs,
            cargs,
            lineno: 0,
            end_lineno: 0,
        }));
    }

    let (subcircuit, inverse) = if let Some(caps) = INVERSE_RE.captures(op) {
        (caps[1].to_string(), true)
    } else if is_ident(op) {
        (op.to_string(), false)
    } else {
        return None;
    };
    Some(StmtKind::Subcircuit(SubcircuitAppend {
        circuit_id: circuit_id.to_string(),
        subcircuit,
        inverse,
        qargs: parse_register_arg(qargs)?,
        cargs: match cargs {
            Some(c) => parse_register_arg(c)?,
            None => RegisterArg::Bits(Vec::new()),
        },
    }))
}

fn parse_method_call(content: &str) -> Option<StmtKind> {
    let caps = METHOD_CALL_RE.captures(content)?;
    let circuit_id = &caps[1];
    let inner = &caps[3];
    match &caps[2] {
        "append" => parse_append(circuit_id, inner),
        "add_register" => {
            let arg = inner.trim();
            is_ident(arg).then(|| StmtKind::AddRegister {
                circuit_id: circuit_id.to_string(),
                register: arg.to_string(),
            })
        }
        "measure" => {
            let (positional, keyword) = split_args(inner);
            if positional.len() != 2 || !keyword.is_empty() {
                return None;
            }
            if !is_ident(positional[0]) || !is_ident(positional[1]) {
                return None;
            }
            Some(StmtKind::Measure {
                circuit_id: circuit_id.to_string(),
                qreg: positional[0].to_string(),
                creg: positional[1].to_string(),
            })
        }
        _ => None,
    }
}

/// Classifies one statement (without its indentation).
pub fn parse_stmt_kind(content: &str) -> StmtKind {
    parse_assignment(content)
        .or_else(|| parse_method_call(content))
        .unwrap_or_else(|| StmtKind::Raw(content.to_string()))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionIr {
    stmts: Vec<Stmt>,
    next_id: StmtId,
}

impl SectionIr {
    pub fn parse(text: &str) -> Result<Self> {
        let mut ir = SectionIr::default();
        for st in lex_statements(text)? {
            let indent = st.indent().to_string();
            let content = st.text[indent.len()..].to_string();
            let mut kind = parse_stmt_kind(&content);
            if let StmtKind::Gate(instr) = &mut kind {
                instr.lineno = st.lineno;
                instr.end_lineno = st.end_lineno;
            }
            let id = ir.fresh_id();
            ir.stmts.push(Stmt {
                id,
                lineno: st.lineno,
                end_lineno: st.end_lineno,
                indent,
                original: Some(content),
                kind,
            });
        }
        Ok(ir)
    }

    fn fresh_id(&mut self) -> StmtId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn make_stmt(&mut self, kind: StmtKind, indent: &str) -> Stmt {
        Stmt {
            id: self.fresh_id(),
            lineno: 0,
            end_lineno: 0,
            indent: indent.to_string(),
            original: None,
            kind,
        }
    }

    pub fn stmts(&self) -> &[Stmt] {
        &self.stmts
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn index_of(&self, id: StmtId) -> Option<usize> {
        self.stmts.iter().position(|s| s.id == id)
    }

    pub fn get(&self, id: StmtId) -> Option<&Stmt> {
        self.stmts.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: StmtId) -> Option<&mut Stmt> {
        self.stmts.iter_mut().find(|s| s.id == id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stmt> {
        self.stmts.iter_mut()
    }

    /// Inserts `kinds` starting at list position `idx`; returns the new ids.
    pub fn insert_at(&mut self, idx: usize, kinds: Vec<StmtKind>) -> Vec<StmtId> {
        let idx = idx.min(self.stmts.len());
        let mut ids = Vec::with_capacity(kinds.len());
        for (offset, kind) in kinds.into_iter().enumerate() {
            let stmt = self.make_stmt(kind, "");
            ids.push(stmt.id);
            self.stmts.insert(idx + offset, stmt);
        }
        ids
    }

    pub fn insert_before(&mut self, id: StmtId, kinds: Vec<StmtKind>) -> Result<Vec<StmtId>> {
        let idx = self.require_index(id)?;
        Ok(self.insert_at(idx, kinds))
    }

    pub fn insert_after(&mut self, id: StmtId, kinds: Vec<StmtKind>) -> Result<Vec<StmtId>> {
        let idx = self.require_index(id)?;
        Ok(self.insert_at(idx + 1, kinds))
    }

    pub fn push(&mut self, kind: StmtKind) -> StmtId {
        let idx = self.stmts.len();
        self.insert_at(idx, vec![kind])[0]
    }

    pub fn remove(&mut self, id: StmtId) -> Option<Stmt> {
        let idx = self.index_of(id)?;
        Some(self.stmts.remove(idx))
    }

    /// Replaces statement `id` by `replacement`, keeping its indentation.
    pub fn splice(&mut self, id: StmtId, replacement: Vec<StmtKind>) -> Result<Vec<StmtId>> {
        let idx = self.require_index(id)?;
        let old = self.stmts.remove(idx);
        let mut ids = Vec::with_capacity(replacement.len());
        for (offset, kind) in replacement.into_iter().enumerate() {
            let stmt = self.make_stmt(kind, &old.indent);
            ids.push(stmt.id);
            self.stmts.insert(idx + offset, stmt);
        }
        Ok(ids)
    }

    fn require_index(&self, id: StmtId) -> Result<usize> {
        self.index_of(id)
            .ok_or_else(|| MorphError::MalformedProgram(format!("no statement with id {}", id)))
    }

    /// Gate instructions in list order with their statement ids.
    pub fn instructions(&self) -> impl Iterator<Item = (StmtId, &Instruction)> {
        self.stmts
            .iter()
            .filter_map(|s| s.as_instruction().map(|i| (s.id, i)))
    }

    pub fn emit(&self) -> String {
        self.stmts
            .iter()
            .map(|s| s.render())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BODY: &str = "\
qr = QuantumRegister(3, name='qr')
cr = ClassicalRegister(3, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
qc.append(RZGate(0.5), qargs=[qr[1]], cargs=[])
qc.append(CXGate(), [qr[0], qr[2]], [])
qc.append(RXGate(theta), qargs=[qr[0]], cargs=[])
qc.append(RYGate(pi / 2), qargs=[qr[2]], cargs=[])
qc.append(sub.inverse(), qargs=qr, cargs=cr)
qc.add_register(qr_extra)
qc.measure(qr, cr)
print('hello')";

    #[test]
    fn test_parse_classifies_statements() {
        let ir = SectionIr::parse(BODY).unwrap();
        let kinds: Vec<&StmtKind> = ir.stmts().iter().map(|s| s.kind()).collect();
        assert!(matches!(kinds[0], StmtKind::Register(Register { size: 3, kind: RegisterKind::Quantum, .. })));
        assert!(matches!(kinds[1], StmtKind::Register(Register { kind: RegisterKind::Classical, .. })));
        match kinds[2] {
            StmtKind::Circuit(c) => assert_eq!(c.registers, vec!["qr", "cr"]),
            other => panic!("expected circuit, got {:?}", other),
        }
        match kinds[3] {
            StmtKind::Gate(i) => {
                assert_eq!(i.gate_name, "RZGate");
                assert_eq!(i.qbits(), vec![1]);
                assert!(matches!(i.params[0], Param::Literal { value, .. } if value == 0.5));
                assert_eq!(i.lineno, 4);
            }
            other => panic!("expected gate, got {:?}", other),
        }
        match kinds[4] {
            StmtKind::Gate(i) => assert_eq!(i.qbits(), vec![0, 2]),
            other => panic!("expected positional gate, got {:?}", other),
        }
        match kinds[5] {
            StmtKind::Gate(i) => assert_eq!(i.params[0], Param::Symbol("theta".to_string())),
            other => panic!("expected gate, got {:?}", other),
        }
        match kinds[6] {
            StmtKind::Gate(i) => assert_eq!(i.params[0], Param::Expr("pi / 2".to_string())),
            other => panic!("expected gate, got {:?}", other),
        }
        assert!(matches!(kinds[7], StmtKind::Subcircuit(SubcircuitAppend { inverse: true, .. })));
        assert!(matches!(kinds[8], StmtKind::AddRegister { .. }));
        assert!(matches!(kinds[9], StmtKind::Measure { .. }));
        assert!(matches!(kinds[10], StmtKind::Raw(_)));
    }

    #[test]
    fn test_unmodified_emit_is_verbatim() {
        let ir = SectionIr::parse(BODY).unwrap();
        assert_eq!(ir.emit(), BODY);
    }

    #[test]
    fn test_modified_statement_is_rerendered() {
        let mut ir = SectionIr::parse(BODY).unwrap();
        let (id, _) = ir.instructions().nth(1).unwrap();
        if let StmtKind::Gate(i) = ir.get_mut(id).unwrap().kind_mut() {
            i.qargs.swap(0, 1);
        }
        let emitted = ir.emit();
        assert!(emitted.contains("qc.append(CXGate(), qargs=[qr[2], qr[0]], cargs=[])"));
    }

    #[test]
    fn test_splice_keeps_ids_stable() {
        let mut ir = SectionIr::parse(BODY).unwrap();
        let ids: Vec<StmtId> = ir.instructions().map(|(id, _)| id).collect();
        let new_ids = ir
            .splice(
                ids[0],
                vec![
                    StmtKind::Raw("a = 1".to_string()),
                    StmtKind::Raw("b = 2".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(new_ids.len(), 2);
        assert!(ir.get(ids[0]).is_none());
        assert!(ir.get(ids[1]).is_some());
        assert_eq!(ir.index_of(new_ids[1]), Some(4));
    }

    #[test]
    fn test_param_parse() {
        assert!(matches!(Param::parse("-1.5e-3"), Param::Literal { .. }));
        assert!(matches!(Param::parse("inf"), Param::Symbol(_)));
        assert!(matches!(Param::parse("2*pi"), Param::Expr(_)));
        assert_eq!(Param::literal(0.25).to_string(), "0.25");
    }
}
