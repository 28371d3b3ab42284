// SPDX-License-Identifier: Apache-2.0

//! Structured program model: an ordered list of named sections.
//!
//! The model owns document structure only. Section bodies are stored in their
//! normalized (comment-free, one statement per line) form so that structural
//! queries and relations can rely on well-formed input.

use log::trace;

use crate::lexer::{is_ident, normalize_body};
use crate::morph_error::{MorphError, Result};

pub const SECTION_MARKER: &str = "# SECTION";
pub const NAME_LABEL: &str = "# NAME:";

pub const PROLOGUE: &str = "PROLOGUE";
pub const PARAMETERS: &str = "PARAMETERS";
pub const CIRCUIT: &str = "CIRCUIT";
pub const USELESS_ENTITIES: &str = "USELESS_ENTITIES";
pub const OPTIMIZATION_PASSES: &str = "OPTIMIZATION_PASSES";
pub const OPTIMIZATION_LEVEL: &str = "OPTIMIZATION_LEVEL";
pub const MEASUREMENT: &str = "MEASUREMENT";
pub const PARAMETER_BINDING: &str = "PARAMETER_BINDING";
pub const QASM_CONVERSION: &str = "QASM_CONVERSION";
pub const EXECUTION: &str = "EXECUTION";

/// Canonical section names in canonical order.
pub const CANONICAL_SECTIONS: [&str; 10] = [
    PROLOGUE,
    PARAMETERS,
    CIRCUIT,
    USELESS_ENTITIES,
    OPTIMIZATION_PASSES,
    OPTIMIZATION_LEVEL,
    MEASUREMENT,
    PARAMETER_BINDING,
    QASM_CONVERSION,
    EXECUTION,
];

pub fn canonical_rank(name: &str) -> Option<usize> {
    CANONICAL_SECTIONS.iter().position(|s| *s == name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub body: String,
}

/// Where to place a new section relative to an existing one.
#[derive(Debug, Clone, Copy)]
pub enum Anchor<'a> {
    Before(&'a str),
    After(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    sections: Vec<Section>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a program from `(name, body)` pairs, normalizing each body.
    pub fn from_sections<N: Into<String>, B: AsRef<str>>(
        sections: impl IntoIterator<Item = (N, B)>,
    ) -> Result<Self> {
        let mut program = Program::new();
        for (name, body) in sections {
            program.push_section(name.into(), body.as_ref())?;
        }
        Ok(program)
    }

    fn push_section(&mut self, name: String, body: &str) -> Result<()> {
        if !is_ident(&name) {
            return Err(MorphError::Parse(format!(
                "invalid section name: {:?}",
                name
            )));
        }
        if self.contains(&name) {
            return Err(MorphError::MalformedProgram(format!(
                "duplicate section: {}",
                name
            )));
        }
        let body = normalize_body(body)?;
        self.sections.push(Section { name, body });
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.body.as_str())
    }

    /// Returns the body of `name` or a `MalformedProgram` error.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| MorphError::MalformedProgram(format!("missing section {}", name)))
    }

    /// Replaces the body of an existing section.
    pub fn set_section(&mut self, name: &str, body: &str) -> Result<()> {
        let idx = self
            .position(name)
            .ok_or_else(|| MorphError::MalformedProgram(format!("missing section {}", name)))?;
        self.sections[idx].body = normalize_body(body)?;
        Ok(())
    }

    /// Returns a new program with `name` inserted next to `anchor`; the
    /// relative order of all other sections is preserved.
    pub fn insert_section(&self, name: &str, body: &str, anchor: Anchor<'_>) -> Result<Program> {
        let (anchor_name, offset) = match anchor {
            Anchor::Before(a) => (a, 0),
            Anchor::After(a) => (a, 1),
        };
        let idx = self.position(anchor_name).ok_or_else(|| {
            MorphError::MalformedProgram(format!(
                "cannot insert {}: anchor section {} not present",
                name, anchor_name
            ))
        })?;
        self.insert_at(idx + offset, name, body)
    }

    /// Inserts `name` before the first existing section that comes later in
    /// the canonical order (or at the end).
    pub fn insert_section_canonical(&self, name: &str, body: &str) -> Result<Program> {
        let rank = canonical_rank(name).ok_or_else(|| {
            MorphError::MalformedProgram(format!("{} is not a canonical section", name))
        })?;
        let idx = self
            .sections
            .iter()
            .position(|s| canonical_rank(&s.name).map_or(false, |r| r > rank))
            .unwrap_or(self.sections.len());
        self.insert_at(idx, name, body)
    }

    fn insert_at(&self, idx: usize, name: &str, body: &str) -> Result<Program> {
        if self.contains(name) {
            return Err(MorphError::MalformedProgram(format!(
                "section {} already present",
                name
            )));
        }
        if !is_ident(name) {
            return Err(MorphError::Parse(format!("invalid section name: {:?}", name)));
        }
        let mut sections = self.sections.clone();
        sections.insert(
            idx,
            Section {
                name: name.to_string(),
                body: normalize_body(body)?,
            },
        );
        Ok(Program { sections })
    }
}

/// Splits program text into sections.
pub fn split(program_text: &str) -> Result<Program> {
    let mut program = Program::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut lines = program_text.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        if line.trim_end() == SECTION_MARKER {
            if let Some((name, body)) = current.take() {
                program.push_section(name, &body.join("\n"))?;
            }
            let label = match lines.next() {
                Some((_, l)) => l.trim(),
                None => {
                    return Err(MorphError::Parse(format!(
                        "line {}: section marker without a name label",
                        idx + 1
                    )))
                }
            };
            let name = label.strip_prefix(NAME_LABEL).ok_or_else(|| {
                MorphError::Parse(format!(
                    "line {}: expected '{} <SECTION_NAME>', got {:?}",
                    idx + 2,
                    NAME_LABEL,
                    label
                ))
            })?;
            trace!("split: section {} at line {}", name.trim(), idx + 1);
            current = Some((name.trim().to_string(), Vec::new()));
            continue;
        }
        match current.as_mut() {
            Some((_, body)) => body.push(line),
            None => {
                if !line.trim().is_empty() {
                    return Err(MorphError::Parse(format!(
                        "line {}: text before the first section marker",
                        idx + 1
                    )));
                }
            }
        }
    }
    if let Some((name, body)) = current.take() {
        program.push_section(name, &body.join("\n"))?;
    }
    Ok(program)
}

/// Re-emits the marker and label of every section followed by its body.
pub fn reconstruct(program: &Program) -> String {
    let mut out = String::new();
    for (i, section) in program.sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(SECTION_MARKER);
        out.push('\n');
        out.push_str(NAME_LABEL);
        out.push(' ');
        out.push_str(&section.name);
        out.push('\n');
        if !section.body.is_empty() {
            out.push_str(&section.body);
            out.push('\n');
        }
    }
    out
}

/// Canonical comment-free form of `program_text`.
pub fn normalize(program_text: &str) -> Result<String> {
    Ok(reconstruct(&split(program_text)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RAW: &str = "\
# SECTION
# NAME: PROLOGUE
# implementation note that must go away
from qiskit import QuantumCircuit

# SECTION
# NAME: CIRCUIT
qr = QuantumRegister(2, name='qr')  # two qubits
cr = ClassicalRegister(2, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
qc.append(CXGate(),
          qargs=[qr[0], qr[1]], cargs=[])

# SECTION
# NAME: EXECUTION
RESULT = counts
";

    const NORMALIZED: &str = "\
# SECTION
# NAME: PROLOGUE
from qiskit import QuantumCircuit

# SECTION
# NAME: CIRCUIT
qr = QuantumRegister(2, name='qr')
cr = ClassicalRegister(2, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
qc.append(CXGate(), qargs=[qr[0], qr[1]], cargs=[])

# SECTION
# NAME: EXECUTION
RESULT = counts
";

    #[test]
    fn test_split_reads_names_in_order() {
        let p = split(RAW).unwrap();
        assert_eq!(p.section_names(), vec!["PROLOGUE", "CIRCUIT", "EXECUTION"]);
        assert_eq!(p.get("EXECUTION"), Some("RESULT = counts"));
    }

    #[test]
    fn test_reconstruct_split_equals_normalized() {
        let p = split(RAW).unwrap();
        assert_eq!(reconstruct(&p), NORMALIZED);
        assert_eq!(normalize(RAW).unwrap(), NORMALIZED);
        assert_eq!(split(&reconstruct(&p)).unwrap(), p);
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize(RAW).unwrap();
        assert_eq!(normalize(&once).unwrap(), once);
    }

    #[test]
    fn test_missing_label_is_parse_error() {
        let text = "# SECTION\nqc = 1\n";
        assert!(matches!(split(text), Err(MorphError::Parse(_))));
    }

    #[test]
    fn test_text_before_first_marker_is_error() {
        let text = "x = 1\n# SECTION\n# NAME: CIRCUIT\n";
        assert!(split(text).is_err());
    }

    #[test]
    fn test_duplicate_section_is_malformed() {
        let text = "# SECTION\n# NAME: CIRCUIT\n# SECTION\n# NAME: CIRCUIT\n";
        assert!(matches!(split(text), Err(MorphError::MalformedProgram(_))));
    }

    #[test]
    fn test_empty_section_round_trips() {
        let text = "# SECTION\n# NAME: PROLOGUE\n\n# SECTION\n# NAME: CIRCUIT\nx = 1\n";
        let p = split(text).unwrap();
        assert_eq!(p.get("PROLOGUE"), Some(""));
        assert_eq!(split(&reconstruct(&p)).unwrap(), p);
    }

    #[test]
    fn test_insert_section_preserves_order() {
        let p = split(RAW).unwrap();
        let q = p
            .insert_section("QASM_CONVERSION", "qc = roundtrip(qc)", Anchor::Before(EXECUTION))
            .unwrap();
        assert_eq!(
            q.section_names(),
            vec!["PROLOGUE", "CIRCUIT", "QASM_CONVERSION", "EXECUTION"]
        );
        let r = q
            .insert_section("USELESS_ENTITIES", "", Anchor::After(CIRCUIT))
            .unwrap();
        assert_eq!(
            r.section_names(),
            vec![
                "PROLOGUE",
                "CIRCUIT",
                "USELESS_ENTITIES",
                "QASM_CONVERSION",
                "EXECUTION"
            ]
        );
        assert!(p.insert_section("X", "", Anchor::After("NOPE")).is_err());
        assert!(p.insert_section("CIRCUIT", "", Anchor::After(PROLOGUE)).is_err());
    }

    #[test]
    fn test_insert_section_canonical() {
        let p = split(RAW).unwrap();
        let q = p.insert_section_canonical(PARAMETERS, "p = Parameter('p')").unwrap();
        assert_eq!(
            q.section_names(),
            vec!["PROLOGUE", "PARAMETERS", "CIRCUIT", "EXECUTION"]
        );
        let r = q.insert_section_canonical(PARAMETER_BINDING, "").unwrap();
        assert_eq!(
            r.section_names(),
            vec![
                "PROLOGUE",
                "PARAMETERS",
                "CIRCUIT",
                "PARAMETER_BINDING",
                "EXECUTION"
            ]
        );
    }
}
