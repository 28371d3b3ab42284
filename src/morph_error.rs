// SPDX-License-Identifier: Apache-2.0

/// Error type shared by every layer of the library.
///
/// The variants follow the failure taxonomy of the fuzzing loop: parse and
/// structure problems are attributable to the program text, execution and
/// timeout problems to the pipeline under test, detector problems to
/// degenerate statistical input.
#[derive(Debug)]
pub enum MorphError {
    /// The program text could not be lexed or split into sections.
    Parse(String),
    /// The program violates a structural assumption a relation relies on.
    MalformedProgram(String),
    /// Paired registers (or similar coupled declarations) disagree.
    StructuralMismatch(String),
    /// The pipeline under test failed or produced unparseable output.
    Execution(String),
    /// A child process exceeded its wall-clock budget and was killed.
    Timeout(String),
    /// The statistical test could not be evaluated on the given input.
    Detector(String),
    /// Invalid or missing configuration.
    Config(String),
    Io(std::io::Error),
    Serde(String),
}

impl MorphError {
    /// Short stable tag used in persisted records.
    pub fn kind_str(&self) -> &'static str {
        match self {
            MorphError::Parse(_) => "parse",
            MorphError::MalformedProgram(_) => "malformed_program",
            MorphError::StructuralMismatch(_) => "structural_mismatch",
            MorphError::Execution(_) => "execution",
            MorphError::Timeout(_) => "timeout",
            MorphError::Detector(_) => "detector",
            MorphError::Config(_) => "config",
            MorphError::Io(_) => "io",
            MorphError::Serde(_) => "serde",
        }
    }
}

impl std::fmt::Display for MorphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MorphError::Parse(msg) => write!(f, "parse error: {}", msg),
            MorphError::MalformedProgram(msg) => write!(f, "malformed program: {}", msg),
            MorphError::StructuralMismatch(msg) => write!(f, "structural mismatch: {}", msg),
            MorphError::Execution(msg) => write!(f, "execution failure: {}", msg),
            MorphError::Timeout(msg) => write!(f, "timeout: {}", msg),
            MorphError::Detector(msg) => write!(f, "detector failure: {}", msg),
            MorphError::Config(msg) => write!(f, "configuration error: {}", msg),
            MorphError::Io(e) => write!(f, "i/o error: {}", e),
            MorphError::Serde(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for MorphError {}

impl From<std::io::Error> for MorphError {
    fn from(e: std::io::Error) -> Self {
        MorphError::Io(e)
    }
}

impl From<serde_json::Error> for MorphError {
    fn from(e: serde_json::Error) -> Self {
        MorphError::Serde(e.to_string())
    }
}

impl From<toml::de::Error> for MorphError {
    fn from(e: toml::de::Error) -> Self {
        MorphError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MorphError>;
