// SPDX-License-Identifier: Apache-2.0

use std::process::{Command, Output};

use pretty_assertions::assert_eq;

const PROGRAM: &str = "\
# SECTION
# NAME: PROLOGUE
from qiskit import QuantumRegister, ClassicalRegister, QuantumCircuit, Aer, transpile, execute
from qiskit.circuit.library.standard_gates import *

# SECTION
# NAME: CIRCUIT
qr = QuantumRegister(2, name='qr')
cr = ClassicalRegister(2, name='cr')
qc = QuantumCircuit(qr, cr, name='qc')
# the only gate
qc.append(SwapGate(), qargs=[qr[1], qr[0]], cargs=[])

# SECTION
# NAME: OPTIMIZATION_LEVEL
qc = transpile(qc, basis_gates=None, optimization_level=1, coupling_map=None)

# SECTION
# NAME: MEASUREMENT
qc.measure(qr, cr)

# SECTION
# NAME: EXECUTION
backend_0001 = Aer.get_backend('aer_simulator')
counts = execute(qc, backend=backend_0001,
                 shots=100).result().get_counts(qc)
RESULT = counts
";

fn driver() -> Command {
    Command::new(env!("CARGO_BIN_EXE_qmorph-driver"))
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_normalize_subcommand() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("program.py");
    std::fs::write(&path, PROGRAM).unwrap();
    let output = driver()
        .arg("normalize")
        .arg(path.to_str().unwrap())
        .output()
        .expect("Failed to run qmorph-driver");
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("# the only gate"));
    assert!(stdout.contains(
        "counts = execute(qc, backend=backend_0001, shots=100).result().get_counts(qc)"
    ));

    // Normalizing the canonical form changes nothing.
    let canonical = temp_dir.path().join("canonical.py");
    std::fs::write(&canonical, stdout.as_bytes()).unwrap();
    let again = driver()
        .arg("normalize")
        .arg(canonical.to_str().unwrap())
        .output()
        .unwrap();
    assert_success(&again);
    assert_eq!(String::from_utf8_lossy(&again.stdout), stdout);
}

#[test]
fn test_derive_decomposes_swap() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("program.py");
    let metadata_path = temp_dir.path().join("meta.json");
    std::fs::write(&path, PROGRAM).unwrap();
    let output = driver()
        .arg("derive")
        .arg(path.to_str().unwrap())
        .arg("--relation")
        .arg("DecomposeTwoQubitGate")
        .arg("--seed")
        .arg("7")
        .arg("--metadata_out")
        .arg(metadata_path.to_str().unwrap())
        .output()
        .unwrap();
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("SwapGate"));
    assert_eq!(stdout.matches("CXGate()").count(), 3);

    let metadata: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&metadata_path).unwrap()).unwrap();
    assert_eq!(metadata["relation"], "DecomposeTwoQubitGate");
    assert_eq!(metadata["reconciliation"]["kind"], "identity");
}

#[test]
fn test_derive_reports_inapplicable_relation() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("program.py");
    // No self-inverse pairs to cancel.
    std::fs::write(&path, PROGRAM).unwrap();
    let output = driver()
        .arg("derive")
        .arg(path.to_str().unwrap())
        .arg("--relation")
        .arg("CancelConsecutiveGates")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not apply"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_relation_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("program.py");
    std::fs::write(&path, PROGRAM).unwrap();
    let output = driver()
        .arg("derive")
        .arg(path.to_str().unwrap())
        .arg("--relation")
        .arg("FlipEverything")
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_relations_subcommand() {
    let output = driver().arg("relations").output().unwrap();
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let names: Vec<&str> = stdout.lines().collect();
    assert_eq!(names.len(), 14);
    assert!(names.contains(&"ChangeQubitOrder"));
    assert!(names.contains(&"RunIndependentPartitions"));
}

#[test]
fn test_detect_batch_subcommand() {
    let input = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    std::fs::write(input.path().join("x.a.json"), r#"{"00": 50, "11": 50}"#).unwrap();
    std::fs::write(input.path().join("x.b.json"), r#"{"00": 50, "11": 50}"#).unwrap();
    std::fs::write(input.path().join("y.a.json"), r#"{"0": 100}"#).unwrap();
    std::fs::write(input.path().join("y.b.json"), r#"{"1": 100}"#).unwrap();
    let output = driver()
        .arg("detect-batch")
        .arg(input.path().to_str().unwrap())
        .arg("--output_dir")
        .arg(output_dir.path().to_str().unwrap())
        .arg("--threads")
        .arg("2")
        .output()
        .unwrap();
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("divergent"));
    assert!(output_dir.path().join("x.verdict.json").exists());
    assert!(output_dir.path().join("y.verdict.json").exists());
}

#[test]
fn test_fuzz_subcommand_with_shell_executor() {
    let temp_dir = tempfile::tempdir().unwrap();
    let out = temp_dir.path().join("out");
    let config = temp_dir.path().join("campaign.toml");
    std::fs::write(
        &config,
        format!(
            "seed = 3\noutput_dir = '{}'\n\
             [budget]\niterations = 100\n\
             [executor]\ninterpreter = 'sh'\nepilogue = ''\ntimeout_secs = 10\n",
            out.display()
        ),
    )
    .unwrap();
    let output = driver()
        .arg("fuzz")
        .arg("--config")
        .arg(config.to_str().unwrap())
        .arg("--iterations")
        .arg("2")
        .output()
        .unwrap();
    assert_success(&output);
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["iterations"], 2);
    let data = std::fs::read_to_string(out.join("data.jsonl")).unwrap();
    assert_eq!(data.lines().count(), 2);
}

#[test]
fn test_fuzz_rejects_bad_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = temp_dir.path().join("campaign.toml");
    std::fs::write(&config, "output_dir = 'out'\n").unwrap();
    let output = driver()
        .arg("fuzz")
        .arg("--config")
        .arg(config.to_str().unwrap())
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid campaign config"), "stderr: {}", stderr);
    assert!(stderr.starts_with("qmorph-driver fuzz: "), "stderr: {}", stderr);
    assert!(stderr.contains(config.to_str().unwrap()), "stderr: {}", stderr);
}
