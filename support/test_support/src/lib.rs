use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// Runs to completion; stdout must match.
    RuntimeSuccess,
    /// Rejected before execution by the lexer, parser or compiler.
    CompileError,
    /// An exception escapes the module.
    UncaughtException,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    pub exit_code: i32,
    pub stdout_file: Option<String>,
    pub stderr_contains_file: Option<String>,
}

fn parity_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    /// Whether CPython must print the same stdout.
    #[serde(default = "parity_by_default")]
    pub parity: bool,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    pub fn source(&self) -> Result<String> {
        fs::read_to_string(&self.program_path)
            .with_context(|| format!("Reading {}", self.program_path.display()))
    }

    /// The expected stdout, required for `runtime_success` cases.
    pub fn expected_stdout(&self) -> Result<Option<String>> {
        match self.spec.expected.stdout_file.as_deref() {
            Some(file) => self.read_text(file).map(Some),
            None => Ok(None),
        }
    }

    /// The fragment stderr must contain, required for failing cases.
    pub fn expected_stderr_fragment(&self) -> Result<String> {
        let file = self
            .spec
            .expected
            .stderr_contains_file
            .as_deref()
            .with_context(|| format!("Missing stderr_contains_file in {}", self.name))?;
        Ok(self.read_text(file)?.trim().to_string())
    }

    /// Checks that the declared exit code agrees with the case class.
    pub fn validate(&self) -> Result<()> {
        let expected_exit = match self.spec.class {
            CaseClass::RuntimeSuccess => 0,
            CaseClass::CompileError | CaseClass::UncaughtException => 1,
        };
        ensure!(
            self.spec.expected.exit_code == expected_exit,
            "Case {} expected exit code must be {expected_exit} for {:?}",
            self.name,
            self.spec.class
        );
        match self.spec.class {
            CaseClass::RuntimeSuccess => ensure!(
                self.spec.expected.stdout_file.is_some(),
                "Missing stdout_file in {}",
                self.name
            ),
            _ => ensure!(
                self.spec.expected.stderr_contains_file.is_some(),
                "Missing stderr_contains_file in {}",
                self.name
            ),
        }
        Ok(())
    }
}

pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let program_path = path.join("program.py");
        ensure!(
            program_path.exists(),
            "Missing program.py for case {}",
            path.display()
        );

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;

        cases.push(Case {
            name: case_name,
            dir: path,
            program_path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

pub fn run_python_file(interpreter: &str, path: &Path) -> Result<String> {
    let output = Command::new(interpreter)
        .arg(path)
        .output()
        .with_context(|| format!("Running python file {}", path.display()))?;
    ensure!(
        output.status.success(),
        "python failed for {}: {}",
        path.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn run_python_startup(interpreter: &str) -> Result<()> {
    let status = Command::new(interpreter)
        .arg("-c")
        .arg("pass")
        .status()
        .with_context(|| format!("Running '{interpreter} -c pass'"))?;
    ensure!(status.success(), "python startup command failed");
    Ok(())
}

/// `$PYTHON`, else `python3`, else `python`, if one of them starts.
pub fn detect_python_interpreter() -> Option<String> {
    if let Ok(python) = std::env::var("PYTHON")
        && run_python_startup(&python).is_ok()
    {
        return Some(python);
    }
    ["python3", "python"]
        .into_iter()
        .find(|candidate| run_python_startup(candidate).is_ok())
        .map(str::to_string)
}
