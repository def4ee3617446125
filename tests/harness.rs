use anyhow::{Context, Result, bail, ensure};
use std::path::Path;

use pyrun::compiler::CompileOptions;
use pyrun::{RunOptions, compile_source, run_source};
use test_support::{
    Case, CaseClass, detect_python_interpreter, load_cases, normalize_output, run_python_file,
};

const PROGRAMS_DIR: &str = "tests/programs";

fn parity_required() -> bool {
    std::env::var("PYTHON_PARITY_REQUIRED")
        .map(|value| value == "1")
        .unwrap_or(false)
}

fn check_case(case: &Case) -> Result<()> {
    case.validate()?;
    let source = case.source()?;
    match case.spec.class {
        CaseClass::RuntimeSuccess => {
            let expected = case
                .expected_stdout()?
                .with_context(|| format!("Missing stdout_file in {}", case.name))?;
            let execution = run_source(&source, RunOptions::default())
                .with_context(|| format!("Compiling {}", case.name))?;
            if let Err(report) = &execution.result {
                bail!("Case {} raised unexpectedly:\n{report}", case.name);
            }
            assert_eq!(
                normalize_output(&execution.stdout),
                normalize_output(&expected),
                "stdout mismatch for {}",
                case.name
            );
        }
        CaseClass::CompileError => {
            let fragment = case.expected_stderr_fragment()?;
            let error = match compile_source(&source, CompileOptions::default()) {
                Ok(_) => bail!("Expected {} to be rejected before execution", case.name),
                Err(error) => error.to_string(),
            };
            ensure!(
                error.contains(&fragment),
                "Expected compile error containing '{fragment}' in {}, got '{error}'",
                case.name
            );
        }
        CaseClass::UncaughtException => {
            let fragment = case.expected_stderr_fragment()?;
            let execution = run_source(&source, RunOptions::default())
                .with_context(|| format!("Compiling {}", case.name))?;
            let report = match execution.result {
                Ok(()) => bail!("Expected {} to raise", case.name),
                Err(report) => report.to_string(),
            };
            ensure!(
                report.contains(&fragment),
                "Expected traceback containing '{fragment}' in {}, got:\n{report}",
                case.name
            );
            if let Some(expected) = case.expected_stdout()? {
                assert_eq!(
                    normalize_output(&execution.stdout),
                    normalize_output(&expected),
                    "stdout before the exception mismatched for {}",
                    case.name
                );
            }
        }
    }
    Ok(())
}

#[test]
fn runs_programs() -> Result<()> {
    for case in load_cases(Path::new(PROGRAMS_DIR))? {
        check_case(&case)?;
    }
    Ok(())
}

#[test]
fn programs_match_cpython() -> Result<()> {
    let Some(interpreter) = detect_python_interpreter() else {
        ensure!(
            !parity_required(),
            "CPython parity required but no interpreter found. Set PYTHON or install python3."
        );
        eprintln!("Skipping CPython parity test: no PYTHON env or python3 interpreter found.");
        return Ok(());
    };

    for case in load_cases(Path::new(PROGRAMS_DIR))? {
        if case.spec.class != CaseClass::RuntimeSuccess || !case.spec.parity {
            continue;
        }
        let expected = case
            .expected_stdout()?
            .with_context(|| format!("Missing stdout_file in {}", case.name))?;
        let actual = run_python_file(&interpreter, &case.program_path)
            .with_context(|| format!("Running CPython for {}", case.name))?;
        assert_eq!(
            normalize_output(&actual),
            normalize_output(&expected),
            "CPython disagrees with the expected output of {}",
            case.name
        );
    }
    Ok(())
}
