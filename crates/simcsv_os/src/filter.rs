#![forbid(unsafe_code)]

//! External filter transform: tabular bytes in on stdin, tabular bytes out on
//! stdout. The filter may change or drop fields, never add them.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use simcsv_engines::registry::FieldRegistry;
use simcsv_engines::validator::{validate_record_set, RecordSetViolation};
use simcsv_kernel_contracts::field::RecordSet;
use simcsv_storage::tabular::{parse_record_set, serialize_record_set, TabularError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl FilterCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// First element is the program, the rest are its arguments.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// Same command with per-card arguments appended.
    pub fn with_extra_args<I: IntoIterator<Item = String>>(&self, extra: I) -> Self {
        let mut cmd = self.clone();
        cmd.args.extend(extra);
        cmd
    }
}

impl fmt::Display for FilterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unable to serialize record set for filter: {0}")]
    Serialize(#[source] TabularError),
    #[error("unable to start filter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("filter io failure: {0}")]
    Io(#[from] io::Error),
    #[error("filter exited with status {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("failed to parse filtered csv: {0}")]
    Parse(#[source] TabularError),
    #[error("filter must not add new fields, only change values or remove fields: {}", .names.join(", "))]
    AddedFields { names: Vec<String> },
    #[error("filtered record set is invalid: {0}")]
    Validation(RecordSetViolation),
}

/// Runs `cmd` over `set` and returns the filtered, re-validated record set.
pub fn apply_filter(
    registry: &FieldRegistry,
    set: &RecordSet,
    cmd: &FilterCommand,
) -> Result<RecordSet, FilterError> {
    info!(command = %cmd, "running filter");
    let input = serialize_record_set(set).map_err(FilterError::Serialize)?;

    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| FilterError::Spawn {
            program: cmd.program.clone(),
            source,
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "filter stdin unavailable"))?;
    // stdin is fed concurrently with draining stdout.
    let feeder = thread::spawn(move || {
        let res = stdin.write_all(&input);
        drop(stdin);
        res
    });
    let output = child.wait_with_output()?;
    match feeder.join() {
        Ok(Ok(())) => {}
        // A filter that exits without reading all of stdin is judged by its exit status.
        Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Ok(Err(e)) => return Err(FilterError::Io(e)),
        Err(_) => {
            return Err(FilterError::Io(io::Error::new(
                io::ErrorKind::Other,
                "filter stdin writer panicked",
            )))
        }
    }

    if !output.status.success() {
        let status = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(FilterError::Exit {
            status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let filtered = parse_record_set(&output.stdout).map_err(FilterError::Parse)?;
    check_no_added_fields(set, &filtered)?;
    validate_record_set(registry, &filtered).map_err(FilterError::Validation)?;
    debug!(
        before = set.len(),
        after = filtered.len(),
        "filter output accepted"
    );
    Ok(filtered)
}

/// Output names must be a subset of input names, with no extra rows.
fn check_no_added_fields(input: &RecordSet, output: &RecordSet) -> Result<(), FilterError> {
    let known: BTreeSet<&str> = input.names().map(|n| n.as_str()).collect();
    let mut added: Vec<String> = Vec::new();
    for name in output.names() {
        if !known.contains(name.as_str()) && !added.iter().any(|a| a == name.as_str()) {
            added.push(name.to_string());
        }
    }
    if added.is_empty() && output.len() > input.len() {
        let mut seen = BTreeSet::new();
        for name in output.names() {
            if !seen.insert(name.as_str()) && !added.iter().any(|a| a == name.as_str()) {
                added.push(name.to_string());
            }
        }
    }
    if added.is_empty() {
        Ok(())
    } else {
        Err(FilterError::AddedFields { names: added })
    }
}
