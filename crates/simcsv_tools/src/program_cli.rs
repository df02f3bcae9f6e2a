#![forbid(unsafe_code)]

//! `simcsv` command line: argument model and the `program` flow.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use simcsv_engines::pin_vault::PinVault;
use simcsv_engines::registry::FieldRegistry;
use simcsv_os::card_wait::{wait_for_card, CancelToken, CardWaitConfig};
use simcsv_os::credential::PinSource;
use simcsv_os::driver::spawn_execute;
use simcsv_os::filter::FilterCommand;
use simcsv_os::provision::{
    FieldErrorPolicy, PassInput, PassReport, ProvisionConfig, ProvisionError, ProvisionRuntime,
};
use simcsv_storage::card_image::{CardImageReader, SimulatedCard};
use simcsv_storage::tabular::{read_record_set_file, write_report, write_report_file};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::logging::{DEFAULT_LOG_FILE, DEFAULT_LOG_LEVEL};

pub const WRITE_PROMPT: &str = "Sure you want to write? [y/N]";

#[derive(Parser, Debug)]
#[command(name = "simcsv", version, about = "Verified SIM card field provisioning from CSV")]
pub struct Cli {
    /// Log file, appended to on every run
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare a card against a CSV file and optionally write the differences
    Program(ProgramArgs),
    /// Print every field name a CSV file may use
    ListFieldNames,
    /// Manage the encrypted per-IMSI ADM PIN vault
    Vault {
        #[arg(value_parser = ["set", "has", "del", "ls"])]
        subcommand: String,
        imsi: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("pin_source")
        .args(["pin_adm", "pin_adm_json", "pin_from_vault"])
        .multiple(false)
))]
pub struct ProgramArgs {
    /// Field file with FieldName,FieldValue columns
    pub csv_file: PathBuf,

    /// JSON card image standing in for the inserted card; repeat with
    /// --multiple to feed several cards in order
    #[arg(long, action = ArgAction::Append, required = true)]
    pub card_image: Vec<PathBuf>,

    /// Keep programming cards until none is left or the wait is interrupted
    #[arg(long)]
    pub multiple: bool,

    /// Write differing fields; without it the run is read-only
    #[arg(long)]
    pub write: bool,

    /// ADM PIN, ASCII or 0x-prefixed hex
    #[arg(long)]
    pub pin_adm: Option<String>,

    /// JSON map of IMSI to ADM PIN
    #[arg(long)]
    pub pin_adm_json: Option<PathBuf>,

    /// Look the ADM PIN up in the PIN vault by the card's IMSI
    #[arg(long)]
    pub pin_from_vault: bool,

    #[arg(long)]
    pub skip_write_prompt: bool,

    /// Log a caret line under every differing character
    #[arg(long)]
    pub show_diff: bool,

    /// Keep going after a field fails instead of stopping the pass
    #[arg(long)]
    pub continue_on_error: bool,

    /// Filter command and its arguments; receives the CSV on stdin
    #[arg(long, num_args = 1.., value_name = "CMD")]
    pub filter: Option<Vec<String>>,

    /// Prompt for extra filter arguments before the pass
    #[arg(long, requires = "filter")]
    pub ask_filter_args: bool,

    /// Write the audit table here instead of stdout
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Store the card state back into the image after a write pass
    #[arg(long)]
    pub save_image: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Failed(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Failed(_) => 1,
        }
    }
}

fn usage(msg: impl Into<String>) -> CliError {
    CliError::Usage(msg.into())
}

fn failed(msg: impl ToString) -> CliError {
    CliError::Failed(msg.to_string())
}

/// Operator interaction, swapped out in tests.
pub trait Prompt {
    fn is_interactive(&self) -> bool;
    fn secret(&mut self, prompt: &str) -> io::Result<String>;
    fn line(&mut self, prompt: &str) -> io::Result<String>;
}

#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn is_interactive(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn secret(&mut self, prompt: &str) -> io::Result<String> {
        rpassword::prompt_password(prompt)
    }

    fn line(&mut self, prompt: &str) -> io::Result<String> {
        eprint!("{prompt} ");
        io::stderr().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramOutcome {
    Completed { success: bool },
    WriteDeclined,
}

impl ProgramOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            ProgramOutcome::Completed { success: false } => 1,
            _ => 0,
        }
    }
}

fn check_extension(path: &Path, ext: &str, what: &str) -> Result<(), CliError> {
    if path.extension().and_then(|e| e.to_str()) != Some(ext) {
        return Err(usage(format!(
            "{what} '{}' must be a .{ext} file",
            path.display()
        )));
    }
    if !path.exists() {
        return Err(usage(format!("{what} '{}' does not exist", path.display())));
    }
    Ok(())
}

fn pin_source(args: &ProgramArgs, prompt: &mut dyn Prompt) -> Result<Option<PinSource>, CliError> {
    if let Some(pin) = &args.pin_adm {
        return Ok(Some(PinSource::Direct(pin.clone())));
    }
    if let Some(path) = &args.pin_adm_json {
        check_extension(path, "json", "PIN map")?;
        return PinSource::load_imsi_map(path)
            .map(Some)
            .map_err(|e| usage(e.to_string()));
    }
    if args.pin_from_vault {
        return Ok(Some(PinSource::Vault(PinVault::default_local())));
    }
    if !args.write {
        return Ok(None);
    }
    if !prompt.is_interactive() {
        return Err(usage(
            "--write needs --pin-adm, --pin-adm-json or --pin-from-vault when stdin is not a terminal",
        ));
    }
    let pin = prompt.secret("ADM PIN: ").map_err(failed)?;
    if pin.trim().is_empty() {
        return Err(usage("ADM PIN must not be empty"));
    }
    Ok(Some(PinSource::Direct(pin.trim().to_string())))
}

fn filter_command(
    args: &ProgramArgs,
    prompt: &mut dyn Prompt,
) -> Result<Option<FilterCommand>, CliError> {
    let Some(argv) = &args.filter else {
        return Ok(None);
    };
    let cmd = FilterCommand::from_argv(argv).ok_or_else(|| usage("--filter needs a command"))?;
    if !args.ask_filter_args {
        return Ok(Some(cmd));
    }
    let answer = prompt
        .line(&format!("Extra arguments for '{cmd}' (empty keeps it as is):"))
        .map_err(failed)?;
    if answer.trim().is_empty() {
        return Ok(Some(cmd));
    }
    let extra = shlex::split(&answer)
        .ok_or_else(|| usage(format!("unbalanced quotes in filter arguments: {answer}")))?;
    Ok(Some(cmd.with_extra_args(extra)))
}

fn confirm_write(args: &ProgramArgs, prompt: &mut dyn Prompt) -> Result<bool, CliError> {
    if !args.write || args.skip_write_prompt {
        return Ok(true);
    }
    let answer = prompt.line(WRITE_PROMPT).map_err(failed)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

pub fn provision_config(args: &ProgramArgs) -> ProvisionConfig {
    let mut config = ProvisionConfig::mvp_v1(!args.write);
    config.engine.report_differences = args.show_diff;
    if args.continue_on_error {
        config.field_error_policy = FieldErrorPolicy::Continue;
    }
    config
}

fn pass_failed(e: ProvisionError) -> CliError {
    error!(reason_code = %e.reason_code(), error = %e, "provisioning pass failed");
    failed(e)
}

/// With --multiple every card gets its own report file: `report.csv` becomes
/// `report-1.csv`, `report-2.csv`, and so on.
fn report_path(path: &Path, card_number: usize, multiple: bool) -> PathBuf {
    if !multiple {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{card_number}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{card_number}"),
    };
    path.with_file_name(name)
}

/// Runs `simcsv program` against one card image, or against each queued
/// image in turn with --multiple. Per card: filter arguments, the pre-write
/// check, the write prompt, then the pass. The audit table goes to
/// `--report` or, without it, to `out`.
pub fn run_program(
    args: &ProgramArgs,
    registry: &'static FieldRegistry,
    prompt: &mut dyn Prompt,
    out: &mut dyn Write,
) -> Result<ProgramOutcome, CliError> {
    check_extension(&args.csv_file, "csv", "CSV file")?;
    if args.card_image.len() > 1 && !args.multiple {
        return Err(usage("more than one --card-image needs --multiple"));
    }
    let pin = pin_source(args, prompt)?;
    let record_set = read_record_set_file(&args.csv_file).map_err(failed)?;
    info!(path = %args.csv_file.display(), fields = record_set.len(), "CSV loaded");

    let cards = args
        .card_image
        .iter()
        .map(|path| SimulatedCard::load(path))
        .collect::<Result<Vec<_>, _>>()
        .map_err(failed)?;
    let mut reader = CardImageReader::queued(cards);
    let wait = CardWaitConfig {
        timeout: Some(Duration::from_secs(10)),
        ..CardWaitConfig::mvp_v1()
    };
    let cancel = CancelToken::new();
    let config = provision_config(args);
    let runtime = ProvisionRuntime::new(config, registry);

    let mut card_number = 0;
    loop {
        let Some(mut card) = wait_for_card(&mut reader, &wait, &cancel).map_err(failed)? else {
            if card_number == 0 {
                return Err(failed("no card inserted"));
            }
            break;
        };
        card_number += 1;

        let input = PassInput {
            record_set: record_set.clone(),
            filter: filter_command(args, prompt)?,
            pin: pin.clone(),
        };
        let prepared = runtime.prepare(&mut card, &input).map_err(pass_failed)?;
        if !confirm_write(args, prompt)? {
            warn!(card = card_number, "write declined by operator");
            return Ok(ProgramOutcome::WriteDeclined);
        }

        let handle = spawn_execute(card, config, registry, prepared);
        for p in handle.progress() {
            eprintln!("[{}/{}] {}", p.completed, p.total, p.field);
        }
        let (card, result) = handle.join().map_err(failed)?;
        let report = result.map_err(pass_failed)?;

        emit_report(args, &report, card_number, out)?;
        if args.save_image && args.write {
            if let Some(path) = card.source() {
                card.to_image().save(path).map_err(failed)?;
                info!(path = %path.display(), "card image saved");
            }
        }
        for failure in &report.failures {
            eprintln!("{}: {}", failure.error.field(), failure.error);
        }
        if !report.is_success() {
            return Ok(ProgramOutcome::Completed { success: false });
        }
        if !args.multiple || reader.remaining() == 0 {
            break;
        }
        info!(card = card_number, "eject the SIM card and insert the next one");
    }
    Ok(ProgramOutcome::Completed { success: true })
}

fn emit_report(
    args: &ProgramArgs,
    report: &PassReport,
    card_number: usize,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match &args.report {
        Some(path) => {
            let path = report_path(path, card_number, args.multiple);
            write_report_file(&path, &report.rows).map_err(failed)?;
            info!(path = %path.display(), "report written");
        }
        None => write_report(out, &report.rows).map_err(failed)?,
    }
    Ok(())
}

pub fn list_field_names(registry: &FieldRegistry) -> String {
    registry.names().collect::<Vec<_>>().join("\n")
}
