#![forbid(unsafe_code)]

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;

use clap::Parser;
use simcsv_engines::pin_vault::PinVault;
use simcsv_engines::registry::FieldRegistry;
use simcsv_tools::logging;
use simcsv_tools::program_cli::{list_field_names, run_program, Cli, Command, TerminalPrompt};
use simcsv_tools::vault_cli::{execute_vault_command, parse_imsi, VAULT_USAGE};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init(&cli.log_level, &cli.log_file) {
        eprintln!("unable to open log file '{}': {err}", cli.log_file.display());
        return ExitCode::from(2);
    }

    let registry = FieldRegistry::standard();
    match cli.command {
        Command::Program(args) => {
            let stdout = io::stdout();
            match run_program(&args, registry, &mut TerminalPrompt, &mut stdout.lock()) {
                Ok(outcome) => exit(outcome.exit_code()),
                Err(err) => {
                    eprintln!("{err}");
                    exit(err.exit_code())
                }
            }
        }
        Command::ListFieldNames => {
            println!("{}", list_field_names(registry));
            ExitCode::SUCCESS
        }
        Command::Vault { subcommand, imsi } => match run_vault(&subcommand, imsi.as_deref()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                ExitCode::from(2)
            }
        },
    }
}

fn exit(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}

fn run_vault(subcommand: &str, imsi: Option<&str>) -> Result<(), String> {
    let pin = if subcommand == "set" {
        let raw = imsi.ok_or_else(|| VAULT_USAGE.to_string())?;
        let parsed = parse_imsi(raw)?;
        Some(read_pin(parsed.as_str())?)
    } else {
        None
    };

    let vault = PinVault::default_local();
    let output = execute_vault_command(&vault, subcommand, imsi, pin.as_deref())?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn read_pin(imsi: &str) -> Result<String, String> {
    let value = if io::stdin().is_terminal() {
        rpassword::prompt_password(format!("ADM PIN for IMSI {imsi}: ")).map_err(|e| e.to_string())?
    } else {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| e.to_string())?;
        input
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("ADM PIN must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}
