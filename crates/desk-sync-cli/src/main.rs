mod commands;
mod logging;
mod progress;

use std::fs::File;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{TimeZone, Utc};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{AccessAction, Cli, Commands};
use desk_sync_core::credentials::CredentialSource;
use desk_sync_core::storage::models::Computer;
use desk_sync_core::{
    jobs, AppConfig, CancelToken, ComputerLocks, CredentialResolver, Database, SyncKind,
};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let args = Cli::parse();
    let _guard = logging::init_logger(matches!(args.command, Some(Commands::Daemon)));

    let config = match desk_sync_core::config::load_configuration()
        .map_err(desk_sync_core::Error::from)
        .and_then(|config| config.validate().map(|_| config))
    {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::Daemon) => run_daemon(config),
        Some(Commands::SyncUsers) => run_sync(&config, SyncKind::Users),
        Some(Commands::SyncComputers) => run_sync(&config, SyncKind::Computers),
        Some(Commands::ImportUser { dn }) => run_import_user(&config, &dn),
        Some(Commands::Scan { computer }) => run_scan(&config, computer.as_deref()),
        Some(Commands::Sweep { days }) => run_sweep(config, days),
        Some(Commands::Access { action }) => run_access(&config, action),
        Some(Commands::Report { output }) => run_report(&config, output.as_deref()),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn manual_cancel_token(config: &AppConfig) -> CancelToken {
    CancelToken::with_timeout(Duration::from_secs(config.schedule.job_timeout_secs))
}

fn run_daemon(config: AppConfig) -> anyhow::Result<()> {
    config.validate_for_daemon()?;
    let tick = Duration::from_millis(config.schedule.tick_millis);
    let mut scheduler = jobs::build_scheduler(Arc::new(config));
    // Runs until the process is killed.
    scheduler.run(tick, &CancelToken::new());
    Ok(())
}

fn run_sync(config: &AppConfig, kind: SyncKind) -> anyhow::Result<()> {
    let reporter = CliReporter::new();
    let run = jobs::run_sync(config, kind, &reporter, &manual_cancel_token(config))?;
    info!(
        "{} created, {} updated, {} unchanged, {} failed",
        format!("{}", run.created).green(),
        format!("{}", run.updated).cyan(),
        run.skipped,
        format!("{}", run.failed.len()).red(),
    );
    Ok(())
}

fn run_import_user(config: &AppConfig, dn: &str) -> anyhow::Result<()> {
    let run = jobs::run_import_user(config, dn)?;
    match run.failed.first() {
        Some(failure) => Err(anyhow!("{}", failure.reason)),
        None => {
            let verb = if run.created > 0 { "Imported" } else { "Refreshed" };
            info!("{} {}", verb, dn.green());
            Ok(())
        }
    }
}

fn run_scan(config: &AppConfig, computer: Option<&str>) -> anyhow::Result<()> {
    config.validate_for_daemon()?;
    let reporter = CliReporter::new();
    let run = jobs::run_scan(
        config,
        computer,
        &ComputerLocks::new(),
        &reporter,
        &manual_cancel_token(config),
    )?;
    info!(
        "{} computers scanned, {} unreachable",
        format!("{}", run.updated).green(),
        format!("{}", run.failed.len()).red(),
    );
    Ok(())
}

fn run_sweep(mut config: AppConfig, days: Option<u64>) -> anyhow::Result<()> {
    if let Some(days) = days {
        config.retention.max_age_days = days;
    }
    let reporter = CliReporter::new();
    let removed = jobs::run_sweep(&config, &reporter)?;
    info!(
        "{} records older than {} days removed",
        format!("{}", removed).green(),
        config.retention.max_age_days
    );
    Ok(())
}

fn find_computer(db: &Database, name: &str) -> anyhow::Result<Computer> {
    db.find_computer_by_name(name)?
        .ok_or_else(|| anyhow!("unknown computer '{}'", name))
}

fn run_access(config: &AppConfig, action: AccessAction) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path))?;

    match action {
        AccessAction::Set {
            computer,
            username,
            password,
        } => {
            let target = find_computer(&db, &computer)?;
            db.set_computer_access(target.id, username.as_deref(), password.as_deref())?;
            info!("Access override saved for {}", target.name.green());
        }
        AccessAction::Clear { computer } => {
            let target = find_computer(&db, &computer)?;
            if db.clear_computer_access(target.id)? {
                info!("Access override removed for {}", target.name.green());
            } else {
                info!("{} had no access override", target.name);
            }
        }
        AccessAction::Show { computer } => {
            let target = find_computer(&db, &computer)?;
            let (credentials, source) =
                CredentialResolver::new(&db, &config.admin).resolve_with_source(&target)?;
            let source = match source {
                CredentialSource::AccessOverride => "access override".cyan(),
                CredentialSource::GlobalAdmin => "global admin account".normal(),
            };
            println!("{} connects as {} ({})", target.name, credentials.username.green(), source);
        }
    }
    Ok(())
}

fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn run_report(config: &AppConfig, output: Option<&str>) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path))?;

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path).with_context(|| format!("creating {}", path))?),
        None => Box::new(io::stdout()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record([
        "name",
        "dns_host_name",
        "operating_system",
        "reachable",
        "last_scanned_at",
        "last_error",
        "in_directory",
        "drives",
    ])?;

    let computers = db.list_computers()?;
    for computer in &computers {
        let drives: Vec<String> = db
            .get_drives_for_computer(computer.id)?
            .into_iter()
            .map(|d| if d.is_network { format!("{}={}", d.name, d.path) } else { d.name })
            .collect();
        let reachable = match computer.reachable {
            Some(true) => "yes",
            Some(false) => "no",
            None => "",
        };
        let scanned_at = format_timestamp(computer.last_scanned_at);
        let drives = drives.join(";");

        writer.write_record([
            computer.name.as_str(),
            computer.dns_host_name.as_deref().unwrap_or(""),
            computer.operating_system.as_deref().unwrap_or(""),
            reachable,
            scanned_at.as_str(),
            computer.last_error.as_deref().unwrap_or(""),
            if computer.absent_from_directory { "no" } else { "yes" },
            drives.as_str(),
        ])?;
    }
    writer.flush()?;

    if output.is_some() {
        info!("{} computers written", format!("{}", computers.len()).green());
    }
    Ok(())
}

fn run_truncate(config: &AppConfig) -> anyhow::Result<()> {
    if !prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the Database?",
        Some(false),
    )? {
        return Ok(());
    }
    let db = Database::open(&config.database_path)?;
    db.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
