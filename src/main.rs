mod cli;

use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use oq_provision::broker::{BrokerAdmin, RabbitmqCtl};
use oq_provision::database::{DatabaseAdmin, Postgres};
use oq_provision::group::SystemGroups;
use oq_provision::release::LsbRelease;
use oq_provision::service::{self, ProcProcesses};
use oq_provision::{
    ProvisionConfig, ProvisionError, ProvisionReport, Provisioner, Toolbox, tool_present,
};

fn main() -> ExitCode {
    let args = cli::Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(level)
        .parse_default_env()
        .init();

    match real_main(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_fatal(&e);
            ExitCode::FAILURE
        }
    }
}

fn real_main(args: cli::Args) -> Result<()> {
    if args.print_default_config {
        print!("{}", ProvisionConfig::default().to_toml()?);
        return Ok(());
    }

    info!(
        "oq-provision {} ({:?}{})",
        env!("CARGO_PKG_VERSION"),
        args.action,
        args.version
            .as_deref()
            .map(|v| format!(", previously {v}"))
            .unwrap_or_default()
    );

    let cfg = ProvisionConfig::load(&args.config)?;

    let release = LsbRelease::default();
    let services = service::service_control(&cfg.services);
    let processes = ProcProcesses::default();
    let groups = SystemGroups::new(&cfg.layout.group_file);

    let rabbitmq = RabbitmqCtl::new(&cfg.broker.ctl_path);
    let broker_present = tool_present(&cfg.broker.ctl_path);

    let postgres = Postgres {
        superuser: cfg.database.superuser.clone(),
        database: cfg.database.name.clone(),
        psql: cfg.database.psql_path.clone(),
        create_script: cfg.create_script(),
        schema_path: cfg.database.schema_path.clone(),
        service_name: cfg.services.database_service.clone(),
        services: services.as_ref(),
    };
    let database: Option<&dyn DatabaseAdmin> = if tool_present(&cfg.database.psql_path) {
        Some(&postgres)
    } else {
        None
    };

    let broker: Option<&dyn BrokerAdmin> = if broker_present {
        Some(&rabbitmq)
    } else {
        None
    };

    let tools = Toolbox {
        release: &release,
        broker,
        database,
        services: services.as_ref(),
        processes: &processes,
        groups: &groups,
    };

    let mut report = ProvisionReport::new(args.dry_run);
    let result = Provisioner::new(&cfg, tools)
        .dry_run(args.dry_run)
        .run(&mut report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if let Err(e) = result {
        explain(&e, &cfg);
        return Err(e.into());
    }

    info!(
        "Provisioning finished: {} change(s), {} notice(s){}",
        report.changes(),
        report.notices.len(),
        if args.dry_run { " (dry run)" } else { "" }
    );
    for notice in &report.notices {
        println!("NOTE: {notice}");
    }
    Ok(())
}

fn report_fatal(e: &anyhow::Error) {
    error!("{e:#}");
}

/// Operator-facing diagnostics for fatal provisioning errors.
fn explain(e: &ProvisionError, cfg: &ProvisionConfig) {
    match e {
        ProvisionError::UnsupportedRelease(codename) => {
            let supported: Vec<&str> = cfg.releases.keys().map(String::as_str).collect();
            eprintln!(
                "Unsupported OS release: {codename} (supported: {})",
                supported.join(", ")
            );
        }
        ProvisionError::DatabaseInit { log, lines } => {
            eprintln!("Failed to initialise the OpenQuake database.");
            for line in lines.iter().take(10) {
                eprintln!("    {line}");
            }
            eprintln!("Please file a bug at {}", cfg.database.bug_tracker);
            eprintln!("and attach this file to it: {}", log.display());
        }
        _ => {}
    }
}
