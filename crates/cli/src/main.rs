use anyhow::{Context, Result};
use clap::Parser;
use recollect::capture::{PostToolResponse, PreToolResponse};
use recollect::{HookContext, HooksConfig, MailboxSink};
use recollect_utils::telemetry::setup_telemetry;
use std::io::{self, Read, Write};
use std::process::ExitCode;

mod cli_args;
mod hooks;

use cli_args::{CliArgs, Commands};
use hooks::{EXIT_FAILED, EXIT_STARTUP, Reply};

fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("reading hook request from stdin")?;
    Ok(raw)
}

fn emit(reply: &Reply) -> ExitCode {
    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", reply.output).and_then(|()| stdout.flush()) {
        log::error!("cannot write response: {}", e);
        return ExitCode::from(EXIT_FAILED);
    }
    ExitCode::from(reply.exit_code)
}

async fn run(ctx: &HookContext, command: Commands) -> Result<Reply> {
    let reply = match command {
        Commands::PreTool => match read_stdin() {
            Ok(raw) => hooks::pre_tool(ctx, &raw).await,
            Err(e) => hooks::error_reply(&PreToolResponse::error(format!("{e:#}"))),
        },
        Commands::PostTool => match read_stdin() {
            Ok(raw) => hooks::post_tool(ctx, &raw).await,
            Err(e) => hooks::error_reply(&PostToolResponse::error(format!("{e:#}"))),
        },
        Commands::Stop => {
            let sink = MailboxSink::open(&ctx.config).context("cannot open archive")?;
            hooks::stop(ctx, &sink, &read_stdin()?).await
        }
        Commands::Sweep { max_age_secs } => hooks::sweep(ctx, max_age_secs).await?,
        Commands::Retention { max_age_secs } => hooks::retention(ctx, max_age_secs).await?,
        Commands::Aggregate { session_id } => hooks::session_aggregate(ctx, &session_id).await?,
        Commands::CrossProject { window_secs } => hooks::cross_project(ctx, window_secs).await?,
    };
    Ok(reply)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match HooksConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rcl: {e}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    let _telemetry = setup_telemetry(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.log_file.as_deref(),
    );

    let ctx = match HookContext::from_config(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("cannot prepare mailbox: {}", e);
            eprintln!("rcl: cannot prepare mailbox: {e}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match run(&ctx, args.command).await {
        Ok(reply) => emit(&reply),
        Err(e) => {
            log::error!("{:#}", e);
            emit(&Reply {
                output: format!("ERROR: {e:#}"),
                exit_code: EXIT_FAILED,
            })
        }
    }
}
