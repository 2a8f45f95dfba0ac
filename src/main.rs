#![allow(clippy::result_large_err)]

use anyhow::{anyhow, Context};
use retransmit::config::{GatewayConfig, RetransmitConfig};
use retransmit::telemetry;
use std::path::PathBuf;

enum CliCommand {
    Run { gateway_path: Option<String> },
    Validate { configs: Vec<String> },
    Help,
    ValidateHelp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_cli_args()? {
        CliCommand::Run { gateway_path } => {
            let mut config = RetransmitConfig::load().context("failed to load configuration")?;
            if let Some(path) = gateway_path {
                config.gateway_config_path = path;
            }
            telemetry::init_tracing(config.log_filter.as_deref())
                .context("failed to initialise telemetry")?;

            let app = retransmit::app::GatewayApp::initialise(config)
                .await
                .context("failed to construct application")?;

            app.run().await.context("application runtime error")
        }
        CliCommand::Validate { configs } => run_validate_command(configs),
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::ValidateHelp => {
            print_validate_help();
            Ok(())
        }
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let Some(first) = args.next() else {
        return Ok(CliCommand::Run { gateway_path: None });
    };

    if first == "validate" {
        return parse_validate_args(args);
    }

    let mut gateway_path = None;
    let mut pending = Some(first);

    loop {
        let arg = match pending.take() {
            Some(value) => value,
            None => match args.next() {
                Some(value) => value,
                None => break,
            },
        };

        match arg.as_str() {
            "-c" | "--config" => {
                if gateway_path.is_some() {
                    anyhow::bail!("gateway config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("expected path after {arg}"))?;
                gateway_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run { gateway_path })
}

fn parse_validate_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut configs = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::ValidateHelp),
            other => configs.push(other.to_string()),
        }
    }

    if configs.is_empty() {
        anyhow::bail!("retransmit validate requires at least one config path");
    }

    Ok(CliCommand::Validate { configs })
}

fn print_help() {
    println!(
        "\
Usage: retransmit [OPTIONS]
       retransmit validate <CONFIG>...

Options:
  -c, --config <PATH>    Path to the gateway YAML file (default: config/gateway.yaml)
  -h, --help             Print this help message

Environment:
  RETRANSMIT__GATEWAY_CONFIG_PATH, RETRANSMIT__LISTEN, RETRANSMIT__INSTANCE_ID,
  RETRANSMIT__LOG_FILTER
"
    );
}

fn print_validate_help() {
    println!(
        "\
Usage: retransmit validate <CONFIG>...

Loads each gateway YAML file and reports every validation error.

Options:
  -h, --help             Print this help message
"
    );
}

fn run_validate_command(configs: Vec<String>) -> anyhow::Result<()> {
    let mut had_error = false;

    for config in configs {
        let path = PathBuf::from(&config);
        match GatewayConfig::from_path(&path) {
            Ok(_) => println!("validated {}", path.display()),
            Err(err) => {
                eprintln!("{}: {err}", path.display());
                had_error = true;
            }
        }
    }

    if had_error {
        Err(anyhow!("one or more configs failed validation"))
    } else {
        Ok(())
    }
}
