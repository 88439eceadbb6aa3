mod calibration;
mod cli;
mod runtime;
mod telemetry;
#[cfg(test)]
mod test_support;
mod ui;
mod vision;

use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = cli::CliArgs::parse();
    let config = cli::AppConfig::try_from(args)?;
    runtime::run(config)
}
