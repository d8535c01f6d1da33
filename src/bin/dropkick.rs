// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line entry point for provisioning and tearing down clusters.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use slog::Drain;

use dropkick::cloud::DigitalOceanClient;
use dropkick::config::UserConfig;
use dropkick::{create, destroy};

#[derive(Debug, Parser)]
#[clap(
    name = "dropkick",
    about = "A tool for provisioning Hadoop and ZooKeeper clusters \
             on DigitalOcean droplets"
)]
struct Args {
    /// log level filter (RUST_LOG overrides this)
    #[clap(long, value_parser = parse_log_level, default_value = "info")]
    log_level: slog::FilterLevel,

    /// path to the config file (default: ~/.dropkick/config.toml)
    #[clap(long)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a named cluster from a topology file
    Create {
        /// name of the cluster; droplet names and the descriptor file are
        /// derived from it
        cluster_name: String,

        /// JSON topology file describing the cluster's role groups
        topology: Utf8PathBuf,
    },

    /// Tear down a cluster, reversing everything its descriptor records
    Destroy {
        /// cluster descriptor file written by `create`
        descriptor: Utf8PathBuf,
    },
}

fn parse_log_level(s: &str) -> Result<slog::FilterLevel, String> {
    s.parse::<slog::FilterLevel>()
        .map_err(|()| format!("invalid log level {:?}", s))
}

fn make_logger(level: slog::FilterLevel) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = {
        let mut builder = slog_envlogger::LogBuilder::new(drain);
        builder = builder.filter(None, level);
        if let Ok(s) = std::env::var("RUST_LOG") {
            builder = builder.parse(&s);
        }
        builder.build()
    };
    let drain = slog_async::Async::new(drain.fuse()).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

fn main() {
    if let Err(error) = run_main() {
        eprintln!("dropkick: {:#}", error);
        std::process::exit(1);
    }
}

fn run_main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = make_logger(args.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    let config = UserConfig::load(args.config.as_deref())?;
    let cloud = DigitalOceanClient::new(&config.token, &log)?;

    match args.command {
        Command::Create { cluster_name, topology } => runtime.block_on(
            create::run(&cluster_name, &topology, &config, &cloud, &log),
        ),
        Command::Destroy { descriptor } => runtime
            .block_on(destroy::run(&descriptor, &config, &cloud, &log)),
    }
}
