use anyhow::Result;
use env_logger::{Builder, Env};

mod cli;
mod store;
mod util;
mod cmd_init;
mod cmd_put;
mod cmd_get;
mod cmd_del;
mod cmd_stats;
mod cmd_maint;
mod cmd_dump;

use store::by_redundancy;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт: info.
    // Пример: RUST_LOG=debug flashkvs stats --path ./flash.img
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = <cli::Cli as clap::Parser>::parse();
    match cli.cmd {
        cli::Cmd::Init { image, sectors, force } =>
            by_redundancy!(image.redundancy, cmd_init::exec(&image, sectors, force)),

        cli::Cmd::Put { image, key, value, value_file } =>
            by_redundancy!(image.redundancy, cmd_put::exec(&image, &key, value.as_deref(), value_file.as_deref())),

        cli::Cmd::Get { image, key, out } =>
            by_redundancy!(image.redundancy, cmd_get::exec(&image, &key, out.as_deref())),

        cli::Cmd::Del { image, key } =>
            by_redundancy!(image.redundancy, cmd_del::exec(&image, &key)),

        cli::Cmd::Stats { image, json } =>
            by_redundancy!(image.redundancy, cmd_stats::exec(&image, json)),

        cli::Cmd::Maint { image, heavy, partial } =>
            by_redundancy!(image.redundancy, cmd_maint::exec(&image, heavy, partial)),

        cli::Cmd::Dump { image, json } =>
            by_redundancy!(image.redundancy, cmd_dump::exec(&image, json)),
    }
}
