//
// main.rs
//
// Command line entry point
//

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use jsonnet_ls::backend;
use jsonnet_ls::config::Configuration;

fn print_usage() {
    println!("jsonnet-ls {}, a Jsonnet Language Server.", env!("CARGO_PKG_VERSION"));
    print!(
        r#"
Usage: jsonnet-ls [OPTIONS]

Available options:

--stdio                      Start the LSP server using stdio transport (default)
-J, --jpath <dir>            Add a library search directory (repeatable)
-t, --tanka                  Resolve search paths the way Tanka does
-l, --log-level <level>      Log level: error, warn, info, debug or trace
--lint                       Report unused variables
--eval-diags                 Report evaluation errors
--version                    Print the version
--help                       Print this help message

Environment:

JSONNET_PATH                 Extra search directories, searched before --jpath
RUST_LOG                     Log filter, overridden by --log-level

"#
    );
}

fn value_of(flag: &str, argv: &mut impl Iterator<Item = String>) -> anyhow::Result<String> {
    argv.next()
        .ok_or_else(|| anyhow::anyhow!("missing value for '{flag}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut config = Configuration::from_env();
    let mut log_level: Option<log::LevelFilter> = None;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--stdio" => {}
            "-J" | "--jpath" => config.jpaths.push(PathBuf::from(value_of(&arg, &mut argv)?)),
            "-t" | "--tanka" => config.resolve_paths_with_tanka = true,
            "-l" | "--log-level" => {
                let level = value_of(&arg, &mut argv)?;
                log_level = Some(
                    log::LevelFilter::from_str(&level)
                        .map_err(|_| anyhow::anyhow!("invalid log level: '{level}'"))?,
                );
            }
            "--lint" => config.enable_lint_diagnostics = true,
            "--eval-diags" => config.enable_eval_diagnostics = true,
            "--version" => {
                println!("jsonnet-ls {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = log_level {
        logger.filter_level(level);
    }
    // stdout carries the protocol
    logger.target(env_logger::Target::Stderr).init();

    log::info!("starting with search path {:?}", config.search_paths());
    backend::start_lsp(config).await
}
