pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use commands::import_catalog::ImportSource;
use commands::probe::ProbeArgs;

#[derive(Debug, Parser)]
#[command(
    name = "ravenrock",
    about = "RavenRock upsell operator CLI",
    long_about = "Operate the RavenRock upsell backend: migrations, catalog imports, config inspection, quota usage, and live proxy probes.",
    after_help = "Examples:\n  ravenrock migrate\n  ravenrock import-catalog --demo\n  ravenrock usage --shop demo.myshopify.com\n  ravenrock probe --url https://demo.myshopify.com --shop demo.myshopify.com"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Replace a shop's catalog from a JSON snapshot, or load the demo store")]
    ImportCatalog {
        #[arg(long, help = "Shop domain the snapshot belongs to")]
        shop: Option<String>,
        #[arg(long, help = "Path to a catalog snapshot JSON file")]
        file: Option<PathBuf>,
        #[arg(long, help = "Load the bundled demo store instead of a file")]
        demo: bool,
    },
    #[command(about = "Show a shop's monthly AI quota usage without consuming a call")]
    Usage {
        #[arg(long)]
        shop: String,
    },
    #[command(about = "Call the proxy routes the way the storefront widget does")]
    Probe {
        #[arg(long = "url", help = "Storefront base URL the proxy prefix is mounted on")]
        storefront_url: String,
        #[arg(long)]
        shop: Option<String>,
        #[arg(long = "variant")]
        current_variant: Option<String>,
        #[arg(long = "handle")]
        product_handle: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::ImportCatalog { shop, file, demo } => {
            commands::import_catalog::run(ImportSource::from_args(shop, file, demo))
        }
        Command::Usage { shop } => commands::usage::run(&shop),
        Command::Probe { storefront_url, shop, current_variant, product_handle, limit } => {
            commands::probe::run(ProbeArgs {
                storefront_url,
                shop,
                current_variant,
                product_handle,
                limit,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
