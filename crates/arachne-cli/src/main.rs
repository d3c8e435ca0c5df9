use std::io;
use std::path::PathBuf;

use arachne::{AppConfig, Launcher, LogConfig};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use serde_json::Value;

/// Launch crawl jobs configured by a host application
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Args {
    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[clap(name = "crawl")]
    Crawl(CrawlArgs),
    #[clap(name = "list")]
    List(ListArgs),
    #[clap(hide = true)]
    Completion,
}

/// Crawl with the spider configured for an endpoint
#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    /// Endpoint of the spider, as listed in SPIDER_SETTINGS
    pub endpoint: String,
    /// Path to the yaml host application configuration
    #[clap(env = "ARACHNE_CONFIG", parse(from_os_str), long, short)]
    pub config: PathBuf,
    /// Log to stdout instead of the log files
    #[clap(long)]
    pub debug: bool,
    /// Override the log files directory
    #[clap(parse(from_os_str), long)]
    pub log_dir: Option<PathBuf>,
    /// No SIGINT handling, pipelines are closed only once the crawl is over
    #[clap(long)]
    pub no_sigint: bool,
}

/// List configured endpoints and their spiders
#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// Path to the yaml host application configuration
    #[clap(env = "ARACHNE_CONFIG", parse(from_os_str), long, short)]
    pub config: PathBuf,
}

pub fn crawl(args: CrawlArgs) -> anyhow::Result<()> {
    let mut app = AppConfig::from_yaml_file(&args.config)?;
    if args.debug {
        app.debug = true;
    }
    if let Some(log_dir) = args.log_dir {
        app.log_dir = log_dir;
    }
    if args.no_sigint {
        app.scrapy_settings
            .insert("HANDLE_SIGINT".into(), Value::Bool(false));
    }

    let spider = app.spider(&args.endpoint).ok_or_else(|| {
        anyhow::anyhow!(
            "No spider configured for endpoint {} in {}",
            args.endpoint,
            args.config.display()
        )
    })?;

    let stats = Launcher::new().start_crawler(
        &spider.location,
        &app,
        &spider.scrapy_settings,
        &LogConfig::from(&app),
    )?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn list(args: ListArgs) -> anyhow::Result<()> {
    let app = AppConfig::from_yaml_file(&args.config)?;
    let launcher = Launcher::new();
    for spider in &app.spider_settings {
        let known = if launcher.spiders().contains(&spider.location) {
            ""
        } else {
            " (unknown)"
        };
        println!("{}\t{}{known}", spider.endpoint, spider.location);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Crawl(args) => crawl(args),
        SubCommand::List(args) => list(args),
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "arachne", &mut io::stdout());
            Ok(())
        }
    }
}
