use clap::Parser;
use colored::Colorize;

use crate::cli::{Cli, Command};
use vidsearch::config::AppConfig;
use vidsearch::coordinator::SearchCoordinator;
use vidsearch::model::SearchQuery;
use vidsearch::{logging, server};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    logging::init(&config.log_level);

    match cli.command {
        Command::Serve { .. } => {
            println!("{}", "🚀 vidsearch relay starting".cyan().bold());
            server::serve(config).await?;
        }
        Command::Search {
            query,
            video,
            website,
            tags,
            pages,
        } => {
            let coordinator = SearchCoordinator::from_config(&config)?;
            let query = SearchQuery::new(query, cli::selected_sources(video, website), tags);
            cli::run_search(&coordinator, query, pages).await?;
        }
        Command::InitConfig { force } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => AppConfig::default_path()?,
            };
            if path.exists() && !force {
                println!(
                    "{} {} already exists (use --force to overwrite)",
                    "⚠".yellow(),
                    path.display()
                );
                return Ok(());
            }
            AppConfig::default().save(&path)?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
    }

    Ok(())
}
