use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use vidsearch::config::AppConfig;
use vidsearch::coordinator::SearchCoordinator;
use vidsearch::model::{SearchEvent, SearchQuery, SearchResult, SourceType};

#[derive(Debug, Parser)]
#[command(name = "vidsearch", version, about = "Incremental video and website search relay")]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true, env = "VIDSEARCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true, env = "VIDSEARCH_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket relay
    Serve {
        #[arg(short, long, env = "VIDSEARCH_PORT")]
        port: Option<u16>,
        #[arg(long)]
        bind: Option<String>,
        /// External scraper command; it reads the request on stdin
        #[arg(long, env = "VIDSEARCH_SCRAPER")]
        scraper: Option<String>,
    },
    /// Run one search in the terminal
    Search {
        query: String,
        #[arg(long)]
        video: bool,
        #[arg(long)]
        website: bool,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Pages to fetch per source
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Write the default configuration file
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Fold command line overrides into the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.to_lowercase();
        }
        if let Command::Serve { port, bind, scraper } = &self.command {
            if let Some(port) = port {
                config.port = *port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind.clone();
            }
            if let Some(scraper) = scraper {
                config.scraper_command = Some(scraper.clone());
            }
        }
    }
}

pub fn selected_sources(video: bool, website: bool) -> Vec<SourceType> {
    match (video, website) {
        (false, false) => vec![SourceType::Video],
        (video, website) => SourceType::ALL
            .into_iter()
            .filter(|source_type| match source_type {
                SourceType::Video => video,
                SourceType::Website => website,
            })
            .collect(),
    }
}

pub fn print_header(query: &SearchQuery) {
    let sources: Vec<_> = query.source_types.iter().map(|s| s.as_str()).collect();
    println!("{} {}", "🔍 Searching for:".cyan().bold(), query.text.bold());
    println!("{} {}", "   Sources:".dimmed(), sources.join(", "));
    if !query.tags.is_empty() {
        let tags: Vec<_> = query.tags.iter().map(String::as_str).collect();
        println!("{} {}", "   Tags:".dimmed(), tags.join(", "));
    }
    println!("{}", "─".repeat(60).dimmed());
}

pub fn print_result(index: usize, result: &SearchResult) {
    let badge = match result.source_type {
        SourceType::Video => "▶".red(),
        SourceType::Website => "🌐".normal(),
    };
    println!("{} {} {}", format!("{:>3}.", index).dimmed(), badge, result.title.bold());
    println!("     {}", result.url.blue().underline());
    if let Some(description) = &result.description {
        if description != &result.title {
            let short: String = description.chars().take(120).collect();
            println!("     {}", short.dimmed());
        }
    }
    let details: Vec<String> = ["duration", "views", "channel"]
        .iter()
        .filter_map(|key| result.source_metadata.get(*key).map(|v| format!("{}: {}", key, v)))
        .collect();
    if !details.is_empty() {
        println!("     {}", details.join("  ").yellow());
    }
}

/// Run one search to completion, printing results as they arrive, then
/// page each source `pages - 1` more times.
pub async fn run_search(coordinator: &SearchCoordinator, query: SearchQuery, pages: usize) -> anyhow::Result<()> {
    print_header(&query);
    let mut started = coordinator.start_search(query).await?;
    let session_id = started.session.id;
    let mut shown = 0usize;

    while let Some(event) = started.events.recv().await {
        match event {
            SearchEvent::ResultProduced { result } => {
                shown += 1;
                print_result(shown, &result);
            }
            SearchEvent::SessionCompleted { total } => {
                println!("{}", "─".repeat(60).dimmed());
                println!("{} {} results", "✓ Search completed:".green().bold(), total);
                break;
            }
            SearchEvent::SessionFailed { reason } => {
                println!("{} {}", "❌ Search failed:".red().bold(), reason);
                return Ok(());
            }
            _ => {}
        }
    }

    for _ in 1..pages.max(1) {
        for source_type in coordinator.session(session_id).await?.query.source_types {
            match coordinator.request_more(session_id, source_type).await {
                Ok(results) => {
                    for result in results {
                        shown += 1;
                        print_result(shown, &result);
                    }
                }
                Err(e) => println!("{} {}", "⚠".yellow(), e),
            }
        }
    }

    let snapshot = coordinator.session(session_id).await?;
    for (source_type, state) in &snapshot.adapter_states {
        println!("   {} {:?}", format!("{}:", source_type).dimmed(), state);
    }
    let recommended = coordinator.tags().recommend(&snapshot.query.text).await;
    if !recommended.is_empty() {
        println!("{} {}", "💡 Related tags:".yellow(), recommended.join(", "));
    }
    Ok(())
}
