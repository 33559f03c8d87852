use colored::Colorize;
use log::{Level, LevelFilter};
use std::io::Write;

fn level_color(level: Level) -> colored::Color {
    match level {
        Level::Trace => colored::Color::BrightBlack,
        Level::Debug => colored::Color::Cyan,
        Level::Info => colored::Color::Green,
        Level::Warn => colored::Color::Yellow,
        Level::Error => colored::Color::Red,
    }
}

pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Install the process logger. `RUST_LOG`, when set, wins over `default_level`.
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(default_level));
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    builder.format(|buf, record| {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        writeln!(
            buf,
            "{} {} [{}] {}",
            timestamp.to_string().dimmed(),
            record.level().as_str().color(level_color(record.level())),
            record.target().dimmed(),
            record.args()
        )
    });

    let _ = builder.try_init();
}
