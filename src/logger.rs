use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, Record};

pub struct Logger;

static LOGGER: Logger = Logger;

pub fn init(level: LevelFilter) {
    // set_logger only fails when a logger is already installed, which is
    // harmless for our purposes (tests install it repeatedly).
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match record.level() {
            Level::Info => eprintln!("{}", record.args()),
            Level::Debug | Level::Trace => {
                eprintln!(
                    "{} {} {}",
                    label(record.level()),
                    record.target().dimmed(),
                    record.args()
                );
            }
            _ => eprintln!("{} {}", label(record.level()), record.args()),
        }
    }

    fn flush(&self) {}
}

fn label(level: Level) -> ColoredString {
    match level {
        Level::Debug => "[DEBUG]".bold().blue(),
        Level::Error => "[ERROR]".bold().red(),
        Level::Info => "[INFO]".bold().green(),
        Level::Trace => "[TRACE]".bold().purple(),
        Level::Warn => "[WARN]".bold().yellow(),
    }
}
