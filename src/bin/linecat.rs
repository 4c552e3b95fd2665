use std::path::PathBuf;

use clap::Parser;
use servekit::config::ObservabilityConfig;
use servekit::observability::logging;
use servekit::reader::{LineReader, DEFAULT_CAPACITY};

#[derive(Parser)]
#[command(name = "linecat")]
#[command(about = "Print a file with line numbers", long_about = None)]
struct Cli {
    /// File to print.
    file: PathBuf,

    /// Show the upcoming line next to each line.
    #[arg(short, long)]
    peek: bool,

    /// Lines buffered ahead of the printer.
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
    buffer: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&ObservabilityConfig {
        log_level: "warn".to_string(),
        json: false,
    })?;

    let mut reader = LineReader::open_with_capacity(&cli.file, cli.buffer)?;

    while let Some(line) = reader.read_line()? {
        if !cli.peek {
            println!("{:>6}  {}", line.number, line.text);
            continue;
        }

        match reader.read_line()? {
            Some(next) => {
                println!("{:>6}  {}  \u{2192} {}", line.number, line.text, next.text);
                reader.unread_line(next.text);
            }
            None => println!("{:>6}  {}", line.number, line.text),
        }
    }

    tracing::debug!(file = %reader.filename().display(), lines = reader.lines(), "Done");
    Ok(())
}
