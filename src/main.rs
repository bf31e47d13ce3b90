use std::env;
use std::error;
use std::process::ExitCode;
use std::time::Duration;

use bibdoi::{output, DoiResolver, Parser, ResolverConfig};

use clap::Parser as CLIParser;
use log::LevelFilter;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Settings {
    /// Filepath to the .bib file to parse
    file_path: String,

    /// Save the output to parsed_bibtex.json in the working directory instead of printing it
    #[clap(long)]
    save: bool,

    /// Print JSON instead of the human readable form
    #[clap(long)]
    json: bool,

    /// Return only entries with this citation key
    #[clap(short, long)]
    query_id: Option<String>,

    /// Do not resolve DOIs
    #[clap(long)]
    offline: bool,

    /// Timeout of one DOI lookup in seconds
    #[clap(long, default_value = "10")]
    timeout: u64,

    /// Retries after a failed DOI lookup, at most 1
    #[clap(long, default_value = "0")]
    retries: u8,

    /// Number of simultaneous DOI lookups
    #[clap(long, default_value = "4")]
    jobs: usize,

    /// Also store the resolved URL as `url` field of entries without one
    #[clap(long)]
    fill_url: bool,

    /// Logging level (off, error, warn, info, debug, trace)
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

fn run(s: &Settings) -> Result<(), Box<dyn error::Error>> {
    let mut entries = Parser::from_file(&s.file_path)?.parse().entries;
    if let Some(query) = &s.query_id {
        entries.retain(|entry| &entry.citation_key == query);
    }

    if !s.offline {
        let resolver = DoiResolver::new(ResolverConfig {
            timeout: Duration::from_secs(s.timeout),
            retries: s.retries,
            concurrency: s.jobs,
            fill_missing_url: s.fill_url,
            ..ResolverConfig::default()
        })?;
        resolver.enrich(&mut entries)?;
    }

    if s.save {
        let path = env::current_dir()?.join(output::OUTPUT_FILENAME);
        output::save_json(path, &entries)?;
    } else if s.json {
        println!("{}", output::to_json(&entries)?);
    } else {
        print!("{}", output::render_human(&entries));
    }

    Ok(())
}

fn main() -> ExitCode {
    let settings = Settings::parse();
    env_logger::Builder::new()
        .filter_level(settings.log_level)
        .init();

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
