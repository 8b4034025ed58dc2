use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pres_core::extract::{extract, Environment};
use pres_core::index::{self, DatasetState, HeaderVariant, Index, Language};
use pres_core::Address;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pres",
    about = "Extract and inspect Pres archives (.res / .rtbl) and their RDP-backed payloads",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract an archive tree, recursing into nested .res/.rtbl members
    Extract {
        /// Archive to unpack (.res or .rtbl)
        archive: PathBuf,
        /// Output directory (default: the archive path minus its extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Header variant of the root archive and nested .res members
        #[arg(long, value_enum, default_value_t = HeaderArg::Original)]
        header: HeaderArg,
        /// Localized archives: extract only this language (repeatable)
        #[arg(long = "language", value_parser = parse_language)]
        languages: Vec<Language>,
    },
    /// Print the header and index of an archive without extracting
    Inspect {
        /// Archive to inspect (.res or .rtbl)
        archive: PathBuf,
        /// Header variant to parse with
        #[arg(long, value_enum, default_value_t = HeaderArg::Original)]
        header: HeaderArg,
        /// Print per-entry details
        #[arg(long)]
        entries: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HeaderArg {
    Original,
    Localized,
}

impl std::fmt::Display for HeaderArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HeaderArg::Original => "original",
            HeaderArg::Localized => "localized",
        })
    }
}

impl From<HeaderArg> for HeaderVariant {
    fn from(arg: HeaderArg) -> Self {
        match arg {
            HeaderArg::Original => HeaderVariant::Original,
            HeaderArg::Localized => HeaderVariant::Localized,
        }
    }
}

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

// ── helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{v:.2} {}", UNITS[unit])
    }
}

fn is_rtbl(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("rtbl"))
}

// ── subcommand implementations ─────────────────────────────────────────────

fn run_extract(
    archive: PathBuf,
    output: Option<PathBuf>,
    header: HeaderArg,
    languages: Vec<Language>,
) -> Result<()> {
    let out_root = output.unwrap_or_else(|| archive.with_extension(""));
    let mut env = Environment::new(header.into());
    env.program_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    if !languages.is_empty() {
        env.language_filter = Some(languages.into_iter().collect());
    }

    let t0 = Instant::now();
    let report = extract(&env, &archive, &out_root)
        .with_context(|| format!("extracting {}", archive.display()))?;
    let elapsed = t0.elapsed();

    eprintln!("  output      : {}", out_root.display());
    eprintln!("  files       : {}", report.files_written);
    eprintln!("  diagnostics : {}", report.diagnostics.len());
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());

    if !report.nested_failures.is_empty() {
        for (path, error) in &report.nested_failures {
            eprintln!("  ! {}: {error}", path.display());
        }
        anyhow::bail!(
            "{} nested archive(s) failed to parse",
            report.nested_failures.len()
        );
    }
    Ok(())
}

fn run_inspect(archive: PathBuf, header: HeaderArg, entries: bool) -> Result<()> {
    let data =
        fs::read(&archive).with_context(|| format!("reading archive {}", archive.display()))?;

    println!("=== Pres archive: {} ===", archive.display());
    println!();
    println!("  file size      : {}", human_bytes(data.len() as u64));

    if is_rtbl(&archive) {
        let table = index::parse_rtbl(&data)?;
        println!("  layout         : rtbl (headerless)");
        print_index(&table, &data, entries);
        return Ok(());
    }

    match HeaderVariant::from(header) {
        HeaderVariant::Original => {
            let parsed_header = pres_core::format::ResHeader::from_bytes(&data)?;
            println!("  layout         : original");
            println!("  group offset   : {:#010x}", parsed_header.group_offset);
            println!("  group count    : {}", parsed_header.group_count);
            println!("  configs offset : {:#010x}", parsed_header.configs_offset);
            let parsed = index::parse_res(&data)?;
            print_index(&parsed, &data, entries);
        }
        HeaderVariant::Localized => {
            let parsed_header = pres_core::format::LocalizedHeader::from_bytes(&data)?;
            println!("  layout         : localized");
            println!("  config length  : {:#010x}", parsed_header.conf_length);
            println!("  country        : {}", parsed_header.country);
            let localized = index::parse_localized(&data, None)?;
            if let Some(direct) = &localized.direct {
                println!();
                println!("  -- direct fileset --");
                print_index(direct, &data, entries);
            }
            for dataset in &localized.datasets {
                println!();
                match &dataset.state {
                    DatasetState::Parsed(sub) => {
                        println!("  -- {} --", dataset.language);
                        print_index(sub, &data, entries);
                    }
                    DatasetState::Empty => println!("  -- {}: empty --", dataset.language),
                    DatasetState::Filtered => {}
                }
            }
        }
    }
    Ok(())
}

fn print_index(parsed: &Index, data: &[u8], show_entries: bool) {
    let stored: u64 = parsed.entries.iter().map(|e| e.csize as u64).sum();
    let unpacked: u64 = parsed.entries.iter().map(|e| e.dsize as u64).sum();
    let skipped = parsed.entries.iter().filter(|e| e.skip.is_some()).count();
    println!("  entries        : {} ({} skipped)", parsed.entries.len(), skipped);
    println!("  stored bytes   : {}", human_bytes(stored));
    println!("  unpacked bytes : {}", human_bytes(unpacked));

    if !show_entries {
        return;
    }
    println!();
    println!(
        "  {:>6}  {:>4}  {:>12}  {:>10}  {:>10}  {:>5}  {}",
        "entry", "mode", "offset", "stored", "unpacked", "codec", "name"
    );
    println!("  {}", "-".repeat(72));
    for entry in &parsed.entries {
        let offset = match entry.address {
            Address::Current { offset, .. } => format!("{offset:#x}"),
            Address::Rdp { offset, .. } => format!("{offset:#x}"),
            _ => "-".into(),
        };
        // Codec tags are only visible without opening the RDP stores.
        let codec = match entry.address {
            Address::Current { offset, .. } => {
                let start = offset as usize;
                match data.get(start..start + 4.min(entry.csize as usize)) {
                    Some(head) => pres_codecs::detect(head).map_or("-", |c| c.name()),
                    None => "?",
                }
            }
            Address::Rdp { .. } => "?",
            _ => "-",
        };
        let mut name = entry.names.file_name(entry.index);
        if let Some(path) = entry.names.path.as_deref() {
            name = format!("{path}/{name}");
        }
        if entry.skip.is_some() {
            name.push_str("  [skipped]");
        }
        println!(
            "  {:>6}  {:#04x}  {:>12}  {:>10}  {:>10}  {:>5}  {}",
            entry.index,
            entry.address.mode(),
            offset,
            human_bytes(entry.csize as u64),
            human_bytes(entry.dsize as u64),
            codec,
            name
        );
    }
}

// ── entry point ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract {
            archive,
            output,
            header,
            languages,
        } => run_extract(archive, output, header, languages),
        Commands::Inspect {
            archive,
            header,
            entries,
        } => run_inspect(archive, header, entries),
    }
}
