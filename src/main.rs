//! forge-manual – command-line HTML → PDF manual builder.
//!
//! If `output.pdf` is omitted the PDF is written next to the input file with
//! the same stem (e.g. `guide.html` → `guide.pdf`).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use manual_forge::{write_manual, ForgeRenderer, ManualConfig, PageOrientation};

#[derive(Parser)]
#[command(name = "forge-manual")]
#[command(version, about = "Build a paginated PDF manual from composed HTML", long_about = None)]
#[command(after_help = "EXAMPLES:
    forge-manual guide.html                      Write guide.pdf next to the input
    forge-manual guide.html out/guide.pdf -t Ops Custom title and output path
    forge-manual guide.html --font NotoSansKR.ttf Use a specific fallback font")]
struct Cli {
    /// Composed HTML (images must be base64 data URIs; others are skipped)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output path (default: same stem as input with .pdf)
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Document title for metadata and running heads (default: input filename stem)
    #[arg(short, long)]
    title: Option<String>,

    /// Document author written to the metadata
    #[arg(short, long)]
    author: Option<String>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fallback font candidate; repeatable, tried before the platform defaults
    #[arg(long = "font", value_name = "PATH")]
    fonts: Vec<PathBuf>,

    /// Use landscape page orientation
    #[arg(short, long)]
    landscape: bool,

    /// Do not write a document outline
    #[arg(long)]
    no_outline: bool,

    /// Log debug detail (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> manual_forge::Result<()> {
    let config = build_config(cli)?;
    let html = fs::read_to_string(&cli.input).map_err(|e| manual_forge::Error::Io {
        path: cli.input.clone(),
        source: e,
    })?;
    let output = cli.output.clone().unwrap_or_else(|| default_output(&cli.input));

    let renderer = ForgeRenderer::new(config.render_timeout());
    let manual = write_manual(renderer, &html, &config, &output)?;

    let resolved = manual.chapter_pages().iter().flatten().count();
    eprintln!(
        "Wrote '{}' ({} bytes, {} page{}, {resolved}/{} chapters resolved)",
        output.display(),
        manual.pdf.len(),
        manual.total_pages,
        if manual.total_pages == 1 { "" } else { "s" },
        manual.chapters.len(),
    );
    Ok(())
}

fn build_config(cli: &Cli) -> manual_forge::Result<ManualConfig> {
    let title = default_title(&cli.input);
    let mut config = match &cli.config {
        Some(path) => ManualConfig::from_json_file_titled(path, &title)?,
        None => ManualConfig {
            title,
            ..ManualConfig::default()
        },
    };
    if let Some(title) = &cli.title {
        config.title = title.clone();
    }
    if let Some(author) = &cli.author {
        config.author = Some(author.clone());
    }
    if !cli.fonts.is_empty() {
        let mut candidates = cli.fonts.clone();
        candidates.append(&mut config.fallback_fonts);
        config.fallback_fonts = candidates;
    }
    if cli.landscape {
        config.print.orientation = PageOrientation::Landscape;
    }
    if cli.no_outline {
        config.outline = false;
    }
    config.validate()?;
    Ok(config)
}

fn default_output(input: &Path) -> PathBuf {
    let mut output = input.to_path_buf();
    output.set_extension("pdf");
    output
}

fn default_title(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Manual")
        .to_string()
}
