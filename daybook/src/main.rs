use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use daybook::config::{Config, Overrides, expand_home};
use daybook::model::format_date;
use daybook::process::{RollOptions, roll};
use daybook::template::Generator;
use daybook::{extract_section, format_journal, parse_journal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "daybook",
    about = "Carry open TODOs from one Markdown daily journal into the next",
    version
)]
struct Cli {
    /// Log pipeline steps to stderr.
    #[arg(long, global = true)]
    verbose: bool,
    /// Config file (defaults to ~/.config/daybook/config.toml).
    #[arg(long, global = true, env = "DAYBOOK_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Close out a journal and generate the next one from the template.
    Roll(RollArgs),

    /// Parse a journal's TODO section and print its structure.
    Parse(ParseArgs),

    /// Rewrite a journal's TODO section in canonical form.
    Format(FormatArgs),
}

#[derive(Debug, Args)]
struct SectionArgs {
    /// Header that starts the TODO section.
    #[arg(long, env = "DAYBOOK_SECTION_HEADER")]
    section_header: Option<String>,
}

#[derive(Debug, Args)]
struct RollArgs {
    /// Journal file to close out.
    journal: PathBuf,
    /// Date of the new journal (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Template used for the new journal.
    #[arg(long, env = "DAYBOOK_TEMPLATE")]
    template: Option<PathBuf>,
    /// Directory for the new journal. Defaults to the journal's directory.
    #[arg(long, env = "DAYBOOK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
    #[command(flatten)]
    section: SectionArgs,
    /// Front-matter key holding the journal's date.
    #[arg(long, env = "DAYBOOK_DATE_KEY")]
    date_key: Option<String>,
    /// Print both documents instead of writing them.
    #[arg(long)]
    dry_run: bool,
    /// Overwrite the new journal if it already exists.
    #[arg(long)]
    force: bool,
    /// Skip the backup copy of the journal.
    #[arg(long)]
    no_backup: bool,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Journal file to parse.
    journal: PathBuf,
    #[command(flatten)]
    section: SectionArgs,
    /// Print the day/item tree as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Journal file to format.
    journal: PathBuf,
    #[command(flatten)]
    section: SectionArgs,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let today = Local::now().date_naive();
    match cli.command {
        Commands::Roll(args) => handle_roll(args, config, today),
        Commands::Parse(args) => handle_parse(args, config),
        Commands::Format(args) => handle_format(args, config),
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn handle_roll(args: RollArgs, mut config: Config, today: NaiveDate) -> Result<()> {
    let RollArgs {
        journal,
        date,
        template,
        output_dir,
        section,
        date_key,
        dry_run,
        force,
        no_backup,
    } = args;

    config.apply(Overrides {
        template,
        output_dir,
        section_header: section.section_header,
        date_key,
        no_backup,
    });

    // Template problems must surface before any journal is touched.
    let generator = Generator::new(config.template_text()?, config.variables.clone())
        .context("building template")?;

    let document =
        fs::read_to_string(&journal).with_context(|| format!("reading {:?}", journal))?;
    let new_date = date.unwrap_or(today);
    let rollover = roll(
        &document,
        &generator,
        &RollOptions {
            section_header: &config.section_header,
            date_key: &config.date_key,
            new_date,
            today,
        },
    )
    .with_context(|| format!("processing {:?}", journal))?;

    let target = target_path(&journal, &config, new_date)?;
    debug!(
        original_date = %rollover.original_date,
        target = %target.display(),
        "computed roll-over"
    );

    let target_exists = target.exists();
    if target_exists && same_file(&target, &journal)? {
        anyhow::bail!("new journal {:?} would overwrite the journal being processed", target);
    }

    if dry_run {
        if target_exists && !force {
            warn!(target = %target.display(), "target already exists; a real run needs --force");
        }
        println!("== {} ==", journal.display());
        print!("{}", rollover.updated_document);
        println!();
        println!("== {} ==", target.display());
        print!("{}", rollover.new_document);
        return Ok(());
    }

    if target_exists && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", target);
    }

    // The carried-over items must land in the new journal before they leave the old one.
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    fs::write(&target, rollover.new_document.as_bytes())
        .with_context(|| format!("writing {:?}", target))?;

    if let Err(err) = close_out_journal(&journal, &config, &rollover.updated_document) {
        if !target_exists {
            if let Err(cleanup) = fs::remove_file(&target) {
                warn!(target = %target.display(), error = %cleanup, "could not remove new journal");
            }
        }
        return Err(err);
    }

    println!("Updated {:?}", journal);
    println!("Wrote new journal to {:?}", target);
    Ok(())
}

/// Back up `journal` when enabled, then overwrite it with `updated`.
fn close_out_journal(journal: &Path, config: &Config, updated: &str) -> Result<()> {
    if config.backup {
        let backup = backup_path(journal, &config.backup_suffix);
        fs::copy(journal, &backup)
            .with_context(|| format!("backing up {:?} to {:?}", journal, backup))?;
        info!(backup = %backup.display(), "wrote backup");
    }
    fs::write(journal, updated.as_bytes()).with_context(|| format!("writing {:?}", journal))
}

fn handle_parse(args: ParseArgs, mut config: Config) -> Result<()> {
    let ParseArgs {
        journal,
        section,
        json,
    } = args;
    config.apply(Overrides {
        section_header: section.section_header,
        ..Overrides::default()
    });

    let document =
        fs::read_to_string(&journal).with_context(|| format!("reading {:?}", journal))?;
    let section = extract_section(&document, &config.section_header)
        .with_context(|| format!("locating TODO section in {:?}", journal))?;
    let parsed = parse_journal(section.body)
        .map_err(|e| e.rebase(section.body_line))
        .with_context(|| format!("parsing {:?}", journal))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
    } else {
        println!("{:#?}", parsed);
    }
    Ok(())
}

fn handle_format(args: FormatArgs, mut config: Config) -> Result<()> {
    let FormatArgs {
        journal,
        section,
        in_place,
    } = args;
    config.apply(Overrides {
        section_header: section.section_header,
        ..Overrides::default()
    });

    let document =
        fs::read_to_string(&journal).with_context(|| format!("reading {:?}", journal))?;
    let formatted = format_document(&document, &config.section_header)
        .with_context(|| format!("formatting {:?}", journal))?;

    if in_place {
        fs::write(&journal, formatted.as_bytes())
            .with_context(|| format!("writing {:?}", journal))?;
    } else {
        print!("{formatted}");
    }
    Ok(())
}

fn format_document(document: &str, header: &str) -> Result<String> {
    let section = extract_section(document, header)?;
    let parsed = parse_journal(section.body).map_err(|e| e.rebase(section.body_line))?;
    Ok(section.replace_body(&format_journal(&parsed)))
}

/// `<output dir>/<file_name formatted with new_date>`.
fn target_path(journal: &Path, config: &Config, new_date: NaiveDate) -> Result<PathBuf> {
    let dir = match &config.output_dir {
        Some(dir) => expand_home(dir),
        None => match journal.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    };
    let name = format_date(new_date, &config.file_name)
        .with_context(|| format!("invalid file_name pattern {:?}", config.file_name))?;
    Ok(dir.join(name))
}

fn backup_path(journal: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(journal.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn same_file(a: &Path, b: &Path) -> Result<bool> {
    let a = fs::canonicalize(a).with_context(|| format!("resolving path {:?}", a))?;
    let b = fs::canonicalize(b).with_context(|| format!("resolving path {:?}", b))?;
    Ok(a == b)
}
