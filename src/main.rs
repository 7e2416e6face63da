use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use folio::backend::JsonCorpusBackend;
use folio::chapters::{self, Chapter};
use folio::controller::{Align, LoggingSurface, PageSlot, ScrollOutcome};
use folio::model::PageLocator;
use folio::reader::Reader;
use folio::settings::Settings;
use folio::share::ShareAnchor;

/// Page through large documents stored as a JSON corpus
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Directory holding `{document_id}.json` files
    #[arg(long, global = true, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    corpus: PathBuf,

    /// Settings file (default: platform config dir)
    #[arg(short = 'C', long, global = true, value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "folio.log", value_hint = clap::ValueHint::FilePath)]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct DocumentArgs {
    document_id: String,

    /// Version to read (default: the document's primary version)
    #[arg(long = "version-id")]
    version_id: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the chapter tree
    Outline {
        #[command(flatten)]
        doc: DocumentArgs,
    },

    /// Print one page by render index
    Page {
        #[command(flatten)]
        doc: DocumentArgs,
        index: usize,
    },

    /// Resolve a printed page or chapter to a render index
    Resolve {
        #[command(flatten)]
        doc: DocumentArgs,
        #[arg(long, conflicts_with = "chapter", required_unless_present = "chapter")]
        page: Option<u32>,
        #[arg(long, requires = "page")]
        volume: Option<String>,
        #[arg(long)]
        chapter: Option<usize>,
    },

    /// Show which pages a render window materializes
    Window {
        #[command(flatten)]
        doc: DocumentArgs,
        start: usize,
        count: usize,
    },

    /// Build a share link for a render index
    Share {
        #[command(flatten)]
        doc: DocumentArgs,
        index: usize,
        #[arg(long)]
        selection: Option<String>,
    },

    /// Decode a share link
    Decode { link: String },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let file = File::create(&cli.log_file)
        .with_context(|| format!("creating log file {}", cli.log_file.display()))?;
    WriteLogger::init(level, Config::default(), file)?;
    Ok(())
}

fn print_chapters(chapters: &[Chapter], depth: usize) {
    for chapter in chapters {
        let heading = &chapter.heading;
        let target = match (heading.render_index, &heading.locator) {
            (Some(index), _) => format!("#{index}"),
            (None, Some(PageLocator::Page { page, volume: Some(volume) })) => {
                format!("v. {volume}, p. {page}")
            }
            (None, Some(PageLocator::Page { page, volume: None })) => format!("p. {page}"),
            _ => "-".to_string(),
        };
        println!("{}{}  [{target}]", "  ".repeat(depth), heading.title);
        print_chapters(&chapter.children, depth + 1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load_or_default(cli.config.as_deref());
    let backend = Arc::new(JsonCorpusBackend::new(&cli.corpus));
    let mut reader = Reader::new(backend, settings, Arc::new(LoggingSurface))?;

    match cli.command {
        Command::Outline { doc } => {
            let open = reader.open(&doc.document_id, doc.version_id.as_deref()).await?;
            if let Some(title) = &open.title {
                println!("{title}");
            }
            print_chapters(open.chapters(), 0);
            println!(
                "{} chapters, {} pages",
                chapters::count(open.chapters()),
                open.session().total_render_count()
            );
        }
        Command::Page { doc, index } => {
            let open = reader.open(&doc.document_id, doc.version_id.as_deref()).await?;
            match open.cache().page(index).await? {
                Some(page) => {
                    let chapter = chapters::find_current(open.chapters(), index)
                        .and_then(|path| chapters::at_path(open.chapters(), &path));
                    match chapter {
                        Some(chapter) => println!("{} ({})", page.label(index), chapter.heading.title),
                        None => println!("{}", page.label(index)),
                    }
                    println!("{}", serde_json::to_string_pretty(&page)?);
                }
                None => bail!(
                    "render index {index} is outside {} (total {})",
                    doc.document_id,
                    open.session().total_render_count()
                ),
            }
        }
        Command::Resolve {
            doc,
            page,
            volume,
            chapter,
        } => {
            let open = reader.open(&doc.document_id, doc.version_id.as_deref()).await?;
            let locator = match (page, chapter) {
                (Some(page), _) => PageLocator::page(page, volume.as_deref()),
                (None, Some(chapter)) => PageLocator::chapter(chapter),
                (None, None) => bail!("either --page or --chapter is required"),
            };
            match open.controller().scroll_to(&locator, Align::Start).await {
                ScrollOutcome::Executed(_) => println!("{}", open.controller().position()),
                ScrollOutcome::Unresolved | ScrollOutcome::Superseded => {
                    println!("unresolved");
                }
            }
        }
        Command::Window { doc, start, count } => {
            let open = reader.open(&doc.document_id, doc.version_id.as_deref()).await?;
            let controller = open.controller();
            let requested = controller.set_window(start, count).await;
            info!("Window requested {} pages", requested.len());

            let range = controller
                .window()
                .materialized(open.session().total_render_count());
            for index in range {
                let state = match controller.slot(index) {
                    Some(PageSlot::Ready(page)) => page.label(index),
                    Some(PageSlot::Missing) => "missing".to_string(),
                    Some(PageSlot::Failed(e)) => format!("failed: {e}"),
                    Some(PageSlot::Loading) | None => "not loaded".to_string(),
                };
                println!("{index:>6}  {state}");
            }
            println!(
                "{} pages bundled, {} chunks fetched",
                controller.bundled_count(),
                open.cache().network_fetches()
            );
        }
        Command::Share {
            doc,
            index,
            selection,
        } => {
            let mut anchor = ShareAnchor::new(&doc.document_id, index).with_version(doc.version_id.as_deref());
            if let Some(selection) = selection {
                anchor = anchor.with_selection(selection);
            }
            println!("{}", reader.codec().encode(&anchor));
        }
        Command::Decode { link } => match reader.codec().decode_str(&link) {
            Some(anchor) => println!("{}", serde_json::to_string_pretty(&anchor)?),
            None => bail!("not a share link: {link}"),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    info!("Starting folio");

    let result = run(cli).await;
    if let Err(e) = &result {
        error!("Command failed: {e:#}");
    }
    info!("Shutting down folio");
    result
}
