use anyhow::{Context, Result};
use chatrender::artifact::{ArtifactContent, ArtifactView};
use chatrender::classify::{self, SourceBlock};
use chatrender::config::{Config, config};
use chatrender::dispatcher::{self, Dispatcher, HostEvent, ProcessedSet};
use chatrender::fetch::{FetchAdapter, HttpFetcher};
use chatrender::host::{GeminiLocator, HostTree, MemoryTree, NodeId};
use chatrender::link::{ImageLinkPatterns, LinkOutcome, LinkResolver};
use chatrender::logging;
use chatrender::opener::{SystemOpener, TabOpener};
use chatrender::pipeline::{ActivateOutcome, RenderController};
use chatrender::resources::ResourceStore;
use chatrender::surface::{LinkView, RecordingSurface, Surface};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "chatrender")]
#[command(version = env!("CHATRENDER_VERSION"))]
#[command(about = "Render HTML and mermaid code blocks and generated-image links from chat pages")]
struct Args {
    /// Write DEBUG lines to the log file
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how a code block would be classified
    Classify {
        /// File holding the block's text ("-" for stdin)
        file: PathBuf,

        /// Declared language label
        #[arg(short, long, default_value = "")]
        lang: String,
    },

    /// Apply the diagram syntax fixes and print the result
    Fix {
        /// File holding mermaid source ("-" for stdin)
        file: PathBuf,
    },

    /// Render one code block and write the artifact
    Render {
        /// File holding the block's text ("-" for stdin)
        file: PathBuf,

        /// Declared language label
        #[arg(short, long, default_value = "")]
        lang: String,

        /// Output path (default: preview.html or diagram.svg)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Open the result in the browser
        #[arg(long)]
        open: bool,
    },

    /// Resolve one generated-image link and save the image
    Image {
        /// Direct image URL or a search URL wrapping one
        url: String,

        /// Output path (default: image.<ext>)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List renderable blocks and image links in a saved chat page
    Scan {
        /// Saved page HTML
        page: PathBuf,

        /// Activate every trigger and report the final states
        #[arg(long)]
        render: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.trace || config().logging.trace);
    logging::cleanup_old_logs();
    logging::info(&format!("chatrender {} starting", env!("CHATRENDER_VERSION")));

    if let Err(e) = run_main(args).await {
        logging::error(&format!("{:?}", e));
        return Err(e);
    }
    Ok(())
}

async fn run_main(args: Args) -> Result<()> {
    match args.command {
        Command::Classify { file, lang } => run_classify(&file, &lang),
        Command::Fix { file } => run_fix(&file),
        Command::Render {
            file,
            lang,
            out,
            open,
        } => run_render(&file, &lang, out, open).await,
        Command::Image { url, out } => run_image(&url, out).await,
        Command::Scan { page, render } => run_scan(&page, render).await,
        Command::Config { init } => run_config(init),
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        return std::io::read_to_string(std::io::stdin()).context("Failed to read stdin");
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn http_fetch() -> FetchAdapter {
    FetchAdapter::new(Arc::new(HttpFetcher::new(&config().render)))
}

fn run_classify(file: &Path, lang: &str) -> Result<()> {
    let text = read_input(file)?;
    let classification = classify::classify(&text, lang);
    println!("{}", classification.as_str());
    if let Some(label) = classify::trigger_label(classification, &text) {
        println!("trigger: {}", label);
    }
    Ok(())
}

fn run_fix(file: &Path) -> Result<()> {
    let text = read_input(file)?;
    let corrected = chatrender::mermaid_fix::correct(&text);
    println!("{}", corrected.code);
    if corrected.is_clean() {
        eprintln!("No fixes applied.");
    } else {
        eprintln!("Applied fixes:\n{}", corrected.summary());
    }
    Ok(())
}

fn print_artifact(view: &ArtifactView) {
    eprintln!("{} [{}] {}", view.kind.as_str(), view.state.as_str(), view.status);
    for badge in &view.badges {
        match badge {
            chatrender::Badge::Success => eprintln!("  {}", badge.label()),
            chatrender::Badge::Warning { detail } => {
                eprintln!("  {}", badge.label());
                for line in detail.lines() {
                    eprintln!("    {}", line);
                }
            }
        }
    }
}

async fn run_render(file: &Path, lang: &str, out: Option<PathBuf>, open: bool) -> Result<()> {
    let source = SourceBlock::new(read_input(file)?, lang);
    let store = Arc::new(ResourceStore::new());
    let surface = Arc::new(RecordingSurface::new());
    let controller = RenderController::from_config(
        http_fetch(),
        store.clone(),
        surface.clone(),
        config(),
    );

    let block = NodeId(1);
    let classification = controller.register(block, source);
    if !classification.is_renderable() {
        anyhow::bail!("Block is not renderable (classification: none)");
    }

    let outcome = controller.activate(block).await?;
    for line in surface.status_history(block) {
        eprintln!("{}", line);
    }
    let view = controller
        .view(block)
        .context("Render produced no artifact")?;
    print_artifact(&view);
    if let ActivateOutcome::Rendered(state) = outcome {
        logging::info(&format!("render finished in state {}", state.as_str()));
    }

    match &view.content {
        ArtifactContent::Document { url } => {
            let resource = store.get(url).context("Rendered document was released")?;
            let path = out.unwrap_or_else(|| PathBuf::from("preview.html"));
            std::fs::write(&path, &resource.bytes)?;
            println!("{}", path.display());
            if open {
                controller.open_externally(block, &SystemOpener::new(store.clone()))?;
            }
        }
        ArtifactContent::Markup(markup) | ArtifactContent::ErrorMarkup(markup) => {
            let path = out.unwrap_or_else(|| PathBuf::from("diagram.svg"));
            std::fs::write(&path, markup.as_str())?;
            println!("{}", path.display());
            if open {
                SystemOpener::new(store.clone()).open_in_new_tab(&path.display().to_string())?;
            }
        }
        ArtifactContent::ErrorText(text) => anyhow::bail!("{}", text),
        ArtifactContent::Pending => anyhow::bail!("Render did not complete"),
    }
    Ok(())
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        _ => "bin",
    }
}

async fn run_image(url: &str, out: Option<PathBuf>) -> Result<()> {
    let store = Arc::new(ResourceStore::new());
    let surface = Arc::new(RecordingSurface::new());
    let resolver = LinkResolver::new(
        http_fetch(),
        store.clone(),
        surface.clone(),
        Arc::new(ProcessedSet::new()),
        ImageLinkPatterns::from(&config().images),
    );

    match resolver.resolve(NodeId(1), url).await {
        LinkOutcome::Image { url } => {
            let resource = store.get(&url).context("Image was released")?;
            let path = out.unwrap_or_else(|| {
                PathBuf::from(format!("image.{}", extension_for(&resource.mime)))
            });
            std::fs::write(&path, &resource.bytes)?;
            println!("{}", path.display());
            Ok(())
        }
        LinkOutcome::Failed(message) => anyhow::bail!("{}", message),
        LinkOutcome::Ignored => anyhow::bail!("Not a generated-image link: {}", url),
        LinkOutcome::AlreadyProcessed => Ok(()),
    }
}

async fn run_scan(page: &Path, render: bool) -> Result<()> {
    let html = read_input(page)?;
    let tree = Arc::new(MemoryTree::from_html(&html));
    let store = Arc::new(ResourceStore::new());
    let surface = Arc::new(RecordingSurface::new());
    let surface_dyn: Arc<dyn Surface> = surface.clone();
    let dispatcher = Arc::new(
        Dispatcher::from_config(
            tree.clone(),
            Arc::new(GeminiLocator::from_config(&config().images)),
            http_fetch(),
            store.clone(),
            surface_dyn,
            config(),
        )
        .with_opener(Arc::new(SystemOpener::new(store.clone()))),
    );

    let found = dispatcher.initial_scan();
    let controller = dispatcher.controller().clone();

    let (tx, rx) = dispatcher::event_channel();
    let runner = tokio::spawn(dispatcher.clone().run(rx));
    if render {
        for block in &found.blocks {
            tx.send(HostEvent::Activate(*block)).await?;
        }
    }
    tx.send(HostEvent::Shutdown).await?;
    runner.await?;

    println!("{} block(s)", found.blocks.len());
    for block in controller.blocks() {
        let classification = controller
            .classification(block)
            .map(|c| c.as_str())
            .unwrap_or("none");
        match controller.view(block) {
            Some(view) => println!(
                "  {} {} {} {}",
                block,
                classification,
                view.state.as_str(),
                view.status
            ),
            None => println!("  {} {} idle", block, classification),
        }
    }

    let links: Vec<NodeId> = tree
        .descendants(tree.root())
        .into_iter()
        .filter(|&node| surface.link(node).is_some())
        .collect();
    println!("{} image link(s)", links.len());
    for link in links {
        match surface.link(link) {
            Some(LinkView::Image { url }) => println!("  {} image {}", link, url),
            Some(LinkView::Error(message)) => println!("  {} error {}", link, message),
            Some(LinkView::Placeholder(text)) => println!("  {} pending {}", link, text),
            None => {}
        }
    }
    Ok(())
}

fn run_config(init: bool) -> Result<()> {
    if init {
        let path = Config::create_default_config_file()?;
        println!("Config file: {}", path.display());
    }
    println!("{}", config().display_string());
    if let Some(path) = logging::log_path() {
        println!("Log file: {}", path.display());
    }
    Ok(())
}
