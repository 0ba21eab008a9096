use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notes_sync::{
    prefetch_notes, AppConfig, InMemoryNotesBackend, NoteTag, NotesController, NotesView,
    QueryCache, RequestParams, TracingNotifier,
};

#[derive(Parser)]
#[command(name = "notes-sync")]
#[command(about = "Paginated, searchable notes list over an in-memory backend", long_about = None)]
struct Cli {
    /// Number of generated notes
    #[arg(short, long, default_value = "50")]
    seed: usize,

    /// Simulated backend latency in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one page, prefetched and hydrated like a server request
    List {
        /// Query string, e.g. "page=2&search=work"
        #[arg(short, long, default_value = "")]
        query: String,
    },

    /// Create a note and show the refreshed first page
    Create {
        /// Note title
        title: String,

        /// Note content
        #[arg(short, long, default_value = "")]
        content: String,

        /// Tag (Todo, Work, Personal, Meeting, Shopping)
        #[arg(short, long, default_value = "Todo")]
        tag: NoteTag,
    },

    /// Page, search and create in one session and print cache statistics
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notes_sync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let mut backend = InMemoryNotesBackend::seeded(cli.seed);
    if cli.latency_ms > 0 {
        backend = backend.with_latency(Duration::from_millis(cli.latency_ms));
    }
    let backend = Arc::new(backend);
    let cache = QueryCache::new(config.cache.clone());

    match cli.command {
        Commands::List { query } => {
            let params = RequestParams::from_query(&query);
            let bootstrap = prefetch_notes(backend.clone(), &params, &config).await;

            let mut list = NotesController::bootstrap(
                cache.clone(),
                backend,
                Arc::new(TracingNotifier),
                config,
                bootstrap,
            )
            .await;
            print_view(&list.settle().await);
            list.teardown().await;
        }

        Commands::Create {
            title,
            content,
            tag,
        } => {
            let mut list = NotesController::mount(
                cache.clone(),
                backend,
                Arc::new(TracingNotifier),
                config,
                1,
                "",
            )
            .await;
            list.settle().await;

            let mut form = list.open_form();
            form.set_title(title);
            form.set_content(content);
            form.set_tag(tag);
            let note = form.submit().await?;
            println!("Created {} ({})", note.id, note.tag);

            print_view(&list.settle().await);
            list.teardown().await;
        }

        Commands::Demo => {
            let mut list = NotesController::mount(
                cache.clone(),
                backend,
                Arc::new(TracingNotifier),
                config,
                1,
                "",
            )
            .await;
            print_view(&list.settle().await);

            list.set_page(3).await;
            print_view(&list.settle().await);

            list.set_page(1).await;
            print_view(&list.settle().await);

            list.input_search("Note 1");
            list.wait_for_search_commit().await;
            print_view(&list.settle().await);

            let mut form = list.open_form();
            form.set_title("Note 1 follow-up");
            form.set_tag(NoteTag::Work);
            form.submit().await?;
            print_view(&list.settle().await);

            list.teardown().await;
            println!("{}", cache.stats().await);
        }
    }

    cache.clear().await;
    Ok(())
}

fn print_view(view: &NotesView) {
    println!(
        "page {}/{} search {:?}: {} of {} notes",
        view.page,
        view.total_pages,
        view.committed_search,
        view.items.len(),
        view.total_items
    );
    if let Some(error) = &view.error {
        println!("  error: {}", error);
    }
    if view.is_empty() {
        println!("  No notes found.");
    }
    for note in &view.items {
        println!("  [{}] {}", note.tag, note.title);
    }
}
