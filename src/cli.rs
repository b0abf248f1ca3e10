use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use readmark::client::{ApiClient, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
use readmark::dictionary::{DEFAULT_CACHE_SIZE, DEFAULT_DICTIONARY_URL, WordData};
use readmark::highlight::{Highlight, HighlightDraft, NotePatch};
use readmark::passage::{self, PassageDocument};
use readmark::render::{Segment, render_passage};
use readmark::repository::MEMORY_URL;
use readmark::selection::resolve_selection;
use readmark::span::Span;
use readmark::sync::HighlightSync;
use readmark::web::{self, WebConfig};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "readmark=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(
    name = "readmark",
    about = "Highlight a reading passage and look words up",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Base URL of the highlight API, including the `/api` prefix.
    #[arg(long, global = true, env = "READMARK_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Request timeout for client commands, in seconds.
    #[arg(long, global = true, env = "READMARK_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Manage stored highlights.
    #[command(subcommand)]
    Highlights(HighlightCommand),
    /// Look a word up through the server's dictionary proxy.
    Lookup {
        word: String,
    },
    /// Print the reading passage with highlights marked.
    Passage,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,
    #[arg(short, long, env = "PORT", default_value_t = 3001)]
    port: u16,
    /// `memory:` or `file:<path>`.
    #[arg(long, env = "HIGHLIGHT_STORE_URL", default_value = MEMORY_URL)]
    store: String,
    #[arg(long, env = "DICTIONARY_API_URL", default_value = DEFAULT_DICTIONARY_URL)]
    dictionary_url: String,
    /// Cached dictionary entries; 0 disables the cache.
    #[arg(long, env = "DICTIONARY_CACHE_SIZE", default_value_t = DEFAULT_CACHE_SIZE)]
    cache_size: usize,
}

#[derive(Subcommand, Debug)]
enum HighlightCommand {
    /// List all highlights.
    List,
    /// Highlight text from the passage.
    ///
    /// Without offsets, the first occurrence of TEXT in the passage is used;
    /// text not found there is saved without a position.
    Add {
        text: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// Paragraph to search in, or the paragraph of --start/--end.
        #[arg(long)]
        paragraph: Option<usize>,
        #[arg(long, requires = "end")]
        start: Option<usize>,
        #[arg(long, requires = "start")]
        end: Option<usize>,
    },
    /// Replace the note of a highlight. Omitting NOTE clears it.
    Note {
        id: String,
        note: Option<String>,
    },
    /// Delete a highlight.
    Delete {
        id: String,
    },
}

pub fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        json: as_json,
        api_url,
        timeout,
        command,
    } = cli;
    let client = || ApiClient::new(&api_url, Duration::from_secs(timeout));
    match command {
        Command::Serve(args) => handle_serve(args).await,
        Command::Highlights(HighlightCommand::List) => handle_list(&client()?, as_json).await,
        Command::Highlights(HighlightCommand::Add {
            text,
            note,
            color,
            paragraph,
            start,
            end,
        }) => {
            let position = resolve_position(&text, paragraph, start.zip(end))?;
            let mut draft = HighlightDraft::new(text.trim()).with_position(position);
            draft.note = note;
            draft.color = color;
            handle_add(&client()?, draft, as_json).await
        }
        Command::Highlights(HighlightCommand::Note { id, note }) => {
            handle_note(&client()?, &id, note, as_json).await
        }
        Command::Highlights(HighlightCommand::Delete { id }) => {
            handle_delete(&client()?, &id, as_json).await
        }
        Command::Lookup { word } => handle_lookup(client()?, &word, as_json).await,
        Command::Passage => handle_passage(client()?, as_json).await,
    }
}

async fn handle_serve(args: ServeArgs) -> Result<()> {
    let config = WebConfig {
        addr: SocketAddr::new(args.host, args.port),
        store_url: args.store,
        dictionary_url: args.dictionary_url,
        dictionary_cache_size: args.cache_size,
    };
    web::serve(config).await?;
    Ok(())
}

async fn handle_list(client: &ApiClient, as_json: bool) -> Result<()> {
    let highlights = client.list().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&highlights)?);
        return Ok(());
    }
    if highlights.is_empty() {
        println!("No highlights yet.");
    }
    for highlight in &highlights {
        print_highlight(highlight);
    }
    Ok(())
}

async fn handle_add(client: &ApiClient, draft: HighlightDraft, as_json: bool) -> Result<()> {
    draft.validate()?;
    let created = client.create(&draft).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&created)?);
    } else {
        print_highlight(&created);
    }
    Ok(())
}

async fn handle_note(
    client: &ApiClient,
    id: &str,
    note: Option<String>,
    as_json: bool,
) -> Result<()> {
    let updated = client
        .update_note(id, &NotePatch::set(note))
        .await
        .with_context(|| format!("failed to update highlight {id}"))?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        print_highlight(&updated);
    }
    Ok(())
}

async fn handle_delete(client: &ApiClient, id: &str, as_json: bool) -> Result<()> {
    let message = client
        .delete(id)
        .await
        .with_context(|| format!("failed to delete highlight {id}"))?;
    if as_json {
        println!("{}", json!({ "id": id, "message": message }));
    } else {
        println!("{message}");
    }
    Ok(())
}

async fn handle_lookup(client: ApiClient, word: &str, as_json: bool) -> Result<()> {
    let mut sync = HighlightSync::new(client);
    if !sync.look_up(word).await {
        let state = sync.lookup_state();
        bail!(
            "{}: {}",
            state.word,
            state.error.as_deref().unwrap_or("lookup failed")
        );
    }
    let state = sync.lookup_state();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&state.data)?);
        return Ok(());
    }
    match state.word_data() {
        Some(data) => print_word(&data),
        None => println!("{}", serde_json::to_string_pretty(&state.data)?),
    }
    Ok(())
}

async fn handle_passage(client: ApiClient, as_json: bool) -> Result<()> {
    let mut sync = HighlightSync::new(client);
    if !sync.fetch_all().await {
        for notice in sync.take_notices() {
            eprintln!("warning: {notice}");
        }
    }
    let highlights = sync.store().as_slice();
    let view = render_passage(highlights);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("{}\n", view.title);
    for segments in &view.paragraphs {
        let line: String = segments
            .iter()
            .map(|segment| match segment {
                Segment::Plain { text } => (*text).to_string(),
                Segment::Highlighted { text, .. } => format!("[{text}]"),
            })
            .collect();
        println!("{line}\n");
    }
    let notes: Vec<_> = highlights.iter().filter(|h| h.has_note()).collect();
    if !notes.is_empty() {
        println!("Notes:");
        for highlight in notes {
            print_highlight(highlight);
        }
    }
    Ok(())
}

/// Span for `text`: explicit offsets when given, otherwise the first
/// occurrence in the passage.
fn resolve_position(
    text: &str,
    paragraph: Option<usize>,
    offsets: Option<(usize, usize)>,
) -> Result<Option<Span>> {
    if let Some((start, end)) = offsets {
        let paragraph = paragraph.context("--paragraph is required with --start/--end")?;
        if paragraph >= passage::paragraph_count() {
            bail!(
                "paragraph {paragraph} is out of range (the passage has {})",
                passage::paragraph_count()
            );
        }
        return Ok(Some(Span::new(paragraph, start, end)));
    }
    let document = PassageDocument::build();
    let position = document
        .find(text.trim(), paragraph)
        .and_then(|selection| resolve_selection(&document.tree, &selection))
        .and_then(|resolved| resolved.position);
    if position.is_none() {
        warn!(text = text.trim(), "text not found in the passage; saving without a position");
    }
    Ok(position)
}

fn print_highlight(highlight: &Highlight) {
    let location = match highlight.inline_span() {
        Some(span) => format!(
            "p{} {}..{}",
            span.paragraph_index, span.start_offset, span.end_offset
        ),
        None => "note only".to_string(),
    };
    println!(
        "{id}  {color}  [{location}]  {text}",
        id = highlight.id,
        color = highlight.color,
        text = highlight.text
    );
    match highlight.note.as_deref() {
        Some(note) if highlight.has_note() => println!("    note: {note}"),
        _ => println!("    No note added"),
    }
}

fn print_word(data: &WordData) {
    match data.pronunciation() {
        Some(pronunciation) => println!("{}  {pronunciation}", data.word),
        None => println!("{}", data.word),
    }
    if let Some(audio) = data.audio_url() {
        println!("audio: {audio}");
    }
    println!("{} definitions", data.definition_count());
    for meaning in &data.meanings {
        println!("\n{}", meaning.part_of_speech);
        for (index, definition) in meaning.definitions.iter().enumerate() {
            println!("  {}. {}", index + 1, definition.definition);
            if let Some(example) = &definition.example {
                println!("     \"{example}\"");
            }
            if !definition.synonyms.is_empty() {
                println!("     synonyms: {}", definition.synonyms.join(", "));
            }
            if !definition.antonyms.is_empty() {
                println!("     antonyms: {}", definition.antonyms.join(", "));
            }
        }
    }
}
