use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lexvec::{
    Document, Error, RefreshScope, SchemaState, StoreArgs, Synchronizer,
    UpsertReport, VectorStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "lexvec-upsert",
    about = "Embed documents and upsert them into a pgvector-backed Postgres table"
)]
struct UpsertCli {
    /// JSONL file with one document per line; omit to re-embed stored rows
    #[arg(long, env = "LEXVEC_INPUT")]
    input: Option<PathBuf>,

    /// Stored rows to re-embed when no input file is given
    #[arg(long, value_enum, default_value_t = RefreshScope::Missing)]
    refresh: RefreshScope,

    /// Number of documents encoded and written per batch
    #[arg(long, env = "LEXVEC_BATCH", default_value_t = 128)]
    batch_size: usize,

    /// Encoding worker threads
    #[arg(long, env = "LEXVEC_ENCODE_WORKERS", default_value_t = 1)]
    workers: usize,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    lexvec::init_logging();
    let cli = UpsertCli::parse();
    let config = cli.store.build_config()?;
    let batch_size = cli.batch_size.max(1);

    let store = VectorStore::open(&config)
        .await
        .context("failed to open vector store")?;
    if let SchemaState::EmbeddingsReset { previous } = store.schema_state() {
        println!(
            "Embedding width changed from {} to {}; all stored embeddings were cleared.",
            previous,
            store.dimension()
        );
    }
    let sync = Synchronizer::new(config.encoder()?).with_workers(cli.workers);

    let mut report = UpsertReport::default();
    let outcome = match &cli.input {
        Some(path) => upsert_file(&store, &sync, path, batch_size, &mut report).await,
        None => {
            let refreshed = absorb(&mut report, sync.refresh(&store, cli.refresh).await)
                .context("failed to refresh stored embeddings");
            if report.total() > 0 {
                render_progress(&report)?;
            }
            refreshed
        }
    };
    if report.total() > 0 {
        println!();
    }

    for failure in report.failures() {
        eprintln!("failed {}: {}", failure.id, failure.status);
    }
    println!(
        "Upserted {} document{} into {} ({} inserted, {} updated, {} failed).",
        report.total(),
        if report.total() == 1 { "" } else { "s" },
        store.table().qualified(),
        report.inserted,
        report.updated,
        report.failed
    );
    outcome?;
    let embedded = store.count_embedded().await?;
    let total = store.count().await?;
    println!("{embedded} of {total} rows carry an embedding.");
    store.close().await;
    Ok(())
}

async fn upsert_file(
    store: &VectorStore,
    sync: &Synchronizer,
    path: &Path,
    batch_size: usize,
    report: &mut UpsertReport,
) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open document input {:?}", path))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines().enumerate();

    let mut batch = Vec::with_capacity(batch_size);
    while let Some(document) = next_record(&mut lines)? {
        batch.push(document);
        if batch.len() >= batch_size {
            let written = absorb(report, sync.upsert(store, &batch).await);
            render_progress(report)?;
            written.context("upsert aborted")?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        let written = absorb(report, sync.upsert(store, &batch).await);
        render_progress(report)?;
        written.context("upsert aborted")?;
    }
    if report.total() == 0 {
        println!("No documents to upsert; nothing to do.");
    }
    Ok(())
}

/// Folds a batch result into `report`, keeping the outcomes of an aborted batch.
fn absorb(report: &mut UpsertReport, batch: lexvec::Result<UpsertReport>) -> lexvec::Result<()> {
    match batch {
        Ok(batch) => {
            report.merge(batch);
            Ok(())
        }
        Err(Error::BatchAborted {
            report: partial,
            source,
        }) => {
            report.merge(*partial);
            Err(*source)
        }
        Err(err) => Err(err),
    }
}

fn render_progress(report: &UpsertReport) -> Result<()> {
    let done = report.total();
    let plural = if done == 1 { "" } else { "s" };
    print!(
        "\rProcessed {} document{} ({} failed)...",
        done, plural, report.failed
    );
    io::stdout().flush()?;
    Ok(())
}

fn next_record<I>(lines: &mut I) -> Result<Option<Document>>
where
    I: Iterator<Item = (usize, std::io::Result<String>)>,
{
    for (line_no, line) in lines.by_ref() {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let document: Document = serde_json::from_str(&line)
            .with_context(|| format!("invalid document record at line {}", line_no + 1))?;
        return Ok(Some(document));
    }
    Ok(None)
}
