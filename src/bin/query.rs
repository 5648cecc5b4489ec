use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use lexvec::{render_context, QueryEngine, StoreArgs, VectorStore};

#[derive(Parser, Debug)]
#[command(
    name = "lexvec-query",
    about = "Find the stored documents most similar to a piece of text"
)]
struct QueryCli {
    /// Query text
    query: String,

    /// Number of documents to return
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Print Title/Summary context blocks instead of JSON
    #[arg(long, default_value_t = false)]
    context: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    lexvec::init_logging();
    let cli = QueryCli::parse();
    let config = cli.store.build_config()?;

    let store = VectorStore::open(&config)
        .await
        .context("failed to open vector store")?;
    let engine = QueryEngine::new(&store, config.encoder()?)?;
    let hits = engine
        .query_similar(&cli.query, cli.top_k)
        .await
        .context("similarity query failed")?;

    let mut stdout = io::stdout().lock();
    if cli.context {
        if hits.is_empty() {
            writeln!(stdout, "No relevant documents found.")?;
        } else {
            writeln!(stdout, "{}", render_context(&hits))?;
        }
    } else {
        serde_json::to_writer_pretty(&mut stdout, &hits)?;
        writeln!(stdout)?;
    }
    drop(stdout);
    store.close().await;
    Ok(())
}
