use anyhow::{Context, Result};
use clap::Parser;
use lexvec::{StoreArgs, VectorStore};

#[derive(Parser, Debug)]
#[command(
    name = "lexvec-index",
    about = "Drop and rebuild the IVFFlat index over the embedding column"
)]
struct IndexCli {
    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    lexvec::init_logging();
    let cli = IndexCli::parse();
    let config = cli.store.build_config()?;

    let mut store = VectorStore::open(&config)
        .await
        .context("failed to open vector store")?;
    let embedded = store.count_embedded().await?;
    if embedded == 0 {
        println!("No embedded rows yet; the index will be trained on an empty table.");
    }
    store
        .build_index(config.ivf_lists(), config.metric())
        .await
        .context("failed to rebuild vector index")?;
    println!(
        "Rebuilt {} on {} (lists = {}, {:?} distance, {} embedded rows).",
        store.table().index_name(),
        store.table().qualified(),
        config.ivf_lists(),
        config.metric(),
        embedded
    );
    store.close().await;
    Ok(())
}
