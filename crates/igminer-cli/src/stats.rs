use anyhow::Context as _;

use crate::setup::Context;

pub(crate) async fn run_stats(ctx: &Context) -> anyhow::Result<()> {
    let storage = igminer_db::open_storage(&ctx.storage)
        .await
        .context("failed to open storage")?;
    let stats = storage.stats().await;
    storage.close().await.context("failed to close storage")?;
    let stats = stats.context("failed to read storage counts")?;

    println!();
    println!("  Backend:        {}", storage.name());
    println!("  Posts:          {}", stats.posts);
    println!("  Comments:       {}", stats.comments);
    println!("  Users:          {}", stats.users);
    println!("  Enriched users: {}", stats.enriched_users);
    println!();
    Ok(())
}
