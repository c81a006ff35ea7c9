#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = acadai_rust::run().await {
        eprintln!("acadai-rust fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
