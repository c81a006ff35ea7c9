#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = acadai_rust::run_worker().await {
        eprintln!("acadai-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
