//! Connectivity check: acquires the store connection once and exits
//! non-zero if that fails.

use docstore_link::{AcquisitionCoordinator, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = StoreConfig::from_env()?;
    let coordinator = AcquisitionCoordinator::http(config);

    println!("testing store connection...");
    match coordinator.acquire().await {
        Ok(conn) => {
            conn.ping().await?;
            println!(
                "connected to {} (server: {})",
                conn.endpoint(),
                conn.server().unwrap_or("unknown")
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("store connection failed: {err}");
            std::process::exit(1);
        }
    }
}
