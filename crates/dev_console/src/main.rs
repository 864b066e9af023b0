//! Entry point for the dev console binary.

use dev_console::{Application, CliArgs};
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Console error: {:#}", e);
                eprintln!("❌ {e:#}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start dev console: {e:#}");
            std::process::exit(1);
        }
    }
}
