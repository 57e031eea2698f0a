/// Scriptpool administrative CLI
///
/// Runs migrations and manages the stored-function collection without
/// starting a server.
use scriptpool_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
