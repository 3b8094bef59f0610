use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;
use upload_bridge::UploadRegistry;
use upload_bridge_server::{Server, ServerConfig};

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match std::env::args().nth(1) {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(path, cause = %e, "failed to load config");
                return;
            }
        },
        None => ServerConfig::default(),
    };

    info!(route = %config.bridge.upload_route(), "serving upload route");

    // file inputs opening remote streams share this registry with the server
    let registry = UploadRegistry::new();
    let server = match Server::builder().address(config.address).registry(registry).config(config.bridge).build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to build server");
            return;
        }
    };

    if let Err(e) = server.start().await {
        error!(cause = %e, "server stopped");
    }
}
