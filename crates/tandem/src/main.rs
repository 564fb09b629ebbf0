use tandem::settings::Settings;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "Invalid launcher settings");
            std::process::exit(2);
        }
    };

    match tandem::run(settings).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "Launcher failed");
            std::process::exit(1);
        }
    }
}
