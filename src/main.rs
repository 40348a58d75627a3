use clap::Parser;

use tapserver::{cli, server};

fn main() {
    let args = cli::Args::parse();

    // Panics still unwind (and run interface teardown), but get logged first.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in tapserver: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapserver=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = server::run(args) {
        tracing::error!("error: {e:#}");
        std::process::exit(3);
    }
}
