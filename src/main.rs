use std::net::SocketAddr;

use clap::Parser;
use jknotes::cli::{
    Args, build_config, init_logging, load_secrets, open_database, validate_lifetimes,
};
use jknotes::{create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some((access_secret, refresh_secret)) = load_secrets(
        args.access_secret_file.as_deref(),
        args.refresh_secret_file.as_deref(),
    ) else {
        std::process::exit(1);
    };

    let Some(lifetimes) = validate_lifetimes(args.access_ttl_secs, args.refresh_ttl_secs) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    init_cleanup(&db).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read local address");
        std::process::exit(1);
    });

    let config = build_config(
        db,
        access_secret,
        refresh_secret,
        lifetimes,
        args.ip_header,
        args.no_rate_limit,
    );
    let app = create_app(&config);

    info!(
        address = %local_addr,
        access_ttl_secs = lifetimes.access_secs(),
        refresh_ttl_secs = lifetimes.refresh_secs(),
        rate_limit = config.rate_limit,
        "Listening"
    );

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
