//! newsd - A Multi-Connection NNTP News Server
//!
//! This is the main entry point for the newsd server.
//! It sets up logging, the in-memory article store and the server, and
//! runs until Ctrl+C.

use newsd::config::{ArgsOutcome, ServerConfig, DEFAULT_PORT};
use newsd::storage::{ArticleStore, FeedQueue, LoggingGateway, MemoryStore};
use newsd::NewsServer;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Groups every fresh in-memory store starts with.
const SEED_GROUPS: &[(&str, &str)] = &[
    ("control", "Cancel and other control messages"),
    ("misc.test", "Testing group"),
];

fn print_help() {
    println!(
        r#"
newsd - A Multi-Connection NNTP News Server

USAGE:
    newsd [OPTIONS]

OPTIONS:
    -h, --host <HOST>               Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>               Port to listen on (default: {})
        --hostname <NAME>           Name used in the greeting, Path and Message-ID
        --max-article-size <BYTES>  Largest accepted article (default: 1048576)
        --timeout <SECONDS>         Idle timeout before a client is purged (default: 600)
        --workers <N>               Protocol worker tasks (default: CPU count)
        --pool-size <N>             Idle line buffers kept for reuse (default: 1024)
        --trust <IP>                Peer allowed to post into mailing-list groups
    -v, --version                   Print version information
        --help                      Print this help message

EXAMPLES:
    newsd                              # Start on 127.0.0.1:{}
    newsd --port 1119                  # Unprivileged port
    newsd --host 0.0.0.0 --hostname news.example.org

CONNECTING:
    Any NNTP client works; for a quick look use telnet or nc:
    $ nc 127.0.0.1 1119
    200 localhost newsd {} ready - posting allowed
    GROUP misc.test
    211 0 1 0 misc.test
    QUIT
    205 closing connection
"#,
        DEFAULT_PORT,
        DEFAULT_PORT,
        newsd::VERSION
    );
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
                                     __
       ____   ___  _      __ _____  ____/ /
      / __ \ / _ \| | /| / // ___/ / __  /
     / / / //  __/| |/ |/ /(__  ) / /_/ /
    /_/ /_/ \___/ |__/|__//____/  \__,_/

newsd v{} - Multi-Connection NNTP News Server
──────────────────────────────────────────────────────────────
Server started on {} as {}
Workers: {}   Idle timeout: {}s   Max article: {} bytes

Use Ctrl+C to shutdown gracefully.
"#,
        newsd::VERSION,
        config.bind_address(),
        config.hostname,
        config.worker_count,
        config.idle_timeout.as_secs(),
        config.max_article_size
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let mut config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(ArgsOutcome::Run(config)) => config,
        Ok(ArgsOutcome::Help) => {
            print_help();
            return Ok(());
        }
        Ok(ArgsOutcome::Version) => {
            println!("newsd version {}", newsd::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Create the article store and let it override the size limit and timeout
    let store = Arc::new(MemoryStore::new());
    for (name, description) in SEED_GROUPS {
        store.create_group(name, description);
    }
    config.apply_store_overrides(store.as_ref()).await?;
    info!(groups = store.groups().await?.len(), "Article store initialized");

    // Drain the peer feed; downstream feeding happens outside this process
    let (feed, mut articles) = FeedQueue::new();
    tokio::spawn(async move {
        while let Some(article) = articles.recv().await {
            debug!(
                message_id = article.message_id().unwrap_or("<none>"),
                "Article queued for peer feed"
            );
        }
    });

    print_banner(&config);

    let server = NewsServer::bind(config, store, Arc::new(LoggingGateway), feed).await?;
    info!("Listening on {}", server.local_addr()?);

    // Set up graceful shutdown
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    server.run_until(shutdown).await;

    info!("Server shutdown complete");
    Ok(())
}
