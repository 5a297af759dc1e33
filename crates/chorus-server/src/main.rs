//! Chorus — fan one prompt out to many chat sessions and collect the replies.

use std::path::PathBuf;
use std::sync::Arc;

use chorus_browser::SessionStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod relay;
mod routes;
mod state;

use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("CHORUS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

/// Print the persisted session registry without starting the server.
fn print_sessions(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let paths = chorus_core::DataPaths::new(data_dir)?;
    let store = SessionStore::open(&paths.sessions_file);
    let sessions = store.list();
    if sessions.is_empty() {
        println!("No persisted sessions in {}", paths.sessions_file.display());
        return Ok(());
    }
    println!("{:<6} {:<24} {:<24} {:<10} URL", "INDEX", "ID", "AGENT", "ADAPTER");
    for s in sessions {
        println!(
            "{:<6} {:<24} {:<24} {:<10} {}",
            s.index, s.id, s.agent_handle, s.adapter_key, s.target_url
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Handle CLI subcommands
    if args.len() > 1 {
        match args[1].as_str() {
            "sessions" => {
                let data_dir = if args.len() > 2 {
                    PathBuf::from(&args[2])
                } else {
                    resolve_data_dir()
                };
                return print_sessions(&data_dir);
            }
            "--help" | "-h" | "help" => {
                println!("Chorus — multi-session prompt fan-out and reply harvesting");
                println!();
                println!("Usage: chorus [command]");
                println!();
                println!("Commands:");
                println!("  (none)                   Start the server");
                println!("  sessions [data-dir]      List persisted sessions");
                println!("  help                     Show this help message");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'chorus help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    // Normal server startup
    let data_dir = resolve_data_dir();

    info!("Data directory: {}", data_dir.display());

    let config = chorus_core::ChorusConfig::from_env(&data_dir)?;
    let port = config.port;

    // Persisted sessions are reconciled once the shell connects
    let state = Arc::new(AppState::new(config));
    info!(
        "Loaded {} persisted sessions",
        state.controller.store().len()
    );

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Chorus server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
