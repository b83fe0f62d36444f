use anyhow::Result;
use clap::Parser;

use nfs_export_manager::config::{Action, Cli, Config};
use nfs_export_manager::{ExportContext, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (before tracing init)
    let config = Config::load(cli.config.as_deref())?;

    // Initialize tracing with configured log level
    // Priority: config file -> RUST_LOG env -> "info"
    let log_level_str = config.logging.effective_level();
    let log_level = match log_level_str.parse() {
        Ok(level) => level,
        Err(_) => {
            eprintln!(
                "Warning: Invalid log level '{}', falling back to 'info'",
                log_level_str
            );
            tracing::Level::INFO
        }
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    let action = cli.action.unwrap_or(Action::Sync);

    println!("NFS Export Manager");
    println!("==================");
    println!("Configuration:");
    println!("  Base path: {}", config.export.base_path.display());
    println!("  Exported name: {}", config.export.exported_name);
    println!("  Network: {}", config.export.network);
    println!("  Exports root: {}", config.host.exports_dir.display());
    println!("  Service unit: {}", config.service.unit);
    println!("  Log level: {}", log_level_str);
    println!("  Action: {:?}", action);
    println!();

    let ctx = ExportContext::system(&config);
    let server = Server::new(
        ctx,
        &config.export.base_path,
        &config.export.exported_name,
        &config.export.network,
    )
    .await?;

    for volume in &config.export.volumes {
        let fsid = server.add_volume(volume).await;
        println!("  ✓ Volume {} (fsid {})", volume.display(), fsid);
    }
    server.set_clients(config.export.clients.iter().cloned()).await;

    match action {
        Action::Sync => server.sync().await?,
        Action::Restart => server.restart().await?,
        Action::Stop => server.stop().await?,
    }

    println!();
    println!("Exported {} as {}", server.export_path(), server.export_name_path().display());
    for name in server.exported().await {
        println!("  ✓ {}", name);
    }

    Ok(())
}
