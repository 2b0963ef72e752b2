use crate::cli::CacheAction;
use crate::commands::session::index_for;
use crate::commands::GlobalOptions;
use crate::config::ProjectConfig;
use crate::result::{Result, EXIT_SUCCESS};

/// Cache commands work without a config file; the default cache is used then.
pub async fn execute(options: &GlobalOptions, action: CacheAction) -> Result<i32> {
    let path = options.config_path();
    let config = if path.is_file() {
        ProjectConfig::from_file(&path).await?
    } else {
        ProjectConfig::default()
    };
    let index = index_for(&config)?;

    match action {
        CacheAction::List => {
            let entries = index.list().await?;
            if entries.is_empty() {
                println!("No cached toolchains in {}", index.dir().display());
            }
            for entry in entries {
                let bundle = &entry.bundle;
                println!(
                    "{} {} ({}) provisioned {}{}",
                    bundle.channel,
                    bundle.target,
                    bundle.release,
                    entry.provisioned_at.format("%Y-%m-%d %H:%M"),
                    if bundle.is_present() { "" } else { " [missing]" }
                );
            }
        }
        CacheAction::Prune => {
            let removed = index.prune(|bundle| bundle.is_present()).await?;
            println!("Removed {} stale toolchain entries", removed);
        }
        CacheAction::Clean => {
            let removed = index.clear().await?;
            println!("Removed {} toolchain entries", removed);
        }
    }

    Ok(EXIT_SUCCESS)
}
