mod cli;
mod config;
mod engine;
mod error;
mod path;
mod sync;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::Config;
use engine::{create_engine, EngineConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::Ordering;
use sync::policy::Strategy;
use sync::SyncSession;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    if cli.list_profiles {
        let profiles = config.list_profiles();
        if profiles.is_empty() {
            println!("No profiles configured");
            println!("\nCreate profiles in: {}", Config::config_path()?.display());
        } else {
            println!("Available profiles:");
            for name in profiles {
                println!("  {}", name);
            }
        }
        return Ok(());
    }

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    // Resolve endpoints: CLI args take precedence over the profile
    let mut source_config = cli.source.as_ref().map(|p| p.to_engine_config());
    let mut dest_config = cli.destination.as_ref().map(|p| p.to_engine_config());
    let mut strategy = cli.strategy;
    let mut ignored_folders = cli.ignored_folders.clone();

    if let Some(ref profile_name) = cli.profile {
        let profile = config
            .get_profile(profile_name)
            .ok_or_else(|| anyhow::anyhow!("Profile '{}' not found", profile_name))?;

        if source_config.is_none() {
            source_config = profile.source.clone();
        }
        if dest_config.is_none() {
            dest_config = profile.destination.clone();
        }
        if strategy.is_none() {
            strategy = profile.strategy;
        }
        if ignored_folders.is_empty() {
            ignored_folders = profile.ignore.clone();
        }
    }

    let source_config: EngineConfig =
        source_config.ok_or_else(|| anyhow::anyhow!("SOURCE is required (argument or profile)"))?;
    let dest_config: EngineConfig = dest_config
        .ok_or_else(|| anyhow::anyhow!("DESTINATION is required (argument or profile)"))?;
    let strategy = strategy.unwrap_or(Strategy::Mirror);

    if !cli.quiet && !cli.json {
        println!("dsync v{}", env!("CARGO_PKG_VERSION"));
        println!("Comparing {} → {}", source_config, dest_config);
        if cli.dry_run {
            println!("Mode: Dry-run (no changes will be made)\n");
        }
    }

    let mut session = SyncSession::new(strategy);
    session.set_source(Some(create_engine(&source_config)));
    session.set_destination(Some(create_engine(&dest_config)));
    session.set_ignored_folders(ignored_folders);

    // Ctrl-c cancels cooperatively: the current file finishes, the rest
    // stays queued
    let stop = session.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current entry");
            stop.store(true, Ordering::SeqCst);
        }
    });

    // Gate on reachability before touching either tree
    let (source_ok, dest_ok) = session.validate().await;
    if !source_ok {
        anyhow::bail!("Source {} is not reachable", source_config);
    }
    if !dest_ok {
        if cli.dry_run {
            // Preview what the source would contribute
            if !cli.quiet && !cli.json {
                println!("Destination unreachable; previewing source side only\n");
            }
            session.set_destination(None);
        } else {
            anyhow::bail!("Destination {} is not reachable", dest_config);
        }
    }

    let totals = session.compare().await?;

    if cli.json {
        println!("{}", serde_json::to_string(&totals)?);
    } else if !cli.quiet {
        println!(
            "{} file(s) differ, {} to transfer",
            totals.total_count.to_string().blue(),
            format_bytes(totals.total_bytes).cyan()
        );
    }

    if cli.diff && !cli.json {
        print_diff_tree(&session, None, 1);
    }

    if cli.dry_run {
        return Ok(());
    }

    // Run the transfer with a byte-level progress bar
    let bar = if cli.quiet || cli.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(totals.total_bytes);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar
    };

    let progress_bar = bar.clone();
    let progress = session
        .sync(move |progress| {
            progress_bar.set_position(progress.bytes_transferred);
            progress_bar.set_message(format!("{} file(s)", progress.transferred_count));
        })
        .await?;
    bar.finish_and_clear();

    if cli.json {
        println!("{}", serde_json::to_string(&progress)?);
    } else if !cli.quiet {
        let remaining = session.remaining();
        if remaining > 0 {
            println!("\n{}\n", "✓ Sync stopped".yellow().bold());
            println!("  Entries remaining: {}", remaining.to_string().yellow());
        } else {
            println!("\n{}\n", "✓ Sync complete".green().bold());
        }
        println!(
            "  Files transferred: {}",
            progress.transferred_count.to_string().green()
        );
        println!(
            "  Bytes transferred: {}",
            format_bytes(progress.bytes_transferred).cyan()
        );
    }

    Ok(())
}

/// Render the diff tree through the session's lazy child query
fn print_diff_tree(session: &SyncSession, parent_id: Option<&str>, depth: usize) {
    for node in session.children(parent_id) {
        if node.is_dir {
            println!("{}{}/", "  ".repeat(depth), node.file_name.bold());
            print_diff_tree(session, Some(&node.id), depth + 1);
        } else {
            let resolution = node
                .resolution
                .map(|r| r.to_string())
                .unwrap_or_else(|| "??".to_string());
            println!(
                "{}{} {} ({})",
                "  ".repeat(depth),
                resolution,
                node.file_name,
                format_bytes(node.transfer_bytes)
            );
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
