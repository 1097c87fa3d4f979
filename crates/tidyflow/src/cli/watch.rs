//! `tidyflow watch` - run the watcher until interrupted

use anyhow::Result;
use tidyflow::{Organizer, OrganizerEvent, ScanOptions};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Debug)]
pub struct WatchArgs {
    /// Scan existing files in every watched directory before watching
    pub scan_existing: bool,
}

pub async fn run(args: WatchArgs, organizer: &Organizer) -> Result<()> {
    let mut events = organizer.events().subscribe();

    if args.scan_existing {
        let watcher = organizer.watcher().lock().await;
        for dir in watcher.directories().iter().filter(|d| d.enabled) {
            let options = ScanOptions {
                recursive: dir.recursive,
            };
            match watcher.scan_directory(&dir.path, options).await {
                Ok(summary) => info!(
                    dir = %dir.path.display(),
                    created = summary.proposals_created,
                    "Initial scan finished"
                ),
                Err(e) => warn!("Initial scan of {} failed: {}", dir.path.display(), e),
            }
        }
    }

    organizer.start().await?;
    println!("Watching for new files. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    organizer.stop().await?;
    Ok(())
}

fn print_event(event: &OrganizerEvent) {
    match event {
        OrganizerEvent::ProposalCreated {
            id,
            source_path,
            category,
        } => println!(
            "[proposed] {} -> {} ({})",
            source_path.display(),
            category,
            id
        ),
        OrganizerEvent::ProposalApproved {
            destination_path, ..
        } => println!("[moved] {}", destination_path.display()),
        OrganizerEvent::ProposalInvalidated { id, reason } => {
            println!("[invalid] {} ({})", id, reason)
        }
        OrganizerEvent::Error {
            path: Some(path),
            message,
        } => println!("[error] {}: {}", path.display(), message),
        OrganizerEvent::Error {
            path: None,
            message,
        } => println!("[error] {}", message),
        _ => {}
    }
}
