//! `tidyflow scan` - propose moves for files already in a directory

use super::output::print_json;
use anyhow::Result;
use std::path::PathBuf;
use tidyflow::{Organizer, ScanOptions};

#[derive(Debug)]
pub struct ScanArgs {
    pub path: PathBuf,
    pub recursive: bool,
    pub json: bool,
}

pub async fn run(args: ScanArgs, organizer: &Organizer) -> Result<()> {
    let options = ScanOptions {
        recursive: args.recursive,
    };
    let summary = organizer
        .watcher()
        .lock()
        .await
        .scan_directory(&args.path, options)
        .await?;

    if args.json {
        return print_json(&summary);
    }

    println!(
        "Scanned {}: {} files, {} new proposals, {} skipped",
        args.path.display(),
        summary.files_found,
        summary.proposals_created,
        summary.skipped
    );
    for error in &summary.errors {
        println!("  ! {}", error);
    }
    if summary.proposals_created > 0 {
        println!("Review with: tidyflow proposals list");
    }
    Ok(())
}
