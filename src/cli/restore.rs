//! Restore command implementation

use std::path::Path;

use anyhow::{bail, Result};

use ttyscribe::logger::persist;
use ttyscribe::recovery::ContextBuilder;

/// Print the restore context for one conversation, optionally marking it
/// restored on disk.
pub fn restore_command(data_dir: &Path, id: &str, mark: bool) -> Result<()> {
    let Some((_, conversation)) = persist::find_by_id(data_dir, id) else {
        bail!("conversation {} not found in {}", id, data_dir.display());
    };

    let builder = ContextBuilder::new(data_dir.to_path_buf());
    let Some(context) = builder.build_restore_context(&conversation) else {
        bail!("conversation {} has no turns to restore", id);
    };

    println!("{}\n", context.summary);
    println!("Restore prompt:\n  {}\n", context.restore_prompt);
    println!("Transcript:");
    for line in context.full_transcript.lines() {
        println!("  {}", line);
    }

    if mark {
        builder.mark_as_restored(id)?;
        println!("\nMarked as restored.");
    }

    Ok(())
}
