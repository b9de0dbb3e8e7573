//! Validate command implementation

use std::path::Path;

use anyhow::Result;

use ttyscribe::events::health::validate_dir;

/// Validate every persisted conversation file under the data directory
pub fn validate_command(data_dir: &Path) -> Result<()> {
    let results = validate_dir(data_dir);

    if results.is_empty() {
        println!("No conversation files in {}.", data_dir.display());
        return Ok(());
    }

    let mut invalid = 0usize;
    for result in &results {
        if result.valid {
            println!("  ok      {}", result.file);
        } else {
            invalid += 1;
            println!(
                "  INVALID {} ({})",
                result.file,
                result.reason.as_deref().unwrap_or("unknown")
            );
        }
    }

    println!("\n{} files checked, {} invalid.", results.len(), invalid);
    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}
