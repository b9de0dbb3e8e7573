//! Sessions command implementation

use std::path::Path;

use anyhow::Result;

use ttyscribe::recovery::ContextBuilder;

/// List interrupted sessions worth restoring, most recent first
pub fn sessions_command(data_dir: &Path) -> Result<()> {
    let builder = ContextBuilder::new(data_dir.to_path_buf());
    let sessions = builder.get_recoverable_sessions();

    if sessions.is_empty() {
        println!("No recoverable sessions.");
        return Ok(());
    }

    println!("Recoverable sessions ({}):\n", sessions.len());
    for session in &sessions {
        let Some(context) = builder.build_restore_context(session) else {
            continue;
        };
        println!("  {} - {}", session.conversation_id, context.summary);
        if let Some(last) = &context.last_user_message {
            println!("    Last message: {}", last);
        }
        println!();
    }

    Ok(())
}
