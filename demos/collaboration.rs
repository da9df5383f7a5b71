/// Multi-Actor Presence Example
///
/// This example demonstrates:
/// - Two workspaces sharing an in-process broadcast bus
/// - Remote cursors and advisory cell locks
/// - Row updates propagating between actors without history
/// - Stale cursor eviction

use chrono::{Duration, Utc};
use livegrid::{ActorIdentity, BroadcastBus, GridConfig, GridError, Workspace};

fn main() -> livegrid::Result<()> {
    env_logger::init();
    println!("=== LiveGrid Collaboration Example ===\n");

    let config = GridConfig::default();
    let bus = BroadcastBus::from_config(&config);
    let mut ann = Workspace::in_memory(config.clone(), "ann")
        .join(&bus, ActorIdentity::new("ann", "Ann", "#ef4444"));
    let mut ben = Workspace::in_memory(config.clone(), "ben")
        .join(&bus, ActorIdentity::new("ben", "Ben", "#3b82f6"));

    let mut ann_grid = ann.grid("projects", "admin");
    let mut ben_grid = ben.grid("projects", "admin");

    // 1. Ann starts editing
    println!("1. Ann starts editing GEN-3/name...");
    ann_grid.click("GEN-3", "name")?;
    ann_grid.begin_edit()?;
    ben_grid.tick(Utc::now());
    for cursor in ben_grid.remote_cursors() {
        println!(
            "   Ben sees {} at {:?}/{:?} (editing: {})",
            cursor.user_name, cursor.focused_row_id, cursor.focused_col_key, cursor.is_editing
        );
    }

    // 2. Ben is warned
    println!("\n2. Ben tries the same cell...");
    ben_grid.click("GEN-3", "name")?;
    match ben_grid.begin_edit() {
        Err(GridError::CellLocked { user_name, .. }) => println!("   Locked by {}", user_name),
        other => println!("   Unexpected: {:?}", other.err()),
    }

    // 3. Ann commits
    println!("\n3. Ann commits a new name...");
    ann_grid.set_buffer("Harbour Terminal");
    ann_grid.commit()?;
    ben_grid.tick(Utc::now());
    println!(
        "   Ben now sees: {}",
        ben_grid.cell_text("GEN-3", "name").unwrap_or_default()
    );
    println!(
        "   Ben's undo stack: {} entries",
        ben.history().borrow().undo_len()
    );

    // 4. Ann goes quiet
    println!("\n4. Sweeping after Ann goes idle...");
    let later = Utc::now() + Duration::milliseconds(config.presence_timeout_ms as i64 + 1_000);
    let evicted = ben.tick(later);
    println!("   Evicted: {:?}", evicted);
    ann.tick(later);

    println!("\n=== Example Complete ===");
    Ok(())
}
