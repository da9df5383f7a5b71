/// Grid Session Example
///
/// This example demonstrates:
/// - Loading a workspace with the built-in dataset
/// - Filtering and sorting the projects grid
/// - Editing a cell through the focus state machine
/// - Undo/redo and the per-row history diff

use livegrid::{Direction, GridConfig, GridKey, Workspace};

fn main() -> livegrid::Result<()> {
    env_logger::init();
    println!("=== LiveGrid Session Example ===\n");

    // 1. Workspace
    println!("1. Opening workspace...");
    let mut config = GridConfig::default();
    config.apply_env_overrides()?;
    let mut ws = Workspace::in_memory(config, "u1");
    let stats = ws.store().borrow().total_stats();
    println!(
        "   {} tables, {} rows, {} files\n",
        stats.total_tables, stats.total_rows, stats.total_files
    );

    // 2. Grid with filter and sort
    println!("2. Filtering projects for 'merko', sorted by budget...");
    let mut grid = ws.grid("projects", "admin");
    grid.set_viewport_height(400.0);
    grid.set_filter("name", "merko");
    grid.toggle_sort("budget");
    grid.toggle_sort("budget");
    for (item, row) in grid.visible_rows() {
        println!(
            "   [{:>4}px] {} | {} | {}",
            item.offset_top,
            row.id,
            grid.cell_text(&row.id, "name").unwrap_or_default(),
            grid.cell_text(&row.id, "client_id").unwrap_or_default()
        );
    }
    println!("   {} matching rows\n", grid.row_count());

    // 3. Edit a cell
    let first = grid.row_ids().into_iter().next();
    if let Some(row_id) = first {
        println!("3. Editing status of {}...", row_id);
        grid.click(&row_id, "name")?;
        grid.navigate(Direction::Right)?;
        grid.handle_key(GridKey::Enter)?;
        println!("   Buffer before: {:?}", grid.buffer());
        grid.set_buffer("Done");
        grid.handle_key(GridKey::Enter)?;
        println!("   Now: {}", grid.cell_text(&row_id, "status").unwrap_or_default());

        let runs = ws.run_automations();
        for note in ws.take_notifications() {
            println!("   Automation ({} run): {}", runs, note.message);
        }

        // 4. History
        println!("\n4. History for {}:", row_id);
        for entry in ws.history().borrow().get_by_row("projects", &row_id) {
            println!("   {:?}: {}", entry.kind, entry.describe());
        }
        ws.undo();
        println!("   After undo: {}", grid.cell_text(&row_id, "status").unwrap_or_default());
        ws.redo();
        println!("   After redo: {}", grid.cell_text(&row_id, "status").unwrap_or_default());
    }

    // 5. CSV
    println!("\n5. Companies as CSV:");
    if let Some(csv) = ws.store().borrow().to_csv("companies") {
        for line in csv.lines() {
            println!("   {}", line);
        }
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
