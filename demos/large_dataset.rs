/// Large Dataset Example
///
/// This example demonstrates:
/// - Chunked bulk import that yields between chunks
/// - Sorting 100k rows through the virtual index map
/// - Windowed access while scrolling

use livegrid::defaults::generate_project_row;
use livegrid::{GridConfig, RowData, Workspace};
use std::time::Instant;

const ROW_COUNT: usize = 100_000;

fn main() {
    env_logger::init();
    println!("=== LiveGrid Large Dataset Example ===\n");

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return;
        }
    };

    let ws = Workspace::in_memory(GridConfig::default(), "loader");

    // 1. Import
    println!("1. Importing {} rows...", ROW_COUNT);
    let rows: Vec<RowData> = (0..ROW_COUNT)
        .map(|i| {
            let mut data = generate_project_row(i + 1_000).to_data();
            data.remove("id");
            data
        })
        .collect();
    let start = Instant::now();
    let inserted = runtime.block_on(ws.import_rows("projects", rows));
    println!("   Inserted {} rows in {:?}\n", inserted, start.elapsed());

    // 2. Sort
    println!("2. Sorting by budget...");
    let mut grid = ws.grid("projects", "admin");
    grid.set_viewport_height(800.0);
    let start = Instant::now();
    grid.toggle_sort("budget");
    println!("   {} rows sorted in {:?}\n", grid.row_count(), start.elapsed());

    // 3. Scroll
    println!("3. Scrolling...");
    for top in [0.0, 40_000.0, grid.total_height() - 800.0] {
        let window = grid.on_scroll(top);
        let rows = grid.visible_rows();
        println!(
            "   scroll_top={:>9} window=[{}, {}) first={}",
            top,
            window.start,
            window.end,
            rows.first().map(|(_, r)| r.id.as_str()).unwrap_or("-")
        );
    }

    println!("\n=== Example Complete ===");
}
