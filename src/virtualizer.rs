//! Windowed rendering: which items intersect the viewport.
//!
//! The window is computed over visual rows. With one lane a visual row is one
//! item; a gallery layout packs `lanes` items per visual row and the window is
//! expanded back to item indices.

use std::ops::Range;

/// Extra rows rendered above and below the viewport.
pub const DEFAULT_OVERSCAN: usize = 5;

/// Half-open range of item indices to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualWindow {
    pub start: usize,
    pub end: usize,
}

impl VirtualWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// One materialized item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualItem {
    pub index: usize,
    pub offset_top: f64,
    pub lane: usize,
}

/// Visible window for `count` rows of `item_height` pixels.
///
/// Always satisfies `start <= end <= count`. A scroll offset past the end
/// yields an empty window at `count`.
pub fn compute_window(
    count: usize,
    item_height: f64,
    container_height: f64,
    scroll_top: f64,
    overscan: usize,
) -> VirtualWindow {
    debug_assert!(item_height > 0.0, "item height must be positive");
    if count == 0 || item_height.is_nan() || item_height <= 0.0 {
        return VirtualWindow::default();
    }

    let scroll_top = if scroll_top.is_finite() { scroll_top.max(0.0) } else { 0.0 };
    let container_height = if container_height.is_finite() {
        container_height.max(0.0)
    } else {
        0.0
    };

    let first = (scroll_top / item_height).floor() as usize;
    let last = ((scroll_top + container_height) / item_height).ceil() as usize;

    let end = last.saturating_add(overscan).min(count);
    let start = first.saturating_sub(overscan).min(end);
    VirtualWindow { start, end }
}

/// Scroll state for one list or gallery.
#[derive(Debug, Clone)]
pub struct Virtualizer {
    count: usize,
    item_height: f64,
    container_height: f64,
    scroll_top: f64,
    overscan: usize,
    lanes: usize,
    window: VirtualWindow,
}

impl Virtualizer {
    pub fn new(count: usize, item_height: f64, container_height: f64) -> Self {
        let mut virtualizer = Virtualizer {
            count,
            item_height,
            container_height,
            scroll_top: 0.0,
            overscan: DEFAULT_OVERSCAN,
            lanes: 1,
            window: VirtualWindow::default(),
        };
        virtualizer.recompute();
        virtualizer
    }

    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self.recompute();
        self
    }

    /// Items per visual row. Zero is treated as one.
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self.recompute();
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn item_height(&self) -> f64 {
        self.item_height
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn window(&self) -> VirtualWindow {
        self.window
    }

    pub fn on_scroll(&mut self, scroll_top: f64) -> VirtualWindow {
        self.scroll_top = scroll_top.max(0.0);
        self.recompute()
    }

    pub fn set_count(&mut self, count: usize) -> VirtualWindow {
        self.count = count;
        self.recompute()
    }

    pub fn set_item_height(&mut self, item_height: f64) -> VirtualWindow {
        self.item_height = item_height;
        self.recompute()
    }

    pub fn set_container_height(&mut self, container_height: f64) -> VirtualWindow {
        self.container_height = container_height;
        self.recompute()
    }

    fn visual_rows(&self) -> usize {
        self.count.div_ceil(self.lanes)
    }

    pub fn total_height(&self) -> f64 {
        self.visual_rows() as f64 * self.item_height
    }

    /// Adjust the scroll offset so `index` is fully visible and return it.
    pub fn scroll_to_index(&mut self, index: usize) -> f64 {
        let top = (index / self.lanes) as f64 * self.item_height;
        let bottom = top + self.item_height;
        if top < self.scroll_top {
            self.scroll_top = top;
        } else if bottom > self.scroll_top + self.container_height {
            self.scroll_top = (bottom - self.container_height).max(0.0);
        }
        self.recompute();
        self.scroll_top
    }

    /// Items in the current window with their positions.
    pub fn virtual_items(&self) -> Vec<VirtualItem> {
        self.window
            .range()
            .map(|index| VirtualItem {
                index,
                offset_top: (index / self.lanes) as f64 * self.item_height,
                lane: index % self.lanes,
            })
            .collect()
    }

    fn recompute(&mut self) -> VirtualWindow {
        let rows = compute_window(
            self.visual_rows(),
            self.item_height,
            self.container_height,
            self.scroll_top,
            self.overscan,
        );
        self.window = VirtualWindow {
            start: (rows.start * self.lanes).min(self.count),
            end: (rows.end * self.lanes).min(self.count),
        };
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_without_overscan() {
        let w = compute_window(10_000, 40.0, 800.0, 4000.0, 0);
        assert_eq!(w, VirtualWindow { start: 100, end: 120 });
    }

    #[test]
    fn test_window_with_overscan() {
        let w = compute_window(10_000, 40.0, 800.0, 4000.0, 10);
        assert_eq!(w, VirtualWindow { start: 90, end: 130 });

        let top = compute_window(10_000, 40.0, 800.0, 0.0, 10);
        assert_eq!(top, VirtualWindow { start: 0, end: 30 });

        let bottom = compute_window(10_000, 40.0, 800.0, 400_000.0, 10);
        assert_eq!(bottom.end, 10_000);
        assert!(bottom.start <= bottom.end);
    }

    #[test]
    fn test_empty_and_overscrolled() {
        assert!(compute_window(0, 40.0, 800.0, 0.0, 5).is_empty());
        let w = compute_window(10, 40.0, 100.0, 10_000.0, 0);
        assert_eq!(w, VirtualWindow { start: 10, end: 10 });
    }

    #[test]
    fn test_virtualizer_recomputes_on_changes() {
        let mut v = Virtualizer::new(1000, 40.0, 400.0);
        assert_eq!(v.window(), VirtualWindow { start: 0, end: 15 });
        assert_eq!(v.total_height(), 40_000.0);

        let w = v.on_scroll(2000.0);
        assert_eq!(w, VirtualWindow { start: 45, end: 65 });

        let w = v.set_count(50);
        assert_eq!(w, VirtualWindow { start: 45, end: 50 });

        // Shrinking rows leaves the offset past the end
        let w = v.set_item_height(20.0);
        assert_eq!(w, VirtualWindow { start: 50, end: 50 });
        assert_eq!(v.total_height(), 1000.0);

        let w = v.on_scroll(0.0);
        assert_eq!(w, VirtualWindow { start: 0, end: 25 });
        let items = v.virtual_items();
        assert_eq!(items.len(), 25);
        assert_eq!(items[3].offset_top, 60.0);
    }

    #[test]
    fn test_lanes() {
        let v = Virtualizer::new(10, 100.0, 200.0).with_overscan(0).with_lanes(3);
        // 4 visual rows; rows 0 and 1 visible, items 0..6
        assert_eq!(v.window(), VirtualWindow { start: 0, end: 6 });
        assert_eq!(v.total_height(), 400.0);
        let items = v.virtual_items();
        assert_eq!(items[4].lane, 1);
        assert_eq!(items[4].offset_top, 100.0);
    }

    #[test]
    fn test_scroll_to_index() {
        let mut v = Virtualizer::new(100, 40.0, 400.0).with_overscan(0);
        assert_eq!(v.scroll_to_index(20), 440.0);
        assert!(v.window().contains(20));
        assert_eq!(v.scroll_to_index(2), 80.0);
        // Already visible: no movement
        assert_eq!(v.scroll_to_index(5), 80.0);
    }
}
