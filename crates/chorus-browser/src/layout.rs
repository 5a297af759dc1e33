//! Tiled window layout for a session batch.

pub use chorus_protocol::WindowBounds;
use serde::{Deserialize, Serialize};

/// Usable screen area the batch is tiled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenArea {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenArea {
    fn default() -> Self {
        Self {
            left: 0,
            top: 0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Split `area` into `count` equal cells, row by row.
///
/// Columns = ceil(sqrt(count)), rows = ceil(count / columns).
pub fn tile(count: usize, area: ScreenArea) -> Vec<WindowBounds> {
    if count == 0 {
        return Vec::new();
    }
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let width = area.width / cols as u32;
    let height = area.height / rows as u32;

    (0..count)
        .map(|i| {
            let (row, col) = (i / cols, i % cols);
            WindowBounds {
                left: area.left + (col as u32 * width) as i32,
                top: area.top + (row as u32 * height) as i32,
                width,
                height,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shapes() {
        let area = ScreenArea::default();
        assert!(tile(0, area).is_empty());
        assert_eq!(tile(1, area)[0].width, 1920);

        // 3 → 2 columns, 2 rows
        let three = tile(3, area);
        assert_eq!(three.len(), 3);
        assert_eq!((three[0].width, three[0].height), (960, 540));
        assert_eq!((three[2].left, three[2].top), (0, 540));

        // 5 → 3 columns, 2 rows
        let five = tile(5, area);
        assert_eq!(five[4].left, 640);
        assert_eq!(five[4].top, 540);
    }

    #[test]
    fn test_offset_area() {
        let area = ScreenArea {
            left: 100,
            top: 50,
            width: 800,
            height: 600,
        };
        let cells = tile(4, area);
        assert_eq!(cells[3], WindowBounds { left: 500, top: 350, width: 400, height: 300 });
    }
}
