use serde::{Deserialize, Serialize};

use crate::model::{Direction, GridBounds, Node};
use crate::GridError;

/// Grid rendering and sizing options. Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridOptions {
    pub width: f64,
    pub height: f64,
    pub xpoints: i32,
    pub ypoints: i32,
    pub path_length: usize,
    pub delay_ms: f64,
    pub line_colour: String,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            width: 500.0,
            height: 500.0,
            xpoints: 5,
            ypoints: 5,
            path_length: 8,
            delay_ms: 200.0,
            line_colour: "coral".to_string(),
        }
    }
}

impl GridOptions {
    pub fn bounds(&self) -> Result<GridBounds, GridError> {
        GridBounds::new(self.xpoints, self.ypoints)
    }
}

/// Pixel position on the SVG canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct Geometry {
    pub bounds: GridBounds,
    pub cell_width: f64,
    pub cell_height: f64,
    h_padding: f64,
    v_padding: f64,
}

impl Geometry {
    pub fn new(options: &GridOptions) -> Result<Self, GridError> {
        let bounds = options.bounds()?;
        let cell_width = options.width / f64::from(bounds.xpoints);
        let cell_height = options.height / f64::from(bounds.ypoints);
        Ok(Self {
            bounds,
            cell_width,
            cell_height,
            h_padding: cell_width / 2.0,
            v_padding: cell_height / 2.0,
        })
    }

    pub fn node_px(&self, node: Node) -> Point {
        Point {
            x: self.cell_width * f64::from(node.x) + self.h_padding,
            y: self.cell_height * f64::from(node.y) + self.v_padding,
        }
    }

    /// Every node on the board, column by column.
    pub fn all_nodes_px(&self) -> Vec<Point> {
        let mut out = Vec::with_capacity(self.bounds.node_count());
        for i in 0..self.bounds.xpoints {
            for j in 0..self.bounds.ypoints {
                out.push(self.node_px(Node::new(i, j)));
            }
        }
        out
    }

    /// SVG path data for `moves` from `start`, plus the node the path ends on.
    pub fn path_string(&self, start: Node, moves: &[Direction]) -> (String, Node) {
        let origin = self.node_px(start);
        let mut s = format!("M{},{}", origin.x, origin.y);
        let mut last = start;
        for dir in moves {
            last = last.step(*dir);
            s.push_str(&self.segment(last));
        }
        (s, last)
    }

    /// The `L{x},{y}` segment drawing a line to `node`.
    pub fn segment(&self, node: Node) -> String {
        let px = self.node_px(node);
        format!("L{},{}", px.x, px.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_centres_nodes_in_cells() {
        let geometry = Geometry::new(&GridOptions::default()).unwrap();
        assert_eq!(geometry.node_px(Node::new(0, 0)), Point { x: 50.0, y: 50.0 });
        assert_eq!(geometry.node_px(Node::new(4, 2)), Point { x: 450.0, y: 250.0 });
        assert_eq!(geometry.all_nodes_px().len(), 25);
    }

    #[test]
    fn path_string_follows_moves() {
        let geometry = Geometry::new(&GridOptions::default()).unwrap();
        let (path, end) = geometry.path_string(Node::new(2, 2), &[Direction::Left, Direction::Up]);
        assert_eq!(path, "M250,250L150,250L150,150");
        assert_eq!(end, Node::new(1, 1));
    }

    #[test]
    fn options_fill_missing_fields_with_defaults() {
        let options: GridOptions = serde_json::from_str(r#"{"xpoints": 7, "ypoints": 7}"#).unwrap();
        assert_eq!(options.xpoints, 7);
        assert_eq!(options.path_length, 8);
        assert_eq!(options.line_colour, "coral");
    }
}
