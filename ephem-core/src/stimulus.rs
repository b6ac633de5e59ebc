use serde::{Deserialize, Serialize};

/// Width and height of the canvas every coordinate refers to.
pub const CANVAS_SIZE: (u32, u32) = (800, 600);

/// Invisible ring around each key that still counts as a key peck.
pub const KEY_HALO: f32 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Role a response key plays in the current trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyRole {
    #[default]
    NotApplicable,
    Optimal,
    Suboptimal,
}

impl KeyRole {
    pub fn label(&self) -> &'static str {
        match self {
            KeyRole::NotApplicable => "NA",
            KeyRole::Optimal => "optimal",
            KeyRole::Suboptimal => "suboptimal",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, KeyRole::NotApplicable)
    }
}

/// A named fill color as it appears in the settings sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColor {
    pub name: String,
    pub rgba: [u8; 4],
}

impl KeyColor {
    pub fn from_name(name: &str) -> Option<Self> {
        let rgba = match name.trim().to_ascii_lowercase().as_str() {
            "black" => [0, 0, 0, 255],
            "white" => [255, 255, 255, 255],
            "blue" => [0, 0, 255, 255],
            "yellow" => [255, 255, 0, 255],
            "red" => [255, 0, 0, 255],
            "green" => [0, 128, 0, 255],
            "purple" => [160, 32, 240, 255],
            "orange" => [255, 165, 0, 255],
            "slategray2" => [185, 211, 238, 255],
            _ => return None,
        };
        Some(Self {
            name: name.trim().to_string(),
            rgba,
        })
    }

    pub fn black() -> Self {
        Self {
            name: "black".into(),
            rgba: [0, 0, 0, 255],
        }
    }

    /// Background shown during a regular inter-trial interval.
    pub fn iti() -> Self {
        Self {
            name: "Slategray2".into(),
            rgba: [185, 211, 238, 255],
        }
    }
}

/// Axis-aligned bounding box of a circular key, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl KeyRegion {
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    pub fn radii(&self) -> (f32, f32) {
        ((self.x2 - self.x1) * 0.5, (self.y2 - self.y1) * 0.5)
    }

    /// Same region grown by `by` on every side.
    pub fn grown(&self, by: f32) -> Self {
        Self {
            x1: self.x1 - by,
            y1: self.y1 - by,
            x2: self.x2 + by,
            y2: self.y2 + by,
        }
    }

    /// Point-in-ellipse test against the inscribed oval.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let (cx, cy) = self.center();
        let (rx, ry) = self.radii();
        if rx <= 0.0 || ry <= 0.0 {
            return false;
        }
        let dx = (x - cx) / rx;
        let dy = (y - cy) / ry;
        dx * dx + dy * dy <= 1.0
    }
}

/// Position of the two response keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyLayout {
    pub left: KeyRegion,
    pub right: KeyRegion,
    pub halo: f32,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            left: KeyRegion {
                x1: 200.0,
                y1: 250.0,
                x2: 300.0,
                y2: 350.0,
            },
            right: KeyRegion {
                x1: 500.0,
                y1: 250.0,
                x2: 600.0,
                y2: 350.0,
            },
            halo: KEY_HALO,
        }
    }
}

impl KeyLayout {
    pub fn region(&self, side: Side) -> KeyRegion {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Which of the `presented` keys (halo included) lies under the point.
    pub fn side_at(&self, x: f32, y: f32, presented: &[Side]) -> Option<Side> {
        presented
            .iter()
            .copied()
            .find(|side| self.region(*side).grown(self.halo).contains(x, y))
    }
}

/// Drawing surface the session paints keys and backgrounds on.
///
/// Implementations only draw; the session decides what every click means.
pub trait DisplaySurface {
    fn fill_background(&mut self, color: &KeyColor);
    fn present_shape(&mut self, region: KeyRegion, color: &KeyColor);
    fn clear_all(&mut self);

    /// Called once when the session is torn down.
    fn release(&mut self) {}
}
