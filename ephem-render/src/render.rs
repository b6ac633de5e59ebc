use std::collections::HashMap;

use anyhow::{Context, Result};
use ephem_core::{DisplaySurface, KeyColor, KeyRegion};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect, Transform};

/// Rasterized key, keyed by its size and color.
type KeyCacheKey = (u32, u32, [u8; 4]);

/// Software display for the operant box.
///
/// Draws into an offscreen premultiplied canvas. The window copies the canvas
/// into its frame buffer through [`SkiaDisplay::copy_into`] whenever it
/// changed.
pub struct SkiaDisplay {
    width: u32,
    height: u32,
    canvas: Pixmap,
    background: [u8; 4],
    shapes: Vec<(KeyRegion, [u8; 4])>,
    key_cache: HashMap<KeyCacheKey, Pixmap>,
    dirty: bool,
    released: bool,
}

impl SkiaDisplay {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let mut canvas = Pixmap::new(width, height)
            .with_context(|| format!("cannot allocate a {width}x{height} canvas"))?;
        canvas.fill(Color::from_rgba8(0, 0, 0, 255));
        Ok(Self {
            width,
            height,
            canvas,
            background: [0, 0, 0, 255],
            shapes: Vec::with_capacity(2),
            key_cache: HashMap::new(),
            dirty: true,
            released: false,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGBA canvas bytes.
    pub fn frame(&self) -> &[u8] {
        self.canvas.data()
    }

    /// Copies the canvas into `frame_buffer` if anything changed since the
    /// last copy. Returns whether a copy happened.
    pub fn copy_into(&mut self, frame_buffer: &mut [u8]) -> bool {
        if !self.dirty {
            return false;
        }
        let data = self.canvas.data();
        if frame_buffer.len() != data.len() {
            tracing::warn!(
                expected = data.len(),
                actual = frame_buffer.len(),
                "frame buffer size mismatch"
            );
            return false;
        }
        frame_buffer.copy_from_slice(data);
        self.dirty = false;
        true
    }

    /// Straight RGBA at a canvas pixel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let p = self.canvas.pixel(x, y)?.demultiply();
        Some([p.red(), p.green(), p.blue(), p.alpha()])
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn redraw(&mut self) {
        let [r, g, b, a] = self.background;
        self.canvas.fill(Color::from_rgba8(r, g, b, a));
        let shapes = std::mem::take(&mut self.shapes);
        for (region, rgba) in &shapes {
            self.draw_key(*region, *rgba);
        }
        self.shapes = shapes;
        self.dirty = true;
    }

    fn draw_key(&mut self, region: KeyRegion, rgba: [u8; 4]) {
        let w = (region.x2 - region.x1).round().max(1.0) as u32;
        let h = (region.y2 - region.y1).round().max(1.0) as u32;
        let key = (w, h, rgba);
        if !self.key_cache.contains_key(&key) {
            match render_key_pixmap(w, h, rgba) {
                Some(pm) => {
                    self.key_cache.insert(key, pm);
                }
                None => {
                    tracing::warn!(w, h, "key could not be rasterized");
                    return;
                }
            }
        }
        if let Some(pm) = self.key_cache.get(&key) {
            blend_onto(
                &mut self.canvas,
                pm,
                region.x1.round() as i32,
                region.y1.round() as i32,
            );
        }
    }
}

impl DisplaySurface for SkiaDisplay {
    fn fill_background(&mut self, color: &KeyColor) {
        self.background = color.rgba;
        self.redraw();
    }

    fn present_shape(&mut self, region: KeyRegion, color: &KeyColor) {
        self.shapes.push((region, color.rgba));
        self.draw_key(region, color.rgba);
        self.dirty = true;
    }

    fn clear_all(&mut self) {
        self.shapes.clear();
        self.redraw();
    }

    fn release(&mut self) {
        self.released = true;
        self.key_cache.clear();
        tracing::debug!("display released");
    }
}

/// Anti-aliased filled oval spanning the whole pixmap.
pub fn render_key_pixmap(width: u32, height: u32, rgba: [u8; 4]) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(width, height)?;
    let oval = Rect::from_xywh(0.0, 0.0, width as f32, height as f32)?;
    let path = PathBuilder::from_oval(oval)?;

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]));
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    Some(pixmap)
}

/// Source-over blend of a premultiplied pixmap with its top-left at (x0, y0),
/// clipped to the canvas.
fn blend_onto(canvas: &mut Pixmap, src: &Pixmap, x0: i32, y0: i32) {
    let w = src.width() as i32;
    let h = src.height() as i32;
    let dst_x_start = x0.max(0);
    let dst_y_start = y0.max(0);
    let dst_x_end = (x0 + w).min(canvas.width() as i32);
    let dst_y_end = (y0 + h).min(canvas.height() as i32);
    if dst_x_end <= dst_x_start || dst_y_end <= dst_y_start {
        return;
    }

    let src_x_start = (dst_x_start - x0) as usize;
    let src_y_start = (dst_y_start - y0) as usize;
    let max_w = (dst_x_end - dst_x_start) as usize;
    let max_h = (dst_y_end - dst_y_start) as usize;
    let (dst_x_start, dst_y_start) = (dst_x_start as usize, dst_y_start as usize);

    let src_stride = src.width() as usize;
    let canvas_stride = canvas.width() as usize;
    let src_data = src.data();
    let dst_data = canvas.data_mut();

    for y in 0..max_h {
        for x in 0..max_w {
            let s = ((src_y_start + y) * src_stride + src_x_start + x) * 4;
            let d = ((dst_y_start + y) * canvas_stride + dst_x_start + x) * 4;
            let sa = src_data[s + 3] as u32;
            if sa == 0 {
                continue;
            }
            if sa == 255 {
                dst_data[d..d + 4].copy_from_slice(&src_data[s..s + 4]);
                continue;
            }
            let inv_a = 255 - sa;
            for c in 0..4 {
                let sc = src_data[s + c] as u32;
                let dc = dst_data[d + c] as u32;
                dst_data[d + c] = (sc + (dc * inv_a + 127) / 255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephem_core::{CANVAS_SIZE, KeyLayout, Side};

    fn display() -> SkiaDisplay {
        SkiaDisplay::new(CANVAS_SIZE.0, CANVAS_SIZE.1).unwrap()
    }

    #[test]
    fn background_fills_the_canvas() {
        let mut d = display();
        d.fill_background(&KeyColor::iti());
        assert_eq!(d.pixel(0, 0), Some([185, 211, 238, 255]));
        assert_eq!(d.pixel(799, 599), Some([185, 211, 238, 255]));
    }

    #[test]
    fn keys_are_drawn_inside_their_region() {
        let mut d = display();
        let layout = KeyLayout::default();
        let blue = KeyColor::from_name("blue").unwrap();
        d.fill_background(&KeyColor::black());
        d.present_shape(layout.region(Side::Left), &blue);

        assert_eq!(d.pixel(250, 300), Some([0, 0, 255, 255]));
        // bounding-box corner lies outside the oval
        assert_eq!(d.pixel(201, 251), Some([0, 0, 0, 255]));
        assert_eq!(d.pixel(550, 300), Some([0, 0, 0, 255]));
    }

    #[test]
    fn clear_keeps_background_and_drops_keys() {
        let mut d = display();
        let layout = KeyLayout::default();
        d.fill_background(&KeyColor::iti());
        d.present_shape(layout.region(Side::Right), &KeyColor::from_name("yellow").unwrap());
        assert_eq!(d.shape_count(), 1);

        d.clear_all();
        assert_eq!(d.shape_count(), 0);
        assert_eq!(d.pixel(550, 300), Some([185, 211, 238, 255]));
    }

    #[test]
    fn background_change_keeps_presented_keys() {
        let mut d = display();
        let layout = KeyLayout::default();
        d.present_shape(layout.region(Side::Left), &KeyColor::from_name("red").unwrap());
        d.fill_background(&KeyColor::iti());
        assert_eq!(d.pixel(250, 300), Some([255, 0, 0, 255]));
        assert_eq!(d.pixel(10, 10), Some([185, 211, 238, 255]));
    }

    #[test]
    fn copy_happens_only_after_changes() {
        let mut d = display();
        let mut fb = vec![0u8; (CANVAS_SIZE.0 * CANVAS_SIZE.1 * 4) as usize];
        assert!(d.copy_into(&mut fb));
        assert!(!d.copy_into(&mut fb));

        d.fill_background(&KeyColor::iti());
        assert!(d.copy_into(&mut fb));
        assert_eq!(&fb[..4], &[185, 211, 238, 255]);

        let mut short = vec![0u8; 16];
        d.clear_all();
        assert!(!d.copy_into(&mut short));
    }

    #[test]
    fn release_is_recorded() {
        let mut d = display();
        d.release();
        assert!(d.is_released());
    }
}
