pub mod render;

pub use render::{SkiaDisplay, render_key_pixmap};
