use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Colour used until the program sets one.
pub const INITIAL_COLOR: u32 = 0x0000_ffff;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DisplayError(pub String);

impl std::error::Error for DisplayError {}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Window-side of the drawing opcodes.
///
/// The machine only ever draws into a [`Framebuffer`]; a backend decides what to do with it.
pub trait DisplayBackend {
    fn init(&mut self, width: u16, height: u16) -> Result<(), DisplayError>;
    fn present(&mut self, frame: &Framebuffer);
    fn should_close(&self) -> bool;
    fn poll_events(&mut self);
    fn teardown(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Packed 32-bit colour surface plus the current drawing colour.
#[derive(Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    pixels: Vec<u32>,
    color: u32,
}

impl Framebuffer {
    pub fn new(width: u16, height: u16) -> Result<Self, DisplayError> {
        let len = width as usize * height as usize;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| DisplayError(format!("failed to allocate {width}x{height} framebuffer")))?;
        pixels.resize(len, 0);
        Ok(Framebuffer {
            width,
            height,
            pixels,
            color: INITIAL_COLOR,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y as usize * self.width as usize + x as usize])
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Set the colour from a packed byte: high nibble red, low nibble green.
    pub fn set_color(&mut self, packed: u8) {
        self.color = color_from_packed(packed);
    }

    /// Plot with the current colour. Points off the surface are clipped.
    pub fn plot(&mut self, x: i32, y: i32) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        self.pixels[y as usize * self.width as usize + x as usize] = self.color;
    }

    /// Bresenham line, both endpoints inclusive.
    pub fn line(&mut self, mut x1: i32, mut y1: i32, x2: i32, y2: i32) {
        let (dx, sx) = ((x2 - x1).abs(), if x1 < x2 { 1 } else { -1 });
        let (dy, sy) = ((y2 - y1).abs(), if y1 < y2 { 1 } else { -1 });
        let mut err = (if dx > dy { dx } else { -dy }) / 2;
        loop {
            self.plot(x1, y1);
            if x1 == x2 && y1 == y2 {
                break;
            }
            let e2 = err;
            if e2 > -dx {
                err -= dy;
                x1 += sx;
            }
            if e2 < dy {
                err += dx;
                y1 += sy;
            }
        }
    }

    /// Filled rectangle clipped to the surface.
    pub fn rect(&mut self, x: i32, y: i32, w: i32, h: i32) {
        let (x0, x1) = (x.max(0), x.saturating_add(w).min(self.width as i32));
        let (y0, y1) = (y.max(0), y.saturating_add(h).min(self.height as i32));
        for j in y0..y1 {
            for i in x0..x1 {
                self.plot(i, j);
            }
        }
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color", &format_args!("{:#010x}", self.color))
            .finish()
    }
}

/// `0xAARRGGBB`: each nibble is scaled to 8 bits, blue mirrors red, alpha is opaque.
pub fn color_from_packed(packed: u8) -> u32 {
    let r = ((packed & 0xf0) >> 4) as u32 * 17;
    let g = (packed & 0x0f) as u32 * 17;
    0xff00_0000 | r << 16 | g << 8 | r
}

/// Backend without a window. Keeps the last presented frame.
#[derive(Debug, Default)]
pub struct Headless {
    size: Option<(u16, u16)>,
    frames: usize,
    last: Vec<u32>,
}

impl Headless {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn last_frame(&self) -> &[u32] {
        &self.last
    }

    pub fn size(&self) -> Option<(u16, u16)> {
        self.size
    }
}

impl DisplayBackend for Headless {
    fn init(&mut self, width: u16, height: u16) -> Result<(), DisplayError> {
        self.size = Some((width, height));
        Ok(())
    }

    fn present(&mut self, frame: &Framebuffer) {
        self.frames += 1;
        self.last.clear();
        self.last.extend_from_slice(frame.pixels());
    }

    fn should_close(&self) -> bool {
        false
    }

    fn poll_events(&mut self) {}
}

/// Headless backend that writes the final frame as a binary PPM on teardown.
#[derive(Debug)]
pub struct PpmDump {
    path: PathBuf,
    inner: Headless,
}

impl PpmDump {
    pub fn new(path: impl AsRef<Path>) -> Self {
        PpmDump {
            path: path.as_ref().to_path_buf(),
            inner: Headless::new(),
        }
    }

    fn write(&self, width: u16, height: u16) -> std::io::Result<()> {
        let mut file = BufWriter::new(File::create(&self.path)?);
        write!(file, "P6\n{width} {height}\n255\n")?;
        for px in self.inner.last_frame() {
            let [_, r, g, b] = px.to_be_bytes();
            file.write_all(&[r, g, b])?;
        }
        file.flush()
    }
}

impl DisplayBackend for PpmDump {
    fn init(&mut self, width: u16, height: u16) -> Result<(), DisplayError> {
        self.inner.init(width, height)
    }

    fn present(&mut self, frame: &Framebuffer) {
        self.inner.present(frame)
    }

    fn should_close(&self) -> bool {
        false
    }

    fn poll_events(&mut self) {}

    fn teardown(&mut self) -> Result<(), DisplayError> {
        let Some((width, height)) = self.inner.size() else {
            return Ok(());
        };
        self.write(width, height)
            .map_err(|e| DisplayError(format!("writing {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_colors() {
        assert_eq!(color_from_packed(0x00), 0xff00_0000);
        assert_eq!(color_from_packed(0xf0), 0xffff_00ff);
        assert_eq!(color_from_packed(0x0f), 0xff00_ff00);
        assert_eq!(color_from_packed(0x81), 0xff88_1188);
    }

    #[test]
    fn rect_clips_to_surface() {
        let mut fb = Framebuffer::new(4, 3).unwrap();
        fb.set_color(0xff);
        fb.rect(1, 1, 0xffff, 0xffff);
        assert_eq!(fb.pixel(0, 0), Some(0));
        assert_eq!(fb.pixel(1, 0), Some(0));
        assert_eq!(fb.pixel(1, 1), Some(0xffff_ffff));
        assert_eq!(fb.pixel(3, 2), Some(0xffff_ffff));

        fb.clear();
        fb.rect(-5, -5, 6, 6);
        assert_eq!(fb.pixel(0, 0), Some(0xffff_ffff));
        assert_eq!(fb.pixel(1, 0), Some(0));
        assert_eq!(fb.pixel(0, 1), Some(0));
    }

    #[test]
    fn plot_clips() {
        let mut fb = Framebuffer::new(4, 3).unwrap();
        fb.set_color(0xff);
        fb.plot(3, 2);
        fb.plot(4, 0);
        fb.plot(-1, 0);
        assert_eq!(fb.pixel(3, 2), Some(0xffff_ffff));
        assert_eq!(fb.pixels().iter().filter(|p| **p != 0).count(), 1);
    }

    #[test]
    fn line_includes_endpoints() {
        let mut fb = Framebuffer::new(8, 8).unwrap();
        fb.line(0, 0, 7, 3);
        assert_ne!(fb.pixel(0, 0), Some(0));
        assert_ne!(fb.pixel(7, 3), Some(0));
        // One pixel per column on a shallow line
        assert_eq!(fb.pixels().iter().filter(|p| **p != 0).count(), 8);

        let mut fb = Framebuffer::new(8, 8).unwrap();
        fb.line(2, 6, 2, 1);
        assert_eq!(fb.pixels().iter().filter(|p| **p != 0).count(), 6);
    }

    #[test]
    fn rect_and_clear() {
        let mut fb = Framebuffer::new(8, 8).unwrap();
        fb.rect(6, 6, 4, 4);
        // Clipped to 2x2
        assert_eq!(fb.pixels().iter().filter(|p| **p != 0).count(), 4);
        fb.clear();
        assert!(fb.pixels().iter().all(|p| *p == 0));
    }

    #[test]
    fn headless_keeps_last_frame() {
        let mut backend = Headless::new();
        backend.init(2, 1).unwrap();
        let mut fb = Framebuffer::new(2, 1).unwrap();
        backend.present(&fb);
        fb.plot(1, 0);
        backend.present(&fb);
        assert_eq!(backend.frames(), 2);
        assert_eq!(backend.last_frame(), &[0, INITIAL_COLOR]);
    }
}
