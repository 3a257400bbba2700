use std::fs;
use std::path::PathBuf;

use ab_glyph::{Font, FontVec, GlyphId, PxScale, ScaleFont};
use font8x8::UnicodeFonts;
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WATERMARK_TEXT: &str = "@mdni007";
pub const DEFAULT_OPACITY: u8 = 128;
/// Font size as a fraction of the image's smaller dimension.
pub const DEFAULT_FONT_SCALE: f32 = 0.03;
pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";

/// Appearance of the watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkOptions {
    pub text: String,
    /// Alpha applied to the text color (0 = invisible, 255 = opaque)
    pub opacity: u8,
    pub color: [u8; 3],
    pub font_scale: f32,
    /// Candidate font files, first loadable one wins
    pub font_paths: Vec<PathBuf>,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            text: DEFAULT_WATERMARK_TEXT.to_string(),
            opacity: DEFAULT_OPACITY,
            color: [255, 255, 255],
            font_scale: DEFAULT_FONT_SCALE,
            font_paths: vec![PathBuf::from(DEFAULT_FONT_PATH)],
        }
    }
}

/// Glyph coverage of a rendered string, cropped to its ink bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMask {
    pub width: u32,
    pub height: u32,
    coverage: Vec<f32>,
}

impl TextMask {
    fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            coverage: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.coverage[(y * self.width + x) as usize]
    }

    /// Crop a canvas down to the rows and columns that carry any coverage.
    fn trimmed(width: u32, height: u32, canvas: Vec<f32>) -> Self {
        let at = |x: u32, y: u32| canvas[(y * width + x) as usize];
        let inked_col = |x: u32| (0..height).any(|y| at(x, y) > 0.0);
        let inked_row = |y: u32| (0..width).any(|x| at(x, y) > 0.0);

        let Some(x0) = (0..width).find(|&x| inked_col(x)) else {
            return Self::empty();
        };
        let x1 = (0..width).rev().find(|&x| inked_col(x)).unwrap_or(x0);
        let y0 = (0..height).find(|&y| inked_row(y)).unwrap_or(0);
        let y1 = (0..height).rev().find(|&y| inked_row(y)).unwrap_or(y0);

        let w = x1 - x0 + 1;
        let h = y1 - y0 + 1;
        let mut coverage = Vec::with_capacity((w * h) as usize);
        for y in y0..=y1 {
            for x in x0..=x1 {
                coverage.push(at(x, y));
            }
        }
        Self {
            width: w,
            height: h,
            coverage,
        }
    }
}

/// Font used to draw the watermark.
pub enum Face {
    /// A TrueType/OpenType face loaded from disk
    Outline(FontVec),
    /// Built-in 8x8 bitmap face, scaled to the requested size
    Bitmap,
}

impl std::fmt::Debug for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Face::Outline(_) => f.write_str("Face::Outline"),
            Face::Bitmap => f.write_str("Face::Bitmap"),
        }
    }
}

impl Face {
    /// Load the first usable font from `paths`, or fall back to the built-in face.
    pub fn load(paths: &[PathBuf]) -> Self {
        for path in paths {
            match fs::read(path) {
                Ok(bytes) => match FontVec::try_from_vec(bytes) {
                    Ok(font) => {
                        tracing::debug!(font = %path.display(), "loaded watermark font");
                        return Face::Outline(font);
                    }
                    Err(e) => tracing::debug!(font = %path.display(), "invalid font: {e}"),
                },
                Err(e) => tracing::debug!(font = %path.display(), "cannot read font: {e}"),
            }
        }
        tracing::info!("Preferred watermark font unavailable, using built-in face");
        Face::Bitmap
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Face::Bitmap)
    }

    /// Render `text` at `px` pixels into a tight coverage mask.
    pub fn rasterize(&self, text: &str, px: f32) -> TextMask {
        match self {
            Face::Outline(font) => rasterize_outline(font, text, px),
            Face::Bitmap => rasterize_bitmap(text, px),
        }
    }
}

fn rasterize_outline(font: &FontVec, text: &str, px: f32) -> TextMask {
    let scale = PxScale::from(px);
    let scaled = font.as_scaled(scale);

    let mut caret = ab_glyph::point(0.0, scaled.ascent());
    let mut prev: Option<GlyphId> = None;
    let mut outlined = Vec::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(p) = prev {
            caret.x += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(scale, caret);
        caret.x += scaled.h_advance(id);
        prev = Some(id);
        if let Some(g) = font.outline_glyph(glyph) {
            outlined.push(g);
        }
    }

    if outlined.is_empty() {
        return TextMask::empty();
    }

    let min_x = outlined.iter().map(|g| g.px_bounds().min.x).fold(f32::INFINITY, f32::min);
    let min_y = outlined.iter().map(|g| g.px_bounds().min.y).fold(f32::INFINITY, f32::min);
    let max_x = outlined.iter().map(|g| g.px_bounds().max.x).fold(f32::NEG_INFINITY, f32::max);
    let max_y = outlined.iter().map(|g| g.px_bounds().max.y).fold(f32::NEG_INFINITY, f32::max);

    let width = (max_x - min_x).ceil().max(0.0) as u32;
    let height = (max_y - min_y).ceil().max(0.0) as u32;
    if width == 0 || height == 0 {
        return TextMask::empty();
    }

    let mut canvas = vec![0.0f32; (width * height) as usize];
    for g in &outlined {
        let b = g.px_bounds();
        let ox = (b.min.x - min_x) as i64;
        let oy = (b.min.y - min_y) as i64;
        g.draw(|x, y, c| {
            let px = ox + x as i64;
            let py = oy + y as i64;
            if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                let cell = &mut canvas[(py as u32 * width + px as u32) as usize];
                *cell = (*cell + c).min(1.0);
            }
        });
    }

    TextMask::trimmed(width, height, canvas)
}

fn rasterize_bitmap(text: &str, px: f32) -> TextMask {
    let k = ((px / 8.0).round() as u32).max(1);
    let cell = 8 * k;
    let glyphs: Vec<[u8; 8]> = text
        .chars()
        .map(|ch| font8x8::BASIC_FONTS.get(ch).unwrap_or([0; 8]))
        .collect();
    if glyphs.is_empty() {
        return TextMask::empty();
    }

    let width = cell * glyphs.len() as u32;
    let height = cell;
    let mut canvas = vec![0.0f32; (width * height) as usize];
    for (i, rows) in glyphs.iter().enumerate() {
        let left = i as u32 * cell;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..8u32 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..k {
                    for dx in 0..k {
                        let x = left + col * k + dx;
                        let y = row as u32 * k + dy;
                        canvas[(y * width + x) as usize] = 1.0;
                    }
                }
            }
        }
    }

    TextMask::trimmed(width, height, canvas)
}

/// Font size in pixels for an image: a fraction of its smaller side, at least 1.
pub fn font_size(width: u32, height: u32, scale: f32) -> f32 {
    (width.min(height) as f32 * scale).floor().max(1.0)
}

/// Top-left corner that puts a `w`×`h` box at the center of the image.
pub fn centered_origin(image_w: u32, image_h: u32, w: u32, h: u32) -> (i64, i64) {
    (
        (image_w as i64 - w as i64) / 2,
        (image_h as i64 - h as i64) / 2,
    )
}

/// Blend `color` over the image through `mask` at `origin`, scaled by `opacity`.
pub fn blend_mask(image: &mut RgbImage, mask: &TextMask, origin: (i64, i64), color: [u8; 3], opacity: u8) {
    let alpha = opacity as f32 / 255.0;
    let (iw, ih) = image.dimensions();
    for my in 0..mask.height {
        for mx in 0..mask.width {
            let c = mask.get(mx, my) * alpha;
            if c <= 0.0 {
                continue;
            }
            let x = origin.0 + mx as i64;
            let y = origin.1 + my as i64;
            if x < 0 || y < 0 || x >= iw as i64 || y >= ih as i64 {
                continue;
            }
            let pixel = image.get_pixel_mut(x as u32, y as u32);
            for (channel, &ink) in pixel.0.iter_mut().zip(color.iter()) {
                let blended = *channel as f32 * (1.0 - c) + ink as f32 * c;
                *channel = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Draws the configured text at the center of images.
#[derive(Debug)]
pub struct Watermarker {
    face: Face,
    options: WatermarkOptions,
}

impl Watermarker {
    pub fn new(options: WatermarkOptions) -> Self {
        let face = Face::load(&options.font_paths);
        Self { face, options }
    }

    pub fn with_face(face: Face, options: WatermarkOptions) -> Self {
        Self { face, options }
    }

    pub fn face(&self) -> &Face {
        &self.face
    }

    /// Render the watermark onto `image` in place.
    pub fn apply(&self, image: &mut RgbImage) {
        let (w, h) = image.dimensions();
        let px = font_size(w, h, self.options.font_scale);
        let mask = self.face.rasterize(&self.options.text, px);
        if mask.is_empty() {
            return;
        }
        let origin = centered_origin(w, h, mask.width, mask.height);
        blend_mask(image, &mask, origin, self.options.color, self.options.opacity);
    }
}
