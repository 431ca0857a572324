//! Raster drawing primitives shared by the annotation renderer and the
//! report chart.
//!
//! Everything here draws directly into an `image::RgbaImage` with saturating
//! clipping, so compositing is fully deterministic: the same inputs always
//! produce the same pixels. Text uses a fixed 5x7 bitmap font (uppercase
//! letters, digits, and a handful of punctuation), which keeps artifacts
//! reproducible across platforms without pulling in a font stack.

use image::{Rgba, RgbaImage};

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;
/// Horizontal advance per character at scale 1 (glyph plus 1px spacing).
pub const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// Sets a pixel if it lies within the image bounds.
pub fn put_pixel_clipped(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Fills an axis-aligned rectangle, clipped to the image.
pub fn fill_rect(img: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, color: Rgba<u8>) {
    for dy in 0..h as i64 {
        for dx in 0..w as i64 {
            put_pixel_clipped(img, x + dx, y + dy, color);
        }
    }
}

/// Draws a line segment with Bresenham's algorithm.
pub fn draw_line(img: &mut RgbaImage, from: (i64, i64), to: (i64, i64), color: Rgba<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put_pixel_clipped(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Draws a filled disc of the given radius.
pub fn draw_disc(img: &mut RgbaImage, cx: i64, cy: i64, radius: i64, color: Rgba<u8>) {
    let r2 = radius * radius;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= r2 {
                put_pixel_clipped(img, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Column-major 5x7 glyph, bit 0 of each byte is the top row.
fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        '0' => [0x3E, 0x51, 0x49, 0x45, 0x3E],
        '1' => [0x00, 0x42, 0x7F, 0x40, 0x00],
        '2' => [0x42, 0x61, 0x51, 0x49, 0x46],
        '3' => [0x21, 0x41, 0x45, 0x4B, 0x31],
        '4' => [0x18, 0x14, 0x12, 0x7F, 0x10],
        '5' => [0x27, 0x45, 0x45, 0x45, 0x39],
        '6' => [0x3C, 0x4A, 0x49, 0x49, 0x30],
        '7' => [0x01, 0x71, 0x09, 0x05, 0x03],
        '8' => [0x36, 0x49, 0x49, 0x49, 0x36],
        '9' => [0x06, 0x49, 0x49, 0x29, 0x1E],
        'A' => [0x7E, 0x11, 0x11, 0x11, 0x7E],
        'B' => [0x7F, 0x49, 0x49, 0x49, 0x36],
        'C' => [0x3E, 0x41, 0x41, 0x41, 0x22],
        'D' => [0x7F, 0x41, 0x41, 0x22, 0x1C],
        'E' => [0x7F, 0x49, 0x49, 0x49, 0x41],
        'F' => [0x7F, 0x09, 0x09, 0x09, 0x01],
        'G' => [0x3E, 0x41, 0x49, 0x49, 0x7A],
        'H' => [0x7F, 0x08, 0x08, 0x08, 0x7F],
        'I' => [0x00, 0x41, 0x7F, 0x41, 0x00],
        'J' => [0x20, 0x40, 0x41, 0x3F, 0x01],
        'K' => [0x7F, 0x08, 0x14, 0x22, 0x41],
        'L' => [0x7F, 0x40, 0x40, 0x40, 0x40],
        'M' => [0x7F, 0x02, 0x0C, 0x02, 0x7F],
        'N' => [0x7F, 0x04, 0x08, 0x10, 0x7F],
        'O' => [0x3E, 0x41, 0x41, 0x41, 0x3E],
        'P' => [0x7F, 0x09, 0x09, 0x09, 0x06],
        'Q' => [0x3E, 0x41, 0x51, 0x21, 0x5E],
        'R' => [0x7F, 0x09, 0x19, 0x29, 0x46],
        'S' => [0x46, 0x49, 0x49, 0x49, 0x31],
        'T' => [0x01, 0x01, 0x7F, 0x01, 0x01],
        'U' => [0x3F, 0x40, 0x40, 0x40, 0x3F],
        'V' => [0x1F, 0x20, 0x40, 0x20, 0x1F],
        'W' => [0x3F, 0x40, 0x38, 0x40, 0x3F],
        'X' => [0x63, 0x14, 0x08, 0x14, 0x63],
        'Y' => [0x07, 0x08, 0x70, 0x08, 0x07],
        'Z' => [0x61, 0x51, 0x49, 0x45, 0x43],
        '.' => [0x00, 0x60, 0x60, 0x00, 0x00],
        '-' => [0x08, 0x08, 0x08, 0x08, 0x08],
        ':' => [0x00, 0x36, 0x36, 0x00, 0x00],
        '/' => [0x20, 0x10, 0x08, 0x04, 0x02],
        '(' => [0x00, 0x1C, 0x22, 0x41, 0x00],
        ')' => [0x00, 0x41, 0x22, 0x1C, 0x00],
        _ => [0x00; 5], // unknown characters render as a space
    }
}

/// Pixel width of a string at the given integer scale.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        (n * GLYPH_ADVANCE - 1) * scale
    }
}

/// Draws text with its top-left corner at (x, y).
pub fn draw_text(img: &mut RgbaImage, x: i64, y: i64, text: &str, scale: u32, color: Rgba<u8>) {
    let scale = scale.max(1) as i64;
    let mut cursor = x;
    for c in text.chars() {
        let columns = glyph(c);
        for (col, bits) in columns.iter().enumerate() {
            for row in 0..GLYPH_HEIGHT as i64 {
                if bits >> row & 1 == 1 {
                    fill_rect(
                        img,
                        cursor + col as i64 * scale,
                        y + row * scale,
                        scale as u32,
                        scale as u32,
                        color,
                    );
                }
            }
        }
        cursor += GLYPH_ADVANCE as i64 * scale;
    }
}

/// Draws text horizontally centered on `cx` with its top edge at `y`.
pub fn draw_text_centered(
    img: &mut RgbaImage,
    cx: i64,
    y: i64,
    text: &str,
    scale: u32,
    color: Rgba<u8>,
) {
    let w = text_width(text, scale) as i64;
    draw_text(img, cx - w / 2, y, text, scale, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn blank(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, WHITE)
    }

    #[test]
    fn test_clipping_is_silent() {
        let mut img = blank(4, 4);
        draw_line(&mut img, (-10, -10), (20, 20), BLACK);
        draw_disc(&mut img, 3, 3, 8, BLACK);
        draw_text(&mut img, -2, -2, "A", 1, BLACK);
    }

    #[test]
    fn test_text_is_deterministic() {
        let mut a = blank(64, 16);
        let mut b = blank(64, 16);
        draw_text(&mut a, 2, 2, "A1.B", 1, BLACK);
        draw_text(&mut b, 2, 2, "A1.B", 1, BLACK);
        assert_eq!(a.as_raw(), b.as_raw());
        // Something was actually drawn
        assert!(a.pixels().any(|p| *p == BLACK));
    }

    #[test]
    fn test_text_width_scales() {
        assert_eq!(text_width("", 1), 0);
        assert_eq!(text_width("AB", 1), 11);
        assert_eq!(text_width("AB", 2), 22);
    }

    #[test]
    fn test_disc_fills_center() {
        let mut img = blank(11, 11);
        draw_disc(&mut img, 5, 5, 3, BLACK);
        assert_eq!(*img.get_pixel(5, 5), BLACK);
        assert_eq!(*img.get_pixel(0, 0), WHITE);
    }
}
