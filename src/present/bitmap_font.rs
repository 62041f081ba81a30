//! Built-in 5x7 bitmap font.
//!
//! Used whenever no TTF font is configured, so overlays always carry their
//! text. Lowercase is drawn as uppercase. Unknown characters draw as a box.

use image::{Rgb, RgbImage};

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
/// One blank column between characters.
const ADVANCE: u32 = GLYPH_W + 1;

const UNKNOWN: [u8; 7] = [0x1f, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1f];

#[rustfmt::skip]
const GLYPHS: &[(char, [u8; 7])] = &[
    ('A', [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11]),
    ('B', [0x1e, 0x11, 0x11, 0x1e, 0x11, 0x11, 0x1e]),
    ('C', [0x0e, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0e]),
    ('D', [0x1e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1e]),
    ('E', [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x1f]),
    ('F', [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x10]),
    ('G', [0x0e, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0f]),
    ('H', [0x11, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11]),
    ('I', [0x0e, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0e]),
    ('J', [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0c]),
    ('K', [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11]),
    ('L', [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f]),
    ('M', [0x11, 0x1b, 0x15, 0x15, 0x11, 0x11, 0x11]),
    ('N', [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11]),
    ('O', [0x0e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e]),
    ('P', [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10]),
    ('Q', [0x0e, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0d]),
    ('R', [0x1e, 0x11, 0x11, 0x1e, 0x14, 0x12, 0x11]),
    ('S', [0x0f, 0x10, 0x10, 0x0e, 0x01, 0x01, 0x1e]),
    ('T', [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04]),
    ('U', [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e]),
    ('V', [0x11, 0x11, 0x11, 0x11, 0x11, 0x0a, 0x04]),
    ('W', [0x11, 0x11, 0x11, 0x15, 0x15, 0x1b, 0x11]),
    ('X', [0x11, 0x11, 0x0a, 0x04, 0x0a, 0x11, 0x11]),
    ('Y', [0x11, 0x11, 0x11, 0x0a, 0x04, 0x04, 0x04]),
    ('Z', [0x1f, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1f]),
    ('0', [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e]),
    ('1', [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e]),
    ('2', [0x0e, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1f]),
    ('3', [0x1f, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0e]),
    ('4', [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02]),
    ('5', [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e]),
    ('6', [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e]),
    ('7', [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08]),
    ('8', [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e]),
    ('9', [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c]),
    (' ', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
    ('.', [0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x0c]),
    (',', [0x00, 0x00, 0x00, 0x00, 0x0c, 0x04, 0x08]),
    (':', [0x00, 0x0c, 0x0c, 0x00, 0x0c, 0x0c, 0x00]),
    ('-', [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00]),
    ('_', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1f]),
    ('=', [0x00, 0x00, 0x1f, 0x00, 0x1f, 0x00, 0x00]),
    ('#', [0x0a, 0x0a, 0x1f, 0x0a, 0x1f, 0x0a, 0x0a]),
    ('%', [0x19, 0x1a, 0x02, 0x04, 0x08, 0x0b, 0x13]),
    ('/', [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10]),
    ('[', [0x0e, 0x08, 0x08, 0x08, 0x08, 0x08, 0x0e]),
    (']', [0x0e, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0e]),
    ('(', [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02]),
    (')', [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08]),
];

fn glyph(ch: char) -> [u8; 7] {
    let ch = ch.to_ascii_uppercase();
    GLYPHS
        .iter()
        .find(|(c, _)| *c == ch)
        .map(|(_, rows)| *rows)
        .unwrap_or(UNKNOWN)
}

/// Pixels per font dot for a Hershey-like text scale (1.0 is about 30 px tall).
pub fn cell_for_scale(scale: f32) -> u32 {
    ((30.0 * scale) / 9.0).round().max(1.0) as u32
}

/// Rendered size of `text` at `cell` pixels per dot.
pub fn text_size(text: &str, cell: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    let width = (chars * ADVANCE).saturating_sub(1) * cell;
    (width, GLYPH_H * cell)
}

/// Draw `text` with its top-left corner at (`x`, `y`). Clipped to the image.
pub fn draw_text(img: &mut RgbImage, text: &str, x: i32, y: i32, cell: u32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let cell = cell.max(1) as i32;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i32 * ADVANCE as i32 * cell;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 0 {
                    continue;
                }
                let dot_x = origin_x + col as i32 * cell;
                let dot_y = y + row as i32 * cell;
                for dy in 0..cell {
                    for dx in 0..cell {
                        let (px, py) = (dot_x + dx, dot_y + dy);
                        if px >= 0 && py >= 0 && (px as u32) < w && (py as u32) < h {
                            img.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INK: Rgb<u8> = Rgb([255, 255, 0]);

    fn inked(img: &RgbImage) -> usize {
        img.pixels().filter(|p| **p == INK).count()
    }

    #[test]
    fn lowercase_draws_like_uppercase() {
        let mut lower = RgbImage::new(40, 10);
        let mut upper = RgbImage::new(40, 10);
        draw_text(&mut lower, "scan", 0, 0, 1, INK);
        draw_text(&mut upper, "SCAN", 0, 0, 1, INK);
        assert_eq!(lower, upper);
        assert!(inked(&lower) > 0);
    }

    #[test]
    fn cell_scales_every_dot() {
        let mut small = RgbImage::new(20, 20);
        let mut large = RgbImage::new(20, 20);
        draw_text(&mut small, "1", 0, 0, 1, INK);
        draw_text(&mut large, "1", 0, 0, 2, INK);
        assert_eq!(inked(&large), inked(&small) * 4);
    }

    #[test]
    fn drawing_is_clipped() {
        let mut img = RgbImage::new(8, 8);
        draw_text(&mut img, "TOTAL: 0", -3, 4, 2, INK);
        assert!(inked(&img) > 0);
    }

    #[test]
    fn text_size_counts_characters() {
        assert_eq!(text_size("AB", 1), (11, 7));
        assert_eq!(text_size("AB", 3), (33, 21));
        assert_eq!(text_size("", 2), (0, 14));
        assert_eq!(cell_for_scale(0.5), 2);
        assert_eq!(cell_for_scale(0.8), 3);
    }
}
