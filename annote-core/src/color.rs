//! Deterministic category → color assignment.
//!
//! The first 50 categories take colors from a curated high-contrast palette,
//! allocated on first use at the lowest free palette index. The
//! `category → palette index` map is persisted with the root configuration, so
//! a category keeps its color for good. Indices past the palette resolve to
//! generated colors that keep their distance from the palette in hue and RGB.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt;

/// Persisted `category number → palette index` map.
pub type ColorMap = BTreeMap<i64, usize>;

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    const fn from_u32(v: u32) -> Self {
        Self::new((v >> 16) as u8, (v >> 8) as u8, v as u8)
    }

    /// Parse `#RRGGBB` (leading `#` optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let s = hex.trim();
        let s = s.strip_prefix('#').unwrap_or(s);
        if s.len() != 6 {
            return None;
        }
        u32::from_str_radix(s, 16).ok().map(Self::from_u32)
    }

    /// `#RRGGBB`
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Hue in degrees, saturation and value in `0..=1`.
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let diff = max - min;

        let h = if diff <= 1e-12 {
            0.0
        } else if max == r {
            (60.0 * ((g - b) / diff) + 360.0) % 360.0
        } else if max == g {
            (60.0 * ((b - r) / diff) + 120.0) % 360.0
        } else {
            (60.0 * ((r - g) / diff) + 240.0) % 360.0
        };
        let s = if max <= 1e-12 { 0.0 } else { diff / max };
        (h, s, max)
    }

    pub fn from_hsv(h: f64, s: f64, v: f64) -> Self {
        let h = h.rem_euclid(360.0);
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);

        let c = v * s;
        let x = c * (1.0 - (((h / 60.0) % 2.0) - 1.0).abs());
        let m = v - c;

        let (rp, gp, bp) = match h {
            h if h < 60.0 => (c, x, 0.0),
            h if h < 120.0 => (x, c, 0.0),
            h if h < 180.0 => (0.0, c, x),
            h if h < 240.0 => (0.0, x, c),
            h if h < 300.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        let channel = |p: f64| ((p + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(channel(rp), channel(gp), channel(bp))
    }

    fn distance(self, other: Rgb) -> f64 {
        let dr = f64::from(self.r) - f64::from(other.r);
        let dg = f64::from(self.g) - f64::from(other.g);
        let db = f64::from(self.b) - f64::from(other.b);
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Number of curated palette entries.
pub const PALETTE_SIZE: usize = 50;

/// 50 distinct, high-contrast colors, in allocation order.
pub const PALETTE: [Rgb; PALETTE_SIZE] = [
    Rgb::from_u32(0xE6194B), Rgb::from_u32(0x3CB44B), Rgb::from_u32(0xFFE119),
    Rgb::from_u32(0x4363D8), Rgb::from_u32(0xF58231), Rgb::from_u32(0x911EB4),
    Rgb::from_u32(0x46F0F0), Rgb::from_u32(0xF032E6), Rgb::from_u32(0xBCF60C),
    Rgb::from_u32(0xFABEBE), Rgb::from_u32(0x008080), Rgb::from_u32(0xE6BEFF),
    Rgb::from_u32(0x9A6324), Rgb::from_u32(0xFFFAC8), Rgb::from_u32(0x800000),
    Rgb::from_u32(0xAAFFC3), Rgb::from_u32(0x808000), Rgb::from_u32(0xFFD8B1),
    Rgb::from_u32(0x000075), Rgb::from_u32(0x808080), Rgb::from_u32(0x000000),
    Rgb::from_u32(0xFF4500), Rgb::from_u32(0x1E90FF), Rgb::from_u32(0x32CD32),
    Rgb::from_u32(0xFFD700), Rgb::from_u32(0x8A2BE2), Rgb::from_u32(0x00CED1),
    Rgb::from_u32(0xFF1493), Rgb::from_u32(0x7FFF00), Rgb::from_u32(0xFFB6C1),
    Rgb::from_u32(0x20B2AA), Rgb::from_u32(0xBA55D3), Rgb::from_u32(0xB8860B),
    Rgb::from_u32(0xF0E68C), Rgb::from_u32(0xA52A2A), Rgb::from_u32(0x2E8B57),
    Rgb::from_u32(0xBDB76B), Rgb::from_u32(0xD2691E), Rgb::from_u32(0x4169E1),
    Rgb::from_u32(0xDC143C), Rgb::from_u32(0x00FA9A), Rgb::from_u32(0x9400D3),
    Rgb::from_u32(0xFF8C00), Rgb::from_u32(0x2F4F4F), Rgb::from_u32(0xADFF2F),
    Rgb::from_u32(0xC71585), Rgb::from_u32(0x00BFFF), Rgb::from_u32(0x228B22),
    Rgb::from_u32(0xFF6347), Rgb::from_u32(0x6A5ACD),
];

const GOLDEN_ANGLE_DEG: f64 = 137.507_764_050_037_85;
const MAX_ATTEMPTS: usize = 220;
const RELAX_AT: [usize; 3] = [60, 120, 180];
/// Minimum hue distance (degrees) from every saturated palette color.
const STRICT_MIN_HUE: f64 = 18.0;
/// Minimum RGB distance from every palette color.
const STRICT_MIN_RGB: f64 = 85.0;
/// Palette entries below this saturation are ignored for hue avoidance.
const SATURATED_MIN: f64 = 0.18;

fn circular_hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Hue/RGB metrics of a palette, used to keep generated colors away from it.
#[derive(Debug, Clone)]
struct PaletteMetrics {
    rgbs: Vec<Rgb>,
    saturated_hues: Vec<f64>,
}

impl PaletteMetrics {
    fn from_palette(palette: &[Rgb]) -> Self {
        let saturated_hues = palette
            .iter()
            .map(|c| c.to_hsv())
            .filter(|&(_, s, _)| s >= SATURATED_MIN)
            .map(|(h, _, _)| h)
            .collect();
        Self {
            rgbs: palette.to_vec(),
            saturated_hues,
        }
    }

    fn min_hue_distance(&self, hue: f64) -> f64 {
        self.saturated_hues
            .iter()
            .map(|&h| circular_hue_distance(hue, h))
            .fold(360.0, f64::min)
    }

    fn min_rgb_distance(&self, rgb: Rgb) -> f64 {
        let best = self
            .rgbs
            .iter()
            .map(|&c| rgb.distance(c))
            .fold(f64::INFINITY, f64::min);
        if best.is_finite() {
            best
        } else {
            0.0
        }
    }

    fn generate(&self, gen_index: usize) -> Rgb {
        self.generate_with_acceptance(gen_index).0
    }

    /// Golden-angle walk with slowly relaxing thresholds.
    ///
    /// Starts at [`STRICT_MIN_HUE`]/[`STRICT_MIN_RGB`] and relaxes after each
    /// [`RELAX_AT`] attempt. With a dense palette nothing may clear even the
    /// relaxed bounds; the best-scored candidate is returned then.
    fn generate_with_acceptance(&self, gen_index: usize) -> (Rgb, Acceptance) {
        let mut min_hue = STRICT_MIN_HUE;
        let mut min_rgb = STRICT_MIN_RGB;
        let base = (gen_index as f64 + 1.0) * GOLDEN_ANGLE_DEG;

        let mut best = Rgb::new(0, 180, 0);
        let mut best_score = -1.0_f64;

        for attempt in 0..MAX_ATTEMPTS {
            let hue = (base + attempt as f64 * (GOLDEN_ANGLE_DEG / 3.0)) % 360.0;
            let sat_cycle = (gen_index + attempt * 7) % 3;
            let val_cycle = (gen_index + attempt * 11) % 3;
            let s = 0.74 + 0.08 * (sat_cycle as f64 / 2.0);
            let v = 0.88 + 0.07 * (val_cycle as f64 / 2.0);
            let rgb = Rgb::from_hsv(hue, s, v);

            let hue_dist = self.min_hue_distance(hue);
            let rgb_dist = self.min_rgb_distance(rgb);
            if hue_dist >= min_hue && rgb_dist >= min_rgb {
                return (rgb, Acceptance::Cleared { min_hue, min_rgb });
            }

            let score = hue_dist * 2.0 + rgb_dist / 2.0;
            if score > best_score {
                best_score = score;
                best = rgb;
            }

            if RELAX_AT.contains(&attempt) {
                min_hue = (min_hue - 2.0).max(12.0);
                min_rgb = (min_rgb - 5.0).max(60.0);
            }
        }

        (best, Acceptance::BestEffort)
    }
}

/// How a generated color was chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Acceptance {
    /// Cleared these thresholds; the strict ones unless relaxed first
    Cleared { min_hue: f64, min_rgb: f64 },
    /// Nothing cleared the thresholds
    BestEffort,
}

/// Resolves category colors against a persisted [`ColorMap`].
///
/// Palette metrics are computed on first use and never change afterwards.
#[derive(Debug, Default)]
pub struct ColorAssigner {
    metrics: OnceCell<PaletteMetrics>,
}

impl ColorAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    fn metrics(&self) -> &PaletteMetrics {
        self.metrics
            .get_or_init(|| PaletteMetrics::from_palette(&PALETTE))
    }

    /// Color for a category, allocating a palette index on first use.
    ///
    /// A missing category number yields the first palette color and leaves
    /// the map untouched.
    pub fn color_for(&self, category_number: Option<i64>, map: &mut ColorMap) -> Rgb {
        let Some(number) = category_number else {
            return PALETTE[0];
        };
        let index = assign_index(map, number);
        self.color_for_index(index)
    }

    /// Read-only lookup for renderers; unmapped numbers wrap onto the palette.
    pub fn lookup(&self, category_number: i64, map: &ColorMap) -> Rgb {
        match map.get(&category_number) {
            Some(&index) => self.color_for_index(index),
            None => PALETTE[category_number.rem_euclid(PALETTE_SIZE as i64) as usize],
        }
    }

    /// Color of a palette index; indices past the palette are generated.
    pub fn color_for_index(&self, index: usize) -> Rgb {
        if index < PALETTE_SIZE {
            PALETTE[index]
        } else {
            self.generated_color(index - PALETTE_SIZE)
        }
    }

    /// Generated color `gen_index` (palette index `PALETTE_SIZE + gen_index`).
    pub fn generated_color(&self, gen_index: usize) -> Rgb {
        self.metrics().generate(gen_index)
    }
}

/// Palette index of `number`, allocating the lowest unused index (or the next
/// generated index once the palette is exhausted).
pub fn assign_index(map: &mut ColorMap, number: i64) -> usize {
    if let Some(&index) = map.get(&number) {
        return index;
    }

    let index = (0..PALETTE_SIZE)
        .find(|i| !map.values().any(|v| v == i))
        .unwrap_or_else(|| {
            map.values()
                .copied()
                .max()
                .map_or(PALETTE_SIZE, |max| max + 1)
                .max(PALETTE_SIZE)
        });

    tracing::debug!(category = number, palette_index = index, "assigned category color");
    map.insert(number, index);
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_hex_round_trip() {
        assert_eq!(Rgb::from_hex("#E6194B"), Some(PALETTE[0]));
        assert_eq!(Rgb::from_hex("e6194b"), Some(PALETTE[0]));
        assert_eq!(PALETTE[0].to_hex(), "#E6194B");
        assert_eq!(Rgb::from_hex("#12345"), None);
        assert_eq!(Rgb::from_hex("#GGGGGG"), None);
    }

    #[test]
    fn test_hsv_conversion() {
        assert_eq!(Rgb::from_hsv(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(Rgb::from_hsv(120.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(Rgb::from_hsv(240.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        let (h, s, v) = Rgb::new(0, 0, 255).to_hsv();
        assert_eq!((h, s, v), (240.0, 1.0, 1.0));
        let (_, s, _) = Rgb::new(128, 128, 128).to_hsv();
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_palette_has_no_duplicates() {
        let unique: HashSet<Rgb> = PALETTE.iter().copied().collect();
        assert_eq!(unique.len(), PALETTE_SIZE);
    }

    #[test]
    fn test_first_fifty_categories_use_palette_without_repeats() {
        let assigner = ColorAssigner::new();
        let mut map = ColorMap::new();
        let mut seen = HashSet::new();
        for number in 1..=50 {
            let color = assigner.color_for(Some(number), &mut map);
            assert!(PALETTE.contains(&color));
            assert!(seen.insert(color), "category {number} repeated a color");
        }
        assert_eq!(map.get(&1), Some(&0));
        assert_eq!(map.get(&50), Some(&49));
    }

    #[test]
    fn test_color_is_stable_and_never_reassigned() {
        let assigner = ColorAssigner::new();
        let mut map = ColorMap::new();
        let first = assigner.color_for(Some(7), &mut map);
        let index = map[&7];
        assigner.color_for(Some(3), &mut map);
        assert_eq!(assigner.color_for(Some(7), &mut map), first);
        assert_eq!(map[&7], index);
    }

    #[test]
    fn test_missing_category_does_not_mutate_map() {
        let assigner = ColorAssigner::new();
        let mut map = ColorMap::new();
        assert_eq!(assigner.color_for(None, &mut map), PALETTE[0]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_lowest_unused_index_is_reused() {
        let mut map = ColorMap::new();
        map.insert(10, 0);
        map.insert(11, 2);
        assert_eq!(assign_index(&mut map, 12), 1);
        assert_eq!(assign_index(&mut map, 13), 3);
    }

    #[test]
    fn test_exhausted_palette_allocates_generated_indices() {
        let mut map: ColorMap = (0..PALETTE_SIZE).map(|i| (i as i64 + 100, i)).collect();
        assert_eq!(assign_index(&mut map, 1), PALETTE_SIZE);
        assert_eq!(assign_index(&mut map, 2), PALETTE_SIZE + 1);
        assert_eq!(assign_index(&mut map, 1), PALETTE_SIZE);
    }

    #[test]
    fn test_generated_colors_are_deterministic_and_apart_from_palette() {
        let assigner = ColorAssigner::new();
        let metrics = PaletteMetrics::from_palette(&PALETTE);
        for gen_index in 0..200 {
            let color = assigner.generated_color(gen_index);
            assert_eq!(color, assigner.generated_color(gen_index));
            assert_eq!(color, ColorAssigner::new().generated_color(gen_index));
            assert!(!PALETTE.contains(&color));
            assert_eq!(color, metrics.generate(gen_index));
        }
    }

    #[test]
    fn test_generated_colors_keep_the_bounds_they_cleared() {
        let metrics = PaletteMetrics::from_palette(&PALETTE);
        for gen_index in 0..200 {
            let (color, acceptance) = metrics.generate_with_acceptance(gen_index);
            let (hue, _, _) = color.to_hsv();
            match acceptance {
                Acceptance::Cleared { min_hue, min_rgb } => {
                    assert!(min_hue <= STRICT_MIN_HUE && min_rgb <= STRICT_MIN_RGB);
                    // 8-bit rounding moves the hue by well under a degree
                    assert!(
                        metrics.min_hue_distance(hue) >= min_hue - 1.0,
                        "index {gen_index} hue too close"
                    );
                    assert!(
                        metrics.min_rgb_distance(color) >= min_rgb,
                        "index {gen_index} rgb too close"
                    );
                }
                // the dense palette left no candidate clear of the relaxed bounds
                Acceptance::BestEffort => {}
            }
        }
    }

    #[test]
    fn test_sparse_palette_clears_strict_thresholds() {
        let metrics = PaletteMetrics::from_palette(&[Rgb::new(0, 0, 0), Rgb::new(255, 0, 0)]);
        assert_eq!(metrics.saturated_hues, vec![0.0]);
        for gen_index in 0..20 {
            let (color, acceptance) = metrics.generate_with_acceptance(gen_index);
            assert_eq!(
                acceptance,
                Acceptance::Cleared {
                    min_hue: STRICT_MIN_HUE,
                    min_rgb: STRICT_MIN_RGB,
                }
            );
            let (hue, _, _) = color.to_hsv();
            assert!(metrics.min_hue_distance(hue) >= STRICT_MIN_HUE - 1.0);
            assert!(metrics.min_rgb_distance(color) >= STRICT_MIN_RGB);
        }
    }

    #[test]
    fn test_lookup_is_read_only() {
        let assigner = ColorAssigner::new();
        let mut map = ColorMap::new();
        map.insert(4, 9);
        assert_eq!(assigner.lookup(4, &map), PALETTE[9]);
        assert_eq!(assigner.lookup(52, &map), PALETTE[2]);
        assert_eq!(map.len(), 1);
    }
}
