use serde::{Deserialize, Serialize};

/// Tolerance below which a composite alpha is treated as fully transparent.
const ALPHA_EPSILON: f64 = 1e-6;

/// RGB color with 8-bit channels. Transparency travels alongside as a
/// separate `f64` coverage value during composition, so the pixel type
/// itself stays a plain byte triple (and serializes as `[r, g, b]`,
/// matching the palette and frame documents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    /// Substituted whenever a segment references a palette slot that does
    /// not exist.
    pub const ERROR: Rgb = Rgb { r: 255, g: 0, b: 0 };

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Linear interpolation between two colors. `t` is clamped to [0, 1]
    /// and each channel rounds to the nearest integer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self {
            r: lerp_channel(self.r, other.r, t),
            g: lerp_channel(self.g, other.g, t),
            b: lerp_channel(self.b, other.b, t),
        }
    }

    /// Scale brightness by a factor clamped to [0, 1].
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scale(self, factor: f64) -> Self {
        let f = factor.clamp(0.0, 1.0);
        Self {
            r: (f64::from(self.r) * f).round() as u8,
            g: (f64::from(self.g) * f).round() as u8,
            b: (f64::from(self.b) * f).round() as u8,
        }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::BLACK
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lerp_channel(a: u8, b: u8, t: f64) -> u8 {
    (f64::from(a) + (f64::from(b) - f64::from(a)) * t)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Porter–Duff "source over destination" on straight-alpha samples.
///
/// The output alpha is `src_a + dst_a·(1 − src_a)`; the output color is the
/// premultiplied sum divided back out by that alpha. A composite alpha at or
/// below [`ALPHA_EPSILON`] collapses to transparent black.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn alpha_over(dst: Rgb, dst_a: f64, src: Rgb, src_a: f64) -> (Rgb, f64) {
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= ALPHA_EPSILON {
        return (Rgb::BLACK, 0.0);
    }
    let blend = |s: u8, d: u8| -> u8 {
        ((f64::from(s) * src_a + f64::from(d) * dst_a * (1.0 - src_a)) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    (
        Rgb {
            r: blend(src.r, dst.r),
            g: blend(src.g, dst.g),
            b: blend(src.b, dst.b),
        },
        out_a,
    )
}
