use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config;
use crate::control::value::Value;
use crate::error::AppError;

use super::color::Rgb;
use super::palette::PaletteTable;

/// One color-and-alpha sample the segment contributes to a single LED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedSample {
    pub index: i64,
    pub color: Rgb,
    pub alpha: f64,
}

/// A moving band of light: four gradient stops spanning three sub-bands,
/// a sub-pixel anchor position integrated against a bounded range, and a
/// periodic trapezoidal brightness envelope.
///
/// The anchor (`current_position`) is the coordinate of the *left* stop;
/// the band covers `[anchor, anchor + total_length)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SegmentDoc")]
pub struct Segment {
    #[serde(rename = "segment_ID")]
    pub id: u32,
    /// Palette indices of the four gradient stops, left to right.
    pub color: [i32; 4],
    /// Opacity of each stop, 1.0 = opaque.
    pub transparency: [f64; 4],
    /// Widths in LEDs of the three sub-bands between the stops.
    pub length: [u32; 3],
    /// LEDs per second; the sign is the direction of travel.
    pub move_speed: f64,
    /// Anchor bounds, normalised so `move_range[0] <= move_range[1]`.
    pub move_range: [f64; 2],
    pub initial_position: f64,
    pub current_position: f64,
    /// true = bounce at the range edges, false = wrap around.
    pub is_edge_reflect: bool,
    /// Envelope milestones in ms: fade-in start/end, fade-out start/end,
    /// cycle length.
    pub dimmer_time: [i64; 5],
    pub dimmer_time_ratio: f64,
    /// Two-color gradient override switch (see `gradient_colors`).
    pub gradient: bool,
    /// Whether the dimming envelope is applied at all.
    pub fade: bool,
    /// `[enabled, left_index, right_index]` for the two-color override.
    pub gradient_colors: [i32; 3],
    /// Seconds since birth; drives the envelope phase.
    #[serde(skip)]
    pub time: f64,
    /// Unknown parameter names land here as opaque assignments. Never
    /// persisted, never rendered.
    #[serde(skip)]
    pub extras: HashMap<String, Value>,
}

/// Serde mirror carrying the documented defaults for optional fields.
#[derive(Deserialize)]
struct SegmentDoc {
    #[serde(rename = "segment_ID")]
    id: u32,
    color: [i32; 4],
    transparency: [f64; 4],
    length: [u32; 3],
    move_speed: f64,
    move_range: [f64; 2],
    initial_position: f64,
    #[serde(default)]
    current_position: Option<f64>,
    is_edge_reflect: bool,
    dimmer_time: [i64; 5],
    #[serde(default = "default_ratio")]
    dimmer_time_ratio: f64,
    #[serde(default)]
    gradient: bool,
    #[serde(default)]
    fade: bool,
    #[serde(default = "default_gradient_colors")]
    gradient_colors: [i32; 3],
}

fn default_ratio() -> f64 {
    1.0
}

fn default_gradient_colors() -> [i32; 3] {
    [0, -1, -1]
}

impl From<SegmentDoc> for Segment {
    fn from(doc: SegmentDoc) -> Self {
        let [lo, hi] = doc.move_range;
        Segment {
            id: doc.id,
            color: doc.color,
            transparency: doc.transparency,
            length: doc.length,
            move_speed: doc.move_speed,
            move_range: [lo.min(hi), lo.max(hi)],
            initial_position: doc.initial_position,
            current_position: doc.current_position.unwrap_or(doc.initial_position),
            is_edge_reflect: doc.is_edge_reflect,
            dimmer_time: doc.dimmer_time,
            dimmer_time_ratio: doc.dimmer_time_ratio,
            gradient: doc.gradient,
            fade: doc.fade,
            gradient_colors: doc.gradient_colors,
            time: 0.0,
            extras: HashMap::new(),
        }
    }
}

impl Segment {
    /// A factory-default segment spanning the configured strip.
    #[must_use]
    pub fn with_defaults(id: u32, led_count: usize) -> Self {
        Segment {
            id,
            color: [0, 1, 2, 3],
            transparency: config::DEFAULT_TRANSPARENCY,
            length: config::DEFAULT_LENGTH,
            move_speed: config::DEFAULT_MOVE_SPEED,
            move_range: config::default_move_range(led_count),
            initial_position: config::DEFAULT_INITIAL_POSITION,
            current_position: config::DEFAULT_INITIAL_POSITION,
            is_edge_reflect: config::DEFAULT_IS_EDGE_REFLECT,
            dimmer_time: config::DEFAULT_DIMMER_TIME,
            dimmer_time_ratio: config::DEFAULT_DIMMER_TIME_RATIO,
            gradient: false,
            fade: false,
            gradient_colors: default_gradient_colors(),
            time: 0.0,
            extras: HashMap::new(),
        }
    }

    #[must_use]
    pub fn total_length(&self) -> u32 {
        self.length.iter().sum()
    }

    /// Typed parameter setter. The dispatcher has already normalised wire
    /// shapes (string lists, scalar broadcasts); this enforces the per-field
    /// semantics: range re-ordering, anchor clamping, gradient flag coupling.
    pub fn update_param(&mut self, name: &str, value: &Value) -> Result<(), AppError> {
        match name {
            "color" => {
                self.color = int_array4(value, "color")?;
            }
            "gradient_colors" => {
                let raw = value
                    .int_list()
                    .ok_or_else(|| AppError::validation("gradient_colors expects a list"))?;
                let triple: [i64; 3] = raw
                    .try_into()
                    .map_err(|_| AppError::validation("gradient_colors expects 3 elements"))?;
                self.gradient_colors = triple.map(clamp_i32);
                if self.gradient_colors[0] == 1 {
                    self.gradient = true;
                }
            }
            "gradient" => {
                self.gradient = value
                    .as_bool_flexible()
                    .ok_or_else(|| AppError::validation("gradient expects a boolean"))?;
                if self.gradient && self.gradient_colors[0] == 0 {
                    self.gradient_colors[0] = 1;
                }
            }
            "move_range" => {
                let pair = value
                    .number_list()
                    .ok_or_else(|| AppError::validation("move_range expects a list"))?;
                let (&lo, &hi) = match pair.as_slice() {
                    [lo, hi, ..] => (lo, hi),
                    _ => {
                        return Err(AppError::validation("move_range expects 2 elements"));
                    }
                };
                self.move_range = [lo.min(hi), lo.max(hi)];
                self.current_position = self
                    .current_position
                    .clamp(self.move_range[0], self.move_range[1]);
            }
            "move_speed" => {
                self.move_speed = value
                    .as_f64_lenient()
                    .ok_or_else(|| AppError::validation("move_speed expects a number"))?;
            }
            "transparency" => {
                let raw = value
                    .number_list()
                    .ok_or_else(|| AppError::validation("transparency expects a list"))?;
                let four: [f64; 4] = raw
                    .try_into()
                    .map_err(|_| AppError::validation("transparency expects 4 elements"))?;
                self.transparency = four.map(|t| t.clamp(0.0, 1.0));
            }
            "length" => {
                let raw = value
                    .int_list()
                    .ok_or_else(|| AppError::validation("length expects a list"))?;
                let triple: [i64; 3] = raw
                    .try_into()
                    .map_err(|_| AppError::validation("length expects 3 elements"))?;
                self.length = triple.map(|l| u32::try_from(l.max(0)).unwrap_or(u32::MAX));
            }
            "dimmer_time" => {
                let raw = value
                    .int_list()
                    .ok_or_else(|| AppError::validation("dimmer_time expects a list"))?;
                if raw.len() < 5 {
                    return Err(AppError::validation("dimmer_time expects 5 elements"));
                }
                for (slot, v) in self.dimmer_time.iter_mut().zip(raw) {
                    *slot = v.max(0);
                }
            }
            "dimmer_time_ratio" => {
                let ratio = value
                    .as_f64_lenient()
                    .ok_or_else(|| AppError::validation("dimmer_time_ratio expects a number"))?;
                self.dimmer_time_ratio = ratio.max(0.1);
            }
            "is_edge_reflect" => {
                self.is_edge_reflect = value
                    .as_bool_flexible()
                    .ok_or_else(|| AppError::validation("is_edge_reflect expects a boolean"))?;
            }
            "initial_position" => {
                self.initial_position = value
                    .as_f64_lenient()
                    .ok_or_else(|| AppError::validation("initial_position expects a number"))?;
            }
            "current_position" => {
                self.current_position = value
                    .as_f64_lenient()
                    .ok_or_else(|| AppError::validation("current_position expects a number"))?;
            }
            "fade" => {
                self.fade = value
                    .as_bool_flexible()
                    .ok_or_else(|| AppError::validation("fade expects a boolean"))?;
            }
            other => {
                warn!(segment = self.id, param = other, "opaque segment parameter");
                self.extras.insert(other.to_owned(), value.clone());
            }
        }
        Ok(())
    }

    /// Integrate motion over `dt` seconds and advance the envelope clock.
    ///
    /// Reflect mode bounces the band once per tick, flipping the travel
    /// direction; wrap mode re-enters from the far edge, with a final clamp
    /// to the admissible anchor range as a safety net.
    pub fn update_position(&mut self, dt: f64) {
        let [lo, hi] = self.move_range;
        let total = f64::from(self.total_length());
        let mut new = self.current_position + self.move_speed * dt;

        if self.is_edge_reflect {
            if new < lo {
                new = lo;
                self.move_speed = self.move_speed.abs();
            }
            if new + total - 1.0 > hi {
                new = hi - total + 1.0;
                self.move_speed = -self.move_speed.abs();
            }
        } else {
            if new < lo {
                new = hi - (lo - new) + 1.0;
            }
            if new + total - 1.0 > hi {
                new = lo + (new + total - 1.0 - hi) - 1.0;
            }
            new = new.clamp(lo, (hi - total + 1.0).max(lo));
        }

        self.current_position = new;
        self.time += dt;
    }

    /// The periodic trapezoidal brightness multiplier at the current clock.
    ///
    /// Milestones are the ratio-scaled `dimmer_time` values; a disabled fade
    /// or non-positive cycle length holds the envelope at 1.
    #[must_use]
    pub fn dimming_envelope(&self) -> f64 {
        if !self.fade || self.dimmer_time_ratio <= 0.0 {
            return 1.0;
        }
        let scaled = self.dimmer_time.map(|v| {
            #[allow(clippy::cast_precision_loss)]
            let ms = (v as f64 * self.dimmer_time_ratio).round();
            ms.max(0.0)
        });
        let [t0, t1, t2, t3, cycle] = scaled;
        if cycle <= 0.0 {
            return 1.0;
        }
        let tau = (self.time * 1000.0).rem_euclid(cycle);

        if tau < t0 {
            0.0
        } else if tau < t1 {
            (tau - t0) / (t1 - t0).max(1.0)
        } else if tau < t2 {
            1.0
        } else if tau < t3 {
            1.0 - (tau - t2) / (t3 - t2).max(1.0)
        } else {
            0.0
        }
    }

    /// The four RGB stops, resolved against the given palette. The two-color
    /// gradient override replaces them with endpoints interpolated at 1/3
    /// and 2/3 when enabled and both endpoint indices are set.
    #[must_use]
    fn gradient_stops(&self, palettes: &PaletteTable, palette_name: &str) -> [Rgb; 4] {
        let [enabled, left_idx, right_idx] = self.gradient_colors;
        if self.gradient && enabled == 1 && left_idx >= 0 && right_idx >= 0 {
            let left = palettes.color_at(palette_name, left_idx);
            let right = palettes.color_at(palette_name, right_idx);
            [
                left,
                left.lerp(right, 1.0 / 3.0),
                left.lerp(right, 2.0 / 3.0),
                right,
            ]
        } else {
            self.color.map(|idx| palettes.color_at(palette_name, idx))
        }
    }

    /// Sample every LED the band currently overlaps.
    ///
    /// Each integer LED inside `[anchor, anchor + total_length)` is bucketed
    /// into one of the three sub-bands by its offset from the anchor; color
    /// and alpha interpolate between that sub-band's bounding stops, and the
    /// dimming envelope is already multiplied into the emitted color.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(&self, palettes: &PaletteTable, palette_name: &str) -> Vec<LedSample> {
        let total = f64::from(self.total_length());
        if total <= 0.0 {
            return Vec::new();
        }

        let [s0, s1, s2, s3] = self.gradient_stops(palettes, palette_name);
        let [a0, a1, a2, a3] = self.transparency;
        let envelope = self.dimming_envelope();
        let [l0, l1, l2] = self.length.map(f64::from);
        let pos = self.current_position;

        let first = pos.floor() as i64;
        let last = (pos + total - 1e-9).floor() as i64;

        let mut samples = Vec::with_capacity(usize::try_from(last - first + 1).unwrap_or(0));
        for index in first..=last {
            #[allow(clippy::cast_precision_loss)]
            let r = ((index as f64) - pos).clamp(0.0, total);

            let (from, to, from_a, to_a, t) = if r < l0 {
                (s0, s1, a0, a1, safe_div(r, l0))
            } else if r < l0 + l1 {
                (s1, s2, a1, a2, safe_div(r - l0, l1))
            } else {
                (s2, s3, a2, a3, safe_div(r - l0 - l1, l2))
            };

            let color = from.lerp(to, t).scale(envelope);
            let alpha = lerp_f64(from_a, to_a, t);
            samples.push(LedSample {
                index,
                color,
                alpha,
            });
        }
        samples
    }
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn lerp_f64(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn int_array4(value: &Value, what: &str) -> Result<[i32; 4], AppError> {
    let raw = value
        .int_list()
        .ok_or_else(|| AppError::validation(format!("{what} expects a list")))?;
    let four: [i64; 4] = raw
        .try_into()
        .map_err(|_| AppError::validation(format!("{what} expects 4 elements")))?;
    Ok(four.map(clamp_i32))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::default_palettes;

    fn segment() -> Segment {
        Segment::with_defaults(1, 225)
    }

    #[test]
    fn defaults_match_factory_settings() {
        let s = segment();
        assert_eq!(s.color, [0, 1, 2, 3]);
        assert_eq!(s.length, [10, 10, 10]);
        assert_eq!(s.total_length(), 30);
        assert_eq!(s.move_range, [0.0, 224.0]);
        assert!(!s.fade);
        assert!(!s.gradient);
        assert_eq!(s.gradient_colors, [0, -1, -1]);
    }

    #[test]
    fn reflect_clamps_and_reverses_at_upper_edge() {
        let mut s = segment();
        s.length = [1, 1, 1];
        s.move_range = [0.0, 9.0];
        s.current_position = 8.0;
        s.move_speed = 10.0;

        s.update_position(0.1);
        // raw 9.0 overshoots the right edge (9 + 3 - 1 > 9): clamp to 7, reverse
        assert_eq!(s.current_position, 7.0);
        assert_eq!(s.move_speed, -10.0);

        s.update_position(0.1);
        assert!((s.current_position - 6.0).abs() < 1e-12);
    }

    #[test]
    fn reflect_clamps_and_reverses_at_lower_edge() {
        let mut s = segment();
        s.length = [1, 1, 1];
        s.move_range = [0.0, 9.0];
        s.current_position = 0.5;
        s.move_speed = -10.0;

        s.update_position(0.1);
        assert_eq!(s.current_position, 0.0);
        assert_eq!(s.move_speed, 10.0);
    }

    #[test]
    fn reflect_keeps_band_inside_range() {
        let mut s = segment();
        s.length = [2, 2, 2];
        s.move_range = [3.0, 40.0];
        s.current_position = 3.0;
        s.move_speed = 37.0;
        for _ in 0..200 {
            s.update_position(1.0 / 30.0);
            let total = f64::from(s.total_length());
            assert!(s.current_position >= 3.0);
            assert!(s.current_position + total - 1.0 <= 40.0 + 1e-9);
        }
    }

    #[test]
    fn wrap_reenters_from_the_left() {
        let mut s = segment();
        s.is_edge_reflect = false;
        s.length = [1, 1, 1];
        s.move_range = [0.0, 9.0];
        s.current_position = 9.0;
        s.move_speed = 15.0;

        s.update_position(0.1);
        // raw 10.5: right edge 12.5 overshoots by 3.5 → 0 + 3.5 − 1 = 2.5
        assert!((s.current_position - 2.5).abs() < 1e-12);
        assert_eq!(s.move_speed, 15.0);
    }

    #[test]
    fn wrap_of_point_band_hits_safety_clamp() {
        let mut s = segment();
        s.is_edge_reflect = false;
        s.length = [0, 0, 0];
        s.move_range = [0.0, 9.0];
        s.current_position = 9.0;
        s.move_speed = 15.0;

        s.update_position(0.1);
        // raw 10.5 wraps to −0.5; the safety clamp floors it at the range start
        assert_eq!(s.current_position, 0.0);
    }

    #[test]
    fn trapezoid_envelope_milestones() {
        let mut s = segment();
        s.fade = true;
        s.dimmer_time = [0, 100, 400, 500, 1000];
        s.dimmer_time_ratio = 1.0;

        let cases = [
            (0.050, 0.5),
            (0.250, 1.0),
            (0.450, 0.5),
            (0.600, 0.0),
            (1.050, 0.5), // next cycle
        ];
        for (time, expected) in cases {
            s.time = time;
            let env = s.dimming_envelope();
            assert!(
                (env - expected).abs() < 1e-9,
                "t={time}: envelope {env}, expected {expected}"
            );
        }
    }

    #[test]
    fn envelope_disabled_without_fade_or_cycle() {
        let mut s = segment();
        s.time = 0.050;
        s.dimmer_time = [0, 100, 400, 500, 1000];
        assert_eq!(s.dimming_envelope(), 1.0); // fade off

        s.fade = true;
        s.dimmer_time[4] = 0;
        assert_eq!(s.dimming_envelope(), 1.0); // no cycle
    }

    #[test]
    fn envelope_scales_with_ratio() {
        let mut s = segment();
        s.fade = true;
        s.dimmer_time = [0, 100, 400, 500, 1000];
        s.dimmer_time_ratio = 2.0;
        // milestones double: at 100ms the fade-in (0..200ms) is halfway
        s.time = 0.100;
        assert!((s.dimming_envelope() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn sample_interpolates_across_sub_bands() {
        let palettes = default_palettes();
        let mut s = segment();
        s.length = [2, 2, 2];
        s.current_position = 0.0;
        s.color = [0, 1, 2, 3]; // red, green, blue, yellow on palette A

        let samples = s.sample(&palettes, "A");
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].index, 0);
        assert_eq!(samples[0].color, Rgb::new(255, 0, 0));
        assert_eq!(samples[1].color, Rgb::new(128, 128, 0));
        assert_eq!(samples[2].color, Rgb::new(0, 255, 0));
        assert_eq!(samples[3].color, Rgb::new(0, 128, 128));
        assert_eq!(samples[4].color, Rgb::new(0, 0, 255));
        assert_eq!(samples[5].color, Rgb::new(128, 128, 128));
        for sample in &samples {
            assert_eq!(sample.alpha, 1.0);
        }
    }

    #[test]
    fn sample_at_fractional_anchor_shifts_coverage() {
        let palettes = default_palettes();
        let mut s = segment();
        s.length = [1, 1, 1];
        s.current_position = 2.5;

        let samples = s.sample(&palettes, "A");
        let indices: Vec<i64> = samples.iter().map(|x| x.index).collect();
        assert_eq!(indices, vec![2, 3, 4, 5]);
    }

    #[test]
    fn zero_length_band_emits_nothing() {
        let palettes = default_palettes();
        let mut s = segment();
        s.length = [0, 0, 0];
        assert!(s.sample(&palettes, "A").is_empty());
    }

    #[test]
    fn sample_applies_envelope_to_color_only() {
        let palettes = default_palettes();
        let mut s = segment();
        s.length = [1, 1, 1];
        s.color = [0, 0, 0, 0];
        s.fade = true;
        s.dimmer_time = [0, 100, 400, 500, 1000];
        s.time = 0.050; // envelope 0.5

        let samples = s.sample(&palettes, "A");
        assert_eq!(samples[0].color, Rgb::new(128, 0, 0));
        assert_eq!(samples[0].alpha, 1.0);
    }

    #[test]
    fn gradient_override_uses_endpoint_colors() {
        let palettes = default_palettes();
        let mut s = segment();
        s.length = [1, 1, 1];
        s.gradient = true;
        s.gradient_colors = [1, 0, 2]; // red → blue on palette A

        let samples = s.sample(&palettes, "A");
        assert_eq!(samples[0].color, Rgb::new(255, 0, 0));
        assert_eq!(samples[3].color, Rgb::new(0, 0, 255));
    }

    #[test]
    fn out_of_range_palette_index_renders_error_color() {
        let palettes = default_palettes();
        let mut s = segment();
        s.length = [1, 1, 1];
        s.color = [9, 9, 9, 9];
        let samples = s.sample(&palettes, "A");
        for sample in samples {
            assert_eq!(sample.color, Rgb::ERROR);
        }
    }

    #[test]
    fn update_param_normalises_move_range_and_clamps_anchor() {
        let mut s = segment();
        s.current_position = 200.0;
        s.update_param(
            "move_range",
            &Value::List(vec![Value::Int(100), Value::Int(20)]),
        )
        .unwrap();
        assert_eq!(s.move_range, [20.0, 100.0]);
        assert_eq!(s.current_position, 100.0);
    }

    #[test]
    fn update_param_gradient_flags_are_coupled() {
        let mut s = segment();
        s.update_param("gradient_colors", &Value::list_of_ints([1, 2, 3]))
            .unwrap();
        assert!(s.gradient);
        assert_eq!(s.gradient_colors, [1, 2, 3]);

        let mut s = segment();
        s.update_param("gradient", &Value::Bool(true)).unwrap();
        assert_eq!(s.gradient_colors[0], 1);
    }

    #[test]
    fn update_param_clamps_transparency() {
        let mut s = segment();
        s.update_param(
            "transparency",
            &Value::list_of_floats([-0.5, 0.25, 0.75, 2.0]),
        )
        .unwrap();
        assert_eq!(s.transparency, [0.0, 0.25, 0.75, 1.0]);
    }

    #[test]
    fn update_param_rejects_bad_shapes() {
        let mut s = segment();
        assert!(s
            .update_param("color", &Value::list_of_ints([0, 1]))
            .is_err());
        assert!(s.update_param("move_speed", &Value::from("fast")).is_err());
        assert!(s
            .update_param("dimmer_time", &Value::list_of_ints([0, 1, 2]))
            .is_err());
    }

    #[test]
    fn unknown_param_is_stored_opaquely() {
        let mut s = segment();
        s.update_param("sparkle", &Value::Int(7)).unwrap();
        assert_eq!(s.extras.get("sparkle"), Some(&Value::Int(7)));
    }

    #[test]
    fn deserialization_fills_documented_defaults() {
        let json = r#"{
            "segment_ID": 3,
            "color": [0, 1, 2, 3],
            "transparency": [1.0, 1.0, 1.0, 1.0],
            "length": [10, 10, 10],
            "move_speed": -5.0,
            "move_range": [224, 0],
            "initial_position": 12.5,
            "is_edge_reflect": true,
            "dimmer_time": [0, 100, 200, 100, 0]
        }"#;
        let s: Segment = serde_json::from_str(json).unwrap();
        assert_eq!(s.current_position, 12.5);
        assert_eq!(s.move_range, [0.0, 224.0]); // normalised on load
        assert_eq!(s.dimmer_time_ratio, 1.0);
        assert!(!s.gradient);
        assert!(!s.fade);
        assert_eq!(s.gradient_colors, [0, -1, -1]);
        assert_eq!(s.time, 0.0);
    }
}
