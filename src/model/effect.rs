use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::color::{alpha_over, Rgb};
use super::palette::PaletteTable;
use super::segment::Segment;

/// Fallback tick length when an effect's frame rate is unusable.
pub const FALLBACK_TICK: f64 = 0.03;

/// A collection of segments composited onto one LED buffer, sharing a
/// frame clock and a current palette name. Compositing walks segments in
/// ascending id order, so a higher id always renders on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "EffectDoc")]
pub struct Effect {
    #[serde(rename = "effect_ID")]
    pub id: u32,
    pub led_count: usize,
    pub fps: f64,
    pub time: f64,
    pub current_palette: String,
    pub segments: BTreeMap<u32, Segment>,
}

#[derive(Deserialize)]
struct EffectDoc {
    #[serde(rename = "effect_ID")]
    id: u32,
    led_count: usize,
    fps: f64,
    #[serde(default = "default_palette_name")]
    current_palette: String,
    #[serde(default)]
    segments: BTreeMap<u32, Segment>,
}

fn default_palette_name() -> String {
    "A".to_owned()
}

impl From<EffectDoc> for Effect {
    fn from(doc: EffectDoc) -> Self {
        let mut segments = doc.segments;
        // The map key is authoritative for the segment id.
        for (id, segment) in &mut segments {
            segment.id = *id;
        }
        Effect {
            id: doc.id,
            led_count: doc.led_count,
            fps: doc.fps,
            time: 0.0,
            current_palette: doc.current_palette,
            segments,
        }
    }
}

impl Effect {
    #[must_use]
    pub fn new(id: u32, led_count: usize, fps: f64) -> Self {
        Effect {
            id,
            led_count,
            fps,
            time: 0.0,
            current_palette: default_palette_name(),
            segments: BTreeMap::new(),
        }
    }

    /// A new effect pre-populated with one factory-default segment, the
    /// shape every auto-created effect takes.
    #[must_use]
    pub fn with_default_segment(id: u32, led_count: usize, fps: f64) -> Self {
        let mut effect = Self::new(id, led_count, fps);
        effect.add_segment(Segment::with_defaults(1, led_count));
        effect
    }

    /// Seconds per frame, with a sane fallback if fps is unusable.
    #[must_use]
    pub fn tick_seconds(&self) -> f64 {
        if self.fps > 0.0 {
            1.0 / self.fps
        } else {
            FALLBACK_TICK
        }
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.insert(segment.id, segment);
    }

    /// Remove a segment, refusing to orphan the effect.
    pub fn remove_segment(&mut self, segment_id: u32) -> Result<(), AppError> {
        if !self.segments.contains_key(&segment_id) {
            return Err(AppError::not_found(format!("segment {segment_id}")));
        }
        if self.segments.len() <= 1 {
            return Err(AppError::LastChild { what: "segment" });
        }
        self.segments.remove(&segment_id);
        Ok(())
    }

    pub fn segment_mut(&mut self, segment_id: u32) -> Option<&mut Segment> {
        self.segments.get_mut(&segment_id)
    }

    /// Set this effect's palette name. Resolution happens at render time,
    /// so there is no cached state to refresh.
    pub fn set_palette(&mut self, palette_name: &str) {
        self.current_palette = palette_name.to_owned();
    }

    /// Advance the frame clock and integrate every segment's motion.
    pub fn update_all(&mut self) {
        let dt = self.tick_seconds();
        self.time += dt;
        for segment in self.segments.values_mut() {
            segment.update_position(dt);
        }
    }

    /// Composite all segments into a fresh LED buffer.
    ///
    /// Two parallel accumulators (color and coverage) run the alpha-over
    /// operator per sample; segments arrive in ascending id order, and each
    /// new sample composites *in front of* what is already there. The
    /// coverage buffer is discarded once the frame is flattened.
    #[must_use]
    pub fn render(&self, palettes: &PaletteTable) -> Vec<Rgb> {
        let mut colors = vec![Rgb::BLACK; self.led_count];
        let mut alphas = vec![0.0_f64; self.led_count];

        for segment in self.segments.values() {
            for sample in segment.sample(palettes, &self.current_palette) {
                let Ok(i) = usize::try_from(sample.index) else {
                    continue;
                };
                let (Some(slot), Some(coverage)) = (colors.get_mut(i), alphas.get_mut(i)) else {
                    continue;
                };
                let (rgb, a) = alpha_over(*slot, *coverage, sample.color, sample.alpha);
                *slot = rgb;
                *coverage = a;
            }
        }
        colors
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::default_palettes;

    fn still_segment(id: u32) -> Segment {
        let mut s = Segment::with_defaults(id, 10);
        s.move_speed = 0.0;
        s.length = [2, 2, 2];
        s
    }

    #[test]
    fn render_matches_gradient_for_a_single_opaque_segment() {
        let palettes = default_palettes();
        let mut effect = Effect::new(1, 10, 10.0);
        effect.add_segment(still_segment(1));

        let frame = effect.render(&palettes);
        assert_eq!(frame.len(), 10);
        // red → green → blue → yellow, two LEDs per sub-band
        assert_eq!(frame[0], Rgb::new(255, 0, 0));
        assert_eq!(frame[1], Rgb::new(128, 128, 0));
        assert_eq!(frame[2], Rgb::new(0, 255, 0));
        assert_eq!(frame[3], Rgb::new(0, 128, 128));
        assert_eq!(frame[4], Rgb::new(0, 0, 255));
        assert_eq!(frame[5], Rgb::new(128, 128, 128));
        for led in &frame[6..] {
            assert_eq!(*led, Rgb::BLACK);
        }
    }

    #[test]
    fn higher_segment_id_composites_on_top() {
        let palettes = default_palettes();
        let mut effect = Effect::new(1, 4, 10.0);

        let mut lower = still_segment(1);
        lower.length = [1, 0, 0];
        lower.color = [0, 0, 0, 0]; // red
        lower.transparency = [0.5; 4];
        let mut upper = still_segment(2);
        upper.length = [1, 0, 0];
        upper.color = [2, 2, 2, 2]; // blue
        upper.transparency = [0.5; 4];
        effect.add_segment(lower);
        effect.add_segment(upper);

        let frame = effect.render(&palettes);
        // blue(0.5) over red(0.5): alpha 0.75, color (85, 0, 170)
        assert_eq!(frame[0], Rgb::new(85, 0, 170));
    }

    #[test]
    fn samples_outside_the_strip_are_dropped() {
        let palettes = default_palettes();
        let mut effect = Effect::new(1, 4, 10.0);
        let mut s = still_segment(1);
        s.length = [2, 2, 2];
        s.move_range = [-10.0, 20.0];
        s.current_position = -2.0;
        effect.add_segment(s);

        let frame = effect.render(&palettes);
        assert_eq!(frame.len(), 4);
        // LEDs -2..=3 sampled; only 0..=3 land
        assert_ne!(frame[0], Rgb::BLACK);
    }

    #[test]
    fn update_all_advances_clock_and_positions() {
        let mut effect = Effect::new(1, 10, 10.0);
        let mut s = still_segment(1);
        s.move_speed = 10.0;
        s.length = [1, 1, 1];
        s.move_range = [0.0, 9.0];
        effect.add_segment(s);

        effect.update_all();
        assert!((effect.time - 0.1).abs() < 1e-12);
        let seg = effect.segments.get(&1).unwrap();
        assert!((seg.current_position - 1.0).abs() < 1e-12);
        assert!((seg.time - 0.1).abs() < 1e-12);
    }

    #[test]
    fn composite_is_deterministic_across_identical_runs() {
        let palettes = default_palettes();
        let build = || {
            let mut effect = Effect::new(1, 30, 30.0);
            for id in 1..=3 {
                let mut s = Segment::with_defaults(id, 30);
                s.length = [3, 3, 3];
                s.move_speed = f64::from(id) * 7.0;
                s.move_range = [0.0, 29.0];
                s.transparency = [0.6; 4];
                effect.add_segment(s);
            }
            effect
        };
        let mut a = build();
        let mut b = build();
        for _ in 0..100 {
            a.update_all();
            b.update_all();
        }
        assert_eq!(a.render(&palettes), b.render(&palettes));
    }

    #[test]
    fn remove_segment_guards_the_last_one() {
        let mut effect = Effect::with_default_segment(1, 10, 30.0);
        assert!(matches!(
            effect.remove_segment(1),
            Err(AppError::LastChild { what: "segment" })
        ));
        effect.add_segment(Segment::with_defaults(2, 10));
        effect.remove_segment(1).unwrap();
        assert_eq!(effect.segments.len(), 1);
        assert!(matches!(
            effect.remove_segment(9),
            Err(AppError::NotFound { .. })
        ));
    }

    #[test]
    fn json_round_trip_resets_clock_and_keys_segments_by_id() {
        let mut effect = Effect::with_default_segment(7, 225, 60.0);
        effect.time = 5.5;
        let json = serde_json::to_string(&effect).unwrap();
        let back: Effect = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.time, 0.0);
        assert_eq!(back.led_count, 225);
        assert_eq!(back.segments.len(), 1);
        assert_eq!(back.segments.get(&1).unwrap().id, 1);
    }
}
