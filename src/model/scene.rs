use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config;
use crate::error::AppError;

use super::color::Rgb;
use super::effect::{Effect, FALLBACK_TICK};
use super::palette::PaletteTable;

/// Scene-level cross-fade controller.
///
/// The scene controller only *times* the change: while fading, rendering
/// continues from the pre-swap effect and palette, and once
/// `fade_out + fade_in` has elapsed the pending targets are applied in one
/// step. Output brightness is the manager's job, not the scene's.
#[derive(Debug, Clone, Default)]
pub struct SceneTransition {
    pub state: SceneTransitionState,
    pub next_effect_id: Option<u32>,
    pub next_palette: Option<String>,
    pub fade_in: f64,
    pub fade_out: f64,
    pub elapsed: f64,
    pub effect_active: bool,
    pub palette_active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SceneTransitionState {
    #[default]
    Idle,
    Fading,
}

/// A collection of effects plus the palette table they share. Exactly one
/// effect is live at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SceneDoc")]
pub struct Scene {
    #[serde(rename = "scene_ID")]
    pub id: u32,
    #[serde(rename = "current_effect_ID")]
    pub current_effect_id: Option<u32>,
    pub current_palette: String,
    pub palettes: PaletteTable,
    pub effects: BTreeMap<u32, Effect>,
    #[serde(skip)]
    pub transition: SceneTransition,
}

#[derive(Deserialize)]
struct SceneDoc {
    #[serde(rename = "scene_ID")]
    id: u32,
    #[serde(rename = "current_effect_ID", default)]
    current_effect_id: Option<u32>,
    #[serde(default = "default_palette_name")]
    current_palette: String,
    #[serde(default = "config::default_palettes")]
    palettes: PaletteTable,
    #[serde(default)]
    effects: BTreeMap<u32, Effect>,
}

fn default_palette_name() -> String {
    "A".to_owned()
}

impl From<SceneDoc> for Scene {
    fn from(doc: SceneDoc) -> Self {
        let mut effects = doc.effects;
        for (id, effect) in &mut effects {
            effect.id = *id;
        }
        let current_effect_id = doc
            .current_effect_id
            .filter(|id| effects.contains_key(id))
            .or_else(|| effects.keys().next().copied());
        let mut scene = Scene {
            id: doc.id,
            current_effect_id,
            current_palette: doc.current_palette,
            palettes: doc.palettes,
            effects,
            transition: SceneTransition::default(),
        };
        // Re-assert the scene palette so every loaded effect agrees with it.
        if scene.palettes.contains(&scene.current_palette) {
            let name = scene.current_palette.clone();
            scene.set_palette(&name);
        }
        scene
    }
}

impl Scene {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Scene {
            id,
            current_effect_id: None,
            current_palette: default_palette_name(),
            palettes: config::default_palettes(),
            effects: BTreeMap::new(),
            transition: SceneTransition::default(),
        }
    }

    /// A new scene pre-populated with one default effect (and its default
    /// segment), the shape every auto-created scene takes.
    #[must_use]
    pub fn with_default_effect(id: u32, led_count: usize, fps: f64) -> Self {
        let mut scene = Self::new(id);
        scene.add_effect(Effect::with_default_segment(1, led_count, fps));
        scene
    }

    pub fn add_effect(&mut self, mut effect: Effect) {
        effect.set_palette(&self.current_palette);
        let id = effect.id;
        self.effects.insert(id, effect);
        if self.current_effect_id.is_none() {
            self.current_effect_id = Some(id);
        }
    }

    /// Remove an effect, refusing to orphan the scene. If the live effect is
    /// removed, the lowest remaining id takes over.
    pub fn remove_effect(&mut self, effect_id: u32) -> Result<(), AppError> {
        if !self.effects.contains_key(&effect_id) {
            return Err(AppError::not_found(format!("effect {effect_id}")));
        }
        if self.effects.len() <= 1 {
            return Err(AppError::LastChild { what: "effect" });
        }
        self.effects.remove(&effect_id);
        if self.current_effect_id == Some(effect_id) {
            self.current_effect_id = self.effects.keys().next().copied();
        }
        Ok(())
    }

    #[must_use]
    pub fn effect(&self, effect_id: u32) -> Option<&Effect> {
        self.effects.get(&effect_id)
    }

    pub fn effect_mut(&mut self, effect_id: u32) -> Option<&mut Effect> {
        self.effects.get_mut(&effect_id)
    }

    #[must_use]
    pub fn current_effect(&self) -> Option<&Effect> {
        self.current_effect_id.and_then(|id| self.effects.get(&id))
    }

    /// Make an effect live immediately (no fade).
    pub fn switch_effect(&mut self, effect_id: u32) {
        if self.effects.contains_key(&effect_id) {
            self.current_effect_id = Some(effect_id);
        }
    }

    /// Set the scene palette and propagate the name to every owned effect.
    /// Unknown names are ignored.
    pub fn set_palette(&mut self, palette_name: &str) {
        if !self.palettes.contains(palette_name) {
            return;
        }
        self.current_palette = palette_name.to_owned();
        for effect in self.effects.values_mut() {
            effect.set_palette(palette_name);
        }
    }

    /// Replace one palette's color list. If that palette is live, re-assert
    /// it so effects pick the change up.
    pub fn update_palette(&mut self, palette_name: &str, colors: Vec<Rgb>) {
        if !self.palettes.contains(palette_name) {
            return;
        }
        self.palettes.insert(palette_name, colors);
        if self.current_palette == palette_name {
            let name = palette_name.to_owned();
            self.set_palette(&name);
        }
    }

    /// Replace the whole palette table. The live palette follows its name
    /// into the new table; if the name is gone, the first available palette
    /// takes over.
    pub fn update_all_palettes(&mut self, palettes: PaletteTable) {
        self.palettes = palettes;
        if self.palettes.contains(&self.current_palette) {
            let name = self.current_palette.clone();
            self.set_palette(&name);
        } else if let Some(first) = self.palettes.first_name() {
            let name = first.to_owned();
            self.set_palette(&name);
        }
    }

    /// Arm the cross-fade controller. A new command overwrites any pending
    /// transition; there is no queue.
    pub fn begin_transition(
        &mut self,
        next_effect_id: Option<u32>,
        next_palette: Option<String>,
        fade_in: f64,
        fade_out: f64,
    ) {
        self.transition = SceneTransition {
            state: SceneTransitionState::Fading,
            effect_active: next_effect_id.is_some(),
            palette_active: next_palette.is_some(),
            next_effect_id,
            next_palette,
            fade_in: fade_in.max(0.0),
            fade_out: fade_out.max(0.0),
            elapsed: 0.0,
        };
    }

    /// Seconds per tick, taken from the live effect.
    #[must_use]
    pub fn tick_seconds(&self) -> f64 {
        self.current_effect()
            .map_or(FALLBACK_TICK, Effect::tick_seconds)
    }

    /// Advance one tick: run the transition controller, then the live effect.
    pub fn update(&mut self) {
        if self.transition.state == SceneTransitionState::Fading {
            self.transition.elapsed += self.tick_seconds();
            if self.transition.elapsed >= self.transition.fade_in + self.transition.fade_out {
                let pending = std::mem::take(&mut self.transition);
                if pending.effect_active {
                    if let Some(id) = pending.next_effect_id {
                        self.switch_effect(id);
                        debug!(scene = self.id, effect = id, "transition swapped effect");
                    }
                }
                if pending.palette_active {
                    if let Some(name) = pending.next_palette {
                        self.set_palette(&name);
                        debug!(scene = self.id, palette = %name, "transition swapped palette");
                    }
                }
            }
        }

        if let Some(id) = self.current_effect_id {
            if let Some(effect) = self.effects.get_mut(&id) {
                effect.update_all();
            }
        }
    }

    /// The live effect's composited frame, or an empty buffer when the scene
    /// has no live effect.
    #[must_use]
    pub fn render(&self) -> Vec<Rgb> {
        self.current_effect()
            .map(|effect| effect.render(&self.palettes))
            .unwrap_or_default()
    }
}
