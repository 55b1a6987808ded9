use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::AppError;

use super::color::Rgb;
use super::effect::FALLBACK_TICK;
use super::scene::Scene;

/// Width of the all-dark hold between fade-out and fade-in.
const GAP_HOLD_SECS: f64 = 0.1;

/// Where finished frames go. Injected into the manager so rendering stays
/// decoupled from the transport that carries frames downstream.
pub trait FrameSink: Send + Sync {
    fn push_frame(&self, frame: &[Rgb]);
}

/// A palette chosen either by name or by position in the sorted name list.
/// Index selectors resolve against the *destination* scene at swap time.
#[derive(Debug, Clone, PartialEq)]
pub enum PaletteSelector {
    Name(String),
    Index(i64),
}

impl PaletteSelector {
    #[must_use]
    pub fn resolve(&self, scene: &Scene) -> Option<String> {
        match self {
            PaletteSelector::Name(name) => {
                scene.palettes.contains(name).then(|| name.clone())
            }
            PaletteSelector::Index(idx) => {
                scene.palettes.name_by_index(*idx).map(str::to_owned)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManagerTransitionState {
    #[default]
    Idle,
    FadingOut,
    GapHold,
    FadingIn,
}

/// Manager-level cross-fade controller. Unlike the scene controller this one
/// *does* modulate output brightness: the rendered frame is multiplied by
/// `opacity` on the way out.
#[derive(Debug, Clone)]
pub struct ManagerTransition {
    pub state: ManagerTransitionState,
    pub next_scene_id: Option<u32>,
    pub next_effect_id: Option<u32>,
    pub next_palette: Option<PaletteSelector>,
    pub fade_in: f64,
    pub fade_out: f64,
    pub elapsed: f64,
    pub opacity: f64,
    swapped: bool,
}

impl Default for ManagerTransition {
    fn default() -> Self {
        ManagerTransition {
            state: ManagerTransitionState::Idle,
            next_scene_id: None,
            next_effect_id: None,
            next_palette: None,
            fade_in: 0.0,
            fade_out: 0.0,
            elapsed: 0.0,
            opacity: 1.0,
            swapped: false,
        }
    }
}

/// Owns every scene, selects the live one, runs the scene-level cross-fade,
/// and pushes each finished frame to the injected sink.
pub struct SceneManager {
    pub scenes: BTreeMap<u32, Scene>,
    pub current_scene_id: Option<u32>,
    pub transition: ManagerTransition,
    /// Default fade times consulted by `switch_scene`; persisted as
    /// `transition_params`.
    pub fade_in: f64,
    pub fade_out: f64,
    sink: Option<Arc<dyn FrameSink>>,
}

impl SceneManager {
    #[must_use]
    pub fn new() -> Self {
        SceneManager {
            scenes: BTreeMap::new(),
            current_scene_id: None,
            transition: ManagerTransition::default(),
            fade_in: 0.0,
            fade_out: 0.0,
            sink: None,
        }
    }

    /// A manager holding one default scene, the minimal startable state.
    #[must_use]
    pub fn with_default_scene(led_count: usize, fps: f64) -> Self {
        let mut manager = Self::new();
        manager.add_scene(Scene::with_default_effect(1, led_count, fps));
        manager
    }

    pub fn set_sink(&mut self, sink: Arc<dyn FrameSink>) {
        self.sink = Some(sink);
    }

    pub fn add_scene(&mut self, scene: Scene) {
        let id = scene.id;
        self.scenes.insert(id, scene);
        if self.current_scene_id.is_none() {
            self.current_scene_id = Some(id);
        }
    }

    /// Remove a scene, refusing to orphan the manager. If the live scene is
    /// removed, the lowest remaining id takes over.
    pub fn remove_scene(&mut self, scene_id: u32) -> Result<(), AppError> {
        if !self.scenes.contains_key(&scene_id) {
            return Err(AppError::not_found(format!("scene {scene_id}")));
        }
        if self.scenes.len() <= 1 {
            return Err(AppError::LastChild { what: "scene" });
        }
        self.scenes.remove(&scene_id);
        if self.current_scene_id == Some(scene_id) {
            self.current_scene_id = self.scenes.keys().next().copied();
        }
        Ok(())
    }

    #[must_use]
    pub fn scene(&self, scene_id: u32) -> Option<&Scene> {
        self.scenes.get(&scene_id)
    }

    pub fn scene_mut(&mut self, scene_id: u32) -> Option<&mut Scene> {
        self.scenes.get_mut(&scene_id)
    }

    #[must_use]
    pub fn current_scene(&self) -> Option<&Scene> {
        self.current_scene_id.and_then(|id| self.scenes.get(&id))
    }

    pub fn current_scene_mut(&mut self) -> Option<&mut Scene> {
        self.current_scene_id
            .and_then(|id| self.scenes.get_mut(&id))
    }

    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        self.transition.state != ManagerTransitionState::Idle
    }

    /// Switch the live scene, cross-fading when default fade times are set.
    pub fn switch_scene(&mut self, scene_id: u32) -> Result<(), AppError> {
        if !self.scenes.contains_key(&scene_id) {
            return Err(AppError::not_found(format!("scene {scene_id}")));
        }
        if self.fade_in > 0.0 || self.fade_out > 0.0 {
            let (fade_in, fade_out) = (self.fade_in, self.fade_out);
            self.begin_transition(Some(scene_id), None, None, fade_in, fade_out);
        } else {
            self.current_scene_id = Some(scene_id);
            info!(scene = scene_id, "switched scene");
        }
        Ok(())
    }

    /// Arm the manager cross-fade. A new command overwrites any pending
    /// transition; there is no queue. Output goes dark immediately
    /// (opacity 0) and the schedule takes over on the next tick.
    pub fn begin_transition(
        &mut self,
        next_scene_id: Option<u32>,
        next_effect_id: Option<u32>,
        next_palette: Option<PaletteSelector>,
        fade_in: f64,
        fade_out: f64,
    ) {
        if next_scene_id.is_none() && next_effect_id.is_none() && next_palette.is_none() {
            return;
        }
        self.transition = ManagerTransition {
            state: ManagerTransitionState::FadingOut,
            next_scene_id,
            next_effect_id,
            next_palette,
            fade_in: fade_in.max(0.0),
            fade_out: fade_out.max(0.0),
            elapsed: 0.0,
            opacity: 0.0,
            swapped: false,
        };
    }

    /// Apply the pending scene/effect/palette targets in one step. Runs
    /// exactly once per transition, on entry to the dark gap.
    fn perform_swap(&mut self) {
        if self.transition.swapped {
            return;
        }
        self.transition.swapped = true;

        if let Some(next) = self.transition.next_scene_id {
            if self.scenes.contains_key(&next) {
                self.current_scene_id = Some(next);
                debug!(scene = next, "transition swapped scene");
            }
        }
        let next_effect = self.transition.next_effect_id;
        let next_palette = self.transition.next_palette.clone();
        if let Some(scene) = self.current_scene_mut() {
            if let Some(effect_id) = next_effect {
                scene.switch_effect(effect_id);
            }
            if let Some(selector) = next_palette {
                if let Some(name) = selector.resolve(scene) {
                    scene.set_palette(&name);
                }
            }
        }
    }

    /// Seconds per tick, taken from the live scene's live effect.
    #[must_use]
    pub fn tick_seconds(&self) -> f64 {
        self.current_scene().map_or(FALLBACK_TICK, Scene::tick_seconds)
    }

    /// Advance one tick: run the transition schedule, update the live scene,
    /// then hand the finished frame to the sink.
    pub fn update(&mut self) {
        if self.current_scene().is_none() {
            return;
        }

        if self.is_transitioning() {
            self.transition.elapsed += self.tick_seconds();
            let t = self.transition.elapsed;
            let fade_out = self.transition.fade_out;
            let fade_in = self.transition.fade_in;

            if t < fade_out {
                self.transition.state = ManagerTransitionState::FadingOut;
                self.transition.opacity = 1.0 - t / fade_out;
            } else if t < fade_out + GAP_HOLD_SECS {
                self.transition.state = ManagerTransitionState::GapHold;
                self.transition.opacity = 0.0;
                self.perform_swap();
            } else if t < fade_out + GAP_HOLD_SECS + fade_in {
                self.perform_swap();
                self.transition.state = ManagerTransitionState::FadingIn;
                self.transition.opacity = (t - fade_out - GAP_HOLD_SECS) / fade_in;
            } else {
                self.perform_swap();
                self.transition = ManagerTransition::default();
            }
        }

        if let Some(scene) = self.current_scene_mut() {
            scene.update();
        }

        if let Some(sink) = self.sink.clone() {
            let frame = self.render();
            sink.push_frame(&frame);
        }
    }

    /// The live scene's frame, dimmed by the transition opacity while a
    /// manager cross-fade is in flight.
    #[must_use]
    pub fn render(&self) -> Vec<Rgb> {
        let mut frame = self.current_scene().map(Scene::render).unwrap_or_default();
        if self.is_transitioning() && self.transition.opacity < 1.0 {
            for led in &mut frame {
                *led = led.scale(self.transition.opacity);
            }
        }
        frame
    }
}

impl Default for SceneManager {
    fn default() -> Self {
        Self::new()
    }
}
