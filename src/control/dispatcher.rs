use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config;
use crate::error::AppError;
use crate::model::color::Rgb;
use crate::model::effect::Effect;
use crate::model::manager::SceneManager;
use crate::model::palette::PaletteTable;
use crate::model::scene::Scene;
use crate::model::segment::Segment;
use crate::output::BinaryEmitter;
use crate::persist;

use super::address::{self, Route};
use super::value::{parse_string_list, Value};

/// One inbound control message: an address plus its typed argument tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub addr: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ControlMessage {
    #[must_use]
    pub fn new(addr: impl Into<String>, args: Vec<Value>) -> Self {
        ControlMessage {
            addr: addr.into(),
            args,
        }
    }
}

/// Where outbound confirmation/event messages go. The UDP client implements
/// this; tests substitute a recorder.
pub trait EventSink: Send + Sync {
    fn send(&self, addr: &str, args: Vec<Value>);
}

/// Fade times hard-wired into the scene-level `change_*` commands.
const CHANGE_FADE_SECS: f64 = 1.0;

/// Routes control messages onto the model. Every failure mode is
/// log-and-drop: a bad message never takes down the receive loop, and a
/// render tick observes either all of a message's effects or none of them
/// (the caller holds the model lock across `dispatch`).
pub struct Dispatcher {
    /// Strip length for auto-created effects and segments.
    pub led_count: usize,
    /// Frame rate for auto-created effects.
    pub fps: f64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(led_count: usize, fps: f64) -> Self {
        Dispatcher { led_count, fps }
    }

    pub fn dispatch(
        &self,
        manager: &mut SceneManager,
        emitter: &BinaryEmitter,
        events: &dyn EventSink,
        msg: &ControlMessage,
    ) {
        let Some(route) = address::parse(&msg.addr) else {
            warn!(addr = %msg.addr, "unrecognised address pattern");
            return;
        };

        let result = match route {
            Route::SegmentParam {
                scene,
                effect,
                segment,
                param,
                auto_create,
            } => self.segment_param(
                manager,
                events,
                scene,
                effect,
                segment,
                &param,
                auto_create,
                &msg.args,
            ),
            Route::EffectSetPalette { scene, effect } => {
                effect_set_palette(manager, events, scene, effect, &msg.args)
            }
            Route::EffectDirectPalette { scene, effect } => {
                effect_direct_palette(manager, events, scene, effect, &msg.args)
            }
            Route::EffectChangePalette { scene, effect } => {
                effect_change_palette(manager, events, scene, effect, &msg.args)
            }
            Route::AddSegment { scene, effect } => {
                self.add_segment(manager, events, scene, effect, &msg.args)
            }
            Route::RemoveSegment { scene, effect } => {
                remove_segment(manager, events, scene, effect, &msg.args)
            }
            Route::SceneSetPalette { scene } => {
                scene_set_palette(manager, events, scene, &msg.args)
            }
            Route::SceneChangePalette { scene } => {
                scene_change_palette(manager, events, scene, &msg.args)
            }
            Route::ChangeEffect { scene } => change_effect(manager, events, scene, &msg.args),
            Route::AddEffect { scene } => self.add_effect(manager, events, scene, &msg.args),
            Route::RemoveEffect { scene } => remove_effect(manager, events, scene, &msg.args),
            Route::UpdatePalettes { scene } => {
                update_palettes(manager, events, scene, &msg.args)
            }
            Route::SaveEffects { scene } => save_effects(manager, events, scene, &msg.args),
            Route::LoadEffects { scene } => load_effects(manager, events, scene, &msg.args),
            Route::SavePalettes { scene } => save_palettes(manager, events, scene, &msg.args),
            Route::LoadPalettes { scene } => load_palettes(manager, events, scene, &msg.args),
            Route::AddScene => self.add_scene(manager, events, &msg.args),
            Route::RemoveScene => remove_scene(manager, events, &msg.args),
            Route::SwitchScene => switch_scene(manager, events, &msg.args),
            Route::ListScenes => list_scenes(manager, events),
            Route::LoadScene => load_scene(manager, events, &msg.args),
            Route::LoadSceneData => load_scene_data(manager, events, &msg.args),
            Route::LegacyPalette { palette } => {
                legacy_palette(manager, events, &palette, &msg.args)
            }
            Route::UpdateSerialOutput => update_serial_output(emitter, events, &msg.args),
            Route::RequestInit => request_init(manager, events, &msg.args),
        };

        if let Err(e) = result {
            warn!(addr = %msg.addr, error = %e, "control message dropped");
        }
    }

    // ── Segment parameters ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn segment_param(
        &self,
        manager: &mut SceneManager,
        events: &dyn EventSink,
        scene_id: u32,
        effect_id: u32,
        segment_id: u32,
        param: &str,
        auto_create: bool,
        args: &[Value],
    ) -> Result<(), AppError> {
        let raw = args
            .first()
            .ok_or_else(|| AppError::validation("missing value"))?;

        if auto_create {
            self.ensure_target(manager, scene_id, effect_id, segment_id);
        }

        let segment = manager
            .scene_mut(scene_id)
            .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?
            .effect_mut(effect_id)
            .ok_or_else(|| AppError::not_found(format!("effect {effect_id}")))?
            .segment_mut(segment_id)
            .ok_or_else(|| AppError::not_found(format!("segment {segment_id}")))?;

        // List-shaped parameters may arrive as strings; unpack before
        // dispatching on shape.
        let mut value = raw.clone();
        if matches!(
            param,
            "color" | "move_range" | "transparency" | "dimmer_time" | "length"
        ) {
            if let Value::Str(s) = &value {
                if let Some(list) = parse_string_list(s) {
                    value = list;
                }
            }
        }

        match param {
            "color" => match &value {
                Value::Dict(bundle) => {
                    if let Some(colors) = bundle.get("colors") {
                        segment.update_param("color", colors)?;
                    }
                    if let Some(speed) = bundle.get("speed") {
                        segment.update_param("move_speed", speed)?;
                    }
                    if let Some(gradient) = bundle.get("gradient") {
                        let on = gradient.as_i64() == Some(1);
                        segment.update_param("gradient", &Value::Bool(on))?;
                    }
                }
                Value::List(_) => segment.update_param("color", &value)?,
                scalar => {
                    let first = scalar
                        .as_i64()
                        .ok_or_else(|| AppError::validation("color expects a list or int"))?;
                    let mut colors = segment.color.map(i64::from);
                    if let Some(slot) = colors.first_mut() {
                        *slot = first;
                    }
                    value = Value::list_of_ints(colors);
                    segment.update_param("color", &value)?;
                }
            },
            "move_range" => match &value {
                Value::List(_) => segment.update_param("move_range", &value)?,
                scalar => {
                    // a lone number replaces the upper bound
                    let hi = scalar
                        .as_f64()
                        .ok_or_else(|| AppError::validation("move_range expects a list or number"))?;
                    value = Value::list_of_floats([segment.move_range[0], hi]);
                    segment.update_param("move_range", &value)?;
                }
            },
            "transparency" => match &value {
                Value::List(_) => segment.update_param("transparency", &value)?,
                scalar => {
                    let t = scalar
                        .as_f64()
                        .ok_or_else(|| {
                            AppError::validation("transparency expects a list or number")
                        })?
                        .clamp(0.0, 1.0);
                    value = Value::list_of_floats([t; 4]);
                    segment.update_param("transparency", &value)?;
                }
            },
            "dimmer_time" => match &value {
                Value::List(_) => segment.update_param("dimmer_time", &value)?,
                scalar => {
                    // a lone number replaces the cycle length
                    let cycle = scalar
                        .as_i64()
                        .ok_or_else(|| AppError::validation("dimmer_time expects a list or int"))?;
                    let mut times = segment.dimmer_time;
                    times[4] = cycle;
                    value = Value::list_of_ints(times);
                    segment.update_param("dimmer_time", &value)?;
                }
            },
            other => segment.update_param(other, &value)?,
        }

        info!(
            scene = scene_id,
            effect = effect_id,
            segment = segment_id,
            param,
            "updated segment parameter"
        );
        events.send(
            &format!("/scene/{scene_id}/effect/{effect_id}/segment/{segment_id}/{param}"),
            vec![value],
        );
        Ok(())
    }

    /// Create the scene/effect/segment a legacy address refers to, with
    /// defaults, when they do not exist yet.
    fn ensure_target(
        &self,
        manager: &mut SceneManager,
        scene_id: u32,
        effect_id: u32,
        segment_id: u32,
    ) {
        if manager.scene(scene_id).is_none() {
            manager.add_scene(Scene::new(scene_id));
            info!(scene = scene_id, "auto-created scene for legacy address");
        }
        let Some(scene) = manager.scene_mut(scene_id) else {
            return;
        };
        if scene.effect(effect_id).is_none() {
            scene.add_effect(Effect::new(effect_id, self.led_count, self.fps));
            info!(effect = effect_id, "auto-created effect for legacy address");
        }
        let Some(effect) = scene.effect_mut(effect_id) else {
            return;
        };
        if effect.segment_mut(segment_id).is_none() {
            effect.add_segment(Segment::with_defaults(segment_id, self.led_count));
            info!(segment = segment_id, "auto-created segment for legacy address");
        }
    }

    // ── Segment management ──────────────────────────────────────────

    fn add_segment(
        &self,
        manager: &mut SceneManager,
        events: &dyn EventSink,
        scene_id: u32,
        effect_id: u32,
        args: &[Value],
    ) -> Result<(), AppError> {
        let requested = args
            .first()
            .and_then(Value::as_i64)
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or(1);

        let effect = manager
            .scene_mut(scene_id)
            .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?
            .effect_mut(effect_id)
            .ok_or_else(|| AppError::not_found(format!("effect {effect_id}")))?;

        if effect.segments.len() >= config::MAX_SEGMENTS {
            return Err(AppError::validation(format!(
                "segment limit ({}) reached for effect {effect_id}",
                config::MAX_SEGMENTS
            )));
        }

        // Probe upward until a free id is found.
        let mut segment_id = requested;
        while effect.segments.contains_key(&segment_id) {
            segment_id += 1;
        }

        let mut segment = Segment::with_defaults(segment_id, self.led_count);
        segment.fade = true;
        effect.add_segment(segment);

        info!(scene = scene_id, effect = effect_id, segment = segment_id, "added segment");
        events.send(
            &format!("/scene/{scene_id}/effect/{effect_id}/segment_added"),
            vec![Value::Int(i64::from(segment_id))],
        );
        Ok(())
    }

    // ── Effect management ───────────────────────────────────────────

    fn add_effect(
        &self,
        manager: &mut SceneManager,
        events: &dyn EventSink,
        scene_id: u32,
        args: &[Value],
    ) -> Result<(), AppError> {
        let effect_id = required_id(args, "effect_ID")?;
        let scene = manager
            .scene_mut(scene_id)
            .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
        if scene.effect(effect_id).is_some() {
            return Err(AppError::validation(format!(
                "effect {effect_id} already exists in scene {scene_id}"
            )));
        }
        scene.add_effect(Effect::with_default_segment(
            effect_id,
            self.led_count,
            self.fps,
        ));

        info!(scene = scene_id, effect = effect_id, "added effect");
        events.send(
            &format!("/scene/{scene_id}/effect_added"),
            vec![Value::Int(i64::from(effect_id))],
        );
        Ok(())
    }

    // ── Scene management ────────────────────────────────────────────

    fn add_scene(
        &self,
        manager: &mut SceneManager,
        events: &dyn EventSink,
        args: &[Value],
    ) -> Result<(), AppError> {
        let scene_id = required_id(args, "scene_ID")?;
        if manager.scene(scene_id).is_some() {
            return Err(AppError::validation(format!(
                "scene {scene_id} already exists"
            )));
        }
        let mut scene = Scene::with_default_effect(scene_id, self.led_count, self.fps);
        if let Some(segment) = scene
            .effect_mut(1)
            .and_then(|effect| effect.segment_mut(1))
        {
            segment.fade = true;
        }
        manager.add_scene(scene);

        info!(scene = scene_id, "added scene");
        events.send(
            "/scene_manager/scene_added",
            vec![Value::Int(i64::from(scene_id))],
        );
        Ok(())
    }
}

// ── Free handlers (no dispatcher state needed) ──────────────────────

fn remove_segment(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    effect_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let segment_id = required_id(args, "segment_ID")?;
    manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?
        .effect_mut(effect_id)
        .ok_or_else(|| AppError::not_found(format!("effect {effect_id}")))?
        .remove_segment(segment_id)?;

    info!(scene = scene_id, effect = effect_id, segment = segment_id, "removed segment");
    events.send(
        &format!("/scene/{scene_id}/effect/{effect_id}/segment_removed"),
        vec![Value::Int(i64::from(segment_id))],
    );
    Ok(())
}

fn remove_effect(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let effect_id = required_id(args, "effect_ID")?;
    manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?
        .remove_effect(effect_id)?;

    info!(scene = scene_id, effect = effect_id, "removed effect");
    events.send(
        &format!("/scene/{scene_id}/effect_removed"),
        vec![Value::Int(i64::from(effect_id))],
    );
    Ok(())
}

fn change_effect(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let effect_id = required_id(args, "effect_ID")?;
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    if scene.effect(effect_id).is_none() {
        return Err(AppError::not_found(format!("effect {effect_id}")));
    }
    if scene.current_effect_id == Some(effect_id) {
        info!(scene = scene_id, effect = effect_id, "effect already active");
        return Ok(());
    }
    scene.begin_transition(Some(effect_id), None, CHANGE_FADE_SECS, CHANGE_FADE_SECS);

    info!(scene = scene_id, effect = effect_id, "started effect transition");
    events.send(
        &format!("/scene/{scene_id}/effect_changing"),
        vec![Value::Int(i64::from(effect_id))],
    );
    Ok(())
}

// ── Palette handlers ────────────────────────────────────────────────

/// Resolve a name-or-index palette selector against a scene's table.
/// `number_as_name` additionally tries the stringified number as a name
/// before falling back to the sorted-order index.
fn resolve_palette(scene: &Scene, value: &Value, number_as_name: bool) -> Option<String> {
    if let Some(name) = value.as_str() {
        return scene.palettes.contains(name).then(|| name.to_owned());
    }
    let index = value.as_i64()?;
    if number_as_name {
        let name = index.to_string();
        if scene.palettes.contains(&name) {
            return Some(name);
        }
    }
    scene.palettes.name_by_index(index).map(str::to_owned)
}

fn effect_set_palette(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    effect_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let selector = args
        .first()
        .ok_or_else(|| AppError::validation("missing palette_ID"))?;
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    let name = resolve_palette(scene, selector, true)
        .ok_or_else(|| AppError::validation(format!("invalid palette: {selector:?}")))?;
    scene
        .effect_mut(effect_id)
        .ok_or_else(|| AppError::not_found(format!("effect {effect_id}")))?
        .set_palette(&name);

    info!(scene = scene_id, effect = effect_id, palette = %name, "set effect palette");
    events.send(
        &format!("/scene/{scene_id}/effect/{effect_id}/set_palette"),
        vec![Value::Str(name)],
    );
    Ok(())
}

fn effect_direct_palette(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    effect_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let selector = args
        .first()
        .ok_or_else(|| AppError::validation("missing palette_ID"))?;
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    let name = resolve_palette(scene, selector, false)
        .ok_or_else(|| AppError::validation(format!("invalid palette: {selector:?}")))?;
    scene
        .effect_mut(effect_id)
        .ok_or_else(|| AppError::not_found(format!("effect {effect_id}")))?
        .set_palette(&name);

    info!(scene = scene_id, effect = effect_id, palette = %name, "set effect palette directly");
    events.send(
        &format!("/scene/{scene_id}/effect/{effect_id}/direct_palette"),
        vec![Value::Str(name)],
    );
    Ok(())
}

fn effect_change_palette(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    effect_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let selector = args
        .first()
        .ok_or_else(|| AppError::validation("missing palette_ID"))?;
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    if scene.effect(effect_id).is_none() {
        return Err(AppError::not_found(format!("effect {effect_id}")));
    }
    let name = resolve_palette(scene, selector, false)
        .ok_or_else(|| AppError::validation(format!("invalid palette: {selector:?}")))?;
    scene.begin_transition(None, Some(name.clone()), CHANGE_FADE_SECS, CHANGE_FADE_SECS);

    info!(scene = scene_id, effect = effect_id, palette = %name, "started palette transition");
    events.send(
        &format!("/scene/{scene_id}/effect/{effect_id}/change_palette"),
        vec![Value::Str(name)],
    );
    Ok(())
}

fn scene_set_palette(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let name = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("set_palette expects a palette name"))?
        .to_owned();
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    if !scene.palettes.contains(&name) {
        return Err(AppError::validation(format!("invalid palette: {name}")));
    }
    scene.set_palette(&name);

    info!(scene = scene_id, palette = %name, "set scene palette");
    events.send(
        &format!("/scene/{scene_id}/set_palette"),
        vec![Value::Str(name)],
    );
    Ok(())
}

fn scene_change_palette(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let selector = args
        .first()
        .ok_or_else(|| AppError::validation("missing palette_ID"))?;
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    let name = resolve_palette(scene, selector, false)
        .ok_or_else(|| AppError::validation(format!("invalid palette: {selector:?}")))?;
    scene.begin_transition(None, Some(name.clone()), CHANGE_FADE_SECS, CHANGE_FADE_SECS);

    info!(scene = scene_id, palette = %name, "started scene palette transition");
    events.send(
        &format!("/scene/{scene_id}/change_palette"),
        vec![Value::Str(name)],
    );
    Ok(())
}

fn update_palettes(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let table_arg = args
        .first()
        .and_then(Value::as_dict)
        .ok_or_else(|| AppError::validation("update_palettes expects a palette table"))?;

    let mut table = PaletteTable::empty();
    for (name, colors) in table_arg {
        let colors = parse_color_rows(colors)
            .ok_or_else(|| AppError::validation(format!("palette {name}: bad color rows")))?;
        table.insert(name.clone(), colors);
    }

    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    scene.update_all_palettes(table);

    info!(scene = scene_id, "replaced palette table");
    events.send(&format!("/scene/{scene_id}/update_palettes"), Vec::new());
    Ok(())
}

fn legacy_palette(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    palette: &str,
    args: &[Value],
) -> Result<(), AppError> {
    let flat = args
        .first()
        .and_then(Value::int_list)
        .ok_or_else(|| AppError::validation("palette update expects a flat int list"))?;
    if flat.is_empty() || flat.len() % 3 != 0 {
        return Err(AppError::validation(format!(
            "palette {palette}: flat color list length {} is not a multiple of 3",
            flat.len()
        )));
    }
    let colors: Vec<Rgb> = flat
        .chunks_exact(3)
        .map(|chunk| match chunk {
            [r, g, b] => Rgb::new(clamp_u8(*r), clamp_u8(*g), clamp_u8(*b)),
            _ => Rgb::BLACK,
        })
        .collect();

    for scene in manager.scenes.values_mut() {
        scene.update_palette(palette, colors.clone());
    }

    info!(palette, colors = colors.len(), "updated palette in all scenes");
    events.send(
        &format!("/palette/{palette}"),
        vec![Value::list_of_ints(flat)],
    );
    Ok(())
}

// ── Persistence handlers ────────────────────────────────────────────

fn required_path(args: &[Value]) -> Result<&str, AppError> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("missing file path"))
}

fn save_effects(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let path = required_path(args)?.to_owned();
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    match persist::save_scene(scene, Path::new(&path)) {
        Ok(()) => {
            events.send(
                &format!("/scene/{scene_id}/effects_saved"),
                vec![Value::Str(path)],
            );
        }
        Err(e) => {
            warn!(scene = scene_id, error = %e, "failed to save effects");
            events.send(
                &format!("/scene/{scene_id}/save_error"),
                vec![Value::Str(e.to_string())],
            );
        }
    }
    Ok(())
}

fn load_effects(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let path = required_path(args)?.to_owned();
    match persist::load_scene(Path::new(&path)) {
        Ok(mut scene) => {
            scene.id = scene_id;
            manager.add_scene(scene);
            events.send(
                &format!("/scene/{scene_id}/effects_loaded"),
                vec![Value::Str(path)],
            );
        }
        Err(e) => {
            warn!(scene = scene_id, error = %e, "failed to load effects");
            events.send(
                &format!("/scene/{scene_id}/load_error"),
                vec![Value::Str(e.to_string())],
            );
        }
    }
    Ok(())
}

fn save_palettes(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let path = required_path(args)?.to_owned();
    let scene = manager
        .scene(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    match persist::save_palettes(scene, Path::new(&path)) {
        Ok(()) => {
            events.send(
                &format!("/scene/{scene_id}/palettes_saved"),
                vec![Value::Str(path)],
            );
        }
        Err(e) => {
            warn!(scene = scene_id, error = %e, "failed to save palettes");
            events.send(
                &format!("/scene/{scene_id}/save_error"),
                vec![Value::Str(e.to_string())],
            );
        }
    }
    Ok(())
}

fn load_palettes(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    scene_id: u32,
    args: &[Value],
) -> Result<(), AppError> {
    let path = required_path(args)?.to_owned();
    let scene = manager
        .scene_mut(scene_id)
        .ok_or_else(|| AppError::not_found(format!("scene {scene_id}")))?;
    match persist::load_palettes_into(scene, Path::new(&path)) {
        Ok(()) => {
            events.send(
                &format!("/scene/{scene_id}/palettes_loaded"),
                vec![Value::Str(path)],
            );
        }
        Err(e) => {
            warn!(scene = scene_id, error = %e, "failed to load palettes");
            events.send(
                &format!("/scene/{scene_id}/load_error"),
                vec![Value::Str(e.to_string())],
            );
        }
    }
    Ok(())
}

// ── Scene-manager handlers ──────────────────────────────────────────

fn remove_scene(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    args: &[Value],
) -> Result<(), AppError> {
    let scene_id = required_id(args, "scene_ID")?;
    manager.remove_scene(scene_id)?;

    info!(scene = scene_id, "removed scene");
    events.send(
        "/scene_manager/scene_removed",
        vec![Value::Int(i64::from(scene_id))],
    );
    Ok(())
}

fn switch_scene(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    args: &[Value],
) -> Result<(), AppError> {
    let scene_id = required_id(args, "scene_ID")?;
    manager.switch_scene(scene_id)?;
    events.send(
        "/scene_manager/scene_switched",
        vec![Value::Int(i64::from(scene_id))],
    );
    Ok(())
}

fn list_scenes(manager: &SceneManager, events: &dyn EventSink) -> Result<(), AppError> {
    let ids = Value::list_of_ints(manager.scenes.keys().map(|id| i64::from(*id)));
    events.send("/scene_manager/scenes", vec![ids]);
    Ok(())
}

fn load_scene(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    args: &[Value],
) -> Result<(), AppError> {
    let path = required_path(args)?.to_owned();
    let target = args.get(1).and_then(Value::as_i64);
    match persist::load_scene(Path::new(&path)) {
        Ok(mut scene) => {
            if let Some(id) = target.and_then(|id| u32::try_from(id).ok()) {
                scene.id = id;
            }
            let id = scene.id;
            manager.add_scene(scene);
            let _ = manager.switch_scene(id);
            events.send(
                "/scene_manager/scene_loaded",
                vec![Value::Int(i64::from(id))],
            );
        }
        Err(e) => {
            warn!(path = %path, error = %e, "failed to load scene");
            events.send(
                "/scene_manager/load_error",
                vec![Value::Str(e.to_string())],
            );
        }
    }
    Ok(())
}

fn load_scene_data(
    manager: &mut SceneManager,
    events: &dyn EventSink,
    args: &[Value],
) -> Result<(), AppError> {
    let data = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("missing scene JSON"))?;
    let target = args.get(1).and_then(Value::as_i64);
    match persist::scene_from_json(data) {
        Ok(mut scene) => {
            // The embedded id is ignored, matching the file-less loader's
            // contract: target id wins, otherwise scene 1 is replaced.
            scene.id = target
                .and_then(|id| u32::try_from(id).ok())
                .unwrap_or(1);
            let id = scene.id;
            manager.add_scene(scene);
            let _ = manager.switch_scene(id);
            events.send(
                "/scene_manager/scene_loaded",
                vec![Value::Int(i64::from(id))],
            );
        }
        Err(e) => {
            warn!(error = %e, "scene JSON payload is not valid");
            events.send(
                "/scene_manager/load_error",
                vec![Value::Str(e.to_string())],
            );
        }
    }
    Ok(())
}

// ── Emitter control ─────────────────────────────────────────────────

fn update_serial_output(
    emitter: &BinaryEmitter,
    events: &dyn EventSink,
    args: &[Value],
) -> Result<(), AppError> {
    if let Some(enabled) = args.first().and_then(Value::as_bool_flexible) {
        emitter.set_enabled(enabled);
        info!(enabled, "binary output toggled");
    }
    if let Some(ip) = args.get(1).and_then(Value::as_str) {
        let port = args
            .get(2)
            .and_then(Value::as_i64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(config::LED_BINARY_OUT_PORT);
        emitter.set_destination(ip, port);
        info!(ip, port, "binary output retargeted");
    }
    if let Some(fps) = args.get(3).and_then(Value::as_f64) {
        emitter.set_rate(fps);
    }
    events.send(
        "/serial_output_updated",
        vec![Value::Bool(emitter.config().enabled)],
    );
    Ok(())
}

// ── Init snapshot ───────────────────────────────────────────────────

/// Emit the full self-describing snapshot: every palette and every
/// segment's canonical descriptors, plus the legacy mirrors old clients
/// still listen on. A client that sends `/request/init 1` can rebuild its
/// entire view from these replies alone.
fn request_init(
    manager: &SceneManager,
    events: &dyn EventSink,
    args: &[Value],
) -> Result<(), AppError> {
    if args.first().and_then(Value::as_i64) != Some(1) {
        return Err(AppError::validation("init request expects argument 1"));
    }
    info!("received initialization request");

    for (scene_id, scene) in &manager.scenes {
        for (name, colors) in scene.palettes.iter() {
            let flat = colors
                .iter()
                .flat_map(|c| [i64::from(c.r), i64::from(c.g), i64::from(c.b)]);
            events.send(&format!("/palette/{name}"), vec![Value::list_of_ints(flat)]);
        }

        for (effect_id, effect) in &scene.effects {
            for (segment_id, segment) in &effect.segments {
                let prefix = format!("/scene/{scene_id}/effect/{effect_id}/segment/{segment_id}");
                let color_bundle = Value::dict([
                    ("colors", Value::list_of_ints(segment.color.map(i64::from))),
                    ("speed", Value::Float(segment.move_speed)),
                    ("gradient", Value::Int(i64::from(segment.gradient))),
                ]);
                let position_bundle = Value::dict([
                    ("initial_position", Value::Float(segment.initial_position)),
                    ("speed", Value::Float(segment.move_speed)),
                    ("range", Value::list_of_floats(segment.move_range)),
                    ("interval", Value::Int(10)),
                ]);
                let span_bundle = Value::dict([
                    ("span", Value::Int(i64::from(segment.total_length()))),
                    ("range", Value::list_of_floats(segment.move_range)),
                    ("speed", Value::Float(segment.move_speed)),
                    ("interval", Value::Int(10)),
                    (
                        "gradient_colors",
                        Value::list_of_ints(segment.gradient_colors.map(i64::from)),
                    ),
                    ("fade", Value::Int(i64::from(segment.fade))),
                ]);

                events.send(&format!("{prefix}/color"), vec![color_bundle.clone()]);
                events.send(&format!("{prefix}/position"), vec![position_bundle]);
                events.send(&format!("{prefix}/span"), vec![span_bundle]);
                events.send(
                    &format!("{prefix}/transparency"),
                    vec![Value::list_of_floats(segment.transparency)],
                );
                events.send(
                    &format!("{prefix}/is_edge_reflect"),
                    vec![Value::Int(i64::from(segment.is_edge_reflect))],
                );
                events.send(
                    &format!("{prefix}/dimmer_time"),
                    vec![Value::list_of_ints(segment.dimmer_time)],
                );
                events.send(
                    &format!("{prefix}/dimmer_time_ratio"),
                    vec![Value::Float(segment.dimmer_time_ratio)],
                );

                // Legacy mirrors for clients predating scene addressing.
                events.send(
                    &format!("/effect/{effect_id}/segment/{segment_id}/color"),
                    vec![color_bundle.clone()],
                );
                events.send(
                    &format!("/effect/{effect_id}/object/{segment_id}/color"),
                    vec![color_bundle],
                );
                events.send(
                    &format!("/effect/{effect_id}/object/{segment_id}/position/initial_position"),
                    vec![Value::Float(segment.initial_position)],
                );
                events.send(
                    &format!("/effect/{effect_id}/object/{segment_id}/position/speed"),
                    vec![Value::Float(segment.move_speed)],
                );
                events.send(
                    &format!("/effect/{effect_id}/object/{segment_id}/position/range"),
                    vec![Value::list_of_floats(segment.move_range)],
                );
            }
        }
    }
    Ok(())
}

// ── Shared helpers ──────────────────────────────────────────────────

fn required_id(args: &[Value], what: &str) -> Result<u32, AppError> {
    args.first()
        .and_then(Value::as_i64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| AppError::validation(format!("missing {what}")))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_u8(v: i64) -> u8 {
    v.clamp(0, 255) as u8
}

fn parse_color_rows(value: &Value) -> Option<Vec<Rgb>> {
    value
        .as_list()?
        .iter()
        .map(|row| {
            let ints = row.int_list()?;
            match ints.as_slice() {
                [r, g, b] => Some(Rgb::new(clamp_u8(*r), clamp_u8(*g), clamp_u8(*b))),
                _ => None,
            }
        })
        .collect()
}
