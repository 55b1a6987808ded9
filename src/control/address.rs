//! Address grammar for the control plane.
//!
//! Canonical addresses are rooted at `/scene/{id}` or `/scene_manager`;
//! the legacy flat forms (`/effect/...`, `/palette/{A..E}`) are rewritten
//! onto scene 1 before dispatch, with missing targets auto-created.

/// A parsed control address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    SegmentParam {
        scene: u32,
        effect: u32,
        segment: u32,
        param: String,
        /// Set on legacy addresses: the target effect/segment are created
        /// with defaults if absent.
        auto_create: bool,
    },
    EffectSetPalette { scene: u32, effect: u32 },
    EffectDirectPalette { scene: u32, effect: u32 },
    EffectChangePalette { scene: u32, effect: u32 },
    AddSegment { scene: u32, effect: u32 },
    RemoveSegment { scene: u32, effect: u32 },
    SceneSetPalette { scene: u32 },
    SceneChangePalette { scene: u32 },
    ChangeEffect { scene: u32 },
    AddEffect { scene: u32 },
    RemoveEffect { scene: u32 },
    UpdatePalettes { scene: u32 },
    SaveEffects { scene: u32 },
    LoadEffects { scene: u32 },
    SavePalettes { scene: u32 },
    LoadPalettes { scene: u32 },
    AddScene,
    RemoveScene,
    SwitchScene,
    ListScenes,
    LoadScene,
    LoadSceneData,
    /// Legacy `/palette/{name}` flat color update, applied to every scene.
    LegacyPalette { palette: String },
    UpdateSerialOutput,
    RequestInit,
}

/// Parse an address, applying the legacy rewrites. Returns None for
/// anything that matches no pattern.
#[must_use]
pub fn parse(addr: &str) -> Option<Route> {
    let parts: Vec<&str> = addr.strip_prefix('/')?.split('/').collect();

    match parts.as_slice() {
        ["scene", s, rest @ ..] => {
            let scene = s.parse().ok()?;
            parse_scene_route(scene, rest)
        }
        ["scene_manager", "add_scene"] => Some(Route::AddScene),
        ["scene_manager", "remove_scene"] => Some(Route::RemoveScene),
        ["scene_manager", "switch_scene"] => Some(Route::SwitchScene),
        ["scene_manager", "list_scenes"] => Some(Route::ListScenes),
        ["scene_manager", "load_scene"] => Some(Route::LoadScene),
        ["scene_manager", "load_scene_data"] => Some(Route::LoadSceneData),
        ["update_serial_output"] => Some(Route::UpdateSerialOutput),
        ["request", "init"] => Some(Route::RequestInit),

        // Legacy flat addresses, rewritten against scene 1. "object" is the
        // oldest client's word for segment.
        ["effect", e, "segment" | "object", g, param @ ..] => {
            if param.is_empty() {
                return None;
            }
            Some(Route::SegmentParam {
                scene: 1,
                effect: e.parse().ok()?,
                segment: g.parse().ok()?,
                param: param.join("/"),
                auto_create: true,
            })
        }
        ["palette", name] if is_legacy_palette_name(name) => Some(Route::LegacyPalette {
            palette: (*name).to_owned(),
        }),

        _ => None,
    }
}

fn parse_scene_route(scene: u32, rest: &[&str]) -> Option<Route> {
    match rest {
        ["effect", e, tail @ ..] => {
            let effect = e.parse().ok()?;
            match tail {
                ["set_palette"] => Some(Route::EffectSetPalette { scene, effect }),
                ["direct_palette"] => Some(Route::EffectDirectPalette { scene, effect }),
                ["change_palette"] => Some(Route::EffectChangePalette { scene, effect }),
                ["add_segment"] => Some(Route::AddSegment { scene, effect }),
                ["remove_segment"] => Some(Route::RemoveSegment { scene, effect }),
                ["segment", g, param @ ..] if !param.is_empty() => Some(Route::SegmentParam {
                    scene,
                    effect,
                    segment: g.parse().ok()?,
                    param: param.join("/"),
                    auto_create: false,
                }),
                _ => None,
            }
        }
        ["set_palette"] => Some(Route::SceneSetPalette { scene }),
        ["change_palette"] => Some(Route::SceneChangePalette { scene }),
        ["change_effect"] => Some(Route::ChangeEffect { scene }),
        ["add_effect"] => Some(Route::AddEffect { scene }),
        ["remove_effect"] => Some(Route::RemoveEffect { scene }),
        ["update_palettes"] => Some(Route::UpdatePalettes { scene }),
        ["save_effects"] => Some(Route::SaveEffects { scene }),
        ["load_effects"] => Some(Route::LoadEffects { scene }),
        ["save_palettes"] => Some(Route::SavePalettes { scene }),
        ["load_palettes"] => Some(Route::LoadPalettes { scene }),
        _ => None,
    }
}

fn is_legacy_palette_name(name: &str) -> bool {
    matches!(name, "A" | "B" | "C" | "D" | "E")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn canonical_segment_param() {
        assert_eq!(
            parse("/scene/2/effect/3/segment/4/move_speed"),
            Some(Route::SegmentParam {
                scene: 2,
                effect: 3,
                segment: 4,
                param: "move_speed".to_owned(),
                auto_create: false,
            })
        );
    }

    #[test]
    fn segment_param_may_contain_slashes() {
        let route = parse("/scene/1/effect/1/segment/2/position/initial_position").unwrap();
        assert_eq!(
            route,
            Route::SegmentParam {
                scene: 1,
                effect: 1,
                segment: 2,
                param: "position/initial_position".to_owned(),
                auto_create: false,
            }
        );
    }

    #[test]
    fn scene_and_manager_routes() {
        assert_eq!(parse("/scene/1/set_palette"), Some(Route::SceneSetPalette { scene: 1 }));
        assert_eq!(
            parse("/scene/7/change_effect"),
            Some(Route::ChangeEffect { scene: 7 })
        );
        assert_eq!(
            parse("/scene/1/effect/2/direct_palette"),
            Some(Route::EffectDirectPalette { scene: 1, effect: 2 })
        );
        assert_eq!(parse("/scene_manager/switch_scene"), Some(Route::SwitchScene));
        assert_eq!(parse("/scene_manager/list_scenes"), Some(Route::ListScenes));
        assert_eq!(parse("/request/init"), Some(Route::RequestInit));
        assert_eq!(parse("/update_serial_output"), Some(Route::UpdateSerialOutput));
    }

    #[test]
    fn legacy_segment_and_object_rewrite_to_scene_one() {
        for addr in ["/effect/5/segment/2/color", "/effect/5/object/2/color"] {
            let route = parse(addr).unwrap();
            assert_eq!(
                route,
                Route::SegmentParam {
                    scene: 1,
                    effect: 5,
                    segment: 2,
                    param: "color".to_owned(),
                    auto_create: true,
                },
                "{addr}"
            );
        }
    }

    #[test]
    fn legacy_palette_names_are_restricted() {
        assert_eq!(
            parse("/palette/C"),
            Some(Route::LegacyPalette {
                palette: "C".to_owned()
            })
        );
        assert_eq!(parse("/palette/F"), None);
        assert_eq!(parse("/palette/AB"), None);
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert_eq!(parse("no-slash"), None);
        assert_eq!(parse("/scene/x/set_palette"), None);
        assert_eq!(parse("/scene/1/effect/2"), None);
        assert_eq!(parse("/scene/1/effect/2/segment/3"), None);
        assert_eq!(parse("/scene_manager/unknown"), None);
        assert_eq!(parse("/"), None);
    }
}
