//! Compiled-in defaults for the signal engine.
//!
//! Everything here can be overridden at runtime (CLI flags, control
//! messages, loaded JSON); these are the values a bare `tape_lights`
//! starts from.

use crate::model::color::Rgb;
use crate::model::palette::PaletteTable;

pub const DEFAULT_FPS: f64 = 60.0;
pub const DEFAULT_LED_COUNT: usize = 225;

/// UDP port the control server listens on.
pub const IN_PORT: u16 = 9090;
/// UDP port confirmation/event messages are sent back to.
pub const OUT_PORT: u16 = 5005;
pub const DEFAULT_OSC_IP: &str = "0.0.0.0";

/// Destination for the packed pixel frames.
pub const LED_BINARY_OUT_IP: &str = "127.0.0.1";
pub const LED_BINARY_OUT_PORT: u16 = 7000;
/// Address string tagging each binary frame datagram.
pub const LED_BINARY_ADDRESS: &str = "/light/serial";

/// Hard cap on segments per effect; `add_segment` past this is refused.
pub const MAX_SEGMENTS: usize = 10;

pub const DEFAULT_TRANSPARENCY: [f64; 4] = [1.0, 1.0, 1.0, 1.0];
pub const DEFAULT_LENGTH: [u32; 3] = [10, 10, 10];
pub const DEFAULT_MOVE_SPEED: f64 = 10.0;
pub const DEFAULT_INITIAL_POSITION: f64 = 0.0;
pub const DEFAULT_IS_EDGE_REFLECT: bool = true;
pub const DEFAULT_DIMMER_TIME: [i64; 5] = [0, 100, 200, 100, 0];
pub const DEFAULT_DIMMER_TIME_RATIO: f64 = 1.0;

pub fn default_move_range(led_count: usize) -> [f64; 2] {
    [0.0, led_count.saturating_sub(1) as f64]
}

/// The five factory palettes, six colors each.
pub fn default_palettes() -> PaletteTable {
    let mut table = PaletteTable::empty();
    table.insert(
        "A",
        vec![
            Rgb::new(255, 0, 0),     // Red
            Rgb::new(0, 255, 0),     // Green
            Rgb::new(0, 0, 255),     // Blue
            Rgb::new(255, 255, 0),   // Yellow
            Rgb::new(0, 255, 255),   // Cyan
            Rgb::new(255, 0, 255),   // Magenta
        ],
    );
    table.insert(
        "B",
        vec![
            Rgb::new(255, 128, 0),   // Orange
            Rgb::new(128, 0, 255),   // Purple
            Rgb::new(0, 128, 255),   // Sky Blue
            Rgb::new(255, 0, 128),   // Pink
            Rgb::new(128, 255, 0),   // Lime
            Rgb::new(255, 255, 255), // White
        ],
    );
    table.insert(
        "C",
        vec![
            Rgb::new(128, 0, 0),     // Dark Red
            Rgb::new(0, 128, 0),     // Dark Green
            Rgb::new(0, 0, 128),     // Dark Blue
            Rgb::new(128, 128, 0),   // Olive
            Rgb::new(0, 128, 128),   // Teal
            Rgb::new(128, 0, 128),   // Purple
        ],
    );
    table.insert(
        "D",
        vec![
            Rgb::new(255, 200, 200), // Light Pink
            Rgb::new(200, 255, 200), // Light Green
            Rgb::new(200, 200, 255), // Light Blue
            Rgb::new(255, 255, 200), // Light Yellow
            Rgb::new(200, 255, 255), // Light Cyan
            Rgb::new(255, 200, 255), // Light Magenta
        ],
    );
    table.insert(
        "E",
        vec![
            Rgb::new(100, 100, 100), // Dark Gray
            Rgb::new(150, 150, 150), // Medium Gray
            Rgb::new(200, 200, 200), // Light Gray
            Rgb::new(255, 100, 50),  // Coral
            Rgb::new(50, 100, 255),  // Royal Blue
            Rgb::new(150, 255, 150), // Light Green
        ],
    );
    table
}
