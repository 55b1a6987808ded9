pub mod color;
pub mod effect;
pub mod manager;
pub mod palette;
pub mod scene;
pub mod segment;

// Re-export commonly used types at the model level.
pub use color::{alpha_over, Rgb};
pub use effect::Effect;
pub use manager::{FrameSink, PaletteSelector, SceneManager};
pub use palette::PaletteTable;
pub use scene::{Scene, SceneTransitionState};
pub use segment::{LedSample, Segment};
