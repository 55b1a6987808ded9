pub mod address;
pub mod dispatcher;
pub mod value;

pub use dispatcher::{ControlMessage, Dispatcher, EventSink};
pub use value::Value;
