pub mod gemini;
pub(crate) mod gemini_util;
pub mod settings;

pub use gemini::*;
pub use settings::*;
