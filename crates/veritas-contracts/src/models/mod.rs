mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, STRUCTURED_OUTPUT, VISION};
pub use selectors::{ModelSelection, ModelSelector};
