mod bundle;
mod registry;
mod render;

pub use bundle::render_bundle;
pub use registry::{
    BoxError, ImageRegistry, LABEL_CONFIGS, LABEL_DB_LOCATION, LABEL_PACKAGE,
};
pub use render::{RefKind, RefMask, Render, RenderError};
