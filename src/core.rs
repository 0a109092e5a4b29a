//! Provides types that represent the user's declarations, e.g. artifacts and manifest files.

pub mod artifact;
pub mod import;
pub mod manifest;
pub mod render;
pub mod schema;

#[doc(inline)]
pub use artifact::{DesiredArtifact, Kind, ObservedArtifact, Presence, RenderParams};

#[doc(inline)]
pub use import::ImportId;

#[doc(inline)]
pub use manifest::Manifest;

#[doc(inline)]
pub use render::render;
