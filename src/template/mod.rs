//! The template language and its renderer.

pub mod error;
pub mod output;
pub mod render;
pub mod slots;
pub mod syntax;
pub mod value;

pub use error::TemplateError;
pub use render::{RenderEnv, RenderState, Renderer};
pub use value::Val;
