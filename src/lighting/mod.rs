//! Shading math shared by every lighting pass
//!
//! - [`sampling`]: Hammersley points and lobe importance sampling
//! - [`brdf`]: GGX, Smith visibility, Schlick Fresnel and direct light
//! - [`material`]: user parameters mapped to per-point BRDF terms

pub mod brdf;
pub mod material;
pub mod sampling;

pub use brdf::{direct_light, LobeToggles};
pub use material::{BrdfType, MaterialParams, MaterialSample};
