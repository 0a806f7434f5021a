pub mod assets;
pub mod atlas;
pub mod config;
pub mod engine;
pub mod error;
pub mod instances;
pub mod mesh;
pub mod renderer;
pub mod stages;

pub use assets::{load_manifest, AnimationAsset, VatImage};
pub use atlas::AnimationAtlas;
pub use config::{CrowdConfig, CullConfig};
pub use engine::{Crowd, FrameStats};
pub use error::{CrowdError, Result};
pub use instances::{InstanceRecord, InstanceStore, InstanceTransform};
pub use mesh::CrowdMesh;
pub use renderer::{CrowdRenderer, GpuContext, IndirectArgs};
