//! GPU Object Cache Library
//!
//! Capacity-bounded cache of GPU resources (textures, shader programs,
//! vertex buffers) whose native handles are released at a safe point at the
//! end of each frame rather than at the moment of eviction.

pub mod config;
pub mod gpu;
pub mod lru;
pub mod resource;

pub use config::{ConfigError, GpuCacheConfig};
pub use gpu::{DisposalQueue, DisposalReport, GpuCacheStats, GpuResourceCache, MemoryPressure};
pub use lru::{CapacityError, LruMemoryCache, RemovalCause, RemovalListener};
pub use resource::{DisposalError, GpuResource};
