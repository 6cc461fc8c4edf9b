// ABOUTME: Location translation engine
// ABOUTME: Warehouse resolution, location map building, translation and distcp planning

pub mod builder;
pub mod distcp;
pub mod glm;
pub mod paths;
pub mod translator;
pub mod warehouse;

pub use builder::{GlmBuilder, SourceLocationMap};
pub use distcp::{plan_map, DistcpEntry, DistcpPlan, DistcpPlanBuilder};
pub use glm::{GlobalLocationMap, GlmMatch, TranslationEntry};
pub use translator::{
    Translation, TranslationLevel, TranslationRecorder, TranslationRequest, Translator,
};
pub use warehouse::{Warehouse, WarehousePlans, WarehouseResolver, WarehouseSource};
