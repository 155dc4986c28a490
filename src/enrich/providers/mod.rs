//! Shipped enricher providers.

pub mod branding;
pub mod calories;
pub mod custom_title;
pub mod logic_gate;

pub use branding::BrandingProvider;
pub use calories::CaloriesProvider;
pub use custom_title::CustomTitleProvider;
pub use logic_gate::LogicGateProvider;
