pub mod decodo;
pub mod fetcher;
pub mod render;
pub mod xhr;

pub use decodo::DecodoClient;
pub use fetcher::StaticClient;
pub use render::RenderClient;
pub use xhr::{XhrClient, api_candidates};
