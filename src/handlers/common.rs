use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Common pagination query parameters.
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl PaginationParams {
    /// Clamps the requested page size to a sane window.
    pub fn clamped_per_page(&self) -> u64 {
        self.per_page.clamp(1, 100)
    }
}
