use utoipa::OpenApi;

use crate::routes::{analytics, chat, health};

#[derive(OpenApi)]
#[openapi(info(
    title = "parley-server",
    description = "Streaming chat relay and analytics collector for the parley widget",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root.merge(analytics::AnalyticsApi::openapi());
    root
}
