use crate::routes::{cleanup, convert, health};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "xnconvert-server",
    description = "Upload an image, get it back converted by XnConvert"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(convert::ConvertApi::openapi());
    root.merge(cleanup::CleanupApi::openapi());
    root
}
