use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "moji",
        version = "0.1.0",
        description = "GPU-backed transcription service: native job API plus an OpenAI-compatible audio surface"
    ),
    paths(
        crate::routes::jobs::submit,
        crate::routes::jobs::status,
        crate::routes::jobs::list,
        crate::routes::jobs::download,
        crate::routes::jobs::remove,
        crate::routes::health::health,
        crate::routes::admin::stats,
        crate::routes::admin::model_load,
        crate::routes::admin::model_unload,
        crate::routes::admin::cleanup,
        crate::routes::openai::transcriptions,
        crate::routes::openai::translations,
        crate::routes::openai::models,
    ),
    components(schemas(
        crate::routes::jobs::JobView,
        crate::routes::jobs::SubmitResponse,
        crate::routes::jobs::ListResponse,
        crate::ErrorResponse,
        crate::ErrorDetails,
    )),
    tags(
        (name = "jobs", description = "Native asynchronous job surface"),
        (name = "health", description = "Liveness and resource state"),
        (name = "admin", description = "Shared-secret operational endpoints"),
        (name = "openai-compat", description = "OpenAI-compatible audio endpoints"),
    )
)]
struct ApiDoc;

pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    #[test]
    fn document_builds_and_covers_both_surfaces() {
        let doc = super::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/jobs"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/audio/transcriptions"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/admin/stats"));
    }
}
