use axum::{
    Json,
    extract::{Multipart, Request, State},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use super::form::{SourceForm, drain, multipart_error};
use crate::AppState;
use crate::api::error::AppError;
use crate::services::preview::PreviewResult;
use crate::services::source::StoredSource;

const FILE_FIELDS: [&str; 2] = ["file", "files"];
const URL_FIELDS: [&str; 2] = ["url", "urls"];

#[utoipa::path(
    post,
    path = "/preview",
    request_body(
        content = Vec<u8>,
        content_type = "multipart/form-data",
        description = "A `file` part or a `url` field"
    ),
    responses(
        (status = 200, description = "Schema and leading rows", body = PreviewResult),
        (status = 400, description = "Missing input, unsupported type or unreadable file"),
        (status = 413, description = "The file exceeds the size limit"),
        (status = 502, description = "The remote source could not be downloaded")
    ),
    tag = "preview"
)]
pub async fn preview(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<PreviewResult>, AppError> {
    let form = SourceForm::from_request(request, &state).await?;
    let source = collect_source(&state, form).await?;

    tracing::info!(file = %source.declared_name(), bytes = source.byte_size(), "Previewing source");
    let result = state.preview.preview(source).await?;
    Ok(Json(result))
}

/// An uploaded file wins over a URL; only the first of each is considered.
async fn collect_source(state: &AppState, form: SourceForm) -> Result<StoredSource, AppError> {
    let (upload, url) = match form {
        SourceForm::Multipart(mut multipart) => match read_multipart(state, &mut multipart).await {
            Ok(found) => found,
            Err(e) => {
                drain(&mut multipart).await;
                return Err(e);
            }
        },
        SourceForm::UrlEncoded(pairs) => {
            let url = pairs
                .into_iter()
                .filter(|(name, _)| URL_FIELDS.contains(&name.as_str()))
                .map(|(_, value)| value.trim().to_string())
                .find(|value| !value.is_empty());
            (None, url)
        }
    };

    if let Some(source) = upload {
        return Ok(source);
    }
    match url {
        Some(url) => Ok(state.acquirer.acquire_remote(&url).await?),
        None => Err(AppError::MissingPreviewInput),
    }
}

async fn read_multipart(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<(Option<StoredSource>, Option<String>), AppError> {
    let mut upload = None;
    let mut url = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if FILE_FIELDS.contains(&name.as_str()) && upload.is_none() {
            let file_name = field.file_name().map(|s| s.to_string());
            let reader = StreamReader::new(field.map_err(std::io::Error::other));
            upload = Some(
                state
                    .acquirer
                    .acquire_upload(file_name.as_deref(), reader)
                    .await?,
            );
        } else if URL_FIELDS.contains(&name.as_str()) && url.is_none() {
            let text = field.text().await.map_err(multipart_error)?;
            let text = text.trim();
            if !text.is_empty() {
                url = Some(text.to_string());
            }
        }
    }
    Ok((upload, url))
}
