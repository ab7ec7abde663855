use axum::{
    body::Body,
    extract::{Multipart, Path, Request, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use super::form::{SourceForm, drain, multipart_error};
use crate::AppState;
use crate::api::error::AppError;
use crate::services::acquirer::BatchIntake;
use crate::services::conversion::ConversionPair;
use crate::services::source::SourceBatch;
use crate::utils::filename::attachment_disposition;

pub const FILES_FIELD: &str = "files";
pub const URLS_FIELD: &str = "urls";

#[utoipa::path(
    post,
    path = "/convert/{pair}",
    params(
        ("pair" = ConversionPair, Path, description = "Conversion to apply")
    ),
    request_body(
        content = Vec<u8>,
        content_type = "multipart/form-data",
        description = "One or more `files` parts and/or `urls` fields"
    ),
    responses(
        (status = 200, description = "Converted file, or converted_files.zip for several sources"),
        (status = 400, description = "Missing, invalid or unconvertible sources"),
        (status = 404, description = "Unknown conversion"),
        (status = 413, description = "A source exceeds the size limit"),
        (status = 502, description = "A remote source could not be downloaded")
    ),
    tag = "convert"
)]
pub async fn convert(
    State(state): State<AppState>,
    Path(raw_pair): Path<String>,
    request: Request,
) -> Result<Response, AppError> {
    let pair: ConversionPair = raw_pair
        .parse()
        .map_err(|_| AppError::UnknownConversion(raw_pair.clone()))?;
    let spec = state
        .registry
        .get(pair)
        .ok_or_else(|| AppError::UnknownConversion(pair.to_string()))?;

    let form = SourceForm::from_request(request, &state).await?;
    let batch = collect_batch(&state, form).await?;
    tracing::info!(pair = %pair, sources = batch.len(), "Converting batch");

    let output = state.assembler.assemble(batch, spec).await?;

    Ok((
        [
            (header::CONTENT_TYPE, output.media_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment_disposition(&output.file_name),
            ),
        ],
        Body::from_stream(output.body),
    )
        .into_response())
}

/// Store every source named by the form. On failure the sources stored so
/// far are released and the rest of the body is discarded.
async fn collect_batch(state: &AppState, form: SourceForm) -> Result<SourceBatch, AppError> {
    let mut intake = state.acquirer.intake();

    match form {
        SourceForm::Multipart(mut multipart) => {
            if let Err(e) = read_multipart(&mut multipart, &mut intake).await {
                drop(intake);
                drain(&mut multipart).await;
                return Err(e);
            }
        }
        SourceForm::UrlEncoded(pairs) => {
            for (name, value) in pairs {
                if name == URLS_FIELD {
                    intake.push_url(&value)?;
                }
            }
        }
    }

    Ok(intake.finish().await?)
}

async fn read_multipart(
    multipart: &mut Multipart,
    intake: &mut BatchIntake<'_>,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == FILES_FIELD {
            let file_name = field.file_name().map(|s| s.to_string());
            let body_with_io_error = field.map_err(std::io::Error::other);
            let reader = StreamReader::new(body_with_io_error);
            intake.push_upload(file_name.as_deref(), reader).await?;
        } else if name == URLS_FIELD {
            let text = field.text().await.map_err(multipart_error)?;
            intake.push_url(&text)?;
        }
    }
    Ok(())
}
