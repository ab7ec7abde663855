use axum::{
    Form,
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{StatusCode, header},
};

use crate::AppState;
use crate::api::error::AppError;

/// Request body of the source-carrying endpoints: either multipart with file
/// parts, or a urlencoded form that can only name URLs.
pub enum SourceForm {
    Multipart(Multipart),
    UrlEncoded(Vec<(String, String)>),
}

impl SourceForm {
    pub async fn from_request(request: Request, state: &AppState) -> Result<Self, AppError> {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok());
        let essence = content_type
            .as_ref()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();

        if essence == mime::MULTIPART_FORM_DATA.essence_str() {
            let multipart = Multipart::from_request(request, state)
                .await
                .map_err(|e| AppError::InvalidForm(e.body_text()))?;
            return Ok(SourceForm::Multipart(multipart));
        }

        if essence == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, state)
                .await
                .map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        AppError::BodyTooLarge
                    } else {
                        AppError::InvalidForm(e.body_text())
                    }
                })?;
            return Ok(SourceForm::UrlEncoded(pairs));
        }

        // No recognizable body: nothing was provided
        Ok(SourceForm::UrlEncoded(Vec::new()))
    }
}

pub fn multipart_error(error: MultipartError) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!("Request body exceeded the configured limit");
        AppError::BodyTooLarge
    } else {
        AppError::InvalidForm(error.body_text())
    }
}

/// Consume whatever is left of a rejected multipart body so the connection can
/// be reused.
pub async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}
