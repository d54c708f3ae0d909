use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use picedit_common::types::IdParseError;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Reasons an edit-channel upgrade is refused before any connection state exists.
///
/// Rejections surface as a bare status code; browsers cannot read an upgrade
/// response body anyway.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeRejection {
    #[error("handshake query string could not be decoded: {0}")]
    MalformedQuery(String),
    #[error("pictureId query parameter is missing")]
    MissingResourceId,
    #[error("pictureId is invalid: {0}")]
    InvalidResourceId(#[source] IdParseError),
    #[error("caller identity could not be resolved")]
    Unauthenticated,
    #[error("picture does not exist")]
    ResourceNotFound,
    #[error("space owning the picture does not exist")]
    WorkspaceNotFound,
    #[error("pictures in private spaces cannot be edited collaboratively")]
    PrivateWorkspace,
    #[error("caller lacks picture:edit")]
    EditPermissionDenied,
    #[error("picture directory lookup failed")]
    Directory(#[source] anyhow::Error),
}

impl HandshakeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedQuery(_) | Self::MissingResourceId | Self::InvalidResourceId(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::ResourceNotFound | Self::WorkspaceNotFound => StatusCode::NOT_FOUND,
            Self::PrivateWorkspace | Self::EditPermissionDenied => StatusCode::FORBIDDEN,
            Self::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedQuery(_) => "malformed_query",
            Self::MissingResourceId => "missing_resource_id",
            Self::InvalidResourceId(_) => "invalid_resource_id",
            Self::Unauthenticated => "unauthenticated",
            Self::ResourceNotFound => "resource_not_found",
            Self::WorkspaceNotFound => "workspace_not_found",
            Self::PrivateWorkspace => "private_workspace",
            Self::EditPermissionDenied => "edit_permission_denied",
            Self::Directory(_) => "directory_error",
        }
    }
}

impl IntoResponse for HandshakeRejection {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        if let Some(request_id) = current_request_id() {
            attach_request_id_header(&mut response, &request_id);
        }
        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
