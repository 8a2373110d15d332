use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why a single upstream fetch failed.
///
/// Request states only keep the display string; callers that need to tell a
/// missing entity apart from a broken upstream use [`FetchError::is_not_found`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("TMDB returned HTTP {status} for {path}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("unexpected response shape from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} not found")]
    NotFound { path: String },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    pub fn path(&self) -> &str {
        match self {
            FetchError::Transport { path, .. }
            | FetchError::Status { path, .. }
            | FetchError::Decode { path, .. }
            | FetchError::NotFound { path } => path,
        }
    }
}

/// Why a page could not be rendered.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),
}

impl PageError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PageError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PageError::NotFound(_) => StatusCode::NOT_FOUND,
            PageError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<FetchError> for PageError {
    fn from(err: FetchError) -> Self {
        if err.is_not_found() {
            PageError::NotFound(err.to_string())
        } else {
            PageError::Upstream(err.to_string())
        }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            PageError::NotFound(message) => json!({ "error": message, "redirect": "/404" }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        let err = FetchError::NotFound {
            path: "movie/1".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "movie/1 not found");
    }

    #[test]
    fn status_message_collapses_to_one_string() {
        let err = FetchError::Status {
            path: "movie/popular".to_string(),
            status: 401,
            message: "Invalid API key".to_string(),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.path(), "movie/popular");
        assert_eq!(
            err.to_string(),
            "TMDB returned HTTP 401 for movie/popular: Invalid API key"
        );
    }

    #[test]
    fn page_error_maps_fetch_errors() {
        let not_found: PageError = FetchError::NotFound {
            path: "tv/1".to_string(),
        }
        .into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let upstream: PageError = FetchError::Status {
            path: "tv/1".to_string(),
            status: 500,
            message: "oops".to_string(),
        }
        .into();
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);
        assert!(upstream.to_string().contains("oops"));
    }
}
