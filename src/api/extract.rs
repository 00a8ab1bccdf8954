//! Extractors whose rejections render as the API's JSON error body.

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts};
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Decode a JSON body that may be left out entirely. An empty body gives
/// `T::default()`; anything else must parse.
pub fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Body {
        symbols: Option<Vec<String>>,
    }

    #[test]
    fn empty_body_is_default() {
        assert_eq!(optional_json::<Body>(&Bytes::new()).unwrap(), Body::default());
        assert_eq!(optional_json::<Body>(&Bytes::from_static(b"  \n")).unwrap(), Body::default());
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let err = optional_json::<Body>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
