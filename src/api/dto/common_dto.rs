//! Shared helpers for request bodies.

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// Parses an optional JSON body; an empty or whitespace-only body yields
/// `T::default()`.
///
/// # Errors
///
/// Returns [`GatewayError::ClientError`] if a non-empty body is not valid
/// JSON for `T`.
pub fn optional_json<T>(body: &Bytes) -> Result<T, GatewayError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::ClientError(format!("Invalid request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Body {
        value: Option<u32>,
    }

    #[test]
    fn empty_body_is_default() {
        assert_eq!(optional_json::<Body>(&Bytes::new()).ok(), Some(Body::default()));
        assert_eq!(
            optional_json::<Body>(&Bytes::from_static(b"  \n")).ok(),
            Some(Body::default())
        );
    }

    #[test]
    fn malformed_body_is_a_client_error() {
        let result = optional_json::<Body>(&Bytes::from_static(b"{"));
        assert!(matches!(result, Err(GatewayError::ClientError(_))));
        assert_eq!(
            optional_json::<Body>(&Bytes::from_static(b"{\"value\":3}")).ok(),
            Some(Body { value: Some(3) })
        );
    }
}
