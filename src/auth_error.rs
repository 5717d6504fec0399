//! Authentication failure classification
//!
//! Translates a backend [`ApiError`] into "needs re-authentication" or
//! "anything else". Read-state operations route every failure through
//! [`is_auth_error`] and report the outcome as an `auth_error` flag, so
//! callers never inspect backend error shapes themselves.

use crate::backend::ApiError;

/// PostgREST code for a rejected JWT
const JWT_ERROR_CODE: &str = "PGRST301";

/// Message fragments (lowercase) that identify a credential failure
const AUTH_KEYWORDS: &[&str] = &["jwt", "refresh token"];

/// Check whether `err` is an authentication failure
///
/// True for HTTP 401, the PostgREST JWT error code, or a message naming a
/// JWT or refresh token. A bare 403 is a permission denial, not a reason to
/// sign in again.
pub fn is_auth_error(err: &ApiError) -> bool {
    if err.status == Some(401) {
        return true;
    }
    if err.code.as_deref() == Some(JWT_ERROR_CODE) {
        return true;
    }
    let message = err.message.to_ascii_lowercase();
    AUTH_KEYWORDS.iter().any(|k| message.contains(k))
}
