//! Shared helpers for backend adapters.

use bp_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`]; everything else to [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key named by `api_key_env`. Returns `None` (not an error)
/// when unset so keyless local endpoints keep working.
pub(crate) fn api_key_from_env(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}

/// Build the default HTTP client for non-streamed calls. The 120 s
/// timeout is generous because IaC generation calls run long.
pub(crate) fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .map_err(from_reqwest)
}

/// Check an HTTP response status, turning non-2xx into [`Error::Http`]
/// with the body snippet included for diagnosis.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    Err(Error::Http(format!("{status}: {snippet}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_key_is_none() {
        assert!(api_key_from_env("BP_TEST_NO_SUCH_KEY_19").is_none());
    }

    #[test]
    fn empty_env_key_is_none() {
        std::env::set_var("BP_TEST_EMPTY_KEY_19", "");
        assert!(api_key_from_env("BP_TEST_EMPTY_KEY_19").is_none());
        std::env::remove_var("BP_TEST_EMPTY_KEY_19");
    }

    #[test]
    fn present_env_key_is_read() {
        std::env::set_var("BP_TEST_KEY_19", "sk-unit");
        assert_eq!(api_key_from_env("BP_TEST_KEY_19").as_deref(), Some("sk-unit"));
        std::env::remove_var("BP_TEST_KEY_19");
    }
}
