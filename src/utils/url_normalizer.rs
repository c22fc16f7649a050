//! Destination URL normalization.

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum UrlNormalizationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(String),

    #[error("Only HTTP and HTTPS destinations are allowed")]
    UnsupportedProtocol,

    #[error("Destination must name a host")]
    MissingHost,

    #[error("Destination must not embed credentials")]
    EmbeddedCredentials,
}

/// Canonicalizes a link destination.
///
/// The input is trimmed, the scheme must be `http` or `https`, credentials
/// are refused, and the fragment and default port are dropped. The `url`
/// crate already lowercases the scheme and host of special URLs.
///
/// # Errors
///
/// Returns the [`UrlNormalizationError`] for the first rule broken.
pub fn normalize_url(input: &str) -> Result<String, UrlNormalizationError> {
    let mut url = Url::parse(input.trim())
        .map_err(|e| UrlNormalizationError::InvalidFormat(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlNormalizationError::UnsupportedProtocol);
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlNormalizationError::MissingHost);
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlNormalizationError::EmbeddedCredentials);
    }

    url.set_fragment(None);
    Ok(url.to_string())
}
