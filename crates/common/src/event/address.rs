use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid blob url '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("blob url '{0}' does not name a container")]
    MissingContainer(String),
    #[error("blob url '{0}' does not name a blob")]
    MissingBlob(String),
}

/// A blob located by container and name, independent of the account
///  that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobAddress {
    pub container: String,
    pub blob: String,
}

impl BlobAddress {
    pub fn new(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: blob.into(),
        }
    }

    /// Split a blob url into container and blob name.
    ///
    /// The first path segment is the container, everything after it
    ///  (percent decoded) is the blob name. The host is ignored: the
    ///  account is implied by whoever resolves the address.
    pub fn from_url(raw: &str) -> Result<Self, AddressError> {
        let url =
            Url::parse(raw).map_err(|e| AddressError::InvalidUrl(raw.to_string(), e.to_string()))?;

        let path = url.path().trim_start_matches('/');
        let (container, blob) = match path.split_once('/') {
            Some((container, blob)) => (container, blob),
            None => (path, ""),
        };

        if container.is_empty() {
            return Err(AddressError::MissingContainer(raw.to_string()));
        }
        if blob.is_empty() {
            return Err(AddressError::MissingBlob(raw.to_string()));
        }

        Ok(Self {
            container: decode(container),
            blob: decode(blob),
        })
    }
}

impl fmt::Display for BlobAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.blob)
    }
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let address =
            BlobAddress::from_url("https://acct.blob.core.windows.net/photos/2023/cat.png")
                .unwrap();
        assert_eq!(address.container, "photos");
        assert_eq!(address.blob, "2023/cat.png");
        assert_eq!(address.to_string(), "photos/2023/cat.png");
    }

    #[test]
    fn test_from_url_decodes_names() {
        let address =
            BlobAddress::from_url("https://acct.blob.core.windows.net/docs/my%20report%2Bv2.pdf")
                .unwrap();
        assert_eq!(address.blob, "my report+v2.pdf");
    }

    #[test]
    fn test_from_url_rejects_incomplete_addresses() {
        assert!(matches!(
            BlobAddress::from_url("https://acct.blob.core.windows.net/"),
            Err(AddressError::MissingContainer(_))
        ));
        assert!(matches!(
            BlobAddress::from_url("https://acct.blob.core.windows.net/container"),
            Err(AddressError::MissingBlob(_))
        ));
        assert!(matches!(
            BlobAddress::from_url("not a url"),
            Err(AddressError::InvalidUrl(_, _))
        ));
    }
}
