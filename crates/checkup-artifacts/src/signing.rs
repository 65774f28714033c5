//! Time-limited download URLs.
//!
//! S3 issues its own presigned URLs. Every other provider gets
//! `{base}/{key}?expires=<unix>&signature=<hex>`, where the signature is an
//! HMAC-SHA256 over `key` and `expires` keyed by the configured secret. The
//! service that serves those URLs checks them with [`UrlSigner::verify`].

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use object_store::{path::Path as ObjectPath, signer::Signer};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub enum UrlSigner {
  /// The provider's own presigner.
  Native(Arc<dyn Signer>),
  Hmac {
    base_url: String,
    secret:   Vec<u8>,
  },
}

impl fmt::Debug for UrlSigner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Native(_) => f.write_str("UrlSigner::Native"),
      Self::Hmac { base_url, .. } => {
        f.debug_struct("UrlSigner::Hmac").field("base_url", base_url).finish()
      }
    }
  }
}

impl UrlSigner {
  pub fn hmac(base_url: &str, secret: &[u8]) -> Self {
    Self::Hmac {
      base_url: base_url.trim_end_matches('/').to_owned(),
      secret:   secret.to_vec(),
    }
  }

  /// Sign `key` (already prefixed) for download until `now + expires_in`.
  pub async fn sign(
    &self,
    key: &str,
    expires_in: Duration,
    now: DateTime<Utc>,
  ) -> Result<String> {
    match self {
      Self::Native(signer) => {
        let path = ObjectPath::parse(key).map_err(|e| Error::InvalidKey {
          key:    key.to_owned(),
          reason: e.to_string(),
        })?;
        let url = signer.signed_url(http::Method::GET, &path, expires_in).await?;
        Ok(url.to_string())
      }
      Self::Hmac { base_url, secret } => {
        let lifetime = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
        let expires = now.timestamp().saturating_add(lifetime);
        let signature = hex::encode(mac(secret, key, expires)?.finalize().into_bytes());
        Ok(format!("{base_url}/{key}?expires={expires}&signature={signature}"))
      }
    }
  }

  /// Check a URL issued by [`UrlSigner::sign`] and return the key it grants.
  ///
  /// Fails for a foreign base URL, a bad signature, or an expired link.
  /// Native presigned URLs are verified by the provider, not here.
  pub fn verify(&self, url: &str, now: DateTime<Utc>) -> Result<String> {
    let Self::Hmac { base_url, secret } = self else {
      return Err(Error::Signing("native URLs are verified by the provider".into()));
    };

    let rest = url
      .strip_prefix(base_url.as_str())
      .and_then(|r| r.strip_prefix('/'))
      .ok_or_else(|| Error::Signing("URL does not belong to this store".into()))?;
    let (key, query) = rest
      .split_once('?')
      .ok_or_else(|| Error::Signing("URL has no query".into()))?;

    let mut expires = None;
    let mut signature = None;
    for pair in query.split('&') {
      match pair.split_once('=') {
        Some(("expires", v)) => expires = v.parse::<i64>().ok(),
        Some(("signature", v)) => signature = hex::decode(v).ok(),
        _ => {}
      }
    }
    let (Some(expires), Some(signature)) = (expires, signature) else {
      return Err(Error::Signing("URL is missing expires or signature".into()));
    };

    mac(secret, key, expires)?
      .verify_slice(&signature)
      .map_err(|_| Error::Signing("signature mismatch".into()))?;

    if now.timestamp() > expires {
      return Err(Error::Signing("URL has expired".into()));
    }
    Ok(key.to_owned())
  }
}

fn mac(secret: &[u8], key: &str, expires: i64) -> Result<HmacSha256> {
  let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
    .map_err(|e| Error::Signing(e.to_string()))?;
  mac.update(key.as_bytes());
  mac.update(b"\n");
  mac.update(expires.to_string().as_bytes());
  Ok(mac)
}
