//! [`ObjectArtifactStore`]: the `object_store` implementation of
//! [`ArtifactStore`].

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use checkup_core::artifact::ArtifactStore;
use object_store::{
  ObjectStore, PutPayload, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory,
  path::Path as ObjectPath,
};

use crate::{ArtifactConfig, ArtifactProvider, Error, Result, UrlSigner};

/// Signing key used by [`ObjectArtifactStore::in_memory`]. In-memory stores
/// never leave the process, so the links are only meaningful to tests.
const IN_MEMORY_SECRET: &[u8] = b"checkup-in-memory";

/// Artifact storage over any `object_store` provider.
///
/// Cloning is cheap; the inner store is reference-counted.
#[derive(Clone, Debug)]
pub struct ObjectArtifactStore {
  store:  Arc<dyn ObjectStore>,
  prefix: String,
  signer: UrlSigner,
}

impl ObjectArtifactStore {
  /// A process-local store, useful for testing.
  pub fn in_memory() -> Self {
    Self {
      store:  Arc::new(InMemory::new()),
      prefix: String::new(),
      signer: UrlSigner::hmac("memory://checkup", IN_MEMORY_SECRET),
    }
  }

  /// Build a store from configuration.
  pub fn from_config(config: &ArtifactConfig) -> Result<Self> {
    let prefix = normalise_prefix(config.prefix.as_deref());

    let (store, signer): (Arc<dyn ObjectStore>, UrlSigner) = match config.provider {
      ArtifactProvider::Memory => {
        let base = config.public_base_url.as_deref().unwrap_or("memory://checkup");
        let secret = config
          .signing_secret
          .as_deref()
          .map(str::as_bytes)
          .unwrap_or(IN_MEMORY_SECRET);
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        (store, UrlSigner::hmac(base, secret))
      }
      ArtifactProvider::Local => {
        let root = config
          .root
          .as_ref()
          .ok_or_else(|| Error::Config("`root` is required for the local provider".into()))?;
        std::fs::create_dir_all(root)?;
        let base = config.public_base_url.as_deref().ok_or_else(|| {
          Error::Config("`public_base_url` is required for the local provider".into())
        })?;
        let secret = config.signing_secret.as_deref().ok_or_else(|| {
          Error::Config("`signing_secret` is required for the local provider".into())
        })?;
        let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(root)?);
        (store, UrlSigner::hmac(base, secret.as_bytes()))
      }
      ArtifactProvider::S3 => {
        let bucket = config
          .bucket
          .as_deref()
          .ok_or_else(|| Error::Config("`bucket` is required for the s3 provider".into()))?;
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &config.region {
          builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
          builder = builder.with_endpoint(endpoint);
        }
        if let Some(key_id) = &config.access_key_id {
          builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &config.secret_access_key {
          builder = builder.with_secret_access_key(secret);
        }
        let s3 = Arc::new(builder.build()?);
        let store: Arc<dyn ObjectStore> = s3.clone();
        (store, UrlSigner::Native(s3))
      }
    };

    tracing::info!(provider = ?config.provider, prefix = %prefix, "artifact store ready");
    Ok(Self { store, prefix, signer })
  }

  /// The signer used for download URLs, for services that must verify them.
  pub fn signer(&self) -> &UrlSigner { &self.signer }

  fn full_key(&self, key: &str) -> String { format!("{}{key}", self.prefix) }

  fn path(&self, key: &str) -> Result<ObjectPath> {
    let full = self.full_key(key);
    ObjectPath::parse(&full).map_err(|e| Error::InvalidKey {
      key:    full.clone(),
      reason: e.to_string(),
    })
  }
}

fn normalise_prefix(prefix: Option<&str>) -> String {
  match prefix.map(|p| p.trim_matches('/')) {
    Some(p) if !p.is_empty() => format!("{p}/"),
    _ => String::new(),
  }
}

// ─── ArtifactStore impl ──────────────────────────────────────────────────────

impl ArtifactStore for ObjectArtifactStore {
  type Error = Error;

  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
    let path = self.path(key)?;
    let size = bytes.len();
    self.store.put(&path, PutPayload::from(bytes)).await?;
    tracing::debug!(key = %path, size, "artifact stored");
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let path = self.path(key)?;
    match self.store.get(&path).await {
      Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
      Err(object_store::Error::NotFound { .. }) => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  async fn delete(&self, key: &str) -> Result<bool> {
    if !self.exists(key).await? {
      return Ok(false);
    }
    let path = self.path(key)?;
    self.store.delete(&path).await?;
    tracing::debug!(key = %path, "artifact deleted");
    Ok(true)
  }

  async fn exists(&self, key: &str) -> Result<bool> {
    let path = self.path(key)?;
    match self.store.head(&path).await {
      Ok(_) => Ok(true),
      Err(object_store::Error::NotFound { .. }) => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<Option<String>> {
    if !self.exists(key).await? {
      return Ok(None);
    }
    let url = self.signer.sign(&self.full_key(key), expires_in, Utc::now()).await?;
    Ok(Some(url))
  }
}
