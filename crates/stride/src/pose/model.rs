use std::{
    env,
    fmt,
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use anyhow::Context;

const MODEL_URL_VAR: &str = "STRIDE_MODEL_URL";

/// Default location of the pose landmark weights, relative to the working directory.
const DEFAULT_MODEL_PATH: &str = "3rdparty/onnx/pose_landmark_full.onnx";

/// Where pose model weights are loaded from.
#[derive(Clone)]
pub enum ModelSource {
    /// Fetched over HTTP(S).
    Url(String),
    /// Read from the local filesystem.
    Path(PathBuf),
    /// Already in memory.
    Memory(Arc<[u8]>),
}

impl ModelSource {
    /// Fetches the raw model weights.
    ///
    /// Failures are not retried.
    pub async fn fetch(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ModelSource::Url(url) => {
                log::debug!("fetching pose model from {url}");
                let response = reqwest::get(url)
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("failed to fetch pose model from {url}"))?;
                Ok(response.bytes().await?.to_vec())
            }
            ModelSource::Path(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read pose model '{}'", path.display())),
            ModelSource::Memory(data) => Ok(data.to_vec()),
        }
    }
}

/// Uses `STRIDE_MODEL_URL` if set, or the bundled model path otherwise.
impl Default for ModelSource {
    fn default() -> Self {
        static URL: OnceLock<Option<String>> = OnceLock::new();
        let url = URL.get_or_init(|| {
            let url = env::var(MODEL_URL_VAR).ok().filter(|url| !url.is_empty());
            if let Some(url) = &url {
                log::debug!("{MODEL_URL_VAR} overrides model source: {url}");
            }
            url
        });

        match url {
            Some(url) => ModelSource::Url(url.clone()),
            None => ModelSource::Path(DEFAULT_MODEL_PATH.into()),
        }
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ModelSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ModelSource::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source() {
        let source = ModelSource::Memory(Arc::from(&b"onnx"[..]));
        assert_eq!(source.fetch().await.unwrap(), b"onnx");
        assert_eq!(format!("{source:?}"), "Memory(4 bytes)");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let source = ModelSource::Path("does/not/exist.onnx".into());
        let err = source.fetch().await.unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.onnx"));
    }
}
