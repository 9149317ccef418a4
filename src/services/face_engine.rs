//! HTTP client for an external face detection/encoding service.
//!
//! The service takes PNG bodies: `POST {base}/locate` answers
//! `{"faces": [[top, right, bottom, left], ...]}` and `POST {base}/encode`
//! answers `{"encoding": [f64, ...] | null}`.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;

use super::biometric::{EngineError, FaceBox, FaceEngine};

#[derive(Debug, Deserialize)]
struct LocateResponse {
    faces: Vec<[u32; 4]>,
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    encoding: Option<Vec<f64>>,
}

pub struct RemoteFaceEngine {
    client: reqwest::Client,
    base: Url,
}

impl RemoteFaceEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let mut base = Url::parse(base_url).map_err(|e| EngineError(format!("invalid face engine url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError(e.to_string()))?;
        Ok(Self { client, base })
    }

    async fn post_png<T: for<'de> Deserialize<'de>>(&self, endpoint: &str, image: &RgbImage) -> Result<T, EngineError> {
        let mut body = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut body), ImageFormat::Png)
            .map_err(|e| EngineError(format!("could not encode image: {e}")))?;

        let url = self.base.join(endpoint).map_err(|e| EngineError(e.to_string()))?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("image/png"))
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError(format!("{endpoint} returned {}", response.status())));
        }
        response.json::<T>().await.map_err(|e| EngineError(e.to_string()))
    }
}

#[async_trait]
impl FaceEngine for RemoteFaceEngine {
    async fn locate_faces(&self, image: &RgbImage) -> Result<Vec<FaceBox>, EngineError> {
        let located: LocateResponse = self.post_png("locate", image).await?;
        Ok(located
            .faces
            .into_iter()
            .map(|[top, right, bottom, left]| FaceBox { top, right, bottom, left })
            .collect())
    }

    async fn encode_face(&self, face: &RgbImage) -> Result<Option<Vec<f64>>, EngineError> {
        let encoded: EncodeResponse = self.post_png("encode", face).await?;
        Ok(encoded.encoding)
    }
}

/// Stand-in used when no face service is configured: every call fails as an
/// upstream outage.
pub struct UnavailableFaceEngine;

#[async_trait]
impl FaceEngine for UnavailableFaceEngine {
    async fn locate_faces(&self, _image: &RgbImage) -> Result<Vec<FaceBox>, EngineError> {
        Err(EngineError("no face engine configured".into()))
    }

    async fn encode_face(&self, _face: &RgbImage) -> Result<Option<Vec<f64>>, EngineError> {
        Err(EngineError("no face engine configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let engine = RemoteFaceEngine::new("http://faces.local/api", Duration::from_secs(1)).unwrap();
        assert_eq!(engine.base.join("locate").unwrap().as_str(), "http://faces.local/api/locate");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RemoteFaceEngine::new("not a url", Duration::from_secs(1)).is_err());
    }
}
