//! Face-match scoring between a live student photo and a licence photo.
//!
//! Face localisation and encoding are delegated to a [`FaceEngine`]; this
//! module owns decoding, cropping and the mapping from distance to score.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distances below this are considered the same person.
pub const MATCH_THRESHOLD: f64 = 0.6;
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.4;
const CROP_PADDING: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoSide {
    Student,
    License,
}

impl fmt::Display for PhotoSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoSide::Student => f.write_str("student photo"),
            PhotoSide::License => f.write_str("license photo"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Face engine failure: {0}")]
pub struct EngineError(pub String);

#[derive(Debug, Error)]
pub enum BiometricError {
    #[error("Could not decode {side}: {reason}")]
    InvalidImage { side: PhotoSide, reason: String },

    #[error("No face detected in {0}")]
    NoFaceDetected(PhotoSide),

    #[error("Could not encode the face in {0}")]
    EncodingFailed(PhotoSide),

    #[error("Face encodings differ in length: {student} for the student photo, {license} for the license photo")]
    EncodingMismatch { student: usize, license: usize },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A face bounding box in pixel coordinates; `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

#[async_trait]
pub trait FaceEngine: Send + Sync {
    /// Face boxes found in the image, most prominent first.
    async fn locate_faces(&self, image: &RgbImage) -> Result<Vec<FaceBox>, EngineError>;

    /// Encoding of the single face filling `face`, or `None` if none could be computed.
    async fn encode_face(&self, face: &RgbImage) -> Result<Option<Vec<f64>>, EngineError>;

    /// Euclidean distance between two encodings, clamped to `[0, 1]`.
    fn face_distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let squared: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        squared.sqrt().clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub match_score: f64,
    pub face_distance: f64,
    pub is_match: bool,
    pub confidence: MatchConfidence,
}

impl MatchResult {
    pub fn from_distance(distance: f64) -> Self {
        let confidence = if distance < HIGH_CONFIDENCE_THRESHOLD {
            MatchConfidence::High
        } else if distance < MATCH_THRESHOLD {
            MatchConfidence::Medium
        } else {
            MatchConfidence::Low
        };
        Self {
            match_score: round_to(((1.0 - distance) * 100.0).clamp(0.0, 100.0), 2),
            face_distance: round_to(distance, 3),
            is_match: distance < MATCH_THRESHOLD,
            confidence,
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Crop to `face` grown by a fifth of its size on every side, clamped to the image.
pub fn padded_crop(image: &RgbImage, face: FaceBox) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    let top = face.top.min(height);
    let bottom = face.bottom.min(height);
    let left = face.left.min(width);
    let right = face.right.min(width);
    if bottom <= top || right <= left {
        return None;
    }

    let pad_v = (f64::from(bottom - top) * CROP_PADDING) as u32;
    let pad_h = (f64::from(right - left) * CROP_PADDING) as u32;
    let top = top.saturating_sub(pad_v);
    let left = left.saturating_sub(pad_h);
    let bottom = bottom.saturating_add(pad_v).min(height);
    let right = right.saturating_add(pad_h).min(width);

    Some(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
}

#[derive(Clone)]
pub struct FaceMatcher {
    engine: Arc<dyn FaceEngine>,
}

impl FaceMatcher {
    pub fn new(engine: Arc<dyn FaceEngine>) -> Self {
        Self { engine }
    }

    pub async fn verify(&self, student_photo: &[u8], license_photo: &[u8]) -> Result<MatchResult, BiometricError> {
        let student = decode(student_photo, PhotoSide::Student)?;
        let license = decode(license_photo, PhotoSide::License)?;

        let student_face = self.locate(&student, PhotoSide::Student).await?;
        let license_face = self.locate(&license, PhotoSide::License).await?;

        let student_encoding = self.encode(&student_face, PhotoSide::Student).await?;
        let license_encoding = self.encode(&license_face, PhotoSide::License).await?;

        if student_encoding.len() != license_encoding.len() {
            return Err(BiometricError::EncodingMismatch {
                student: student_encoding.len(),
                license: license_encoding.len(),
            });
        }

        let distance = self.engine.face_distance(&student_encoding, &license_encoding);
        if !distance.is_finite() {
            return Err(EngineError(format!("face distance is not a number: {distance}")).into());
        }
        let result = MatchResult::from_distance(distance);
        tracing::debug!(
            face_distance = result.face_distance,
            match_score = result.match_score,
            is_match = result.is_match,
            "Face comparison finished"
        );
        Ok(result)
    }

    async fn locate(&self, image: &RgbImage, side: PhotoSide) -> Result<RgbImage, BiometricError> {
        let faces = self.engine.locate_faces(image).await?;
        let face = faces.first().copied().ok_or(BiometricError::NoFaceDetected(side))?;
        padded_crop(image, face).ok_or(BiometricError::NoFaceDetected(side))
    }

    async fn encode(&self, face: &RgbImage, side: PhotoSide) -> Result<Vec<f64>, BiometricError> {
        self.engine
            .encode_face(face)
            .await?
            .filter(|encoding| !encoding.is_empty() && encoding.iter().all(|x| x.is_finite()))
            .ok_or(BiometricError::EncodingFailed(side))
    }
}

fn decode(bytes: &[u8], side: PhotoSide) -> Result<RgbImage, BiometricError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| BiometricError::InvalidImage {
            side,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn thresholds_map_to_confidence() {
        let close = MatchResult::from_distance(0.25);
        assert_eq!(close.confidence, MatchConfidence::High);
        assert!(close.is_match);
        assert_eq!(close.match_score, 75.0);

        let near = MatchResult::from_distance(0.5);
        assert_eq!(near.confidence, MatchConfidence::Medium);
        assert!(near.is_match);

        let far = MatchResult::from_distance(0.6);
        assert_eq!(far.confidence, MatchConfidence::Low);
        assert!(!far.is_match);
    }

    #[test]
    fn distance_is_rounded_to_three_places() {
        let result = MatchResult::from_distance(0.123456);
        assert_eq!(result.face_distance, 0.123);
        assert_eq!(result.match_score, 87.65);
    }

    #[test]
    fn crop_pads_a_fifth_and_truncates() {
        let image = RgbImage::new(200, 200);
        let face = FaceBox {
            top: 50,
            right: 112,
            bottom: 112,
            left: 50,
        };
        // 62 * 0.2 = 12.4 -> 12 pixels per side.
        let crop = padded_crop(&image, face).unwrap();
        assert_eq!(crop.dimensions(), (86, 86));
    }

    #[test]
    fn crop_is_clamped_to_image_bounds() {
        let image = RgbImage::new(100, 80);
        let face = FaceBox {
            top: 0,
            right: 100,
            bottom: 80,
            left: 10,
        };
        let crop = padded_crop(&image, face).unwrap();
        assert_eq!(crop.dimensions(), (100, 80));
    }

    #[test]
    fn degenerate_box_yields_no_crop() {
        let image = RgbImage::new(10, 10);
        let face = FaceBox {
            top: 5,
            right: 5,
            bottom: 5,
            left: 5,
        };
        assert!(padded_crop(&image, face).is_none());
    }

    /// Finds a face in every image and hands back fixed encodings, student first.
    struct FixedEncodings {
        student: Vec<f64>,
        license: Vec<f64>,
    }

    #[async_trait]
    impl FaceEngine for FixedEncodings {
        async fn locate_faces(&self, image: &RgbImage) -> Result<Vec<FaceBox>, EngineError> {
            let (width, height) = image.dimensions();
            Ok(vec![FaceBox {
                top: 0,
                right: width,
                bottom: height,
                left: 0,
            }])
        }

        async fn encode_face(&self, face: &RgbImage) -> Result<Option<Vec<f64>>, EngineError> {
            // Photos are told apart by their width.
            if face.width() == 4 {
                Ok(Some(self.student.clone()))
            } else {
                Ok(Some(self.license.clone()))
            }
        }
    }

    fn png(width: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(width, 4, image::Rgb([200, 200, 200]))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn verify_with(student: Vec<f64>, license: Vec<f64>) -> Result<MatchResult, BiometricError> {
        let matcher = FaceMatcher::new(Arc::new(FixedEncodings { student, license }));
        matcher.verify(&png(4), &png(6)).await
    }

    #[tokio::test]
    async fn equal_encodings_match() {
        let result = verify_with(vec![0.1, 0.2], vec![0.1, 0.2]).await.unwrap();
        assert!(result.is_match);
        assert_eq!(result.face_distance, 0.0);
    }

    #[tokio::test]
    async fn encodings_of_different_lengths_are_rejected() {
        let err = verify_with(vec![0.1, 0.2, 0.3], vec![0.1]).await.unwrap_err();
        assert!(matches!(err, BiometricError::EncodingMismatch { student: 3, license: 1 }));
    }

    #[tokio::test]
    async fn non_finite_encoding_names_its_photo() {
        let err = verify_with(vec![0.1, 0.2], vec![f64::NAN, 0.2]).await.unwrap_err();
        assert!(matches!(err, BiometricError::EncodingFailed(PhotoSide::License)));

        let err = verify_with(vec![f64::INFINITY], vec![0.5]).await.unwrap_err();
        assert!(matches!(err, BiometricError::EncodingFailed(PhotoSide::Student)));
    }

    proptest! {
        #[test]
        fn score_stays_in_range(distance in -1.0f64..2.0) {
            let result = MatchResult::from_distance(distance);
            prop_assert!((0.0..=100.0).contains(&result.match_score));
            prop_assert_eq!(result.is_match, result.confidence != MatchConfidence::Low);
        }

        #[test]
        fn crop_never_leaves_the_image(
            width in 1u32..64,
            height in 1u32..64,
            top in 0u32..80,
            left in 0u32..80,
            h in 1u32..80,
            w in 1u32..80,
        ) {
            let image = RgbImage::new(width, height);
            let face = FaceBox { top, left, bottom: top + h, right: left + w };
            if let Some(crop) = padded_crop(&image, face) {
                prop_assert!(crop.width() <= width && crop.height() <= height);
                prop_assert!(crop.width() > 0 && crop.height() > 0);
            }
        }
    }
}
