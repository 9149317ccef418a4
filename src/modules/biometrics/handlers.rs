use axum::{
    extract::{Multipart, State},
    Json,
};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::Authenticated;
use crate::services::MatchResult;

#[derive(Default)]
struct FaceUpload {
    student_photo: Option<Vec<u8>>,
    license_photo: Option<Vec<u8>>,
    student_id: Option<Uuid>,
}

async fn read_upload(mut multipart: Multipart) -> AppResult<FaceUpload> {
    let mut upload = FaceUpload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "student_photo" | "license_photo" => {
                let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                if name == "student_photo" {
                    upload.student_photo = Some(bytes.to_vec());
                } else {
                    upload.license_photo = Some(bytes.to_vec());
                }
            }
            "student_id" => {
                let text = field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?;
                let id = text
                    .trim()
                    .parse()
                    .map_err(|_| AppError::Validation("student_id must be a UUID".into()))?;
                upload.student_id = Some(id);
            }
            _ => {}
        }
    }
    Ok(upload)
}

/// Compare a live photo with a licence photo; optionally record the result on a student.
pub async fn verify_face(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    multipart: Multipart,
) -> AppResult<Json<MatchResult>> {
    principal.require_instructor()?;

    let upload = read_upload(multipart).await?;
    let student_photo = upload
        .student_photo
        .ok_or_else(|| AppError::Validation("student_photo is required".into()))?;
    let license_photo = upload
        .license_photo
        .ok_or_else(|| AppError::Validation("license_photo is required".into()))?;

    let result = state.faces.verify(&student_photo, &license_photo).await?;

    if let Some(student_id) = upload.student_id {
        state.sessions.record_verification(&principal, student_id, &result).await?;
    }
    Ok(Json(result))
}
