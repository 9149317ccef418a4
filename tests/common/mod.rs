#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use secrecy::SecretString;

use rider_training_backend::{
    app_state::AppState,
    bootstrap::ensure_company_and_admin,
    config::{BootstrapConfig, Config},
    db::{Company, MemoryStore, NewCertificateBatch, NewUser, ReplaceTaskTemplate, Store, TemplateTask, User, UserLogin},
    security::TokenService,
    services::{EngineError, FaceBox, FaceEngine, Principal},
};

pub const ADMIN_EMAIL: &str = "admin@ridersafe.test";
pub const PASSWORD: &str = "correct horse battery";
pub const SESSION_TYPE: &str = "CBT";

/// Finds a face only in images that are not pure black and encodes it as
/// the normalised brightness of its first pixel.
pub struct StubFaceEngine;

#[async_trait]
impl FaceEngine for StubFaceEngine {
    async fn locate_faces(&self, image: &RgbImage) -> Result<Vec<FaceBox>, EngineError> {
        if image.pixels().all(|p| p.0 == [0, 0, 0]) {
            return Ok(Vec::new());
        }
        let (width, height) = image.dimensions();
        Ok(vec![FaceBox {
            top: 0,
            right: width,
            bottom: height,
            left: 0,
        }])
    }

    async fn encode_face(&self, face: &RgbImage) -> Result<Option<Vec<f64>>, EngineError> {
        Ok(face.pixels().next().map(|p| vec![f64::from(p.0[0]) / 255.0]))
    }
}

pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub struct TestApp {
    pub state: AppState,
    pub company: Company,
    pub admin: Principal,
    pub admin_token: String,
    pub instructor: Principal,
    pub instructor_token: String,
}

fn principal(user: &User) -> Principal {
    Principal {
        user_id: user.id,
        company_id: user.company_id,
        roles: user.roles.clone(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let bootstrap = BootstrapConfig {
            company_name: "Ridersafe Training".to_string(),
            admin_email: Some(ADMIN_EMAIL.to_string()),
            admin_password: Some(SecretString::from(PASSWORD.to_string())),
        };
        let company = ensure_company_and_admin(store.as_ref(), &bootstrap)
            .await
            .expect("bootstrap company");

        let tokens = Arc::new(TokenService::ephemeral(time::Duration::hours(1)).expect("token secret"));
        let state = AppState::new(Config::default(), store, tokens, Arc::new(StubFaceEngine));

        let admin_login = state
            .accounts
            .login(UserLogin {
                email: ADMIN_EMAIL.to_string(),
                password: SecretString::from(PASSWORD.to_string()),
            })
            .await
            .expect("admin login");
        let admin = principal(&admin_login.user);

        let instructor_login = state
            .accounts
            .register(&admin, new_instructor("Ivy Instructor", "ivy@ridersafe.test"))
            .await
            .expect("register instructor");
        let instructor = principal(&instructor_login.user);

        Self {
            state,
            company,
            admin,
            admin_token: admin_login.access_token,
            instructor,
            instructor_token: instructor_login.access_token,
        }
    }

    /// A second instructor in the same company.
    pub async fn another_instructor(&self, email: &str) -> Principal {
        let response = self
            .state
            .accounts
            .register(&self.admin, new_instructor("Otto Other", email))
            .await
            .expect("register instructor");
        principal(&response.user)
    }

    pub async fn receive(&self, start: i64, size: i64) {
        self.state
            .inventory
            .receive_batch(&self.admin, batch(SESSION_TYPE, start, size))
            .await
            .expect("receive batch");
    }

    pub async fn template(&self, task_ids: &[&str]) {
        let tasks = task_ids
            .iter()
            .map(|id| TemplateTask {
                task_id: id.to_string(),
                task_description: format!("Element {id}"),
            })
            .collect();
        self.state
            .sessions
            .replace_task_template(&self.admin, SESSION_TYPE, ReplaceTaskTemplate { tasks })
            .await
            .expect("replace template");
    }
}

pub fn new_instructor(name: &str, email: &str) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: email.to_string(),
        password: SecretString::from(PASSWORD.to_string()),
        is_admin: false,
        is_instructor: true,
        instructor_certificate_number: None,
        phone: None,
    }
}

pub fn batch(session_type: &str, start: i64, size: i64) -> NewCertificateBatch {
    NewCertificateBatch {
        session_type: session_type.to_string(),
        start_certificate_number: start,
        batch_size: size,
    }
}
