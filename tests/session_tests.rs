mod common;

use uuid::Uuid;

use common::{TestApp, SESSION_TYPE};
use rider_training_backend::db::{
    BatchStatus, NewStudent, NewTrainingSession, Store, StoreTx, TaskMarkResult, TaskScope, TaskUpdate,
    TrainingOutcome,
};
use rider_training_backend::services::{GateError, MatchResult, Principal, SessionError};

fn rider(name: &str) -> NewStudent {
    NewStudent {
        name: name.to_string(),
        license_number: format!("LIC-{name}"),
        email: Some(format!("{name}@riders.test")),
        phone: None,
        date_of_birth: None,
        bike_type: Some("125cc".to_string()),
    }
}

fn mark(task_id: &str, completed: bool) -> TaskUpdate {
    TaskUpdate {
        task_id: task_id.to_string(),
        completed,
        notes: None,
        override_reason: None,
    }
}

async fn open_session(app: &TestApp, instructor: &Principal) -> Uuid {
    app.state
        .sessions
        .create_session(
            instructor,
            NewTrainingSession {
                session_type: SESSION_TYPE.to_string(),
                location: None,
                site_code: Some("LS1".to_string()),
                notes: None,
            },
        )
        .await
        .unwrap()
        .id
}

async fn enroll(app: &TestApp, session_id: Uuid, name: &str) -> Uuid {
    app.state
        .sessions
        .enroll_student(&app.instructor, session_id, rider(name))
        .await
        .unwrap()
        .student
        .id
}

async fn mark_all(app: &TestApp, instructor: &Principal, session_id: Uuid, tasks: &[&str]) {
    for task in tasks {
        app.state
            .sessions
            .set_task(instructor, TaskScope::Session(session_id), mark(task, true))
            .await
            .unwrap();
    }
}

async fn outcome(app: &TestApp, session_id: Uuid, student_id: Uuid) -> Option<TrainingOutcome> {
    let detail = app.state.sessions.session_detail(&app.admin, session_id).await.unwrap();
    detail
        .students
        .into_iter()
        .find(|s| s.id == student_id)
        .and_then(|s| s.training_outcome)
}

#[tokio::test]
async fn full_checklist_passes_and_consumes_one_certificate() {
    let app = TestApp::spawn().await;
    app.template(&["T1", "T2", "T3"]).await;
    app.receive(100, 5).await;

    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "alex").await;
    mark_all(&app, &app.instructor, session_id, &["T1", "T2", "T3"]).await;

    let summary = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();
    assert_eq!(summary.total_students, 1);
    assert_eq!(summary.certificates_issued, 1);
    assert_eq!(summary.stock_shortfall, 0);
    assert_eq!(outcome(&app, session_id, student_id).await, Some(TrainingOutcome::Pass));

    let report = app.state.inventory.inventory_report(&app.admin).await.unwrap();
    assert_eq!(report[0].certificates_remaining, 4);
}

#[tokio::test]
async fn manually_certified_student_passes_without_a_second_certificate() {
    let app = TestApp::spawn().await;
    app.template(&["T1"]).await;
    app.receive(100, 5).await;

    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "casey").await;
    mark_all(&app, &app.instructor, session_id, &["T1"]).await;

    let next = app.state.inventory.allocate_next(&app.instructor, SESSION_TYPE).await.unwrap().unwrap();
    app.state
        .inventory
        .issue(&app.instructor, next.certificate.id, student_id, session_id)
        .await
        .unwrap();

    let summary = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();
    assert_eq!(summary.certificates_issued, 0);
    assert_eq!(summary.stock_shortfall, 0);
    assert_eq!(outcome(&app, session_id, student_id).await, Some(TrainingOutcome::Pass));

    let report = app.state.inventory.inventory_report(&app.admin).await.unwrap();
    assert_eq!(report[0].certificates_remaining, 4);
}

#[tokio::test]
async fn partial_checklist_is_incomplete_and_consumes_nothing() {
    let app = TestApp::spawn().await;
    app.template(&["T1", "T2", "T3"]).await;
    app.receive(100, 5).await;

    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "blair").await;
    mark_all(&app, &app.instructor, session_id, &["T1", "T2"]).await;

    let summary = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();
    assert_eq!(summary.certificates_issued, 0);
    assert_eq!(outcome(&app, session_id, student_id).await, Some(TrainingOutcome::Incomplete));

    let report = app.state.inventory.inventory_report(&app.admin).await.unwrap();
    assert_eq!(report[0].certificates_remaining, 5);
}

#[tokio::test]
async fn student_without_tasks_never_passes() {
    let app = TestApp::spawn().await;
    app.receive(100, 5).await;

    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "casey").await;

    let summary = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();
    assert_eq!(summary.certificates_issued, 0);
    assert_eq!(outcome(&app, session_id, student_id).await, Some(TrainingOutcome::Incomplete));
}

#[tokio::test]
async fn stock_out_reports_shortfall() {
    let app = TestApp::spawn().await;
    app.template(&["T1"]).await;
    app.receive(100, 1).await;

    let session_id = open_session(&app, &app.instructor).await;
    enroll(&app, session_id, "dana").await;
    enroll(&app, session_id, "eli").await;
    mark_all(&app, &app.instructor, session_id, &["T1"]).await;

    let summary = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();
    assert_eq!(summary.total_students, 2);
    assert_eq!(summary.certificates_issued, 1);
    assert_eq!(summary.stock_shortfall, 1);

    let detail = app.state.sessions.session_detail(&app.admin, session_id).await.unwrap();
    let outcomes: Vec<_> = detail.students.iter().filter_map(|s| s.training_outcome).collect();
    assert!(outcomes.contains(&TrainingOutcome::Pass));
    assert!(outcomes.contains(&TrainingOutcome::Incomplete));
}

#[tokio::test]
async fn template_changes_do_not_touch_enrolled_students() {
    let app = TestApp::spawn().await;
    app.template(&["T1", "T2"]).await;

    let session_id = open_session(&app, &app.instructor).await;
    let enrolled = app
        .state
        .sessions
        .enroll_student(&app.instructor, session_id, rider("finn"))
        .await
        .unwrap();
    assert_eq!(enrolled.tasks.len(), 2);
    assert_eq!(enrolled.tasks[0].sequence, 1);

    app.template(&["T1", "T2", "T3", "T4"]).await;
    let late = app
        .state
        .sessions
        .enroll_student(&app.instructor, session_id, rider("gale"))
        .await
        .unwrap();
    assert_eq!(late.tasks.len(), 4);

    // The first student still only needs their original two tasks.
    mark_all(&app, &app.instructor, session_id, &["T1", "T2"]).await;
    app.receive(1, 5).await;
    let summary = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();
    assert_eq!(summary.certificates_issued, 1);
    assert_eq!(
        outcome(&app, session_id, enrolled.student.id).await,
        Some(TrainingOutcome::Pass)
    );
}

#[tokio::test]
async fn completed_sessions_reject_further_changes() {
    let app = TestApp::spawn().await;
    app.template(&["T1"]).await;

    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "harper").await;
    app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap();

    let err = app
        .state
        .sessions
        .enroll_student(&app.instructor, session_id, rider("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionClosed(id) if id == session_id));

    let err = app
        .state
        .sessions
        .set_task(&app.instructor, TaskScope::Student(student_id), mark("T1", true))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionClosed(_)));

    let err = app.state.sessions.complete_session(&app.instructor, session_id).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionClosed(_)));
}

#[tokio::test]
async fn only_the_owning_instructor_may_modify() {
    let app = TestApp::spawn().await;
    app.template(&["T1"]).await;
    let other = app.another_instructor("otto@ridersafe.test").await;

    let session_id = open_session(&app, &app.instructor).await;
    enroll(&app, session_id, "indy").await;

    let err = app
        .state
        .sessions
        .set_task(&other, TaskScope::Session(session_id), mark("T1", true))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotOwner));

    let err = app.state.sessions.complete_session(&other, session_id).await.unwrap_err();
    assert!(matches!(err, SessionError::NotOwner));

    let err = app
        .state
        .sessions
        .create_session(
            &Principal {
                roles: Default::default(),
                ..other.clone()
            },
            NewTrainingSession {
                session_type: SESSION_TYPE.to_string(),
                location: None,
                site_code: None,
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Gate(GateError::Forbidden("Instructor"))));
}

#[tokio::test]
async fn student_override_records_reason() {
    let app = TestApp::spawn().await;
    app.template(&["T1", "T2"]).await;

    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "jules").await;

    let result = app
        .state
        .sessions
        .set_task(
            &app.instructor,
            TaskScope::Student(student_id),
            TaskUpdate {
                notes: Some("Demonstrated on second attempt".to_string()),
                ..mark("T2", true)
            },
        )
        .await
        .unwrap();
    let TaskMarkResult::Student(task) = result else {
        panic!("expected a single student task");
    };
    assert!(task.completed && task.completed_at.is_some());
    assert_eq!(task.override_reason.as_deref(), Some("Demonstrated on second attempt"));

    let err = app
        .state
        .sessions
        .set_task(&app.instructor, TaskScope::Student(student_id), mark("T9", true))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound("Task")));
}

#[tokio::test]
async fn bulk_mark_counts_students() {
    let app = TestApp::spawn().await;
    app.template(&["T1"]).await;

    let session_id = open_session(&app, &app.instructor).await;
    for name in ["kit", "lee", "max"] {
        enroll(&app, session_id, name).await;
    }

    let result = app
        .state
        .sessions
        .set_task(&app.instructor, TaskScope::Session(session_id), mark("T1", true))
        .await
        .unwrap();
    assert!(matches!(result, TaskMarkResult::Bulk { students_updated: 3, .. }));

    let err = app
        .state
        .sessions
        .set_task(&app.instructor, TaskScope::Session(session_id), mark("nope", true))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound("Task")));
}

#[tokio::test]
async fn concurrent_completions_never_share_a_number() {
    let app = TestApp::spawn().await;
    app.template(&["T1"]).await;
    let batch = app
        .state
        .inventory
        .receive_batch(&app.admin, common::batch(SESSION_TYPE, 1000, 6))
        .await
        .unwrap();

    let mut sessions = Vec::new();
    for _ in 0..4 {
        let session_id = open_session(&app, &app.instructor).await;
        enroll(&app, session_id, "nat").await;
        enroll(&app, session_id, "oak").await;
        mark_all(&app, &app.instructor, session_id, &["T1"]).await;
        sessions.push(session_id);
    }

    let handles: Vec<_> = sessions
        .iter()
        .map(|&session_id| {
            let tracker = app.state.sessions.clone();
            let instructor = app.instructor.clone();
            tokio::spawn(async move { tracker.complete_session(&instructor, session_id).await })
        })
        .collect();

    let mut issued = 0;
    let mut shortfall = 0;
    for handle in handles {
        let summary = handle.await.unwrap().unwrap();
        issued += summary.certificates_issued;
        shortfall += summary.stock_shortfall;
    }
    assert_eq!(issued, 6);
    assert_eq!(shortfall, 2);

    let mut tx = app.state.store.begin().await.unwrap();
    let mut passed = 0;
    for session_id in &sessions {
        for student in tx.list_students(*session_id).await.unwrap() {
            if student.training_outcome == Some(TrainingOutcome::Pass) {
                passed += 1;
            }
        }
    }
    assert_eq!(passed, 6);

    let stored = tx.find_batch(batch.batch_id).await.unwrap().unwrap();
    assert_eq!(stored.certificates_remaining, 0);
    assert_eq!(stored.status, BatchStatus::Exhausted);
    assert_eq!(tx.count_available_certificates(batch.batch_id).await.unwrap(), 0);
}

#[tokio::test]
async fn verification_is_recorded_on_the_student() {
    let app = TestApp::spawn().await;
    let session_id = open_session(&app, &app.instructor).await;
    let student_id = enroll(&app, session_id, "pat").await;

    app.state
        .sessions
        .record_verification(&app.instructor, student_id, &MatchResult::from_distance(0.3))
        .await
        .unwrap();

    let detail = app.state.sessions.session_detail(&app.instructor, session_id).await.unwrap();
    let student = &detail.students[0];
    assert!(student.verified);
    assert_eq!(student.match_score, Some(70.0));

    let stats = app.state.sessions.training_stats(&app.admin).await.unwrap();
    assert_eq!(stats.total_students, 1);
    assert_eq!(stats.verified_students, 1);
    assert_eq!(stats.students_today, 1);
    assert_eq!(stats.active_sessions, 1);
}

#[tokio::test]
async fn template_rejects_duplicate_task_ids() {
    let app = TestApp::spawn().await;
    let tasks = ["T1", "T1"]
        .iter()
        .map(|id| rider_training_backend::db::TemplateTask {
            task_id: id.to_string(),
            task_description: "Cornering".to_string(),
        })
        .collect();
    let err = app
        .state
        .sessions
        .replace_task_template(
            &app.admin,
            SESSION_TYPE,
            rider_training_backend::db::ReplaceTaskTemplate { tasks },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
}
