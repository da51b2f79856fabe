use std::sync::Arc;

use learnhub_core::model::{
    BackendSettings, ModuleId, Profile, ProgressScope, QuizAnswer, UserId,
};
use learnhub_core::time::fixed_now;
use services::error::AdminError;
use services::{AppServices, Clock, SessionUser};
use storage::content::StaticContentSource;
use storage::preferences::InMemoryPreferences;
use storage::{InMemoryRepository, Storage};

fn profile(email: &str, is_admin: bool, minutes: i64) -> Profile {
    Profile {
        id: UserId::random(),
        email: email.into(),
        full_name: Some(format!("{email} name")),
        avatar_url: None,
        is_admin,
        created_at: fixed_now() + chrono::Duration::minutes(minutes),
        updated_at: None,
    }
}

fn setup() -> (AppServices, InMemoryRepository) {
    let repo = InMemoryRepository::new();
    let app = AppServices::from_parts(
        Storage::from_in_memory(repo.clone()),
        Arc::new(InMemoryPreferences::new()),
        Arc::new(StaticContentSource::new()),
        BackendSettings::default(),
        Clock::fixed(fixed_now()),
    );
    (app, repo)
}

#[tokio::test]
async fn non_admins_are_refused() {
    let (app, repo) = setup();
    let learner = profile("learner@example.com", false, 0);
    repo.put_profile(learner.clone()).unwrap();
    app.sign_in(SessionUser::new(learner.id, learner.email.clone()), None);

    let admin = app.admin();
    assert!(!admin.check_admin_status().await);
    assert!(matches!(
        admin.load_all_users().await,
        Err(AdminError::AccessDenied)
    ));
    assert!(matches!(admin.export_users_csv(), Err(AdminError::AccessDenied)));
}

#[tokio::test]
async fn signed_out_admin_check_is_false() {
    let (app, _) = setup();
    assert!(!app.admin().check_admin_status().await);
    assert!(matches!(
        app.admin().load_all_users().await,
        Err(AdminError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn admins_see_every_learner() {
    let (app, repo) = setup();
    let boss = profile("boss@example.com", true, 0);
    let learner = profile("learner@example.com", false, 5);
    repo.put_profile(boss.clone()).unwrap();
    repo.put_profile(learner.clone()).unwrap();

    let progress = app.aggregator_for(learner.id, ProgressScope::Global);
    let intro = ModuleId::new("1");
    assert!(progress.update_module_progress(&intro, 2).await.is_committed());
    let saved = progress
        .save_quiz_score(&intro, 4, 5, &[QuizAnswer::new(1, true)], None)
        .await
        .into_result()
        .unwrap();
    assert!(saved.module_completed);

    app.sign_in(SessionUser::new(boss.id, boss.email.clone()), None);
    let admin = app.admin();
    assert!(admin.check_admin_status().await);

    let users = admin.load_all_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].email, "learner@example.com");
    assert_eq!(users[0].modules_completed(), 1);
    assert_eq!(users[0].quizzes_passed(), 1);
    assert!(users[1].modules.is_empty());
    assert_eq!(admin.last_updated(), Some(fixed_now()));

    let analytics = admin.analytics();
    assert_eq!(analytics.total_users, 2);
    assert_eq!(analytics.quizzes_taken, 1);

    let csv = admin.export_users_csv().unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.lines().nth(1).unwrap().starts_with("learner@example.com,"));

    let json: serde_json::Value = serde_json::from_str(&admin.export_progress_json().unwrap()).unwrap();
    assert_eq!(json["totalUsers"], 2);

    let detail = admin.user_progress(learner.id).await.unwrap();
    assert_eq!(detail.quiz_attempts.len(), 1);
    assert_eq!(detail.quiz_attempts[0].answers.len(), 1);
    assert_eq!(detail.sections.len(), 1);

    assert!(matches!(
        admin.user_progress(UserId::random()).await,
        Err(AdminError::NotFound)
    ));

    let (csv_name, json_name) = admin.export_file_names();
    assert!(csv_name.ends_with(".csv"));
    assert!(json_name.ends_with(".json"));
}
