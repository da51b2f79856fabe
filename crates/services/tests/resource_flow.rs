use std::sync::Arc;

use learnhub_core::model::{BackendSettings, CourseId, ResourceCatalog, ResourceId, UserId};
use learnhub_core::time::fixed_now;
use services::error::ResourceError;
use services::{AppServices, Clock, SessionUser};
use storage::content::StaticContentSource;
use storage::preferences::InMemoryPreferences;
use storage::{InMemoryRepository, Storage};

const CATALOG: &str = r#"{"resources":[
    {"id":"quick-reference","title":"Cheat sheet","type":"reference","path":"resources/cheat-sheet.json","featured":true},
    {"id":"official-docs","title":"Official docs","type":"links","path":"resources/links.json","tags":["docs"]},
    {"id":"terminology","title":"Glossary","type":"reference","description":"Terms used across the course"}
]}"#;

fn course() -> CourseId {
    CourseId::new("claude-code-training")
}

fn setup() -> (AppServices, InMemoryRepository) {
    let repo = InMemoryRepository::new();
    let catalog: ResourceCatalog = serde_json::from_str(CATALOG).unwrap();
    repo.register_resources(course(), &catalog).unwrap();

    let content = StaticContentSource::new()
        .with("data/software-dev/claude-code-training/resources.json", CATALOG)
        .with(
            "data/software-dev/claude-code-training/resources/links.json",
            r#"{"links":[{"title":"Docs","url":"https://docs.anthropic.com"}]}"#,
        );
    let app = AppServices::from_parts(
        Storage::from_in_memory(repo.clone()),
        Arc::new(InMemoryPreferences::new()),
        Arc::new(content),
        BackendSettings::default(),
        Clock::fixed(fixed_now()),
    );
    (app, repo)
}

fn sign_in(app: &AppServices) -> UserId {
    let user = UserId::random();
    app.sign_in(SessionUser::new(user, "learner@example.com"), None);
    user
}

#[tokio::test]
async fn signed_out_listing_has_no_user_state() {
    let (app, _) = setup();
    let resources = app.resources();

    let entries = resources.load_course_resources(&course()).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| !e.is_favorited && e.view_count == 0));

    assert!(resources.recently_viewed(10).await.unwrap().is_empty());
    assert!(resources.favorite_resources().await.unwrap().is_empty());
    assert!(matches!(
        resources
            .toggle_favorite(&course(), &ResourceId::new("terminology"))
            .await,
        Err(ResourceError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn favorites_merge_into_the_course_listing() {
    let (app, _) = setup();
    sign_in(&app);
    let resources = app.resources();
    let glossary = ResourceId::new("terminology");

    assert!(resources.toggle_favorite(&course(), &glossary).await.unwrap());
    let entries = resources.load_course_resources(&course()).await.unwrap();
    let favorited: Vec<_> = entries
        .iter()
        .filter(|e| e.is_favorited)
        .map(|e| e.resource.id.to_string())
        .collect();
    assert_eq!(favorited, ["terminology"]);

    let favorites = resources.favorite_resources().await.unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].resource.title, "Glossary");

    assert!(!resources.toggle_favorite(&course(), &glossary).await.unwrap());
    assert!(resources.favorite_resources().await.unwrap().is_empty());
}

#[tokio::test]
async fn opening_a_known_document_counts_one_view() {
    let (app, _) = setup();
    sign_in(&app);
    let resources = app.resources();
    let docs = ResourceId::new("official-docs");

    let document = resources
        .load_resource_content(&course(), "resources/links.json", &docs)
        .await
        .unwrap();
    assert_eq!(document["links"][0]["title"], "Docs");

    // Cached; no second view.
    resources
        .load_resource_content(&course(), "resources/links.json", &docs)
        .await
        .unwrap();

    let stats = resources.resource_analytics(&course()).await.unwrap();
    assert_eq!(stats[&docs].total_views, 1);
    assert_eq!(stats[&docs].unique_viewers, 1);

    let recent = resources.recently_viewed(5).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].resource.id, docs);
    assert_eq!(recent[0].view_count, 1);
}

#[tokio::test]
async fn view_counts_accumulate_per_user() {
    let (app, _) = setup();
    sign_in(&app);
    let resources = app.resources();
    let sheet = ResourceId::new("quick-reference");

    assert_eq!(resources.track_view(&course(), &sheet).await.unwrap(), 1);
    assert_eq!(resources.track_view(&course(), &sheet).await.unwrap(), 2);

    app.sign_out();
    sign_in(&app);
    assert_eq!(resources.track_view(&course(), &sheet).await.unwrap(), 1);

    let stats = resources.resource_analytics(&course()).await.unwrap();
    assert_eq!(stats[&sheet].total_views, 3);
    assert_eq!(stats[&sheet].unique_viewers, 2);

    let popular = resources.popular_resources(1).await.unwrap();
    assert_eq!(popular.len(), 1);
    assert_eq!(popular[0].resource_id, sheet);
    assert_eq!(popular[0].title, "Cheat sheet");
}

#[tokio::test]
async fn missing_documents_are_not_found() {
    let (app, _) = setup();
    let resources = app.resources();
    assert!(matches!(
        resources
            .load_resource_content(&course(), "resources/nope.json", &ResourceId::new("nope"))
            .await,
        Err(ResourceError::NotFound)
    ));
    assert!(matches!(
        resources.course_catalog(&CourseId::new("unknown")).await,
        Err(ResourceError::NotFound)
    ));
}

#[tokio::test]
async fn search_ranks_title_matches_first() {
    let (app, _) = setup();
    let resources = app.resources();

    assert!(resources.search_resources("   ", None, None).await.unwrap().is_empty());

    let hits = resources.search_resources("docs", None, None).await.unwrap();
    assert_eq!(hits[0].resource_id, ResourceId::new("official-docs"));

    let terms = resources
        .search_resources("terms", Some(&course()), Some("reference"))
        .await
        .unwrap();
    assert_eq!(terms.len(), 1);
    assert_eq!(terms[0].resource_id, ResourceId::new("terminology"));
}
