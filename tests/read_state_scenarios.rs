//! End-to-end read-state scenarios against the in-memory backend

use std::sync::Arc;

use readmark_sync::backend::{ListRpcMode, MockConnectionFactory, MockServer};
use readmark_sync::{
    ApiError, BackendConfig, ClientSettings, ConnectionCache, JsonFileStore, MemoryStore,
    ReadStateClient, ToggleOutcome,
};

struct Harness {
    client: ReadStateClient,
    factory: Arc<MockConnectionFactory>,
    server: Arc<MockServer>,
}

async fn harness() -> Harness {
    let server = Arc::new(MockServer::new());
    let factory = Arc::new(MockConnectionFactory::new(server.clone()));
    let client = ReadStateClient::with_store(Arc::new(MemoryStore::new()), factory.clone());
    client
        .configure(&BackendConfig::new("https://proj.example.co", "anon"))
        .await
        .unwrap();
    Harness {
        client,
        factory,
        server,
    }
}

#[tokio::test]
async fn test_toggle_then_lookup_with_equivalent_url() {
    let h = harness().await;

    let outcome = h
        .client
        .toggle_read_for_url("https://EXAMPLE.com/a/", Some("Article A"))
        .await
        .unwrap();
    assert_eq!(outcome.status(), Some("read"));

    let lookup = h
        .client
        .get_status_for_url("https://example.com/a")
        .await
        .unwrap();
    assert_eq!(lookup.status.as_deref(), Some("read"));
    assert!(!lookup.auth_error);

    let records = h.server.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].url, "https://example.com/a");
    assert_eq!(records[0].domain, "example.com");
}

#[tokio::test]
async fn test_toggle_cycles_read_and_unread() {
    let h = harness().await;
    let url = "https://example.com/post?utm_source=feed";

    let first = h.client.toggle_read_for_url(url, None).await.unwrap();
    let second = h.client.toggle_read_for_url(url, None).await.unwrap();
    assert_eq!(first.status(), Some("read"));
    assert_eq!(second.status(), Some("unread"));

    let page = h.client.list_recent("", 1, 10).await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].status, "unread");
}

#[tokio::test]
async fn test_recent_listing_is_newest_first_and_paged() {
    let h = harness().await;
    for i in 0..5 {
        let url = format!("https://site{i}.example.com/");
        let title = format!("Post {i}");
        h.client.toggle_read_for_url(&url, Some(&title)).await.unwrap();
    }

    let first = h.client.list_recent("", 1, 2).await;
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.items[0].title.as_deref(), Some("Post 4"));

    let last = h.client.list_recent("", 3, 2).await;
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more);
    assert_eq!(last.items[0].title.as_deref(), Some("Post 0"));

    // Same pages through the table fallback
    h.server.set_list_rpc(ListRpcMode::Missing);
    let fallback = h.client.list_recent("", 1, 2).await;
    assert_eq!(fallback, first);
}

#[tokio::test]
async fn test_rejected_credentials_surface_as_auth_errors() {
    let h = harness().await;
    h.server.reject_credentials();

    let page = h.client.list_recent("", 1, 10).await;
    assert!(page.auth_error);
    assert!(page.items.is_empty());
    // The fallback query is not attempted after an auth failure
    assert_eq!(h.server.select_calls(), 0);

    let lookup = h
        .client
        .get_status_for_url("https://example.com/")
        .await
        .unwrap();
    assert!(lookup.auth_error);
    assert_eq!(lookup.status, None);

    let outcome = h
        .client
        .toggle_read_for_url("https://example.com/", None)
        .await
        .unwrap();
    assert_eq!(outcome, ToggleOutcome::AuthError);
}

#[tokio::test]
async fn test_forbidden_is_not_an_auth_error() {
    let h = harness().await;
    h.server
        .fail_with(Some(ApiError::new(Some(403), "permission denied for table read_records")));

    let outcome = h
        .client
        .toggle_read_for_url("https://example.com/", None)
        .await
        .unwrap();
    assert_eq!(outcome, ToggleOutcome::Failed);

    let page = h.client.list_recent("", 1, 10).await;
    assert!(!page.auth_error);
}

#[tokio::test]
async fn test_reconfigure_rebinds_connection() {
    let h = harness().await;
    assert!(h.client.test_connection().await);
    assert!(h.client.test_connection().await);
    assert_eq!(h.factory.connect_count(), 1);

    h.client
        .configure(&BackendConfig::new("https://other.example.co", "anon-2"))
        .await
        .unwrap();
    assert!(h.client.test_connection().await);
    assert_eq!(h.factory.connect_count(), 2);
    assert_eq!(
        h.factory.last_options().unwrap().url,
        "https://other.example.co"
    );

    h.client.configure(&BackendConfig::default()).await.unwrap();
    assert!(!h.client.test_connection().await);
    assert_eq!(
        h.client.toggle_read_for_url("https://example.com/", None).await.unwrap(),
        ToggleOutcome::Failed
    );
}

#[tokio::test]
async fn test_session_survives_a_new_client_on_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("readmark.json");
    let server = Arc::new(MockServer::new());
    server.add_user("reader@example.com", "hunter2");

    let open = |server: Arc<MockServer>| {
        let cache = ConnectionCache::new(
            Arc::new(JsonFileStore::new(&path)),
            Arc::new(MockConnectionFactory::new(server)),
        );
        ReadStateClient::new(Arc::new(cache), ClientSettings::default())
    };

    let first = open(server.clone());
    first
        .configure(&BackendConfig::new("https://proj.example.co", "anon").with_privacy(true))
        .await
        .unwrap();
    assert!(first
        .sign_in_with_password("reader@example.com", "hunter2")
        .await
        .is_ok());

    let second = open(server.clone());
    assert!(second.config().await.unwrap().privacy);
    let user = second.get_user().await.unwrap();
    assert_eq!(user.email.as_deref(), Some("reader@example.com"));

    second.sign_out().await;
    assert!(open(server).get_user().await.is_none());
}
