use std::rc::Rc;

use auth_client::{AuthClient, MemoryStore, TimeSource};
use jiff::ToSpan;
use test_helpers::{SessionOutcome, alice, bob, spawn_app};

#[tokio::test]
async fn load_session_populates_the_cache() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());

    let user = app.client.load_session().await;

    assert_eq!(user, Some(alice()));
    assert_eq!(app.client.session_cache.get(), Some(alice()));
    assert_eq!(app.state.session_hits(), 1);

    Ok(())
}

#[tokio::test]
async fn session_reads_through_the_cache() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());

    assert_eq!(app.client.session().await, Some(alice()));
    assert_eq!(app.client.session().await, Some(alice()));
    assert_eq!(app.state.session_hits(), 1);

    // Once the entry expires, the next read goes back to the server.
    app.time_source.advance(5.minutes());
    assert_eq!(app.client.session().await, Some(alice()));
    assert_eq!(app.state.session_hits(), 2);

    Ok(())
}

#[tokio::test]
async fn unauthorized_clears_the_cache() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());
    app.client.load_session().await;

    app.state.serve_session(SessionOutcome::Unauthorized);
    assert_eq!(app.client.load_session().await, None);
    assert_eq!(app.client.session_cache.get(), None);

    Ok(())
}

#[tokio::test]
async fn empty_session_clears_the_cache() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());
    app.client.load_session().await;

    app.state.serve_session(SessionOutcome::Empty);
    assert_eq!(app.client.load_session().await, None);
    assert_eq!(app.client.session_cache.get(), None);

    Ok(())
}

#[tokio::test]
async fn server_errors_leave_the_cache_alone() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());
    app.client.load_session().await;

    app.state.serve_session(SessionOutcome::ServerError);
    assert_eq!(app.client.load_session().await, None);
    assert_eq!(app.client.session_cache.get(), Some(alice()));

    Ok(())
}

#[tokio::test]
async fn network_failure_leaves_the_cache_alone() -> anyhow::Result<()> {
    // Nothing listens on the discard port; every request fails outright.
    let client = AuthClient::new(
        "http://127.0.0.1:9".into(),
        reqwest::Client::new(),
        Rc::new(MemoryStore::new()),
        TimeSource::new("2025-01-01T00:00:00Z".parse()?),
    );
    client.session_cache.set(alice());

    assert_eq!(client.load_session().await, None);
    assert_eq!(client.session_cache.get(), Some(alice()));

    Ok(())
}

#[tokio::test]
async fn refresh_always_hits_the_server() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(bob());
    app.client.load_session().await;
    assert_eq!(app.state.session_hits(), 1);

    app.state.serve_user(alice());
    assert_eq!(app.client.refresh_session().await, Some(alice()));
    assert_eq!(app.state.session_hits(), 2);
    assert_eq!(app.client.session_cache.get(), Some(alice()));

    Ok(())
}

#[tokio::test]
async fn refresh_clears_the_cache_before_fetching() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());
    app.client.load_session().await;

    // The forced round-trip fails; the stale entry must already be gone.
    app.state.serve_session(SessionOutcome::ServerError);
    assert_eq!(app.client.refresh_session().await, None);
    assert_eq!(app.client.session_cache.get(), None);

    Ok(())
}

#[tokio::test]
async fn concurrent_loads_are_not_coalesced() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_user(alice());

    let (first, second) = futures::join!(
        app.client.load_session(),
        app.client.load_session()
    );

    assert_eq!(first, Some(alice()));
    assert_eq!(second, Some(alice()));
    assert_eq!(app.state.session_hits(), 2);

    Ok(())
}
