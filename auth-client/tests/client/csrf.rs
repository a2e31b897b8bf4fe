use auth_client::TokenAcquisitionError;
use futures::future::join_all;
use test_helpers::{CsrfOutcome, spawn_app};

#[tokio::test]
async fn concurrent_callers_coalesce_into_one_request() -> anyhow::Result<()>
{
    let app = spawn_app().await;

    let tokens =
        join_all((0..5).map(|_| app.client.csrf.token(false))).await;

    for token in tokens {
        assert_eq!(token?, "csrf-token-1");
    }
    assert_eq!(app.state.csrf_hits(), 1);

    Ok(())
}

#[tokio::test]
async fn memoized_token_is_reused() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.client.csrf.token(false).await?;
    app.client.csrf.token(false).await?;
    assert_eq!(app.state.csrf_hits(), 1);

    Ok(())
}

#[tokio::test]
async fn invalidate_drops_the_memoized_token() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.client.csrf.token(false).await?;
    app.client.csrf.invalidate();
    app.state.rotate_token("csrf-token-2");

    let token = app.client.csrf.token(false).await?;
    assert_eq!(token, "csrf-token-2");
    assert_eq!(app.state.csrf_hits(), 2);

    Ok(())
}

#[tokio::test]
async fn force_refresh_bypasses_the_memoized_token() -> anyhow::Result<()> {
    let app = spawn_app().await;

    app.client.csrf.token(false).await?;
    app.state.rotate_token("csrf-token-2");

    // Not forced: the memoized token, no extra request.
    assert_eq!(app.client.csrf.token(false).await?, "csrf-token-1");
    assert_eq!(app.state.csrf_hits(), 1);

    // Forced: a fresh request observes the rotated token.
    assert_eq!(app.client.csrf.token(true).await?, "csrf-token-2");
    assert_eq!(app.state.csrf_hits(), 2);

    Ok(())
}

#[tokio::test]
async fn coalesced_callers_observe_the_same_failure() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_csrf(CsrfOutcome::ServerError);

    let results =
        join_all((0..3).map(|_| app.client.csrf.token(false))).await;

    for result in results {
        match result {
            Err(TokenAcquisitionError::Endpoint(status)) => {
                assert_eq!(status.as_u16(), 500);
            }
            other => panic!("expected endpoint error, got {other:?}"),
        }
    }
    assert_eq!(app.state.csrf_hits(), 1);

    // The slot is freed on settlement; the next call starts over.
    app.state.serve_csrf(CsrfOutcome::Token);
    assert_eq!(app.client.csrf.token(false).await?, "csrf-token-1");
    assert_eq!(app.state.csrf_hits(), 2);

    Ok(())
}

#[tokio::test]
async fn missing_token_field_is_an_error() -> anyhow::Result<()> {
    let app = spawn_app().await;
    app.state.serve_csrf(CsrfOutcome::MissingField);

    let result = app.client.csrf.token(false).await;
    assert!(matches!(result, Err(TokenAcquisitionError::MissingToken)));

    Ok(())
}
