use super::*;
use axum::extract::FromRequestParts;
use axum::http::{HeaderValue, Request};
use crate::state::test_helpers::{seed_user, test_app};

fn headers(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
    headers
}

#[test]
fn bearer_token_parses_scheme_case_insensitively() {
    assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
    assert_eq!(bearer_token(&headers("bearer  abc ")), Some("abc"));
}

#[test]
fn bearer_token_rejects_other_schemes_and_blanks() {
    assert_eq!(bearer_token(&HeaderMap::new()), None);
    assert_eq!(bearer_token(&headers("Basic abc")), None);
    assert_eq!(bearer_token(&headers("Bearer")), None);
    assert_eq!(bearer_token(&headers("Bearer   ")), None);
}

async fn extract(state: &AppState, authorization: Option<&str>) -> Result<AuthUser, StatusCode> {
    let mut builder = Request::builder().uri("/api/auth/me");
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    let (mut parts, ()) = builder.body(()).unwrap().into_parts();
    AuthUser::from_request_parts(&mut parts, state).await
}

#[tokio::test]
async fn extractor_resolves_issued_token() {
    let app = test_app();
    let (account, token) = seed_user(&app, "me@x.test").await;

    let auth = extract(&app.state, Some(&format!("Bearer {token}"))).await.unwrap();
    assert_eq!(auth.account, account);

    let Json(me) = me(auth).await;
    assert_eq!(me.email, "me@x.test");
}

#[tokio::test]
async fn extractor_rejects_missing_or_unknown_token() {
    let app = test_app();
    assert!(matches!(extract(&app.state, None).await, Err(StatusCode::UNAUTHORIZED)));
    assert!(matches!(extract(&app.state, Some("Bearer nope")).await, Err(StatusCode::UNAUTHORIZED)));
}

#[test]
fn auth_error_to_status_maps_variants() {
    assert_eq!(auth_error_to_status(&AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED);
    assert_eq!(auth_error_to_status(&AuthError::InvalidInput("email")), StatusCode::BAD_REQUEST);
    assert_eq!(auth_error_to_status(&AuthError::EmailTaken("a@x.test".into())), StatusCode::CONFLICT);
    assert_eq!(auth_error_to_status(&AuthError::AccountNotFound), StatusCode::NOT_FOUND);
    assert_eq!(auth_error_to_status(&AuthError::Hash("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn extractor_keeps_presented_token() {
    let app = test_app();
    let (_account, token) = seed_user(&app, "me@x.test").await;
    let auth = extract(&app.state, Some(&format!("Bearer {token}"))).await.unwrap();
    assert_eq!(auth.token, token);
}

fn sign_up_body(email: &str) -> Json<SignUpBody> {
    Json(SignUpBody { name: Some("Ada".into()), email: email.into(), password: "longenough".into() })
}

#[tokio::test]
async fn sign_up_login_and_logout_flow() {
    let app = test_app();

    let (status, Json(signed_up)) = sign_up(State(app.state.clone()), sign_up_body("ada@x.test")).await.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(signed_up.account.name, "Ada");

    let Json(logged_in) = login(
        State(app.state.clone()),
        Json(LoginBody { email: "ada@x.test".into(), password: "longenough".into() }),
    )
    .await
    .unwrap();
    assert_eq!(app.backend.session_count().await, 2);

    let auth = extract(&app.state, Some(&format!("Bearer {}", logged_in.token))).await.unwrap();
    assert_eq!(logout(State(app.state.clone()), auth).await.unwrap(), StatusCode::NO_CONTENT);
    assert!(matches!(
        extract(&app.state, Some(&format!("Bearer {}", logged_in.token))).await,
        Err(StatusCode::UNAUTHORIZED)
    ));
    assert!(extract(&app.state, Some(&format!("Bearer {}", signed_up.token))).await.is_ok());
}

#[tokio::test]
async fn duplicate_sign_up_is_conflict() {
    let app = test_app();
    sign_up(State(app.state.clone()), sign_up_body("ada@x.test")).await.unwrap();
    let err = sign_up(State(app.state.clone()), sign_up_body("Ada@X.test")).await.unwrap_err();
    assert_eq!(err.status, StatusCode::CONFLICT);
    assert_eq!(err.code, "E_EMAIL_TAKEN");
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = test_app();
    sign_up(State(app.state.clone()), sign_up_body("ada@x.test")).await.unwrap();
    let err = login(
        State(app.state.clone()),
        Json(LoginBody { email: "ada@x.test".into(), password: "not it at all".into() }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    assert!(!err.retryable);
}

#[tokio::test]
async fn update_me_renames_current_account() {
    let app = test_app();
    let (_status, Json(session)) = sign_up(State(app.state.clone()), sign_up_body("ada@x.test")).await.unwrap();
    let auth = extract(&app.state, Some(&format!("Bearer {}", session.token))).await.unwrap();

    let Json(updated) = update_me(
        State(app.state.clone()),
        auth,
        Json(UpdateMeBody { name: Some("Countess".into()), email: None }),
    )
    .await
    .unwrap();
    assert_eq!(updated.name, "Countess");

    let auth = extract(&app.state, Some(&format!("Bearer {}", session.token))).await.unwrap();
    let Json(me) = me(auth).await;
    assert_eq!(me.name, "Countess");
}
