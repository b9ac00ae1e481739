//! Interactive identity: PKCE login through the local callback listener,
//! offline status, single-flight refresh and logout.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{RedirectingBrowser, Reply, ScriptedConfirm, TOKEN_PATH, TestEnv, identity_token, jwt};
use fabric_runtime::applications::ApplicationConfig;
use fabric_runtime::gateway::BearerSource;
use fabric_runtime::oauth::{
    FileTokenStore, IdentityToken, LoginOptions, LoginStatus, MemoryTokenStore, TokenStore,
};
use fabric_runtime::{ErrorKind, FabricContext};

fn session_context(env: &TestEnv, browser: Arc<RedirectingBrowser>) -> FabricContext {
    FabricContext::builder(env.config())
        .browser(browser)
        .confirm(ScriptedConfirm::new(true))
        .build()
        .unwrap()
}

fn seed(env: &TestEnv, token: &IdentityToken) {
    FileTokenStore::new(env.dir.path())
        .save_identity(token)
        .unwrap();
}

#[tokio::test]
async fn login_persists_token_and_reports_authenticated() {
    let env = TestEnv::new();
    let access = jwt(&json!({
        "sub": "user-42",
        "tenant_id": "acme",
        "preferred_username": "ada",
        "email": "ada@acme.test",
    }));
    let token_mock = env.server.mock(|when, then| {
        when.method(POST)
            .path(TOKEN_PATH)
            .body_includes("grant_type=authorization_code")
            .body_includes("code=auth-code-1")
            .body_includes("code_verifier=")
            .body_includes("client_id=afctl");
        then.status(200).json_body(json!({
            "access_token": access,
            "refresh_token": "refresh-1",
            "token_type": "Bearer",
            "expires_in": 3600,
        }));
    });

    let browser = RedirectingBrowser::new(Reply::Code("auth-code-1".into()));
    let ctx = session_context(&env, Arc::clone(&browser));

    let token = ctx
        .session()
        .login(&LoginOptions::default(), None)
        .await
        .unwrap();
    token_mock.assert_calls(1);
    assert_eq!(token.claims.user_id.as_deref(), Some("user-42"));
    assert_eq!(token.claims.name.as_deref(), Some("ada"));

    match ctx.session().status().unwrap() {
        LoginStatus::Authenticated { expires_at, claims } => {
            assert!(expires_at > Utc::now());
            assert_eq!(claims.tenant_id.as_deref(), Some("acme"));
        }
        other => panic!("expected authenticated, got {other:?}"),
    }

    let opened = browser.opened();
    assert_eq!(opened.len(), 1);
    let url = &opened[0];
    assert!(url.contains("/realms/agentic-fabric/protocol/openid-connect/auth?"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("code_challenge_method=S256"));
    assert!(url.contains("scope=openid+profile+email"));
    assert!(!url.contains("kc_idp_hint"));

    // Survives a fresh context
    let stored = FileTokenStore::new(env.dir.path())
        .load_identity()
        .unwrap()
        .unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert!(stored.token_endpoint.unwrap().ends_with(TOKEN_PATH));
}

#[tokio::test]
async fn tenant_hint_is_forwarded_to_the_idp() {
    let env = TestEnv::new();
    env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(200)
            .json_body(json!({"access_token": "opaque", "expires_in": 300}));
    });
    let browser = RedirectingBrowser::new(Reply::Code("c".into()));
    let ctx = session_context(&env, Arc::clone(&browser));

    let options = LoginOptions {
        tenant_hint: Some("acme-sso".into()),
        ..LoginOptions::default()
    };
    ctx.session().login(&options, None).await.unwrap();

    assert!(browser.opened()[0].contains("kc_idp_hint=acme-sso"));
}

#[tokio::test]
async fn idp_error_fails_login_without_token_exchange() {
    let env = TestEnv::new();
    let token_mock = env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(200)
            .json_body(json!({"access_token": "x", "expires_in": 300}));
    });
    let ctx = session_context(&env, RedirectingBrowser::new(Reply::Error("access_denied".into())));

    let err = ctx
        .session()
        .login(&LoginOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.to_string().contains("access_denied"));
    token_mock.assert_calls(0);
    assert_eq!(ctx.session().status().unwrap(), LoginStatus::Unauthenticated);
}

#[tokio::test]
async fn forged_state_is_rejected() {
    let env = TestEnv::new();
    let token_mock = env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(200)
            .json_body(json!({"access_token": "x", "expires_in": 300}));
    });
    let ctx = session_context(&env, RedirectingBrowser::new(Reply::ForgedState));

    let err = ctx
        .session()
        .login(&LoginOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    token_mock.assert_calls(0);
}

#[tokio::test]
async fn declined_relogin_keeps_the_current_token() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("current", Some("r"), Utc::now() + chrono::Duration::hours(1)),
    );
    let browser = RedirectingBrowser::new(Reply::Code("c".into()));
    let confirm = ScriptedConfirm::new(false);
    let ctx = FabricContext::builder(env.config())
        .browser(Arc::clone(&browser) as Arc<dyn fabric_runtime::interact::Browser>)
        .confirm(Arc::clone(&confirm) as Arc<dyn fabric_runtime::interact::Confirm>)
        .build()
        .unwrap();

    let err = ctx
        .session()
        .login(&LoginOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(confirm.prompts().len(), 1);
    assert!(browser.opened().is_empty());
    assert_eq!(ctx.session().token(true).unwrap(), "current");
}

#[tokio::test]
async fn status_distinguishes_expired_tokens_offline() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("old", None, Utc::now() - chrono::Duration::minutes(5)),
    );
    let ctx = env.context();

    match ctx.session().status().unwrap() {
        LoginStatus::Expired { refreshable, .. } => assert!(!refreshable),
        other => panic!("expected expired, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_refreshes_share_one_exchange() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("stale", Some("refresh-1"), Utc::now() - chrono::Duration::minutes(1)),
    );
    let refresh_mock = env.server.mock(|when, then| {
        when.method(POST)
            .path(TOKEN_PATH)
            .body_includes("grant_type=refresh_token")
            .body_includes("refresh_token=refresh-1");
        then.status(200)
            .delay(Duration::from_millis(200))
            .json_body(json!({"access_token": "fresh", "expires_in": 3600}));
    });
    let ctx = env.context();

    let session = ctx.session();
    let results = join_all((0..8).map(|_| session.refresh())).await;

    refresh_mock.assert_calls(1);
    for result in results {
        let token = result.unwrap();
        assert_eq!(token.access_token, "fresh");
        // Refresh responses without a new refresh token keep the old one
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
    }
    assert!(matches!(
        session.status().unwrap(),
        LoginStatus::Authenticated { .. }
    ));
}

#[tokio::test]
async fn refresh_without_refresh_token_fails() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("stale", None, Utc::now() - chrono::Duration::minutes(1)),
    );
    let ctx = env.context();

    let err = ctx.session().refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(matches!(err, fabric_runtime::Error::NoRefreshToken));
}

#[tokio::test]
async fn refresh_that_does_not_extend_expiry_is_rejected() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("current", Some("r"), Utc::now() + chrono::Duration::hours(2)),
    );
    env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(200)
            .json_body(json!({"access_token": "shorter", "expires_in": 60}));
    });
    let ctx = env.context();

    let err = ctx.session().refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(ctx.session().token(true).unwrap(), "current");
}

#[tokio::test]
async fn refresh_with_out_of_range_lifetime_keeps_the_old_token() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("stale", Some("r1"), Utc::now() - chrono::Duration::minutes(1)),
    );
    for lifetime in [json!(i64::MAX), json!(0)] {
        let mut refresh_mock = env.server.mock(|when, then| {
            when.method(POST).path(TOKEN_PATH);
            then.status(200)
                .json_body(json!({"access_token": "fresh", "expires_in": lifetime.clone()}));
        });
        let ctx = env.context();

        let err = ctx.session().refresh().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication, "expires_in {lifetime}");
        assert_eq!(ctx.session().token(true).unwrap(), "stale");
        refresh_mock.assert_calls(1);
        refresh_mock.delete();
    }
}

/// Hands out a stale copy on the first read, as if another caller finished
/// refreshing right after it was taken
struct StaleFirstRead {
    inner: MemoryTokenStore,
    stale: IdentityToken,
    served: AtomicBool,
}

impl TokenStore for StaleFirstRead {
    fn load_identity(&self) -> fabric_runtime::Result<Option<IdentityToken>> {
        if self.served.swap(true, Ordering::SeqCst) {
            self.inner.load_identity()
        } else {
            Ok(Some(self.stale.clone()))
        }
    }

    fn save_identity(&self, token: &IdentityToken) -> fabric_runtime::Result<()> {
        self.inner.save_identity(token)
    }

    fn clear_identity(&self) -> fabric_runtime::Result<bool> {
        self.inner.clear_identity()
    }

    fn load_application(&self, app_id: &str) -> fabric_runtime::Result<Option<ApplicationConfig>> {
        self.inner.load_application(app_id)
    }

    fn save_application(&self, config: &ApplicationConfig) -> fabric_runtime::Result<()> {
        self.inner.save_application(config)
    }

    fn list_applications(&self) -> fabric_runtime::Result<Vec<ApplicationConfig>> {
        self.inner.list_applications()
    }

    fn delete_application(&self, app_id: &str) -> fabric_runtime::Result<bool> {
        self.inner.delete_application(app_id)
    }
}

#[tokio::test]
async fn bearer_reuses_a_token_refreshed_by_another_caller() {
    let env = TestEnv::new();
    let inner = MemoryTokenStore::new();
    inner
        .save_identity(&identity_token(
            "fresh",
            Some("r2"),
            Utc::now() + chrono::Duration::hours(1),
        ))
        .unwrap();
    let store = Arc::new(StaleFirstRead {
        inner,
        stale: identity_token("stale", Some("r1"), Utc::now() - chrono::Duration::minutes(1)),
        served: AtomicBool::new(false),
    });
    let refresh_mock = env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(200)
            .json_body(json!({"access_token": "second", "expires_in": 3600}));
    });
    let ctx = FabricContext::builder(env.config())
        .token_store(store)
        .build()
        .unwrap();

    assert_eq!(ctx.bearer().bearer().await.unwrap(), "fresh");
    refresh_mock.assert_calls(0);
}

#[tokio::test]
async fn rejected_refresh_token_surfaces_as_authentication() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("stale", Some("revoked"), Utc::now() - chrono::Duration::minutes(1)),
    );
    let refresh_mock = env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(400).json_body(json!({
            "error": "invalid_grant",
            "error_description": "Token is not active",
        }));
    });
    let ctx = env.context();

    let err = ctx.session().refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(err.to_string().contains("Token is not active"));
    // 4xx is never retried
    refresh_mock.assert_calls(1);
}

#[tokio::test]
async fn bearer_refreshes_an_expired_session() {
    let env = TestEnv::new();
    seed(
        &env,
        &identity_token("stale", Some("refresh-1"), Utc::now() - chrono::Duration::minutes(1)),
    );
    env.server.mock(|when, then| {
        when.method(POST).path(TOKEN_PATH);
        then.status(200)
            .json_body(json!({"access_token": "fresh", "expires_in": 3600}));
    });
    let ctx = FabricContext::builder(env.config()).build().unwrap();

    let bearer = ctx.bearer();
    assert_eq!(bearer.bearer().await.unwrap(), "fresh");
    // Now valid: no further exchange needed
    assert_eq!(bearer.bearer().await.unwrap(), "fresh");
}

#[tokio::test]
async fn logout_is_idempotent_and_masks_are_applied() {
    let env = TestEnv::new();
    let long = "eyJhbGciOiJSUzI1NiJ9.payload-part-that-is-long.signature-xyz";
    seed(
        &env,
        &identity_token(long, Some("r"), Utc::now() + chrono::Duration::hours(1)),
    );
    let ctx = env.context();

    let masked = ctx.session().token(false).unwrap();
    assert_ne!(masked, long);
    assert!(masked.starts_with(&long[..12]));
    assert!(masked.ends_with(&long[long.len() - 6..]));

    assert!(ctx.session().logout().unwrap());
    assert!(!ctx.session().logout().unwrap());
    assert_eq!(
        ctx.session().token(false).unwrap_err().kind(),
        ErrorKind::Authentication
    );
}
