//! End-to-end flow over real sockets: dev-mode login, authenticated
//! forwarding with the session header, backend directives, session
//! management, logout.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::{Value, json};
use wru_auth::idp::{DebugProvider, IdpRegistry};
use wru_auth::register::IdentityRegister;
use wru_auth::{Clock, FederatedAccount, ProviderKind, SessionStore, UserRecord};
use wru_server::client_info::NoGeoIp;
use wru_server::config::{CookieMode, parse_forward_table};
use wru_server::{AppState, ServerConfig, build_app};
use wru_storage::MemoryDocumentStore;

/// Echoes the injected session header back as JSON and emits a directive.
async fn echo(headers: HeaderMap) -> impl IntoResponse {
    let session: Value = headers
        .get("Wru-Session")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_str(v).ok())
        .unwrap_or(Value::Null);
    (
        [("Wru-Set-Session-Data", "greeting=hello")],
        Json(json!({ "session": session })),
    )
}

async fn spawn_backend() -> String {
    let app = axum::Router::new().route("/app/echo", get(echo));
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind backend");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn spawn_proxy(backend: &str) -> String {
    let forward = parse_forward_table(&format!(
        "/app => {backend} (login); /admin => {backend} (billing)"
    ))
    .expect("forward table");

    let config = ServerConfig {
        port: 0,
        host: "http://localhost".into(),
        dev_mode: true,
        tls_cert: None,
        tls_key: None,
        forward_to: forward,
        default_landing_page: "/app/echo".into(),
        session_storage: String::new(),
        server_session_header: "Wru-Session".into(),
        cookie_name: "WRU_SESSION".into(),
        cookie_mode: CookieMode::Cookie,
        user_table: None,
        user_table_reload: None,
        timeouts: Default::default(),
        twitter: Default::default(),
        github: Default::default(),
        oidc: Default::default(),
        geoip_database: None,
    };

    let clock = Clock::system();
    let sessions = Arc::new(SessionStore::new(
        Arc::new(MemoryDocumentStore::new()),
        clock.clone(),
        config.timeouts,
    ));
    let register = Arc::new(IdentityRegister::from_users(vec![UserRecord {
        user_id: "u1".into(),
        display_name: "User One".into(),
        email: "u1@example.com".into(),
        organization: "R&D".into(),
        scopes: vec!["login".into()],
        federated_accounts: vec![FederatedAccount {
            provider: ProviderKind::GitHub,
            account: "octo1".into(),
        }],
    }]));
    let mut idps = IdpRegistry::new();
    idps.register(Arc::new(DebugProvider::new()));

    let state = AppState {
        config: Arc::new(config),
        clock,
        sessions,
        register,
        idps: Arc::new(idps),
        geo: Arc::new(NoGeoIp),
        http: reqwest::Client::new(),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind proxy");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Extracts the session cookie value from a Set-Cookie header.
fn session_cookie_value(response: &reqwest::Response) -> Option<String> {
    let header = response.headers().get(reqwest::header::SET_COOKIE)?;
    let text = header.to_str().ok()?;
    let (name_value, _) = text.split_once(';')?;
    let (name, value) = name_value.split_once('=')?;
    (name == "WRU_SESSION").then(|| value.to_string())
}

#[tokio::test]
async fn full_login_and_forward_flow() {
    let backend = spawn_backend().await;
    let proxy = spawn_proxy(&backend).await;
    let client = client();

    // 1. Anonymous request starts a pre-login session and bounces to login.
    let response = client
        .get(format!("{proxy}/app/echo"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "/.wru/login"
    );
    let pre_sid = session_cookie_value(&response).expect("pre-login cookie");

    // 2. The login chooser renders the dev form.
    let response = client
        .get(format!("{proxy}/.wru/login"))
        .header("cookie", format!("WRU_SESSION={pre_sid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let page = response.text().await.unwrap();
    assert!(page.contains("Debug sign in"));
    assert!(page.contains("u1"));

    // 3. Debug login rotates the token and redirects to the remembered URL.
    let response = client
        .post(format!("{proxy}/.wru/login"))
        .header("cookie", format!("WRU_SESSION={pre_sid}"))
        .form(&[("userid", "u1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers().get("location").unwrap(), "/app/echo");
    let sid = session_cookie_value(&response).expect("active cookie");
    assert_ne!(sid, pre_sid);

    // 4. The forwarded request carries the session descriptor; the directive
    //    header never reaches the client.
    let response = client
        .get(format!("{proxy}/app/echo"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("Wru-Set-Session-Data").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["session"]["id"], "u1");
    assert_eq!(body["session"]["name"], "User One");
    assert_eq!(body["session"]["scopes"][0], "login");

    // 5. The backend's directive is visible on the next forwarded request.
    let response = client
        .get(format!("{proxy}/app/echo"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["session"]["data"]["greeting"], "hello");

    // 6. Scope enforcement rejects routes the user has no scope for.
    let response = client
        .get(format!("{proxy}/admin"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // 7. Unrouted paths are a JSON 404.
    let response = client
        .get(format!("{proxy}/nowhere"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "not found");

    // 8. Profile and session list endpoints answer JSON when asked.
    let response = client
        .get(format!("{proxy}/.wru/user"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["email"], "u1@example.com");

    let response = client
        .get(format!("{proxy}/.wru/user/sessions"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["current"], true);
    assert_eq!(sessions[0]["id"], sid);

    // 9. Logout invalidates the token; the next request starts over.
    let response = client
        .get(format!("{proxy}/.wru/logout"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let removal = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(removal.starts_with("WRU_SESSION=;"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let response = client
        .get(format!("{proxy}/app/echo"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers().get("location").unwrap(), "/.wru/login");
}

#[tokio::test]
async fn favicon_probe_gets_404_without_session() {
    let backend = spawn_backend().await;
    let proxy = spawn_proxy(&backend).await;

    let response = client()
        .get(format!("{proxy}/favicon.ico"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert!(session_cookie_value(&response).is_none());
}

#[tokio::test]
async fn active_session_is_bounced_away_from_login() {
    let backend = spawn_backend().await;
    let proxy = spawn_proxy(&backend).await;
    let client = client();

    let response = client
        .get(format!("{proxy}/app/echo"))
        .send()
        .await
        .unwrap();
    let pre_sid = session_cookie_value(&response).unwrap();

    let response = client
        .post(format!("{proxy}/.wru/login"))
        .header("cookie", format!("WRU_SESSION={pre_sid}"))
        .form(&[("userid", "u1")])
        .send()
        .await
        .unwrap();
    let sid = session_cookie_value(&response).unwrap();

    // must-not-be-active guard sends the logged-in browser to the landing
    // page instead of the chooser.
    let response = client
        .get(format!("{proxy}/.wru/login"))
        .header("cookie", format!("WRU_SESSION={sid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers().get("location").unwrap(), "/app/echo");
}
