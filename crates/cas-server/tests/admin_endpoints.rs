use std::sync::Arc;

use cas_server::{AppConfig, AppState, build_state, router};
use cas_ticket::factory::DefaultTicketFactory;
use cas_ticket::model::{Authentication, Principal, Service, Ticket};
use cas_ticket::CentralAuthenticationService;
use serde_json::Value;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    state: AppState,
    cas: CentralAuthenticationService,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.logout.enabled = false;
    cfg.tickets.id.use_host_name = false;
    cfg.tickets.registry.cleaner.enabled = false;
    cfg
}

async fn start_server() -> TestServer {
    let cfg = test_config();
    let state = build_state(&cfg).await.expect("build state");
    let factory = DefaultTicketFactory::from_config(&cfg.tickets).expect("factory");
    let cas = CentralAuthenticationService::new(state.registry.clone(), Arc::new(factory));
    let app = router(state.clone());

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        state,
        cas,
        shutdown: tx,
        handle,
    }
}

async fn login(server: &TestServer) -> (Ticket, Ticket) {
    let tgt = server
        .cas
        .create_ticket_granting_ticket(Authentication::new(Principal::new("casuser")))
        .await
        .unwrap();
    let st = server
        .cas
        .grant_service_ticket(tgt.id(), &Service::new("https://app.example.org"), false)
        .await
        .unwrap();
    (tgt, st)
}

#[tokio::test]
async fn admin_endpoints_report_tickets() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let base = server.base.clone();
    let (tgt, st) = login(&server).await;

    // GET /health
    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET /admin/tickets
    let resp = client
        .get(format!("{base}/admin/tickets"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["tickets"].as_array().unwrap().len(), 2);
    assert!(body.get("next_cursor").is_none());

    // Paging with a limit of one yields a cursor
    let resp = client
        .get(format!("{base}/admin/tickets?limit=1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["tickets"].as_array().unwrap().len(), 1);
    let cursor = body["next_cursor"].as_str().expect("cursor").to_string();
    let resp = client
        .get(format!("{base}/admin/tickets?limit=1&cursor={cursor}"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["tickets"].as_array().unwrap().len(), 1);
    assert_ne!(body["tickets"][0]["id"], cursor.as_str());

    // GET /admin/tickets/{id}
    let resp = client
        .get(format!("{base}/admin/tickets/{}", st.id()))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "ServiceTicket");
    assert_eq!(body["service"], "https://app.example.org");
    assert_eq!(body["granting_ticket_id"], tgt.id());

    let resp = client
        .get(format!("{base}/admin/tickets/{}", tgt.id()))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["principal"], "casuser");
    assert_eq!(body["tracked_tickets"], 1);

    // GET /admin/statistics
    let resp = client
        .get(format!("{base}/admin/statistics"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["service_tickets"], 1);
    assert_eq!(body["total"], 2);

    // GET /admin/sessions/{principal}
    let resp = client
        .get(format!("{base}/admin/sessions/casuser"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], tgt.id());

    server.stop().await;
}

#[tokio::test]
async fn admin_delete_revokes_session() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let base = server.base.clone();
    let (tgt, st) = login(&server).await;

    let resp = client
        .delete(format!("{base}/admin/tickets/{}", tgt.id()))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], 2);
    let requests = body["logout_requests"].as_array().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["ticket_id"], st.id());
    assert_eq!(requests[0]["status"], "not_attempted");

    let resp = client
        .get(format!("{base}/admin/tickets/{}", st.id()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp = client
        .delete(format!("{base}/admin/tickets/{}", tgt.id()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not-found");

    assert_eq!(server.state.registry.count_tickets(None).await.unwrap(), 0);
    server.stop().await;
}

#[tokio::test]
async fn admin_rejects_bad_limit_and_runs_cleaner() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let base = server.base.clone();

    let resp = client
        .get(format!("{base}/admin/tickets?limit=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{base}/admin/cleaner/run"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["scanned"], 0);

    server.stop().await;
}
