//! End-to-end tests for download applications and grants

mod common;

use common::{
    create_online_catalog, TestClient, TestServer, CATALOG_CODE, DOWNLOAD_PROC_DEF, OWNER_ID,
    TEST_USER,
};
use data_catalog_server::audit::{encode_apply_id, PROC_DEF_DELETED_ADVICE};
use data_catalog_server::catalog_store::{ApplicationState, CatalogStore, FlowType};
use data_catalog_server::download_grants::{
    AccessStatus, CATALOG_WITHDRAWN_REASON, DOWNLOAD_AUDIT_TYPE,
};
use data_catalog_server::CatalogError;
use reqwest::StatusCode;
use serde_json::json;

async fn apply(server: &TestServer) -> String {
    let application = server
        .downloads
        .apply_download(TEST_USER, CATALOG_CODE, 30)
        .await
        .expect("application refused");
    encode_apply_id(application.id, application.apply_sn)
}

#[tokio::test]
async fn test_approved_application_grants_access() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);

    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Unauthorized
    );
    let apply_id = apply(&server).await;
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::UnderReview
    );

    let dispatched = server.engine.applies();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].audit_type, DOWNLOAD_AUDIT_TYPE);
    assert_eq!(dispatched[0].process_def_key, DOWNLOAD_PROC_DEF);

    let response = client.download_result(&apply_id, "pass").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Authorized
    );

    // Replay creates no second grant and keeps access
    client.download_result(&apply_id, "pass").await;
    client.download_result(&apply_id, "reject").await;
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Authorized
    );
}

#[tokio::test]
async fn test_owner_is_always_authorized() {
    let server = TestServer::spawn().await;
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);

    assert_eq!(
        server.downloads.check_access(OWNER_ID, CATALOG_CODE).unwrap(),
        AccessStatus::Authorized
    );
}

#[tokio::test]
async fn test_expired_grant_revokes_access() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);
    let apply_id = apply(&server).await;
    client.download_result(&apply_id, "pass").await;

    // Nothing is due yet
    assert_eq!(server.downloads.expire_sweep().unwrap(), 0);

    let conn = rusqlite::Connection::open(&server.db_path).unwrap();
    conn.execute("UPDATE download_grants SET expires_at = 1", [])
        .unwrap();
    drop(conn);

    // Expired grants stop authorizing even before the sweep runs
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Unauthorized
    );
    assert_eq!(server.downloads.expire_sweep().unwrap(), 1);
    assert_eq!(server.downloads.expire_sweep().unwrap(), 0);

    // A fresh application is accepted once the grant lapsed
    apply(&server).await;
}

#[tokio::test]
async fn test_duplicate_application_is_refused() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);
    let apply_id = apply(&server).await;

    let pending = server
        .downloads
        .apply_download(TEST_USER, CATALOG_CODE, 7)
        .await;
    assert!(matches!(pending, Err(ref e) if e.is_conflict()));

    client.download_result(&apply_id, "pass").await;
    let granted = server
        .downloads
        .apply_download(TEST_USER, CATALOG_CODE, 7)
        .await;
    assert!(matches!(granted, Err(ref e) if e.is_conflict()));
    assert_eq!(server.engine.applies().len(), 1);
}

#[tokio::test]
async fn test_application_requires_online_catalog() {
    let server = TestServer::spawn().await;
    common::create_draft_catalog(server.store.as_ref(), CATALOG_CODE);

    let draft = server
        .downloads
        .apply_download(TEST_USER, CATALOG_CODE, 7)
        .await;
    assert!(matches!(draft, Err(ref e) if e.is_conflict()));

    let unknown = server
        .downloads
        .apply_download(TEST_USER, "finance/missing", 7)
        .await;
    assert!(matches!(unknown, Err(CatalogError::NotFound(_))));
}

#[tokio::test]
async fn test_rejected_application_stays_unauthorized() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);
    let apply_id = apply(&server).await;

    client.download_result(&apply_id, "reject").await;
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Unauthorized
    );
    // A rejected application does not block a new one
    apply(&server).await;
}

#[tokio::test]
async fn test_node_rejection_settles_application() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);
    let application = server
        .downloads
        .apply_download(TEST_USER, CATALOG_CODE, 30)
        .await
        .unwrap();
    let apply_id = encode_apply_id(application.id, application.apply_sn);

    let response = client
        .download_process(json!({
            "apply_id": apply_id,
            "current_activity": {"id": "n1", "name": "Data owner"},
            "process_input": {"flow_id": "f-9", "audit_result": "reject", "audit_idea": "not needed"}
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let settled = server
        .store
        .get_download_application(application.id)
        .unwrap()
        .unwrap();
    assert_eq!(settled.state, ApplicationState::Reject);
    assert_eq!(settled.audit_advice.as_deref(), Some("not needed"));

    // The final result arriving afterwards changes nothing
    client.download_result(&apply_id, "pass").await;
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Unauthorized
    );
}

#[tokio::test]
async fn test_definition_deleted_rejects_application() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    create_online_catalog(server.store.as_ref(), CATALOG_CODE);
    let application = server
        .downloads
        .apply_download(TEST_USER, CATALOG_CODE, 30)
        .await
        .unwrap();

    client.proc_def_deleted(&[DOWNLOAD_PROC_DEF]).await;

    let rejected = server
        .store
        .get_download_application(application.id)
        .unwrap()
        .unwrap();
    assert_eq!(rejected.state, ApplicationState::Reject);
    assert_eq!(rejected.audit_advice.as_deref(), Some(PROC_DEF_DELETED_ADVICE));
    assert!(server
        .store
        .get_audit_flow_binding(DOWNLOAD_AUDIT_TYPE)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_withdrawn_catalog_cancels_pending_applications() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let catalog = create_online_catalog(server.store.as_ref(), CATALOG_CODE);
    let pending = apply(&server).await;

    let offline = server
        .audit
        .submit_audit_apply(catalog.id, FlowType::Offline, OWNER_ID)
        .await
        .unwrap();
    client.catalog_result(&offline, "pass").await;

    let cancels = server.engine.cancels();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].apply_ids, vec![pending]);
    assert_eq!(cancels[0].reason, CATALOG_WITHDRAWN_REASON);
    assert!(server.store.get_catalog(catalog.id).unwrap().unwrap().is_canceled);
    assert_eq!(
        server.downloads.check_access(TEST_USER, CATALOG_CODE).unwrap(),
        AccessStatus::Unauthorized
    );

    // The engine's own undone callback arriving later is a no-op
    let response = client.download_result(&cancels[0].apply_ids[0], "undone").await;
    assert_eq!(response.status(), StatusCode::OK);
}
