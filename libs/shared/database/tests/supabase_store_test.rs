use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_database::{ClinicStore, SlotFilter, StoreError, SupabaseStore};
use shared_models::{DentistSlot, Slot, SlotKey};

const RPC: &str = "/rest/v1/rpc/apply_clinic_changes";

fn store(server: &MockServer) -> SupabaseStore {
    SupabaseStore::new(&AppConfig {
        supabase_url: server.uri(),
        supabase_anon_key: "anon-key".to_string(),
        ..AppConfig::default()
    })
}

fn slot(branch: &str, start: (u32, u32), end: (u32, u32)) -> Slot {
    Slot::new(
        SlotKey {
            branch_id: branch.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        },
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
    )
}

async fn mount_slot_by_id(server: &MockServer, slot: &Slot) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", slot.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([slot])))
        .mount(server)
        .await;
}

async fn mount_no_slot_for_branch(server: &MockServer, branch: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("branch_id", format!("eq.{}", branch)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn committed_ops(server: &MockServer) -> Vec<String> {
    let requests = server.received_requests().await.unwrap();
    let commit = requests
        .iter()
        .find(|request| request.url.path() == RPC)
        .expect("no commit was sent");
    let body: Value = serde_json::from_slice(&commit.body).unwrap();
    body["changes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|change| change["op"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn find_slot_queries_the_logical_key() {
    let server = MockServer::start().await;
    let existing = slot("DRP-MAK", (9, 0), (10, 0));

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(header("apikey", "anon-key"))
        .and(query_param("branch_id", "eq.DRP-MAK"))
        .and(query_param("date", "eq.2026-10-20"))
        .and(query_param("start_time", "eq.09:00:00"))
        .and(query_param("end_time", "eq.10:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .expect(1)
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    let found = tx.find_slot(&existing.key()).await.unwrap();

    assert_eq!(found, Some(existing));
}

#[tokio::test]
async fn claiming_a_held_slot_fails_before_anything_is_sent() {
    let server = MockServer::start().await;
    let mut held = slot("DRP-MAK", (9, 0), (10, 0));
    held.is_active = false;
    mount_slot_by_id(&server, &held).await;

    Mock::given(method("POST"))
        .and(path(RPC))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(0)))
        .expect(0)
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    assert!(!tx.set_slot_active(held.id, true, false).await.unwrap());
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn commit_ships_every_buffered_write_in_one_call() {
    let server = MockServer::start().await;
    let open = slot("DRP-MAK", (9, 0), (10, 0));
    let fresh = slot("DRP-CEB", (9, 0), (10, 0));
    mount_slot_by_id(&server, &open).await;
    mount_no_slot_for_branch(&server, "DRP-CEB").await;

    Mock::given(method("POST"))
        .and(path(RPC))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(2)))
        .expect(1)
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    assert!(tx.set_slot_active(open.id, true, false).await.unwrap());
    tx.insert_slot(fresh.clone()).await.unwrap();

    // Reads inside the transaction see its own writes.
    assert!(!tx.get_slot(open.id).await.unwrap().unwrap().is_active);
    assert_eq!(tx.get_slot(fresh.id).await.unwrap(), Some(fresh));

    tx.commit().await.unwrap();

    assert_eq!(committed_ops(&server).await, vec!["set_slot_active", "insert_slot"]);
}

#[tokio::test]
async fn dropped_transaction_sends_nothing() {
    let server = MockServer::start().await;
    mount_no_slot_for_branch(&server, "DRP-MAK").await;

    Mock::given(method("POST"))
        .and(path(RPC))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
        .expect(0)
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    tx.insert_slot(slot("DRP-MAK", (9, 0), (10, 0))).await.unwrap();
    drop(tx);
}

#[tokio::test]
async fn lost_race_at_commit_is_a_conflict() {
    let server = MockServer::start().await;
    let open = slot("DRP-MAK", (9, 0), (10, 0));
    mount_slot_by_id(&server, &open).await;

    Mock::given(method("POST"))
        .and(path(RPC))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "PT409",
            "message": format!("slot {} is no longer is_active=true", open.id)
        })))
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    assert!(tx.set_slot_active(open.id, true, false).await.unwrap());

    let err = tx.commit().await.unwrap_err();
    assert_matches!(err, StoreError::Conflict(detail) if detail.contains("PT409"));
}

#[tokio::test]
async fn server_failure_at_commit_is_a_backend_error() {
    let server = MockServer::start().await;
    let open = slot("DRP-MAK", (9, 0), (10, 0));
    mount_slot_by_id(&server, &open).await;

    Mock::given(method("POST"))
        .and(path(RPC))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    tx.set_slot_active(open.id, true, false).await.unwrap();

    assert_matches!(tx.commit().await, Err(StoreError::Backend(_)));
}

#[tokio::test]
async fn dentist_link_at_another_branch_blocks_the_same_interval() {
    let server = MockServer::start().await;
    let dentist = Uuid::new_v4();
    let cebu = slot("DRP-CEB", (9, 0), (10, 0));
    let makati = slot("DRP-MAK", (9, 0), (10, 0));
    let existing = DentistSlot::for_slot(dentist, &cebu, cebu.created_at);
    mount_slot_by_id(&server, &makati).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/dentist_slots"))
        .and(query_param("dentist_id", format!("eq.{}", dentist)))
        .and(query_param("date", "eq.2026-10-20"))
        .and(query_param("start_time", "eq.09:00:00"))
        .and(query_param("end_time", "eq.10:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    assert!(tx.dentist_linked(dentist, makati.interval()).await.unwrap());

    let err = tx
        .insert_dentist_slot(DentistSlot::for_slot(dentist, &makati, makati.created_at))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::DuplicateDentistLink { dentist_id, .. } if dentist_id == dentist);
}

#[tokio::test]
async fn dentist_slots_merge_pending_links_in_branch_order() {
    let server = MockServer::start().await;
    let dentist = Uuid::new_v4();
    let makati = slot("DRP-MAK", (9, 0), (10, 0));
    let stored = DentistSlot::for_slot(dentist, &makati, makati.created_at);
    let quarter = slot("DRP-BGC", (9, 0), (9, 15));
    mount_no_slot_for_branch(&server, "DRP-BGC").await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/dentist_slots"))
        .and(query_param("end_time", "eq.09:15:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/dentist_slots"))
        .and(query_param("date", "gte.2026-10-20"))
        .and(query_param("order", "date.asc,start_time.asc,branch_id.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([stored])))
        .mount(&server)
        .await;

    let mut tx = store(&server).begin().await.unwrap();
    tx.insert_slot(quarter.clone()).await.unwrap();
    tx.insert_dentist_slot(DentistSlot::for_slot(dentist, &quarter, quarter.created_at))
        .await
        .unwrap();

    let day = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
    let branches: Vec<String> = tx
        .list_dentist_slots(dentist, day, day)
        .await
        .unwrap()
        .into_iter()
        .map(|link| link.branch_id)
        .collect();
    assert_eq!(branches, vec!["DRP-BGC", "DRP-MAK"]);
}

#[tokio::test]
async fn slot_held_in_this_transaction_leaves_the_open_listing() {
    let server = MockServer::start().await;
    let open = slot("DRP-MAK", (9, 0), (10, 0));
    mount_slot_by_id(&server, &open).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("branch_id", "eq.DRP-MAK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([open])))
        .mount(&server)
        .await;

    let filter = SlotFilter::for_branch("DRP-MAK").active(true);
    let mut tx = store(&server).begin().await.unwrap();
    assert_eq!(tx.list_slots(&filter).await.unwrap().len(), 1);

    tx.set_slot_active(open.id, true, false).await.unwrap();

    assert!(tx.list_slots(&filter).await.unwrap().is_empty());
}
