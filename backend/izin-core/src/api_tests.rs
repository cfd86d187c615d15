// src/api_tests.rs

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use chrono::NaiveDate;
    use http_body_util::BodyExt;
    use serde_json::{json, Value as Json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::api::{router, AppState, InFlight};
    use crate::clock::TestClock;
    use crate::recorder::{LeaveRecorder, LedgerCollections};
    use crate::roster::{RosterCache, RosterKey};
    use crate::test_support::*;
    use crate::validator::Validator;

    struct TestApp {
        app: Router,
        store: Arc<FlakyStore>,
        clock: TestClock,
        roster: Arc<RosterCache>,
        in_flight: Arc<InFlight>,
    }

    async fn setup(now: &str, load_roster: bool) -> TestApp {
        let store = Arc::new(sample_store().await);
        let clock = TestClock::new(now);
        let roster = Arc::new(RosterCache::new(store.clone(), STUDENTS, RosterKey::Id));
        if load_roster {
            roster.refresh().await.expect("Roster should load");
        }
        let recorder = Arc::new(LeaveRecorder::new(
            store.clone(),
            Arc::new(clock.clone()),
            LedgerCollections {
                leave: LEAVE.to_string(),
                attendance: ATTENDANCE.to_string(),
            },
        ));
        let in_flight = Arc::new(InFlight::default());
        let state = AppState {
            roster: roster.clone(),
            validator: Validator::new(10),
            recorder,
            clock: Arc::new(clock.clone()),
            in_flight: in_flight.clone(),
        };
        TestApp {
            app: router(state),
            store,
            clock,
            roster,
            in_flight,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Json) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Json::Null
        } else {
            serde_json::from_slice(&bytes).expect("Response body should be JSON")
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Json) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn ana_sick_body(date: &str) -> Json {
        json!({
            "student": "123",
            "studentName": "Ana",
            "className": "5A",
            "date": date,
            "leaveType": "sick",
            "note": "flu"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let t = setup("2024-06-10 08:00:00", false).await;
        let (status, body) = send(&t.app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_submit_leave_records_both_ledgers() {
        let t = setup("2024-06-10 08:00:00", true).await;

        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::OK, "Unexpected body: {}", body);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["date"], "2024-06-10");
        assert_eq!(body["studentId"], "123");
        assert_eq!(body["leave"]["leaveType"], "sick");
        assert_eq!(body["attendance"]["status"], "sick");
        assert_eq!(body["attendance"]["note"], "flu");

        assert!(t.store.entry(LEAVE, "2024-06-10", "123").await.is_some());
        assert!(t.store.entry(ATTENDANCE, "2024-06-10", "123").await.is_some());
        assert_eq!(t.store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_submit_after_cutoff_writes_nothing() {
        let t = setup("2024-06-10 11:00:00", true).await;

        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "deadline_passed");
        assert_eq!(t.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_past_date_is_rejected() {
        let t = setup("2024-06-10 07:00:00", true).await;
        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-09"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "date_in_past");
        assert_eq!(t.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_missing_note_is_rejected() {
        let t = setup("2024-06-10 07:00:00", true).await;
        let mut request = ana_sick_body("2024-06-10");
        request["note"] = json!("");

        let (status, body) = send(&t.app, post_json("/api/leave", request)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "missing_field");
        assert_eq!(t.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_without_roster_is_unavailable() {
        let t = setup("2024-06-10 08:00:00", false).await;
        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "roster_not_loaded");
        assert_eq!(t.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_past_date_wins_over_missing_roster() {
        let t = setup("2024-06-10 07:00:00", false).await;
        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-09"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "date_in_past");

        t.clock.set_time("2024-06-10 10:30:00");
        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "deadline_passed");
        assert_eq!(t.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_submission_conflicts() {
        let t = setup("2024-06-10 08:00:00", true).await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let claim = t
            .in_flight
            .try_claim(date, "123")
            .expect("Claim should be free");

        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "submission_in_progress");
        assert_eq!(t.store.write_count(), 0);

        drop(claim);
        let (status, _) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::OK, "Submission goes through once the claim is released");
        assert_eq!(t.store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported() {
        let t = setup("2024-06-10 08:00:00", true).await;
        t.store.fail_writes_to(ATTENDANCE);

        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "attendance_sync_failed");
        assert!(t.store.entry(LEAVE, "2024-06-10", "123").await.is_some());
    }

    #[tokio::test]
    async fn test_leave_ledger_failure_is_store_unavailable() {
        let t = setup("2024-06-10 08:00:00", true).await;
        t.store.fail_writes_to(LEAVE);

        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "store_unavailable");
    }

    #[tokio::test]
    async fn test_cutoff_follows_clock() {
        let t = setup("2024-06-10 09:59:00", true).await;
        let (status, _) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::OK);

        t.clock.set_time("2024-06-10 10:00:00");
        let (status, body) = send(&t.app, post_json("/api/leave", ana_sick_body("2024-06-10"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "deadline_passed");
    }

    #[tokio::test]
    async fn test_list_and_suggest_students() {
        let t = setup("2024-06-10 08:00:00", true).await;

        let (status, body) = send(&t.app, get("/api/students")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Ana", "Budi", "Citra"]);
        assert_eq!(body[2]["class"], "-");

        let (status, body) = send(&t.app, get("/api/students/suggest?q=bu&limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{ "id": "124", "name": "Budi", "class": "5B" }]));
    }

    #[tokio::test]
    async fn test_reload_students() {
        let t = setup("2024-06-10 08:00:00", false).await;
        seed_student(&t.store.inner, "126", "Dodi", "5A").await;

        let (status, body) = send(&t.app, post_json("/api/students/reload", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["students"], 4);
        assert!(t.roster.snapshot().await.unwrap().lookup("126").is_some());

        t.store.fail_list(true);
        let (status, body) = send(&t.app, post_json("/api/students/reload", json!({}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "roster_unavailable");
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let in_flight = Arc::new(InFlight::default());
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();

        let guard = in_flight.try_claim(date, "123").expect("First claim succeeds");
        assert!(in_flight.try_claim(date, "123").is_none(), "Same key is busy");
        assert!(in_flight.try_claim(date, "124").is_some(), "Other students are independent");
        assert!(in_flight.try_claim(date.succ_opt().unwrap(), "123").is_some());

        drop(guard);
        assert!(in_flight.try_claim(date, "123").is_some(), "Key is free after drop");
    }
}
