//! Integration tests for booking endpoints.

mod common;

use axum::http::{Method, StatusCode};
use common::{
    create_booking, create_group_lesson, delete_request_with_auth, future_date, get_request,
    get_request_with_auth, json_request_with_auth, TestApp, TestUser,
};
use serde_json::json;
use shared::jwt::Role;

#[tokio::test]
async fn test_create_booking_reserves_seats() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let lesson_id = lesson["id"].as_str().unwrap();

    let booking = create_booking(&app, &client, lesson_id, 3).await;

    assert_eq!(booking["lesson_id"], lesson_id);
    assert_eq!(booking["client_id"], client.id.to_string());
    assert_eq!(booking["participants"], 3);
    assert_eq!(booking["amount_cents"], 15000);
    assert_eq!(booking["payment_status"], "unpaid");
    assert_eq!(booking["awaiting_payment_confirmation"], false);

    let (_, lesson) = app
        .send(get_request(&format!("/api/v1/lessons/{}", lesson_id)))
        .await;
    assert_eq!(lesson["current_participants"], 3);
}

#[tokio::test]
async fn test_booking_beyond_capacity_rejected() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let first = TestUser::new(&app, Role::Client);
    let second = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 2).await;
    let lesson_id = lesson["id"].as_str().unwrap();

    create_booking(&app, &first, lesson_id, 2).await;

    let (status, body) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/bookings",
            json!({ "lesson_id": lesson_id, "participants": 1 }),
            &second.token,
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "insufficient_capacity");

    let (_, lesson) = app
        .send(get_request(&format!("/api/v1/lessons/{}", lesson_id)))
        .await;
    assert_eq!(lesson["current_participants"], 2);
    assert_eq!(lesson["status"], "full");
}

#[tokio::test]
async fn test_duplicate_booking_rejected() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let lesson_id = lesson["id"].as_str().unwrap();

    create_booking(&app, &client, lesson_id, 1).await;

    let (status, body) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/bookings",
            json!({ "lesson_id": lesson_id, "participants": 1 }),
            &client.token,
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_booking");
}

#[tokio::test]
async fn test_zero_participants_rejected() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;

    let (status, _) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/bookings",
            json!({ "lesson_id": lesson["id"], "participants": 0 }),
            &client.token,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_booking_unknown_lesson() {
    let app = TestApp::new();
    let client = TestUser::new(&app, Role::Client);
    let (status, _) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/bookings",
            json!({ "lesson_id": uuid::Uuid::new_v4(), "participants": 1 }),
            &client.token,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bookings_require_auth() {
    let app = TestApp::new();
    let (status, body) = app.send(get_request("/api/v1/bookings")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_list_my_bookings_only_returns_own() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let alice = TestUser::new(&app, Role::Client);
    let bob = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let lesson_id = lesson["id"].as_str().unwrap();

    create_booking(&app, &alice, lesson_id, 1).await;
    create_booking(&app, &bob, lesson_id, 1).await;

    let (status, mine) = app
        .send(get_request_with_auth("/api/v1/bookings", &alice.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["client_id"], alice.id.to_string());
}

#[tokio::test]
async fn test_get_booking_access() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let stranger = TestUser::new(&app, Role::Client);
    let admin = TestUser::new(&app, Role::Admin);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let booking = create_booking(&app, &client, lesson["id"].as_str().unwrap(), 1).await;
    let uri = format!("/api/v1/bookings/{}", booking["id"].as_str().unwrap());

    let (status, _) = app.send(get_request_with_auth(&uri, &client.token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(get_request_with_auth(&uri, &instructor.token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(get_request_with_auth(&uri, &admin.token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(get_request_with_auth(&uri, &stranger.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_client_cancels_well_ahead() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let lesson_id = lesson["id"].as_str().unwrap();
    let booking = create_booking(&app, &client, lesson_id, 2).await;
    let uri = format!("/api/v1/bookings/{}", booking["id"].as_str().unwrap());

    let (status, outcome) = app.send(delete_request_with_auth(&uri, &client.token)).await;

    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["actor"], "client");
    assert_eq!(outcome["refund_percent"], 100);
    // Nothing was paid, so nothing is owed back
    assert_eq!(outcome["refund_amount_cents"], 0);
    assert_eq!(outcome["payment_status"], "unpaid");

    let (_, lesson) = app
        .send(get_request(&format!("/api/v1/lessons/{}", lesson_id)))
        .await;
    assert_eq!(lesson["current_participants"], 0);
}

#[tokio::test]
async fn test_cancel_twice_reports_same_outcome() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let lesson_id = lesson["id"].as_str().unwrap();
    let booking = create_booking(&app, &client, lesson_id, 1).await;
    let uri = format!("/api/v1/bookings/{}", booking["id"].as_str().unwrap());

    let (_, first) = app.send(delete_request_with_auth(&uri, &client.token)).await;
    let (status, second) = app.send(delete_request_with_auth(&uri, &client.token)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    let (_, lesson) = app
        .send(get_request(&format!("/api/v1/lessons/{}", lesson_id)))
        .await;
    assert_eq!(lesson["current_participants"], 0);
}

#[tokio::test]
async fn test_instructor_cancels_booking_on_own_lesson() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let booking = create_booking(&app, &client, lesson["id"].as_str().unwrap(), 1).await;
    let uri = format!("/api/v1/bookings/{}", booking["id"].as_str().unwrap());

    let (status, outcome) = app
        .send(delete_request_with_auth(&uri, &instructor.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["actor"], "instructor");
    assert_eq!(outcome["refund_percent"], 100);
}

#[tokio::test]
async fn test_stranger_cannot_cancel_booking() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let client = TestUser::new(&app, Role::Client);
    let stranger = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 4).await;
    let booking = create_booking(&app, &client, lesson["id"].as_str().unwrap(), 1).await;
    let uri = format!("/api/v1/bookings/{}", booking["id"].as_str().unwrap());

    let (status, _) = app.send(delete_request_with_auth(&uri, &stranger.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cancelled_seats_can_be_rebooked() {
    let app = TestApp::new();
    let instructor = TestUser::new(&app, Role::Instructor);
    let first = TestUser::new(&app, Role::Client);
    let second = TestUser::new(&app, Role::Client);
    let lesson = create_group_lesson(&app, &instructor, future_date(14), 1).await;
    let lesson_id = lesson["id"].as_str().unwrap();

    let booking = create_booking(&app, &first, lesson_id, 1).await;
    app.send(delete_request_with_auth(
        &format!("/api/v1/bookings/{}", booking["id"].as_str().unwrap()),
        &first.token,
    ))
    .await;

    let rebooked = create_booking(&app, &second, lesson_id, 1).await;
    assert_eq!(rebooked["participants"], 1);
}
