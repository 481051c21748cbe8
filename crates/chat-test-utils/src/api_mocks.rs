//! wiremock helpers for the chat REST API.

use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `POST /login` for `username`, answering with the given pair.
pub async fn mount_login(server: &MockServer, username: &str, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(json!({"username": username, "password": "password"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": refresh,
            "username": username,
        })))
        .mount(server)
        .await;
}

/// `POST /refresh` presenting `refresh`, answering with a new access token.
pub async fn mount_refresh(server: &MockServer, refresh: &str, new_access: &str) {
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(header("Authorization", format!("Bearer {refresh}").as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access_token": new_access})),
        )
        .expect(1)
        .mount(server)
        .await;
}

/// `POST /refresh` rejecting any refresh token.
pub async fn mount_refresh_failure(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid refresh token"})),
        )
        .expect(1)
        .mount(server)
        .await;
}

/// `GET /my-rooms`.
pub async fn mount_my_rooms(server: &MockServer, rooms: Value) {
    Mock::given(method("GET"))
        .and(path("/my-rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rooms))
        .mount(server)
        .await;
}

/// `GET /room/{room}/members`, served once so a later mount can answer the
/// next fetch.
pub async fn mount_members_once(server: &MockServer, room: &str, members: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/room/{room}/members")))
        .respond_with(ResponseTemplate::new(200).set_body_json(members))
        .up_to_n_times(1)
        .expect(1)
        .mount(server)
        .await;
}

/// `POST /room/{room}/{action}/{member}` succeeding once.
pub async fn mount_moderation(server: &MockServer, room: &str, action: &str, member: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/room/{room}/{action}/{member}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .expect(1)
        .mount(server)
        .await;
}

pub fn room_json(id: &str, name: &str) -> Value {
    json!({"id": id, "name": name, "description": ""})
}

pub fn member_json(user_id: &str, username: &str, role: &str) -> Value {
    json!({"user_id": user_id, "username": username, "role": role})
}
