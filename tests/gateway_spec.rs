use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use dev_phone::api::create_router;
use dev_phone::config::Profile;
use dev_phone::lifecycle::Controller;
use dev_phone::remote::memory::Operation;
use dev_phone::remote::{InMemoryTelephonyApi, TelephonyApi};
use dev_phone::token::decode_claims;
use dev_phone_core::{PhoneNumber, PluginSettings, Session};
use serde_json::{json, Value};

const NUMBER: &str = "+15551234567";
const OTHER_NUMBER: &str = "+15557654321";

async fn setup() -> (Arc<InMemoryTelephonyApi>, Arc<Controller>, TestServer) {
    let api = Arc::new(InMemoryTelephonyApi::new());
    api.add_phone_number(NUMBER, "", "");
    api.add_phone_number(OTHER_NUMBER, "", "");
    let profile = Profile {
        account_sid: api.account_sid().to_string(),
        auth_token: Some("auth-token".to_string()),
        ..Default::default()
    };
    let controller = Arc::new(Controller::new(
        api.clone(),
        profile,
        Session::generate(),
        false,
    ));
    controller
        .start(Some(NUMBER))
        .await
        .expect("Failed to provision session");
    controller.mark_serving().expect("Failed to mark serving");
    let server =
        TestServer::new(create_router(controller.clone())).expect("Failed to create test server");
    (api, controller, server)
}

mod ping {
    use super::*;

    #[tokio::test]
    async fn answers_pong() {
        let (_, _, server) = setup().await;

        let response = server.get("/ping").await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({ "pong": true }));
    }
}

mod plugin_settings {
    use super::*;

    #[tokio::test]
    async fn reports_session_and_binding() {
        let (api, controller, server) = setup().await;

        let response = server.get("/plugin-settings").await;

        response.assert_status_ok();
        let settings: PluginSettings = response.json();
        assert_eq!(settings.dev_phone_name, controller.session().name);
        assert_eq!(settings.account_sid, api.account_sid());
        assert_eq!(settings.phone_number.unwrap().phone_number, NUMBER);
        assert!(settings.conversation_sid.is_some());
        assert!(settings.serverless_domain.is_some());
    }
}

mod phone_numbers {
    use super::*;

    #[tokio::test]
    async fn lists_account_numbers() {
        let (_, _, server) = setup().await;

        let response = server.get("/phone-numbers").await;

        response.assert_status_ok();
        let body: Value = response.json();
        let numbers: Vec<PhoneNumber> =
            serde_json::from_value(body["phone-numbers"].clone()).unwrap();
        assert_eq!(numbers.len(), 2);
        assert!(body["phone-numbers"][0]["phoneNumber"].is_string());
        assert!(body["phone-numbers"][0]["friendlyName"].is_string());
    }

    #[tokio::test]
    async fn listing_failure_returns_remote_status() {
        let (api, _, server) = setup().await;
        api.fail(Operation::ListPhoneNumbers);

        let response = server.get("/phone-numbers").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json::<Value>()["error"].is_string());
    }
}

mod choose_phone_number {
    use super::*;

    #[tokio::test]
    async fn rebinds_to_the_requested_number() {
        let (api, _, server) = setup().await;

        let response = server
            .post("/choose-phone-number")
            .json(&json!({ "phoneNumber": OTHER_NUMBER }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["phoneNumber"], OTHER_NUMBER);
        assert!(body["message"].is_string());
        assert!(api.phone_number(NUMBER).unwrap().urls().is_empty());
        assert!(!api.phone_number(OTHER_NUMBER).unwrap().urls().is_empty());

        let settings: PluginSettings = server.get("/plugin-settings").await.json();
        assert_eq!(settings.phone_number.unwrap().phone_number, OTHER_NUMBER);
    }

    #[tokio::test]
    async fn unknown_number_is_bad_request() {
        let (api, _, server) = setup().await;

        let response = server
            .post("/choose-phone-number")
            .json(&json!({ "phoneNumber": "+15550000000" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"].is_string());
        assert!(!api.phone_number(NUMBER).unwrap().urls().is_empty());
    }

    #[tokio::test]
    async fn missing_phone_number_is_bad_request() {
        let (api, _, server) = setup().await;

        let response = server.post("/choose-phone-number").json(&json!({})).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"]
            .as_str()
            .unwrap()
            .contains("phoneNumber"));
        assert!(!api.phone_number(NUMBER).unwrap().urls().is_empty());
    }

    #[tokio::test]
    async fn configured_number_is_a_conflict() {
        let (api, _, server) = setup().await;
        api.add_phone_number("+15550000001", "https://prod.example.com/sms", "");

        let response = server
            .post("/choose-phone-number")
            .json(&json!({ "phoneNumber": "+15550000001" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let error = response.json::<Value>()["error"].as_str().unwrap().to_string();
        assert!(error.contains("SMS webhook"));
        assert!(!api.phone_number(NUMBER).unwrap().urls().is_empty());
    }
}

mod send_sms {
    use super::*;

    #[tokio::test]
    async fn returns_the_created_message() {
        let (api, _, server) = setup().await;

        let response = server
            .post("/send-sms")
            .json(&json!({ "body": "hello", "from": NUMBER, "to": "+15559876543" }))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["result"]["sid"].as_str().unwrap().starts_with("SM"));
        assert_eq!(api.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn passes_through_remote_status() {
        let (_, _, server) = setup().await;

        let response = server
            .post("/send-sms")
            .json(&json!({ "body": "hello", "from": "+15550000000", "to": "+15559876543" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"]
            .as_str()
            .unwrap()
            .contains("+15550000000"));
    }

    #[tokio::test]
    async fn missing_sender_is_bad_request() {
        let (api, _, server) = setup().await;

        let response = server.post("/send-sms").json(&json!({ "body": "hi" })).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"]
            .as_str()
            .unwrap()
            .contains("from"));
        assert!(api.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (_, _, server) = setup().await;

        let response = server
            .post("/send-sms")
            .text("{not json")
            .content_type("application/json")
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"].is_string());
    }

    #[tokio::test]
    async fn remote_outage_is_server_error() {
        let (api, _, server) = setup().await;
        api.fail(Operation::SendMessage);

        let response = server
            .post("/send-sms")
            .json(&json!({ "body": "hello", "from": NUMBER, "to": "+15559876543" }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
}

mod client_token {
    use super::*;

    #[tokio::test]
    async fn returns_the_session_token() {
        let (_, controller, server) = setup().await;
        let issued = controller.client_token().await.unwrap();

        let response = server.get("/client-token").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["token"], issued.value.as_str());
        let claims = decode_claims(body["token"].as_str().unwrap()).unwrap();
        assert_eq!(claims["grants"]["identity"], controller.session().name.as_str());
    }

    #[tokio::test]
    async fn is_stable_across_requests() {
        let (_, _, server) = setup().await;

        let first: Value = server.get("/client-token").await.json();
        let second: Value = server.get("/client-token").await.json();

        assert_eq!(first, second);
    }
}
