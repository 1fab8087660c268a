mod common;

use actix_web::{http::StatusCode, test};
use serde_json::{json, Value};

/// JoinRequest from DevEUI 0807060504030201 for JoinEUI 0102030405060708,
/// fields little-endian on air.
const JOIN_REQUEST_PHY: &str = "000807060504030201010203040506070802010a0b0c0d";

#[actix_web::test]
async fn health_is_ok() {
    let app = test::init_service(common::app().await).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn unknown_device_is_answered_in_result() {
    let app = test::init_service(common::app().await).await;
    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({
            "MessageType": "JoinReq",
            "ProtocolVersion": "1.0",
            "SenderID": "000001",
            "ReceiverID": "0102030405060708",
            "TransactionID": 7,
            "MACVersion": "1.0.3",
            "PHYPayload": JOIN_REQUEST_PHY,
            "DevEUI": "0807060504030201",
            "DevAddr": "01020304",
            "DLSettings": "00",
            "RxDelay": 1
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["MessageType"], "JoinAns");
    assert_eq!(body["TransactionID"], 7);
    assert_eq!(body["SenderID"], "0102030405060708");
    assert_eq!(body["ReceiverID"], "000001");
    assert_eq!(body["Result"]["ResultCode"], "UnknownDevEUI");
    assert!(body.get("PHYPayload").is_none());
}

#[actix_web::test]
async fn malformed_body_is_bad_request() {
    let app = test::init_service(common::app().await).await;
    let req = test::TestRequest::post()
        .uri("/")
        .insert_header(("content-type", "application/json"))
        .set_payload(r#"{"MessageType":"PRStartReq"}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Bad Request");
}
