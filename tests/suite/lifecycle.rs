//! Protocol lifecycle tests that never get as far as starting GHCi.

use crate::common::{self, start_server};

#[tokio::test]
async fn initialize_advertises_save_sync_and_server_info() {
    let (mut client, handle) = start_server("exit 9");

    let id = client
        .request(
            "initialize",
            serde_json::json!({ "rootUri": null, "capabilities": {} }),
        )
        .await;
    let reply = client.wait_for_response(id).await;
    assert_eq!(
        reply["result"]["capabilities"],
        serde_json::json!({ "textDocumentSync": { "save": {} } })
    );
    assert_eq!(reply["result"]["serverInfo"]["name"], "yolk");

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn unknown_request_is_method_not_found() {
    let (mut client, handle) = start_server("exit 9");

    let id = client
        .request("textDocument/hover", serde_json::json!({}))
        .await;
    let reply = client.wait_for_response(id).await;
    assert_eq!(reply["error"]["code"], -32601);
    assert!(reply.get("result").is_none());

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn exit_without_shutdown_is_an_error() {
    let (mut client, handle) = start_server("exit 9");

    client.notify("exit", serde_json::Value::Null).await;
    let err = common::join(handle).await.unwrap_err();
    assert!(err.to_string().contains("before shutdown"), "{err:#}");
}

#[tokio::test]
async fn hang_up_after_shutdown_is_clean() {
    let (mut client, handle) = start_server("exit 9");

    let id = client.request("shutdown", serde_json::Value::Null).await;
    client.wait_for_response(id).await;
    drop(client);

    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn garbage_body_is_skipped() {
    let (mut client, handle) = start_server("exit 9");

    client
        .send(serde_json::json!({ "jsonrpc": "2.0", "neither": "request nor notification" }))
        .await;
    let id = client
        .request("initialize", serde_json::json!({ "capabilities": {} }))
        .await;
    assert!(client.wait_for_response(id).await["result"].is_object());

    client.shut_down().await;
    common::join(handle).await.unwrap();
}
