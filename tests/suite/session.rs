//! End-to-end GHCi session tests: compile output in, diagnostics out.

use crate::common::{
    self, fake_ghci_command, fake_ghci_command_with_invalid_bytes, file_uri, start_server,
};

#[tokio::test]
async fn compile_error_is_published_then_idle() {
    let root = tempfile::tempdir().unwrap();
    let main_uri = file_uri(&root.path().join("src").join("Main.hs"));
    let (mut client, handle) = start_server(&fake_ghci_command());

    client.handshake(root.path(), serde_json::json!({})).await;
    client.wait_for_status("Starting GHCi").await;

    // `Compiling` clears the file first.
    assert!(client.wait_for_publish(&main_uri).await.is_empty());

    let diagnostics = client.wait_for_publish(&main_uri).await;
    assert_eq!(diagnostics.len(), 1);
    let diag = &diagnostics[0];
    assert_eq!(diag["range"]["start"]["line"], 4);
    assert_eq!(diag["range"]["start"]["character"], 2);
    assert_eq!(diag["range"]["end"]["line"], 4);
    assert_eq!(diag["range"]["end"]["character"], 9);
    assert_eq!(diag["severity"], 1);
    assert_eq!(diag["source"], "yolk");
    assert_eq!(diag["message"], "Variable not in scope: foo :: IO ()");
    assert!(diag.get("code").is_none());

    client.wait_for_status("Idle").await;

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn invalid_utf8_output_does_not_hide_later_diagnostics() {
    let root = tempfile::tempdir().unwrap();
    let main_uri = file_uri(&root.path().join("src").join("Main.hs"));
    let (mut client, handle) = start_server(&fake_ghci_command_with_invalid_bytes());

    client.handshake(root.path(), serde_json::json!({})).await;

    assert!(client.wait_for_publish(&main_uri).await.is_empty());
    let garbled = client.wait_for_log("\u{FFFD}\u{FFFD} garbled").await;
    assert!(garbled.contains("[stdout] "), "{garbled}");

    let diagnostics = client.wait_for_publish(&main_uri).await;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["range"]["start"]["line"], 4);
    client.wait_for_status("Idle").await;

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn save_sends_reload() {
    let root = tempfile::tempdir().unwrap();
    let main_path = root.path().join("src").join("Main.hs");
    let (mut client, handle) = start_server(&fake_ghci_command());

    client.handshake(root.path(), serde_json::json!({})).await;
    client.wait_for_status("Idle").await;

    client
        .notify(
            "textDocument/didSave",
            serde_json::json!({ "textDocument": { "uri": file_uri(&main_path) } }),
        )
        .await;
    client.wait_for_log(&format!("Saved {}.", file_uri(&main_path))).await;
    client.wait_for_log("[stdin] :reload").await;
    client.wait_for_status("Running :reload").await;
    // The stand-in echoes the command back on stdout.
    client.wait_for_log("[stdout] :reload").await;

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn restart_retracts_and_starts_fresh_session() {
    let root = tempfile::tempdir().unwrap();
    let main_uri = file_uri(&root.path().join("src").join("Main.hs"));
    let (mut client, handle) = start_server(&fake_ghci_command());

    client.handshake(root.path(), serde_json::json!({})).await;
    client.wait_for_status("Idle").await;

    client
        .notify(yolk_lsp::RESTART_METHOD, serde_json::Value::Null)
        .await;
    client.wait_for_status("Stopping GHCi").await;

    // Old diagnostics are withdrawn before the new session reports again.
    assert!(client.wait_for_publish(&main_uri).await.is_empty());
    client.wait_for_status("Starting GHCi").await;
    assert!(client.wait_for_publish(&main_uri).await.is_empty());
    assert_eq!(client.wait_for_publish(&main_uri).await.len(), 1);
    client.wait_for_status("Idle").await;

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn client_setting_overrides_configured_command() {
    let root = tempfile::tempdir().unwrap();
    let main_uri = file_uri(&root.path().join("src").join("Main.hs"));
    // Would fail the session if it were used.
    let (mut client, handle) = start_server("exit 7");

    client
        .handshake(
            root.path(),
            serde_json::json!({ "workspace": { "configuration": true } }),
        )
        .await;

    let request = client
        .wait_for("workspace/configuration", |f| {
            f["method"] == "workspace/configuration"
        })
        .await;
    assert_eq!(request["params"]["items"][0]["section"], "yolk");
    client
        .respond(
            &request["id"],
            serde_json::json!([{ "ghci": { "command": fake_ghci_command() } }]),
        )
        .await;

    assert!(client.wait_for_publish(&main_uri).await.is_empty());
    assert_eq!(client.wait_for_publish(&main_uri).await.len(), 1);
    client.wait_for_status("Idle").await;

    client.shut_down().await;
    common::join(handle).await.unwrap();
}

#[tokio::test]
async fn unexpected_ghci_exit_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let (mut client, handle) = start_server("exit 3");

    client.handshake(root.path(), serde_json::json!({})).await;

    let shown = client
        .wait_for("showMessage", |f| f["method"] == "window/showMessage")
        .await;
    assert_eq!(shown["params"]["type"], 1);
    assert!(
        shown["params"]["message"]
            .as_str()
            .unwrap()
            .contains("status 3")
    );

    let err = common::join(handle).await.unwrap_err();
    assert!(err.to_string().contains("GHCi exited"), "{err:#}");
}

#[tokio::test]
async fn clean_ghci_exit_is_logged_and_not_fatal() {
    let root = tempfile::tempdir().unwrap();
    let (mut client, handle) = start_server("exit 0");

    client.handshake(root.path(), serde_json::json!({})).await;
    client.wait_for_log("GHCi exited successfully.").await;

    client.shut_down().await;
    common::join(handle).await.unwrap();
}
