//! Tests for the JSON-RPC layer and the tool catalogue.

use super::*;
use crate::server::test_support::create_test_state;
use pretty_assertions::assert_eq;
use serde_json::json;

fn request(id: Option<Value>, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id,
        method: method.to_string(),
        params,
    }
}

// ============================================================================
// JsonRpcResponse
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"ok": true}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["ok"], true);
}

#[test]
fn test_jsonrpc_response_error_without_id_serializes_null_id() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["id"], Value::Null);
    assert_eq!(json["error"]["code"], -32700);
    assert!(json.get("result").is_none());
    assert!(json["error"].get("data").is_none());
}

#[test]
fn test_request_without_params_deserializes() {
    let req: JsonRpcRequest =
        serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#).unwrap();
    assert_eq!(req.id, Some(json!("a")));
    assert!(req.params.is_none());
}

#[test]
fn test_tool_call_result_omits_is_error_when_none() {
    let result = ToolCallResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: "done".to_string(),
        }],
        is_error: None,
    };

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["content"][0]["type"], "text");
    assert!(json.get("isError").is_none());
}

// ============================================================================
// Tool catalogue
// ============================================================================

#[test]
fn test_tool_definitions() {
    let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec![
            "investigation_turn",
            "investigation_state",
            "investigation_override_phase",
            "investigation_reopen",
        ]
    );
}

#[test]
fn test_all_tools_have_closed_object_schemas() {
    for tool in tool_definitions() {
        let schema = &tool.input_schema;
        assert_eq!(schema["type"], "object", "{} schema type", tool.name);
        assert_eq!(schema["additionalProperties"], false, "{}", tool.name);
        assert!(
            schema["required"]
                .as_array()
                .is_some_and(|r| r.iter().any(|f| f == "case_id")),
            "{} must require case_id",
            tool.name
        );
    }
}

#[test]
fn test_override_schema_lists_every_phase() {
    let tool = get_override_phase_tool();
    let allowed = tool.input_schema["properties"]["target_phase"]["enum"]
        .as_array()
        .unwrap()
        .clone();

    for phase in crate::investigation::Phase::ALL {
        assert!(allowed.contains(&json!(phase.as_str())), "{} missing", phase);
    }
}

// ============================================================================
// Request handling
// ============================================================================

#[tokio::test]
async fn test_initialize_reports_server_name() {
    let server = McpServer::new(create_test_state("ok").await);
    let response = server
        .handle_request(request(Some(json!(1)), "initialize", None))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "investigation-engine");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let server = McpServer::new(create_test_state("ok").await);
    assert!(server
        .handle_request(request(None, "initialized", None))
        .await
        .is_none());
    assert!(server
        .handle_request(request(None, "some/notification", None))
        .await
        .is_none());
}

#[tokio::test]
async fn test_unknown_method() {
    let server = McpServer::new(create_test_state("ok").await);
    let response = server
        .handle_request(request(Some(json!(7)), "resources/list", None))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tools_call_wraps_result_as_text() {
    let server = McpServer::new(create_test_state("Cache it.").await);
    let response = server
        .handle_request(request(
            Some(json!(2)),
            "tools/call",
            Some(json!({
                "name": "investigation_turn",
                "arguments": {"case_id": "c1", "session_id": "s1", "message": "what cache?"}
            })),
        ))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert!(result.get("isError").is_none());
    let text = result["content"][0]["text"].as_str().unwrap();
    let payload: Value = serde_json::from_str(text).unwrap();
    assert_eq!(payload["content"], "Cache it.");
}

#[tokio::test]
async fn test_tools_call_error_sets_is_error() {
    let server = McpServer::new(create_test_state("ok").await);
    let response = server
        .handle_request(request(
            Some(json!(3)),
            "tools/call",
            Some(json!({"name": "investigation_state", "arguments": {"case_id": "missing"}})),
        ))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"]
        .as_str()
        .unwrap()
        .starts_with("Error:"));
}

#[tokio::test]
async fn test_tools_call_missing_params() {
    let server = McpServer::new(create_test_state("ok").await);
    let response = server
        .handle_request(request(Some(json!(4)), "tools/call", None))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}
