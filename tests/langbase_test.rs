//! Integration tests for the Langbase client and the pipe-backed collaborators
//!
//! Uses wiremock to stand in for the Langbase HTTP API.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use investigation_engine::collaborators::{
    CompletionPurpose, EvidenceClassifier, LangbaseCompletion, LangbaseEvidenceClassifier,
    TextCompletion,
};
use investigation_engine::config::{LangbaseConfig, PipeConfig, RequestConfig};
use investigation_engine::error::LangbaseError;
use investigation_engine::investigation::{
    EvidenceCategory, EvidenceItem, EvidenceSource, EvidenceType, Hypothesis, HypothesisCategory,
};
use investigation_engine::langbase::{LangbaseClient, Message, PipeRequest};

fn create_test_client(base_url: &str, max_retries: u32) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    LangbaseClient::new(&config, request_config).expect("Failed to create client")
}

fn completion_body(completion: &str) -> serde_json::Value {
    json!({
        "success": true,
        "completion": completion,
        "threadId": null
    })
}

#[cfg(test)]
mod client_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({"name": "test-pipe"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "Check the connection pool.",
                "threadId": "thread-123",
                "raw": {
                    "model": "gpt-4o-mini",
                    "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let response = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("why 502?")]))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.completion, "Check the connection pool.");
        assert_eq!(response.thread_id, Some("thread-123".to_string()));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let err = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LangbaseError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LangbaseError::Unavailable { retries: 3, .. }));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LangbaseError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_ensure_pipes_tolerates_existing() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .and(body_partial_json(json!({"name": "troubleshooting-consultant-v1"})))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .with_priority(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "created",
                "description": null,
                "status": "public",
                "owner_login": "test",
                "url": "https://langbase.com/test/created"
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        client.ensure_pipes(&PipeConfig::default()).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }
}

#[cfg(test)]
mod collaborator_tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_routes_purpose_to_pipe() {
        let mock_server = MockServer::start().await;
        let pipes = PipeConfig::default();

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": &pipes.consultant})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("consult")))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": &pipes.ooda_step})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{}")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let completion = LangbaseCompletion::new(create_test_client(&mock_server.uri(), 0), pipes);

        let consult = completion
            .complete(CompletionPurpose::Consultant, vec![Message::user("q")])
            .await
            .unwrap();
        let step = completion
            .complete(CompletionPurpose::OodaStep, vec![Message::user("q")])
            .await
            .unwrap();

        assert_eq!(consult, "consult");
        assert_eq!(step, "{}");
    }

    #[tokio::test]
    async fn test_classifier_drops_unknown_hypothesis_ids() {
        let mock_server = MockServer::start().await;
        let hypothesis = Hypothesis::new(
            "connection pool exhausted",
            HypothesisCategory::Infrastructure,
            0.5,
        );

        let verdict = json!({
            "matched_hypothesis_ids": [hypothesis.id, "invented-id"],
            "evidence_type": "supportive",
            "confidence_delta": 0.2
        });
        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "evidence-classifier-v1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body(&verdict.to_string())),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let classifier = LangbaseEvidenceClassifier::new(
            create_test_client(&mock_server.uri(), 0),
            &PipeConfig::default(),
        );
        let evidence = EvidenceItem::new(
            "pool metrics",
            EvidenceCategory::Metrics,
            "active connections pinned at 100/100",
            EvidenceSource::User,
        );

        let result = classifier
            .classify(&evidence, std::slice::from_ref(&hypothesis))
            .await
            .unwrap();

        assert_eq!(result.matched_hypothesis_ids, vec![hypothesis.id.clone()]);
        assert_eq!(result.evidence_type, EvidenceType::Supportive);
        assert!((result.confidence_delta - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_classifier_skips_call_without_hypotheses() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let classifier = LangbaseEvidenceClassifier::new(
            create_test_client(&mock_server.uri(), 0),
            &PipeConfig::default(),
        );
        let evidence = EvidenceItem::new(
            "note",
            EvidenceCategory::Symptoms,
            "users report slowness",
            EvidenceSource::User,
        );

        let result = classifier.classify(&evidence, &[]).await.unwrap();
        assert_eq!(result.evidence_type, EvidenceType::Neutral);
        assert!(result.matched_hypothesis_ids.is_empty());
    }
}
