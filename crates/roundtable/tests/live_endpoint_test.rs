//! Live inference tests: require an OpenAI-compatible endpoint.
//!
//! All tests are `#[ignore]`. Point `ROUNDTABLE_BASE_URL` / `ROUNDTABLE_MODEL`
//! at a server and run with `cargo test -p roundtable -- --ignored`.

use std::sync::Arc;

use coordination::backend::{ChatMessage, GenerationBackend, GenerationRequest};
use coordination::team::SummaryMethod;
use coordination::{CouncilConfig, SamplingParams};
use roundtable::backend::RigBackend;
use roundtable::config::{check_endpoint, AppConfig, EndpointConfig};
use roundtable::documents::SectionStore;
use roundtable::session::build_council;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Endpoint reachability
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore]
async fn test_endpoint_reachable() {
    let endpoint = EndpointConfig::default();
    assert!(
        check_endpoint(&endpoint.base_url).await,
        "endpoint {} is not reachable; start it first",
        endpoint.base_url
    );
}

// ---------------------------------------------------------------------------
// Single generation
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore]
async fn test_backend_follows_marker_instruction() {
    let backend = RigBackend::new(&EndpointConfig::default()).expect("backend from env");
    let reply = backend
        .generate(GenerationRequest {
            label: "smoke".into(),
            instructions: "Answer in one line that starts with CONCLUDE:".into(),
            messages: vec![ChatMessage::user("Is MFA worth enabling on a VPN?")],
            sampling: SamplingParams {
                temperature: 0.0,
                max_tokens: Some(64),
            },
        })
        .await
        .expect("generation should succeed");
    assert!(!reply.trim().is_empty());
}

// ---------------------------------------------------------------------------
// Full session
// ---------------------------------------------------------------------------

#[tokio::test]
#[ignore]
async fn test_small_council_produces_report() {
    let config = AppConfig {
        council: CouncilConfig {
            message_budget: 2,
            max_rounds_per_specialist: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let backend = Arc::new(RigBackend::new(&config.endpoint).expect("backend from env"));
    let council =
        build_council(&config, backend, Arc::new(SectionStore::new())).expect("council builds");

    let outcome = council
        .consult(
            "Should a small clinic store patient notes in a shared spreadsheet?",
            &CancellationToken::new(),
        )
        .await
        .expect("session should finish");
    assert!(!outcome.report.trim().is_empty());
    assert_eq!(outcome.summary_method, SummaryMethod::Generated);
    assert!(outcome.state.message_count <= 2);
}
