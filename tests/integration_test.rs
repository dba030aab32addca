// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
/// Integration tests exercising the engine through its public API with the
/// mock model client, the way an embedder would.
use std::sync::Arc;
use std::time::Duration;

use koda_config::{AskForApproval, Config};
use koda_core::{Engine, EventMsg};
use koda_model::MockClient;
use tokio::time::timeout;

fn config_in(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.model.provider = "mock".into();
    config.engine.cwd = Some(dir.to_path_buf());
    config.engine.session_dir = Some(dir.join("sessions"));
    config.engine.approval_policy = AskForApproval::Never;
    config.engine.enable_compaction = false;
    config
}

#[tokio::test]
async fn engine_answers_through_the_mock_client() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::with_parts(
        config_in(dir.path()),
        Arc::new(MockClient),
        Arc::new(koda_tools::default_registry()),
    )
    .unwrap();

    engine.submit_user_input("hello engine");

    let mut saw_echo = false;
    loop {
        let event = timeout(Duration::from_secs(5), engine.next_event())
            .await
            .expect("timed out")
            .expect("event stream closed");
        match event.msg {
            EventMsg::AgentMessage { message } => {
                assert!(message.contains("MOCK: hello engine"));
                saw_echo = true;
            }
            EventMsg::TaskComplete { last_agent_message } => {
                assert!(last_agent_message.unwrap().contains("MOCK"));
                break;
            }
            _ => {}
        }
    }
    assert!(saw_echo, "expected the mock echo as an agent message");
    engine.stop().await;
}

#[tokio::test]
async fn mock_provider_is_selected_from_config() {
    let dir = tempfile::tempdir().unwrap();
    // `Engine::start` with provider = "mock" needs no API key.
    let mut engine = Engine::start(config_in(dir.path())).unwrap();
    engine.submit_user_input("ping");

    loop {
        let event = timeout(Duration::from_secs(5), engine.next_event())
            .await
            .expect("timed out")
            .expect("event stream closed");
        if let EventMsg::TaskComplete { last_agent_message } = event.msg {
            assert!(last_agent_message.unwrap().starts_with("MOCK:"));
            break;
        }
    }
    engine.stop().await;
}
