use janus_config::{JanusConfig, LlmErrorPolicy};

#[test]
fn defaults_match_documented_values() {
    let config = JanusConfig::default();
    assert_eq!(config.llm.max_tokens, 4096);
    assert_eq!(config.llm.temperature, 0.7);
    assert_eq!(config.agent.max_iterations, 20);
    assert_eq!(config.agent.summarization_threshold, 20);
    assert_eq!(config.agent.token_budget, 100_000);
    assert_eq!(config.agent.context_window, 128_000);
    assert_eq!(config.agent.tool_retries, 2);
    assert_eq!(config.agent.on_llm_error, LlmErrorPolicy::Retry);
    assert_eq!(config.agent.max_subagent_iterations, 5);
    assert_eq!(config.agent.max_skills_in_prompt, 150);
    assert_eq!(config.agent.max_skills_prompt_chars, 30_000);
    assert_eq!(config.tools.exec_timeout, 30_000);
    assert_eq!(config.tools.max_file_size, 1_048_576);
    assert!(config.database.enabled);
    assert!(!config.heartbeat.enabled);
    assert_eq!(config.heartbeat.check_interval_ms, 60_000);
    assert!(config.streaming.enabled);
    assert_eq!(config.streaming.telegram_throttle_ms, 500);
    assert!(config.gates.enabled);
    assert!(!config.gates.exec_patterns.is_empty());
    assert!(!config.memory.vector_search);
}

#[test]
fn workspace_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("janus.json"),
        r#"{"agent": {"maxIterations": 7, "onLLMError": "stop"}, "memory": {"vectorSearch": true}}"#,
    )
    .unwrap();

    let config = janus_config::load(Some(dir.path()), None).unwrap();
    assert_eq!(config.agent.max_iterations, 7);
    assert_eq!(config.agent.on_llm_error, LlmErrorPolicy::Stop);
    assert!(config.memory.vector_search);
    // Untouched sections keep their defaults.
    assert_eq!(config.agent.tool_retries, 2);
    assert_eq!(config.workspace.dir, dir.path());
}

#[test]
fn explicit_overrides_win_over_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("janus.json"),
        r#"{"llm": {"model": "from-file"}}"#,
    )
    .unwrap();

    let config = janus_config::load(
        Some(dir.path()),
        Some(serde_json::json!({"llm": {"model": "from-override"}})),
    )
    .unwrap();
    assert_eq!(config.llm.model, "from-override");
}

#[test]
fn malformed_workspace_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("janus.json"), "{not json").unwrap();
    assert!(janus_config::load(Some(dir.path()), None).is_err());
}

#[test]
fn user_resolution_prefers_stable_id() {
    let config: JanusConfig = serde_json::from_value(serde_json::json!({
        "users": [
            {
                "id": "wt",
                "displayName": "WT",
                "identities": [
                    {"channel": "telegram", "channelUserId": "111", "channelUsername": "wt_dev"}
                ]
            },
            {
                "id": "monika",
                "displayName": "Monika",
                "identities": [
                    {"channel": "telegram", "channelUsername": "monika"}
                ],
                "tools": {"deny": ["exec"]}
            }
        ]
    }))
    .unwrap();

    let by_id = config.resolve_user("telegram", Some("111"), Some("monika"));
    assert_eq!(by_id.unwrap().id, "wt");

    let by_username = config.resolve_user("telegram", Some("999"), Some("monika"));
    assert_eq!(by_username.unwrap().id, "monika");
    assert_eq!(
        by_username.unwrap().tools.deny.as_deref(),
        Some(&["exec".to_string()][..])
    );

    assert!(config.resolve_user("discord", Some("111"), None).is_none());
}

#[test]
fn default_user_channel_follows_telegram_allowlist() {
    let mut config = JanusConfig::default();
    assert_eq!(
        config.default_user_channel(),
        ("cli".to_string(), "terminal".to_string())
    );

    config.telegram.enabled = true;
    config.telegram.allowed_chat_ids = vec!["42".into(), "43".into()];
    assert_eq!(
        config.default_user_channel(),
        ("telegram".to_string(), "42".to_string())
    );
}
