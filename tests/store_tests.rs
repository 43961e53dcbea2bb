// Integration tests for the project store
// Concurrency, retention, merging and snapshot persistence

#[cfg(test)]
mod store_tests {
    use builder_engine_lib::config::ConversationConfig;
    use builder_engine_lib::{
        EditRecord, EditType, Message, ProjectStore, Role, StatePatch, StoreError, TrimPolicy,
    };
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> Arc<ProjectStore> {
        Arc::new(ProjectStore::new(ConversationConfig::default()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_kept() {
        let store = store();

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..25 {
                    store
                        .append_message("shared", Message::new(Role::User, format!("{}-{}", worker, n)))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let state = store.get_state("shared").await.unwrap();
        assert_eq!(state.messages.len(), 200);
        assert_eq!(store.len().await, 1);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for message in &state.messages {
            *counts.entry(message.content.as_str()).or_default() += 1;
        }
        for worker in 0..8 {
            for n in 0..25 {
                let key = format!("{}-{}", worker, n);
                assert_eq!(counts.get(key.as_str()), Some(&1), "message {} not kept exactly once", key);
            }
        }

        // Each worker's own messages stay in the order it sent them
        for worker in 0..8 {
            let prefix = format!("{}-", worker);
            let sequence: Vec<usize> = state
                .messages
                .iter()
                .filter_map(|m| m.content.strip_prefix(prefix.as_str()))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(sequence, (0..25).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_access_shares_one_context() {
        let store = store();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get_or_create("p1").await.unwrap()
            }));
        }
        let mut contexts = Vec::new();
        for handle in handles {
            contexts.push(handle.await.unwrap());
        }

        for context in &contexts[1..] {
            assert!(Arc::ptr_eq(&contexts[0], context));
        }
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let store = store();
        store
            .append_message("a", Message::new(Role::User, "for a"))
            .await
            .unwrap();
        store.update("b", StatePatch::topic("billing")).await.unwrap();

        let a = store.get_state("a").await.unwrap();
        let b = store.get_state("b").await.unwrap();
        assert_eq!(a.messages.len(), 1);
        assert!(a.topic.is_none());
        assert!(b.messages.is_empty());
        assert_eq!(b.topic.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn test_update_merges_partial_patches() {
        let store = store();
        store.update("p1", StatePatch::topic("auth")).await.unwrap();
        let state = store
            .update("p1", StatePatch::preference("style", "targeted"))
            .await
            .unwrap();

        assert_eq!(state.topic.as_deref(), Some("auth"));
        assert_eq!(state.preferences["style"], "targeted");

        let state = store
            .update("p1", StatePatch::preference("framework", "react"))
            .await
            .unwrap();
        assert_eq!(state.preferences.len(), 2);
        assert_eq!(state.topic.as_deref(), Some("auth"));
    }

    #[tokio::test]
    async fn test_trim_always_keeps_newest_entry() {
        let store = store();
        for n in 0..4 {
            store
                .append_message("p1", Message::new(Role::User, format!("m{}", n)))
                .await
                .unwrap();
            store
                .append_edit(
                    "p1",
                    EditRecord::new(vec![format!("src/{}.js", n)], "edit", EditType::Edit),
                )
                .await
                .unwrap();
        }

        let policy = TrimPolicy {
            max_messages: Some(0),
            max_edits: Some(0),
            max_age_secs: None,
        };
        let report = store.trim("p1", &policy).await.unwrap();
        assert_eq!(report.messages_removed, 3);
        assert_eq!(report.edits_removed, 3);

        let state = store.get_state("p1").await.unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "m3");
        assert_eq!(state.edits[0].files, vec!["src/3.js"]);
    }

    #[tokio::test]
    async fn test_reset_keeps_installed_cache() {
        let store = store();
        let context = store.get_or_create("p1").await.unwrap();
        context.extend_installed(["react".to_string()]).await;
        store
            .append_message("p1", Message::new(Role::User, "hi"))
            .await
            .unwrap();

        store.reset("p1").await.unwrap();

        assert!(store.get_state("p1").await.unwrap().messages.is_empty());
        let installed = context.installed_packages().await.unwrap();
        assert!(installed.contains("react"));
    }

    #[tokio::test]
    async fn test_invalid_project_id_rejected() {
        let store = store();
        let result = store.get_state("../escape").await;
        assert!(matches!(result, Err(StoreError::InvalidProjectId(_))));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = store();
        store.get_state("p1").await.unwrap();
        store.shutdown().await.unwrap();

        assert_eq!(store.get_state("p1").await, Err(StoreError::Closed));
        assert_eq!(store.delete("p1").await.err(), Some(StoreError::Closed));
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = TempDir::new().unwrap();
        let config = ConversationConfig {
            snapshot_path: Some(dir.path().join("conversations.json")),
            ..ConversationConfig::default()
        };

        let store = ProjectStore::init(config.clone()).await.unwrap();
        store
            .append_message("p1", Message::new(Role::User, "remember me"))
            .await
            .unwrap();
        store.update("p1", StatePatch::topic("auth")).await.unwrap();
        store.get_state("p2").await.unwrap();
        store.shutdown().await.unwrap();

        let restored = ProjectStore::init(config).await.unwrap();
        assert_eq!(restored.project_ids().await, vec!["p1", "p2"]);
        let state = restored.get_state("p1").await.unwrap();
        assert_eq!(state.messages[0].content, "remember me");
        assert_eq!(state.topic.as_deref(), Some("auth"));
    }
}
