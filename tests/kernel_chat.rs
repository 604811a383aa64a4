// End-to-end chat pipeline scenarios over an in-memory store.

mod common;

use common::{stub_model, test_profile, StubBackend};
use eidolon::{
    AgentKernel, AgentStore, EngineError, EngineSettings, PluginRegistry, PromptLibrary,
};
use std::sync::Arc;

fn kernel_with(backend: StubBackend) -> (AgentKernel, Arc<StubBackend>) {
    let store = Arc::new(AgentStore::open_in_memory().unwrap());
    let (chat, backend) = stub_model(backend);
    // No template directory: every render falls back to the built-in prompts.
    let prompts = PromptLibrary::new("/nonexistent/prompts");
    let kernel = AgentKernel::new(
        store,
        chat,
        prompts,
        PluginRegistry::new(),
        test_profile(),
        EngineSettings::default(),
    );
    (kernel, backend)
}

#[tokio::test]
async fn base_knowledge_survives_conflicting_definitions() {
    let (kernel, _) = kernel_with(
        StubBackend::new("好的呀").with_rule("实体识别助手", "[\"HeDaas\"]"),
    );

    kernel
        .knowledge()
        .base()
        .add_fact("HeDaas", "HeDaas是一个高校", "机构类型", "")
        .unwrap();

    let err = kernel
        .knowledge()
        .set_definition("HeDaas", "HeDaas是一家公司", "定义", "对话提取", 0.9)
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let retrieved = kernel.knowledge().retrieve("HeDaas是什么").await.unwrap();
    let base_item = retrieved
        .items
        .iter()
        .find(|i| i.entity_name == "HeDaas")
        .expect("base item retrieved");
    assert_eq!(base_item.content, "HeDaas是一个高校");
}

#[tokio::test]
async fn duplicate_related_info_counts_mentions() {
    let (kernel, _) = kernel_with(
        StubBackend::new("嗯嗯").with_rule("实体识别助手", "[\"小明\"]"),
    );

    for _ in 0..3 {
        kernel
            .knowledge()
            .add_related_info("小明", "喜欢看书", "偏好", "对话提取", 0.8)
            .unwrap();
    }

    let retrieved = kernel.knowledge().retrieve("小明关于看书").await.unwrap();
    let matching: Vec<_> = retrieved
        .items
        .iter()
        .filter(|i| i.content == "喜欢看书")
        .collect();
    assert_eq!(matching.len(), 1, "one row despite three writes");
    assert_eq!(matching[0].mention_count, Some(3));
}

#[tokio::test]
async fn twenty_one_rounds_archive_into_one_summary() {
    let (kernel, _) = kernel_with(StubBackend::new("我在呢"));

    for i in 0..21 {
        let reply = kernel.chat(&format!("第{i}句话")).await.unwrap();
        assert_eq!(reply, "我在呢");
    }

    let summaries = kernel.memory().summaries().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].rounds, 20);
    assert_eq!(summaries[0].message_count, 40);

    // The short-term log keeps exactly the last round.
    let store = kernel.store();
    let user_left = store
        .all_messages()
        .unwrap()
        .iter()
        .filter(|m| m.role == "user")
        .count();
    assert_eq!(user_left, 1);

    // Archived rounds + current short-term rounds == total conversations.
    let total = kernel.memory().total_conversations().unwrap();
    assert_eq!(summaries[0].rounds as u64 + user_left as u64, total);
}

#[tokio::test]
async fn reply_survives_upstream_failure_and_user_message_is_kept() {
    // The final reply is the only call without a classifier needle, so a
    // default-path failure hits exactly the Main reply. Force it by making
    // every unmatched call fail.
    let (kernel, _) = kernel_with(
        StubBackend::new("unused").with_failure("聊天", "provider exploded"),
    );

    let reply = kernel.chat("陪我聊天好吗").await.unwrap();
    assert!(reply.contains("抱歉"), "apology reply: {reply}");
    assert!(reply.contains("provider exploded"), "carries upstream message");

    let messages = kernel.store().all_messages().unwrap();
    assert!(messages.iter().any(|m| m.role == "user" && m.content == "陪我聊天好吗"));
}

#[tokio::test]
async fn emotion_snapshot_appears_after_five_rounds() {
    let (kernel, _) = kernel_with(StubBackend::new("哈哈"));

    for i in 0..5 {
        kernel.chat(&format!("聊点什么{i}")).await.unwrap();
    }

    let snapshot = kernel.emotion().latest().unwrap().expect("snapshot after 5 rounds");
    assert_eq!(snapshot.relationship_type, "朋友");

    // Snapshots stay append-only and monotone in created_at.
    for i in 0..15 {
        kernel.chat(&format!("再聊{i}")).await.unwrap();
    }
    let history = kernel.emotion().history().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].created_at <= history[1].created_at);
}

#[tokio::test]
async fn environment_switch_emits_system_note() {
    let (kernel, _) = kernel_with(
        StubBackend::new("到啦").with_rule("意图判断助手", "{\"wants_switch\": true}"),
    );

    let store = kernel.store();
    let room = store
        .insert_environment("房间", "卧室", "", "", "", "")
        .unwrap();
    let classroom = store
        .insert_environment("教室", "高三教室", "", "", "", "")
        .unwrap();
    store.activate_environment(&room.uuid).unwrap();

    kernel.chat("我们去教室吧").await.unwrap();

    let active = kernel.world().active_environment().unwrap().unwrap();
    assert_eq!(active.uuid, classroom.uuid);

    let notes: Vec<_> = store
        .all_messages()
        .unwrap()
        .into_iter()
        .filter(|m| m.role == "system")
        .collect();
    assert!(notes.iter().any(|m| m.content.contains("环境切换")));
}
