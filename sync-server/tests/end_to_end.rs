//! 端到端场景测试
//!
//! 在单进程内组装完整的服务器状态（全内存后端），验证写路径
//! 从 CAS 提交到缓存失效、Socket 通知、分布式中继的整条链路。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use shared::{Channel, EntityKind, SocketMessage};
use sync_server::{
    AppError, BackgroundTasks, Config, MemoryRelayTransport, MemorySink, RelayTransport,
    ServerState,
};

fn fields(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn recv_record_changed(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<SocketMessage>,
) -> SocketMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for socket message")
            .expect("socket closed");
        match msg {
            SocketMessage::RecordChanged { .. } => return msg,
            // 连接确认与心跳在本测试中是噪音
            _ => continue,
        }
    }
}

/// 两个客户端基于同一版本并发更新：先到者赢，后到者拿到
/// 携带当前版本的冲突；观察端收到恰好一条变更通知。
#[tokio::test]
async fn test_concurrent_update_scenario() {
    let mut tasks = BackgroundTasks::new();
    let state = ServerState::initialize(&Config::for_tests());
    state.start_background_tasks(&mut tasks);

    state
        .create_record(
            EntityKind::Stock,
            "42",
            fields(&[("current_stock", json!(5)), ("location", json!("A1"))]),
            "seeder",
        )
        .await
        .unwrap();

    // 管理端 Socket 连接
    let (sink, mut rx) = MemorySink::new();
    state
        .hub
        .register(Arc::new(sink), Channel::Admin, Some("ops".to_string()))
        .await;

    // 预热缓存，验证更新后被失效
    state.read_record(EntityKind::Stock, "42").await.unwrap();

    // 客户端 A：期望版本 1，成功产生版本 2
    let updated = state
        .update_record(
            "42",
            1,
            fields(&[("current_stock", json!(10))]),
            "client_a",
            None,
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    state.bus.flush().await;

    // 客户端 B：同样期望版本 1，在 CAS 层拿到携带当前版本的冲突
    let err = state
        .store
        .update(
            "42",
            1,
            fields(&[("current_stock", json!(7))]),
            "client_b",
            None,
        )
        .await
        .unwrap_err();
    match err {
        AppError::Conflict {
            expected, current, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(current, 2);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    // 管理端收到恰好一条变更通知
    match recv_record_changed(&mut rx).await {
        SocketMessage::RecordChanged {
            event_type,
            entity_id,
            new_version,
            updated_by,
            ..
        } => {
            assert_eq!(event_type, "stock_updated");
            assert_eq!(entity_id, "42");
            assert_eq!(new_version, 2);
            assert_eq!(updated_by, "client_a");
        }
        other => panic!("unexpected message {:?}", other),
    }
    assert!(rx.try_recv().is_err());

    // 缓存中的旧值已被失效，重读看到版本 2
    let fresh = state.read_record(EntityKind::Stock, "42").await.unwrap();
    assert_eq!(fresh["version"], json!(2));
    assert_eq!(fresh["fields"]["current_stock"], json!(10));

    tasks.shutdown().await;
}

/// 冲突重试：过期版本的请求经编排管线自动刷新版本后成功。
#[tokio::test]
async fn test_stale_writer_recovers_via_pipeline() {
    let mut tasks = BackgroundTasks::new();
    let state = ServerState::initialize(&Config::for_tests());
    state.start_background_tasks(&mut tasks);

    state
        .create_record(
            EntityKind::Catalog,
            "7",
            fields(&[("name", json!("widget")), ("price", json!(9.5))]),
            "seeder",
        )
        .await
        .unwrap();
    state
        .update_record("7", 1, fields(&[("price", json!(8.0))]), "first", None)
        .await
        .unwrap();

    // 期望版本 1 已过期；管线以刷新后的版本 2 重试成功
    let updated = state
        .update_record("7", 1, fields(&[("price", json!(7.0))]), "second", None)
        .await
        .unwrap();
    assert_eq!(updated.version, 3);
    assert_eq!(updated.fields["price"], json!(7.0));

    tasks.shutdown().await;
}

/// 回滚走与更新相同的通知链路，且历史可追溯。
#[tokio::test]
async fn test_rollback_notifies_subscribers() {
    let mut tasks = BackgroundTasks::new();
    let state = ServerState::initialize(&Config::for_tests());
    state.start_background_tasks(&mut tasks);

    state
        .create_record(
            EntityKind::Stock,
            "42",
            fields(&[("current_stock", json!(10))]),
            "seeder",
        )
        .await
        .unwrap();
    state
        .update_record("42", 1, fields(&[("current_stock", json!(3))]), "alice", None)
        .await
        .unwrap();

    let (sink, mut rx) = MemorySink::new();
    state
        .hub
        .register(Arc::new(sink), Channel::Admin, None)
        .await;

    let rolled = state.rollback_record("42", 1, "admin").await.unwrap();
    assert_eq!(rolled.version, 3);
    assert_eq!(rolled.fields["current_stock"], json!(10));
    state.bus.flush().await;

    match recv_record_changed(&mut rx).await {
        SocketMessage::RecordChanged { new_version, .. } => assert_eq!(new_version, 3),
        other => panic!("unexpected message {:?}", other),
    }

    let history = state.record_history("42", None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_rollback());

    tasks.shutdown().await;
}

/// 两个实例共享中继传输层：一端提交，另一端失效缓存并广播。
#[tokio::test]
async fn test_distributed_relay_between_instances() {
    let mut tasks = BackgroundTasks::new();
    let config = Config::for_tests();
    let transport: Arc<dyn RelayTransport> = Arc::new(MemoryRelayTransport::new(64));

    let state_a = ServerState::initialize_with_transport(&config, transport.clone());
    let state_b = ServerState::initialize_with_transport(&config, transport);
    state_a.start_background_tasks(&mut tasks);
    state_b.start_background_tasks(&mut tasks);

    // 两个实例各自持有同一实体的副本（存储不共享，事件共享）
    for state in [&state_a, &state_b] {
        state
            .create_record(
                EntityKind::Stock,
                "42",
                fields(&[("current_stock", json!(5))]),
                "seeder",
            )
            .await
            .unwrap();
    }

    // B 端：预热缓存 + 挂一个管理端连接
    state_b.read_record(EntityKind::Stock, "42").await.unwrap();
    let (sink, mut rx) = MemorySink::new();
    state_b
        .hub
        .register(Arc::new(sink), Channel::Admin, None)
        .await;

    // A 端提交更新
    state_a
        .update_record(
            "42",
            1,
            fields(&[("current_stock", json!(10))]),
            "client_a",
            None,
        )
        .await
        .unwrap();
    state_a.bus.flush().await;

    // B 端通过中继收到事件：Socket 广播可观察
    match recv_record_changed(&mut rx).await {
        SocketMessage::RecordChanged {
            event_type,
            new_version,
            ..
        } => {
            assert_eq!(event_type, "stock_updated");
            assert_eq!(new_version, 2);
        }
        other => panic!("unexpected message {:?}", other),
    }

    // B 端缓存的该记录已被订阅者失效（下一次读取回源）
    state_b.bus.flush().await;
    let stats_before = state_b.cache_stats().await;
    state_b.read_record(EntityKind::Stock, "42").await.unwrap();
    let stats_after = state_b.cache_stats().await;
    assert_eq!(stats_after.misses, stats_before.misses + 1);

    tasks.shutdown().await;
}
