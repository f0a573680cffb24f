//! MessageStore 集成测试（内存 SQLite）

use futures_util::future::join_all;
use openim_chatlog::im::constant::{
    MSG_STATUS_HAS_DELETED, MSG_STATUS_SENDING, MSG_STATUS_SEND_FAILED, MSG_STATUS_SEND_SUCCESS,
    PICTURE,
};
use openim_chatlog::{
    AckFields, KeywordMatch, LocalChatLog, LockMode, MessagePatch, MessageStore, StoreConfig,
    StoreError, TimeRange,
};
use std::sync::{Arc, Once};

static INIT_LOGGER: Once = Once::new();

fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,openim_chatlog=debug");
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}

async fn store_with(lock_mode: LockMode) -> MessageStore {
    init_test_logger();
    let config = StoreConfig {
        lock_mode,
        ..StoreConfig::memory()
    };
    MessageStore::new(&config).await.expect("open store")
}

async fn store() -> MessageStore {
    store_with(LockMode::Global).await
}

fn msg(id: &str, content: &str, send_time: i64) -> LocalChatLog {
    LocalChatLog::text("c1", id, "u1", content, send_time)
}

fn ids(msgs: &[LocalChatLog]) -> Vec<&str> {
    msgs.iter().map(|m| m.client_msg_id.as_str()).collect()
}

/// 按 send_time 1000、2000 …… 插入 n 条，seq 从 1 开始
async fn seed(store: &MessageStore, n: i64) {
    let msgs: Vec<_> = (1..=n)
        .map(|i| {
            let mut m = msg(&format!("m{i}"), &format!("body {i}"), i * 1000);
            m.seq = i;
            m.status = MSG_STATUS_SEND_SUCCESS;
            m
        })
        .collect();
    store.batch_insert("c1", &msgs).await.unwrap();
}

#[tokio::test]
async fn first_access_creates_shard_once() {
    let store = store().await;
    assert!(!store.registry().shard_exists("c1").await.unwrap());

    assert!(store.list_recent("c1", 10, false).await.unwrap().is_empty());
    assert!(store.registry().is_cached("c1"));
    assert!(store.registry().shard_exists("c1").await.unwrap());

    let t1 = store.registry().ensure("c1").await.unwrap();
    let t2 = store.registry().ensure("c1").await.unwrap();
    assert_eq!(t1, t2);
}

#[tokio::test]
async fn duplicate_client_msg_id_is_constraint_violation() {
    let store = store().await;
    store.insert("c1", &msg("m1", "first", 1000)).await.unwrap();

    let err = store
        .insert("c1", &msg("m1", "second", 2000))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation { .. }));
    assert_eq!(store.count("c1").await.unwrap(), 1);
    assert_eq!(
        store.get_by_client_id("c1", "m1").await.unwrap().content,
        "first"
    );

    // 不同会话互不影响
    store.insert("c2", &msg("m1", "other", 1000)).await.unwrap();
}

#[tokio::test]
async fn update_by_missing_seq_is_no_rows_affected() {
    let store = store().await;
    seed(&store, 3).await;
    let before = store.list_recent("c1", 10, false).await.unwrap();

    let patch = MessagePatch {
        content: Some("changed".into()),
        ..Default::default()
    };
    let err = store.update_by_seq("c1", 99, &patch).await.unwrap_err();
    assert!(err.is_no_rows_affected());
    assert!(!err.is_not_found());

    let after = store.list_recent("c1", 10, false).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn list_recent_orders_and_limits() {
    let store = store().await;
    seed(&store, 5).await;

    let desc = store.list_recent("c1", 3, false).await.unwrap();
    assert_eq!(ids(&desc), vec!["m5", "m4", "m3"]);
    assert!(desc.windows(2).all(|w| w[0].send_time >= w[1].send_time));

    let asc = store.list_recent("c1", 10, true).await.unwrap();
    assert_eq!(asc.len(), 5);
    assert!(asc.windows(2).all(|w| w[0].send_time <= w[1].send_time));
}

#[tokio::test]
async fn list_before_is_exclusive_keyset() {
    let store = store().await;
    seed(&store, 5).await;

    let older = store.list_before("c1", 10, 3000, false).await.unwrap();
    assert_eq!(ids(&older), vec!["m2", "m1"]);
    assert!(older.iter().all(|m| m.send_time < 3000));

    let newer = store.list_before("c1", 1, 3000, true).await.unwrap();
    assert_eq!(ids(&newer), vec!["m4"]);

    let newer = store.list_before("c1", 10, 3000, true).await.unwrap();
    assert_eq!(ids(&newer), vec!["m4", "m5"]);
    assert!(newer.iter().all(|m| m.send_time > 3000));
}

#[tokio::test]
async fn equal_send_time_breaks_ties_by_seq() {
    let store = store().await;
    let mut a = msg("a", "x", 1000);
    a.seq = 2;
    let mut b = msg("b", "x", 1000);
    b.seq = 1;
    let c = msg("c", "x", 1000);
    store.batch_insert("c1", &[a, b, c]).await.unwrap();

    let desc = store.list_recent("c1", 10, false).await.unwrap();
    assert_eq!(ids(&desc), vec!["a", "b", "c"]);
    let asc = store.list_recent("c1", 10, true).await.unwrap();
    assert_eq!(ids(&asc), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn keyword_search_or_and() {
    let store = store().await;
    store
        .batch_insert(
            "c1",
            &[
                msg("foo", "only foo here", 1000),
                msg("bar", "just bar", 2000),
                msg("both", "foo and bar", 3000),
                msg("none", "nothing", 4000),
            ],
        )
        .await
        .unwrap();

    let or = store
        .search_by_keyword(
            &[],
            &["foo", "bar"],
            KeywordMatch::Or,
            "c1",
            TimeRange::all(),
            0,
            100,
        )
        .await
        .unwrap();
    assert_eq!(ids(&or), vec!["both", "bar", "foo"]);

    let and = store
        .search_by_keyword(
            &[],
            &["foo", "bar"],
            KeywordMatch::And,
            "c1",
            TimeRange::all(),
            0,
            100,
        )
        .await
        .unwrap();
    assert_eq!(ids(&and), vec!["both"]);

    let all = store
        .search_all(&[], "c1", &["foo", "bar"], KeywordMatch::And, TimeRange::all())
        .await
        .unwrap();
    assert_eq!(ids(&all), vec!["both"]);
}

#[tokio::test]
async fn keyword_search_is_literal_and_case_sensitive() {
    let store = store().await;
    store
        .batch_insert(
            "c1",
            &[
                msg("q", "it's 100% done", 1000),
                msg("upper", "Hello", 2000),
                msg("lower", "hello", 3000),
            ],
        )
        .await
        .unwrap();

    let quoted = store
        .search_all(&[], "c1", &["it's 100%"], KeywordMatch::Or, TimeRange::all())
        .await
        .unwrap();
    assert_eq!(ids(&quoted), vec!["q"]);

    let injected = store
        .search_all(
            &[],
            "c1",
            &["' OR 1=1 --"],
            KeywordMatch::Or,
            TimeRange::all(),
        )
        .await
        .unwrap();
    assert!(injected.is_empty());

    let wildcard = store
        .search_all(&[], "c1", &["_ello"], KeywordMatch::Or, TimeRange::all())
        .await
        .unwrap();
    assert!(wildcard.is_empty());

    let hello = store
        .search_all(&[], "c1", &["Hello"], KeywordMatch::Or, TimeRange::all())
        .await
        .unwrap();
    assert_eq!(ids(&hello), vec!["upper"]);
}

#[tokio::test]
async fn search_filters_type_range_status_and_pages() {
    let store = store().await;
    let mut pic = msg("pic", "foo", 1500);
    pic.content_type = PICTURE;
    let mut failed = msg("failed", "foo", 2500);
    failed.status = MSG_STATUS_SEND_FAILED;
    let mut deleted = msg("deleted", "foo", 3500);
    deleted.status = MSG_STATUS_HAS_DELETED;
    store
        .batch_insert(
            "c1",
            &[
                msg("t1", "foo", 1000),
                pic,
                msg("t2", "foo", 2000),
                failed,
                msg("t3", "foo", 3000),
                deleted,
                msg("t4", "foo", 9000),
            ],
        )
        .await
        .unwrap();

    let text = openim_chatlog::im::constant::TEXT;
    let hits = store
        .search_by_keyword(
            &[text],
            &["foo"],
            KeywordMatch::Or,
            "c1",
            TimeRange::new(1000, 3500),
            0,
            100,
        )
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["t3", "failed", "t2", "t1"]);

    let page = store
        .search_by_keyword(
            &[text],
            &["foo"],
            KeywordMatch::Or,
            "c1",
            TimeRange::new(1000, 3500),
            1,
            2,
        )
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["failed", "t2"]);

    let pics = store
        .search_by_content_type(&[PICTURE], "c1", TimeRange::all(), 0, 10)
        .await
        .unwrap();
    assert_eq!(ids(&pics), vec!["pic"]);

    let err = store
        .search_by_content_type(&[text], "c1", TimeRange::new(10, 1), 0, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::QueryBuild(_)));
}

#[tokio::test]
async fn delete_by_client_ids_removes_exactly_those_rows() {
    let store = store().await;
    seed(&store, 4).await;
    let untouched_before = store
        .get_by_client_ids("c1", &["m2".to_string(), "m4".to_string()])
        .await
        .unwrap();

    let removed = store
        .delete_by_client_ids("c1", &["m1".to_string(), "m3".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let rest = store.list_recent("c1", 10, false).await.unwrap();
    assert_eq!(rest, untouched_before);
    assert_eq!(store.delete_by_client_ids("c1", &[]).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_by_seqs_and_lookup_by_seqs() {
    let store = store().await;
    seed(&store, 4).await;
    assert_eq!(store.max_seq("c1").await.unwrap(), 4);

    let found = store.get_by_seqs("c1", &[1, 3, 42]).await.unwrap();
    assert_eq!(ids(&found), vec!["m3", "m1"]);

    assert_eq!(store.delete_by_seqs("c1", &[2, 4]).await.unwrap(), 2);
    assert_eq!(store.max_seq("c1").await.unwrap(), 3);
    assert!(store.get_by_seq("c1", 2).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn soft_delete_keeps_rows_hard_delete_empties() {
    let store = store().await;
    seed(&store, 3).await;

    assert_eq!(store.soft_delete_all("c1").await.unwrap(), 3);
    assert_eq!(store.count("c1").await.unwrap(), 3);
    let rows = store.list_recent("c1", 10, false).await.unwrap();
    assert!(rows.iter().all(|m| m.status == MSG_STATUS_HAS_DELETED));

    // 软删除的消息不会再被搜到
    let hits = store
        .search_all(&[], "c1", &["body"], KeywordMatch::Or, TimeRange::all())
        .await
        .unwrap();
    assert!(hits.is_empty());

    assert_eq!(store.delete_all("c1").await.unwrap(), 3);
    assert_eq!(store.count("c1").await.unwrap(), 0);
}

#[tokio::test]
async fn soft_delete_by_client_ids_flags_only_those_rows() {
    let store = store().await;
    seed(&store, 3).await;

    let targets = vec!["m1".to_string(), "m3".to_string(), "missing".to_string()];
    assert_eq!(store.soft_delete_by_client_ids("c1", &targets).await.unwrap(), 2);
    assert_eq!(store.soft_delete_by_client_ids("c1", &[]).await.unwrap(), 0);

    assert_eq!(store.count("c1").await.unwrap(), 3);
    let m1 = store.get_by_client_id("c1", "m1").await.unwrap();
    assert_eq!(m1.status, MSG_STATUS_HAS_DELETED);
    let m2 = store.get_by_client_id("c1", "m2").await.unwrap();
    assert_eq!(m2.status, MSG_STATUS_SEND_SUCCESS);

    let hits = store
        .search_all(&[], "c1", &["body"], KeywordMatch::Or, TimeRange::all())
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["m2"]);
}

#[tokio::test]
async fn unbounded_range_includes_negative_send_time() {
    let store = store().await;
    store.insert("c1", &msg("early", "old body", -5_000)).await.unwrap();
    store.insert("c1", &msg("late", "new body", 5_000)).await.unwrap();

    let hits = store
        .search_all(&[], "c1", &["body"], KeywordMatch::Or, TimeRange::all())
        .await
        .unwrap();
    assert_eq!(ids(&hits), vec!["late", "early"]);

    let by_type = store
        .search_by_content_type(&[], "c1", TimeRange::all(), 0, 10)
        .await
        .unwrap();
    assert_eq!(by_type.len(), 2);
}

#[tokio::test]
async fn patch_sender_profile_updates_every_row_of_sender() {
    let store = store().await;
    let mut other = msg("o1", "hi", 3000);
    other.send_id = "u2".into();
    other.sender_nickname = "bob".into();
    store
        .batch_insert("c1", &[msg("a1", "x", 1000), msg("a2", "y", 2000), other])
        .await
        .unwrap();

    let n = store
        .patch_sender_profile("c1", "u1", "https://face/new.png", "alice")
        .await
        .unwrap();
    assert_eq!(n, 2);

    for id in ["a1", "a2"] {
        let m = store.get_by_client_id("c1", id).await.unwrap();
        assert_eq!(m.sender_nickname, "alice");
        assert_eq!(m.sender_face_url, "https://face/new.png");
    }
    let o = store.get_by_client_id("c1", "o1").await.unwrap();
    assert_eq!(o.sender_nickname, "bob");
    assert_eq!(o.sender_face_url, "");
}

#[tokio::test]
async fn ack_moves_message_out_of_unacknowledged_state() {
    let store = store().await;
    let mut m1 = LocalChatLog::text("c1", "m1", "u1", "hello", 1000);
    m1.status = MSG_STATUS_SENDING;
    store.insert("c1", &m1).await.unwrap();

    let ack = AckFields {
        server_msg_id: "s1".into(),
        send_time: 1005,
        status: MSG_STATUS_SEND_SUCCESS,
        seq: 1,
    };
    store.set_ack_fields("c1", "m1", &ack).await.unwrap();

    let acked = store.get_by_seq("c1", 1).await.unwrap();
    assert_eq!(acked.client_msg_id, "m1");
    assert_eq!(acked.server_msg_id, "s1");
    assert_eq!(acked.send_time, 1005);
    assert_eq!(acked.status, MSG_STATUS_SEND_SUCCESS);

    // ack 之后走按 seq 更新的路径
    let patch = MessagePatch {
        local_ex: Some("pinned".into()),
        ..Default::default()
    };
    store.update_by_seq("c1", 1, &patch).await.unwrap();

    // 第二次 ack 找不到 seq = 0 的行
    let again = AckFields {
        server_msg_id: "s2".into(),
        send_time: 9999,
        status: MSG_STATUS_SEND_FAILED,
        seq: 7,
    };
    let err = store.set_ack_fields("c1", "m1", &again).await.unwrap_err();
    assert!(err.is_no_rows_affected());

    let after = store.get_by_client_id("c1", "m1").await.unwrap();
    assert_eq!(after.seq, 1);
    assert_eq!(after.server_msg_id, "s1");
    assert_eq!(after.send_time, 1005);
    assert_eq!(after.local_ex, "pinned");
}

#[tokio::test]
async fn ack_and_seq_update_reject_non_positive_seq() {
    let store = store().await;
    store.insert("c1", &msg("m1", "x", 1)).await.unwrap();
    let ack = AckFields {
        server_msg_id: "s1".into(),
        send_time: 2,
        status: MSG_STATUS_SEND_SUCCESS,
        seq: 0,
    };
    assert!(matches!(
        store.set_ack_fields("c1", "m1", &ack).await,
        Err(StoreError::QueryBuild(_))
    ));
    let patch = MessagePatch {
        status: Some(MSG_STATUS_SEND_FAILED),
        ..Default::default()
    };
    assert!(matches!(
        store.update_by_seq("c1", 0, &patch).await,
        Err(StoreError::QueryBuild(_))
    ));
}

async fn concurrent_inserts(lock_mode: LockMode) {
    let store = Arc::new(store_with(lock_mode).await);
    let per_conversation = 25;

    let tasks = ["c1", "c2"].into_iter().flat_map(|conv| {
        let store = store.clone();
        (0..per_conversation).map(move |i| {
            let store = store.clone();
            tokio::spawn(async move {
                let m = LocalChatLog::text(conv, format!("{conv}-{i}"), "u1", "x", i);
                store.insert(conv, &m).await
            })
        })
    });
    for res in join_all(tasks).await {
        res.expect("task panicked").expect("insert failed");
    }

    for conv in ["c1", "c2"] {
        let rows = store.list_recent(conv, 1000, true).await.unwrap();
        assert_eq!(rows.len(), per_conversation as usize);
        assert!(rows
            .iter()
            .all(|m| m.client_msg_id.starts_with(&format!("{conv}-"))));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_global_lock() {
    concurrent_inserts(LockMode::Global).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_per_shard_lock() {
    concurrent_inserts(LockMode::PerShard).await;
}
