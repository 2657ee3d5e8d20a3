//! Relationship embedding: one-hop resolution, batch ordering and
//! connection usage.

use std::sync::Arc;
use std::time::Duration;

use record_adapter::*;
use serde_json::{json, Value};

fn blog_schema() -> StaticSchema {
    StaticSchema::new()
        .has_many("User", "posts", "Post")
        .has_one("User", "profile", "Profile")
        .belongs_to("Post", "author", "User")
        .belongs_to("Comment", "post", "Post")
        .belongs_to("Comment", "user", "User")
}

async fn blog_with(config: AdapterConfig) -> (MemoryEngine, RecordAdapter) {
    let schema = blog_schema();
    let migrator = Migrator::new().with_migration(Migration::new(1, schema.type_names()));
    let engine = MemoryEngine::new();
    let adapter =
        RecordAdapter::new(config, Arc::new(engine.clone()), Arc::new(schema), migrator).unwrap();
    adapter.initialize().await.unwrap();

    for (type_name, record) in [
        ("User", json!({"id": "u1", "name": "Ada", "posts": ["p1", "p2"], "profile": "pr1"})),
        ("User", json!({"id": "u2", "name": "Grace", "posts": []})),
        ("Profile", json!({"id": "pr1", "bio": "analyst"})),
        ("Post", json!({"id": "p1", "title": "Notes", "author": "u1"})),
        ("Post", json!({"id": "p2", "title": "Engines", "author": "u1"})),
    ] {
        adapter
            .create_record(type_name, Record::try_from(record).unwrap())
            .await
            .unwrap();
    }
    engine.reset_stats();
    (engine, adapter)
}

async fn blog() -> (MemoryEngine, RecordAdapter) {
    blog_with(AdapterConfig::default()).await
}

fn embedded<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    record.embedded().and_then(|map| map.get(name))
}

#[tokio::test]
async fn has_many_embeds_related_records_in_scan_order() {
    let (engine, adapter) = blog().await;

    let user = adapter
        .find("User", "u1", FindOptions::default())
        .await
        .unwrap()
        .unwrap();

    let posts = embedded(&user, "posts").unwrap().as_array().unwrap();
    let post_ids: Vec<&Value> = posts.iter().map(|p| &p["id"]).collect();
    assert_eq!(post_ids, vec![&json!("p1"), &json!("p2")]);
    assert_eq!(embedded(&user, "profile").unwrap()["bio"], json!("analyst"));
    assert_eq!(engine.stats().open, 0);
}

#[tokio::test]
async fn resolution_stops_after_one_hop() {
    let (_engine, adapter) = blog().await;

    let post = adapter
        .find("Post", "p1", FindOptions::default())
        .await
        .unwrap()
        .unwrap();
    let author = embedded(&post, "author").unwrap();

    assert_eq!(author["id"], json!("u1"));
    // the author's own relationships stay as plain ids
    assert_eq!(author["posts"], json!(["p1", "p2"]));
    assert!(author.get(EMBEDDED_KEY).is_none());
}

#[tokio::test]
async fn shallow_find_does_not_embed() {
    let (engine, adapter) = blog().await;

    let user = adapter
        .find("User", "u1", FindOptions::shallow())
        .await
        .unwrap()
        .unwrap();
    assert!(user.embedded().is_none());
    assert_eq!(engine.stats().opened, 1);
}

#[tokio::test]
async fn record_without_relationship_fields_is_unchanged() {
    let (engine, adapter) = blog().await;
    let lone = Record::new().with("id", "p9").with("title", "Orphan");

    let loaded = adapter.load_relationships("Post", lone.clone()).await.unwrap();
    assert_eq!(loaded, lone);
    assert_eq!(engine.stats().opened, 0);
}

#[tokio::test]
async fn missing_target_leaves_key_absent() {
    let (_engine, adapter) = blog().await;
    let post = Record::new().with("id", "p9").with("author", "ghost");

    let loaded = adapter.load_relationships("Post", post).await.unwrap();
    assert!(embedded(&loaded, "author").is_none());
}

#[tokio::test]
async fn empty_has_many_still_embeds_a_list() {
    let (_engine, adapter) = blog().await;

    let user = adapter
        .find("User", "u2", FindOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(embedded(&user, "posts"), Some(&json!([])));
}

#[tokio::test]
async fn find_all_embeds_for_every_record() {
    let (engine, adapter) = blog().await;

    let posts = adapter.find_all("Post", FindOptions::default()).await.unwrap();
    assert_eq!(posts.len(), 2);
    for post in &posts {
        assert_eq!(embedded(post, "author").unwrap()["id"], json!("u1"));
    }
    assert_eq!(engine.stats().open, 0);
}

#[tokio::test]
async fn query_resolves_only_matches() {
    let (engine, adapter) = blog().await;

    let found = adapter
        .find_query("Post", &Query::new().equals("title", "Engines"), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(embedded(&found[0], "author").is_some());
    // scan + one author lookup
    assert_eq!(engine.stats().opened, 2);
}

#[tokio::test]
async fn failing_relationship_fails_the_record() {
    let (engine, adapter) = blog().await;
    engine.fail_next_opens(1);

    let post = Record::new().with("id", "p9").with("author", "u1");
    let err = adapter.load_relationships("Post", post).await.unwrap_err();
    assert!(matches!(err, AdapterError::Connection { .. }));
    assert_eq!(engine.stats().open, 0);
}

#[tokio::test]
async fn batch_failure_reports_index() {
    let (engine, adapter) = blog().await;

    let records = vec![
        Record::new().with("id", "c1").with("post", "p1"),
        Record::new().with("id", "c2").with("post", json!({"not": "an id"})),
        Record::new().with("id", "c3").with("post", "p2"),
    ];
    let err = adapter
        .load_relationships_for_many("Comment", records)
        .await
        .unwrap_err();

    match err {
        AdapterError::Relationship { index, source, .. } => {
            assert_eq!(index, 1);
            assert!(matches!(*source, AdapterError::InvalidReference { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.stats().open, 0);
}

#[tokio::test]
async fn empty_batch_opens_nothing() {
    let (engine, adapter) = blog().await;
    let out = adapter
        .load_relationships_for_many("Comment", Vec::new())
        .await
        .unwrap();
    assert!(out.is_empty());
    assert_eq!(engine.stats().opened, 0);
}

#[tokio::test(start_paused = true)]
async fn batch_keeps_input_order_when_later_records_finish_first() {
    let config = AdapterConfig::default().with_relationship_concurrency(2);
    let (engine, adapter) = blog_with(config).await;
    engine.set_latency("Post", Duration::from_millis(50));
    engine.set_latency("User", Duration::from_millis(5));

    let records = vec![
        Record::new().with("id", "c1").with("post", "p1"),
        Record::new().with("id", "c2").with("user", "u1"),
    ];
    let out = adapter
        .load_relationships_for_many("Comment", records)
        .await
        .unwrap();

    let ids: Vec<Option<RecordKey>> = out.iter().map(Record::key).collect();
    assert_eq!(ids, vec![Some("c1".into()), Some("c2".into())]);
    assert!(embedded(&out[0], "post").is_some());
    assert!(embedded(&out[1], "user").is_some());
    assert_eq!(engine.stats().peak, 2);
}

#[tokio::test(start_paused = true)]
async fn sequential_batch_keeps_input_order_with_uneven_latency() {
    let (engine, adapter) = blog().await;
    engine.set_latency("Post", Duration::from_millis(50));
    engine.set_latency("User", Duration::from_millis(5));

    let records = vec![
        Record::new().with("id", "c1").with("post", "p1"),
        Record::new().with("id", "c2").with("post", "p2"),
        Record::new().with("id", "c3").with("user", "u1"),
    ];
    let out = adapter
        .load_relationships_for_many("Comment", records)
        .await
        .unwrap();

    let ids: Vec<Option<RecordKey>> = out.iter().map(Record::key).collect();
    assert_eq!(
        ids,
        vec![Some("c1".into()), Some("c2".into()), Some("c3".into())]
    );
    assert_eq!(embedded(&out[0], "post").unwrap()["id"], json!("p1"));
    assert_eq!(embedded(&out[1], "post").unwrap()["id"], json!("p2"));
    assert_eq!(embedded(&out[2], "user").unwrap()["id"], json!("u1"));
    // one relationship per comment, one comment at a time
    assert_eq!(engine.stats().peak, 1);
}

#[tokio::test(start_paused = true)]
async fn sequential_batch_caps_open_connections() {
    let (engine, adapter) = blog().await;
    engine.set_latency("Post", Duration::from_millis(10));
    engine.set_latency("User", Duration::from_millis(10));

    let comments: Vec<Record> = (0..4)
        .map(|i| {
            Record::new()
                .with("id", format!("c{i}"))
                .with("post", "p1")
                .with("user", "u2")
        })
        .collect();
    let out = adapter
        .load_relationships_for_many("Comment", comments)
        .await
        .unwrap();

    assert_eq!(out.len(), 4);
    let stats = engine.stats();
    // two fetches per comment, one comment at a time
    assert_eq!(stats.peak, 2);
    assert_eq!(stats.opened, 8);
    assert_eq!(stats.open, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_operation_times_out_and_releases_its_connection() {
    let config = AdapterConfig::default().with_request_timeout(Duration::from_millis(20));
    let (engine, adapter) = blog_with(config).await;
    engine.set_latency("Post", Duration::from_millis(100));

    let err = adapter
        .find("Post", "p1", FindOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Timeout(_)));
    assert_eq!(engine.stats().open, 0);
}
