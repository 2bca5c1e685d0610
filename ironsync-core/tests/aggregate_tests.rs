// Integration tests for the aggregate builder over the in-memory executor
use ironsync_core::{
    Aggregate, IronSyncConfig, IronSyncError, MemoryExecutor, OrWhere, SortDirection,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

// Helper: `n` users with ids 1..=n
fn fixture(n: i64) -> Vec<Value> {
    (1..=n)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("user{}", i),
                "age": 20 + i % 10,
                "tags": (0..i % 4).map(|t| format!("t{}", t)).collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn setup(docs: Vec<Value>) -> (Arc<MemoryExecutor>, Aggregate) {
    let executor = Arc::new(MemoryExecutor::new());
    executor.seed("users", docs);
    let aggregate = Aggregate::new("users", executor.clone(), Arc::new(IronSyncConfig::default()));
    (executor, aggregate)
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

// ========== Paging tests ==========

#[tokio::test]
async fn test_paginate_second_page_of_25() {
    let (_, mut users) = setup(fixture(25));

    let listing = users.paginate(2, Some(10)).await.unwrap();

    assert!(listing.documents.len() <= 10);
    assert_eq!(listing.documents.len(), 10);
    assert_eq!(listing.documents[0]["id"], 11);
    assert_eq!(listing.pagination_info.total, 25);
    assert_eq!(listing.pagination_info.pages, 3);
    assert_eq!(listing.pagination_info.page, 2);
    assert!(users.stages().is_empty());
}

#[tokio::test]
async fn test_paginate_page_zero_reports_first_page() {
    let (_, mut users) = setup(fixture(25));

    let listing = users.paginate(0, Some(10)).await.unwrap();
    assert_eq!(listing.documents[0]["id"], 1);
    assert_eq!(listing.pagination_info.page, 1);
    assert_eq!(listing.pagination_info.result, 10);
}

#[tokio::test]
async fn test_paginate_uses_configured_page_size() {
    let executor = Arc::new(MemoryExecutor::new());
    executor.seed("users", fixture(25));
    let config = IronSyncConfig::default().with_per_page(20);
    let mut users = Aggregate::new("users", executor, Arc::new(config));

    let listing = users.paginate(2, None).await.unwrap();
    assert_eq!(listing.documents.len(), 5);
    assert_eq!(listing.pagination_info.limit, 20);
    assert_eq!(listing.pagination_info.pages, 2);
}

#[tokio::test]
async fn test_chunk_walks_every_page() {
    let (_, users) = setup(fixture(25));
    let mut sizes = Vec::new();

    users
        .chunk(10, |docs, info| {
            sizes.push((docs.len(), info.page));
            std::future::ready(true)
        })
        .await
        .unwrap();

    assert_eq!(sizes, vec![(10, 1), (10, 2), (5, 3)]);
}

#[tokio::test]
async fn test_chunk_stops_when_callback_returns_false() {
    let (_, users) = setup(fixture(25));
    let mut calls = 0;

    users
        .chunk(10, |_, _| {
            calls += 1;
            std::future::ready(false)
        })
        .await
        .unwrap();

    assert_eq!(calls, 1);
}

// ========== Builder tests ==========

#[tokio::test]
async fn test_clone_does_not_share_stages() {
    let (_, mut users) = setup(fixture(5));
    users.where_eq("age", json!(21)).order_by("id", SortDirection::Asc);

    let mut copy = users.clone();
    copy.limit(1);

    assert_eq!(users.stages().len(), 2);
    assert_eq!(copy.stages().len(), 3);
}

#[tokio::test]
async fn test_random_requires_a_limit() {
    let (_, mut users) = setup(fixture(10));
    assert!(matches!(users.random(None), Err(IronSyncError::MissingLimit)));

    users.limit(4);
    users.random(None).unwrap();
    let picked = users.get().await.unwrap();
    assert_eq!(picked.len(), 4);
    assert_eq!(users.compile().last(), Some(&json!({"$sample": {"size": 4}})));
}

#[tokio::test]
async fn test_unknown_operator_fails_at_call() {
    let (_, mut users) = setup(fixture(1));
    assert!(matches!(
        users.where_op("age", "approximately", json!(3)),
        Err(IronSyncError::UnknownOperator(_))
    ));
    assert!(users.stages().is_empty());
}

// ========== Filter tests ==========

#[tokio::test]
async fn test_like_is_unanchored_and_case_insensitive() {
    let (_, users) = setup(vec![
        json!({"name": "foo"}),
        json!({"name": "FOO"}),
        json!({"name": "xfoox"}),
        json!({"name": "bar"}),
    ]);

    let names = users
        .clone()
        .where_like("name", "Foo")
        .unwrap()
        .pluck("name")
        .await
        .unwrap();
    assert_eq!(names, vec![json!("foo"), json!("FOO"), json!("xfoox")]);

    let others = users
        .clone()
        .where_not_like("name", "foo")
        .unwrap()
        .pluck("name")
        .await
        .unwrap();
    assert_eq!(others, vec![json!("bar")]);
}

#[tokio::test]
async fn test_starts_with_is_anchored() {
    let (_, users) = setup(vec![json!({"name": "Foobar"}), json!({"name": "xFoobar"})]);

    let names = users
        .clone()
        .where_starts_with("name", json!("Foo"))
        .unwrap()
        .pluck("name")
        .await
        .unwrap();
    assert_eq!(names, vec![json!("Foobar")]);

    let ends = users
        .clone()
        .where_ends_with("name", json!("bar"))
        .unwrap()
        .count()
        .await
        .unwrap();
    assert_eq!(ends, 2);
}

#[tokio::test]
async fn test_between_and_not_between() {
    let (_, users) = setup(vec![json!({"x": 3}), json!({"x": 7}), json!({"x": 12})]);

    let inside = users
        .clone()
        .where_between("x", json!(5), json!(10))
        .unwrap()
        .pluck("x")
        .await
        .unwrap();
    assert_eq!(inside, vec![json!(7)]);

    let outside = users
        .clone()
        .where_not_between("x", json!(5), json!(10))
        .unwrap()
        .pluck("x")
        .await
        .unwrap();
    assert_eq!(outside, vec![json!(3), json!(12)]);
}

#[tokio::test]
async fn test_where_size_leaves_helper_column() {
    let (_, mut users) = setup(fixture(8));

    let docs = users.where_size("tags", ">=", 2).unwrap().get().await.unwrap();

    assert!(!docs.is_empty());
    for doc in &docs {
        let size = doc["tags"].as_array().unwrap().len() as u64;
        assert!(size >= 2);
        assert_eq!(doc["tags_size"], json!(size));
    }
}

#[tokio::test]
async fn test_or_where_shapes() {
    let (_, users) = setup(fixture(6));

    let pairs = users
        .clone()
        .or_where(OrWhere::Pairs(vec![
            ("id".into(), json!(1)),
            ("id".into(), json!(4)),
        ]))
        .count()
        .await
        .unwrap();
    assert_eq!(pairs, 2);

    let object = users
        .clone()
        .or_where(OrWhere::Object(object(json!({"id": 2, "name": "user5"}))))
        .pluck("id")
        .await
        .unwrap();
    assert_eq!(object, vec![json!(2), json!(5)]);
}

// ========== Write tests ==========

#[tokio::test]
async fn test_update_and_unset_matched_documents() {
    let (executor, users) = setup(fixture(10));

    let mut older = users.clone();
    older.where_op("age", ">=", json!(25)).unwrap();
    let modified = older.update(object(json!({"senior": true}))).await.unwrap();
    assert_eq!(modified, 5);

    let seniors = executor
        .documents("users")
        .into_iter()
        .filter(|doc| doc.get("senior") == Some(&json!(true)))
        .count();
    assert_eq!(seniors, 5);

    let removed = older.unset(&["senior"]).await.unwrap();
    assert_eq!(removed, 5);
    assert!(executor.documents("users").iter().all(|doc| doc.get("senior").is_none()));
}

#[tokio::test]
async fn test_delete_removes_only_matches() {
    let (executor, users) = setup(fixture(10));

    let deleted = users
        .clone()
        .where_op("id", ">", json!(7))
        .unwrap()
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(executor.documents("users").len(), 7);

    let none = users
        .clone()
        .where_eq("id", json!(99))
        .delete()
        .await
        .unwrap();
    assert_eq!(none, 0);
}

// ========== Grouping tests ==========

#[tokio::test]
async fn test_group_by_year_counts() {
    let (_, mut users) = setup(vec![
        json!({"createdAt": {"$date": "2023-04-01T00:00:00.000Z"}}),
        json!({"createdAt": {"$date": "2023-09-12T00:00:00.000Z"}}),
        json!({"createdAt": {"$date": "2024-01-05T00:00:00.000Z"}}),
    ]);

    let mut totals = Map::new();
    totals.insert("total".into(), ironsync_core::expression::agg::count());
    let groups = users
        .group_by_year("createdAt", Some(totals))
        .order_by("_id.year", SortDirection::Asc)
        .get()
        .await
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["_id"], json!({"year": 2023}));
    assert_eq!(groups[0]["total"], 2);
}
