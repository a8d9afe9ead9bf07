use std::time::Duration;

use mockito::Matcher;
use ticklist_core::remote::{RemoteSettings, RestTable, TodoTable};
use ticklist_core::todo::{Todo, TodoPatch};

fn settings(url: String) -> RemoteSettings {
    RemoteSettings {
        url,
        key: "anon-key".to_string(),
        table: "todos".to_string(),
        owner: "demo-user-001".to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn owner() -> Matcher {
    Matcher::UrlEncoded("user_id".into(), "eq.demo-user-001".into())
}

#[tokio::test]
async fn fetch_all_scopes_by_owner_newest_first() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/rest/v1/todos")
        .match_query(Matcher::AllOf(vec![
            owner(),
            Matcher::UrlEncoded("order".into(), "created_at.desc".into()),
        ]))
        .match_header("apikey", "anon-key")
        .match_header("authorization", "Bearer anon-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"id":"b","text":"Newer","completed":true,"emoji":null,
                 "created_at":"2024-01-02T00:00:00+00:00","user_id":"demo-user-001"},
                {"id":"a","text":"Older","completed":false,"emoji":"📌",
                 "created_at":"2024-01-01T00:00:00+00:00","user_id":"demo-user-001"}
            ]"#,
        )
        .create_async()
        .await;

    let table = RestTable::new(&settings(server.url())).expect("client");
    let todos = table.fetch_all().await.expect("fetch");

    mock.assert_async().await;
    assert_eq!(todos.len(), 2);
    assert_eq!(todos[0].id, "b");
    assert!(todos[0].completed);
    assert_eq!(todos[0].created_at, 1_704_153_600_000);
    assert_eq!(todos[1].emoji.as_deref(), Some("📌"));
}

#[tokio::test]
async fn insert_returns_canonical_row() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/rest/v1/todos")
        .match_query(Matcher::Any)
        .match_header("prefer", "return=representation")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "id": "tmp-1",
            "text": "Call mom",
            "completed": false,
            "user_id": "demo-user-001"
        })))
        .with_status(201)
        .with_body(
            r#"[{"id":"tmp-1","text":"Call mom","completed":false,"emoji":"📞",
                 "created_at":"2024-01-01T00:00:00.250+00:00","user_id":"demo-user-001"}]"#,
        )
        .create_async()
        .await;

    let table = RestTable::new(&settings(server.url())).expect("client");
    let local = Todo {
        id: "tmp-1".to_string(),
        text: "Call mom".to_string(),
        completed: false,
        emoji: None,
        created_at: 1_704_067_200_000,
    };

    let stored = table.insert(&local).await.expect("insert");
    mock.assert_async().await;
    assert_eq!(stored.id, "tmp-1");
    assert_eq!(stored.emoji.as_deref(), Some("📞"));
    assert_eq!(stored.created_at, 1_704_067_200_250);
}

#[tokio::test]
async fn update_sends_partial_fields_and_surfaces_errors() {
    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("PATCH", "/rest/v1/todos")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("id".into(), "eq.a".into()),
            owner(),
        ]))
        .match_body(Matcher::Json(serde_json::json!({ "completed": true })))
        .with_status(204)
        .create_async()
        .await;

    let table = RestTable::new(&settings(server.url())).expect("client");
    table
        .update("a", &TodoPatch::completed(true))
        .await
        .expect("update");
    ok.assert_async().await;

    let failing = server
        .mock("PATCH", "/rest/v1/todos")
        .match_query(Matcher::UrlEncoded("id".into(), "eq.b".into()))
        .with_status(401)
        .with_body(r#"{"message":"invalid key"}"#)
        .create_async()
        .await;

    let err = table
        .update("b", &TodoPatch::text("x"))
        .await
        .expect_err("401 should fail");
    failing.assert_async().await;
    assert!(format!("{err:#}").contains("401"));
}

#[tokio::test]
async fn delete_many_uses_in_filter() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("DELETE", "/rest/v1/todos")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("id".into(), r#"in.("a","b")"#.into()),
            owner(),
        ]))
        .with_status(204)
        .create_async()
        .await;

    let table = RestTable::new(&settings(server.url())).expect("client");
    table
        .delete_many(&["a".to_string(), "b".to_string()])
        .await
        .expect("delete many");
    table.delete_many(&[]).await.expect("empty list is a no-op");

    mock.assert_async().await;
}
