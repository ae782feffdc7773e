//! `HostedStore` against a `wiremock` PostgREST stand-in.

use serde_json::{json, Value};
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use igminer_core::{Comment, Post, UserProfile};
use igminer_db::{HostedConfig, HostedStore, Storage, StorageError, UpsertOutcome};

fn store(server: &MockServer, bucket: Option<&str>) -> HostedStore {
    HostedStore::new(HostedConfig {
        url: format!("{}/", server.uri()),
        key: "service-key".to_owned(),
        schema: "igminer".to_owned(),
        bucket: bucket.map(str::to_owned),
    })
    .expect("hosted store")
}

fn post(code: &str) -> Post {
    Post {
        code: code.to_owned(),
        username: "linwei".to_owned(),
        caption: Some("Golden hour #travel".to_owned()),
        hashtags: vec!["#travel".to_owned()],
        likes: Some(12),
        comments_count: 1,
        views: None,
        media_type: 1,
        image_url: None,
        storage_url: None,
        location_name: None,
        location_lat: None,
        location_lng: None,
        posted_at: None,
        word_count: 3,
    }
}

fn merge_prefer(req: &Request) -> bool {
    req.headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "resolution=merge-duplicates,return=minimal")
}

fn first_body_row(req: &Request) -> Value {
    let body: Value = serde_json::from_slice(&req.body).expect("json body");
    body[0].clone()
}

#[tokio::test]
async fn new_post_is_inserted_with_merge_headers_and_without_nulls() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_posts"))
        .and(query_param("code", "eq.P1"))
        .and(header("accept-profile", "igminer"))
        .and(header("apikey", "service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/ig_posts"))
        .and(query_param("on_conflict", "code"))
        .and(header("authorization", "Bearer service-key"))
        .and(header("content-profile", "igminer"))
        .and(merge_prefer)
        .and(|req: &Request| {
            let row = first_body_row(req);
            row["id"] == "P1" && row["likes"] == 12 && row.get("views").is_none()
        })
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = store(&server, None).upsert_post(&post("P1")).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Inserted);
}

#[tokio::test]
async fn known_post_reports_updated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"code": "P1"}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/ig_posts"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let outcome = store(&server, None).upsert_post(&post("P1")).await.unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated);
}

#[tokio::test]
async fn comment_upsert_writes_author_stub_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/ig_users"))
        .and(|req: &Request| first_body_row(req) == json!({"username": "fan"}))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_comments"))
        .and(query_param("post_id", "eq.P1"))
        .and(query_param("id", "eq.42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/ig_comments"))
        .and(query_param("on_conflict", "post_id,id"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let comment = Comment {
        id: "42".to_owned(),
        post_id: "P1".to_owned(),
        username: "fan".to_owned(),
        text: "stunning".to_owned(),
        likes: 0,
        posted_at: None,
    };
    let outcome = store(&server, None).upsert_comment(&comment).await.unwrap();
    assert!(outcome.is_new());
}

#[tokio::test]
async fn rejected_write_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409).set_body_string("foreign key violation"))
        .mount(&server)
        .await;

    let err = store(&server, None)
        .upsert_user(&UserProfile::stub("x", None, false))
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::Hosted { status: 409, ref body, .. } if body.contains("foreign key")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn counts_come_from_content_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_posts"))
        .and(header("prefer", "count=exact"))
        .and(header("range", "0-0"))
        .respond_with(ResponseTemplate::new(206).insert_header("content-range", "0-0/1532"))
        .mount(&server)
        .await;

    assert_eq!(store(&server, None).count_posts().await.unwrap(), 1532);
}

#[tokio::test]
async fn stats_counts_enriched_users_with_followers_filter() {
    let server = MockServer::start().await;
    for (table, total) in [("ig_posts", "10"), ("ig_comments", "25"), ("ig_users", "7")] {
        Mock::given(method("GET"))
            .and(path(format!("/rest/v1/{table}")))
            .and(|req: &Request| !req.url.query().unwrap_or("").contains("followers"))
            .respond_with(
                ResponseTemplate::new(206).insert_header("content-range", format!("0-0/{total}")),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_users"))
        .and(query_param("followers", "not.is.null"))
        .respond_with(ResponseTemplate::new(206).insert_header("content-range", "0-0/3"))
        .mount(&server)
        .await;

    let stats = store(&server, None).stats().await.unwrap();
    assert_eq!(
        (stats.posts, stats.comments, stats.users, stats.enriched_users),
        (10, 25, 7, 3)
    );
}

#[tokio::test]
async fn posts_needing_comments_excludes_posts_with_stored_comments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_comments"))
        .and(query_param("select", "post_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"post_id": "B"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_posts"))
        .and(query_param("comments_count", "gt.0"))
        .and(query_param("order", "likes.desc.nullslast,code.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"code": "A", "comments_count": 9},
            {"code": "B", "comments_count": 4},
            {"code": "C", "comments_count": 1}
        ])))
        .mount(&server)
        .await;

    let posts = store(&server, None).posts_needing_comments(1).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].code, "A");
    assert_eq!(posts[0].comments_count, 9);
}

#[tokio::test]
async fn existing_codes_page_through_results() {
    let server = MockServer::start().await;
    let full_page: Vec<Value> = (0..1000).map(|i| json!({"code": format!("C{i}")})).collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_posts"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(full_page))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/ig_posts"))
        .and(query_param("offset", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"code": "LAST"}])))
        .expect(1)
        .mount(&server)
        .await;

    let codes = store(&server, None).existing_post_codes().await.unwrap();
    assert_eq!(codes.len(), 1001);
    assert!(codes.contains("LAST"));
}

#[tokio::test]
async fn image_upload_returns_public_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/media/P1.jpg"))
        .and(header("content-type", "image/jpeg"))
        .and(body_bytes(vec![0xFF, 0xD8]))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = store(&server, Some("media"))
        .store_image(&[0xFF, 0xD8], "P1.jpg")
        .await
        .unwrap();
    assert_eq!(
        url,
        Some(format!("{}/storage/v1/object/public/media/P1.jpg", server.uri()))
    );
}

#[tokio::test]
async fn duplicate_upload_still_returns_public_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/media/P1.jpg"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error":"Duplicate","message":"exists"}"#),
        )
        .mount(&server)
        .await;

    let url = store(&server, Some("media"))
        .store_image(&[1], "P1.jpg")
        .await
        .unwrap();
    assert!(url.is_some_and(|u| u.ends_with("/public/media/P1.jpg")));
}

#[tokio::test]
async fn no_bucket_means_images_are_not_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let url = store(&server, None).store_image(&[1], "P1.jpg").await.unwrap();
    assert!(url.is_none());
}
