/// End-to-end tests against a real PostgreSQL database
///
/// Run with `cargo test -- --ignored` and `DATABASE_URL` pointing at a
/// disposable database.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{multipart_body, unique_email, TestContext, PASSWORD};
use serde_json::json;
use tower::Service as _;

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_register_login_and_create_tax_return() {
    let ctx = TestContext::new().await.unwrap();
    let email = unique_email();

    let (status, body) = ctx
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({
                "email": email.to_uppercase(),
                "password": PASSWORD,
                "firstName": "Jane",
                "lastName": "Doe",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert!(body["token"].is_string());
    assert_eq!(body["user"]["email"], email);
    assert_eq!(body["user"]["role"], "customer");
    assert!(body["user"].get("passwordHash").is_none());

    let (status, body) = ctx
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": email, "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = ctx
        .json(
            "POST",
            "/api/tax-returns",
            Some(&token),
            json!({ "taxYear": "2023-24" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["taxYear"], "2023-24");
    assert_eq!(body["status"], "pending");

    let (status, body) = ctx
        .json(
            "POST",
            "/api/tax-returns",
            Some(&token),
            json!({ "taxYear": "2023-24" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conflict");
    assert!(body["message"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_wrong_password_is_rejected() {
    let ctx = TestContext::new().await.unwrap();
    let email = unique_email();

    let (status, _) = ctx
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({
                "email": email,
                "password": PASSWORD,
                "firstName": "Jane",
                "lastName": "Doe",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = ctx
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": email, "password": "Wrong-passw0rd" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_duplicate_email_is_a_conflict() {
    let ctx = TestContext::new().await.unwrap();
    let payload = json!({
        "email": unique_email(),
        "password": PASSWORD,
        "firstName": "Jane",
        "lastName": "Doe",
    });

    let (status, _) = ctx
        .json("POST", "/api/auth/register", None, payload.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = ctx.json("POST", "/api/auth/register", None, payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_other_customer_cannot_read_return() {
    let ctx = TestContext::new().await.unwrap();
    let (_, owner) = ctx.register_customer().await;
    let (_, stranger) = ctx.register_customer().await;
    let (_, admin) = ctx.create_admin().await.unwrap();

    let id = ctx.create_tax_return(&owner, "2023-24").await;
    let uri = format!("/api/tax-returns/{}", id);

    let (status, body) = ctx.get(&uri, &stranger).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = ctx.get(&uri, &admin).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["id"], id.to_string());
    assert!(body["incomeSources"].as_array().unwrap().is_empty());

    let (status, body) = ctx.get("/api/tax-returns", &stranger).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_income_sources_update_totals_and_delete_cascades() {
    let ctx = TestContext::new().await.unwrap();
    let (_, token) = ctx.register_customer().await;
    let id = ctx.create_tax_return(&token, "2022-23").await;

    for amount in ["1200.50", "799.50"] {
        let (status, body) = ctx
            .json(
                "POST",
                &format!("/api/tax-returns/{}/income-sources", id),
                Some(&token),
                json!({ "sourceType": "employment", "amount": amount }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
    }

    let (status, body) = ctx.get(&format!("/api/tax-returns/{}", id), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["incomeSources"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["totalIncome"].as_str().unwrap().parse::<rust_decimal::Decimal>().unwrap(),
        rust_decimal::Decimal::new(2000, 0)
    );

    let (status, body) = ctx
        .json("DELETE", &format!("/api/tax-returns/{}", id), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM income_sources WHERE tax_return_id = $1")
            .bind(id)
            .fetch_one(&ctx.db)
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    let (status, _) = ctx.get(&format!("/api/tax-returns/{}", id), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_disallowed_upload_leaves_nothing_behind() {
    let ctx = TestContext::new().await.unwrap();
    let (_, token) = ctx.register_customer().await;
    let id = ctx.create_tax_return(&token, "2023-24").await;

    let boundary = "taxdesk-boundary";
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/uploads/tax-returns/{}", id))
        .header("authorization", format!("Bearer {}", token))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(multipart_body(
            boundary,
            &[("p60.pdf", &b"%PDF-1.4"[..]), ("setup.exe", &b"MZ"[..])],
        )))
        .unwrap();

    let (status, body) = ctx.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let documents: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE tax_return_id = $1")
            .bind(id)
            .fetch_one(&ctx.db)
            .await
            .unwrap();
    assert_eq!(documents, 0);
    assert_eq!(std::fs::read_dir(ctx.uploads.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_upload_and_download_document() {
    let ctx = TestContext::new().await.unwrap();
    let (_, token) = ctx.register_customer().await;
    let (_, stranger) = ctx.register_customer().await;
    let id = ctx.create_tax_return(&token, "2023-24").await;

    let boundary = "taxdesk-boundary";
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/uploads/tax-returns/{}", id))
        .header("authorization", format!("Bearer {}", token))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(multipart_body(boundary, &[("p60.pdf", &b"%PDF-1.4"[..])])))
        .unwrap();

    let (status, body) = ctx.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let document = &body[0];
    assert_eq!(document["fileName"], "p60.pdf");
    assert_eq!(document["mimeType"], "application/pdf");
    let document_id = document["id"].as_str().unwrap().to_string();
    assert_eq!(std::fs::read_dir(ctx.uploads.path()).unwrap().count(), 1);

    let (status, _) = ctx
        .get(&format!("/api/uploads/documents/{}/download", document_id), &stranger)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri(format!("/api/uploads/documents/{}/download", document_id))
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = ctx.app.clone().call(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"%PDF-1.4");

    let (status, _) = ctx
        .json(
            "DELETE",
            &format!("/api/uploads/documents/{}", document_id),
            Some(&token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(std::fs::read_dir(ctx.uploads.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_admin_routes_require_admin_role() {
    let ctx = TestContext::new().await.unwrap();
    let (_, customer) = ctx.register_customer().await;
    let (_, admin) = ctx.create_admin().await.unwrap();

    let (status, body) = ctx.get("/api/admin/dashboard", &customer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = ctx.get("/api/admin/dashboard", &admin).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = ctx
        .json(
            "PUT",
            "/api/admin/settings/default_price",
            Some(&admin),
            json!({ "value": "-5" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_contact_form_is_public_but_listing_is_not() {
    let ctx = TestContext::new().await.unwrap();
    let (_, customer) = ctx.register_customer().await;
    let (_, admin) = ctx.create_admin().await.unwrap();

    let (status, body) = ctx
        .json(
            "POST",
            "/api/contact",
            None,
            json!({
                "name": "Jane Doe",
                "email": unique_email(),
                "message": "I have rental income to declare",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let inquiry_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = ctx.get("/api/contact", &customer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = ctx
        .get(&format!("/api/contact/{}", inquiry_id), &admin)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "new");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_failed_profile_update_keeps_user_unchanged() {
    let ctx = TestContext::new().await.unwrap();
    let (user_id, token) = ctx.register_customer().await;

    let function = format!("fail_customer_update_{}", user_id.simple());
    sqlx::query(&format!(
        "CREATE FUNCTION {function}() RETURNS TRIGGER AS $$ \
         BEGIN \
             IF OLD.user_id = '{user_id}' THEN RAISE EXCEPTION 'customer update failed'; END IF; \
             RETURN NEW; \
         END; $$ LANGUAGE plpgsql"
    ))
    .execute(&ctx.db)
    .await
    .unwrap();
    sqlx::query(&format!(
        "CREATE TRIGGER {function} BEFORE UPDATE ON customers \
         FOR EACH ROW EXECUTE FUNCTION {function}()"
    ))
    .execute(&ctx.db)
    .await
    .unwrap();

    let (status, _) = ctx
        .json(
            "PUT",
            &format!("/api/users/{}", user_id),
            Some(&token),
            json!({ "firstName": "Changed", "customer": { "city": "Leeds" } }),
        )
        .await;

    sqlx::query(&format!("DROP TRIGGER {function} ON customers"))
        .execute(&ctx.db)
        .await
        .unwrap();
    sqlx::query(&format!("DROP FUNCTION {function}()"))
        .execute(&ctx.db)
        .await
        .unwrap();

    assert!(status.is_server_error(), "{}", status);

    let first_name: String = sqlx::query_scalar("SELECT first_name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(first_name, "Test");

    let (status, body) = ctx
        .json(
            "PUT",
            &format!("/api/users/{}", user_id),
            Some(&token),
            json!({ "firstName": "Changed", "customer": { "city": "Leeds" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["firstName"], "Changed");
}
