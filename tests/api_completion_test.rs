//! Integration tests for the title completion endpoint

mod test_utils;

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use mockito::Matcher;
    use serde_json::json;
    use serial_test::serial;
    use tower::util::ServiceExt;

    use crate::test_utils::{body_to_string, test_app};

    fn title_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .uri("/api/completion")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Tests a title is generated with the title model
    #[tokio::test]
    #[serial]
    async fn it_generates_title() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"model": "gpt-4o"})),
                Matcher::Regex(String::from("Generate a short \\(5-7 words\\) chat title")),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"choices": [{"message": {"role": "assistant", "content": " \"Market Outlook Chat\" \n"}}]})
                    .to_string(),
            )
            .create();

        let app = test_app(&server.url());
        let response = app
            .oneshot(title_request(json!({
                "messages": [
                    {"role": "user", "content": "How are markets?"},
                    {"role": "assistant", "content": "Up."}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_to_string(response.into_body()).await).unwrap();
        mock.assert();
        assert_eq!(body["title"], "\"Market Outlook Chat\"");
    }

    /// Tests an upstream failure is a 500
    #[tokio::test]
    #[serial]
    async fn it_returns_500_when_upstream_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .create();

        let app = test_app(&server.url());
        let response = app
            .oneshot(title_request(json!({
                "messages": [{"role": "user", "content": "Hello"}]
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        mock.assert();
    }

    /// Tests a request without messages is rejected
    #[tokio::test]
    #[serial]
    async fn it_returns_400_for_empty_messages() {
        let app = test_app("http://127.0.0.1:1");
        let response = app
            .oneshot(title_request(json!({"messages": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
