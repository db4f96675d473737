//! Integration tests for ipxd

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn ipxd(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("ipxd");
        cmd.current_dir(dir.path()).env_remove("IPXD_CONFIG");
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        ipxd(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("image transform server"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        ipxd(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("ipxd"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        ipxd(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ipxSettings"))
            .stdout(predicate::str::contains("storage.agrego.id"));
    }

    #[test]
    fn config_show_reads_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            "ipxSettings:\n  httpStorage:\n    domains: [cdn.example.com]\n",
        )
        .unwrap();
        ipxd(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cdn.example.com"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        ipxd(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.yml"));
    }

    #[test]
    fn explicit_missing_config_fails() {
        let dir = TempDir::new().unwrap();
        ipxd(&dir)
            .args(["-c", "nope.yml", "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"));
    }

    #[test]
    fn invalid_config_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yml"), "ipxSettings: [unclosed").unwrap();
        ipxd(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn cache_inspect_missing_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("public/cat.png"), b"bytes").unwrap();
        ipxd(&dir)
            .args(["cache", "inspect", "w_10", "cat.png"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fs:cat.png"))
            .stdout(predicate::str::contains("missing"));
    }

    #[test]
    fn cache_inspect_reports_rejection() {
        let dir = TempDir::new().unwrap();
        ipxd(&dir)
            .args(["cache", "inspect", "_", "https://evil.example.com/x.png"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rejected (403)"));
    }
}

mod http_tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use image::{ImageFormat, Rgba, RgbaImage};
    use ipxd::config::Config;
    use ipxd::server::{router, AppState};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        dir: TempDir,
        app: Router,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(public.join("photos")).unwrap();
        RgbaImage::from_pixel(40, 20, Rgba([200, 30, 30, 255]))
            .save_with_format(public.join("photos/red.png"), ImageFormat::Png)
            .unwrap();

        let mut config = Config::default();
        config.ipx_settings.fs_dir = public;
        config.ipx_settings.disk_cache_dir = dir.path().join("cache");
        config.ipx_settings.image_cache_ttl_seconds = 60;
        config.ipx_settings.http_storage.domains = vec!["good.example.com".to_string()];

        let app = router(AppState::from_config(&config).unwrap());
        Harness { dir, app }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body(response: axum::response::Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn header<'a>(response: &'a axum::response::Response, name: &str) -> &'a str {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    async fn status_message(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_slice(&body(response).await).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness();
        let response = h.app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = status_message(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn miss_then_hit_serves_identical_bytes() {
        let h = harness();
        let uri = "/_ipx/w_10,f_png/photos/red.png";

        let first = h.app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(header(&first, "x-ipx-cache"), "MISS");
        assert_eq!(header(&first, "content-type"), "image/png");
        assert_eq!(header(&first, "vary"), "Accept-Encoding");
        assert!(header(&first, "cache-control").contains("max-age=60"));
        assert!(!header(&first, "etag").is_empty());
        let first_bytes = body(first).await;

        let decoded = image::load_from_memory(&first_bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 5));

        let second = h.app.oneshot(get(uri)).await.unwrap();
        assert_eq!(header(&second, "x-ipx-cache"), "HIT");
        assert_eq!(header(&second, "content-type"), "image/png");
        assert_eq!(body(second).await, first_bytes);

        assert!(h.dir.path().join("cache/w_10_f_png").is_dir());
    }

    #[tokio::test]
    async fn matching_etag_is_not_modified() {
        let h = harness();
        let uri = "/_ipx/w_10/photos/red.png";
        let first = h.app.clone().oneshot(get(uri)).await.unwrap();
        let etag = header(&first, "etag").to_string();

        let request = Request::builder()
            .uri(uri)
            .header(header::IF_NONE_MATCH, &etag)
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "etag"), etag);
        assert!(body(response).await.is_empty());
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let h = harness();
        let response = h
            .app
            .oneshot(get("/_ipx/_/../../etc/passwd"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = status_message(response).await;
        assert_eq!(json["statusCode"], 403);
        assert!(!h.dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn encoded_separator_in_modifiers_is_forbidden() {
        let h = harness();
        let response = h
            .app
            .oneshot(get("/_ipx/..%5C..%5Cx/photos/red.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = status_message(response).await;
        assert_eq!(json["statusCode"], 403);
        assert!(!h.dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn unlisted_domain_is_forbidden() {
        let h = harness();
        let response = h
            .app
            .oneshot(get("/_ipx/w_10/https://evil.example.com/x.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = status_message(response).await;
        assert!(json["statusMessage"]
            .as_str()
            .unwrap()
            .contains("evil.example.com"));
    }

    #[tokio::test]
    async fn missing_source_segment_is_bad_request() {
        let h = harness();
        let response = h.app.clone().oneshot(get("/_ipx")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = h.app.oneshot(get("/_ipx/w_10")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let h = harness();
        let response = h
            .app
            .oneshot(get("/_ipx/w_10/photos/nope.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn undecodable_source_is_unsupported() {
        let h = harness();
        std::fs::write(h.dir.path().join("public/photos/notes.txt"), b"plain text").unwrap();
        let response = h
            .app
            .oneshot(get("/_ipx/w_10/photos/notes.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn invalid_modifier_value_is_bad_request() {
        let h = harness();
        let response = h
            .app
            .oneshot(get("/_ipx/w_abc/photos/red.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
