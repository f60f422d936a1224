mod common;

use common::{pdf_bytes, ScriptedFetcher, ScriptedResponse};
use invoice_extract::{
    cancel::cancellation,
    config::Ingest,
    ingest::{
        host_matches, DeliveryMode, DocumentGuard, FetchError, IngestError, RedirectRejection,
        UrlPolicy,
    },
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

const URL: &str = "https://docs.example.com/invoices/123.pdf?token=secret";
const LIMIT: u64 = 64 * 1024;

fn cfg() -> Ingest {
    Ingest {
        max_document_bytes: LIMIT,
        ..Ingest::default()
    }
}

fn guard(responses: Vec<ScriptedResponse>) -> (DocumentGuard<ScriptedFetcher>, Arc<AtomicUsize>) {
    let fetcher = ScriptedFetcher::new(responses);
    let calls = fetcher.call_counter();
    (DocumentGuard::new(&cfg(), fetcher), calls)
}

#[tokio::test]
async fn rejects_plain_http_without_fetching() {
    let (g, calls) = guard(vec![ScriptedResponse::ok(pdf_bytes(100))]);
    let err = g
        .fetch_and_normalize("http://docs.example.com/a.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidScheme(ref s) if s == "http"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejects_unparsable_and_overlong_urls() {
    let (g, calls) = guard(vec![]);
    let err = g.fetch_and_normalize("not a url").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_url");

    let long = format!("https://docs.example.com/{}", "a".repeat(4096));
    let err = g.fetch_and_normalize(&long).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_url");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn allow_list_matches_exact_host_or_subdomain() {
    let cfg = Ingest {
        allowed_hosts: vec!["example.com".into()],
        ..cfg()
    };
    let g = DocumentGuard::new(&cfg, ScriptedFetcher::new(vec![]));

    assert!(g.policy().validate("https://example.com/a.pdf").is_ok());
    assert!(g.policy().validate("https://docs.example.com/a.pdf").is_ok());
    let err = g.policy().validate("https://evil-example.com/a.pdf").unwrap_err();
    assert!(matches!(err, IngestError::HostNotAllowed(_)));

    assert!(host_matches("a.b.example.com", "example.com"));
    assert!(!host_matches("notexample.com", "example.com"));
}

#[tokio::test]
async fn private_addresses_are_blocked() {
    let (g, calls) = guard(vec![]);
    for url in [
        "https://127.0.0.1/a.pdf",
        "https://10.1.2.3/a.pdf",
        "https://169.254.169.254/latest/meta-data",
        "https://localhost/a.pdf",
        "https://[::1]/a.pdf",
        "https://[fd00::1]/a.pdf",
    ] {
        let err = g.fetch_and_normalize(url).await.unwrap_err();
        assert!(matches!(err, IngestError::HostNotAllowed(_)), "{url}: {err}");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn declared_length_over_limit_aborts_before_body() {
    let resp = ScriptedResponse::ok(pdf_bytes(1024)).declared(LIMIT + 1);
    let read = resp.chunks_read.clone();
    let (g, _) = guard(vec![resp]);

    let err = g.fetch_and_normalize(URL).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::PayloadTooLarge {
            declared: Some(d),
            ..
        } if d == LIMIT + 1
    ));
    assert_eq!(read.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn undeclared_stream_over_limit_is_cut_off() {
    let resp = ScriptedResponse::ok(pdf_bytes(LIMIT as usize * 4)).undeclared();
    let read = resp.chunks_read.clone();
    let (g, _) = guard(vec![resp]);

    let err = g.fetch_and_normalize(URL).await.unwrap_err();
    assert!(matches!(err, IngestError::PayloadTooLarge { declared: None, .. }));
    // 16 chunks of 4 KiB fill the limit; the 17th trips it.
    assert_eq!(read.load(Ordering::SeqCst), 17);
}

#[tokio::test]
async fn body_at_exact_limit_is_accepted() {
    let (g, _) = guard(vec![ScriptedResponse::ok(pdf_bytes(LIMIT as usize)).undeclared()]);
    let doc = g.fetch_and_normalize(URL).await.unwrap();
    assert_eq!(doc.bytes.len() as u64, LIMIT);
    assert_eq!(doc.delivery, DeliveryMode::ByReference);
    assert!(doc.content_verified);
}

#[tokio::test(start_paused = true)]
async fn server_error_is_retried_once() {
    let (g, calls) = guard(vec![
        ScriptedResponse::status(503),
        ScriptedResponse::ok(pdf_bytes(2048)),
    ]);
    let doc = g.fetch_and_normalize(URL).await.unwrap();
    assert_eq!(doc.bytes.len(), 2048);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn second_server_error_fails() {
    let (g, calls) = guard(vec![ScriptedResponse::status(502), ScriptedResponse::status(503)]);
    let err = g.fetch_and_normalize(URL).await.unwrap_err();
    assert!(matches!(err, IngestError::UpstreamError { status_code: 503 }));
    assert_eq!(err.status_code(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let (g, calls) = guard(vec![
        ScriptedResponse::status(404),
        ScriptedResponse::ok(pdf_bytes(2048)),
    ]);
    let err = g.fetch_and_normalize(URL).await.unwrap_err();
    assert!(matches!(err, IngestError::UpstreamError { status_code: 404 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mislabelled_content_is_flagged_but_normalized() {
    let (g, _) = guard(vec![
        ScriptedResponse::ok(pdf_bytes(2048)).content_type(Some("text/html")),
    ]);
    let doc = g
        .fetch_and_normalize("https://docs.example.com/download?id=7")
        .await
        .unwrap();
    assert!(!doc.content_verified);
    assert_eq!(doc.delivery, DeliveryMode::ByReference);

    // extension alone is enough
    let (g, _) = guard(vec![ScriptedResponse::ok(pdf_bytes(2048)).content_type(None)]);
    assert!(g.fetch_and_normalize(URL).await.unwrap().content_verified);
}

#[tokio::test]
async fn redirect_rejections_keep_their_kind() {
    let cases = [
        (RedirectRejection::Host("10.0.0.1".into()), "host_not_allowed"),
        (RedirectRejection::Scheme("http".into()), "invalid_scheme"),
        (RedirectRejection::TooMany(5), "too_many_redirects"),
    ];
    for (rejection, kind) in cases {
        let fetcher = ScriptedFetcher::with_results(vec![Err(FetchError::Redirect(rejection))]);
        let g = DocumentGuard::new(&cfg(), fetcher);
        let err = g.fetch_and_normalize(URL).await.unwrap_err();
        assert_eq!(err.kind(), kind, "{err}");
    }
}

#[test]
fn redirect_hops_are_checked_against_policy_and_limit() {
    let policy = UrlPolicy::from_config(&cfg());
    let hop = |raw: &str, hops| policy.check_redirect(&Url::parse(raw).unwrap(), hops, 2);

    assert_eq!(hop("https://cdn.example.com/a.pdf", 1), Ok(()));
    assert_eq!(hop("https://cdn.example.com/a.pdf", 2), Ok(()));
    assert_eq!(
        hop("https://cdn.example.com/a.pdf", 3),
        Err(RedirectRejection::TooMany(2))
    );
    assert_eq!(
        hop("http://cdn.example.com/a.pdf", 1),
        Err(RedirectRejection::Scheme("http".into()))
    );
    assert!(matches!(
        hop("https://192.168.1.10/a.pdf", 1),
        Err(RedirectRejection::Host(_))
    ));
}

#[tokio::test]
async fn summary_redacts_query_string() {
    let (g, _) = guard(vec![ScriptedResponse::ok(pdf_bytes(512))]);
    let doc = g.fetch_and_normalize(URL).await.unwrap();
    let summary = doc.summary();
    assert_eq!(summary.source, "https://docs.example.com/invoices/123.pdf");
    assert_eq!(summary.sha256.len(), 64);
}

#[tokio::test]
async fn cancelled_fetch_returns_cancelled() {
    let (handle, cancel) = cancellation();
    handle.cancel();
    let (g, _) = guard(vec![ScriptedResponse::ok(pdf_bytes(512))]);
    let err = g.fetch_and_normalize_with(URL, &cancel).await.unwrap_err();
    assert!(matches!(err, IngestError::Cancelled));
}
