//! PDF download: content checks and the suggested file name.

mod common;

use cause_list_engine::{CancelToken, ComplexPath, Config, CourtPath, ErrorKind, FetchResult, NoSolver};
use common::*;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const PDF_BYTES: &[u8] = b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

fn district_judge() -> CourtPath {
    CourtPath::new("6", "6-3", "6-3-1", "6-3-1-1")
}

#[tokio::test]
async fn pdf_is_downloaded_with_a_suggested_name() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .and(query_param("court_no", "6-3-1-1"))
        .and(query_param("causelist_date", "15-01-2025"))
        .and(query_param("app_token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BYTES, "application/pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    let result = engine
        .fetch_pdf(&district_judge(), listing_date(), &CancelToken::never())
        .await;

    let document = match result {
        FetchResult::Success(document) => document,
        other => panic!("expected a PDF, got {other:?}"),
    };
    assert_eq!(document.bytes, PDF_BYTES);
    assert_eq!(document.size_bytes, PDF_BYTES.len());
    assert_eq!(document.content_type, "application/pdf");
    assert_eq!(
        document.suggested_file_name,
        "CauseList_Court_No._1_-_District_Judge_2025-01-15.pdf"
    );
    assert_eq!(engine.metrics().pdfs_downloaded, 1);
}

#[tokio::test]
async fn html_instead_of_pdf_is_malformed() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(html("<html><body>Cause list not available</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    let result = engine
        .fetch_pdf(&district_judge(), listing_date(), &CancelToken::never())
        .await;
    match result {
        FetchResult::Failure(ErrorKind::MalformedResponse { reason, .. }) => {
            assert!(reason.contains("text/html"));
        }
        other => panic!("expected malformed response, got {other:?}"),
    }
}

#[tokio::test]
async fn pdf_label_without_pdf_signature_is_malformed() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>oops</html>", "application/pdf"))
        .mount(&server)
        .await;

    let engine = engine(&server);
    let result = engine
        .fetch_pdf(&district_judge(), listing_date(), &CancelToken::never())
        .await;
    assert!(matches!(result, FetchResult::Failure(ErrorKind::MalformedResponse { .. })));
    assert_eq!(engine.metrics().pdfs_downloaded, 0);
}

#[tokio::test]
async fn oversized_pdf_is_rejected() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BYTES, "application/pdf"))
        .mount(&server)
        .await;

    let config = Config {
        max_pdf_bytes: 16,
        ..config(&server)
    };
    let engine = engine_with(config, Arc::new(NoSolver));
    let result = engine
        .fetch_pdf(&district_judge(), listing_date(), &CancelToken::never())
        .await;
    assert!(matches!(result, FetchResult::Failure(ErrorKind::MalformedResponse { .. })));
}

#[tokio::test]
async fn pdf_for_unknown_court_never_hits_the_pdf_endpoint() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BYTES, "application/pdf"))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(&server);
    let result = engine
        .fetch_pdf(
            &CourtPath::new("6", "6-3", "6-3-1", "6-3-1-42"),
            listing_date(),
            &CancelToken::never(),
        )
        .await;
    assert!(matches!(result, FetchResult::Failure(ErrorKind::InvalidSelection { .. })));
}

#[tokio::test]
async fn transient_pdf_failure_is_retried() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BYTES, "application/pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&server);
    let result = engine
        .fetch_pdf(&district_judge(), listing_date(), &CancelToken::never())
        .await;

    assert!(result.is_success(), "got {result:?}");
    assert_eq!(engine.metrics().retries, 1);
    assert_eq!(engine.metrics().pdfs_downloaded, 1);
}

#[tokio::test]
async fn complex_pdfs_report_failing_courts() {
    let server = portal().await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .and(query_param("court_no", "6-3-1-3"))
        .respond_with(html("<p>No cause list for this date</p>"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PDF_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BYTES, "application/pdf"))
        .expect(4)
        .mount(&server)
        .await;

    let engine = engine(&server);
    let complex = ComplexPath::new("6", "6-3", "6-3-1");
    let result = engine
        .fetch_pdfs_for_complex(&complex, listing_date(), &CancelToken::never())
        .await;

    match result {
        FetchResult::PartialSuccess(documents, errors) => {
            let names: Vec<&str> = documents
                .iter()
                .map(|d| d.suggested_file_name.as_str())
                .collect();
            assert_eq!(
                names,
                [
                    "CauseList_Court_No._1_-_District_Judge_2025-01-15.pdf",
                    "CauseList_Court_No._2_-_Additional_District_Judge_2025-01-15.pdf",
                    "CauseList_Court_No._4_-_Metropolitan_Magistrate_2025-01-15.pdf",
                    "CauseList_Court_No._5_-_Special_Court_2025-01-15.pdf",
                ]
            );
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].0, "6-3-1-3");
            assert!(matches!(errors[0].1, ErrorKind::MalformedResponse { .. }));
        }
        other => panic!("expected partial success, got {other:?}"),
    }
}
