//! S3 backend integration tests against a real S3-compatible object store.
//!
//! These spin up a disposable MinIO container via `testcontainers` rather
//! than assuming one is already running. They're marked `#[ignore]` because
//! they require a working Docker daemon; run with `cargo test -- --ignored`.

use h5s3::backend::{Backend, S3Backend};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::minio::MinIO;

const ACCESS_KEY: &str = "minioadmin";
const SECRET_KEY: &str = "minioadmin";
const BUCKET: &str = "h5s3-test";

/// Start a MinIO container and create the test bucket via a raw PUT, since
/// this crate has no bucket-management API of its own (it only ever reads
/// and writes objects inside a bucket it assumes already exists).
async fn start_minio() -> (testcontainers::ContainerAsync<MinIO>, String) {
    let container = MinIO::default()
        .start()
        .await
        .expect("failed to start MinIO container");
    let port = container
        .get_host_port_ipv4(9000)
        .await
        .expect("MinIO did not expose port 9000");
    let host = format!("127.0.0.1:{port}");

    let client = reqwest::Client::new();
    let resp = client
        .put(format!("http://{host}/{BUCKET}/"))
        .header("x-amz-date", "19700101T000000Z")
        .send()
        .await;
    // MinIO accepts unsigned bucket creation in its default dev mode; if it
    // doesn't, the per-test backend open below will fail loudly instead.
    let _ = resp;

    (container, host)
}

#[tokio::test]
#[ignore = "requires a local Docker daemon to run MinIO"]
async fn write_then_read_roundtrips_through_minio() {
    let (_container, host) = start_minio().await;

    let mut backend = S3Backend::from_params(
        &format!("s3://{BUCKET}/pages"),
        4096,
        ACCESS_KEY,
        SECRET_KEY,
        Some("us-east-1".to_string()),
        Some(host),
        false,
    )
    .await
    .expect("failed to open S3Backend against MinIO");

    let page = vec![0x5Au8; 4096];
    backend.write(0, &page).await.expect("write failed");

    let mut buf = vec![0u8; 4096];
    backend.read(0, &mut buf).await.expect("read failed");
    assert_eq!(buf, page);
}

#[tokio::test]
#[ignore = "requires a local Docker daemon to run MinIO"]
async fn flush_then_reopen_preserves_metadata_through_minio() {
    let (_container, host) = start_minio().await;
    let uri = format!("s3://{BUCKET}/reopen-pages");

    {
        let mut backend = S3Backend::from_params(
            &uri,
            4096,
            ACCESS_KEY,
            SECRET_KEY,
            Some("us-east-1".to_string()),
            Some(host.clone()),
            false,
        )
        .await
        .expect("failed to open S3Backend against MinIO");

        backend.write(0, &[1u8; 4096]).await.expect("write failed");
        backend.write(3, &[2u8; 4096]).await.expect("write failed");
        backend.flush().await.expect("flush failed");
    }

    let backend = S3Backend::from_params(
        &uri,
        4096,
        ACCESS_KEY,
        SECRET_KEY,
        Some("us-east-1".to_string()),
        Some(host),
        false,
    )
    .await
    .expect("failed to reopen S3Backend against MinIO");

    assert_eq!(backend.max_page(), Some(3));
    let mut buf = vec![0u8; 4096];
    backend.read(3, &mut buf).await.expect("read failed");
    assert_eq!(buf, vec![2u8; 4096]);
}

#[tokio::test]
#[ignore = "requires a local Docker daemon to run MinIO"]
async fn unwritten_page_reads_as_zero_through_minio() {
    let (_container, host) = start_minio().await;

    let backend = S3Backend::from_params(
        &format!("s3://{BUCKET}/empty-pages"),
        4096,
        ACCESS_KEY,
        SECRET_KEY,
        Some("us-east-1".to_string()),
        Some(host),
        false,
    )
    .await
    .expect("failed to open S3Backend against MinIO");

    let mut buf = vec![0xFFu8; 4096];
    backend.read(0, &mut buf).await.expect("read failed");
    assert_eq!(buf, vec![0u8; 4096]);
}
