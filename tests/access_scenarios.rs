//! End-to-end scenarios against an in-memory cluster
//!
//! Each test walks one client session the way an application would:
//! tokens, directory setup, striped files, positioned reads and identity.

use qfs_access::config::ClientConfig;
use qfs_access::data::layout::{CreateParams, StriperType};
use qfs_access::io::InputChannel;
use qfs_access::memory::MemoryCluster;
use qfs_access::metadata::{GroupId, UserId};
use qfs_access::{AccessError, CreateOptions, QfsClient};

fn setup() -> (MemoryCluster, QfsClient) {
    let cluster = MemoryCluster::new(9);
    let client = cluster.default_client().expect("client");
    (cluster, client)
}

/// Deterministic, non-repeating test pattern
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Bytes handed out by every chunk server of the cluster so far
fn bytes_served(cluster: &MemoryCluster) -> u64 {
    cluster.chunk_servers().iter().map(|s| s.bytes_served()).sum()
}

fn read_count(cluster: &MemoryCluster) -> u64 {
    cluster.chunk_servers().iter().map(|s| s.read_count()).sum()
}

fn counter(client: &QfsClient, name: &str) -> u64 {
    client.get_stats()[name].parse().unwrap()
}

async fn read_exact(input: &mut InputChannel, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = input.read(&mut buf[filled..]).await.unwrap();
        assert!(n > 0, "early end of file at {}", input.tell());
        filled += n;
    }
    buf
}

async fn write_all(client: &QfsClient, path: &str, params: &str, data: &[u8]) {
    let mut out = client.create_with_params(path, params).await.unwrap();
    let mut written = 0;
    while written < data.len() {
        written += out.write(&data[written..]).await.unwrap();
    }
    out.close().await.unwrap();
}

#[tokio::test]
async fn test_delegation_token_lifecycle() {
    let (cluster, client) = setup();

    let token = client.create_delegation_token(true, 600).await.unwrap();
    assert!(!token.token.is_empty());
    assert!(!token.key.is_empty());
    assert!(token.delegation_allowed);
    assert_eq!(token.token_valid_for_sec, 600);
    assert!(token.delegation_valid_until() >= token.valid_until());

    cluster.meta().advance_clock(300);
    let renewed = client.renew_delegation_token(&token).await.unwrap();
    assert_eq!(renewed.token, token.token);
    assert!(renewed.valid_until() > token.valid_until());

    client
        .cancel_delegation_token(&renewed.cancel_handle())
        .await
        .unwrap();
    // Canceling twice is fine
    client.cancel_delegation_token(&renewed).await.unwrap();

    for _ in 0..2 {
        let err = client.renew_delegation_token(&renewed).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenRevoked), "{:?}", err);
    }
}

#[tokio::test]
async fn test_canceled_token_revoked_after_lifetime() {
    let (cluster, client) = setup();

    let token = client.create_delegation_token(true, 600).await.unwrap();
    client.cancel_delegation_token(&token).await.unwrap();
    let err = client.renew_delegation_token(&token).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenRevoked), "{:?}", err);

    cluster
        .meta()
        .advance_clock(token.delegation_valid_for_sec + 60);
    let mut stale = token.clone();
    stale.issued_time = 1;
    stale.delegation_valid_for_sec = 1;
    for t in [&token, &stale] {
        let err = client.renew_delegation_token(t).await.unwrap_err();
        assert!(matches!(err, AccessError::TokenRevoked), "{:?}", err);
    }
}

#[tokio::test]
async fn test_delegation_token_expiry_and_refusal() {
    let (cluster, client) = setup();

    let token = client.create_delegation_token(true, 0).await.unwrap();
    cluster.meta().advance_clock(25 * 60 * 60);
    let err = client.renew_delegation_token(&token).await.unwrap_err();
    assert!(matches!(err, AccessError::TokenExpired), "{:?}", err);

    let no_delegation = client.create_delegation_token(false, 60).await.unwrap();
    let err = client
        .renew_delegation_token(&no_delegation)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Auth { .. }), "{:?}", err);

    cluster.meta().set_delegation_enabled(false);
    let err = client.create_delegation_token(true, 60).await.unwrap_err();
    assert!(matches!(err, AccessError::Auth { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_directory_listing_and_rename() {
    let (_cluster, client) = setup();

    client.mkdir("/jtest").await.unwrap();
    for name in ["foo.1", "foo.2", "foo.3"] {
        let mut out = client.create(&format!("/jtest/{}", name)).await.unwrap();
        out.close().await.unwrap();
    }

    let mut names: Vec<String> = client
        .readdir("/jtest")
        .await
        .unwrap()
        .expect("listing")
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["foo.1", "foo.2", "foo.3"]);

    let plus = client.readdirplus("/jtest").await.unwrap().expect("listing");
    assert_eq!(plus.len(), 3);
    assert!(plus.iter().all(|e| !e.attr.is_directory && e.attr.filesize == 0));

    let root = client.stat("/jtest").await.unwrap();
    assert!(root.is_directory);
    assert_eq!(root.file_count, 3);

    assert!(client.readdir("/jtest/missing").await.unwrap().is_none());

    // Rename onto an existing file without overwrite fails and keeps both
    let err = client
        .rename("/jtest/foo.1", "/jtest/foo.2", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::AlreadyExists(_)), "{:?}", err);
    assert!(client.exists("/jtest/foo.1").await.unwrap());

    client
        .rename("/jtest/foo.1", "/jtest/foo.2", true)
        .await
        .unwrap();
    assert!(!client.exists("/jtest/foo.1").await.unwrap());
    assert!(client.is_file("/jtest/foo.2").await.unwrap());

    let moved = client.move_path("/jtest/foo.2", "/").await.unwrap();
    assert_eq!(moved, "/foo.2");
    assert!(client.is_file("/foo.2").await.unwrap());
}

#[tokio::test]
async fn test_mkdirs_with_dot_dot_then_rmdirs() {
    let (_cluster, client) = setup();

    // The path is normalized before any directory is made
    client.mkdirs("rtest/a/b/../../c/../d").await.unwrap();
    assert!(client.is_directory("/rtest/d").await.unwrap());
    assert!(!client.exists("/rtest/a").await.unwrap());
    assert!(!client.exists("/rtest/c").await.unwrap());

    client.mkdirs("/rtest/d/e/f").await.unwrap();
    let mut out = client.create("/rtest/d/e/f/file").await.unwrap();
    out.write(b"payload").await.unwrap();
    out.close().await.unwrap();

    client.rmdirs("/rtest").await.unwrap();
    assert!(!client.exists("/rtest").await.unwrap());

    let err = client.rmdirs("/rtest").await.unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)), "{:?}", err);
}

#[tokio::test]
async fn test_striped_create_with_tiers() {
    let (_cluster, client) = setup();
    let data = pattern(2 * 1024 * 1024 + 100);

    write_all(&client, "/striped", "1,6,3,1048576,2,15,15", &data).await;

    let attr = client.stat("/striped").await.unwrap();
    assert_eq!(attr.layout.striper_type, StriperType::ReedSolomon);
    assert_eq!(attr.layout.num_stripes, 6);
    assert_eq!(attr.layout.num_recovery_stripes, 3);
    assert_eq!(attr.layout.stripe_size, 1024 * 1024);
    assert_eq!(attr.layout.replication, 1);
    assert_eq!((attr.layout.tiers.min, attr.layout.tiers.max), (15, 15));
    assert_eq!(client.filesize("/striped").await.unwrap(), data.len() as u64);

    let blocks = client
        .get_blocks_location("/striped", 0, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(blocks[0], vec![format!("{:x}", 6u64 * 64 * 1024 * 1024)]);
    // One block: six data slots plus three recovery slots
    assert_eq!(blocks.len(), 1 + 9);
    assert!(blocks[1..].iter().all(|row| !row.is_empty()));

    // Three stripes carry data
    let data_rows = client
        .get_data_location("/striped", 0, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(data_rows.len(), 3);
}

#[tokio::test]
async fn test_invalid_create_params_are_rejected() {
    let (_cluster, client) = setup();

    for params in ["1,6,3,1000,2", "0", "1,6,3,1048576,2,9,3", "x,y"] {
        let err = client.create_with_params("/bad", params).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidLayout(_)), "{}: {:?}", params, err);
    }
    assert!(!client.exists("/bad").await.unwrap());

    let forced = CreateOptions::new(CreateParams {
        num_stripes: 0,
        ..CreateParams::rs_default()
    })
    .force_type(true);
    let err = client.create_with_options("/bad", forced).await.unwrap_err();
    assert!(matches!(err, AccessError::InvalidLayout(_)), "{:?}", err);
}

#[tokio::test]
async fn test_read_ahead_toggle_and_seek() {
    let (cluster, client) = setup();
    let data = pattern(3 * 1024 * 1024);
    write_all(&client, "/seek", "1,6,3,1048576,2", &data).await;

    let mut input = client.open_with_read_ahead("/seek", Some(0)).await.unwrap();
    assert_eq!(input.read_ahead_size(), 0);

    // Without read-ahead exactly the requested bytes are fetched
    let (served, reads) = (bytes_served(&cluster), read_count(&cluster));
    let mut buf = vec![0u8; 128];
    assert_eq!(input.read(&mut buf).await.unwrap(), 128);
    assert_eq!(buf, data[..128]);
    assert_eq!(bytes_served(&cluster) - served, 128);
    assert_eq!(read_count(&cluster) - reads, 1);

    input.set_read_ahead_size(256 * 1024);
    input.seek(512).unwrap();
    let served = bytes_served(&cluster);
    assert_eq!(input.read(&mut buf).await.unwrap(), 128);
    assert_eq!(buf, data[512..640]);
    assert!(bytes_served(&cluster) - served > 128);

    // The rest of the window comes from the buffer
    let served = bytes_served(&cluster);
    assert_eq!(input.read(&mut buf).await.unwrap(), 128);
    assert_eq!(buf, data[640..768]);
    assert_eq!(bytes_served(&cluster), served);

    input.seek(0).unwrap();
    let mut big = vec![0u8; 1024 * 1024];
    let mut filled = 0;
    while filled < big.len() {
        let n = input.read(&mut big[filled..]).await.unwrap();
        assert!(n > 0);
        filled += n;
    }
    assert_eq!(big, data[..1024 * 1024]);
    assert_eq!(input.tell(), 1024 * 1024);

    // Past the end reads nothing
    input.seek(data.len() as u64 + 10).unwrap();
    assert_eq!(input.read(&mut buf).await.unwrap(), 0);

    input.close();
    let err = input.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, AccessError::ClosedChannel), "{:?}", err);
}

#[tokio::test]
async fn test_effective_identity() {
    let (cluster, client) = setup();
    cluster.meta().register_user(UserId(500), "alice");
    cluster.meta().register_group(GroupId(600), "staff");

    let mut out = client.create("/anon").await.unwrap();
    out.close().await.unwrap();
    let attr = client.stat("/anon").await.unwrap();
    assert_eq!(attr.owner, None);
    assert_eq!(attr.group, None);

    client.set_effective_identity(Some(UserId(500)), Some(GroupId(600)));
    client.mkdir("/owned").await.unwrap();
    let attr = client.stat("/owned").await.unwrap();
    assert_eq!(attr.owner, Some(UserId(500)));
    assert_eq!(attr.group, Some(GroupId(600)));
    assert_eq!(attr.owner_name, "alice");
    assert_eq!(attr.group_name, "staff");

    client.set_effective_identity(None, None);
    let mut out = client.create("/owned/child").await.unwrap();
    out.close().await.unwrap();
    assert_eq!(client.stat("/owned/child").await.unwrap().owner, None);
}

#[tokio::test]
async fn test_two_clients_see_each_others_writes() {
    let cluster = MemoryCluster::new(3);
    let writer = cluster.default_client().unwrap();
    let mut config = ClientConfig::default();
    config.io.read_ahead_size = 0;
    let reader = cluster.client(config).unwrap();

    write_all(&writer, "/shared", "2", b"first").await;
    let mut input = reader.open("/shared").await.unwrap();
    let mut buf = [0u8; 16];
    let n = input.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"first");

    // Replacing the file changes its id, so the reader's cached locations
    // are not reused
    write_all(&writer, "/shared", "2", b"second!").await;
    let mut input = reader.open("/shared").await.unwrap();
    let n = input.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"second!");
}

#[tokio::test]
async fn test_short_write_after_chunk_server_fault() {
    let (cluster, client) = setup();
    let data = pattern(10_000);

    let opts = CreateOptions::new(CreateParams::replicated(1)).write_buffer_size(4096);
    let mut out = client.create_with_options("/short", opts).await.unwrap();
    for server in cluster.chunk_servers() {
        server.fail_next_writes(1);
    }

    // The first buffer flush fails after 4096 bytes were taken
    let n = out.write(&data).await.unwrap();
    assert_eq!(n, 4096);

    let mut written = n;
    while written < data.len() {
        written += out.write(&data[written..]).await.unwrap();
    }
    out.close().await.unwrap();
    for server in cluster.chunk_servers() {
        server.fail_next_writes(0);
    }

    assert_eq!(client.filesize("/short").await.unwrap(), data.len() as u64);
    let mut input = client.open("/short").await.unwrap();
    assert_eq!(read_exact(&mut input, data.len()).await, data);
}

#[tokio::test]
async fn test_read_fails_over_to_next_replica() {
    let (cluster, client) = setup();
    let data = pattern(50_000);
    write_all(&client, "/replicas", "3", &data).await;

    let rows = client
        .get_data_location("/replicas", 0, data.len() as u64)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 3);

    // Take down the first two replicas in read order
    let locations = cluster.chunk_server_locations();
    for name in &rows[0][..2] {
        let index = locations
            .iter()
            .position(|l| l.to_string() == *name)
            .expect("replica is a cluster server");
        cluster.chunk_server(index).unwrap().set_down(true);
    }

    let mut input = client.open_with_read_ahead("/replicas", Some(0)).await.unwrap();
    assert_eq!(read_exact(&mut input, data.len()).await, data);
    assert!(counter(&client, "replica_failovers") >= 2);

    // With every replica down the read fails
    for server in cluster.chunk_servers() {
        server.set_down(true);
    }
    input.seek(0).unwrap();
    let mut buf = [0u8; 16];
    let err = input.read(&mut buf).await.unwrap_err();
    assert!(err.is_transport(), "{:?}", err);
}

#[tokio::test]
async fn test_failed_prefetch_does_not_fail_read() {
    let (cluster, client) = setup();
    let data = pattern(256 * 1024);
    write_all(&client, "/prefetch", "1", &data).await;

    let mut input = client
        .open_with_read_ahead("/prefetch", Some(64 * 1024))
        .await
        .unwrap();
    assert_eq!(read_exact(&mut input, 40_000).await, data[..40_000]);
    assert_eq!(counter(&client, "prefetch_issued"), 1);

    // Let the background fetch run while the servers are unreachable
    for server in cluster.chunk_servers() {
        server.set_down(true);
    }
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    for server in cluster.chunk_servers() {
        server.set_down(false);
    }

    assert_eq!(read_exact(&mut input, 40_000).await, data[40_000..80_000]);
    assert_eq!(counter(&client, "prefetch_failed"), 1);
    assert_eq!(counter(&client, "prefetch_used"), 0);

    input.seek(0).unwrap();
    assert_eq!(read_exact(&mut input, data.len()).await, data);
}
