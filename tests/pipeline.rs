use async_trait::async_trait;
use futures::StreamExt;
use kubectl_image::config::StaticConfigProvider;
use kubectl_image::error::{Phase, PullError, Result};
use kubectl_image::image::{InsecureAcceptAnything, LocalImageStore, Reject, TrustPolicy};
use sha2::{Digest, Sha256};
use kubectl_image::logging::Logger;
use kubectl_image::pipeline::Pipeline;
use kubectl_image::transfer::proto::Header;
use kubectl_image::transfer::{Dialer, FrameStream, ImageSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

const FRAME_SIZE: usize = 64 * 1024;

/// Dialer handing out sources that stream a prepared archive
#[derive(Clone, Default)]
struct FakeDialer {
    archive: Arc<Vec<u8>>,
    fail_after: Option<usize>,
    dials: Arc<AtomicUsize>,
    servers: Arc<Mutex<Vec<String>>>,
    headers: Arc<Mutex<Vec<Header>>>,
    /// Raised once the last frame has been delivered
    cancel_at_end: Option<CancellationToken>,
}

struct FakeSource {
    archive: Arc<Vec<u8>>,
    fail_after: Option<usize>,
    headers: Arc<Mutex<Vec<Header>>>,
    cancel_at_end: Option<CancellationToken>,
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        server: &str,
        _ca_pem: Option<&[u8]>,
        _cancel: &CancellationToken,
    ) -> Result<Box<dyn ImageSource>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.servers.lock().unwrap().push(server.to_string());
        Ok(Box::new(FakeSource {
            archive: Arc::clone(&self.archive),
            fail_after: self.fail_after,
            headers: Arc::clone(&self.headers),
            cancel_at_end: self.cancel_at_end.clone(),
        }))
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn open(&mut self, header: Header) -> Result<FrameStream> {
        self.headers.lock().unwrap().push(header);
        let mut frames: Vec<Result<Vec<u8>>> = self
            .archive
            .chunks(FRAME_SIZE)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        if let Some(n) = self.fail_after {
            frames.truncate(n);
            frames.push(Err(PullError::protocol(Phase::Receive, "stream reset by peer")));
        }
        let frames = futures::stream::iter(frames);
        match self.cancel_at_end.clone() {
            Some(token) => {
                let tail = futures::stream::poll_fn(move |_| {
                    token.cancel();
                    Poll::Ready(None)
                });
                Ok(frames.chain(tail).boxed())
            }
            None => Ok(frames.boxed()),
        }
    }
}

/// docker-archive tar with one layer of `layer_size` bytes filled with `fill`
fn docker_archive(layer_size: usize, fill: u8) -> Vec<u8> {
    let layer = vec![fill; layer_size];
    let manifest =
        br#"[{"Config":"config.json","RepoTags":["team-a/app:latest"],"Layers":["layer/layer.tar"]}]"#;
    let config = br#"{"architecture":"amd64","os":"linux"}"#;

    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in [
        ("config.json", config.as_slice()),
        ("layer/layer.tar", layer.as_slice()),
        ("manifest.json", manifest.as_slice()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    builder.into_inner().unwrap()
}

struct Fixture {
    _dir: TempDir,
    store_dir: PathBuf,
    temp_root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        Self {
            store_dir: dir.path().join("store"),
            temp_root: dir.path().join("tmp"),
            _dir: dir,
        }
    }

    fn store(&self) -> LocalImageStore {
        LocalImageStore::open(&self.store_dir).unwrap()
    }

    fn pipeline(&self, token: &str, dialer: FakeDialer, policy: Arc<dyn TrustPolicy>) -> Pipeline {
        self.pipeline_with_output(token, dialer, policy, Logger::new_quiet())
    }

    fn pipeline_with_output(
        &self,
        token: &str,
        dialer: FakeDialer,
        policy: Arc<dyn TrustPolicy>,
        output: Logger,
    ) -> Pipeline {
        Pipeline::new(
            Box::new(StaticConfigProvider::new(token)),
            Box::new(dialer),
            self.store(),
            policy,
            self.temp_root.clone(),
            output,
        )
    }
}

fn temp_root_entries(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_empty_token_never_dials() {
    let fixture = Fixture::new();
    let dialer = FakeDialer::default();
    let dials = Arc::clone(&dialer.dials);

    for token in ["", "   \n"] {
        let err = fixture
            .pipeline(token, dialer.clone(), Arc::new(InsecureAcceptAnything))
            .run("svc:443/team-a/app", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Credential(ref m) if m.contains("empty token")));
    }
    assert_eq!(dials.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bad_coordinate_is_usage_error() {
    let fixture = Fixture::new();
    let dialer = FakeDialer::default();
    let dials = Arc::clone(&dialer.dials);

    for input in ["svc:443/team-a", "svc:443/../app", "svc:443/team-a/a\\b"] {
        let err = fixture
            .pipeline("token", dialer.clone(), Arc::new(InsecureAcceptAnything))
            .run(input, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Usage(_)), "{input}");
        assert_eq!(err.exit_code(), 2);
    }
    assert_eq!(dials.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pull_commits_ten_mebibyte_archive() {
    let fixture = Fixture::new();
    let archive = docker_archive(10 * 1024 * 1024, 0xab);
    let dialer = FakeDialer {
        archive: Arc::new(archive.clone()),
        ..FakeDialer::default()
    };
    let servers = Arc::clone(&dialer.servers);
    let headers = Arc::clone(&dialer.headers);

    let image = fixture
        .pipeline("sa-token", dialer, Arc::new(InsecureAcceptAnything))
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(image.namespace, "team-a");
    assert_eq!(image.name, "app");
    assert_eq!(image.size_bytes, archive.len() as u64);
    assert_eq!(image.digest, format!("sha256:{}", hex::encode(Sha256::digest(&archive))));
    assert_eq!(image.repo_tags, vec!["team-a/app:latest".to_string()]);
    assert_eq!(image.source_server.as_deref(), Some("svc:443"));

    assert_eq!(*servers.lock().unwrap(), vec!["svc:443".to_string()]);
    let headers = headers.lock().unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!((headers[0].namespace.as_str(), headers[0].name.as_str()), ("team-a", "app"));
    assert_eq!(headers[0].token, "sa-token");

    let store = fixture.store();
    assert_eq!(store.get(&image.slot()).unwrap().unwrap(), image);
    assert_eq!(std::fs::read(store.blob_path(&image.digest).unwrap()).unwrap(), archive);
    assert_eq!(temp_root_entries(&fixture.temp_root), 0);
}

#[tokio::test]
async fn test_second_pull_replaces_slot() {
    let fixture = Fixture::new();
    let first = docker_archive(256 * 1024, 1);
    let second = docker_archive(300 * 1024, 2);

    let old = fixture
        .pipeline(
            "token",
            FakeDialer {
                archive: Arc::new(first),
                ..FakeDialer::default()
            },
            Arc::new(InsecureAcceptAnything),
        )
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap();
    let new = fixture
        .pipeline(
            "token",
            FakeDialer {
                archive: Arc::new(second.clone()),
                ..FakeDialer::default()
            },
            Arc::new(InsecureAcceptAnything),
        )
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap();

    let store = fixture.store();
    assert_ne!(old.digest, new.digest);
    assert_eq!(store.get(&new.slot()).unwrap().unwrap().digest, new.digest);
    assert_eq!(store.list().unwrap().len(), 1);
    assert!(!store.blob_path(&old.digest).unwrap().exists());
}

#[tokio::test]
async fn test_failed_transfer_keeps_previous_image() {
    let fixture = Fixture::new();
    let archive = docker_archive(512 * 1024, 7);

    let before = fixture
        .pipeline(
            "token",
            FakeDialer {
                archive: Arc::new(archive.clone()),
                ..FakeDialer::default()
            },
            Arc::new(InsecureAcceptAnything),
        )
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap();

    let err = fixture
        .pipeline(
            "token",
            FakeDialer {
                archive: Arc::new(docker_archive(512 * 1024, 8)),
                fail_after: Some(3),
                ..FakeDialer::default()
            },
            Arc::new(InsecureAcceptAnything),
        )
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PullError::Protocol {
            phase: Phase::Receive,
            ..
        }
    ));
    assert_eq!(fixture.store().get(&before.slot()).unwrap().unwrap(), before);
    assert_eq!(temp_root_entries(&fixture.temp_root), 0);
}

#[tokio::test]
async fn test_rejecting_policy_fails_commit_and_cleans_up() {
    let fixture = Fixture::new();
    let dialer = FakeDialer {
        archive: Arc::new(docker_archive(1024, 3)),
        ..FakeDialer::default()
    };

    let err = fixture
        .pipeline("token", dialer, Arc::new(Reject))
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PullError::Commit(_)));
    assert!(fixture.store().list().unwrap().is_empty());
    assert_eq!(temp_root_entries(&fixture.temp_root), 0);
}

#[tokio::test]
async fn test_non_archive_payload_is_commit_error() {
    let fixture = Fixture::new();
    let dialer = FakeDialer {
        archive: Arc::new(vec![0x42; 100_000]),
        ..FakeDialer::default()
    };

    let err = fixture
        .pipeline("token", dialer, Arc::new(InsecureAcceptAnything))
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PullError::Commit(_)));
    assert_eq!(temp_root_entries(&fixture.temp_root), 0);
}

fn success_lines(output: &Logger) -> Vec<String> {
    output
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("✅"))
        .collect()
}

#[tokio::test]
async fn test_success_prints_one_confirmation() {
    let fixture = Fixture::new();
    let output = Logger::recording(false);
    let dialer = FakeDialer {
        archive: Arc::new(docker_archive(128 * 1024, 5)),
        ..FakeDialer::default()
    };

    let image = fixture
        .pipeline_with_output("token", dialer, Arc::new(InsecureAcceptAnything), output.clone())
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap();

    let confirmations = success_lines(&output);
    assert_eq!(confirmations.len(), 1, "{confirmations:?}");
    assert!(confirmations[0].contains(&image.digest));
    assert!(confirmations[0].contains("team-a/app"));
}

#[tokio::test]
async fn test_failed_commit_prints_no_confirmation() {
    let fixture = Fixture::new();
    let output = Logger::recording(false);
    let dialer = FakeDialer {
        archive: Arc::new(docker_archive(128 * 1024, 5)),
        ..FakeDialer::default()
    };

    let err = fixture
        .pipeline_with_output("token", dialer, Arc::new(Reject), output.clone())
        .run("svc:443/team-a/app", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PullError::Commit(_)));
    assert!(success_lines(&output).is_empty(), "{:?}", output.lines());
}

#[tokio::test]
async fn test_cancel_after_transfer_skips_commit() {
    let fixture = Fixture::new();
    let cancel = CancellationToken::new();
    let dialer = FakeDialer {
        archive: Arc::new(docker_archive(64 * 1024, 4)),
        cancel_at_end: Some(cancel.clone()),
        ..FakeDialer::default()
    };

    let err = fixture
        .pipeline("token", dialer, Arc::new(InsecureAcceptAnything))
        .run("svc:443/team-a/app", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PullError::Cancelled { phase: Phase::Commit }));
    assert_eq!(err.exit_code(), 130);
    assert!(fixture.store().list().unwrap().is_empty());
    assert_eq!(temp_root_entries(&fixture.temp_root), 0);
}
