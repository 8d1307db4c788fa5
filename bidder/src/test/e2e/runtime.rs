use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    sync::{Arc, LazyLock, OnceLock},
    time::Duration,
};

use clap::Parser;
use rama::{
    Layer as _, Service,
    error::BoxError,
    graceful::Shutdown,
    http::{Request, Response, client::EasyHttpWebClient},
    layer::TimeoutLayer,
    net::address::SocketAddress,
};

use crate::{Args, bid::BidEndpoint, server::bid::BidListener};

/// Number of listeners every e2e app binds.
pub(super) const LISTENER_COUNT: usize = 2;

/// Arguments making every bid late by exactly 1ms (`delay = tmax + 1`),
/// so that response timings are predictable.
const EXACT_LATE_ARGS: &[&str] = &["--late-fraction", "1", "--late-span-ms", "0"];

#[derive(Clone)]
pub(super) struct Runtime {
    bid_addrs: Vec<SocketAddress>,
}

impl Runtime {
    #[inline(always)]
    pub fn bid_socket_addrs(&self) -> &[SocketAddress] {
        &self.bid_addrs
    }

    #[inline(always)]
    pub fn bid_url(&self) -> String {
        self.bid_url_for(0)
    }

    #[inline(always)]
    pub fn bid_url_for(&self, index: usize) -> String {
        format!("http://{}/bid", self.bid_addrs[index])
    }

    #[inline(always)]
    pub fn ping_url(&self) -> String {
        format!("http://{}/ping", self.bid_addrs[0])
    }

    #[inline(always)]
    pub fn client(&self) -> impl Service<Request, Output = Response, Error = BoxError> + Clone {
        // timeout needs to be high enough for slow CI machines
        TimeoutLayer::new(Duration::from_secs(30)).into_layer(EasyHttpWebClient::default())
    }

    #[inline(always)]
    pub fn client_with_timeout(
        &self,
        timeout: Duration,
    ) -> impl Service<Request, Output = Response, Error = BoxError> + Clone {
        TimeoutLayer::new(timeout).into_layer(EasyHttpWebClient::default())
    }
}

/// Shared app, spawned once for all tests using it.
pub(super) async fn get() -> Runtime {
    static APP: LazyLock<PathBuf> = LazyLock::new(|| spawn_stub_bidder_app(&[]));
    read_runtime(APP.clone()).await
}

/// Single listener serving `endpoint` on the test's own runtime,
/// for tests which inspect the endpoint after the fact.
///
/// Keep the returned [`Shutdown`] alive while the listener is in use.
pub(super) async fn spawn_listener(endpoint: Arc<BidEndpoint>) -> (Runtime, Shutdown) {
    let data_dir = crate::test::tmp_dir::try_new("stub_bidder_e2e_listener").unwrap();
    let shutdown = Shutdown::new(std::future::pending::<()>());

    let listener = BidListener::bind(
        shutdown.guard(),
        SocketAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        0,
        &data_dir,
    )
    .await
    .unwrap();
    let bid_addrs = vec![listener.local_addr()];
    tokio::spawn(listener.serve(endpoint));

    (Runtime { bid_addrs }, shutdown)
}

/// Dedicated app, spawned with extra arguments.
pub(super) async fn spawn_with_args(extra_args: &[&str]) -> Runtime {
    let data_dir = spawn_stub_bidder_app(extra_args);
    read_runtime(data_dir).await
}

async fn read_runtime(data_dir: PathBuf) -> Runtime {
    let mut bid_addrs = Vec::with_capacity(LISTENER_COUNT);
    for index in 0..LISTENER_COUNT {
        let addr = tokio::time::timeout(
            Duration::from_secs(60),
            read_file_or_wait(data_dir.join(format!("bid.{index}.addr.txt"))),
        )
        .await
        .unwrap();
        assert!(addr.ip_addr.is_loopback());
        bid_addrs.push(addr);
    }
    assert_ne!(bid_addrs[0], bid_addrs[1]);

    Runtime { bid_addrs }
}

async fn read_file_or_wait(path: PathBuf) -> SocketAddress {
    loop {
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => match s.trim().parse() {
                Ok(addr) => return addr,
                Err(err) => {
                    eprintln!("socket addr not (yet) parsable (content={s:?}): {err}");
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => panic!("unexpected error: {err}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn spawn_stub_bidder_app(extra_args: &[&str]) -> PathBuf {
    let data_dir = crate::test::tmp_dir::try_new("stub_bidder_e2e").unwrap();
    eprintln!("stub_bidder_e2e data stored under: {data_dir:?}");

    let data_dir_str = data_dir.display().to_string();

    let mut argv: Vec<&str> = vec![
        crate::utils::env::project_name(),
        "--ip",
        "127.0.0.1",
        "--ports",
        "0,0",
        "--data",
        &data_dir_str,
        "--graceful",
        "0.42",
        "--blob-bytes",
        "64",
    ];
    argv.extend(EXACT_LATE_ARGS);
    argv.extend(extra_args);

    let args = Args::try_parse_from(argv).unwrap();

    let wait_server_ready = Arc::new(OnceLock::new());
    let notify_server_ready = wait_server_ready.clone();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        let server_future = crate::run_with_args(std::future::pending::<()>(), args);

        notify_server_ready.set(()).expect("waiter to be notified");

        rt.block_on(server_future).expect("serve without errors");
    });

    wait_server_ready.wait();

    data_dir
}
