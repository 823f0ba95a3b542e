// Lowers RLIMIT_NOFILE for the whole process, so it lives in its own test binary.
use etude_core::{Config, Server};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;

fn nofile_limit() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) }, 0);
    limit
}

fn set_nofile_limit(limit: &libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) }, 0);
}

#[test]
fn test_descriptor_exhaustion_drops_connection_and_recovers() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("index.html"), b"<p>ok</p>").unwrap();

    let config = Config {
        doc_root: root.path().to_path_buf(),
        workers: 1,
        max_connections: 4096,
        ..Config::default()
    };
    let server = Server::bind(0, config).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));
    let handle = server.shutdown_handle();
    let thread = thread::spawn(move || server.run());

    // The client socket takes the last allowed descriptor; the server's accept gets EMFILE.
    let next_free = File::open("/dev/null").unwrap().as_raw_fd();
    let original = nofile_limit();
    set_nofile_limit(&libc::rlimit {
        rlim_cur: next_free as libc::rlim_t + 1,
        rlim_max: original.rlim_max,
    });

    let dropped = TcpStream::connect(addr);
    let outcome = dropped.map(|mut stream| {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 16];
        stream.read(&mut buf)
    });
    set_nofile_limit(&original);

    match outcome.unwrap() {
        Ok(0) => {}
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
        other => panic!("expected the pending connection to be dropped, got {:?}", other),
    }

    // With descriptors available again the server keeps serving.
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{:?}", response);
    assert!(response.ends_with("<p>ok</p>"));

    handle.shutdown();
    thread.join().unwrap().unwrap();
}
