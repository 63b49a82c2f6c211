//! Shared fixtures: in-memory fake workers speaking the framed protocol,
//! worker configs backed by the `echo-worker` binary, and a raw-socket HTTP
//! harness for driving a running service.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stoker::frame;
use stoker::hub::EventHub;
use stoker::metrics::Metrics;
use stoker::payload::{RequestPayload, ResponsePayload};
use stoker::pool::WorkerPool;
use stoker::server::{AppService, HttpServer, ServerHandle};
use stoker::static_files::StaticFiles;
use stoker::supervisor::Supervisor;
use stoker::worker::{Worker, WorkerCommand, WorkerConfig};

pub struct ChannelWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "fake pipe closed"))?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub fn pipe() -> (ChannelWriter, ChannelReader) {
    let (tx, rx) = mpsc::channel();
    (
        ChannelWriter { tx },
        ChannelReader {
            rx,
            buf: Vec::new(),
            pos: 0,
        },
    )
}

/// Config whose restart command cannot spawn; for workers that must never
/// be respawned by a test.
pub fn inert_cfg(timeout: Duration) -> WorkerConfig {
    WorkerConfig {
        command: WorkerCommand::new("definitely-not-a-real-binary", vec![], "."),
        max_requests: 1000,
        request_timeout: timeout,
    }
}

/// Config that launches the crate's `echo-worker` binary.
pub fn echo_cfg(timeout: Duration) -> WorkerConfig {
    WorkerConfig {
        command: WorkerCommand::new(env!("CARGO_BIN_EXE_echo-worker"), vec![], "."),
        max_requests: 1000,
        request_timeout: timeout,
    }
}

/// In-memory worker: a thread reads request frames and answers
/// `label:path` so tests can tell which worker served a request.
pub fn fake_worker(label: &str, timeout: Duration) -> Arc<Worker> {
    let label = label.to_string();
    let (stdin_w, mut stdin_r) = pipe();
    let (mut stdout_w, stdout_r) = pipe();

    thread::spawn(move || loop {
        let payload = match frame::read_frame(&mut stdin_r) {
            Ok(p) => p,
            Err(_) => return,
        };
        let req: RequestPayload = match serde_json::from_slice(&payload) {
            Ok(r) => r,
            Err(_) => return,
        };
        let resp = ResponsePayload {
            id: req.id.clone(),
            status: 200,
            headers: HashMap::from([("X-Worker".to_string(), label.clone())]),
            body: format!("{label}:{}", req.path),
        };
        let raw = serde_json::to_vec(&resp).unwrap();
        if frame::write_frame(&mut stdout_w, &raw).is_err() {
            return;
        }
    });

    Arc::new(Worker::from_parts(
        Box::new(stdin_w),
        Box::new(stdout_r),
        inert_cfg(timeout),
    ))
}

/// Pool of fake workers labeled `<label>0`, `<label>1`, ...
pub fn fake_pool(label: &str, count: usize, timeout: Duration) -> WorkerPool {
    WorkerPool::from_workers(
        (0..count)
            .map(|i| fake_worker(&format!("{label}{i}"), timeout))
            .collect(),
    )
}

pub fn request(method: &str, path: &str, body: &str) -> RequestPayload {
    RequestPayload {
        method: method.to_string(),
        path: path.to_string(),
        body: body.to_string(),
        ..Default::default()
    }
}

/// Bind the service on a free localhost port and wait until it accepts.
pub fn start_service(
    supervisor: Arc<Supervisor>,
    statics: StaticFiles,
) -> (ServerHandle, SocketAddr, Arc<EventHub>, Arc<Metrics>) {
    // worker pipe exchanges block scheduler threads; keep several around
    // since the test harness runs services concurrently
    may::config().set_stack_size(0x10000).set_workers(8);
    let hub = Arc::new(EventHub::new());
    let metrics = Arc::new(Metrics::new());
    let service = AppService::new(
        supervisor,
        Arc::clone(&hub),
        Arc::clone(&metrics),
        Arc::new(statics),
    );

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let handle = HttpServer(service).start(addr).unwrap();
    handle.wait_ready().unwrap();
    (handle, addr, hub, metrics)
}

pub fn send_request(addr: &SocketAddr, req: &str) -> String {
    send_request_with_timeout(addr, req, Duration::from_millis(500))
}

pub fn send_request_with_timeout(addr: &SocketAddr, req: &str, timeout: Duration) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(req.as_bytes()).unwrap();
    stream.set_read_timeout(Some(timeout)).unwrap();
    let mut buf = Vec::new();
    loop {
        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                break
            }
            Err(e) => panic!("read error: {e:?}"),
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Split a raw HTTP/1.1 response into status, header pairs (names
/// lowercased), and body.
pub fn parse_parts(resp: &str) -> (u16, Vec<(String, String)>, String) {
    let mut parts = resp.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or("");
    let body = parts.next().unwrap_or("").to_string();

    let mut status = 0;
    let mut headers = Vec::new();
    for line in head.lines() {
        if line.starts_with("HTTP/1.1") {
            status = line.split_whitespace().nth(1).unwrap_or("0").parse().unwrap_or(0);
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    (status, headers, body)
}

pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == &name.to_ascii_lowercase())
        .map(|(_, v)| v.as_str())
}
