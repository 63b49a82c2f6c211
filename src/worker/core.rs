use crate::error::WorkerError;
use crate::frame;
use crate::payload::{
    RequestPayload, ResponsePayload, StreamFrame, FRAME_CHUNK, FRAME_END, FRAME_ERROR,
    FRAME_HEADERS,
};
use crate::worker::process::{PipeReader, PipeWriter, WorkerCommand};
use std::io;
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Destination for a streaming response.
///
/// The worker translates stream frames into calls on this trait: headers
/// and status first, then body chunks. `write_chunk` implementations are
/// expected to flush so clients observe data incrementally.
pub trait StreamSink {
    /// Set a header, replacing any previous value under the same name.
    fn set_header(&mut self, name: &str, value: &str);
    /// Add a header instance without replacing existing ones (Set-Cookie).
    fn append_header(&mut self, name: &str, value: &str);
    /// Commit status and headers, opening the body.
    fn write_head(&mut self, status: u16) -> io::Result<()>;
    /// Append body bytes and flush.
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Per-worker settings, shared by every restart.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub command: WorkerCommand,
    /// Requests served before the worker is recycled; 0 disables recycling.
    pub max_requests: u64,
    /// Per-request timeout; zero disables the timeout.
    pub request_timeout: Duration,
}

/// The child process handle and both pipe ends, guarded by the worker's
/// exchange lock so request/response pairs never interleave.
struct Conn {
    child: Option<Child>,
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
}

/// One long-lived worker child process.
///
/// All pipe I/O is serialized through the exchange lock; the liveness flag
/// and served counter are atomics so the pool can inspect them without
/// touching an in-flight request. A dead worker is not respawned until the
/// next `handle`/`stream` call observes the flag.
pub struct Worker {
    conn: Mutex<Conn>,
    dead: AtomicBool,
    served: AtomicU64,
    cfg: WorkerConfig,
}

impl Worker {
    /// Spawn the child process and wrap it. Spawn failure is fatal to the
    /// caller; nothing is retried at construction time.
    pub fn new(cfg: WorkerConfig) -> Result<Self, WorkerError> {
        let (child, stdin, stdout) = cfg.command.spawn()?;
        info!(pid = child.id(), dir = %cfg.command.dir.display(), "worker started");
        Ok(Self {
            conn: Mutex::new(Conn {
                child: Some(child),
                stdin: Some(stdin),
                stdout: Some(stdout),
            }),
            dead: AtomicBool::new(false),
            served: AtomicU64::new(0),
            cfg,
        })
    }

    /// Build a worker around an already-connected pipe pair instead of a
    /// spawned child. A restart goes through the configured command like
    /// any other worker.
    pub fn from_parts(stdin: PipeWriter, stdout: PipeReader, cfg: WorkerConfig) -> Self {
        Self {
            conn: Mutex::new(Conn {
                child: None,
                stdin: Some(stdin),
                stdout: Some(stdout),
            }),
            dead: AtomicBool::new(false),
            served: AtomicU64::new(0),
            cfg,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Flip the liveness flag. The process is left running; the next
    /// `handle`/`stream` call observes the flag and restarts lazily.
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    pub fn served_count(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// Buffered exchange: write the request frame, read one response frame
    /// under the configured timeout, decode it. Exactly one retry on a
    /// broken-pipe class failure; a timeout kills the child and never
    /// retries.
    pub fn handle(&self, req: &RequestPayload) -> Result<ResponsePayload, WorkerError> {
        for _ in 0..2 {
            let mut conn = self.conn.lock().unwrap();
            if self.is_dead() {
                self.respawn(&mut conn)?;
            }

            match self.exchange(&mut conn, req) {
                Ok(resp) => {
                    let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
                    if self.cfg.max_requests > 0 && served >= self.cfg.max_requests {
                        info!(served, "worker reached request budget, recycling");
                        self.mark_dead();
                    }
                    return Ok(resp);
                }
                Err(e) if e.is_broken_pipe() => {
                    warn!(error = %e, "worker pipe broke, retrying once");
                    self.mark_dead();
                    continue;
                }
                Err(e) => {
                    if matches!(
                        e,
                        WorkerError::EmptyFrame
                            | WorkerError::FrameTooLarge(_)
                            | WorkerError::Decode(_)
                    ) {
                        self.mark_dead();
                    }
                    return Err(e);
                }
            }
        }
        Err(WorkerError::pipe_closed())
    }

    /// Streaming exchange: write the request frame, then translate stream
    /// frames onto the sink until `end` or `error`. The exchange lock is
    /// held for the whole stream; a watchdog kills the child by pid if the
    /// timeout elapses, which unblocks the inline read.
    pub fn stream(&self, req: &RequestPayload, sink: &mut dyn StreamSink) -> Result<(), WorkerError> {
        let mut conn = self.conn.lock().unwrap();
        if self.is_dead() {
            self.respawn(&mut conn)?;
        }

        let timed_out = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let mut watchdog = None;
        if self.cfg.request_timeout > Duration::ZERO {
            if let Some(pid) = conn.child.as_ref().map(Child::id) {
                let flag = Arc::clone(&timed_out);
                let timeout = self.cfg.request_timeout;
                watchdog = Some(thread::spawn(move || {
                    // Disconnection means the stream finished; only a true
                    // timeout pulls the trigger.
                    if matches!(done_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                        flag.store(true, Ordering::SeqCst);
                        kill_pid(pid);
                    }
                }));
            }
        }

        let result = self.stream_frames(&mut conn, req, sink);
        drop(done_tx);
        if let Some(handle) = watchdog {
            let _ = handle.join();
        }

        if timed_out.load(Ordering::SeqCst) {
            self.mark_dead();
            Self::kill_and_reap(&mut conn);
            if result.is_err() {
                warn!(timeout = ?self.cfg.request_timeout, "worker stream timed out");
                return Err(WorkerError::Timeout(self.cfg.request_timeout));
            }
        }
        result
    }

    fn stream_frames(
        &self,
        conn: &mut Conn,
        req: &RequestPayload,
        sink: &mut dyn StreamSink,
    ) -> Result<(), WorkerError> {
        let raw = serde_json::to_vec(req).map_err(WorkerError::Decode)?;
        let stdin = conn.stdin.as_mut().ok_or_else(WorkerError::pipe_closed)?;
        frame::write_frame(stdin, &raw)?;

        let stdout = conn.stdout.as_mut().ok_or_else(WorkerError::pipe_closed)?;
        let mut headers_sent = false;

        loop {
            let payload = match frame::read_frame(stdout) {
                Ok(p) => p,
                Err(e) => {
                    self.mark_dead();
                    return Err(e);
                }
            };
            let frame: StreamFrame = match serde_json::from_slice(&payload) {
                Ok(f) => f,
                Err(e) => {
                    self.mark_dead();
                    return Err(WorkerError::Decode(e));
                }
            };

            match frame.kind.as_str() {
                FRAME_HEADERS => {
                    if !headers_sent {
                        for (name, values) in &frame.headers {
                            let list = values.as_list();
                            if list.is_empty() {
                                continue;
                            }
                            if name.eq_ignore_ascii_case("set-cookie") {
                                for value in list {
                                    sink.append_header(name, value);
                                }
                            } else {
                                sink.set_header(name, &list.join(", "));
                            }
                        }
                        let status = if frame.status != 0 { frame.status } else { 200 };
                        sink.write_head(status)?;
                        headers_sent = true;
                    }
                    if !frame.data.is_empty() {
                        sink.write_chunk(frame.data.as_bytes())?;
                    }
                }
                FRAME_CHUNK => {
                    if !headers_sent {
                        sink.write_head(200)?;
                        headers_sent = true;
                    }
                    if !frame.data.is_empty() {
                        sink.write_chunk(frame.data.as_bytes())?;
                    }
                }
                FRAME_END => return Ok(()),
                FRAME_ERROR => return Err(WorkerError::Stream(frame.error)),
                other => return Err(WorkerError::UnknownFrame(other.to_string())),
            }
        }
    }

    /// One buffered request/response round trip. The frame read runs on a
    /// detached thread returning the result and the stdout handle over a
    /// channel, so the timeout can fire without holding up the reader.
    fn exchange(
        &self,
        conn: &mut Conn,
        req: &RequestPayload,
    ) -> Result<ResponsePayload, WorkerError> {
        let raw = serde_json::to_vec(req).map_err(WorkerError::Decode)?;
        let stdin = conn.stdin.as_mut().ok_or_else(WorkerError::pipe_closed)?;
        frame::write_frame(stdin, &raw)?;

        let mut stdout = conn.stdout.take().ok_or_else(WorkerError::pipe_closed)?;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = frame::read_frame(&mut stdout).and_then(|payload| {
                serde_json::from_slice::<ResponsePayload>(&payload).map_err(WorkerError::Decode)
            });
            let _ = tx.send((result, stdout));
        });

        let received = if self.cfg.request_timeout > Duration::ZERO {
            rx.recv_timeout(self.cfg.request_timeout)
        } else {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        match received {
            Ok((result, stdout)) => {
                conn.stdout = Some(stdout);
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.cfg.request_timeout, "worker request timed out, killing child");
                self.mark_dead();
                Self::kill_and_reap(conn);
                Err(WorkerError::Timeout(self.cfg.request_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::pipe_closed()),
        }
    }

    /// Replace the child process. Caller holds the exchange lock.
    fn respawn(&self, conn: &mut Conn) -> Result<(), WorkerError> {
        conn.stdin = None;
        conn.stdout = None;
        Self::kill_and_reap(conn);

        let (child, stdin, stdout) = self.cfg.command.spawn()?;
        info!(pid = child.id(), dir = %self.cfg.command.dir.display(), "worker restarted");
        conn.child = Some(child);
        conn.stdin = Some(stdin);
        conn.stdout = Some(stdout);
        self.served.store(0, Ordering::SeqCst);
        self.dead.store(false, Ordering::Release);
        Ok(())
    }

    fn kill_and_reap(conn: &mut Conn) {
        if let Some(child) = conn.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        conn.child = None;
    }
}

fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::HeaderValues;
    use std::collections::HashMap;
    use std::io::{Cursor, Read, Write};
    use std::sync::mpsc::{Receiver, Sender};

    fn test_cfg(timeout: Duration) -> WorkerConfig {
        WorkerConfig {
            command: WorkerCommand::new("definitely-not-a-real-binary", vec![], "."),
            max_requests: 1000,
            request_timeout: timeout,
        }
    }

    /// In-process pipe halves over a byte channel, standing in for a child's
    /// stdin/stdout the way `io.Pipe` pairs do in process-free tests.
    struct ChannelWriter {
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

    struct ChannelReader {
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

    fn pipe() -> (ChannelWriter, ChannelReader) {
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

    /// Worker whose "child" is a thread echoing `label:path` responses.
    fn fake_worker(label: &'static str, timeout: Duration) -> Worker {
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
                headers: HashMap::from([("X-Worker".to_string(), label.to_string())]),
                body: format!("{label}:{}", req.path),
            };
            let raw = serde_json::to_vec(&resp).unwrap();
            if frame::write_frame(&mut stdout_w, &raw).is_err() {
                return;
            }
        });

        Worker::from_parts(Box::new(stdin_w), Box::new(stdout_r), test_cfg(timeout))
    }

    fn request(path: &str) -> RequestPayload {
        RequestPayload {
            id: "t".to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        status: Option<u16>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl RecordingSink {
        fn header_values(&self, name: &str) -> Vec<&str> {
            self.headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .collect()
        }
    }

    impl StreamSink for RecordingSink {
        fn set_header(&mut self, name: &str, value: &str) {
            self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            self.headers.push((name.to_string(), value.to_string()));
        }
        fn append_header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }
        fn write_head(&mut self, status: u16) -> io::Result<()> {
            self.status = Some(status);
            Ok(())
        }
        fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
            self.body.extend_from_slice(data);
            Ok(())
        }
    }

    fn frames_reader(frames: &[StreamFrame]) -> PipeReader {
        let mut buf = Vec::new();
        for frame in frames {
            let raw = serde_json::to_vec(frame).unwrap();
            frame::write_frame(&mut buf, &raw).unwrap();
        }
        Box::new(Cursor::new(buf))
    }

    fn stream_worker(frames: &[StreamFrame]) -> Worker {
        Worker::from_parts(
            Box::new(io::sink()),
            frames_reader(frames),
            test_cfg(Duration::from_millis(500)),
        )
    }

    #[test]
    fn handle_happy_path() {
        let w = fake_worker("w0", Duration::from_secs(1));
        let resp = w.handle(&request("/test")).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "w0:/test");
        assert_eq!(resp.headers["X-Worker"], "w0");
        assert!(!w.is_dead());
        assert_eq!(w.served_count(), 1);
    }

    #[test]
    fn timeout_marks_dead_and_never_retries() {
        // stdout's sender stays alive so the read blocks past the timeout.
        let (stdin_w, _stdin_r) = pipe();
        let (_stdout_keepalive, stdout_r) = pipe();
        let w = Worker::from_parts(
            Box::new(stdin_w),
            Box::new(stdout_r),
            test_cfg(Duration::from_millis(1)),
        );

        let err = w.handle(&request("/timeout")).unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
        assert!(w.is_dead());
    }

    #[test]
    fn request_budget_recycles_worker() {
        let mut cfg = test_cfg(Duration::from_secs(1));
        cfg.max_requests = 2;
        let (stdin_w, mut stdin_r) = pipe();
        let (mut stdout_w, stdout_r) = pipe();
        thread::spawn(move || loop {
            let Ok(payload) = frame::read_frame(&mut stdin_r) else {
                return;
            };
            let req: RequestPayload = serde_json::from_slice(&payload).unwrap();
            let raw = serde_json::to_vec(&ResponsePayload {
                id: req.id,
                status: 200,
                ..Default::default()
            })
            .unwrap();
            if frame::write_frame(&mut stdout_w, &raw).is_err() {
                return;
            }
        });
        let w = Worker::from_parts(Box::new(stdin_w), Box::new(stdout_r), cfg);

        w.handle(&request("/a")).unwrap();
        assert!(!w.is_dead());
        w.handle(&request("/b")).unwrap();
        assert!(w.is_dead());
    }

    #[test]
    fn broken_pipe_retries_then_surfaces_spawn_failure() {
        // stdout is already closed, so the first exchange sees EOF; the
        // retry restarts through a command that cannot spawn.
        let (stdin_w, _stdin_r) = pipe();
        let (stdout_w, stdout_r) = pipe();
        drop(stdout_w);
        let w = Worker::from_parts(
            Box::new(stdin_w),
            Box::new(stdout_r),
            test_cfg(Duration::from_secs(1)),
        );

        match w.handle(&request("/retry")) {
            Err(WorkerError::Spawn(_)) => {}
            other => panic!("expected Spawn error after retry, got {other:?}"),
        }
        assert!(w.is_dead());
    }

    #[test]
    fn mark_dead_is_idempotent() {
        let w = fake_worker("w0", Duration::from_secs(1));
        w.mark_dead();
        w.mark_dead();
        assert!(w.is_dead());
    }

    #[test]
    fn stream_error_frame_propagates_message() {
        let w = stream_worker(&[StreamFrame::error("boom")]);
        let mut sink = RecordingSink::default();
        let err = w.stream(&request("/stream"), &mut sink).unwrap_err();
        assert!(err.to_string().contains("boom"), "got {err}");
    }

    #[test]
    fn stream_multi_value_headers_join_and_cookies_stay_separate() {
        let headers = HashMap::from([
            (
                "X-Test".to_string(),
                HeaderValues::Many(vec!["one".to_string(), "two".to_string()]),
            ),
            (
                "Set-Cookie".to_string(),
                HeaderValues::Many(vec!["a=1".to_string(), "b=2".to_string()]),
            ),
        ]);
        let w = stream_worker(&[StreamFrame::headers(200, headers), StreamFrame::end()]);
        let mut sink = RecordingSink::default();
        w.stream(&request("/stream"), &mut sink).unwrap();

        assert_eq!(sink.status, Some(200));
        assert_eq!(sink.header_values("X-Test"), ["one, two"]);
        assert_eq!(sink.header_values("Set-Cookie"), ["a=1", "b=2"]);
    }

    #[test]
    fn stream_skips_empty_header_value_lists() {
        let headers = HashMap::from([
            ("X-Empty".to_string(), HeaderValues::Many(vec![])),
            (
                "X-Test".to_string(),
                HeaderValues::One("value".to_string()),
            ),
        ]);
        let w = stream_worker(&[StreamFrame::headers(200, headers), StreamFrame::end()]);
        let mut sink = RecordingSink::default();
        w.stream(&request("/stream"), &mut sink).unwrap();

        assert!(sink.header_values("X-Empty").is_empty());
        assert_eq!(sink.header_values("X-Test"), ["value"]);
    }

    #[test]
    fn stream_bare_chunk_synthesizes_default_headers() {
        let w = stream_worker(&[StreamFrame::chunk("x"), StreamFrame::end()]);
        let mut sink = RecordingSink::default();
        w.stream(&request("/stream"), &mut sink).unwrap();

        assert_eq!(sink.status, Some(200));
        assert_eq!(sink.body, b"x");
    }

    #[test]
    fn stream_unknown_frame_type_fails() {
        let frame = StreamFrame {
            kind: "mystery".to_string(),
            ..Default::default()
        };
        let w = stream_worker(&[frame]);
        let mut sink = RecordingSink::default();
        let err = w.stream(&request("/stream"), &mut sink).unwrap_err();
        match err {
            WorkerError::UnknownFrame(tag) => assert_eq!(tag, "mystery"),
            other => panic!("expected UnknownFrame, got {other:?}"),
        }
    }

    #[test]
    fn stream_happy_path_concatenates_chunks() {
        let headers = HashMap::from([(
            "X-Test".to_string(),
            HeaderValues::One("ok".to_string()),
        )]);
        let mut head = StreamFrame::headers(201, headers);
        head.data = "hello".to_string();
        let w = stream_worker(&[head, StreamFrame::chunk("world"), StreamFrame::end()]);
        let mut sink = RecordingSink::default();
        w.stream(&request("/stream"), &mut sink).unwrap();

        assert_eq!(sink.status, Some(201));
        assert_eq!(sink.header_values("X-Test"), ["ok"]);
        assert_eq!(sink.body, b"helloworld");
    }

    #[test]
    fn stream_eof_mid_stream_marks_worker_dead() {
        let headers = StreamFrame::headers(200, HashMap::new());
        // headers frame arrives, then the pipe ends with no end frame
        let w = stream_worker(&[headers]);
        let mut sink = RecordingSink::default();
        let err = w.stream(&request("/stream"), &mut sink).unwrap_err();
        assert!(err.is_broken_pipe(), "got {err:?}");
        assert!(w.is_dead());
    }
}
