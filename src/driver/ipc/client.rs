use std::ffi::OsStr;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{FtsError, Result};
use crate::segment::Document;

use super::super::{Driver, DriverInfo, IndexStats, SearchResponse};
use super::protocol::{
    decode_search_response, decode_stats, read_frame, write_frame, Request, MSG_ERROR,
    MSG_RESPONSE,
};

const CONNECT_ATTEMPTS: u32 = 100;
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

/// Client side of the worker protocol
///
/// Works over any byte stream; `connect` and `spawn` use a Unix socket.
pub struct IpcDriver<S: Read + Write + Send = UnixStream> {
    stream: S,
    /// Worker process started by `spawn`
    child: Option<Child>,
    closed: bool,
}

impl IpcDriver<UnixStream> {
    /// Connect to a running worker
    pub fn connect<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)?;
        Ok(Self::new(stream))
    }

    /// Launch a worker binary serving `socket_path` and connect to it
    ///
    /// The configuration is handed over as a JSON file next to the socket.
    pub fn spawn<P: AsRef<OsStr>>(
        program: P,
        socket_path: &Path,
        config: &EngineConfig,
    ) -> Result<Self> {
        let config_path = socket_path.with_extension("json");
        let json = serde_json::to_vec(config)
            .map_err(|e| FtsError::InvalidRequest(format!("unserializable config: {}", e)))?;
        std::fs::write(&config_path, json)?;

        let mut child = Command::new(program.as_ref())
            .arg("--socket")
            .arg(socket_path)
            .arg("--config")
            .arg(&config_path)
            .stdin(Stdio::null())
            .spawn()?;
        info!(pid = child.id(), socket = %socket_path.display(), "Spawned IPC worker");

        for attempt in 0..CONNECT_ATTEMPTS {
            match UnixStream::connect(socket_path) {
                Ok(stream) => {
                    debug!(attempt, "Connected to IPC worker");
                    return Ok(Self {
                        stream,
                        child: Some(child),
                        closed: false,
                    });
                }
                Err(_) => {
                    if let Some(status) = child.try_wait()? {
                        return Err(FtsError::Protocol(format!(
                            "worker exited before accepting connections: {}",
                            status
                        )));
                    }
                    thread::sleep(CONNECT_BACKOFF);
                }
            }
        }
        let _ = child.kill();
        let _ = child.wait();
        Err(FtsError::Protocol(format!(
            "worker did not listen on {}",
            socket_path.display()
        )))
    }
}

impl<S: Read + Write + Send> IpcDriver<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            child: None,
            closed: false,
        }
    }

    /// Send one request and wait for its reply payload
    fn call(&mut self, request: &Request) -> Result<Vec<u8>> {
        if self.closed {
            return Err(FtsError::Closed);
        }
        write_frame(&mut self.stream, &request.encode())?;
        let frame = read_frame(&mut self.stream)?
            .ok_or_else(|| FtsError::Protocol("worker closed the connection".into()))?;
        match frame.kind {
            MSG_RESPONSE => Ok(frame.payload),
            MSG_ERROR => Err(FtsError::Protocol(
                String::from_utf8_lossy(&frame.payload).into_owned(),
            )),
            other => Err(FtsError::Protocol(format!(
                "unexpected reply type {}",
                other
            ))),
        }
    }
}

impl<S: Read + Write + Send> Driver for IpcDriver<S> {
    fn name(&self) -> &'static str {
        "ipc"
    }

    fn info(&self) -> DriverInfo {
        DriverInfo::new(
            "BM25 index in a worker process over a length-prefixed socket protocol",
            &["bm25", "segments", "out-of-process", "writable"],
        )
    }

    fn add_document(&mut self, doc: &Document) -> Result<()> {
        self.call(&Request::AddDocument {
            id: doc.id.clone(),
            text: doc.text.clone(),
        })?;
        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        self.call(&Request::Build)?;
        Ok(())
    }

    /// The wire format has no offset, so the page is cut locally
    fn search(&mut self, query: &str, limit: usize, offset: usize) -> Result<SearchResponse> {
        let want = u32::try_from(limit.saturating_add(offset)).unwrap_or(u32::MAX);
        let payload = self.call(&Request::Search {
            limit: want,
            query: query.to_string(),
        })?;
        let mut response = decode_search_response(&payload)?;
        response.hits = response.hits.into_iter().skip(offset).take(limit).collect();
        Ok(response)
    }

    fn stats(&mut self) -> Result<IndexStats> {
        let payload = self.call(&Request::Stats)?;
        decode_stats(&payload)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.call(&Request::Close);
        self.closed = true;
        if let Some(mut child) = self.child.take() {
            if result.is_err() {
                let _ = child.kill();
            }
            let status = child.wait()?;
            debug!(%status, "IPC worker exited");
        }
        result.map(|_| ())
    }
}

impl<S: Read + Write + Send> Drop for IpcDriver<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close IPC worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ipc::server::serve_connection;
    use crate::driver::EmbeddedDriver;

    fn connected_pair() -> (IpcDriver, thread::JoinHandle<bool>) {
        let (client, server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let mut driver = EmbeddedDriver::open(EngineConfig::default()).unwrap();
            serve_connection(&mut driver, server).unwrap()
        });
        (IpcDriver::new(client), handle)
    }

    #[test]
    fn test_ipc_round_trip() {
        let (mut driver, worker) = connected_pair();
        for (id, text) in [("1", "the cat sat"), ("2", "the cat ran"), ("3", "a dog ran")] {
            driver.add_document(&Document::new(id, text)).unwrap();
        }
        driver.build().unwrap();

        let response = driver.search("cat", 10, 0).unwrap();
        let keys: Vec<&str> = response.hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
        assert_eq!(response.total, 2);
        assert!(driver.search("cat dog", 10, 0).unwrap().hits.is_empty());

        // Offset is applied on the client
        let second = driver.search("ran", 1, 1).unwrap();
        assert_eq!(second.hits.len(), 1);
        assert_eq!(second.total, 2);

        assert_eq!(driver.count().unwrap(), 3);
        driver.close().unwrap();
        assert!(worker.join().unwrap());
        assert!(matches!(driver.stats(), Err(FtsError::Closed)));
    }

    #[test]
    fn test_remote_error_surfaces() {
        let (mut driver, _worker) = connected_pair();
        driver.build().unwrap();
        let err = driver.add_document(&Document::new("x", "y")).unwrap_err();
        assert!(matches!(err, FtsError::Protocol(msg) if msg.contains("sealed")));
    }
}
