use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::segment::Document;

use super::super::{Driver, EmbeddedDriver};
use super::protocol::{
    encode_search_response, encode_stats, read_frame, write_frame, Frame, Request,
};

/// Worker process side of the IPC driver
///
/// Connections are served one at a time against a single embedded index.
/// A `close` request shuts the worker down.
pub struct IpcWorker {
    listener: UnixListener,
    socket_path: PathBuf,
    driver: EmbeddedDriver,
}

impl IpcWorker {
    /// Bind `socket_path`, replacing a stale socket file
    pub fn bind<P: AsRef<Path>>(socket_path: P, config: EngineConfig) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        let driver = EmbeddedDriver::open(config)?;
        info!(socket = %socket_path.display(), "IPC worker listening");
        Ok(Self {
            listener,
            socket_path,
            driver,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until a client sends `close`
    pub fn serve(mut self) -> Result<()> {
        loop {
            let (stream, _) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept IPC connection");
                    continue;
                }
            };
            debug!("IPC client connected");
            if serve_connection(&mut self.driver, stream)? {
                break;
            }
            debug!("IPC client disconnected");
        }
        info!("IPC worker shutting down");
        Ok(())
    }
}

impl Drop for IpcWorker {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Serve requests on one stream; returns `true` once `close` was handled
///
/// Malformed requests and failed operations are answered with an error
/// frame. A broken or truncated stream ends the connection, in either
/// direction, and leaves the worker serving.
pub fn serve_connection<S: Read + Write>(driver: &mut dyn Driver, mut stream: S) -> Result<bool> {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(false),
            Err(e) => {
                debug!(error = %e, "Dropping IPC connection");
                return Ok(false);
            }
        };

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(kind = frame.kind, error = %e, "Rejecting IPC request");
                if !reply(&mut stream, &Frame::error(&e.to_string())) {
                    return Ok(false);
                }
                continue;
            }
        };

        let closing = request == Request::Close;
        let response = match handle(driver, request) {
            Ok(payload) => Frame::response(payload),
            Err(e) => Frame::error(&e.to_string()),
        };
        if !reply(&mut stream, &response) {
            return Ok(closing);
        }
        if closing {
            return Ok(true);
        }
    }
}

/// Send one frame; `false` once the client is gone
fn reply<W: Write>(stream: &mut W, frame: &Frame) -> bool {
    match write_frame(stream, frame) {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "IPC client went away before its reply");
            false
        }
    }
}

fn handle(driver: &mut dyn Driver, request: Request) -> Result<Vec<u8>> {
    match request {
        Request::AddDocument { id, text } => {
            driver.add_document(&Document { id, text })?;
            Ok(Vec::new())
        }
        Request::Build => {
            driver.build()?;
            Ok(Vec::new())
        }
        Request::Search { limit, query } => {
            let response = driver.search(&query, limit as usize, 0)?;
            Ok(encode_search_response(&response))
        }
        Request::Stats => Ok(encode_stats(&driver.stats()?)),
        Request::Close => {
            driver.close()?;
            Ok(Vec::new())
        }
    }
}
