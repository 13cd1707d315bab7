//! Per-connection request handling.
//!
//! Each accepted connection serves exactly one request:
//! request line, headers up to a blank line, an optional body, one response,
//! then close. The store lock is only taken inside the store call, never while
//! waiting on the network.

use crate::protocol::{parse_headers, parse_request_line, Response, Route, Status};
use crate::storage::{self, NewEntry, Store};
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, error, trace, warn};

/// Status paired with its encoded response
type Reply = (Status, BytesMut);

/// Handle a single client connection.
///
/// Returns the status that was written, or `None` if the connection was
/// abandoned before a request line arrived. Errors are write failures on the
/// response itself.
pub async fn handle_connection<S>(stream: S, store: Arc<Store>) -> io::Result<Option<Status>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    // Request line. Nothing is sent back if it never arrives.
    let request_line = match read_line(&mut stream).await {
        Ok(Some(line)) => line,
        Ok(None) => {
            trace!("Connection closed before request line");
            return Ok(None);
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request line");
            return Ok(None);
        }
    };

    let Some(request) = parse_request_line(&request_line) else {
        warn!(line = request_line.trim_end(), "Malformed request line");
        return respond(&mut stream, status_only(Status::BadRequest)).await;
    };

    // Headers, up to and including the blank line.
    let mut header_lines = Vec::new();
    loop {
        match read_line(&mut stream).await {
            Ok(Some(line)) => {
                let blank = line.trim().is_empty();
                header_lines.push(line);
                if blank {
                    break;
                }
            }
            Ok(None) => {
                warn!("Connection closed while reading headers");
                return respond(&mut stream, status_only(Status::BadRequest)).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read headers");
                return respond(&mut stream, status_only(Status::BadRequest)).await;
            }
        }
    }
    let headers = parse_headers(header_lines.iter().map(String::as_str));

    let route = Route::resolve(request.method, request.path);
    debug!(method = request.method, path = request.path, ?route, "Dispatching request");

    let reply = match route {
        Route::FetchAll => fetch_all(&store).await,
        Route::Append => append(&mut stream, headers.content_length(), &store).await,
        Route::NotFound => status_only(Status::NotFound),
    };

    debug!(
        method = request.method,
        path = request.path,
        status = reply.0.code(),
        "Request complete"
    );
    respond(&mut stream, reply).await
}

/// `GET /data`: the full collection as JSON.
async fn fetch_all(store: &Store) -> Reply {
    let encoded = match store.read_all().await {
        Ok(entries) => storage::encode(&entries),
        Err(e) => Err(e),
    };

    match encoded {
        Ok(body) => (Status::Ok, Response::json(Status::Ok, &body)),
        Err(e) => {
            error!(error = %e, "Failed to load collection");
            status_only(Status::InternalServerError)
        }
    }
}

/// `POST /data`: read the declared body, decode a batch and append it.
async fn append<R>(reader: &mut R, content_length: usize, store: &Store) -> Reply
where
    R: AsyncRead + Unpin,
{
    let body = match read_body(reader, content_length).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, expected = content_length, "Failed to read request body");
            return status_only(Status::BadRequest);
        }
    };
    trace!(bytes = body.len(), "Received request body");

    let batch: Vec<NewEntry> = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "Request body is not a list of entries");
            return status_only(Status::BadRequest);
        }
    };

    match store.append_batch(batch).await {
        Ok(added) => {
            debug!(added = added.len(), "Stored batch");
            status_only(Status::Created)
        }
        Err(e) => {
            error!(error = %e, "Failed to store batch");
            status_only(Status::InternalServerError)
        }
    }
}

/// Response with a status line and no body
fn status_only(status: Status) -> Reply {
    (status, Response::status(status))
}

/// Read one `\n`-terminated line. `Ok(None)` means the peer closed the
/// connection before a complete line arrived.
///
/// Bytes are taken as-is; anything that is not UTF-8 is replaced rather than
/// failing the read.
async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line.ends_with(b"\n") {
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    } else {
        Ok(None)
    }
}

/// Read exactly `len` bytes. The buffer grows with what actually arrives, so
/// an inflated `Content-Length` does not allocate up front.
async fn read_body<R>(reader: &mut R, len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    reader.take(len as u64).read_to_end(&mut body).await?;
    if body.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("body ended after {} of {} bytes", body.len(), len),
        ));
    }
    Ok(body)
}

/// Write the response and close our side of the connection.
async fn respond<W>(writer: &mut W, (status, response): Reply) -> io::Result<Option<Status>>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&response).await?;
    writer.shutdown().await?;
    Ok(Some(status))
}
