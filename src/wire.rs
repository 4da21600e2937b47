//! Newline-delimited JSON over TCP. One request per line, one response
//! line per request, in order.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::protocol::{self, Response};

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let peer = socket.peer_addr().ok();
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    // After a decode error the stream yields one `None` before resuming.
    let mut recovering = false;
    loop {
        let frame = match framed.next().await {
            Some(frame) => frame,
            None if recovering => {
                recovering = false;
                continue;
            }
            None => break,
        };
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => protocol::handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(?peer, "request line over {MAX_LINE_LEN} bytes");
                recovering = true;
                Response::failure(&EngineError::LimitExceeded("request line too long"))
            }
            Err(e) => return Err(codec_err(e)),
        };
        framed.send(response.to_line()).await.map_err(codec_err)?;
    }

    debug!(?peer, "client disconnected");
    Ok(())
}
