/*!
 * Harness Daemon Client
 * JSON IPC communication with bthd
 */

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::protocol::{Request, RequestEnvelope, ResponseEnvelope};

pub struct HarnessClient {
    socket_path: String,
}

impl HarnessClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    /// One request per connection; waits for the single response line.
    pub async fn send(&self, request: Request) -> Result<ResponseEnvelope> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("cannot reach bthd at {}", self.socket_path))?;
        let (read_half, mut write_half) = stream.into_split();

        let envelope = RequestEnvelope::new(request);
        let request_json = serde_json::to_string(&envelope)?;
        write_half.write_all(request_json.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        let mut line = String::new();
        if BufReader::new(read_half).read_line(&mut line).await? == 0 {
            bail!("bthd closed the connection without a response");
        }

        let response: ResponseEnvelope = serde_json::from_str(line.trim())?;
        if response.id != envelope.id {
            bail!("response id {} does not match request {}", response.id, envelope.id);
        }
        Ok(response)
    }
}
