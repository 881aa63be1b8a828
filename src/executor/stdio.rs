use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{FallbackExecutor, ModelCell, ModelLoader};
use crate::error::Result;
use crate::protocol::{Envelope, WorkerCommand, WorkerResponse};

/// Serve the fallback executor over stdin/stdout, one JSON envelope per line
pub async fn serve_stdio(loader: Arc<dyn ModelLoader>, capacity: usize) -> Result<()> {
    serve(loader, capacity, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Read command envelopes from `input` and write response envelopes to `output`.
/// Returns once `input` reaches EOF and every in-flight request has answered.
pub async fn serve<R, W>(
    loader: Arc<dyn ModelLoader>,
    capacity: usize,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Envelope<WorkerResponse>>();

    let cell = Arc::new(ModelCell::new(loader));
    let executor = tokio::spawn(FallbackExecutor::new(cell, command_rx, response_tx).run());
    info!("Serving fallback executor on stdio");

    let mut input = BufReader::new(input);
    // Raw bytes: a line that is not UTF-8 is skipped like any other malformed line
    let mut line = Vec::new();
    // Dropped on EOF so the executor drains its jobs and closes the responses
    let mut commands = Some(command_tx);

    loop {
        tokio::select! {
            read = input.read_until(b'\n', &mut line), if commands.is_some() => {
                if read? == 0 && line.is_empty() {
                    debug!("Command input closed");
                    commands = None;
                    continue;
                }
                let raw = std::mem::take(&mut line);
                let Some(envelope) = parse_command(&raw) else {
                    continue;
                };
                debug!("Received command {}", envelope.request_id);

                if let Some(tx) = &commands {
                    if tx.send(envelope).await.is_err() {
                        warn!("Executor stopped while commands were pending");
                        break;
                    }
                }
            }
            response = response_rx.recv() => {
                let Some(envelope) = response else { break };
                let mut encoded = serde_json::to_vec(&envelope)?;
                encoded.push(b'\n');
                output.write_all(&encoded).await?;
                output.flush().await?;
            }
        }
    }

    if let Err(e) = executor.await {
        warn!("Fallback executor task ended abnormally: {}", e);
    }
    info!("Fallback executor on stdio finished");
    Ok(())
}

fn parse_command(raw: &[u8]) -> Option<Envelope<WorkerCommand>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice(raw) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!("Skipping malformed command line: {}", e);
            None
        }
    }
}
