use tracing_subscriber::fmt::MakeWriter;

/// Fans formatted log lines out to the live `/api/logs` SSE stream while
/// still writing them to stdout.
#[derive(Clone)]
pub struct BroadcastMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
        }
    }
}

pub struct BroadcastWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
