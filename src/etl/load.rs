/// Load Module
///
/// Handles persisting normalized records to the configured sinks. Records are
/// written as JSON Lines, one object per line, routed by kind to independent
/// destinations (file or stdout). Sinks are only ever written by the single
/// ordered writer stage, so no synchronization happens here.
use crate::models::{ExportSelection, Record};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Accepts a stream of typed records and persists them.
///
/// `open` is called once before any record, `close` exactly once per job on
/// both success and failure paths; `close` flushes whatever was accepted.
#[async_trait]
pub trait ItemExporter: Send {
    async fn open(&mut self) -> io::Result<()>;
    async fn export(&mut self, record: &Record) -> io::Result<()>;
    async fn close(&mut self) -> io::Result<()>;
}

/// Destination for one record kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Output {
    /// Parse a destination argument; `-` means stdout.
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            Output::Stdout
        } else {
            Output::File(PathBuf::from(arg))
        }
    }
}

/// Buffered JSON-lines writer over one destination
struct JsonLinesSink {
    out: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesSink {
    async fn create(output: &Output) -> io::Result<Self> {
        let out: Box<dyn AsyncWrite + Send + Unpin> = match output {
            Output::Stdout => Box::new(tokio::io::stdout()),
            Output::File(path) => Box::new(tokio::fs::File::create(path).await?),
        };

        Ok(Self { out: BufWriter::new(out) })
    }

    async fn write(&mut self, record: &Record) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.out.write_all(&line).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.out.shutdown().await
    }
}

struct SinkSlot {
    output: Output,
    sink: Option<JsonLinesSink>,
}

/// Routes each record kind to its configured sink.
///
/// A kind without a configured destination is simply not exported; the job's
/// export selection is derived from which destinations are present.
pub struct CompositeExporter {
    blocks: Option<SinkSlot>,
    transactions: Option<SinkSlot>,
    instructions: Option<SinkSlot>,
    closed: bool,
}

impl CompositeExporter {
    pub fn new(
        blocks: Option<Output>,
        transactions: Option<Output>,
        instructions: Option<Output>,
    ) -> Self {
        let slot = |output: Option<Output>| output.map(|output| SinkSlot { output, sink: None });

        Self {
            blocks: slot(blocks),
            transactions: slot(transactions),
            instructions: slot(instructions),
            closed: false,
        }
    }

    /// The record kinds this exporter was configured with.
    pub fn selection(&self) -> ExportSelection {
        ExportSelection {
            blocks: self.blocks.is_some(),
            transactions: self.transactions.is_some(),
            instructions: self.instructions.is_some(),
        }
    }

    fn slots_mut(&mut self) -> impl Iterator<Item = &mut SinkSlot> {
        self.blocks
            .iter_mut()
            .chain(self.transactions.iter_mut())
            .chain(self.instructions.iter_mut())
    }
}

#[async_trait]
impl ItemExporter for CompositeExporter {
    async fn open(&mut self) -> io::Result<()> {
        for slot in self.slots_mut() {
            slot.sink = Some(JsonLinesSink::create(&slot.output).await?);
        }
        Ok(())
    }

    async fn export(&mut self, record: &Record) -> io::Result<()> {
        let slot = match record {
            Record::Block(_) => self.blocks.as_mut(),
            Record::Transaction(_) => self.transactions.as_mut(),
            Record::Instruction(_) => self.instructions.as_mut(),
        };

        match slot.and_then(|s| s.sink.as_mut()) {
            Some(sink) => sink.write(record).await,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Flush every open sink; report the first failure after trying all.
        let mut first_error = None;
        for slot in self.slots_mut() {
            if let Some(sink) = slot.sink.as_mut() {
                if let Err(e) = sink.finish().await {
                    first_error.get_or_insert(e);
                }
            }
            slot.sink = None;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
