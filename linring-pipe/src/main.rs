use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use std::{process, thread};

use clap::{Parser, ValueEnum};
use linring::{Atomic, BufferKind, InitOptions, MapError, RingBuffer, Staging, StagingError};
use linring::{StagingOptions, DEFAULT_MIN_SIZE};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(PipeCommand::parse()) {
        tracing::error!("{err}");
        process::exit(1);
    }
}

/// Copy bytes from the input to the output through a staging buffer.
#[derive(Parser)]
#[command(version)]
struct PipeCommand {
    /// The buffer to stage the bytes in.
    #[arg(value_enum, long, default_value_t = BufferArg::Auto)]
    buffer: BufferArg,

    /// Minimum buffer size in bytes. The ring buffer rounds it up to whole pages.
    #[arg(long, default_value_t = DEFAULT_MIN_SIZE)]
    size: usize,

    /// Largest single read from the input.
    #[arg(long, default_value_t = 32 * 1024)]
    block: usize,

    /// Milliseconds between throughput reports.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    #[arg(long, help = "Read from this file instead of stdin")]
    input: Option<PathBuf>,

    #[arg(long, help = "Write to this file instead of stdout")]
    output: Option<PathBuf>,

    /// Read and write on two threads, sharing one ring buffer.
    #[arg(long)]
    split: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum BufferArg {
    /// The mirrored ring buffer.
    Linear,
    /// A flat buffer that moves its contents to the front when needed.
    Flat,
    /// The ring buffer, or the flat buffer where the former is not supported.
    Auto,
}

#[derive(Debug, Error)]
enum PipeError {
    #[error("invalid arguments: {0}")]
    Usage(&'static str),
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error("failed to allocate ring buffer: {0}")]
    Map(#[from] MapError),
    #[error("failed to read input: {0}")]
    Read(io::Error),
    #[error("failed to write output: {0}")]
    Write(io::Error),
    #[error("the reading thread panicked")]
    Panicked,
}

/// Bytes moved so far, sampled by the reporter.
#[derive(Default)]
struct Counters {
    read: AtomicU64,
    written: AtomicU64,
}

type Input = Box<dyn Read + Send>;
type Output = Box<dyn Write + Send>;

fn run(command: PipeCommand) -> Result<(), PipeError> {
    if command.block == 0 {
        return Err(PipeError::Usage("--block must be positive"));
    }

    if command.interval_ms == 0 {
        return Err(PipeError::Usage("--interval-ms must be positive"));
    }

    if command.split && command.buffer == BufferArg::Flat {
        return Err(PipeError::Usage("--split needs the ring buffer"));
    }

    let input: Input = match &command.input {
        Some(path) => Box::new(File::open(path).map_err(|err| open_error(path, err))?),
        None => Box::new(io::stdin()),
    };

    let output: Output = match &command.output {
        Some(path) => Box::new(File::create(path).map_err(|err| open_error(path, err))?),
        None => Box::new(io::stdout()),
    };

    let counters = Counters::default();
    let interval = Duration::from_millis(command.interval_ms);
    let start = Instant::now();

    let result = thread::scope(|scope| {
        let (stop, stopped) = mpsc::channel::<()>();
        let counters = &counters;
        scope.spawn(move || report(counters, interval, stopped));

        let result = if command.split {
            copy_split(&command, input, output, counters)
        } else {
            copy_staged(&command, input, output, counters)
        };

        // Wakes the reporter up before the scope joins it.
        drop(stop);
        result
    });

    let elapsed = start.elapsed();
    tracing::info!(
        "total read {:.1} MiB, write {:.1} MiB in {:.3}s",
        mib(counters.read.load(Ordering::Relaxed)),
        mib(counters.written.load(Ordering::Relaxed)),
        elapsed.as_secs_f64(),
    );

    result
}

/// Alternate between filling and draining one buffer, on this thread.
fn copy_staged(
    command: &PipeCommand,
    mut input: Input,
    mut output: Output,
    counters: &Counters,
) -> Result<(), PipeError> {
    let options = StagingOptions {
        kind: match command.buffer {
            BufferArg::Linear => BufferKind::Linear,
            BufferArg::Flat => BufferKind::Flat,
            BufferArg::Auto => BufferKind::Auto,
        },
        min_size: command.size,
        init: InitOptions::default(),
    };

    let mut staging = Staging::new(&options)?;
    tracing::debug!(kind = ?staging.kind(), "allocated staging buffer");

    let mut eof = false;
    while !eof || !staging.is_empty() {
        // A read into a full buffer would look like the end of input.
        if !eof && staging.capacity() > 0 {
            match staging.fill_from(&mut input, command.block) {
                Ok(0) => eof = true,
                Ok(n) => {
                    counters.read.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(PipeError::Read(err)),
            }
        }

        if !staging.is_empty() {
            match staging.drain_into(&mut output) {
                Ok(0) => return Err(PipeError::Write(io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    counters.written.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(PipeError::Write(err)),
            }
        }
    }

    output.flush().map_err(PipeError::Write)
}

/// Read on a second thread into the producer half, write from the consumer half on this one.
fn copy_split(
    command: &PipeCommand,
    mut input: Input,
    mut output: Output,
    counters: &Counters,
) -> Result<(), PipeError> {
    let mut ring = RingBuffer::<Atomic>::with_options(command.size, &InitOptions::default())?;
    tracing::debug!(capacity = ring.capacity(), "allocated shared ring buffer");

    let (mut producer, mut consumer) = ring.split();
    let block = command.block;
    let input_done = AtomicBool::new(false);
    let output_failed = AtomicBool::new(false);

    thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let result = loop {
                if output_failed.load(Ordering::Relaxed) {
                    break Ok(());
                }

                let slab = producer.writable();
                if slab.is_empty() {
                    thread::yield_now();
                    continue;
                }

                let len = slab.len().min(block);
                match input.read(&mut slab[..len]) {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        producer.commit(n);
                        counters.read.fetch_add(n as u64, Ordering::Relaxed);
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => break Err(PipeError::Read(err)),
                }
            };

            input_done.store(true, Ordering::Release);
            result
        });

        let written = loop {
            let slab = consumer.readable();
            if slab.is_empty() {
                // Commits precede the flag, so empty after seeing it means drained.
                if input_done.load(Ordering::Acquire) && consumer.is_empty() {
                    break output.flush().map_err(PipeError::Write);
                }

                thread::yield_now();
                continue;
            }

            match output.write(slab) {
                Ok(0) => break Err(PipeError::Write(io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    consumer.consume(n);
                    counters.written.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(PipeError::Write(err)),
            }
        };

        if written.is_err() {
            output_failed.store(true, Ordering::Relaxed);
        }

        match reader.join() {
            Ok(read) => read.and(written),
            Err(_) => Err(PipeError::Panicked),
        }
    })
}

/// Log the throughput of each interval until the sender hangs up.
fn report(counters: &Counters, interval: Duration, stopped: mpsc::Receiver<()>) {
    let mut last = Instant::now();
    let mut last_read = 0;
    let mut last_written = 0;

    while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
        let now = Instant::now();
        let secs = now.duration_since(last).as_secs_f64();
        let read = counters.read.load(Ordering::Relaxed);
        let written = counters.written.load(Ordering::Relaxed);

        tracing::info!(
            "read {:.1} MiB/s, write {:.1} MiB/s",
            mib(read - last_read) / secs,
            mib(written - last_written) / secs,
        );

        last = now;
        last_read = read;
        last_written = written;
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn open_error(path: &Path, source: io::Error) -> PipeError {
    PipeError::Open {
        path: path.to_owned(),
        source,
    }
}
