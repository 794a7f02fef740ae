//! Bidirectional splice engine.
//!
//! Given two established duplex connections, copies bytes in both directions
//! concurrently until one direction ends, then tears the pair down exactly
//! once and waits for both directions before returning. The only state the
//! two copy tasks share is a single-fire [`CloseGate`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::error::is_closed_error;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Single-fire gate shared by the two copy directions of one session.
///
/// The first direction to finish fires the gate; the other direction
/// observes it at its next suspension point — read or write — and unwinds.
/// Firing more than once is harmless, which is what makes the shared
/// teardown race-free.
#[derive(Default)]
pub struct CloseGate {
    fired: AtomicBool,
    notify: Notify,
}

impl CloseGate {
    /// Create an unfired gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the gate. Returns `true` for the first caller, `false` after.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    /// Whether the gate has fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Wait until the gate fires. Returns immediately if it already has.
    pub async fn closed(&self) {
        if self.is_fired() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before the re-check so a fire between the two is not missed
        notified.as_mut().enable();
        if self.is_fired() {
            return;
        }
        notified.await;
    }
}

/// Byte counters for one completed splice session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpliceSummary {
    /// Bytes copied from the first connection to the second
    pub a_to_b: u64,
    /// Bytes copied from the second connection to the first
    pub b_to_a: u64,
}

/// Probe a connection with a zero-length write.
///
/// Best-effort only: a dead stream usually errors here, but the network
/// stack may not surface a remote close synchronously. A false negative
/// just means one copy task starts and immediately errors out, which fires
/// the gate anyway.
async fn probe_open<S>(stream: &mut S) -> bool
where
    S: AsyncWrite + Unpin,
{
    stream.write(&[]).await.is_ok()
}

/// Splice two duplex connections together until both directions have ceased.
///
/// Blocks the caller for the life of the session; callers spawn it so other
/// sessions keep running. On return both connections have been shut down and
/// dropped, regardless of which side closed first or whether both directions
/// finished concurrently.
pub async fn splice<A, B>(mut a: A, mut b: B) -> SpliceSummary
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let a_open = probe_open(&mut a).await;
    let b_open = probe_open(&mut b).await;

    let gate = Arc::new(CloseGate::new());
    let (a_reader, a_writer) = tokio::io::split(a);
    let (b_reader, b_writer) = tokio::io::split(b);

    let forward = tokio::spawn(copy_direction(
        a_reader,
        b_writer,
        Arc::clone(&gate),
        "a->b",
        a_open,
    ));
    let backward = tokio::spawn(copy_direction(
        b_reader,
        a_writer,
        Arc::clone(&gate),
        "b->a",
        b_open,
    ));

    // The session is over only when both directions have returned, not
    // merely when the gate fired.
    let (a_to_b, b_to_a) = tokio::join!(forward, backward);
    SpliceSummary {
        a_to_b: a_to_b.unwrap_or(0),
        b_to_a: b_to_a.unwrap_or(0),
    }
}

/// Copy one direction until EOF, error, or the gate fires.
///
/// Shuts down its write half and fires the gate on the way out, so the first
/// direction to finish drags the other one down with it.
async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    gate: Arc<CloseGate>,
    direction: &'static str,
    start: bool,
) -> u64
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    if !start {
        tracing::debug!("{} source already closed, skipping copy", direction);
        return 0;
    }

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut copied = 0u64;

    loop {
        // Both the read and the write race the gate: a direction stuck in a
        // write toward a peer that stopped reading must still unwind when
        // the other direction finishes.
        let n = tokio::select! {
            _ = gate.closed() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log_copy_error(direction, &e);
                    break;
                }
            },
        };

        tokio::select! {
            _ = gate.closed() => break,
            result = writer.write_all(&buf[..n]) => match result {
                Ok(()) => copied += n as u64,
                Err(e) => {
                    log_copy_error(direction, &e);
                    break;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
    gate.fire();
    copied
}

fn log_copy_error(direction: &'static str, err: &std::io::Error) {
    if is_closed_error(err) {
        tracing::debug!("{} copy ended by peer close: {}", direction, err);
    } else {
        tracing::error!("{} copy failed: {}", direction, err);
    }
}
