// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer channel used as the harvesters' shared output sink.
//!
//! Every harvester holds a clone of the same [`BoundedSender`]. A full channel
//! blocks the sending harvester, which is how a slow consumer throttles reads.

use flume::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::Duration;

/// Every receiver has been dropped.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel disconnected")
    }
}

impl std::error::Error for SendError {}

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    /// Blocks the calling thread until there is room in the channel.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError)
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for BoundedSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSender")
            .field("len", &self.tx.len())
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Returns `None` once every sender is gone and the channel is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns `None` on timeout or when the channel is disconnected and empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> fmt::Debug for BoundedReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedReceiver")
            .field("len", &self.rx.len())
            .finish()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}
