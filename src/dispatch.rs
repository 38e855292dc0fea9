use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::autocomplete::FieldKey;
use crate::engagement::VoteTarget;
use crate::model::{CommentId, CommentRecord, ContentItem, FlowCard, PostDetail, PostId};

/// Completion of a background job, delivered to the event loop.
pub enum Response {
    FeedPage {
        request_id: u64,
        page: u32,
        result: Result<Vec<ContentItem>>,
    },
    FeedImagesSettled {
        request_id: u64,
    },
    FlowsOverview {
        result: Result<Vec<FlowCard>>,
    },
    PostDetail {
        post_id: PostId,
        result: Result<PostDetail>,
    },
    RootComments {
        post_id: PostId,
        request_id: u64,
        page: u32,
        result: Result<Vec<CommentRecord>>,
    },
    Replies {
        post_id: PostId,
        comment_id: CommentId,
        result: Result<Vec<CommentRecord>>,
    },
    ReplyPosted {
        post_id: PostId,
        comment_id: CommentId,
        result: Result<CommentRecord>,
    },
    CommentPosted {
        post_id: PostId,
        result: Result<CommentRecord>,
    },
    Vote {
        target: VoteTarget,
        generation: u64,
        error: Option<String>,
    },
    Suggestions {
        field: FieldKey,
        query_id: u64,
        result: Result<Vec<String>>,
    },
    Availability {
        field: FieldKey,
        query_id: u64,
        result: Result<bool>,
    },
    PostCreated {
        result: Result<PostId>,
    },
}

/// Sending half handed to every component that issues background work.
/// Clones share one ticket counter, so request ids and vote generations
/// never repeat across views.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<Response>,
    inline: bool,
    tickets: Arc<AtomicU64>,
}

/// Receiving half owned by the event loop.
pub struct Mailbox {
    rx: Receiver<Response>,
}

/// Jobs run on their own thread and post their response when done.
pub fn channel() -> (Dispatcher, Mailbox) {
    let (tx, rx) = unbounded();
    (Dispatcher::new(tx, false), Mailbox { rx })
}

/// Jobs run synchronously on the caller's thread; the response is still
/// queued and only observed once the loop drains the mailbox.
pub fn inline_channel() -> (Dispatcher, Mailbox) {
    let (tx, rx) = unbounded();
    (Dispatcher::new(tx, true), Mailbox { rx })
}

impl Dispatcher {
    fn new(tx: Sender<Response>, inline: bool) -> Self {
        Self {
            tx,
            inline,
            tickets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Next id from the shared counter; never zero.
    pub fn ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() -> Response + Send + 'static,
    {
        if self.inline {
            let _ = self.tx.send(job());
            return;
        }
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(job());
        });
    }
}

impl Mailbox {
    pub fn try_recv(&self) -> Option<Response> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Response> {
        match self.rx.recv_timeout(timeout) {
            Ok(response) => Some(response),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn drain(&self) -> Vec<Response> {
        self.rx.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_tickets() {
        let (dispatcher, _mailbox) = inline_channel();
        let other = dispatcher.clone();
        assert_eq!(dispatcher.ticket(), 1);
        assert_eq!(other.ticket(), 2);
        assert_eq!(dispatcher.ticket(), 3);

        let (fresh, _mailbox) = inline_channel();
        assert_eq!(fresh.ticket(), 1);
    }
}
