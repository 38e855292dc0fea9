use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::VoteService;
use crate::dispatch::{Dispatcher, Response};
use crate::error::{InteractionError, Notice};
use crate::model::{CommentId, PostId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoteTarget {
    Post(PostId),
    Comment {
        post_id: PostId,
        comment_id: CommentId,
    },
}

impl VoteTarget {
    fn denial(&self) -> Notice {
        match self {
            VoteTarget::Post(_) => Notice::UpvotePost,
            VoteTarget::Comment { .. } => Notice::UpvoteComment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Viewer {
    #[default]
    Guest,
    Member {
        username: String,
    },
}

impl Viewer {
    pub fn is_member(&self) -> bool {
        matches!(self, Viewer::Member { .. })
    }
}

/// What the current viewer may do with a post or comment. Chosen once when
/// the entity is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Engage,
    ViewOnly,
}

impl Interaction {
    pub fn for_viewer(viewer: &Viewer) -> Self {
        if viewer.is_member() {
            Interaction::Engage
        } else {
            Interaction::ViewOnly
        }
    }

    pub fn require(&self, notice: Notice) -> Result<(), InteractionError> {
        match self {
            Interaction::Engage => Ok(()),
            Interaction::ViewOnly => Err(InteractionError::Denied(notice)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementState {
    NotEngaged,
    Engaged,
}

/// Network call a toggle asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteIntent {
    pub target: VoteTarget,
    pub engaged: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engagement {
    target: VoteTarget,
    state: EngagementState,
    displayed_score: i64,
    generation: u64,
}

impl Engagement {
    pub fn new(target: VoteTarget, has_engaged: bool, score: i64) -> Self {
        Self {
            target,
            state: if has_engaged {
                EngagementState::Engaged
            } else {
                EngagementState::NotEngaged
            },
            displayed_score: score,
            generation: 0,
        }
    }

    pub fn target(&self) -> &VoteTarget {
        &self.target
    }

    pub fn state(&self) -> EngagementState {
        self.state
    }

    pub fn has_engaged(&self) -> bool {
        self.state == EngagementState::Engaged
    }

    pub fn displayed_score(&self) -> i64 {
        self.displayed_score
    }

    /// Flips the local state and score immediately. Repeated toggles while a
    /// call is outstanding are not blocked; each yields its own intent.
    /// `generation` must be unique across every engagement that can receive
    /// the response, which is what [`Dispatcher::ticket`] hands out.
    pub fn toggle(
        &mut self,
        capability: Interaction,
        generation: u64,
    ) -> Result<VoteIntent, InteractionError> {
        capability.require(self.target.denial())?;
        self.flip();
        self.generation = generation;
        Ok(VoteIntent {
            target: self.target.clone(),
            engaged: self.has_engaged(),
            generation: self.generation,
        })
    }

    /// Applies the outcome of the call issued for `generation`. A failure is
    /// rolled back only when no newer toggle happened since. Returns whether
    /// the state changed.
    pub fn settle(&mut self, generation: u64, error: Option<&str>) -> bool {
        let Some(error) = error else {
            return false;
        };
        if generation != self.generation {
            debug!(vote = ?self.target, generation, "engagement: newer toggle wins over failed call");
            return false;
        }
        warn!(vote = ?self.target, error, "engagement: vote failed, rolling back");
        self.flip();
        true
    }

    fn flip(&mut self) {
        match self.state {
            EngagementState::Engaged => {
                self.state = EngagementState::NotEngaged;
                self.displayed_score -= 1;
            }
            EngagementState::NotEngaged => {
                self.state = EngagementState::Engaged;
                self.displayed_score += 1;
            }
        }
    }
}

/// Fires the vote call for `intent` without waiting for it.
pub fn send_vote(service: &Arc<dyn VoteService>, dispatcher: &Dispatcher, intent: VoteIntent) {
    let service = service.clone();
    dispatcher.spawn(move || {
        let error = service
            .set_vote(&intent.target, intent.engaged)
            .err()
            .map(|err| format!("{err:#}"));
        Response::Vote {
            target: intent.target,
            generation: intent.generation,
            error,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockVoteService;
    use crate::dispatch::inline_channel;

    fn post() -> Engagement {
        Engagement::new(VoteTarget::Post("abcd1234".into()), false, 10)
    }

    #[test]
    fn double_toggle_restores_state() {
        let mut engagement = post();
        let first = engagement.toggle(Interaction::Engage, 1).unwrap();
        assert!(first.engaged);
        assert_eq!(engagement.displayed_score(), 11);
        let second = engagement.toggle(Interaction::Engage, 2).unwrap();
        assert!(!second.engaged);
        assert_eq!(engagement.displayed_score(), 10);
        assert!(!engagement.has_engaged());
    }

    #[test]
    fn guests_are_denied_without_transition() {
        let mut engagement = post();
        let err = engagement.toggle(Interaction::ViewOnly, 1).unwrap_err();
        assert_eq!(err, InteractionError::Denied(Notice::UpvotePost));
        assert_eq!(engagement.displayed_score(), 10);
        assert_eq!(engagement.state(), EngagementState::NotEngaged);

        let mut comment = Engagement::new(
            VoteTarget::Comment {
                post_id: "abcd1234".into(),
                comment_id: 3,
            },
            true,
            1,
        );
        assert_eq!(
            comment.toggle(Interaction::ViewOnly, 1).unwrap_err(),
            InteractionError::Denied(Notice::UpvoteComment)
        );
    }

    #[test]
    fn failure_rolls_back_latest_toggle_only() {
        let mut engagement = post();
        let first = engagement.toggle(Interaction::Engage, 1).unwrap();
        assert!(engagement.settle(first.generation, Some("boom")));
        assert_eq!(engagement.displayed_score(), 10);
        assert!(!engagement.has_engaged());

        let first = engagement.toggle(Interaction::Engage, 2).unwrap();
        let _second = engagement.toggle(Interaction::Engage, 3).unwrap();
        assert!(!engagement.settle(first.generation, Some("boom")));
        assert_eq!(engagement.displayed_score(), 10);
        assert!(!engagement.settle(first.generation, None));
    }

    #[test]
    fn vote_call_reports_generation() {
        let service = Arc::new(MockVoteService::default());
        let dyn_service: Arc<dyn VoteService> = service.clone();
        let (dispatcher, mailbox) = inline_channel();
        let mut engagement = post();
        let intent = engagement
            .toggle(Interaction::Engage, dispatcher.ticket())
            .unwrap();
        service.fail_next();
        send_vote(&dyn_service, &dispatcher, intent);

        match mailbox.try_recv() {
            Some(Response::Vote {
                generation, error, ..
            }) => {
                assert_eq!(generation, 1);
                assert!(engagement.settle(generation, error.as_deref()));
            }
            _ => panic!("expected vote response"),
        }
        assert_eq!(service.calls(), vec![(VoteTarget::Post("abcd1234".into()), true)]);
    }

    #[test]
    fn capability_follows_viewer() {
        assert_eq!(Interaction::for_viewer(&Viewer::Guest), Interaction::ViewOnly);
        assert_eq!(
            Interaction::for_viewer(&Viewer::Member {
                username: "cat".into()
            }),
            Interaction::Engage
        );
    }
}
