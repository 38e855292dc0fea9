use std::fmt;

/// Local, pre-network rejections. The display text is the inline message
/// shown next to the offending input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Comment should not be empty.")]
    EmptyComment,
    #[error("Reply should not be empty.")]
    EmptyReply,
    #[error("You've already added this flow.")]
    DuplicateFlow,
    #[error("A post can have at most {max} flows.")]
    FlowLimit { max: usize },
    #[error("Flow names may only contain lowercase letters, digits and hyphens (up to {max} characters).")]
    MalformedFlow { max: usize },
    #[error("Please upload at least 1 image/video.")]
    NoMedia,
    #[error("{name} is not an image or video.")]
    MediaType { name: String },
    #[error("Descriptions are limited to {max} characters.")]
    DescriptionTooLong { max: usize },
}

/// Blocking notice shown to guests who try an action reserved for members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    UpvotePost,
    UpvoteComment,
    ReplyToComment,
    CommentOnPost,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::UpvotePost => "You must be logged in to upvote this post.",
            Notice::UpvoteComment => "You must be logged in to upvote this comment.",
            Notice::ReplyToComment => "You must be logged in to reply to this comment.",
            Notice::CommentOnPost => "You must be logged in to comment on this post.",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InteractionError {
    #[error("{0}")]
    Denied(Notice),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("unknown comment {0}")]
    UnknownComment(crate::model::CommentId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_inline_text() {
        assert_eq!(
            ValidationError::DuplicateFlow.to_string(),
            "You've already added this flow."
        );
        assert_eq!(
            InteractionError::Denied(Notice::UpvotePost).to_string(),
            "You must be logged in to upvote this post."
        );
    }
}
