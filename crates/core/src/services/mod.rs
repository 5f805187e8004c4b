//! Poll engine services.

#![allow(missing_docs)]

pub mod event_publisher;
pub mod lifecycle;
pub mod long_poll;
pub mod notification_hub;
pub mod poll;
pub mod short_code;
pub mod vote_recorder;
pub mod voting_token;

pub use event_publisher::{
    NoOpUpdatePublisher, PollUpdatedEvent, UpdatePublisher, UpdatePublisherService,
};
pub use lifecycle::{PollLifecycle, PollStatusUpdater, TickReport, Transition};
pub use long_poll::ChangeWatcher;
pub use notification_hub::{ConnectionId, NotificationHub, PollUpdateMessage};
pub use poll::{CreatePollInput, OptionInput, PollService, UpdatePollInput};
pub use short_code::{SHORT_CODE_ALPHABET, SHORT_CODE_LENGTH, ShortCodeGenerator};
pub use vote_recorder::VoteRecorder;
pub use voting_token::{SignedVoterId, VotingTokenService};
