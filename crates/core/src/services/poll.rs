//! Poll service.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use livepoll_common::{AppError, AppResult, IdGenerator};
use livepoll_db::{
    entities::{
        poll::{self, PollStatus, PollType},
        poll_option,
    },
    repositories::{PollRepository, PollWithOptions, VoteRecord, VoteRepository},
};
use sea_orm::Set;
use serde::{Deserialize, Deserializer};
use tracing::{error, info, warn};
use validator::Validate;

use super::event_publisher::{PollUpdatedEvent, UpdatePublisherService};
use super::lifecycle::{PollLifecycle, Transition};
use super::short_code::{ShortCodeGenerator, normalize};
use super::vote_recorder::VoteRecorder;

/// Minimum number of options per poll.
const MIN_OPTIONS: usize = 2;

/// Maximum number of options per poll.
const MAX_OPTIONS: usize = 20;

/// Maximum option text length.
const MAX_OPTION_LENGTH: usize = 255;

/// Input for creating a poll.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollInput {
    #[validate(length(min = 1, max = 500))]
    pub question: String,
    #[serde(default = "default_poll_type")]
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub allow_multiple_votes: bool,
}

const fn default_poll_type() -> PollType {
    PollType::SingleChoice
}

const fn default_true() -> bool {
    true
}

/// An option in an update: existing ones carry their id, new ones do not.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionInput {
    pub id: Option<String>,
    pub text: String,
}

/// Input for updating a poll. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollInput {
    #[validate(length(min = 1, max = 500))]
    pub question: Option<String>,
    /// `null` clears the start time.
    #[serde(default, deserialize_with = "double_option")]
    pub start_time: Option<Option<DateTime<Utc>>>,
    /// `null` clears the end time.
    #[serde(default, deserialize_with = "double_option")]
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub is_public: Option<bool>,
    pub allow_multiple_votes: Option<bool>,
    pub options: Option<Vec<OptionInput>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Poll service: the entry point for every poll operation.
///
/// Mutations that commit a change publish exactly one update event.
/// Ownership is checked for start, close, update and delete unless
/// authorization is disabled.
#[derive(Clone)]
pub struct PollService {
    poll_repo: PollRepository,
    vote_repo: VoteRepository,
    recorder: VoteRecorder,
    short_codes: ShortCodeGenerator,
    publisher: UpdatePublisherService,
    id_gen: IdGenerator,
    auth_disabled: bool,
}

impl PollService {
    /// Create a new poll service.
    #[must_use]
    pub fn new(
        poll_repo: PollRepository,
        vote_repo: VoteRepository,
        publisher: UpdatePublisherService,
    ) -> Self {
        Self {
            recorder: VoteRecorder::new(vote_repo.clone()),
            short_codes: ShortCodeGenerator::new(poll_repo.clone()),
            poll_repo,
            vote_repo,
            publisher,
            id_gen: IdGenerator::new(),
            auth_disabled: false,
        }
    }

    /// Skip ownership checks (development mode).
    #[must_use]
    pub const fn with_auth_disabled(mut self, disabled: bool) -> Self {
        self.auth_disabled = disabled;
        self
    }

    /// Replace the short code generator.
    #[must_use]
    pub fn with_short_codes(mut self, short_codes: ShortCodeGenerator) -> Self {
        self.short_codes = short_codes;
        self
    }

    // ==================== Creation ====================

    /// Create a poll in DRAFT with its options.
    pub async fn create_poll(
        &self,
        created_by: &str,
        input: CreatePollInput,
    ) -> AppResult<PollWithOptions> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        validate_options(input.options.iter().map(String::as_str))?;
        validate_window(input.start_time, input.end_time)?;
        if created_by.trim().is_empty() {
            return Err(AppError::Unauthorized);
        }

        for attempt in 1..=self.short_codes.max_attempts() {
            let short_code = self.short_codes.generate().await?;
            let poll_id = self.id_gen.generate();

            let poll = poll::ActiveModel {
                id: Set(poll_id.clone()),
                question: Set(input.question.trim().to_string()),
                poll_type: Set(input.poll_type),
                status: Set(PollStatus::Draft),
                created_at: Set(Utc::now().into()),
                start_time: Set(input.start_time.map(Into::into)),
                end_time: Set(input.end_time.map(Into::into)),
                created_by: Set(created_by.to_string()),
                is_public: Set(input.is_public),
                allow_multiple_votes: Set(input.allow_multiple_votes),
                short_code: Set(short_code),
            };
            let options = input
                .options
                .iter()
                .enumerate()
                .map(|(position, text)| self.new_option(&poll_id, position, text))
                .collect();

            match self.poll_repo.create_with_options(poll, options).await {
                Ok(created) => {
                    info!(
                        poll_id = %created.poll.id,
                        short_code = %created.poll.short_code,
                        options = created.options.len(),
                        "Poll created"
                    );
                    return Ok(created);
                }
                Err(AppError::Conflict(_)) => {
                    warn!(attempt, "Short code taken concurrently, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(
            "could not allocate a unique short code".to_string(),
        ))
    }

    fn new_option(&self, poll_id: &str, position: usize, text: &str) -> poll_option::ActiveModel {
        poll_option::ActiveModel {
            id: Set(self.id_gen.generate()),
            poll_id: Set(poll_id.to_string()),
            position: Set(position as i32),
            text: Set(text.trim().to_string()),
            vote_count: Set(0),
        }
    }

    // ==================== Queries ====================

    /// Get a poll with its options.
    pub async fn get_poll(&self, poll_id: &str) -> AppResult<Option<PollWithOptions>> {
        self.poll_repo.find_with_options(poll_id).await
    }

    /// Get a poll by short code, ignoring case.
    pub async fn get_poll_by_short_code(&self, code: &str) -> AppResult<Option<PollWithOptions>> {
        self.poll_repo
            .find_with_options_by_short_code(&normalize(code))
            .await
    }

    /// All polls, newest first.
    pub async fn list_all(&self) -> AppResult<Vec<PollWithOptions>> {
        self.poll_repo.find_all_with_options().await
    }

    /// Active polls, newest first.
    pub async fn list_active(&self) -> AppResult<Vec<PollWithOptions>> {
        self.poll_repo
            .find_by_status_with_options(PollStatus::Active)
            .await
    }

    /// Tally per option text; empty for an unknown poll.
    pub async fn results(&self, poll_id: &str) -> AppResult<BTreeMap<String, i32>> {
        Ok(self
            .poll_repo
            .find_with_options(poll_id)
            .await?
            .map(|p| p.results())
            .unwrap_or_default())
    }

    /// Vote history, newest first.
    pub async fn history(&self, poll_id: &str) -> AppResult<Vec<VoteRecord>> {
        self.vote_repo.find_history(poll_id).await
    }

    // ==================== Voting ====================

    /// Vote for one option.
    pub async fn vote(&self, poll_id: &str, option_id: &str, voter_id: &str) -> bool {
        let recorded = self.recorder.vote(poll_id, option_id, voter_id).await;
        if recorded {
            self.publisher.publish(PollUpdatedEvent::new(poll_id));
        }
        recorded
    }

    /// Vote for several options as one ballot.
    pub async fn vote_multiple(&self, poll_id: &str, option_ids: &[String], voter_id: &str) -> bool {
        let recorded = self
            .recorder
            .vote_multiple(poll_id, option_ids, voter_id)
            .await;
        if recorded {
            self.publisher.publish(PollUpdatedEvent::new(poll_id));
        }
        recorded
    }

    /// Whether the voter has any vote on the poll.
    pub async fn has_voted(&self, poll_id: &str, voter_id: &str) -> AppResult<bool> {
        self.recorder.has_voted(poll_id, voter_id).await
    }

    /// Work out why a ballot was rejected.
    ///
    /// The recorder only reports success or failure; this re-reads the
    /// current state, so under concurrent changes the reason is best-effort.
    pub async fn explain_rejected_vote(
        &self,
        poll_id: &str,
        option_ids: &[String],
        voter_id: &str,
    ) -> AppError {
        if option_ids.is_empty() {
            return AppError::NoOptions;
        }

        let poll = match self.poll_repo.find_with_options(poll_id).await {
            Ok(Some(poll)) => poll,
            Ok(None) => return AppError::PollNotFound(poll_id.to_string()),
            Err(e) => return e,
        };
        if poll.poll.status != PollStatus::Active {
            return AppError::PollInactive(poll_id.to_string());
        }
        if let Some(missing) = option_ids.iter().find(|id| poll.option(id).is_none()) {
            return AppError::OptionNotFound(missing.clone());
        }
        if !poll.poll.allow_multiple_votes {
            match self.has_voted(poll_id, voter_id).await {
                Ok(true) => return AppError::AlreadyVoted(poll_id.to_string()),
                Ok(false) => {}
                Err(e) => return e,
            }
        }

        AppError::VoteFailed(poll_id.to_string())
    }

    // ==================== Lifecycle ====================

    /// Start a DRAFT poll or reactivate a CLOSED one.
    ///
    /// Starting an ACTIVE poll succeeds without change. A poll without
    /// options cannot be started.
    pub async fn start(&self, poll_id: &str, requesting_user: Option<&str>) -> AppResult<bool> {
        let result = self.start_inner(poll_id, requesting_user).await;
        store_failure_as_false("start", poll_id, result)
    }

    async fn start_inner(&self, poll_id: &str, requesting_user: Option<&str>) -> AppResult<bool> {
        let Some(poll) = self.poll_repo.find_with_options(poll_id).await? else {
            return Ok(false);
        };
        self.authorize(&poll.poll, requesting_user)?;

        if poll.poll.status == PollStatus::Active {
            return Ok(true);
        }
        if poll.options.is_empty() {
            warn!(poll_id = %poll_id, "Refusing to start poll without options");
            return Ok(false);
        }

        let mut lifecycle = PollLifecycle::of(&poll.poll);
        match lifecycle.start_or_reactivate() {
            Some(transition) => self.apply(poll_id, transition).await,
            None => Ok(false),
        }
    }

    /// Close an ACTIVE poll. Closing any other poll succeeds without change.
    pub async fn close(&self, poll_id: &str, requesting_user: Option<&str>) -> AppResult<bool> {
        let result = self.close_inner(poll_id, requesting_user).await;
        store_failure_as_false("close", poll_id, result)
    }

    async fn close_inner(&self, poll_id: &str, requesting_user: Option<&str>) -> AppResult<bool> {
        let Some(poll) = self.poll_repo.find_by_id(poll_id).await? else {
            return Ok(false);
        };
        self.authorize(&poll, requesting_user)?;

        let mut lifecycle = PollLifecycle::of(&poll);
        match lifecycle.close() {
            Some(transition) => self.apply(poll_id, transition).await,
            None => Ok(true),
        }
    }

    async fn apply(&self, poll_id: &str, transition: Transition) -> AppResult<bool> {
        if self
            .poll_repo
            .transition_status(poll_id, transition.from, transition.to)
            .await?
        {
            info!(poll_id = %poll_id, from = ?transition.from, to = ?transition.to, "Poll status changed");
            self.publisher.publish(PollUpdatedEvent::new(poll_id));
            return Ok(true);
        }

        // Lost a race; fine if the other writer reached the same status
        Ok(self
            .poll_repo
            .find_by_id(poll_id)
            .await?
            .is_some_and(|p| p.status == transition.to))
    }

    // ==================== Editing ====================

    /// Update metadata and options of a poll.
    ///
    /// Options with an id are renamed, options without one are appended.
    /// Status and tallies are not touched.
    pub async fn update(
        &self,
        poll_id: &str,
        input: UpdatePollInput,
        requesting_user: Option<&str>,
    ) -> AppResult<bool> {
        let result = self.update_inner(poll_id, input, requesting_user).await;
        store_failure_as_false("update", poll_id, result)
    }

    async fn update_inner(
        &self,
        poll_id: &str,
        input: UpdatePollInput,
        requesting_user: Option<&str>,
    ) -> AppResult<bool> {
        input
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let Some(current) = self.poll_repo.find_with_options(poll_id).await? else {
            return Ok(false);
        };
        self.authorize(&current.poll, requesting_user)?;

        let start_time = input
            .start_time
            .unwrap_or_else(|| current.poll.start_time.map(|t| t.with_timezone(&Utc)));
        let end_time = input
            .end_time
            .unwrap_or_else(|| current.poll.end_time.map(|t| t.with_timezone(&Utc)));
        validate_window(start_time, end_time)?;

        let mut active: poll::ActiveModel = current.poll.clone().into();
        if let Some(question) = input.question {
            active.question = Set(question.trim().to_string());
        }
        if let Some(start) = input.start_time {
            active.start_time = Set(start.map(Into::into));
        }
        if let Some(end) = input.end_time {
            active.end_time = Set(end.map(Into::into));
        }
        if let Some(is_public) = input.is_public {
            active.is_public = Set(is_public);
        }
        if let Some(allow) = input.allow_multiple_votes {
            active.allow_multiple_votes = Set(allow);
        }

        let mut renamed = Vec::new();
        let mut added = Vec::new();
        if let Some(options) = input.options {
            validate_option_texts(options.iter().map(|o| o.text.as_str()))?;

            let mut next_position = current.options.iter().map(|o| o.position + 1).max().unwrap_or(0);
            for option in options {
                match option.id {
                    Some(id) => {
                        if current.option(&id).is_none() {
                            return Err(AppError::OptionNotFound(id));
                        }
                        renamed.push((id, option.text.trim().to_string()));
                    }
                    None => {
                        added.push(self.new_option(poll_id, next_position as usize, &option.text));
                        next_position += 1;
                    }
                }
            }

            if current.options.len() + added.len() > MAX_OPTIONS {
                return Err(AppError::Validation(format!(
                    "a poll can have at most {MAX_OPTIONS} options"
                )));
            }
        }

        self.poll_repo
            .update_with_options(poll_id, active, renamed, added)
            .await?;

        info!(poll_id = %poll_id, "Poll updated");
        self.publisher.publish(PollUpdatedEvent::new(poll_id));
        Ok(true)
    }

    /// Delete a poll with its options and votes.
    pub async fn delete(&self, poll_id: &str, requesting_user: Option<&str>) -> AppResult<bool> {
        let result = self.delete_inner(poll_id, requesting_user).await;
        store_failure_as_false("delete", poll_id, result)
    }

    async fn delete_inner(&self, poll_id: &str, requesting_user: Option<&str>) -> AppResult<bool> {
        let Some(poll) = self.poll_repo.find_by_id(poll_id).await? else {
            return Ok(false);
        };
        self.authorize(&poll, requesting_user)?;

        let deleted = self.poll_repo.delete_cascade(poll_id).await?;
        if deleted {
            info!(poll_id = %poll_id, "Poll deleted");
        }
        Ok(deleted)
    }

    fn authorize(&self, poll: &poll::Model, requesting_user: Option<&str>) -> AppResult<()> {
        if self.auth_disabled {
            return Ok(());
        }
        match requesting_user {
            Some(user) if user == poll.created_by => Ok(()),
            _ => Err(AppError::Forbidden(
                "only the creator of a poll may change it".to_string(),
            )),
        }
    }
}

fn store_failure_as_false(operation: &str, poll_id: &str, result: AppResult<bool>) -> AppResult<bool> {
    match result {
        Err(AppError::Database(message)) => {
            error!(operation, poll_id = %poll_id, error = %message, "Poll operation failed");
            Ok(false)
        }
        other => other,
    }
}

fn validate_options<'a>(texts: impl ExactSizeIterator<Item = &'a str>) -> AppResult<()> {
    let count = texts.len();
    if count < MIN_OPTIONS {
        return Err(AppError::Validation(format!(
            "a poll needs at least {MIN_OPTIONS} options"
        )));
    }
    if count > MAX_OPTIONS {
        return Err(AppError::Validation(format!(
            "a poll can have at most {MAX_OPTIONS} options"
        )));
    }
    validate_option_texts(texts)
}

fn validate_option_texts<'a>(mut texts: impl Iterator<Item = &'a str>) -> AppResult<()> {
    texts.try_for_each(|text| {
        if text.trim().is_empty() {
            return Err(AppError::Validation("option text cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_OPTION_LENGTH {
            return Err(AppError::Validation(format!(
                "option text is too long (max {MAX_OPTION_LENGTH} chars)"
            )));
        }
        Ok(())
    })
}

fn validate_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> AppResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end <= start => Err(AppError::Validation(
            "end time must be after start time".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::event_publisher::NoOpUpdatePublisher;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn service_with(db: MockDatabase) -> PollService {
        let db = Arc::new(db.into_connection());
        PollService::new(
            PollRepository::new(db.clone()),
            VoteRepository::new(db),
            Arc::new(NoOpUpdatePublisher),
        )
    }

    fn create_test_poll(created_by: &str, status: PollStatus) -> poll::Model {
        poll::Model {
            id: "p1".to_string(),
            question: "Best color?".to_string(),
            poll_type: PollType::SingleChoice,
            status,
            created_at: Utc::now().into(),
            start_time: None,
            end_time: None,
            created_by: created_by.to_string(),
            is_public: true,
            allow_multiple_votes: false,
            short_code: "ABC123".to_string(),
        }
    }

    fn input(options: &[&str]) -> CreatePollInput {
        CreatePollInput {
            question: "Best color?".to_string(),
            poll_type: PollType::SingleChoice,
            options: options.iter().map(ToString::to_string).collect(),
            start_time: None,
            end_time: None,
            is_public: true,
            allow_multiple_votes: false,
        }
    }

    #[tokio::test]
    async fn test_create_poll_requires_two_options() {
        let service = service_with(MockDatabase::new(DatabaseBackend::Postgres));
        let result = service.create_poll("organizer", input(&["Only"])).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_poll_rejects_blank_option() {
        let service = service_with(MockDatabase::new(DatabaseBackend::Postgres));
        let result = service.create_poll("organizer", input(&["Red", "  "])).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_poll_rejects_inverted_window() {
        let service = service_with(MockDatabase::new(DatabaseBackend::Postgres));
        let now = Utc::now();
        let mut bad = input(&["Red", "Blue"]);
        bad.start_time = Some(now + Duration::hours(2));
        bad.end_time = Some(now + Duration::hours(1));

        let result = service.create_poll("organizer", bad).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_close_by_other_user_is_forbidden() {
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_poll("organizer", PollStatus::Active)]]),
        );

        let result = service.close("p1", Some("intruder")).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_close_without_user_is_forbidden() {
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_poll("organizer", PollStatus::Active)]]),
        );

        let result = service.close("p1", None).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_close_on_draft_is_noop_success() {
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_poll("organizer", PollStatus::Draft)]]),
        );

        assert!(service.close("p1", Some("organizer")).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_missing_poll_is_false() {
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<poll::Model>::new()]),
        );

        assert!(!service.close("missing", Some("organizer")).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_false() {
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_errors([sea_orm::DbErr::Custom("connection reset".to_string())]),
        );

        assert!(!service.delete("p1", Some("organizer")).await.unwrap());
    }

    #[test]
    fn test_update_input_distinguishes_null_from_missing() {
        let cleared: UpdatePollInput = serde_json::from_str(r#"{"endTime": null}"#).unwrap();
        assert_eq!(cleared.end_time, Some(None));
        assert_eq!(cleared.start_time, None);

        let untouched: UpdatePollInput = serde_json::from_str("{}").unwrap();
        assert_eq!(untouched.end_time, None);
    }

    #[test]
    fn test_create_input_defaults() {
        let parsed: CreatePollInput =
            serde_json::from_str(r#"{"question": "Q", "options": ["A", "B"]}"#).unwrap();
        assert_eq!(parsed.poll_type, PollType::SingleChoice);
        assert!(parsed.is_public);
        assert!(!parsed.allow_multiple_votes);
    }
}
