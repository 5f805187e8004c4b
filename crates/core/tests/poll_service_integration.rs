//! Poll service integration tests against migrated throwaway stores.
//!
//! Most tests use the single-connection in-memory store. Tests about
//! concurrent ballots or poll creation use a file-backed store with a
//! connection pool so their transactions really overlap.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use livepoll_common::AppError;
use livepoll_core::{
    ChangeWatcher, CreatePollInput, NotificationHub, OptionInput, PollService, PollStatusUpdater,
    PollUpdateMessage, PollUpdatedEvent, ShortCodeGenerator, UpdatePollInput, UpdatePublisher,
};
use livepoll_db::entities::poll::{PollStatus, PollType};
use livepoll_db::entities::vote;
use livepoll_db::repositories::{PollRepository, PollWithOptions, VoteRepository};
use livepoll_db::test_utils::TestDatabase;
use sea_orm::{ActiveModelTrait, Set};

/// Pool size of the file-backed store used by the concurrency tests.
const POOL_SIZE: u32 = 8;

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl UpdatePublisher for RecordingPublisher {
    fn publish(&self, event: PollUpdatedEvent) {
        self.events.lock().unwrap().push(event.poll_id);
    }
}

struct Fixture {
    db: TestDatabase,
    service: PollService,
    publisher: Arc<RecordingPublisher>,
}

impl Fixture {
    async fn new() -> Self {
        Self::on(TestDatabase::in_memory().await.unwrap())
    }

    async fn pooled() -> Self {
        Self::on(TestDatabase::file_backed(POOL_SIZE).await.unwrap())
    }

    fn on(db: TestDatabase) -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        let service = PollService::new(
            PollRepository::new(db.connection()),
            VoteRepository::new(db.connection()),
            publisher.clone(),
        );
        Self {
            db,
            service,
            publisher,
        }
    }

    fn poll_repo(&self) -> PollRepository {
        PollRepository::new(self.db.connection())
    }

    async fn create(&self, options: &[&str], allow_multiple_votes: bool) -> PollWithOptions {
        self.service
            .create_poll(
                "organizer",
                CreatePollInput {
                    question: "Best color?".to_string(),
                    poll_type: if allow_multiple_votes {
                        PollType::MultipleChoice
                    } else {
                        PollType::SingleChoice
                    },
                    options: options.iter().map(ToString::to_string).collect(),
                    start_time: None,
                    end_time: None,
                    is_public: true,
                    allow_multiple_votes,
                },
            )
            .await
            .unwrap()
    }

    async fn create_active(&self, options: &[&str], allow_multiple_votes: bool) -> PollWithOptions {
        let poll = self.create(options, allow_multiple_votes).await;
        assert!(self.service.start(&poll.poll.id, Some("organizer")).await.unwrap());
        self.service.get_poll(&poll.poll.id).await.unwrap().unwrap()
    }
}

fn option_id(poll: &PollWithOptions, text: &str) -> String {
    poll.options
        .iter()
        .find(|o| o.text == text)
        .map(|o| o.id.clone())
        .unwrap()
}

#[tokio::test]
async fn test_single_choice_scenario() {
    let fx = Fixture::new().await;
    let poll = fx.create(&["Red", "Blue"], false).await;
    assert_eq!(poll.poll.status, PollStatus::Draft);

    let red = option_id(&poll, "Red");
    assert!(!fx.service.vote(&poll.poll.id, &red, "u1").await);

    assert!(fx.service.start(&poll.poll.id, Some("organizer")).await.unwrap());
    assert!(fx.service.vote(&poll.poll.id, &red, "u1").await);
    assert!(!fx.service.vote(&poll.poll.id, &red, "u1").await);

    let results = fx.service.results(&poll.poll.id).await.unwrap();
    assert_eq!(results["Red"], 1);
    assert_eq!(results["Blue"], 0);

    assert!(fx.service.close(&poll.poll.id, Some("organizer")).await.unwrap());
    assert!(!fx.service.vote(&poll.poll.id, &red, "u2").await);

    let history = fx.service.history(&poll.poll.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].option_text, "Red");
    assert_eq!(history[0].voter_id, "u1");
}

#[tokio::test]
async fn test_rejection_reasons() {
    let fx = Fixture::new().await;
    let poll = fx.create(&["Red", "Blue"], false).await;
    let id = poll.poll.id.clone();
    let red = option_id(&poll, "Red");

    let reason = fx
        .service
        .explain_rejected_vote("missing", &[red.clone()], "u1")
        .await;
    assert!(matches!(reason, AppError::PollNotFound(_)));

    let reason = fx.service.explain_rejected_vote(&id, &[red.clone()], "u1").await;
    assert!(matches!(reason, AppError::PollInactive(_)));

    fx.service.start(&id, Some("organizer")).await.unwrap();
    let reason = fx
        .service
        .explain_rejected_vote(&id, &["nope".to_string()], "u1")
        .await;
    assert!(matches!(reason, AppError::OptionNotFound(_)));

    assert!(fx.service.vote(&id, &red, "u1").await);
    let reason = fx.service.explain_rejected_vote(&id, &[red], "u1").await;
    assert!(matches!(reason, AppError::AlreadyVoted(_)));

    let reason = fx.service.explain_rejected_vote(&id, &[], "u1").await;
    assert!(matches!(reason, AppError::NoOptions));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_of_one_voter_record_once() {
    let fx = Fixture::pooled().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let red = option_id(&poll, "Red");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = fx.service.clone();
        let poll_id = poll.poll.id.clone();
        let red = red.clone();
        handles.push(tokio::spawn(async move {
            service.vote(&poll_id, &red, "same-voter").await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    let results = fx.service.results(&poll.poll.id).await.unwrap();
    assert_eq!(results["Red"], 1);
    let rows = VoteRepository::new(fx.db.connection())
        .count_by_poll(&poll.poll.id)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_of_distinct_voters_all_count() {
    let fx = Fixture::pooled().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let red = option_id(&poll, "Red");

    let mut handles = Vec::new();
    for i in 0..40 {
        let service = fx.service.clone();
        let poll_id = poll.poll.id.clone();
        let red = red.clone();
        handles.push(tokio::spawn(async move {
            service.vote(&poll_id, &red, &format!("voter-{i}")).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 40);
    let results = fx.service.results(&poll.poll.id).await.unwrap();
    assert_eq!(results["Red"], 40);
    let rows = VoteRepository::new(fx.db.connection())
        .count_by_option(&red)
        .await
        .unwrap();
    assert_eq!(rows, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tallies_match_vote_rows_under_concurrency() {
    let fx = Fixture::pooled().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let red = option_id(&poll, "Red");
    let blue = option_id(&poll, "Blue");

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = fx.service.clone();
        let poll_id = poll.poll.id.clone();
        let option = if i % 2 == 0 { red.clone() } else { blue.clone() };
        handles.push(tokio::spawn(async move {
            service.vote(&poll_id, &option, &format!("voter-{i}")).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let votes = VoteRepository::new(fx.db.connection());
    let loaded = fx.service.get_poll(&poll.poll.id).await.unwrap().unwrap();
    for option in &loaded.options {
        let rows = votes.count_by_option(&option.id).await.unwrap();
        assert_eq!(option.vote_count as u64, rows);
    }
    assert_eq!(loaded.total_votes(), 20);
}

#[tokio::test]
async fn test_ballot_key_index_rejects_ballot_that_passed_the_check() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let red = option_id(&poll, "Red");
    let published = fx.publisher.events().len();

    // A committed ballot of "u1" that the has-voted check cannot see
    vote::ActiveModel {
        id: Set("foreign-row".to_string()),
        poll_id: Set(poll.poll.id.clone()),
        option_id: Set(red.clone()),
        voter_id: Set("someone-else".to_string()),
        ballot_key: Set(Some(format!("{}:u1", poll.poll.id))),
        created_at: Set(Utc::now().into()),
    }
    .insert(fx.db.conn.as_ref())
    .await
    .unwrap();

    assert!(!fx.service.has_voted(&poll.poll.id, "u1").await.unwrap());
    assert!(!fx.service.vote(&poll.poll.id, &red, "u1").await);

    let loaded = fx.service.get_poll(&poll.poll.id).await.unwrap().unwrap();
    assert_eq!(loaded.option(&red).unwrap().vote_count, 0);
    assert_eq!(fx.publisher.events().len(), published);
    assert!(fx.service.vote(&poll.poll.id, &red, "u2").await);
}

#[tokio::test]
async fn test_vote_multiple_is_all_or_nothing() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue", "Green"], true).await;
    let red = option_id(&poll, "Red");
    let blue = option_id(&poll, "Blue");

    let bad = vec![red.clone(), "not-an-option".to_string()];
    assert!(!fx.service.vote_multiple(&poll.poll.id, &bad, "u1").await);
    let results = fx.service.results(&poll.poll.id).await.unwrap();
    assert_eq!(results["Red"], 0);

    let good = vec![red, blue];
    assert!(fx.service.vote_multiple(&poll.poll.id, &good, "u1").await);
    assert!(fx.service.vote_multiple(&poll.poll.id, &good, "u1").await);

    let results = fx.service.results(&poll.poll.id).await.unwrap();
    assert_eq!(results["Red"], 2);
    assert_eq!(results["Blue"], 2);
    assert_eq!(results["Green"], 0);
}

#[tokio::test]
async fn test_vote_multiple_on_single_vote_poll_is_one_ballot() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let both = vec![option_id(&poll, "Red"), option_id(&poll, "Blue")];

    assert!(fx.service.vote_multiple(&poll.poll.id, &both, "u1").await);
    assert!(!fx.service.vote_multiple(&poll.poll.id, &both, "u1").await);
    assert!(!fx.service.vote(&poll.poll.id, &both[0], "u1").await);
    assert!(fx.service.has_voted(&poll.poll.id, "u1").await.unwrap());
}

#[tokio::test]
async fn test_start_reactivates_closed_but_not_expired() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let id = poll.poll.id.clone();

    assert!(fx.service.start(&id, Some("organizer")).await.unwrap());
    assert!(fx.service.close(&id, Some("organizer")).await.unwrap());
    assert!(fx.service.close(&id, Some("organizer")).await.unwrap());
    assert!(fx.service.start(&id, Some("organizer")).await.unwrap());

    fx.poll_repo()
        .transition_status(&id, PollStatus::Active, PollStatus::Expired)
        .await
        .unwrap();
    assert!(!fx.service.start(&id, Some("organizer")).await.unwrap());
}

#[tokio::test]
async fn test_ownership_is_enforced() {
    let fx = Fixture::new().await;
    let poll = fx.create(&["Red", "Blue"], false).await;
    let id = poll.poll.id.clone();

    for result in [
        fx.service.start(&id, Some("intruder")).await,
        fx.service.close(&id, None).await,
        fx.service
            .update(&id, UpdatePollInput::default(), Some("intruder"))
            .await,
        fx.service.delete(&id, Some("intruder")).await,
    ] {
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    let relaxed = fx.service.clone().with_auth_disabled(true);
    assert!(relaxed.start(&id, None).await.unwrap());
}

#[tokio::test]
async fn test_unknown_poll_operations() {
    let fx = Fixture::new().await;

    assert!(!fx.service.start("missing", Some("organizer")).await.unwrap());
    assert!(!fx.service.close("missing", Some("organizer")).await.unwrap());
    assert!(!fx.service.delete("missing", Some("organizer")).await.unwrap());
    assert!(fx.service.results("missing").await.unwrap().is_empty());
    assert!(fx.service.get_poll("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_renames_and_appends_options() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let id = poll.poll.id.clone();
    let red = option_id(&poll, "Red");
    assert!(fx.service.vote(&id, &red, "u1").await);

    let input = UpdatePollInput {
        question: Some("Favourite color?".to_string()),
        options: Some(vec![
            OptionInput {
                id: Some(red.clone()),
                text: "Crimson".to_string(),
            },
            OptionInput {
                id: None,
                text: "Green".to_string(),
            },
        ]),
        ..UpdatePollInput::default()
    };
    assert!(fx.service.update(&id, input, Some("organizer")).await.unwrap());

    let updated = fx.service.get_poll(&id).await.unwrap().unwrap();
    assert_eq!(updated.poll.question, "Favourite color?");
    assert_eq!(updated.poll.status, PollStatus::Active);
    assert_eq!(
        updated.options.iter().map(|o| o.text.as_str()).collect::<Vec<_>>(),
        vec!["Crimson", "Blue", "Green"]
    );
    assert_eq!(updated.option(&red).unwrap().vote_count, 1);

    let unknown = UpdatePollInput {
        options: Some(vec![OptionInput {
            id: Some("not-an-option".to_string()),
            text: "X".to_string(),
        }]),
        ..UpdatePollInput::default()
    };
    let result = fx.service.update(&id, unknown, Some("organizer")).await;
    assert!(matches!(result, Err(AppError::OptionNotFound(_))));
}

#[tokio::test]
async fn test_delete_removes_poll_and_votes() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let id = poll.poll.id.clone();
    assert!(fx.service.vote(&id, &option_id(&poll, "Blue"), "u1").await);

    assert!(fx.service.delete(&id, Some("organizer")).await.unwrap());
    assert!(fx.service.get_poll(&id).await.unwrap().is_none());
    assert!(fx.service.history(&id).await.unwrap().is_empty());
    assert!(!fx.service.delete(&id, Some("organizer")).await.unwrap());
}

#[tokio::test]
async fn test_short_codes_are_case_insensitive() {
    let fx = Fixture::new().await;
    let poll = fx.create(&["Yes", "No"], false).await;
    assert_eq!(poll.poll.short_code.len(), 6);

    let code = poll.poll.short_code.to_lowercase();
    let found = fx.service.get_poll_by_short_code(&code).await.unwrap();
    assert_eq!(found.unwrap().poll.id, poll.poll.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrently_created_polls_get_distinct_short_codes() {
    let fx = Arc::new(Fixture::pooled().await);

    let mut handles = Vec::new();
    for _ in 0..25 {
        let fx = fx.clone();
        handles.push(tokio::spawn(async move {
            fx.create(&["Yes", "No"], false).await.poll.short_code
        }));
    }

    let mut codes = HashSet::new();
    for handle in handles {
        assert!(codes.insert(handle.await.unwrap()));
    }
    assert_eq!(codes.len(), 25);
    assert_eq!(fx.service.list_all().await.unwrap().len(), 25);
}

/// A generator whose pre-check runs against an empty store and that hands
/// out `codes` in order, then fresh random ones.
async fn scripted_short_codes(codes: &[&str], max_attempts: u32) -> ShortCodeGenerator {
    let blind = TestDatabase::in_memory().await.unwrap();
    let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();
    let next = AtomicUsize::new(0);

    ShortCodeGenerator::new(PollRepository::new(blind.connection()))
        .with_max_attempts(max_attempts)
        .with_source(move || {
            let i = next.fetch_add(1, Ordering::SeqCst);
            codes
                .get(i)
                .cloned()
                .unwrap_or_else(livepoll_core::services::short_code::random_code)
        })
}

#[tokio::test]
async fn test_create_retries_when_insert_hits_taken_short_code() {
    let fx = Fixture::new().await;
    let scripted = scripted_short_codes(&["TAKEN1", "TAKEN1", "FRESH1"], 4).await;
    let service = fx.service.clone().with_short_codes(scripted);

    let input = CreatePollInput {
        question: "Best color?".to_string(),
        poll_type: PollType::SingleChoice,
        options: vec!["Red".to_string(), "Blue".to_string()],
        start_time: None,
        end_time: None,
        is_public: true,
        allow_multiple_votes: false,
    };

    let first = service.create_poll("organizer", input.clone()).await.unwrap();
    assert_eq!(first.poll.short_code, "TAKEN1");

    let second = service.create_poll("organizer", input).await.unwrap();
    assert_eq!(second.poll.short_code, "FRESH1");
    assert_eq!(fx.service.list_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_gives_up_when_every_insert_conflicts() {
    let fx = Fixture::new().await;
    let taken = fx.create(&["Red", "Blue"], false).await.poll.short_code;
    let scripted =
        scripted_short_codes(&[taken.as_str(), taken.as_str(), taken.as_str()], 3).await;
    let service = fx.service.clone().with_short_codes(scripted);

    let result = service
        .create_poll(
            "organizer",
            CreatePollInput {
                question: "Lunch?".to_string(),
                poll_type: PollType::SingleChoice,
                options: vec!["Pizza".to_string(), "Sushi".to_string()],
                start_time: None,
                end_time: None,
                is_public: true,
                allow_multiple_votes: false,
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(fx.service.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_each_committed_mutation_publishes_once() {
    let fx = Fixture::new().await;
    let poll = fx.create(&["Red", "Blue"], false).await;
    let id = poll.poll.id.clone();
    let red = option_id(&poll, "Red");
    assert!(fx.publisher.events().is_empty());

    fx.service.start(&id, Some("organizer")).await.unwrap();
    fx.service.start(&id, Some("organizer")).await.unwrap();
    fx.service.vote(&id, &red, "u1").await;
    fx.service.vote(&id, &red, "u1").await;
    fx.service.close(&id, Some("organizer")).await.unwrap();
    fx.service.close(&id, Some("organizer")).await.unwrap();

    assert_eq!(fx.publisher.events(), vec![id.clone(), id.clone(), id]);
}

#[tokio::test]
async fn test_list_active_only_returns_active_polls() {
    let fx = Fixture::new().await;
    let draft = fx.create(&["A", "B"], false).await;
    let active = fx.create_active(&["C", "D"], false).await;

    let listed = fx.service.list_active().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].poll.id, active.poll.id);

    let all = fx.service.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|p| p.poll.id == draft.poll.id));
}

#[tokio::test]
async fn test_scheduler_tick_starts_and_closes_polls() {
    let fx = Fixture::new().await;
    let now = Utc::now();

    let scheduled = fx
        .service
        .create_poll(
            "organizer",
            CreatePollInput {
                question: "Lunch?".to_string(),
                poll_type: PollType::SingleChoice,
                options: vec!["Pizza".to_string(), "Sushi".to_string()],
                start_time: Some(now - ChronoDuration::minutes(1)),
                end_time: Some(now + ChronoDuration::hours(1)),
                is_public: true,
                allow_multiple_votes: false,
            },
        )
        .await
        .unwrap();
    let ended = fx.create_active(&["Yes", "No"], false).await;
    fx.service
        .update(
            &ended.poll.id,
            UpdatePollInput {
                end_time: Some(Some(now - ChronoDuration::seconds(1))),
                ..UpdatePollInput::default()
            },
            Some("organizer"),
        )
        .await
        .unwrap();

    let publisher = Arc::new(RecordingPublisher::default());
    let updater = PollStatusUpdater::new(fx.poll_repo(), publisher.clone());
    let report = updater.run_tick_at(now).await.unwrap();
    assert_eq!(report.started, 1);
    assert_eq!(report.closed, 1);

    let scheduled = fx.service.get_poll(&scheduled.poll.id).await.unwrap().unwrap();
    assert_eq!(scheduled.poll.status, PollStatus::Active);
    let ended = fx.service.get_poll(&ended.poll.id).await.unwrap().unwrap();
    assert_eq!(ended.poll.status, PollStatus::Closed);
    assert_eq!(publisher.events().len(), 2);

    let again = updater.run_tick_at(now).await.unwrap();
    assert_eq!(again.started + again.closed, 0);
}

#[tokio::test]
async fn test_long_poll_returns_early_on_vote() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let red = option_id(&poll, "Red");

    let watcher = ChangeWatcher::with_timing(
        fx.poll_repo(),
        Duration::from_millis(20),
        Duration::from_secs(5),
        8,
    );
    let poll_id = poll.poll.id.clone();
    let waiter = tokio::spawn(async move { watcher.wait_for_poll_change(&poll_id).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.service.vote(&poll.poll.id, &red, "u1").await);

    let changed = waiter.await.unwrap().unwrap().unwrap();
    assert_eq!(changed.results()["Red"], 1);
}

#[tokio::test]
async fn test_long_poll_times_out_with_current_state() {
    let fx = Fixture::new().await;
    let poll = fx.create_active(&["Red", "Blue"], false).await;

    let watcher = ChangeWatcher::with_timing(
        fx.poll_repo(),
        Duration::from_millis(10),
        Duration::from_millis(60),
        8,
    );
    let latest = watcher
        .wait_for_poll_change(&poll.poll.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.poll.id, poll.poll.id);
    assert_eq!(latest.total_votes(), 0);

    assert!(watcher.wait_for_poll_change("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_long_poll_on_active_list_sees_start() {
    let fx = Fixture::new().await;
    let poll = fx.create(&["Red", "Blue"], false).await;

    let watcher = ChangeWatcher::with_timing(
        fx.poll_repo(),
        Duration::from_millis(20),
        Duration::from_secs(5),
        8,
    );
    let waiter = tokio::spawn(async move { watcher.wait_for_active_change().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.service.start(&poll.poll.id, Some("organizer")).await.unwrap());

    let active = waiter.await.unwrap().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].poll.id, poll.poll.id);
}

#[tokio::test]
async fn test_hub_pushes_only_to_subscribers() {
    let fx = Fixture::new().await;
    let hub = NotificationHub::new(fx.poll_repo());
    let service = PollService::new(
        fx.poll_repo(),
        VoteRepository::new(fx.db.connection()),
        Arc::new(hub.clone()),
    );
    let poll_a = fx.create_active(&["Red", "Blue"], false).await;
    let poll_b = fx.create_active(&["Yes", "No"], false).await;

    let (watching_a, mut rx_a) = hub.register().await;
    let (watching_b, mut rx_b) = hub.register().await;
    assert!(hub.subscribe(watching_a, &poll_a.poll.id).await);
    assert!(hub.subscribe(watching_b, &poll_b.poll.id).await);

    assert!(service.vote(&poll_a.poll.id, &option_id(&poll_a, "Red"), "u1").await);

    let pushed = tokio::time::timeout(Duration::from_secs(2), rx_a.recv())
        .await
        .unwrap()
        .unwrap();
    let message: PollUpdateMessage = serde_json::from_str(&pushed).unwrap();
    assert_eq!(message.poll_id, poll_a.poll.id);
    assert_eq!(message.results["Red"], 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx_b.try_recv().is_err());

    hub.unsubscribe(watching_a).await;
    hub.unsubscribe(watching_b).await;
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_hub_pushes_updates_in_publish_order() {
    let fx = Fixture::new().await;
    let hub = NotificationHub::new(fx.poll_repo());
    let service = PollService::new(
        fx.poll_repo(),
        VoteRepository::new(fx.db.connection()),
        Arc::new(hub.clone()),
    );
    let poll = fx.create_active(&["Red", "Blue"], false).await;
    let red = option_id(&poll, "Red");

    let (connection, mut rx) = hub.register().await;
    assert!(hub.subscribe(connection, &poll.poll.id).await);

    for i in 0..10 {
        assert!(service.vote(&poll.poll.id, &red, &format!("voter-{i}")).await);
    }

    let mut tallies = Vec::new();
    for _ in 0..10 {
        let pushed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let message: PollUpdateMessage = serde_json::from_str(&pushed).unwrap();
        tallies.push(message.results["Red"]);
    }

    assert!(tallies.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(tallies.last(), Some(&10));
}
