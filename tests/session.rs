#![allow(non_snake_case)]
use itertools::Itertools;
use planning_poker::{
    game::{
        CardIndex,
        Game,
        Id,
        UserId,
    },
    pending::PendingEstimates,
    reconcile::{
        RenderModel,
        RoundView,
        reconcile,
    },
    ui::{
        UiState,
        render,
    },
};
use ratatui::{
    Terminal,
    backend::TestBackend,
};

const LIVE_GAME: &str = r#"{
    "id": 42,
    "name": "Sprint 12",
    "url": "/game/42",
    "user": "alice",
    "completed": false,
    "deck": ["1", "2", "3", "5", "8"],
    "current_story": {"id": 2, "name": "Checkout", "url": "/game/42/story/2"},
    "participants": [
        {"user": "alice", "name": "Alice", "photo": "a.png", "observer": true, "url": "/game/42/participant/1"},
        {"user": "bob", "name": "Bob", "photo": "b.png", "observer": false, "url": "/game/42/participant/2"},
        {"user": "carol", "name": "Carol", "photo": null, "observer": false, "url": "/game/42/participant/3"}
    ],
    "stories": [
        {"id": 1, "name": "Login", "url": "/game/42/story/1", "is_current": false, "estimate": "5", "rounds": []},
        {"id": 2, "name": "Checkout", "url": "/game/42/story/2", "is_current": true, "estimate": null, "rounds": [
            {"id": 20, "url": "/game/42/story/2/round/20", "completed": true, "estimates": [
                {"user": "bob", "name": "bob@example.com", "card": "3"},
                {"user": "carol", "name": "carol@example.com", "card": "3"}
            ]},
            {"id": 21, "url": "/game/42/story/2/round/21", "completed": false, "estimates": [
                {"user": "carol", "name": "carol@example.com", "card": null}
            ]}
        ]}
    ]
}"#;

/// A decoded game plus the local votes of one viewer.
struct TestContext {
    game: Game,
    pending: PendingEstimates,
}

impl TestContext {
    fn new(payload: &str) -> Self {
        Self {
            game: Game::from_json(payload).unwrap(),
            pending: PendingEstimates::new(),
        }
    }

    fn model_for(&self, viewer: &str) -> RenderModel {
        reconcile(&self.game, &self.pending, &UserId::from(viewer))
    }

    fn screen_for(&self, viewer: &str) -> String {
        let model = self.model_for(viewer);
        let state = UiState::default();
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| render(f, &state, &model)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content
            .chunks(usize::from(buffer.area.width))
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .join("\n")
    }
}

#[test]
fn session__results_round_groups_votes_by_card() {
    // given
    let ctx = TestContext::new(LIVE_GAME);

    // when
    let model = ctx.model_for("bob");

    // then
    let RoundView::Results(results) = &model.stories[1].rounds[0] else {
        panic!("expected results round");
    };
    let visible: Vec<_> = results
        .buckets
        .iter()
        .filter(|bucket| !bucket.hidden())
        .map(|bucket| (bucket.label.as_str(), bucket.count))
        .collect();
    assert_eq!(visible, vec![("3", 2)]);
    assert_eq!(model.sum_of_estimates, 5);
}

#[test]
fn session__screen_shows_board_for_player() {
    // given
    let ctx = TestContext::new(LIVE_GAME);

    // when
    let screen = ctx.screen_for("bob");

    // then
    assert!(screen.contains("Sprint 12"));
    assert!(screen.contains("Sum: 5"));
    assert!(screen.contains("[5] Login"));
    assert!(screen.contains("[3] x2  Bob, Carol"));
    assert!(screen.contains("Waiting for: You!"));
    assert!(!screen.contains("Alice name"));
}

#[test]
fn session__pending_vote_survives_until_server_confirms() {
    // given
    let mut ctx = TestContext::new(LIVE_GAME);
    ctx.pending.set(Id::from(21), CardIndex(4));

    // when
    let before = ctx.model_for("bob");
    ctx.game = Game::from_json(&LIVE_GAME.replace(
        r#"{"user": "carol", "name": "carol@example.com", "card": null}"#,
        r#"{"user": "carol", "name": "carol@example.com", "card": null},
           {"user": "bob", "name": "bob@example.com", "card": "2"}"#,
    ))
    .unwrap();
    let after = ctx.model_for("bob");

    // then
    assert_eq!(before.voting_round().unwrap().my_estimate, Some(CardIndex(4)));
    assert_eq!(after.voting_round().unwrap().my_estimate, Some(CardIndex(1)));
    assert!(after.voting_round().unwrap().waiting_for.is_empty());
}

#[test]
fn session__observing_facilitator_can_complete_but_not_vote() {
    // given
    let ctx = TestContext::new(LIVE_GAME);

    // when
    let model = ctx.model_for("alice");
    let screen = ctx.screen_for("alice");

    // then
    let round = model.voting_round().unwrap();
    assert!(round.disabled);
    assert!(round.complete.is_some());
    assert!(screen.contains("You can only observe"));
    assert!(screen.contains("c Complete round"));
    assert_eq!(model.game_actions.as_ref().map(|actions| actions.hidden), Some(true));
}

#[test]
fn session__completed_game_offers_reopen_to_facilitator() {
    // given
    let payload = r#"{
        "user": "alice", "url": "/game/42", "completed": true, "current_story": null,
        "deck": ["1", "2"], "participants": [],
        "stories": [{"id": 1, "name": "Login", "url": "/game/42/story/1", "estimate": -1}]
    }"#;
    let ctx = TestContext::new(payload);

    // when
    let screen = ctx.screen_for("alice");

    // then
    assert!(screen.contains("[Skipped] Login"));
    assert!(screen.contains("G Reopen game"));
    assert!(screen.contains("New story: game completed"));
}
