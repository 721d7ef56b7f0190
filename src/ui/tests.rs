#![allow(non_snake_case)]

use super::*;
use crate::{
    game::{
        Deck,
        Estimate,
        Game,
        Id,
        Participant,
        Round,
        Story,
        StoryEstimate,
        UserId,
    },
    pending::PendingEstimates,
    reconcile::reconcile,
};
use crossterm::event::KeyEvent;
use ratatui::backend::TestBackend;

fn game(stories: Vec<Story>) -> Game {
    Game {
        id: Some(Id::from(1)),
        name: Some("<b>Sprint</b> &amp; friends".to_string()),
        url: Some("/game/1".to_string()),
        user: UserId::from("alice"),
        completed: false,
        current_story: stories.iter().any(|s| s.is_current),
        deck: Deck::new(["1", "2", "3"]),
        stories,
        participants: vec![
            Participant {
                user: UserId::from("alice"),
                name: "Alice".to_string(),
                photo: None,
                url: "/game/1/participant/1".to_string(),
                observer: false,
            },
            Participant {
                user: UserId::from("bob"),
                name: "Bob".to_string(),
                photo: None,
                url: "/game/1/participant/2".to_string(),
                observer: false,
            },
        ],
    }
}

fn story(estimate: StoryEstimate, is_current: bool, rounds: Vec<Round>) -> Story {
    Story {
        id: Id::from(3),
        name: "Checkout".to_string(),
        url: "/game/1/story/3".to_string(),
        is_current,
        estimate,
        rounds,
    }
}

fn open_round() -> Round {
    Round {
        id: Id::from(7),
        url: "/game/1/story/3/round/7".to_string(),
        completed: false,
        estimates: vec![Estimate {
            user: UserId::from("alice"),
            name: "alice@example.com".to_string(),
            photo: None,
            card: None,
        }],
    }
}

fn model_for(game: &Game, viewer: &str) -> RenderModel {
    reconcile(game, &PendingEstimates::new(), &UserId::from(viewer))
}

fn state_for(model: &RenderModel) -> UiState {
    let mut state = UiState::default();
    absorb(&mut state, model);
    state
}

fn screen(state: &UiState, model: &RenderModel) -> String {
    let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
    terminal.draw(|f| render(f, state, model)).unwrap();
    let buffer = terminal.backend().buffer().clone();
    buffer
        .content
        .chunks(usize::from(buffer.area.width))
        .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
        .join("\n")
}

fn press(state: &mut UiState, code: KeyCode) -> Option<UserEvent> {
    interpret_event(state, Event::Key(KeyEvent::new(code, KeyModifiers::NONE)))
}

#[test]
fn render__same_model_and_state_draw_identical_frames() {
    // given
    let game = game(vec![story(StoryEstimate::Unfinished, true, vec![open_round()])]);
    let model = model_for(&game, "bob");
    let state = state_for(&model);

    // when
    let first = screen(&state, &model);
    let second = screen(&state, &model);

    // then
    assert_eq!(first, second);
}

#[test]
fn render__shows_skipped_badge_and_plain_game_name() {
    // given
    let game = game(vec![story(StoryEstimate::Skipped, false, vec![])]);
    let model = model_for(&game, "bob");

    // when
    let screen = screen(&state_for(&model), &model);

    // then
    assert!(screen.contains("[Skipped] Checkout"));
    assert!(screen.contains("Sprint & friends"));
    assert!(screen.contains("Sum: 0"));
}

#[test]
fn render__shows_placeholder_for_participant() {
    // given
    let model = model_for(&game(vec![]), "bob");

    // when
    let screen = screen(&state_for(&model), &model);

    // then
    assert!(screen.contains("No stories? Just wait."));
}

#[test]
fn render__lists_who_we_are_waiting_for() {
    // given
    let game = game(vec![story(StoryEstimate::Unfinished, true, vec![open_round()])]);
    let model = model_for(&game, "bob");

    // when
    let screen = screen(&state_for(&model), &model);

    // then
    assert!(screen.contains("Waiting for: You!"));
    assert!(!screen.contains("c Complete round"));
}

#[test]
fn render__offline_session_says_how_to_reload() {
    // given
    let model = model_for(&game(vec![]), "bob");
    let mut state = state_for(&model);

    // when
    state.set_offline(true);

    // then
    assert!(screen(&state, &model).contains("Offline, R to reload"));
}

#[test]
fn interpret_event__enter_votes_on_highlighted_card() {
    // given
    let game = game(vec![story(StoryEstimate::Unfinished, true, vec![open_round()])]);
    let model = model_for(&game, "bob");
    let mut state = state_for(&model);

    // when
    press(&mut state, KeyCode::Right);
    let event = press(&mut state, KeyCode::Enter);

    // then
    let Some(UserEvent::Vote {
        round,
        card,
        action,
    }) = event
    else {
        panic!("expected a vote");
    };
    assert_eq!(round, Id::from(7));
    assert_eq!(card, CardIndex(1));
    assert_eq!(action.url(), "/game/1/story/3/round/7/estimate?card=1");
}

#[test]
fn interpret_event__disabled_round_ignores_votes() {
    // given
    let game = game(vec![story(StoryEstimate::Unfinished, true, vec![open_round()])]);
    let mut pending = PendingEstimates::new();
    pending.set(Id::from(7), CardIndex(0));
    let model = reconcile(&game, &pending, &UserId::from("bob"));
    let mut state = state_for(&model);

    // when
    let event = press(&mut state, KeyCode::Char('2'));

    // then
    assert!(event.is_none());
}

#[test]
fn interpret_event__busy_control_is_inert_until_settled() {
    // given
    let game = game(vec![story(StoryEstimate::Unfinished, true, vec![open_round()])]);
    let model = model_for(&game, "alice");
    let mut state = state_for(&model);
    let Some(UserEvent::Dispatch(action)) = press(&mut state, KeyCode::Char('s')) else {
        panic!("expected skip");
    };

    // when
    state.mark_in_flight(&action);
    let while_busy = press(&mut state, KeyCode::Char('s'));
    state.settle(&DispatchOutcome {
        control: action.url(),
        ok: false,
        clear_form: false,
    });
    let after = press(&mut state, KeyCode::Char('s'));

    // then
    assert!(while_busy.is_none());
    assert!(matches!(after, Some(UserEvent::Dispatch(_))));
}

#[test]
fn absorb__focuses_story_input_once_when_panel_appears() {
    // given
    let with_story = game(vec![story(StoryEstimate::Unfinished, true, vec![open_round()])]);
    let finished = game(vec![story(StoryEstimate::Points(3), false, vec![])]);
    let mut state = state_for(&model_for(&with_story, "alice"));
    assert_eq!(state.mode, Mode::Normal);

    // when
    absorb(&mut state, &model_for(&finished, "alice"));
    let focused = state.mode;
    press(&mut state, KeyCode::Esc);
    absorb(&mut state, &model_for(&finished, "alice"));

    // then
    assert_eq!(focused, Mode::StoryInput);
    assert_eq!(state.mode, Mode::Normal);
}

#[test]
fn interpret_event__story_input_submits_new_story_form() {
    // given
    let model = model_for(&game(vec![]), "alice");
    let mut state = state_for(&model);
    assert_eq!(state.mode, Mode::StoryInput);
    for c in "Login".chars() {
        press(&mut state, KeyCode::Char(c));
    }

    // when
    let event = press(&mut state, KeyCode::Enter);

    // then
    let Some(UserEvent::Dispatch(Action::Submit(form))) = event else {
        panic!("expected form submission");
    };
    assert_eq!(form.action, "/game/1/story");
    assert_eq!(form.fields, vec![("name".to_string(), "Login".to_string())]);

    state.settle(&DispatchOutcome {
        control: form.action.clone(),
        ok: true,
        clear_form: true,
    });
    assert!(state.story_input.is_empty());
}

#[test]
fn interpret_event__participant_menu_targets_selected_row() {
    // given
    let model = model_for(&game(vec![story(StoryEstimate::Points(1), false, vec![])]), "alice");
    let mut state = state_for(&model);
    state.mode = Mode::Normal;

    // when
    press(&mut state, KeyCode::Tab);
    let on_self = press(&mut state, KeyCode::Char('d'));
    press(&mut state, KeyCode::Down);
    let on_bob = press(&mut state, KeyCode::Char('o'));

    // then
    assert!(on_self.is_none());
    let Some(UserEvent::Dispatch(action)) = on_bob else {
        panic!("expected toggle");
    };
    assert_eq!(action.url(), "/game/1/participant/2/observer");
}

#[test]
fn interpret_event__quit_goes_through_confirmation() {
    let model = model_for(&game(vec![]), "bob");
    let mut state = state_for(&model);

    assert!(matches!(press(&mut state, KeyCode::Char('q')), Some(UserEvent::Redraw)));
    assert!(matches!(press(&mut state, KeyCode::Char('y')), Some(UserEvent::Quit)));
}

#[test]
fn plain_text__strips_tags_and_decodes_entities() {
    assert_eq!(plain_text("<i>Fix</i> &lt;login&gt; &amp; more"), "Fix <login> & more");
}

#[test]
fn plain_text__decodes_numeric_entities_once() {
    assert_eq!(plain_text("Bob&#x27;s list&#8230;"), "Bob's list…");
    assert_eq!(plain_text("&amp;lt; stays"), "&lt; stays");
    assert_eq!(plain_text("R&D &#xZZ; &bogus;"), "R&D &#xZZ; &bogus;");
}

fn rows(terminal: &Terminal<TestBackend>) -> String {
    let buffer = terminal.backend().buffer();
    buffer
        .content
        .chunks(usize::from(buffer.area.width))
        .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
        .join("\n")
}

#[test]
fn draw_on__absorbs_model_and_draws_full_frame() {
    // given
    let model = model_for(&game(vec![story(StoryEstimate::Points(3), false, vec![])]), "alice");
    let mut state = UiState::default();
    let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();

    // when
    draw_on(&mut terminal, &mut state, &model).unwrap();
    let first = rows(&terminal);
    draw_on(&mut terminal, &mut state, &model).unwrap();

    // then
    assert_eq!(state.mode, Mode::StoryInput);
    assert!(first.contains("Sprint & friends"));
    assert!(first.contains("[3] Checkout"));
    assert_eq!(rows(&terminal), first);
}

#[test]
fn draw__without_terminal_still_absorbs_model() {
    // given
    let model = model_for(&game(vec![]), "alice");
    let mut state = UiState::default();

    // when
    draw(&mut state, &model).unwrap();

    // then
    assert_eq!(state.mode, Mode::StoryInput);
}

#[test]
fn draw_waiting_on__shows_status_and_offline_hint() {
    // given
    let mut state = UiState::default();
    state.set_status("Reload failed: game fetch failed");
    state.set_offline(true);
    let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();

    // when
    draw_waiting_on(&mut terminal, &state).unwrap();

    // then
    let screen = rows(&terminal);
    assert!(screen.contains("Reload failed"));
    assert!(screen.contains("Offline, R to reload"));
}

#[test]
fn fit__truncates_by_display_width() {
    assert_eq!(fit("abcdef", 10), "abcdef");
    assert_eq!(fit("abcdef", 4), "abc…");
    assert_eq!(fit("日本語テキスト", 5), "日本…");
    assert_eq!(fit("abc", 0), "");
}
