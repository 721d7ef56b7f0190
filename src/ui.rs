use crate::{
    dispatch::{
        Action,
        DispatchOutcome,
        FormKind,
    },
    game::{
        CardIndex,
        RoundId,
    },
    reconcile::{
        GameActions,
        MenuIcon,
        ParticipantView,
        RenderModel,
        ResultsRound,
        RoundView,
        STORY_ESTIMATE_TOOLTIP,
        StoryActions,
        VotingRound,
        Waiting,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use itertools::Itertools;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::{
    collections::HashSet,
    io::stdout,
};
use unicode_width::{
    UnicodeWidthChar,
    UnicodeWidthStr,
};

#[cfg(test)]
mod tests;

const PAGE: u16 = 5;

pub type InputEventReceiver = EventStream;

#[derive(Debug)]
pub enum UserEvent {
    Quit,
    Redraw,
    Reload,
    Vote {
        round: RoundId,
        card: CardIndex,
        action: Action,
    },
    Dispatch(Action),
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
    model: Option<RenderModel>,
    card_cursor: usize,
    participant_cursor: usize,
    menu_cursor: usize,
    story_input: String,
    in_flight: HashSet<String>,
    status: String,
    offline: bool,
    scroll: u16,
    panel_was_visible: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    Participants,
    StoryInput,
    CompleteStory,
    QuitModal,
}

impl UiState {
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// The control stays busy until [`UiState::settle`] sees its outcome.
    pub fn mark_in_flight(&mut self, action: &Action) {
        self.in_flight.insert(action.url());
    }

    pub fn settle(&mut self, outcome: &DispatchOutcome) {
        self.in_flight.remove(&outcome.control);
        let story_form = self
            .model
            .as_ref()
            .and_then(|model| model.game_actions.as_ref())
            .is_some_and(|actions| actions.new_story.action == outcome.control);
        if outcome.clear_form && story_form {
            self.story_input.clear();
        }
    }

    fn is_busy(&self, action: &Action) -> bool {
        self.in_flight.contains(&action.url())
    }

    fn current_actions(&self) -> Option<&StoryActions> {
        self.model
            .as_ref()?
            .current_story()?
            .actions
            .as_ref()
    }

    fn visible_game_actions(&self) -> Option<&GameActions> {
        self.model
            .as_ref()?
            .game_actions
            .as_ref()
            .filter(|actions| !actions.hidden)
    }

    fn selected_participant(&self) -> Option<&ParticipantView> {
        self.model
            .as_ref()?
            .participants
            .get(self.participant_cursor)
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, model: &RenderModel) -> Result<()> {
    match state.terminal.take() {
        Some(mut term) => {
            let drawn = draw_on(&mut term, state, model);
            state.terminal = Some(term);
            drawn
        }
        None => {
            absorb(state, model);
            Ok(())
        }
    }
}

/// Draw a full frame onto any backend.
pub fn draw_on<B: Backend>(
    terminal: &mut Terminal<B>,
    state: &mut UiState,
    model: &RenderModel,
) -> Result<()> {
    absorb(state, model);
    terminal.draw(|f| render(f, state, model))?;
    Ok(())
}

/// Nothing to show until the first snapshot arrives.
pub fn draw_waiting(state: &mut UiState) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        let drawn = draw_waiting_on(&mut term, state);
        state.terminal = Some(term);
        drawn?;
    }
    Ok(())
}

pub fn draw_waiting_on<B: Backend>(terminal: &mut Terminal<B>, state: &UiState) -> Result<()> {
    terminal.draw(|f| render_waiting(f, state))?;
    Ok(())
}

fn render_waiting(f: &mut Frame, state: &UiState) {
    f.render_widget(Clear, f.area());
    let mut lines = vec![Line::from(state.status.clone())];
    if state.offline {
        lines.push(Line::styled(
            "Offline, R to reload",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }
    if state.mode == Mode::QuitModal {
        lines.push(Line::from("Leave the game? (Y/N)"));
    } else {
        lines.push(Line::styled("q quit", Style::default().fg(Color::DarkGray)));
    }
    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Planning Poker"),
    );
    f.render_widget(widget, centered_rect(50, 30, f.area()));
}

/// Bring local interaction state in line with a new model.
fn absorb(state: &mut UiState, model: &RenderModel) {
    let panel = model
        .game_actions
        .as_ref()
        .filter(|actions| !actions.hidden);
    match panel {
        Some(actions) if actions.story_input_disabled => {
            if state.mode == Mode::StoryInput {
                state.mode = Mode::Normal;
            }
        }
        Some(actions) => {
            if actions.request_focus
                && !state.panel_was_visible
                && state.mode == Mode::Normal
            {
                state.mode = Mode::StoryInput;
            }
        }
        None => {
            if state.mode == Mode::StoryInput {
                state.mode = Mode::Normal;
            }
        }
    }
    state.panel_was_visible = panel.is_some();

    let story_actions = model.current_story().and_then(|s| s.actions.as_ref());
    match story_actions {
        Some(actions) => {
            state.menu_cursor = state.menu_cursor.min(actions.complete.len().saturating_sub(1));
        }
        None if state.mode == Mode::CompleteStory => state.mode = Mode::Normal,
        None => {}
    }
    if model.participants.is_empty() && state.mode == Mode::Participants {
        state.mode = Mode::Normal;
    }
    state.participant_cursor = state
        .participant_cursor
        .min(model.participants.len().saturating_sub(1));
    if let Some(round) = model.voting_round() {
        state.card_cursor = state.card_cursor.min(round.cards.len().saturating_sub(1));
    }
    state.model = Some(model.clone());
}

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(input: &mut InputEventReceiver) -> Result<Event> {
    match input.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => interpret_key(state, key),
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

fn interpret_key(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    match state.mode {
        Mode::QuitModal => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::StoryInput => match key.code {
            KeyCode::Esc | KeyCode::Tab => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let name = state.story_input.trim();
                if name.is_empty() {
                    return None;
                }
                let actions = state.visible_game_actions()?;
                let action = Action::Submit(actions.new_story.clone().with_field("name", name));
                trigger(state, &action)
            }
            KeyCode::Backspace => {
                state.story_input.pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) => {
                state.story_input.push(c);
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::CompleteStory => {
            let choices = state.current_actions()?.complete.len();
            match key.code {
                KeyCode::Esc => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Up | KeyCode::Left | KeyCode::Char('k') | KeyCode::Char('h') => {
                    state.menu_cursor = state.menu_cursor.saturating_sub(1);
                    Some(UserEvent::Redraw)
                }
                KeyCode::Down | KeyCode::Right | KeyCode::Char('j') | KeyCode::Char('l') => {
                    state.menu_cursor = (state.menu_cursor + 1).min(choices.saturating_sub(1));
                    Some(UserEvent::Redraw)
                }
                KeyCode::Enter => {
                    let choice = state.current_actions()?.complete.get(state.menu_cursor)?;
                    let event = trigger(state, &choice.action)?;
                    state.mode = Mode::Normal;
                    Some(event)
                }
                _ => None,
            }
        }
        Mode::Participants => {
            let rows = state.model.as_ref()?.participants.len();
            match key.code {
                KeyCode::Esc | KeyCode::Tab => {
                    state.mode = Mode::Normal;
                    Some(UserEvent::Redraw)
                }
                KeyCode::Up | KeyCode::Char('k') => {
                    state.participant_cursor = state.participant_cursor.saturating_sub(1);
                    Some(UserEvent::Redraw)
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    state.participant_cursor =
                        (state.participant_cursor + 1).min(rows.saturating_sub(1));
                    Some(UserEvent::Redraw)
                }
                KeyCode::Char('o') => {
                    let item = state.selected_participant()?.menu.as_ref()?.toggle.as_ref()?;
                    trigger(state, &item.action)
                }
                KeyCode::Char('d') => {
                    let item = state.selected_participant()?.menu.as_ref()?.delete.as_ref()?;
                    trigger(state, &item.action)
                }
                _ => None,
            }
        }
        Mode::Normal => interpret_normal_key(state, key),
    }
}

fn interpret_normal_key(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Left | KeyCode::Char('h') => {
            state.card_cursor = state.card_cursor.saturating_sub(1);
            Some(UserEvent::Redraw)
        }
        KeyCode::Right | KeyCode::Char('l') => {
            let cards = state.model.as_ref()?.voting_round()?.cards.len();
            state.card_cursor = (state.card_cursor + 1).min(cards.saturating_sub(1));
            Some(UserEvent::Redraw)
        }
        KeyCode::Enter => vote(state, state.card_cursor),
        KeyCode::Char(c @ '1'..='9') => vote(state, c as usize - '1' as usize),
        KeyCode::Char('c') => {
            let complete = state.model.as_ref()?.voting_round()?.complete.as_ref()?;
            trigger(state, complete)
        }
        KeyCode::Char('n') => trigger(state, &state.current_actions()?.new_round),
        KeyCode::Char('s') => trigger(state, &state.current_actions()?.skip),
        KeyCode::Char('e') => {
            state.current_actions()?;
            state.mode = Mode::CompleteStory;
            state.menu_cursor = 0;
            Some(UserEvent::Redraw)
        }
        KeyCode::Tab => {
            if state.model.as_ref()?.participants.is_empty() {
                return None;
            }
            state.mode = Mode::Participants;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('a') => {
            if state.visible_game_actions()?.story_input_disabled {
                return None;
            }
            state.mode = Mode::StoryInput;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('g') => completion(state, FormKind::CompleteGame),
        KeyCode::Char('G') => completion(state, FormKind::ReopenGame),
        KeyCode::Char('R') => Some(UserEvent::Reload),
        KeyCode::PageUp => {
            let following = state.model.as_ref().is_some_and(|m| m.scroll_to_bottom);
            state.scroll = if following {
                state.scroll.saturating_add(PAGE)
            } else {
                state.scroll.saturating_sub(PAGE)
            };
            Some(UserEvent::Redraw)
        }
        KeyCode::PageDown => {
            let following = state.model.as_ref().is_some_and(|m| m.scroll_to_bottom);
            state.scroll = if following {
                state.scroll.saturating_sub(PAGE)
            } else {
                state.scroll.saturating_add(PAGE)
            };
            Some(UserEvent::Redraw)
        }
        _ => None,
    }
}

fn vote(state: &UiState, index: usize) -> Option<UserEvent> {
    let round = state.model.as_ref()?.voting_round()?;
    if round.disabled {
        return None;
    }
    let card = round.cards.get(index)?;
    if state.is_busy(&card.action) {
        return None;
    }
    Some(UserEvent::Vote {
        round: round.id.clone(),
        card: card.card,
        action: card.action.clone(),
    })
}

fn completion(state: &UiState, kind: FormKind) -> Option<UserEvent> {
    let form = &state.visible_game_actions()?.completion;
    if form.kind != kind {
        return None;
    }
    trigger(state, &Action::Submit(form.clone()))
}

fn trigger(state: &UiState, action: &Action) -> Option<UserEvent> {
    (!state.is_busy(action)).then(|| UserEvent::Dispatch(action.clone()))
}

/// Paint the whole board. Output depends only on `state` and `model`.
pub fn render(f: &mut Frame, state: &UiState, model: &RenderModel) {
    f.render_widget(Clear, f.area());
    let panel = model
        .game_actions
        .as_ref()
        .filter(|actions| !actions.hidden);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(if panel.is_some() { 4 } else { 0 }),
            Constraint::Length(3),
        ])
        .split(f.area());
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(rows[1]);

    draw_header(f, rows[0], state, model);
    draw_stories(f, middle[0], state, model);
    draw_participants(f, middle[1], state, model);
    if let Some(actions) = panel {
        draw_game_actions(f, rows[2], state, actions);
    }
    draw_help(f, rows[3], state, model);
    draw_modals(f, state, model);
}

fn draw_header(f: &mut Frame, area: Rect, state: &UiState, model: &RenderModel) {
    let title = model
        .game_name
        .as_deref()
        .map(plain_text)
        .unwrap_or_else(|| "Planning Poker".to_string());
    let mut spans = vec![Span::raw(format!("Sum: {}", model.sum_of_estimates))];
    if model.completed {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled("Completed", Style::default().fg(Color::Cyan)));
    }
    if !state.status.is_empty() {
        spans.push(Span::raw(format!(" | {}", state.status)));
    }
    if state.offline {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            "Offline, R to reload",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }
    let widget = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn draw_stories(f: &mut Frame, area: Rect, state: &UiState, model: &RenderModel) {
    let block = Block::default().borders(Borders::ALL).title("Stories");
    let inner = block.inner(area);
    let lines = story_lines(state, model, usize::from(inner.width));
    let overflow = lines.len().saturating_sub(usize::from(inner.height));
    let max = u16::try_from(overflow).unwrap_or(u16::MAX);
    let offset = if model.scroll_to_bottom {
        max.saturating_sub(state.scroll)
    } else {
        state.scroll.min(max)
    };
    let widget = Paragraph::new(lines).block(block).scroll((offset, 0));
    f.render_widget(widget, area);
}

fn story_lines(state: &UiState, model: &RenderModel, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(placeholder) = model.placeholder {
        lines.push(Line::styled(
            placeholder.text(),
            Style::default().fg(Color::DarkGray),
        ));
    }
    for story in &model.stories {
        let marker = if story.is_current { "> " } else { "  " };
        let badge = format!("[{}]", story.badge);
        let room = width.saturating_sub(marker.width() + badge.width() + 1);
        let name_style = if story.is_current {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::raw(marker),
            Span::styled(badge, badge_style(&story.badge)),
            Span::raw(" "),
            Span::styled(fit(&plain_text(&story.name), room), name_style),
        ]));
        for round in &story.rounds {
            match round {
                RoundView::Voting(round) => voting_lines(&mut lines, state, round),
                RoundView::Results(round) => results_lines(&mut lines, round, width),
            }
        }
        if let Some(actions) = &story.actions {
            lines.push(Line::from(vec![
                Span::raw("    "),
                control("n New round", state.is_busy(&actions.new_round)),
                Span::raw(" | "),
                control("e Complete story", false),
                Span::raw(" | "),
                control("s Skip", state.is_busy(&actions.skip)),
            ]));
        }
    }
    lines
}

fn voting_lines(lines: &mut Vec<Line<'static>>, state: &UiState, round: &VotingRound) {
    lines.push(Line::styled(
        format!("    Round {}", round.id),
        Style::default().add_modifier(Modifier::BOLD),
    ));
    let mut cards = vec![Span::raw("    ")];
    for (i, card) in round.cards.iter().enumerate() {
        let mut style = if card.selected {
            Style::default().fg(Color::Black).bg(Color::Green)
        } else if round.disabled || state.is_busy(&card.action) {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        if i == state.card_cursor && !round.disabled && state.mode == Mode::Normal {
            style = style.add_modifier(Modifier::REVERSED);
        }
        cards.push(Span::styled(format!("[{}]", card.label), style));
        cards.push(Span::raw(" "));
    }
    lines.push(Line::from(cards));
    if let Some(hint) = round.observer_hint() {
        lines.push(Line::styled(
            format!("    {hint}"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    if !round.waiting_for.is_empty() {
        lines.push(Line::from(format!(
            "    Waiting for: {}",
            round.waiting_for.iter().map(Waiting::label).join(", ")
        )));
    }
    if let Some(complete) = &round.complete {
        lines.push(Line::from(vec![
            Span::raw("    "),
            control("c Complete round", state.is_busy(complete)),
        ]));
    }
}

fn results_lines(lines: &mut Vec<Line<'static>>, round: &ResultsRound, width: usize) {
    if round.hidden {
        return;
    }
    lines.push(Line::styled(
        format!("    Round {} results", round.id),
        Style::default().fg(Color::Cyan),
    ));
    for bucket in round.buckets.iter().filter(|bucket| !bucket.hidden()) {
        let head = format!("      [{}] x{}  ", bucket.label, bucket.count);
        let voters = bucket.voters.iter().map(|voter| voter.name.as_str()).join(", ");
        let room = width.saturating_sub(head.width());
        lines.push(Line::from(format!("{head}{}", fit(&voters, room))));
    }
}

fn draw_participants(f: &mut Frame, area: Rect, state: &UiState, model: &RenderModel) {
    let focused = state.mode == Mode::Participants;
    let width = usize::from(area.width.saturating_sub(2));
    let mut lines = Vec::new();
    if model.participants.is_empty() {
        lines.push(Line::from("None"));
    }
    for (i, participant) in model.participants.iter().enumerate() {
        let cursor = if focused && i == state.participant_cursor {
            "> "
        } else {
            "  "
        };
        let you = if participant.is_self { " (you)" } else { "" };
        let icon = if participant.observer {
            menu_icon(MenuIcon::Observer)
        } else {
            menu_icon(MenuIcon::Player)
        };
        let head = format!("{cursor}{icon} ");
        let room = width.saturating_sub(head.width() + you.width());
        lines.push(Line::from(vec![
            Span::raw(head),
            Span::raw(fit(&participant.name, room)),
            Span::styled(you, Style::default().fg(Color::DarkGray)),
        ]));
    }
    let border = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title("Participants"),
    );
    f.render_widget(widget, area);
}

fn draw_game_actions(f: &mut Frame, area: Rect, state: &UiState, actions: &GameActions) {
    let mut lines = Vec::new();
    if actions.story_input_disabled {
        lines.push(Line::styled(
            "New story: game completed",
            Style::default().fg(Color::DarkGray),
        ));
    } else {
        let busy = state.in_flight.contains(&actions.new_story.action);
        let caret = if state.mode == Mode::StoryInput { "_" } else { "" };
        lines.push(Line::from(vec![
            Span::raw("New story: "),
            control(&format!("{}{caret}", state.story_input), busy),
        ]));
    }
    let completion = match actions.completion.kind {
        FormKind::ReopenGame => "G Reopen game",
        _ => "g Complete game",
    };
    lines.push(Line::from(control(
        completion,
        state.in_flight.contains(&actions.completion.action),
    )));
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Game"));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect, state: &UiState, model: &RenderModel) {
    let text = match state.mode {
        Mode::Normal => {
            let mut parts = vec!["←/→ card", "Enter/1-9 vote"];
            if model.is_facilitator {
                parts.push("c n s e round/story");
                parts.push("a add story");
            }
            parts.extend(["Tab participants", "R reload", "PgUp/PgDn", "q quit"]);
            format!("{} | [n] {STORY_ESTIMATE_TOOLTIP}", parts.join(" | "))
        }
        Mode::Participants => {
            let mut parts = vec!["↑/↓ select".to_string()];
            if let Some(participant) = state.selected_participant() {
                parts.push(participant.role_tooltip().to_string());
                if let Some(menu) = &participant.menu {
                    for (key, item) in [("o", &menu.toggle), ("d", &menu.delete)] {
                        if let Some(item) = item {
                            parts.push(format!("{key} {} {}", menu_icon(item.icon), item.label));
                        }
                    }
                }
            }
            parts.push("Tab back".to_string());
            parts.join(" | ")
        }
        Mode::StoryInput => "Type a story name | Enter add | Esc back".to_string(),
        Mode::CompleteStory | Mode::QuitModal => "Enter confirm | Esc cancel".to_string(),
    };
    let width = usize::from(area.width.saturating_sub(2));
    let help = Paragraph::new(fit(&text, width))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState, model: &RenderModel) {
    match state.mode {
        Mode::CompleteStory => {
            let Some(actions) = model.current_story().and_then(|s| s.actions.as_ref())
            else {
                return;
            };
            let area = centered_rect(40, 50, f.area());
            let block = Block::default()
                .borders(Borders::ALL)
                .title("Complete story");
            let mut lines = Vec::new();
            for (i, choice) in actions.complete.iter().enumerate() {
                let cur = if i == state.menu_cursor { ">" } else { " " };
                let busy = state.is_busy(&choice.action);
                lines.push(Line::from(vec![
                    Span::raw(format!("{cur} ")),
                    control(&choice.label, busy),
                ]));
            }
            lines.push(Line::from("Enter=complete Esc=cancel ↑/↓ move"));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(Paragraph::new(lines), block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Leave the game? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal | Mode::Participants | Mode::StoryInput => {}
    }
}

fn control(label: &str, busy: bool) -> Span<'static> {
    if busy {
        Span::styled(format!("{label}…"), Style::default().fg(Color::DarkGray))
    } else {
        Span::raw(label.to_string())
    }
}

fn badge_style(badge: &str) -> Style {
    match badge {
        "-" => Style::default(),
        "Skipped" => Style::default().fg(Color::DarkGray),
        _ => Style::default().fg(Color::Green),
    }
}

fn menu_icon(icon: MenuIcon) -> &'static str {
    match icon {
        MenuIcon::Observer => "◎",
        MenuIcon::Player => "♠",
        MenuIcon::Trash => "✗",
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Story and game names may carry markup; show only their text.
fn plain_text(markup: &str) -> String {
    let mut text = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    decode_entities(&text)
}

/// Single pass, so `&amp;lt;` stays `&lt;`. Unknown entities are kept as is.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Cut `text` to at most `width` terminal columns.
fn fit(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
