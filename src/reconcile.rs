//! Snapshot + pending votes -> everything the board shows.
//!
//! [`reconcile`] is a pure function: it reads the snapshot, the pending cache
//! and the viewer id, and builds a fresh [`RenderModel`] every time. Nothing is
//! carried over from a previous model.

use crate::{
    dispatch::{
        Action,
        Form,
    },
    game::{
        CardIndex,
        Deck,
        Game,
        Participant,
        Round,
        RoundId,
        Story,
        StoryEstimate,
        StoryId,
        UserId,
    },
    pending::PendingEstimates,
};
use std::collections::HashMap;


pub const STORY_ESTIMATE_TOOLTIP: &str = "Story estimate";
pub const OBSERVER_HINT: &str = "You can only observe";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placeholder {
    AddStory,
    WaitForStory,
}

impl Placeholder {
    pub fn text(self) -> &'static str {
        match self {
            Placeholder::AddStory => "Shall we play a game? Add a story!",
            Placeholder::WaitForStory => {
                "No stories? Just wait. There will be a story to estimate!"
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderModel {
    pub viewer: UserId,
    pub is_facilitator: bool,
    pub game_name: Option<String>,
    pub completed: bool,
    pub stories: Vec<StoryView>,
    pub placeholder: Option<Placeholder>,
    pub sum_of_estimates: u64,
    /// Keep the newest round in view after redrawing.
    pub scroll_to_bottom: bool,
    pub game_actions: Option<GameActions>,
    pub participants: Vec<ParticipantView>,
}

impl RenderModel {
    /// The round currently open for voting, if any.
    pub fn voting_round(&self) -> Option<&VotingRound> {
        self.current_story()?
            .rounds
            .iter()
            .rev()
            .find_map(|round| match round {
                RoundView::Voting(voting) => Some(voting),
                RoundView::Results(_) => None,
            })
    }

    pub fn current_story(&self) -> Option<&StoryView> {
        self.stories.iter().find(|story| story.is_current)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryView {
    pub id: StoryId,
    /// As sent by the server, may contain markup.
    pub name: String,
    pub badge: String,
    pub is_current: bool,
    pub rounds: Vec<RoundView>,
    pub actions: Option<StoryActions>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryActions {
    pub new_round: Action,
    pub complete: Vec<CardChoice>,
    pub skip: Action,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardChoice {
    pub card: CardIndex,
    pub label: String,
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundView {
    Voting(VotingRound),
    Results(ResultsRound),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VotingRound {
    pub id: RoundId,
    pub my_estimate: Option<CardIndex>,
    pub is_observer: bool,
    /// Voted or observing: card buttons are inert.
    pub disabled: bool,
    pub cards: Vec<CardButton>,
    pub complete: Option<Action>,
    pub waiting_for: Vec<Waiting>,
}

impl VotingRound {
    pub fn observer_hint(&self) -> Option<&'static str> {
        self.is_observer.then_some(OBSERVER_HINT)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardButton {
    pub card: CardIndex,
    pub label: String,
    pub selected: bool,
    pub action: Action,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Waiting {
    You,
    Participant { user: UserId, name: String },
}

impl Waiting {
    pub fn label(&self) -> &str {
        match self {
            Waiting::You => "You!",
            Waiting::Participant { name, .. } => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultsRound {
    pub id: RoundId,
    /// No estimates at all, most likely skipped.
    pub hidden: bool,
    pub buckets: Vec<ResultBucket>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultBucket {
    pub card: CardIndex,
    pub label: String,
    pub voters: Vec<Voter>,
    pub count: usize,
}

impl ResultBucket {
    pub fn hidden(&self) -> bool {
        self.count == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Voter {
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameActions {
    /// A story is being estimated; the panel steps aside.
    pub hidden: bool,
    pub new_story: Form,
    pub story_input_disabled: bool,
    pub request_focus: bool,
    pub completion: Form,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantView {
    pub user: UserId,
    pub name: String,
    pub photo: Option<String>,
    pub observer: bool,
    pub is_self: bool,
    pub menu: Option<ParticipantMenu>,
}

impl ParticipantView {
    pub fn role_tooltip(&self) -> &'static str {
        if self.observer {
            "Game observer"
        } else {
            "Game player"
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantMenu {
    pub toggle: Option<MenuItem>,
    pub delete: Option<MenuItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuIcon {
    Observer,
    Player,
    Trash,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuItem {
    pub label: &'static str,
    pub icon: MenuIcon,
    pub action: Action,
}

pub fn reconcile(game: &Game, pending: &PendingEstimates, viewer: &UserId) -> RenderModel {
    let pass = Pass::new(game, pending, viewer);

    let stories: Vec<StoryView> = game.stories.iter().map(|s| pass.story(s)).collect();
    let sum_of_estimates = game
        .stories
        .iter()
        .filter_map(|story| match story.estimate {
            StoryEstimate::Points(points) if points > 0 => Some(points),
            _ => None,
        })
        .sum();
    let placeholder = game.stories.is_empty().then(|| {
        if pass.is_facilitator {
            Placeholder::AddStory
        } else {
            Placeholder::WaitForStory
        }
    });

    RenderModel {
        viewer: viewer.clone(),
        is_facilitator: pass.is_facilitator,
        game_name: game.name.clone(),
        completed: game.completed,
        stories,
        placeholder,
        sum_of_estimates,
        scroll_to_bottom: !game.completed,
        game_actions: pass.game_actions(),
        participants: game.participants.iter().map(|p| pass.participant(p)).collect(),
    }
}

pub fn badge_text(estimate: &StoryEstimate) -> String {
    match estimate {
        StoryEstimate::Unfinished => "-".to_string(),
        StoryEstimate::Skipped => "Skipped".to_string(),
        StoryEstimate::Points(points) => points.to_string(),
        StoryEstimate::Label(label) => label.clone(),
    }
}

/// Lookups shared by one reconciliation pass.
struct Pass<'a> {
    game: &'a Game,
    pending: &'a PendingEstimates,
    viewer: &'a UserId,
    is_facilitator: bool,
    participants: HashMap<&'a UserId, &'a Participant>,
}

impl<'a> Pass<'a> {
    fn new(game: &'a Game, pending: &'a PendingEstimates, viewer: &'a UserId) -> Self {
        Self {
            game,
            pending,
            viewer,
            is_facilitator: game.is_facilitator(viewer),
            participants: game.participants.iter().map(|p| (&p.user, p)).collect(),
        }
    }

    fn deck(&self) -> &'a Deck {
        &self.game.deck
    }

    fn story(&self, story: &Story) -> StoryView {
        let rounds = if story.is_current && story.estimate.is_unfinished() {
            story.rounds.iter().map(|round| self.round(round)).collect()
        } else {
            Vec::new()
        };
        let actions = (self.is_facilitator && story.is_current).then(|| StoryActions {
            new_round: Action::NewRound {
                story_url: story.url.clone(),
            },
            complete: self
                .deck()
                .iter()
                .map(|(card, label)| CardChoice {
                    card,
                    label: label.to_string(),
                    action: Action::CompleteStory {
                        story_url: story.url.clone(),
                        card,
                    },
                })
                .collect(),
            skip: Action::SkipStory {
                story_url: story.url.clone(),
            },
        });
        StoryView {
            id: story.id.clone(),
            name: story.name.clone(),
            badge: badge_text(&story.estimate),
            is_current: story.is_current,
            rounds,
            actions,
        }
    }

    fn round(&self, round: &Round) -> RoundView {
        if round.completed {
            RoundView::Results(self.results(round))
        } else {
            RoundView::Voting(self.voting(round))
        }
    }

    fn voting(&self, round: &Round) -> VotingRound {
        let confirmed = round
            .estimates
            .iter()
            .find(|estimate| &estimate.user == self.viewer)
            .and_then(|estimate| estimate.card.as_ref())
            .and_then(|card| self.deck().resolve(card));
        let my_estimate = confirmed.or_else(|| self.pending.get(&round.id));
        let is_observer = self
            .participants
            .get(self.viewer)
            .is_some_and(|participant| participant.observer);

        let cards = self
            .deck()
            .iter()
            .map(|(card, label)| CardButton {
                card,
                label: label.to_string(),
                selected: my_estimate == Some(card),
                action: Action::Estimate {
                    round_url: round.url.clone(),
                    card,
                },
            })
            .collect();

        // Only confirmed estimates count here; a pending vote still waits.
        let waiting_for = self
            .game
            .participants
            .iter()
            .filter(|participant| !participant.observer)
            .filter(|participant| {
                !round
                    .estimates
                    .iter()
                    .any(|estimate| estimate.user == participant.user)
            })
            .map(|participant| {
                if &participant.user == self.viewer {
                    Waiting::You
                } else {
                    Waiting::Participant {
                        user: participant.user.clone(),
                        name: participant.name.clone(),
                    }
                }
            })
            .collect();

        VotingRound {
            id: round.id.clone(),
            my_estimate,
            is_observer,
            disabled: my_estimate.is_some() || is_observer,
            cards,
            complete: self.is_facilitator.then(|| Action::CompleteRound {
                round_url: round.url.clone(),
            }),
            waiting_for,
        }
    }

    fn results(&self, round: &Round) -> ResultsRound {
        let mut buckets: Vec<ResultBucket> = self
            .deck()
            .iter()
            .map(|(card, label)| ResultBucket {
                card,
                label: label.to_string(),
                voters: Vec::new(),
                count: 0,
            })
            .collect();

        for estimate in &round.estimates {
            let Some(card) = estimate
                .card
                .as_ref()
                .and_then(|card| self.deck().resolve(card))
            else {
                continue;
            };
            let Some(bucket) = buckets.iter_mut().find(|bucket| bucket.card == card) else {
                continue;
            };
            let voter = match self.participants.get(&estimate.user) {
                Some(participant) => Voter {
                    name: participant.name.clone(),
                    photo: participant.photo.clone(),
                },
                None => Voter {
                    name: estimate.name.clone(),
                    photo: estimate.photo.clone(),
                },
            };
            bucket.voters.push(voter);
            bucket.count += 1;
        }

        ResultsRound {
            id: round.id.clone(),
            hidden: round.estimates.is_empty(),
            buckets,
        }
    }

    fn game_actions(&self) -> Option<GameActions> {
        if !self.is_facilitator {
            return None;
        }
        let game_url = self.game.url.as_deref()?;
        let completion = if self.game.completed {
            Form::reopen_game(game_url)
        } else {
            Form::complete_game(game_url)
        };
        Some(GameActions {
            hidden: self.game.current_story,
            new_story: Form::new_story(game_url),
            story_input_disabled: self.game.completed,
            request_focus: !self.game.completed,
            completion,
        })
    }

    fn participant(&self, participant: &Participant) -> ParticipantView {
        let owns_game = participant.user == self.game.user;
        let menu = (self.is_facilitator && !owns_game).then(|| {
            let toggle = if participant.observer {
                MenuItem {
                    label: "Make game player",
                    icon: MenuIcon::Player,
                    action: Action::MakePlayer {
                        participant_url: participant.url.clone(),
                    },
                }
            } else {
                MenuItem {
                    label: "Make game observer",
                    icon: MenuIcon::Observer,
                    action: Action::MakeObserver {
                        participant_url: participant.url.clone(),
                    },
                }
            };
            ParticipantMenu {
                toggle: Some(toggle),
                delete: Some(MenuItem {
                    label: "Delete participant",
                    icon: MenuIcon::Trash,
                    action: Action::DeleteParticipant {
                        participant_url: participant.url.clone(),
                    },
                }),
            }
        });
        ParticipantView {
            user: participant.user.clone(),
            name: participant.name.clone(),
            photo: participant.photo.clone(),
            observer: participant.observer,
            is_self: &participant.user == self.viewer,
            menu,
        }
    }
}
