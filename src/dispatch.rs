//! Outbound user actions.
//!
//! Every action is fire-and-forget: the request is spawned, its response is
//! only used to tell the loop that the triggering control may be re-enabled.
//! The true outcome shows up in the next snapshot.

use crate::game::CardIndex;
use reqwest::Method;
use tokio::sync::mpsc;
use tracing::{
    debug,
    warn,
};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormKind {
    NewStory,
    CompleteGame,
    ReopenGame,
}

/// A form as the server declares it: where it goes, how, and with which fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Form {
    pub kind: FormKind,
    pub method: Method,
    pub action: String,
    pub fields: Vec<(String, String)>,
}

impl Form {
    pub fn new_story(game_url: &str) -> Self {
        Self {
            kind: FormKind::NewStory,
            method: Method::POST,
            action: format!("{game_url}/story"),
            fields: vec![("name".to_string(), String::new())],
        }
    }

    pub fn complete_game(game_url: &str) -> Self {
        Self {
            kind: FormKind::CompleteGame,
            method: Method::POST,
            action: format!("{game_url}/complete"),
            fields: Vec::new(),
        }
    }

    pub fn reopen_game(game_url: &str) -> Self {
        Self {
            kind: FormKind::ReopenGame,
            method: Method::POST,
            action: format!("{game_url}/reopen"),
            fields: Vec::new(),
        }
    }

    /// Fill in a field, adding it if the form did not declare it.
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Estimate { round_url: String, card: CardIndex },
    CompleteRound { round_url: String },
    NewRound { story_url: String },
    CompleteStory { story_url: String, card: CardIndex },
    SkipStory { story_url: String },
    MakeObserver { participant_url: String },
    MakePlayer { participant_url: String },
    DeleteParticipant { participant_url: String },
    Submit(Form),
}

/// What actually goes over the wire for an [`Action`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionRequest {
    pub method: Method,
    pub url: String,
    pub fields: Vec<(String, String)>,
}

impl Action {
    /// Server-relative target. Also identifies the control that triggered the
    /// action while its request is in flight.
    pub fn url(&self) -> String {
        match self {
            Action::Estimate { round_url, card } => {
                format!("{round_url}/estimate?card={card}")
            }
            Action::CompleteRound { round_url } => format!("{round_url}/complete"),
            Action::NewRound { story_url } => format!("{story_url}/round"),
            Action::CompleteStory { story_url, card } => {
                format!("{story_url}/complete?card={card}")
            }
            Action::SkipStory { story_url } => format!("{story_url}/skip"),
            Action::MakeObserver { participant_url } => {
                format!("{participant_url}/observer")
            }
            Action::MakePlayer { participant_url } => format!("{participant_url}/player"),
            Action::DeleteParticipant { participant_url } => {
                format!("{participant_url}/delete")
            }
            Action::Submit(form) => form.action.clone(),
        }
    }

    /// Links are always posted, whatever method they declare. Forms keep theirs.
    pub fn request(&self) -> ActionRequest {
        match self {
            Action::Submit(form) => ActionRequest {
                method: form.method.clone(),
                url: form.action.clone(),
                fields: form.fields.clone(),
            },
            other => ActionRequest {
                method: Method::POST,
                url: other.url(),
                fields: Vec::new(),
            },
        }
    }

    pub fn is_form(&self) -> bool {
        matches!(self, Action::Submit(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The [`Action::url`] of the finished action.
    pub control: String,
    pub ok: bool,
    /// Form submissions clear their inputs once done, success or not.
    pub clear_form: bool,
}

#[derive(Clone)]
pub struct ActionDispatcher {
    base_url: Url,
    http: reqwest::Client,
    outcomes: mpsc::UnboundedSender<DispatchOutcome>,
}

impl ActionDispatcher {
    pub fn new(
        base_url: Url,
        http: reqwest::Client,
        outcomes: mpsc::UnboundedSender<DispatchOutcome>,
    ) -> Self {
        Self {
            base_url,
            http,
            outcomes,
        }
    }

    /// Spawn the request and return immediately. An outcome is always
    /// reported, so the control is never left disabled.
    pub fn dispatch(&self, action: Action) {
        let control = action.url();
        let clear_form = action.is_form();
        let request = action.request();
        let base_url = self.base_url.clone();
        let http = self.http.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let ok = match send(&http, &base_url, &request).await {
                Ok(()) => {
                    debug!(url = %request.url, "action accepted");
                    true
                }
                Err(err) => {
                    warn!(url = %request.url, error = %err, "action request failed");
                    false
                }
            };
            let _ = outcomes.send(DispatchOutcome {
                control,
                ok,
                clear_form,
            });
        });
    }
}

async fn send(
    http: &reqwest::Client,
    base_url: &Url,
    request: &ActionRequest,
) -> Result<(), reqwest::Error> {
    let url = resolve(base_url, &request.url);
    let mut builder = http.request(request.method.clone(), url);
    if !request.fields.is_empty() {
        builder = if request.method == Method::GET {
            builder.query(&request.fields)
        } else {
            builder.form(&request.fields)
        };
    }
    builder.send().await?.error_for_status()?;
    Ok(())
}

/// Server URLs are usually absolute paths; anything that fails to join is
/// passed through as is and left for the HTTP client to reject.
pub fn resolve(base_url: &Url, target: &str) -> String {
    base_url
        .join(target)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| target.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn request__builds_link_urls_from_resource_urls() {
        let round = "/game/1/story/2/round/3".to_string();
        let story = "/game/1/story/2".to_string();
        let participant = "/game/1/participant/9".to_string();
        let cases = [
            (
                Action::Estimate {
                    round_url: round.clone(),
                    card: CardIndex(4),
                },
                "/game/1/story/2/round/3/estimate?card=4",
            ),
            (
                Action::CompleteRound {
                    round_url: round.clone(),
                },
                "/game/1/story/2/round/3/complete",
            ),
            (
                Action::NewRound {
                    story_url: story.clone(),
                },
                "/game/1/story/2/round",
            ),
            (
                Action::CompleteStory {
                    story_url: story.clone(),
                    card: CardIndex(0),
                },
                "/game/1/story/2/complete?card=0",
            ),
            (
                Action::SkipStory {
                    story_url: story.clone(),
                },
                "/game/1/story/2/skip",
            ),
            (
                Action::MakeObserver {
                    participant_url: participant.clone(),
                },
                "/game/1/participant/9/observer",
            ),
            (
                Action::MakePlayer {
                    participant_url: participant.clone(),
                },
                "/game/1/participant/9/player",
            ),
            (
                Action::DeleteParticipant {
                    participant_url: participant.clone(),
                },
                "/game/1/participant/9/delete",
            ),
        ];

        for (action, expected) in cases {
            let request = action.request();
            assert_eq!(request.url, expected);
            assert_eq!(request.method, Method::POST);
            assert!(request.fields.is_empty());
        }
    }

    #[test]
    fn request__submits_forms_to_declared_action_with_fields() {
        // given
        let form = Form::new_story("/game/1").with_field("name", "Checkout flow");

        // when
        let request = Action::Submit(form).request();

        // then
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "/game/1/story");
        assert_eq!(
            request.fields,
            vec![("name".to_string(), "Checkout flow".to_string())]
        );
    }

    #[test]
    fn resolve__joins_absolute_paths_onto_server_url() {
        let base = Url::parse("https://poker.example.com/app/").unwrap();
        assert_eq!(
            resolve(&base, "/game/1/story"),
            "https://poker.example.com/game/1/story"
        );
        assert_eq!(
            resolve(&base, "https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[tokio::test]
    async fn dispatch__reports_outcome_even_when_request_fails() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let dispatcher = ActionDispatcher::new(base, reqwest::Client::new(), tx);
        let action = Action::Submit(Form::complete_game("/game/1"));

        // when
        dispatcher.dispatch(action);
        let outcome = rx.recv().await.unwrap();

        // then
        assert_eq!(outcome.control, "/game/1/complete");
        assert!(!outcome.ok);
        assert!(outcome.clear_form);
    }
}
