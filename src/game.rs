//! Game snapshot as pushed by the server.
//!
//! A [`Game`] is always a complete replacement of the previous one; nothing in
//! here is ever patched in place. Decoding is lenient about the shapes the
//! server has used over time (array or map decks, label or index cards) but
//! strict about structure: anything that does not look like a game fails.

use serde::{
    Deserialize,
    Deserializer,
    Serialize,
};
use std::{
    collections::BTreeMap,
    fmt,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(Scalar::deserialize(deserializer)?.into_string()))
    }
}

/// Story and round identifier. The server sends integers, the bootstrap
/// response keys them as strings; both decode to the same id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

pub type StoryId = Id;
pub type RoundId = Id;

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(Scalar::deserialize(deserializer)?.into_string()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CardIndex(pub usize);

impl fmt::Display for CardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered index -> label mapping. Fixed for the lifetime of a game.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "DeckRepr")]
pub struct Deck {
    cards: Vec<(CardIndex, String)>,
}

impl Deck {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cards: labels
                .into_iter()
                .enumerate()
                .map(|(i, label)| (CardIndex(i), label.into()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CardIndex, &str)> {
        self.cards.iter().map(|(index, label)| (*index, label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn label(&self, index: CardIndex) -> Option<&str> {
        self.cards
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, label)| label.as_str())
    }

    /// Resolve a card reference to an index of this deck, if it names one.
    pub fn resolve(&self, card: &CardRef) -> Option<CardIndex> {
        match card {
            CardRef::Index(index) => {
                let index = CardIndex(usize::try_from(*index).ok()?);
                self.label(index).map(|_| index)
            }
            CardRef::Label(label) => self
                .cards
                .iter()
                .find(|(_, l)| l == label)
                .map(|(index, _)| *index),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeckRepr {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl TryFrom<DeckRepr> for Deck {
    type Error = String;

    fn try_from(repr: DeckRepr) -> Result<Self, Self::Error> {
        match repr {
            DeckRepr::List(labels) => Ok(Deck::new(labels)),
            DeckRepr::Map(map) => {
                let mut cards = map
                    .into_iter()
                    .map(|(key, label)| {
                        key.parse::<usize>()
                            .map(|i| (CardIndex(i), label))
                            .map_err(|_| format!("deck key `{key}` is not a card index"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                cards.sort_by_key(|(index, _)| *index);
                Ok(Deck { cards })
            }
        }
    }
}

/// How an estimate names its card on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CardRef {
    Index(i64),
    Label(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Option<Scalar>")]
pub enum StoryEstimate {
    #[default]
    Unfinished,
    Skipped,
    Points(u64),
    /// Finished on a card whose label is not a number ("?", "1/2", ...).
    Label(String),
}

impl From<Option<Scalar>> for StoryEstimate {
    fn from(value: Option<Scalar>) -> Self {
        match value {
            None => StoryEstimate::Unfinished,
            Some(Scalar::Int(n)) => StoryEstimate::from_int(n),
            Some(Scalar::Text(text)) => match text.trim().parse::<i64>() {
                Ok(n) => StoryEstimate::from_int(n),
                Err(_) => StoryEstimate::Label(text),
            },
        }
    }
}

impl StoryEstimate {
    fn from_int(n: i64) -> Self {
        u64::try_from(n).map_or(StoryEstimate::Skipped, StoryEstimate::Points)
    }

    pub fn is_unfinished(&self) -> bool {
        matches!(self, StoryEstimate::Unfinished)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Estimate {
    pub user: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub photo: Option<String>,
    /// Hidden (`None`) by the server until the round completes.
    #[serde(default)]
    pub card: Option<CardRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub url: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub estimates: Vec<Estimate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub name: String,
    pub url: String,
    #[serde(default, alias = "isCurrent")]
    pub is_current: bool,
    #[serde(default)]
    pub estimate: StoryEstimate,
    #[serde(default)]
    pub rounds: Vec<Round>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Participant {
    pub user: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub photo: Option<String>,
    pub url: String,
    #[serde(default)]
    pub observer: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Game {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// The facilitator.
    pub user: UserId,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, alias = "currentStory", deserialize_with = "story_flag")]
    pub current_story: bool,
    pub deck: Deck,
    #[serde(default)]
    pub stories: Vec<Story>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl Game {
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    pub fn is_facilitator(&self, user: &UserId) -> bool {
        &self.user == user
    }
}

/// `current_story` is either a flag or the story object itself.
fn story_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(flag)) => flag,
        Some(_) => true,
    })
}

/// Response body of the bootstrap request sent once the channel opens.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct OpenedResponse {
    #[serde(default)]
    pub estimates: BTreeMap<RoundId, CardIndex>,
}
