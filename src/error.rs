//! Error taxonomy shared by the fetch, cache, resolve and render layers.

use thiserror::Error;

use crate::assets::Asset;

#[derive(Debug, Error)]
pub enum Error {
    #[error("account {0} not found")]
    AccountNotFound(u64),

    #[error("account {0} keeps its data private")]
    DataPrivate(u64),

    #[error("no character matches `{query}`")]
    UnknownCharacter {
        query: String,
        /// closest canonical names, may be empty
        suggestions: Vec<String>,
    },

    #[error("several characters match: {}", .0.join(", "))]
    AmbiguousCharacter(Vec<String>),

    #[error("account {uid} does not have {name}")]
    CharacterNotOwned { uid: u64, name: String },

    #[error("fetching {url} failed after {attempts} attempts")]
    FetchFailed {
        url: String,
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("upstream returned {retcode}: {message}")]
    Api { retcode: i64, message: String },

    #[error("{0} still missing after retries")]
    AssetMissingAfterRetries(Asset),

    #[error("no image matches that filter")]
    NoSetu,

    #[error("no game credentials configured")]
    NoCredentials,

    #[error("credential #{0} carries no ltuid")]
    BadCredential(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("png encoding failed: {0}")]
    Png(#[from] oxipng::PngError),

    #[error("render worker died: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("render pool closed")]
    RenderPool(#[from] tokio::sync::AcquireError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Generic line for everything that is the bot's fault, not the user's.
pub const QUERY_FAILED: &str = "query failed, try again later.";

impl Error {
    /// Errors caused by what the user typed or asked for, as opposed to the
    /// bot or upstream breaking.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_)
                | Self::DataPrivate(_)
                | Self::UnknownCharacter { .. }
                | Self::AmbiguousCharacter(_)
                | Self::CharacterNotOwned { .. }
                | Self::NoSetu
        )
    }

    /// The single chat line shown for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::AccountNotFound(uid) => format!("no such user: **{uid}**."),
            Self::DataPrivate(uid) => format!("**{uid}** keeps their secrets to themselves."),
            Self::UnknownCharacter { query, suggestions } if suggestions.is_empty() => {
                format!("there is no **{query}**, check the character name.")
            }
            Self::UnknownCharacter { query, suggestions } => format!(
                "there is no **{query}**, did you mean **{}**?",
                suggestions.join("**, **")
            ),
            Self::AmbiguousCharacter(names) => format!(
                "several characters match, which one: **{}**?",
                names.join("**, **")
            ),
            Self::CharacterNotOwned { uid, name } => format!("user **{uid}** does not have **{name}**."),
            Self::NoSetu => "no such picture. that filter is a bit much.".to_string(),
            _ => QUERY_FAILED.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_lists_exactly_the_candidates() {
        let e = Error::AmbiguousCharacter(vec!["Name A".into(), "Name B".into()]);
        assert_eq!(e.user_message(), "several characters match, which one: **Name A**, **Name B**?");
        assert!(e.is_user_facing());
    }

    #[test]
    fn transient_errors_get_the_generic_line() {
        let e = Error::FetchFailed {
            url: "https://x".into(),
            attempts: 3,
            source: anyhow::anyhow!("502"),
        };
        assert!(!e.is_user_facing());
        assert_eq!(e.user_message(), QUERY_FAILED);
        let e = Error::Api {
            retcode: -1,
            message: "busy".into(),
        };
        assert_eq!(e.user_message(), QUERY_FAILED);
    }

    #[test]
    fn terminal_account_states_are_distinct() {
        assert_ne!(
            Error::AccountNotFound(1).user_message(),
            Error::DataPrivate(1).user_message()
        );
        assert!(!Error::AccountNotFound(1).user_message().contains("try again"));
    }
}
