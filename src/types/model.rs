use std::fmt;
use serde::{Serialize, Deserialize};

/// Model identifier sent with every conversation request.
///
/// The service exposes one model per account tier, plus a separate model used
/// for generating conversation titles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    /// Chat model for free accounts.
    #[serde(rename = "text-davinci-002-render-sha")]
    RenderSha,

    /// Chat model for paid accounts.
    #[serde(rename = "text-davinci-002-render-paid")]
    RenderPaid,

    /// Model used for title generation.
    #[serde(rename = "text-davinci-002-render")]
    Render,
}

impl Model {
    /// The chat model for the account tier.
    pub fn for_tier(paid: bool) -> Self {
        if paid {
            Model::RenderPaid
        } else {
            Model::RenderSha
        }
    }

    /// The model used to generate conversation titles.
    pub fn title() -> Self {
        Model::Render
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::RenderSha => write!(f, "text-davinci-002-render-sha"),
            Model::RenderPaid => write!(f, "text-davinci-002-render-paid"),
            Model::Render => write!(f, "text-davinci-002-render"),
        }
    }
}
