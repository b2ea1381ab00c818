use serde::{Deserialize, Serialize};

pub const DEFAULT_RATE_PER_MINUTE: u32 = 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Scale,
}

/// Routing information for one tenant secret.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TenantRoute {
    pub secret_id: String,
    pub destination_url: String,
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: u32,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Bearer token for the identifier normalization API, if the tenant has one.
    #[serde(default)]
    pub conversion_token: Option<String>,
}

fn default_rate_per_minute() -> u32 {
    DEFAULT_RATE_PER_MINUTE
}

fn default_active() -> bool {
    true
}

impl TenantRoute {
    /// An active route on the free plan with the default rate.
    pub fn new<S, D>(secret_id: S, destination_url: D) -> Self
    where
        S: Into<String>,
        D: Into<String>,
    {
        TenantRoute {
            secret_id: secret_id.into(),
            destination_url: destination_url.into(),
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            plan: Plan::Free,
            active: true,
            conversion_token: None,
        }
    }

    /// A route can only be relayed to when it is active and has a destination.
    pub fn is_usable(&self) -> bool {
        self.active && !self.destination_url.trim().is_empty()
    }

    /// Replaces a zero rate with the default one.
    pub fn normalized(mut self) -> Self {
        if self.rate_per_minute == 0 {
            self.rate_per_minute = DEFAULT_RATE_PER_MINUTE;
        }
        self
    }

    pub fn conversion_token(&self) -> Option<&str> {
        self.conversion_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}
