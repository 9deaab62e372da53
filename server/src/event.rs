use crate::config::Config;

/// Lifecycle signals consumed by the game coordinator, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// This server was chosen to host a match.
    Allocated(Config),
    /// The match is over. A config, when present, reconfigures the query
    /// endpoint for the idle period.
    Deallocated(Option<Config>),
}

impl Event {
    /// Classifies a freshly loaded config by its allocation id.
    pub fn from_config(config: Config) -> Self {
        if config.is_allocated() {
            Event::Allocated(config)
        } else {
            Event::Deallocated(Some(config))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Allocated(_) => "allocated",
            Event::Deallocated(_) => "deallocated",
        }
    }
}
