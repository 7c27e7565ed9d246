use crate::phase::DisplayPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DisplayIntent {
    #[default]
    Hidden,
    ShowAdminSurface {
        url: String,
    },
    ShowVotingSurface {
        url: String,
    },
}

impl DisplayIntent {
    pub fn url(&self) -> Option<&str> {
        match self {
            DisplayIntent::Hidden => None,
            DisplayIntent::ShowAdminSurface { url } | DisplayIntent::ShowVotingSurface { url } => {
                Some(url)
            }
        }
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, DisplayIntent::Hidden)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DisplayIntent::Hidden => "hidden",
            DisplayIntent::ShowAdminSurface { .. } => "admin",
            DisplayIntent::ShowVotingSurface { .. } => "voting",
        }
    }
}

pub fn resolve_intent(
    visible: bool,
    policy: DisplayPolicy,
    admin_url: &str,
    voting_url: Option<&str>,
) -> DisplayIntent {
    if !visible {
        return DisplayIntent::Hidden;
    }

    match policy {
        DisplayPolicy::None => DisplayIntent::Hidden,
        DisplayPolicy::Admin => DisplayIntent::ShowAdminSurface {
            url: admin_url.to_string(),
        },
        DisplayPolicy::Voting => match voting_url {
            Some(url) if !url.is_empty() => DisplayIntent::ShowVotingSurface {
                url: url.to_string(),
            },
            // Never embed an empty source.
            _ => DisplayIntent::Hidden,
        },
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedViewCoordinator {
    admin_url: String,
    visible: bool,
    policy: DisplayPolicy,
    voting_url: Option<String>,
}

impl EmbeddedViewCoordinator {
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            admin_url: admin_url.into(),
            visible: false,
            policy: DisplayPolicy::None,
            voting_url: None,
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_policy(&mut self, policy: DisplayPolicy) {
        self.policy = policy;
    }

    pub fn set_voting_url(&mut self, url: impl Into<String>) {
        self.voting_url = Some(url.into());
    }

    pub fn clear_voting_url(&mut self) {
        self.voting_url = None;
    }

    pub fn voting_url(&self) -> Option<&str> {
        self.voting_url.as_deref()
    }

    pub fn intent(&self) -> DisplayIntent {
        resolve_intent(
            self.visible,
            self.policy,
            &self.admin_url,
            self.voting_url.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: &str = "http://127.0.0.1:5000/vote_admin";

    #[test]
    fn hidden_flag_wins_over_policy() {
        for policy in [DisplayPolicy::None, DisplayPolicy::Admin, DisplayPolicy::Voting] {
            assert_eq!(
                resolve_intent(false, policy, ADMIN, Some("http://vote")),
                DisplayIntent::Hidden
            );
        }
    }

    #[test]
    fn admin_policy_uses_fixed_url() {
        assert_eq!(
            resolve_intent(true, DisplayPolicy::Admin, ADMIN, None),
            DisplayIntent::ShowAdminSurface {
                url: ADMIN.to_string()
            }
        );
    }

    #[test]
    fn voting_surface_requires_a_url() {
        assert_eq!(
            resolve_intent(true, DisplayPolicy::Voting, ADMIN, None),
            DisplayIntent::Hidden
        );
        assert_eq!(
            resolve_intent(true, DisplayPolicy::Voting, ADMIN, Some("")),
            DisplayIntent::Hidden
        );
        assert_eq!(
            resolve_intent(true, DisplayPolicy::Voting, ADMIN, Some("http://vote/1")),
            DisplayIntent::ShowVotingSurface {
                url: "http://vote/1".to_string()
            }
        );
    }

    #[test]
    fn coordinator_recomputes_on_every_input() {
        let mut view = EmbeddedViewCoordinator::new(ADMIN);
        assert_eq!(view.intent(), DisplayIntent::Hidden);

        view.set_visible(true);
        view.set_policy(DisplayPolicy::Voting);
        assert_eq!(view.intent(), DisplayIntent::Hidden);

        view.set_voting_url("http://vote/7");
        assert_eq!(view.intent().url(), Some("http://vote/7"));
        assert_eq!(view.intent().kind(), "voting");

        view.set_policy(DisplayPolicy::Admin);
        assert_eq!(view.intent().url(), Some(ADMIN));

        view.set_visible(false);
        assert!(!view.intent().is_visible());
    }
}
