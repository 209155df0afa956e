use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    environment::{Action, Environment, Step},
    policy::{Observation, Policy},
    render::Renderer,
    reward::RewardMode,
};

/// One line of the action/reward history shown to decision makers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: Action,
    pub reward: f64,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.action, self.reward)
    }
}

/// Summary of a finished (or interrupted) episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub reward_mode: RewardMode,
    pub total_reward: f64,
    /// Every object delivered. A truncated episode is not a success.
    pub success: bool,
    pub steps: usize,
    /// Actions taken, joined with `|`.
    pub actions: String,
}

impl fmt::Display for EpisodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} total_reward={:.2} success={} steps={} actions={}",
            self.reward_mode,
            self.total_reward,
            u8::from(self.success),
            self.steps,
            self.actions
        )
    }
}

/// Bookkeeping for one episode: history, running reward and termination.
///
/// The episode does not own the environment; callers step it through
/// [`Episode::apply`] (an externally chosen action) or [`Episode::advance`]
/// (an action chosen by a policy).
#[derive(Debug, Clone, Default)]
pub struct Episode {
    history: Vec<HistoryEntry>,
    total_reward: f64,
    last_reward: f64,
    done: bool,
}

impl Episode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps the environment with `action` and records the outcome.
    ///
    /// Returns `None` without touching the environment once the episode is over.
    pub fn apply(&mut self, environment: &mut Environment, action: Action) -> Option<Step> {
        if self.done {
            return None;
        }
        let step = environment.step(action);
        self.history.push(HistoryEntry {
            action,
            reward: step.reward,
        });
        self.total_reward += step.reward;
        self.last_reward = step.reward;
        self.done = step.done;
        debug!(
            step = environment.steps(),
            %action,
            reward = step.reward,
            total = self.total_reward,
            "episode step"
        );
        Some(step)
    }

    /// Renders the observation, asks `policy` for an action and applies it.
    pub fn advance(
        &mut self,
        environment: &mut Environment,
        policy: &mut dyn Policy,
        renderer: &Renderer,
    ) -> Option<(Action, Step)> {
        if self.done {
            return None;
        }
        let image = renderer.render(environment);
        let action = policy.choose(&Observation {
            environment,
            image: &image,
            history: &self.history,
            last_reward: self.last_reward,
            total_reward: self.total_reward,
        });
        self.apply(environment, action).map(|step| (action, step))
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }
    pub fn last_reward(&self) -> f64 {
        self.last_reward
    }
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn report(&self, environment: &Environment) -> EpisodeReport {
        EpisodeReport {
            reward_mode: environment.config().reward_mode,
            total_reward: self.total_reward,
            success: environment.all_delivered(),
            steps: self.history.len(),
            actions: self
                .history
                .iter()
                .map(|entry| entry.action.token())
                .collect::<Vec<_>>()
                .join("|"),
        }
    }
}

/// Lets `policy` play from the current state for at most `max_steps` steps,
/// stopping early once the environment reports `done`.
///
/// The driver budget is independent of the environment's own `max_steps`;
/// whichever is hit first ends the run. Callers reset the environment
/// between episodes.
pub fn run_episode(
    environment: &mut Environment,
    policy: &mut dyn Policy,
    renderer: &Renderer,
    max_steps: usize,
) -> (EpisodeReport, Vec<HistoryEntry>) {
    let mut episode = Episode::new();
    while episode.history.len() < max_steps
        && episode.advance(environment, policy, renderer).is_some()
    {}

    let report = episode.report(environment);
    info!(
        policy = policy.name(),
        mode = %report.reward_mode,
        total_reward = report.total_reward,
        success = report.success,
        steps = report.steps,
        "episode finished"
    );
    (report, episode.history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Color, EnvConfig, layout::Layout, policy::GreedyPolicy};

    #[test]
    fn history_entries_read_like_action_arrows() {
        let entry = HistoryEntry {
            action: Action::Drop,
            reward: -5.1,
        };
        assert_eq!(entry.to_string(), "DROP->-5.1");
    }

    #[test]
    fn apply_records_and_stops_at_done() {
        let layout: Layout = "@r R\n. .".parse().unwrap();
        let config = EnvConfig::new(2, vec![Color::Red], 3, RewardMode::Correct);
        let mut environment = Environment::with_layout(config, &layout).unwrap();
        let mut episode = Episode::new();

        assert!(episode.apply(&mut environment, Action::Pick).is_some());
        assert!(episode.apply(&mut environment, Action::Down).is_some());
        let last = episode.apply(&mut environment, Action::Up).unwrap();
        assert!(last.done);
        assert!(episode.is_done());
        assert!(episode.apply(&mut environment, Action::Up).is_none());
        assert_eq!(environment.steps(), 3);

        let report = episode.report(&environment);
        assert_eq!(report.steps, 3);
        assert!(!report.success);
        assert_eq!(report.actions, "PICK|DOWN|UP");
        assert!((report.total_reward + 0.3).abs() < 1e-9);
        assert!((episode.last_reward() + 0.1).abs() < 1e-9);
    }

    #[test]
    fn greedy_episode_delivers_everything() {
        let layout: Layout = "@ r . .\n. . . B\nb . . .\n. R . .".parse().unwrap();
        let config = EnvConfig::new(4, vec![Color::Red, Color::Blue], 40, RewardMode::Correct);
        let mut environment = Environment::with_layout(config, &layout).unwrap();
        let (report, history) = run_episode(
            &mut environment,
            &mut GreedyPolicy::new(),
            &Renderer::default(),
            100,
        );

        assert!(report.success);
        assert_eq!(report.steps, 14);
        assert_eq!(history.len(), 14);
        assert_eq!(
            report.actions,
            "RIGHT|PICK|DOWN|DOWN|DOWN|DROP|UP|LEFT|PICK|UP|RIGHT|RIGHT|RIGHT|DROP"
        );
        // Two deliveries at +10, every step at -0.1.
        assert!((report.total_reward - (20.0 - 1.4)).abs() < 1e-9);
        assert_eq!(history[5].to_string(), "DROP->9.9");
    }

    #[test]
    fn driver_budget_stops_before_the_environment_budget() {
        let layout: Layout = "@ r . .\n. . . B\nb . . .\n. R . .".parse().unwrap();
        let config = EnvConfig::new(4, vec![Color::Red, Color::Blue], 40, RewardMode::Correct);
        let mut environment = Environment::with_layout(config, &layout).unwrap();
        let (report, history) = run_episode(
            &mut environment,
            &mut GreedyPolicy::new(),
            &Renderer::default(),
            6,
        );

        assert_eq!(history.len(), 6);
        assert_eq!(environment.steps(), 6);
        assert!(!environment.is_truncated());
        assert!(!report.success);
        assert_eq!(report.actions, "RIGHT|PICK|DOWN|DOWN|DOWN|DROP");
        assert!((report.total_reward - 9.4).abs() < 1e-9);
    }

    #[test]
    fn environment_budget_stops_before_the_driver_budget() {
        let layout: Layout = "@ r . .\n. . . B\nb . . .\n. R . .".parse().unwrap();
        let config = EnvConfig::new(4, vec![Color::Red, Color::Blue], 3, RewardMode::Correct);
        let mut environment = Environment::with_layout(config, &layout).unwrap();
        let (report, _) = run_episode(
            &mut environment,
            &mut GreedyPolicy::new(),
            &Renderer::default(),
            50,
        );
        assert_eq!(report.steps, 3);
        assert!(environment.is_truncated());
    }
}
