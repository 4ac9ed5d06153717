//! Engagement trigger state machine.
//!
//! The controller performs no IO of its own: every operation updates the
//! gating store and returns the commands a driver must execute. Timer
//! firings carry the generation they were armed with, so a firing from a
//! cancelled timer is recognised and dropped.

use std::time::Duration;

use ravenrock_core::domain::shop::{TriggerType, DEFAULT_TRIGGER_DELAY_SECS};
use ravenrock_core::proxy::{
    WidgetConfigResponse, WidgetDefaults, DEFAULT_FREQUENCY_HOURS, DEFAULT_LOCALE,
    DEFAULT_UPSELL_DELAY_SECS,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::storage::EngagementStore;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub trigger_type: TriggerType,
    pub trigger_delay_secs: u32,
    pub upsell_delay_secs: u32,
    pub auto_open: bool,
    pub frequency_hours: u32,
    pub locale: String,
    pub redirect_to_cart: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            trigger_type: TriggerType::Time,
            trigger_delay_secs: DEFAULT_TRIGGER_DELAY_SECS,
            upsell_delay_secs: DEFAULT_UPSELL_DELAY_SECS,
            auto_open: true,
            frequency_hours: DEFAULT_FREQUENCY_HOURS,
            locale: DEFAULT_LOCALE.to_string(),
            redirect_to_cart: true,
        }
    }
}

impl TriggerConfig {
    pub fn from_defaults(defaults: &WidgetDefaults) -> Self {
        Self {
            upsell_delay_secs: defaults.upsell_delay_secs,
            auto_open: defaults.auto_open,
            frequency_hours: defaults.frequency_hours,
            locale: defaults.default_locale.clone(),
            ..Self::default()
        }
    }

    /// Zero durations in a served config mean "unset" and keep the built-in value.
    pub fn from_response(response: &WidgetConfigResponse) -> Self {
        let fallback = Self::default();
        Self {
            trigger_type: response.trigger_type,
            trigger_delay_secs: non_zero(response.trigger_delay_sec, fallback.trigger_delay_secs),
            upsell_delay_secs: non_zero(response.upsell_delay_sec, fallback.upsell_delay_secs),
            auto_open: response.auto_open,
            frequency_hours: non_zero(response.frequency_hours, fallback.frequency_hours),
            locale: if response.locale.trim().is_empty() {
                fallback.locale
            } else {
                response.locale.clone()
            },
            redirect_to_cart: response.redirect_to_cart,
        }
    }

    fn delay_ms(&self) -> i64 {
        i64::from(non_zero(self.trigger_delay_secs, DEFAULT_TRIGGER_DELAY_SECS)) * 1000
    }

    fn snooze_ms(&self) -> i64 {
        i64::from(non_zero(self.frequency_hours, DEFAULT_FREQUENCY_HOURS)) * HOUR_MS
    }

    fn upsell_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.upsell_delay_secs))
    }
}

fn non_zero(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

/// The storefront page the widget booted on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageContext {
    pub path: String,
}

impl PageContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_product_page(&self) -> bool {
        self.path.starts_with("/products/")
    }

    pub fn is_cart_or_checkout(&self) -> bool {
        self.path.starts_with("/cart")
            || self.path.contains("/checkout")
            || self.path.starts_with("/checkouts/")
    }

    pub fn product_handle(&self) -> Option<&str> {
        self.path
            .strip_prefix("/products/")
            .and_then(|rest| rest.split('/').next())
            .filter(|handle| !handle.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed { base_at_ms: i64, fires_at_ms: i64, generation: u64 },
    Fired,
    Shown,
    Snoozed { until_ms: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerCommand {
    CancelTimer,
    ArmTimer { generation: u64, delay: Duration },
    ShowEntry,
    OpenPrompt,
    FetchRecommendations { after: Duration },
}

pub struct TriggerController<C: Clock> {
    clock: C,
    store: EngagementStore,
    config: TriggerConfig,
    page: PageContext,
    state: TriggerState,
    generation: u64,
    timer_pending: bool,
    disabled: bool,
}

impl<C: Clock> TriggerController<C> {
    pub fn new(clock: C, store: EngagementStore, config: TriggerConfig) -> Self {
        Self {
            clock,
            store,
            config,
            page: PageContext::default(),
            state: TriggerState::Idle,
            generation: 0,
            timer_pending: false,
            disabled: false,
        }
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn store(&self) -> &EngagementStore {
        &self.store
    }

    /// False on cart and checkout pages, where the widget never runs.
    pub fn is_active(&self) -> bool {
        !self.disabled
    }

    pub fn boot(&mut self, page: PageContext) -> Vec<TriggerCommand> {
        self.page = page;
        self.disabled = self.page.is_cart_or_checkout();
        if self.disabled {
            debug!(event_name = "widget.trigger.skipped", path = %self.page.path, "cart or checkout page");
            let commands = self.cancel_pending();
            self.state = TriggerState::Idle;
            return commands;
        }

        if self.page.is_product_page() {
            let now = self.clock.now_ms();
            self.store.mark_product_seen(now);
            self.store.mark_selected(now);
        }
        self.rearm()
    }

    /// Cancels any pending timer and re-evaluates the gating preconditions.
    pub fn rearm(&mut self) -> Vec<TriggerCommand> {
        let mut commands = self.cancel_pending();
        if self.disabled || !self.page.is_product_page() {
            self.state = TriggerState::Idle;
            return commands;
        }

        let now = self.clock.now_ms();
        let next_allowed = self.store.next_allowed_at();
        if now < next_allowed {
            self.state = TriggerState::Snoozed { until_ms: next_allowed };
            return commands;
        }
        if !self.store.seen_product() {
            self.state = TriggerState::Idle;
            return commands;
        }

        let base_at = self.store.selected_at().or_else(|| self.store.first_product_at()).unwrap_or(now);
        let elapsed = now.saturating_sub(base_at);
        let remaining = (self.config.delay_ms() - elapsed).max(0);

        self.generation += 1;
        self.timer_pending = true;
        self.state = TriggerState::Armed {
            base_at_ms: base_at,
            fires_at_ms: now + remaining,
            generation: self.generation,
        };
        debug!(
            event_name = "widget.trigger.armed",
            generation = self.generation,
            base_at_ms = base_at,
            remaining_ms = remaining,
            "trigger armed"
        );
        commands.push(TriggerCommand::ArmTimer {
            generation: self.generation,
            delay: Duration::from_millis(u64::try_from(remaining).unwrap_or(0)),
        });
        commands
    }

    /// A new variant was selected: restart the delay from now.
    pub fn mark_selected(&mut self) -> Vec<TriggerCommand> {
        if self.disabled {
            return Vec::new();
        }
        self.store.mark_selected(self.clock.now_ms());
        self.rearm()
    }

    pub fn timer_fired(&mut self, generation: u64) -> Vec<TriggerCommand> {
        let current = matches!(
            self.state,
            TriggerState::Armed { generation: armed, .. } if armed == generation
        );
        if !current {
            debug!(event_name = "widget.trigger.stale", generation, "ignoring stale timer");
            return Vec::new();
        }
        self.timer_pending = false;

        let next_allowed = self.store.next_allowed_at();
        if self.clock.now_ms() < next_allowed {
            self.state = TriggerState::Snoozed { until_ms: next_allowed };
            return Vec::new();
        }

        self.state = TriggerState::Fired;
        let mut commands = vec![TriggerCommand::ShowEntry];
        if self.config.auto_open {
            commands.extend(self.open_prompt());
        }
        commands
    }

    /// Opening the prompt consumes the frequency cap for this period.
    pub fn open_prompt(&mut self) -> Vec<TriggerCommand> {
        let mut commands = self.snooze();
        self.state = TriggerState::Shown;
        commands.push(TriggerCommand::OpenPrompt);
        commands.push(TriggerCommand::FetchRecommendations { after: self.config.upsell_delay() });
        commands
    }

    pub fn close_prompt(&mut self) -> Vec<TriggerCommand> {
        self.snooze()
    }

    /// Pushes the frequency cap to `now + frequencyHours`, never backwards.
    pub fn snooze(&mut self) -> Vec<TriggerCommand> {
        let commands = self.cancel_pending();
        let until = self.store.advance_next_allowed_at(self.clock.now_ms() + self.config.snooze_ms());
        self.state = TriggerState::Snoozed { until_ms: until };
        commands
    }

    pub fn next_allowed_at(&self) -> i64 {
        self.store.next_allowed_at()
    }

    /// A freshly served config may change the delay, so the trigger re-arms.
    pub fn apply_config(&mut self, config: TriggerConfig) -> Vec<TriggerCommand> {
        self.config = config;
        match self.state {
            TriggerState::Fired | TriggerState::Shown => Vec::new(),
            _ => self.rearm(),
        }
    }

    /// Debug reset: forget the cap and session marks, then boot the page again.
    pub fn reset_gating(&mut self) -> Vec<TriggerCommand> {
        self.store.reset();
        let page = self.page.clone();
        let mut commands = self.cancel_pending();
        commands.extend(self.boot(page));
        commands
    }

    fn cancel_pending(&mut self) -> Vec<TriggerCommand> {
        if std::mem::take(&mut self.timer_pending) {
            vec![TriggerCommand::CancelTimer]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ravenrock_core::domain::shop::TriggerType;
    use ravenrock_core::proxy::{WidgetConfigResponse, WidgetDefaults};

    use super::{PageContext, TriggerCommand, TriggerConfig, TriggerController, TriggerState};
    use crate::clock::{Clock, ManualClock};
    use crate::storage::EngagementStore;

    const T0: i64 = 1_700_000_000_000;
    const HOUR_MS: i64 = 3_600_000;

    fn controller() -> (ManualClock, TriggerController<ManualClock>) {
        let clock = ManualClock::at(T0);
        let controller =
            TriggerController::new(clock.clone(), EngagementStore::in_memory(), TriggerConfig::default());
        (clock, controller)
    }

    fn armed_delay(commands: &[TriggerCommand]) -> Option<(u64, Duration)> {
        commands.iter().find_map(|command| match command {
            TriggerCommand::ArmTimer { generation, delay } => Some((*generation, *delay)),
            _ => None,
        })
    }

    #[test]
    fn product_page_boot_arms_full_delay() {
        let (_, mut controller) = controller();

        let commands = controller.boot(PageContext::new("/products/merino-socks"));

        assert_eq!(armed_delay(&commands), Some((1, Duration::from_secs(20))));
        assert!(controller.store().seen_product());
        assert!(matches!(controller.state(), TriggerState::Armed { fires_at_ms, .. } if *fires_at_ms == T0 + 20_000));
    }

    #[test]
    fn selection_at_ten_seconds_restarts_full_delay() {
        let (clock, mut controller) = controller();
        controller.boot(PageContext::new("/products/merino-socks"));

        clock.advance_ms(10_000);
        let commands = controller.mark_selected();

        assert_eq!(commands[0], TriggerCommand::CancelTimer);
        assert_eq!(armed_delay(&commands), Some((2, Duration::from_secs(20))));
        assert!(matches!(
            controller.state(),
            TriggerState::Armed { base_at_ms, fires_at_ms, .. }
                if *base_at_ms == T0 + 10_000 && *fires_at_ms == T0 + 30_000
        ));
    }

    #[test]
    fn stale_generation_is_ignored() {
        let (clock, mut controller) = controller();
        controller.boot(PageContext::new("/products/merino-socks"));
        clock.advance_ms(10_000);
        controller.mark_selected();

        clock.advance_ms(10_000);
        assert!(controller.timer_fired(1).is_empty());
        assert!(matches!(controller.state(), TriggerState::Armed { generation: 2, .. }));

        clock.advance_ms(10_000);
        let commands = controller.timer_fired(2);
        assert_eq!(commands[0], TriggerCommand::ShowEntry);
    }

    #[test]
    fn firing_with_auto_open_shows_prompt_and_fetches_after_ui_delay() {
        let (clock, mut controller) = controller();
        controller.boot(PageContext::new("/products/merino-socks"));
        clock.advance_ms(20_000);

        let commands = controller.timer_fired(1);

        assert_eq!(
            commands,
            vec![
                TriggerCommand::ShowEntry,
                TriggerCommand::OpenPrompt,
                TriggerCommand::FetchRecommendations { after: Duration::from_secs(2) },
            ]
        );
        assert_eq!(controller.state(), &TriggerState::Shown);
        assert_eq!(controller.next_allowed_at(), T0 + 20_000 + 24 * HOUR_MS);
    }

    #[test]
    fn firing_without_auto_open_only_shows_entry() {
        let (clock, mut controller) = controller();
        controller.apply_config(TriggerConfig { auto_open: false, ..TriggerConfig::default() });
        controller.boot(PageContext::new("/products/merino-socks"));
        clock.advance_ms(20_000);

        assert_eq!(controller.timer_fired(1), vec![TriggerCommand::ShowEntry]);
        assert_eq!(controller.state(), &TriggerState::Fired);
        assert_eq!(controller.next_allowed_at(), 0);
    }

    #[test]
    fn successive_snoozes_are_monotonic() {
        let (clock, mut controller) = controller();
        controller.apply_config(TriggerConfig { frequency_hours: 48, ..TriggerConfig::default() });
        controller.snooze();
        let first = controller.next_allowed_at();

        controller.apply_config(TriggerConfig { frequency_hours: 1, ..TriggerConfig::default() });
        clock.advance_ms(60_000);
        controller.snooze();

        assert_eq!(first, T0 + 48 * HOUR_MS);
        assert!(controller.next_allowed_at() >= first);
    }

    #[test]
    fn snoozed_page_does_not_arm_until_cap_passes() {
        let (clock, mut controller) = controller();
        controller.store().advance_next_allowed_at(T0 + HOUR_MS);

        let commands = controller.boot(PageContext::new("/products/merino-socks"));
        assert!(armed_delay(&commands).is_none());
        assert_eq!(controller.state(), &TriggerState::Snoozed { until_ms: T0 + HOUR_MS });

        clock.advance_ms(HOUR_MS);
        let commands = controller.rearm();
        assert!(armed_delay(&commands).is_some());
    }

    #[test]
    fn elapsed_time_since_selection_shortens_delay() {
        let (clock, mut controller) = controller();
        controller.store().mark_product_seen(T0 - 60_000);
        controller.store().mark_selected(T0 - 15_000);
        controller.page = PageContext::new("/products/beanie");

        let commands = controller.rearm();

        assert_eq!(armed_delay(&commands).map(|(_, delay)| delay), Some(Duration::from_secs(5)));
        clock.advance_ms(30_000);
        let late = controller.rearm();
        assert_eq!(armed_delay(&late).map(|(_, delay)| delay), Some(Duration::ZERO));
    }

    #[test]
    fn boot_is_skipped_on_cart_and_checkout() {
        for path in ["/cart", "/cart/change", "/checkouts/abc", "/72/checkout"] {
            let (_, mut controller) = controller();

            assert!(controller.boot(PageContext::new(path)).is_empty(), "{path}");
            assert!(!controller.is_active());
            assert!(controller.mark_selected().is_empty());
            assert!(!controller.store().seen_product());
        }
    }

    #[test]
    fn non_product_pages_stay_idle() {
        let (_, mut controller) = controller();
        controller.store().mark_product_seen(T0);

        assert!(controller.boot(PageContext::new("/collections/winter")).is_empty());
        assert_eq!(controller.state(), &TriggerState::Idle);
    }

    #[test]
    fn close_prompt_snoozes() {
        let (clock, mut controller) = controller();
        controller.boot(PageContext::new("/products/merino-socks"));
        clock.advance_ms(5_000);

        let commands = controller.close_prompt();

        assert_eq!(commands, vec![TriggerCommand::CancelTimer]);
        assert_eq!(controller.state(), &TriggerState::Snoozed { until_ms: T0 + 5_000 + 24 * HOUR_MS });
        assert!(controller.timer_fired(1).is_empty());
    }

    #[test]
    fn config_load_rearms_with_new_delay() {
        let (clock, mut controller) = controller();
        controller.boot(PageContext::new("/products/merino-socks"));
        clock.advance_ms(4_000);

        let response = WidgetConfigResponse {
            trigger_delay_sec: 10,
            frequency_hours: 0,
            ..WidgetConfigResponse::default()
        };
        let config = TriggerConfig::from_response(&response);
        let commands = controller.apply_config(config.clone());

        assert_eq!(config.frequency_hours, 24);
        assert_eq!(config.trigger_type, TriggerType::Time);
        assert_eq!(commands[0], TriggerCommand::CancelTimer);
        assert_eq!(armed_delay(&commands), Some((2, Duration::from_secs(6))));
    }

    #[test]
    fn reset_gating_clears_cap_and_rearms() {
        let (clock, mut controller) = controller();
        controller.boot(PageContext::new("/products/merino-socks"));
        controller.snooze();
        clock.advance_ms(1_000);

        let commands = controller.reset_gating();

        assert_eq!(armed_delay(&commands), Some((2, Duration::from_secs(20))));
        assert_eq!(controller.store().first_product_at(), Some(clock.now_ms()));
    }

    #[test]
    fn defaults_follow_configured_widget_section() {
        let config = TriggerConfig::from_defaults(&WidgetDefaults {
            frequency_hours: 12,
            upsell_delay_secs: 3,
            auto_open: false,
            default_locale: "nl".to_string(),
        });

        assert_eq!(config.trigger_delay_secs, 20);
        assert_eq!(config.frequency_hours, 12);
        assert!(!config.auto_open);
        assert_eq!(config.locale, "nl");
    }

    #[test]
    fn product_handle_comes_from_path() {
        assert_eq!(PageContext::new("/products/cable-beanie/").product_handle(), Some("cable-beanie"));
        assert_eq!(PageContext::new("/collections/all").product_handle(), None);
    }
}
