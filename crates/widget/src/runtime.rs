//! Tokio driver for [`TriggerController`].
//!
//! One task owns the controller and the prompt model. Timers, network calls
//! and cart adds run as spawned tasks that report back over the same channel,
//! so controller state is never touched concurrently.

use std::sync::Arc;
use std::time::Duration;

use ravenrock_core::proxy::{RecommendationResponse, WidgetConfigResponse};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{CartClient, ClientError, RecommendationParams, UpsellApi};
use crate::clock::Clock;
use crate::controller::{PageContext, TriggerCommand, TriggerConfig, TriggerController, TriggerState};
use crate::view::{CartFollowUp, PromptModel, PromptView};
use crate::watcher::{SelectionWatcher, WatchTick, POLL_INTERVAL};

pub const CART_PATH: &str = "/cart";

/// Quiet period after the last host notification before the selection is read.
pub const VARIANT_DEBOUNCE: Duration = Duration::from_millis(150);

/// What the widget can read from the hosting storefront page.
pub trait HostPage: Send + Sync {
    fn path(&self) -> String;
    fn shop(&self) -> Option<String>;
    fn current_variant(&self) -> Option<String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WidgetSnapshot {
    pub trigger: TriggerState,
    pub entry_visible: bool,
    pub view: PromptView,
    pub locale: String,
    pub redirect_to_cart: bool,
    pub next_allowed_at_ms: i64,
    /// Navigations the widget requested, in order.
    pub navigations: Vec<String>,
}

enum Message {
    VariantNotified,
    EntryClicked,
    PromptClosed,
    AddToCart(String),
    ResetGating,
    Inspect(oneshot::Sender<WidgetSnapshot>),
    Shutdown,
    TimerFired(u64),
    ConfigLoaded(Result<WidgetConfigResponse, ClientError>),
    RecommendationsLoaded(Result<RecommendationResponse, ClientError>),
    CartAdded(String, Result<(), ClientError>),
}

/// Host-side entry points into a running widget.
#[derive(Clone)]
pub struct WidgetHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl WidgetHandle {
    /// The host saw a change or click on the product form.
    pub fn notify_variant_change(&self) {
        let _ = self.tx.send(Message::VariantNotified);
    }

    pub fn click_entry(&self) {
        let _ = self.tx.send(Message::EntryClicked);
    }

    pub fn close_prompt(&self) {
        let _ = self.tx.send(Message::PromptClosed);
    }

    pub fn add_to_cart(&self, variant_id: impl Into<String>) {
        let _ = self.tx.send(Message::AddToCart(variant_id.into()));
    }

    pub fn reset_gating(&self) {
        let _ = self.tx.send(Message::ResetGating);
    }

    pub async fn snapshot(&self) -> Option<WidgetSnapshot> {
        let (reply, response) = oneshot::channel();
        self.tx.send(Message::Inspect(reply)).ok()?;
        response.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

pub struct WidgetRuntime<C: Clock + 'static> {
    controller: TriggerController<C>,
    api: Arc<dyn UpsellApi>,
    cart: Arc<dyn CartClient>,
    host: Arc<dyn HostPage>,
    model: PromptModel,
    watcher: SelectionWatcher,
    entry_visible: bool,
    navigations: Vec<String>,
    timer: Option<JoinHandle<()>>,
    settle_at: Option<Instant>,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl<C: Clock + 'static> WidgetRuntime<C> {
    pub fn new(
        controller: TriggerController<C>,
        api: Arc<dyn UpsellApi>,
        cart: Arc<dyn CartClient>,
        host: Arc<dyn HostPage>,
    ) -> (Self, WidgetHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = controller.config().clone();
        let watcher = SelectionWatcher::new(host.current_variant().as_deref());
        let runtime = Self {
            controller,
            api,
            cart,
            host,
            model: PromptModel::new(config.locale, config.redirect_to_cart),
            watcher,
            entry_visible: false,
            navigations: Vec::new(),
            timer: None,
            settle_at: None,
            tx: tx.clone(),
            rx,
        };
        (runtime, WidgetHandle { tx })
    }

    /// Boots on the host page and processes events until shutdown. Returns
    /// immediately on cart and checkout pages.
    pub async fn run(mut self) -> WidgetSnapshot {
        let page = PageContext::new(self.host.path());
        let commands = self.controller.boot(page);
        if !self.controller.is_active() {
            return self.snapshot();
        }
        info!(
            event_name = "widget.booted",
            path = %self.controller.page().path,
            state = ?self.controller.state(),
            "widget booted"
        );
        self.execute(commands);
        self.spawn_config_fetch();

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        poll.tick().await;

        loop {
            let polling = self.controller.page().is_product_page() && !self.watcher.is_expired();
            let settle_at = self.settle_at;
            tokio::select! {
                message = self.rx.recv() => match message {
                    None | Some(Message::Shutdown) => break,
                    Some(message) => self.handle(message),
                },
                _ = tokio::time::sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                    self.settle_at = None;
                    if self.watcher.observe(self.host.current_variant().as_deref()) {
                        self.variant_changed();
                    }
                }
                _ = poll.tick(), if polling => {
                    if self.watcher.tick(self.host.current_variant().as_deref()) == WatchTick::Changed {
                        self.variant_changed();
                    }
                }
            }
        }

        self.cancel_timer();
        self.snapshot()
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::VariantNotified => {
                self.settle_at = Some(Instant::now() + VARIANT_DEBOUNCE);
            }
            Message::EntryClicked => {
                let commands = self.controller.open_prompt();
                self.execute(commands);
            }
            Message::PromptClosed => {
                self.model.close();
                let commands = self.controller.close_prompt();
                self.execute(commands);
            }
            Message::AddToCart(variant_id) => self.start_cart_add(variant_id),
            Message::ResetGating => {
                let commands = self.controller.reset_gating();
                self.execute(commands);
            }
            Message::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Message::Shutdown => {}
            Message::TimerFired(generation) => {
                let commands = self.controller.timer_fired(generation);
                self.execute(commands);
            }
            Message::ConfigLoaded(result) => self.config_loaded(result),
            Message::RecommendationsLoaded(result) => self.recommendations_loaded(result),
            Message::CartAdded(variant_id, outcome) => self.cart_added(&variant_id, outcome),
        }
    }

    fn variant_changed(&mut self) {
        debug!(
            event_name = "widget.variant.changed",
            variant = self.watcher.last_seen().unwrap_or("unknown"),
            "variant changed; timer reset"
        );
        let commands = self.controller.mark_selected();
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<TriggerCommand>) {
        for command in commands {
            match command {
                TriggerCommand::CancelTimer => self.cancel_timer(),
                TriggerCommand::ArmTimer { generation, delay } => {
                    self.cancel_timer();
                    let tx = self.tx.clone();
                    self.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Message::TimerFired(generation));
                    }));
                }
                TriggerCommand::ShowEntry => self.entry_visible = true,
                TriggerCommand::OpenPrompt => self.model.open(),
                TriggerCommand::FetchRecommendations { after } => {
                    let api = self.api.clone();
                    let tx = self.tx.clone();
                    let params = self.params();
                    tokio::spawn(async move {
                        if !after.is_zero() {
                            tokio::time::sleep(after).await;
                        }
                        let result = api.recommendations(&params).await;
                        let _ = tx.send(Message::RecommendationsLoaded(result));
                    });
                }
            }
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn params(&self) -> RecommendationParams {
        RecommendationParams {
            shop: self.host.shop(),
            current_variant: self.host.current_variant(),
            product_handle: self.controller.page().product_handle().map(str::to_string),
            limit: None,
        }
    }

    fn spawn_config_fetch(&self) {
        let api = self.api.clone();
        let tx = self.tx.clone();
        let shop = self.host.shop();
        tokio::spawn(async move {
            let result = api.widget_config(shop.as_deref()).await;
            let _ = tx.send(Message::ConfigLoaded(result));
        });
    }

    fn config_loaded(&mut self, result: Result<WidgetConfigResponse, ClientError>) {
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                debug!(event_name = "widget.config.failed", error = %error, "keeping default config");
                return;
            }
        };
        if let Some(error) = response.error.as_deref() {
            debug!(event_name = "widget.config.degraded", error, "proxy served default config");
        }

        let config = TriggerConfig::from_response(&response);
        self.model.locale = config.locale.clone();
        self.model.redirect_to_cart = config.redirect_to_cart;
        let commands = self.controller.apply_config(config);
        self.execute(commands);
    }

    fn recommendations_loaded(&mut self, result: Result<RecommendationResponse, ClientError>) {
        if self.model.view == PromptView::Closed {
            debug!(event_name = "widget.recommendations.discarded", "prompt closed before load");
            return;
        }
        match result {
            Ok(response) => {
                if let Some(error) = response.meta.error.as_deref() {
                    debug!(event_name = "widget.recommendations.degraded", error, "proxy reported error");
                }
                self.model.apply_response(response);
            }
            Err(error) => {
                warn!(event_name = "widget.recommendations.failed", error = %error, "upsell fetch failed");
                self.model.apply_failure(&error);
            }
        }
    }

    fn start_cart_add(&mut self, variant_id: String) {
        if !self.model.begin_add(&variant_id) {
            return;
        }
        let cart = self.cart.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = cart.add(&variant_id, 1).await;
            let _ = tx.send(Message::CartAdded(variant_id, outcome));
        });
    }

    fn cart_added(&mut self, variant_id: &str, outcome: Result<(), ClientError>) {
        if let Err(error) = &outcome {
            warn!(event_name = "widget.cart.add_failed", variant_id, error = %error, "add to cart failed");
        }
        match self.model.finish_add(variant_id, outcome) {
            CartFollowUp::RedirectToCart => self.navigations.push(CART_PATH.to_string()),
            CartFollowUp::RefreshCart => {
                let cart = self.cart.clone();
                tokio::spawn(async move {
                    if let Err(error) = cart.refresh().await {
                        debug!(event_name = "widget.cart.refresh_failed", error = %error, "cart refresh failed");
                    }
                });
            }
            CartFollowUp::Nothing => {}
        }
    }

    fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            trigger: self.controller.state().clone(),
            entry_visible: self.entry_visible,
            view: self.model.view.clone(),
            locale: self.model.locale.clone(),
            redirect_to_cart: self.model.redirect_to_cart,
            next_allowed_at_ms: self.controller.next_allowed_at(),
            navigations: self.navigations.clone(),
        }
    }
}
