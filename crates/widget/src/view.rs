//! What the prompt shows. Cart outcomes only ever touch this state.

use ravenrock_core::domain::variant::ReasonKey;
use ravenrock_core::proxy::{RecommendationItem, RecommendationResponse};

use crate::client::ClientError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemStatus {
    Ready,
    Adding,
    Added,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemView {
    pub item: RecommendationItem,
    /// Translation key for the card's reason line.
    pub reason_label: &'static str,
    pub status: ItemStatus,
}

impl ItemView {
    fn ready(item: RecommendationItem) -> Self {
        Self { reason_label: reason_label_key(item.reason_key), item, status: ItemStatus::Ready }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PromptView {
    #[default]
    Closed,
    Loading,
    Items(Vec<ItemView>),
    Empty,
    LoadFailed(String),
}

/// Follow-up after a successful cart add.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CartFollowUp {
    RedirectToCart,
    RefreshCart,
    Nothing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptModel {
    pub view: PromptView,
    pub locale: String,
    pub redirect_to_cart: bool,
}

impl PromptModel {
    pub fn new(locale: impl Into<String>, redirect_to_cart: bool) -> Self {
        Self { view: PromptView::Closed, locale: locale.into(), redirect_to_cart }
    }

    pub fn open(&mut self) {
        self.view = PromptView::Loading;
    }

    pub fn close(&mut self) {
        self.view = PromptView::Closed;
    }

    /// A response's locale and `redirectToCart` override the config values.
    pub fn apply_response(&mut self, response: RecommendationResponse) {
        if !response.locale.trim().is_empty() {
            self.locale = response.locale;
        }
        if let Some(redirect) = response.meta.redirect_to_cart {
            self.redirect_to_cart = redirect;
        }
        self.view = if response.items.is_empty() {
            PromptView::Empty
        } else {
            PromptView::Items(
                response
                    .items
                    .into_iter()
                    .map(ItemView::ready)
                    .collect(),
            )
        };
    }

    pub fn apply_failure(&mut self, error: &ClientError) {
        self.view = PromptView::LoadFailed(error.to_string());
    }

    /// Marks the item as adding. Returns false when the item is unknown or
    /// already in flight or added.
    pub fn begin_add(&mut self, variant_id: &str) -> bool {
        match self.item_mut(variant_id) {
            Some(view) if matches!(view.status, ItemStatus::Ready | ItemStatus::Failed(_)) => {
                view.status = ItemStatus::Adding;
                true
            }
            _ => false,
        }
    }

    pub fn finish_add(&mut self, variant_id: &str, outcome: Result<(), ClientError>) -> CartFollowUp {
        let redirect = self.redirect_to_cart;
        let Some(view) = self.item_mut(variant_id) else {
            return CartFollowUp::Nothing;
        };
        match outcome {
            Ok(()) => {
                view.status = ItemStatus::Added;
                if redirect {
                    CartFollowUp::RedirectToCart
                } else {
                    CartFollowUp::RefreshCart
                }
            }
            Err(error) => {
                view.status = ItemStatus::Failed(error.to_string());
                CartFollowUp::Nothing
            }
        }
    }

    pub fn status_of(&self, variant_id: &str) -> Option<&ItemStatus> {
        match &self.view {
            PromptView::Items(items) => {
                items.iter().find(|view| view.item.variant_id == variant_id).map(|view| &view.status)
            }
            _ => None,
        }
    }

    fn item_mut(&mut self, variant_id: &str) -> Option<&mut ItemView> {
        match &mut self.view {
            PromptView::Items(items) => items.iter_mut().find(|view| view.item.variant_id == variant_id),
            _ => None,
        }
    }
}

/// Translation key for the "why this item" line under a card.
pub fn reason_label_key(reason: ReasonKey) -> &'static str {
    match reason {
        ReasonKey::Handpicked => "reason_handpicked",
        ReasonKey::SameCollection => "reason_same_collection",
        ReasonKey::StorePicks => "reason_store_picks",
    }
}
